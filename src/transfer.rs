use super::task::{BufferValue, Buffers};
use bytes::Bytes;


/// Регионы памяти, которые транспорт перемещает, а не копирует
pub type TransferList = Vec<Bytes>;

/// Собирает transfer list по карте буферов.
///
/// `Copyable` буферы заменяются на месте на `View`, так что и список, и
/// исходящий конверт ссылаются на одну и ту же память. Небинарные значения
/// не трогаются. Порядок совпадает с порядком обхода карты.
pub fn get_task_transfer_list(buffers: &mut Buffers) -> TransferList {
    let mut transfer_list = Vec::with_capacity(buffers.len());

    for value in buffers.values_mut() {
        match value {
            BufferValue::Copyable(vec) => {
                let view = Bytes::from(std::mem::take(vec));
                transfer_list.push(view.clone());
                *value = BufferValue::View(view);
            }
            BufferValue::View(view) => {
                transfer_list.push(view.clone());
            }
            BufferValue::Other(_) => {}
        }
    }

    transfer_list
}

#[inline]
pub fn transfer_size(list: &TransferList) -> usize {
    list.iter().map(Bytes::len).sum()
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extracts_binary_entries_only() {
        let mut buffers = Buffers::new();
        buffers.insert("k1".into(), BufferValue::Copyable(b"hello".to_vec()));
        buffers.insert("k2".into(), BufferValue::View(Bytes::from_static(&[1, 2, 3])));
        buffers.insert("k3".into(), BufferValue::Other(json!("hello")));

        let list = get_task_transfer_list(&mut buffers);

        assert_eq!(list.len(), 2);
        assert_eq!(&list[0][..], b"hello");
        assert_eq!(&list[1][..], &[1, 2, 3]);
        assert_eq!(transfer_size(&list), 8);
        assert_eq!(buffers["k3"], BufferValue::Other(json!("hello")));
    }

    #[test]
    fn test_normalizes_in_place_to_shared_memory() {
        let mut buffers = Buffers::new();
        buffers.insert("b".into(), BufferValue::Copyable(vec![7, 7]));

        let list = get_task_transfer_list(&mut buffers);

        match &buffers["b"] {
            BufferValue::View(view) => assert_eq!(view.as_ptr(), list[0].as_ptr()),
            other => panic!("Expected View, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_mapping() {
        let mut buffers = Buffers::new();
        assert!(get_task_transfer_list(&mut buffers).is_empty());
    }
}
