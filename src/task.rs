use super::errors::PoolError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fmt,
    time::Duration,
};


pub type Data = BTreeMap<String, Value>;
pub type Buffers = BTreeMap<String, BufferValue>;

/// Метод, которым координатор просит воркер завершиться
pub const SHUTDOWN_METHOD: &str = "finish";


/// Значение в карте бинарных полезных нагрузок
#[derive(Debug, Clone, PartialEq)]
pub enum BufferValue {
    /// Собственный буфер, который перед отправкой надо превратить в `View`
    Copyable(Vec<u8>),
    /// Передаваемое представление: клоны ссылаются на одну и ту же память
    View(Bytes),
    /// Не бинарные данные, в transfer list не попадают
    Other(Value),
}

impl BufferValue {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BufferValue::Copyable(v) => Some(v.as_slice()),
            BufferValue::View(b) => Some(b.as_ref()),
            BufferValue::Other(_) => None,
        }
    }

    #[inline]
    pub fn is_binary(&self) -> bool {
        !matches!(self, BufferValue::Other(_))
    }
}

impl From<Vec<u8>> for BufferValue {
    fn from(v: Vec<u8>) -> Self {
        BufferValue::Copyable(v)
    }
}

impl From<Bytes> for BufferValue {
    fn from(b: Bytes) -> Self {
        BufferValue::View(b)
    }
}

impl From<Value> for BufferValue {
    fn from(v: Value) -> Self {
        BufferValue::Other(v)
    }
}


/// Запрос со стороны вызывающего
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Task {
    pub id: Option<String>,
    /// Вернуть воркер в пул сразу после отправки, не дожидаясь ответа
    pub release_before: bool,
    pub data: Data,
    pub buffers: Buffers,
    pub deadline: Option<Duration>,
}

impl Task {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_buffer(mut self, key: impl Into<String>, value: impl Into<BufferValue>) -> Self {
        self.buffers.insert(key.into(), value.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn release_before(mut self) -> Self {
        self.release_before = true;
        self
    }

    pub fn buffer(&self, key: &str) -> Option<&[u8]> {
        self.buffers.get(key).and_then(BufferValue::as_bytes)
    }
}


/// Результат обработчика на стороне воркера
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutput {
    pub data: Data,
    pub buffers: Buffers,
}

impl TaskOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_buffer(mut self, key: impl Into<String>, value: impl Into<BufferValue>) -> Self {
        self.buffers.insert(key.into(), value.into());
        self
    }
}


#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: String,
    pub method: String,
    pub data: Data,
    pub buffers: Buffers,
}

impl Request {
    /// Представление запроса в виде `Task` для обработчика
    pub fn into_task(self) -> Task {
        Task {
            id: Some(self.id),
            release_before: false,
            data: self.data,
            buffers: self.buffers,
            deadline: None,
        }
    }
}


#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: String,
    pub data: Data,
    pub buffers: Buffers,
}

impl Response {
    pub fn buffer(&self, key: &str) -> Option<&[u8]> {
        self.buffers.get(key).and_then(BufferValue::as_bytes)
    }
}


/// Структурно сериализованная ошибка: имя, сообщение и стек
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedError {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl SerializedError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }
}

/// То, что "бросил" обработчик: ошибка или произвольное значение
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Failure {
    Error(SerializedError),
    Value(Value),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Error(e) => write!(f, "{}: {}", e.name, e.message),
            Failure::Value(v) => write!(f, "{}", v),
        }
    }
}


/// Сообщение протокола, проверенное на границе транспорта
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Failure { id: String, error: Failure },
    Shutdown,
    /// Посторонний трафик в том же канале
    Other(Value),
}

impl Message {
    pub fn id(&self) -> Option<&str> {
        match self {
            Message::Request(r) => Some(&r.id),
            Message::Response(r) => Some(&r.id),
            Message::Failure { id, .. } => Some(id),
            Message::Shutdown | Message::Other(_) => None,
        }
    }

    #[inline]
    pub fn is_task(&self) -> bool {
        matches!(self, Message::Request(_))
    }

    /// Serialize to JSON line (with newline).
    ///
    /// Посторонний трафик пишется как есть, без приведения к конверту.
    pub fn to_line(&self) -> Result<String, PoolError> {
        let json = match self {
            Message::Other(value) => serde_json::to_string(value),
            message => serde_json::to_string(&WireEnvelope::try_from(message.clone())?),
        };
        let mut json = json.map_err(|e| PoolError::Malformed(e.to_string()))?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from JSON line.
    ///
    /// Всё, что не является сообщением протокола, возвращается как `Other`
    /// с исходным значением целиком.
    pub fn from_line(line: &str) -> Result<Self, PoolError> {
        let value: Value = serde_json::from_str(line.trim())
            .map_err(|e| PoolError::Malformed(e.to_string()))?;
        let Ok(wire) = serde_json::from_value::<WireEnvelope>(value.clone()) else {
            return Ok(Message::Other(value));
        };
        match Message::try_from(wire)? {
            Message::Other(_) => Ok(Message::Other(value)),
            message => Ok(message),
        }
    }
}


/// Плоская форма конверта на проводе
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEnvelope {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Data>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffers: Option<BTreeMap<String, Bytes>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_task: Option<bool>,
}

// На проводе живут только бинарные значения
fn wire_buffers(buffers: Buffers) -> BTreeMap<String, Bytes> {
    buffers
        .into_iter()
        .filter_map(|(k, v)| match v {
            BufferValue::Copyable(vec) => Some((k, Bytes::from(vec))),
            BufferValue::View(b) => Some((k, b)),
            BufferValue::Other(_) => None,
        })
        .collect()
}

fn from_wire_buffers(buffers: Option<BTreeMap<String, Bytes>>) -> Buffers {
    buffers
        .unwrap_or_default()
        .into_iter()
        .map(|(k, b)| (k, BufferValue::View(b)))
        .collect()
}

impl TryFrom<Message> for WireEnvelope {
    type Error = PoolError;

    fn try_from(message: Message) -> Result<Self, Self::Error> {
        let wire = match message {
            Message::Request(r) => WireEnvelope {
                id: Some(r.id),
                method: Some(r.method),
                data: Some(r.data),
                buffers: Some(wire_buffers(r.buffers)),
                is_task: Some(true),
                ..Default::default()
            },
            Message::Response(r) => WireEnvelope {
                id: Some(r.id),
                data: Some(r.data),
                buffers: Some(wire_buffers(r.buffers)),
                ..Default::default()
            },
            Message::Failure { id, error } => WireEnvelope {
                id: Some(id),
                error: Some(error),
                ..Default::default()
            },
            Message::Shutdown => WireEnvelope {
                id: None,
                method: Some(SHUTDOWN_METHOD.to_string()),
                ..Default::default()
            },
            Message::Other(value) => serde_json::from_value(value)
                .map_err(|e| PoolError::Malformed(format!("not an envelope: {}", e)))?,
        };
        Ok(wire)
    }
}

impl TryFrom<WireEnvelope> for Message {
    type Error = PoolError;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        if wire.is_task.unwrap_or(false) {
            let id = wire.id.ok_or(PoolError::MissingId)?;
            let method = wire
                .method
                .ok_or_else(|| PoolError::Malformed(format!("request {} has no method", id)))?;
            return Ok(Message::Request(Request {
                id,
                method,
                data: wire.data.unwrap_or_default(),
                buffers: from_wire_buffers(wire.buffers),
            }));
        }

        match (wire.id, wire.error) {
            (Some(id), Some(error)) => Ok(Message::Failure { id, error }),
            (Some(id), None) => Ok(Message::Response(Response {
                id,
                data: wire.data.unwrap_or_default(),
                buffers: from_wire_buffers(wire.buffers),
            })),
            (None, error) => {
                if error.is_none() && wire.method.as_deref() == Some(SHUTDOWN_METHOD) {
                    return Ok(Message::Shutdown);
                }
                let rest = WireEnvelope {
                    id: None,
                    method: wire.method,
                    data: wire.data,
                    buffers: wire.buffers,
                    error,
                    is_task: wire.is_task,
                };
                serde_json::to_value(rest)
                    .map(Message::Other)
                    .map_err(|e| PoolError::Malformed(e.to_string()))
            }
        }
    }
}
