#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolMetrics {
    pub size: usize,
    pub available: usize,
    pub borrowed: usize,
    pub pending: usize,
    pub min: usize,
    pub max: usize,
    pub created: usize,
    pub destroyed: usize,
}

impl PoolMetrics {
    pub fn utilization(&self) -> f64 {
        if self.size == 0 {
            return 0.0;
        }
        self.borrowed.min(self.size) as f64 / self.size as f64
    }

    pub fn queue_pressure(&self) -> f64 {
        self.pending as f64
    }

    #[inline]
    pub fn at_capacity(&self) -> bool {
        self.size >= self.max && self.available == 0
    }
}
