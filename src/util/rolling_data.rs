/// Rolling window over f64 samples with a cached sum, so the moving average
/// is O(1) regardless of window size. The window grows up to `capacity`
/// samples and then evicts oldest-first.
pub struct RollingData {
    buf: BufferImpl,
    capacity: usize,
    cached_sum: f64,
}
impl RollingData {
    pub fn new(capacity: usize, initial_value: f64) -> RollingData {
        assert!(capacity > 0);
        let mut buf = BufferImpl::new();
        assert!(buf.add_value(initial_value, capacity).is_none());

        RollingData {
            buf,
            capacity,
            cached_sum: initial_value,
        }
    }

    pub fn add_value(&mut self, value: f64) {
        if let Some(evicted) = self.buf.add_value(value, self.capacity) {
            self.cached_sum -= evicted;
        }
        self.cached_sum += value;
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.len() == 0
    }

    pub fn mean(&self) -> f64 {
        self.cached_sum / self.buf.len() as f64
    }
}

enum BufferImpl {
    Growing(Vec<f64>),
    Ring { buf: Vec<f64>, next: usize },
}
impl BufferImpl {
    fn new() -> BufferImpl {
        BufferImpl::Growing(vec![])
    }

    fn len(&self) -> usize {
        match self {
            BufferImpl::Growing(buf) => buf.len(),
            BufferImpl::Ring { buf, .. } => buf.len(),
        }
    }

    /// adds a new value, returning the value that was evicted in its place (if any)
    #[must_use]
    fn add_value(&mut self, value: f64, capacity: usize) -> Option<f64> {
        match self {
            BufferImpl::Growing(buf) => {
                buf.push(value);
                if buf.len() == capacity {
                    let buf = std::mem::take(buf);
                    *self = BufferImpl::Ring { buf, next: 0 };
                }
                None
            }
            BufferImpl::Ring { buf, next } => {
                let evicted = buf[*next];
                buf[*next] = value;
                *next = (*next + 1) % capacity;
                Some(evicted)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_mean_while_growing() {
        let mut data = RollingData::new(4, 1.0);
        assert_eq!(data.mean(), 1.0);
        data.add_value(3.0);
        assert_eq!(data.len(), 2);
        assert_eq!(data.mean(), 2.0);
    }

    #[test]
    fn test_mean_after_eviction() {
        let mut data = RollingData::new(3, 10.0);
        data.add_value(20.0);
        data.add_value(30.0);
        assert_eq!(data.mean(), 20.0);

        // evicts the initial 10.0
        data.add_value(60.0);
        assert_eq!(data.len(), 3);
        assert_eq!(data.mean(), (20.0 + 30.0 + 60.0) / 3.0);
    }

    #[test]
    fn test_window_of_one_tracks_last_value() {
        let mut data = RollingData::new(1, 5.0);
        data.add_value(9.0);
        assert_eq!(data.len(), 1);
        assert_eq!(data.mean(), 9.0);
    }
}
