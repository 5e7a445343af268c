use parking_lot::Mutex;

/// A pool of reusable `Vec<u8>` buffers, bucketed by exact length.
///
/// Node reads allocate a fresh buffer per node by default; under a
/// full-filesystem walk that means millions of allocations of a handful of
/// distinct sizes (the node size, and occasionally a superblock-sized
/// read). Pooling by exact length avoids that churn without needing a
/// general-purpose allocator bypass.
pub struct SlicePool {
    buckets: Mutex<Vec<(usize, Vec<Vec<u8>>)>>,
    max_per_bucket: usize,
}

impl SlicePool {
    pub fn new(max_per_bucket: usize) -> Self {
        Self {
            buckets: Mutex::new(Vec::new()),
            max_per_bucket,
        }
    }

    /// Takes a buffer of exactly `len` bytes, zeroed, either recycled from
    /// the pool or freshly allocated.
    pub fn take(&self, len: usize) -> Vec<u8> {
        let mut buckets = self.buckets.lock();
        if let Some((_, bucket)) = buckets.iter_mut().find(|(n, _)| *n == len) {
            if let Some(mut buf) = bucket.pop() {
                buf.iter_mut().for_each(|b| *b = 0);
                return buf;
            }
        }
        vec![0u8; len]
    }

    /// Returns a buffer to the pool for reuse. Buffers beyond
    /// `max_per_bucket` for their length are simply dropped.
    pub fn give(&self, buf: Vec<u8>) {
        let len = buf.len();
        let mut buckets = self.buckets.lock();
        match buckets.iter_mut().find(|(n, _)| *n == len) {
            Some((_, bucket)) => {
                if bucket.len() < self.max_per_bucket {
                    bucket.push(buf);
                }
            }
            None => buckets.push((len, vec![buf])),
        }
    }

    pub fn pooled_count(&self, len: usize) -> usize {
        self.buckets
            .lock()
            .iter()
            .find(|(n, _)| *n == len)
            .map(|(_, b)| b.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_gives_correctly_sized_zeroed_buffer() {
        let pool = SlicePool::new(4);
        let buf = pool.take(16);
        assert_eq!(buf.len(), 16);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn give_then_take_recycles() {
        let pool = SlicePool::new(4);
        let mut buf = pool.take(8);
        buf[0] = 0xFF;
        pool.give(buf);
        assert_eq!(pool.pooled_count(8), 1);
        let recycled = pool.take(8);
        assert_eq!(recycled.len(), 8);
        assert_eq!(recycled[0], 0); // reused buffers are re-zeroed
        assert_eq!(pool.pooled_count(8), 0);
    }

    #[test]
    fn give_beyond_max_is_dropped() {
        let pool = SlicePool::new(1);
        pool.give(vec![0u8; 4]);
        pool.give(vec![0u8; 4]);
        assert_eq!(pool.pooled_count(4), 1);
    }
}
