use std::collections::BTreeSet;

/// An ordered set, used for ancestry tracking during orphan re-attachment
/// (the set of tree addresses already visited while walking upward from a
/// rebuilt node) and for accumulating distinct item types seen per tree.
#[derive(Debug, Clone, Default)]
pub struct Set<T: Ord> {
    inner: BTreeSet<T>,
}

impl<T: Ord> Set<T> {
    pub fn new() -> Self {
        Self {
            inner: BTreeSet::new(),
        }
    }

    pub fn insert(&mut self, value: T) -> bool {
        self.inner.insert(value)
    }

    pub fn insert_from(&mut self, values: impl IntoIterator<Item = T>) {
        for v in values {
            self.inner.insert(v);
        }
    }

    pub fn has(&self, value: &T) -> bool {
        self.inner.contains(value)
    }

    /// True if any of `values` is already a member.
    pub fn has_any(&self, values: impl IntoIterator<Item = T>) -> bool {
        values.into_iter().any(|v| self.inner.contains(&v))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn remove(&mut self, value: &T) -> bool {
        self.inner.remove(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.inner.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_has() {
        let mut s = Set::new();
        assert!(s.insert(1));
        assert!(!s.insert(1));
        assert!(s.has(&1));
        assert!(!s.has(&2));
    }

    #[test]
    fn has_any_detects_overlap() {
        let mut s: Set<u64> = Set::new();
        s.insert_from([1, 2, 3]);
        assert!(s.has_any([5, 6, 2]));
        assert!(!s.has_any([5, 6, 7]));
    }

    #[test]
    fn remove_and_len() {
        let mut s = Set::new();
        s.insert_from([1, 2, 3]);
        assert_eq!(s.len(), 3);
        s.remove(&2);
        assert_eq!(s.len(), 2);
        assert!(!s.has(&2));
    }
}
