use std::ops::{Deref, DerefMut};

/// A value with at most one saved copy, used for the cache/restore cycle of
/// the stateful components.
///
/// `cache` clones the current value, `restore` swaps the clone back in and
/// `clear_cache` drops it. Restoring gives back exactly the cached value,
/// floating point bit patterns included.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T: Clone> {
    current: T,
    cached: Option<T>,
}

impl<T: Clone> Snapshot<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: value,
            cached: None,
        }
    }

    /// Saves a copy of the current value, replacing any older copy.
    pub fn cache(&mut self) {
        self.cached = Some(self.current.clone());
    }

    /// Puts the cached copy back. Returns false if nothing was cached.
    pub fn restore(&mut self) -> bool {
        match self.cached.take() {
            Some(saved) => {
                self.current = saved;
                true
            }
            None => false,
        }
    }

    pub fn clear_cache(&mut self) {
        self.cached = None;
    }

    pub fn is_cached(&self) -> bool {
        self.cached.is_some()
    }

    pub fn current(&self) -> &T {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut T {
        &mut self.current
    }

    pub fn replace(&mut self, value: T) {
        self.current = value;
    }
}

impl<T: Clone> Deref for Snapshot<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.current
    }
}

impl<T: Clone> DerefMut for Snapshot<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.current
    }
}

#[cfg(test)]
mod tests {
    use super::Snapshot;

    #[test]
    fn restore_brings_back_cached_bits() {
        let mut s = Snapshot::new(vec![0.1_f64, 1.0 / 3.0]);
        s.cache();
        s.current_mut()[1] = 7.0;
        assert!(s.restore());
        assert_eq!(s[1].to_bits(), (1.0_f64 / 3.0).to_bits());
        assert!(!s.is_cached());
        assert!(!s.restore());
    }

    #[test]
    fn clear_cache_keeps_mutation() {
        let mut s = Snapshot::new(1usize);
        s.cache();
        s.replace(2);
        s.clear_cache();
        assert!(!s.restore());
        assert_eq!(*s, 2);
    }

    #[test]
    fn inner_methods_resolve_through_deref() {
        let mut s = Snapshot::new(vec![1.0_f64, 2.0]);
        assert_eq!(s.get(1), Some(&2.0));
        s.cache();
        if let Some(x) = s.get_mut(0) {
            *x = 5.0;
        }
        assert_eq!(s.current()[0], 5.0);
        assert!(s.restore());
        assert_eq!(s.first(), Some(&1.0));
    }
}
