/// Identity of a slab entry.
///
/// A key pairs a slot index with the generation the slot had when the
/// value was inserted. Once the value is removed the slot's generation is
/// bumped, so stale keys held elsewhere (task wakers, queued wake
/// messages) no longer resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Key {
    index: usize,
    generation: u64,
}

enum Slot<T> {
    Occupied(u64, T),
    Vacant(u64),
}

/// A generational slab allocator.
///
/// Values are stored in a contiguous vector and addressed by [`Key`].
/// Freed slots are reused, and every reuse starts a new generation.
pub(crate) struct Slab<T> {
    slots: Vec<Slot<T>>,
    /// Stack of free indices that can be reused.
    free: Vec<usize>,
    len: usize,
}

impl<T> Slab<T> {
    /// Creates a slab with room for `size` values before growing.
    pub(crate) fn new(size: usize) -> Self {
        Self {
            slots: Vec::with_capacity(size),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Inserts a value and returns its key.
    ///
    /// A free slot is reused if one is available, otherwise the slab grows.
    pub(crate) fn insert(&mut self, item: T) -> Key {
        self.len += 1;

        if let Some(index) = self.free.pop() {
            let generation = match self.slots[index] {
                Slot::Vacant(generation) => generation,
                Slot::Occupied(..) => unreachable!("free list points at an occupied slot"),
            };
            self.slots[index] = Slot::Occupied(generation, item);
            return Key { index, generation };
        }

        let index = self.slots.len();
        self.slots.push(Slot::Occupied(0, item));
        Key {
            index,
            generation: 0,
        }
    }

    /// Removes the value for `key`, if the key is still live.
    pub(crate) fn remove(&mut self, key: Key) -> Option<T> {
        self.get(key)?;

        let next = Slot::Vacant(key.generation.wrapping_add(1));
        match std::mem::replace(&mut self.slots[key.index], next) {
            Slot::Occupied(_, item) => {
                self.free.push(key.index);
                self.len -= 1;
                Some(item)
            }
            Slot::Vacant(_) => None,
        }
    }

    /// Returns a reference to the value for `key`, if the key is still live.
    pub(crate) fn get(&self, key: Key) -> Option<&T> {
        match self.slots.get(key.index)? {
            Slot::Occupied(generation, item) if *generation == key.generation => Some(item),
            _ => None,
        }
    }

    /// Removes every value, invalidating all outstanding keys.
    pub(crate) fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.len);

        for index in 0..self.slots.len() {
            if let Slot::Occupied(generation, _) = self.slots[index] {
                let key = Key { index, generation };
                if let Some(item) = self.remove(key) {
                    items.push(item);
                }
            }
        }

        items
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut slab = Slab::new(2);
        let a = slab.insert("a");
        let b = slab.insert("b");

        assert_eq!(slab.get(a), Some(&"a"));
        assert_eq!(slab.get(b), Some(&"b"));
        assert_eq!(slab.len(), 2);

        assert_eq!(slab.remove(a), Some("a"));
        assert_eq!(slab.get(a), None);
        assert_eq!(slab.remove(a), None);
        assert_eq!(slab.len(), 1);
    }

    #[test]
    fn test_stale_key_after_reuse() {
        let mut slab = Slab::new(1);
        let old = slab.insert(1);
        slab.remove(old);

        let new = slab.insert(2);
        assert_ne!(old, new);
        assert_eq!(slab.get(old), None);
        assert_eq!(slab.get(new), Some(&2));
    }

    #[test]
    fn test_drain_invalidates_keys() {
        let mut slab = Slab::new(4);
        let keys: Vec<_> = (0..4).map(|i| slab.insert(i)).collect();
        slab.remove(keys[1]);

        let mut drained = slab.drain();
        drained.sort();
        assert_eq!(drained, vec![0, 2, 3]);
        assert_eq!(slab.len(), 0);
        assert!(keys.iter().all(|k| slab.get(*k).is_none()));
    }
}
