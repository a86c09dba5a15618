/// Number of slots of a [`RoundRobinCache`].
pub const CACHE_CAPACITY: usize = 16;

/// A fixed-capacity cache of named values.
///
/// Insertion always goes to the slot under a cursor that advances modulo [`CACHE_CAPACITY`],
/// dropping whatever occupied that slot. There is no recency tracking: a value that is hit often
/// is evicted just as soon as one that was never looked up again.
#[derive(Debug)]
pub struct RoundRobinCache<T> {
    slots: [Option<(String, T)>; CACHE_CAPACITY],
    next_slot: usize,
}

impl<T> Default for RoundRobinCache<T> {
    fn default() -> Self {
        RoundRobinCache {
            slots: std::array::from_fn(|_| None),
            next_slot: 0,
        }
    }
}

impl<T> RoundRobinCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| matches!(slot, Some((slot_name, _)) if slot_name == name))
    }

    /// Find the value stored under `name` (exact comparison).
    pub fn lookup(&mut self, name: &str) -> Option<&mut T> {
        let index = self.position(name)?;
        self.slots[index].as_mut().map(|(_, value)| value)
    }

    /// Store `value` under `name` in the slot under the cursor, dropping its previous occupant.
    ///
    /// When `name` is already cached its slot is replaced in place and the cursor stays put.
    pub fn insert_evicting_oldest(&mut self, name: impl Into<String>, value: T) -> &mut T {
        let name = name.into();
        let index = match self.position(&name) {
            Some(index) => index,
            None => {
                let index = self.next_slot;
                self.next_slot = (self.next_slot + 1) % CACHE_CAPACITY;
                index
            }
        };

        let (_, value) = self.slots[index].insert((name, value));
        value
    }

    /// Look `name` up, calling `load` and inserting its result on a miss.
    ///
    /// `Ok(None)` from `load` is passed through and nothing is inserted.
    pub(crate) fn lookup_or_try_insert_with<E>(
        &mut self,
        name: &str,
        load: impl FnOnce() -> Result<Option<T>, E>,
    ) -> Result<Option<&mut T>, E> {
        if let Some(index) = self.position(name) {
            return Ok(self.slots[index].as_mut().map(|(_, value)| value));
        }

        match load()? {
            Some(value) => Ok(Some(self.insert_evicting_oldest(name, value))),
            None => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn seventeenth_insert_evicts_the_first() {
        let mut cache = RoundRobinCache::new();
        for i in 0..=CACHE_CAPACITY {
            cache.insert_evicting_oldest(format!("file{i}.dll"), i);
        }

        assert_eq!(cache.len(), CACHE_CAPACITY);
        assert_eq!(cache.lookup("file0.dll"), None);
        assert_eq!(cache.lookup("file1.dll"), Some(&mut 1));
        assert_eq!(cache.lookup("file16.dll"), Some(&mut 16));
    }

    #[test]
    fn reinserting_a_name_replaces_its_slot() {
        let mut cache = RoundRobinCache::new();
        cache.insert_evicting_oldest("a.dll", 1);
        cache.insert_evicting_oldest("a.dll", 2);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup("a.dll"), Some(&mut 2));

        // The cursor did not move, so the sixteenth name after `a.dll` evicts it.
        for i in 0..CACHE_CAPACITY - 1 {
            cache.insert_evicting_oldest(format!("file{i}.dll"), 0);
        }
        assert_eq!(cache.lookup("a.dll"), Some(&mut 2));
        cache.insert_evicting_oldest("file15.dll", 0);
        assert_eq!(cache.lookup("a.dll"), None);
        assert_eq!(cache.len(), CACHE_CAPACITY);
    }

    #[test]
    fn lookup_compares_names_exactly() {
        let mut cache = RoundRobinCache::new();
        cache.insert_evicting_oldest("kernel32.dll", ());

        assert!(cache.lookup("kernel32.dll").is_some());
        assert!(cache.lookup("KERNEL32.DLL").is_none());
    }

    #[test]
    fn loader_runs_only_on_miss() {
        let mut cache = RoundRobinCache::new();
        let mut loads = 0;

        for _ in 0..3 {
            let value = cache
                .lookup_or_try_insert_with::<()>("a.dll", || {
                    loads += 1;
                    Ok(Some(42))
                })
                .unwrap();
            assert_eq!(value, Some(&mut 42));
        }
        assert_eq!(loads, 1);

        let missing = cache
            .lookup_or_try_insert_with::<()>("b.dll", || Ok(None))
            .unwrap();
        assert_eq!(missing, None);
        assert_eq!(cache.len(), 1);
    }
}
