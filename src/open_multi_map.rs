//! Open-addressed multimap with inline first values and per-key overflow
//! lists.
//!
//! Trade-offs of this layout:
//!
//! 1. Open addressing with inlined storage is cache friendly, but the load
//!    factor must stay low, so more slot memory is allocated than a chained
//!    table would use.
//! 2. The overflow list makes iterating a key's values fast; with few
//!    duplicate keys it only costs the unused inline value field.

use core::hash::{BuildHasher, Hash};
use core::mem::MaybeUninit;
use core::slice;

use crate::policy::{HalfFull, LoadFactor, Mix64State};
use crate::stats::{ProbeStats, StatsAcc};

// Slot states, in load-bearing order: `word < INLINE` means the slot can
// receive a new entry, `word >= SPILL_MIN` means the word is the address of
// the slot's overflow list. Heap allocations are aligned well past 4, so a
// real list address can never collide with the tags.
const FREE: u64 = 0;
const DELETED: u64 = 1;
const INLINE: u64 = 2;
const SPILL_MIN: u64 = 3;

// First allocation of an overflow list holds this many values.
const SPILL_INITIAL_CAPACITY: usize = 4;

const MINIMUM_CAPACITY: usize = 32;
const PAGE_SIZE: usize = 4096;

/// One table slot. Key and value storage is raw: it is written on the
/// transition into the INLINE/list states and read out or dropped on the
/// transition out, never touched otherwise.
struct Slot<K, V> {
    word: u64,
    hash: u64,
    key: MaybeUninit<K>,
    value: MaybeUninit<V>,
}

impl<K, V> Slot<K, V> {
    #[inline]
    fn free() -> Self {
        Slot {
            word: FREE,
            hash: 0,
            key: MaybeUninit::uninit(),
            value: MaybeUninit::uninit(),
        }
    }

    /// The terminator placed one past the last real slot. Claims INLINE so
    /// the forward walk stops here; its payload is never touched.
    #[inline]
    fn sentinel() -> Self {
        Slot {
            word: INLINE,
            ..Self::free()
        }
    }

    #[inline]
    fn is_valid(&self) -> bool {
        self.word >= INLINE
    }

    #[inline]
    fn has_list(&self) -> bool {
        self.word >= SPILL_MIN
    }

    /// # Safety
    /// The slot must be in the list state.
    #[inline]
    unsafe fn list(&self) -> &Vec<V> {
        &*(self.word as usize as *const Vec<V>)
    }

    /// # Safety
    /// The slot must be in the list state.
    #[inline]
    unsafe fn list_mut(&mut self) -> &mut Vec<V> {
        &mut *(self.word as usize as *mut Vec<V>)
    }

    /// Takes ownership of the overflow list back from the word.
    ///
    /// # Safety
    /// The slot must be in the list state; the caller must move the slot out
    /// of that state before anything else reads the word.
    #[inline]
    unsafe fn take_list(&mut self) -> Box<Vec<V>> {
        Box::from_raw(self.word as usize as *mut Vec<V>)
    }

    /// Number of values held by a valid slot.
    ///
    /// # Safety
    /// The slot must be valid (INLINE or list state).
    #[inline]
    unsafe fn value_count(&self) -> usize {
        if self.has_list() {
            self.list().len()
        } else {
            1
        }
    }
}

/// Position of one value inside an [`OpenMultiMap`].
///
/// Compared by slot and remaining value count only. Any mutation of the
/// addressed entry invalidates cursors on it; a resize invalidates all
/// cursors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cursor {
    slot: usize,
    remaining: usize,
}

/// Open-addressed, single-writer hash multimap.
///
/// The first value of a key is stored inline in its slot; further values
/// move to a heap-allocated overflow list owned by the slot. Linear probing
/// resolves collisions, and the table doubles when the entry count reaches
/// the load-factor threshold.
pub struct OpenMultiMap<K, V, S = Mix64State, L = HalfFull> {
    // `capacity + 1` slots; the extra tail slot is the iteration sentinel.
    slots: Box<[Slot<K, V>]>,
    mask: u64,
    capacity: usize,
    // Number of valid slots, i.e. resident keys; never the value count.
    len: usize,
    // Valid plus DELETED slots; bounds tombstone accumulation.
    used: usize,
    threshold: usize,
    hasher: S,
    load: L,
}

impl<K, V> OpenMultiMap<K, V>
where
    K: Hash + Eq,
{
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, Mix64State)
    }
}

impl<K, V> Default for OpenMultiMap<K, V>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S, L> OpenMultiMap<K, V, S, L>
where
    K: Hash + Eq,
    S: BuildHasher,
    L: LoadFactor,
{
    pub fn with_hasher(hasher: S) -> Self
    where
        L: Default,
    {
        Self::with_capacity_and_hasher(0, hasher)
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self
    where
        L: Default,
    {
        Self::with_capacity_hasher_and_load(capacity, hasher, L::default())
    }

    pub fn with_capacity_hasher_and_load(capacity: usize, hasher: S, load: L) -> Self {
        let capacity = Self::initial_capacity(capacity);
        let threshold = load.threshold(capacity);
        assert!(
            threshold < capacity,
            "load factor must leave free slots in an open table"
        );
        OpenMultiMap {
            slots: Self::alloc_slots(capacity),
            mask: (capacity - 1) as u64,
            capacity,
            len: 0,
            used: 0,
            threshold,
            hasher,
            load,
        }
    }

    /// Requested capacities round up to a power of two, with a floor of
    /// [`MINIMUM_CAPACITY`] or one page worth of slots, whichever is larger.
    fn initial_capacity(requested: usize) -> usize {
        let per_page = PAGE_SIZE / core::mem::size_of::<Slot<K, V>>();
        requested
            .max(MINIMUM_CAPACITY)
            .max(per_page)
            .next_power_of_two()
    }

    fn alloc_slots(capacity: usize) -> Box<[Slot<K, V>]> {
        let mut slots = Vec::with_capacity(capacity + 1);
        for _ in 0..capacity {
            slots.push(Slot::free());
        }
        slots.push(Slot::sentinel());
        slots.into_boxed_slice()
    }

    /// Number of distinct keys resident in the table (not the value count).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entry count at which the next insert resizes.
    #[inline]
    pub fn resize_threshold(&self) -> usize {
        self.threshold
    }

    /// Current fill ratio of the slot array.
    pub fn load_factor(&self) -> f64 {
        self.len as f64 / self.capacity as f64
    }

    #[inline]
    fn step(&self, idx: usize) -> usize {
        (idx + 1) & self.mask as usize
    }

    /// Inserts a value for `key`, keeping any values already present.
    ///
    /// Values of one key are returned by [`get`](Self::get) in insertion
    /// order. Resizes first when the entry count has reached the threshold;
    /// a resize invalidates all cursors.
    pub fn insert(&mut self, key: K, value: V) {
        if self.len == self.threshold || self.used == self.threshold {
            self.resize();
        }

        let hash = self.hasher.hash_one(&key);
        let mut idx = (hash & self.mask) as usize;
        // First FREE or DELETED slot on the probe path; the scan continues to
        // the terminating FREE slot so an existing entry for the key is never
        // shadowed by an earlier tombstone.
        let mut target: Option<usize> = None;
        loop {
            let slot = &self.slots[idx];
            if slot.word == FREE {
                break;
            }
            if slot.word == DELETED {
                if target.is_none() {
                    target = Some(idx);
                }
            } else if slot.hash == hash {
                // SAFETY: the slot is valid, so its key is initialized.
                if unsafe { slot.key.assume_init_ref() } == &key {
                    self.push_value(idx, value);
                    return;
                }
            }
            idx = self.step(idx);
        }

        let dst = target.unwrap_or(idx);
        let slot = &mut self.slots[dst];
        if slot.word == FREE {
            self.used += 1;
        }
        slot.word = INLINE;
        slot.hash = hash;
        slot.key.write(key);
        slot.value.write(value);
        self.len += 1;
    }

    /// Appends a value to the valid slot at `idx`, migrating the inline
    /// value into a fresh overflow list on the second insert.
    fn push_value(&mut self, idx: usize, value: V) {
        let slot = &mut self.slots[idx];
        if slot.has_list() {
            // SAFETY: list state; growth replaces the buffer by doubling.
            unsafe { slot.list_mut() }.push(value);
        } else {
            // SAFETY: INLINE state; the inline value moves to list index 0
            // and the slot leaves the INLINE state in the same breath.
            let first = unsafe { slot.value.assume_init_read() };
            let mut list = Vec::with_capacity(SPILL_INITIAL_CAPACITY);
            list.push(first);
            list.push(value);
            slot.word = Box::into_raw(Box::new(list)) as u64;
        }
    }

    /// Probes for the slot holding `key`. DELETED slots are probed through;
    /// the first FREE slot ends the search.
    fn find_slot(&self, key: &K) -> Option<usize> {
        let hash = self.hasher.hash_one(key);
        let mut idx = (hash & self.mask) as usize;
        loop {
            let slot = &self.slots[idx];
            if slot.word == FREE {
                return None;
            }
            if slot.word != DELETED && slot.hash == hash {
                // SAFETY: the slot is valid, so its key is initialized.
                if unsafe { slot.key.assume_init_ref() } == key {
                    return Some(idx);
                }
            }
            idx = self.step(idx);
        }
    }

    /// All values stored under `key`, in insertion order. Empty on miss.
    pub fn get(&self, key: &K) -> &[V] {
        match self.find_slot(key) {
            None => &[],
            Some(idx) => {
                let slot = &self.slots[idx];
                if slot.has_list() {
                    // SAFETY: list state.
                    unsafe { slot.list() }.as_slice()
                } else {
                    // SAFETY: INLINE state, so the inline value is live.
                    unsafe { slice::from_ref(slot.value.assume_init_ref()) }
                }
            }
        }
    }

    /// First value stored under `key`; skips the inline-vs-list branch at
    /// call sites that only need one value.
    pub fn get_first(&self, key: &K) -> Option<&V> {
        let idx = self.find_slot(key)?;
        let slot = &self.slots[idx];
        if slot.has_list() {
            // SAFETY: list state; the list is never empty.
            Some(unsafe { &slot.list()[0] })
        } else {
            // SAFETY: INLINE state.
            Some(unsafe { slot.value.assume_init_ref() })
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.find_slot(key).is_some()
    }

    /// Removes `key` and all of its values. Returns false on miss.
    ///
    /// The slot becomes a tombstone that later searches probe through;
    /// cursors on the removed entry are invalidated.
    pub fn remove_key(&mut self, key: &K) -> bool {
        match self.find_slot(key) {
            None => false,
            Some(idx) => {
                self.clear_slot(idx);
                true
            }
        }
    }

    /// Drops the payload of the valid slot at `idx` and marks it DELETED.
    fn clear_slot(&mut self, idx: usize) {
        let slot = &mut self.slots[idx];
        // SAFETY: the slot is valid; each payload is dropped exactly once and
        // the slot leaves the valid state before the borrow ends.
        unsafe {
            if slot.has_list() {
                drop(slot.take_list());
            } else {
                slot.value.assume_init_drop();
            }
            slot.key.assume_init_drop();
        }
        slot.word = DELETED;
        self.len -= 1;
    }

    /// Removes the single value addressed by `cur`.
    ///
    /// Removing the last value removes the entry; an entry left with one
    /// value collapses back to inline storage. Cursors on the affected entry
    /// are invalidated, cursors on other entries stay valid.
    pub fn remove_at(&mut self, cur: Cursor) {
        assert!(
            cur.slot < self.capacity && cur.remaining >= 1,
            "cursor does not address a value"
        );
        let slot = &mut self.slots[cur.slot];
        assert!(slot.is_valid(), "cursor does not address a value");

        if !slot.has_list() {
            debug_assert_eq!(cur.remaining, 1);
            self.clear_slot(cur.slot);
            return;
        }

        // SAFETY: list state throughout; the two-value case moves the
        // survivor inline and retires the list before the word is rewritten.
        unsafe {
            let len = slot.list().len();
            debug_assert!(len >= 2 && cur.remaining <= len);
            let at = len - cur.remaining;
            if len == 2 {
                let mut list = slot.take_list();
                drop(list.remove(at));
                let survivor = list.pop().expect("two-value list must yield a survivor");
                slot.value.write(survivor);
                slot.word = INLINE;
            } else {
                // Shifts the tail left one position.
                drop(slot.list_mut().remove(at));
            }
        }
    }

    /// Cursor on the first value of the table, or [`end`](Self::end) when
    /// the table is empty.
    pub fn begin(&self) -> Cursor {
        self.cursor_at(self.skip_to_valid(0))
    }

    /// Cursor on the first value of `key`, or [`end`](Self::end) on miss.
    pub fn begin_at(&self, key: &K) -> Cursor {
        match self.find_slot(key) {
            Some(idx) => self.cursor_at(idx),
            None => self.end(),
        }
    }

    /// The past-the-end cursor.
    #[inline]
    pub fn end(&self) -> Cursor {
        Cursor {
            slot: self.capacity,
            remaining: 0,
        }
    }

    /// Advances to the next value, crossing into the next valid entry when
    /// the current entry's values are exhausted.
    pub fn next(&self, cur: Cursor) -> Cursor {
        debug_assert!(cur.remaining >= 1, "cannot advance the end cursor");
        if cur.remaining > 1 {
            Cursor {
                slot: cur.slot,
                remaining: cur.remaining - 1,
            }
        } else {
            self.cursor_at(self.skip_to_valid(cur.slot + 1))
        }
    }

    pub fn key_at(&self, cur: Cursor) -> &K {
        let slot = &self.slots[cur.slot];
        assert!(
            cur.slot < self.capacity && slot.is_valid(),
            "cursor does not address a value"
        );
        // SAFETY: valid slot.
        unsafe { slot.key.assume_init_ref() }
    }

    pub fn value_at(&self, cur: Cursor) -> &V {
        let slot = &self.slots[cur.slot];
        assert!(
            cur.slot < self.capacity && slot.is_valid() && cur.remaining >= 1,
            "cursor does not address a value"
        );
        // SAFETY: valid slot; the cursor's remaining count is relative to
        // the entry's current value count.
        unsafe {
            let count = slot.value_count();
            debug_assert!(cur.remaining <= count);
            let at = count - cur.remaining;
            if slot.has_list() {
                &slot.list()[at]
            } else {
                slot.value.assume_init_ref()
            }
        }
    }

    /// Iterator over every `(key, value)` pair. Keys with several values
    /// appear once per value, values in insertion order.
    pub fn iter(&self) -> Iter<'_, K, V, S, L> {
        Iter {
            map: self,
            cur: self.begin(),
        }
    }

    /// Walks forward to the next valid slot. The sentinel one past the last
    /// real slot is itself valid, so the walk needs no bounds check.
    #[inline]
    fn skip_to_valid(&self, mut idx: usize) -> usize {
        while self.slots[idx].word < INLINE {
            idx += 1;
        }
        idx
    }

    fn cursor_at(&self, idx: usize) -> Cursor {
        if idx >= self.capacity {
            return self.end();
        }
        // SAFETY: `skip_to_valid`/`find_slot` only land on valid slots.
        let remaining = unsafe { self.slots[idx].value_count() };
        Cursor {
            slot: idx,
            remaining,
        }
    }

    /// Doubles the table and rehashes every entry. Overflow lists move by
    /// pointer; their contents are not rebuilt. Tombstones do not survive.
    #[cold]
    #[inline(never)]
    fn resize(&mut self) {
        let new_capacity = self.capacity << 1;
        let new_mask = (new_capacity - 1) as u64;
        let new_threshold = self.load.threshold(new_capacity);
        assert!(
            self.len < new_threshold && new_threshold < new_capacity,
            "load factor must leave free slots in an open table"
        );

        let mut new_slots = Self::alloc_slots(new_capacity);
        let mut remaining = self.len;
        for old_idx in 0..self.capacity {
            if remaining == 0 {
                break;
            }
            let old = &mut self.slots[old_idx];
            if !old.is_valid() {
                continue;
            }
            remaining -= 1;

            // Fresh tables hold no DELETED slots, so probing for FREE alone
            // is enough here.
            let mut idx = (old.hash & new_mask) as usize;
            while new_slots[idx].word != FREE {
                idx = (idx + 1) & new_mask as usize;
            }

            let dst = &mut new_slots[idx];
            dst.word = old.word;
            dst.hash = old.hash;
            // SAFETY: the old slot is valid; key and inline value move out
            // and the old array is freed below without dropping payloads.
            unsafe {
                dst.key.write(old.key.assume_init_read());
                if old.word == INLINE {
                    dst.value.write(old.value.assume_init_read());
                }
            }
        }

        self.slots = new_slots;
        self.capacity = new_capacity;
        self.mask = new_mask;
        self.threshold = new_threshold;
        self.used = self.len;
    }

    /// Clustering summary of the slot array. A probe run is a maximal
    /// stretch of non-FREE slots; runs consisting only of tombstones are
    /// not counted.
    pub fn probe_stats(&self) -> ProbeStats {
        let mut acc = StatsAcc::default();
        let mut run = 0usize;
        let mut run_has_valid = false;
        for idx in 0..self.capacity {
            let word = self.slots[idx].word;
            if word == FREE {
                if run_has_valid {
                    acc.push(run);
                }
                run = 0;
                run_has_valid = false;
            } else {
                run += 1;
                run_has_valid |= word >= INLINE;
            }
        }
        if run_has_valid {
            acc.push(run);
        }
        acc.finish()
    }

    /// Per-entry probe distances: for each resident key, the number of
    /// slots a search for it inspects.
    pub fn displacement_stats(&self) -> ProbeStats {
        let mut acc = StatsAcc::default();
        for idx in 0..self.capacity {
            let slot = &self.slots[idx];
            if !slot.is_valid() {
                continue;
            }
            let home = (slot.hash & self.mask) as usize;
            acc.push((idx.wrapping_sub(home) & self.mask as usize) + 1);
        }
        acc.finish()
    }
}

impl<K, V, S, L> Drop for OpenMultiMap<K, V, S, L> {
    fn drop(&mut self) {
        // Stop scanning once every resident entry has been dropped.
        let mut remaining = self.len;
        for idx in 0..self.capacity {
            if remaining == 0 {
                break;
            }
            let slot = &mut self.slots[idx];
            if !slot.is_valid() {
                continue;
            }
            remaining -= 1;
            // SAFETY: valid slot; this is the last owner of its payload.
            unsafe {
                if slot.has_list() {
                    drop(slot.take_list());
                } else {
                    slot.value.assume_init_drop();
                }
                slot.key.assume_init_drop();
            }
        }
    }
}

/// Borrowing iterator over an [`OpenMultiMap`]; see
/// [`iter`](OpenMultiMap::iter).
pub struct Iter<'a, K, V, S = Mix64State, L = HalfFull> {
    map: &'a OpenMultiMap<K, V, S, L>,
    cur: Cursor,
}

impl<'a, K, V, S, L> Iterator for Iter<'a, K, V, S, L>
where
    K: Hash + Eq,
    S: BuildHasher,
    L: LoadFactor,
{
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur.remaining == 0 {
            return None;
        }
        let key = self.map.key_at(self.cur);
        let value = self.map.value_at(self.cur);
        self.cur = self.map.next(self.cur);
        Some((key, value))
    }
}
