//! Closed-addressing multimap whose collision chains are threaded through a
//! single global list.
//!
//! Characteristics of this layout:
//!
//! 1. Insert finds its slot and links the node in constant time.
//! 2. Every node lives on one singly linked chain rooted at a header node,
//!    so whole-table iteration is a plain list walk and resize re-threads
//!    nodes without allocating.
//! 3. Each insert allocates a node, and lookups chase pointers, so cache
//!    behavior is worse than the open-addressed layout.

use core::hash::{BuildHasher, Hash};
use core::marker::PhantomData;
use core::ptr;
use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};

use crate::policy::{LoadFactor, Mix64State, Percent};

// Default slot count fills one page with bucket pointers.
const PAGE_SIZE: usize = 4096;
const INIT_SLOT_COUNT: usize = PAGE_SIZE / core::mem::size_of::<usize>();

struct Node<K, V> {
    hash: u64,
    next: *mut Node<K, V>,
    key: K,
    value: V,
}

/// Closed-addressing, single-writer hash multimap with one global chain.
///
/// All nodes of one bucket form a contiguous *group* on the chain, and each
/// non-empty bucket stores the node immediately preceding its group (the
/// header node for the group at the chain front). Lookups start at that
/// node's successor; inserts into an existing group link right behind the
/// stored predecessor. This keeps per-bucket access cheap while the whole
/// table stays iterable as one list.
///
/// There is no deletion; entries live until the map is dropped. The default
/// load factor is 400%: with chains, the entry count may exceed the slot
/// count severalfold before a resize pays off.
pub struct ChainedMultiMap<K, V, S = Mix64State, L = Percent<400>> {
    buckets: Box<[*mut Node<K, V>]>,
    // Header node; only its `next` field is ever initialized or read.
    head: *mut Node<K, V>,
    mask: u64,
    slot_count: usize,
    len: usize,
    threshold: usize,
    hasher: S,
    load: L,
}

impl<K, V> ChainedMultiMap<K, V>
where
    K: Hash + Eq,
{
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// `capacity` rounds up to the next power of two; zero selects the
    /// one-page default.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, Mix64State)
    }
}

impl<K, V> Default for ChainedMultiMap<K, V>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S, L> ChainedMultiMap<K, V, S, L>
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
        let slot_count = if capacity == 0 {
            INIT_SLOT_COUNT
        } else {
            capacity.next_power_of_two()
        };
        ChainedMultiMap {
            buckets: vec![ptr::null_mut(); slot_count].into_boxed_slice(),
            head: alloc_header::<K, V>(),
            mask: (slot_count - 1) as u64,
            slot_count,
            len: 0,
            threshold: load.threshold(slot_count),
            hasher,
            load,
        }
    }

    /// Number of entries (key-value pairs) in the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of bucket slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slot_count
    }

    /// Entry count at which the next insert resizes.
    #[inline]
    pub fn resize_threshold(&self) -> usize {
        self.threshold
    }

    /// Entries per slot; routinely above 1.0 for this layout.
    pub fn load_factor(&self) -> f64 {
        self.len as f64 / self.slot_count as f64
    }

    /// Adds a key-value pair. Existing entries for the key are kept; no
    /// ordering among a key's values is guaranteed.
    pub fn insert(&mut self, key: K, value: V) {
        if self.len == self.threshold {
            self.resize();
            debug_assert!(self.len < self.threshold);
        }

        let hash = self.hasher.hash_one(&key);
        let index = (hash & self.mask) as usize;
        let node = Box::into_raw(Box::new(Node {
            hash,
            next: ptr::null_mut(),
            key,
            value,
        }));
        // SAFETY: the node is fresh and spliced into the chain exactly once.
        unsafe { self.splice(node, index) };
        self.len += 1;
    }

    /// Links `node` into the group of bucket `index`, preserving group
    /// contiguity. Shared by insert and resize; does not touch the entry
    /// count.
    ///
    /// # Safety
    /// `node` must be a valid, unlinked node whose masked hash is `index`.
    unsafe fn splice(&mut self, node: *mut Node<K, V>, index: usize) {
        let pred = self.buckets[index];
        if pred.is_null() {
            // The bucket opens a new group at the chain front.
            let first = (*self.head).next;
            (*node).next = first;
            if !first.is_null() {
                // The bucket owning the old front group sits one hop further
                // from the header now; its stored predecessor is this node.
                let owner = ((*first).hash & self.mask) as usize;
                debug_assert_eq!(self.buckets[owner], self.head);
                self.buckets[owner] = node;
            }
            (*self.head).next = node;
            self.buckets[index] = self.head;
        } else {
            // Existing group: the node becomes its first member, right after
            // the stored predecessor, which stays as it is.
            (*node).next = (*pred).next;
            (*pred).next = node;
        }
    }

    /// Calls `f` with every value stored under `key`.
    pub fn for_each_value<'a, F>(&'a self, key: &K, mut f: F)
    where
        F: FnMut(&'a V),
    {
        let hash = self.hasher.hash_one(key);
        let index = (hash & self.mask) as usize;
        let pred = self.buckets[index];
        if pred.is_null() {
            return;
        }
        // SAFETY: the stored predecessor's successor starts the group; the
        // walk stops once the masked hash leaves this bucket.
        unsafe {
            let mut node = (*pred).next;
            while !node.is_null() && ((*node).hash & self.mask) as usize == index {
                if (*node).hash == hash && (*node).key == *key {
                    f(&(*node).value);
                }
                node = (*node).next;
            }
        }
    }

    /// All values stored under `key`; empty on miss.
    pub fn get(&self, key: &K) -> Vec<&V> {
        let mut out = Vec::new();
        self.for_each_value(key, |v| out.push(v));
        out
    }

    /// Some value stored under `key`, or `None` on miss.
    pub fn get_first(&self, key: &K) -> Option<&V> {
        let mut out = None;
        self.for_each_value(key, |v| {
            if out.is_none() {
                out = Some(v);
            }
        });
        out
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get_first(key).is_some()
    }

    /// Iterator over every entry, by a single walk of the global chain.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            // SAFETY: the header's `next` is always initialized.
            node: unsafe { (*self.head).next },
            _marker: PhantomData,
        }
    }

    /// Doubles the slot count and re-threads every node. The old bucket
    /// array is discarded wholesale; the chain itself carries all entries,
    /// so no node is allocated or freed.
    #[cold]
    #[inline(never)]
    fn resize(&mut self) {
        debug_assert_eq!(self.len, self.threshold);

        self.slot_count <<= 1;
        self.mask = (self.slot_count - 1) as u64;
        self.threshold = self.load.threshold(self.slot_count);
        self.buckets = vec![ptr::null_mut(); self.slot_count].into_boxed_slice();

        // SAFETY: each node is detached from the old chain and re-spliced
        // exactly once; `next` is read before the splice rewrites it.
        unsafe {
            let mut node = (*self.head).next;
            (*self.head).next = ptr::null_mut();
            while !node.is_null() {
                let next = (*node).next;
                let index = ((*node).hash & self.mask) as usize;
                self.splice(node, index);
                node = next;
            }
        }
    }
}

impl<K, V, S, L> Drop for ChainedMultiMap<K, V, S, L> {
    fn drop(&mut self) {
        // Every entry hangs off the single chain; the buckets need no walk.
        unsafe {
            let mut node = (*self.head).next;
            while !node.is_null() {
                let next = (*node).next;
                drop(Box::from_raw(node));
                node = next;
            }
            free_header(self.head);
        }
    }
}

// The table uniquely owns its nodes and header; sending or sharing it only
// sends or shares K and V.
unsafe impl<K: Send, V: Send, S: Send, L: Send> Send for ChainedMultiMap<K, V, S, L> {}
unsafe impl<K: Sync, V: Sync, S: Sync, L: Sync> Sync for ChainedMultiMap<K, V, S, L> {}

/// Allocates the chain header: a node whose key and value stay
/// uninitialized and are never read or dropped.
fn alloc_header<K, V>() -> *mut Node<K, V> {
    let layout = Layout::new::<Node<K, V>>();
    // SAFETY: the layout has non-zero size; only header fields are written.
    unsafe {
        let p = alloc(layout) as *mut Node<K, V>;
        if p.is_null() {
            handle_alloc_error(layout);
        }
        ptr::addr_of_mut!((*p).hash).write(0);
        ptr::addr_of_mut!((*p).next).write(ptr::null_mut());
        p
    }
}

/// # Safety
/// `p` must come from [`alloc_header`] and must not be used afterwards.
unsafe fn free_header<K, V>(p: *mut Node<K, V>) {
    dealloc(p as *mut u8, Layout::new::<Node<K, V>>());
}

/// Borrowing iterator over a [`ChainedMultiMap`]; see
/// [`iter`](ChainedMultiMap::iter).
pub struct Iter<'a, K, V> {
    node: *mut Node<K, V>,
    _marker: PhantomData<&'a Node<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.node.is_null() {
            return None;
        }
        // SAFETY: non-null chain nodes stay valid for the map borrow.
        let node = unsafe { &*self.node };
        self.node = node.next;
        Some((&node.key, &node.value))
    }
}
