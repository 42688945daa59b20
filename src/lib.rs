//! probe-multimap: single-writer hash multimaps for probe-heavy workloads.
//!
//! Three table layouts trade insert cost, lookup cost, and iteration cost
//! against each other; all store multiple values per key and resize by
//! doubling at a pluggable load-factor threshold:
//!
//! - [`OpenMultiMap`]: open addressing with linear probing. The first value
//!   of a key lives inline in its slot, further values in a per-key
//!   overflow list. Supports removal and cursor iteration.
//! - [`ChainedMultiMap`]: bucket array plus one global collision chain, so
//!   the whole table iterates as a single list walk.
//! - [`BucketMultiMap`]: bucket array with independent per-bucket chains,
//!   favoring plain lookups.
//!
//! All maps are single-threaded: mutation requires `&mut self`, shared
//! reads are plain `&self` borrows. Hashing and resize timing are policy
//! parameters (see [`policy`]); the default hasher is a deterministic
//! avalanching 64-bit mixer.

mod bucket_multi_map;
mod chained_multi_map;
mod open_multi_map;
pub mod policy;
mod stats;

pub use bucket_multi_map::{BucketMultiMap, Iter as BucketIter};
pub use chained_multi_map::{ChainedMultiMap, Iter as ChainedIter};
pub use open_multi_map::{Cursor, Iter as OpenIter, OpenMultiMap};
pub use stats::ProbeStats;
