// OpenMultiMap integration suite.
//
// Each test documents the behavior being verified. Core invariants:
// - Multiset: get(k) returns exactly the values inserted for k and not
//   removed, in insertion order.
// - Removal: remove_key(k) makes get(k) empty and restores len, even with
//   leftover tombstones on the probe path.
// - Cursors: begin()/begin_at()/next()/end() enumerate every value; an
//   empty table has begin() == end().
// - Rebuild: iterating one map into a fresh one reproduces it.
use probe_multimap::policy::ZeroState;
use probe_multimap::OpenMultiMap;

// Test: duplicate-key inserts build up a value list behind one key.
// Verifies: insertion order is preserved across the inline-to-list
// transition and further appends.
#[test]
fn values_of_one_key_in_insertion_order() {
    let mut m: OpenMultiMap<u64, u64> = OpenMultiMap::new();
    m.insert(12345, 67890);
    m.insert(12345, 67891);
    m.insert(12345, 67893);
    m.insert(12345, 67892);

    assert_eq!(m.get(&12345), &[67890, 67891, 67893, 67892]);
    assert_eq!(m.get_first(&12345), Some(&67890));
    assert_eq!(m.len(), 1);
}

// Test: total hash collision across several multi-valued keys.
// Verifies: cursor iteration positioned at each key yields that key's
// values in insertion order despite every entry sharing one probe path.
#[test]
fn per_key_iteration_under_total_collision() {
    let mut m: OpenMultiMap<u64, u64, ZeroState> = OpenMultiMap::with_hasher(ZeroState);
    for v in [67890, 67891, 67892, 67893] {
        m.insert(12345, v);
    }
    for v in [111, 112, 113, 114] {
        m.insert(12346, v);
    }
    for v in [222, 223, 224] {
        m.insert(12347, v);
    }

    for (key, expected) in [
        (12345u64, &[67890, 67891, 67892, 67893][..]),
        (12346, &[111, 112, 113, 114][..]),
        (12347, &[222, 223, 224][..]),
    ] {
        let mut cur = m.begin_at(&key);
        let mut vals = Vec::new();
        for _ in 0..expected.len() {
            assert_eq!(m.key_at(cur), &key);
            vals.push(*m.value_at(cur));
            cur = m.next(cur);
        }
        assert_eq!(vals, expected);
        assert_eq!(m.get(&key), expected);
    }
}

// Test: grow from a tiny requested capacity, then drain completely.
// Verifies: all entries survive the resize chain; deleting keys highest
// to lowest empties the table and begin() == end().
#[test]
fn fill_from_small_capacity_then_drain() {
    let mut m: OpenMultiMap<u64, u64> = OpenMultiMap::with_capacity(2);
    for i in 0..239u64 {
        m.insert(i, i);
    }
    assert_eq!(m.len(), 239);
    assert_eq!(m.iter().count(), 239);

    for i in (0..239u64).rev() {
        assert!(m.remove_key(&i));
    }
    assert!(m.is_empty());
    assert_eq!(m.begin(), m.end());
    assert_eq!(m.iter().count(), 0);
}

// Test: insert followed by remove_key round-trips.
// Verifies: len is restored and subsequent lookups miss.
#[test]
fn insert_remove_round_trip() {
    let mut m: OpenMultiMap<u64, u64> = OpenMultiMap::new();
    for k in 0..100u64 {
        m.insert(k, k * 2);
    }
    let len = m.len();

    m.insert(555, 1);
    m.insert(555, 2);
    assert_eq!(m.len(), len + 1);
    assert!(m.remove_key(&555));
    assert_eq!(m.len(), len);
    assert!(m.get(&555).is_empty());
    assert_eq!(m.get_first(&555), None);
    assert!(!m.remove_key(&555));
}

// Test: rebuild by iteration.
// Verifies: inserting every (k, v) yielded by iter() into a fresh map
// reproduces the same per-key value sequences.
#[test]
fn rebuild_by_iteration_is_equivalent() {
    let mut m: OpenMultiMap<u64, u64> = OpenMultiMap::new();
    for k in 0..500u64 {
        for v in 0..(k % 5) + 1 {
            m.insert(k, v);
        }
    }

    let mut rebuilt: OpenMultiMap<u64, u64> = OpenMultiMap::new();
    for (k, v) in m.iter() {
        rebuilt.insert(*k, *v);
    }

    assert_eq!(rebuilt.len(), m.len());
    for k in 0..500u64 {
        assert_eq!(rebuilt.get(&k), m.get(&k));
    }
}

// Test: misses on an empty and on a populated table.
// Verifies: the absent-key surface is an empty slice / None / false.
#[test]
fn absent_key_surface() {
    let mut m: OpenMultiMap<u64, u64> = OpenMultiMap::new();
    assert!(m.get(&1).is_empty());
    assert_eq!(m.get_first(&1), None);
    assert!(!m.contains_key(&1));
    assert!(!m.remove_key(&1));
    assert_eq!(m.begin_at(&1), m.end());

    m.insert(2, 20);
    assert!(m.get(&1).is_empty());
    assert!(m.contains_key(&2));
}

// Test: cursor equality semantics.
// Verifies: cursors compare by position, so begin() of a one-value map
// advances to end() in one step.
#[test]
fn cursor_advances_to_end() {
    let mut m: OpenMultiMap<u64, u64> = OpenMultiMap::new();
    m.insert(1, 10);
    let cur = m.begin();
    assert_ne!(cur, m.end());
    assert_eq!(m.next(cur), m.end());
}

// Test: keys with non-trivial payloads (heap keys and values).
// Verifies: string keys hash, compare, and drop correctly through insert,
// overflow, removal and map drop.
#[test]
fn heap_keys_and_values() {
    let mut m: OpenMultiMap<String, String> = OpenMultiMap::new();
    m.insert("alpha".to_string(), "a1".to_string());
    m.insert("alpha".to_string(), "a2".to_string());
    m.insert("beta".to_string(), "b1".to_string());

    assert_eq!(m.get(&"alpha".to_string()), &["a1", "a2"]);
    assert_eq!(m.get_first(&"beta".to_string()).map(String::as_str), Some("b1"));
    assert!(m.remove_key(&"alpha".to_string()));
    assert!(m.get(&"alpha".to_string()).is_empty());
    assert_eq!(m.len(), 1);
}

// Test: probe statistics surface on a live table.
// Verifies: stats cover every resident entry, and an empty table reports
// zeroed statistics.
#[test]
fn probe_statistics_surface() {
    let m: OpenMultiMap<u64, u64> = OpenMultiMap::new();
    let empty = m.probe_stats();
    assert_eq!(empty.max, 0);
    assert_eq!(empty.samples, 0);

    let mut m: OpenMultiMap<u64, u64> = OpenMultiMap::new();
    for k in 0..1000u64 {
        m.insert(k, k);
    }
    let runs = m.probe_stats();
    assert!(runs.max >= 1);
    assert!(runs.mean >= 1.0);
    assert!(runs.samples >= 1);

    let displacement = m.displacement_stats();
    // One sample per resident key; every search inspects at least one slot.
    assert_eq!(displacement.samples, m.len());
    assert!(displacement.mean >= 1.0);
    assert!(displacement.max as f64 >= displacement.mean);
}
