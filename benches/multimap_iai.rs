#[cfg(target_os = "linux")]
mod bench {
    use iai::black_box;
    use probe_multimap::{BucketMultiMap, ChainedMultiMap, OpenMultiMap};
    use std::sync::OnceLock;

    const OPS: usize = 1_000;
    const KEY_SPACE: u64 = 512;

    fn lcg(mut s: u64) -> impl Iterator<Item = u64> {
        std::iter::from_fn(move || {
            s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
            Some(s)
        })
    }

    // Prebuilt maps so the probe benches measure lookups, not construction.
    static OPEN: OnceLock<OpenMultiMap<u64, u64>> = OnceLock::new();
    static CHAINED: OnceLock<ChainedMultiMap<u64, u64>> = OnceLock::new();
    static BUCKET: OnceLock<BucketMultiMap<u64, u64>> = OnceLock::new();

    fn open_map() -> &'static OpenMultiMap<u64, u64> {
        OPEN.get_or_init(|| {
            let mut m = OpenMultiMap::new();
            for (i, x) in lcg(1).take(OPS).enumerate() {
                m.insert(x % KEY_SPACE, i as u64);
            }
            m
        })
    }

    fn chained_map() -> &'static ChainedMultiMap<u64, u64> {
        CHAINED.get_or_init(|| {
            let mut m = ChainedMultiMap::new();
            for (i, x) in lcg(1).take(OPS).enumerate() {
                m.insert(x % KEY_SPACE, i as u64);
            }
            m
        })
    }

    fn bucket_map() -> &'static BucketMultiMap<u64, u64> {
        BUCKET.get_or_init(|| {
            let mut m = BucketMultiMap::new();
            for (i, x) in lcg(1).take(OPS).enumerate() {
                m.insert(x % KEY_SPACE, i as u64);
            }
            m
        })
    }

    pub fn open_insert_1000_ops() {
        let mut m: OpenMultiMap<u64, u64> = OpenMultiMap::new();
        for (i, x) in lcg(1).take(OPS).enumerate() {
            m.insert(x, i as u64);
        }
        black_box(m.len());
    }

    pub fn chained_insert_1000_ops() {
        let mut m: ChainedMultiMap<u64, u64> = ChainedMultiMap::new();
        for (i, x) in lcg(1).take(OPS).enumerate() {
            m.insert(x, i as u64);
        }
        black_box(m.len());
    }

    pub fn bucket_insert_1000_ops() {
        let mut m: BucketMultiMap<u64, u64> = BucketMultiMap::new();
        for (i, x) in lcg(1).take(OPS).enumerate() {
            m.insert(x, i as u64);
        }
        black_box(m.len());
    }

    pub fn open_probe_hit_1000_ops() {
        let m = open_map();
        for x in lcg(1).take(OPS) {
            black_box(m.get_first(&(x % KEY_SPACE)));
        }
    }

    pub fn chained_probe_hit_1000_ops() {
        let m = chained_map();
        for x in lcg(1).take(OPS) {
            black_box(m.get_first(&(x % KEY_SPACE)));
        }
    }

    pub fn bucket_probe_hit_1000_ops() {
        let m = bucket_map();
        for x in lcg(1).take(OPS) {
            black_box(m.get_first(&(x % KEY_SPACE)));
        }
    }

    pub fn open_probe_miss_1000_ops() {
        let m = open_map();
        for x in lcg(0xdead_beef).take(OPS) {
            black_box(m.get_first(&(KEY_SPACE + x % KEY_SPACE)));
        }
    }
}

#[cfg(target_os = "linux")]
fn main() {
    use bench::*;
    let benches: &[&(&'static str, fn())] = &[
        &("open_insert_1000_ops", open_insert_1000_ops),
        &("chained_insert_1000_ops", chained_insert_1000_ops),
        &("bucket_insert_1000_ops", bucket_insert_1000_ops),
        &("open_probe_hit_1000_ops", open_probe_hit_1000_ops),
        &("chained_probe_hit_1000_ops", chained_probe_hit_1000_ops),
        &("bucket_probe_hit_1000_ops", bucket_probe_hit_1000_ops),
        &("open_probe_miss_1000_ops", open_probe_miss_1000_ops),
    ];
    iai::runner(benches);
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("Skipping: iai benches require Linux/valgrind.");
}
