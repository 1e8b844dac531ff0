use criterion::*;
use lfskl::SkipMap;
use parking_lot::RwLock;
use rand::prelude::*;
use std::{
  collections::BTreeMap,
  sync::{atomic::*, *},
  thread,
};

type Bytes = Vec<u8>;

/// The operations measured, implemented by the skipmap and by a locked `BTreeMap` baseline.
trait OrderedMap: Send + Sync + 'static {
  const NAME: &'static str;

  fn create() -> Self;

  fn get(&self, key: &[u8]) -> Option<Bytes>;

  fn insert(&self, key: Bytes, value: Bytes);

  fn pop_first(&self) -> Option<Bytes>;

  /// Visits at most `n` entries starting at `from`.
  fn scan(&self, from: &[u8], n: usize) -> usize;
}

impl OrderedMap for SkipMap<Bytes, Bytes> {
  const NAME: &'static str = "skipmap";

  fn create() -> Self {
    SkipMap::new()
  }

  fn get(&self, key: &[u8]) -> Option<Bytes> {
    SkipMap::get(self, key)
  }

  fn insert(&self, key: Bytes, value: Bytes) {
    SkipMap::insert(self, key, value);
  }

  fn pop_first(&self) -> Option<Bytes> {
    SkipMap::pop_first(self).map(|ent| ent.into_key())
  }

  fn scan(&self, from: &[u8], n: usize) -> usize {
    self.range::<[u8], _>(from..).take(n).count()
  }
}

impl OrderedMap for RwLock<BTreeMap<Bytes, Bytes>> {
  const NAME: &'static str = "btreemap_rwlock";

  fn create() -> Self {
    RwLock::new(BTreeMap::new())
  }

  fn get(&self, key: &[u8]) -> Option<Bytes> {
    self.read().get(key).cloned()
  }

  fn insert(&self, key: Bytes, value: Bytes) {
    self.write().insert(key, value);
  }

  fn pop_first(&self) -> Option<Bytes> {
    self.write().pop_first().map(|(k, _)| k)
  }

  fn scan(&self, from: &[u8], n: usize) -> usize {
    self
      .read()
      .range::<[u8], _>(from..)
      .take(n)
      .count()
  }
}

fn random_key(rng: &mut rand::rngs::ThreadRng) -> Bytes {
  rng.random::<[u8; 16]>().to_vec()
}

/// Looks the key up if `case.1` is set, inserts it otherwise.
fn round<M: OrderedMap>(map: &M, case: &(Bytes, bool), exp: &Bytes) {
  if case.1 {
    if let Some(v) = map.get(&case.0) {
      assert_eq!(&v, exp);
    }
  } else {
    map.insert(case.0.clone(), exp.clone());
  }
}

/// Runs `op` on a background thread against `map` until the returned handle is stopped.
struct Background {
  stop: Arc<AtomicBool>,
  handle: thread::JoinHandle<()>,
}

impl Background {
  fn spawn<M: OrderedMap>(map: &Arc<M>, mut op: impl FnMut(&M) + Send + 'static) -> Self {
    let map = map.clone();
    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    let handle = thread::spawn(move || {
      while !s.load(Ordering::SeqCst) {
        op(&map);
      }
    });
    Self { stop, handle }
  }

  fn stop(self) {
    self.stop.store(true, Ordering::SeqCst);
    self.handle.join().unwrap();
  }
}

fn bench_read_write_frac<M: OrderedMap>(b: &mut Bencher<'_>, frac: &usize) {
  let frac = *frac;
  let value = b"00123".to_vec();
  let map = Arc::new(M::create());

  let v = value.clone();
  let bg = Background::spawn(&map, move |m| {
    let mut rng = rand::rng();
    let f = rng.random_range(0..11);
    round(m, &(random_key(&mut rng), f < frac), &v);
  });

  let mut rng = rand::rng();
  b.iter_batched_ref(
    || {
      let f = rng.random_range(0..11);
      (random_key(&mut rng), f < frac)
    },
    |case| round(&*map, case, &value),
    BatchSize::SmallInput,
  );
  bg.stop();
}

fn bench_read_write<M: OrderedMap>(c: &mut Criterion) {
  let mut group = c.benchmark_group(format!("{}_read_write", M::NAME));
  for i in 0..=10 {
    group.bench_with_input(
      BenchmarkId::from_parameter(i),
      &i,
      bench_read_write_frac::<M>,
    );
  }
  group.finish();
}

fn bench_write<M: OrderedMap>(c: &mut Criterion) {
  let map = Arc::new(M::create());
  let value = b"00123".to_vec();

  let v = value.clone();
  let bg = Background::spawn(&map, move |m| {
    m.insert(random_key(&mut rand::rng()), v.clone())
  });

  let mut rng = rand::rng();
  c.bench_function(&format!("{}_write", M::NAME), |b| {
    b.iter_batched(
      || random_key(&mut rng),
      |key| map.insert(key, value.clone()),
      BatchSize::SmallInput,
    )
  });
  bg.stop();
}

fn bench_insert_pop_first<M: OrderedMap>(c: &mut Criterion) {
  let map = M::create();
  let mut next = 0u64;
  c.bench_function(&format!("{}_insert_pop_first", M::NAME), |b| {
    b.iter(|| {
      map.insert(next.to_be_bytes().to_vec(), Bytes::new());
      next += 1;
      black_box(map.pop_first());
    })
  });
}

fn bench_scan<M: OrderedMap>(c: &mut Criterion) {
  const ENTRIES: usize = 100_000;
  const SCAN: usize = 100;

  let map = Arc::new(M::create());
  let mut rng = rand::rng();
  for _ in 0..ENTRIES {
    map.insert(random_key(&mut rng), b"00123".to_vec());
  }

  let bg = Background::spawn(&map, |m| {
    m.insert(random_key(&mut rand::rng()), b"00123".to_vec())
  });

  c.bench_function(&format!("{}_scan_{}", M::NAME, SCAN), |b| {
    b.iter_batched(
      || random_key(&mut rng),
      |from| black_box(map.scan(&from, SCAN)),
      BatchSize::SmallInput,
    )
  });
  bg.stop();
}

fn bench_skipmap(c: &mut Criterion) {
  bench_read_write::<SkipMap<Bytes, Bytes>>(c);
  bench_write::<SkipMap<Bytes, Bytes>>(c);
  bench_insert_pop_first::<SkipMap<Bytes, Bytes>>(c);
  bench_scan::<SkipMap<Bytes, Bytes>>(c);
}

fn bench_btreemap_rwlock(c: &mut Criterion) {
  bench_read_write::<RwLock<BTreeMap<Bytes, Bytes>>>(c);
  bench_write::<RwLock<BTreeMap<Bytes, Bytes>>>(c);
  bench_insert_pop_first::<RwLock<BTreeMap<Bytes, Bytes>>>(c);
  bench_scan::<RwLock<BTreeMap<Bytes, Bytes>>>(c);
}

criterion_group!(benches, bench_skipmap, bench_btreemap_rwlock);
criterion_main!(benches);
