use super::*;
use crate::Descend;

use core::ops::{Bound, RangeBounds};
use std::{
  collections::{BTreeSet, HashSet},
  format,
  string::String,
  sync::{atomic::AtomicUsize, Arc},
  vec::Vec,
};

use wg::WaitGroup;

fn key(i: usize) -> String {
  format!("{:05}", i)
}

fn make_value(i: usize) -> String {
  format!("v{:05}", i)
}

fn empty_in(l: SkipMap<String, String>) {
  assert!(l.is_empty());
  assert_eq!(l.len(), 0);
  assert!(l.first().is_none());
  assert!(l.last().is_none());
  assert!(l.first_key().is_none());
  assert!(l.last_key().is_none());
  assert!(l.ceiling("aaa").is_none());
  assert!(l.lower("aaa").is_none());
  assert!(l.higher("aaa").is_none());
  assert!(l.floor("aaa").is_none());
  assert!(l.get("aaa").is_none());
  assert!(!l.contains_key("aaa"));
  assert!(l.remove("aaa").is_none());
  assert!(l.pop_first().is_none());
  assert!(l.pop_last().is_none());
  assert!(l.iter().next().is_none());
  assert!(l.iter_rev().next().is_none());
  assert!(l.range::<str, _>(..).next().is_none());
  assert_eq!(l.height(), 1);
}

#[test]
fn test_empty() {
  empty_in(SkipMap::new());
}

fn basic_in(l: SkipMap<String, String>) {
  // Try adding values.
  assert!(l.insert(key(1), make_value(1)).is_none());
  assert!(l.insert(key(3), make_value(3)).is_none());
  assert!(l.insert(key(2), make_value(2)).is_none());

  assert_eq!(l.get(&key(1)).unwrap(), make_value(1));
  assert_eq!(l.get(key(2).as_str()).unwrap(), make_value(2));
  assert_eq!(l.get(&key(3)).unwrap(), make_value(3));
  assert!(l.get(&key(4)).is_none());
  assert_eq!(l.len(), 3);

  // replace
  assert_eq!(l.insert(key(2), make_value(22)), Some(make_value(2)));
  assert_eq!(l.get(&key(2)).unwrap(), make_value(22));
  assert_eq!(l.len(), 3);

  let ent = l.get_entry(&key(3)).unwrap();
  assert_eq!(ent.key(), &key(3));
  assert_eq!(ent.value(), &make_value(3));

  let keys: Vec<_> = l.keys().collect();
  assert_eq!(keys, [key(1), key(2), key(3)]);
}

#[test]
fn test_basic() {
  basic_in(SkipMap::new());
}

#[test]
fn test_basic_yield_now() {
  basic_in(SkipMap::new().with_yield_now());
}

fn basic_large_in(l: SkipMap<String, String>) {
  #[cfg(miri)]
  const N: usize = 100;
  #[cfg(not(miri))]
  const N: usize = 5000;

  for i in 0..N {
    assert!(l.insert(key(i), make_value(i)).is_none());
  }

  for i in 0..N {
    let k = key(i);
    let ent = l.get_entry(&k).unwrap();
    assert_eq!(ent.value(), &make_value(i));
    assert_eq!(ent.key(), &k);
  }

  assert_eq!(N, l.len());
  assert!(l.height() > 1);
  assert!(l.height() <= MAX_HEIGHT);

  for (i, ent) in l.iter().enumerate() {
    assert_eq!(ent.key(), &key(i));
  }

  for i in (0..N).step_by(2) {
    assert_eq!(l.remove(&key(i)), Some(make_value(i)));
  }
  assert_eq!(N / 2, l.len());
  for i in 0..N {
    assert_eq!(l.contains_key(&key(i)), i % 2 == 1);
  }
}

#[test]
fn test_basic_large() {
  basic_large_in(SkipMap::new());
}

fn get_or_insert_in(l: SkipMap<u64, &'static str>) {
  assert_eq!(l.get_or_insert(5, "x"), None);
  assert_eq!(l.get_or_insert(5, "y"), Some("x"));
  assert_eq!(l.get(&5), Some("x"));

  assert_eq!(l.get_or_insert_with(6, || "z"), "z");
  assert_eq!(l.get_or_insert_with(6, || unreachable!()), "z");
  assert_eq!(l.len(), 2);

  assert!(l.try_insert(7, "a").is_ok());
  assert_eq!(l.try_insert(7, "b"), Err(Error::Duplicated));
  assert_eq!(l.get(&7), Some("a"));

  // a removed key can be inserted again
  assert_eq!(l.remove(&5), Some("x"));
  assert_eq!(l.get_or_insert(5, "w"), None);
  assert_eq!(l.get(&5), Some("w"));
}

#[test]
fn test_get_or_insert() {
  get_or_insert_in(SkipMap::new());
}

fn remove_in(l: SkipMap<u64, &'static str>) {
  l.insert(1, "a");
  l.insert(2, "b");
  l.insert(3, "c");

  assert_eq!(l.remove(&2), Some("b"));
  assert_eq!(l.remove(&2), None);
  assert_eq!(l.remove(&4), None);
  assert!(!l.contains_key(&2));
  assert_eq!(l.keys().collect::<Vec<_>>(), [1, 3]);

  assert!(!l.remove_if(&1, &"b"));
  assert_eq!(l.get(&1), Some("a"));
  assert!(l.remove_if(&1, &"a"));
  assert!(!l.remove_if(&1, &"a"));
  assert_eq!(l.len(), 1);
}

#[test]
fn test_remove() {
  remove_in(SkipMap::new());
}

fn replace_in(l: SkipMap<u64, &'static str>) {
  assert_eq!(l.replace(&1, "a"), None);
  assert!(l.is_empty());

  l.insert(1, "a");
  assert_eq!(l.replace(&1, "b"), Some("a"));
  assert_eq!(l.get(&1), Some("b"));

  assert!(!l.compare_and_replace(&1, &"a", "c"));
  assert!(l.compare_and_replace(&1, &"b", "c"));
  assert_eq!(l.get(&1), Some("c"));
  assert!(!l.compare_and_replace(&2, &"c", "d"));
  assert_eq!(l.len(), 1);
}

#[test]
fn test_replace() {
  replace_in(SkipMap::new());
}

fn navigate_in(l: SkipMap<u64, u64>) {
  for i in (10..=50).step_by(10) {
    l.insert(i, i * 100);
  }

  assert_eq!(l.first_key(), Some(10));
  assert_eq!(l.last_key(), Some(50));
  assert_eq!(l.first().unwrap().into_inner(), (10, 1000));
  assert_eq!(l.last().unwrap().into_inner(), (50, 5000));

  assert_eq!(l.floor_key(&25), Some(20));
  assert_eq!(l.floor_key(&20), Some(20));
  assert_eq!(l.floor_key(&5), None);
  assert_eq!(l.ceiling_key(&25), Some(30));
  assert_eq!(l.ceiling_key(&30), Some(30));
  assert_eq!(l.ceiling_key(&55), None);
  assert_eq!(l.lower_key(&30), Some(20));
  assert_eq!(l.lower_key(&10), None);
  assert_eq!(l.higher_key(&30), Some(40));
  assert_eq!(l.higher_key(&50), None);

  assert_eq!(l.floor(&25).unwrap().into_inner(), (20, 2000));
  assert_eq!(l.ceiling(&25).unwrap().into_inner(), (30, 3000));
  assert_eq!(l.lower(&25).unwrap().into_inner(), (20, 2000));
  assert_eq!(l.higher(&25).unwrap().into_inner(), (30, 3000));

  // removed keys are skipped
  l.remove(&20);
  l.remove(&50);
  assert_eq!(l.floor_key(&25), Some(10));
  assert_eq!(l.lower_key(&30), Some(10));
  assert_eq!(l.last_key(), Some(40));
  assert_eq!(l.higher_key(&40), None);
}

#[test]
fn test_navigate() {
  navigate_in(SkipMap::new());
}

#[test]
fn test_navigate_yield_now() {
  navigate_in(SkipMap::new().with_yield_now());
}

fn pop_in(l: SkipMap<u64, u64>) {
  for i in 0..100 {
    l.insert(i, i);
  }

  assert_eq!(l.pop_first().unwrap().into_inner(), (0, 0));
  assert_eq!(l.pop_last().unwrap().into_inner(), (99, 99));
  assert_eq!(l.first_key(), Some(1));
  assert_eq!(l.last_key(), Some(98));
  assert_eq!(l.len(), 98);

  let mut expected = 1;
  while let Some(ent) = l.pop_first() {
    assert_eq!(*ent.key(), expected);
    expected += 1;
  }
  assert_eq!(expected, 99);
  assert!(l.is_empty());
  assert!(l.pop_last().is_none());
}

#[test]
fn test_pop() {
  pop_in(SkipMap::new());
}

fn iter_in(l: SkipMap<u64, u64>) {
  for i in (0..100).rev() {
    l.insert(i, i * 2);
  }

  let entries: Vec<_> = l.iter().map(Entry::into_inner).collect();
  assert_eq!(entries, (0..100).map(|i| (i, i * 2)).collect::<Vec<_>>());
  assert_eq!(l.keys().collect::<Vec<_>>(), (0..100).collect::<Vec<_>>());
  assert_eq!(
    l.values().collect::<Vec<_>>(),
    (0..100).map(|i| i * 2).collect::<Vec<_>>()
  );
  assert_eq!(
    l.iter_rev().map(|ent| *ent.key()).collect::<Vec<_>>(),
    (0..100).rev().collect::<Vec<_>>()
  );
  assert_eq!((&l).into_iter().count(), 100);

  // removal in the middle of an iteration
  let mut it = l.iter();
  assert_eq!(*it.next().unwrap().key(), 0);
  l.remove(&1);
  assert_eq!(*it.next().unwrap().key(), 2);
}

#[test]
fn test_iter() {
  iter_in(SkipMap::new());
}

fn range_in(l: SkipMap<u64, u64>) {
  for i in 0..20 {
    l.insert(i, i);
  }

  fn keys<R: RangeBounds<u64>>(r: Range<'_, u64, R, u64, u64>) -> Vec<u64> {
    r.map(|ent| *ent.key()).collect()
  }

  assert_eq!(keys(l.range(5..8)), [5, 6, 7]);
  assert_eq!(keys(l.range(5..=8)), [5, 6, 7, 8]);
  assert_eq!(keys(l.range(..3)), [0, 1, 2]);
  assert_eq!(keys(l.range(17..)), [17, 18, 19]);
  assert_eq!(keys(l.range(30..)), Vec::<u64>::new());
  assert_eq!(
    keys(l.range((Bound::Excluded(5), Bound::Excluded(8)))),
    [6, 7]
  );

  assert_eq!(
    l.range(5..8).rev().map(|ent| *ent.key()).collect::<Vec<_>>(),
    [7, 6, 5]
  );

  // both ends meet without crossing
  let mut r = l.range(0..5);
  assert_eq!(*r.next().unwrap().key(), 0);
  assert_eq!(*r.next_back().unwrap().key(), 4);
  assert_eq!(*r.next().unwrap().key(), 1);
  assert_eq!(*r.next_back().unwrap().key(), 3);
  assert_eq!(*r.next().unwrap().key(), 2);
  assert!(r.next_back().is_none());
  assert!(r.next().is_none());
}

#[test]
fn test_range() {
  range_in(SkipMap::new());
}

#[test]
fn test_contains_value_and_clear() {
  let l = SkipMap::new();
  for i in 0..10u64 {
    l.insert(i, key(i as usize));
  }
  assert!(l.contains_value(&key(3)));
  assert!(!l.contains_value(&key(10)));

  l.remove(&3);
  assert!(!l.contains_value(&key(3)));

  l.clear();
  assert!(l.is_empty());
  assert_eq!(l.len(), 0);
  l.insert(1, key(1));
  assert_eq!(l.len(), 1);
}

#[test]
fn test_comparator() {
  let l = SkipMap::with_comparator(Descend);
  for i in 0..10u64 {
    l.insert(i, i);
  }
  assert_eq!(l.first_key(), Some(9));
  assert_eq!(l.last_key(), Some(0));
  // "lower" follows the comparator, not the natural order
  assert_eq!(l.lower_key(&5), Some(6));
  assert_eq!(l.keys().collect::<Vec<_>>(), (0..10).rev().collect::<Vec<_>>());

  let by_len = SkipMap::with_comparator(|a: &String, b: &String| a.len().cmp(&b.len()));
  by_len.insert("aaa".to_string(), 1);
  by_len.insert("b".to_string(), 2);
  // same length, same key
  assert_eq!(by_len.insert("c".to_string(), 3), Some(2));
  assert_eq!(by_len.first_key().as_deref(), Some("b"));
  assert_eq!(by_len.len(), 2);
}

#[test]
fn test_options() {
  assert_eq!(
    SkipMap::<u64, u64>::with_options(Options::new().with_max_height(0)).unwrap_err(),
    Error::InvalidMaxHeight {
      height: 0,
      max: MAX_HEIGHT
    }
  );

  let l = SkipMap::<u64, u64>::with_options(Options::new().with_max_height(2)).unwrap();
  for i in 0..5000 {
    l.insert(i, i);
  }
  assert!(l.height() <= 2);
  assert_eq!(l.options().max_height(), 2);
  assert_eq!(l.len(), 5000);
}

#[test]
fn test_height_reduce() {
  let l = SkipMap::<u64, u64>::new();
  for i in 0..5000 {
    l.insert(i, i);
  }
  let height = l.height();
  assert!(height > 3);

  for i in 0..5000 {
    l.remove(&i);
  }
  // every removal on an empty top lowers the height by one more level
  for _ in 0..64 {
    l.insert(u64::MAX, 0);
    l.remove(&u64::MAX);
  }
  assert!(l.height() < height);
  assert!(l.height() <= 3);
  assert!(l.is_empty());
}

#[test]
fn test_height_reduce_threshold() {
  let l =
    SkipMap::<u64, u64>::with_options(Options::new().with_reduce_threshold(MAX_HEIGHT as u8))
      .unwrap();
  for i in 0..5000 {
    l.insert(i, i);
  }
  let height = l.height();
  l.clear();
  assert!(l.is_empty());
  assert_eq!(l.height(), height);
}

#[test]
fn test_debug_and_collect() {
  let l: SkipMap<u64, &str> = [(2, "b"), (1, "a")].into_iter().collect();
  assert_eq!(format!("{:?}", l), r#"{1: "a", 2: "b"}"#);

  let mut l = l;
  l.extend([(3, "c")]);
  assert_eq!(l.len(), 3);
}

#[test]
fn test_drop_entries() {
  let token = Arc::new(());
  {
    let l = SkipMap::new();
    for i in 0..100u64 {
      l.insert(i, token.clone());
    }
    assert_eq!(Arc::strong_count(&token), 101);
  }
  assert_eq!(Arc::strong_count(&token), 1);
}

/// Advances the epoch until `token` has `expected` owners left, deferred values are only freed
/// once every thread pinned before their removal has moved on.
fn collect_until(token: &Arc<()>, expected: usize) {
  for _ in 0..100_000 {
    if Arc::strong_count(token) == expected {
      return;
    }
    crossbeam_epoch::pin().flush();
  }
  assert_eq!(Arc::strong_count(token), expected);
}

#[test]
fn test_reclaim_displaced_values() {
  let token = Arc::new(());
  let l = SkipMap::new();
  for i in 0..100u64 {
    l.insert(i, token.clone());
  }
  assert_eq!(Arc::strong_count(&token), 101);

  // 20 removed
  for i in 0..10u64 {
    assert!(l.remove(&i).is_some());
  }
  for i in 10..15u64 {
    assert!(l.remove_if(&i, &token));
  }
  for _ in 0..5 {
    assert!(l.pop_first().is_some());
  }
  // 30 replaced
  for i in 50..60u64 {
    assert!(l.insert(i, token.clone()).is_some());
  }
  for i in 60..70u64 {
    assert!(l.replace(&i, token.clone()).is_some());
  }
  for i in 70..80u64 {
    assert!(l.compare_and_replace(&i, &token, token.clone()));
  }
  // kept
  for i in 80..90u64 {
    assert!(l.get_or_insert(i, token.clone()).is_some());
  }

  assert_eq!(l.len(), 80);
  collect_until(&token, 81);

  drop(l);
  collect_until(&token, 1);
}

#[test]
fn test_reclaim_after_removing_everything() {
  let token = Arc::new(());
  let l = SkipMap::new();
  for i in 0..1000u64 {
    l.insert(i, token.clone());
  }
  for i in (0..1000u64).rev() {
    assert!(l.remove(&i).is_some());
  }
  assert!(l.is_empty());
  collect_until(&token, 1);
  drop(l);
  assert_eq!(Arc::strong_count(&token), 1);
}

fn concurrent_basic_runner(l: Arc<SkipMap<String, String>>) {
  #[cfg(miri)]
  const N: usize = 5;
  #[cfg(not(miri))]
  const N: usize = 1000;

  let wg = WaitGroup::new();
  for i in 0..N {
    let wg = wg.add(1);
    let l = l.clone();
    std::thread::spawn(move || {
      l.insert(key(i), make_value(i));
      wg.done();
    });
  }
  wg.wait();

  for i in 0..N {
    let wg = wg.add(1);
    let l = l.clone();
    std::thread::spawn(move || {
      let k = key(i);
      assert_eq!(l.get(&k).unwrap(), make_value(i), "broken: {i}");
      wg.done();
    });
  }
  wg.wait();
  assert_eq!(l.len(), N);
}

fn concurrent_one_key_runner(l: Arc<SkipMap<String, String>>) {
  #[cfg(not(miri))]
  const N: usize = 100;
  #[cfg(miri)]
  const N: usize = 5;

  let wg = WaitGroup::new();
  for i in 0..N {
    let wg = wg.add(1);
    let l = l.clone();
    std::thread::spawn(move || {
      let _ = l.get_or_insert("thekey".to_string(), make_value(i));
      wg.done();
    });
  }
  wg.wait();

  let saw_value = Arc::new(AtomicUsize::new(0));
  for _ in 0..N {
    let wg = wg.add(1);
    let l = l.clone();
    let saw_value = saw_value.clone();
    std::thread::spawn(move || {
      let val = l.get("thekey").unwrap();
      let num: usize = val[1..].parse().unwrap();
      assert!((0..N).contains(&num));

      let ent = l.ceiling("thekey").unwrap();
      assert_eq!(ent.key(), "thekey");
      assert_eq!(ent.value(), &val);
      saw_value.fetch_add(1, Ordering::SeqCst);
      wg.done();
    });
  }
  wg.wait();

  assert_eq!(N, saw_value.load(Ordering::SeqCst));
  assert_eq!(l.len(), 1);
}

fn concurrent_insert_remove_runner(l: Arc<SkipMap<String, String>>) {
  #[cfg(miri)]
  const N: usize = 10;
  #[cfg(not(miri))]
  const N: usize = 1000;
  const THREADS: usize = 8;

  let handles: Vec<_> = (0..THREADS)
    .map(|t| {
      let l = l.clone();
      std::thread::spawn(move || {
        for i in (t..N * THREADS).step_by(THREADS) {
          l.insert(key(i), make_value(i));
        }
        for i in (t..N * THREADS).step_by(THREADS * 2) {
          assert_eq!(l.remove(&key(i)), Some(make_value(i)));
        }
      })
    })
    .collect();
  for h in handles {
    h.join().unwrap();
  }

  let expected: BTreeSet<_> = (0..N * THREADS)
    .filter(|i| (i % THREADS) != (i % (THREADS * 2)))
    .map(key)
    .collect();
  let keys: Vec<_> = l.keys().collect();
  assert_eq!(keys, expected.iter().cloned().collect::<Vec<_>>());
  assert_eq!(l.len(), expected.len());
}

fn concurrent_try_insert_runner(l: Arc<SkipMap<String, String>>) {
  #[cfg(miri)]
  const N: usize = 10;
  #[cfg(not(miri))]
  const N: usize = 500;
  const THREADS: usize = 8;

  let inserted = Arc::new(AtomicUsize::new(0));
  let handles: Vec<_> = (0..THREADS)
    .map(|t| {
      let l = l.clone();
      let inserted = inserted.clone();
      std::thread::spawn(move || {
        for i in 0..N {
          match l.try_insert(key(i), make_value(t)) {
            Ok(()) => {
              inserted.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => assert_eq!(e, Error::Duplicated),
          }
        }
      })
    })
    .collect();
  for h in handles {
    h.join().unwrap();
  }

  // exactly one winner per key
  assert_eq!(inserted.load(Ordering::SeqCst), N);
  assert_eq!(l.len(), N);
}

fn concurrent_pop_runner(l: Arc<SkipMap<String, String>>) {
  #[cfg(miri)]
  const N: usize = 20;
  #[cfg(not(miri))]
  const N: usize = 2000;
  const THREADS: usize = 4;

  for i in 0..N {
    l.insert(key(i), make_value(i));
  }

  let handles: Vec<_> = (0..THREADS)
    .map(|t| {
      let l = l.clone();
      std::thread::spawn(move || {
        let mut popped = Vec::new();
        loop {
          let ent = if t % 2 == 0 { l.pop_first() } else { l.pop_last() };
          match ent {
            Some(ent) => popped.push(ent.into_key()),
            None => return popped,
          }
        }
      })
    })
    .collect();

  let mut all = HashSet::new();
  for h in handles {
    for k in h.join().unwrap() {
      assert!(all.insert(k), "popped twice");
    }
  }
  assert_eq!(all.len(), N);
  assert!(l.is_empty());
}

fn concurrent_iter_runner(l: Arc<SkipMap<String, String>>) {
  #[cfg(miri)]
  const N: usize = 20;
  #[cfg(not(miri))]
  const N: usize = 2000;

  for i in (0..N).step_by(2) {
    l.insert(key(i), make_value(i));
  }

  let writer = {
    let l = l.clone();
    std::thread::spawn(move || {
      for i in (1..N).step_by(2) {
        l.insert(key(i), make_value(i));
      }
      for i in (0..N).step_by(4) {
        l.remove(&key(i));
      }
    })
  };

  for _ in 0..4 {
    let mut last: Option<String> = None;
    for ent in l.iter() {
      if let Some(prev) = &last {
        assert!(prev < ent.key(), "iteration went backwards");
      }
      last = Some(ent.into_key());
    }

    let mut last: Option<String> = None;
    for ent in l.range::<str, _>(..).rev() {
      if let Some(prev) = &last {
        assert!(prev > ent.key(), "reverse iteration went forwards");
      }
      last = Some(ent.into_key());
    }
  }
  writer.join().unwrap();

  assert_eq!(l.len(), N - N / 4);
}

fn concurrent_reclaim_runner(l: Arc<SkipMap<u64, Arc<()>>>) {
  #[cfg(miri)]
  const ROUNDS: u64 = 50;
  #[cfg(not(miri))]
  const ROUNDS: u64 = 5000;
  const KEYS: u64 = 200;
  const THREADS: u64 = 8;

  let token = Arc::new(());
  let wg = WaitGroup::new();
  for t in 0..THREADS {
    let wg = wg.add(1);
    let l = l.clone();
    let token = token.clone();
    std::thread::spawn(move || {
      for i in 0..ROUNDS {
        let k = (i * 7 + t * 13) % KEYS;
        match (i + t) % 7 {
          0 | 1 => {
            l.insert(k, token.clone());
          }
          2 => {
            l.remove(&k);
          }
          3 => {
            l.replace(&k, token.clone());
          }
          4 => {
            l.get_or_insert(k, token.clone());
          }
          5 => {
            l.compare_and_replace(&k, &token, token.clone());
          }
          _ => {
            if t % 2 == 0 {
              l.pop_first();
            } else {
              l.pop_last();
            }
          }
        }
      }
      drop(l);
      drop(token);
      wg.done();
    });
  }
  wg.wait();

  let live = l.len();
  assert_eq!(l.iter().count(), live);
  collect_until(&token, live + 1);

  // nodes unlinked from the base list may still be held by index levels here
  drop(l);
  collect_until(&token, 1);
}

macro_rules! concurrent_tests {
  ($($name:ident),+ $(,)?) => {
    paste::paste! {
      $(
        #[test]
        fn [< test_ $name >]() {
          [< $name _runner >](Arc::new(SkipMap::new()));
        }

        #[test]
        fn [< test_ $name _yield_now >]() {
          [< $name _runner >](Arc::new(SkipMap::new().with_yield_now()));
        }
      )+
    }
  };
}

concurrent_tests!(
  concurrent_basic,
  concurrent_one_key,
  concurrent_insert_remove,
  concurrent_try_insert,
  concurrent_pop,
  concurrent_iter,
  concurrent_reclaim,
);
