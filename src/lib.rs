//! A lock-free, linearizable, concurrent ordered map.
//!
//! [`SkipMap`] is a sorted key-value map that can be shared between any number of threads
//! without locks. Single-key operations (`get`, `insert`, `remove` and their conditional
//! variants) are linearizable, while aggregate operations (`len`, iteration) are weakly
//! consistent.
//!
//! The map is built from a sorted base list of nodes plus a sparse, probabilistic index of
//! forward shortcuts. All mutation happens through single-word compare-and-swap, and any thread
//! that runs into another thread's half-finished deletion helps to finish it. Memory of removed
//! nodes is reclaimed with [`crossbeam-epoch`](https://docs.rs/crossbeam-epoch).
//!
//! ## Example
//!
//! ```rust
//! use lfskl::SkipMap;
//!
//! let map = SkipMap::new();
//! assert_eq!(map.insert(1, "a"), None);
//! assert_eq!(map.insert(1, "b"), Some("a"));
//! assert_eq!(map.get(&1), Some("b"));
//! assert_eq!(map.remove(&1), Some("b"));
//! assert!(map.is_empty());
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]
#![deny(missing_docs)]
#![allow(clippy::type_complexity)]

use core::cmp;

mod error;
pub use error::Error;

mod options;
pub use options::Options;

/// A map implementation based on a lock-free skiplist
pub mod map;
pub use map::{Entry, Iter, IterRev, Keys, Range, SkipMap, Values};

/// The maximum number of index levels a map can ever grow.
pub const MAX_HEIGHT: usize = 32;

/// The default minimum height before the map tries to lower its index height.
pub(crate) const REDUCE_THRESHOLD: usize = 3;

/// Draws the number of index levels for a freshly inserted node.
///
/// The draw follows a power-of-two geometric distribution: a node receives any index at all
/// with probability 1/4, and every additional level halves the odds again. The result is in
/// `0..=max`.
fn random_height(max: usize) -> usize {
  use rand::Rng;

  let mut rnd: u32 = rand::rng().random();
  // test highest and lowest bits
  if rnd & 0x8000_0001 != 0 {
    return 0;
  }

  let mut h = 1;
  loop {
    rnd >>= 1;
    if rnd & 1 == 0 || h >= max {
      break;
    }
    h += 1;
  }
  h
}

/// Comparator is used to define the order of the keys in a [`SkipMap`].
///
/// The comparator is fixed when the map is constructed and must stay consistent for the
/// lifetime of the map: comparing the same two keys must always give the same answer.
///
/// Any `Fn(&K, &K) -> Ordering` closure is a comparator.
pub trait Comparator<K: ?Sized> {
  /// Compares two keys.
  fn compare(&self, a: &K, b: &K) -> cmp::Ordering;
}

/// Ascend is a comparator that orders keys by their natural ([`Ord`]) order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ascend;

impl<K: Ord + ?Sized> Comparator<K> for Ascend {
  #[inline]
  fn compare(&self, a: &K, b: &K) -> cmp::Ordering {
    a.cmp(b)
  }
}

/// Descend is a comparator that orders keys by the reverse of their natural ([`Ord`]) order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Descend;

impl<K: Ord + ?Sized> Comparator<K> for Descend {
  #[inline]
  fn compare(&self, a: &K, b: &K) -> cmp::Ordering {
    b.cmp(a)
  }
}

impl<K, F> Comparator<K> for F
where
  K: ?Sized,
  F: Fn(&K, &K) -> cmp::Ordering,
{
  #[inline]
  fn compare(&self, a: &K, b: &K) -> cmp::Ordering {
    self(a, b)
  }
}
