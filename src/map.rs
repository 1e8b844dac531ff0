use core::{
  borrow::Borrow,
  cmp, fmt,
  ptr::NonNull,
  sync::atomic::{AtomicUsize, Ordering},
};
use std::collections::HashSet;

use crossbeam_epoch::{self as epoch, Guard};
use crossbeam_utils::CachePadded;

use super::{Ascend, Comparator, Error, Options, MAX_HEIGHT};

mod node;
use node::{Index, Node, State, MARKED, PENDING};

mod find;
use find::Relation;

mod insert;
mod remove;

mod api;

mod entry;
pub use entry::Entry;

mod iterator;
pub use iterator::*;

#[cfg(test)]
mod tests;

/// A lock-free concurrent map implementation based on skiplist.
///
/// Entries are kept sorted by the comparator `C`, [`Ascend`] (the natural order of `K`) by
/// default. All operations take `&self` and can be called from any number of threads at the same
/// time:
///
/// - single-key operations (`get`, `insert`, `get_or_insert`, `remove`, `replace`, ...) are
///   linearizable;
/// - `len`, `contains_value` and all iterators are weakly consistent: they never fail because of
///   concurrent modification, but may or may not observe modifications that race with them.
///
/// Values and entries are returned as owned clones taken at the moment the operation took effect.
pub struct SkipMap<K, V, C = Ascend> {
  head: NonNull<Node<K, V>>,
  /// Current index height. 1 <= height <= max_height. CAS.
  height: CachePadded<AtomicUsize>,
  opts: Options,

  /// If set to true by tests, then extra delays are added to make it easier to
  /// detect unusual race conditions.
  #[cfg(test)]
  yield_now: bool,

  cmp: C,
}

// Safety: all the shared state of the map is accessed through atomics, keys and values are
// shared between threads and may be dropped by any of them.
unsafe impl<K, V, C> Send for SkipMap<K, V, C>
where
  K: Send + Sync,
  V: Send + Sync,
  C: Send,
{
}
unsafe impl<K, V, C> Sync for SkipMap<K, V, C>
where
  K: Send + Sync,
  V: Send + Sync,
  C: Sync,
{
}

impl<K, V> SkipMap<K, V> {
  /// Creates an empty map ordered by the natural order of the keys.
  ///
  /// ## Example
  ///
  /// ```rust
  /// use lfskl::SkipMap;
  ///
  /// let map = SkipMap::<u64, &str>::new();
  /// assert!(map.is_empty());
  /// ```
  #[inline]
  pub fn new() -> Self {
    Self::with_comparator(Ascend)
  }

  /// Creates an empty map ordered by the natural order of the keys, with the given options.
  ///
  /// # Errors
  ///
  /// - Returns `Error::InvalidMaxHeight` if the options ask for an unsupported max height.
  #[inline]
  pub fn with_options(opts: Options) -> Result<Self, Error> {
    Self::with_options_and_comparator(opts, Ascend)
  }
}

impl<K, V, C> SkipMap<K, V, C> {
  /// Creates an empty map ordered by the given comparator.
  ///
  /// ## Example
  ///
  /// ```rust
  /// use lfskl::{SkipMap, Descend};
  ///
  /// let map = SkipMap::with_comparator(Descend);
  /// map.insert(1, "a");
  /// map.insert(2, "b");
  /// assert_eq!(map.first_key(), Some(2));
  /// ```
  #[inline]
  pub fn with_comparator(cmp: C) -> Self {
    Self::construct(Options::new(), cmp)
  }

  /// Creates an empty map ordered by the given comparator, with the given options.
  ///
  /// # Errors
  ///
  /// - Returns `Error::InvalidMaxHeight` if the options ask for an unsupported max height.
  #[inline]
  pub fn with_options_and_comparator(opts: Options, cmp: C) -> Result<Self, Error> {
    opts.validate()?;
    Ok(Self::construct(opts, cmp))
  }

  fn construct(opts: Options, cmp: C) -> Self {
    Self {
      head: Node::new_head(MAX_HEIGHT),
      height: CachePadded::new(AtomicUsize::new(1)),
      opts,
      #[cfg(test)]
      yield_now: false,
      cmp,
    }
  }

  /// Makes the map yield the thread at racy points of insertion, to test the helping paths.
  #[cfg(test)]
  pub(crate) fn with_yield_now(mut self) -> Self {
    self.yield_now = true;
    self
  }

  /// Returns the comparator of the map.
  #[inline]
  pub const fn comparator(&self) -> &C {
    &self.cmp
  }

  /// Returns the options of the map.
  #[inline]
  pub const fn options(&self) -> &Options {
    &self.opts
  }

  /// Returns the current number of index levels.
  ///
  /// The height grows when insertions draw tall towers and shrinks, best effort, when the
  /// topmost levels become empty after removals. It only affects search cost.
  #[inline]
  pub fn height(&self) -> usize {
    self.height.load(Ordering::Acquire)
  }

  #[inline]
  fn head(&self) -> &Node<K, V> {
    // Safety: the header is allocated at construction and freed on drop only.
    unsafe { self.head.as_ref() }
  }

  /// Returns the head index at `level`, `1 <= level <= MAX_HEIGHT`.
  #[inline]
  fn head_index(&self, level: usize) -> &Index<K, V> {
    self.head().index(level)
  }

  #[inline]
  fn max_height(&self) -> usize {
    self.opts.max_height() as usize
  }

  #[inline]
  fn reduce_threshold(&self) -> usize {
    cmp::max(self.opts.reduce_threshold() as usize, super::REDUCE_THRESHOLD)
  }

  /// Compares a search key against the key of a node.
  #[inline]
  fn cpr<Q>(&self, key: &Q, other: &K) -> cmp::Ordering
  where
    K: Borrow<Q>,
    Q: ?Sized,
    C: Comparator<Q>,
  {
    self.cmp.compare(key, other.borrow())
  }
}

impl<K, V, C: Default> Default for SkipMap<K, V, C> {
  #[inline]
  fn default() -> Self {
    Self::with_comparator(C::default())
  }
}

impl<K, V, C> fmt::Debug for SkipMap<K, V, C>
where
  K: fmt::Debug + Send + 'static,
  V: fmt::Debug + Send + 'static,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let guard = &epoch::pin();
    let mut m = f.debug_map();
    self.for_each_live(guard, |k, v| {
      m.entry(k, v);
    });
    m.finish()
  }
}

impl<K, V, C> FromIterator<(K, V)> for SkipMap<K, V, C>
where
  K: Send + 'static,
  V: Send + 'static,
  C: Comparator<K> + Default,
{
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    let mut map = Self::default();
    map.extend(iter);
    map
  }
}

impl<K, V, C> Extend<(K, V)> for SkipMap<K, V, C>
where
  K: Send + 'static,
  V: Send + 'static,
  C: Comparator<K>,
{
  fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
    let guard = &epoch::pin();
    for (k, v) in iter {
      self.do_put(k, v, false, guard);
    }
  }
}

impl<K, V, C> Drop for SkipMap<K, V, C> {
  fn drop(&mut self) {
    // Safety: we own the map exclusively, so nobody else can reach any node anymore. Nodes
    // already handed to the collector are unreachable from both the levels and the base list.
    unsafe {
      let guard = epoch::unprotected();
      let head = self.head.as_ref();
      let mut nodes: HashSet<*const Node<K, V>> = HashSet::new();

      // Nodes which left the base list may still be referenced by an index that has not been
      // unlinked yet, possibly on a level above the current height.
      for lvl in 1..=head.height() {
        let mut r = head.index(lvl).load_right(guard).with_tag(0);
        while let Some(idx) = r.as_ref() {
          nodes.insert(idx.node());
          r = idx.load_right(guard).with_tag(0);
        }
      }

      let mut n = head.load_next(guard);
      while let Some(nd) = n.as_ref() {
        nodes.insert(nd);
        n = nd.load_next(guard);
      }

      #[cfg(feature = "tracing")]
      tracing::trace!(nodes = nodes.len(), "dropping skipmap");

      for nd in nodes {
        drop(std::boxed::Box::from_raw(nd as *mut Node<K, V>));
      }
      drop(std::boxed::Box::from_raw(self.head.as_ptr()));
    }
  }
}

impl<K, V, C> SkipMap<K, V, C>
where
  K: Send + 'static,
  V: Send + 'static,
{
  /// Calls `f` on every live entry, in order.
  fn for_each_live<'g>(&'g self, guard: &'g Guard, mut f: impl FnMut(&'g K, &'g V)) {
    let mut n = self.find_first(guard).map(|found| found.node);
    while let Some(nd) = n {
      if let State::Live { key, value } = nd.state(guard) {
        // Safety: the value was loaded under `guard`
        f(key, unsafe { value.deref() });
      }
      // Safety: `nd` was reachable while `guard` is pinned, so is its successor.
      n = unsafe { nd.load_next(guard).as_ref() };
    }
  }
}
