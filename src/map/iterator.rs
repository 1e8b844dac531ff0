use core::{
  iter::{FusedIterator, Rev},
  marker::PhantomData,
  ops::{Bound, RangeBounds, RangeFull},
};

use super::*;

/// An iterator over the entries of the skipmap, in ascending order.
///
/// The iterator is weakly consistent: it never fails because of concurrent modification, yields
/// every entry at most once, and sees the entries inserted or removed while it runs or not.
///
/// It keeps the current thread pinned until it is dropped, which delays the reclamation of
/// removed entries. Prefer short-lived iterators.
pub struct Iter<'a, K, V, C = Ascend> {
  guard: Guard,
  /// The node of the last entry returned, the header before the first call.
  cursor: *const Node<K, V>,
  _map: PhantomData<&'a SkipMap<K, V, C>>,
}

impl<'a, K, V, C> Iter<'a, K, V, C> {
  #[inline]
  pub(super) fn new(map: &'a SkipMap<K, V, C>) -> Self {
    Self {
      guard: epoch::pin(),
      cursor: map.head.as_ptr(),
      _map: PhantomData,
    }
  }

  fn next_live(&mut self) -> Option<(&K, &V)> {
    let guard = &self.guard;
    // Safety: the cursor is the header or a node that was linked while `guard` has been pinned.
    let mut b = unsafe { &*self.cursor };
    loop {
      // Safety: `b` was reachable while `guard` has been pinned, so is its successor.
      let n = unsafe { b.load_next(guard).as_ref() }?;
      if let State::Live { key, value } = n.state(guard) {
        self.cursor = n;
        // Safety: the value was loaded under `guard`
        return Some((key, unsafe { value.deref() }));
      }
      b = n;
    }
  }
}

impl<K, V, C> Iterator for Iter<'_, K, V, C>
where
  K: Clone,
  V: Clone,
{
  type Item = Entry<K, V>;

  #[inline]
  fn next(&mut self) -> Option<Self::Item> {
    self
      .next_live()
      .map(|(k, v)| Entry::new(k.clone(), v.clone()))
  }
}

impl<K: Clone, V: Clone, C> FusedIterator for Iter<'_, K, V, C> {}

impl<K, V, C> fmt::Debug for Iter<'_, K, V, C> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Iter").finish_non_exhaustive()
  }
}

/// An iterator over the keys of the skipmap, in ascending order.
pub struct Keys<'a, K, V, C = Ascend>(Iter<'a, K, V, C>);

impl<'a, K, V, C> Keys<'a, K, V, C> {
  #[inline]
  pub(super) fn new(map: &'a SkipMap<K, V, C>) -> Self {
    Self(Iter::new(map))
  }
}

impl<K: Clone, V, C> Iterator for Keys<'_, K, V, C> {
  type Item = K;

  #[inline]
  fn next(&mut self) -> Option<Self::Item> {
    self.0.next_live().map(|(k, _)| k.clone())
  }
}

impl<K: Clone, V, C> FusedIterator for Keys<'_, K, V, C> {}

/// An iterator over the values of the skipmap, in ascending order of their keys.
pub struct Values<'a, K, V, C = Ascend>(Iter<'a, K, V, C>);

impl<'a, K, V, C> Values<'a, K, V, C> {
  #[inline]
  pub(super) fn new(map: &'a SkipMap<K, V, C>) -> Self {
    Self(Iter::new(map))
  }
}

impl<K, V: Clone, C> Iterator for Values<'_, K, V, C> {
  type Item = V;

  #[inline]
  fn next(&mut self) -> Option<Self::Item> {
    self.0.next_live().map(|(_, v)| v.clone())
  }
}

impl<K, V: Clone, C> FusedIterator for Values<'_, K, V, C> {}

impl<'a, K, V, C> IntoIterator for &'a SkipMap<K, V, C>
where
  K: Clone,
  V: Clone,
{
  type Item = Entry<K, V>;
  type IntoIter = Iter<'a, K, V, C>;

  #[inline]
  fn into_iter(self) -> Self::IntoIter {
    Iter::new(self)
  }
}

/// A double-ended iterator over a range of entries of the skipmap.
///
/// Every step is a fresh search from the last key returned at that end, so the iterator holds
/// no pin between steps. Each key is returned at most once, and the two ends never cross.
pub struct Range<'a, Q, R, K, V, C = Ascend>
where
  Q: ?Sized,
{
  map: &'a SkipMap<K, V, C>,
  range: R,
  /// The last key returned from the front.
  front: Option<K>,
  /// The last key returned from the back.
  back: Option<K>,
  _q: PhantomData<fn(&Q)>,
}

impl<'a, Q, R, K, V, C> Range<'a, Q, R, K, V, C>
where
  Q: ?Sized,
{
  #[inline]
  pub(super) fn new(map: &'a SkipMap<K, V, C>, range: R) -> Self {
    Self {
      map,
      range,
      front: None,
      back: None,
      _q: PhantomData,
    }
  }
}

impl<Q, R, K, V, C> Range<'_, Q, R, K, V, C>
where
  K: Borrow<Q> + Send + 'static,
  V: Send + 'static,
  Q: ?Sized,
  R: RangeBounds<Q>,
  C: Comparator<Q>,
{
  /// Returns `true` if `key` is not above the upper end, bound and back key alike.
  fn below_upper(&self, key: &K) -> bool {
    let within = match self.range.end_bound() {
      Bound::Included(hi) => self.map.cpr(hi, key) != cmp::Ordering::Less,
      Bound::Excluded(hi) => self.map.cpr(hi, key) == cmp::Ordering::Greater,
      Bound::Unbounded => true,
    };
    within
      && self
        .back
        .as_ref()
        .map_or(true, |b| self.map.cpr(b.borrow(), key) == cmp::Ordering::Greater)
  }

  /// Returns `true` if `key` is not below the lower end, bound and front key alike.
  fn above_lower(&self, key: &K) -> bool {
    let within = match self.range.start_bound() {
      Bound::Included(lo) => self.map.cpr(lo, key) != cmp::Ordering::Greater,
      Bound::Excluded(lo) => self.map.cpr(lo, key) == cmp::Ordering::Less,
      Bound::Unbounded => true,
    };
    within
      && self
        .front
        .as_ref()
        .map_or(true, |f| self.map.cpr(f.borrow(), key) == cmp::Ordering::Less)
  }
}

impl<Q, R, K, V, C> Iterator for Range<'_, Q, R, K, V, C>
where
  K: Borrow<Q> + Clone + Send + 'static,
  V: Clone + Send + 'static,
  Q: ?Sized,
  R: RangeBounds<Q>,
  C: Comparator<Q>,
{
  type Item = Entry<K, V>;

  fn next(&mut self) -> Option<Self::Item> {
    let guard = &epoch::pin();
    let found = match &self.front {
      Some(k) => self.map.find_near_live(k.borrow(), Relation::GT, guard),
      None => match self.range.start_bound() {
        Bound::Included(lo) => self.map.find_near_live(lo, Relation::GE, guard),
        Bound::Excluded(lo) => self.map.find_near_live(lo, Relation::GT, guard),
        Bound::Unbounded => self.map.find_first(guard),
      },
    }?;

    if !self.below_upper(found.key) {
      return None;
    }
    self.front = Some(found.key.clone());
    Some(found.to_entry())
  }
}

impl<Q, R, K, V, C> DoubleEndedIterator for Range<'_, Q, R, K, V, C>
where
  K: Borrow<Q> + Clone + Send + 'static,
  V: Clone + Send + 'static,
  Q: ?Sized,
  R: RangeBounds<Q>,
  C: Comparator<Q>,
{
  fn next_back(&mut self) -> Option<Self::Item> {
    let guard = &epoch::pin();
    let found = match &self.back {
      Some(k) => self.map.find_near_live(k.borrow(), Relation::LT, guard),
      None => match self.range.end_bound() {
        Bound::Included(hi) => self.map.find_near_live(hi, Relation::LE, guard),
        Bound::Excluded(hi) => self.map.find_near_live(hi, Relation::LT, guard),
        Bound::Unbounded => self.map.find_last(guard),
      },
    }?;

    if !self.above_lower(found.key) {
      return None;
    }
    self.back = Some(found.key.clone());
    Some(found.to_entry())
  }
}

impl<Q, R, K, V, C> fmt::Debug for Range<'_, Q, R, K, V, C>
where
  Q: ?Sized,
  K: fmt::Debug,
  R: fmt::Debug,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Range")
      .field("range", &self.range)
      .field("front", &self.front)
      .field("back", &self.back)
      .finish()
  }
}

/// A descending iterator over all the entries of the skipmap.
pub type IterRev<'a, K, V, C = Ascend> = Rev<Range<'a, K, RangeFull, K, V, C>>;
