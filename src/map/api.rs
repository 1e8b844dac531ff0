use core::ops::{RangeBounds, RangeFull};

use crossbeam_epoch::Owned;

use super::*;

impl<K, V, C> SkipMap<K, V, C>
where
  K: Send + 'static,
  V: Send + 'static,
{
  /// Returns the number of entries in the skipmap.
  ///
  /// The count is taken by walking the whole base list, so it takes linear time. If the map is
  /// modified while the walk runs, the result may not match any single moment of the map.
  ///
  /// ## Example
  ///
  /// ```rust
  /// use lfskl::SkipMap;
  ///
  /// let map: SkipMap<_, _> = (0..10).map(|i| (i, i)).collect();
  /// assert_eq!(map.len(), 10);
  /// ```
  pub fn len(&self) -> usize {
    let guard = &epoch::pin();
    let mut count = 0;
    self.for_each_live(guard, |_, _| count += 1);
    count
  }

  /// Returns `true` if the skipmap has no entries.
  #[inline]
  pub fn is_empty(&self) -> bool {
    let guard = &epoch::pin();
    self.find_first(guard).is_none()
  }

  /// Returns `true` if some entry of the skipmap holds `value`.
  ///
  /// Like [`len`](SkipMap::len), this walks the whole map.
  pub fn contains_value(&self, value: &V) -> bool
  where
    V: PartialEq,
  {
    let guard = &epoch::pin();
    let mut n = self.find_first(guard).map(|found| found.node);
    while let Some(nd) = n {
      if nd.valid_value(guard).is_some_and(|v| v == value) {
        return true;
      }
      // Safety: `nd` was reachable while `guard` is pinned, so is its successor.
      n = unsafe { nd.load_next(guard).as_ref() };
    }
    false
  }

  /// Returns the first (smallest) entry of the skipmap.
  pub fn first(&self) -> Option<Entry<K, V>>
  where
    K: Clone,
    V: Clone,
  {
    let guard = &epoch::pin();
    self.find_first(guard).map(|found| found.to_entry())
  }

  /// Returns the first (smallest) key of the skipmap.
  pub fn first_key(&self) -> Option<K>
  where
    K: Clone,
  {
    let guard = &epoch::pin();
    self.find_first(guard).map(|found| found.key.clone())
  }

  /// Returns the last (largest) entry of the skipmap.
  pub fn last(&self) -> Option<Entry<K, V>>
  where
    K: Clone,
    V: Clone,
  {
    let guard = &epoch::pin();
    self.find_last(guard).map(|found| found.to_entry())
  }

  /// Returns the last (largest) key of the skipmap.
  pub fn last_key(&self) -> Option<K>
  where
    K: Clone,
  {
    let guard = &epoch::pin();
    self.find_last(guard).map(|found| found.key.clone())
  }

  /// Removes the first (smallest) entry of the skipmap and returns it.
  ///
  /// ## Example
  ///
  /// ```rust
  /// use lfskl::SkipMap;
  ///
  /// let map = SkipMap::new();
  /// map.insert(2, "b");
  /// map.insert(1, "a");
  ///
  /// assert_eq!(map.pop_first().map(|ent| ent.into_inner()), Some((1, "a")));
  /// assert_eq!(map.pop_first().map(|ent| ent.into_inner()), Some((2, "b")));
  /// assert!(map.pop_first().is_none());
  /// ```
  pub fn pop_first(&self) -> Option<Entry<K, V>>
  where
    K: Clone,
    V: Clone,
  {
    let guard = &epoch::pin();
    self
      .do_pop_first(guard)
      .map(|(k, v)| Entry::new(k.clone(), v.clone()))
  }

  /// Removes all the entries of the skipmap.
  ///
  /// Entries are removed one by one from the front, entries inserted concurrently may survive.
  pub fn clear(&self) {
    loop {
      let guard = &epoch::pin();
      if self.do_pop_first(guard).is_none() {
        break;
      }
    }
  }

  /// Returns an iterator over all entries in the skipmap, in ascending order.
  ///
  /// ## Example
  ///
  /// ```rust
  /// use lfskl::SkipMap;
  ///
  /// let map: SkipMap<_, _> = [(3, "c"), (1, "a"), (2, "b")].into_iter().collect();
  /// let keys: Vec<_> = map.iter().map(|ent| *ent.key()).collect();
  /// assert_eq!(keys, [1, 2, 3]);
  /// ```
  #[inline]
  pub fn iter(&self) -> Iter<'_, K, V, C> {
    Iter::new(self)
  }

  /// Returns an iterator over all keys in the skipmap, in ascending order.
  #[inline]
  pub fn keys(&self) -> Keys<'_, K, V, C> {
    Keys::new(self)
  }

  /// Returns an iterator over all values in the skipmap, in ascending order of their keys.
  #[inline]
  pub fn values(&self) -> Values<'_, K, V, C> {
    Values::new(self)
  }
}

impl<K, V, C> SkipMap<K, V, C>
where
  K: Send + 'static,
  V: Send + 'static,
{
  /// Returns `true` if the skipmap holds a live entry for `key`.
  #[inline]
  pub fn contains_key<Q>(&self, key: &Q) -> bool
  where
    K: Borrow<Q>,
    Q: ?Sized,
    C: Comparator<Q>,
  {
    let guard = &epoch::pin();
    self.find_node(key, guard).is_some()
  }

  /// Returns the value of `key`, if present.
  ///
  /// ## Example
  ///
  /// ```rust
  /// use lfskl::SkipMap;
  ///
  /// let map = SkipMap::new();
  /// map.insert("hello".to_string(), 1);
  /// assert_eq!(map.get("hello"), Some(1));
  /// assert_eq!(map.get("world"), None);
  /// ```
  pub fn get<Q>(&self, key: &Q) -> Option<V>
  where
    K: Borrow<Q>,
    Q: ?Sized,
    C: Comparator<Q>,
    V: Clone,
  {
    let guard = &epoch::pin();
    self.find_node(key, guard).map(|found| found.value().clone())
  }

  /// Returns the entry of `key`, if present.
  pub fn get_entry<Q>(&self, key: &Q) -> Option<Entry<K, V>>
  where
    K: Borrow<Q> + Clone,
    Q: ?Sized,
    C: Comparator<Q>,
    V: Clone,
  {
    let guard = &epoch::pin();
    self.find_node(key, guard).map(|found| found.to_entry())
  }

  /// Removes `key` and returns its value, if present.
  ///
  /// ## Example
  ///
  /// ```rust
  /// use lfskl::SkipMap;
  ///
  /// let map = SkipMap::new();
  /// map.insert(1, "a");
  /// assert_eq!(map.remove(&1), Some("a"));
  /// assert_eq!(map.remove(&1), None);
  /// ```
  pub fn remove<Q>(&self, key: &Q) -> Option<V>
  where
    K: Borrow<Q>,
    Q: ?Sized,
    C: Comparator<Q>,
    V: Clone,
  {
    let guard = &epoch::pin();
    self.do_remove(key, |_| true, guard).cloned()
  }

  /// Removes `key` only if it currently maps to `expected`.
  ///
  /// Returns `true` if the entry was removed.
  pub fn remove_if<Q>(&self, key: &Q, expected: &V) -> bool
  where
    K: Borrow<Q>,
    Q: ?Sized,
    C: Comparator<Q>,
    V: PartialEq,
  {
    let guard = &epoch::pin();
    self.do_remove(key, |v| v == expected, guard).is_some()
  }

  /// Replaces the value of `key` only if the key is present, returning the previous value.
  pub fn replace<Q>(&self, key: &Q, value: V) -> Option<V>
  where
    K: Borrow<Q>,
    Q: ?Sized,
    C: Comparator<Q>,
    V: Clone,
  {
    let guard = &epoch::pin();
    self
      .do_replace(key, value, |_| true, guard)
      .ok()
      .map(V::clone)
  }

  /// Replaces the value of `key` with `new`, only if the key currently maps to `expected`.
  ///
  /// Returns `true` if the value was replaced.
  ///
  /// ## Example
  ///
  /// ```rust
  /// use lfskl::SkipMap;
  ///
  /// let map = SkipMap::new();
  /// map.insert(1, "a");
  /// assert!(!map.compare_and_replace(&1, &"b", "c"));
  /// assert!(map.compare_and_replace(&1, &"a", "c"));
  /// assert_eq!(map.get(&1), Some("c"));
  /// ```
  pub fn compare_and_replace<Q>(&self, key: &Q, expected: &V, new: V) -> bool
  where
    K: Borrow<Q>,
    Q: ?Sized,
    C: Comparator<Q>,
    V: PartialEq,
  {
    let guard = &epoch::pin();
    self.do_replace(key, new, |v| v == expected, guard).is_ok()
  }

  /// Returns the entry with the largest key strictly less than `key`.
  pub fn lower<Q>(&self, key: &Q) -> Option<Entry<K, V>>
  where
    K: Borrow<Q> + Clone,
    Q: ?Sized,
    C: Comparator<Q>,
    V: Clone,
  {
    self.near_entry(key, Relation::LT)
  }

  /// Returns the largest key strictly less than `key`.
  pub fn lower_key<Q>(&self, key: &Q) -> Option<K>
  where
    K: Borrow<Q> + Clone,
    Q: ?Sized,
    C: Comparator<Q>,
  {
    self.near_key(key, Relation::LT)
  }

  /// Returns the entry with the largest key less than or equal to `key`.
  ///
  /// ## Example
  ///
  /// ```rust
  /// use lfskl::SkipMap;
  ///
  /// let map = SkipMap::new();
  /// map.insert(10, "a");
  /// map.insert(20, "b");
  ///
  /// assert_eq!(map.floor(&15).map(|ent| *ent.key()), Some(10));
  /// assert_eq!(map.floor(&20).map(|ent| *ent.key()), Some(20));
  /// assert!(map.floor(&5).is_none());
  /// ```
  pub fn floor<Q>(&self, key: &Q) -> Option<Entry<K, V>>
  where
    K: Borrow<Q> + Clone,
    Q: ?Sized,
    C: Comparator<Q>,
    V: Clone,
  {
    self.near_entry(key, Relation::LE)
  }

  /// Returns the largest key less than or equal to `key`.
  pub fn floor_key<Q>(&self, key: &Q) -> Option<K>
  where
    K: Borrow<Q> + Clone,
    Q: ?Sized,
    C: Comparator<Q>,
  {
    self.near_key(key, Relation::LE)
  }

  /// Returns the entry with the smallest key greater than or equal to `key`.
  pub fn ceiling<Q>(&self, key: &Q) -> Option<Entry<K, V>>
  where
    K: Borrow<Q> + Clone,
    Q: ?Sized,
    C: Comparator<Q>,
    V: Clone,
  {
    self.near_entry(key, Relation::GE)
  }

  /// Returns the smallest key greater than or equal to `key`.
  pub fn ceiling_key<Q>(&self, key: &Q) -> Option<K>
  where
    K: Borrow<Q> + Clone,
    Q: ?Sized,
    C: Comparator<Q>,
  {
    self.near_key(key, Relation::GE)
  }

  /// Returns the entry with the smallest key strictly greater than `key`.
  pub fn higher<Q>(&self, key: &Q) -> Option<Entry<K, V>>
  where
    K: Borrow<Q> + Clone,
    Q: ?Sized,
    C: Comparator<Q>,
    V: Clone,
  {
    self.near_entry(key, Relation::GT)
  }

  /// Returns the smallest key strictly greater than `key`.
  pub fn higher_key<Q>(&self, key: &Q) -> Option<K>
  where
    K: Borrow<Q> + Clone,
    Q: ?Sized,
    C: Comparator<Q>,
  {
    self.near_key(key, Relation::GT)
  }

  /// Returns a double-ended iterator over the entries whose keys fall in `range`.
  ///
  /// ## Example
  ///
  /// ```rust
  /// use lfskl::SkipMap;
  ///
  /// let map: SkipMap<_, _> = (0..10).map(|i| (i, i * 10)).collect();
  ///
  /// let keys: Vec<_> = map.range(3..6).map(|ent| *ent.key()).collect();
  /// assert_eq!(keys, [3, 4, 5]);
  ///
  /// let values: Vec<_> = map.range(..=2).rev().map(|ent| *ent.value()).collect();
  /// assert_eq!(values, [20, 10, 0]);
  /// ```
  #[inline]
  pub fn range<Q, R>(&self, range: R) -> Range<'_, Q, R, K, V, C>
  where
    K: Borrow<Q>,
    Q: ?Sized,
    R: RangeBounds<Q>,
    C: Comparator<Q>,
  {
    Range::new(self, range)
  }

  /// Returns an iterator over all entries in the skipmap, in descending order.
  #[inline]
  pub fn iter_rev(&self) -> IterRev<'_, K, V, C>
  where
    K: Clone,
    V: Clone,
    C: Comparator<K>,
  {
    Range::<K, RangeFull, K, V, C>::new(self, ..).rev()
  }

  fn near_entry<Q>(&self, key: &Q, rel: Relation) -> Option<Entry<K, V>>
  where
    K: Borrow<Q> + Clone,
    Q: ?Sized,
    C: Comparator<Q>,
    V: Clone,
  {
    let guard = &epoch::pin();
    self
      .find_near_live(key, rel, guard)
      .map(|found| found.to_entry())
  }

  fn near_key<Q>(&self, key: &Q, rel: Relation) -> Option<K>
  where
    K: Borrow<Q> + Clone,
    Q: ?Sized,
    C: Comparator<Q>,
  {
    let guard = &epoch::pin();
    self
      .find_near_live(key, rel, guard)
      .map(|found| found.key.clone())
  }

  /// Replaces the value of the live node of `key` if the current value satisfies `matches`.
  ///
  /// Returns the replaced value, or hands the new value back if nothing was replaced.
  fn do_replace<'g, Q>(
    &'g self,
    key: &Q,
    value: V,
    matches: impl Fn(&V) -> bool,
    guard: &'g Guard,
  ) -> Result<&'g V, V>
  where
    K: Borrow<Q>,
    Q: ?Sized,
    C: Comparator<Q>,
  {
    let mut new = Owned::new(value);
    loop {
      let Some(found) = self.find_node(key, guard) else {
        return Err(*new.into_box());
      };
      let old = found.value();
      if !matches(old) {
        return Err(*new.into_box());
      }

      match found.node.cas_value(found.value, new, guard) {
        Ok(()) => {
          // Safety: the old value is unreachable now
          unsafe {
            guard.defer_destroy(found.value);
          }
          return Ok(old);
        }
        Err(back) => new = back,
      }
    }
  }
}

impl<K, V, C> SkipMap<K, V, C>
where
  K: Send + 'static,
  V: Send + 'static,
  C: Comparator<K>,
{
  /// Inserts `key` with `value`, replacing the value if the key is already present.
  ///
  /// Returns the previous value of the key.
  ///
  /// ## Example
  ///
  /// ```rust
  /// use lfskl::SkipMap;
  ///
  /// let map = SkipMap::new();
  /// assert_eq!(map.insert(5, "x"), None);
  /// assert_eq!(map.insert(5, "y"), Some("x"));
  /// assert_eq!(map.get(&5), Some("y"));
  /// ```
  pub fn insert(&self, key: K, value: V) -> Option<V>
  where
    V: Clone,
  {
    let guard = &epoch::pin();
    self.do_put(key, value, false, guard).cloned()
  }

  /// Inserts `key` with `value` only if the key is absent.
  ///
  /// Returns the current value if the key is already present, in which case the map is left
  /// unchanged and `value` is dropped.
  ///
  /// ## Example
  ///
  /// ```rust
  /// use lfskl::SkipMap;
  ///
  /// let map = SkipMap::new();
  /// assert_eq!(map.get_or_insert(5, "x"), None);
  /// assert_eq!(map.get_or_insert(5, "y"), Some("x"));
  /// assert_eq!(map.get(&5), Some("x"));
  /// ```
  pub fn get_or_insert(&self, key: K, value: V) -> Option<V>
  where
    V: Clone,
  {
    let guard = &epoch::pin();
    self.do_put(key, value, true, guard).cloned()
  }

  /// Returns the value of `key`, inserting the result of `f` first if the key is absent.
  ///
  /// `f` is only called if the key is absent, and its result may still be dropped if another
  /// thread inserts the key first.
  pub fn get_or_insert_with(&self, key: K, f: impl FnOnce() -> V) -> V
  where
    V: Clone,
  {
    let guard = &epoch::pin();
    if let Some(found) = self.find_node(&key, guard) {
      return found.value().clone();
    }

    let value = f();
    match self.do_put(key, value.clone(), true, guard) {
      Some(current) => current.clone(),
      None => value,
    }
  }

  /// Inserts `key` with `value` only if the key is absent.
  ///
  /// # Errors
  ///
  /// - Returns `Error::Duplicated` if the key is already present, the map is left unchanged.
  pub fn try_insert(&self, key: K, value: V) -> Result<(), Error> {
    let guard = &epoch::pin();
    match self.do_put(key, value, true, guard) {
      None => Ok(()),
      Some(_) => Err(Error::Duplicated),
    }
  }

  /// Removes the last (largest) entry of the skipmap and returns it.
  pub fn pop_last(&self) -> Option<Entry<K, V>>
  where
    K: Clone,
    V: Clone,
  {
    let guard = &epoch::pin();
    self
      .do_pop_last(guard)
      .map(|(k, v)| Entry::new(k.clone(), v.clone()))
  }
}
