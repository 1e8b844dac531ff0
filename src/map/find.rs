use super::*;

use crossbeam_epoch::Shared;

bitflags::bitflags! {
  /// How the key found by [`SkipMap::find_near`] relates to the search key.
  ///
  /// The empty set means strictly greater.
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub(super) struct Relation: u8 {
    /// Equal to the search key.
    const EQ = 1;
    /// Strictly less than the search key.
    const LT = 2;
  }
}

impl Relation {
  /// Strictly greater than the search key.
  pub(super) const GT: Self = Self::empty();
  /// Greater than or equal to the search key.
  pub(super) const GE: Self = Self::EQ;
  /// Less than or equal to the search key.
  pub(super) const LE: Self = Self::LT.union(Self::EQ);
}

/// A live entry observed under a guard.
pub(super) struct Found<'g, K, V> {
  pub(super) node: &'g Node<K, V>,
  pub(super) key: &'g K,
  pub(super) value: Shared<'g, V>,
}

impl<'g, K, V> Found<'g, K, V> {
  #[inline]
  pub(super) fn value(&self) -> &'g V {
    // Safety: the value was loaded under the guard the entry was found with
    unsafe { self.value.deref() }
  }

  #[inline]
  pub(super) fn to_entry(&self) -> Entry<K, V>
  where
    K: Clone,
    V: Clone,
  {
    Entry::new(self.key.clone(), self.value().clone())
  }
}

impl<K, V, C> SkipMap<K, V, C>
where
  K: Send + 'static,
  V: Send + 'static,
{
  /// Returns a base-level node whose key is strictly less than `key`, or the header.
  ///
  /// Unlinks stale indexes met along the way. The result may have been deleted by the time it
  /// is used, callers validate it against its successor.
  pub(super) fn find_predecessor<'g, Q>(&'g self, key: &Q, guard: &'g Guard) -> &'g Node<K, V>
  where
    K: Borrow<Q>,
    Q: ?Sized,
    C: Comparator<Q>,
  {
    'outer: loop {
      let mut q = self.head_index(self.height());
      let mut r = q.load_right(guard);
      loop {
        // `q` is being unlinked, its right pointer is frozen
        if r.tag() & MARKED != 0 {
          continue 'outer;
        }

        if r.tag() & PENDING == 0 {
          // Safety: an untagged right pointer read under `guard` was linked into the level.
          if let Some(rd) = unsafe { r.as_ref() } {
            let n = rd.node();
            match n.key() {
              Some(_) if n.is_deleted(guard) => {
                // Safety: `r` was read untagged from `q.right`
                if !unsafe { q.unlink(r, guard) } {
                  continue 'outer;
                }
                r = q.load_right(guard);
                continue;
              }
              Some(k) if self.cpr(key, k) == cmp::Ordering::Greater => {
                q = rd;
                r = rd.load_right(guard);
                continue;
              }
              _ => {}
            }
          }
        }

        match q.down() {
          Some(d) => {
            q = d;
            r = d.load_right(guard);
          }
          None => return q.node(),
        }
      }
    }
  }

  /// Returns the live node holding `key`.
  ///
  /// Helps to unlink the deleted nodes met along the way.
  pub(super) fn find_node<'g, Q>(&'g self, key: &Q, guard: &'g Guard) -> Option<Found<'g, K, V>>
  where
    K: Borrow<Q>,
    Q: ?Sized,
    C: Comparator<Q>,
  {
    'outer: loop {
      let mut b = self.find_predecessor(key, guard);
      let mut n = b.load_next(guard);
      // the successor of a deleted node may already be gone
      if b.is_deleted(guard) {
        continue;
      }

      loop {
        // Safety: `n` was read from `b` while `b` was still live.
        let nd = unsafe { n.as_ref() }?;
        let f = nd.load_next(guard);
        if n != b.load_next(guard) {
          continue 'outer;
        }

        let (k, v) = match nd.state(guard) {
          State::Live { key, value } => (key, value),
          State::Deleted => {
            nd.help_delete(b, f, guard);
            continue 'outer;
          }
          // `b` is deleted
          State::Marker | State::Head => continue 'outer,
        };
        if b.is_deleted(guard) {
          continue 'outer;
        }

        match self.cpr(key, k) {
          cmp::Ordering::Equal => {
            return Some(Found {
              node: nd,
              key: k,
              value: v,
            })
          }
          cmp::Ordering::Less => return None,
          cmp::Ordering::Greater => {
            b = nd;
            n = f;
          }
        }
      }
    }
  }

  /// Returns the node nearest to `key` with the given relation, the header is never returned.
  ///
  /// The node was live when it was found, but may have been deleted since.
  fn find_near<'g, Q>(&'g self, key: &Q, rel: Relation, guard: &'g Guard) -> Option<&'g Node<K, V>>
  where
    K: Borrow<Q>,
    Q: ?Sized,
    C: Comparator<Q>,
  {
    'outer: loop {
      let mut b = self.find_predecessor(key, guard);
      let mut n = b.load_next(guard);
      if b.is_deleted(guard) {
        continue;
      }

      loop {
        // Safety: `n` was read from `b` while `b` was still live.
        let Some(nd) = (unsafe { n.as_ref() }) else {
          return if !rel.contains(Relation::LT) || b.is_head() {
            None
          } else {
            Some(b)
          };
        };
        let f = nd.load_next(guard);
        if n != b.load_next(guard) {
          continue 'outer;
        }

        let k = match nd.state(guard) {
          State::Live { key, .. } => key,
          State::Deleted => {
            nd.help_delete(b, f, guard);
            continue 'outer;
          }
          State::Marker | State::Head => continue 'outer,
        };
        if b.is_deleted(guard) {
          continue 'outer;
        }

        let c = self.cpr(key, k);
        if (c == cmp::Ordering::Equal && rel.contains(Relation::EQ))
          || (c == cmp::Ordering::Less && !rel.contains(Relation::LT))
        {
          return Some(nd);
        }
        if c != cmp::Ordering::Greater && rel.contains(Relation::LT) {
          return if b.is_head() { None } else { Some(b) };
        }

        b = nd;
        n = f;
      }
    }
  }

  /// Returns the live entry nearest to `key` with the given relation.
  pub(super) fn find_near_live<'g, Q>(
    &'g self,
    key: &Q,
    rel: Relation,
    guard: &'g Guard,
  ) -> Option<Found<'g, K, V>>
  where
    K: Borrow<Q>,
    Q: ?Sized,
    C: Comparator<Q>,
  {
    loop {
      let n = self.find_near(key, rel, guard)?;
      if let State::Live { key, value } = n.state(guard) {
        return Some(Found {
          node: n,
          key,
          value,
        });
      }
    }
  }

  /// Returns the first live entry.
  ///
  /// Helps to unlink deleted nodes at the front of the list.
  pub(super) fn find_first<'g>(&'g self, guard: &'g Guard) -> Option<Found<'g, K, V>> {
    let b = self.head();
    loop {
      let n = b.load_next(guard);
      // Safety: the header is never deleted, `n` is linked.
      let nd = unsafe { n.as_ref() }?;
      match nd.state(guard) {
        State::Live { key, value } => {
          return Some(Found {
            node: nd,
            key,
            value,
          })
        }
        State::Deleted => nd.help_delete(b, nd.load_next(guard), guard),
        State::Marker | State::Head => {}
      }
    }
  }

  /// Returns the last live entry.
  ///
  /// Uses the index to get near the end, then scans the base list.
  pub(super) fn find_last<'g>(&'g self, guard: &'g Guard) -> Option<Found<'g, K, V>> {
    'outer: loop {
      let mut q = self.head_index(self.height());
      loop {
        let r = q.load_right(guard);
        if r.tag() & MARKED != 0 {
          continue 'outer;
        }

        if r.tag() & PENDING == 0 {
          // Safety: an untagged right pointer read under `guard` was linked into the level.
          if let Some(rd) = unsafe { r.as_ref() } {
            if rd.is_stale(guard) {
              // Safety: `r` was read untagged from `q.right`
              unsafe {
                q.unlink(r, guard);
              }
              continue 'outer;
            }
            q = rd;
            continue;
          }
        }

        if let Some(d) = q.down() {
          q = d;
          continue;
        }

        let mut b = q.node();
        let mut n = b.load_next(guard);
        if b.is_deleted(guard) {
          continue 'outer;
        }

        loop {
          // Safety: `n` was read from `b` while `b` was still live.
          let Some(nd) = (unsafe { n.as_ref() }) else {
            return match b.state(guard) {
              State::Live { key, value } => Some(Found {
                node: b,
                key,
                value,
              }),
              State::Head => None,
              State::Deleted | State::Marker => continue 'outer,
            };
          };
          let f = nd.load_next(guard);
          if n != b.load_next(guard) {
            continue 'outer;
          }

          match nd.state(guard) {
            State::Live { .. } => {}
            State::Deleted => {
              nd.help_delete(b, f, guard);
              continue 'outer;
            }
            State::Marker | State::Head => continue 'outer,
          }
          if b.is_deleted(guard) {
            continue 'outer;
          }

          b = nd;
          n = f;
        }
      }
    }
  }

  /// Returns a base-level node that was followed by the last node, or the header.
  pub(super) fn find_predecessor_of_last<'g>(&'g self, guard: &'g Guard) -> &'g Node<K, V> {
    'outer: loop {
      let mut q = self.head_index(self.height());
      loop {
        let r = q.load_right(guard);
        if r.tag() & MARKED != 0 {
          continue 'outer;
        }

        if r.tag() & PENDING == 0 {
          // Safety: an untagged right pointer read under `guard` was linked into the level.
          if let Some(rd) = unsafe { r.as_ref() } {
            if rd.is_stale(guard) {
              // Safety: `r` was read untagged from `q.right`
              unsafe {
                q.unlink(r, guard);
              }
              continue 'outer;
            }
            // only move right if the node is not the last one
            if !rd.node().load_next(guard).is_null() {
              q = rd;
              continue;
            }
          }
        }

        match q.down() {
          Some(d) => q = d,
          None => return q.node(),
        }
      }
    }
  }

  /// Unlinks stale indexes right after the head, then tries to lower the height.
  pub(super) fn clear_index_to_first(&self, guard: &Guard) {
    'outer: loop {
      let mut q = self.head_index(self.height());
      loop {
        let r = q.load_right(guard);
        // Safety: head indexes are never marked nor pending.
        if let Some(rd) = unsafe { r.as_ref() } {
          // Safety: `r` was read untagged from `q.right`
          if rd.is_stale(guard) && !unsafe { q.unlink(r, guard) } {
            continue 'outer;
          }
        }

        match q.down() {
          Some(d) => q = d,
          None => break 'outer,
        }
      }
    }

    if self.head_index(self.height()).is_last(guard) {
      self.try_reduce_level(guard);
    }
  }
}
