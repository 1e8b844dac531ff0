use super::*;

use crossbeam_epoch::Shared;

impl<K, V, C> SkipMap<K, V, C>
where
  K: Send + 'static,
  V: Send + 'static,
{
  /// Removes `key` if its current value satisfies `matches`, returning the removed value.
  ///
  /// The value is logically deleted first, then the node is unlinked, either by this thread or
  /// by whichever thread runs into it next.
  pub(super) fn do_remove<'g, Q>(
    &'g self,
    key: &Q,
    matches: impl Fn(&V) -> bool,
    guard: &'g Guard,
  ) -> Option<&'g V>
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
          State::Marker | State::Head => continue 'outer,
        };
        if b.is_deleted(guard) {
          continue 'outer;
        }

        match self.cpr(key, k) {
          cmp::Ordering::Less => return None,
          cmp::Ordering::Greater => {
            b = nd;
            n = f;
            continue;
          }
          cmp::Ordering::Equal => {}
        }

        // Safety: the value was loaded under `guard`
        let old = unsafe { v.deref() };
        if !matches(old) {
          return None;
        }
        if !nd.cas_delete(v, guard) {
          continue 'outer;
        }

        // Safety: the value is unreachable now
        unsafe {
          guard.defer_destroy(v);
        }
        self.unlink_deleted(b, n, f, key, guard);
        return Some(old);
      }
    }
  }

  /// Unlinks the freshly deleted node `n` from its predecessor `b`, leaving the job to
  /// [`find_node`](SkipMap::find_node) if a concurrent update gets in the way.
  fn unlink_deleted<'g, Q>(
    &'g self,
    b: &'g Node<K, V>,
    n: Shared<'g, Node<K, V>>,
    f: Shared<'g, Node<K, V>>,
    key: &Q,
    guard: &'g Guard,
  ) where
    K: Borrow<Q>,
    Q: ?Sized,
    C: Comparator<Q>,
  {
    // Safety: `n` was read from `b` while `b` was still live.
    let nd = unsafe { n.deref() };
    // Safety: the marker has just been appended after `n`
    if !nd.append_marker(f, guard) || !unsafe { Node::unlink_next(b, n, f, guard) } {
      self.find_node(key, guard);
    } else {
      // clean the index
      self.find_predecessor(key, guard);
      if self.head_index(self.height()).is_last(guard) {
        self.try_reduce_level(guard);
      }
    }
  }

  /// Lowers the height by one if the three topmost levels are empty.
  ///
  /// The check races with insertions, so the height is restored if the top level got an index
  /// right after the change. An index may still be lost in a very unlikely interleaving, which
  /// only costs search performance.
  pub(super) fn try_reduce_level(&self, guard: &Guard) {
    let h = self.height();
    if h <= self.reduce_threshold() {
      return;
    }

    let top = self.head_index(h);
    if !(top.is_last(guard)
      && self.head_index(h - 1).is_last(guard)
      && self.head_index(h - 2).is_last(guard))
    {
      return;
    }

    if self
      .height
      .compare_exchange(h, h - 1, Ordering::SeqCst, Ordering::Relaxed)
      .is_err()
    {
      return;
    }

    if top.is_last(guard) {
      #[cfg(feature = "tracing")]
      tracing::trace!(from = h, to = h - 1, "reduce skipmap height");
    } else {
      let _reverted = self
        .height
        .compare_exchange(h - 1, h, Ordering::SeqCst, Ordering::Relaxed)
        .is_ok();
      #[cfg(feature = "tracing")]
      tracing::debug!(height = h, reverted = _reverted, "revert skipmap height reduction");
    }
  }

  /// Removes the first live entry.
  pub(super) fn do_pop_first<'g>(&'g self, guard: &'g Guard) -> Option<(&'g K, &'g V)> {
    let b = self.head();
    loop {
      let n = b.load_next(guard);
      // Safety: the header is never deleted, `n` is linked.
      let nd = unsafe { n.as_ref() }?;
      let f = nd.load_next(guard);
      if n != b.load_next(guard) {
        continue;
      }

      let (k, v) = match nd.state(guard) {
        State::Live { key, value } => (key, value),
        State::Deleted => {
          nd.help_delete(b, f, guard);
          continue;
        }
        State::Marker | State::Head => continue,
      };
      if !nd.cas_delete(v, guard) {
        continue;
      }

      // Safety: the value is unreachable now
      unsafe {
        guard.defer_destroy(v);
      }
      // Safety: the marker has just been appended after `n`
      if !nd.append_marker(f, guard) || !unsafe { Node::unlink_next(b, n, f, guard) } {
        // retry via helping
        self.find_first(guard);
      }
      self.clear_index_to_first(guard);
      // Safety: the value was loaded under `guard`
      return Some((k, unsafe { v.deref() }));
    }
  }
}

impl<K, V, C> SkipMap<K, V, C>
where
  K: Send + 'static,
  V: Send + 'static,
  C: Comparator<K>,
{
  /// Removes the last live entry.
  pub(super) fn do_pop_last<'g>(&'g self, guard: &'g Guard) -> Option<(&'g K, &'g V)> {
    'outer: loop {
      let mut b = self.find_predecessor_of_last(guard);
      let mut n = b.load_next(guard);
      if b.is_deleted(guard) {
        continue;
      }

      loop {
        // Safety: `n` was read from `b` while `b` was still live.
        let Some(nd) = (unsafe { n.as_ref() }) else {
          if b.is_head() {
            return None;
          }
          // `b` became the last node, look again
          continue 'outer;
        };
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
          State::Marker | State::Head => continue 'outer,
        };
        if b.is_deleted(guard) {
          continue 'outer;
        }

        if !f.is_null() {
          b = nd;
          n = f;
          continue;
        }

        if !nd.cas_delete(v, guard) {
          continue 'outer;
        }

        // Safety: the value is unreachable now
        unsafe {
          guard.defer_destroy(v);
        }
        self.unlink_deleted(b, n, f, k, guard);
        // Safety: the value was loaded under `guard`
        return Some((k, unsafe { v.deref() }));
      }
    }
  }
}
