use super::*;

use crossbeam_epoch::Owned;

/// The entry being inserted: plain parts until the first splice attempt, an unpublished node
/// afterwards so that retries reuse the allocation.
enum Pending<K, V> {
  Parts(K, Owned<V>),
  Node(Owned<Node<K, V>>),
}

impl<K, V> Pending<K, V> {
  #[inline]
  fn key(&self) -> &K {
    match self {
      Self::Parts(k, _) => k,
      // Safety: pending nodes are always entries.
      Self::Node(n) => unsafe { n.key_unchecked() },
    }
  }

  #[inline]
  fn into_parts(self) -> (K, Owned<V>) {
    match self {
      Self::Parts(k, v) => (k, v),
      Self::Node(n) => Node::into_entry(n),
    }
  }

  #[inline]
  fn into_node(self, max_height: usize) -> Owned<Node<K, V>> {
    match self {
      Self::Parts(k, v) => Node::new_entry(k, v, crate::random_height(max_height)),
      Self::Node(n) => n,
    }
  }
}

impl<K, V, C> SkipMap<K, V, C>
where
  K: Send + 'static,
  V: Send + 'static,
  C: Comparator<K>,
{
  /// Inserts or replaces the value of `key`.
  ///
  /// Returns the previous value if the key was present. If `only_if_absent` is set, a present key
  /// keeps its value and the new one is dropped.
  pub(super) fn do_put<'g>(
    &'g self,
    key: K,
    value: V,
    only_if_absent: bool,
    guard: &'g Guard,
  ) -> Option<&'g V> {
    let mut pending = Pending::Parts(key, Owned::new(value));

    let z = 'outer: loop {
      let mut b = self.find_predecessor(pending.key(), guard);
      let mut n = b.load_next(guard);
      if b.is_deleted(guard) {
        continue;
      }

      loop {
        // Safety: `n` was read from `b` while `b` was still live.
        if let Some(nd) = unsafe { n.as_ref() } {
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

          match self.cpr(pending.key(), k) {
            cmp::Ordering::Greater => {
              b = nd;
              n = f;
              continue;
            }
            cmp::Ordering::Equal => {
              // Safety: the value was loaded under `guard`
              let old = unsafe { v.deref() };
              if only_if_absent {
                return Some(old);
              }

              let (k, new) = pending.into_parts();
              match nd.cas_value(v, new, guard) {
                Ok(()) => {
                  // Safety: the old value is unreachable now
                  unsafe {
                    guard.defer_destroy(v);
                  }
                  return Some(old);
                }
                Err(new) => {
                  pending = Pending::Parts(k, new);
                  continue 'outer;
                }
              }
            }
            cmp::Ordering::Less => {}
          }
        }

        #[cfg(test)]
        if self.yield_now {
          std::thread::yield_now();
        }

        let z = pending.into_node(self.max_height());
        z.set_next(n);
        match b.cas_next_owned(n, z, guard) {
          Ok(z) => break 'outer z,
          Err(z) => {
            pending = Pending::Node(z);
            continue 'outer;
          }
        }
      }
    };

    // Safety: `z` has just been linked and `guard` is still pinned.
    self.add_index(unsafe { z.deref() }, guard);
    None
  }

  /// Links the index tower of the freshly inserted node `z`, top-down.
  ///
  /// Grows the height by at most one level. Gives up on the remaining levels if `z` gets deleted
  /// or a predecessor cannot be linked after.
  fn add_index<'g>(&'g self, z: &'g Node<K, V>, guard: &'g Guard) {
    let mut level = z.height();
    if level == 0 {
      return;
    }

    let mut h = self.height();
    if level > h {
      level = h + 1;
      while level > h {
        match self
          .height
          .compare_exchange_weak(h, level, Ordering::SeqCst, Ordering::Acquire)
        {
          Ok(_) => {
            #[cfg(feature = "tracing")]
            tracing::trace!(from = h, to = level, "increase skipmap height");
            break;
          }
          Err(current) => h = current,
        }
      }
    }

    // Safety: `z` is an entry node.
    let key = unsafe { z.key_unchecked() };
    let mut insertion_level = level;
    'splice: loop {
      let mut q = self.head_index(cmp::max(self.height(), level));
      let mut r = q.load_right(guard);
      loop {
        if r.tag() & MARKED != 0 {
          continue 'splice;
        }

        if r.tag() & PENDING == 0 {
          // Safety: an untagged right pointer read under `guard` was linked into the level.
          if let Some(rd) = unsafe { r.as_ref() } {
            let n = rd.node();
            match n.key() {
              Some(_) if n.is_deleted(guard) => {
                // Safety: `r` was read untagged from `q.right`
                if !unsafe { q.unlink(r, guard) } {
                  continue 'splice;
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

        if q.level() == insertion_level {
          // `q` itself is not linked into this level yet
          if r.tag() & PENDING != 0 {
            break 'splice;
          }

          // Safety: `r` was read untagged from `q.right` and the index at `insertion_level` of
          // `z` has not been linked yet.
          match unsafe { q.link(r, z.index(insertion_level), guard) } {
            None => break 'splice,
            Some(false) => continue 'splice,
            Some(true) => {
              if z.is_deleted(guard) {
                // help to clean up the index of the removed node
                self.find_node(key, guard);
                break 'splice;
              }

              insertion_level -= 1;
              if insertion_level == 0 {
                break 'splice;
              }
            }
          }
        }

        match q.down() {
          Some(d) => {
            q = d;
            r = d.load_right(guard);
          }
          None => break 'splice,
        }
      }
    }
  }
}
