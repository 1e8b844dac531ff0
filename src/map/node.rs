use core::{
  ptr::NonNull,
  sync::atomic::{AtomicUsize, Ordering},
};
use std::boxed::Box;

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};

/// Tag set on an index's `right` pointer once the index is stale and about to be unlinked.
/// A marked `right` pointer never changes again.
pub(super) const MARKED: usize = 1;

/// Tag set on an index's `right` pointer while the index is not linked into its level yet.
/// Traversals treat a pending `right` pointer as the end of the level.
pub(super) const PENDING: usize = 2;

/// What a node is, fixed at allocation.
pub(super) enum Kind<K> {
  /// The base header, rooting the base list and all the head indexes.
  Head,
  /// A key-value entry.
  Entry(K),
  /// A marker spliced after a logically deleted node.
  Marker,
}

/// The state of a node at the moment it was observed.
pub(super) enum State<'g, K, V> {
  /// The base header.
  Head,
  /// A live entry and its current value.
  Live { key: &'g K, value: Shared<'g, V> },
  /// An entry whose value has been removed, it may still be linked into the base list.
  Deleted,
  /// A deletion marker.
  Marker,
}

/// A node of the base list.
///
/// `refs` counts the base list membership of the node plus the number of index levels the node
/// is currently linked in. The thread that drops it to zero defers the destruction of the node
/// together with its whole index tower.
pub(super) struct Node<K, V> {
  kind: Kind<K>,
  value: Atomic<V>,
  next: Atomic<Node<K, V>>,
  refs: AtomicUsize,
  tower: Box<[Index<K, V>]>,
}

impl<K, V> Node<K, V> {
  /// Allocates the base header with a full tower of head indexes.
  pub(super) fn new_head(height: usize) -> NonNull<Self> {
    let raw = Box::into_raw(Box::new(Self {
      kind: Kind::Head,
      value: Atomic::null(),
      next: Atomic::null(),
      refs: AtomicUsize::new(1),
      tower: Box::default(),
    }));

    // Safety: the pointer comes from a fresh box and is not shared yet.
    unsafe {
      (*raw).tower = (1..=height).map(|lvl| Index::new(raw, lvl, false)).collect();
      NonNull::new_unchecked(raw)
    }
  }

  /// Allocates an unlinked entry node with an index tower of `height` levels.
  pub(super) fn new_entry(key: K, value: Owned<V>, height: usize) -> Owned<Self> {
    let raw = Box::into_raw(Box::new(Self {
      kind: Kind::Entry(key),
      value: Atomic::from(value),
      next: Atomic::null(),
      refs: AtomicUsize::new(1),
      tower: Box::default(),
    }));

    // Safety: the pointer comes from a fresh box and is not shared yet, ownership is handed back
    // to an `Owned` once the tower is installed.
    unsafe {
      (*raw).tower = (1..=height).map(|lvl| Index::new(raw, lvl, true)).collect();
      Owned::from_raw(raw)
    }
  }

  /// Takes the key and the value back out of a node that was never published.
  pub(super) fn into_entry(mut this: Owned<Self>) -> (K, Owned<V>) {
    // Safety: the node was never linked, nobody else can see its value.
    let value = unsafe {
      this
        .value
        .swap(Shared::<V>::null(), Ordering::Relaxed, epoch::unprotected())
        .into_owned()
    };
    match core::mem::replace(&mut this.kind, Kind::Head) {
      Kind::Entry(key) => (key, value),
      _ => unreachable!("only entry nodes are allocated unpublished"),
    }
  }

  fn new_marker(next: Shared<'_, Self>) -> Owned<Self> {
    let marker = Owned::new(Self {
      kind: Kind::Marker,
      value: Atomic::null(),
      next: Atomic::null(),
      refs: AtomicUsize::new(0),
      tower: Box::default(),
    });
    marker.next.store(next, Ordering::Relaxed);
    marker
  }

  /// Returns the key of an entry node, `None` for the header and markers.
  #[inline]
  pub(super) fn key(&self) -> Option<&K> {
    match &self.kind {
      Kind::Entry(k) => Some(k),
      _ => None,
    }
  }

  /// Returns the key of a node already known to be an entry.
  ///
  /// ## Safety
  /// - The node must not be the header or a marker.
  #[inline]
  pub(super) unsafe fn key_unchecked(&self) -> &K {
    match &self.kind {
      Kind::Entry(k) => k,
      // Safety: guaranteed by the caller
      _ => core::hint::unreachable_unchecked(),
    }
  }

  #[inline]
  pub(super) fn is_head(&self) -> bool {
    matches!(self.kind, Kind::Head)
  }

  #[inline]
  pub(super) fn is_marker(&self) -> bool {
    matches!(self.kind, Kind::Marker)
  }

  #[inline]
  pub(super) fn state<'g>(&'g self, guard: &'g Guard) -> State<'g, K, V> {
    match &self.kind {
      Kind::Head => State::Head,
      Kind::Marker => State::Marker,
      Kind::Entry(key) => {
        let value = self.value.load(Ordering::Acquire, guard);
        if value.is_null() {
          State::Deleted
        } else {
          State::Live { key, value }
        }
      }
    }
  }

  /// Returns `true` if the node is an entry whose value has been removed.
  #[inline]
  pub(super) fn is_deleted(&self, guard: &Guard) -> bool {
    matches!(self.state(guard), State::Deleted)
  }

  /// Returns the current value if the node is a live entry.
  #[inline]
  pub(super) fn valid_value<'g>(&'g self, guard: &'g Guard) -> Option<&'g V> {
    match self.state(guard) {
      // Safety: the value was loaded under `guard`
      State::Live { value, .. } => Some(unsafe { value.deref() }),
      _ => None,
    }
  }

  #[inline]
  pub(super) fn load_next<'g>(&self, guard: &'g Guard) -> Shared<'g, Self> {
    self.next.load(Ordering::Acquire, guard)
  }

  /// Stores `next` into an unpublished node.
  #[inline]
  pub(super) fn set_next(&self, next: Shared<'_, Self>) {
    self.next.store(next, Ordering::Relaxed);
  }

  /// Returns the index of the node at `level`, `1 <= level <= tower height`.
  #[inline]
  pub(super) fn index(&self, level: usize) -> &Index<K, V> {
    &self.tower[level - 1]
  }

  #[inline]
  pub(super) fn height(&self) -> usize {
    self.tower.len()
  }

  /// CAS the value from `expected` to `new`, handing `new` back on failure.
  #[inline]
  pub(super) fn cas_value<'g>(
    &self,
    expected: Shared<'g, V>,
    new: Owned<V>,
    guard: &'g Guard,
  ) -> Result<(), Owned<V>> {
    self
      .value
      .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire, guard)
      .map(|_| ())
      .map_err(|e| e.new)
  }

  /// Logically deletes the node by CAS-ing the value from `expected` to null.
  #[inline]
  pub(super) fn cas_delete<'g>(&self, expected: Shared<'g, V>, guard: &'g Guard) -> bool {
    self
      .value
      .compare_exchange(
        expected,
        Shared::<V>::null(),
        Ordering::AcqRel,
        Ordering::Acquire,
        guard,
      )
      .is_ok()
  }

  /// CAS the next pointer from `expected` to an unpublished node, handing it back on failure.
  #[inline]
  pub(super) fn cas_next_owned<'g>(
    &self,
    expected: Shared<'g, Self>,
    new: Owned<Self>,
    guard: &'g Guard,
  ) -> Result<Shared<'g, Self>, Owned<Self>> {
    self
      .next
      .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire, guard)
      .map_err(|e| e.new)
  }

  #[inline]
  fn cas_next<'g>(&self, expected: Shared<'g, Self>, new: Shared<'g, Self>, guard: &'g Guard) -> bool {
    self
      .next
      .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire, guard)
      .is_ok()
  }

  /// Tries to append a deletion marker after this node, expecting `f` as the current successor.
  #[inline]
  pub(super) fn append_marker<'g>(&self, f: Shared<'g, Self>, guard: &'g Guard) -> bool {
    // the marker is dropped right away if the CAS fails
    self
      .next
      .compare_exchange(
        f,
        Self::new_marker(f),
        Ordering::AcqRel,
        Ordering::Acquire,
        guard,
      )
      .is_ok()
  }

  /// Physically unlinks `n` (with its marker already appended) from `b`, expecting `f` to be the
  /// node following the marker.
  ///
  /// On success the base list reference of `n` is released and the marker is retired.
  ///
  /// ## Safety
  /// - `n` must be a node read from the base list under `guard`, whose next pointer is its marker.
  pub(super) unsafe fn unlink_next<'g>(
    b: &'g Self,
    n: Shared<'g, Self>,
    f: Shared<'g, Self>,
    guard: &'g Guard,
  ) -> bool {
    if !b.cas_next(n, f, guard) {
      return false;
    }

    let nd = n.deref();
    let marker = nd.load_next(guard);
    debug_assert!(marker.as_ref().is_some_and(|m| m.is_marker()));
    guard.defer_destroy(marker);
    nd.release(guard);
    true
  }

  /// Helps to finish the deletion of this node, given that it was observed deleted with
  /// predecessor `b` and successor `f`.
  ///
  /// Appends the marker if it is missing, otherwise unlinks the node and its marker from `b`.
  /// Does nothing if `b`, `self` and `f` are not adjacent anymore.
  pub(super) fn help_delete<'g>(&'g self, b: &'g Self, f: Shared<'g, Self>, guard: &'g Guard) {
    let this = Shared::from(self as *const Self);
    if f != self.load_next(guard) || this != b.load_next(guard) {
      return;
    }

    // Safety: `f` was read while `self` was still linked after `b`, so it is protected by `guard`.
    match unsafe { f.as_ref() } {
      Some(marker) if marker.is_marker() => {
        let succ = marker.load_next(guard);
        // Safety: `this` is linked after `b` and its next pointer is a marker.
        unsafe {
          Self::unlink_next(b, this, succ, guard);
        }
      }
      _ => {
        self.append_marker(f, guard);
      }
    }
  }

  /// Takes one more reference to the node, fails if the node is already being reclaimed.
  pub(super) fn try_acquire(&self) -> bool {
    let mut refs = self.refs.load(Ordering::Relaxed);
    loop {
      if refs == 0 {
        return false;
      }

      match self.refs.compare_exchange_weak(
        refs,
        refs + 1,
        Ordering::AcqRel,
        Ordering::Relaxed,
      ) {
        Ok(_) => return true,
        Err(current) => refs = current,
      }
    }
  }

  /// Releases one reference, deferring the destruction of the node once the last one is gone.
  ///
  /// ## Safety
  /// - The caller must own the reference it releases.
  pub(super) unsafe fn release(&self, guard: &Guard) {
    if self.refs.fetch_sub(1, Ordering::AcqRel) == 1 {
      guard.defer_destroy(Shared::from(self as *const Self));
    }
  }
}

impl<K, V> Drop for Node<K, V> {
  fn drop(&mut self) {
    // Safety: a node is only dropped once nobody can reach it, so is its value.
    unsafe {
      let v = self.value.load(Ordering::Relaxed, epoch::unprotected());
      if !v.is_null() {
        drop(v.into_owned());
      }
    }
  }
}

/// An index node, one level of a node's tower.
pub(super) struct Index<K, V> {
  node: *const Node<K, V>,
  level: usize,
  right: Atomic<Index<K, V>>,
}

impl<K, V> Index<K, V> {
  fn new(node: *const Node<K, V>, level: usize, pending: bool) -> Self {
    let right = Atomic::null();
    if pending {
      right.store(Shared::<Self>::null().with_tag(PENDING), Ordering::Relaxed);
    }
    Self { node, level, right }
  }

  /// Returns the node this index belongs to.
  #[inline]
  pub(super) fn node(&self) -> &Node<K, V> {
    // Safety: an index lives inside its node's tower, so the node outlives the index.
    unsafe { &*self.node }
  }

  #[inline]
  pub(super) fn level(&self) -> usize {
    self.level
  }

  /// Returns the index one level lower in the same tower, `None` at level 1.
  #[inline]
  pub(super) fn down(&self) -> Option<&Self> {
    if self.level == 1 {
      None
    } else {
      Some(self.node().index(self.level - 1))
    }
  }

  /// Loads the right pointer, tags included.
  #[inline]
  pub(super) fn load_right<'g>(&self, guard: &'g Guard) -> Shared<'g, Self> {
    self.right.load(Ordering::Acquire, guard)
  }

  /// Returns `true` if the node of this index has been deleted.
  #[inline]
  pub(super) fn is_stale(&self, guard: &Guard) -> bool {
    self.node().is_deleted(guard)
  }

  /// Unlinks the stale index `r` which follows this index.
  ///
  /// `r` is marked first so that nothing can be linked after it anymore, then this index is
  /// CAS-ed over it. Returns `false` if this index no longer points at `r`.
  ///
  /// ## Safety
  /// - `r` must have been read, untagged, from `self.right` under `guard`.
  pub(super) unsafe fn unlink<'g>(&self, r: Shared<'g, Self>, guard: &'g Guard) -> bool {
    let rd = r.deref();
    let succ = rd.right.fetch_or(MARKED, Ordering::AcqRel, guard);
    match self.right.compare_exchange(
      r,
      succ.with_tag(0),
      Ordering::AcqRel,
      Ordering::Acquire,
      guard,
    ) {
      Ok(_) => {
        rd.node().release(guard);
        true
      }
      Err(_) => false,
    }
  }

  /// Links `t`, an index of a freshly inserted node, between this index and `r`.
  ///
  /// Takes a reference on `t`'s node for the new level first. Returns `None` if the node is
  /// already being reclaimed, `Some(false)` if the CAS lost a race.
  ///
  /// ## Safety
  /// - `r` must have been read, untagged, from `self.right` under `guard`.
  /// - `t` must not be linked into its level yet.
  pub(super) unsafe fn link<'g>(
    &self,
    r: Shared<'g, Self>,
    t: &'g Self,
    guard: &'g Guard,
  ) -> Option<bool> {
    let node = t.node();
    if !node.try_acquire() {
      return None;
    }

    let pending = r.with_tag(PENDING);
    t.right.store(pending, Ordering::Release);
    let ts = Shared::from(t as *const Self);
    match self
      .right
      .compare_exchange(r, ts, Ordering::AcqRel, Ordering::Acquire, guard)
    {
      Ok(_) => {
        // publish the right link, fails only if `t` got marked in between
        let _ = t.right.compare_exchange(
          pending,
          r,
          Ordering::AcqRel,
          Ordering::Relaxed,
          guard,
        );
        Some(true)
      }
      Err(_) => {
        node.release(guard);
        Some(false)
      }
    }
  }

  /// Returns `true` if the index has nothing on its right.
  #[inline]
  pub(super) fn is_last(&self, guard: &Guard) -> bool {
    self.load_right(guard).is_null()
  }
}
