/// A key-value pair taken out of the skipmap.
///
/// The entry is a snapshot: it owns clones of the key and the value as they were when the
/// entry was read, later updates of the map are not reflected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entry<K, V> {
  key: K,
  value: V,
}

impl<K, V> Entry<K, V> {
  #[inline]
  pub(super) const fn new(key: K, value: V) -> Self {
    Self { key, value }
  }

  /// Returns the reference to the key
  #[inline]
  pub const fn key(&self) -> &K {
    &self.key
  }

  /// Returns the reference to the value
  #[inline]
  pub const fn value(&self) -> &V {
    &self.value
  }

  /// Returns the key, dropping the value.
  #[inline]
  pub fn into_key(self) -> K {
    self.key
  }

  /// Returns the value, dropping the key.
  #[inline]
  pub fn into_value(self) -> V {
    self.value
  }

  /// Splits the entry into its key and value.
  #[inline]
  pub fn into_inner(self) -> (K, V) {
    (self.key, self.value)
  }
}

impl<K, V> From<Entry<K, V>> for (K, V) {
  #[inline]
  fn from(ent: Entry<K, V>) -> Self {
    ent.into_inner()
  }
}
