/// Error type for the lfskl crate.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
  /// Indicates that the requested maximum height is zero or larger than
  /// the maximum number of index levels supported by the map.
  #[error("invalid max height {height}, the max height must be in range 1..={max}")]
  InvalidMaxHeight {
    /// The requested height.
    height: u8,
    /// The largest supported height.
    max: usize,
  },

  /// Indicates that a live entry with the specified key already exists in the map.
  #[error("key already exists in the skipmap")]
  Duplicated,
}
