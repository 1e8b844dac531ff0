use super::{Error, MAX_HEIGHT, REDUCE_THRESHOLD};

/// Options for [`SkipMap`](crate::SkipMap).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Options {
  max_height: u8,
  reduce_threshold: u8,
}

impl Default for Options {
  #[inline]
  fn default() -> Options {
    Options::new()
  }
}

impl Options {
  /// Creates a new set of options with the default values.
  #[inline]
  pub const fn new() -> Self {
    Self {
      max_height: MAX_HEIGHT as u8,
      reduce_threshold: REDUCE_THRESHOLD as u8,
    }
  }

  /// Set the maximum number of index levels the map may grow.
  ///
  /// A lower max height trades search cost on large maps for less memory spent on index nodes.
  /// The height must be in range `1..=32`, otherwise constructing the map fails.
  ///
  /// The default max height is `32`.
  ///
  /// ## Example
  ///
  /// ```rust
  /// use lfskl::Options;
  ///
  /// let opts = Options::new().with_max_height(16);
  /// assert_eq!(opts.max_height(), 16);
  /// ```
  #[inline]
  pub const fn with_max_height(mut self, height: u8) -> Self {
    self.max_height = height;
    self
  }

  /// Set the minimum index height the map keeps before it tries to lower its height
  /// after removals.
  ///
  /// The map only lowers its height when the top three levels are all empty, so a threshold
  /// below `3` behaves like `3`.
  ///
  /// The default threshold is `3`.
  ///
  /// ## Example
  ///
  /// ```rust
  /// use lfskl::Options;
  ///
  /// let opts = Options::new().with_reduce_threshold(8);
  /// assert_eq!(opts.reduce_threshold(), 8);
  /// ```
  #[inline]
  pub const fn with_reduce_threshold(mut self, threshold: u8) -> Self {
    self.reduce_threshold = threshold;
    self
  }

  /// Returns the maximum number of index levels.
  #[inline]
  pub const fn max_height(&self) -> u8 {
    self.max_height
  }

  /// Returns the minimum index height kept before lowering the height.
  #[inline]
  pub const fn reduce_threshold(&self) -> u8 {
    self.reduce_threshold
  }

  /// Checks the options.
  ///
  /// # Errors
  ///
  /// - Returns `Error::InvalidMaxHeight` if the max height is `0` or larger than `32`.
  pub fn validate(&self) -> Result<(), Error> {
    if self.max_height == 0 || self.max_height as usize > MAX_HEIGHT {
      return Err(Error::InvalidMaxHeight {
        height: self.max_height,
        max: MAX_HEIGHT,
      });
    }
    Ok(())
  }
}
