/// Payload alignment guaranteed by every allocation.
pub const ALIGNMENT: usize = 8;

/// Rounds the given size up to the next multiple of [`ALIGNMENT`].
///
/// Wraps on overflow; use [`checked_align`] for untrusted sizes.
///
/// # Examples
///
/// ```rust
/// use osmem::align;
///
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(0), 0);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    (($value) as usize).wrapping_add($crate::align::ALIGNMENT - 1) & !($crate::align::ALIGNMENT - 1)
  };
}

/// Same rounding as [`align!`], or `None` when it would wrap.
pub const fn checked_align(value: usize) -> Option<usize> {
  match value.checked_add(ALIGNMENT - 1) {
    Some(bumped) => Some(bumped & !(ALIGNMENT - 1)),
    None => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_align_boundaries() {
    let cases = [
      (0, 0),
      (1, 8),
      (7, 8),
      (8, 8),
      (9, 16),
      (15, 16),
      (16, 16),
      (17, 24),
      (100, 104),
      (4095, 4096),
      (4096, 4096),
      (128 * 1024 - 1, 128 * 1024),
      (128 * 1024 + 1, 128 * 1024 + 8),
    ];

    for (size, expected) in cases {
      assert_eq!(align!(size), expected, "align!({size})");
      assert_eq!(checked_align(size), Some(expected), "checked_align({size})");
    }
  }

  #[test]
  fn test_aligned_sizes_are_fixed_points() {
    for size in (0..1024).step_by(ALIGNMENT) {
      assert_eq!(align!(size), size);
      assert_eq!(align!(size + 1), size + ALIGNMENT);
    }
  }

  #[test]
  fn test_checked_align_overflow() {
    assert_eq!(checked_align(usize::MAX), None);
    assert_eq!(checked_align(usize::MAX - 6), None);
    assert_eq!(checked_align(usize::MAX - 7), Some(usize::MAX - 7));
  }
}
