//! C ABI entry points over one process-wide heap.
//!
//! The symbols are `os_`-prefixed so linking this crate never shadows the
//! host's own `malloc` family.

use std::ptr;

use libc::{c_void, size_t};
use parking_lot::{Mutex, const_mutex};

use crate::{Heap, os::SystemOs};

static HEAP: Mutex<Option<Heap<SystemOs>>> = const_mutex(None);

fn with_heap<R>(f: impl FnOnce(&mut Heap<SystemOs>) -> R) -> R {
  let mut heap = HEAP.lock();
  f(heap.get_or_insert_with(|| Heap::new(SystemOs)))
}

/// Allocates `size` bytes of uninitialized memory, or returns null for a
/// zero-sized request.
#[unsafe(no_mangle)]
pub extern "C" fn os_malloc(size: size_t) -> *mut c_void {
  with_heap(|heap| heap.allocate(size)).map_or(ptr::null_mut(), |payload| payload.as_ptr().cast())
}

/// Allocates `nmemb * size` zeroed bytes. Returns null when either factor is
/// zero or the product overflows.
#[unsafe(no_mangle)]
pub extern "C" fn os_calloc(
  nmemb: size_t,
  size: size_t,
) -> *mut c_void {
  with_heap(|heap| heap.zeroed_allocate(nmemb, size)).map_or(ptr::null_mut(), |payload| payload.as_ptr().cast())
}

/// Resizes an allocation, possibly moving it.
///
/// # Safety
///
/// `ptr` must be null or a pointer returned by this module that has not been
/// released. If the result differs from `ptr`, `ptr` must not be used again.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn os_realloc(
  ptr: *mut c_void,
  size: size_t,
) -> *mut c_void {
  with_heap(|heap| heap.resize(ptr.cast(), size)).map_or(ptr::null_mut(), |payload| payload.as_ptr().cast())
}

/// Releases an allocation. Null and already released pointers are ignored.
///
/// # Safety
///
/// `ptr` must be null or a pointer returned by this module, and must not be
/// used after this call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn os_free(ptr: *mut c_void) {
  with_heap(|heap| heap.release(ptr.cast()));
}

#[cfg(test)]
mod tests {
  use super::*;

  // Heap-backed paths run in tests/system_heap.rs, a process of their own.

  #[test]
  fn test_null_results() {
    assert!(os_malloc(0).is_null());
    assert!(os_calloc(0, 16).is_null());
    assert!(os_calloc(usize::MAX, 2).is_null());

    unsafe {
      os_free(ptr::null_mut());
      assert!(os_realloc(ptr::null_mut(), 0).is_null());
    }
  }

  #[test]
  fn test_mapped_round_trip() {
    let big = os_malloc(200_000).cast::<u8>();
    assert!(!big.is_null());

    unsafe {
      big.write(7);
      big.add(199_999).write(9);

      let bigger = os_realloc(big.cast(), 400_000).cast::<u8>();
      assert!(!bigger.is_null());
      assert_eq!(bigger.read(), 7);
      assert_eq!(bigger.add(199_999).read(), 9);

      os_free(bigger.cast());
    }
  }

  #[test]
  fn test_calloc_above_one_page_is_zeroed() {
    let zeroed = os_calloc(64, 4096).cast::<u8>();
    assert!(!zeroed.is_null());

    let bytes = unsafe { std::slice::from_raw_parts(zeroed, 64 * 4096) };
    assert!(bytes.iter().all(|byte| *byte == 0));

    unsafe { os_free(zeroed.cast()) };
  }
}
