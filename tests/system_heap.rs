//! The C entry points over the real program break.
//!
//! Runs without the libtest harness so this process owns the one global heap
//! and the scenarios below run in order, on one thread, against a known
//! directory state.

use libc::{c_void, intptr_t};
use osmem::{
  HEADER_SIZE,
  ffi::{os_calloc, os_free, os_malloc, os_realloc},
};

fn fill(
  ptr: *mut c_void,
  len: usize,
  byte: u8,
) {
  unsafe { std::ptr::write_bytes(ptr.cast::<u8>(), byte, len) };
}

fn holds(
  ptr: *mut c_void,
  len: usize,
  byte: u8,
) -> bool {
  unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len) }
    .iter()
    .all(|value| *value == byte)
}

/// Moves the break the way any other `sbrk` user in the process would.
fn foreign_sbrk(increment: intptr_t) {
  let previous = unsafe { libc::sbrk(increment) };
  assert_ne!(previous, usize::MAX as *mut c_void, "sbrk({increment}) failed");
}

fn malloc(size: usize) -> *mut c_void {
  let ptr = os_malloc(size);
  assert!(!ptr.is_null(), "os_malloc({size}) returned null");
  assert_eq!(ptr as usize % 8, 0);
  ptr
}

/// Runs first: the directory is empty, so blocks are carved in order.
fn release_in_any_order_coalesces() {
  let a = malloc(40);
  let b = malloc(72);
  let c = malloc(160);
  let guard = malloc(8);

  assert_eq!(b as usize - a as usize, 40 + HEADER_SIZE);
  assert_eq!(c as usize - b as usize, 72 + HEADER_SIZE);

  unsafe {
    os_free(b);
    os_free(a);
    os_free(c);
    os_free(c);
  }

  let spanning = malloc(40 + 72 + 160 + 2 * HEADER_SIZE);
  assert_eq!(spanning, a);

  unsafe {
    os_free(spanning);
    os_free(guard);
  }
}

fn allocations_survive_foreign_break_moves() {
  let small = malloc(64);
  fill(small, 64, 0x11);

  foreign_sbrk(4096);

  let first = malloc(120_000);
  fill(first, 120_000, 0x22);
  let second = malloc(120_000);
  fill(second, 120_000, 0x33);

  foreign_sbrk(3);

  let third = malloc(120_000);
  fill(third, 120_000, 0x44);

  assert!(holds(small, 64, 0x11));
  assert!(holds(first, 120_000, 0x22));
  assert!(holds(second, 120_000, 0x33));

  unsafe {
    os_free(second);
    os_free(small);
    os_free(third);
    os_free(first);
  }
}

fn realloc_moves_contents_across_paths() {
  let p = malloc(100);
  fill(p, 100, 0xA1);

  foreign_sbrk(4097);

  let grown = unsafe { os_realloc(p, 50_000) };
  assert!(!grown.is_null());
  assert!(holds(grown, 100, 0xA1));
  fill(grown, 50_000, 0xA2);

  let shrunk = unsafe { os_realloc(grown, 40) };
  assert_eq!(shrunk, grown);
  assert!(holds(shrunk, 40, 0xA2));

  let mapped = unsafe { os_realloc(shrunk, 300_000) };
  assert!(!mapped.is_null());
  assert!(holds(mapped, 40, 0xA2));

  let back = unsafe { os_realloc(mapped, 64) };
  assert!(!back.is_null());
  assert!(holds(back, 40, 0xA2));

  unsafe {
    os_free(back);
    os_free(back);
  }
}

fn calloc_on_the_heap_is_zeroed() {
  let dirty = malloc(80);
  let guard = malloc(8);
  fill(dirty, 80, 0xFF);
  unsafe { os_free(dirty) };

  foreign_sbrk(64);

  let zeroed = os_calloc(10, 8);
  assert!(!zeroed.is_null());
  assert!(holds(zeroed, 80, 0));

  let wide = os_calloc(1000, 100);
  assert!(!wide.is_null());
  assert!(holds(wide, 100_000, 0));

  unsafe {
    os_free(zeroed);
    os_free(wide);
    os_free(guard);
  }
}

fn main() {
  let scenarios: [(&str, fn()); 4] = [
    ("release_in_any_order_coalesces", release_in_any_order_coalesces),
    ("allocations_survive_foreign_break_moves", allocations_survive_foreign_break_moves),
    ("realloc_moves_contents_across_paths", realloc_moves_contents_across_paths),
    ("calloc_on_the_heap_is_zeroed", calloc_on_the_heap_is_zeroed),
  ];

  for (name, scenario) in scenarios {
    scenario();
    println!("test {name} ... ok");
  }

  println!("\ntest result: ok. {} passed", scenarios.len());
}
