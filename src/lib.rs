//! # osmem - A best-fit heap allocator over `sbrk` and `mmap`
//!
//! This crate implements the `malloc` / `calloc` / `realloc` / `free` family
//! on top of two OS services: a growable heap region (the program break) for
//! small requests, and independent anonymous mappings for
//! large ones.
//!
//! ## Overview
//!
//! ```text
//!   Heap region (grows upwards; bytes other `sbrk` users take become gaps):
//!
//!   base                                                     committed top
//!   ┌────┬─────────┬────┬───────────────┬────┬──────┬──────────────┐
//!   │ H  │  used   │ H  │     free      │ H  │ used │   slack      │
//!   └────┴─────────┴────┴───────────────┴────┴──────┴──────────────┘
//!     ▲                                    ▲
//!     first                                last (tail)
//!
//!   Mapped blocks (>= 128 KiB, never in the directory):
//!
//!   ┌────┬──────────────────────────┐   ┌────┬────────────────────┐
//!   │ H  │         payload          │   │ H  │      payload       │
//!   └────┴──────────────────────────┘   └────┴────────────────────┘
//! ```
//!
//! `H` is a 16-byte [`HEADER_SIZE`] header. Each heap block also has a record
//! in an index-linked directory kept in increasing address order. The
//! directory is where statuses and links live.
//!
//! ## Crate Structure
//!
//! ```text
//!   osmem
//!   ├── align      - align! macro and checked rounding
//!   ├── block      - Block records, Status, in-memory Header
//!   ├── config     - HeapConfig (mmap threshold, slab size)
//!   ├── directory  - Address-ordered block arena with invariant checks
//!   ├── error      - OsError and the fatal() reporter
//!   ├── ffi        - os_malloc / os_calloc / os_realloc / os_free
//!   ├── heap       - Heap: allocate, zeroed_allocate, resize, release
//!   ├── os         - Os trait, SystemOs (libc), SimulatedOs
//!   ├── region     - offset <-> pointer translation, raw reads/writes
//!   └── resize     - resize decision table
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use osmem::{Heap, SimulatedOs, Status};
//!
//! let mut heap = Heap::new(SimulatedOs::default());
//!
//! let a = heap.allocate(100).unwrap();
//! let b = heap.allocate(200).unwrap();
//! heap.release(a.as_ptr());
//!
//! // The freed block is reused instead of growing the heap.
//! let c = heap.allocate(50).unwrap();
//! assert_eq!(c, a);
//! assert_eq!(heap.status_of(b.as_ptr()), Some(Status::HeapAllocated));
//! ```
//!
//! ## Allocation Paths
//!
//! ```text
//!   allocate(n), n rounded up to 8
//!     │
//!     ├── n >= 128 KiB ───────────────► mmap(header + n)
//!     ├── first heap request ─────────► sbrk(128 KiB slab), carve at base
//!     ├── best-fit free block ────────► reuse, split off the excess
//!     ├── free tail too small ────────► grow tail in place
//!     └── otherwise ──────────────────► new block after the tail
//! ```
//!
//! ## Failure Model
//!
//! Bad arguments (zero sizes, released pointers, overflowing products) yield
//! `None` or do nothing. An OS primitive failing is fatal: a diagnostic is
//! printed and the process aborts. So is a break that moved below the heap
//! top; a break that moved past it is simply skipped.
//!
//! ## Limitations
//!
//! - **Single-threaded engine**: [`Heap`] takes `&mut self`; the C ABI wraps a
//!   single instance in one lock.
//! - **Gaps are never reclaimed**: bytes skipped over after a foreign break
//!   move stay unused, and blocks on either side of a gap never merge.
//! - **No trimming**: heap memory is never returned to the OS.

pub mod align;
mod block;
mod config;
mod directory;
mod error;
pub mod ffi;
mod heap;
mod os;
mod region;
pub mod resize;

pub use block::{Block, BlockId, HEADER_SIZE, Status};
pub use config::{HeapConfig, MMAP_THRESHOLD, SLAB_SIZE};
pub use directory::{BlockDirectory, InvariantViolation};
pub use error::{OsError, fatal};
pub use heap::{BlockInfo, Heap};
pub use os::{Os, OsEvent, SimulatedOs, SystemOs};
