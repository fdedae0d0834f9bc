use std::io;

use thiserror::Error;

/// Failure of one of the OS primitives the heap is built on.
///
/// None of these are recoverable: the heap reports them through [`fatal`].
#[derive(Debug, Error)]
pub enum OsError {
  #[error("sbrk failed to extend the heap by {increment} bytes")]
  ExtendHeap {
    increment: usize,
    #[source]
    source: io::Error,
  },

  #[error("program break moved below the heap top: expected at least {expected:#x}, got {actual:#x}")]
  BreakMovedBack { expected: usize, actual: usize },

  #[error("mmap failed for {len} bytes")]
  Map {
    len: usize,
    #[source]
    source: io::Error,
  },

  #[error("munmap failed for {len} bytes at {addr:#x}")]
  Unmap {
    addr: usize,
    len: usize,
    #[source]
    source: io::Error,
  },

  #[error("page size query failed")]
  PageSize(#[source] io::Error),
}

/// Reports an unrecoverable OS failure and terminates the process.
#[cold]
pub fn fatal(
  context: &str,
  err: &OsError,
) -> ! {
  log::error!("{context}: {err}");
  match std::error::Error::source(err) {
    Some(source) => eprintln!("osmem: {context}: {err} ({source})"),
    None => eprintln!("osmem: {context}: {err}"),
  }
  std::process::abort()
}
