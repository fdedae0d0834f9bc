//! OS primitives the heap is built on.
//!
//! [`SystemOs`] talks to the kernel through `libc`. [`SimulatedOs`] keeps
//! everything inside the process and records every call, which is what the
//! tests and the walkthrough demo drive the heap with.

use std::{alloc, collections::BTreeMap, io, ptr::NonNull};

use libc::{c_void, intptr_t};

use crate::error::OsError;

/// The services a [`Heap`](crate::Heap) consumes.
pub trait Os {
  /// Grows the contiguous heap region by `increment` bytes and returns the
  /// previous top of the region.
  fn extend_heap(
    &mut self,
    increment: usize,
  ) -> Result<NonNull<u8>, OsError>;

  /// Creates a fresh, zero-initialized read/write mapping of `len` bytes.
  fn map_anonymous(
    &mut self,
    len: usize,
  ) -> Result<NonNull<u8>, OsError>;

  /// Releases a mapping created by [`Os::map_anonymous`].
  ///
  /// # Safety
  ///
  /// `addr` and `len` must describe exactly one live mapping, and nothing may
  /// touch that memory afterwards.
  unsafe fn unmap(
    &mut self,
    addr: NonNull<u8>,
    len: usize,
  ) -> Result<(), OsError>;

  fn page_size(&self) -> Result<usize, OsError>;
}

/// The real process: `sbrk(2)`, `mmap(2)` and `munmap(2)`.
///
/// The heap assumes it is the only user of the program break.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOs;

impl Os for SystemOs {
  fn extend_heap(
    &mut self,
    increment: usize,
  ) -> Result<NonNull<u8>, OsError> {
    let Ok(delta) = intptr_t::try_from(increment) else {
      return Err(OsError::ExtendHeap {
        increment,
        source: io::Error::from_raw_os_error(libc::ENOMEM),
      });
    };

    let previous = unsafe { libc::sbrk(delta) };

    if previous == usize::MAX as *mut c_void {
      return Err(OsError::ExtendHeap {
        increment,
        source: io::Error::last_os_error(),
      });
    }

    NonNull::new(previous.cast()).ok_or_else(|| OsError::ExtendHeap {
      increment,
      source: io::Error::from_raw_os_error(libc::EFAULT),
    })
  }

  fn map_anonymous(
    &mut self,
    len: usize,
  ) -> Result<NonNull<u8>, OsError> {
    let addr = unsafe {
      libc::mmap(
        std::ptr::null_mut(),
        len,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
      )
    };

    if addr == libc::MAP_FAILED {
      return Err(OsError::Map {
        len,
        source: io::Error::last_os_error(),
      });
    }

    NonNull::new(addr.cast()).ok_or_else(|| OsError::Map {
      len,
      source: io::Error::from_raw_os_error(libc::EFAULT),
    })
  }

  unsafe fn unmap(
    &mut self,
    addr: NonNull<u8>,
    len: usize,
  ) -> Result<(), OsError> {
    if unsafe { libc::munmap(addr.as_ptr().cast(), len) } == -1 {
      return Err(OsError::Unmap {
        addr: addr.as_ptr() as usize,
        len,
        source: io::Error::last_os_error(),
      });
    }
    Ok(())
  }

  fn page_size(&self) -> Result<usize, OsError> {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).map_err(|_| OsError::PageSize(io::Error::last_os_error()))
  }
}

/// One primitive call observed by [`SimulatedOs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsEvent {
  ExtendHeap { increment: usize },
  Map { addr: usize, len: usize },
  Unmap { addr: usize, len: usize },
}

/// An in-process stand-in for the kernel.
///
/// The heap region is a fixed zeroed reservation whose break only moves
/// forward; mappings are zeroed page-aligned allocations. Every call is
/// appended to [`SimulatedOs::events`].
pub struct SimulatedOs {
  region: NonNull<u8>,
  capacity: usize,
  brk: usize,
  page_size: usize,
  mappings: BTreeMap<usize, usize>,
  events: Vec<OsEvent>,
}

impl SimulatedOs {
  pub const DEFAULT_CAPACITY: usize = 16 * 1024 * 1024;
  pub const DEFAULT_PAGE_SIZE: usize = 4096;

  /// Reserves `capacity` bytes to stand in for the program break region.
  pub fn new(capacity: usize) -> Self {
    let layout = Self::region_layout(capacity);
    let region = unsafe { alloc::alloc_zeroed(layout) };
    let Some(region) = NonNull::new(region) else {
      alloc::handle_alloc_error(layout);
    };

    Self {
      region,
      capacity,
      brk: 0,
      page_size: Self::DEFAULT_PAGE_SIZE,
      mappings: BTreeMap::new(),
      events: Vec::new(),
    }
  }

  pub fn with_page_size(
    mut self,
    page_size: usize,
  ) -> Self {
    self.page_size = page_size;
    self
  }

  fn region_layout(capacity: usize) -> alloc::Layout {
    match alloc::Layout::from_size_align(capacity.max(1), Self::DEFAULT_PAGE_SIZE) {
      Ok(layout) => layout,
      Err(_) => panic!("simulated heap capacity {capacity} is too large"),
    }
  }

  fn mapping_layout(
    &self,
    len: usize,
  ) -> Option<alloc::Layout> {
    alloc::Layout::from_size_align(len.max(1), self.page_size).ok()
  }

  /// Bytes the break has moved since creation.
  pub fn break_offset(&self) -> usize {
    self.brk
  }

  /// Moves the break the way another `sbrk` user in the process would. Not
  /// recorded as an event.
  pub fn foreign_extend(
    &mut self,
    increment: usize,
  ) {
    self.brk = self.brk.saturating_add(increment).min(self.capacity);
  }

  pub fn events(&self) -> &[OsEvent] {
    &self.events
  }

  /// Number of `extend_heap` calls so far.
  pub fn extend_calls(&self) -> usize {
    self
      .events
      .iter()
      .filter(|event| matches!(event, OsEvent::ExtendHeap { .. }))
      .count()
  }

  /// Every `(addr, len)` passed to `unmap`, in call order.
  pub fn unmapped(&self) -> Vec<(usize, usize)> {
    self
      .events
      .iter()
      .filter_map(|event| match *event {
        OsEvent::Unmap { addr, len } => Some((addr, len)),
        _ => None,
      })
      .collect()
  }

  /// Number of mappings not yet released.
  pub fn live_mappings(&self) -> usize {
    self.mappings.len()
  }
}

impl Default for SimulatedOs {
  fn default() -> Self {
    Self::new(Self::DEFAULT_CAPACITY)
  }
}

impl Os for SimulatedOs {
  fn extend_heap(
    &mut self,
    increment: usize,
  ) -> Result<NonNull<u8>, OsError> {
    let new_brk = self.brk.checked_add(increment).filter(|brk| *brk <= self.capacity);

    let Some(new_brk) = new_brk else {
      return Err(OsError::ExtendHeap {
        increment,
        source: io::Error::from_raw_os_error(libc::ENOMEM),
      });
    };

    let previous = unsafe { self.region.add(self.brk) };
    self.brk = new_brk;
    self.events.push(OsEvent::ExtendHeap { increment });

    Ok(previous)
  }

  fn map_anonymous(
    &mut self,
    len: usize,
  ) -> Result<NonNull<u8>, OsError> {
    let mapped = self
      .mapping_layout(len)
      .and_then(|layout| NonNull::new(unsafe { alloc::alloc_zeroed(layout) }));

    let Some(addr) = mapped else {
      return Err(OsError::Map {
        len,
        source: io::Error::from_raw_os_error(libc::ENOMEM),
      });
    };

    self.mappings.insert(addr.as_ptr() as usize, len);
    self.events.push(OsEvent::Map {
      addr: addr.as_ptr() as usize,
      len,
    });

    Ok(addr)
  }

  unsafe fn unmap(
    &mut self,
    addr: NonNull<u8>,
    len: usize,
  ) -> Result<(), OsError> {
    let key = addr.as_ptr() as usize;

    let layout = match self.mappings.get(&key) {
      Some(&mapped_len) if mapped_len == len => self.mapping_layout(len),
      _ => None,
    };

    let Some(layout) = layout else {
      return Err(OsError::Unmap {
        addr: key,
        len,
        source: io::Error::from_raw_os_error(libc::EINVAL),
      });
    };

    self.mappings.remove(&key);
    self.events.push(OsEvent::Unmap { addr: key, len });
    unsafe { alloc::dealloc(addr.as_ptr(), layout) };

    Ok(())
  }

  fn page_size(&self) -> Result<usize, OsError> {
    Ok(self.page_size)
  }
}

impl Drop for SimulatedOs {
  fn drop(&mut self) {
    for (&addr, &len) in &self.mappings {
      if let (Some(ptr), Some(layout)) = (NonNull::new(addr as *mut u8), self.mapping_layout(len)) {
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
      }
    }
    unsafe { alloc::dealloc(self.region.as_ptr(), Self::region_layout(self.capacity)) };
  }
}
