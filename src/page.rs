//! Page provider: obtains memory from the OS in whole pages.
//!
//! Every byte the allocator hands out originates here, as anonymous private
//! `mmap` regions. Chunks additionally need their base address on a chunk
//! boundary, which `mmap` cannot promise directly; [`alloc_pages_aligned`]
//! over-maps by the alignment and trims the slack:
//!
//! ```text
//!   mmap(len + align)
//!   ┌─────────┬──────────────────────────────┬───────────┐
//!   │  lead   │        surviving mapping     │   trail   │
//!   │ (unmap) │  starts on `align` boundary  │  (unmap)  │
//!   └─────────┴──────────────────────────────┴───────────┘
//! ```
//!
//! This module is Unix-only (Linux, macOS); the rest of the crate is
//! platform-independent against its tiny surface.

use std::ptr::{self, NonNull};

use libc::{MAP_ANON, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE, c_void};

use crate::align_to;
use crate::error::OutOfMemory;

/// Size of an OS page on the supported targets.
pub const PAGE_SIZE: usize = 4096;

/// Maps `len` bytes of zero-filled read/write memory.
///
/// `len` must be a positive multiple of [`PAGE_SIZE`].
pub fn alloc_pages(len: usize) -> Result<NonNull<u8>, OutOfMemory> {
  debug_assert!(len > 0 && len % PAGE_SIZE == 0);

  let raw = unsafe {
    libc::mmap(
      ptr::null_mut(),
      len,
      PROT_READ | PROT_WRITE,
      MAP_PRIVATE | MAP_ANON,
      -1,
      0,
    )
  };
  if raw == MAP_FAILED {
    return Err(OutOfMemory);
  }

  log::debug!("mapped {len} bytes at {raw:p}");
  NonNull::new(raw.cast::<u8>()).ok_or(OutOfMemory)
}

/// Maps `len` bytes whose base address is a multiple of `align`.
///
/// `align` must be a power of two no smaller than [`PAGE_SIZE`], and `len` a
/// positive multiple of [`PAGE_SIZE`].
pub fn alloc_pages_aligned(
  len: usize,
  align: usize,
) -> Result<NonNull<u8>, OutOfMemory> {
  debug_assert!(align.is_power_of_two() && align >= PAGE_SIZE);

  let total = len.checked_add(align).ok_or(OutOfMemory)?;
  let base = alloc_pages(total)?.as_ptr() as usize;
  let aligned = align_to!(base, align);

  let lead = aligned - base;
  if lead > 0 {
    unsafe { free_pages(base as *mut u8, lead) };
  }

  let trail = total - lead - len;
  if trail > 0 {
    unsafe { free_pages((aligned + len) as *mut u8, trail) };
  }

  // align_to! keeps the address nonzero, so this cannot fail.
  NonNull::new(aligned as *mut u8).ok_or(OutOfMemory)
}

/// Returns a mapping obtained from this module to the OS.
///
/// # Safety
///
/// `ptr..ptr + len` must be a currently mapped, page-aligned range returned
/// by [`alloc_pages`] or [`alloc_pages_aligned`] (or a page-aligned subrange
/// of one), and nothing may touch it afterwards.
pub unsafe fn free_pages(
  ptr: *mut u8,
  len: usize,
) {
  debug_assert!(ptr as usize % PAGE_SIZE == 0 && len % PAGE_SIZE == 0);

  let rc = unsafe { libc::munmap(ptr.cast::<c_void>(), len) };
  if rc != 0 {
    // Nothing to report to the caller from a release path.
    log::debug!("munmap of {len} bytes at {ptr:p} failed");
  } else {
    log::debug!("unmapped {len} bytes at {ptr:p}");
  }
}
