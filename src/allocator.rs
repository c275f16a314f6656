//! # Allocator Core
//!
//! The allocator routes every request through the size-class table and down
//! one of exactly two paths:
//!
//! ```text
//!                          allocate(size)
//!                               │
//!                     ┌─────────┴──────────┐
//!              size ≤ 2048            size > 2048
//!                     │                    │
//!                     ▼                    ▼
//!          ┌────────────────────┐   ┌──────────────────┐
//!          │ per-class          │   │ page mapping of  │
//!          │ SpinLock<FreeList> │   │ round_up(size)   │
//!          │ pop / refill       │   │ tracked in       │
//!          └────────────────────┘   │ SpinLock<LargeMap>│
//!                     │             └──────────────────┘
//!                     ▼                    │
//!          block inside a 64 KiB           ▼
//!          chunk, ≥ 16-byte aligned   page-aligned base
//! ```
//!
//! Deallocation reverses the routing by pointer alone: an exact hit in the
//! large map unmaps pages, anything else masks down to its chunk header and
//! returns to that class's free list.
//!
//! ## Block State Machine
//!
//! ```text
//!           carve                pop               deallocate
//!   unborn ───────► free ◄──────────────► in-use ──────┐
//!                    ▲                                  │
//!                    └──────────────────────────────────┘
//! ```
//!
//! Double-free, foreign pointers, and use-after-free are undefined and not
//! detected (debug builds assert the chunk magic, nothing more).
//!
//! ## Concurrency
//!
//! Every size class has its own spin lock, as does the large map, so threads
//! working different classes never contend. Same-pointer races are the
//! caller's contract violation; disjoint pointers are always safe.

use std::alloc::{GlobalAlloc, Layout};
use std::cmp;
use std::ptr;

use crate::align::round_up_to_page;
use crate::arch::{CACHE_LINE_SIZE, fast_copy, load_fence, unlikely};
use crate::chunk::ChunkHeader;
use crate::free_list::FreeList;
use crate::large::LargeMap;
use crate::page::{PAGE_SIZE, alloc_pages, free_pages};
use crate::size_class::{MAX_ALIGN, MAX_SMALL, NUM_CLASSES, Placement, placement_for};
use crate::sync::SpinLock;

/// The process-wide allocator instance behind the free functions and the
/// [`Rmalloc`] shim. Const-initialized, so first use needs no setup.
pub static ALLOCATOR: Allocator = Allocator::new();

/// A size-class allocator over OS pages.
///
/// Usually used through the crate-level [`allocate`]/[`deallocate`]/
/// [`reallocate`]/[`callocate`] functions or the [`Rmalloc`] global-allocator
/// shim, but independent instances are valid (each owns its chunks and large
/// mappings; pointers must go back to the instance that produced them).
pub struct Allocator {
  classes: [SpinLock<FreeList>; NUM_CLASSES],
  large: SpinLock<LargeMap>,
}

impl Allocator {
  pub const fn new() -> Self {
    Self {
      classes: [const { SpinLock::new(FreeList::new()) }; NUM_CLASSES],
      large: SpinLock::new(LargeMap::new()),
    }
  }

  /// Returns a block of at least `size` bytes aligned to at least
  /// [`MAX_ALIGN`], or null on a zero-size request, overflow, or OS refusal.
  /// The block's content is unspecified.
  pub fn allocate(
    &self,
    size: usize,
  ) -> *mut u8 {
    if unlikely(size == 0) {
      return ptr::null_mut();
    }

    match placement_for(size) {
      Placement::Class { index, .. } => self.classes[index]
        .lock()
        .pop(index)
        .map_or(ptr::null_mut(), |block| block.as_ptr()),
      Placement::Large => self.allocate_large(size),
    }
  }

  /// Returns a previously allocated block. Null is a no-op.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a pointer produced by this instance and not yet
  /// freed; it must not be used afterwards.
  pub unsafe fn deallocate(
    &self,
    ptr: *mut u8,
  ) {
    if ptr.is_null() {
      return;
    }

    let addr = ptr as usize;
    if let Some(size) = self.large.lock().remove(addr) {
      if let Some(len) = round_up_to_page(size) {
        unsafe { free_pages(ptr, len) };
      }
      return;
    }

    // Observe the header of a chunk another thread may have just carved.
    load_fence();
    let header = unsafe { ChunkHeader::of(ptr) };
    debug_assert!(
      unsafe { (*header).is_valid() },
      "pointer was not produced by this allocator"
    );
    let index = unsafe { (*header).class_index() };
    self.classes[index].lock().push(ptr);
  }

  /// Resizes a block, preserving `min(old usable size, new_size)` bytes.
  ///
  /// Null with a positive size allocates; a null result for a non-null input
  /// with `new_size > 0` means the allocation failed and the original block
  /// is still valid and unchanged. `new_size == 0` frees and returns null.
  /// When old and new sizes share a size class (or a large footprint) the
  /// input pointer itself may be returned.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a pointer produced by this instance and not yet
  /// freed. On a non-null return the input pointer is invalid (unless it was
  /// returned again).
  pub unsafe fn reallocate(
    &self,
    ptr: *mut u8,
    new_size: usize,
  ) -> *mut u8 {
    if ptr.is_null() {
      return if new_size == 0 {
        ptr::null_mut()
      } else {
        self.allocate(new_size)
      };
    }
    if new_size == 0 {
      unsafe { self.deallocate(ptr) };
      return ptr::null_mut();
    }

    let addr = ptr as usize;
    let old_usable = match self.large.lock().lookup(addr) {
      Some(old_size) => {
        let old_len = round_up_to_page(old_size).unwrap_or(old_size);
        if new_size > MAX_SMALL && round_up_to_page(new_size) == Some(old_len) {
          // Same footprint: keep the mapping, remember the new size.
          self.large.lock().update(addr, new_size);
          return ptr;
        }
        old_len
      }
      None => {
        load_fence();
        let header = unsafe { ChunkHeader::of(ptr) };
        debug_assert!(
          unsafe { (*header).is_valid() },
          "pointer was not produced by this allocator"
        );
        let old_index = unsafe { (*header).class_index() };
        if let Placement::Class { index, .. } = placement_for(new_size) {
          if index == old_index {
            // The block is already big enough.
            return ptr;
          }
        }
        unsafe { (*header).block_size() }
      }
    };

    let fresh = self.allocate(new_size);
    if fresh.is_null() {
      // The original block is untouched and stays valid.
      return ptr::null_mut();
    }

    unsafe {
      fast_copy(fresh, ptr, cmp::min(old_usable, new_size));
      self.deallocate(ptr);
    }
    fresh
  }

  /// Allocates `count * elem_size` zeroed bytes; null if either factor is
  /// zero, the product overflows, or the allocation fails.
  pub fn callocate(
    &self,
    count: usize,
    elem_size: usize,
  ) -> *mut u8 {
    if count == 0 || elem_size == 0 {
      return ptr::null_mut();
    }
    let Some(total) = count.checked_mul(elem_size) else {
      return ptr::null_mut();
    };

    let ptr = self.allocate(total);
    if !ptr.is_null() && total <= MAX_SMALL {
      // Large blocks are fresh anonymous mappings and arrive zeroed;
      // recycled class blocks must be cleared.
      unsafe { ptr::write_bytes(ptr, 0, total) };
    }
    ptr
  }

  fn allocate_large(
    &self,
    size: usize,
  ) -> *mut u8 {
    let Some(len) = round_up_to_page(size) else {
      return ptr::null_mut();
    };
    let Ok(base) = alloc_pages(len) else {
      return ptr::null_mut();
    };

    if self.large.lock().insert(base.as_ptr() as usize, size).is_err() {
      unsafe { free_pages(base.as_ptr(), len) };
      return ptr::null_mut();
    }
    base.as_ptr()
  }

  /// Allocation honoring an alignment above [`MAX_ALIGN`]; the binding shim's
  /// entry point.
  ///
  /// Up to a cache line the request is widened so class granularity provides
  /// the alignment; up to a page it is served page-aligned from the large
  /// path; beyond a page it fails.
  fn allocate_aligned(
    &self,
    size: usize,
    align: usize,
  ) -> *mut u8 {
    if size == 0 {
      return ptr::null_mut();
    }

    if align <= MAX_ALIGN {
      self.allocate(size)
    } else if align <= CACHE_LINE_SIZE {
      self.allocate(size.max(align))
    } else if align <= PAGE_SIZE {
      self.allocate_large(size)
    } else {
      ptr::null_mut()
    }
  }

  /// Bytes actually owned by a live block.
  fn usable_size(
    &self,
    ptr: *mut u8,
  ) -> usize {
    let addr = ptr as usize;
    if let Some(size) = self.large.lock().lookup(addr) {
      return round_up_to_page(size).unwrap_or(size);
    }

    load_fence();
    unsafe { (*ChunkHeader::of(ptr)).block_size() }
  }
}

impl Default for Allocator {
  fn default() -> Self {
    Self::new()
  }
}

/// Allocates `size` bytes from the process-wide allocator.
///
/// Returns null when `size` is zero, when page-rounding `size` would
/// overflow, or when the OS refuses memory. Any non-null result is aligned
/// to at least 16 bytes and holds at least `size` writable bytes.
pub fn allocate(size: usize) -> *mut u8 {
  ALLOCATOR.allocate(size)
}

/// Frees a block returned by [`allocate`], [`callocate`], or
/// [`reallocate`]. Null is a no-op.
///
/// # Safety
///
/// `ptr` must be null or a still-live pointer from this crate's process-wide
/// allocator, and must not be used after the call.
pub unsafe fn deallocate(ptr: *mut u8) {
  unsafe { ALLOCATOR.deallocate(ptr) };
}

/// Resizes a block from the process-wide allocator; see
/// [`Allocator::reallocate`] for the full contract.
///
/// # Safety
///
/// `ptr` must be null or a still-live pointer from this crate's process-wide
/// allocator. On a non-null return the old pointer is invalid (unless it was
/// returned again); on a null return with `new_size > 0` it remains valid.
pub unsafe fn reallocate(
  ptr: *mut u8,
  new_size: usize,
) -> *mut u8 {
  unsafe { ALLOCATOR.reallocate(ptr, new_size) }
}

/// Allocates a zeroed array of `count` elements of `elem_size` bytes from
/// the process-wide allocator; null on zero factors, overflow, or failure.
pub fn callocate(
  count: usize,
  elem_size: usize,
) -> *mut u8 {
  ALLOCATOR.callocate(count, elem_size)
}

/// Binding shim routing Rust's global allocation interface into the
/// process-wide [`ALLOCATOR`].
///
/// ```rust,ignore
/// use rmalloc::Rmalloc;
///
/// #[global_allocator]
/// static GLOBAL: Rmalloc = Rmalloc;
/// ```
///
/// With the shim installed, a `log` logger must not allocate (the crate only
/// logs when mapping or unmapping pages, but a logger that allocates there
/// re-enters the allocator).
pub struct Rmalloc;

unsafe impl GlobalAlloc for Rmalloc {
  unsafe fn alloc(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    ALLOCATOR.allocate_aligned(layout.size(), layout.align())
  }

  unsafe fn dealloc(
    &self,
    ptr: *mut u8,
    _layout: Layout,
  ) {
    unsafe { ALLOCATOR.deallocate(ptr) };
  }

  unsafe fn alloc_zeroed(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    let ptr = unsafe { self.alloc(layout) };
    if !ptr.is_null() && layout.size() <= MAX_SMALL {
      unsafe { ptr::write_bytes(ptr, 0, layout.size()) };
    }
    ptr
  }

  unsafe fn realloc(
    &self,
    ptr: *mut u8,
    layout: Layout,
    new_size: usize,
  ) -> *mut u8 {
    if layout.align() <= MAX_ALIGN {
      return unsafe { ALLOCATOR.reallocate(ptr, new_size) };
    }

    // Over-aligned blocks must stay over-aligned, so move manually instead
    // of letting `reallocate` pick a class by size alone.
    let fresh = ALLOCATOR.allocate_aligned(new_size, layout.align());
    if fresh.is_null() {
      return ptr::null_mut();
    }

    let old_usable = ALLOCATOR.usable_size(ptr);
    unsafe {
      fast_copy(fresh, ptr, cmp::min(old_usable, new_size));
      ALLOCATOR.deallocate(ptr);
    }
    fresh
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// Helper: check that a pointer is aligned to `align` bytes.
  fn is_aligned(
    ptr: *mut u8,
    align: usize,
  ) -> bool {
    (ptr as usize) % align == 0
  }

  #[test]
  fn basic_allocation_is_aligned_and_freeable() {
    let ptr = allocate(100);
    assert!(!ptr.is_null());
    assert!(is_aligned(ptr, MAX_ALIGN));

    unsafe { deallocate(ptr) };
  }

  #[test]
  fn callocate_returns_zeroed_elements() {
    let ptr = callocate(5, size_of::<u32>());
    assert!(!ptr.is_null());

    let ints = ptr.cast::<u32>();
    for i in 0..5 {
      assert_eq!(unsafe { ints.add(i).read() }, 0);
    }

    unsafe { deallocate(ptr) };
  }

  #[test]
  fn reallocate_preserves_existing_bytes() {
    let ptr = allocate(8);
    assert!(!ptr.is_null());

    for i in 0..5u8 {
      unsafe { ptr.add(i as usize).write(i) };
    }

    let grown = unsafe { reallocate(ptr, 64) };
    assert!(!grown.is_null());
    for i in 0..5u8 {
      assert_eq!(unsafe { grown.add(i as usize).read() }, i);
    }

    unsafe { deallocate(grown) };
  }

  #[test]
  fn cache_line_request_is_cache_line_aligned() {
    let ptr = allocate(64);
    assert!(!ptr.is_null());
    assert!(is_aligned(ptr, 64));

    unsafe { deallocate(ptr) };
  }

  #[test]
  fn ascending_sizes_give_distinct_blocks_freed_in_reverse() {
    let mut blocks = Vec::new();
    for size in 1..=10 {
      let ptr = allocate(size);
      assert!(!ptr.is_null());
      blocks.push(ptr);
    }

    let mut unique = blocks.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), blocks.len());

    for ptr in blocks.into_iter().rev() {
      unsafe { deallocate(ptr) };
    }
  }

  #[test]
  fn reallocate_to_zero_frees_the_block() {
    let alloc = Allocator::new();

    let ptr = alloc.allocate(4096);
    assert!(!ptr.is_null());

    let result = unsafe { alloc.reallocate(ptr, 0) };
    assert!(result.is_null());
    // The large record is gone, so the block is no longer live.
    assert_eq!(alloc.large.lock().lookup(ptr as usize), None);
  }

  #[test]
  fn zero_and_overflowing_requests_return_null() {
    assert!(allocate(0).is_null());
    assert!(allocate(usize::MAX).is_null());
    assert!(allocate(usize::MAX - 1).is_null());

    assert!(callocate(0, 16).is_null());
    assert!(callocate(16, 0).is_null());
    assert!(callocate(usize::MAX, 2).is_null());

    assert!(unsafe { reallocate(ptr::null_mut(), 0) }.is_null());
  }

  #[test]
  fn failed_reallocate_leaves_the_block_valid() {
    let ptr = allocate(100);
    assert!(!ptr.is_null());

    for i in 0..100u8 {
      unsafe { ptr.add(i as usize).write(i ^ 0x5A) };
    }

    // An overflowing size makes the fresh allocation fail deterministically.
    let result = unsafe { reallocate(ptr, usize::MAX) };
    assert!(result.is_null());

    // The original block must still be live and untouched.
    for i in 0..100u8 {
      assert_eq!(unsafe { ptr.add(i as usize).read() }, i ^ 0x5A);
    }

    unsafe { deallocate(ptr) };
  }

  #[test]
  fn deallocate_null_is_a_noop() {
    unsafe { deallocate(ptr::null_mut()) };
  }

  #[test]
  fn reallocate_null_behaves_as_allocate() {
    let ptr = unsafe { reallocate(ptr::null_mut(), 100) };
    assert!(!ptr.is_null());
    assert!(is_aligned(ptr, MAX_ALIGN));

    unsafe { deallocate(ptr) };
  }

  #[test]
  fn every_size_meets_the_alignment_contract() {
    let sizes = [
      1,
      2,
      15,
      16,
      17,
      31,
      32,
      33,
      63,
      64,
      65,
      100,
      128,
      512,
      1024,
      2047,
      2048,
      2049,
      4096,
      1 << 20,
    ];

    for size in sizes {
      let ptr = allocate(size);
      assert!(!ptr.is_null(), "allocation failed for size {size}");
      assert!(
        is_aligned(ptr, MAX_ALIGN),
        "allocation must be {MAX_ALIGN}-byte aligned, got {ptr:p} for size {size}"
      );
      unsafe { deallocate(ptr) };
    }
  }

  #[test]
  fn large_block_allocation_and_integrity() {
    let count = 4096usize;
    let ptr = allocate(count * size_of::<u32>()).cast::<u32>();
    assert!(!ptr.is_null());

    unsafe {
      for i in 0..count {
        ptr.add(i).write((i as u32) ^ 0xA5A5_A5A5);
      }

      for i in 0..count {
        assert_eq!(ptr.add(i).read(), (i as u32) ^ 0xA5A5_A5A5);
      }

      deallocate(ptr.cast::<u8>());
    }
  }

  #[test]
  fn freed_blocks_are_reused_lifo() {
    let alloc = Allocator::new();

    let first = alloc.allocate(64);
    let second = alloc.allocate(64);
    assert_ne!(first, second);

    unsafe {
      alloc.deallocate(first);
      alloc.deallocate(second);
    }

    assert_eq!(alloc.allocate(64), second);
    assert_eq!(alloc.allocate(64), first);
  }

  #[test]
  fn reallocate_within_a_class_keeps_the_pointer() {
    let alloc = Allocator::new();

    let ptr = alloc.allocate(40);
    assert!(!ptr.is_null());

    // 40 and 50 both round to the 64-byte class.
    let same = unsafe { alloc.reallocate(ptr, 50) };
    assert_eq!(same, ptr);

    unsafe { alloc.deallocate(same) };
  }

  #[test]
  fn reallocate_within_a_large_footprint_keeps_the_pointer() {
    let alloc = Allocator::new();

    let ptr = alloc.allocate(5000);
    assert!(!ptr.is_null());

    // 5000 and 6000 both round to two pages.
    let same = unsafe { alloc.reallocate(ptr, 6000) };
    assert_eq!(same, ptr);
    assert_eq!(alloc.large.lock().lookup(ptr as usize), Some(6000));

    unsafe { alloc.deallocate(same) };
  }

  #[test]
  fn reallocate_shrinks_from_large_to_class() {
    let ptr = allocate(3000);
    assert!(!ptr.is_null());

    for i in 0..100u8 {
      unsafe { ptr.add(i as usize).write(i) };
    }

    let shrunk = unsafe { reallocate(ptr, 100) };
    assert!(!shrunk.is_null());
    assert!(is_aligned(shrunk, MAX_ALIGN));
    for i in 0..100u8 {
      assert_eq!(unsafe { shrunk.add(i as usize).read() }, i);
    }

    unsafe { deallocate(shrunk) };
  }

  #[test]
  fn gigabyte_allocation_succeeds() {
    let size = 1usize << 30;
    let ptr = allocate(size);
    assert!(!ptr.is_null());

    unsafe {
      ptr.write(0xAB);
      ptr.add(size - 1).write(0xCD);
      assert_eq!(ptr.read(), 0xAB);
      assert_eq!(ptr.add(size - 1).read(), 0xCD);

      deallocate(ptr);
    }
  }

  #[test]
  fn callocate_zeroes_the_large_path_too() {
    let total = 1024 * size_of::<u64>();
    assert!(total > MAX_SMALL);

    let ptr = callocate(1024, size_of::<u64>());
    assert!(!ptr.is_null());

    unsafe {
      for i in 0..total {
        assert_eq!(ptr.add(i).read(), 0);
      }
      deallocate(ptr);
    }
  }

  #[test]
  fn live_blocks_of_one_class_are_distinct() {
    let mut blocks: Vec<*mut u8> = (0..100).map(|_| allocate(32)).collect();
    assert!(blocks.iter().all(|ptr| !ptr.is_null()));

    let mut unique = blocks.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), blocks.len());

    for ptr in blocks.drain(..) {
      unsafe { deallocate(ptr) };
    }
  }

  #[test]
  fn disjoint_pointers_are_safe_across_threads() {
    let alloc = Allocator::new();

    std::thread::scope(|scope| {
      for tag in 0u8..4 {
        let alloc = &alloc;
        scope.spawn(move || {
          let sizes = [1, 16, 33, 64, 200, 1024, 2048, 3000, 8192];
          for round in 0..50 {
            let mut held = Vec::new();
            for &size in &sizes {
              let ptr = alloc.allocate(size);
              assert!(!ptr.is_null());
              unsafe {
                ptr::write_bytes(ptr, tag ^ (round as u8), size);
              }
              held.push((ptr, size));
            }
            for &(ptr, size) in &held {
              for i in [0, size / 2, size - 1] {
                assert_eq!(unsafe { ptr.add(i).read() }, tag ^ (round as u8));
              }
            }
            for (ptr, _) in held {
              unsafe { alloc.deallocate(ptr) };
            }
          }
        });
      }
    });
  }

  #[test]
  fn allocations_hand_off_between_threads() {
    struct SendPtr(*mut u8);
    unsafe impl Send for SendPtr {}

    let alloc = Allocator::new();
    let (sender, receiver) = std::sync::mpsc::channel::<SendPtr>();

    std::thread::scope(|scope| {
      let alloc_ref = &alloc;
      scope.spawn(move || {
        for i in 0..100u8 {
          let ptr = alloc_ref.allocate(128);
          assert!(!ptr.is_null());
          unsafe { ptr::write_bytes(ptr, i, 128) };
          sender.send(SendPtr(ptr)).unwrap();
        }
      });

      let alloc_ref = &alloc;
      scope.spawn(move || {
        for i in 0..100u8 {
          let SendPtr(ptr) = receiver.recv().unwrap();
          assert_eq!(unsafe { ptr.read() }, i);
          assert_eq!(unsafe { ptr.add(127).read() }, i);
          unsafe { alloc_ref.deallocate(ptr) };
        }
      });
    });
  }

  #[test]
  fn shim_honors_layout_alignment() {
    let shim = Rmalloc;

    let layout = Layout::from_size_align(100, 32).unwrap();
    let ptr = unsafe { shim.alloc(layout) };
    assert!(!ptr.is_null());
    assert!(is_aligned(ptr, 32));

    unsafe {
      ptr::write_bytes(ptr, 0x3C, 100);

      let grown = shim.realloc(ptr, layout, 200);
      assert!(!grown.is_null());
      assert!(is_aligned(grown, 32));
      for i in 0..100 {
        assert_eq!(grown.add(i).read(), 0x3C);
      }

      shim.dealloc(grown, Layout::from_size_align(200, 32).unwrap());
    }
  }

  #[test]
  fn shim_serves_page_level_alignment_from_the_large_path() {
    let shim = Rmalloc;

    let layout = Layout::from_size_align(512, 1024).unwrap();
    let ptr = unsafe { shim.alloc(layout) };
    assert!(!ptr.is_null());
    assert!(is_aligned(ptr, 1024));
    unsafe { shim.dealloc(ptr, layout) };

    let huge_align = Layout::from_size_align(512, 2 * PAGE_SIZE).unwrap();
    assert!(unsafe { shim.alloc(huge_align) }.is_null());
  }

  #[test]
  fn shim_zeroes_class_blocks() {
    let shim = Rmalloc;
    let layout = Layout::from_size_align(256, 16).unwrap();

    // Dirty a block, free it, and ask for zeroed memory of the same class.
    let dirty = unsafe { shim.alloc(layout) };
    assert!(!dirty.is_null());
    unsafe {
      ptr::write_bytes(dirty, 0xFF, 256);
      shim.dealloc(dirty, layout);
    }

    let ptr = unsafe { shim.alloc_zeroed(layout) };
    assert!(!ptr.is_null());
    unsafe {
      for i in 0..256 {
        assert_eq!(ptr.add(i).read(), 0);
      }
      shim.dealloc(ptr, layout);
    }
  }
}
