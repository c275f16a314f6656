//! # Free-List Manager
//!
//! One LIFO list of free blocks per size class:
//!
//! ```text
//!   FreeList
//!   ┌────────┐     ┌──────────┐     ┌──────────┐
//!   │ head ──┼────►│ FreeBlock│────►│ FreeBlock│────► null
//!   └────────┘     │ (next)   │     │ (next)   │
//!                  └──────────┘     └──────────┘
//!                   block storage doubles as the link node
//! ```
//!
//! `pop` and `push` are a single pointer swap. An empty list carves a fresh
//! chunk, links every block except the first, and hands the first straight
//! to the caller, keeping `pop` O(1) amortised. Blocks are never zeroed on
//! either operation; `callocate` clears what it returns.

use std::ptr::{self, NonNull};

use crate::block::FreeBlock;
use crate::chunk::ChunkHeader;
use crate::error::OutOfMemory;

pub struct FreeList {
  head: *mut FreeBlock,
}

// The raw head only ever points into chunks owned by the allocator; moving
// the list between threads moves that ownership with it.
unsafe impl Send for FreeList {}

impl FreeList {
  pub const fn new() -> Self {
    Self {
      head: ptr::null_mut(),
    }
  }

  /// Unlinks and returns the most recently pushed block, refilling from a
  /// fresh chunk when the list is empty.
  pub fn pop(
    &mut self,
    class_index: usize,
  ) -> Result<NonNull<u8>, OutOfMemory> {
    if self.head.is_null() {
      return self.refill(class_index);
    }

    let block = self.head;
    // Blocks on the list always carry a node written by `push` or `refill`.
    self.head = unsafe { (*block).next };
    Ok(unsafe { NonNull::new_unchecked(block.cast::<u8>()) })
  }

  /// Links a block at the head of the list.
  pub fn push(
    &mut self,
    block: *mut u8,
  ) {
    let node = block.cast::<FreeBlock>();
    unsafe { node.write(FreeBlock::new(self.head)) };
    self.head = node;
  }

  /// Carves a new chunk for the class: every block except the first goes on
  /// the list, the first is returned directly.
  fn refill(
    &mut self,
    class_index: usize,
  ) -> Result<NonNull<u8>, OutOfMemory> {
    let chunk = ChunkHeader::allocate(class_index)?;
    let header = unsafe { chunk.as_ref() };

    log::debug!(
      "class {class_index} refilled with {} blocks",
      header.block_count()
    );

    // Linked in reverse so the list pops in ascending address order.
    for index in (1..header.block_count()).rev() {
      self.push(header.block_at(index));
    }

    Ok(unsafe { NonNull::new_unchecked(header.block_at(0)) })
  }
}
