//! # Size-Class Table
//!
//! Maps a requested byte count onto the fixed set of block sizes the free
//! lists serve, or flags it for the direct-from-OS path:
//!
//! ```text
//!   request size      1..=32   33..=64  65..=128  ...  1025..=2048   2049..
//!                       │         │        │                │           │
//!                       ▼         ▼        ▼                ▼           ▼
//!   block size          32        64       128     ...     2048      Large
//!   class index          0         1        2      ...       6      (no list)
//! ```
//!
//! Block sizes double from [`MIN_CLASS`] to [`MAX_SMALL`], so the table is
//! pure bit arithmetic: no lookup memory, monotonic by construction, and a
//! request that lands exactly on a class boundary stays in that class.

/// Alignment every returned pointer honors (`max_align_t` on the supported
/// architectures).
pub const MAX_ALIGN: usize = 16;

/// Smallest served block size, twice [`MAX_ALIGN`] so every block can hold a
/// free-list node and still start on a `MAX_ALIGN` boundary.
pub const MIN_CLASS: usize = 2 * MAX_ALIGN;

/// Largest free-list-served request; anything above goes straight to the OS.
pub const MAX_SMALL: usize = 2048;

/// Number of distinct size classes.
pub const NUM_CLASSES: usize = {
  let num = (MAX_SMALL / MIN_CLASS).ilog2() as usize + 1;
  assert!(MIN_CLASS << (num - 1) == MAX_SMALL);
  num
};

/// Block size of every class, ascending.
pub const SIZE_CLASSES: [usize; NUM_CLASSES] = {
  let mut table = [0; NUM_CLASSES];
  let mut index = 0;
  while index < NUM_CLASSES {
    table[index] = MIN_CLASS << index;
    index += 1;
  }
  table
};

/// Where a request is served from.
///
/// The two variants are the allocator's only dispatch: a class request pops a
/// free list, a large request maps pages. No further routing happens past
/// this point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
  /// Served from the free list of `SIZE_CLASSES[index]`-byte blocks.
  Class { index: usize, block_size: usize },
  /// Served directly from the page provider and tracked by address.
  Large,
}

/// Routes a positive request size.
#[inline]
pub fn placement_for(size: usize) -> Placement {
  debug_assert!(size > 0);

  if size > MAX_SMALL {
    return Placement::Large;
  }

  let block_size = size.next_power_of_two().max(MIN_CLASS);
  Placement::Class {
    index: (block_size / MIN_CLASS).ilog2() as usize,
    block_size,
  }
}
