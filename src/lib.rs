//! # rmalloc - A Size-Class Memory Allocator Library
//!
//! This crate provides a general-purpose **size-class allocator** intended to
//! replace the default process allocator for workloads dominated by frequent
//! small-to-medium allocations that want predictable alignment and low
//! per-operation overhead.
//!
//! ## Overview
//!
//! ```text
//!   Request Routing:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                      allocate / callocate / reallocate               │
//!   │                                   │                                  │
//!   │                          size-class table                            │
//!   │                    ┌──────────────┴───────────────┐                  │
//!   │               size ≤ 2048                    size > 2048             │
//!   │                    │                              │                  │
//!   │         ┌──────────▼──────────┐      ┌────────────▼────────────┐     │
//!   │         │ per-class free list │      │ dedicated page mapping  │     │
//!   │         │ fed from 64 KiB     │      │ tracked by base address │     │
//!   │         │ chunks, LIFO, O(1)  │      │ in a pointer-keyed map  │     │
//!   │         └─────────────────────┘      └─────────────────────────┘     │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Deallocation routes by pointer alone: exact hit in the large map, or
//!   mask the pointer down to its owning chunk's header.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   rmalloc
//!   ├── arch       - Platform facts: cache line, SIMD width, fences, fast copy
//!   ├── align      - Alignment macros (align!, align_to!) and page rounding
//!   ├── page       - OS page provider (anonymous mmap)
//!   ├── size_class - Request size -> size class routing
//!   ├── block      - Free-list node written into free block storage (internal)
//!   ├── chunk      - 64 KiB regions carved into same-sized blocks
//!   ├── free_list  - Per-class LIFO free lists
//!   ├── large      - Pointer-keyed table of direct page mappings
//!   └── allocator  - Public surface and the GlobalAlloc binding
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! unsafe {
//!     // Allocate 100 bytes, aligned to at least 16.
//!     let ptr = rmalloc::allocate(100);
//!     assert!(!ptr.is_null());
//!
//!     // Use the memory.
//!     ptr.write(42);
//!     assert_eq!(ptr.read(), 42);
//!
//!     // Grow it, contents preserved.
//!     let ptr = rmalloc::reallocate(ptr, 1000);
//!     assert_eq!(ptr.read(), 42);
//!
//!     // Free it.
//!     rmalloc::deallocate(ptr);
//! }
//! ```
//!
//! Or install it as the process allocator:
//!
//! ```rust,ignore
//! use rmalloc::Rmalloc;
//!
//! #[global_allocator]
//! static GLOBAL: Rmalloc = Rmalloc;
//! ```
//!
//! ## Guarantees
//!
//! - Every non-null pointer is aligned to at least 16 bytes (`max_align_t`);
//!   blocks of 64 bytes and up start on a cache-line boundary.
//! - Zero-size, overflowing, and unsatisfiable requests return null; no
//!   error state exists besides the null return.
//! - All operations are safe to call concurrently on disjoint pointers.
//!
//! ## Limitations
//!
//! - **Unix-only**: pages come from `libc::mmap` (Linux, macOS).
//! - **No chunk retirement**: empty chunks keep feeding their size class
//!   instead of returning to the OS; the OS reclaims everything at exit.
//! - **Alignment ceiling**: the `GlobalAlloc` binding serves alignments up
//!   to one page and refuses anything larger.
//!
//! ## Safety
//!
//! Allocation is safe; `deallocate` and `reallocate` are unsafe because the
//! allocator cannot verify that a pointer is live and its own. Double-free,
//! use-after-free, and foreign pointers are undefined behavior, matching the
//! contract of every malloc-style interface.

pub mod align;
pub mod arch;

mod allocator;
mod block;
mod chunk;
mod error;
mod free_list;
mod large;
mod page;
mod size_class;
mod sync;

pub use align::round_up_to_page;
pub use allocator::{ALLOCATOR, Allocator, Rmalloc, allocate, callocate, deallocate, reallocate};
pub use page::PAGE_SIZE;
pub use size_class::{MAX_ALIGN, MAX_SMALL, SIZE_CLASSES};
