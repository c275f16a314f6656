//! Error types.

use core::{error, fmt};

/// The operating system refused to provide more pages.
///
/// Internal operations propagate this with `?`; the public surface converts
/// it into a null pointer, which is the allocator's only failure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfMemory;

impl fmt::Display for OutOfMemory {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.write_str("out of memory")
  }
}

impl error::Error for OutOfMemory {}
