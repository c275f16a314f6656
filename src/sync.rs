//! Spin lock guarding allocator state.
//!
//! Critical sections in the allocator are a handful of pointer writes, so a
//! test-and-set spin lock with a [`cpu_pause`] backoff beats a full OS mutex:
//! it never allocates, never calls into the OS, and is `const`-constructible,
//! which lets the global allocator live in a plain `static`.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::arch::cpu_pause;

pub struct SpinLock<T> {
  locked: AtomicBool,
  inner: UnsafeCell<T>,
}

impl<T> SpinLock<T> {
  pub const fn new(value: T) -> Self {
    Self {
      locked: AtomicBool::new(false),
      inner: UnsafeCell::new(value),
    }
  }

  /// Spins until the lock is held, then returns a guard releasing it on drop.
  pub fn lock(&self) -> SpinLockGuard<'_, T> {
    loop {
      if self
        .locked
        .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
        .is_ok()
      {
        return SpinLockGuard { lock: self };
      }
      while self.locked.load(Ordering::Relaxed) {
        cpu_pause();
      }
    }
  }
}

unsafe impl<T: Send> Sync for SpinLock<T> {}
unsafe impl<T: Send> Send for SpinLock<T> {}

pub struct SpinLockGuard<'a, T> {
  lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
  type Target = T;

  fn deref(&self) -> &Self::Target {
    // Holding the guard means holding the lock.
    unsafe { &*self.lock.inner.get() }
  }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
  fn deref_mut(&mut self) -> &mut Self::Target {
    unsafe { &mut *self.lock.inner.get() }
  }
}

impl<T> Drop for SpinLockGuard<'_, T> {
  fn drop(&mut self) {
    self.lock.locked.store(false, Ordering::Release);
  }
}
