use std::alloc::{GlobalAlloc, Layout};

use rmalloc::Rmalloc;

#[global_allocator]
static GLOBAL: Rmalloc = Rmalloc;

/// Prints a labeled pointer together with its low alignment bits.
fn report(
  label: &str,
  ptr: *const u8,
) {
  println!(
    "[{}] address = {:p}, address % 16 = {}, address % 64 = {}",
    label,
    ptr,
    ptr as usize % 16,
    ptr as usize % 64,
  );
}

fn main() {
  // ------------------------------------------------------------------
  // 1) Everything below this line already runs on rmalloc: the
  //    #[global_allocator] attribute routed Vec, String, and Box here.
  // ------------------------------------------------------------------
  let mut numbers: Vec<u64> = (0..1024).collect();
  numbers.rotate_left(10);
  report("Vec<u64> backing", numbers.as_ptr().cast());

  let sentence = String::from("every byte of this string came from rmalloc");
  report("String backing", sentence.as_ptr());
  println!("[String] {sentence}");

  let boxed = Box::new([0u8; 4000]);
  report("Box<[u8; 4000]>", boxed.as_ptr());

  // ------------------------------------------------------------------
  // 2) The raw surface is available alongside the installed shim.
  // ------------------------------------------------------------------
  let raw = rmalloc::allocate(100);
  assert!(!raw.is_null());
  report("allocate(100)", raw);

  unsafe {
    raw.write(0xDE);
    raw.add(99).write(0xAD);

    let grown = rmalloc::reallocate(raw, 5000);
    assert!(!grown.is_null());
    report("reallocate -> 5000", grown);
    println!(
      "[reallocate] first/last bytes survived the move: {:#X} {:#X}",
      grown.read(),
      grown.add(99).read(),
    );

    rmalloc::deallocate(grown);
  }

  // ------------------------------------------------------------------
  // 3) callocate hands out zeroed arrays with the usual overflow guards.
  // ------------------------------------------------------------------
  let zeroed = rmalloc::callocate(16, size_of::<u32>());
  assert!(!zeroed.is_null());
  let all_zero = (0..64).all(|i| unsafe { zeroed.add(i).read() } == 0);
  println!("[callocate] 64 bytes all zero: {all_zero}");
  unsafe { rmalloc::deallocate(zeroed) };

  assert!(rmalloc::callocate(usize::MAX, 2).is_null());
  println!("[callocate] overflowing request refused with null");

  // ------------------------------------------------------------------
  // 4) The shim also honors over-aligned layouts, up to one page.
  // ------------------------------------------------------------------
  let layout = Layout::from_size_align(256, 1024).unwrap();
  let aligned = unsafe { GLOBAL.alloc(layout) };
  assert!(!aligned.is_null());
  println!(
    "[aligned alloc] address = {:p}, address % 1024 = {}",
    aligned,
    aligned as usize % 1024,
  );
  unsafe { GLOBAL.dealloc(aligned, layout) };

  println!("\nDone. The OS reclaims all chunks when the process exits.");
}
