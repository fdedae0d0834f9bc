use std::{io::Read, ptr};

use osmem::{HEADER_SIZE, Heap, SimulatedOs, align};

/// Waits for ENTER when the demo runs with `--step`, so the state can be
/// inspected between stages.
fn pause(step: bool) {
  if step {
    println!("\n>>> Press ENTER to continue...");
    let _ = std::io::stdin().bytes().next();
  }
}

fn print_heap(
  heap: &Heap<SimulatedOs>,
  label: &str,
) {
  println!(
    "[{}] break moved by {} bytes, {} mapped block(s)",
    label,
    heap.os().break_offset(),
    heap.mapped_count(),
  );
  for block in heap.blocks() {
    println!("    {:?}  {:>6} bytes  {:?}", block.payload, block.size, block.status);
  }
}

fn main() {
  let step = std::env::args().any(|arg| arg == "--step");

  // The simulated OS keeps the demo away from the real program break, which
  // the process's own allocator also uses.
  let mut heap = Heap::new(SimulatedOs::default());

  print_heap(&heap, "start");
  pause(step);

  // --------------------------------------------------------------------
  // 1) First request: one 128 KiB slab is reserved, the block is carved
  //    from its start.
  // --------------------------------------------------------------------
  let a = heap.allocate(100).unwrap();
  let b = heap.allocate(200).unwrap();
  println!("\n[1] allocate(100) = {:?}, allocate(200) = {:?}", a, b);
  println!("[1] 100 rounds to {}, every header is {} bytes", align!(100), HEADER_SIZE);
  print_heap(&heap, "1");
  pause(step);

  // --------------------------------------------------------------------
  // 2) Release `a` and ask for less: best fit hands the same block back
  //    and splits off the rest.
  // --------------------------------------------------------------------
  heap.release(a.as_ptr());
  let c = heap.allocate(50).unwrap();
  println!("\n[2] release(a); allocate(50) = {:?}, reused: {}", c, c == a);
  print_heap(&heap, "2");
  pause(step);

  // --------------------------------------------------------------------
  // 3) Grow the top block in place, then shrink it back.
  // --------------------------------------------------------------------
  let top = heap.allocate(16).unwrap();
  unsafe { ptr::write_bytes(top.as_ptr(), 0xAB, 16) };
  let grown = heap.resize(top.as_ptr(), 4000).unwrap();
  println!("\n[3] resize(top, 4000) = {:?}, same pointer: {}", grown, grown == top);
  let shrunk = heap.resize(grown.as_ptr(), 16).unwrap();
  println!("[3] resize(top, 16) = {:?}, first byte still {:#X}", shrunk, unsafe {
    shrunk.as_ptr().read()
  });
  print_heap(&heap, "3");
  pause(step);

  // --------------------------------------------------------------------
  // 4) Release everything below the top: neighbours coalesce.
  // --------------------------------------------------------------------
  heap.release(b.as_ptr());
  heap.release(c.as_ptr());
  println!("\n[4] released b and c");
  print_heap(&heap, "4");
  pause(step);

  // --------------------------------------------------------------------
  // 5) Large and zeroed requests bypass the directory.
  // --------------------------------------------------------------------
  let big = heap.allocate(200_000).unwrap();
  let zeroed = heap.zeroed_allocate(1024, 8).unwrap();
  println!("\n[5] allocate(200000) = {:?}, zeroed_allocate(1024, 8) = {:?}", big, zeroed);
  print_heap(&heap, "5");

  heap.release(big.as_ptr());
  heap.release(zeroed.as_ptr());
  println!("[5] unmapped: {:?}", heap.os().unmapped());
  pause(step);

  println!("\n[6] End of walkthrough.");
}
