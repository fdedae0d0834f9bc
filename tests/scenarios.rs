use std::ptr::NonNull;

use osmem::{HEADER_SIZE, Heap, MMAP_THRESHOLD, SimulatedOs, Status};
use pretty_assertions::assert_eq;

fn heap() -> Heap<SimulatedOs> {
  Heap::new(SimulatedOs::default())
}

fn layout(heap: &Heap<SimulatedOs>) -> Vec<(usize, Status)> {
  heap.blocks().iter().map(|block| (block.size, block.status)).collect()
}

fn all_zero(
  ptr: NonNull<u8>,
  len: usize,
) -> bool {
  unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) }.iter().all(|byte| *byte == 0)
}

#[test]
fn small_requests_are_aligned_and_writable() {
  let mut heap = heap();

  for size in [1, 7, 8, 9, 100, 4095, 65_536, MMAP_THRESHOLD - 8] {
    let ptr = heap.allocate(size).unwrap();

    assert_eq!(ptr.as_ptr() as usize % 8, 0);
    assert!(heap.usable_size(ptr.as_ptr()).unwrap() >= size);
    assert_eq!(heap.status_of(ptr.as_ptr()), Some(Status::HeapAllocated));

    unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0xEE, size) };
  }

  assert_eq!(heap.mapped_count(), 0);
  assert_eq!(heap.check_invariants(), Ok(()));
}

#[test]
fn large_requests_are_mapped_and_unmapped_exactly() {
  let mut heap = heap();

  for (requested, rounded) in [(MMAP_THRESHOLD, MMAP_THRESHOLD), (131_073, 131_080), (200_000, 200_000)] {
    let ptr = heap.allocate(requested).unwrap();
    assert_eq!(heap.status_of(ptr.as_ptr()), Some(Status::MappedAllocated));

    heap.release(ptr.as_ptr());

    let base = ptr.as_ptr() as usize - HEADER_SIZE;
    assert_eq!(heap.os().unmapped().last(), Some(&(base, rounded + HEADER_SIZE)));
  }

  assert!(heap.blocks().is_empty());
  assert_eq!(heap.os().extend_calls(), 0);
}

#[test]
fn release_then_allocate_reuses_without_growth() {
  let mut heap = heap();

  let a = heap.allocate(512).unwrap();
  heap.allocate(64).unwrap();
  let brk = heap.os().break_offset();

  heap.release(a.as_ptr());

  for size in [512, 500, 24] {
    let again = heap.allocate(size).unwrap();
    assert_eq!(again, a);
    assert_eq!(heap.os().break_offset(), brk);
    heap.release(again.as_ptr());
  }
}

#[test]
fn any_release_order_coalesces_three_neighbours() {
  let sizes = [40, 72, 160];
  let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

  for order in orders {
    let mut heap = heap();

    heap.allocate(8).unwrap();
    let blocks: Vec<_> = sizes.iter().map(|size| heap.allocate(*size).unwrap()).collect();
    heap.allocate(8).unwrap();

    for index in order {
      heap.release(blocks[index].as_ptr());
    }

    assert_eq!(
      layout(&heap),
      vec![
        (8, Status::HeapAllocated),
        (40 + 72 + 160 + 2 * HEADER_SIZE, Status::Free),
        (8, Status::HeapAllocated),
      ],
      "release order {order:?}"
    );
  }
}

#[test]
fn double_release_is_harmless() {
  let mut heap = heap();

  let small = heap.allocate(48).unwrap();
  let big = heap.allocate(300_000).unwrap();

  heap.release(small.as_ptr());
  heap.release(small.as_ptr());
  heap.release(big.as_ptr());
  heap.release(big.as_ptr());

  assert_eq!(heap.os().unmapped().len(), 1);
  assert_eq!(heap.os().live_mappings(), 0);
  assert_eq!(layout(&heap), vec![(48, Status::Free)]);
}

#[test]
fn shrink_split_suffix_is_allocatable() {
  let mut heap = heap();

  let p = heap.allocate(1024).unwrap();
  heap.allocate(8).unwrap();

  assert_eq!(heap.resize(p.as_ptr(), 256), Some(p));

  let suffix_size = 1024 - 256 - HEADER_SIZE;
  let suffix = heap.allocate(suffix_size).unwrap();
  assert_eq!(suffix.as_ptr() as usize, p.as_ptr() as usize + 256 + HEADER_SIZE);
}

#[test]
fn zeroed_allocation_reads_as_zero() {
  let mut heap = heap();

  for (count, size) in [(1, 1), (10, 8), (3, 333), (1000, 64)] {
    let ptr = heap.zeroed_allocate(count, size).unwrap();
    assert!(all_zero(ptr, count * size));
  }
}

#[test]
fn scenario_freed_block_is_reused() {
  let mut heap = heap();

  let a = heap.allocate(100).unwrap();
  let _b = heap.allocate(200).unwrap();
  heap.release(a.as_ptr());
  let c = heap.allocate(50).unwrap();

  assert_eq!(c, a);
}

#[test]
fn scenario_large_request_bypasses_directory() {
  let mut heap = heap();

  heap.allocate(64).unwrap();
  let before = layout(&heap);

  let p = heap.allocate(200_000).unwrap();
  assert_eq!(heap.os().live_mappings(), 1);
  assert_eq!(layout(&heap), before);

  heap.release(p.as_ptr());
  assert_eq!(heap.os().live_mappings(), 0);
  assert_eq!(layout(&heap), before);
}

#[test]
fn scenario_zeroed_ten_by_eight() {
  let mut heap = heap();

  let p = heap.zeroed_allocate(10, 8).unwrap();

  assert_eq!(heap.usable_size(p.as_ptr()), Some(80));
  assert!(all_zero(p, 80));
}

#[test]
fn scenario_top_block_grows_in_place() {
  let mut heap = heap();

  let p = heap.allocate(16).unwrap();
  unsafe { p.as_ptr().write(0x42) };

  let q = heap.resize(p.as_ptr(), 4000).unwrap();

  assert_eq!(q, p);
  assert_eq!(unsafe { q.as_ptr().read() }, 0x42);
  assert_eq!(heap.usable_size(q.as_ptr()), Some(4000));
}

#[test]
fn scenario_shrink_leaves_reusable_suffix() {
  let mut heap = heap();

  let p = heap.allocate(4000).unwrap();
  let q = heap.resize(p.as_ptr(), 16).unwrap();

  assert_eq!(q, p);

  let suffix_size = 4000 - 16 - HEADER_SIZE;
  assert_eq!(layout(&heap), vec![(16, Status::HeapAllocated), (suffix_size, Status::Free)]);

  let brk = heap.os().break_offset();
  let reused = heap.allocate(suffix_size).unwrap();
  assert_eq!(reused.as_ptr() as usize, q.as_ptr() as usize + 16 + HEADER_SIZE);
  assert_eq!(heap.os().break_offset(), brk);
}

#[test]
fn resize_of_released_block_is_null() {
  let mut heap = heap();

  let p = heap.allocate(64).unwrap();
  heap.allocate(8).unwrap();
  heap.release(p.as_ptr());

  assert_eq!(heap.resize(p.as_ptr(), 128), None);
  assert_eq!(heap.status_of(p.as_ptr()), Some(Status::Free));
}
