//! The three-tier multi-threaded allocator.
//!
//! Requests are routed by length: 2 MiB and up get a dedicated [`Memory`]
//! each (*direct*); 32 KiB to 2 MiB are carved out of a shared memory in
//! 4 KiB page runs (*large*); everything smaller is served from one of 48
//! size classes (*small*), each with a per-thread freelist refilled in
//! batches from a shared per-class freelist, which in turn grows through
//! the large path one slab at a time.
//!
//! Lock order on the small path is per-thread spinlock, then the global
//! mutex, released in reverse. Per-thread state is keyed by OS thread id.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

use super::freelist::{self, FreeList, FreeRun};
use super::{check_align_shift, Allocator};
use crate::mem::{self, HugePages, Memory, UInt8Span, HUGE_PAGE_SIZE, PAGE_SHIFT, PAGE_SIZE};

/// Requests at or above this many bytes leave the small path.
pub const LARGE_THRESHOLD: usize = PAGE_SIZE << 3;
/// Requests at or above this many bytes get a dedicated memory.
pub const DIRECT_THRESHOLD: usize = HUGE_PAGE_SIZE;

const PAGE_MASK: usize = PAGE_SIZE - 1;

/// The number of small size classes.
pub const NUM_CLASSES: usize = 48;

/// One row of the size-class table. A chunk is `chunk_size << align_shift`
/// bytes; a growth step takes `pages_to_grab` pages through the large path
/// and a steal moves `chunks_to_grab` chunks from the shared list to a
/// thread's list.
#[derive(Clone, Copy)]
struct ClassRow {
  align_shift: u8,
  chunk_size: u8,
  pages_to_grab: u16,
  chunks_to_grab: u16,
}

const fn row(align_shift: u8, chunk_size: u8, pages_to_grab: u16, chunks_to_grab: u16) -> ClassRow {
  ClassRow { align_shift, chunk_size, pages_to_grab, chunks_to_grab }
}

/// The class table densely covers every (length, alignment) pair below
/// [`LARGE_THRESHOLD`] with at most 12.5% internal waste per class.
/// Row format: (alignShift, chunkSize, pagesToGrab, chunksToGrab);
/// chunk bytes = chunkSize << alignShift.
#[rustfmt::skip]
static CLASSES: [ClassRow; NUM_CLASSES] = [
  row(0, 1, 1, 256),    // #0: 1B chunks
  row(1, 1, 1, 256),    // #1: 2B
  row(2, 1, 1, 256),    // #2: 4B
  row(3, 1, 2, 256),    // #3: 8B
  row(2, 3, 3, 256),    // #4: 12B/4B
  row(4, 1, 4, 256),    // #5: 16B
  row(3, 3, 3, 128),    // #6: 24B/8B
  row(5, 1, 4, 128),    // #7: 32B
  row(3, 5, 5, 128),    // #8: 40B/8B
  row(4, 3, 3, 64),     // #9: 48B/16B
  row(3, 7, 7, 128),    // #10: 56B/8B
  row(6, 1, 8, 128),    // #11: 64B
  row(4, 5, 5, 64),     // #12: 80B/16B
  row(5, 3, 6, 64),     // #13: 96B/32B
  row(4, 7, 7, 64),     // #14: 112B/16B
  row(7, 1, 8, 64),     // #15: 128B
  row(5, 5, 5, 32),     // #16: 160B/32B
  row(6, 3, 6, 32),     // #17: 192B/64B
  row(5, 7, 7, 32),     // #18: 224B/32B
  row(8, 1, 8, 32),     // #19: 256B
  row(6, 5, 5, 16),     // #20: 320B/64B
  row(7, 3, 6, 16),     // #21: 384B/128B
  row(6, 7, 7, 16),     // #22: 448B/64B
  row(9, 1, 8, 16),     // #23: 512B
  row(7, 5, 5, 8),      // #24: 640B/128B
  row(8, 3, 6, 8),      // #25: 768B/256B
  row(7, 7, 7, 8),      // #26: 896B/128B
  row(10, 1, 8, 8),     // #27: 1K
  row(8, 5, 5, 4),      // #28: 1.25K/256B
  row(9, 3, 6, 4),      // #29: 1.5K/512B
  row(8, 7, 7, 4),      // #30: 1.75K/256B
  row(11, 1, 8, 4),     // #31: 2K
  row(9, 5, 10, 4),     // #32: 2.5K/512B
  row(10, 3, 12, 4),    // #33: 3K/1K
  row(9, 7, 14, 4),     // #34: 3.5K/512B
  row(12, 1, 16, 4),    // #35: 4K
  row(10, 5, 10, 2),    // #36: 5K/1K
  row(11, 3, 12, 2),    // #37: 6K/2K
  row(10, 7, 14, 2),    // #38: 7K/1K
  row(12, 2, 16, 2),    // #39: 8K/4K
  row(11, 5, 10, 2),    // #40: 10K/2K
  row(12, 3, 12, 2),    // #41: 12K/4K
  row(11, 7, 14, 2),    // #42: 14K/2K
  row(12, 4, 16, 2),    // #43: 16K/4K
  row(12, 5, 20, 2),    // #44: 20K/4K
  row(12, 6, 24, 2),    // #45: 24K/4K
  row(12, 7, 28, 2),    // #46: 28K/4K
  row(12, 8, 32, 2),    // #47: 32K/4K
];

fn compute_class(length: usize, align_shift: u32) -> usize {
  if align_shift > PAGE_SHIFT {
    panic!("BUG: alignShift={align_shift}, max={PAGE_SHIFT}");
  }
  if length > LARGE_THRESHOLD {
    panic!("BUG: length={length}, largeThreshold={LARGE_THRESHOLD}");
  }
  for (index, class) in CLASSES.iter().enumerate() {
    let max_length = (class.chunk_size as usize) << class.align_shift;
    if align_shift <= u32::from(class.align_shift) && length <= max_length {
      return index;
    }
  }
  panic!("BUG: no alloc class for length={length}, alignShift={align_shift}");
}

/// A tiny test-and-set lock guarding one thread's freelists. Contention is
/// rare (another thread would have to free into this thread's lists), so
/// spinning beats parking.
struct SpinLock<T> {
  flag: AtomicBool,
  value: UnsafeCell<T>,
}

// Safety: the flag serializes all access to the value.
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
  fn new(value: T) -> Self {
    SpinLock { flag: AtomicBool::new(false), value: UnsafeCell::new(value) }
  }

  fn lock(&self) -> SpinGuard<'_, T> {
    while self.flag.compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed).is_err() {
      std::hint::spin_loop();
    }
    SpinGuard { lock: self }
  }
}

struct SpinGuard<'a, T> {
  lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinGuard<'_, T> {
  type Target = T;
  // Safety: the flag is held for the guard's lifetime.
  fn deref(&self) -> &T { unsafe { &*self.lock.value.get() } }
}

impl<T> DerefMut for SpinGuard<'_, T> {
  // Safety: as above, and the guard is unique.
  fn deref_mut(&mut self) -> &mut T { unsafe { &mut *self.lock.value.get() } }
}

impl<T> Drop for SpinGuard<'_, T> {
  fn drop(&mut self) { self.lock.flag.store(false, Ordering::Release) }
}

/// Construction options for [`Threaded`].
#[derive(Clone, Debug, Default)]
pub struct ThreadedOptions {
  /// The name of the shared backing memory; direct allocations derive
  /// their names from it.
  pub name: String,
  /// The page mode for the backing memory and direct allocations.
  pub huge_pages: HugePages,
}

struct PerThread {
  free_chunks_by_class: SpinLock<[FreeList; NUM_CLASSES]>,
}

struct DirectAlloc {
  mem: Arc<Memory>,
  #[allow(dead_code)] length: usize,
}

/// State behind the allocator's global mutex: the bump pointer into the
/// shared memory, free page runs, and the shared per-class chunk lists.
struct Shared {
  sbrk: usize,
  free_pages: FreeList,
  free_chunks_by_class: [FreeList; NUM_CLASSES],
}

/// The three-tier multi-threaded allocator.
pub struct Threaded {
  mem: Arc<Memory>,
  threads: RwLock<HashMap<u64, Arc<PerThread>>>,
  direct: Mutex<HashMap<u32, DirectAlloc>>,
  direct_next_id: AtomicU32,
  shared: Mutex<Shared>,
}

struct LargeFacts {
  alloc_count: usize,
  alloc_bytes: usize,
}

impl LargeFacts {
  fn new(length: usize) -> Self {
    let alloc_count = (length + PAGE_MASK) >> PAGE_SHIFT;
    Self::for_pages(alloc_count)
  }

  fn for_pages(alloc_count: usize) -> Self {
    const GROW_COUNT: usize = HUGE_PAGE_SIZE >> PAGE_SHIFT;
    if alloc_count > GROW_COUNT {
      panic!("BUG: allocCount={alloc_count}, growCount={GROW_COUNT}");
    }
    LargeFacts { alloc_count, alloc_bytes: alloc_count << PAGE_SHIFT }
  }
}

struct SmallFacts {
  class_index: usize,
  alloc_count: usize,
  alloc_bytes: usize,
  steal_count: usize,
  steal_bytes: usize,
  grow_pages: usize,
  chunks_per_grow: usize,
}

impl SmallFacts {
  fn new(length: usize, align_shift: u32) -> Self {
    let class_index = compute_class(length, align_shift);
    let class = CLASSES[class_index];
    let bytes_per_chunk = (class.chunk_size as usize) << class.align_shift;
    let alloc_count = length.div_ceil(bytes_per_chunk);
    let steal_count = class.chunks_to_grab as usize;
    let grow_pages = class.pages_to_grab as usize;
    let chunks_per_grow = (grow_pages << PAGE_SHIFT) / bytes_per_chunk;

    if alloc_count > steal_count {
      panic!("BUG: allocCount={alloc_count}, stealCount={steal_count}");
    }
    if steal_count > chunks_per_grow {
      panic!("BUG: chunksToGrab={steal_count}, pagesToGrab={grow_pages}, chunksPerGrow={chunks_per_grow}");
    }

    SmallFacts {
      class_index,
      alloc_count,
      alloc_bytes: alloc_count * bytes_per_chunk,
      steal_count,
      steal_bytes: steal_count * bytes_per_chunk,
      grow_pages,
      chunks_per_grow,
    }
  }
}

impl Threaded {
  /// Create a new threaded allocator.
  #[must_use] pub fn new(opts: ThreadedOptions) -> Threaded {
    Threaded {
      mem: Memory::new(opts.name, opts.huge_pages, true),
      threads: RwLock::new(HashMap::new()),
      direct: Mutex::new(HashMap::new()),
      direct_next_id: AtomicU32::new(0),
      shared: Mutex::new(Shared {
        sbrk: 0,
        free_pages: FreeList::new(),
        free_chunks_by_class: [const { FreeList::new() }; NUM_CLASSES],
      }),
    }
  }

  /// The shared backing memory (direct allocations live elsewhere).
  #[must_use] pub fn memory(&self) -> &Arc<Memory> { &self.mem }

  fn per_thread(&self, tid: u64) -> Arc<PerThread> {
    if let Some(data) = self.threads.read().get(&tid) {
      return data.clone();
    }
    self.threads.write().entry(tid).or_insert_with(|| Arc::new(PerThread {
      free_chunks_by_class: SpinLock::new([const { FreeList::new() }; NUM_CLASSES]),
    })).clone()
  }

  fn direct_alloc(&self, length: usize) -> UInt8Span {
    let id = self.direct_next_id.fetch_add(1, Ordering::Relaxed);
    let name = format!("{}-direct-{id}", self.mem.name());
    let mem = Memory::new(name, self.mem.huge_pages(), true);
    mem.set_len(length);
    self.direct.lock().insert(id, DirectAlloc { mem: mem.clone(), length });
    mem.u8s()
  }

  fn large_alloc(&self, length: usize) -> UInt8Span {
    let facts = LargeFacts::new(length);
    let start = self.large_alloc_locked(&mut self.shared.lock(), &facts);
    self.mem.u8s().span(start, start + length)
  }

  fn large_alloc_locked(&self, shared: &mut Shared, facts: &LargeFacts) -> usize {
    const GROW_COUNT: usize = HUGE_PAGE_SIZE >> PAGE_SHIFT;
    if let Some(start) = freelist::grab(&mut shared.free_pages, facts.alloc_count, facts.alloc_bytes) {
      return start;
    }
    log::trace!("{}: growing by one {HUGE_PAGE_SIZE:#x}-byte slab", self.mem);
    self.mem.grow(HUGE_PAGE_SIZE);
    let start = shared.sbrk;
    shared.sbrk += HUGE_PAGE_SIZE;
    if GROW_COUNT > facts.alloc_count {
      freelist::put(&mut shared.free_pages, FreeRun {
        start: start + facts.alloc_bytes,
        count: GROW_COUNT - facts.alloc_count,
      });
    }
    start
  }

  fn small_alloc(&self, length: usize, align_shift: u32) -> UInt8Span {
    let facts = SmallFacts::new(length, align_shift);
    let thread_local = self.per_thread(mem::thread_id());

    let mut local = thread_local.free_chunks_by_class.lock();
    let my_list = &mut local[facts.class_index];
    let start = match freelist::grab(my_list, facts.alloc_count, facts.alloc_bytes) {
      Some(start) => start,
      None => {
        // Both locks are held across the shared -> local refill.
        let mut shared = self.shared.lock();
        self.small_steal(&mut shared, my_list, &facts)
      }
    };
    drop(local);

    self.mem.u8s().span(start, start + length)
  }

  fn small_steal(&self, shared: &mut Shared, my_list: &mut FreeList, facts: &SmallFacts) -> usize {
    let shared_list = &mut shared.free_chunks_by_class[facts.class_index];
    let steal_start = match freelist::grab(shared_list, facts.steal_count, facts.steal_bytes) {
      Some(start) => start,
      None => self.small_grow(shared, facts),
    };

    if facts.steal_count > facts.alloc_count {
      freelist::put(my_list, FreeRun {
        start: steal_start + facts.alloc_bytes,
        count: facts.steal_count - facts.alloc_count,
      });
    }
    steal_start
  }

  fn small_grow(&self, shared: &mut Shared, facts: &SmallFacts) -> usize {
    let grow_start = self.large_alloc_locked(shared, &LargeFacts::for_pages(facts.grow_pages));
    if facts.chunks_per_grow > facts.steal_count {
      freelist::put(&mut shared.free_chunks_by_class[facts.class_index], FreeRun {
        start: grow_start + facts.steal_bytes,
        count: facts.chunks_per_grow - facts.steal_count,
      });
    }
    grow_start
  }
}

impl Allocator for Threaded {
  fn allocate(&self, count: usize, align_shift: u32) -> UInt8Span {
    check_align_shift(align_shift);

    let length = count << align_shift;
    if length >= DIRECT_THRESHOLD {
      self.direct_alloc(length)
    } else if length >= LARGE_THRESHOLD {
      self.large_alloc(length)
    } else {
      self.small_alloc(length, align_shift)
    }
  }

  fn free(&self, span: UInt8Span) {
    let mut direct = self.direct.lock();
    let found = direct.iter()
      .find(|(_, d)| Arc::ptr_eq(&d.mem, span.memory()))
      .map(|(&id, _)| id);
    if let Some(id) = found {
      direct.remove(&id);
      return;
    }
    panic!("BUG: not implemented: free of a non-direct allocation");
  }

  fn trim(&self) {
    panic!("BUG: not implemented: trim");
  }

  fn free_all(&self) {
    panic!("BUG: not implemented: free_all");
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn alloc() -> Threaded {
    Threaded::new(ThreadedOptions { name: "threaded-test".into(), huge_pages: HugePages::Off })
  }

  #[test]
  fn class_table_is_dense() {
    // SmallFacts::new checks the per-class invariants (fit within a steal,
    // steal within a grow) with bug panics; sweeping every legal request
    // proves the table has no holes.
    for length in 1..LARGE_THRESHOLD {
      for align_shift in 0..=PAGE_SHIFT {
        let facts = SmallFacts::new(length, align_shift);
        let class = CLASSES[facts.class_index];
        assert!(u32::from(class.align_shift) >= align_shift);
        assert!(facts.alloc_bytes >= length);
      }
    }
  }

  #[test]
  fn small_allocations_are_aligned_and_disjoint() {
    let alloc = alloc();
    let mut spans = Vec::new();
    for (count, shift) in [(3usize, 0u32), (1, 3), (5, 2), (1, 6), (100, 0), (1, 12), (7, 4)] {
      let span = alloc.allocate(count, shift);
      assert!(span.size() >= count << shift);
      assert_eq!(span.start_offset() % (1 << shift), 0, "misaligned for shift {shift}");
      spans.push(span);
    }
    for (i, a) in spans.iter().enumerate() {
      for b in &spans[i + 1..] {
        assert!(a.end_offset() <= b.start_offset() || b.end_offset() <= a.start_offset(),
          "overlap: {a} vs {b}");
      }
    }
  }

  #[test]
  fn large_allocations_use_page_runs() {
    let alloc = alloc();
    let a = alloc.allocate(LARGE_THRESHOLD, 0);
    let b = alloc.allocate(LARGE_THRESHOLD, 0);
    assert_eq!(a.start_offset() % PAGE_SIZE, 0);
    assert_eq!(b.start_offset() % PAGE_SIZE, 0);
    assert!(a.end_offset() <= b.start_offset() || b.end_offset() <= a.start_offset());
    // one slab is plenty for both
    assert_eq!(alloc.memory().size(), HUGE_PAGE_SIZE);
  }

  #[test]
  fn direct_allocations_get_their_own_memory() {
    let alloc = alloc();
    let span = alloc.allocate(DIRECT_THRESHOLD, 0);
    assert!(!Arc::ptr_eq(span.memory(), alloc.memory()));
    assert_eq!(span.size(), DIRECT_THRESHOLD);
    assert!(span.memory().name().starts_with("threaded-test-direct-"));
    alloc.free(span);
  }

  #[test]
  fn threads_draw_from_disjoint_chunks() {
    let alloc = Arc::new(alloc());
    let mut handles = Vec::new();
    for _ in 0..4 {
      let alloc = alloc.clone();
      handles.push(std::thread::spawn(move || {
        (0..64).map(|i| {
          let span = alloc.allocate(24 + i % 40, 3);
          (span.start_offset(), span.end_offset())
        }).collect::<Vec<_>>()
      }));
    }
    let mut all: Vec<(usize, usize)> = Vec::new();
    for handle in handles {
      all.extend(handle.join().unwrap());
    }
    all.sort_unstable();
    for pair in all.windows(2) {
      assert!(pair[0].1 <= pair[1].0, "overlap: {pair:?}");
    }
  }
}
