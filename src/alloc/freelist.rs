//! Free-run bookkeeping shared by the threaded allocator's tiers.
//!
//! A free list is a vector of `(start_byte, count)` runs kept sorted by
//! `(count, start)`, so a best-fit lookup is a partition point away. The
//! unit of `count` depends on the list: pages for the large tier, chunks
//! for the small tier; `start` is always a byte offset.

/// One contiguous run of free units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FreeRun {
  pub start: usize,
  pub count: usize,
}

pub(crate) type FreeList = Vec<FreeRun>;

fn resort(list: &mut FreeList) {
  list.sort_unstable_by_key(|run| (run.count, run.start));
}

/// Take `alloc_count` units (spanning `alloc_bytes` bytes) from the
/// smallest run that fits, splitting the remainder back into the list.
pub(crate) fn grab(list: &mut FreeList, alloc_count: usize, alloc_bytes: usize) -> Option<usize> {
  let i = list.partition_point(|run| run.count < alloc_count);
  if i >= list.len() { return None }
  let run = list[i];
  if run.count > alloc_count {
    list[i] = FreeRun { start: run.start + alloc_bytes, count: run.count - alloc_count };
  } else {
    list.swap_remove(i);
  }
  resort(list);
  Some(run.start)
}

/// Return a run to the list.
pub(crate) fn put(list: &mut FreeList, run: FreeRun) {
  list.push(run);
  resort(list);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn grab_prefers_best_fit() {
    let mut list = vec![
      FreeRun { start: 0, count: 2 },
      FreeRun { start: 100, count: 5 },
      FreeRun { start: 200, count: 9 },
    ];
    assert_eq!(grab(&mut list, 4, 4 * 10), Some(100));
    // the 5-run was split: one unit remains at 140
    assert!(list.contains(&FreeRun { start: 140, count: 1 }));
    assert_eq!(grab(&mut list, 9, 9 * 10), Some(200));
    assert_eq!(grab(&mut list, 9, 9 * 10), None);
  }

  #[test]
  fn exact_fit_removes_the_run() {
    let mut list = vec![FreeRun { start: 64, count: 4 }];
    assert_eq!(grab(&mut list, 4, 4 * 16), Some(64));
    assert!(list.is_empty());
  }

  #[test]
  fn list_stays_sorted_by_count_then_start() {
    let mut list = FreeList::new();
    put(&mut list, FreeRun { start: 300, count: 7 });
    put(&mut list, FreeRun { start: 0, count: 1 });
    put(&mut list, FreeRun { start: 100, count: 7 });
    assert_eq!(list, vec![
      FreeRun { start: 0, count: 1 },
      FreeRun { start: 100, count: 7 },
      FreeRun { start: 300, count: 7 },
    ]);
  }
}
