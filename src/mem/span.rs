//! Typed views over a [`Memory`].
//!
//! A span is `(memory, start_byte, end_byte, align_shift)`. Spans carry no
//! ownership of the bytes; they are cheap handles that check their range
//! against the live memory on every locked access. The `align_shift` of a
//! span only ever decays: sub-slicing keeps the strongest alignment the new
//! start offset still satisfies, and casting to a wider element type
//! requires (and checks) that enough alignment is left.

use std::fmt;
use std::sync::Arc;

use super::{check_cast, check_ij, Memory, PAGE_SIZE};

/// One 4 KiB page, the element type of a [`PageSpan`].
pub type Page = [u8; PAGE_SIZE];

macro_rules! make_spans {
  {$($(#[$attr:meta])* $name:ident: $elem:ty, $shift:expr, $zero:expr;)*} => {$(
    $(#[$attr])*
    #[derive(Clone)]
    pub struct $name {
      mem: Arc<Memory>,
      i: usize,
      j: usize,
      align_shift: u32,
    }

    impl $name {
      pub(crate) fn new(mem: Arc<Memory>, i: usize, j: usize, align_shift: u32) -> Self {
        Self { mem, i, j, align_shift }
      }

      /// The memory this span points into.
      #[must_use] pub fn memory(&self) -> &Arc<Memory> { &self.mem }

      /// The first byte offset covered by this span.
      #[must_use] pub fn start_offset(&self) -> usize { self.i }

      /// One past the last byte offset covered by this span.
      #[must_use] pub fn end_offset(&self) -> usize { self.j }

      /// log2 of the guaranteed alignment of the start offset.
      #[must_use] pub fn align_shift(&self) -> u32 { self.align_shift }

      /// The guaranteed alignment of the start offset in bytes.
      #[must_use] pub fn align_bytes(&self) -> usize { 1 << self.align_shift }

      /// The number of elements in this span.
      #[must_use] pub fn size(&self) -> usize { (self.j - self.i) >> $shift }

      /// Sub-slice in element units. The alignment guarantee decays to
      /// whatever the new start offset still satisfies.
      #[must_use] pub fn span(&self, i: usize, j: usize) -> Self {
        check_ij(i, j, self.size());
        let i = self.i + (i << $shift);
        let j = self.i + (j << $shift);

        let mut align_shift = self.align_shift;
        while align_shift > $shift {
          let align_mask = (1usize << align_shift) - 1;
          if i & align_mask == 0 { break }
          align_shift -= 1;
        }

        Self { mem: self.mem.clone(), i, j, align_shift }
      }

      /// Run `f` over the whole span under the write lock.
      pub fn all_with_write_lock<R>(&self, f: impl FnOnce(&mut [$elem]) -> R) -> R {
        self.with_write_lock(0, self.size(), f)
      }

      /// Run `f` over the whole span under the read lock.
      pub fn all_with_read_lock<R>(&self, f: impl FnOnce(&[$elem]) -> R) -> R {
        self.with_read_lock(0, self.size(), f)
      }

      /// Run `f` over elements `[i, j)` under the write lock.
      pub fn with_write_lock<R>(
        &self, i: usize, j: usize, f: impl FnOnce(&mut [$elem]) -> R,
      ) -> R {
        check_ij(i, j, self.size());
        let i = self.i + (i << $shift);
        let j = self.i + (j << $shift);
        self.mem.write_range(i, j, |bytes| {
          // Safety: the span invariants put the start offset at a multiple
          // of the element size within a page-aligned region, and the byte
          // length is an exact multiple of the element size.
          let data = unsafe {
            std::slice::from_raw_parts_mut(bytes.as_mut_ptr().cast::<$elem>(), bytes.len() >> $shift)
          };
          f(data)
        })
      }

      /// Run `f` over elements `[i, j)` under the read lock.
      pub fn with_read_lock<R>(&self, i: usize, j: usize, f: impl FnOnce(&[$elem]) -> R) -> R {
        check_ij(i, j, self.size());
        let i = self.i + (i << $shift);
        let j = self.i + (j << $shift);
        self.mem.read_range(i, j, |bytes| {
          // Safety: as in with_write_lock.
          let data = unsafe {
            std::slice::from_raw_parts(bytes.as_ptr().cast::<$elem>(), bytes.len() >> $shift)
          };
          f(data)
        })
      }

      /// Overwrite every element with zero.
      pub fn zero(&self) {
        self.all_with_write_lock(|data| for e in data { *e = $zero });
      }

      /// Returns true if every element is zero.
      #[must_use] pub fn is_zero(&self) -> bool {
        self.all_with_read_lock(|data| data.iter().all(|e| *e == $zero))
      }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memory {:?} span [{}:{}] shift={}",
          self.mem.name(), self.i, self.j, self.align_shift)
      }
    }

    impl fmt::Debug for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, concat!(stringify!($name), "({:?}, {:#x}, {:#x}, {})"),
          self.mem.name(), self.i, self.j, self.align_shift)
      }
    }
  )*}
}

make_spans! {
  /// A byte view.
  UInt8Span: u8, 0, 0;
  /// A `u16` view; requires alignment shift >= 1.
  UInt16Span: u16, 1, 0;
  /// A `u32` view; requires alignment shift >= 2.
  UInt32Span: u32, 2, 0;
  /// A `u64` view; requires alignment shift >= 3.
  UInt64Span: u64, 3, 0;
  /// A whole-page view; requires alignment shift >= 12.
  PageSpan: Page, 12, [0u8; PAGE_SIZE];
}

macro_rules! make_casts {
  {$($name:ident: $shift:expr;)*} => {$(
    impl $name {
      /// Reinterpret as a byte span.
      #[must_use] pub fn u8s(&self) -> UInt8Span {
        check_cast(stringify!($name), "UInt8Span", 0, self.align_shift);
        UInt8Span::new(self.mem.clone(), self.i, self.j, self.align_shift)
      }

      /// Reinterpret as a `u16` span. Insufficient alignment is a bug.
      #[must_use] pub fn u16s(&self) -> UInt16Span {
        check_cast(stringify!($name), "UInt16Span", 1, self.align_shift);
        UInt16Span::new(self.mem.clone(), self.i, self.j, self.align_shift)
      }

      /// Reinterpret as a `u32` span. Insufficient alignment is a bug.
      #[must_use] pub fn u32s(&self) -> UInt32Span {
        check_cast(stringify!($name), "UInt32Span", 2, self.align_shift);
        UInt32Span::new(self.mem.clone(), self.i, self.j, self.align_shift)
      }

      /// Reinterpret as a `u64` span. Insufficient alignment is a bug.
      #[must_use] pub fn u64s(&self) -> UInt64Span {
        check_cast(stringify!($name), "UInt64Span", 3, self.align_shift);
        UInt64Span::new(self.mem.clone(), self.i, self.j, self.align_shift)
      }

      /// Reinterpret as a page span. Insufficient alignment is a bug.
      #[must_use] pub fn pages(&self) -> PageSpan {
        check_cast(stringify!($name), "PageSpan", 12, self.align_shift);
        PageSpan::new(self.mem.clone(), self.i, self.j, self.align_shift)
      }
    }
  )*}
}

make_casts! {
  UInt8Span: 0;
  UInt16Span: 1;
  UInt32Span: 2;
  UInt64Span: 3;
  PageSpan: 12;
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mem::HugePages;

  fn memory(len: usize) -> Arc<Memory> {
    let mem = Memory::new("span-test", HugePages::Off, true);
    mem.set_len(len);
    mem
  }

  #[test]
  fn whole_memory_views_share_bytes() {
    let mem = memory(64);
    mem.u8s().with_write_lock(0, 8, |bytes| bytes.copy_from_slice(&[1, 0, 0, 0, 2, 0, 0, 0]));
    mem.u32s().with_read_lock(0, 2, |words| assert_eq!(words, [1, 2]));
    assert_eq!(mem.u64s().size(), 8);
    assert_eq!(mem.pages().size(), 0);
  }

  #[test]
  fn subspan_decays_alignment() {
    let mem = memory(64);
    let all = mem.u8s();
    assert_eq!(all.align_shift(), 12);
    let sub = all.span(4, 12);
    assert_eq!(sub.align_shift(), 2);
    assert_eq!(sub.size(), 8);
    assert_eq!(sub.start_offset(), 4);
    let sub2 = sub.span(2, 4);
    assert_eq!(sub2.align_shift(), 1);
  }

  #[test]
  fn aligned_subspan_casts_up() {
    let mem = memory(64);
    let sub = mem.u8s().span(8, 24);
    assert_eq!(sub.align_shift(), 3);
    let words = sub.u64s();
    assert_eq!(words.size(), 2);
  }

  #[test]
  #[should_panic(expected = "not aligned strongly enough")]
  fn misaligned_cast_is_a_bug() {
    let mem = memory(64);
    let _ = mem.u8s().span(4, 12).u64s();
  }

  #[test]
  #[should_panic(expected = "BUG: j > size")]
  fn out_of_range_subspan_is_a_bug() {
    let mem = memory(64);
    let _ = mem.u8s().span(0, 65);
  }

  #[test]
  fn zero_and_is_zero() {
    let mem = memory(16);
    let span = mem.u8s();
    assert!(span.is_zero());
    span.with_write_lock(3, 4, |bytes| bytes[0] = 7);
    assert!(!span.is_zero());
    span.zero();
    assert!(span.is_zero());
  }
}
