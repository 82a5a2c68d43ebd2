//! Named, page-granular backing memory with typed span views.
//!
//! A [`Memory`] is a named byte region whose capacity is always a whole
//! number of pages of its chosen page size (4 KiB, or 2 MiB / 1 GiB when
//! huge pages are requested). The region supports growing, shrinking, page
//! protection and locking to RAM, and hands out typed views
//! ([`UInt8Span`](span::UInt8Span) through [`PageSpan`](span::PageSpan))
//! that check size and alignment at every step.
//!
//! Multi-threaded memories guard the region with a reader/writer lock;
//! single-threaded memories use a no-op raw lock, so the lock choice is a
//! construction-time property rather than a type parameter.

pub mod span;
mod sys;

use std::fmt;
use std::io;
use std::sync::{Arc, Weak};

use lock_api::{RawRwLock as _, RwLock};

pub use span::{PageSpan, UInt16Span, UInt32Span, UInt64Span, UInt8Span};

pub(crate) use sys::{check_ij, thread_id};

/// log2 of the small page size.
pub const PAGE_SHIFT: u32 = 12;
/// The small page size, 4 KiB.
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
/// log2 of the huge page size.
pub const HUGE_PAGE_SHIFT: u32 = 21;
/// The huge page size, 2 MiB.
pub const HUGE_PAGE_SIZE: usize = 1 << HUGE_PAGE_SHIFT;

/// The page-size mode of a [`Memory`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum HugePages {
  /// Normal 4 KiB pages.
  #[default] Off,
  /// 2 MiB huge pages.
  Huge2M,
  /// 1 GiB huge pages.
  Huge1G,
}

impl HugePages {
  /// log2 of the page size in this mode.
  #[must_use] pub fn page_shift(self) -> u32 {
    match self {
      HugePages::Off => 12,
      HugePages::Huge2M => 21,
      HugePages::Huge1G => 30,
    }
  }

  /// The page size in bytes in this mode.
  #[must_use] pub fn page_size(self) -> usize { 1 << self.page_shift() }
}

/// A raw rwlock that is either real or a no-op, chosen at construction.
///
/// The no-op variant is for memories promised to be single-threaded; it
/// trades all synchronization away, exactly like the original's no-op
/// locker. Sharing a single-threaded [`Memory`] across threads is a caller
/// contract violation.
pub(crate) struct RawMaybeRwLock {
  real: Option<parking_lot::RawRwLock>,
}

impl RawMaybeRwLock {
  pub(crate) fn noop() -> Self { RawMaybeRwLock { real: None } }
  pub(crate) fn real() -> Self {
    RawMaybeRwLock { real: Some(<parking_lot::RawRwLock as lock_api::RawRwLock>::INIT) }
  }
}

// Safety: the real variant defers to parking_lot; the no-op variant is only
// created for memories whose callers promise single-threaded use.
unsafe impl lock_api::RawRwLock for RawMaybeRwLock {
  const INIT: Self = RawMaybeRwLock { real: None };
  type GuardMarker = lock_api::GuardNoSend;

  fn lock_shared(&self) { if let Some(r) = &self.real { r.lock_shared() } }
  fn try_lock_shared(&self) -> bool {
    self.real.as_ref().is_none_or(|r| r.try_lock_shared())
  }
  unsafe fn unlock_shared(&self) {
    // Safety: paired with a successful lock_shared on the same variant.
    if let Some(r) = &self.real { unsafe { r.unlock_shared() } }
  }
  fn lock_exclusive(&self) { if let Some(r) = &self.real { r.lock_exclusive() } }
  fn try_lock_exclusive(&self) -> bool {
    self.real.as_ref().is_none_or(|r| r.try_lock_exclusive())
  }
  unsafe fn unlock_exclusive(&self) {
    // Safety: paired with a successful lock_exclusive on the same variant.
    if let Some(r) = &self.real { unsafe { r.unlock_exclusive() } }
  }
}

/// A raw mutex that is either real or a no-op, chosen at construction.
/// See [`RawMaybeRwLock`].
pub(crate) struct RawMaybeMutex {
  real: Option<parking_lot::RawMutex>,
}

impl RawMaybeMutex {
  pub(crate) fn noop() -> Self { RawMaybeMutex { real: None } }
  pub(crate) fn real() -> Self {
    RawMaybeMutex { real: Some(<parking_lot::RawMutex as lock_api::RawMutex>::INIT) }
  }
}

// Safety: as for RawMaybeRwLock.
unsafe impl lock_api::RawMutex for RawMaybeMutex {
  const INIT: Self = RawMaybeMutex { real: None };
  type GuardMarker = lock_api::GuardNoSend;

  fn lock(&self) { if let Some(r) = &self.real { lock_api::RawMutex::lock(r) } }
  fn try_lock(&self) -> bool {
    self.real.as_ref().is_none_or(lock_api::RawMutex::try_lock)
  }
  unsafe fn unlock(&self) {
    // Safety: paired with a successful lock on the same variant.
    if let Some(r) = &self.real { unsafe { lock_api::RawMutex::unlock(r) } }
  }
}

/// The mapped region behind a [`Memory`]. `len <= map.cap`, and `map.cap`
/// is always page aligned.
struct Region {
  map: sys::Mapping,
  len: usize,
  locked: bool,
}

impl Region {
  fn resize(&mut self, len: usize, huge: HugePages) {
    let cap = sys::page_align(len, huge.page_size());
    if cap != self.map.cap {
      sys::remap(&mut self.map, cap, huge);
      if self.locked && cap != 0 {
        let _ = sys::lock_ram(&self.map, true);
      }
    }
    self.len = len;
  }

  fn bytes(&self) -> &[u8] {
    if self.len == 0 { return &[] }
    // Safety: ptr covers cap >= len initialized bytes while the region lock
    // is held.
    unsafe { std::slice::from_raw_parts(self.map.ptr, self.len) }
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    if self.len == 0 { return &mut [] }
    // Safety: as in bytes, with exclusive access through the write lock.
    unsafe { std::slice::from_raw_parts_mut(self.map.ptr, self.len) }
  }
}

impl Drop for Region {
  fn drop(&mut self) { sys::unmap(&mut self.map) }
}

/// A named, thread-safe, page-granular byte region.
pub struct Memory {
  name: String,
  huge: HugePages,
  weak_self: Weak<Memory>,
  region: RwLock<RawMaybeRwLock, Region>,
}

impl Memory {
  /// Create a new empty memory. `multi_threaded` selects a real
  /// reader/writer lock; a single-threaded memory must not be shared
  /// across threads.
  pub fn new(name: impl Into<String>, huge: HugePages, multi_threaded: bool) -> Arc<Memory> {
    let name = name.into();
    Arc::new_cyclic(|weak_self| {
      let raw = if multi_threaded { RawMaybeRwLock::real() } else { RawMaybeRwLock::noop() };
      Memory {
        name,
        huge,
        weak_self: weak_self.clone(),
        region: RwLock::const_new(raw, Region {
          map: sys::Mapping::empty(huge.page_size()),
          len: 0,
          locked: false,
        }),
      }
    })
  }

  fn arc(&self) -> Arc<Memory> {
    self.weak_self.upgrade().expect("BUG: memory outlived its Arc")
  }

  /// The name this memory was created with.
  #[must_use] pub fn name(&self) -> &str { &self.name }

  /// The page-size mode this memory was created with.
  #[must_use] pub fn huge_pages(&self) -> HugePages { self.huge }

  /// Release the backing pages. Equivalent to `set_len(0)`.
  pub fn reset(&self) { self.set_len(0) }

  /// Resize the region to exactly `len` bytes, remapping the backing pages
  /// as needed. New bytes are zero.
  pub fn set_len(&self, len: usize) {
    self.region.write().resize(len, self.huge);
  }

  /// Grow the region by `n` bytes.
  pub fn grow(&self, n: usize) {
    if n == 0 { return }
    let mut region = self.region.write();
    let len = region.len + n;
    region.resize(len, self.huge);
  }

  /// Shrink the region by `n` bytes. Shrinking past zero is a bug.
  pub fn shrink(&self, n: usize) {
    if n == 0 { return }
    let mut region = self.region.write();
    let Some(len) = region.len.checked_sub(n) else {
      panic!("cannot grow to negative size: length={}, n={n}", region.len)
    };
    region.resize(len, self.huge);
  }

  /// Change the page protection of the whole region. Requesting write and
  /// execute together is a bug.
  pub fn protect(&self, r: bool, w: bool, x: bool) -> io::Result<()> {
    if w && x { panic!("BUG: illegal protection W|X") }
    let region = self.region.write();
    sys::protect(&region.map, r, w, x)
  }

  /// Pin the region's pages to RAM. The locked state persists across
  /// resizes until [`Memory::unlock_from_ram`].
  pub fn lock_to_ram(&self) -> io::Result<()> {
    let mut region = self.region.write();
    sys::lock_ram(&region.map, true)?;
    region.locked = true;
    Ok(())
  }

  /// Release the RAM pin.
  pub fn unlock_from_ram(&self) -> io::Result<()> {
    let mut region = self.region.write();
    region.locked = false;
    sys::lock_ram(&region.map, false)
  }

  /// The current length of the region in bytes.
  #[must_use] pub fn size(&self) -> usize { self.region.read().len }

  /// View the whole region as bytes.
  #[must_use] pub fn u8s(&self) -> UInt8Span {
    UInt8Span::new(self.arc(), 0, self.size(), 12)
  }

  /// View the whole region as native-endian `u16`s.
  #[must_use] pub fn u16s(&self) -> UInt16Span {
    UInt16Span::new(self.arc(), 0, self.size(), 12)
  }

  /// View the whole region as native-endian `u32`s.
  #[must_use] pub fn u32s(&self) -> UInt32Span {
    UInt32Span::new(self.arc(), 0, self.size(), 12)
  }

  /// View the whole region as native-endian `u64`s.
  #[must_use] pub fn u64s(&self) -> UInt64Span {
    UInt64Span::new(self.arc(), 0, self.size(), 12)
  }

  /// View the whole region as 4 KiB pages.
  #[must_use] pub fn pages(&self) -> PageSpan {
    PageSpan::new(self.arc(), 0, self.size(), 12)
  }

  /// Run `f` over `length` bytes starting at `offset` under the read lock.
  pub fn with_read_lock<R>(&self, offset: usize, length: usize, f: impl FnOnce(&[u8]) -> R) -> R {
    self.read_range(offset, offset + length, f)
  }

  /// Run `f` over `length` bytes starting at `offset` under the write lock.
  pub fn with_write_lock<R>(
    &self, offset: usize, length: usize, f: impl FnOnce(&mut [u8]) -> R,
  ) -> R {
    self.write_range(offset, offset + length, f)
  }

  pub(crate) fn read_range<R>(&self, i: usize, j: usize, f: impl FnOnce(&[u8]) -> R) -> R {
    let region = self.region.read();
    check_ij(i, j, region.len);
    f(&region.bytes()[i..j])
  }

  pub(crate) fn write_range<R>(&self, i: usize, j: usize, f: impl FnOnce(&mut [u8]) -> R) -> R {
    let mut region = self.region.write();
    check_ij(i, j, region.len);
    f(&mut region.bytes_mut()[i..j])
  }
}

impl fmt::Display for Memory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "memory {:?}", self.name)
  }
}

impl fmt::Debug for Memory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Memory({:?})", self.name)
  }
}

/// Check that a span cast to a wider element type is backed by sufficient
/// alignment. Failing this is a caller bug.
pub(crate) fn check_cast(from: &str, to: &str, min_align_shift: u32, actual_align_shift: u32) {
  if actual_align_shift < min_align_shift {
    panic!(
      "{from} is not aligned strongly enough to be used as {to}: \
       minimum alignShift {min_align_shift}, actual alignShift {actual_align_shift}"
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn resize_is_page_granular() {
    let mem = Memory::new("test", HugePages::Off, false);
    assert_eq!(mem.size(), 0);
    mem.set_len(17);
    assert_eq!(mem.size(), 17);
    mem.grow(PAGE_SIZE);
    assert_eq!(mem.size(), 17 + PAGE_SIZE);
    mem.shrink(PAGE_SIZE);
    assert_eq!(mem.size(), 17);
    mem.reset();
    assert_eq!(mem.size(), 0);
  }

  #[test]
  #[should_panic(expected = "negative size")]
  fn shrink_past_zero_is_a_bug() {
    let mem = Memory::new("test", HugePages::Off, false);
    mem.set_len(8);
    mem.shrink(9);
  }

  #[test]
  #[should_panic(expected = "BUG: illegal protection W|X")]
  fn wx_protection_is_a_bug() {
    let mem = Memory::new("test", HugePages::Off, false);
    let _ = mem.protect(true, true, true);
  }

  #[test]
  fn fresh_bytes_are_zero() {
    let mem = Memory::new("test", HugePages::Off, true);
    mem.set_len(64);
    mem.with_write_lock(0, 64, |bytes| bytes[5] = 0xaa);
    mem.with_read_lock(0, 64, |bytes| {
      assert_eq!(bytes[5], 0xaa);
      assert!(bytes[6..].iter().all(|&b| b == 0));
    });
  }

  #[test]
  fn display_names_the_memory() {
    let mem = Memory::new("scratch", HugePages::Off, false);
    assert_eq!(mem.to_string(), "memory \"scratch\"");
    assert_eq!(format!("{mem:?}"), "Memory(\"scratch\")");
  }
}
