//! OS-level mapping primitives backing [`Memory`](super::Memory).
//!
//! On Linux the region is a private anonymous `mmap` (optionally with
//! `MAP_HUGETLB`), resized with `mremap` and released with `munmap`. On
//! other platforms a portable fallback hands out page-aligned allocations
//! from the global allocator, and the page-protection and RAM-locking calls
//! report unsupported.
//!
//! OS allocation failures are fatal: there is no meaningful way to continue
//! once the backing store cannot be mapped.

/// A raw mapped region. `cap` is always a whole number of pages of size
/// `page`; `ptr` is null iff `cap == 0`.
pub(crate) struct Mapping {
  pub ptr: *mut u8,
  pub cap: usize,
  pub page: usize,
}

// Safety: the mapping is a plain byte region with no thread affinity, and
// all access to the pointed-to bytes is coordinated by the owning region's
// lock.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
  pub(crate) fn empty(page: usize) -> Self {
    Mapping { ptr: std::ptr::null_mut(), cap: 0, page }
  }
}

#[cfg(target_os = "linux")]
mod imp {
  use std::io;
  use super::Mapping;
  use crate::mem::HugePages;

  const MAP_HUGE_SHIFT: i32 = 26;

  fn mmap_flags(huge: HugePages) -> i32 {
    match huge {
      HugePages::Off => 0,
      HugePages::Huge2M => libc::MAP_HUGETLB | (21 << MAP_HUGE_SHIFT),
      HugePages::Huge1G => libc::MAP_HUGETLB | (30 << MAP_HUGE_SHIFT),
    }
  }

  pub(crate) fn map(cap: usize, huge: HugePages) -> Mapping {
    let page = huge.page_size();
    if cap == 0 { return Mapping::empty(page) }
    debug_assert_eq!(cap % page, 0);
    // Safety: fresh anonymous private mapping, aliasing nothing.
    let ptr = unsafe {
      libc::mmap(
        std::ptr::null_mut(),
        cap,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | mmap_flags(huge),
        -1,
        0,
      )
    };
    if ptr == libc::MAP_FAILED {
      panic!("mmap(NULL, {cap:#x}, PROT_READ|PROT_WRITE, MAP_PRIVATE|MAP_ANONYMOUS) failed: {}",
        io::Error::last_os_error());
    }
    log::trace!("mapped {cap:#x} bytes at {ptr:p}");
    Mapping { ptr: ptr.cast(), cap, page }
  }

  pub(crate) fn remap(m: &mut Mapping, new_cap: usize, huge: HugePages) {
    debug_assert_eq!(new_cap % m.page, 0);
    match (m.cap, new_cap) {
      (old, new) if old == new => {}
      (0, _) => *m = map(new_cap, huge),
      (_, 0) => unmap(m),
      (old, new) => {
        // Safety: `m` covers exactly `old` mapped bytes; MREMAP_MAYMOVE lets
        // the kernel relocate the region if it cannot grow in place.
        let ptr = unsafe {
          libc::mremap(m.ptr.cast(), old, new, libc::MREMAP_MAYMOVE)
        };
        if ptr == libc::MAP_FAILED {
          panic!("mremap({:p}, {old:#x}, {new:#x}, MREMAP_MAYMOVE) failed: {}",
            m.ptr, io::Error::last_os_error());
        }
        log::trace!("remapped {old:#x} -> {new:#x} bytes at {ptr:p}");
        m.ptr = ptr.cast();
        m.cap = new;
      }
    }
  }

  pub(crate) fn unmap(m: &mut Mapping) {
    if m.cap == 0 { return }
    // Safety: `m` covers exactly `m.cap` mapped bytes and is not used again.
    let rc = unsafe { libc::munmap(m.ptr.cast(), m.cap) };
    if rc != 0 {
      panic!("munmap({:p}, {:#x}) failed: {}", m.ptr, m.cap, io::Error::last_os_error());
    }
    m.ptr = std::ptr::null_mut();
    m.cap = 0;
  }

  pub(crate) fn protect(m: &Mapping, r: bool, w: bool, x: bool) -> io::Result<()> {
    if m.cap == 0 { return Ok(()) }
    let mut prot = libc::PROT_NONE;
    if r { prot |= libc::PROT_READ }
    if w { prot |= libc::PROT_WRITE }
    if x { prot |= libc::PROT_EXEC }
    // Safety: `m` covers exactly `m.cap` mapped bytes.
    if unsafe { libc::mprotect(m.ptr.cast(), m.cap, prot) } != 0 {
      return Err(io::Error::last_os_error());
    }
    Ok(())
  }

  pub(crate) fn lock_ram(m: &Mapping, acquire: bool) -> io::Result<()> {
    if m.cap == 0 { return Ok(()) }
    // Safety: `m` covers exactly `m.cap` mapped bytes.
    let rc = unsafe {
      if acquire { libc::mlock(m.ptr.cast(), m.cap) } else { libc::munlock(m.ptr.cast(), m.cap) }
    };
    if rc != 0 { return Err(io::Error::last_os_error()) }
    let advice = if acquire { libc::MADV_DONTFORK } else { libc::MADV_DOFORK };
    // Safety: as above.
    if unsafe { libc::madvise(m.ptr.cast(), m.cap, advice) } != 0 {
      return Err(io::Error::last_os_error());
    }
    Ok(())
  }

  pub(crate) fn thread_id() -> u64 {
    // Safety: gettid has no preconditions.
    (unsafe { libc::gettid() }) as u64
  }
}

#[cfg(not(target_os = "linux"))]
mod imp {
  use std::alloc::{self, Layout};
  use std::io;
  use super::Mapping;
  use crate::mem::HugePages;

  fn layout(cap: usize, page: usize) -> Layout {
    Layout::from_size_align(cap, page).expect("BUG: illegal region layout")
  }

  pub(crate) fn map(cap: usize, huge: HugePages) -> Mapping {
    let page = huge.page_size();
    if cap == 0 { return Mapping::empty(page) }
    // Safety: cap is nonzero and page is a power of two.
    let ptr = unsafe { alloc::alloc_zeroed(layout(cap, page)) };
    if ptr.is_null() {
      panic!("cannot allocate a single block of {cap:#x} bytes");
    }
    Mapping { ptr, cap, page }
  }

  pub(crate) fn remap(m: &mut Mapping, new_cap: usize, huge: HugePages) {
    if m.cap == new_cap { return }
    let mut next = map(new_cap, huge);
    let keep = m.cap.min(new_cap);
    if keep != 0 {
      // Safety: both regions are live and at least `keep` bytes long.
      unsafe { std::ptr::copy_nonoverlapping(m.ptr, next.ptr, keep) }
    }
    unmap(m);
    std::mem::swap(m, &mut next);
  }

  pub(crate) fn unmap(m: &mut Mapping) {
    if m.cap == 0 { return }
    // Safety: `m.ptr` was allocated with this exact layout.
    unsafe { alloc::dealloc(m.ptr, layout(m.cap, m.page)) }
    m.ptr = std::ptr::null_mut();
    m.cap = 0;
  }

  pub(crate) fn protect(_m: &Mapping, _r: bool, _w: bool, _x: bool) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
  }

  pub(crate) fn lock_ram(_m: &Mapping, _acquire: bool) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
  }

  pub(crate) fn thread_id() -> u64 {
    use std::hash::{Hash, Hasher};
    let mut h = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut h);
    h.finish()
  }
}

pub(crate) use imp::{lock_ram, map, protect, remap, thread_id, unmap};

/// Round `n` up to the next multiple of `page` (a power of two).
pub(crate) fn page_align(n: usize, page: usize) -> usize {
  let mask = page - 1;
  n.checked_add(mask).expect("BUG: region length overflow") & !mask
}

/// Shared range check for spans and memories. `i > j` or `j > size` is a
/// caller bug, not a runtime condition.
pub(crate) fn check_ij(i: usize, j: usize, size: usize) {
  if i > j { panic!("BUG: i > j; i={i}, j={j}") }
  if j > size { panic!("BUG: j > size; j={j}, size={size}") }
}
