//! Dynamic byte buffers and string references.
//!
//! String values do not own their bytes; they are `(buffer, offset,
//! length)` references into a registry-owned [`Buffer`].

use parking_lot::RwLock;
use std::sync::Arc;

use crate::idx::BufferId;
use crate::interp::Interp;

/// A reference to a byte range inside a registry buffer. This is the
/// decoded representation of a `String`-kinded value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StrRef {
  /// The buffer holding the bytes.
  pub buffer: BufferId,
  /// The byte offset of the first byte.
  pub offset: u32,
  /// The length in bytes.
  pub length: u32,
}

/// A growable byte buffer owned by the registry.
#[derive(Debug)]
pub struct Buffer {
  id: BufferId,
  bytes: RwLock<Vec<u8>>,
}

impl Buffer {
  pub(crate) fn new(id: BufferId) -> Buffer {
    Buffer { id, bytes: RwLock::new(Vec::new()) }
  }

  /// The buffer's id in the registry.
  #[must_use] pub fn id(&self) -> BufferId { self.id }

  /// Register a new buffer with the same contents.
  #[must_use] pub fn deep_clone(&self, interp: &Interp) -> Arc<Buffer> {
    let dupe = interp.new_buffer();
    *dupe.bytes.write() = self.bytes.read().clone();
    dupe
  }

  /// Clear the buffer; `shrink` also releases the capacity.
  pub fn reset(&self, shrink: bool) {
    let mut bytes = self.bytes.write();
    if shrink {
      *bytes = Vec::new();
    } else {
      bytes.clear();
    }
  }

  /// The buffer's length in bytes.
  #[must_use] pub fn len(&self) -> usize { self.bytes.read().len() }

  /// Returns true if the buffer is empty.
  #[must_use] pub fn is_empty(&self) -> bool { self.bytes.read().is_empty() }

  /// The buffer's capacity in bytes.
  #[must_use] pub fn capacity(&self) -> usize { self.bytes.read().capacity() }

  /// A copy of the buffer's contents.
  #[must_use] pub fn bytes(&self) -> Vec<u8> { self.bytes.read().clone() }

  /// The buffer's contents as text, with invalid UTF-8 replaced.
  #[must_use] pub fn to_string_lossy(&self) -> String {
    String::from_utf8_lossy(&self.bytes.read()).into_owned()
  }

  /// Reserve capacity for at least `min` total bytes.
  pub fn grow(&self, min: usize) {
    let mut bytes = self.bytes.write();
    let len = bytes.len();
    if bytes.capacity() < min {
      bytes.reserve(min - len);
    }
  }

  /// Resize to exactly `n` bytes. Truncated bytes are zeroed before being
  /// cut off so stale contents cannot resurface on regrowth.
  pub fn truncate(&self, n: usize) {
    let mut bytes = self.bytes.write();
    let len = bytes.len();
    if n < len {
      bytes[n..].fill(0);
      bytes.truncate(n);
    } else if n > len {
      bytes.resize(n, 0);
    }
  }

  /// Append raw bytes.
  pub fn append_bytes(&self, data: &[u8]) {
    if data.is_empty() { return }
    self.bytes.write().extend_from_slice(data);
  }

  /// Append text.
  pub fn append_str(&self, data: &str) { self.append_bytes(data.as_bytes()) }

  /// Append another buffer's contents.
  pub fn append_buffer(&self, other: &Buffer) {
    if std::ptr::eq(self, other) {
      let mut bytes = self.bytes.write();
      let len = bytes.len();
      bytes.extend_from_within(..len);
      return;
    }
    let data = other.bytes.read();
    self.bytes.write().extend_from_slice(&data);
  }

  /// Run `f` over the contents under the read lock.
  pub fn with_read_lock<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
    f(&self.bytes.read())
  }

  /// Run `f` over the contents under the write lock.
  pub fn with_write_lock<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
    f(&mut self.bytes.write())
  }
}

#[cfg(test)]
mod tests {
  use crate::interp::Interp;

  #[test]
  fn append_and_truncate() {
    let interp = Interp::new();
    let buf = interp.new_buffer();
    buf.append_str("hello, ");
    buf.append_str("world");
    assert_eq!(buf.len(), 12);
    assert_eq!(buf.to_string_lossy(), "hello, world");

    buf.truncate(5);
    assert_eq!(buf.to_string_lossy(), "hello");
    buf.truncate(7);
    assert_eq!(buf.bytes(), b"hello\0\0");
  }

  #[test]
  fn deep_clone_gets_a_fresh_id() {
    let interp = Interp::new();
    let buf = interp.new_buffer();
    buf.append_str("abc");
    let dupe = buf.deep_clone(&interp);
    assert_ne!(buf.id(), dupe.id());
    assert_eq!(dupe.bytes(), b"abc");
    buf.append_str("d");
    assert_eq!(dupe.bytes(), b"abc");
  }

  #[test]
  fn self_append_doubles() {
    let interp = Interp::new();
    let buf = interp.new_buffer();
    buf.append_str("ab");
    buf.append_buffer(&buf);
    assert_eq!(buf.to_string_lossy(), "abab");
  }
}
