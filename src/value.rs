//! Typed access to raw memory: fields, layouts, and the value accessor.
//!
//! A [`Field`] names a byte range through a symbol; binding it to a
//! [`Memory`] yields a [`Value`], which decodes and encodes the range
//! according to the chased kind of the field's type, in the registry's
//! byte order (little-endian on every supported target).

use byteorder::{ByteOrder as _, LE};
use half::f16;
use hashbrown::HashMap;
use num::complex::{Complex32, Complex64};
use std::sync::Arc;

use crate::buffer::StrRef;
use crate::idx::{BufferId, ErrorId, SymbolId, TypeId};
use crate::interp::Interp;
use crate::mem::Memory;
use crate::types::{BitMask, EnumItem, TypeKind};

/// A symbol bound to a byte range: `(symbol, offset, length)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Field {
  sym: SymbolId,
  offset: usize,
  length: usize,
}

impl Field {
  /// Construct a field.
  #[must_use] pub fn new(sym: SymbolId, offset: usize, length: usize) -> Field {
    Field { sym, offset, length }
  }

  /// The symbol naming this field.
  #[must_use] pub fn symbol(&self) -> SymbolId { self.sym }

  /// The byte offset.
  #[must_use] pub fn offset(&self) -> usize { self.offset }

  /// The length in bytes.
  #[must_use] pub fn length(&self) -> usize { self.length }

  /// The field's type (its symbol's type).
  #[must_use] pub fn ty(&self, interp: &Interp) -> TypeId { interp.symbol(self.sym).ty() }

  /// The field's canonical name (its symbol's canonical name).
  #[must_use] pub fn canonical_name(&self, interp: &Interp) -> String {
    interp.symbol(self.sym).canonical_name().to_owned()
  }

  /// Bind the field to a memory.
  #[must_use] pub fn bind(&self, mem: &Arc<Memory>) -> Value {
    Value { field: *self, mem: mem.clone() }
  }
}

/// A collection of placed fields with the layout facts of the whole.
#[derive(Debug, Default)]
pub struct Layout {
  fields: Vec<Field>,
  by_symbol: HashMap<SymbolId, usize>,
  by_offset: HashMap<usize, usize>,
  align_shift: u8,
  min_size: u16,
  pad_size: u16,
}

impl Layout {
  /// Construct a layout from placed fields.
  #[must_use] pub fn new(fields: Vec<Field>, align_shift: u32, min_size: usize, pad_size: usize) -> Layout {
    let mut by_symbol = HashMap::with_capacity(fields.len());
    let mut by_offset = HashMap::with_capacity(fields.len());
    for (index, field) in fields.iter().enumerate() {
      by_symbol.insert(field.symbol(), index);
      by_offset.insert(field.offset(), index);
    }
    Layout {
      fields,
      by_symbol,
      by_offset,
      align_shift: align_shift as u8,
      min_size: min_size as u16,
      pad_size: pad_size as u16,
    }
  }

  /// log2 of the layout's alignment.
  #[must_use] pub fn align_shift(&self) -> u32 { u32::from(self.align_shift) }

  /// The layout's minimum size in bytes.
  #[must_use] pub fn minimum_size(&self) -> usize { usize::from(self.min_size) }

  /// The layout's padded size in bytes.
  #[must_use] pub fn padded_size(&self) -> usize { usize::from(self.pad_size) }

  /// The placed fields.
  #[must_use] pub fn fields(&self) -> &[Field] { &self.fields }

  /// Look a field up by its symbol.
  #[must_use] pub fn field_by_symbol(&self, sym: SymbolId) -> Option<&Field> {
    self.by_symbol.get(&sym).map(|&i| &self.fields[i])
  }

  /// Look a field up by its offset.
  #[must_use] pub fn field_by_offset(&self, offset: usize) -> Option<&Field> {
    self.by_offset.get(&offset).map(|&i| &self.fields[i])
  }
}

/// A decoded (or encodable) value, tagged by the chased kind it came from.
#[derive(Clone, Debug, PartialEq)]
pub enum Datum {
  /// A type id (the `Type` kind).
  Type(Option<TypeId>),
  /// An unsigned 8-bit integer.
  U8(u8),
  /// An unsigned 16-bit integer.
  U16(u16),
  /// An unsigned 32-bit integer.
  U32(u32),
  /// An unsigned 64-bit integer.
  U64(u64),
  /// A signed 8-bit integer.
  S8(i8),
  /// A signed 16-bit integer.
  S16(i16),
  /// A signed 32-bit integer.
  S32(i32),
  /// A signed 64-bit integer.
  S64(i64),
  /// A binary16 float.
  F16(f16),
  /// A binary32 float.
  F32(f32),
  /// A binary64 float.
  F64(f64),
  /// A complex number stored as two binary16 halves.
  C32(Complex32),
  /// A complex number stored as two binary32 halves.
  C64(Complex32),
  /// A complex number stored as two binary64 halves.
  C128(Complex64),
  /// A string reference, or `None` when the slot is empty or stale.
  Str(Option<StrRef>),
  /// A runtime error id, or `None` when the slot is empty or stale.
  Error(Option<ErrorId>),
  /// An enum item, or `None` when the stored number matches no item.
  Enum(Option<EnumItem>),
  /// A bitfield mask.
  Bits(BitMask),
}

/// A field bound to a memory.
#[derive(Clone, Debug)]
pub struct Value {
  field: Field,
  mem: Arc<Memory>,
}

impl Value {
  /// The bound field.
  #[must_use] pub fn field(&self) -> &Field { &self.field }

  /// The bound memory.
  #[must_use] pub fn memory(&self) -> &Arc<Memory> { &self.mem }

  /// Run `f` over the field's bytes under the read lock.
  pub fn with_read_lock<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
    self.mem.with_read_lock(self.field.offset(), self.field.length(), f)
  }

  /// Run `f` over the field's bytes under the write lock.
  pub fn with_write_lock<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
    self.mem.with_write_lock(self.field.offset(), self.field.length(), f)
  }

  /// Zero the field's bytes.
  pub fn reset_to_zero(&self) {
    self.with_write_lock(|bytes| bytes.fill(0));
  }

  /// Decode the field per the chased kind of its type.
  #[must_use] pub fn get(&self, interp: &Interp) -> Datum {
    let chased = interp.ty(interp.chase(self.field.ty(interp)));
    let kind = chased.kind();

    self.with_read_lock(|bytes| match kind {
      TypeKind::Reflected => {
        // zero means no type; ids are stored off by one
        let id = LE::read_u32(bytes).checked_sub(1).map(TypeId);
        Datum::Type(id.filter(|&id| interp.type_by_id(id).is_some()))
      }
      TypeKind::U8 => Datum::U8(bytes[0]),
      TypeKind::U16 => Datum::U16(LE::read_u16(bytes)),
      TypeKind::U32 => Datum::U32(LE::read_u32(bytes)),
      TypeKind::U64 => Datum::U64(LE::read_u64(bytes)),
      TypeKind::S8 => Datum::S8(bytes[0] as i8),
      TypeKind::S16 => Datum::S16(LE::read_u16(bytes) as i16),
      TypeKind::S32 => Datum::S32(LE::read_u32(bytes) as i32),
      TypeKind::S64 => Datum::S64(LE::read_u64(bytes) as i64),
      TypeKind::F16 => Datum::F16(f16::from_bits(LE::read_u16(bytes))),
      TypeKind::F32 => Datum::F32(f32::from_bits(LE::read_u32(bytes))),
      TypeKind::F64 => Datum::F64(f64::from_bits(LE::read_u64(bytes))),
      TypeKind::C32 => {
        let re = f16::from_bits(LE::read_u16(&bytes[0..2])).to_f32();
        let im = f16::from_bits(LE::read_u16(&bytes[2..4])).to_f32();
        Datum::C32(Complex32::new(re, im))
      }
      TypeKind::C64 => {
        let re = f32::from_bits(LE::read_u32(&bytes[0..4]));
        let im = f32::from_bits(LE::read_u32(&bytes[4..8]));
        Datum::C64(Complex32::new(re, im))
      }
      TypeKind::C128 => {
        let re = f64::from_bits(LE::read_u64(&bytes[0..8]));
        let im = f64::from_bits(LE::read_u64(&bytes[8..16]));
        Datum::C128(Complex64::new(re, im))
      }

      TypeKind::String => {
        let raw = LE::read_u32(&bytes[0..4]);
        let offset = LE::read_u32(&bytes[4..8]);
        let length = LE::read_u32(&bytes[8..12]);
        // zero means no buffer; ids are stored off by one
        let buffer = raw.checked_sub(1).map(BufferId);
        Datum::Str(buffer.filter(|&id| interp.buffer(id).is_some()).map(|buffer| StrRef {
          buffer, offset, length,
        }))
      }

      TypeKind::Error => {
        let raw = LE::read_u32(bytes);
        let id = raw.checked_sub(1).map(ErrorId);
        Datum::Error(id.filter(|&id| interp.error(id).is_some()))
      }

      TypeKind::Enum => {
        let def = chased.enum_def();
        let number = match def.kind() {
          TypeKind::U8 => i64::from(bytes[0]),
          TypeKind::U16 => i64::from(LE::read_u16(bytes)),
          TypeKind::U32 => i64::from(LE::read_u32(bytes)),
          TypeKind::U64 => LE::read_u64(bytes) as i64,
          TypeKind::S8 => i64::from(bytes[0] as i8),
          TypeKind::S16 => i64::from(LE::read_u16(bytes) as i16),
          TypeKind::S32 => i64::from(LE::read_u32(bytes) as i32),
          TypeKind::S64 => LE::read_u64(bytes) as i64,
          kind => panic!("BUG: Value::get: unknown enum backing kind {kind}"),
        };
        Datum::Enum(def.by_number(number).cloned())
      }

      TypeKind::Bitfield => {
        let def = chased.bitfield_def();
        let bits = match def.kind() {
          TypeKind::U8 => u64::from(bytes[0]),
          TypeKind::U16 => u64::from(LE::read_u16(bytes)),
          TypeKind::U32 => u64::from(LE::read_u32(bytes)),
          TypeKind::U64 => LE::read_u64(bytes),
          kind => panic!("BUG: Value::get: unknown bitfield backing kind {kind}"),
        };
        Datum::Bits(BitMask { parent: chased.id(), bits })
      }

      kind => panic!("BUG: Value::get: kind {kind} not implemented"),
    })
  }

  /// Encode `input` into the field per the chased kind of its type. A
  /// datum of the wrong shape, or an enum/bitfield datum belonging to a
  /// different type, is a bug.
  pub fn set(&self, interp: &Interp, input: &Datum) {
    let chased = interp.ty(interp.chase(self.field.ty(interp)));
    let kind = chased.kind();

    self.with_write_lock(|bytes| match (kind, input) {
      (TypeKind::Reflected, Datum::Type(t)) =>
        LE::write_u32(bytes, t.map_or(0, |t| t.0 + 1)),
      (TypeKind::U8, Datum::U8(n)) => bytes[0] = *n,
      (TypeKind::U16, Datum::U16(n)) => LE::write_u16(bytes, *n),
      (TypeKind::U32, Datum::U32(n)) => LE::write_u32(bytes, *n),
      (TypeKind::U64, Datum::U64(n)) => LE::write_u64(bytes, *n),
      (TypeKind::S8, Datum::S8(n)) => bytes[0] = *n as u8,
      (TypeKind::S16, Datum::S16(n)) => LE::write_u16(bytes, *n as u16),
      (TypeKind::S32, Datum::S32(n)) => LE::write_u32(bytes, *n as u32),
      (TypeKind::S64, Datum::S64(n)) => LE::write_u64(bytes, *n as u64),
      (TypeKind::F16, Datum::F16(x)) => LE::write_u16(bytes, x.to_bits()),
      (TypeKind::F32, Datum::F32(x)) => LE::write_u32(bytes, x.to_bits()),
      (TypeKind::F64, Datum::F64(x)) => LE::write_u64(bytes, x.to_bits()),
      (TypeKind::C32, Datum::C32(x)) => {
        LE::write_u16(&mut bytes[0..2], f16::from_f32(x.re).to_bits());
        LE::write_u16(&mut bytes[2..4], f16::from_f32(x.im).to_bits());
      }
      (TypeKind::C64, Datum::C64(x)) => {
        LE::write_u32(&mut bytes[0..4], x.re.to_bits());
        LE::write_u32(&mut bytes[4..8], x.im.to_bits());
      }
      (TypeKind::C128, Datum::C128(x)) => {
        LE::write_u64(&mut bytes[0..8], x.re.to_bits());
        LE::write_u64(&mut bytes[8..16], x.im.to_bits());
      }

      (TypeKind::String, Datum::Str(s)) => {
        let (buffer, offset, length) = match s {
          Some(s) => (s.buffer.0 + 1, s.offset, s.length),
          None => (0, 0, 0),
        };
        LE::write_u32(&mut bytes[0..4], buffer);
        LE::write_u32(&mut bytes[4..8], offset);
        LE::write_u32(&mut bytes[8..12], length);
      }

      (TypeKind::Error, Datum::Error(e)) =>
        LE::write_u32(bytes, e.map_or(0, |e| e.0 + 1)),

      (TypeKind::Enum, input) => {
        let def = chased.enum_def();
        let number = match input {
          Datum::Enum(None) => 0,
          Datum::Enum(Some(item)) => {
            if item.parent() != chased.id() {
              panic!("BUG: Value::set: enum item {item} belongs to {}, not {}",
                item.parent(), chased.id());
            }
            item.number()
          }
          Datum::S64(n) => *n,
          Datum::U64(n) => *n as i64,
          other => panic!("BUG: Value::set: expected an enum item, got {other:?}"),
        };
        match def.kind() {
          TypeKind::U8 | TypeKind::S8 => bytes[0] = number as u8,
          TypeKind::U16 | TypeKind::S16 => LE::write_u16(bytes, number as u16),
          TypeKind::U32 | TypeKind::S32 => LE::write_u32(bytes, number as u32),
          TypeKind::U64 | TypeKind::S64 => LE::write_u64(bytes, number as u64),
          kind => panic!("BUG: Value::set: unknown enum backing kind {kind}"),
        }
      }

      (TypeKind::Bitfield, input) => {
        let def = chased.bitfield_def();
        let bits = match input {
          Datum::Bits(mask) => {
            if mask.parent != chased.id() {
              panic!("BUG: Value::set: bit mask belongs to {}, not {}",
                mask.parent, chased.id());
            }
            mask.bits
          }
          Datum::U64(n) => *n,
          other => panic!("BUG: Value::set: expected a bit mask, got {other:?}"),
        };
        match def.kind() {
          TypeKind::U8 => bytes[0] = bits as u8,
          TypeKind::U16 => LE::write_u16(bytes, bits as u16),
          TypeKind::U32 => LE::write_u32(bytes, bits as u32),
          TypeKind::U64 => LE::write_u64(bytes, bits),
          kind => panic!("BUG: Value::set: unknown bitfield backing kind {kind}"),
        }
      }

      (kind, other) => panic!("BUG: Value::set: cannot store {other:?} into kind {kind}"),
    });
  }
}
