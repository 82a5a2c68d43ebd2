//! Struct construction and layout.
//!
//! By default fields are packed: sorted by (alignment desc, size desc,
//! declaration order) and placed first-fit at offsets that are multiples of
//! their alignment, using a byte-granular occupancy vector. The
//! `#preserve_order` pragma switches to C-style sequential layout.

use bit_vec::BitVec;
use bitflags::bitflags;

use crate::idx::TypeId;
use crate::interp::{Interp, KeyedCache};
use crate::types::statement::{Statement, StatementContext, StatementKind, Statements};
use crate::types::{Type, TypeDetails, TypeKind, MAX_STRUCT_SIZE};

bitflags! {
  /// The generated members a composite type's pragmas opted out of.
  #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
  pub struct OmitFlags: u8 {
    /// `#omit_new`
    const NEW = 1 << 0;
    /// `#omit_copy`
    const COPY = 1 << 1;
    /// `#omit_move` (implies `COPY`)
    const MOVE = 1 << 2;
    /// `#omit_hash`
    const HASH = 1 << 3;
    /// `#omit_compare`
    const COMPARE = 1 << 4;
    /// `#omit_to_string`
    const TO_STRING = 1 << 5;
    /// `#omit_to_repr`
    const TO_REPR = 1 << 6;
  }
}

/// One placed struct field.
#[derive(Clone, Debug)]
pub struct StructField {
  pub(crate) name: String,
  pub(crate) ty: TypeId,
  pub(crate) offset: u16,
  pub(crate) length: u16,
  pub(crate) original_index: u32,
}

impl StructField {
  /// The field's name.
  #[must_use] pub fn name(&self) -> &str { &self.name }

  /// The field's type.
  #[must_use] pub fn ty(&self) -> TypeId { self.ty }

  /// The field's byte offset within the struct.
  #[must_use] pub fn offset(&self) -> usize { usize::from(self.offset) }

  /// The field's length in bytes.
  #[must_use] pub fn length(&self) -> usize { usize::from(self.length) }
}

/// The payload of a struct type.
#[derive(Debug)]
pub struct StructDef {
  pub(crate) list: Statements,
  pub(crate) fields: Vec<StructField>,
  pub(crate) align_shift: u8,
  pub(crate) min_size: u16,
  pub(crate) omit: OmitFlags,
}

impl StructDef {
  pub(crate) fn empty() -> StructDef {
    StructDef {
      list: Statements::default(),
      fields: Vec::new(),
      align_shift: 0,
      min_size: 0,
      omit: OmitFlags::empty(),
    }
  }

  /// The statements this struct was built from.
  #[must_use] pub fn statements(&self) -> &Statements { &self.list }

  /// The placed fields.
  #[must_use] pub fn fields(&self) -> &[StructField] { &self.fields }

  /// Look a field up by name.
  #[must_use] pub fn field_by_name(&self, name: &str) -> Option<&StructField> {
    self.fields.iter().find(|field| field.name == name)
  }

  /// log2 of the struct's alignment.
  #[must_use] pub fn align_shift(&self) -> u32 { u32::from(self.align_shift) }

  /// The struct's minimum size in bytes.
  #[must_use] pub fn minimum_size(&self) -> usize { usize::from(self.min_size) }

  /// The omitted generated members.
  #[must_use] pub fn omitted(&self) -> OmitFlags { self.omit }
}

/// The pragma settings shared by struct and union layout.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct LayoutPragmas {
  pub explicit_align: Option<u32>,
  pub explicit_min_size: Option<usize>,
  pub strict_order: bool,
  pub omit: OmitFlags,
}

impl LayoutPragmas {
  /// Collect one pragma statement; returns false if `stmt` is not a
  /// pragma.
  pub(crate) fn collect(&mut self, stmt: &Statement) -> bool {
    match stmt.kind {
      StatementKind::AlignPragma => self.explicit_align = Some(stmt.min_align),
      StatementKind::MinimumSizePragma => self.explicit_min_size = Some(stmt.min_size),
      StatementKind::PreserveFieldOrderPragma => self.strict_order = true,
      StatementKind::OmitNewPragma => self.omit |= OmitFlags::NEW,
      StatementKind::OmitCopyPragma => self.omit |= OmitFlags::COPY,
      StatementKind::OmitMovePragma => self.omit |= OmitFlags::COPY | OmitFlags::MOVE,
      StatementKind::OmitHashPragma => self.omit |= OmitFlags::HASH,
      StatementKind::OmitComparePragma => self.omit |= OmitFlags::COMPARE,
      StatementKind::OmitToStringPragma => self.omit |= OmitFlags::TO_STRING,
      StatementKind::OmitToReprPragma => self.omit |= OmitFlags::TO_REPR,
      _ => return false,
    }
    true
  }
}

/// A byte-granular occupancy map for one layout region.
pub(crate) struct Occupancy {
  used: BitVec,
  bytes_total: usize,
}

impl Occupancy {
  pub(crate) fn new() -> Occupancy {
    Occupancy { used: BitVec::new(), bytes_total: 0 }
  }

  pub(crate) fn bytes_total(&self) -> usize { self.bytes_total }

  pub(crate) fn is_available(&self, start: usize, length: usize) -> bool {
    let end = (start + length).min(self.bytes_total);
    (start..end).all(|i| !self.used[i])
  }

  pub(crate) fn grow(&mut self, new_bytes_total: usize) {
    if new_bytes_total <= self.bytes_total { return }
    self.used.grow(new_bytes_total - self.used.len(), false);
    self.bytes_total = new_bytes_total;
  }

  pub(crate) fn claim(&mut self, start: usize, length: usize) {
    self.grow(start + length);
    for i in start..start + length {
      self.used.set(i, true);
    }
  }

  /// Round the live end of the region up to `align_bytes` (strict-order
  /// placement).
  pub(crate) fn round_up(&mut self, align_shift: u32) -> usize {
    let align_mask = (1usize << align_shift) - 1;
    self.bytes_total = (self.bytes_total + align_mask) & !align_mask;
    self.bytes_total
  }

  /// First-fit probe: the lowest multiple of the field's alignment where
  /// `length` free bytes start.
  pub(crate) fn probe(&self, align_shift: u32, length: usize) -> usize {
    let align_bytes = 1usize << align_shift;
    let mut start = 0;
    while !self.is_available(start, length) {
      start += align_bytes;
    }
    start
  }
}

impl Interp {
  /// Get or build the struct type described by `list`. Identical lists
  /// return the identical type; concurrent identical calls block until the
  /// first finishes building.
  pub fn struct_type(&self, mut list: Statements) -> TypeId {
    list.check(StatementContext::Struct);
    list.sort();
    let key = list.key(self);

    if let Some(out) = self.keyed_cache_lookup(KeyedCache::Struct, &key) {
      return out;
    }

    let module = self.builtin_struct_module();
    let out = self
      .create_type(
        module.symbols(),
        self.hashed_symbol_data(&key),
        |interp, t| calculate_struct(interp, t, list),
      )
      .unwrap_or_else(|e| panic!("BUG: {e}"));

    self.keyed_cache_publish(KeyedCache::Struct, key, out);
    out
  }
}

fn calculate_struct(interp: &Interp, t: &mut Type, list: Statements) {
  let mut pragmas = LayoutPragmas::default();
  let mut fields: Vec<StructField> = Vec::with_capacity(list.len());
  let mut worst_case = 0usize;

  for stmt in list.iter() {
    if pragmas.collect(stmt) { continue }
    if stmt.kind == StatementKind::StructField {
      let ty = stmt.field_type.expect("BUG: missing field_type");
      fields.push(StructField {
        name: stmt.field_name.clone(),
        ty,
        offset: !0,
        length: !0,
        original_index: stmt.original_index,
      });
      worst_case += interp.ty(ty).padded_bytes();
    }
  }

  if worst_case > MAX_STRUCT_SIZE {
    panic!("BUG: struct is too large: {worst_case} bytes > {MAX_STRUCT_SIZE} bytes maximum");
  }

  let mut occupancy = Occupancy::new();
  let mut computed_align = 0u32;

  if pragmas.strict_order {
    for field in &mut fields {
      let field_ty = interp.ty(field.ty);
      let min_bytes = field_ty.minimum_bytes();
      let align_shift = field_ty.align_shift();
      computed_align = computed_align.max(align_shift);

      let start = occupancy.round_up(align_shift);
      field.offset = start as u16;
      field.length = min_bytes as u16;
      occupancy.claim(start, min_bytes);
    }
  } else {
    fields.sort_by(|a, b| {
      let (a_ty, b_ty) = (interp.ty(a.ty), interp.ty(b.ty));
      b_ty.align_shift().cmp(&a_ty.align_shift())
        .then(b_ty.minimum_bytes().cmp(&a_ty.minimum_bytes()))
        .then(a.original_index.cmp(&b.original_index))
    });

    for field in &mut fields {
      let field_ty = interp.ty(field.ty);
      let min_bytes = field_ty.minimum_bytes();
      let align_shift = field_ty.align_shift();
      computed_align = computed_align.max(align_shift);

      let start = occupancy.probe(align_shift, min_bytes);
      field.offset = start as u16;
      field.length = min_bytes as u16;
      occupancy.claim(start, min_bytes);
    }
  }

  let actual_align = finish_layout(&mut occupancy, &pragmas, computed_align);
  let bytes_total = occupancy.bytes_total();

  t.kind = TypeKind::Struct;
  t.align_shift = actual_align as u8;
  t.min_size = bytes_total as u16;
  t.pad_size = pad_size(actual_align, bytes_total) as u16;
  t.details = TypeDetails::Struct(StructDef {
    list,
    fields,
    align_shift: actual_align as u8,
    min_size: bytes_total as u16,
    omit: pragmas.omit,
  });
}

pub(crate) fn finish_layout(
  occupancy: &mut Occupancy, pragmas: &LayoutPragmas, computed_align: u32,
) -> u32 {
  let mut actual_align = computed_align;
  if let Some(explicit) = pragmas.explicit_align {
    actual_align = actual_align.max(explicit);
  }
  if let Some(explicit) = pragmas.explicit_min_size {
    occupancy.grow(explicit);
  }
  actual_align
}

/// The smallest positive multiple of `2^align_shift` that is at least
/// `min_size`.
pub(crate) fn pad_size(align_shift: u32, min_size: usize) -> usize {
  let align_bytes = 1usize << align_shift;
  let mut pad = align_bytes;
  while pad < min_size {
    pad += align_bytes;
  }
  pad
}
