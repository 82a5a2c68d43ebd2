//! The declarative, grammar-free description of composite-type contents.
//!
//! A [`Statements`] list is the sole input to enum, bitfield, struct and
//! union construction. Each [`Statement`] is a flat record tagged by a
//! [`StatementKind`]; a validation pass enforces that exactly the fields
//! the kind permits are set, and a deterministic [`key`](Statements::key)
//! string over the sorted list is the content identity used for registry
//! deduplication.

use std::fmt::Write as _;

use hashbrown::HashMap;

use crate::idx::{FuncSigId, SymbolId, TypeId};
use crate::interp::Interp;
use crate::mangle::is_symbol_name;
use crate::types::{EnumItem, TypeKind, MAX_ALIGN_SHIFT, MAX_STRUCT_SIZE};

/// The kind tag of a [`Statement`]. The discriminant order is the sort
/// order of a normalized list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatementKind {
  /// The uninitialized kind; always illegal.
  #[default] Invalid,

  /// `#align(n)`: raise the type's alignment shift.
  AlignPragma,
  /// `#min_size(n)`: raise the type's minimum size.
  MinimumSizePragma,
  /// `#preserve_order`: lay fields out in declaration order.
  PreserveFieldOrderPragma,

  /// Omit the generated constructor.
  OmitNewPragma,
  /// Omit the generated copy.
  OmitCopyPragma,
  /// Omit the generated move (implies omitting copy).
  OmitMovePragma,
  /// Omit the generated hash.
  OmitHashPragma,
  /// Omit the generated comparison.
  OmitComparePragma,
  /// Omit the generated to-string.
  OmitToStringPragma,
  /// Omit the generated to-repr.
  OmitToReprPragma,

  /// A static constant member.
  StaticConstant,
  /// An instance constant member.
  InstanceConstant,
  /// A static field member.
  StaticField,

  /// The backing integer kind of an enum.
  EnumKind,
  /// One enum item.
  EnumValue,
  /// An alias for an existing enum item.
  EnumAlias,

  /// The backing integer kind of a bitfield.
  BitfieldKind,
  /// One bitfield item, by shift.
  BitfieldValue,
  /// An alias for an existing bitfield item.
  BitfieldAlias,

  /// One struct field.
  StructField,

  /// The union's tag symbol and tag type.
  UnionTag,
  /// One union field, scoped to a tag item.
  UnionField,

  /// An interface field.
  InterfaceField,
  /// An interface property.
  InterfaceProperty,
  /// An interface method.
  InterfaceMethod,
}

/// The composite-type context a statement list is validated against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatementContext {
  /// Enum bodies.
  Enum,
  /// Bitfield bodies.
  Bitfield,
  /// Struct bodies.
  Struct,
  /// Union bodies.
  Union,
  /// Interface bodies.
  Interface,
  /// Function bodies (no statements are currently legal).
  Function,
}

/// A compile-time constant carried by a constant statement. Participates in
/// the statements key.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstValue {
  /// An unsigned integer.
  Uint(u64),
  /// A signed integer.
  Int(i64),
  /// A string.
  Str(String),
}

impl ConstValue {
  /// The deterministic encoding of this value inside a statements key.
  #[must_use] pub fn key(&self) -> String {
    match self {
      ConstValue::Uint(n) => format!("u{n}"),
      ConstValue::Int(n) => format!("i{n}"),
      ConstValue::Str(s) => format!("s{}:{s}", s.len()),
    }
  }
}

/// One element of a composite-type body. Only the fields permitted by
/// `kind` may be set; everything else must stay at its default.
#[derive(Clone, Debug, Default)]
pub struct Statement {
  /// The kind tag.
  pub kind: StatementKind,

  /// Alignment shift for [`StatementKind::AlignPragma`].
  pub min_align: u32,
  /// Byte size for [`StatementKind::MinimumSizePragma`].
  pub min_size: usize,

  /// Item name for enum/bitfield value and alias statements.
  pub enum_name: String,
  /// Target item name for alias statements.
  pub enum_alias_of: String,
  /// Item number (or shift, for bitfields) for value statements.
  pub enum_number: i64,
  /// Backing kind for enum/bitfield kind statements.
  pub enum_kind: TypeKind,

  /// Tag symbol for [`StatementKind::UnionTag`].
  pub tag_symbol: Option<SymbolId>,
  /// Tag type for [`StatementKind::UnionTag`].
  pub tag_type: Option<TypeId>,
  /// Tag item for [`StatementKind::UnionField`].
  pub tag_item: Option<EnumItem>,

  /// Member name for field and constant statements.
  pub field_name: String,
  /// Member type for field and constant statements.
  pub field_type: Option<TypeId>,
  /// Constant value for constant statements.
  pub field_value: Option<ConstValue>,

  /// Method name for [`StatementKind::InterfaceMethod`].
  pub method_name: String,
  /// Method signature for [`StatementKind::InterfaceMethod`].
  pub method_signature: Option<FuncSigId>,

  pub(crate) original_index: u32,
}

fn legal_in(kind: StatementKind, context: StatementContext) -> bool {
  use StatementContext as C;
  use StatementKind as K;
  match kind {
    K::OmitHashPragma | K::OmitComparePragma | K::OmitToStringPragma | K::OmitToReprPragma
    | K::StaticConstant | K::InstanceConstant | K::StaticField =>
      matches!(context, C::Enum | C::Bitfield | C::Struct | C::Union),

    K::AlignPragma | K::MinimumSizePragma | K::PreserveFieldOrderPragma
    | K::OmitNewPragma | K::OmitCopyPragma | K::OmitMovePragma =>
      matches!(context, C::Struct | C::Union),

    K::EnumKind | K::EnumValue | K::EnumAlias => context == C::Enum,
    K::BitfieldKind | K::BitfieldValue | K::BitfieldAlias => context == C::Bitfield,
    K::StructField => context == C::Struct,
    K::UnionTag | K::UnionField => context == C::Union,
    K::InterfaceField | K::InterfaceProperty | K::InterfaceMethod => context == C::Interface,
    K::Invalid => false,
  }
}

fn single_occurrence(kind: StatementKind) -> bool {
  use StatementKind as K;
  matches!(kind,
    K::AlignPragma | K::MinimumSizePragma | K::PreserveFieldOrderPragma
    | K::OmitNewPragma | K::OmitCopyPragma | K::OmitMovePragma | K::OmitHashPragma
    | K::OmitComparePragma | K::OmitToStringPragma | K::OmitToReprPragma
    | K::EnumKind | K::BitfieldKind | K::UnionTag)
}

/// Which optional fields a statement kind is allowed to populate.
#[derive(Default)]
struct LegalFields {
  min_align: bool,
  min_size: bool,
  enum_name: bool,
  enum_alias: bool,
  enum_number: bool,
  enum_kind: bool,
  tag_symbol: bool,
  tag_type: bool,
  tag_item: bool,
  field_name: bool,
  field_type: bool,
  field_value: bool,
  method: bool,
}

fn legal_fields(kind: StatementKind) -> LegalFields {
  use StatementKind as K;
  let mut legal = LegalFields::default();
  match kind {
    K::AlignPragma => legal.min_align = true,
    K::MinimumSizePragma => legal.min_size = true,

    K::PreserveFieldOrderPragma | K::OmitNewPragma | K::OmitCopyPragma | K::OmitMovePragma
    | K::OmitHashPragma | K::OmitComparePragma | K::OmitToStringPragma | K::OmitToReprPragma => {}

    K::StaticConstant | K::InstanceConstant => {
      legal.field_name = true;
      legal.field_type = true;
      legal.field_value = true;
    }
    K::StaticField => {
      legal.field_name = true;
      legal.field_type = true;
    }

    K::EnumKind | K::BitfieldKind => legal.enum_kind = true,
    K::EnumValue | K::BitfieldValue => {
      legal.enum_name = true;
      legal.enum_number = true;
    }
    K::EnumAlias | K::BitfieldAlias => {
      legal.enum_name = true;
      legal.enum_alias = true;
    }

    K::StructField => {
      legal.field_name = true;
      legal.field_type = true;
    }

    K::UnionTag => {
      legal.tag_symbol = true;
      legal.tag_type = true;
    }
    K::UnionField => {
      legal.tag_item = true;
      legal.field_name = true;
      legal.field_type = true;
    }

    K::InterfaceField | K::InterfaceProperty => {
      legal.field_name = true;
      legal.field_type = true;
    }
    K::InterfaceMethod => legal.method = true,

    K::Invalid => panic!("BUG: kind {kind:?} not implemented"),
  }
  legal
}

impl Statement {
  /// A pragma statement with no payload (`#preserve_order`, the
  /// `#omit_*` family). A payload-bearing kind is a bug.
  #[must_use] pub fn pragma(kind: StatementKind) -> Statement {
    use StatementKind as K;
    if !matches!(kind,
      K::PreserveFieldOrderPragma | K::OmitNewPragma | K::OmitCopyPragma | K::OmitMovePragma
      | K::OmitHashPragma | K::OmitComparePragma | K::OmitToStringPragma | K::OmitToReprPragma)
    {
      panic!("BUG: kind {kind:?} is not a bare pragma");
    }
    Statement { kind, ..Statement::default() }
  }

  /// `#align(shift)`.
  #[must_use] pub fn align_pragma(min_align: u32) -> Statement {
    Statement { kind: StatementKind::AlignPragma, min_align, ..Statement::default() }
  }

  /// `#min_size(bytes)`.
  #[must_use] pub fn min_size_pragma(min_size: usize) -> Statement {
    Statement { kind: StatementKind::MinimumSizePragma, min_size, ..Statement::default() }
  }

  /// The backing kind of an enum.
  #[must_use] pub fn enum_kind(kind: TypeKind) -> Statement {
    Statement { kind: StatementKind::EnumKind, enum_kind: kind, ..Statement::default() }
  }

  /// One enum item.
  #[must_use] pub fn enum_value(name: &str, number: i64) -> Statement {
    Statement {
      kind: StatementKind::EnumValue,
      enum_name: name.to_owned(),
      enum_number: number,
      ..Statement::default()
    }
  }

  /// An alias for an existing enum item.
  #[must_use] pub fn enum_alias(name: &str, alias_of: &str) -> Statement {
    Statement {
      kind: StatementKind::EnumAlias,
      enum_name: name.to_owned(),
      enum_alias_of: alias_of.to_owned(),
      ..Statement::default()
    }
  }

  /// The backing kind of a bitfield.
  #[must_use] pub fn bitfield_kind(kind: TypeKind) -> Statement {
    Statement { kind: StatementKind::BitfieldKind, enum_kind: kind, ..Statement::default() }
  }

  /// One bitfield item at a bit position.
  #[must_use] pub fn bitfield_value(name: &str, shift: i64) -> Statement {
    Statement {
      kind: StatementKind::BitfieldValue,
      enum_name: name.to_owned(),
      enum_number: shift,
      ..Statement::default()
    }
  }

  /// An alias for an existing bitfield item.
  #[must_use] pub fn bitfield_alias(name: &str, alias_of: &str) -> Statement {
    Statement {
      kind: StatementKind::BitfieldAlias,
      enum_name: name.to_owned(),
      enum_alias_of: alias_of.to_owned(),
      ..Statement::default()
    }
  }

  /// One struct field.
  #[must_use] pub fn struct_field(name: &str, ty: TypeId) -> Statement {
    Statement {
      kind: StatementKind::StructField,
      field_name: name.to_owned(),
      field_type: Some(ty),
      ..Statement::default()
    }
  }

  /// One static field.
  #[must_use] pub fn static_field(name: &str, ty: TypeId) -> Statement {
    Statement {
      kind: StatementKind::StaticField,
      field_name: name.to_owned(),
      field_type: Some(ty),
      ..Statement::default()
    }
  }

  /// The union's tag declaration.
  #[must_use] pub fn union_tag(tag_symbol: SymbolId, tag_type: TypeId) -> Statement {
    Statement {
      kind: StatementKind::UnionTag,
      tag_symbol: Some(tag_symbol),
      tag_type: Some(tag_type),
      ..Statement::default()
    }
  }

  /// One union field scoped to a tag item.
  #[must_use] pub fn union_field(tag_item: EnumItem, name: &str, ty: TypeId) -> Statement {
    Statement {
      kind: StatementKind::UnionField,
      tag_item: Some(tag_item),
      field_name: name.to_owned(),
      field_type: Some(ty),
      ..Statement::default()
    }
  }

  /// Validate this statement against a context. Any illegal kind, illegal
  /// field, or malformed name is a bug.
  pub fn check(&self, context: StatementContext) {
    if !legal_in(self.kind, context) {
      panic!("BUG: kind {:?} is not permitted inside {context:?}", self.kind);
    }

    let legal = legal_fields(self.kind);

    if !legal.min_align && self.min_align != 0 {
      panic!("BUG: kind {:?} does not allow min_align {}", self.kind, self.min_align);
    }
    if self.min_align > MAX_ALIGN_SHIFT {
      panic!("BUG: kind {:?} has min_align {} > {MAX_ALIGN_SHIFT}", self.kind, self.min_align);
    }

    if !legal.min_size && self.min_size != 0 {
      panic!("BUG: kind {:?} does not allow min_size {}", self.kind, self.min_size);
    }
    if self.min_size > MAX_STRUCT_SIZE {
      panic!("BUG: kind {:?} has min_size {} > {MAX_STRUCT_SIZE}", self.kind, self.min_size);
    }

    if legal.enum_name {
      if !is_symbol_name(&self.enum_name) {
        panic!("BUG: kind {:?} has invalid enum_name {:?}", self.kind, self.enum_name);
      }
    } else if !self.enum_name.is_empty() {
      panic!("BUG: kind {:?} does not allow enum_name {:?}", self.kind, self.enum_name);
    }

    if legal.enum_alias {
      if !is_symbol_name(&self.enum_alias_of) {
        panic!("BUG: kind {:?} has invalid enum_alias_of {:?}", self.kind, self.enum_alias_of);
      }
    } else if !self.enum_alias_of.is_empty() {
      panic!("BUG: kind {:?} does not allow enum_alias_of {:?}", self.kind, self.enum_alias_of);
    }

    if !legal.enum_number && self.enum_number != 0 {
      panic!("BUG: kind {:?} does not allow enum_number {}", self.kind, self.enum_number);
    }

    if !legal.enum_kind && self.enum_kind != TypeKind::Invalid {
      panic!("BUG: kind {:?} does not allow enum_kind {}", self.kind, self.enum_kind);
    }

    if legal.tag_symbol {
      if self.tag_symbol.is_none() {
        panic!("BUG: kind {:?} has no tag_symbol", self.kind);
      }
    } else if self.tag_symbol.is_some() {
      panic!("BUG: kind {:?} does not allow a tag_symbol", self.kind);
    }

    if legal.tag_type {
      if self.tag_type.is_none() {
        panic!("BUG: kind {:?} has no tag_type", self.kind);
      }
    } else if self.tag_type.is_some() {
      panic!("BUG: kind {:?} does not allow a tag_type", self.kind);
    }

    if legal.tag_item {
      if self.tag_item.is_none() {
        panic!("BUG: kind {:?} has no tag_item", self.kind);
      }
    } else if self.tag_item.is_some() {
      panic!("BUG: kind {:?} does not allow a tag_item", self.kind);
    }

    if legal.field_name {
      if !is_symbol_name(&self.field_name) {
        panic!("BUG: kind {:?} has invalid field_name {:?}", self.kind, self.field_name);
      }
    } else if !self.field_name.is_empty() {
      panic!("BUG: kind {:?} does not allow field_name {:?}", self.kind, self.field_name);
    }

    if legal.field_type {
      if self.field_type.is_none() {
        panic!("BUG: kind {:?} has no field_type", self.kind);
      }
    } else if self.field_type.is_some() {
      panic!("BUG: kind {:?} does not allow a field_type", self.kind);
    }

    if legal.field_value {
      if self.field_value.is_none() {
        panic!("BUG: kind {:?} has no field_value", self.kind);
      }
    } else if self.field_value.is_some() {
      panic!("BUG: kind {:?} does not allow a field_value", self.kind);
    }

    if legal.method {
      if !is_symbol_name(&self.method_name) {
        panic!("BUG: kind {:?} has invalid method_name {:?}", self.kind, self.method_name);
      }
      if self.method_signature.is_none() {
        panic!("BUG: kind {:?} has no method_signature", self.kind);
      }
    } else {
      if !self.method_name.is_empty() {
        panic!("BUG: kind {:?} does not allow method_name {:?}", self.kind, self.method_name);
      }
      if self.method_signature.is_some() {
        panic!("BUG: kind {:?} does not allow a method_signature", self.kind);
      }
    }
  }

  /// The deterministic encoding of this statement inside a statements key.
  #[must_use] pub fn key(&self, interp: &Interp) -> String {
    use StatementKind as K;
    let mut out = String::new();
    let type_name = |t: Option<TypeId>| interp.type_canonical_name(t.expect("BUG: missing type"));
    match self.kind {
      K::AlignPragma => { let _ = write!(out, "align,{}", self.min_align); }
      K::MinimumSizePragma => { let _ = write!(out, "minSize,{}", self.min_size); }
      K::PreserveFieldOrderPragma => out.push_str("preserveOrder"),
      K::OmitNewPragma => out.push_str("omitNew"),
      K::OmitCopyPragma => out.push_str("omitCopy"),
      K::OmitMovePragma => out.push_str("omitMove"),
      K::OmitHashPragma => out.push_str("omitHash"),
      K::OmitComparePragma => out.push_str("omitCompare"),
      K::OmitToStringPragma => out.push_str("omitToString"),
      K::OmitToReprPragma => out.push_str("omitToRepr"),

      K::StaticConstant => {
        let value = self.field_value.as_ref().expect("BUG: missing field_value");
        let _ = write!(out, "staticConst,{},{},[{}]",
          self.field_name, type_name(self.field_type), value.key());
      }
      K::InstanceConstant => {
        let value = self.field_value.as_ref().expect("BUG: missing field_value");
        let _ = write!(out, "const,{},{},[{}]",
          self.field_name, type_name(self.field_type), value.key());
      }
      K::StaticField => {
        let _ = write!(out, "staticField,{},{}", self.field_name, type_name(self.field_type));
      }

      K::EnumKind => { let _ = write!(out, "enumKind,{}", self.enum_kind); }
      K::EnumValue => { let _ = write!(out, "enumValue,{},{}", self.enum_name, self.enum_number); }
      K::EnumAlias => { let _ = write!(out, "enumAlias,{},{}", self.enum_name, self.enum_alias_of); }

      K::BitfieldKind => { let _ = write!(out, "bitKind,{}", self.enum_kind); }
      K::BitfieldValue => {
        let _ = write!(out, "bitValue,{},{}", self.enum_name, self.enum_number);
      }
      K::BitfieldAlias => {
        let _ = write!(out, "bitAlias,{},{}", self.enum_name, self.enum_alias_of);
      }

      K::StructField => {
        let _ = write!(out, "structField,{},{}", self.field_name, type_name(self.field_type));
      }

      K::UnionTag => {
        let sym = self.tag_symbol.expect("BUG: missing tag_symbol");
        let _ = write!(out, "unionTag,{},{}",
          interp.symbol(sym).canonical_name(), type_name(self.tag_type));
      }
      K::UnionField => {
        let tag = self.tag_item.as_ref().expect("BUG: missing tag_item");
        let _ = write!(out, "unionField,{},{},{}",
          tag.name(), self.field_name, type_name(self.field_type));
      }

      K::InterfaceField => {
        let _ = write!(out, "ifaceField,{},{}", self.field_name, type_name(self.field_type));
      }
      K::InterfaceProperty => {
        let _ = write!(out, "ifaceProperty,{},{}", self.field_name, type_name(self.field_type));
      }
      K::InterfaceMethod => {
        let sig = self.method_signature.expect("BUG: missing method_signature");
        let _ = write!(out, "ifaceMethod,{},{}",
          self.method_name, interp.func_sig(sig).render(interp));
      }

      K::Invalid => panic!("BUG: kind {:?} not implemented", self.kind),
    }
    out.push(';');
    out
  }
}

/// A list of statements describing one composite-type body.
#[derive(Clone, Debug, Default)]
pub struct Statements(pub Vec<Statement>);

impl Statements {
  /// Validate every statement against `context` and reject repeated
  /// single-occurrence kinds. Violations are bugs.
  pub fn check(&self, context: StatementContext) {
    let mut counts: HashMap<StatementKind, u32> = HashMap::with_capacity(self.0.len());
    for stmt in &self.0 {
      stmt.check(context);
      *counts.entry(stmt.kind).or_default() += 1;
    }
    for (kind, count) in counts {
      if count > 1 && single_occurrence(kind) {
        panic!("BUG: kind {kind:?} appears {count} times, but it is only allowed to appear once");
      }
    }
  }

  /// Normalize: remember each statement's original position, then stable
  /// sort by (kind, original position).
  pub fn sort(&mut self) {
    for (index, stmt) in self.0.iter_mut().enumerate() {
      stmt.original_index = index as u32;
    }
    self.0.sort_by_key(|stmt| (stmt.kind, stmt.original_index));
  }

  /// Assert that the list is already normalized. An unsorted list is a bug.
  pub fn check_sorted(&mut self) {
    for (index, stmt) in self.0.iter_mut().enumerate() {
      stmt.original_index = index as u32;
    }
    if !self.0.is_sorted_by_key(|stmt| (stmt.kind, stmt.original_index)) {
      panic!("BUG: statements list is not sorted");
    }
  }

  /// The deterministic content identity of this (sorted) list. This is the
  /// cache key for every composite-type registry.
  #[must_use] pub fn key(&mut self, interp: &Interp) -> String {
    self.check_sorted();
    let mut out = String::new();
    for stmt in &self.0 {
      out.push_str(&stmt.key(interp));
    }
    out
  }

  /// The number of statements.
  #[must_use] pub fn len(&self) -> usize { self.0.len() }

  /// Returns true if the list is empty.
  #[must_use] pub fn is_empty(&self) -> bool { self.0.is_empty() }

  /// Iterate over the statements.
  pub fn iter(&self) -> std::slice::Iter<'_, Statement> { self.0.iter() }
}

impl From<Vec<Statement>> for Statements {
  fn from(vec: Vec<Statement>) -> Self { Statements(vec) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sort_is_stable_within_a_kind() {
    let mut list = Statements(vec![
      Statement::enum_value("b", 1),
      Statement::enum_kind(TypeKind::U8),
      Statement::enum_value("a", 0),
    ]);
    list.sort();
    assert_eq!(list.0[0].kind, StatementKind::EnumKind);
    assert_eq!(list.0[1].enum_name, "b");
    assert_eq!(list.0[2].enum_name, "a");
  }

  #[test]
  #[should_panic(expected = "not permitted inside")]
  fn wrong_context_is_a_bug() {
    let list = Statements(vec![Statement::enum_kind(TypeKind::U8)]);
    list.check(StatementContext::Struct);
  }

  #[test]
  #[should_panic(expected = "only allowed to appear once")]
  fn duplicate_kind_statement_is_a_bug() {
    let list = Statements(vec![
      Statement::enum_kind(TypeKind::U8),
      Statement::enum_kind(TypeKind::U16),
    ]);
    list.check(StatementContext::Enum);
  }

  #[test]
  #[should_panic(expected = "does not allow enum_number")]
  fn stray_field_is_a_bug() {
    let stmt = Statement {
      kind: StatementKind::OmitHashPragma,
      enum_number: 3,
      ..Statement::default()
    };
    stmt.check(StatementContext::Enum);
  }

  #[test]
  #[should_panic(expected = "invalid enum_name")]
  fn bad_item_name_is_a_bug() {
    let stmt = Statement::enum_value("not a name", 0);
    stmt.check(StatementContext::Enum);
  }

  #[test]
  #[should_panic(expected = "is not a bare pragma")]
  fn payload_pragma_constructor_is_checked() {
    let _ = Statement::pragma(StatementKind::AlignPragma);
  }
}
