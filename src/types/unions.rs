//! Union construction and layout.
//!
//! A union is a set of fields scoped to the items of a tag enum. Layout is
//! the struct algorithm run independently per tag item: fields of the same
//! tag must not overlap, fields of different tags freely do. The union's
//! minimum size is the largest per-tag total.

use hashbrown::HashMap;

use crate::idx::{SymbolId, TypeId};
use crate::interp::{Interp, KeyedCache};
use crate::types::enums::EnumItem;
use crate::types::statement::{StatementContext, StatementKind, Statements};
use crate::types::structs::{finish_layout, pad_size, LayoutPragmas, Occupancy, OmitFlags};
use crate::types::{Type, TypeDetails, TypeKind, MAX_STRUCT_SIZE};

/// One placed union field.
#[derive(Clone, Debug)]
pub struct UnionField {
  tag: EnumItem,
  name: String,
  ty: TypeId,
  offset: u16,
  length: u16,
  original_index: u32,
}

impl UnionField {
  /// The tag item this field is scoped to.
  #[must_use] pub fn tag(&self) -> &EnumItem { &self.tag }

  /// The field's name.
  #[must_use] pub fn name(&self) -> &str { &self.name }

  /// The field's type.
  #[must_use] pub fn ty(&self) -> TypeId { self.ty }

  /// The field's byte offset within the union.
  #[must_use] pub fn offset(&self) -> usize { usize::from(self.offset) }

  /// The field's length in bytes.
  #[must_use] pub fn length(&self) -> usize { usize::from(self.length) }
}

/// The payload of a union type.
#[derive(Debug)]
pub struct UnionDef {
  list: Statements,
  tag_sym: SymbolId,
  tag_ty: TypeId,
  fields: Vec<UnionField>,
  by_tag_and_name: HashMap<(i64, String), u32>,
  align_shift: u8,
  min_size: u16,
  omit: OmitFlags,
}

impl UnionDef {
  /// The statements this union was built from.
  #[must_use] pub fn statements(&self) -> &Statements { &self.list }

  /// The symbol holding the tag.
  #[must_use] pub fn tag_symbol(&self) -> SymbolId { self.tag_sym }

  /// The tag type (chases to an enum).
  #[must_use] pub fn tag_type(&self) -> TypeId { self.tag_ty }

  /// The placed fields.
  #[must_use] pub fn fields(&self) -> &[UnionField] { &self.fields }

  /// The fields scoped to one tag item.
  pub fn fields_by_tag<'a>(&'a self, tag: &'a EnumItem) -> impl Iterator<Item = &'a UnionField> {
    self.fields.iter().filter(move |field| field.tag.number() == tag.number())
  }

  /// Look a field up by tag item and name.
  #[must_use] pub fn field_by_tag_and_name(&self, tag: &EnumItem, name: &str) -> Option<&UnionField> {
    self.by_tag_and_name.get(&(tag.number(), name.to_owned()))
      .map(|&i| &self.fields[i as usize])
  }

  /// log2 of the union's alignment.
  #[must_use] pub fn align_shift(&self) -> u32 { u32::from(self.align_shift) }

  /// The union's minimum size in bytes (the largest per-tag total).
  #[must_use] pub fn minimum_size(&self) -> usize { usize::from(self.min_size) }

  /// The omitted generated members.
  #[must_use] pub fn omitted(&self) -> OmitFlags { self.omit }
}

impl Interp {
  /// Get or build the union type described by `list`. Identical lists
  /// return the identical type; concurrent identical calls block until the
  /// first finishes building.
  pub fn union_type(&self, mut list: Statements) -> TypeId {
    list.check(StatementContext::Union);
    list.sort();
    let key = list.key(self);

    if let Some(out) = self.keyed_cache_lookup(KeyedCache::Union, &key) {
      return out;
    }

    let module = self.builtin_union_module();
    let out = self
      .create_type(
        module.symbols(),
        self.hashed_symbol_data(&key),
        |interp, t| calculate_union(interp, t, list),
      )
      .unwrap_or_else(|e| panic!("BUG: {e}"));

    self.keyed_cache_publish(KeyedCache::Union, key, out);
    out
  }
}

fn calculate_union(interp: &Interp, t: &mut Type, list: Statements) {
  let mut pragmas = LayoutPragmas::default();
  let mut tag_sym: Option<SymbolId> = None;
  let mut tag_ty: Option<TypeId> = None;
  let mut fields: Vec<UnionField> = Vec::with_capacity(list.len());
  let mut by_tag_and_name: HashMap<(i64, String), u32> = HashMap::with_capacity(list.len());
  let mut worst_case_by_tag: HashMap<i64, usize> = HashMap::new();

  for stmt in list.iter() {
    if pragmas.collect(stmt) { continue }
    match stmt.kind {
      StatementKind::UnionTag => {
        let stmt_tag_ty = stmt.tag_type.expect("BUG: missing tag_type");
        let stmt_tag_sym = stmt.tag_symbol.expect("BUG: missing tag_symbol");
        let chased_kind = interp.ty(interp.chase(stmt_tag_ty)).kind();
        if chased_kind != TypeKind::Enum {
          panic!("BUG: wrong tag type: got {}, which is kind {chased_kind}, not Enum",
            interp.type_canonical_name(stmt_tag_ty));
        }
        let sym_ty = interp.symbol(stmt_tag_sym).ty();
        if !interp.type_is(sym_ty, stmt_tag_ty) {
          panic!("BUG: tag type {} is mismatched with tag symbol {} of type {}",
            interp.type_canonical_name(stmt_tag_ty),
            interp.symbol(stmt_tag_sym).canonical_name(),
            interp.type_canonical_name(sym_ty));
        }
        tag_sym = Some(stmt_tag_sym);
        tag_ty = Some(stmt_tag_ty);
      }

      StatementKind::UnionField => {
        let Some(tag_ty) = tag_ty else {
          panic!("BUG: a union tag statement is required before any union field")
        };
        let tag = stmt.tag_item.clone().expect("BUG: missing tag_item");
        let tag_enum = interp.chase(tag_ty);
        if tag.parent() != tag_enum {
          panic!("BUG: tag item {tag} does not belong to {}",
            interp.type_canonical_name(tag_ty));
        }

        let slot = (tag.number(), stmt.field_name.clone());
        if by_tag_and_name.contains_key(&slot) {
          panic!("BUG: duplicate field name {:?} for tag {tag}", stmt.field_name);
        }

        let ty = stmt.field_type.expect("BUG: missing field_type");
        *worst_case_by_tag.entry(tag.number()).or_default() += interp.ty(ty).padded_bytes();

        by_tag_and_name.insert(slot, fields.len() as u32);
        fields.push(UnionField {
          tag,
          name: stmt.field_name.clone(),
          ty,
          offset: !0,
          length: !0,
          original_index: stmt.original_index,
        });
      }

      _ => {}
    }
  }

  for (tag, worst_case) in &worst_case_by_tag {
    if *worst_case > MAX_STRUCT_SIZE {
      panic!("BUG: union is too large: {worst_case} bytes > {MAX_STRUCT_SIZE} bytes \
              maximum for tag number {tag}");
    }
  }

  let mut occupancy_by_tag: HashMap<i64, Occupancy> = HashMap::new();
  let mut computed_align = 0u32;

  if pragmas.strict_order {
    for field in &mut fields {
      let field_ty = interp.ty(field.ty);
      let min_bytes = field_ty.minimum_bytes();
      let align_shift = field_ty.align_shift();
      computed_align = computed_align.max(align_shift);

      let occupancy = occupancy_by_tag.entry(field.tag.number()).or_insert_with(Occupancy::new);
      let start = occupancy.round_up(align_shift);
      field.offset = start as u16;
      field.length = min_bytes as u16;
      occupancy.claim(start, min_bytes);
    }
  } else {
    fields.sort_by(|a, b| {
      let (a_ty, b_ty) = (interp.ty(a.ty), interp.ty(b.ty));
      a.tag.number().cmp(&b.tag.number())
        .then(b_ty.align_shift().cmp(&a_ty.align_shift()))
        .then(b_ty.minimum_bytes().cmp(&a_ty.minimum_bytes()))
        .then(a.original_index.cmp(&b.original_index))
    });

    for field in &mut fields {
      let field_ty = interp.ty(field.ty);
      let min_bytes = field_ty.minimum_bytes();
      let align_shift = field_ty.align_shift();
      computed_align = computed_align.max(align_shift);

      let occupancy = occupancy_by_tag.entry(field.tag.number()).or_insert_with(Occupancy::new);
      let start = occupancy.probe(align_shift, min_bytes);
      field.offset = start as u16;
      field.length = min_bytes as u16;
      occupancy.claim(start, min_bytes);
    }
  }

  // the sorts above moved fields around; rebuild the (tag, name) index
  by_tag_and_name.clear();
  for (index, field) in fields.iter().enumerate() {
    by_tag_and_name.insert((field.tag.number(), field.name.clone()), index as u32);
  }

  let mut actual_align = computed_align;
  let mut bytes_total = 0usize;
  for occupancy in occupancy_by_tag.values_mut() {
    actual_align = finish_layout(occupancy, &pragmas, actual_align);
    bytes_total = bytes_total.max(occupancy.bytes_total());
  }
  if occupancy_by_tag.is_empty() {
    // a union with no fields still honors its pragmas
    let mut empty = Occupancy::new();
    actual_align = finish_layout(&mut empty, &pragmas, actual_align);
    bytes_total = empty.bytes_total();
  }

  let Some(tag_sym) = tag_sym else { panic!("BUG: a union tag statement is required") };
  let tag_ty = tag_ty.expect("BUG: tag symbol without tag type");

  t.kind = TypeKind::Union;
  t.align_shift = actual_align as u8;
  t.min_size = bytes_total as u16;
  t.pad_size = pad_size(actual_align, bytes_total) as u16;
  t.details = TypeDetails::Union(UnionDef {
    list,
    tag_sym,
    tag_ty,
    fields,
    by_tag_and_name,
    align_shift: actual_align as u8,
    min_size: bytes_total as u16,
    omit: pragmas.omit,
  });
}
