//! Enum construction.
//!
//! An enum is a set of named items over a primitive integer backing kind.
//! Construction consumes a validated, sorted [`Statements`] list; identical
//! lists (by key) yield the identical registered type.

use hashbrown::HashMap;
use itertools::Itertools as _;
use smallvec::SmallVec;

use crate::idx::TypeId;
use crate::interp::{Interp, KeyedCache};
use crate::types::statement::{StatementContext, StatementKind, Statements};
use crate::types::structs::OmitFlags;
use crate::types::{Type, TypeDetails, TypeKind};

/// One enum item. Items are small and freely cloneable; the `parent` link
/// identifies the owning enum type for validation.
#[derive(Clone, Debug, PartialEq)]
pub struct EnumItem {
  parent: TypeId,
  number: i64,
  name: String,
  aliases: SmallVec<[String; 2]>,
}

impl EnumItem {
  /// The enum type this item belongs to.
  #[must_use] pub fn parent(&self) -> TypeId { self.parent }

  /// The item's number.
  #[must_use] pub fn number(&self) -> i64 { self.number }

  /// The item's primary name.
  #[must_use] pub fn name(&self) -> &str { &self.name }

  /// The item's aliases, in declaration order.
  #[must_use] pub fn aliases(&self) -> &[String] { &self.aliases }
}

impl std::fmt::Display for EnumItem {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}({})", self.name, self.number)
  }
}

/// The payload of an enum type.
#[derive(Debug)]
pub struct EnumDef {
  list: Statements,
  items: Vec<EnumItem>,
  by_num: HashMap<i64, u32>,
  by_name: HashMap<String, u32>,
  first: i64,
  last: i64,
  dense: bool,
  kind: TypeKind,
  omit: OmitFlags,
}

impl EnumDef {
  /// The statements this enum was built from.
  #[must_use] pub fn statements(&self) -> &Statements { &self.list }

  /// The items, sorted by number.
  #[must_use] pub fn items(&self) -> &[EnumItem] { &self.items }

  /// Look an item up by number. Dense enums index directly.
  #[must_use] pub fn by_number(&self, num: i64) -> Option<&EnumItem> {
    if self.dense {
      if num < self.first || num > self.last { return None }
      let index = (num - self.first) as usize;
      return self.items.get(index);
    }
    self.by_num.get(&num).map(|&i| &self.items[i as usize])
  }

  /// Look an item up by name or alias.
  #[must_use] pub fn by_name(&self, name: &str) -> Option<&EnumItem> {
    self.by_name.get(name).map(|&i| &self.items[i as usize])
  }

  /// The item with the smallest number.
  #[must_use] pub fn first(&self) -> Option<&EnumItem> { self.items.first() }

  /// The item with the largest number.
  #[must_use] pub fn last(&self) -> Option<&EnumItem> { self.items.last() }

  /// The smallest item number.
  #[must_use] pub fn first_number(&self) -> i64 { self.first }

  /// The largest item number.
  #[must_use] pub fn last_number(&self) -> i64 { self.last }

  /// Do the item numbers form an uninterrupted interval?
  #[must_use] pub fn is_dense(&self) -> bool { self.dense }

  /// The backing primitive integer kind.
  #[must_use] pub fn kind(&self) -> TypeKind { self.kind }

  /// The omitted generated members.
  #[must_use] pub fn omitted(&self) -> OmitFlags { self.omit }
}

impl Interp {
  /// Get or build the enum type described by `list`. Identical lists
  /// return the identical type; concurrent identical calls block until the
  /// first finishes building.
  pub fn enum_type(&self, mut list: Statements) -> TypeId {
    list.check(StatementContext::Enum);
    list.sort();
    let key = list.key(self);

    if let Some(out) = self.keyed_cache_lookup(KeyedCache::Enum, &key) {
      return out;
    }

    let module = self.builtin_enum_module();
    let out = self
      .create_type(
        module.symbols(),
        self.hashed_symbol_data(&key),
        |interp, t| calculate_enum(interp, t, list),
      )
      .unwrap_or_else(|e| panic!("BUG: {e}"));

    self.keyed_cache_publish(KeyedCache::Enum, key, out);
    out
  }
}

fn calculate_enum(interp: &Interp, t: &mut Type, list: Statements) {
  let mut omit = OmitFlags::empty();
  let mut kind = TypeKind::Invalid;
  let mut items: Vec<EnumItem> = Vec::with_capacity(list.len());
  let mut by_name: HashMap<String, u32> = HashMap::with_capacity(list.len());
  let mut by_num: HashMap<i64, u32> = HashMap::with_capacity(list.len());

  for stmt in list.iter() {
    match stmt.kind {
      StatementKind::OmitHashPragma => omit |= OmitFlags::HASH,
      StatementKind::OmitComparePragma => omit |= OmitFlags::COMPARE,
      StatementKind::OmitToStringPragma => omit |= OmitFlags::TO_STRING,
      StatementKind::OmitToReprPragma => omit |= OmitFlags::TO_REPR,

      StatementKind::StaticConstant
      | StatementKind::InstanceConstant
      | StatementKind::StaticField => {
        // TODO: materialize constant and static-field members once the
        // evaluator consumes them
      }

      StatementKind::EnumKind => {
        if !stmt.enum_kind.is_primitive_integer() {
          panic!("BUG: enum kind is {}, expected primitive integer", stmt.enum_kind);
        }
        kind = stmt.enum_kind;
      }

      StatementKind::EnumValue => {
        if let Some(&seen) = by_num.get(&stmt.enum_number) {
          panic!("BUG: duplicate enum value {}, already assigned to {}",
            stmt.enum_number, items[seen as usize]);
        }
        if let Some(&seen) = by_name.get(&stmt.enum_name) {
          panic!("BUG: duplicate enum name {:?}, already assigned to {}",
            stmt.enum_name, items[seen as usize]);
        }
        let index = items.len() as u32;
        items.push(EnumItem {
          parent: t.id(),
          number: stmt.enum_number,
          name: stmt.enum_name.clone(),
          aliases: SmallVec::new(),
        });
        by_name.insert(stmt.enum_name.clone(), index);
        by_num.insert(stmt.enum_number, index);
      }

      StatementKind::EnumAlias => {
        if let Some(&seen) = by_name.get(&stmt.enum_name) {
          panic!("BUG: duplicate enum name {:?}, already assigned to {}",
            stmt.enum_name, items[seen as usize]);
        }
        let Some(&target) = by_name.get(&stmt.enum_alias_of) else {
          panic!("BUG: enum name {:?} is not known", stmt.enum_alias_of)
        };
        items[target as usize].aliases.push(stmt.enum_name.clone());
        by_name.insert(stmt.enum_name.clone(), target);
      }

      _ => {}
    }
  }

  items.sort_by_key(|item| item.number);

  if items.is_empty() {
    panic!("BUG: must specify at least one enum value");
  }
  if !items.iter().any(|item| item.number == 0) {
    panic!("BUG: must specify an enum value for number 0");
  }

  // the sort invalidated the collection-time indices
  by_name.clear();
  by_num.clear();
  for (index, item) in items.iter().enumerate() {
    by_num.insert(item.number, index as u32);
    by_name.insert(item.name.clone(), index as u32);
    for alias in &item.aliases {
      by_name.insert(alias.clone(), index as u32);
    }
  }

  let first = items.first().expect("BUG: no items").number;
  let last = items.last().expect("BUG: no items").number;
  let dense = items.iter().tuple_windows().all(|(a, b)| b.number == a.number + 1);

  let backing = interp.ty(backing_type(interp, kind));
  t.kind = TypeKind::Enum;
  t.align_shift = backing.align_shift;
  t.min_size = backing.min_size;
  t.pad_size = backing.pad_size;
  t.details = TypeDetails::Enum(EnumDef {
    list, items, by_num, by_name, first, last, dense, kind, omit,
  });
}

fn backing_type(interp: &Interp, kind: TypeKind) -> TypeId {
  match kind {
    TypeKind::U8 => interp.uint8_type(),
    TypeKind::U16 => interp.uint16_type(),
    TypeKind::U32 => interp.uint32_type(),
    TypeKind::U64 => interp.uint64_type(),
    TypeKind::S8 => interp.sint8_type(),
    TypeKind::S16 => interp.sint16_type(),
    TypeKind::S32 => interp.sint32_type(),
    TypeKind::S64 => interp.sint64_type(),
    _ => panic!("BUG: enum kind is {kind}, expected primitive integer"),
  }
}
