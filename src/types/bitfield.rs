//! Bitfield construction.
//!
//! A bitfield names individual bits of an unsigned integer backing kind.
//! Every shift without an explicit name is filled with a `__reservedN`
//! item, so the items vector always has exactly one entry per bit.

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::idx::TypeId;
use crate::interp::{Interp, KeyedCache};
use crate::types::statement::{StatementContext, StatementKind, Statements};
use crate::types::structs::OmitFlags;
use crate::types::{Type, TypeDetails, TypeKind};

/// One named bit. The `parent` link identifies the owning bitfield type
/// for validation.
#[derive(Clone, Debug, PartialEq)]
pub struct BitfieldItem {
  parent: TypeId,
  shift: u8,
  name: String,
  aliases: SmallVec<[String; 2]>,
}

impl BitfieldItem {
  /// The bitfield type this item belongs to.
  #[must_use] pub fn parent(&self) -> TypeId { self.parent }

  /// The bit position.
  #[must_use] pub fn shift(&self) -> u32 { u32::from(self.shift) }

  /// The bit mask, `1 << shift`.
  #[must_use] pub fn bit(&self) -> u64 { 1 << self.shift }

  /// The item's primary name.
  #[must_use] pub fn name(&self) -> &str { &self.name }

  /// The item's aliases, in declaration order.
  #[must_use] pub fn aliases(&self) -> &[String] { &self.aliases }

  /// Is this a gap-filler rather than a declared item?
  #[must_use] pub fn is_reserved(&self) -> bool { self.name.starts_with("__reserved") }
}

impl std::fmt::Display for BitfieldItem {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}(1<<{})", self.name, self.shift)
  }
}

/// A decoded bitfield value: the set of items whose bits are present,
/// represented as a mask tagged with its owning type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BitMask {
  /// The bitfield type the mask belongs to.
  pub parent: TypeId,
  /// The raw bits.
  pub bits: u64,
}

impl BitMask {
  /// Does the mask contain `item`? An item of a different bitfield is a
  /// caller bug.
  #[must_use] pub fn contains(&self, item: &BitfieldItem) -> bool {
    if item.parent() != self.parent {
      panic!("BUG: item {item} belongs to {}, not {}", item.parent(), self.parent);
    }
    self.bits & item.bit() != 0
  }
}

/// The payload of a bitfield type.
#[derive(Debug)]
pub struct BitfieldDef {
  list: Statements,
  items: Vec<BitfieldItem>,
  by_bit: HashMap<u64, u32>,
  by_name: HashMap<String, u32>,
  kind: TypeKind,
  omit: OmitFlags,
}

impl BitfieldDef {
  /// The statements this bitfield was built from.
  #[must_use] pub fn statements(&self) -> &Statements { &self.list }

  /// The items, one per bit of the backing kind, sorted by shift.
  #[must_use] pub fn items(&self) -> &[BitfieldItem] { &self.items }

  /// Look an item up by bit position.
  #[must_use] pub fn by_shift(&self, shift: u32) -> Option<&BitfieldItem> {
    self.items.get(shift as usize)
  }

  /// Look an item up by bit mask.
  #[must_use] pub fn by_bit(&self, bit: u64) -> Option<&BitfieldItem> {
    self.by_bit.get(&bit).map(|&i| &self.items[i as usize])
  }

  /// Look an item up by name or alias.
  #[must_use] pub fn by_name(&self, name: &str) -> Option<&BitfieldItem> {
    self.by_name.get(name).map(|&i| &self.items[i as usize])
  }

  /// The backing unsigned integer kind.
  #[must_use] pub fn kind(&self) -> TypeKind { self.kind }

  /// The omitted generated members.
  #[must_use] pub fn omitted(&self) -> OmitFlags { self.omit }

  /// The items present in `mask`, in shift order.
  pub fn items_in(&self, mask: BitMask) -> impl Iterator<Item = &BitfieldItem> {
    self.items.iter().filter(move |item| mask.bits & item.bit() != 0)
  }
}

impl Interp {
  /// Get or build the bitfield type described by `list`. Identical lists
  /// return the identical type; concurrent identical calls block until the
  /// first finishes building.
  pub fn bitfield_type(&self, mut list: Statements) -> TypeId {
    list.check(StatementContext::Bitfield);
    list.sort();
    let key = list.key(self);

    if let Some(out) = self.keyed_cache_lookup(KeyedCache::Bitfield, &key) {
      return out;
    }

    let module = self.builtin_bitfield_module();
    let out = self
      .create_type(
        module.symbols(),
        self.hashed_symbol_data(&key),
        |interp, t| calculate_bitfield(interp, t, list),
      )
      .unwrap_or_else(|e| panic!("BUG: {e}"));

    self.keyed_cache_publish(KeyedCache::Bitfield, key, out);
    out
  }
}

fn calculate_bitfield(interp: &Interp, t: &mut Type, list: Statements) {
  let mut omit = OmitFlags::empty();
  let mut kind = TypeKind::Invalid;
  let mut items: Vec<BitfieldItem> = Vec::with_capacity(64);
  let mut by_name: HashMap<String, u32> = HashMap::with_capacity(list.len());
  let mut by_shift: HashMap<u32, u32> = HashMap::with_capacity(64);

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

      StatementKind::BitfieldKind => {
        if !stmt.enum_kind.is_unsigned_integer() {
          panic!("BUG: bitfield kind is {}, expected unsigned integer", stmt.enum_kind);
        }
        kind = stmt.enum_kind;
      }

      StatementKind::BitfieldValue => {
        let raw_shift = stmt.enum_number;
        if !(0..64).contains(&raw_shift) {
          panic!("BUG: bitfield value 1<<{raw_shift} is out of range");
        }
        let shift = raw_shift as u32;

        if let Some(&seen) = by_shift.get(&shift) {
          panic!("BUG: duplicate bitfield value 1<<{shift}, already assigned to {}",
            items[seen as usize]);
        }
        if let Some(&seen) = by_name.get(&stmt.enum_name) {
          panic!("BUG: duplicate bitfield name {:?}, already assigned to {}",
            stmt.enum_name, items[seen as usize]);
        }

        let index = items.len() as u32;
        items.push(BitfieldItem {
          parent: t.id(),
          shift: shift as u8,
          name: stmt.enum_name.clone(),
          aliases: SmallVec::new(),
        });
        by_name.insert(stmt.enum_name.clone(), index);
        by_shift.insert(shift, index);
      }

      StatementKind::BitfieldAlias => {
        if let Some(&seen) = by_name.get(&stmt.enum_name) {
          panic!("BUG: duplicate bitfield name {:?}, already assigned to {}",
            stmt.enum_name, items[seen as usize]);
        }
        let Some(&target) = by_name.get(&stmt.enum_alias_of) else {
          panic!("BUG: bitfield name {:?} is not known", stmt.enum_alias_of)
        };
        items[target as usize].aliases.push(stmt.enum_name.clone());
        by_name.insert(stmt.enum_name.clone(), target);
      }

      _ => {}
    }
  }

  let limit = match kind {
    TypeKind::U8 => 8u32,
    TypeKind::U16 => 16,
    TypeKind::U32 => 32,
    TypeKind::U64 => 64,
    _ => panic!("BUG: bitfield kind is {kind}, expected unsigned integer"),
  };

  for shift in 0..limit {
    if by_shift.contains_key(&shift) { continue }
    let name = format!("__reserved{shift}");
    let index = items.len() as u32;
    items.push(BitfieldItem {
      parent: t.id(),
      shift: shift as u8,
      name: name.clone(),
      aliases: SmallVec::new(),
    });
    by_name.insert(name, index);
    by_shift.insert(shift, index);
  }

  for item in &items {
    if item.shift() >= limit {
      panic!("BUG: bitfield value 1<<{} is out of range for kind {kind}", item.shift());
    }
  }

  items.sort_by_key(|item| item.shift);

  // the sort invalidated the collection-time indices
  by_name.clear();
  let mut by_bit: HashMap<u64, u32> = HashMap::with_capacity(items.len());
  for (index, item) in items.iter().enumerate() {
    by_bit.insert(item.bit(), index as u32);
    by_name.insert(item.name.clone(), index as u32);
    for alias in &item.aliases {
      by_name.insert(alias.clone(), index as u32);
    }
  }

  let backing = interp.ty(match kind {
    TypeKind::U8 => interp.uint8_type(),
    TypeKind::U16 => interp.uint16_type(),
    TypeKind::U32 => interp.uint32_type(),
    TypeKind::U64 => interp.uint64_type(),
    _ => unreachable!(),
  });

  t.kind = TypeKind::Bitfield;
  t.align_shift = backing.align_shift;
  t.min_size = backing.min_size;
  t.pad_size = backing.pad_size;
  t.details = TypeDetails::Bitfield(BitfieldDef { list, items, by_bit, by_name, kind, omit });
}
