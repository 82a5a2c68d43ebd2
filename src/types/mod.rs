//! The type-system data model: kinds, limits, the [`Type`] record and its
//! composite details, and the target-machine facts the registry is
//! parameterized over.

pub mod bitfield;
pub mod enums;
pub mod statement;
pub mod structs;
pub mod unions;

use std::fmt;

use crate::idx::{SymbolId, TypeId};
use crate::symbol::SymbolTable;

pub use bitfield::{BitfieldDef, BitfieldItem, BitMask};
pub use enums::{EnumDef, EnumItem};
pub use statement::{ConstValue, Statement, StatementContext, StatementKind, Statements};
pub use structs::{OmitFlags, StructDef, StructField};
pub use unions::{UnionDef, UnionField};

/// The largest legal alignment shift (one page).
pub const MAX_ALIGN_SHIFT: u32 = 12;
/// The largest legal struct or union size in bytes.
pub const MAX_STRUCT_SIZE: usize = 0x8000;

/// The kind of a [`Type`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeKind {
  /// The uninitialized kind. Only ever observed on a type mid-construction.
  #[default] Invalid,
  /// The type of types: a 32-bit [`TypeId`].
  Reflected,
  /// Unsigned 8-bit integer.
  U8,
  /// Unsigned 16-bit integer.
  U16,
  /// Unsigned 32-bit integer.
  U32,
  /// Unsigned 64-bit integer.
  U64,
  /// Signed 8-bit integer.
  S8,
  /// Signed 16-bit integer.
  S16,
  /// Signed 32-bit integer.
  S32,
  /// Signed 64-bit integer.
  S64,
  /// Binary16 float.
  F16,
  /// Binary32 float.
  F32,
  /// Binary64 float.
  F64,
  /// Complex number of two binary16 halves.
  C32,
  /// Complex number of two binary32 halves.
  C64,
  /// Complex number of two binary64 halves.
  C128,
  /// A string reference: (buffer id, offset, length).
  String,
  /// An error id.
  Error,
  /// An enumeration over a primitive integer.
  Enum,
  /// A bit set over an unsigned primitive integer.
  Bitfield,
  /// A struct with a computed layout.
  Struct,
  /// A tagged union.
  Union,
  /// An interface.
  Interface,
  /// A function.
  Function,
  /// A 64-bit pointer to an inner type.
  Pointer,
  /// A fixed-length array.
  Array,
  /// A slice.
  Slice,
  /// Mutability wrapper.
  Mutable,
  /// Constness wrapper.
  Const,
  /// A name introduced over an existing type.
  Named,
}

impl TypeKind {
  /// Is this a primitive integer kind (the legal enum backings)?
  #[must_use] pub fn is_primitive_integer(self) -> bool {
    use TypeKind::*;
    matches!(self, U8 | U16 | U32 | U64 | S8 | S16 | S32 | S64)
  }

  /// Is this an unsigned primitive integer kind (the legal bitfield
  /// backings)?
  #[must_use] pub fn is_unsigned_integer(self) -> bool {
    matches!(self, TypeKind::U8 | TypeKind::U16 | TypeKind::U32 | TypeKind::U64)
  }

  /// Is this one of the wrapper kinds that [`chase`](crate::interp::Interp::chase)
  /// steps through?
  #[must_use] pub fn is_wrapper(self) -> bool {
    matches!(self, TypeKind::Mutable | TypeKind::Const | TypeKind::Named)
  }
}

impl fmt::Display for TypeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Debug::fmt(self, f) }
}

/// The kind-specific payload of a [`Type`].
#[derive(Debug, Default)]
pub enum TypeDetails {
  /// No payload (primitives).
  #[default] None,
  /// The inner type of a Pointer/Mutable/Const/Named type.
  Inner(TypeId),
  /// Enum contents.
  Enum(EnumDef),
  /// Bitfield contents.
  Bitfield(BitfieldDef),
  /// Struct contents and layout.
  Struct(StructDef),
  /// Union contents and layout.
  Union(UnionDef),
}

/// One registered type. Types are created through the registry's
/// constructors and are immutable once published, except for their static
/// and instance symbol tables.
#[derive(Debug)]
pub struct Type {
  pub(crate) id: TypeId,
  pub(crate) sym: SymbolId,
  pub(crate) kind: TypeKind,
  pub(crate) align_shift: u8,
  pub(crate) min_size: u16,
  pub(crate) pad_size: u16,
  pub(crate) statics: SymbolTable,
  pub(crate) instance: SymbolTable,
  pub(crate) details: TypeDetails,
}

impl Type {
  pub(crate) fn new(
    id: TypeId, sym: SymbolId,
    canon_prefix: String, static_mangle_prefix: String, instance_mangle_prefix: String,
  ) -> Type {
    Type {
      id,
      sym,
      kind: TypeKind::Invalid,
      align_shift: 0,
      min_size: 0,
      pad_size: 0,
      statics: SymbolTable::new(canon_prefix.clone(), static_mangle_prefix),
      instance: SymbolTable::new(canon_prefix, instance_mangle_prefix),
      details: TypeDetails::None,
    }
  }

  /// The type's id in the registry.
  #[must_use] pub fn id(&self) -> TypeId { self.id }

  /// The id of the symbol naming this type.
  #[must_use] pub fn symbol(&self) -> SymbolId { self.sym }

  /// The type's kind.
  #[must_use] pub fn kind(&self) -> TypeKind { self.kind }

  /// log2 of the type's alignment.
  #[must_use] pub fn align_shift(&self) -> u32 { u32::from(self.align_shift) }

  /// The type's alignment in bytes.
  #[must_use] pub fn align_bytes(&self) -> usize { 1 << self.align_shift }

  /// The smallest number of bytes a value of this type occupies.
  #[must_use] pub fn minimum_bytes(&self) -> usize { usize::from(self.min_size) }

  /// The smallest multiple of the alignment that covers
  /// [`minimum_bytes`](Type::minimum_bytes).
  #[must_use] pub fn padded_bytes(&self) -> usize { usize::from(self.pad_size) }

  /// The type's static symbol table.
  #[must_use] pub fn static_symbols(&self) -> &SymbolTable { &self.statics }

  /// The type's instance symbol table.
  #[must_use] pub fn instance_symbols(&self) -> &SymbolTable { &self.instance }

  /// The kind-specific payload.
  #[must_use] pub fn details(&self) -> &TypeDetails { &self.details }

  /// The inner type of a wrapper or pointer type; a bug to call otherwise.
  #[must_use] pub fn inner(&self) -> TypeId {
    match self.details {
      TypeDetails::Inner(t) => t,
      _ => panic!("BUG: {} has no inner type", self.kind),
    }
  }

  /// The enum payload; a bug to call on any other kind.
  #[must_use] pub fn enum_def(&self) -> &EnumDef {
    match &self.details {
      TypeDetails::Enum(e) => e,
      _ => panic!("BUG: {} is not an enum", self.kind),
    }
  }

  /// The bitfield payload; a bug to call on any other kind.
  #[must_use] pub fn bitfield_def(&self) -> &BitfieldDef {
    match &self.details {
      TypeDetails::Bitfield(b) => b,
      _ => panic!("BUG: {} is not a bitfield", self.kind),
    }
  }

  /// The struct payload; a bug to call on any other kind.
  #[must_use] pub fn struct_def(&self) -> &StructDef {
    match &self.details {
      TypeDetails::Struct(s) => s,
      _ => panic!("BUG: {} is not a struct", self.kind),
    }
  }

  /// The union payload; a bug to call on any other kind.
  #[must_use] pub fn union_def(&self) -> &UnionDef {
    match &self.details {
      TypeDetails::Union(u) => u,
      _ => panic!("BUG: {} is not a union", self.kind),
    }
  }
}

/// The CPU architecture the registry computes layouts for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum RuntimeCpu {
  /// 64-bit x86.
  X86_64,
  /// 32-bit x86.
  X86,
  /// The x32 ABI: x86-64 with 32-bit pointers.
  X32,
  /// 64-bit ARM.
  Arm64,
  /// 32-bit ARM.
  Arm,
}

impl RuntimeCpu {
  /// The C data model of this CPU.
  #[must_use] pub fn data_model(self) -> DataModel {
    match self {
      RuntimeCpu::X86_64 | RuntimeCpu::Arm64 => DataModel::Lp64,
      RuntimeCpu::X86 | RuntimeCpu::X32 | RuntimeCpu::Arm => DataModel::Ilp32,
    }
  }

  /// The byte order of this CPU. Every supported CPU is little-endian.
  #[must_use] pub fn byte_order(self) -> Endianness { Endianness::Little }
}

/// The operating system the registry targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeOs {
  /// Linux.
  Linux,
}

/// A C data model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataModel {
  /// 64-bit longs and pointers.
  Lp64,
  /// 32-bit ints, longs and pointers.
  Ilp32,
}

/// A byte order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endianness {
  /// Least significant byte first.
  Little,
  /// Most significant byte first.
  Big,
}

/// The CPU of the host machine, as far as layouts are concerned.
#[must_use] pub fn system_cpu() -> RuntimeCpu {
  if cfg!(target_arch = "x86_64") {
    RuntimeCpu::X86_64
  } else if cfg!(target_arch = "aarch64") {
    RuntimeCpu::Arm64
  } else if cfg!(target_arch = "x86") {
    RuntimeCpu::X86
  } else if cfg!(target_arch = "arm") {
    RuntimeCpu::Arm
  } else {
    RuntimeCpu::X86_64
  }
}

/// The OS of the host machine.
#[must_use] pub fn system_os() -> RuntimeOs { RuntimeOs::Linux }
