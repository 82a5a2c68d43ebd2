//! The process-scoped type and symbol registry.
//!
//! An [`Interp`] owns every module, symbol, type, buffer, runtime error and
//! signature, all held in id-indexed arenas. Composite and wrapper types
//! are deduplicated: the caches map a content key (the statements key, or
//! the inner type id for wrappers) to the published type, and a `None`
//! entry marks a type another thread is currently building. Callers that
//! hit a `None` wait on the cache condvar until the builder publishes.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex, RwLock};
use sha2::{Digest as _, Sha256};

use crate::buffer::Buffer;
use crate::error::{ErrorValue, ModuleError, SymbolError, TypeError};
use crate::idx::{BufferId, ErrorId, FuncSigId, GenSigId, IdxVec, SymbolId, TypeId};
use crate::mangle::{is_module_name, is_reserved_module_name, mangle_module_name};
use crate::module::Module;
use crate::signature::{
  new_function_signature, new_generic_signature, FunctionArg, FunctionSignature,
  FunctionSignatureBuilder, GenericParam, GenericSignature, GenericSignatureBuilder,
};
use crate::symbol::{CtValue, GenericSymbolData, GenericValue, Symbol, SymbolData, SymbolKind, SymbolTable};
use crate::types::statement::Statements;
use crate::types::structs::StructDef;
use crate::types::{
  system_cpu, system_os, DataModel, Endianness, RuntimeCpu, RuntimeOs, Type, TypeDetails, TypeKind,
};

struct Registry {
  modules_by_name: HashMap<String, Arc<Module>>,
  symbols: IdxVec<SymbolId, Arc<Symbol>>,
  symbols_by_mangled: HashMap<String, SymbolId>,
  types: IdxVec<TypeId, Option<Arc<Type>>>,
  types_by_mangled: HashMap<String, TypeId>,
  buffers: IdxVec<BufferId, Arc<Buffer>>,
  errors: IdxVec<ErrorId, Arc<ErrorValue>>,
  gen_sigs: IdxVec<GenSigId, Arc<GenericSignature>>,
  gen_sigs_by_name: HashMap<String, GenSigId>,
  func_sigs: IdxVec<FuncSigId, Arc<FunctionSignature>>,
  func_sigs_by_name: HashMap<String, FuncSigId>,
}

/// Which keyed composite-type cache to consult.
#[derive(Clone, Copy, Debug)]
pub(crate) enum KeyedCache {
  Enum,
  Bitfield,
  Struct,
  Union,
}

#[derive(Clone, Copy, Debug)]
enum WrapperCache {
  Pointer,
  Mutable,
  Const,
}

#[derive(Default)]
struct TypeCaches {
  pointer: HashMap<TypeId, Option<TypeId>>,
  mutable: HashMap<TypeId, Option<TypeId>>,
  konst: HashMap<TypeId, Option<TypeId>>,
  enums: HashMap<String, Option<TypeId>>,
  bitfields: HashMap<String, Option<TypeId>>,
  structs: HashMap<String, Option<TypeId>>,
  unions: HashMap<String, Option<TypeId>>,
}

impl TypeCaches {
  fn keyed(&mut self, which: KeyedCache) -> &mut HashMap<String, Option<TypeId>> {
    match which {
      KeyedCache::Enum => &mut self.enums,
      KeyedCache::Bitfield => &mut self.bitfields,
      KeyedCache::Struct => &mut self.structs,
      KeyedCache::Union => &mut self.unions,
    }
  }

  fn wrapper(&mut self, which: WrapperCache) -> &mut HashMap<TypeId, Option<TypeId>> {
    match which {
      WrapperCache::Pointer => &mut self.pointer,
      WrapperCache::Mutable => &mut self.mutable,
      WrapperCache::Const => &mut self.konst,
    }
  }
}

#[derive(Default)]
struct Builtins {
  module: Option<Arc<Module>>,
  enum_module: Option<Arc<Module>>,
  bitfield_module: Option<Arc<Module>>,
  struct_module: Option<Arc<Module>>,
  union_module: Option<Arc<Module>>,

  type_ty: Option<TypeId>,
  uint8: Option<TypeId>,
  uint16: Option<TypeId>,
  uint32: Option<TypeId>,
  uint64: Option<TypeId>,
  sint8: Option<TypeId>,
  sint16: Option<TypeId>,
  sint32: Option<TypeId>,
  sint64: Option<TypeId>,
  float16: Option<TypeId>,
  float32: Option<TypeId>,
  float64: Option<TypeId>,
  complex32: Option<TypeId>,
  complex64: Option<TypeId>,
  complex128: Option<TypeId>,
  string: Option<TypeId>,
  error: Option<TypeId>,
  bool_ty: Option<TypeId>,
  order: Option<TypeId>,
  void: Option<TypeId>,
  null: Option<TypeId>,
}

/// The registry. One per interpreted process.
pub struct Interp {
  registry: RwLock<Registry>,
  caches: Mutex<TypeCaches>,
  cache_cv: Condvar,
  builtins: RwLock<Builtins>,
  cpu: RuntimeCpu,
  os: RuntimeOs,
}

macro_rules! builtin_type_accessors {
  {$($(#[$attr:meta])* $fn_name:ident => $field:ident,)*} => {$(
    $(#[$attr])*
    #[must_use] pub fn $fn_name(&self) -> TypeId {
      self.builtins.read().$field.expect("BUG: builtin types are not initialized yet")
    }
  )*}
}

macro_rules! builtin_module_accessors {
  {$($(#[$attr:meta])* $fn_name:ident => $field:ident,)*} => {$(
    $(#[$attr])*
    #[must_use] pub fn $fn_name(&self) -> Arc<Module> {
      self.builtins.read().$field.clone().expect("BUG: builtin modules are not initialized yet")
    }
  )*}
}

impl Default for Interp {
  fn default() -> Self { Self::new() }
}

impl Interp {
  /// Create a registry targeting the host machine.
  #[must_use] pub fn new() -> Interp { Interp::with_target(system_cpu(), system_os()) }

  /// Create a registry targeting a specific CPU and OS.
  #[must_use] pub fn with_target(cpu: RuntimeCpu, os: RuntimeOs) -> Interp {
    let interp = Interp {
      registry: RwLock::new(Registry {
        modules_by_name: HashMap::with_capacity(256),
        symbols: IdxVec::new(),
        symbols_by_mangled: HashMap::with_capacity(256),
        types: IdxVec::new(),
        types_by_mangled: HashMap::with_capacity(256),
        buffers: IdxVec::new(),
        errors: IdxVec::new(),
        gen_sigs: IdxVec::new(),
        gen_sigs_by_name: HashMap::with_capacity(256),
        func_sigs: IdxVec::new(),
        func_sigs_by_name: HashMap::with_capacity(256),
      }),
      caches: Mutex::new(TypeCaches::default()),
      cache_cv: Condvar::new(),
      builtins: RwLock::new(Builtins::default()),
      cpu,
      os,
    };
    interp.populate_builtins();
    interp
  }

  /// The target CPU.
  #[must_use] pub fn cpu(&self) -> RuntimeCpu { self.cpu }

  /// The target OS.
  #[must_use] pub fn os(&self) -> RuntimeOs { self.os }

  /// The target data model.
  #[must_use] pub fn data_model(&self) -> DataModel { self.cpu.data_model() }

  /// The target byte order.
  #[must_use] pub fn byte_order(&self) -> Endianness { self.cpu.byte_order() }

  // Modules
  // -------

  /// Look a module up by canonical name.
  #[must_use] pub fn module_by_name(&self, cname: &str) -> Option<Arc<Module>> {
    self.registry.read().modules_by_name.get(cname).cloned()
  }

  /// Copy every module into `out`, keyed by canonical name.
  pub fn all_modules(&self, out: &mut HashMap<String, Arc<Module>>) {
    for (cname, module) in &self.registry.read().modules_by_name {
      out.insert(cname.clone(), module.clone());
    }
  }

  /// Create a module. Reserved names (`_`, `this`, `main`, `builtin`,
  /// `builtin::*`) are rejected.
  pub fn new_module(&self, cname: &str) -> Result<Arc<Module>, ModuleError> {
    if !is_module_name(cname) {
      return Err(ModuleError::InvalidName(cname.to_owned()));
    }
    if is_reserved_module_name(cname) {
      return Err(ModuleError::ReservedName(cname.to_owned()));
    }
    self.new_module_common(cname, true)
  }

  fn new_module_internal(&self, cname: &str, with_imports: bool) -> Arc<Module> {
    self.new_module_common(cname, with_imports).unwrap_or_else(|e| panic!("BUG: {e}"))
  }

  fn new_module_common(&self, cname: &str, with_imports: bool) -> Result<Arc<Module>, ModuleError> {
    let mname = mangle_module_name(cname);
    let module = Arc::new(Module::new(cname.to_owned(), mname, with_imports));

    if with_imports {
      module.seed_import("this", cname);
      module.seed_import("builtin", "builtin");
      module.seed_import("builtin::enum", "builtin::enum");
      module.seed_import("builtin::bitfield", "builtin::bitfield");
      module.seed_import("builtin::struct", "builtin::struct");
      module.seed_import("builtin::union", "builtin::union");
    }

    let mut registry = self.registry.write();
    if registry.modules_by_name.contains_key(cname) {
      return Err(ModuleError::Duplicate(cname.to_owned()));
    }
    registry.modules_by_name.insert(cname.to_owned(), module.clone());
    drop(registry);

    log::debug!("registered module {cname}");
    Ok(module)
  }

  builtin_module_accessors! {
    /// The `builtin` module.
    builtin_module => module,
    /// The `builtin::enum` module, home of deduplicated enum types.
    builtin_enum_module => enum_module,
    /// The `builtin::bitfield` module, home of deduplicated bitfield types.
    builtin_bitfield_module => bitfield_module,
    /// The `builtin::struct` module, home of deduplicated struct types.
    builtin_struct_module => struct_module,
    /// The `builtin::union` module, home of deduplicated union types.
    builtin_union_module => union_module,
  }

  // Symbols
  // -------

  /// The symbol with the given id. An unknown id is a bug.
  #[must_use] pub fn symbol(&self, id: SymbolId) -> Arc<Symbol> {
    self.registry.read().symbols.get(id).cloned()
      .unwrap_or_else(|| panic!("BUG: {id} is not registered"))
  }

  /// Look a symbol up by mangled name.
  #[must_use] pub fn symbol_by_mangled_name(&self, mname: &str) -> Option<SymbolId> {
    self.registry.read().symbols_by_mangled.get(mname).copied()
  }

  /// Copy every symbol into `out`, keyed by id.
  pub fn all_symbols(&self, out: &mut HashMap<SymbolId, Arc<Symbol>>) {
    for (id, symbol) in self.registry.read().symbols.enum_iter() {
      out.insert(id, symbol.clone());
    }
  }

  pub(crate) fn register_symbol_with(&self, f: impl FnOnce(SymbolId) -> Symbol) -> SymbolId {
    let mut registry = self.registry.write();
    let id = registry.symbols.peek();
    let symbol = Arc::new(f(id));
    registry.symbols_by_mangled.insert(symbol.mangled_name().to_owned(), id);
    registry.symbols.push(symbol)
  }

  // Types
  // -----

  /// The type with the given id. An unknown or unpublished id is a bug.
  #[must_use] pub fn ty(&self, id: TypeId) -> Arc<Type> {
    self.registry.read().types.get(id)
      .and_then(Clone::clone)
      .unwrap_or_else(|| panic!("BUG: {id} is not registered"))
  }

  /// Look a type up by id without panicking on unpublished slots.
  #[must_use] pub fn type_by_id(&self, id: TypeId) -> Option<Arc<Type>> {
    self.registry.read().types.get(id).and_then(Clone::clone)
  }

  /// Look a type up by mangled name.
  #[must_use] pub fn type_by_mangled_name(&self, mname: &str) -> Option<TypeId> {
    self.registry.read().types_by_mangled.get(mname).copied()
  }

  /// Copy every published type into `out`, keyed by id.
  pub fn all_types(&self, out: &mut HashMap<TypeId, Arc<Type>>) {
    for (id, slot) in self.registry.read().types.enum_iter() {
      if let Some(ty) = slot {
        out.insert(id, ty.clone());
      }
    }
  }

  /// The canonical name of a type (its symbol's canonical name).
  #[must_use] pub fn type_canonical_name(&self, id: TypeId) -> String {
    self.symbol(self.ty(id).symbol()).canonical_name().to_owned()
  }

  /// The mangled name of a type (its symbol's mangled name).
  #[must_use] pub fn type_mangled_name(&self, id: TypeId) -> String {
    self.symbol(self.ty(id).symbol()).mangled_name().to_owned()
  }

  fn allocate_type(&self) -> TypeId {
    self.registry.write().types.push(None)
  }

  fn register_type(&self, t: Type, mname: String) {
    let id = t.id();
    let mut registry = self.registry.write();
    let slot = registry.types.get_mut(id).unwrap_or_else(|| panic!("BUG: {id} was never allocated"));
    if slot.is_some() {
      panic!("BUG: {id} is already registered");
    }
    *slot = Some(Arc::new(t));
    registry.types_by_mangled.insert(mname, id);
  }

  pub(crate) fn create_type(
    &self,
    symtab: &SymbolTable,
    mut data: SymbolData,
    build: impl FnOnce(&Interp, &mut Type),
  ) -> Result<TypeId, SymbolError> {
    let id = self.allocate_type();
    data.ty = Some(self.type_type());
    let sym = symtab.new_symbol(self, data)?;

    let (cname, mname) = {
      let symbol = self.symbol(sym);
      (symbol.canonical_name().to_owned(), symbol.mangled_name().to_owned())
    };
    let xname = &mname[..mname.len() - 1];

    let mut t = Type::new(id, sym, format!("{cname}."), format!("{xname}S"), format!("{xname}L"));
    build(self, &mut t);
    self.register_type(t, mname);
    self.symbol(sym).set_compile_time_value(CtValue::Type(id));
    log::debug!("registered type {cname}");
    Ok(id)
  }

  pub(crate) fn hashed_symbol_data(&self, key: &str) -> SymbolData {
    let digest = Sha256::digest(key.as_bytes());
    SymbolData {
      kind: SymbolKind::Simple,
      name: format!("X{}", hex::encode(digest)),
      ..SymbolData::default()
    }
  }

  // Type facts
  // ----------

  /// Follow Mutable/Const/Named wrappers down to the underlying type.
  #[must_use] pub fn chase(&self, mut id: TypeId) -> TypeId {
    loop {
      let ty = self.ty(id);
      if !ty.kind().is_wrapper() {
        return id;
      }
      id = ty.inner();
    }
  }

  /// The pointee of a pointer type, if `id` is one.
  #[must_use] pub fn elem(&self, id: TypeId) -> Option<TypeId> {
    let ty = self.ty(id);
    (ty.kind() == TypeKind::Pointer).then(|| ty.inner())
  }

  /// Wrapper-transitive identity: is `a` the same type as `b`, ignoring
  /// Mutable/Const/Named wrappers on `a`?
  #[must_use] pub fn type_is(&self, mut a: TypeId, b: TypeId) -> bool {
    loop {
      if a == b {
        return true;
      }
      let ty = self.ty(a);
      if !ty.kind().is_wrapper() {
        return false;
      }
      a = ty.inner();
    }
  }

  /// The signed integer type of the same width, preserving one layer of
  /// Mutable/Const wrapping.
  pub fn signed_type(&self, id: TypeId) -> Result<TypeId, TypeError> {
    self.signedness_type(id, "builtin::Signed#[type]", |kind| match kind {
      TypeKind::U8 | TypeKind::S8 => Some(self.sint8_type()),
      TypeKind::U16 | TypeKind::S16 => Some(self.sint16_type()),
      TypeKind::U32 | TypeKind::S32 => Some(self.sint32_type()),
      TypeKind::U64 | TypeKind::S64 => Some(self.sint64_type()),
      _ => None,
    })
  }

  /// The unsigned integer type of the same width, preserving one layer of
  /// Mutable/Const wrapping.
  pub fn unsigned_type(&self, id: TypeId) -> Result<TypeId, TypeError> {
    self.signedness_type(id, "builtin::Unsigned#[type]", |kind| match kind {
      TypeKind::U8 | TypeKind::S8 => Some(self.uint8_type()),
      TypeKind::U16 | TypeKind::S16 => Some(self.uint16_type()),
      TypeKind::U32 | TypeKind::S32 => Some(self.uint32_type()),
      TypeKind::U64 | TypeKind::S64 => Some(self.uint64_type()),
      _ => None,
    })
  }

  fn signedness_type(
    &self, mut id: TypeId, applied: &'static str,
    convert: impl Fn(TypeKind) -> Option<TypeId>,
  ) -> Result<TypeId, TypeError> {
    let mut wrap_mutable = false;
    let mut wrap_const = false;
    match self.ty(id).kind() {
      TypeKind::Mutable => {
        wrap_mutable = true;
        id = self.ty(id).inner();
      }
      TypeKind::Const => {
        wrap_const = true;
        id = self.ty(id).inner();
      }
      _ => {}
    }

    let Some(mut out) = convert(self.ty(id).kind()) else {
      return Err(TypeError::NotPrimitiveInteger {
        applied,
        type_name: self.type_canonical_name(id),
      });
    };

    if wrap_mutable {
      out = self.mutable_type(out);
    }
    if wrap_const {
      out = self.const_type(out);
    }
    Ok(out)
  }

  // Singletons
  // ----------

  builtin_type_accessors! {
    /// The type of types.
    type_type => type_ty,
    /// `builtin::UInt8`.
    uint8_type => uint8,
    /// `builtin::UInt16`.
    uint16_type => uint16,
    /// `builtin::UInt32`.
    uint32_type => uint32,
    /// `builtin::UInt64`.
    uint64_type => uint64,
    /// `builtin::SInt8`.
    sint8_type => sint8,
    /// `builtin::SInt16`.
    sint16_type => sint16,
    /// `builtin::SInt32`.
    sint32_type => sint32,
    /// `builtin::SInt64`.
    sint64_type => sint64,
    /// `builtin::Float16`.
    float16_type => float16,
    /// `builtin::Float32`.
    float32_type => float32,
    /// `builtin::Float64`.
    float64_type => float64,
    /// `builtin::Complex32`.
    complex32_type => complex32,
    /// `builtin::Complex64`.
    complex64_type => complex64,
    /// `builtin::Complex128`.
    complex128_type => complex128,
    /// `builtin::String`.
    string_type => string,
    /// `builtin::Error`.
    error_type => error,
    /// `builtin::Bool`, a Named wrapper over an S8 enum.
    bool_type => bool_ty,
    /// `builtin::Order`, a Named wrapper over an S8 enum.
    order_type => order,
    /// `builtin::Void`, the empty struct.
    void_type => void,
    /// `builtin::Null`, a Named wrapper over Void.
    null_type => null,
  }

  // Wrapper types
  // -------------

  /// Get or build the pointer type over `inner`.
  #[must_use] pub fn pointer_type(&self, inner: TypeId) -> TypeId {
    if let Some(out) = self.wrapper_cache_lookup(WrapperCache::Pointer, inner) {
      return out;
    }

    let sig = self.generic_signature_builder().with_type().build();
    let inner_cname = self.type_canonical_name(inner);
    let inner_mname = self.type_mangled_name(inner);
    let module = self.builtin_module();

    let out = self
      .create_type(
        module.symbols(),
        SymbolData {
          kind: SymbolKind::BoundGenericType,
          name: "Pointer".into(),
          generic: GenericSymbolData {
            signature: Some(sig),
            param_names: vec!["T".into()],
            param_values: vec![GenericValue::Type(inner)],
          },
          canonical_name_override: Some(format!("*{inner_cname}")),
          mangled_name_override: Some(format!("_Ap{}", &inner_mname[2..])),
          ..SymbolData::default()
        },
        |_, t| {
          t.kind = TypeKind::Pointer;
          t.align_shift = 3;
          t.min_size = 8;
          t.pad_size = 8;
          t.details = TypeDetails::Inner(inner);
        },
      )
      .unwrap_or_else(|e| panic!("BUG: {e}"));

    self.wrapper_cache_publish(WrapperCache::Pointer, inner, out);
    out
  }

  /// Get or build the Mutable wrapper over `inner`. Mutable over Mutable
  /// is an identity; Mutable over Const unwraps the Const first.
  #[must_use] pub fn mutable_type(&self, mut inner: TypeId) -> TypeId {
    match self.ty(inner).kind() {
      TypeKind::Mutable => return inner,
      TypeKind::Const => inner = self.ty(inner).inner(),
      _ => {}
    }

    if let Some(out) = self.wrapper_cache_lookup(WrapperCache::Mutable, inner) {
      return out;
    }

    let sig = self.generic_signature_builder().with_type().build();
    let inner_cname = self.type_canonical_name(inner);
    let inner_mname = self.type_mangled_name(inner);
    let inner_ty = self.ty(inner);
    let module = self.builtin_module();

    let out = self
      .create_type(
        module.symbols(),
        SymbolData {
          kind: SymbolKind::BoundGenericType,
          name: "Mutable".into(),
          generic: GenericSymbolData {
            signature: Some(sig),
            param_names: vec!["T".into()],
            param_values: vec![GenericValue::Type(inner)],
          },
          canonical_name_override: Some(format!("mutable {inner_cname}")),
          mangled_name_override: Some(format!("_Am{}", &inner_mname[2..])),
          ..SymbolData::default()
        },
        |_, t| {
          t.kind = TypeKind::Mutable;
          t.align_shift = inner_ty.align_shift;
          t.min_size = inner_ty.min_size;
          t.pad_size = inner_ty.pad_size;
          t.details = TypeDetails::Inner(inner);
        },
      )
      .unwrap_or_else(|e| panic!("BUG: {e}"));

    self.wrapper_cache_publish(WrapperCache::Mutable, inner, out);
    out
  }

  /// Get or build the Const wrapper over `inner`. Const over Const is an
  /// identity, and Const over Mutable returns the Mutable unchanged.
  #[must_use] pub fn const_type(&self, inner: TypeId) -> TypeId {
    match self.ty(inner).kind() {
      TypeKind::Mutable | TypeKind::Const => return inner,
      _ => {}
    }

    if let Some(out) = self.wrapper_cache_lookup(WrapperCache::Const, inner) {
      return out;
    }

    let sig = self.generic_signature_builder().with_type().build();
    let inner_cname = self.type_canonical_name(inner);
    let inner_mname = self.type_mangled_name(inner);
    let inner_ty = self.ty(inner);
    let module = self.builtin_module();

    let out = self
      .create_type(
        module.symbols(),
        SymbolData {
          kind: SymbolKind::BoundGenericType,
          name: "Const".into(),
          generic: GenericSymbolData {
            signature: Some(sig),
            param_names: vec!["T".into()],
            param_values: vec![GenericValue::Type(inner)],
          },
          canonical_name_override: Some(format!("const {inner_cname}")),
          mangled_name_override: Some(format!("_Ak{}", &inner_mname[2..])),
          ..SymbolData::default()
        },
        |_, t| {
          t.kind = TypeKind::Const;
          t.align_shift = inner_ty.align_shift;
          t.min_size = inner_ty.min_size;
          t.pad_size = inner_ty.pad_size;
          t.details = TypeDetails::Inner(inner);
        },
      )
      .unwrap_or_else(|e| panic!("BUG: {e}"));

    self.wrapper_cache_publish(WrapperCache::Const, inner, out);
    out
  }

  /// Introduce a new name over an existing type. The new type inherits the
  /// inner layout.
  pub fn named_type(
    &self, symtab: &SymbolTable, data: SymbolData, inner: TypeId,
  ) -> Result<TypeId, SymbolError> {
    let inner_ty = self.ty(inner);
    self.create_type(symtab, data, |_, t| {
      t.kind = TypeKind::Named;
      t.align_shift = inner_ty.align_shift;
      t.min_size = inner_ty.min_size;
      t.pad_size = inner_ty.pad_size;
      t.details = TypeDetails::Inner(inner);
    })
  }

  // Dedup caches
  // ------------

  pub(crate) fn keyed_cache_lookup(&self, which: KeyedCache, key: &str) -> Option<TypeId> {
    let mut caches = self.caches.lock();
    loop {
      match caches.keyed(which).get(key).copied() {
        None => {
          caches.keyed(which).insert(key.to_owned(), None);
          return None;
        }
        Some(Some(out)) => return Some(out),
        Some(None) => self.cache_cv.wait(&mut caches),
      }
    }
  }

  pub(crate) fn keyed_cache_publish(&self, which: KeyedCache, key: String, out: TypeId) {
    let mut caches = self.caches.lock();
    caches.keyed(which).insert(key, Some(out));
    self.cache_cv.notify_all();
  }

  fn wrapper_cache_lookup(&self, which: WrapperCache, inner: TypeId) -> Option<TypeId> {
    let mut caches = self.caches.lock();
    loop {
      match caches.wrapper(which).get(&inner).copied() {
        None => {
          caches.wrapper(which).insert(inner, None);
          return None;
        }
        Some(Some(out)) => return Some(out),
        Some(None) => self.cache_cv.wait(&mut caches),
      }
    }
  }

  fn wrapper_cache_publish(&self, which: WrapperCache, inner: TypeId, out: TypeId) {
    let mut caches = self.caches.lock();
    caches.wrapper(which).insert(inner, Some(out));
    self.cache_cv.notify_all();
  }

  // Buffers and errors
  // ------------------

  /// Register a new empty buffer.
  #[must_use] pub fn new_buffer(&self) -> Arc<Buffer> {
    let mut registry = self.registry.write();
    let id = registry.buffers.peek();
    let buffer = Arc::new(Buffer::new(id));
    registry.buffers.push(buffer.clone());
    buffer
  }

  /// Look a buffer up by id.
  #[must_use] pub fn buffer(&self, id: BufferId) -> Option<Arc<Buffer>> {
    self.registry.read().buffers.get(id).cloned()
  }

  /// Register a new runtime error value.
  #[must_use] pub fn new_error(&self) -> Arc<ErrorValue> {
    let mut registry = self.registry.write();
    let id = registry.errors.peek();
    let error = Arc::new(ErrorValue::new(id));
    registry.errors.push(error.clone());
    error
  }

  /// Look a runtime error up by id.
  #[must_use] pub fn error(&self, id: ErrorId) -> Option<Arc<ErrorValue>> {
    self.registry.read().errors.get(id).cloned()
  }

  // Signatures
  // ----------

  /// A builder for generic signatures.
  #[must_use] pub fn generic_signature_builder(&self) -> GenericSignatureBuilder<'_> {
    GenericSignatureBuilder::new(self)
  }

  /// A builder for function signatures.
  #[must_use] pub fn function_signature_builder(&self) -> FunctionSignatureBuilder<'_> {
    FunctionSignatureBuilder::new(self)
  }

  /// The generic signature with the given id. An unknown id is a bug.
  #[must_use] pub fn gen_sig(&self, id: GenSigId) -> Arc<GenericSignature> {
    self.registry.read().gen_sigs.get(id).cloned()
      .unwrap_or_else(|| panic!("BUG: {id} is not registered"))
  }

  /// The function signature with the given id. An unknown id is a bug.
  #[must_use] pub fn func_sig(&self, id: FuncSigId) -> Arc<FunctionSignature> {
    self.registry.read().func_sigs.get(id).cloned()
      .unwrap_or_else(|| panic!("BUG: {id} is not registered"))
  }

  pub(crate) fn register_gen_sig(&self, params: Vec<GenericParam>) -> GenSigId {
    // The key is rendered outside the registry lock: rendering reads type
    // names, which takes the registry read lock.
    let probe = new_generic_signature(GenSigId::default(), params);
    let key = probe.render(self);

    let mut registry = self.registry.write();
    if let Some(&existing) = registry.gen_sigs_by_name.get(&key) {
      return existing;
    }
    let id = registry.gen_sigs.peek();
    registry.gen_sigs.push(Arc::new(new_generic_signature(id, probe.params().to_vec())));
    registry.gen_sigs_by_name.insert(key, id);
    id
  }

  pub(crate) fn register_func_sig(
    &self, ret: TypeId, pos: Vec<FunctionArg>, named: Vec<(String, FunctionArg)>,
  ) -> FuncSigId {
    let probe = new_function_signature(FuncSigId::default(), ret, pos, named);
    let key = probe.render(self);

    let mut registry = self.registry.write();
    if let Some(&existing) = registry.func_sigs_by_name.get(&key) {
      return existing;
    }
    let id = registry.func_sigs.peek();
    registry.func_sigs.push(Arc::new(new_function_signature(
      id,
      probe.return_type(),
      probe.positional_args().to_vec(),
      probe.named_args().map(|(name, arg)| (name.to_owned(), arg)).collect(),
    )));
    registry.func_sigs_by_name.insert(key, id);
    id
  }

  // Builtins
  // --------

  fn populate_builtins(&self) {
    {
      let mut builtins = self.builtins.write();
      builtins.module = Some(self.new_module_internal("builtin", false));
      builtins.enum_module = Some(self.new_module_internal("builtin::enum", false));
      builtins.bitfield_module = Some(self.new_module_internal("builtin::bitfield", false));
      builtins.struct_module = Some(self.new_module_internal("builtin::struct", false));
      builtins.union_module = Some(self.new_module_internal("builtin::union", false));
    }

    let builtin = self.builtin_module();

    // The type of types is self-referential: its symbol's type is the type
    // being created, so it cannot go through create_type.
    let type_ty = {
      let id = self.allocate_type();
      let sym = builtin.symbols()
        .new_symbol(self, SymbolData {
          kind: SymbolKind::Simple,
          name: "Type".into(),
          ty: Some(id),
          mangled_name_override: Some("_At".into()),
          ..SymbolData::default()
        })
        .unwrap_or_else(|e| panic!("BUG: {e}"));

      let (cname, mname) = {
        let symbol = self.symbol(sym);
        (symbol.canonical_name().to_owned(), symbol.mangled_name().to_owned())
      };
      let xname = &mname[..mname.len() - 1];

      let mut t = Type::new(id, sym, format!("{cname}."), format!("{xname}S"), format!("{xname}L"));
      t.kind = TypeKind::Reflected;
      t.align_shift = 2;
      t.min_size = 4;
      t.pad_size = 4;
      self.register_type(t, mname);
      self.symbol(sym).set_compile_time_value(CtValue::Type(id));
      id
    };
    self.builtins.write().type_ty = Some(type_ty);

    let primitive = |kind: TypeKind, align_shift: u32, min_size: u16, name: String, mangle: String| {
      self
        .create_type(
          builtin.symbols(),
          SymbolData {
            kind: SymbolKind::Simple,
            name,
            mangled_name_override: Some(mangle),
            ..SymbolData::default()
          },
          |_, t| {
            t.kind = kind;
            t.align_shift = align_shift as u8;
            t.min_size = min_size;
            t.pad_size = crate::types::structs::pad_size(align_shift, usize::from(min_size)) as u16;
          },
        )
        .unwrap_or_else(|e| panic!("BUG: {e}"))
    };

    {
      use TypeKind::*;
      let rows: [(TypeKind, u32, i32, &str, &str); 14] = [
        (U8, 0, 0, "UInt", "_Au"),
        (U16, 1, 0, "UInt", "_Au"),
        (U32, 2, 0, "UInt", "_Au"),
        (U64, 3, 0, "UInt", "_Au"),
        (S8, 0, 0, "SInt", "_Ai"),
        (S16, 1, 0, "SInt", "_Ai"),
        (S32, 2, 0, "SInt", "_Ai"),
        (S64, 3, 0, "SInt", "_Ai"),
        (F16, 1, 0, "Float", "_Af"),
        (F32, 2, 0, "Float", "_Af"),
        (F64, 3, 0, "Float", "_Af"),
        (C32, 2, -1, "Complex", "_Ac"),
        (C64, 3, -1, "Complex", "_Ac"),
        (C128, 4, -1, "Complex", "_Ac"),
      ];

      let mut builtins_update: Vec<(TypeKind, TypeId)> = Vec::with_capacity(rows.len());
      for (kind, align_shift, bias, name, mangle) in rows {
        let size_bytes = 1u16 << align_shift;
        let size_bits = 8 * u32::from(size_bytes);
        let id = primitive(
          kind,
          align_shift,
          size_bytes,
          format!("{name}{size_bits}"),
          format!("{mangle}{}", align_shift as i32 + bias),
        );
        builtins_update.push((kind, id));
      }

      let mut builtins = self.builtins.write();
      for (kind, id) in builtins_update {
        let slot = match kind {
          U8 => &mut builtins.uint8,
          U16 => &mut builtins.uint16,
          U32 => &mut builtins.uint32,
          U64 => &mut builtins.uint64,
          S8 => &mut builtins.sint8,
          S16 => &mut builtins.sint16,
          S32 => &mut builtins.sint32,
          S64 => &mut builtins.sint64,
          F16 => &mut builtins.float16,
          F32 => &mut builtins.float32,
          F64 => &mut builtins.float64,
          C32 => &mut builtins.complex32,
          C64 => &mut builtins.complex64,
          C128 => &mut builtins.complex128,
          _ => unreachable!(),
        };
        *slot = Some(id);
      }
    }

    // String is (buffer id, offset, length): 12 bytes, 8-byte aligned.
    let string = primitive(TypeKind::String, 3, 12, "String".into(), "_As".into());
    let error = primitive(TypeKind::Error, 3, 8, "Error".into(), "_Ae".into());
    {
      let mut builtins = self.builtins.write();
      builtins.string = Some(string);
      builtins.error = Some(error);
    }

    let bool_ty = {
      use crate::types::Statement;
      let inner = self.enum_type(Statements(vec![
        Statement::enum_kind(TypeKind::S8),
        Statement::enum_value("true", -1),
        Statement::enum_alias("True", "true"),
        Statement::enum_alias("TRUE", "true"),
        Statement::enum_value("false", 0),
        Statement::enum_alias("False", "false"),
        Statement::enum_alias("FALSE", "false"),
      ]));
      self
        .named_type(builtin.symbols(), SymbolData {
          kind: SymbolKind::Simple,
          name: "Bool".into(),
          mangled_name_override: Some("_Ab".into()),
          ..SymbolData::default()
        }, inner)
        .unwrap_or_else(|e| panic!("BUG: {e}"))
    };

    let order = {
      use crate::types::Statement;
      let inner = self.enum_type(Statements(vec![
        Statement::enum_kind(TypeKind::S8),
        Statement::enum_value("LT", -1),
        Statement::enum_value("EQ", 0),
        Statement::enum_value("GT", 1),
      ]));
      self
        .named_type(builtin.symbols(), SymbolData {
          kind: SymbolKind::Simple,
          name: "Order".into(),
          mangled_name_override: Some("_Ao".into()),
          ..SymbolData::default()
        }, inner)
        .unwrap_or_else(|e| panic!("BUG: {e}"))
    };

    // Void is the empty struct; seeding the struct cache with the empty
    // key makes struct_type(empty list) return it.
    let void = self
      .create_type(
        builtin.symbols(),
        SymbolData {
          kind: SymbolKind::Simple,
          name: "Void".into(),
          mangled_name_override: Some("_Av".into()),
          ..SymbolData::default()
        },
        |_, t| {
          t.kind = TypeKind::Struct;
          t.align_shift = 0;
          t.min_size = 0;
          t.pad_size = 1;
          t.details = TypeDetails::Struct(StructDef::empty());
        },
      )
      .unwrap_or_else(|e| panic!("BUG: {e}"));
    self.keyed_cache_publish(KeyedCache::Struct, String::new(), void);

    {
      let mut builtins = self.builtins.write();
      builtins.bool_ty = Some(bool_ty);
      builtins.order = Some(order);
      builtins.void = Some(void);
    }

    let null = self
      .named_type(builtin.symbols(), SymbolData {
        kind: SymbolKind::Simple,
        name: "Null".into(),
        ..SymbolData::default()
      }, void)
      .unwrap_or_else(|e| panic!("BUG: {e}"));
    self.builtins.write().null = Some(null);

    // Warm the signature registries and the wrapper caches for every
    // singleton.
    self.generic_signature_builder().build();
    self.generic_signature_builder().with_type().build();
    self.function_signature_builder().build();

    let singletons = [
      self.type_type(),
      self.uint8_type(), self.uint16_type(), self.uint32_type(), self.uint64_type(),
      self.sint8_type(), self.sint16_type(), self.sint32_type(), self.sint64_type(),
      self.float16_type(), self.float32_type(), self.float64_type(),
      self.complex32_type(), self.complex64_type(), self.complex128_type(),
      self.string_type(), self.error_type(), self.bool_type(), self.order_type(),
    ];
    for ty in singletons {
      let _ = self.pointer_type(ty);
      let _ = self.const_type(ty);
      let _ = self.mutable_type(ty);
    }
  }
}
