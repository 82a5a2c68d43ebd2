//! Symbols, symbol names, and symbol tables.
//!
//! A symbol has four names: the human name it was declared with, the local
//! name it is stored under in its table, the canonical (fully-qualified,
//! human-readable) name, and the mangled name. All four derive
//! deterministically from the declaration data and the owning table's
//! prefixes, unless an explicit override is supplied.

use std::fmt::Write as _;

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::error::SymbolError;
use crate::idx::{FuncSigId, GenSigId, SymbolId, TypeId};
use crate::interp::Interp;
use crate::mangle::{is_symbol_name, write_name};
use crate::signature::GenericParamKind;
use crate::types::EnumItem;

/// The kind of a symbol.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SymbolKind {
  /// The uninitialized kind; always rejected.
  #[default] Invalid,
  /// A plain named symbol.
  Simple,
  /// A generic type with unbound parameters.
  UnboundGenericType,
  /// A generic type with all parameters bound.
  BoundGenericType,
  /// A plain function.
  SimpleFunction,
  /// A generic function with unbound parameters.
  UnboundGenericFunction,
  /// A generic function with all parameters bound.
  BoundGenericFunction,
}

/// A bound compile-time value for one generic parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum GenericValue {
  /// A type argument.
  Type(TypeId),
  /// An unsigned integer argument.
  Uint(u64),
  /// An enum item argument.
  EnumItem(EnumItem),
}

/// The generic block of a [`SymbolData`].
#[derive(Clone, Debug, Default)]
pub struct GenericSymbolData {
  /// The generic signature.
  pub signature: Option<GenSigId>,
  /// One name per signature parameter.
  pub param_names: Vec<String>,
  /// One value per signature parameter, for bound kinds only.
  pub param_values: Vec<GenericValue>,
}

/// The function block of a [`SymbolData`].
#[derive(Clone, Debug, Default)]
pub struct FunctionSymbolData {
  /// The function signature.
  pub signature: Option<FuncSigId>,
  /// One name per positional argument.
  pub positional_names: Vec<String>,
}

/// The declaration data a symbol is created from.
#[derive(Clone, Debug, Default)]
pub struct SymbolData {
  /// The symbol kind.
  pub kind: SymbolKind,
  /// The human name.
  pub name: String,
  /// The symbol's type. Filled in by the registry for type symbols.
  pub ty: Option<TypeId>,
  /// Generic parameters, for the generic kinds.
  pub generic: GenericSymbolData,
  /// Function arguments, for the function kinds.
  pub function: FunctionSymbolData,
  /// Bypass canonical-name derivation.
  pub canonical_name_override: Option<String>,
  /// Bypass mangled-name derivation.
  pub mangled_name_override: Option<String>,
}

/// The generic block of a derived symbol name.
#[derive(Clone, Debug)]
pub struct GenericSymbolName {
  sig: GenSigId,
  names: Vec<String>,
  values: Vec<GenericValue>,
}

impl GenericSymbolName {
  /// The generic signature.
  #[must_use] pub fn signature(&self) -> GenSigId { self.sig }
  /// The parameter names.
  #[must_use] pub fn param_names(&self) -> &[String] { &self.names }
  /// The bound parameter values (empty for unbound kinds).
  #[must_use] pub fn param_values(&self) -> &[GenericValue] { &self.values }
}

/// The function block of a derived symbol name.
#[derive(Clone, Debug)]
pub struct FunctionSymbolName {
  sig: FuncSigId,
  pos_names: Vec<String>,
}

impl FunctionSymbolName {
  /// The function signature.
  #[must_use] pub fn signature(&self) -> FuncSigId { self.sig }
  /// The positional argument names.
  #[must_use] pub fn positional_names(&self) -> &[String] { &self.pos_names }
}

/// A compile-time value attached to a symbol.
#[derive(Clone, Debug, PartialEq)]
pub enum CtValue {
  /// A type (every type symbol carries its own type here).
  Type(TypeId),
  /// An unsigned integer.
  Uint(u64),
  /// A signed integer.
  Int(i64),
  /// A string.
  Str(String),
}

/// One registered symbol.
#[derive(Debug)]
pub struct Symbol {
  id: SymbolId,
  kind: SymbolKind,
  hname: String,
  lname: String,
  cname: String,
  mname: String,
  generic: Option<GenericSymbolName>,
  function: Option<FunctionSymbolName>,
  ty: TypeId,
  ctv: RwLock<Option<CtValue>>,
}

impl Symbol {
  /// The symbol's id in the registry.
  #[must_use] pub fn id(&self) -> SymbolId { self.id }
  /// The symbol's kind.
  #[must_use] pub fn kind(&self) -> SymbolKind { self.kind }
  /// The name the symbol was declared with.
  #[must_use] pub fn human_name(&self) -> &str { &self.hname }
  /// The name the symbol is stored under in its table.
  #[must_use] pub fn local_name(&self) -> &str { &self.lname }
  /// The fully-qualified human-readable name.
  #[must_use] pub fn canonical_name(&self) -> &str { &self.cname }
  /// The mangled name.
  #[must_use] pub fn mangled_name(&self) -> &str { &self.mname }
  /// The generic block, for generic kinds.
  #[must_use] pub fn generic(&self) -> Option<&GenericSymbolName> { self.generic.as_ref() }
  /// The function block, for function kinds.
  #[must_use] pub fn function(&self) -> Option<&FunctionSymbolName> { self.function.as_ref() }
  /// The symbol's type.
  #[must_use] pub fn ty(&self) -> TypeId { self.ty }

  /// The symbol's compile-time value, if one has been set.
  #[must_use] pub fn compile_time_value(&self) -> Option<CtValue> { self.ctv.read().clone() }

  /// Attach a compile-time value.
  pub fn set_compile_time_value(&self, ctv: CtValue) { *self.ctv.write() = Some(ctv) }
}

impl std::fmt::Display for Symbol {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.cname)
  }
}

/// Anything that can resolve names to symbols.
pub trait Resolver {
  /// Copy every binding into `out`.
  fn all(&self, out: &mut HashMap<String, SymbolId>);
  /// Look up one name.
  fn get(&self, name: &str) -> Option<SymbolId>;
  /// Bind a name.
  fn put(&self, interp: &Interp, name: &str, sym: SymbolId) -> Result<(), SymbolError>;
}

/// A scope chain: lookups try each resolver in order, inserts go to the
/// first, and [`Resolver::all`] merges back-to-front so earlier scopes
/// shadow later ones.
pub struct ResolverList<'a>(pub Vec<&'a dyn Resolver>);

impl Resolver for ResolverList<'_> {
  fn all(&self, out: &mut HashMap<String, SymbolId>) {
    for resolver in self.0.iter().rev() {
      resolver.all(out);
    }
  }

  fn get(&self, name: &str) -> Option<SymbolId> {
    self.0.iter().find_map(|resolver| resolver.get(name))
  }

  fn put(&self, interp: &Interp, name: &str, sym: SymbolId) -> Result<(), SymbolError> {
    let first = self.0.first().ok_or(SymbolError::NoScopes)?;
    first.put(interp, name, sym)
  }
}

/// A name-to-symbol table with the prefixes new symbols derive their
/// canonical and mangled names from.
#[derive(Debug)]
pub struct SymbolTable {
  canon_prefix: String,
  mangle_prefix: String,
  tbl: RwLock<HashMap<String, SymbolId>>,
}

impl SymbolTable {
  pub(crate) fn new(canon_prefix: String, mangle_prefix: String) -> SymbolTable {
    SymbolTable { canon_prefix, mangle_prefix, tbl: RwLock::new(HashMap::new()) }
  }

  /// Create a symbol from declaration data, register it with the interp,
  /// and bind it under its local name.
  pub fn new_symbol(&self, interp: &Interp, data: SymbolData) -> Result<SymbolId, SymbolError> {
    let sn = derive_symbol_name(interp, &data, &self.canon_prefix, &self.mangle_prefix)?;
    let Some(ty) = data.ty else { return Err(SymbolError::MissingType { kind: data.kind }) };

    let lname = sn.lname.clone();
    let id = interp.register_symbol_with(|id| Symbol {
      id,
      kind: data.kind,
      hname: sn.hname,
      lname: sn.lname,
      cname: sn.cname,
      mname: sn.mname,
      generic: sn.generic,
      function: sn.function,
      ty,
      ctv: RwLock::new(None),
    });

    self.put(interp, &lname, id)?;
    Ok(id)
  }

  /// Create an anonymous generated symbol of the given type. The name is
  /// pre-mangled (`__G%08x` over the symbol id), so it never collides.
  pub fn new_gensym(&self, interp: &Interp, ty: TypeId) -> SymbolId {
    let id = interp.register_symbol_with(|id| {
      let name = format!("__G{:08x}", id.0);
      Symbol {
        id,
        kind: SymbolKind::Simple,
        hname: name.clone(),
        lname: name.clone(),
        cname: name.clone(),
        mname: name,
        generic: None,
        function: None,
        ty,
        ctv: RwLock::new(None),
      }
    });
    let lname = interp.symbol(id).local_name().to_owned();
    if let Err(e) = self.put(interp, &lname, id) {
      panic!("BUG: {e}");
    }
    id
  }

  // Hook for instantiating bound generics on demand; nothing synthesizes
  // symbols yet.
  fn resolve_synthetic(&self, _name: &str) -> Option<SymbolId> { None }
}

impl Resolver for SymbolTable {
  fn all(&self, out: &mut HashMap<String, SymbolId>) {
    for (name, &sym) in self.tbl.read().iter() {
      out.insert(name.clone(), sym);
    }
  }

  fn get(&self, name: &str) -> Option<SymbolId> {
    if let Some(&sym) = self.tbl.read().get(name) {
      return Some(sym);
    }
    let sym = self.resolve_synthetic(name)?;
    Some(*self.tbl.write().entry(name.to_owned()).or_insert(sym))
  }

  fn put(&self, interp: &Interp, name: &str, sym: SymbolId) -> Result<(), SymbolError> {
    let mut tbl = self.tbl.write();
    if let Some(&old) = tbl.get(name) {
      return Err(SymbolError::Duplicate {
        name: name.to_owned(),
        old: interp.symbol(old).canonical_name().to_owned(),
        new: interp.symbol(sym).canonical_name().to_owned(),
      });
    }
    tbl.insert(name.to_owned(), sym);
    Ok(())
  }
}

struct SymbolName {
  hname: String,
  lname: String,
  cname: String,
  mname: String,
  generic: Option<GenericSymbolName>,
  function: Option<FunctionSymbolName>,
}

fn derive_symbol_name(
  interp: &Interp, data: &SymbolData, canon_prefix: &str, mangle_prefix: &str,
) -> Result<SymbolName, SymbolError> {
  use SymbolKind as K;

  let (expect_generic, expect_generic_values, expect_function) = match data.kind {
    K::Simple => (false, false, false),
    K::UnboundGenericType => (true, false, false),
    K::BoundGenericType => (true, true, false),
    K::SimpleFunction => (false, false, true),
    K::UnboundGenericFunction => (true, false, true),
    K::BoundGenericFunction => (true, true, true),
    K::Invalid => return Err(SymbolError::KindNotImplemented(data.kind)),
  };

  if !is_symbol_name(&data.name) {
    return Err(SymbolError::InvalidName(data.name.clone()));
  }

  let generic = if expect_generic {
    let Some(sig_id) = data.generic.signature else {
      return Err(SymbolError::GenericParam { index: 0, reason: "missing signature".into() });
    };
    let sig = interp.gen_sig(sig_id);
    let length = sig.num_params();

    if data.generic.param_names.len() != length {
      return Err(SymbolError::GenericArity { got: data.generic.param_names.len(), want: length });
    }
    let want_values = if expect_generic_values { length } else { 0 };
    if data.generic.param_values.len() != want_values {
      return Err(SymbolError::GenericArity { got: data.generic.param_values.len(), want: want_values });
    }

    for (index, name) in data.generic.param_names.iter().enumerate() {
      if !is_symbol_name(name) {
        return Err(SymbolError::GenericParam {
          index, reason: format!("invalid parameter name {name:?}"),
        });
      }
    }

    if expect_generic_values {
      for (index, value) in data.generic.param_values.iter().enumerate() {
        let param = sig.param(index);
        match (param.kind(), value) {
          (GenericParamKind::Type, GenericValue::Type(_))
          | (GenericParamKind::Uint, GenericValue::Uint(_)) => {}
          (GenericParamKind::Enum, GenericValue::EnumItem(item)) => {
            let want = interp.chase(param.ty().expect("BUG: enum param without a type"));
            if item.parent() != want {
              return Err(SymbolError::GenericParam {
                index, reason: "enum item belongs to the wrong enum".into(),
              });
            }
          }
          (kind, value) => {
            return Err(SymbolError::GenericParam {
              index, reason: format!("expected a {kind:?} value, got {value:?}"),
            });
          }
        }
      }
    }

    Some(GenericSymbolName {
      sig: sig_id,
      names: data.generic.param_names.clone(),
      values: data.generic.param_values.clone(),
    })
  } else {
    if data.generic.signature.is_some()
      || !data.generic.param_names.is_empty()
      || !data.generic.param_values.is_empty()
    {
      return Err(SymbolError::UnexpectedGeneric(data.kind));
    }
    None
  };

  let function = if expect_function {
    let Some(sig_id) = data.function.signature else {
      return Err(SymbolError::FunctionArity { got: data.function.positional_names.len(), want: 0 });
    };
    let sig = interp.func_sig(sig_id);
    let pos_length = sig.num_positional_args();

    if data.function.positional_names.len() != pos_length {
      return Err(SymbolError::FunctionArity {
        got: data.function.positional_names.len(),
        want: pos_length,
      });
    }
    for name in &data.function.positional_names {
      if !is_symbol_name(name) {
        return Err(SymbolError::InvalidName(name.clone()));
      }
    }

    Some(FunctionSymbolName { sig: sig_id, pos_names: data.function.positional_names.clone() })
  } else {
    if data.function.signature.is_some() || !data.function.positional_names.is_empty() {
      return Err(SymbolError::UnexpectedFunction(data.kind));
    }
    None
  };

  let mut cname = String::from(canon_prefix);
  let mut mname = String::from(mangle_prefix);
  let mut lname = String::new();

  cname.push_str(&data.name);
  if data.kind == K::Simple {
    lname.push_str(&data.name);
    write_name(&mut mname, &data.name);
  } else {
    lname.push_str("__");
    write_name(&mut lname, &data.name);
    write_name(&mut mname, &data.name);

    if let Some(gsn) = &generic {
      let bound = expect_generic_values;
      if bound {
        write_bound_generic_canonical(interp, &mut cname, gsn);
      } else {
        write_unbound_generic_canonical(interp, &mut cname, gsn);
      }
      write_generic_mangled(interp, &mut mname, gsn, bound);
      write_generic_mangled(interp, &mut lname, gsn, bound);
    }

    if let Some(fsn) = &function {
      write_function_canonical(interp, &mut cname, fsn);
      write_function_mangled(interp, &mut mname, fsn);
      write_function_mangled(interp, &mut lname, fsn);
    }
  }
  mname.push('Z');

  let cname = data.canonical_name_override.clone().unwrap_or(cname);
  let mname = data.mangled_name_override.clone().unwrap_or(mname);

  Ok(SymbolName { hname: data.name.clone(), lname, cname, mname, generic, function })
}

fn write_unbound_generic_canonical(interp: &Interp, out: &mut String, gsn: &GenericSymbolName) {
  let sig = interp.gen_sig(gsn.sig);
  out.push('[');
  for (index, name) in gsn.names.iter().enumerate() {
    if index != 0 { out.push_str(", ") }
    let _ = write!(out, "{name}: {}", sig.param(index).render(interp));
  }
  out.push(']');
}

fn write_bound_generic_canonical(interp: &Interp, out: &mut String, gsn: &GenericSymbolName) {
  out.push_str("#[");
  for (index, value) in gsn.values.iter().enumerate() {
    if index != 0 { out.push_str(", ") }
    match value {
      GenericValue::Type(t) => out.push_str(&interp.type_canonical_name(*t)),
      GenericValue::Uint(n) => { let _ = write!(out, "{n}"); }
      GenericValue::EnumItem(item) => out.push_str(item.name()),
    }
  }
  out.push(']');
}

fn write_function_canonical(interp: &Interp, out: &mut String, fsn: &FunctionSymbolName) {
  let sig = interp.func_sig(fsn.sig);
  out.push_str("#(");
  let mut first = true;
  for (index, name) in fsn.pos_names.iter().enumerate() {
    if !first { out.push_str(", ") }
    first = false;
    let arg = sig.positional_arg(index);
    let _ = write!(out, "{name}: ");
    if arg.is_repeated() { out.push_str("...") }
    out.push_str(&interp.type_canonical_name(arg.ty()));
  }
  for (name, arg) in sig.named_args() {
    if !first { out.push_str(", ") }
    first = false;
    let _ = write!(out, "{name}: ");
    if arg.is_repeated() { out.push_str("...") }
    out.push_str(&interp.type_canonical_name(arg.ty()));
  }
  out.push_str("): ");
  out.push_str(&interp.type_canonical_name(sig.return_type()));
}

fn write_generic_mangled(interp: &Interp, out: &mut String, gsn: &GenericSymbolName, bound: bool) {
  let sig = interp.gen_sig(gsn.sig);
  let length = sig.num_params();

  out.push(if bound { 'B' } else { 'U' });
  let _ = write!(out, "{length}");

  for index in 0..length {
    out.push(match sig.param(index).kind() {
      GenericParamKind::Type => 't',
      GenericParamKind::Uint => 'u',
      GenericParamKind::Enum => 'e',
    });
  }

  for index in 0..length {
    let param = sig.param(index);
    if param.kind() == GenericParamKind::Enum {
      let tname = interp.type_mangled_name(param.ty().expect("BUG: enum param without a type"));
      out.push_str(&tname[2..]);
    }
  }

  if bound {
    for value in &gsn.values {
      match value {
        GenericValue::Type(t) => {
          let tname = interp.type_mangled_name(*t);
          out.push_str(&tname[2..]);
        }
        GenericValue::Uint(n) => { let _ = write!(out, "{n}z"); }
        GenericValue::EnumItem(item) => {
          let _ = write!(out, "{}{}", item.name().len(), item.name());
        }
      }
    }
  }
}

fn write_function_mangled(interp: &Interp, out: &mut String, fsn: &FunctionSymbolName) {
  let sig = interp.func_sig(fsn.sig);

  out.push('F');
  let ret = interp.type_mangled_name(sig.return_type());
  out.push_str(&ret[2..]);

  let _ = write!(out, "{}", sig.num_positional_args());
  for index in 0..sig.num_positional_args() {
    let tname = interp.type_mangled_name(sig.positional_arg(index).ty());
    out.push_str(&tname[2..]);
  }

  let _ = write!(out, "{}", sig.num_named_args());
  for (name, arg) in sig.named_args() {
    let tname = interp.type_mangled_name(arg.ty());
    let _ = write!(out, "A{}{name}", name.len());
    out.push_str(&tname[2..]);
  }
}
