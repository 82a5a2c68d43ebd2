//! Error machinery.
//!
//! Two taxonomies coexist. Domain errors ([`SymbolError`], [`ModuleError`],
//! [`TypeError`]) are ordinary `Result` values for conditions user input
//! can trigger. Invariant violations are `panic!("BUG: ...")` and are never
//! caught.
//!
//! Separately, [`ErrorValue`] is the *runtime* error object of the language
//! being interpreted: a scope-qualified code plus an attribute map, held by
//! the registry and referenced from typed memory by id. Error scopes are
//! registered process-wide at startup.

use std::fmt;
use std::sync::{Arc, LazyLock};

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::idx::ErrorId;
use crate::mangle::is_module_name;
use crate::symbol::SymbolKind;

/// A process-wide error-scope id.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ErrorScopeId(pub u32);

/// An error code within some scope.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ErrorCodeId(pub u32);

impl ErrorScopeId {
  /// The registered scope, if any.
  #[must_use] pub fn scope(self) -> Option<Arc<ErrorScope>> { scope_by_id(self) }

  /// Qualify a code number with this scope.
  #[must_use] pub fn with_code(self, num: u32) -> ErrorCode {
    ErrorCode { sid: self, cid: ErrorCodeId(num) }
  }
}

/// A scope-qualified error code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ErrorCode {
  /// The scope id.
  pub sid: ErrorScopeId,
  /// The code id within the scope.
  pub cid: ErrorCodeId,
}

impl ErrorCode {
  /// Is this the zero (no-error) code?
  #[must_use] pub fn is_zero(self) -> bool { self.sid.0 == 0 && self.cid.0 == 0 }

  /// Does the scope recognize this code?
  #[must_use] pub fn is_valid(self) -> bool {
    self.sid.scope().is_some_and(|scope| scope.is_valid_code(self.cid))
  }

  /// The code's name without the scope qualifier.
  #[must_use] pub fn short_name(self) -> String {
    self.sid.scope()
      .and_then(|scope| scope.code_name(self.cid))
      .unwrap_or_else(|| format!("[{:#010x}]", self.cid.0))
  }

  /// The scope-qualified name, e.g. `parse::BAD_ESCAPE`.
  #[must_use] pub fn name(self) -> String {
    let scope = match self.sid.scope() {
      Some(scope) => scope.name().to_owned(),
      None => format!("[{:#010x}]", self.sid.0),
    };
    format!("{scope}::{}", self.short_name())
  }

  /// The code's description, if the scope can produce one for this data.
  #[must_use] pub fn description(self, data: &AttrMap) -> Option<String> {
    self.sid.scope()?.code_description(self.cid, data)
  }

  /// Convert this code into another scope, consulting both scopes'
  /// conversion tables.
  #[must_use] pub fn as_scope(self, new_sid: ErrorScopeId) -> Option<ErrorCode> {
    if new_sid == self.sid {
      return Some(self);
    }
    if let Some(cid) = self.sid.scope().and_then(|s| s.convert_to(new_sid, self.cid)) {
      return Some(ErrorCode { sid: new_sid, cid });
    }
    let cid = new_sid.scope()?.convert_from(self.sid, self.cid)?;
    Some(ErrorCode { sid: new_sid, cid })
  }
}

impl fmt::Display for ErrorCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.name()) }
}

/// An attribute value on an [`ErrorValue`].
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
  /// An unsigned integer.
  Uint(u64),
  /// A signed integer.
  Int(i64),
  /// A string.
  Str(String),
}

impl fmt::Display for AttrValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AttrValue::Uint(n) => write!(f, "{n}"),
      AttrValue::Int(n) => write!(f, "{n}"),
      AttrValue::Str(s) => write!(f, "{s}"),
    }
  }
}

/// The attribute map of an [`ErrorValue`].
pub type AttrMap = HashMap<String, AttrValue>;

/// The behavior a scope plugs into the process-wide registry.
pub trait ErrorScopeImpl: Send + Sync {
  /// Does this scope define `cid`?
  fn is_valid_code(&self, cid: ErrorCodeId) -> bool;
  /// The name of `cid`, if defined.
  fn code_name(&self, cid: ErrorCodeId) -> Option<String>;
  /// A human-readable description of `cid` given an attribute map.
  fn code_description(&self, cid: ErrorCodeId, data: &AttrMap) -> Option<String>;
  /// Convert one of this scope's codes into another scope.
  fn convert_to(&self, sid: ErrorScopeId, cid: ErrorCodeId) -> Option<ErrorCodeId>;
  /// Convert another scope's code into this scope.
  fn convert_from(&self, sid: ErrorScopeId, cid: ErrorCodeId) -> Option<ErrorCodeId>;
}

/// A registered error scope.
pub struct ErrorScope {
  sid: ErrorScopeId,
  name: String,
  imp: Box<dyn ErrorScopeImpl>,
}

struct ScopeRegistry {
  by_id: HashMap<ErrorScopeId, Arc<ErrorScope>>,
  by_name: HashMap<String, Arc<ErrorScope>>,
}

static SCOPES: LazyLock<Mutex<ScopeRegistry>> = LazyLock::new(|| {
  Mutex::new(ScopeRegistry { by_id: HashMap::new(), by_name: HashMap::new() })
});

impl ErrorScope {
  /// Register a scope. Intended to run during startup; registering a
  /// duplicate id or name, or an invalid name, panics.
  pub fn register(id: u32, name: &str, imp: Box<dyn ErrorScopeImpl>) -> Arc<ErrorScope> {
    if !is_module_name(name) {
      panic!("invalid error scope name {name:?}");
    }
    let sid = ErrorScopeId(id);
    let mut scopes = SCOPES.lock();
    if let Some(old) = scopes.by_id.get(&sid) {
      panic!("{sid:?} is already registered as {:?}", old.name());
    }
    if scopes.by_name.contains_key(name) {
      panic!("error scope name {name:?} is already in use");
    }
    let scope = Arc::new(ErrorScope { sid, name: name.to_owned(), imp });
    scopes.by_id.insert(sid, scope.clone());
    scopes.by_name.insert(name.to_owned(), scope.clone());
    scope
  }

  /// The scope's id.
  #[must_use] pub fn id(&self) -> ErrorScopeId { self.sid }

  /// The scope's name.
  #[must_use] pub fn name(&self) -> &str { &self.name }

  /// Does this scope define `cid`?
  #[must_use] pub fn is_valid_code(&self, cid: ErrorCodeId) -> bool {
    self.imp.is_valid_code(cid)
  }

  /// The name of `cid`, if defined.
  #[must_use] pub fn code_name(&self, cid: ErrorCodeId) -> Option<String> {
    self.imp.code_name(cid)
  }

  /// A description of `cid` given an attribute map.
  #[must_use] pub fn code_description(&self, cid: ErrorCodeId, data: &AttrMap) -> Option<String> {
    self.imp.code_description(cid, data)
  }

  /// Convert `cid` into scope `sid`.
  #[must_use] pub fn convert_to(&self, sid: ErrorScopeId, cid: ErrorCodeId) -> Option<ErrorCodeId> {
    if sid == self.sid { return Some(cid) }
    self.imp.convert_to(sid, cid)
  }

  /// Convert scope `sid`'s code `cid` into this scope.
  #[must_use] pub fn convert_from(&self, sid: ErrorScopeId, cid: ErrorCodeId) -> Option<ErrorCodeId> {
    if sid == self.sid { return Some(cid) }
    self.imp.convert_from(sid, cid)
  }
}

impl fmt::Debug for ErrorScope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "ErrorScope({:#010x}, {:?})", self.sid.0, self.name)
  }
}

/// Look up a registered scope by id.
#[must_use] pub fn scope_by_id(sid: ErrorScopeId) -> Option<Arc<ErrorScope>> {
  SCOPES.lock().by_id.get(&sid).cloned()
}

/// Look up a registered scope by name.
#[must_use] pub fn scope_by_name(name: &str) -> Option<Arc<ErrorScope>> {
  SCOPES.lock().by_name.get(name).cloned()
}

#[derive(Clone, Debug, Default)]
struct ErrorInner {
  code: ErrorCode,
  data: AttrMap,
}

/// A runtime error object: a scope-qualified code plus attributes.
/// Referenced from typed memory by its [`ErrorId`].
#[derive(Debug)]
pub struct ErrorValue {
  id: ErrorId,
  inner: RwLock<ErrorInner>,
}

impl ErrorValue {
  pub(crate) fn new(id: ErrorId) -> ErrorValue {
    ErrorValue { id, inner: RwLock::new(ErrorInner::default()) }
  }

  /// The error's id in the registry.
  #[must_use] pub fn id(&self) -> ErrorId { self.id }

  /// Reset to the zero code with no attributes.
  pub fn clear(&self) { *self.inner.write() = ErrorInner::default() }

  /// The current code.
  #[must_use] pub fn code(&self) -> ErrorCode { self.inner.read().code }

  /// Set the code.
  pub fn set_code(&self, code: ErrorCode) { self.inner.write().code = code }

  /// Copy the attributes into `out`.
  pub fn data(&self, out: &mut AttrMap) {
    for (key, value) in &self.inner.read().data {
      out.insert(key.clone(), value.clone());
    }
  }

  /// The attribute keys, sorted.
  #[must_use] pub fn keys(&self) -> Vec<String> {
    let mut keys: Vec<String> = self.inner.read().data.keys().cloned().collect();
    keys.sort();
    keys
  }

  /// One attribute.
  #[must_use] pub fn get(&self, key: &str) -> Option<AttrValue> {
    self.inner.read().data.get(key).cloned()
  }

  /// Set one attribute.
  pub fn set(&self, key: &str, value: AttrValue) {
    self.inner.write().data.insert(key.to_owned(), value);
  }

  /// Remove one attribute.
  pub fn delete(&self, key: &str) {
    self.inner.write().data.remove(key);
  }

  /// Builder-style [`ErrorValue::set_code`].
  pub fn with_code(&self, code: ErrorCode) -> &Self {
    self.set_code(code);
    self
  }

  /// Builder-style [`ErrorValue::set`].
  pub fn with_attr(&self, key: &str, value: AttrValue) -> &Self {
    self.set(key, value);
    self
  }

  /// The code and attributes converted into another scope, if the scopes
  /// can convert.
  #[must_use] pub fn as_scope(&self, sid: ErrorScopeId) -> Option<(ErrorCode, AttrMap)> {
    let inner = self.inner.read();
    let code = inner.code.as_scope(sid)?;
    Some((code, inner.data.clone()))
  }
}

impl fmt::Display for ErrorValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let inner = self.inner.read();
    f.write_str(&inner.code.name())?;
    if let Some(description) = inner.code.description(&inner.data) {
      write!(f, ": {description}")?;
    }
    Ok(())
  }
}

/// Domain errors raised by symbol creation and symbol tables.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SymbolError {
  /// The symbol name does not match the symbol-name grammar.
  #[error("invalid symbol name {0:?}")]
  InvalidName(String),
  /// The local name is already bound in the table.
  #[error("duplicate symbol {name:?}: old {old:?}, new {new:?}")]
  Duplicate {
    /// The contested local name.
    name: String,
    /// The canonical name of the existing symbol.
    old: String,
    /// The canonical name of the rejected symbol.
    new: String,
  },
  /// The declaration data carried no type.
  #[error("symbol data for {kind:?} is missing its type")]
  MissingType {
    /// The declared kind.
    kind: SymbolKind,
  },
  /// A parameter or argument list has the wrong length.
  #[error("generic parameter count mismatch: got {got}, want {want}")]
  GenericArity {
    /// The supplied count.
    got: usize,
    /// The count the signature requires.
    want: usize,
  },
  /// One generic parameter is malformed.
  #[error("generic parameter {index}: {reason}")]
  GenericParam {
    /// The parameter position.
    index: usize,
    /// What is wrong with it.
    reason: String,
  },
  /// The positional-name list does not match the function signature.
  #[error("function signature has {want} positional arguments, but {got} names")]
  FunctionArity {
    /// The supplied count.
    got: usize,
    /// The count the signature requires.
    want: usize,
  },
  /// Generic data was supplied for a non-generic kind.
  #[error("symbol kind {0:?} does not take generic data")]
  UnexpectedGeneric(SymbolKind),
  /// Function data was supplied for a non-function kind.
  #[error("symbol kind {0:?} does not take function data")]
  UnexpectedFunction(SymbolKind),
  /// The kind is not implemented.
  #[error("symbol kind {0:?} is not implemented")]
  KindNotImplemented(SymbolKind),
  /// A resolver list with no scopes was asked to bind a name.
  #[error("resolver list has no scopes")]
  NoScopes,
}

/// Domain errors raised by module creation and imports.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ModuleError {
  /// The module name does not match the module-name grammar.
  #[error("invalid module name {0:?}")]
  InvalidName(String),
  /// The module name is reserved for internal use.
  #[error("module name {0:?} is reserved")]
  ReservedName(String),
  /// A module with this canonical name already exists.
  #[error("module name {0:?} already exists")]
  Duplicate(String),
  /// The import alias is already bound.
  #[error("duplicate module {name:?}: old {old:?}, new {new:?}")]
  DuplicateImport {
    /// The contested alias.
    name: String,
    /// The canonical name already bound.
    old: String,
    /// The canonical name that was rejected.
    new: String,
  },
  /// The module does not accept imports (builtin modules).
  #[error("module {0:?} does not accept imports")]
  NoImports(String),
}

/// Domain errors raised by type conversions.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum TypeError {
  /// `signed`/`unsigned` applied to a non-integer type.
  #[error("illegal application of {applied} with type {type_name}; \
           only primitive integer types are permitted")]
  NotPrimitiveInteger {
    /// The conversion that was attempted.
    applied: &'static str,
    /// The canonical name of the offending type.
    type_name: String,
  },
}

#[cfg(test)]
mod tests {
  use super::*;

  struct TestScope;

  impl ErrorScopeImpl for TestScope {
    fn is_valid_code(&self, cid: ErrorCodeId) -> bool { cid.0 <= 2 }
    fn code_name(&self, cid: ErrorCodeId) -> Option<String> {
      match cid.0 {
        0 => Some("OK".into()),
        1 => Some("OUT_OF_CHEESE".into()),
        2 => Some("REDO_FROM_START".into()),
        _ => None,
      }
    }
    fn code_description(&self, cid: ErrorCodeId, data: &AttrMap) -> Option<String> {
      (cid.0 == 1).then(|| match data.get("level") {
        Some(level) => format!("cheese level {level}"),
        None => "cheese exhausted".into(),
      })
    }
    fn convert_to(&self, _sid: ErrorScopeId, _cid: ErrorCodeId) -> Option<ErrorCodeId> { None }
    fn convert_from(&self, _sid: ErrorScopeId, _cid: ErrorCodeId) -> Option<ErrorCodeId> { None }
  }

  fn scope() -> Arc<ErrorScope> {
    static SCOPE: std::sync::OnceLock<Arc<ErrorScope>> = std::sync::OnceLock::new();
    SCOPE
      .get_or_init(|| ErrorScope::register(0xf00d_0001, "cheese", Box::new(TestScope)))
      .clone()
  }

  #[test]
  fn codes_render_with_scope_and_description() {
    let scope = scope();
    let code = scope.id().with_code(1);
    assert!(code.is_valid());
    assert_eq!(code.name(), "cheese::OUT_OF_CHEESE");
    assert_eq!(code.short_name(), "OUT_OF_CHEESE");
    let mut data = AttrMap::new();
    assert_eq!(code.description(&data).as_deref(), Some("cheese exhausted"));
    data.insert("level".into(), AttrValue::Uint(3));
    assert_eq!(code.description(&data).as_deref(), Some("cheese level 3"));
  }

  #[test]
  fn unknown_codes_render_hex() {
    let scope = scope();
    let code = scope.id().with_code(99);
    assert!(!code.is_valid());
    assert_eq!(code.short_name(), "[0x00000063]");
  }

  #[test]
  fn error_values_carry_attributes() {
    let scope = scope();
    let interp = crate::interp::Interp::new();
    let err = interp.new_error();
    err.with_code(scope.id().with_code(1)).with_attr("level", AttrValue::Int(-2));
    assert_eq!(err.to_string(), "cheese::OUT_OF_CHEESE: cheese level -2");
    assert_eq!(err.keys(), vec!["level".to_owned()]);
    err.clear();
    assert!(err.code().is_zero());
  }
}
