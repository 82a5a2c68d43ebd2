//! Generic and function signatures.
//!
//! Signatures are built through registry-backed builders and deduplicated
//! by their rendered form: building the same signature twice hands back the
//! same id. They are immutable once built.

use std::fmt::Write as _;

use crate::idx::{FuncSigId, GenSigId, TypeId};
use crate::interp::Interp;
use crate::mangle::is_symbol_name;
use crate::types::TypeKind;

/// The kind of one generic parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenericParamKind {
  /// A type parameter.
  Type,
  /// An unsigned integer parameter.
  Uint,
  /// An enum-item parameter over a specific enum type.
  Enum,
}

/// One generic parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GenericParam {
  kind: GenericParamKind,
  ty: Option<TypeId>,
}

impl GenericParam {
  /// The parameter kind.
  #[must_use] pub fn kind(self) -> GenericParamKind { self.kind }

  /// The enum type of an [`GenericParamKind::Enum`] parameter.
  #[must_use] pub fn ty(self) -> Option<TypeId> { self.ty }

  /// The human-readable form of this parameter.
  #[must_use] pub fn render(self, interp: &Interp) -> String {
    match self.kind {
      GenericParamKind::Type => "type".into(),
      GenericParamKind::Uint => "uint".into(),
      GenericParamKind::Enum =>
        interp.type_canonical_name(self.ty.expect("BUG: enum param without a type")),
    }
  }
}

/// A registered generic signature.
#[derive(Debug)]
pub struct GenericSignature {
  pub(crate) id: GenSigId,
  params: Vec<GenericParam>,
}

impl GenericSignature {
  /// The signature's id.
  #[must_use] pub fn id(&self) -> GenSigId { self.id }

  /// The number of parameters.
  #[must_use] pub fn num_params(&self) -> usize { self.params.len() }

  /// One parameter by position.
  #[must_use] pub fn param(&self, index: usize) -> GenericParam { self.params[index] }

  /// All parameters.
  #[must_use] pub fn params(&self) -> &[GenericParam] { &self.params }

  /// The human-readable form, e.g. `[type, uint]`. This string is also the
  /// dedup key of the signature.
  #[must_use] pub fn render(&self, interp: &Interp) -> String {
    let mut out = String::from("[");
    for (index, param) in self.params.iter().enumerate() {
      if index != 0 { out.push_str(", ") }
      out.push_str(&param.render(interp));
    }
    out.push(']');
    out
  }
}

/// A builder for [`GenericSignature`]s.
pub struct GenericSignatureBuilder<'a> {
  interp: &'a Interp,
  params: Vec<GenericParam>,
}

impl<'a> GenericSignatureBuilder<'a> {
  pub(crate) fn new(interp: &'a Interp) -> Self {
    GenericSignatureBuilder { interp, params: Vec::with_capacity(4) }
  }

  /// Discard the parameters collected so far.
  pub fn reset(&mut self) -> &mut Self {
    self.params.clear();
    self
  }

  /// Append a type parameter.
  pub fn with_type(&mut self) -> &mut Self {
    self.params.push(GenericParam { kind: GenericParamKind::Type, ty: None });
    self
  }

  /// Append an unsigned integer parameter.
  pub fn with_uint(&mut self) -> &mut Self {
    self.params.push(GenericParam { kind: GenericParamKind::Uint, ty: None });
    self
  }

  /// Append an enum-item parameter. `ty` must chase to an enum.
  pub fn with_enum(&mut self, ty: TypeId) -> &mut Self {
    let chased = self.interp.chase(ty);
    let kind = self.interp.ty(chased).kind();
    if kind != TypeKind::Enum {
      panic!("BUG: chased kind is {kind}, expected Enum");
    }
    self.params.push(GenericParam { kind: GenericParamKind::Enum, ty: Some(ty) });
    self
  }

  /// Register the signature, returning the id of an existing equal
  /// signature if there is one.
  pub fn build(&mut self) -> GenSigId {
    self.interp.register_gen_sig(self.params.clone())
  }
}

pub(crate) fn new_generic_signature(id: GenSigId, params: Vec<GenericParam>) -> GenericSignature {
  GenericSignature { id, params }
}

/// One function argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FunctionArg {
  ty: TypeId,
  repeat: bool,
}

impl FunctionArg {
  /// The argument type.
  #[must_use] pub fn ty(self) -> TypeId { self.ty }

  /// Whether the argument is repeated (variadic).
  #[must_use] pub fn is_repeated(self) -> bool { self.repeat }
}

/// A registered function signature.
#[derive(Debug)]
pub struct FunctionSignature {
  pub(crate) id: FuncSigId,
  ret: TypeId,
  pos: Vec<FunctionArg>,
  named: Vec<(String, FunctionArg)>,
}

impl FunctionSignature {
  /// The signature's id.
  #[must_use] pub fn id(&self) -> FuncSigId { self.id }

  /// The return type.
  #[must_use] pub fn return_type(&self) -> TypeId { self.ret }

  /// The number of positional arguments.
  #[must_use] pub fn num_positional_args(&self) -> usize { self.pos.len() }

  /// One positional argument by position.
  #[must_use] pub fn positional_arg(&self, index: usize) -> FunctionArg { self.pos[index] }

  /// All positional arguments.
  #[must_use] pub fn positional_args(&self) -> &[FunctionArg] { &self.pos }

  /// The number of named arguments.
  #[must_use] pub fn num_named_args(&self) -> usize { self.named.len() }

  /// The named arguments, in name order.
  pub fn named_args(&self) -> impl Iterator<Item = (&str, FunctionArg)> {
    self.named.iter().map(|(name, arg)| (name.as_str(), *arg))
  }

  /// One named argument by name.
  #[must_use] pub fn named_arg(&self, name: &str) -> Option<FunctionArg> {
    self.named.binary_search_by(|(n, _)| n.as_str().cmp(name)).ok().map(|i| self.named[i].1)
  }

  /// The human-readable form, e.g.
  /// `(builtin::UInt64, count: builtin::UInt64): builtin::Void`. Named
  /// arguments render in name order, so this string is deterministic and
  /// doubles as the dedup key of the signature.
  #[must_use] pub fn render(&self, interp: &Interp) -> String {
    let mut out = String::from("(");
    let mut first = true;
    for arg in &self.pos {
      if !first { out.push_str(", ") }
      first = false;
      if arg.repeat { out.push_str("...") }
      out.push_str(&interp.type_canonical_name(arg.ty));
    }
    for (name, arg) in &self.named {
      if !first { out.push_str(", ") }
      first = false;
      let _ = write!(out, "{name}: ");
      if arg.repeat { out.push_str("...") }
      out.push_str(&interp.type_canonical_name(arg.ty));
    }
    out.push_str("): ");
    out.push_str(&interp.type_canonical_name(self.ret));
    out
  }
}

/// A builder for [`FunctionSignature`]s.
pub struct FunctionSignatureBuilder<'a> {
  interp: &'a Interp,
  ret: TypeId,
  pos: Vec<FunctionArg>,
  named: Vec<(String, FunctionArg)>,
}

impl<'a> FunctionSignatureBuilder<'a> {
  pub(crate) fn new(interp: &'a Interp) -> Self {
    FunctionSignatureBuilder {
      interp,
      ret: interp.void_type(),
      pos: Vec::with_capacity(4),
      named: Vec::new(),
    }
  }

  /// Reset to a nullary signature returning `Void`.
  pub fn reset(&mut self) -> &mut Self {
    self.ret = self.interp.void_type();
    self.pos.clear();
    self.named.clear();
    self
  }

  /// Set the return type.
  pub fn with_return(&mut self, ty: TypeId) -> &mut Self {
    self.ret = ty;
    self
  }

  /// Append a positional argument.
  pub fn with_positional_arg(&mut self, ty: TypeId) -> &mut Self {
    self.pos.push(FunctionArg { ty, repeat: false });
    self
  }

  /// Append a repeated positional argument.
  pub fn with_repeated_positional_arg(&mut self, ty: TypeId) -> &mut Self {
    self.pos.push(FunctionArg { ty, repeat: true });
    self
  }

  /// Add or replace a named argument. An invalid name is a bug.
  pub fn with_named_arg(&mut self, name: &str, ty: TypeId) -> &mut Self {
    if !is_symbol_name(name) {
      panic!("BUG: name is invalid; got {name:?}");
    }
    let arg = FunctionArg { ty, repeat: false };
    match self.named.binary_search_by(|(n, _)| n.as_str().cmp(name)) {
      Ok(i) => self.named[i].1 = arg,
      Err(i) => self.named.insert(i, (name.to_owned(), arg)),
    }
    self
  }

  /// Register the signature, returning the id of an existing equal
  /// signature if there is one.
  pub fn build(&mut self) -> FuncSigId {
    self.interp.register_func_sig(self.ret, self.pos.clone(), self.named.clone())
  }
}

pub(crate) fn new_function_signature(
  id: FuncSigId, ret: TypeId, pos: Vec<FunctionArg>, named: Vec<(String, FunctionArg)>,
) -> FunctionSignature {
  FunctionSignature { id, ret, pos, named }
}
