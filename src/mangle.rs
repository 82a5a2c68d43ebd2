//! Name grammars and the mangling scheme.
//!
//! Mangled names are the compact, deterministic encodings used for lookup
//! and ABI purposes; canonical names are their human-readable mirrors. The
//! grammar is stable: a module `a::bc` mangles to `_AM1aM2bcZ`, and a
//! global symbol `name` inside it to `_AM1aM2bcGN4nameZ`. Names that are
//! already mangled (`__` followed by an upper-case letter) pass through
//! with their `__` stripped.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;

use crate::module::Module;

const MODULE_NAME_COMPONENT: &str = "[A-Za-z][0-9A-Za-z]*(?:_[0-9A-Za-z]+)*";

static MODULE_NAME: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(&format!(
    "^(?:_|{MODULE_NAME_COMPONENT}(?:::{MODULE_NAME_COMPONENT})*)$"
  )).expect("BUG: bad module name regex")
});

static SYMBOL_NAME: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^[A-Za-z$_][0-9A-Za-z_]*$").expect("BUG: bad symbol name regex")
});

static RESERVED_MODULE_NAME: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^(?:_|this|main|builtin|builtin::.*)$").expect("BUG: bad reserved name regex")
});

/// Is `name` a well-formed canonical module name?
#[must_use] pub fn is_module_name(name: &str) -> bool { MODULE_NAME.is_match(name) }

/// Is `name` a well-formed symbol name?
#[must_use] pub fn is_symbol_name(name: &str) -> bool { SYMBOL_NAME.is_match(name) }

/// Is `name` reserved for internal use (`_`, `this`, `main`, `builtin`,
/// `builtin::*`)?
#[must_use] pub fn is_reserved_module_name(name: &str) -> bool {
  RESERVED_MODULE_NAME.is_match(name)
}

/// Mangle a canonical module name: `_A`, then `M<len><bytes>` per
/// `::`-separated component, then `Z`. An invalid name is a bug.
#[must_use] pub fn mangle_module_name(name: &str) -> String {
  if !is_module_name(name) {
    panic!("BUG: invalid module name {name:?}");
  }

  let mut out = String::with_capacity(3 + name.len() + 4 * name.matches("::").count());
  out.push_str("_A");
  for piece in name.split("::") {
    let _ = write!(out, "M{}{piece}", piece.len());
  }
  out.push('Z');
  out
}

/// Is `name` pre-mangled (`__` followed by an upper-case letter)? Such
/// names are spliced into manglings verbatim, minus the `__`.
#[must_use] pub fn is_pre_mangled(name: &str) -> bool {
  let bytes = name.as_bytes();
  bytes.len() >= 3 && bytes[0] == b'_' && bytes[1] == b'_' && bytes[2].is_ascii_uppercase()
}

/// Append `N<len><name>` to a mangling buffer.
pub(crate) fn write_name(out: &mut String, name: &str) {
  let _ = write!(out, "N{}{name}", name.len());
}

pub(crate) fn mangle_symbol(parent_mangled: &str, selector: char, name: &str) -> String {
  if !is_symbol_name(name) {
    panic!("BUG: invalid symbol name {name:?}");
  }

  let outer = &parent_mangled[..parent_mangled.len() - 1];
  let mut out = String::with_capacity(outer.len() + name.len() + 8);
  out.push_str(outer);
  out.push(selector);
  if is_pre_mangled(name) {
    out.push_str(&name[2..]);
  } else {
    write_name(&mut out, name);
  }
  out.push('Z');
  out
}

/// Mangle a global symbol name inside a module: the module mangling minus
/// its trailing `Z`, the selector byte `G`, the name, then `Z`.
#[must_use] pub fn mangle_global_symbol_name(module: &Module, name: &str) -> String {
  mangle_symbol(module.mangled_name(), 'G', name)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn module_name_grammar() {
    for ok in [
      "builtin", "snake_case", "CamelCase", "typical::name", "has::three::components",
      "four::components::like::this", "Camel::Case", "_",
    ] {
      assert!(is_module_name(ok), "{ok:?} should be a module name");
    }
    for bad in [
      "one:colon", "three:::colons", "two__underscores", "something::two__underscores", "",
      "_a", "_leading_underscore", "_LeadingUnderscore", "something::_leading_underscore",
      "__", "__a", "__two_leading_underscores", "$", "$a", "something::$leading_dollar",
    ] {
      assert!(!is_module_name(bad), "{bad:?} should not be a module name");
    }
  }

  #[test]
  fn symbol_name_grammar() {
    for ok in [
      "simple", "snake_case", "CamelCase", "two__underscores", "_", "_leading_underscore",
      "__two_leading_underscores", "_leading_and_trailing_underscores_", "$", "$leading_dollar",
      "$_dollar_underscore", "$CamelCase",
    ] {
      assert!(is_symbol_name(ok), "{ok:?} should be a symbol name");
    }
    for bad in ["", "mid$dollar", "trailing_dollar$", "$$two_leading_dollars", "not a name"] {
      assert!(!is_symbol_name(bad), "{bad:?} should not be a symbol name");
    }
  }

  #[test]
  fn reserved_module_names() {
    for name in ["_", "this", "main", "builtin", "builtin::enum", "builtin::anything"] {
      assert!(is_reserved_module_name(name));
    }
    for name in ["builtins", "thismodule", "mymain", "user::builtin"] {
      assert!(!is_reserved_module_name(name));
    }
  }

  #[test]
  fn module_mangling() {
    assert_eq!(mangle_module_name("builtin"), "_AM7builtinZ");
    assert_eq!(mangle_module_name("builtin::enum"), "_AM7builtinM4enumZ");
    assert_eq!(mangle_module_name("a::bc::def"), "_AM1aM2bcM3defZ");
    assert_eq!(mangle_module_name("_"), "_AM1_Z");
  }

  #[test]
  fn module_mangling_is_injective_on_tricky_pairs() {
    // Without length prefixes these pairs would collide.
    assert_ne!(mangle_module_name("ab::c"), mangle_module_name("a::bc"));
    assert_ne!(mangle_module_name("abc"), mangle_module_name("ab::c"));
  }

  #[test]
  #[should_panic(expected = "BUG: invalid module name")]
  fn bad_module_name_is_a_bug() {
    let _ = mangle_module_name("not a module");
  }

  #[test]
  fn pre_mangled_detection() {
    assert!(is_pre_mangled("__G00000001"));
    assert!(is_pre_mangled("__Xdeadbeef"));
    assert!(!is_pre_mangled("__g"));
    assert!(!is_pre_mangled("_G"));
    assert!(!is_pre_mangled("plain"));
  }

  #[test]
  fn symbol_mangling_splices_into_parent() {
    assert_eq!(mangle_symbol("_AM7builtinZ", 'G', "Null"), "_AM7builtinGN4NullZ");
    assert_eq!(mangle_symbol("_AM7builtinZ", 'G', "__Xff"), "_AM7builtinGXffZ");
  }
}
