//! Modules: named symbol scopes with import aliases.

use hashbrown::HashMap;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::error::ModuleError;
use crate::interp::Interp;
use crate::mangle::is_module_name;
use crate::symbol::SymbolTable;

/// One module. Modules are process-scoped: they are created through the
/// registry and live as long as it does.
///
/// Imports are stored as alias-to-canonical-name bindings and resolved
/// through the registry on lookup, so a module holds no owning references
/// to other modules (including its own `this` alias).
#[derive(Debug)]
pub struct Module {
  cname: String,
  mname: String,
  imports: Option<RwLock<HashMap<String, String>>>,
  symbols: SymbolTable,
}

impl Module {
  pub(crate) fn new(cname: String, mname: String, with_imports: bool) -> Module {
    let xname = &mname[..mname.len() - 1];
    let symbols = SymbolTable::new(format!("{cname}::"), format!("{xname}G"));
    Module {
      cname,
      mname,
      imports: with_imports.then(|| RwLock::new(HashMap::with_capacity(16))),
      symbols,
    }
  }

  pub(crate) fn seed_import(&self, alias: &str, target: &str) {
    if let Some(imports) = &self.imports {
      imports.write().insert(alias.to_owned(), target.to_owned());
    }
  }

  /// The module's canonical name, e.g. `builtin::enum`.
  #[must_use] pub fn canonical_name(&self) -> &str { &self.cname }

  /// The module's mangled name, e.g. `_AM7builtinM4enumZ`.
  #[must_use] pub fn mangled_name(&self) -> &str { &self.mname }

  /// The module's symbol table.
  #[must_use] pub fn symbols(&self) -> &SymbolTable { &self.symbols }

  /// Copy every import alias into `out`.
  pub fn all_imports(&self, out: &mut HashMap<String, String>) {
    if let Some(imports) = &self.imports {
      for (alias, target) in imports.read().iter() {
        out.insert(alias.clone(), target.clone());
      }
    }
  }

  /// Resolve an import alias to the module it names.
  #[must_use] pub fn import(&self, interp: &Interp, alias: &str) -> Option<Arc<Module>> {
    let imports = self.imports.as_ref()?;
    let target = imports.read().get(alias)?.clone();
    interp.module_by_name(&target)
  }

  /// Bind an import alias. Rebinding an existing alias is a domain error.
  pub fn add_import(&self, alias: &str, target: &Module) -> Result<(), ModuleError> {
    if !is_module_name(alias) {
      return Err(ModuleError::InvalidName(alias.to_owned()));
    }
    let Some(imports) = &self.imports else {
      return Err(ModuleError::NoImports(self.cname.clone()));
    };
    let mut imports = imports.write();
    if let Some(old) = imports.get(alias) {
      return Err(ModuleError::DuplicateImport {
        name: alias.to_owned(),
        old: old.clone(),
        new: target.canonical_name().to_owned(),
      });
    }
    imports.insert(alias.to_owned(), target.canonical_name().to_owned());
    Ok(())
  }
}
