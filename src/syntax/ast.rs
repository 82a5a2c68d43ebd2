//! The AST: files, items, and expressions, with source-shaped printing.
//!
//! Nodes print back to source-equivalent text via [`std::fmt::Display`];
//! the CLI uses this as its round-trip output. Declaration bodies are kept
//! as balanced token groups: the front end's job ends at shaping them, and
//! the statement model in [`crate::types::statement`] is the structured
//! form the core consumes.

use std::fmt;

use super::token::{Token, TokenKind};

/// A parsed source file.
#[derive(Clone, Debug, Default)]
pub struct File {
  /// The `#!` line, if the file starts with one.
  pub shebang: Option<String>,
  /// The top-level items, in source order.
  pub items: Vec<Item>,
}

/// One top-level item.
#[derive(Clone, Debug)]
pub enum Item {
  /// `import a::b;` or `import a::b alias c;`
  Import(ImportDecl),
  /// `#name(args...)`
  Pragma(PragmaApply),
  /// `struct`/`union`/`bitfield`/`interface`/`type` declarations.
  Type(TypeDecl),
  /// `func name(...) {...}`
  Func(FuncDecl),
  /// `var`/`let`/`const`/`static` declarations.
  Var(VarDecl),
  /// An expression statement.
  Expr(ExprStmt),
}

/// An import declaration.
#[derive(Clone, Debug)]
pub struct ImportDecl {
  /// The `::`-separated module path.
  pub path: Vec<String>,
  /// The local alias, if one was given.
  pub alias: Option<String>,
}

/// A pragma application, e.g. `#version(1,2,3)`.
#[derive(Clone, Debug)]
pub struct PragmaApply {
  /// The pragma name, `#` included.
  pub name: String,
  /// The argument expressions.
  pub args: Vec<Expr>,
}

/// The keyword introducing a type declaration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeDeclKind {
  /// `struct`
  Struct,
  /// `union`
  Union,
  /// `bitfield`
  Bitfield,
  /// `interface`
  Interface,
  /// `type`
  Type,
}

impl TypeDeclKind {
  fn keyword(self) -> &'static str {
    match self {
      TypeDeclKind::Struct => "struct",
      TypeDeclKind::Union => "union",
      TypeDeclKind::Bitfield => "bitfield",
      TypeDeclKind::Interface => "interface",
      TypeDeclKind::Type => "type",
    }
  }
}

/// A type declaration with its body kept as a balanced token group.
#[derive(Clone, Debug)]
pub struct TypeDecl {
  /// The introducing keyword.
  pub kind: TypeDeclKind,
  /// The declared name.
  pub name: String,
  /// The body tokens, outer braces excluded. `type` aliases have no body
  /// and carry their aliased expression instead.
  pub body: Vec<Token>,
  /// The aliased type expression, for `type name = expr;`.
  pub alias_of: Option<Expr>,
}

/// A function declaration with its body kept as a balanced token group.
#[derive(Clone, Debug)]
pub struct FuncDecl {
  /// The declared name.
  pub name: String,
  /// The parameter tokens, outer parens excluded.
  pub params: Vec<Token>,
  /// The body tokens, outer braces excluded.
  pub body: Vec<Token>,
}

/// The keyword introducing a variable declaration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarKind {
  /// `var`
  Var,
  /// `let`
  Let,
  /// `const`
  Const,
  /// `static`
  Static,
}

impl VarKind {
  fn keyword(self) -> &'static str {
    match self {
      VarKind::Var => "var",
      VarKind::Let => "let",
      VarKind::Const => "const",
      VarKind::Static => "static",
    }
  }
}

/// A variable declaration.
#[derive(Clone, Debug)]
pub struct VarDecl {
  /// The introducing keyword.
  pub kind: VarKind,
  /// The declared name.
  pub name: String,
  /// The declared type, if annotated.
  pub ty: Option<Expr>,
  /// The initializer, if present.
  pub init: Option<Expr>,
}

/// An expression statement.
#[derive(Clone, Debug)]
pub struct ExprStmt {
  /// The expression.
  pub expr: Expr,
}

/// An expression.
#[derive(Clone, Debug)]
pub enum Expr {
  /// A possibly `::`-qualified name.
  Name(Vec<String>),
  /// A literal token (number, string, regex, PEG, `null`).
  Literal(Token),
  /// A prefix operator application.
  Unary {
    /// The operator.
    op: TokenKind,
    /// The operand.
    expr: Box<Expr>,
  },
  /// An infix operator application.
  Binary {
    /// The operator.
    op: TokenKind,
    /// The left operand.
    lhs: Box<Expr>,
    /// The right operand.
    rhs: Box<Expr>,
  },
  /// A call.
  Call {
    /// The callee.
    callee: Box<Expr>,
    /// The arguments.
    args: Vec<Expr>,
  },
  /// An indexing operation.
  Index {
    /// The indexed expression.
    base: Box<Expr>,
    /// The index.
    index: Box<Expr>,
  },
  /// A member access.
  Member {
    /// The accessed expression.
    base: Box<Expr>,
    /// The member name.
    name: String,
  },
  /// A parenthesized group.
  Paren(Box<Expr>),
}

/// The source text of an operator token kind. Unprintable kinds are a bug.
#[must_use] pub fn op_text(kind: TokenKind) -> &'static str {
  use TokenKind::*;
  match kind {
    Bang => "!",
    BangEqual => "!=",
    Percent => "%",
    PercentEqual => "%=",
    Amp => "&",
    AmpAmp => "&&",
    AmpEqual => "&=",
    Star => "*",
    StarStar => "**",
    StarEqual => "*=",
    Plus => "+",
    PlusEqual => "+=",
    Minus => "-",
    MinusEqual => "-=",
    Dot => ".",
    DotDot => "..",
    DotDotDot => "...",
    Slash => "/",
    SlashEqual => "/=",
    Colon => ":",
    ColonColon => "::",
    ColonEqual => ":=",
    Less => "<",
    LessEqual => "<=",
    LessLess => "<<",
    LessLessBar => "<<|",
    Equal => "=",
    EqualEqual => "==",
    Greater => ">",
    GreaterEqual => ">=",
    GreaterGreater => ">>",
    GreaterGreaterBar => ">>|",
    Question => "?",
    Caret => "^",
    CaretCaret => "^^",
    CaretEqual => "^=",
    Bar => "|",
    BarBar => "||",
    BarEqual => "|=",
    Tilde => "~",
    _ => panic!("BUG: {kind:?} is not an operator"),
  }
}

fn write_token_group(f: &mut fmt::Formatter<'_>, tokens: &[Token]) -> fmt::Result {
  let mut first = true;
  for token in tokens {
    if token.kind.is_trivia() {
      continue;
    }
    if !first {
      f.write_str(" ")?;
    }
    first = false;
    f.write_str(&token.raw)?;
  }
  Ok(())
}

impl fmt::Display for File {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(shebang) = &self.shebang {
      writeln!(f, "{shebang}")?;
    }
    for item in &self.items {
      writeln!(f, "{item}")?;
    }
    Ok(())
  }
}

impl fmt::Display for Item {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Item::Import(decl) => decl.fmt(f),
      Item::Pragma(decl) => decl.fmt(f),
      Item::Type(decl) => decl.fmt(f),
      Item::Func(decl) => decl.fmt(f),
      Item::Var(decl) => decl.fmt(f),
      Item::Expr(stmt) => write!(f, "{};", stmt.expr),
    }
  }
}

impl fmt::Display for ImportDecl {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "import {}", self.path.join("::"))?;
    if let Some(alias) = &self.alias {
      write!(f, " alias {alias}")?;
    }
    f.write_str(";")
  }
}

impl fmt::Display for PragmaApply {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.name)?;
    if !self.args.is_empty() {
      f.write_str("(")?;
      for (index, arg) in self.args.iter().enumerate() {
        if index != 0 {
          f.write_str(", ")?;
        }
        arg.fmt(f)?;
      }
      f.write_str(")")?;
    }
    Ok(())
  }
}

impl fmt::Display for TypeDecl {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.kind.keyword(), self.name)?;
    if let Some(alias_of) = &self.alias_of {
      return write!(f, " = {alias_of};");
    }
    f.write_str(" { ")?;
    write_token_group(f, &self.body)?;
    f.write_str(" }")
  }
}

impl fmt::Display for FuncDecl {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "func {}(", self.name)?;
    write_token_group(f, &self.params)?;
    f.write_str(") { ")?;
    write_token_group(f, &self.body)?;
    f.write_str(" }")
  }
}

impl fmt::Display for VarDecl {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.kind.keyword(), self.name)?;
    if let Some(ty) = &self.ty {
      write!(f, ": {ty}")?;
    }
    if let Some(init) = &self.init {
      write!(f, " = {init}")?;
    }
    f.write_str(";")
  }
}

impl fmt::Display for Expr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Expr::Name(path) => f.write_str(&path.join("::")),
      Expr::Literal(token) => f.write_str(&token.raw),
      Expr::Unary { op, expr } => write!(f, "{}{expr}", op_text(*op)),
      Expr::Binary { op, lhs, rhs } => write!(f, "{lhs} {} {rhs}", op_text(*op)),
      Expr::Call { callee, args } => {
        write!(f, "{callee}(")?;
        for (index, arg) in args.iter().enumerate() {
          if index != 0 {
            f.write_str(", ")?;
          }
          arg.fmt(f)?;
        }
        f.write_str(")")
      }
      Expr::Index { base, index } => write!(f, "{base}[{index}]"),
      Expr::Member { base, name } => write!(f, "{base}.{name}"),
      Expr::Paren(inner) => write!(f, "({inner})"),
    }
  }
}
