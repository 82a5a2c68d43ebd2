//! The recursive-descent parser.
//!
//! The parser owns the whole token buffer and a mark/rewind cursor. Errors
//! are collected, not thrown: a failed item emits a positioned error, the
//! cursor recovers at the next statement boundary, and parsing continues,
//! so callers always get the best partial [`File`].

use std::fmt;

use thiserror::Error;

use super::ast::{
  Expr, ExprStmt, File, FuncDecl, ImportDecl, Item, PragmaApply, TypeDecl, TypeDeclKind, VarDecl,
  VarKind,
};
use super::lexer::Lexer;
use super::pos::Position;
use super::token::{Token, TokenKind};

/// A positioned parse error.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message} at {pos}")]
pub struct ParseError {
  /// Where the error was noticed.
  pub pos: Position,
  /// What went wrong.
  pub message: String,
}

/// A saved cursor state. Rewinding also drops errors emitted since the
/// mark.
#[derive(Clone, Copy, Debug)]
pub struct Mark {
  index: usize,
  errors: usize,
}

/// The parser.
pub struct Parser {
  tokens: Vec<Token>,
  index: usize,
  errors: Vec<ParseError>,
}

impl Parser {
  /// Create a parser by draining a lexer.
  #[must_use] pub fn new(lexer: Lexer) -> Parser {
    Parser { tokens: lexer.collect(), index: 0, errors: Vec::with_capacity(4) }
  }

  /// The errors collected so far.
  #[must_use] pub fn errors(&self) -> &[ParseError] { &self.errors }

  fn emit(&mut self, pos: Position, message: impl Into<String>) {
    self.errors.push(ParseError { pos, message: message.into() });
  }

  /// Save the cursor.
  #[must_use] pub fn mark(&self) -> Mark {
    Mark { index: self.index, errors: self.errors.len() }
  }

  /// Restore a saved cursor, dropping errors emitted since.
  pub fn rewind(&mut self, mark: Mark) {
    self.index = mark.index;
    self.errors.truncate(mark.errors);
  }

  fn skip_trivia(&mut self) {
    while self.tokens.get(self.index).is_some_and(|tok| tok.kind.is_trivia()) {
      self.index += 1;
    }
  }

  fn peek(&self) -> &Token {
    self.tokens.get(self.index).unwrap_or_else(|| {
      self.tokens.last().expect("BUG: the lexer always emits Eof")
    })
  }

  fn at(&self, kind: TokenKind) -> bool { self.peek().kind == kind }

  fn bump(&mut self) -> Token {
    let token = self.peek().clone();
    if self.index < self.tokens.len() {
      self.index += 1;
    }
    token
  }

  fn consume(&mut self, kind: TokenKind) -> Option<Token> {
    self.at(kind).then(|| self.bump())
  }

  fn expect(&mut self, kind: TokenKind, what: &str) -> Option<Token> {
    if let Some(token) = self.consume(kind) {
      return Some(token);
    }
    let token = self.peek().clone();
    self.emit(token.start, format!("expected {what}, found {token}"));
    None
  }

  /// Skip forward to just past the next statement boundary.
  fn recover(&mut self) {
    loop {
      match self.peek().kind {
        TokenKind::Eof => return,
        TokenKind::Semicolon | TokenKind::Vws | TokenKind::RBrace => {
          self.bump();
          return;
        }
        _ => { self.bump(); }
      }
    }
  }

  /// Parse the whole file.
  pub fn parse_file(&mut self) -> File {
    let mut file = File::default();

    if let Some(token) = self.consume(TokenKind::Shebang) {
      file.shebang = Some(token.raw);
    }

    loop {
      self.skip_trivia();
      if self.at(TokenKind::Eof) {
        break;
      }
      match self.parse_item() {
        Some(item) => file.items.push(item),
        None => self.recover(),
      }
    }

    file
  }

  fn parse_item(&mut self) -> Option<Item> {
    match self.peek().kind {
      TokenKind::KwImport => self.parse_import().map(Item::Import),
      TokenKind::Pragma => self.parse_pragma().map(Item::Pragma),
      TokenKind::KwStruct => self.parse_type_decl(TypeDeclKind::Struct).map(Item::Type),
      TokenKind::KwUnion => self.parse_type_decl(TypeDeclKind::Union).map(Item::Type),
      TokenKind::KwBitfield => self.parse_type_decl(TypeDeclKind::Bitfield).map(Item::Type),
      TokenKind::KwInterface => self.parse_type_decl(TypeDeclKind::Interface).map(Item::Type),
      TokenKind::KwType => self.parse_type_alias().map(Item::Type),
      TokenKind::KwFunc => self.parse_func().map(Item::Func),
      TokenKind::KwVar => self.parse_var(VarKind::Var).map(Item::Var),
      TokenKind::KwLet => self.parse_var(VarKind::Let).map(Item::Var),
      TokenKind::KwConst => self.parse_var(VarKind::Const).map(Item::Var),
      TokenKind::KwStatic => self.parse_var(VarKind::Static).map(Item::Var),
      _ => self.parse_expr_stmt().map(Item::Expr),
    }
  }

  fn parse_module_path(&mut self) -> Option<Vec<String>> {
    let mut path = vec![self.expect(TokenKind::Ident, "a module name")?.raw];
    loop {
      self.skip_trivia();
      if self.consume(TokenKind::ColonColon).is_none() {
        break;
      }
      self.skip_trivia();
      path.push(self.expect(TokenKind::Ident, "a module name component")?.raw);
    }
    Some(path)
  }

  fn parse_import(&mut self) -> Option<ImportDecl> {
    self.bump(); // import
    self.skip_trivia();
    let path = self.parse_module_path()?;

    self.skip_trivia();
    let alias = if self.consume(TokenKind::KwAlias).is_some() {
      self.skip_trivia();
      Some(self.expect(TokenKind::Ident, "an import alias")?.raw)
    } else {
      None
    };

    self.skip_trivia();
    self.expect(TokenKind::Semicolon, "';' after import")?;
    Some(ImportDecl { path, alias })
  }

  fn parse_pragma(&mut self) -> Option<PragmaApply> {
    let name = self.bump().raw;
    let mut args = Vec::new();

    if self.consume(TokenKind::LParen).is_some() {
      loop {
        self.skip_trivia();
        if self.consume(TokenKind::RParen).is_some() {
          break;
        }
        args.push(self.parse_expr(0)?);
        self.skip_trivia();
        if self.consume(TokenKind::Comma).is_none() {
          self.expect(TokenKind::RParen, "')' after pragma arguments")?;
          break;
        }
      }
    }

    Some(PragmaApply { name, args })
  }

  /// Collect a brace- or paren-balanced token group. The opening token has
  /// not been consumed yet; the group is returned without its delimiters.
  fn parse_group(&mut self, open: TokenKind, close: TokenKind, what: &str) -> Option<Vec<Token>> {
    self.skip_trivia();
    self.expect(open, what)?;
    let mut depth = 1u32;
    let mut body = Vec::new();
    loop {
      let token = self.bump();
      match token.kind {
        TokenKind::Eof => {
          self.emit(token.start, format!("unexpected end of input inside {what}"));
          return None;
        }
        kind if kind == open => {
          depth += 1;
          body.push(token);
        }
        kind if kind == close => {
          depth -= 1;
          if depth == 0 {
            return Some(body);
          }
          body.push(token);
        }
        _ => body.push(token),
      }
    }
  }

  fn parse_type_decl(&mut self, kind: TypeDeclKind) -> Option<TypeDecl> {
    self.bump(); // the keyword
    self.skip_trivia();
    let name = self.expect(TokenKind::Ident, "a type name")?.raw;
    let body = self.parse_group(TokenKind::LBrace, TokenKind::RBrace, "the declaration body")?;
    Some(TypeDecl { kind, name, body, alias_of: None })
  }

  fn parse_type_alias(&mut self) -> Option<TypeDecl> {
    self.bump(); // type
    self.skip_trivia();
    let name = self.expect(TokenKind::Ident, "a type name")?.raw;
    self.skip_trivia();
    self.expect(TokenKind::Equal, "'=' in type alias")?;
    self.skip_trivia();
    let alias_of = self.parse_expr(0)?;
    self.skip_trivia();
    self.expect(TokenKind::Semicolon, "';' after type alias")?;
    Some(TypeDecl { kind: TypeDeclKind::Type, name, body: Vec::new(), alias_of: Some(alias_of) })
  }

  fn parse_func(&mut self) -> Option<FuncDecl> {
    self.bump(); // func
    self.skip_trivia();
    let name = self.expect(TokenKind::Ident, "a function name")?.raw;
    let params = self.parse_group(TokenKind::LParen, TokenKind::RParen, "the parameter list")?;
    let body = self.parse_group(TokenKind::LBrace, TokenKind::RBrace, "the function body")?;
    Some(FuncDecl { name, params, body })
  }

  fn parse_var(&mut self, kind: VarKind) -> Option<VarDecl> {
    self.bump(); // the keyword
    self.skip_trivia();
    let name = self.expect(TokenKind::Ident, "a variable name")?.raw;

    self.skip_trivia();
    let ty = if self.consume(TokenKind::Colon).is_some() {
      self.skip_trivia();
      Some(self.parse_expr(0)?)
    } else {
      None
    };

    self.skip_trivia();
    let init = if self.consume(TokenKind::Equal).is_some() {
      self.skip_trivia();
      Some(self.parse_expr(0)?)
    } else {
      None
    };

    self.skip_trivia();
    self.expect(TokenKind::Semicolon, "';' after declaration")?;
    Some(VarDecl { kind, name, ty, init })
  }

  fn parse_expr_stmt(&mut self) -> Option<ExprStmt> {
    let expr = self.parse_expr(0)?;
    self.skip_trivia();
    self.expect(TokenKind::Semicolon, "';' after expression")?;
    Some(ExprStmt { expr })
  }

  fn prefix_power(kind: TokenKind) -> Option<u8> {
    match kind {
      TokenKind::Bang | TokenKind::Minus | TokenKind::Plus | TokenKind::Tilde
      | TokenKind::Star | TokenKind::Amp => Some(25),
      _ => None,
    }
  }

  /// Left and right binding power of an infix operator. A right power
  /// below the left power makes the operator right-associative.
  fn infix_power(kind: TokenKind) -> Option<(u8, u8)> {
    use TokenKind::*;
    Some(match kind {
      Equal | PlusEqual | MinusEqual | StarEqual | SlashEqual | PercentEqual
      | AmpEqual | BarEqual | CaretEqual | ColonEqual => (2, 1),
      BarBar => (3, 4),
      AmpAmp => (5, 6),
      EqualEqual | BangEqual => (7, 8),
      Less | LessEqual | Greater | GreaterEqual => (9, 10),
      DotDot | DotDotDot => (11, 12),
      Bar | Caret | CaretCaret => (13, 14),
      Amp => (15, 16),
      LessLess | GreaterGreater | LessLessBar | GreaterGreaterBar => (17, 18),
      Plus | Minus => (19, 20),
      Star | Slash | Percent => (21, 22),
      StarStar => (24, 23),
      _ => return None,
    })
  }

  fn parse_expr(&mut self, min_power: u8) -> Option<Expr> {
    self.skip_trivia();
    let mut lhs = self.parse_prefix()?;

    loop {
      self.skip_trivia();
      let kind = self.peek().kind;

      lhs = match kind {
        TokenKind::LParen => {
          self.bump();
          let mut args = Vec::new();
          loop {
            self.skip_trivia();
            if self.consume(TokenKind::RParen).is_some() {
              break;
            }
            args.push(self.parse_expr(0)?);
            self.skip_trivia();
            if self.consume(TokenKind::Comma).is_none() {
              self.expect(TokenKind::RParen, "')' after call arguments")?;
              break;
            }
          }
          Expr::Call { callee: Box::new(lhs), args }
        }

        TokenKind::LBracket => {
          self.bump();
          let index = self.parse_expr(0)?;
          self.skip_trivia();
          self.expect(TokenKind::RBracket, "']' after index")?;
          Expr::Index { base: Box::new(lhs), index: Box::new(index) }
        }

        TokenKind::Dot => {
          self.bump();
          self.skip_trivia();
          let name = self.expect(TokenKind::Ident, "a member name")?.raw;
          Expr::Member { base: Box::new(lhs), name }
        }

        _ => {
          let Some((left, right)) = Self::infix_power(kind) else { break };
          if left < min_power {
            break;
          }
          self.bump();
          let rhs = self.parse_expr(right)?;
          Expr::Binary { op: kind, lhs: Box::new(lhs), rhs: Box::new(rhs) }
        }
      };
    }

    Some(lhs)
  }

  fn parse_prefix(&mut self) -> Option<Expr> {
    let token = self.peek().clone();
    match token.kind {
      TokenKind::Ident => {
        let mut path = vec![self.bump().raw];
        while self.at(TokenKind::ColonColon) {
          self.bump();
          self.skip_trivia();
          path.push(self.expect(TokenKind::Ident, "a name after '::'")?.raw);
        }
        Some(Expr::Name(path))
      }

      TokenKind::Number | TokenKind::Str | TokenKind::Regex | TokenKind::Peg
      | TokenKind::KwNull => Some(Expr::Literal(self.bump())),

      TokenKind::LParen => {
        self.bump();
        let inner = self.parse_expr(0)?;
        self.skip_trivia();
        self.expect(TokenKind::RParen, "')' after expression")?;
        Some(Expr::Paren(Box::new(inner)))
      }

      kind => {
        if let Some(power) = Self::prefix_power(kind) {
          self.bump();
          let expr = self.parse_expr(power)?;
          return Some(Expr::Unary { op: kind, expr: Box::new(expr) });
        }
        self.emit(token.start, format!("expected an expression, found {token}"));
        None
      }
    }
  }
}

impl fmt::Debug for Parser {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Parser")
      .field("index", &self.index)
      .field("tokens", &self.tokens.len())
      .field("errors", &self.errors.len())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(input: &str) -> (File, Vec<ParseError>) {
    let mut parser = Parser::new(Lexer::new(input));
    let file = parser.parse_file();
    (file, parser.errors().to_vec())
  }

  fn roundtrip(input: &str) -> String {
    let (file, errors) = parse(input);
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    file.to_string()
  }

  #[test]
  fn imports_and_pragmas() {
    assert_eq!(roundtrip("import a::b;"), "import a::b;\n");
    assert_eq!(roundtrip("import m alias x;"), "import m alias x;\n");
    assert_eq!(roundtrip("#version(1,2,3)"), "#version(1, 2, 3)\n");
  }

  #[test]
  fn declarations() {
    assert_eq!(
      roundtrip("struct Point { var x: UInt32; var y: UInt32; }"),
      "struct Point { var x : UInt32 ; var y : UInt32 ; }\n",
    );
    assert_eq!(roundtrip("type Id = builtin::UInt64;"), "type Id = builtin::UInt64;\n");
    assert_eq!(
      roundtrip("func add(a, b) { return a + b; }"),
      "func add(a , b) { return a + b ; }\n",
    );
    assert_eq!(roundtrip("let x = 1 + 2 * 3;"), "let x = 1 + 2 * 3;\n");
  }

  #[test]
  fn expression_precedence() {
    assert_eq!(roundtrip("x = a + b * c == d << e;"), "x = a + b * c == d << e;\n");
    assert_eq!(roundtrip("f(a, g(b))[i].m;"), "f(a, g(b))[i].m;\n");
    assert_eq!(roundtrip("-a ** b;"), "-a ** b;\n");
  }

  #[test]
  fn errors_recover_and_continue() {
    let (file, errors) = parse("let = 3;\nlet y = 4;");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("expected a variable name"));
    assert_eq!(file.items.len(), 1);
    assert_eq!(file.items[0].to_string(), "let y = 4;");
  }

  #[test]
  fn error_positions_are_reported() {
    let (_, errors) = parse("let x = ;");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].pos.line(), 1);
    assert!(errors[0].to_string().contains("at L1,"));
  }
}
