//! Tokens and token kinds.

use std::fmt;

use super::literal::Literal;
use super::pos::Position;

/// The kind of a [`Token`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
  /// A character sequence no rule matched.
  Invalid,
  /// A token cut short by end of input.
  Partial,
  /// End of input.
  Eof,
  /// A run of horizontal whitespace.
  Hws,
  /// A run of vertical whitespace.
  Vws,
  /// A `#!` line at the very start of the file.
  Shebang,
  /// A `//` comment.
  LineComment,
  /// A `/* */` comment.
  BlockComment,
  /// `#` followed by an identifier.
  Pragma,
  /// An identifier.
  Ident,
  /// A numeric literal.
  Number,
  /// A quoted string literal.
  Str,
  /// A `#rx` regex literal.
  Regex,
  /// A `#peg{...}` literal.
  Peg,

  /// `_`
  KwPlaceholder,
  /// `alias`
  KwAlias,
  /// `async`
  KwAsync,
  /// `await`
  KwAwait,
  /// `bitfield`
  KwBitfield,
  /// `case`
  KwCase,
  /// `const`
  KwConst,
  /// `coroutine`
  KwCoroutine,
  /// `else`
  KwElse,
  /// `for`
  KwFor,
  /// `foreach`
  KwForEach,
  /// `func`
  KwFunc,
  /// `generator`
  KwGenerator,
  /// `goto`
  KwGoto,
  /// `if`
  KwIf,
  /// `import`
  KwImport,
  /// `interface`
  KwInterface,
  /// `let`
  KwLet,
  /// `lock`
  KwLock,
  /// `method`
  KwMethod,
  /// `null`
  KwNull,
  /// `operator`
  KwOperator,
  /// `property`
  KwProperty,
  /// `return`
  KwReturn,
  /// `static`
  KwStatic,
  /// `struct`
  KwStruct,
  /// `switch`
  KwSwitch,
  /// `throw`
  KwThrow,
  /// `type`
  KwType,
  /// `union`
  KwUnion,
  /// `var`
  KwVar,
  /// `while`
  KwWhile,
  /// `with`
  KwWith,
  /// `yield`
  KwYield,

  /// `(`
  LParen,
  /// `)`
  RParen,
  /// `[`
  LBracket,
  /// `]`
  RBracket,
  /// `{`
  LBrace,
  /// `}`
  RBrace,
  /// `,`
  Comma,
  /// `;`
  Semicolon,
  /// `@`
  At,

  /// `!`
  Bang,
  /// `!=`
  BangEqual,
  /// `%`
  Percent,
  /// `%=`
  PercentEqual,
  /// `&`
  Amp,
  /// `&&`
  AmpAmp,
  /// `&=`
  AmpEqual,
  /// `*`
  Star,
  /// `**`
  StarStar,
  /// `*=`
  StarEqual,
  /// `+`
  Plus,
  /// `+=`
  PlusEqual,
  /// `-`
  Minus,
  /// `-=`
  MinusEqual,
  /// `.`
  Dot,
  /// `..`
  DotDot,
  /// `...`
  DotDotDot,
  /// `/`
  Slash,
  /// `/=`
  SlashEqual,
  /// `:`
  Colon,
  /// `::`
  ColonColon,
  /// `:=`
  ColonEqual,
  /// `<`
  Less,
  /// `<=`
  LessEqual,
  /// `<<`
  LessLess,
  /// `<<|`
  LessLessBar,
  /// `=`
  Equal,
  /// `==`
  EqualEqual,
  /// `>`
  Greater,
  /// `>=`
  GreaterEqual,
  /// `>>`
  GreaterGreater,
  /// `>>|`
  GreaterGreaterBar,
  /// `?`
  Question,
  /// `^`
  Caret,
  /// `^^`
  CaretCaret,
  /// `^=`
  CaretEqual,
  /// `|`
  Bar,
  /// `||`
  BarBar,
  /// `|=`
  BarEqual,
  /// `~`
  Tilde,
}

impl TokenKind {
  /// Is this kind skipped by the grammar (whitespace and comments)?
  #[must_use] pub fn is_trivia(self) -> bool {
    matches!(self,
      TokenKind::Hws | TokenKind::Vws | TokenKind::LineComment | TokenKind::BlockComment)
  }
}

/// The keyword for an identifier, if it is one.
#[must_use] pub fn keyword(text: &str) -> Option<TokenKind> {
  use TokenKind::*;
  Some(match text {
    "_" => KwPlaceholder,
    "alias" => KwAlias,
    "async" => KwAsync,
    "await" => KwAwait,
    "bitfield" => KwBitfield,
    "case" => KwCase,
    "const" => KwConst,
    "coroutine" => KwCoroutine,
    "else" => KwElse,
    "for" => KwFor,
    "foreach" => KwForEach,
    "func" => KwFunc,
    "generator" => KwGenerator,
    "goto" => KwGoto,
    "if" => KwIf,
    "import" => KwImport,
    "interface" => KwInterface,
    "let" => KwLet,
    "lock" => KwLock,
    "method" => KwMethod,
    "null" => KwNull,
    "operator" => KwOperator,
    "property" => KwProperty,
    "return" => KwReturn,
    "static" => KwStatic,
    "struct" => KwStruct,
    "switch" => KwSwitch,
    "throw" => KwThrow,
    "type" => KwType,
    "union" => KwUnion,
    "var" => KwVar,
    "while" => KwWhile,
    "with" => KwWith,
    "yield" => KwYield,
    _ => return None,
  })
}

/// One lexed token.
#[derive(Clone, Debug)]
pub struct Token {
  /// The token kind.
  pub kind: TokenKind,
  /// The raw source text.
  pub raw: String,
  /// The parsed literal payload, for literal-bearing kinds.
  pub parsed: Option<Literal>,
  /// Where the token starts.
  pub start: Position,
  /// Where the token ends (exclusive).
  pub end: Position,
}

impl fmt::Display for Token {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:?}", self.kind)?;
    if let Some(parsed) = &self.parsed {
      write!(f, "[{parsed}]")?;
    }
    Ok(())
  }
}
