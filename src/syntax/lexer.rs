//! The lexer: characters in, tokens out.
//!
//! A single forward scan with one character of decision lookahead for the
//! operator families. Literal payloads are handed to
//! [`literal`](super::literal); a payload that fails to parse becomes a
//! [`Literal::Broken`] payload on an otherwise ordinary token, and the scan
//! continues.

use super::literal::{Literal, NumberLit, PegLit, RegexLit, StringLit};
use super::pos::Position;
use super::token::{keyword, Token, TokenKind};

fn is_hws(ch: char) -> bool { matches!(ch, ' ' | '\t') }
fn is_vws(ch: char) -> bool { matches!(ch, '\n' | '\r' | '\u{b}' | '\u{c}') }
fn is_ident_start(ch: char) -> bool { ch.is_alphabetic() || ch == '_' || ch == '$' }
fn is_ident_continue(ch: char) -> bool { ch.is_alphanumeric() || ch == '_' }

/// The lexer. Iterate it to drain the token stream; the final token is
/// always [`TokenKind::Eof`].
pub struct Lexer {
  input: Vec<char>,
  pos: Position,
  emitted_eof: bool,
}

impl Lexer {
  /// Create a lexer over one source text.
  #[must_use] pub fn new(input: &str) -> Lexer {
    Lexer { input: input.chars().collect(), pos: Position::default(), emitted_eof: false }
  }

  fn peek(&self, ahead: usize) -> Option<char> {
    self.input.get(self.pos.offset + ahead).copied()
  }

  fn bump(&mut self) -> char {
    let ch = self.input[self.pos.offset];
    self.pos.advance(ch);
    ch
  }

  fn bump_while(&mut self, pred: impl Fn(char) -> bool) {
    while self.peek(0).is_some_and(&pred) {
      self.bump();
    }
  }

  fn raw_since(&self, start: &Position) -> String {
    self.input[start.offset..self.pos.offset].iter().collect()
  }

  fn token(&self, kind: TokenKind, start: Position) -> Token {
    let raw = self.raw_since(&start);
    let parsed = match kind {
      TokenKind::Shebang | TokenKind::LineComment | TokenKind::BlockComment
      | TokenKind::Pragma | TokenKind::Ident | TokenKind::Invalid | TokenKind::Partial =>
        Some(Literal::Text(raw.clone())),
      TokenKind::Number => Some(match NumberLit::parse(&raw) {
        Ok(n) => Literal::Number(n),
        Err(e) => Literal::Broken(e),
      }),
      TokenKind::Str => Some(match StringLit::parse(&raw) {
        Ok(s) => Literal::Str(s),
        Err(e) => Literal::Broken(e),
      }),
      TokenKind::Regex => Some(match RegexLit::parse(&raw) {
        Ok(r) => Literal::Regex(r),
        Err(e) => Literal::Broken(e),
      }),
      TokenKind::Peg => Some(match PegLit::parse(&raw) {
        Ok(p) => Literal::Peg(p),
        Err(e) => Literal::Broken(e),
      }),
      _ => None,
    };
    Token { kind, raw, parsed, start, end: self.pos }
  }

  fn scan_string(&mut self, quote: char) -> TokenKind {
    self.bump();
    loop {
      match self.peek(0) {
        None => return TokenKind::Partial,
        Some('\\') => {
          self.bump();
          if self.peek(0).is_some() {
            self.bump();
          }
        }
        Some(ch) => {
          self.bump();
          if ch == quote {
            return TokenKind::Str;
          }
          if is_vws(ch) {
            return TokenKind::Invalid;
          }
        }
      }
    }
  }

  fn scan_braced(&mut self) -> TokenKind {
    // caller has consumed up to and including the opening brace
    let mut depth = 1u32;
    loop {
      match self.peek(0) {
        None => return TokenKind::Partial,
        Some('\\') => {
          self.bump();
          if self.peek(0).is_some() {
            self.bump();
          }
        }
        Some('{') => {
          self.bump();
          depth += 1;
        }
        Some('}') => {
          self.bump();
          depth -= 1;
          if depth == 0 {
            return TokenKind::Str; // overwritten by the caller
          }
        }
        Some(_) => {
          self.bump();
        }
      }
    }
  }

  fn scan_delimited(&mut self, delim: char) -> TokenKind {
    self.bump();
    loop {
      match self.peek(0) {
        None => return TokenKind::Partial,
        Some('\\') => {
          self.bump();
          if self.peek(0).is_some() {
            self.bump();
          }
        }
        Some(ch) => {
          self.bump();
          if ch == delim {
            return TokenKind::Str; // overwritten by the caller
          }
        }
      }
    }
  }

  fn scan_hash(&mut self, at_start: bool) -> TokenKind {
    self.bump(); // '#'

    if at_start && self.peek(0) == Some('!') {
      self.bump_while(|ch| !is_vws(ch));
      return TokenKind::Shebang;
    }

    if !self.peek(0).is_some_and(is_ident_start) {
      return TokenKind::Invalid;
    }
    let name_start = self.pos.offset;
    self.bump_while(is_ident_continue);
    let name: String = self.input[name_start..self.pos.offset].iter().collect();

    if name == "rx" {
      return match self.peek(0) {
        Some('{') => {
          self.bump();
          match self.scan_braced() {
            TokenKind::Partial => TokenKind::Partial,
            _ => {
              self.bump_while(|ch| ch.is_ascii_lowercase());
              TokenKind::Regex
            }
          }
        }
        Some(delim @ ('/' | '!' | '@')) => match self.scan_delimited(delim) {
          TokenKind::Partial => TokenKind::Partial,
          _ => {
            self.bump_while(|ch| ch.is_ascii_lowercase());
            TokenKind::Regex
          }
        },
        _ => TokenKind::Pragma,
      };
    }

    if name == "peg" && self.peek(0) == Some('{') {
      self.bump();
      return match self.scan_braced() {
        TokenKind::Partial => TokenKind::Partial,
        _ => TokenKind::Peg,
      };
    }

    TokenKind::Pragma
  }

  fn scan_number(&mut self) -> TokenKind {
    let mut prev = self.bump();
    while let Some(ch) = self.peek(0) {
      let take = ch.is_ascii_alphanumeric()
        || ch == '_'
        || (ch == '.' && self.peek(1).is_some_and(|c| c.is_ascii_digit()))
        || (matches!(ch, '+' | '-') && matches!(prev, 'e' | 'E' | 'p' | 'P'));
      if !take {
        break;
      }
      prev = self.bump();
    }
    TokenKind::Number
  }

  fn take(&mut self, expected: char, hit: TokenKind, miss: TokenKind) -> TokenKind {
    if self.peek(0) == Some(expected) {
      self.bump();
      hit
    } else {
      miss
    }
  }

  fn scan_operator(&mut self) -> TokenKind {
    use TokenKind::*;
    let ch = self.bump();
    match ch {
      '(' => LParen,
      ')' => RParen,
      '[' => LBracket,
      ']' => RBracket,
      '{' => LBrace,
      '}' => RBrace,
      ',' => Comma,
      ';' => Semicolon,
      '@' => At,
      '~' => Tilde,
      '?' => Question,
      '!' => self.take('=', BangEqual, Bang),
      '%' => self.take('=', PercentEqual, Percent),
      '+' => self.take('=', PlusEqual, Plus),
      '-' => self.take('=', MinusEqual, Minus),
      '=' => self.take('=', EqualEqual, Equal),
      '&' => match self.peek(0) {
        Some('&') => { self.bump(); AmpAmp }
        Some('=') => { self.bump(); AmpEqual }
        _ => Amp,
      },
      '*' => match self.peek(0) {
        Some('*') => { self.bump(); StarStar }
        Some('=') => { self.bump(); StarEqual }
        _ => Star,
      },
      '.' => {
        if self.peek(0) == Some('.') {
          self.bump();
          self.take('.', DotDotDot, DotDot)
        } else {
          Dot
        }
      }
      ':' => match self.peek(0) {
        Some(':') => { self.bump(); ColonColon }
        Some('=') => { self.bump(); ColonEqual }
        _ => Colon,
      },
      '<' => match self.peek(0) {
        Some('=') => { self.bump(); LessEqual }
        Some('<') => { self.bump(); self.take('|', LessLessBar, LessLess) }
        _ => Less,
      },
      '>' => match self.peek(0) {
        Some('=') => { self.bump(); GreaterEqual }
        Some('>') => { self.bump(); self.take('|', GreaterGreaterBar, GreaterGreater) }
        _ => Greater,
      },
      '^' => match self.peek(0) {
        Some('^') => { self.bump(); CaretCaret }
        Some('=') => { self.bump(); CaretEqual }
        _ => Caret,
      },
      '|' => match self.peek(0) {
        Some('|') => { self.bump(); BarBar }
        Some('=') => { self.bump(); BarEqual }
        _ => Bar,
      },
      _ => Invalid,
    }
  }
}

impl Iterator for Lexer {
  type Item = Token;

  fn next(&mut self) -> Option<Token> {
    let start = self.pos;
    let at_start = start.offset == 0;

    let Some(ch) = self.peek(0) else {
      if self.emitted_eof {
        return None;
      }
      self.emitted_eof = true;
      return Some(Token {
        kind: TokenKind::Eof,
        raw: String::new(),
        parsed: None,
        start,
        end: start,
      });
    };

    let kind = if is_hws(ch) {
      self.bump_while(is_hws);
      TokenKind::Hws
    } else if is_vws(ch) {
      self.bump_while(is_vws);
      TokenKind::Vws
    } else if ch == '#' {
      self.scan_hash(at_start)
    } else if ch == '/' {
      match self.peek(1) {
        Some('/') => {
          self.bump_while(|c| !is_vws(c));
          TokenKind::LineComment
        }
        Some('*') => {
          self.bump();
          self.bump();
          loop {
            match self.peek(0) {
              None => break TokenKind::Partial,
              Some('*') if self.peek(1) == Some('/') => {
                self.bump();
                self.bump();
                break TokenKind::BlockComment;
              }
              Some(_) => { self.bump(); }
            }
          }
        }
        _ => self.scan_operator(),
      }
    } else if ch == '"' || ch == '\'' {
      self.scan_string(ch)
    } else if is_ident_start(ch) {
      self.bump();
      self.bump_while(is_ident_continue);
      let raw = self.raw_since(&start);
      keyword(&raw).unwrap_or(TokenKind::Ident)
    } else if ch.is_ascii_digit() {
      self.scan_number()
    } else {
      self.scan_operator()
    };

    Some(self.token(kind, start))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn kinds(input: &str) -> Vec<TokenKind> {
    Lexer::new(input).map(|tok| tok.kind).collect()
  }

  fn non_trivia(input: &str) -> Vec<Token> {
    Lexer::new(input).filter(|tok| !tok.kind.is_trivia()).collect()
  }

  #[test]
  fn version_pragma_at_file_start() {
    use TokenKind::*;
    let tokens = non_trivia("#version(1,2,3)");
    let kinds: Vec<TokenKind> = tokens.iter().map(|tok| tok.kind).collect();
    assert_eq!(kinds, vec![
      Pragma, LParen, Number, Comma, Number, Comma, Number, RParen, Eof,
    ]);
    assert_eq!(tokens[0].raw, "#version");
    let Some(Literal::Number(n)) = &tokens[2].parsed else { panic!("no number payload") };
    assert_eq!(n.as_u32().unwrap(), 1);
    let Some(Literal::Number(n)) = &tokens[6].parsed else { panic!("no number payload") };
    assert_eq!(n.as_u32().unwrap(), 3);
  }

  #[test]
  fn shebang_only_at_start() {
    use TokenKind::*;
    assert_eq!(kinds("#!/usr/bin/env spider\nx"), vec![Shebang, Vws, Ident, Eof]);
    // after the first byte, #! is a pragma-shaped failure, not a shebang
    assert_eq!(kinds(" #!x")[1], Invalid);
  }

  #[test]
  fn keywords_and_identifiers() {
    use TokenKind::*;
    assert_eq!(
      kinds("import x if ifx _ $y"),
      vec![KwImport, Hws, Ident, Hws, KwIf, Hws, Ident, Hws, KwPlaceholder, Hws, Ident, Eof],
    );
  }

  #[test]
  fn comments_and_operators() {
    use TokenKind::*;
    assert_eq!(
      kinds("a // trailing\nb /* c */ <<| ..."),
      vec![Ident, Hws, LineComment, Vws, Ident, Hws, BlockComment, Hws, LessLessBar, Hws,
        DotDotDot, Eof],
    );
    assert_eq!(kinds("a::b.c"), vec![Ident, ColonColon, Ident, Dot, Ident, Eof]);
    assert_eq!(kinds(":= == != ** >=").iter().filter(|k| !matches!(k, Hws | Eof)).count(), 5);
  }

  #[test]
  fn regex_and_peg_literals() {
    use TokenKind::*;
    assert_eq!(kinds("#rx/a+b/i"), vec![Regex, Eof]);
    assert_eq!(kinds("#rx!a/b!"), vec![Regex, Eof]);
    assert_eq!(kinds("#rx@a@"), vec![Regex, Eof]);
    assert_eq!(kinds("#rx{a{2,3}b}"), vec![Regex, Eof]);
    assert_eq!(kinds("#peg{rule <- 'x' {nested}}"), vec![Peg, Eof]);
    assert_eq!(kinds("#pragma_name x"), vec![Pragma, Hws, Ident, Eof]);
  }

  #[test]
  fn strings_track_backslashes() {
    use TokenKind::*;
    assert_eq!(kinds(r#""a\"b" 'c'"#), vec![Str, Hws, Str, Eof]);
    assert_eq!(kinds("\"open"), vec![Partial, Eof]);
  }

  #[test]
  fn numbers_munch_exponents() {
    let tokens = non_trivia("1.5e-3 0xff_00 2..5");
    assert_eq!(tokens[0].raw, "1.5e-3");
    assert_eq!(tokens[1].raw, "0xff_00");
    // 2..5 is number, range operator, number
    assert_eq!(tokens[2].raw, "2");
    assert_eq!(tokens[2].kind, TokenKind::Number);
    assert_eq!(tokens[3].kind, TokenKind::DotDot);
    assert_eq!(tokens[4].raw, "5");
  }

  #[test]
  fn positions_cover_tokens() {
    let tokens: Vec<Token> = Lexer::new("ab\ncd").collect();
    assert_eq!(tokens[0].start.offset, 0);
    assert_eq!(tokens[0].end.offset, 2);
    assert_eq!(tokens[2].start.line(), 2);
    assert_eq!(tokens[2].start.column(), 1);
  }
}
