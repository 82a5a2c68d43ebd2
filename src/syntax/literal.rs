//! Literal value parsers: numbers, strings, regexes, PEGs.
//!
//! The lexer decides where a literal starts and ends; these parsers decide
//! what it means. Failures are positioned domain errors that the lexer
//! attaches to the token and moves past.

use std::fmt;

use thiserror::Error;

/// A literal parse failure.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LiteralError {
  /// An unexpected character inside a number.
  #[error("unexpected character {ch:?} at index {index} in number {input:?}")]
  NumberChar {
    /// The offending character.
    ch: char,
    /// Its index in the literal.
    index: usize,
    /// The whole literal.
    input: String,
  },
  /// A number that stopped mid-production.
  #[error("unexpected end of input in number {input:?}")]
  NumberEnd {
    /// The whole literal.
    input: String,
  },
  /// A number whose digits do not fit the requested type.
  #[error("number {input:?} does not fit in {target}")]
  NumberRange {
    /// The whole literal.
    input: String,
    /// The conversion target.
    target: &'static str,
  },
  /// A number with fractional or exponent parts converted to an integer.
  #[error("number {input:?} is not an integer")]
  NumberNotInteger {
    /// The whole literal.
    input: String,
  },
  /// A string or regex missing its closing delimiter.
  #[error("missing closing {delim:?}")]
  Unterminated {
    /// The delimiter that never closed.
    delim: char,
  },
  /// An unknown or malformed backslash escape.
  #[error("bad escape at index {index}")]
  BadEscape {
    /// The escape's index in the literal.
    index: usize,
  },
  /// A percent format specifier with no verb.
  #[error("bad format specifier at index {index}")]
  BadFormat {
    /// The specifier's index in the literal.
    index: usize,
  },
  /// A regex or PEG literal with an unknown delimiter.
  #[error("bad literal delimiter {delim:?}")]
  BadDelimiter {
    /// The character that is not a delimiter.
    delim: char,
  },
}

/// The parsed payload of a literal-bearing token.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
  /// Raw text (identifiers, pragmas, comments, whitespace).
  Text(String),
  /// A parsed number.
  Number(NumberLit),
  /// A parsed string.
  Str(StringLit),
  /// A regex literal.
  Regex(RegexLit),
  /// A PEG literal.
  Peg(PegLit),
  /// A literal whose payload failed to parse.
  Broken(LiteralError),
}

impl fmt::Display for Literal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Literal::Text(text) => f.write_str(text),
      Literal::Number(n) => n.fmt(f),
      Literal::Str(s) => s.fmt(f),
      Literal::Regex(r) => f.write_str(&r.input),
      Literal::Peg(p) => f.write_str(&p.input),
      Literal::Broken(e) => write!(f, "<error: {e}>"),
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NumberState {
  WantSign,
  WantZero,
  WantRadixSymbol,
  WantIntegralDigits,
  WantFractionalDigits,
  WantExponentSign,
  WantExponentDigits,
}

/// A parsed numeric literal, kept as digit strings so no precision is lost
/// before a consumer picks a type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NumberLit {
  /// `+` or `-`.
  pub sign: u8,
  /// `b`, `o`, `x`, or 0 for decimal.
  pub radix_symbol: u8,
  /// `e` or `p`, or 0 when there is no exponent.
  pub exponent_symbol: u8,
  /// The exponent's `+` or `-`.
  pub exponent_sign: u8,
  /// The integral digits, lowercased, without separators or leading zeros.
  pub integral: Vec<u8>,
  /// The fractional digits, if a radix point was present.
  pub fractional: Option<Vec<u8>>,
  /// The exponent digits.
  pub exponent: Vec<u8>,
}

fn is_legal_for_radix(radix_symbol: u8, ch: char) -> bool {
  match radix_symbol {
    b'b' => matches!(ch, '0'..='1'),
    b'o' => matches!(ch, '0'..='7'),
    b'x' => ch.is_ascii_hexdigit(),
    _ => ch.is_ascii_digit(),
  }
}

impl NumberLit {
  /// Parse one numeric literal. Underscore separators are skipped
  /// anywhere; `0b`/`0o`/`0x` select a radix; `e`/`p` start an exponent.
  pub fn parse(input: &str) -> Result<NumberLit, LiteralError> {
    let mut out = NumberLit {
      sign: b'+',
      exponent_sign: b'+',
      ..NumberLit::default()
    };

    let mut state = NumberState::WantSign;
    let mut buffered_zero = false;

    for (index, raw_ch) in input.chars().enumerate() {
      let ch = raw_ch.to_ascii_lowercase();

      if ch == '_' {
        continue;
      }

      if ch == '+' || ch == '-' {
        if state == NumberState::WantSign {
          out.sign = ch as u8;
          state = NumberState::WantZero;
          continue;
        }
        if state == NumberState::WantExponentSign {
          out.exponent_sign = ch as u8;
          state = NumberState::WantExponentDigits;
          continue;
        }
      }

      if ch == '.'
        && matches!(state, NumberState::WantSign | NumberState::WantZero
          | NumberState::WantRadixSymbol | NumberState::WantIntegralDigits)
      {
        if buffered_zero {
          out.integral.push(b'0');
          buffered_zero = false;
        }
        out.fractional = Some(Vec::new());
        state = NumberState::WantFractionalDigits;
        continue;
      }

      if matches!(ch, 'b' | 'o' | 'x') && state == NumberState::WantRadixSymbol {
        out.radix_symbol = ch as u8;
        state = NumberState::WantIntegralDigits;
        buffered_zero = false;
        continue;
      }

      if ch == '0' && matches!(state, NumberState::WantSign | NumberState::WantZero) {
        state = NumberState::WantRadixSymbol;
        buffered_zero = true;
        continue;
      }

      if is_legal_for_radix(out.radix_symbol, ch) {
        if matches!(state, NumberState::WantSign | NumberState::WantZero
          | NumberState::WantRadixSymbol | NumberState::WantIntegralDigits)
        {
          if buffered_zero {
            out.integral.push(b'0');
            buffered_zero = false;
          }
          out.integral.push(ch as u8);
          state = NumberState::WantIntegralDigits;
          continue;
        }
        if state == NumberState::WantFractionalDigits {
          out.fractional.as_mut().expect("BUG: fractional state without buffer").push(ch as u8);
          continue;
        }
      }

      if ch.is_ascii_digit()
        && matches!(state, NumberState::WantExponentSign | NumberState::WantExponentDigits)
      {
        out.exponent.push(ch as u8);
        state = NumberState::WantExponentDigits;
        continue;
      }

      if matches!(ch, 'e' | 'p')
        && matches!(state, NumberState::WantIntegralDigits | NumberState::WantFractionalDigits)
      {
        out.exponent_symbol = ch as u8;
        state = NumberState::WantExponentSign;
        continue;
      }

      return Err(LiteralError::NumberChar { ch: raw_ch, index, input: input.to_owned() });
    }

    if matches!(state,
      NumberState::WantSign | NumberState::WantZero | NumberState::WantExponentSign)
    {
      return Err(LiteralError::NumberEnd { input: input.to_owned() });
    }

    if out.integral.is_empty() {
      out.integral.push(b'0');
    }
    if out.fractional.as_ref().is_some_and(Vec::is_empty) {
      out.fractional = None;
    }

    trim_leading_zeros(&mut out.integral);
    if let Some(fractional) = &mut out.fractional {
      trim_trailing_zeros(fractional);
    }
    trim_leading_zeros(&mut out.exponent);

    Ok(out)
  }

  /// Is the literal zero (ignoring exponent)?
  #[must_use] pub fn is_zero(&self) -> bool {
    self.integral.iter().all(|&d| d == b'0')
      && self.fractional.as_ref().is_none_or(|f| f.iter().all(|&d| d == b'0'))
  }

  /// Does the literal have fractional or exponent parts?
  #[must_use] pub fn is_float(&self) -> bool {
    self.exponent_symbol != 0 || self.fractional.is_some() || !self.exponent.is_empty()
  }

  /// The numeric radix selected by the radix symbol.
  #[must_use] pub fn radix(&self) -> u32 {
    match self.radix_symbol {
      b'b' => 2,
      b'o' => 8,
      b'x' => 16,
      _ => 10,
    }
  }

  fn integer_digits(&self, signed: bool, target: &'static str) -> Result<String, LiteralError> {
    if self.is_float() {
      return Err(LiteralError::NumberNotInteger { input: self.to_string() });
    }
    if !signed && self.sign == b'-' && !self.is_zero() {
      return Err(LiteralError::NumberRange { input: self.to_string(), target });
    }
    let mut digits = String::with_capacity(self.integral.len() + 1);
    if signed && self.sign == b'-' {
      digits.push('-');
    }
    digits.push_str(std::str::from_utf8(&self.integral).expect("BUG: non-ascii digits"));
    Ok(digits)
  }

  /// The literal as a `u32`.
  pub fn as_u32(&self) -> Result<u32, LiteralError> {
    if self.is_zero() && !self.is_float() { return Ok(0) }
    let digits = self.integer_digits(false, "u32")?;
    u32::from_str_radix(&digits, self.radix())
      .map_err(|_| LiteralError::NumberRange { input: self.to_string(), target: "u32" })
  }

  /// The literal as a `u64`.
  pub fn as_u64(&self) -> Result<u64, LiteralError> {
    if self.is_zero() && !self.is_float() { return Ok(0) }
    let digits = self.integer_digits(false, "u64")?;
    u64::from_str_radix(&digits, self.radix())
      .map_err(|_| LiteralError::NumberRange { input: self.to_string(), target: "u64" })
  }

  /// The literal as an `i32`.
  pub fn as_i32(&self) -> Result<i32, LiteralError> {
    if self.is_zero() && !self.is_float() { return Ok(0) }
    let digits = self.integer_digits(true, "i32")?;
    i32::from_str_radix(&digits, self.radix())
      .map_err(|_| LiteralError::NumberRange { input: self.to_string(), target: "i32" })
  }

  /// The literal as an `i64`.
  pub fn as_i64(&self) -> Result<i64, LiteralError> {
    if self.is_zero() && !self.is_float() { return Ok(0) }
    let digits = self.integer_digits(true, "i64")?;
    i64::from_str_radix(&digits, self.radix())
      .map_err(|_| LiteralError::NumberRange { input: self.to_string(), target: "i64" })
  }
}

impl fmt::Display for NumberLit {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.sign == b'-' {
      f.write_str("-")?;
    }
    if self.radix_symbol != 0 {
      write!(f, "0{}", self.radix_symbol as char)?;
    }
    f.write_str(std::str::from_utf8(&self.integral).expect("BUG: non-ascii digits"))?;
    if let Some(fractional) = &self.fractional {
      write!(f, ".{}", std::str::from_utf8(fractional).expect("BUG: non-ascii digits"))?;
    }
    if self.exponent_symbol != 0 {
      write!(f, "{}", self.exponent_symbol as char)?;
      if self.exponent_sign == b'-' {
        f.write_str("-")?;
      }
      f.write_str(std::str::from_utf8(&self.exponent).expect("BUG: non-ascii digits"))?;
    }
    Ok(())
  }
}

fn trim_leading_zeros(digits: &mut Vec<u8>) {
  let nonzero = digits.iter().position(|&d| d != b'0').unwrap_or(digits.len().saturating_sub(1));
  digits.drain(..nonzero);
}

fn trim_trailing_zeros(digits: &mut Vec<u8>) {
  while digits.last() == Some(&b'0') {
    digits.pop();
  }
}

/// One piece of a parsed string literal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StrPiece {
  /// Literal text, with escapes decoded.
  Text(String),
  /// A percent format specifier, kept verbatim.
  Format(String),
}

/// A parsed string literal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StringLit {
  /// The quote character.
  pub quote: char,
  /// The decoded pieces.
  pub pieces: Vec<StrPiece>,
}

impl StringLit {
  /// Parse one quoted string literal, including its quotes.
  pub fn parse(input: &str) -> Result<StringLit, LiteralError> {
    let chars: Vec<char> = input.chars().collect();
    let quote = *chars.first().ok_or(LiteralError::Unterminated { delim: '"' })?;
    if chars.len() < 2 || chars[chars.len() - 1] != quote {
      return Err(LiteralError::Unterminated { delim: quote });
    }

    let inner = &chars[1..chars.len() - 1];
    let mut pieces = Vec::new();
    let mut text = String::new();
    let mut index = 0;

    let flush = |pieces: &mut Vec<StrPiece>, text: &mut String| {
      if !text.is_empty() {
        pieces.push(StrPiece::Text(std::mem::take(text)));
      }
    };

    while index < inner.len() {
      let ch = inner[index];
      match ch {
        '\\' => {
          let at = index;
          index += 1;
          let escape = *inner.get(index).ok_or(LiteralError::BadEscape { index: at })?;
          index += 1;
          match escape {
            'n' => text.push('\n'),
            'r' => text.push('\r'),
            't' => text.push('\t'),
            'e' => text.push('\u{1b}'),
            'a' => text.push('\u{7}'),
            'b' => text.push('\u{8}'),
            'f' => text.push('\u{c}'),
            'v' => text.push('\u{b}'),
            '0' => text.push('\0'),
            '\\' | '\'' | '"' => text.push(escape),
            'x' => text.push(take_code(inner, &mut index, 2, 16, at)?),
            'u' => text.push(take_code(inner, &mut index, 4, 16, at)?),
            'U' => text.push(take_code(inner, &mut index, 8, 16, at)?),
            'd' => text.push(take_code(inner, &mut index, 3, 10, at)?),
            'o' => text.push(take_code(inner, &mut index, 3, 8, at)?),
            _ => return Err(LiteralError::BadEscape { index: at }),
          }
        }

        '%' => {
          let at = index;
          index += 1;
          if inner.get(index) == Some(&'%') {
            index += 1;
            text.push('%');
            continue;
          }
          let mut spec = String::from("%");
          while let Some(&c) = inner.get(index) {
            index += 1;
            spec.push(c);
            if c.is_ascii_alphabetic() {
              break;
            }
            if !matches!(c, '-' | '+' | ' ' | '#' | '.' | '0'..='9') {
              return Err(LiteralError::BadFormat { index: at });
            }
          }
          if !spec.ends_with(|c: char| c.is_ascii_alphabetic()) {
            return Err(LiteralError::BadFormat { index: at });
          }
          flush(&mut pieces, &mut text);
          pieces.push(StrPiece::Format(spec));
        }

        _ => {
          text.push(ch);
          index += 1;
        }
      }
    }

    flush(&mut pieces, &mut text);
    Ok(StringLit { quote, pieces })
  }

  /// The decoded text with format specifiers spliced back in verbatim.
  #[must_use] pub fn text(&self) -> String {
    let mut out = String::new();
    for piece in &self.pieces {
      match piece {
        StrPiece::Text(text) => out.push_str(text),
        StrPiece::Format(spec) => out.push_str(spec),
      }
    }
    out
  }
}

fn take_code(
  inner: &[char], index: &mut usize, len: usize, radix: u32, at: usize,
) -> Result<char, LiteralError> {
  let mut code = 0u32;
  for _ in 0..len {
    let ch = *inner.get(*index).ok_or(LiteralError::BadEscape { index: at })?;
    let digit = ch.to_digit(radix).ok_or(LiteralError::BadEscape { index: at })?;
    code = code * radix + digit;
    *index += 1;
  }
  char::from_u32(code).ok_or(LiteralError::BadEscape { index: at })
}

impl fmt::Display for StringLit {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{}{}", self.quote, self.text().escape_default(), self.quote)
  }
}

/// A regex literal, stored verbatim; compiling it is the evaluator's
/// business.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegexLit {
  /// The whole literal, delimiters and flags included.
  pub input: String,
}

impl RegexLit {
  /// Validate the shape of one `#rx` literal.
  pub fn parse(input: &str) -> Result<RegexLit, LiteralError> {
    let rest = input.strip_prefix("#rx").unwrap_or(input);
    match rest.chars().next() {
      Some('/' | '!' | '@' | '{') => Ok(RegexLit { input: input.to_owned() }),
      Some(delim) => Err(LiteralError::BadDelimiter { delim }),
      None => Err(LiteralError::Unterminated { delim: '/' }),
    }
  }
}

/// A PEG literal, stored verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PegLit {
  /// The whole literal, braces included.
  pub input: String,
}

impl PegLit {
  /// Validate the shape of one `#peg{...}` literal.
  pub fn parse(input: &str) -> Result<PegLit, LiteralError> {
    let rest = input.strip_prefix("#peg").unwrap_or(input);
    if rest.starts_with('{') && rest.ends_with('}') {
      Ok(PegLit { input: input.to_owned() })
    } else {
      Err(LiteralError::Unterminated { delim: '}' })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn number_radixes_and_separators() {
    let n = NumberLit::parse("0x_dead_beef").unwrap();
    assert_eq!(n.radix(), 16);
    assert_eq!(n.as_u64().unwrap(), 0xdead_beef);

    assert_eq!(NumberLit::parse("0b1010").unwrap().as_u32().unwrap(), 10);
    assert_eq!(NumberLit::parse("0o777").unwrap().as_u32().unwrap(), 0o777);
    assert_eq!(NumberLit::parse("1_000_000").unwrap().as_u32().unwrap(), 1_000_000);
    assert_eq!(NumberLit::parse("0").unwrap().as_u32().unwrap(), 0);
    assert_eq!(NumberLit::parse("-42").unwrap().as_i32().unwrap(), -42);
  }

  #[test]
  fn number_floats_reject_integer_conversion() {
    let n = NumberLit::parse("3.25e10").unwrap();
    assert!(n.is_float());
    assert_eq!(n.fractional.as_deref(), Some(&b"25"[..]));
    assert_eq!(n.exponent, b"10");
    assert!(matches!(n.as_u64(), Err(LiteralError::NumberNotInteger { .. })));
  }

  #[test]
  fn number_trims_redundant_zeros() {
    let n = NumberLit::parse("007.250").unwrap();
    assert_eq!(n.integral, b"7");
    assert_eq!(n.fractional.as_deref(), Some(&b"25"[..]));
    assert_eq!(n.to_string(), "7.25");
  }

  #[test]
  fn number_bad_characters_are_positioned() {
    match NumberLit::parse("12q4") {
      Err(LiteralError::NumberChar { ch: 'q', index: 2, .. }) => {}
      other => panic!("unexpected result: {other:?}"),
    }
    assert!(matches!(NumberLit::parse("1e"), Err(LiteralError::NumberEnd { .. })));
  }

  #[test]
  fn string_escapes_decode() {
    let s = StringLit::parse(r#""a\tb\x41B\d067\o104""#).unwrap();
    assert_eq!(s.text(), "a\tbABCD");

    let s = StringLit::parse(r"'it\'s'").unwrap();
    assert_eq!(s.text(), "it's");

    assert!(matches!(
      StringLit::parse(r#""\q""#),
      Err(LiteralError::BadEscape { index: 0 })
    ));
    assert!(matches!(
      StringLit::parse("\"open"),
      Err(LiteralError::Unterminated { delim: '"' })
    ));
  }

  #[test]
  fn string_format_specifiers_split_out() {
    let s = StringLit::parse(r#""count=%04d done%%""#).unwrap();
    assert_eq!(s.pieces, vec![
      StrPiece::Text("count=".into()),
      StrPiece::Format("%04d".into()),
      StrPiece::Text(" done%".into()),
    ]);
  }

  #[test]
  fn regex_delimiters() {
    assert!(RegexLit::parse("#rx/a+b/i").is_ok());
    assert!(RegexLit::parse("#rx!a+b!").is_ok());
    assert!(RegexLit::parse("#rx{a{2,3}}").is_ok());
    assert!(matches!(
      RegexLit::parse("#rx;a;"),
      Err(LiteralError::BadDelimiter { delim: ';' })
    ));
  }
}
