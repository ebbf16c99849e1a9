//! Tokenizer for the sandbox language.
//!
//! Produces a flat token stream with explicit `Newline`, `Indent` and
//! `Dedent` tokens. Newlines inside brackets are ignored, as are blank and
//! comment-only lines.

use super::SyntaxError;
use num_bigint::BigInt;

/// Reserved words. They never lex as identifiers.
const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break",
    "class", "continue", "def", "del", "elif", "else", "except", "finally",
    "for", "from", "global", "if", "import", "in", "is", "lambda", "nonlocal",
    "not", "or", "pass", "raise", "return", "try", "while", "with", "yield",
];

/// Operators, longest first so the scanner can take the first match.
const OPERATORS: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "...", "**", "//", "==", "!=", "<=", ">=",
    "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "->", ":=", "<<", ">>",
    "+", "-", "*", "/", "%", "<", ">", "=", "(", ")", "[", "]", "{", "}",
    ",", ":", ".", ";", "@", "&", "|", "^", "~",
];

/// Deepest bracket nesting or indentation accepted.
pub const MAX_NESTING: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Keyword(&'static str),
    Int(i64),
    /// Integer literal too large for `i64`
    BigInt(BigInt),
    Float(f64),
    Str(String),
    /// Body of an f-string with escapes already processed
    FStr(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    indents: Vec<usize>,
    depth: usize,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            indents: vec![0],
            depth: 0,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token { tok, line: self.line });
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.line, message)
    }

    fn run(mut self) -> Result<Vec<Token>, SyntaxError> {
        let mut at_line_start = true;

        while self.pos < self.chars.len() {
            if at_line_start && self.depth == 0 {
                if self.handle_indentation()? {
                    continue;
                }
                at_line_start = false;
            }

            let c = match self.peek() {
                Some(c) => c,
                None => break,
            };

            match c {
                '\n' => {
                    self.pos += 1;
                    if self.depth == 0 {
                        self.push_newline();
                        at_line_start = true;
                    }
                    self.line += 1;
                }
                '\r' | ' ' | '\t' | '\x0c' => self.pos += 1,
                '#' => self.skip_comment(),
                '\\' => {
                    // Explicit line joining
                    match self.peek_at(1) {
                        Some('\n') => {
                            self.pos += 2;
                            self.line += 1;
                        }
                        Some('\r') if self.peek_at(2) == Some('\n') => {
                            self.pos += 3;
                            self.line += 1;
                        }
                        _ => return Err(self.error("unexpected character after line continuation character")),
                    }
                }
                '"' | '\'' => {
                    let tok = self.lex_string(false, false)?;
                    self.push(tok);
                }
                c if c.is_ascii_digit() => self.lex_number()?,
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.lex_number()?,
                c if c == '_' || c.is_alphabetic() => self.lex_name()?,
                _ => self.lex_operator()?,
            }
        }

        self.push_newline();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(self.tokens)
    }

    /// Emit `Newline` unless the current logical line is empty.
    fn push_newline(&mut self) {
        match self.tokens.last().map(|t| &t.tok) {
            None | Some(Tok::Newline) | Some(Tok::Indent) | Some(Tok::Dedent) => {}
            Some(_) => self.push(Tok::Newline),
        }
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    /// Measure leading whitespace and emit indentation tokens. Returns true
    /// when the line was blank and has been consumed entirely.
    fn handle_indentation(&mut self) -> Result<bool, SyntaxError> {
        let mut width = 0usize;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\x0c' => width = 0,
                _ => break,
            }
            self.pos += 1;
        }

        match self.peek() {
            None => return Ok(true),
            Some('\n') => {
                self.pos += 1;
                self.line += 1;
                return Ok(true);
            }
            Some('\r') if self.peek_at(1) == Some('\n') => {
                self.pos += 2;
                self.line += 1;
                return Ok(true);
            }
            Some('#') => {
                self.skip_comment();
                if self.peek() == Some('\n') {
                    self.pos += 1;
                    self.line += 1;
                }
                return Ok(true);
            }
            _ => {}
        }

        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            if self.tokens.is_empty() {
                return Err(self.error("unexpected indent"));
            }
            if self.indents.len() > MAX_NESTING {
                return Err(self.error("too many levels of indentation"));
            }
            self.indents.push(width);
            self.push(Tok::Indent);
        } else if width < current {
            while width < *self.indents.last().unwrap_or(&0) {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            if width != *self.indents.last().unwrap_or(&0) {
                return Err(self.error("unindent does not match any outer indentation level"));
            }
        }
        Ok(false)
    }

    fn lex_name(&mut self) -> Result<(), SyntaxError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                self.pos += 1;
            } else {
                break;
            }
        }
        let word: String = self.chars[start..self.pos].iter().collect();

        // String prefixes
        if matches!(self.peek(), Some('"') | Some('\'')) {
            let lower = word.to_ascii_lowercase();
            match lower.as_str() {
                "r" | "u" | "f" | "rf" | "fr" => {
                    let raw = lower.contains('r');
                    let fstring = lower.contains('f');
                    let tok = self.lex_string(raw, fstring)?;
                    self.push(tok);
                    return Ok(());
                }
                "b" | "br" | "rb" => return Err(self.error("bytes literals are not supported")),
                _ => {}
            }
        }

        match KEYWORDS.iter().find(|k| **k == word) {
            Some(keyword) => self.push(Tok::Keyword(*keyword)),
            None => self.push(Tok::Name(word)),
        }
        Ok(())
    }

    fn lex_number(&mut self) -> Result<(), SyntaxError> {
        let start = self.pos;

        if self.peek() == Some('0') {
            let radix = match self.peek_at(1) {
                Some('x') | Some('X') => Some(16),
                Some('o') | Some('O') => Some(8),
                Some('b') | Some('B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.pos += 2;
                let digits_start = self.pos;
                while let Some(c) = self.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                let digits: String = self.chars[digits_start..self.pos]
                    .iter()
                    .filter(|c| **c != '_')
                    .collect();
                let tok = int_token(&digits, radix)
                    .ok_or_else(|| self.error(format!("invalid integer literal '{}'", digits)))?;
                self.push(tok);
                return Ok(());
            }
        }

        let mut is_float = false;
        self.take_digits();
        if self.peek() == Some('.') && !self.peek_at(1).is_some_and(|c| c.is_alphabetic() && c != 'e' && c != 'E') {
            is_float = true;
            self.pos += 1;
            self.take_digits();
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign = matches!(self.peek_at(1), Some('+') | Some('-'));
            let digit_at = if sign { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.pos += digit_at;
                self.take_digits();
            }
        }
        if matches!(self.peek(), Some('j') | Some('J')) {
            return Err(self.error("complex literals are not supported"));
        }
        if self.peek().is_some_and(|c| c == '_' || c.is_alphabetic()) {
            return Err(self.error("invalid decimal literal"));
        }

        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();

        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.error(format!("invalid float literal '{}'", text)))?;
            self.push(Tok::Float(value));
        } else {
            if text.len() > 1 && text.starts_with('0') && text.chars().any(|c| c != '0') {
                return Err(self.error("leading zeros in decimal integer literals are not permitted"));
            }
            let tok = int_token(&text, 10)
                .ok_or_else(|| self.error(format!("invalid decimal literal '{}'", text)))?;
            self.push(tok);
        }
        Ok(())
    }

    fn take_digits(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn lex_string(&mut self, raw: bool, fstring: bool) -> Result<Tok, SyntaxError> {
        let quote = match self.peek() {
            Some(q) => q,
            None => return Err(self.error("unterminated string literal")),
        };
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let start_line = self.line;
        let mut out = String::new();

        loop {
            let c = match self.peek() {
                Some(c) => c,
                None => {
                    return Err(SyntaxError::new(
                        start_line,
                        if triple {
                            "unterminated triple-quoted string literal"
                        } else {
                            "unterminated string literal"
                        },
                    ))
                }
            };

            if c == quote {
                if !triple {
                    self.pos += 1;
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    break;
                }
            }

            if c == '\n' {
                if !triple {
                    return Err(SyntaxError::new(start_line, "unterminated string literal"));
                }
                self.line += 1;
            }

            if c == '\\' {
                let next = match self.peek_at(1) {
                    Some(n) => n,
                    None => return Err(SyntaxError::new(start_line, "unterminated string literal")),
                };
                if raw {
                    out.push('\\');
                    out.push(next);
                    if next == '\n' {
                        self.line += 1;
                    }
                    self.pos += 2;
                    continue;
                }
                self.pos += 2;
                match next {
                    '\n' => self.line += 1,
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    'a' => out.push('\x07'),
                    'b' => out.push('\x08'),
                    'f' => out.push('\x0c'),
                    'v' => out.push('\x0b'),
                    '\\' => out.push('\\'),
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    'x' => out.push(self.lex_hex_escape(2)?),
                    'u' => out.push(self.lex_hex_escape(4)?),
                    'U' => out.push(self.lex_hex_escape(8)?),
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                }
                continue;
            }

            out.push(c);
            self.pos += 1;
        }

        Ok(if fstring { Tok::FStr(out) } else { Tok::Str(out) })
    }

    fn lex_hex_escape(&mut self, digits: usize) -> Result<char, SyntaxError> {
        let end = self.pos + digits;
        if end > self.chars.len() {
            return Err(self.error("truncated escape sequence"));
        }
        let hex: String = self.chars[self.pos..end].iter().collect();
        let code = u32::from_str_radix(&hex, 16)
            .map_err(|_| self.error(format!("invalid escape sequence '{}'", hex)))?;
        self.pos = end;
        char::from_u32(code).ok_or_else(|| self.error("invalid unicode escape"))
    }

    fn lex_operator(&mut self) -> Result<(), SyntaxError> {
        for op in OPERATORS {
            let len = op.chars().count();
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, c)| self.peek_at(i) == Some(c));
            if !matches {
                continue;
            }
            match *op {
                "(" | "[" | "{" => {
                    self.depth += 1;
                    if self.depth > MAX_NESTING {
                        return Err(self.error("too many nested parentheses"));
                    }
                }
                ")" | "]" | "}" => {
                    if self.depth == 0 {
                        return Err(self.error(format!("unmatched '{}'", op)));
                    }
                    self.depth -= 1;
                }
                _ => {}
            }
            self.pos += len;
            self.push(Tok::Op(*op));
            return Ok(());
        }
        let c = self.peek().unwrap_or(' ');
        Err(self.error(format!("invalid character '{}'", c)))
    }
}

/// Integer token for unsigned `digits`, widening past 64 bits
fn int_token(digits: &str, radix: u32) -> Option<Tok> {
    match i64::from_str_radix(digits, radix) {
        Ok(value) => Some(Tok::Int(value)),
        Err(_) => BigInt::parse_bytes(digits.as_bytes(), radix).map(Tok::BigInt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(source: &str) -> Vec<Tok> {
        tokenize(source).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_simple_call() {
        assert_eq!(
            toks("print(2+2)"),
            vec![
                Tok::Name("print".into()),
                Tok::Op("("),
                Tok::Int(2),
                Tok::Op("+"),
                Tok::Int(2),
                Tok::Op(")"),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_indentation() {
        let tokens = toks("if x:\n    y = 1\n\n    # note\nz\n");
        assert!(tokens.contains(&Tok::Indent));
        assert!(tokens.contains(&Tok::Dedent));
        let indents = tokens.iter().filter(|t| **t == Tok::Indent).count();
        assert_eq!(indents, 1);
    }

    #[test]
    fn test_brackets_join_lines() {
        let tokens = toks("x = [1,\n  2]\n");
        assert_eq!(tokens.iter().filter(|t| **t == Tok::Newline).count(), 1);
        assert!(!tokens.contains(&Tok::Indent));
    }

    #[test]
    fn test_strings() {
        assert_eq!(toks("'a\\nb'")[0], Tok::Str("a\nb".into()));
        assert_eq!(toks("r'a\\nb'")[0], Tok::Str("a\\nb".into()));
        assert_eq!(toks("f'{x}'")[0], Tok::FStr("{x}".into()));
        assert_eq!(toks("\"\"\"a\nb\"\"\"")[0], Tok::Str("a\nb".into()));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(toks("1_000")[0], Tok::Int(1000));
        assert_eq!(toks("0xff")[0], Tok::Int(255));
        assert_eq!(toks("9223372036854775807")[0], Tok::Int(i64::MAX));
        assert_eq!(
            toks("123456789012345678901234567890")[0],
            Tok::BigInt("123456789012345678901234567890".parse().unwrap())
        );
        assert_eq!(toks("0x1_0000_0000_0000_0000")[0], Tok::BigInt(BigInt::from(1) << 64usize));
        assert_eq!(toks("1.5")[0], Tok::Float(1.5));
        assert_eq!(toks("1e3")[0], Tok::Float(1000.0));
        assert_eq!(toks(".5")[0], Tok::Float(0.5));
    }

    #[test]
    fn test_errors() {
        assert!(tokenize("'abc").is_err());
        assert!(tokenize("x = $").is_err());
        assert!(tokenize("  x = 1").is_err());
        assert!(tokenize("if x:\n    y\n  z\n").is_err());
        assert!(tokenize(")").is_err());
        assert!(tokenize(&"(".repeat(MAX_NESTING + 1)).is_err());
    }
}
