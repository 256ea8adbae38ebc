//! Tokenizer for query text.
//!
//! Keywords are not distinguished here: they lex as [`TokenKind::Ident`] and
//! the parser matches them case-insensitively, so a field may share a name
//! with a keyword as long as it is not used where the keyword is expected.

use crate::error::{QueryError, QueryResult};

/// A token with the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// A bare word: symbol name or keyword. May contain `.` for chains.
    Ident(String),
    /// A quoted string with escapes resolved.
    Str(String),
    Int(i64),
    Float(f64),
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Tilde,
    LeftParen,
    RightParen,
    Comma,
    Eof,
}

pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    /// Tokenize the whole input. The last token is always `Eof`.
    pub fn tokenize(src: &str) -> QueryResult<Vec<Token>> {
        let mut lexer = Lexer::new(src);
        let mut tokens = Vec::new();
        loop {
            let tok = lexer.next_token()?;
            let done = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn error(&self, pos: usize, message: impl Into<String>) -> QueryError {
        QueryError::Parse {
            pos,
            message: message.into(),
        }
    }

    pub fn next_token(&mut self) -> QueryResult<Token> {
        while self.peek_at(0).is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
        let start = self.pos;
        let Some(ch) = self.peek_at(0) else {
            return Ok(Token {
                kind: TokenKind::Eof,
                pos: start,
            });
        };

        let kind = match ch {
            b'"' | b'\'' => self.lex_string(ch)?,
            b'0'..=b'9' => self.lex_number()?,
            b'-' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.lex_number()?,
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.lex_ident(),
            b'=' => self.single(TokenKind::Eq),
            b'~' => self.single(TokenKind::Tilde),
            b'(' => self.single(TokenKind::LeftParen),
            b')' => self.single(TokenKind::RightParen),
            b',' => self.single(TokenKind::Comma),
            b'!' if self.peek_at(1) == Some(b'=') => {
                self.pos += 2;
                TokenKind::Ne
            }
            b'<' => self.with_eq(TokenKind::Lt, TokenKind::Le),
            b'>' => self.with_eq(TokenKind::Gt, TokenKind::Ge),
            _ => {
                let c = self.src[start..].chars().next().unwrap_or('?');
                return Err(self.error(start, format!("unexpected character {c:?}")));
            }
        };
        Ok(Token { kind, pos: start })
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.pos += 1;
        kind
    }

    fn with_eq(&mut self, bare: TokenKind, with_eq: TokenKind) -> TokenKind {
        self.pos += 1;
        if self.peek_at(0) == Some(b'=') {
            self.pos += 1;
            with_eq
        } else {
            bare
        }
    }

    fn lex_ident(&mut self) -> TokenKind {
        let start = self.pos;
        while self
            .peek_at(0)
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_' || c == b'.')
        {
            self.pos += 1;
        }
        TokenKind::Ident(self.src[start..self.pos].to_string())
    }

    fn lex_number(&mut self) -> QueryResult<TokenKind> {
        let start = self.pos;
        if self.peek_at(0) == Some(b'-') {
            self.pos += 1;
        }
        let mut is_float = false;
        while let Some(c) = self.peek_at(0) {
            match c {
                b'0'..=b'9' => {}
                b'.' | b'e' | b'E' => is_float = true,
                b'+' | b'-' if matches!(self.bytes[self.pos - 1], b'e' | b'E') => {}
                _ => break,
            }
            self.pos += 1;
        }
        let text = &self.src[start..self.pos];
        if is_float {
            text.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| self.error(start, format!("invalid number {text:?}")))
        } else {
            text.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| self.error(start, format!("integer out of range {text:?}")))
        }
    }

    fn lex_string(&mut self, quote: u8) -> QueryResult<TokenKind> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        let mut chars = self.src[self.pos..].char_indices();
        while let Some((offset, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, escaped)) => out.push(escaped),
                    None => break,
                },
                c if c as u32 == u32::from(quote) => {
                    self.pos += offset + 1;
                    return Ok(TokenKind::Str(out));
                }
                c => out.push(c),
            }
        }
        Err(self.error(start, "unterminated string"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::tokenize(src)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn operators_and_names() {
        assert_eq!(
            kinds("manager.name != 'x' and age>=3"),
            vec![
                TokenKind::Ident("manager.name".into()),
                TokenKind::Ne,
                TokenKind::Str("x".into()),
                TokenKind::Ident("and".into()),
                TokenKind::Ident("age".into()),
                TokenKind::Ge,
                TokenKind::Int(3),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            kinds("-7 2.5 1e3"),
            vec![
                TokenKind::Int(-7),
                TokenKind::Float(2.5),
                TokenKind::Float(1000.0),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds(r#""say \"hi\"" 'it\'s'"#),
            vec![
                TokenKind::Str("say \"hi\"".into()),
                TokenKind::Str("it's".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn positions_and_errors() {
        let toks = Lexer::tokenize("  a = 1").unwrap();
        assert_eq!(toks[0].pos, 2);
        assert_eq!(toks[1].pos, 4);

        assert!(matches!(
            Lexer::tokenize("a = \"open"),
            Err(QueryError::Parse { pos: 4, .. })
        ));
        assert!(matches!(
            Lexer::tokenize("a # b"),
            Err(QueryError::Parse { pos: 2, .. })
        ));
    }
}
