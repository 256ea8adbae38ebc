//! Recursive-descent parser producing a [`Query`].
//!
//! Precedence, lowest first: `or`, `and`, prefix `not`, predicates.

use chrono::{DateTime, Utc};
use nest_codec::{Tag, Value};

use crate::ast::{CmpOp, Expr, SortField};
use crate::error::{QueryError, QueryResult};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::query::Query;
use crate::traits::{SymbolInfo, SymbolOracle};

/// A literal before coercion to a symbol's type.
#[derive(Debug, Clone)]
enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl Literal {
    fn describe(&self) -> String {
        match self {
            Self::Str(s) => format!("string {s:?}"),
            Self::Int(i) => format!("integer {i}"),
            Self::Float(x) => format!("float {x}"),
            Self::Bool(b) => format!("bool {b}"),
            Self::Null => "null".into(),
        }
    }
}

pub(crate) struct Parser<'o> {
    tokens: Vec<Token>,
    pos: usize,
    oracle: &'o dyn SymbolOracle,
}

impl<'o> Parser<'o> {
    pub(crate) fn new(text: &str, oracle: &'o dyn SymbolOracle) -> QueryResult<Self> {
        Ok(Self {
            tokens: Lexer::tokenize(text)?,
            pos: 0,
            oracle,
        })
    }

    // ── Token helpers ───────────────────────────────────────────────────

    fn peek(&self) -> &Token {
        // tokenize always ends with Eof and advance never passes it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if tok.kind != TokenKind::Eof {
            self.pos += 1;
        }
        tok
    }

    fn at_kw(&self, kw: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(s) if s.eq_ignore_ascii_case(kw))
    }

    fn at_kw_after(&self, offset: usize, kw: &str) -> bool {
        matches!(
            self.tokens.get(self.pos + offset).map(|t| &t.kind),
            Some(TokenKind::Ident(s)) if s.eq_ignore_ascii_case(kw)
        )
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.at_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if &self.peek().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> QueryError {
        QueryError::Parse {
            pos: self.peek().pos,
            message: message.into(),
        }
    }

    fn expect_kw(&mut self, kw: &str) -> QueryResult<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected {kw:?}")))
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> QueryResult<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn expect_name(&mut self) -> QueryResult<String> {
        match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("expected symbol name")),
        }
    }

    fn expect_count(&mut self, what: &str) -> QueryResult<usize> {
        match self.peek().kind.clone() {
            TokenKind::Int(n) if n >= 0 => {
                self.advance();
                usize::try_from(n).map_err(|_| self.error(format!("{what} out of range")))
            }
            _ => Err(self.error(format!("expected non-negative integer after {what}"))),
        }
    }

    fn lookup(&self, name: &str, pos: usize) -> QueryResult<SymbolInfo> {
        self.oracle.symbol_info(name).ok_or_else(|| {
            tracing::debug!(symbol = name, pos, "query references unknown symbol");
            QueryError::UnknownSymbol(name.to_string())
        })
    }

    // ── Grammar ─────────────────────────────────────────────────────────

    pub(crate) fn parse_query(mut self) -> QueryResult<Query> {
        let filter = if self.at_clause_start() {
            None
        } else {
            Some(self.parse_or()?)
        };

        let mut sort = Vec::new();
        if self.at_kw("sort") && self.at_kw_after(1, "by") {
            self.advance();
            self.advance();
            loop {
                let pos = self.peek().pos;
                let symbol = self.expect_name()?;
                let info = self.lookup(&symbol, pos)?;
                if info.is_set {
                    return Err(QueryError::SortOnSet(symbol));
                }
                let ascending = if self.eat_kw("desc") {
                    false
                } else {
                    self.eat_kw("asc");
                    true
                };
                sort.push(SortField { symbol, ascending });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }

        let skip = if self.eat_kw("skip") {
            self.expect_count("skip")?
        } else {
            0
        };
        let limit = if self.eat_kw("limit") {
            Some(self.expect_count("limit")?)
        } else {
            None
        };

        if self.peek().kind != TokenKind::Eof {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(Query::new(filter, sort, skip, limit))
    }

    /// True when no filter precedes the paging clauses.
    fn at_clause_start(&self) -> bool {
        let next_is_int = matches!(
            self.tokens.get(self.pos + 1).map(|t| &t.kind),
            Some(TokenKind::Int(_))
        );
        self.peek().kind == TokenKind::Eof
            || (self.at_kw("sort") && self.at_kw_after(1, "by"))
            || ((self.at_kw("skip") || self.at_kw("limit")) && next_is_int)
    }

    fn parse_or(&mut self) -> QueryResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat_kw("or") {
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> QueryResult<Expr> {
        let mut lhs = self.parse_unary()?;
        while self.eat_kw("and") {
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> QueryResult<Expr> {
        if self.eat_kw("not") {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        if self.eat(&TokenKind::LeftParen) {
            let inner = self.parse_or()?;
            self.expect(&TokenKind::RightParen, "')'")?;
            return Ok(inner);
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> QueryResult<Expr> {
        let pos = self.peek().pos;
        let symbol = self.expect_name()?;
        let info = self.lookup(&symbol, pos)?;
        let is_set = info.is_set;

        if self.eat_kw("is") {
            let negated = self.eat_kw("not");
            self.expect_kw("null")?;
            return Ok(Expr::IsNull {
                symbol,
                is_set,
                negated,
            });
        }

        let negated_in = self.at_kw("not") && self.at_kw_after(1, "in");
        if negated_in {
            self.advance();
        }
        if self.eat_kw("in") {
            self.expect(&TokenKind::LeftParen, "'(' after in")?;
            let mut values = Vec::new();
            loop {
                let lit = self.parse_literal()?;
                values.push(coerce(&symbol, info, lit)?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RightParen, "')'")?;
            let expr = Expr::In {
                symbol,
                is_set,
                values,
            };
            return Ok(if negated_in {
                Expr::Not(Box::new(expr))
            } else {
                expr
            });
        }

        let op = match self.advance().kind {
            TokenKind::Eq => CmpOp::Eq,
            TokenKind::Ne => CmpOp::Ne,
            TokenKind::Lt => CmpOp::Lt,
            TokenKind::Le => CmpOp::Le,
            TokenKind::Gt => CmpOp::Gt,
            TokenKind::Ge => CmpOp::Ge,
            TokenKind::Tilde => CmpOp::Contains,
            _ => {
                return Err(QueryError::Parse {
                    pos: self.tokens[self.pos.saturating_sub(1)].pos,
                    message: format!("expected operator after {symbol}"),
                })
            }
        };
        let lit = self.parse_literal()?;
        if op == CmpOp::Contains && info.tag != Tag::String {
            return Err(QueryError::TypeMismatch {
                symbol,
                expected: info.tag,
                found: "substring match".into(),
            });
        }
        let value = coerce(&symbol, info, lit)?;
        Ok(Expr::Compare {
            symbol,
            is_set,
            op,
            value,
        })
    }

    fn parse_literal(&mut self) -> QueryResult<Literal> {
        let lit = match &self.peek().kind {
            TokenKind::Str(s) => Literal::Str(s.clone()),
            TokenKind::Int(i) => Literal::Int(*i),
            TokenKind::Float(x) => Literal::Float(*x),
            TokenKind::Ident(w) if w.eq_ignore_ascii_case("true") => Literal::Bool(true),
            TokenKind::Ident(w) if w.eq_ignore_ascii_case("false") => Literal::Bool(false),
            TokenKind::Ident(w) if w.eq_ignore_ascii_case("null") => Literal::Null,
            _ => return Err(self.error("expected literal")),
        };
        self.advance();
        Ok(lit)
    }
}

/// Coerce a literal to the symbol's value type.
fn coerce(symbol: &str, info: SymbolInfo, lit: Literal) -> QueryResult<Value> {
    let mismatch = |lit: &Literal| QueryError::TypeMismatch {
        symbol: symbol.to_string(),
        expected: info.tag,
        found: lit.describe(),
    };
    let value = match (info.tag, &lit) {
        (_, Literal::Null) => Value::Nil,
        (Tag::String, Literal::Str(s)) => Value::String(s.clone()),
        (Tag::Bool, Literal::Bool(b)) => Value::Bool(*b),
        (Tag::Int32, Literal::Int(i)) => {
            Value::Int32(i32::try_from(*i).map_err(|_| mismatch(&lit))?)
        }
        (Tag::Int64, Literal::Int(i)) => Value::Int64(*i),
        (Tag::Float64, Literal::Int(i)) => Value::Float64(*i as f64),
        (Tag::Int32 | Tag::Int64 | Tag::Float64, Literal::Float(x)) => Value::Float64(*x),
        (Tag::Time, Literal::Str(s)) => DateTime::parse_from_rfc3339(s)
            .map(|t| Value::Time(t.with_timezone(&Utc)))
            .map_err(|_| mismatch(&lit))?,
        (Tag::Nil, Literal::Str(s)) => Value::String(s.clone()),
        (Tag::Nil, Literal::Int(i)) => Value::Int64(*i),
        (Tag::Nil, Literal::Bool(b)) => Value::Bool(*b),
        (Tag::Nil, Literal::Float(x)) => Value::Float64(*x),
        _ => return Err(mismatch(&lit)),
    };
    Ok(value)
}
