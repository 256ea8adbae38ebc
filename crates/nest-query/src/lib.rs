//! Query language and evaluation contract for nestdb.
//!
//! A [`Query`] is parsed once against a [`SymbolOracle`] (normally a store),
//! then evaluated row by row through a [`RowCursor`] supplied by the scanner.
//! The parser knows nothing about storage: multi-hop names such as
//! `manager.locations.name` are opaque symbols whose set-ness the oracle
//! reports.
//!
//! ```text
//! name ~ "Hill" and (age >= 21 or manager is null)
//!     sort by lastName desc, firstName skip 10 limit 10
//! ```

pub mod ast;
pub mod error;
pub mod lexer;
mod parser;
pub mod query;
pub mod traits;

pub use ast::{CmpOp, Expr, SortField};
pub use error::{QueryError, QueryResult};
pub use query::Query;
pub use traits::{RowCursor, SymbolInfo, SymbolOracle};
