//! Roster Sync Common Library
//!
//! 名簿照合の中核ロジック（I/Oなし）。CLIと結合テストで共有する。

pub mod error;
pub mod matcher;
pub mod resolver;
pub mod rules;
pub mod schema;
pub mod table;
pub mod types;

pub use error::{Error, Result};
pub use matcher::{best_match, search, MatchCandidate, MATCH_THRESHOLD, SEARCH_THRESHOLD};
pub use resolver::{AmbiguousGroup, Resolution};
pub use rules::{RuleMode, RuleOutput, RuleSet};
pub use schema::{ColumnSpec, SchemaMap};
pub use table::{PositionalTable, SourceRow};
pub use types::{CellValue, FieldKind, MasterDataset, MasterRecord};
