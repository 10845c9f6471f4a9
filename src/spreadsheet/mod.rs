//! スプレッドシート入出力
//!
//! - reader: calamine でブック全体をセル値のグリッドへ
//! - writer: rust_xlsxwriter でグリッドをxlsxへ
//! - patch: 列位置ベースの変更
//! - store: マスタファイルの読み込みと原子的な置き換え

pub mod patch;
pub mod reader;
pub mod store;
pub mod writer;

pub use patch::{Patch, PatchOp};
pub use reader::{load_source, read_workbook, SheetGrid, WorkbookSnapshot};
pub use store::{CommitSummary, MasterStore, StagedCommit};
pub use writer::render_workbook;
