//! roster-sync: 名簿スプレッドシートの照合・同期
//!
//! - config: 設定ファイル
//! - spreadsheet: マスタの読み込みと原子的な書き込み
//! - registry: 職員・所属登録簿（区切り文字ファイル）
//! - sync: 同期セッション（取り込み・フェーズ2）
//! - enrich: 登録簿による補完結合
//! - entry: レコードの手入力操作

pub mod cli;
pub mod config;
pub mod enrich;
pub mod entry;
pub mod error;
pub mod registry;
pub mod spreadsheet;
pub mod sync;
