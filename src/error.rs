use roster_sync_common::Error as CommonError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("設定エラー: {0}")]
    Config(String),

    #[error("ファイルが見つかりません: {0}")]
    SourceNotFound(String),

    #[error("列構成が一致しません: {0}")]
    SchemaMismatch(String),

    #[error("書き込みに失敗しました（元のファイルは変更されていません）: {0}")]
    Persistence(String),

    #[error("スプレッドシート読み込みエラー: {0}")]
    Spreadsheet(String),

    #[error("登録簿の読み込みエラー: {0}")]
    Csv(#[from] csv::Error),

    #[error("レコードが見つかりません: id={0}")]
    RecordNotFound(i64),

    #[error("'{field}' の値が不正です: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("この操作は現在の状態 ({state}) では実行できません: {action}")]
    InvalidTransition { state: String, action: String },

    #[error("入力エラー: {0}")]
    Prompt(String),

    #[error("JSON解析エラー: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CommonError> for RosterError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::Json(e) => RosterError::JsonParse(e),
            CommonError::Config(msg) => RosterError::Config(msg),
            CommonError::SchemaMismatch(msg) => RosterError::SchemaMismatch(msg),
            CommonError::InvalidValue { field, reason } => RosterError::InvalidValue { field, reason },
            CommonError::RecordNotFound(id) => RosterError::RecordNotFound(id),
        }
    }
}

impl From<calamine::Error> for RosterError {
    fn from(err: calamine::Error) -> Self {
        RosterError::Spreadsheet(err.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for RosterError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        RosterError::Persistence(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RosterError>;
