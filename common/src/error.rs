//! エラー型定義

use thiserror::Error;

/// 共通エラー型
#[derive(Error, Debug)]
pub enum Error {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Record not found: id={0}")]
    RecordNotFound(i64),
}

/// Result型エイリアス
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_json() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let error = Error::Json(json_error);
        let display = format!("{}", error);
        assert!(display.contains("JSON error"));
    }

    #[test]
    fn test_error_display_config() {
        let error = Error::Config("idカラムがありません".to_string());
        let display = format!("{}", error);
        assert_eq!(display, "Config error: idカラムがありません");
    }

    #[test]
    fn test_error_display_invalid_value() {
        let error = Error::InvalidValue {
            field: "fecha".to_string(),
            reason: "日付形式ではありません".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("fecha"));
        assert!(display.contains("日付形式"));
    }

    #[test]
    fn test_error_from_json() {
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error: Error = json_error.into();
        assert!(matches!(error, Error::Json(_)));
    }

    #[test]
    fn test_error_debug() {
        let error = Error::RecordNotFound(42);
        let debug = format!("{:?}", error);
        assert!(debug.contains("RecordNotFound"));
        assert!(debug.contains("42"));
    }
}
