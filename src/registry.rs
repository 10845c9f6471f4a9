//! 登録簿（区切り文字ファイル）の読み込み
//!
//! 職員登録簿・所属登録簿を読み、`keep` で指定した列だけを保持する。

use crate::config::RegistrySpec;
use crate::error::{Result, RosterError};
use roster_sync_common::types::CellValue;
use std::collections::BTreeMap;
use std::path::Path;

/// 職員登録簿の既定の区切り文字
pub const EMPLOYEE_DELIMITER: char = ';';
/// 所属登録簿の既定の区切り文字
pub const WORKCENTER_DELIMITER: char = ',';

/// 登録簿の1行
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryRow {
    /// 1始まりの行番号（ヘッダー込み）
    pub line: usize,
    pub fields: BTreeMap<String, CellValue>,
}

impl RegistryRow {
    pub fn get(&self, column: &str) -> &CellValue {
        const EMPTY: &CellValue = &CellValue::Empty;
        self.fields.get(column).unwrap_or(EMPTY)
    }
}

/// 読み込んだ登録簿
#[derive(Debug, Clone, Default)]
pub struct Registry {
    pub headers: Vec<String>,
    pub rows: Vec<RegistryRow>,
}

impl Registry {
    /// 設定に従って読み込む
    pub fn load(spec: &RegistrySpec, default_delimiter: char) -> Result<Self> {
        Self::from_path(&spec.full_path(), spec.delimiter_or(default_delimiter)?, &spec.keep)
    }

    /// # Arguments
    /// * `path` - ファイルパス
    /// * `delimiter` - 区切り文字
    /// * `keep` - 保持する列名（空なら全列）
    pub fn from_path(path: &Path, delimiter: u8, keep: &[String]) -> Result<Self> {
        if !path.exists() {
            return Err(RosterError::SourceNotFound(path.display().to_string()));
        }
        let file = std::fs::File::open(path)?;
        let registry = Self::from_reader(file, delimiter, keep)?;
        tracing::info!(path = %path.display(), rows = registry.rows.len(), "登録簿を読み込みました");
        Ok(registry)
    }

    pub fn from_reader<R: std::io::Read>(reader: R, delimiter: u8, keep: &[String]) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let header_row: Vec<String> = csv_reader
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();

        let headers: Vec<String> = if keep.is_empty() {
            header_row.clone()
        } else {
            keep.to_vec()
        };
        let mut indexes = Vec::with_capacity(headers.len());
        for name in &headers {
            let index = header_row.iter().position(|h| h == name).ok_or_else(|| {
                RosterError::Config(format!("登録簿に列 '{}' がありません", name))
            })?;
            indexes.push(index);
        }

        let mut rows = Vec::new();
        for (i, record) in csv_reader.records().enumerate() {
            let record = record?;
            let fields = headers
                .iter()
                .zip(&indexes)
                .map(|(name, &index)| (name.clone(), parse_field(record.get(index).unwrap_or(""))))
                .collect();
            rows.push(RegistryRow { line: i + 2, fields });
        }

        Ok(Self { headers, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// 1フィールドを値に変換（空 → Empty、数値 → Int/Float）
pub fn parse_field(raw: &str) -> CellValue {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        CellValue::Empty
    } else if let Ok(i) = trimmed.parse::<i64>() {
        CellValue::Int(i)
    } else if let Ok(f) = trimmed.parse::<f64>() {
        CellValue::from_f64(f)
    } else {
        CellValue::text(trimmed)
    }
}

/// 氏名の各部分を連結（空の部分は飛ばす）
pub fn concatenate_name(parts: &[&CellValue]) -> String {
    parts
        .iter()
        .map(|p| p.to_string().trim().to_string())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
