//! スプレッドシート読み込み（calamine）
//!
//! ブック全体をセル値のグリッドとして読み込む。ヘッダー行も1行目として保持する。

use crate::error::{Result, RosterError};
use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use roster_sync_common::table::PositionalTable;
use roster_sync_common::types::{parse_datetime, CellValue};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::Path;

/// 1シート分のセル値（行0はヘッダー）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetGrid {
    pub name: String,
    pub rows: Vec<Vec<CellValue>>,
}

impl SheetGrid {
    pub fn new(name: impl Into<String>, rows: Vec<Vec<CellValue>>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    /// 列数（最も長い行）
    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// ヘッダーを除いたデータ行
    pub fn data_rows(&self) -> &[Vec<CellValue>] {
        self.rows.get(1..).unwrap_or(&[])
    }
}

/// 読み込んだブック全体とファイルの指紋
#[derive(Debug, Clone)]
pub struct WorkbookSnapshot {
    pub sheets: Vec<SheetGrid>,
    pub fingerprint: String,
}

impl WorkbookSnapshot {
    pub fn sheet(&self, name: &str) -> Result<&SheetGrid> {
        self.sheets
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| missing_sheet(name))
    }

    pub fn sheet_mut(&mut self, name: &str) -> Result<&mut SheetGrid> {
        self.sheets
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| missing_sheet(name))
    }
}

fn missing_sheet(name: &str) -> RosterError {
    RosterError::Spreadsheet(format!("シート '{}' が見つかりません", name))
}

/// バイト列の SHA-256（16進）
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// ブック全体を読み込む
pub fn read_workbook(path: &Path) -> Result<WorkbookSnapshot> {
    if !path.exists() {
        return Err(RosterError::SourceNotFound(path.display().to_string()));
    }
    let bytes = std::fs::read(path)?;
    let fingerprint = fingerprint(&bytes);

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| RosterError::Spreadsheet(format!("{}: {}", path.display(), e)))?;

    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| RosterError::Spreadsheet(format!("{} / {}: {}", path.display(), name, e)))?;
        sheets.push(SheetGrid::new(name, range_to_rows(&range)));
    }

    tracing::debug!(path = %path.display(), sheets = sheets.len(), "ブックを読み込みました");
    Ok(WorkbookSnapshot {
        sheets,
        fingerprint,
    })
}

/// 位置指定で取り込み元シートを読み込む（ヘッダー行は捨てる）
///
/// 設定位置がシートの列数を超えていたら SchemaMismatch。
pub fn load_source(path: &Path, sheet_name: &str, positions: &[usize]) -> Result<PositionalTable> {
    let snapshot = read_workbook(path)?;
    let sheet = snapshot.sheet(sheet_name)?;
    let table = PositionalTable::from_grid(sheet.data_rows(), sheet.width(), positions)?;
    tracing::info!(
        path = %path.display(),
        rows = table.len(),
        "取り込み元を読み込みました"
    );
    Ok(table)
}

/// 範囲を 0行0列 起点のグリッドへ（範囲の開始位置より前は空セル）
fn range_to_rows(range: &Range<Data>) -> Vec<Vec<CellValue>> {
    let Some((end_row, end_col)) = range.end() else {
        return Vec::new();
    };
    (0..=end_row)
        .map(|row| {
            (0..=end_col)
                .map(|col| range.get_value((row, col)).map(to_cell_value).unwrap_or_default())
                .collect()
        })
        .collect()
}

fn to_cell_value(data: &Data) -> CellValue {
    match data {
        Data::Empty => CellValue::Empty,
        Data::Int(i) => CellValue::Int(*i),
        Data::Float(f) => CellValue::from_f64(*f),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::String(s) if s.is_empty() => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::DateTime(dt) => {
            let serial = dt.as_f64();
            CellValue::from_excel_serial(serial).unwrap_or(CellValue::Float(serial))
        }
        Data::DateTimeIso(s) => parse_datetime(s)
            .map(CellValue::Date)
            .unwrap_or_else(|| CellValue::Text(s.clone())),
        Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(e) => CellValue::Text(e.to_string()),
    }
}
