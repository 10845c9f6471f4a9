//! マスタデータの型定義
//!
//! - CellValue: スプレッドシートの1セル値（テキスト・数値・日付・指標）
//! - FieldKind: カラムの意味的な型
//! - MasterRecord: マスタの1行
//! - MasterDataset: セッション中のマスタ全体（メモリ上の正本）

use crate::error::{Error, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// 指標フィールドの接頭辞
pub const INDICATOR_PREFIX: &str = "ind_";

/// id カラムの column_id
pub const ID_COLUMN: &str = "id";

/// 氏名カラムの column_id（あいまい照合のキー）
pub const NAME_COLUMN: &str = "name";

/// 1セルの値
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Bool(bool),
    Int(i64),
    Float(f64),
    Date(NaiveDateTime),
    Text(String),
}

/// カラムの型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Number,
    Date,
    Indicator,
}

impl FieldKind {
    /// column_id から型を推定（`ind_` 接頭辞のみ判定可能）
    pub fn infer(column_id: &str) -> Option<Self> {
        if column_id.starts_with(INDICATOR_PREFIX) {
            Some(FieldKind::Indicator)
        } else {
            None
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Text => write!(f, "text"),
            FieldKind::Number => write!(f, "number"),
            FieldKind::Date => write!(f, "date"),
            FieldKind::Indicator => write!(f, "indicator"),
        }
    }
}

/// Excelシリアル値の基準日（1900年うるう年バグ込み）
fn excel_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Excelで表せる最後の日（9999-12-31）の翌日
const MAX_EXCEL_SERIAL: f64 = 2_958_466.0;

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        CellValue::Text(value.into())
    }

    /// 浮動小数を正規化（整数値なら Int にする）
    pub fn from_f64(value: f64) -> Self {
        if value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0e15 {
            CellValue::Int(value as i64)
        } else {
            CellValue::Float(value)
        }
    }

    /// Excelシリアル値から日時へ（ミリ秒で丸め）
    ///
    /// Excelの日付範囲（0〜9999-12-31）外なら None。
    pub fn from_excel_serial(serial: f64) -> Option<Self> {
        if !serial.is_finite() || !(0.0..MAX_EXCEL_SERIAL).contains(&serial) {
            return None;
        }
        let millis = (serial * MILLIS_PER_DAY).round() as i64;
        excel_epoch()
            .checked_add_signed(Duration::milliseconds(millis))
            .map(CellValue::Date)
    }

    /// 日時をExcelシリアル値へ
    pub fn excel_serial(date: &NaiveDateTime) -> f64 {
        let millis = date.signed_duration_since(excel_epoch()).num_milliseconds();
        millis as f64 / MILLIS_PER_DAY
    }

    /// 欠損扱いか（null または空白のみの文字列）
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// 整数として解釈（"3", 3.0 も可）
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int(i) => Some(*i),
            CellValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            CellValue::Bool(b) => Some(i64::from(*b)),
            CellValue::Text(s) => {
                let s = s.trim();
                s.parse::<i64>().ok().or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.fract() == 0.0)
                        .map(|f| f as i64)
                })
            }
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Float(f) => Some(*f),
            CellValue::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// 指標値として真か
    ///
    /// `1` / `1.0` / `"1"` / `true` のみ真。null を含むそれ以外は偽。
    pub fn is_truthy_indicator(&self) -> bool {
        match self {
            CellValue::Bool(b) => *b,
            CellValue::Int(i) => *i == 1,
            CellValue::Float(f) => *f == 1.0,
            CellValue::Text(s) => s.trim() == "1",
            _ => false,
        }
    }

    /// 指標値を 0/1 に正規化
    pub fn to_indicator(&self) -> CellValue {
        CellValue::Int(i64::from(self.is_truthy_indicator()))
    }

    /// 型に合わせて値を変換する（読み込み時の正規化）
    ///
    /// 変換できない値はそのまま返す（データを捨てない）。
    pub fn coerce(self, kind: FieldKind) -> CellValue {
        match kind {
            FieldKind::Indicator => self.to_indicator(),
            FieldKind::Date => match self {
                CellValue::Int(i) => CellValue::from_excel_serial(i as f64).unwrap_or(CellValue::Int(i)),
                CellValue::Float(f) => CellValue::from_excel_serial(f).unwrap_or(CellValue::Float(f)),
                CellValue::Text(s) => match parse_datetime(&s) {
                    Some(d) => CellValue::Date(d),
                    None if s.trim().is_empty() => CellValue::Empty,
                    None => CellValue::Text(s),
                },
                other => other,
            },
            FieldKind::Number => match self {
                CellValue::Text(s) => {
                    let trimmed = s.trim();
                    if trimmed.is_empty() {
                        CellValue::Empty
                    } else if let Ok(i) = trimmed.parse::<i64>() {
                        CellValue::Int(i)
                    } else if let Ok(f) = trimmed.parse::<f64>() {
                        CellValue::from_f64(f)
                    } else {
                        CellValue::Text(s)
                    }
                }
                CellValue::Float(f) => CellValue::from_f64(f),
                other => other,
            },
            FieldKind::Text => match self {
                CellValue::Empty => CellValue::Empty,
                CellValue::Text(s) => CellValue::Text(s),
                other => CellValue::Text(other.to_string()),
            },
        }
    }

    /// オペレータ入力（文字列）を型に従ってパースする
    pub fn parse_as(kind: FieldKind, field: &str, input: &str) -> Result<CellValue> {
        let trimmed = input.trim();
        let invalid = |reason: &str| Error::InvalidValue {
            field: field.to_string(),
            reason: format!("{} ({})", reason, input),
        };

        match kind {
            FieldKind::Text => Ok(if trimmed.is_empty() {
                CellValue::Empty
            } else {
                CellValue::Text(input.to_string())
            }),
            FieldKind::Number => {
                if trimmed.is_empty() {
                    return Ok(CellValue::Empty);
                }
                if let Ok(i) = trimmed.parse::<i64>() {
                    return Ok(CellValue::Int(i));
                }
                trimmed
                    .parse::<f64>()
                    .map(CellValue::from_f64)
                    .map_err(|_| invalid("数値ではありません"))
            }
            FieldKind::Date => {
                if trimmed.is_empty() {
                    return Ok(CellValue::Empty);
                }
                parse_datetime(trimmed)
                    .map(CellValue::Date)
                    .ok_or_else(|| invalid("日付形式ではありません"))
            }
            FieldKind::Indicator => match trimmed.to_lowercase().as_str() {
                "1" | "true" | "yes" | "sí" | "si" => Ok(CellValue::Int(1)),
                "" | "0" | "false" | "no" => Ok(CellValue::Int(0)),
                _ => Err(invalid("0/1 で指定してください")),
            },
        }
    }
}

/// 日付文字列をパース（`YYYY-MM-DD` / `YYYY-MM-DD HH:MM:SS`）
pub fn parse_datetime(input: &str) -> Option<NaiveDateTime> {
    let s = input.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Int(i) => write!(f, "{}", i),
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::Date(d) => {
                if d.time() == NaiveTime::MIN {
                    write!(f, "{}", d.format("%Y-%m-%d"))
                } else {
                    write!(f, "{}", d.format("%Y-%m-%d %H:%M:%S"))
                }
            }
            CellValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// マスタの1行
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MasterRecord {
    /// 不変のid
    pub id: i64,
    /// column_id → 値（id 以外）
    pub fields: BTreeMap<String, CellValue>,
}

impl MasterRecord {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
        }
    }

    /// 氏名（空なら None）
    pub fn name(&self) -> Option<&str> {
        self.fields
            .get(NAME_COLUMN)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn get(&self, column_id: &str) -> &CellValue {
        const EMPTY: &CellValue = &CellValue::Empty;
        self.fields.get(column_id).unwrap_or(EMPTY)
    }

    pub fn set(&mut self, column_id: impl Into<String>, value: CellValue) {
        self.fields.insert(column_id.into(), value);
    }
}

/// セッション中のマスタデータ全体
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasterDataset {
    /// 設定順のcolumn_id一覧（id を含む）
    columns: Vec<String>,
    records: Vec<MasterRecord>,
    /// セッション内で払い出した最大id（削除後の再利用防止）
    high_water: i64,
    /// 読み込み時のファイル指紋
    fingerprint: Option<String>,
}

impl MasterDataset {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            ..Default::default()
        }
    }

    pub fn with_records(columns: Vec<String>, records: Vec<MasterRecord>) -> Self {
        let high_water = records.iter().map(|r| r.id).max().unwrap_or(0);
        Self {
            columns,
            records,
            high_water,
            fingerprint: None,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, column_id: &str) -> bool {
        self.columns.iter().any(|c| c == column_id)
    }

    /// 指標カラム（`ind_*`）の一覧
    pub fn indicator_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .map(String::as_str)
            .filter(|c| c.starts_with(INDICATOR_PREFIX))
    }

    pub fn records(&self) -> &[MasterRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    pub fn set_fingerprint(&mut self, fingerprint: Option<String>) {
        self.fingerprint = fingerprint;
    }

    pub fn ids(&self) -> BTreeSet<i64> {
        self.records.iter().map(|r| r.id).collect()
    }

    /// (id, 氏名) の一覧（氏名のない行は除外、読み込み順）
    pub fn names(&self) -> Vec<(i64, &str)> {
        self.records
            .iter()
            .filter_map(|r| r.name().map(|n| (r.id, n)))
            .collect()
    }

    pub fn get(&self, id: i64) -> Option<&MasterRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// 次に払い出すid
    ///
    /// `max(既存id) + 1`、空なら 1。セッション内で削除されたidは再利用しない。
    pub fn next_id(&self) -> i64 {
        let max_existing = self.records.iter().map(|r| r.id).max().unwrap_or(0);
        max_existing.max(self.high_water) + 1
    }

    fn check_columns(&self, fields: &BTreeMap<String, CellValue>) -> Result<()> {
        if let Some(unknown) = fields.keys().find(|k| !self.has_column(k)) {
            return Err(Error::InvalidValue {
                field: unknown.clone(),
                reason: "マスタに存在しないカラムです".into(),
            });
        }
        Ok(())
    }

    /// 新規レコードを追加（idを自動採番）
    ///
    /// 未設定の指標カラムは 0 で初期化する。
    pub fn insert(&mut self, fields: BTreeMap<String, CellValue>) -> Result<i64> {
        let id = self.next_id();
        self.insert_with_id(id, fields)?;
        Ok(id)
    }

    /// 指定idでレコードを追加（同期取り込みでソースのidを使う場合）
    pub fn insert_with_id(&mut self, id: i64, mut fields: BTreeMap<String, CellValue>) -> Result<()> {
        if self.get(id).is_some() {
            return Err(Error::InvalidValue {
                field: ID_COLUMN.into(),
                reason: format!("id={} は既に存在します", id),
            });
        }
        fields.remove(ID_COLUMN);
        self.check_columns(&fields)?;

        let indicators: Vec<String> = self.indicator_columns().map(str::to_string).collect();
        for column in indicators {
            let value = fields.entry(column).or_insert(CellValue::Int(0));
            if value.is_empty() {
                *value = CellValue::Int(0);
            }
        }

        self.records.push(MasterRecord { id, fields });
        self.high_water = self.high_water.max(id);
        Ok(())
    }

    /// 1フィールドを更新
    pub fn update(&mut self, id: i64, column_id: &str, value: CellValue) -> Result<CellValue> {
        if column_id == ID_COLUMN {
            return Err(Error::InvalidValue {
                field: ID_COLUMN.into(),
                reason: "idは変更できません".into(),
            });
        }
        if !self.has_column(column_id) {
            return Err(Error::InvalidValue {
                field: column_id.to_string(),
                reason: "マスタに存在しないカラムです".into(),
            });
        }
        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(Error::RecordNotFound(id))?;
        let before = record.fields.insert(column_id.to_string(), value);
        Ok(before.unwrap_or_default())
    }

    /// レコードを削除（物理削除）
    pub fn delete(&mut self, id: i64) -> Result<MasterRecord> {
        let pos = self
            .records
            .iter()
            .position(|r| r.id == id)
            .ok_or(Error::RecordNotFound(id))?;
        Ok(self.records.remove(pos))
    }
}
