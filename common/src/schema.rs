//! スキーママッパー
//!
//! スプレッドシートの列位置（0始まり）と意味的な column_id の対応表。
//! ヘッダー文字列は信用せず、設定の位置だけで列を特定する。

use crate::error::{Error, Result};
use crate::table::{PositionalTable, SourceRow};
use crate::types::{CellValue, FieldKind, MasterDataset, MasterRecord, ID_COLUMN};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// 読み飛ばし列を表す column_id
pub const SKIP_COLUMN: &str = "skip";

/// 1列分の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// 列位置（0始まり）
    pub column: usize,
    /// 意味的なid（`skip` なら読み飛ばし）
    pub column_id: String,
    /// 型（省略時は `ind_` 接頭辞から推定）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FieldKind>,
}

impl ColumnSpec {
    pub fn new(column: usize, column_id: impl Into<String>) -> Self {
        Self {
            column,
            column_id: column_id.into(),
            kind: None,
        }
    }

    pub fn with_kind(mut self, kind: FieldKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn is_skip(&self) -> bool {
        self.column_id == SKIP_COLUMN
    }

    /// 実効的な型
    pub fn effective_kind(&self) -> Option<FieldKind> {
        self.kind.or_else(|| FieldKind::infer(&self.column_id))
    }
}

/// column_id ⇔ 列位置の双方向マップ
#[derive(Debug, Clone, Default)]
pub struct SchemaMap {
    /// skip以外の設定（設定順）
    specs: Vec<ColumnSpec>,
    /// 設定された全位置（skip含む、設定順）
    positions: Vec<usize>,
    forward: HashMap<String, usize>,
    inverse: BTreeMap<usize, String>,
}

impl SchemaMap {
    /// 設定から構築
    ///
    /// - skip以外の column_id は1つの位置にだけ対応する
    /// - 同じ位置を2回設定できない
    pub fn new(specs: &[ColumnSpec]) -> Result<Self> {
        let mut map = SchemaMap::default();

        for spec in specs {
            if map.positions.contains(&spec.column) {
                return Err(Error::Config(format!(
                    "列位置 {} が重複しています",
                    spec.column
                )));
            }
            map.positions.push(spec.column);

            if spec.is_skip() {
                continue;
            }
            if spec.column_id.trim().is_empty() {
                return Err(Error::Config(format!("列位置 {} の column_id が空です", spec.column)));
            }
            if map.forward.contains_key(&spec.column_id) {
                return Err(Error::Config(format!(
                    "column_id '{}' が複数の列に設定されています",
                    spec.column_id
                )));
            }
            map.forward.insert(spec.column_id.clone(), spec.column);
            map.inverse.insert(spec.column, spec.column_id.clone());
            map.specs.push(spec.clone());
        }

        Ok(map)
    }

    /// マスタ用に構築（`id` 列が必須）
    pub fn for_master(specs: &[ColumnSpec]) -> Result<Self> {
        let map = Self::new(specs)?;
        if !map.forward.contains_key(ID_COLUMN) {
            return Err(Error::Config("マスタ設定に 'id' 列がありません".into()));
        }
        Ok(map)
    }

    pub fn position_of(&self, column_id: &str) -> Option<usize> {
        self.forward.get(column_id).copied()
    }

    pub fn column_id_at(&self, position: usize) -> Option<&str> {
        self.inverse.get(&position).map(String::as_str)
    }

    pub fn id_position(&self) -> Result<usize> {
        self.position_of(ID_COLUMN)
            .ok_or_else(|| Error::Config("'id' 列が設定されていません".into()))
    }

    /// skip以外の column_id（設定順）
    pub fn column_ids(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.column_id.clone()).collect()
    }

    /// 読み込む列位置（skip以外、設定順）
    pub fn mapped_positions(&self) -> Vec<usize> {
        self.specs.iter().map(|s| s.column).collect()
    }

    pub fn kind_of(&self, column_id: &str) -> Option<FieldKind> {
        self.specs
            .iter()
            .find(|s| s.column_id == column_id)
            .and_then(ColumnSpec::effective_kind)
    }

    /// 設定された最大の列位置
    pub fn max_position(&self) -> Option<usize> {
        self.positions.iter().copied().max()
    }

    /// 設定位置がシートの列数に収まっているか
    pub fn check_width(&self, width: usize) -> Result<()> {
        match self.max_position() {
            Some(max) if max >= width => Err(Error::SchemaMismatch(format!(
                "設定された列位置 {} がシートの列数 {} を超えています",
                max, width
            ))),
            _ => Ok(()),
        }
    }

    /// 位置指定の1行をマスタレコードへ変換
    ///
    /// 全列が空の行は None（末尾の空行など）。
    pub fn project_row(&self, row: &SourceRow, row_number: usize) -> Result<Option<MasterRecord>> {
        if self.specs.iter().all(|s| row.get(&s.column).map_or(true, CellValue::is_empty)) {
            return Ok(None);
        }

        let id_position = self.id_position()?;
        let id = row
            .get(&id_position)
            .and_then(CellValue::as_i64)
            .ok_or_else(|| {
                Error::SchemaMismatch(format!("{}行目: id が整数ではありません", row_number))
            })?;

        let mut record = MasterRecord::new(id);
        for spec in &self.specs {
            if spec.column_id == ID_COLUMN {
                continue;
            }
            let value = row.get(&spec.column).cloned().unwrap_or_default();
            let value = match spec.effective_kind() {
                Some(kind) => value.coerce(kind),
                None => value,
            };
            record.set(spec.column_id.clone(), value);
        }

        Ok(Some(record))
    }

    /// 位置指定テーブル全体をマスタデータへ変換
    pub fn project(&self, table: &PositionalTable) -> Result<MasterDataset> {
        let mut records = Vec::with_capacity(table.len());
        let mut seen = HashSet::new();
        for (index, row) in table.rows().iter().enumerate() {
            // +2: ヘッダー行 + 1始まり
            if let Some(record) = self.project_row(row, index + 2)? {
                if !seen.insert(record.id) {
                    return Err(Error::SchemaMismatch(format!(
                        "{}行目: id={} が重複しています",
                        index + 2,
                        record.id
                    )));
                }
                records.push(record);
            }
        }
        Ok(MasterDataset::with_records(self.column_ids(), records))
    }

    /// マスタレコードを列位置 → 値へ戻す
    pub fn to_cells(&self, record: &MasterRecord) -> BTreeMap<usize, CellValue> {
        self.specs
            .iter()
            .map(|spec| {
                let value = if spec.column_id == ID_COLUMN {
                    CellValue::Int(record.id)
                } else {
                    record.get(&spec.column_id).clone()
                };
                (spec.column, value)
            })
            .collect()
    }
}
