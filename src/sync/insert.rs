//! 新規レコードの取り込み（id 列で比較）
//!
//! 取り込み元とマスタは同じ列配置。`new = 取り込み元id − マスタid` を追加する。

use super::{
    coerce_for, DiscardedRow, MatchOutcome, Preview, StagedChange, SyncJob, SyncReport, UnmatchedLocation,
    UnmatchedRow,
};
use crate::config::SourceSpec;
use crate::error::Result;
use crate::spreadsheet::load_source;
use roster_sync_common::rules::RuleMode;
use roster_sync_common::schema::SchemaMap;
use roster_sync_common::table::{PositionalTable, SourceRow};
use roster_sync_common::types::{CellValue, MasterDataset, ID_COLUMN};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// 取り込み対象の1行
#[derive(Debug, Clone)]
pub struct NewRow {
    pub row: usize,
    pub id: i64,
    pub cells: SourceRow,
}

pub struct InsertSync {
    path: PathBuf,
    spec: SourceSpec,
    schema: SchemaMap,
}

impl InsertSync {
    pub fn new(path: impl Into<PathBuf>, spec: SourceSpec, schema: SchemaMap) -> Self {
        Self {
            path: path.into(),
            spec,
            schema,
        }
    }

    /// 1行分のマスタフィールドを組み立てる
    ///
    /// 1. マスタで対応付けられた位置の値をそのままコピー
    /// 2. replicate → binary_check を適用（origin 側にも書き込む）
    pub fn build_fields(&self, cells: &SourceRow, master: &MasterDataset) -> BTreeMap<String, CellValue> {
        let mut fields = BTreeMap::new();

        for (&position, value) in cells {
            if let Some(column_id) = self.schema.column_id_at(position) {
                if column_id != ID_COLUMN {
                    fields.insert(
                        column_id.to_string(),
                        coerce_for(&self.schema, column_id, value.clone()),
                    );
                }
            }
        }

        for (position, cell) in self.spec.rules.apply(cells, RuleMode::Mirror) {
            if let Some(column_id) = self.schema.column_id_at(position) {
                if column_id != ID_COLUMN {
                    fields.insert(column_id.to_string(), coerce_for(&self.schema, column_id, cell.value));
                }
            }
        }

        // 未設定の指標は 0
        for column_id in master.indicator_columns() {
            let value = fields.entry(column_id.to_string()).or_insert(CellValue::Int(0));
            if value.is_empty() {
                *value = CellValue::Int(0);
            }
        }
        fields
    }
}

impl SyncJob for InsertSync {
    type Loaded = PositionalTable;
    type Matched = Vec<NewRow>;

    fn name(&self) -> &'static str {
        "sync"
    }

    fn load(&self) -> Result<PositionalTable> {
        load_source(&self.path, &self.spec.sheet_name, &self.spec.columns)
    }

    fn match_records(
        &self,
        loaded: PositionalTable,
        master: &MasterDataset,
        report: &mut SyncReport,
    ) -> Result<MatchOutcome<Vec<NewRow>>> {
        let existing = master.ids();
        let mut seen: HashMap<i64, usize> = HashMap::new();
        let mut new_rows = Vec::new();

        let (rows, blank) = loaded.split_blank_rows();
        report.blank_rows = blank.into_iter().map(|i| i + 2).collect();

        for (index, cells) in rows {
            let row = index + 2;
            let raw_id = cells.get(&self.spec.id).cloned().unwrap_or_default();
            let Some(id) = raw_id.as_i64() else {
                report.unmatched.push(UnmatchedRow {
                    location: UnmatchedLocation::SheetRow(row),
                    label: raw_id.to_string(),
                    reason: "id が整数ではありません".into(),
                });
                continue;
            };

            if let Some(&kept_row) = seen.get(&id) {
                report.deduplicated.push(DiscardedRow {
                    row,
                    key: id.to_string(),
                    kept_row,
                });
                continue;
            }
            seen.insert(id, row);

            if !existing.contains(&id) {
                new_rows.push(NewRow { row, id, cells });
            }
        }

        if new_rows.is_empty() {
            return Ok(MatchOutcome::NothingToDo(
                "新しいレコードはありません（すべてマスタに存在します）".into(),
            ));
        }
        tracing::info!(new = new_rows.len(), "新しいレコードが見つかりました");
        Ok(MatchOutcome::Proceed(new_rows))
    }

    fn stage(&self, matched: &Vec<NewRow>, master: &MasterDataset) -> Result<Preview> {
        let changes = matched
            .iter()
            .map(|new_row| StagedChange::Insert {
                id: new_row.id,
                fields: self.build_fields(&new_row.cells, master),
            })
            .collect();
        Ok(Preview { changes })
    }
}
