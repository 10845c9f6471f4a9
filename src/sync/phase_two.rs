//! 第2段階の同期（氏名のあいまい照合）
//!
//! 取り込み元はマスタと別の列配置。氏名でマスタの既存レコードを探し、
//! ルールの destination 位置だけを更新する。新規追加はしない。

use super::{
    coerce_for, AmbiguityNote, DiscardedRow, FieldChange, MatchOutcome, Preview, StagedChange, SyncJob,
    SyncReport, UnmatchedLocation, UnmatchedRow,
};
use crate::config::SourceSpec;
use crate::error::{Result, RosterError};
use crate::spreadsheet::load_source;
use roster_sync_common::matcher::{best_match, MatchCandidate, MATCH_THRESHOLD};
use roster_sync_common::resolver::resolve_highest;
use roster_sync_common::rules::RuleMode;
use roster_sync_common::schema::SchemaMap;
use roster_sync_common::table::{PositionalTable, SourceRow};
use roster_sync_common::types::{MasterDataset, ID_COLUMN};
use std::collections::HashMap;
use std::path::PathBuf;

/// 照合できた取り込み行
#[derive(Debug, Clone)]
pub struct MatchedRow {
    pub row: usize,
    pub source_id: Option<i64>,
    pub name: String,
    pub candidate: MatchCandidate,
    pub cells: SourceRow,
}

pub struct PhaseTwoSync {
    path: PathBuf,
    spec: SourceSpec,
    schema: SchemaMap,
    threshold: u8,
}

impl PhaseTwoSync {
    pub fn new(path: impl Into<PathBuf>, spec: SourceSpec, schema: SchemaMap) -> Self {
        Self {
            path: path.into(),
            spec,
            schema,
            threshold: MATCH_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    /// 同じ氏名の行は id が最大のものだけ残す
    fn deduplicate(
        &self,
        rows: Vec<(usize, SourceRow)>,
        report: &mut SyncReport,
    ) -> Vec<(usize, Option<i64>, String, SourceRow)> {
        let mut kept: Vec<(usize, Option<i64>, String, SourceRow)> = Vec::new();
        let mut by_name: HashMap<String, usize> = HashMap::new();

        for (index, cells) in rows {
            let row = index + 2;
            let name = cells
                .get(&self.spec.name)
                .map(|v| v.to_string().trim().to_string())
                .unwrap_or_default();
            if name.is_empty() {
                report.unmatched.push(UnmatchedRow {
                    location: UnmatchedLocation::SheetRow(row),
                    label: String::new(),
                    reason: "氏名が空です".into(),
                });
                continue;
            }
            let source_id = cells.get(&self.spec.id).and_then(|v| v.as_i64());

            match by_name.get(&name) {
                Some(&slot) => {
                    let current = &mut kept[slot];
                    // id のない行は最も小さいものとして扱う
                    if source_id > current.1 {
                        report.deduplicated.push(DiscardedRow {
                            row: current.0,
                            key: name.clone(),
                            kept_row: row,
                        });
                        *current = (row, source_id, name, cells);
                    } else {
                        report.deduplicated.push(DiscardedRow {
                            row,
                            key: name,
                            kept_row: current.0,
                        });
                    }
                }
                None => {
                    by_name.insert(name.clone(), kept.len());
                    kept.push((row, source_id, name, cells));
                }
            }
        }
        kept
    }
}

impl SyncJob for PhaseTwoSync {
    type Loaded = PositionalTable;
    type Matched = Vec<MatchedRow>;

    fn name(&self) -> &'static str {
        "phase-two"
    }

    fn load(&self) -> Result<PositionalTable> {
        load_source(&self.path, &self.spec.sheet_name, &self.spec.columns)
    }

    fn match_records(
        &self,
        loaded: PositionalTable,
        master: &MasterDataset,
        report: &mut SyncReport,
    ) -> Result<MatchOutcome<Vec<MatchedRow>>> {
        let (rows, blank) = loaded.split_blank_rows();
        report.blank_rows = blank.into_iter().map(|i| i + 2).collect();
        for row in &report.blank_rows {
            tracing::warn!(row, "取り込み元の行がすべて空です");
        }

        let names = master.names();
        let mut candidates = Vec::new();

        for (row, source_id, name, cells) in self.deduplicate(rows, report) {
            let key = source_id.unwrap_or(row as i64);
            match best_match(key, &name, &names, self.threshold) {
                Some(candidate) => {
                    tracing::debug!(row, name = %name, master = %candidate.master_name, score = candidate.score, "照合しました");
                    candidates.push(MatchedRow {
                        row,
                        source_id,
                        name,
                        candidate,
                        cells,
                    });
                }
                None => report.unmatched.push(UnmatchedRow {
                    location: UnmatchedLocation::SheetRow(row),
                    label: name,
                    reason: format!("スコア {} 以上の氏名がマスタにありません", self.threshold),
                }),
            }
        }

        let resolution = resolve_highest(candidates, |m| m.candidate.master_id, |m| m.candidate.score);
        for group in &resolution.ambiguous {
            report.ambiguous.push(AmbiguityNote::from_group("phase_two", group, |m: &MatchedRow| {
                format!("{}行目 {} ({})", m.row, m.name, m.candidate.score)
            }));
        }

        if resolution.chosen.is_empty() {
            return Ok(MatchOutcome::NothingToDo(
                "マスタと照合できた行がありません".into(),
            ));
        }
        Ok(MatchOutcome::Proceed(resolution.chosen))
    }

    fn stage(&self, matched: &Vec<MatchedRow>, master: &MasterDataset) -> Result<Preview> {
        let mut changes = Vec::new();

        for m in matched {
            let record = master
                .get(m.candidate.master_id)
                .ok_or(RosterError::RecordNotFound(m.candidate.master_id))?;

            let mut field_changes = Vec::new();
            for (position, cell) in self.spec.rules.apply(&m.cells, RuleMode::DestinationOnly) {
                let column_id = match cell.column_id.as_deref().or_else(|| self.schema.column_id_at(position)) {
                    Some(id) if id != ID_COLUMN => id.to_string(),
                    _ => continue,
                };
                let after = coerce_for(&self.schema, &column_id, cell.value);
                let before = record.get(&column_id).clone();
                if before != after {
                    field_changes.push(FieldChange {
                        column_id,
                        before,
                        after,
                    });
                }
            }

            if !field_changes.is_empty() {
                changes.push(StagedChange::Update {
                    id: record.id,
                    name: record.name().map(str::to_string),
                    changes: field_changes,
                });
            }
        }

        Ok(Preview { changes })
    }
}
