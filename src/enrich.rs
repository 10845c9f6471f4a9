//! 登録簿による補完結合
//!
//! 1. マスタの氏名と職員登録簿の氏名（名 + 姓1 + 姓2）を完全一致で結合
//! 2. 職員の所属コードと所属登録簿のキーで結合
//! 3. マスタの空欄だけを埋め、残った空欄は既定値（数値 -1 / 文字 "not found"）
//!
//! 1つのマスタ行に複数の候補が付いた場合は、所属コードが有効なもの・
//! 所属名があるものを優先して1件に絞る。

use crate::config::{EnrichmentSpec, RegistrySpec};
use crate::error::{Result, RosterError};
use crate::registry::{concatenate_name, Registry, RegistryRow, EMPLOYEE_DELIMITER, WORKCENTER_DELIMITER};
use crate::spreadsheet::{Patch, PatchOp};
use crate::sync::{
    coerce_for, AmbiguityNote, FieldChange, MatchOutcome, Preview, StagedChange, SyncJob, SyncReport,
    UnmatchedLocation, UnmatchedRow,
};
use roster_sync_common::resolver::{is_present, is_valid_key, resolve_preferring, UNRESOLVED_KEY};
use roster_sync_common::schema::SchemaMap;
use roster_sync_common::types::{CellValue, FieldKind, MasterDataset, MasterRecord};
use std::collections::{BTreeSet, HashMap};

/// 補完対象の1行
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRow {
    pub master_id: i64,
    pub employee: Option<RegistryRow>,
    pub center: Option<RegistryRow>,
}

pub struct EnrichmentJoin {
    employees: RegistrySpec,
    workcenters: RegistrySpec,
    spec: EnrichmentSpec,
    schema: SchemaMap,
}

impl EnrichmentJoin {
    pub fn new(employees: RegistrySpec, workcenters: RegistrySpec, spec: EnrichmentSpec, schema: SchemaMap) -> Self {
        Self {
            employees,
            workcenters,
            spec,
            schema,
        }
    }

    fn full_name(&self, row: &RegistryRow) -> String {
        concatenate_name(&[
            row.get(&self.spec.first_name),
            row.get(&self.spec.last_name1),
            row.get(&self.spec.last_name2),
        ])
    }

    /// 補完対象の column_id（mapping の target → 既定値のみの列）
    ///
    /// マスタにない列は対象にしない。
    fn targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = Vec::new();
        let all = self
            .spec
            .mapping
            .iter()
            .map(|m| &m.target)
            .chain(&self.spec.numeric_targets)
            .chain(&self.spec.text_targets);
        for target in all {
            if self.schema.position_of(target).is_some() && !targets.contains(target) {
                targets.push(target.clone());
            }
        }
        targets
    }

    fn needs_fill(&self, record: &MasterRecord, targets: &[String]) -> bool {
        targets.iter().any(|t| record.get(t).is_empty())
    }

    /// 結合値が見つからなかったときの既定値
    fn default_for(&self, target: &str) -> Option<CellValue> {
        if self.spec.numeric_targets.iter().any(|t| t == target) {
            Some(CellValue::Int(UNRESOLVED_KEY))
        } else if self.spec.text_targets.iter().any(|t| t == target) {
            Some(CellValue::text(self.spec.not_found_value.clone()))
        } else {
            None
        }
    }

    fn coerce_target(&self, target: &str, value: CellValue) -> CellValue {
        if self.spec.numeric_targets.iter().any(|t| t == target) {
            value.coerce(FieldKind::Number)
        } else {
            coerce_for(&self.schema, target, value)
        }
    }

    fn row_label(&self, row: &RegistryRow, key_column: &str) -> String {
        format!("{}行目 ({}={})", row.line, key_column, row.get(key_column))
    }
}

/// 外部キーの比較（数値として比較できなければ文字列）
fn keys_equal(a: &CellValue, b: &CellValue) -> bool {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x == y,
        _ => {
            let (x, y) = (a.to_string(), b.to_string());
            !x.trim().is_empty() && x.trim() == y.trim()
        }
    }
}

impl SyncJob for EnrichmentJoin {
    type Loaded = (Registry, Registry);
    type Matched = Vec<EnrichedRow>;

    fn name(&self) -> &'static str {
        "enrich"
    }

    fn load(&self) -> Result<(Registry, Registry)> {
        let employees = Registry::load(&self.employees, EMPLOYEE_DELIMITER)?;
        let workcenters = Registry::load(&self.workcenters, WORKCENTER_DELIMITER)?;
        Ok((employees, workcenters))
    }

    fn match_records(
        &self,
        loaded: (Registry, Registry),
        master: &MasterDataset,
        report: &mut SyncReport,
    ) -> Result<MatchOutcome<Vec<EnrichedRow>>> {
        let (employees, workcenters) = loaded;
        let targets = self.targets();

        let pending: Vec<&MasterRecord> = master
            .records()
            .iter()
            .filter(|r| self.needs_fill(r, &targets))
            .collect();
        if pending.is_empty() {
            return Ok(MatchOutcome::NothingToDo("補完が必要な空欄はありません".into()));
        }

        let mut by_name: HashMap<String, Vec<&RegistryRow>> = HashMap::new();
        for row in &employees.rows {
            let name = self.full_name(row);
            if !name.is_empty() {
                by_name.entry(name).or_default().push(row);
            }
        }

        // 段階1: 氏名で職員を結合
        let mut employee_candidates: Vec<(i64, RegistryRow)> = Vec::new();
        for record in &pending {
            let matches = record.name().and_then(|n| by_name.get(n));
            match matches {
                Some(rows) => employee_candidates.extend(rows.iter().map(|&r| (record.id, r.clone()))),
                None => report.unmatched.push(UnmatchedRow {
                    location: UnmatchedLocation::MasterId(record.id),
                    label: record.name().unwrap_or_default().to_string(),
                    reason: "職員登録簿に同じ氏名がありません".into(),
                }),
            }
        }

        let center_column = &self.spec.employee_center;
        let by_employee = resolve_preferring(
            employee_candidates,
            |c| c.0,
            |c| is_valid_key(c.1.get(center_column)),
        );
        for group in &by_employee.ambiguous {
            report.ambiguous.push(AmbiguityNote::from_group("employee", group, |c: &(i64, RegistryRow)| {
                self.row_label(&c.1, center_column)
            }));
        }

        // 段階2: 所属コードで所属を結合
        let mut center_candidates: Vec<(i64, RegistryRow)> = Vec::new();
        for (master_id, employee) in &by_employee.chosen {
            let key = employee.get(center_column);
            if !is_valid_key(key) {
                continue;
            }
            center_candidates.extend(
                workcenters
                    .rows
                    .iter()
                    .filter(|c| keys_equal(c.get(&self.spec.center_key), key))
                    .map(|c| (*master_id, c.clone())),
            );
        }

        let description = &self.spec.center_description;
        let by_center = resolve_preferring(center_candidates, |c| c.0, |c| is_present(c.1.get(description)));
        for group in &by_center.ambiguous {
            report.ambiguous.push(AmbiguityNote::from_group("workcenter", group, |c: &(i64, RegistryRow)| {
                self.row_label(&c.1, &self.spec.center_key)
            }));
        }

        let mut employee_of: HashMap<i64, RegistryRow> = by_employee.chosen.into_iter().collect();
        let mut center_of: HashMap<i64, RegistryRow> = by_center.chosen.into_iter().collect();

        let rows = pending
            .iter()
            .map(|record| EnrichedRow {
                master_id: record.id,
                employee: employee_of.remove(&record.id),
                center: center_of.remove(&record.id),
            })
            .collect();

        tracing::info!(
            pending = pending.len(),
            unmatched = report.unmatched.len(),
            "補完対象を結合しました"
        );
        Ok(MatchOutcome::Proceed(rows))
    }

    fn stage(&self, matched: &Vec<EnrichedRow>, master: &MasterDataset) -> Result<Preview> {
        let mut changes = Vec::new();

        for row in matched {
            let record = master
                .get(row.master_id)
                .ok_or(RosterError::RecordNotFound(row.master_id))?;

            let mut field_changes = Vec::new();
            for target in self.targets() {
                let before = record.get(&target);
                if !before.is_empty() {
                    continue;
                }

                let joined = self
                    .spec
                    .mapping
                    .iter()
                    .filter(|m| m.target == target)
                    .find_map(|m| {
                        [row.employee.as_ref(), row.center.as_ref()]
                            .into_iter()
                            .flatten()
                            .map(|r| r.get(&m.source))
                            .find(|v| !v.is_empty())
                            .cloned()
                    });

                let after = match joined {
                    Some(value) => self.coerce_target(&target, value),
                    None => match self.default_for(&target) {
                        Some(value) => value,
                        None => continue,
                    },
                };
                if &after != before {
                    field_changes.push(FieldChange {
                        column_id: target,
                        before: before.clone(),
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

    /// 補完した列ごとに列全体を書き換える（行数・行順が一致しなければエラー）
    fn build_patch(&self, preview: &Preview, updated: &MasterDataset, schema: &SchemaMap) -> Result<Patch> {
        let mut touched = BTreeSet::new();
        for change in &preview.changes {
            if let StagedChange::Update { changes, .. } = change {
                touched.extend(changes.iter().map(|c| c.column_id.clone()));
            }
        }

        let ids: Vec<i64> = updated.records().iter().map(|r| r.id).collect();
        let mut patch = Patch::new();
        for column_id in touched {
            let position = schema.position_of(&column_id).ok_or_else(|| {
                RosterError::Config(format!("列 '{}' がマスタの columns にありません", column_id))
            })?;
            let values = updated.records().iter().map(|r| r.get(&column_id).clone()).collect();
            patch.push(PatchOp::AssignColumn {
                position,
                ids: ids.clone(),
                values,
            });
        }
        Ok(patch)
    }
}
