//! レコードの手入力操作（追加・更新・削除・一括設定・検索）
//!
//! どの操作も `MasterStore::apply_edit` 経由で1回だけ書き込む。
//! 書き込みに失敗した場合、メモリ上のマスタは変更されない。

use crate::error::{Result, RosterError};
use crate::spreadsheet::{CommitSummary, MasterStore, Patch, PatchOp};
use crate::sync::FieldChange;
use roster_sync_common::matcher::{search, MatchCandidate};
use roster_sync_common::schema::SchemaMap;
use roster_sync_common::types::{CellValue, FieldKind, MasterDataset, MasterRecord, ID_COLUMN};
use std::collections::BTreeMap;

/// 操作結果と書き込み結果
pub type Edited<T> = (T, Option<CommitSummary>);

pub struct RecordEditor<'a> {
    store: &'a MasterStore,
}

impl<'a> RecordEditor<'a> {
    pub fn new(store: &'a MasterStore) -> Self {
        Self { store }
    }

    fn schema(&self) -> &SchemaMap {
        self.store.schema()
    }

    /// オペレータ入力の1値をカラムの型に従ってパース
    pub fn parse_value(&self, column_id: &str, input: &str) -> Result<CellValue> {
        if column_id == ID_COLUMN {
            return Err(RosterError::InvalidValue {
                field: ID_COLUMN.into(),
                reason: "idは指定できません".into(),
            });
        }
        if self.schema().position_of(column_id).is_none() {
            return Err(RosterError::InvalidValue {
                field: column_id.to_string(),
                reason: "マスタに存在しないカラムです".into(),
            });
        }
        let kind = self.schema().kind_of(column_id).unwrap_or(FieldKind::Text);
        Ok(CellValue::parse_as(kind, column_id, input)?)
    }

    /// `column=value` 形式の入力をまとめてパース（1つでも不正なら何もしない）
    pub fn parse_fields(&self, pairs: &[(String, String)]) -> Result<BTreeMap<String, CellValue>> {
        pairs
            .iter()
            .map(|(column, input)| Ok((column.clone(), self.parse_value(column, input)?)))
            .collect()
    }

    /// 新規レコードを追加して id を返す
    pub fn add_record(&self, dataset: &mut MasterDataset, fields: BTreeMap<String, CellValue>) -> Result<Edited<i64>> {
        let schema = self.schema();
        let result = self.store.apply_edit(dataset, |working| {
            let id = working.insert(fields)?;
            let record = working.get(id).ok_or(RosterError::RecordNotFound(id))?;
            let mut patch = Patch::new();
            patch.push(PatchOp::Append {
                cells: schema.to_cells(record),
            });
            Ok((id, patch))
        })?;
        tracing::info!(id = result.0, "レコードを追加しました");
        Ok(result)
    }

    /// 指定フィールドを更新し、変更内容を返す
    pub fn update_record(
        &self,
        dataset: &mut MasterDataset,
        id: i64,
        fields: BTreeMap<String, CellValue>,
    ) -> Result<Edited<Vec<FieldChange>>> {
        if dataset.get(id).is_none() {
            return Err(RosterError::RecordNotFound(id));
        }
        let schema = self.schema();
        self.store.apply_edit(dataset, |working| {
            let mut changes = Vec::new();
            for (column_id, value) in fields {
                let before = working.update(id, &column_id, value.clone())?;
                if before != value {
                    changes.push(FieldChange {
                        column_id,
                        before,
                        after: value,
                    });
                }
            }

            let mut patch = Patch::new();
            if !changes.is_empty() {
                let record = working.get(id).ok_or(RosterError::RecordNotFound(id))?;
                patch.push(PatchOp::Update {
                    id,
                    cells: schema.to_cells(record),
                });
            }
            Ok((changes, patch))
        })
    }

    /// レコードを削除（物理削除）
    pub fn delete_record(&self, dataset: &mut MasterDataset, id: i64) -> Result<Edited<MasterRecord>> {
        let result = self.store.apply_edit(dataset, |working| {
            let removed = working.delete(id)?;
            let mut patch = Patch::new();
            patch.push(PatchOp::Remove { id });
            Ok((removed, patch))
        })?;
        tracing::info!(id, "レコードを削除しました");
        Ok(result)
    }

    /// 複数レコードの1カラムに同じ値を設定
    ///
    /// # Arguments
    /// * `ids` - 対象のid（存在しないidがあれば何もせずエラー）
    /// * `column_id` - 対象カラム
    /// * `value` - 設定する値
    pub fn bulk_set(
        &self,
        dataset: &mut MasterDataset,
        ids: &[i64],
        column_id: &str,
        value: CellValue,
    ) -> Result<Edited<usize>> {
        if let Some(&missing) = ids.iter().find(|&&id| dataset.get(id).is_none()) {
            return Err(RosterError::RecordNotFound(missing));
        }
        let position = self.schema().position_of(column_id).ok_or_else(|| RosterError::InvalidValue {
            field: column_id.to_string(),
            reason: "マスタに存在しないカラムです".into(),
        })?;

        let result = self.store.apply_edit(dataset, |working| {
            let mut patch = Patch::new();
            for &id in ids {
                let before = working.update(id, column_id, value.clone())?;
                if before != value {
                    let mut cells = BTreeMap::new();
                    cells.insert(position, value.clone());
                    patch.push(PatchOp::Update { id, cells });
                }
            }
            Ok((patch.len(), patch))
        })?;
        tracing::info!(column = column_id, updated = result.0, "一括更新しました");
        Ok(result)
    }
}

/// 氏名の部分一致検索（スコア降順）
pub fn search_names(dataset: &MasterDataset, query: &str, threshold: u8) -> Vec<MatchCandidate> {
    search(query, &dataset.names(), threshold)
}
