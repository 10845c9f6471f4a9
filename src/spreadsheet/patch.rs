//! 列位置ベースのパッチ
//!
//! 読み込み直したシートに対して id で行を特定して適用する。
//! 適用はすべて成功するか、エラーで何も書き込まれないかのどちらか。

use super::reader::SheetGrid;
use crate::error::{Result, RosterError};
use roster_sync_common::schema::SchemaMap;
use roster_sync_common::types::{CellValue, MasterDataset};
use std::collections::{BTreeMap, BTreeSet};

/// パッチ操作
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    /// id の行の指定位置を上書き（行がなければエラー）
    Update { id: i64, cells: BTreeMap<usize, CellValue> },
    /// 新しい行を末尾に追加（id 列を含むこと）
    Append { cells: BTreeMap<usize, CellValue> },
    /// id の行を削除
    Remove { id: i64 },
    /// 指定id以外の行を削除
    RetainIds { ids: BTreeSet<i64> },
    /// 1列をまとめて書き換え（ids はファイル上の行順と一致すること）
    AssignColumn {
        position: usize,
        ids: Vec<i64>,
        values: Vec<CellValue>,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    ops: Vec<PatchOp>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: PatchOp) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[PatchOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// メモリ上のマスタ全体をファイルへ反映するパッチ
    ///
    /// 1. ファイルにあってマスタにない id の行を削除
    /// 2. 既存行はマップされた列を上書き
    /// 3. ファイルにない id は末尾に追加
    pub fn for_dataset(schema: &SchemaMap, dataset: &MasterDataset, on_disk: &BTreeSet<i64>) -> Self {
        let mut patch = Patch::new();
        patch.push(PatchOp::RetainIds { ids: dataset.ids() });
        for record in dataset.records() {
            let cells = schema.to_cells(record);
            if on_disk.contains(&record.id) {
                patch.push(PatchOp::Update { id: record.id, cells });
            } else {
                patch.push(PatchOp::Append { cells });
            }
        }
        patch
    }

    /// シートへ適用する
    pub fn apply(&self, sheet: &mut SheetGrid, id_position: usize) -> Result<()> {
        if sheet.rows.is_empty() {
            return Err(RosterError::SchemaMismatch(format!(
                "シート '{}' にヘッダー行がありません",
                sheet.name
            )));
        }
        let width = sheet.width();
        check_position(id_position, width)?;
        trim_trailing_blank(sheet);

        for op in &self.ops {
            match op {
                PatchOp::Update { id, cells } => {
                    check_cells(cells, width)?;
                    let index = find_row(sheet, id_position, *id).ok_or(RosterError::RecordNotFound(*id))?;
                    let row = &mut sheet.rows[index];
                    for (&position, value) in cells {
                        set_cell(row, position, value.clone());
                    }
                }
                PatchOp::Append { cells } => {
                    check_cells(cells, width)?;
                    let id = cells
                        .get(&id_position)
                        .and_then(CellValue::as_i64)
                        .ok_or_else(|| RosterError::SchemaMismatch("追加行に id がありません".into()))?;
                    if find_row(sheet, id_position, id).is_some() {
                        return Err(RosterError::SchemaMismatch(format!(
                            "id={} は既にファイルに存在します",
                            id
                        )));
                    }
                    let mut row = vec![CellValue::Empty; width];
                    for (&position, value) in cells {
                        set_cell(&mut row, position, value.clone());
                    }
                    sheet.rows.push(row);
                }
                PatchOp::Remove { id } => {
                    let index = find_row(sheet, id_position, *id).ok_or(RosterError::RecordNotFound(*id))?;
                    sheet.rows.remove(index);
                }
                PatchOp::RetainIds { ids } => {
                    let header = sheet.rows.remove(0);
                    sheet
                        .rows
                        .retain(|row| row_id(row, id_position).map_or(true, |id| ids.contains(&id)));
                    sheet.rows.insert(0, header);
                }
                PatchOp::AssignColumn { position, ids, values } => {
                    check_position(*position, width)?;
                    assign_column(sheet, id_position, *position, ids, values)?;
                }
            }
        }
        Ok(())
    }
}

fn check_position(position: usize, width: usize) -> Result<()> {
    if position >= width {
        return Err(RosterError::SchemaMismatch(format!(
            "列位置 {} がシートの列数 {} を超えています",
            position, width
        )));
    }
    Ok(())
}

fn check_cells(cells: &BTreeMap<usize, CellValue>, width: usize) -> Result<()> {
    match cells.keys().next_back() {
        Some(&max) => check_position(max, width),
        None => Ok(()),
    }
}

fn row_id(row: &[CellValue], id_position: usize) -> Option<i64> {
    row.get(id_position).and_then(CellValue::as_i64)
}

fn find_row(sheet: &SheetGrid, id_position: usize, id: i64) -> Option<usize> {
    sheet
        .rows
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, row)| row_id(row, id_position) == Some(id))
        .map(|(index, _)| index)
}

fn set_cell(row: &mut Vec<CellValue>, position: usize, value: CellValue) {
    if row.len() <= position {
        row.resize(position + 1, CellValue::Empty);
    }
    row[position] = value;
}

/// 末尾の空行を取り除く（追加行の前に空行が残らないように）
fn trim_trailing_blank(sheet: &mut SheetGrid) {
    while sheet.rows.len() > 1
        && sheet
            .rows
            .last()
            .map_or(false, |row| row.iter().all(CellValue::is_empty))
    {
        sheet.rows.pop();
    }
}

fn assign_column(
    sheet: &mut SheetGrid,
    id_position: usize,
    position: usize,
    ids: &[i64],
    values: &[CellValue],
) -> Result<()> {
    let indexes: Vec<usize> = (1..sheet.rows.len())
        .filter(|&i| row_id(&sheet.rows[i], id_position).is_some())
        .collect();

    if ids.len() != values.len() || indexes.len() != values.len() {
        return Err(RosterError::SchemaMismatch(format!(
            "行数が一致しません: 更新データ={}, ファイル={}",
            values.len(),
            indexes.len()
        )));
    }

    for (&index, &expected) in indexes.iter().zip(ids) {
        let actual = row_id(&sheet.rows[index], id_position);
        if actual != Some(expected) {
            return Err(RosterError::SchemaMismatch(format!(
                "{}行目の id が一致しません: 更新データ={}, ファイル={:?}",
                index + 1,
                expected,
                actual
            )));
        }
    }

    for (&index, value) in indexes.iter().zip(values) {
        set_cell(&mut sheet.rows[index], position, value.clone());
    }
    Ok(())
}
