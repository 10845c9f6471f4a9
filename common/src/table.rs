//! 位置指定テーブル
//!
//! 外部ファイルから読み込んだ一時的なデータ。列は名前ではなく位置で参照する。

use crate::error::{Error, Result};
use crate::types::CellValue;
use std::collections::BTreeMap;

/// 列位置 → 値 の1行
pub type SourceRow = BTreeMap<usize, CellValue>;

/// 位置指定で読み込んだテーブル（ヘッダー行は除外済み）
#[derive(Debug, Clone, Default)]
pub struct PositionalTable {
    positions: Vec<usize>,
    width: usize,
    rows: Vec<SourceRow>,
}

impl PositionalTable {
    /// 全セルのグリッドから指定列だけを取り出す
    ///
    /// `width` はシートの列数。設定位置が範囲外なら黙って切り捨てずにエラー。
    pub fn from_grid(grid: &[Vec<CellValue>], width: usize, positions: &[usize]) -> Result<Self> {
        if let Some(&bad) = positions.iter().find(|&&p| p >= width) {
            return Err(Error::SchemaMismatch(format!(
                "設定された列位置 {} がシートの列数 {} を超えています",
                bad, width
            )));
        }

        let rows = grid
            .iter()
            .map(|cells| {
                positions
                    .iter()
                    .map(|&p| (p, cells.get(p).cloned().unwrap_or_default()))
                    .collect()
            })
            .collect();

        Ok(Self {
            positions: positions.to_vec(),
            width,
            rows,
        })
    }

    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn rows(&self) -> &[SourceRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, row: usize, position: usize) -> &CellValue {
        const EMPTY: &CellValue = &CellValue::Empty;
        self.rows
            .get(row)
            .and_then(|r| r.get(&position))
            .unwrap_or(EMPTY)
    }

    /// 指定列がすべて空の行か
    pub fn is_blank_row(row: &SourceRow) -> bool {
        row.values().all(CellValue::is_empty)
    }

    /// 空行を取り除き、(元の行番号, 行) を返す
    pub fn split_blank_rows(self) -> (Vec<(usize, SourceRow)>, Vec<usize>) {
        let mut kept = Vec::new();
        let mut blank = Vec::new();
        for (index, row) in self.rows.into_iter().enumerate() {
            if Self::is_blank_row(&row) {
                blank.push(index);
            } else {
                kept.push((index, row));
            }
        }
        (kept, blank)
    }
}
