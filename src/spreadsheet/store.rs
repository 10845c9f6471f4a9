//! マスタファイルの読み書き
//!
//! 書き込みは必ず「ファイル全体を読み直す → パッチ適用 → 同じディレクトリの
//! 一時ファイルへ書き出す → rename で置き換え」の順。対象パスへ直接書かない。

use super::patch::Patch;
use super::reader::{fingerprint, read_workbook};
use super::writer::render_workbook;
use crate::config::Config;
use crate::error::{Result, RosterError};
use roster_sync_common::schema::SchemaMap;
use roster_sync_common::table::PositionalTable;
use roster_sync_common::types::{CellValue, MasterDataset};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// 書き込み結果
#[derive(Debug, Clone, PartialEq)]
pub struct CommitSummary {
    /// 書き込み後のファイル指紋
    pub fingerprint: String,
    /// 読み込み時からファイルが変更されていた
    pub disk_changed: bool,
    /// 適用したパッチ操作の数
    pub operations: usize,
}

/// マスタのスプレッドシート
#[derive(Debug, Clone)]
pub struct MasterStore {
    path: PathBuf,
    sheet_name: String,
    schema: SchemaMap,
}

impl MasterStore {
    pub fn new(path: impl Into<PathBuf>, sheet_name: impl Into<String>, schema: SchemaMap) -> Self {
        Self {
            path: path.into(),
            sheet_name: sheet_name.into(),
            schema,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            config.excel_path.clone(),
            config.sheet_name(),
            config.master_schema()?,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &SchemaMap {
        &self.schema
    }

    /// マスタを読み込む
    pub fn load_dataset(&self) -> Result<MasterDataset> {
        let snapshot = read_workbook(&self.path)?;
        let sheet = snapshot.sheet(&self.sheet_name)?;
        let width = sheet.width();
        self.schema.check_width(width)?;

        let table = PositionalTable::from_grid(sheet.data_rows(), width, &self.schema.mapped_positions())?;
        let mut dataset = self.schema.project(&table)?;
        dataset.set_fingerprint(Some(snapshot.fingerprint));

        tracing::info!(
            path = %self.path.display(),
            records = dataset.len(),
            "マスタを読み込みました"
        );
        Ok(dataset)
    }

    /// パッチを適用したブックを一時ファイルへ書き出す（まだ置き換えない）
    ///
    /// # Arguments
    /// * `patch` - 適用するパッチ
    /// * `expected_fingerprint` - セッションが読み込んだ時点の指紋
    pub fn stage(&self, patch: &Patch, expected_fingerprint: Option<&str>) -> Result<StagedCommit> {
        let mut snapshot = read_workbook(&self.path)?;
        let disk_changed = expected_fingerprint.map_or(false, |fp| fp != snapshot.fingerprint);
        if disk_changed {
            tracing::warn!(
                path = %self.path.display(),
                "読み込み後にファイルが変更されています（上書きします）"
            );
        }

        let id_position = self.schema.id_position()?;
        let sheet = snapshot.sheet_mut(&self.sheet_name)?;
        patch.apply(sheet, id_position)?;

        let bytes = render_workbook(&snapshot.sheets)?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut temp = tempfile::Builder::new()
            .prefix(".roster-sync-")
            .suffix(".xlsx")
            .tempfile_in(&dir)
            .map_err(|e| RosterError::Persistence(format!("一時ファイルを作成できません: {}", e)))?;
        temp.write_all(&bytes)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| RosterError::Persistence(format!("一時ファイルへの書き込みに失敗: {}", e)))?;

        tracing::debug!(temp = %temp.path().display(), bytes = bytes.len(), "一時ファイルへ書き出しました");

        Ok(StagedCommit {
            temp,
            target: self.path.clone(),
            summary: CommitSummary {
                fingerprint: fingerprint(&bytes),
                disk_changed,
                operations: patch.len(),
            },
        })
    }

    /// パッチを適用してファイルを置き換える
    pub fn commit(&self, patch: &Patch, expected_fingerprint: Option<&str>) -> Result<CommitSummary> {
        self.stage(patch, expected_fingerprint)?.finish()
    }

    /// マスタの複製に変更を加えて書き込み、成功したときだけ差し替える
    ///
    /// 書き込みに失敗した場合 `dataset` は変更されない。パッチが空なら書き込まない。
    pub fn apply_edit<T, F>(&self, dataset: &mut MasterDataset, edit: F) -> Result<(T, Option<CommitSummary>)>
    where
        F: FnOnce(&mut MasterDataset) -> Result<(T, Patch)>,
    {
        let mut working = dataset.clone();
        let (value, patch) = edit(&mut working)?;
        if patch.is_empty() {
            return Ok((value, None));
        }

        let summary = self.commit(&patch, dataset.fingerprint())?;
        working.set_fingerprint(Some(summary.fingerprint.clone()));
        *dataset = working;
        Ok((value, Some(summary)))
    }

    /// メモリ上のマスタ全体をファイルへ反映する
    pub fn write_dataset(&self, dataset: &MasterDataset) -> Result<CommitSummary> {
        let on_disk = self.disk_ids()?;
        let patch = Patch::for_dataset(&self.schema, dataset, &on_disk);
        self.commit(&patch, dataset.fingerprint())
    }

    /// ファイル上の id 一覧
    pub fn disk_ids(&self) -> Result<BTreeSet<i64>> {
        let snapshot = read_workbook(&self.path)?;
        let sheet = snapshot.sheet(&self.sheet_name)?;
        let id_position = self.schema.id_position()?;
        Ok(sheet
            .data_rows()
            .iter()
            .filter_map(|row| row.get(id_position).and_then(CellValue::as_i64))
            .collect())
    }
}

/// 一時ファイルに書き出し済みで、置き換え前の状態
///
/// `finish` せずに破棄すると一時ファイルは削除され、対象ファイルは変わらない。
#[derive(Debug)]
pub struct StagedCommit {
    temp: NamedTempFile,
    target: PathBuf,
    summary: CommitSummary,
}

impl StagedCommit {
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    pub fn summary(&self) -> &CommitSummary {
        &self.summary
    }

    /// rename で対象ファイルを置き換える
    pub fn finish(self) -> Result<CommitSummary> {
        let StagedCommit {
            temp,
            target,
            summary,
        } = self;
        temp.persist(&target).map_err(|e| {
            RosterError::Persistence(format!("{} を置き換えられません: {}", target.display(), e.error))
        })?;
        tracing::info!(path = %target.display(), operations = summary.operations, "マスタを書き込みました");
        Ok(summary)
    }
}
