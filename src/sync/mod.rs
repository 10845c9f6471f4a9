//! 同期オーケストレータ
//!
//! 状態遷移: Idle → Loaded → Matched → Previewed → Applied | Cancelled
//!
//! 取り込み元ごとの処理は `SyncJob` として実装し、`SyncSession` が状態を管理する。
//! 確定（confirm）まではマスタもファイルも変更しない。

pub mod insert;
pub mod phase_two;

pub use insert::InsertSync;
pub use phase_two::PhaseTwoSync;

use crate::error::{Result, RosterError};
use crate::spreadsheet::{CommitSummary, MasterStore, Patch, PatchOp};
use roster_sync_common::resolver::AmbiguousGroup;
use roster_sync_common::schema::SchemaMap;
use roster_sync_common::types::{CellValue, MasterDataset};
use std::collections::BTreeMap;
use std::fmt;

/// セッションの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Loaded,
    Matched,
    Previewed,
    Applied,
    Cancelled,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SyncState::Idle => "IDLE",
            SyncState::Loaded => "LOADED",
            SyncState::Matched => "MATCHED",
            SyncState::Previewed => "PREVIEWED",
            SyncState::Applied => "APPLIED",
            SyncState::Cancelled => "CANCELLED",
        };
        write!(f, "{}", label)
    }
}

/// 1フィールドの変更（前後の値）
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub column_id: String,
    pub before: CellValue,
    pub after: CellValue,
}

/// 確定待ちの変更
#[derive(Debug, Clone, PartialEq)]
pub enum StagedChange {
    Insert {
        id: i64,
        fields: BTreeMap<String, CellValue>,
    },
    Update {
        id: i64,
        name: Option<String>,
        changes: Vec<FieldChange>,
    },
}

impl StagedChange {
    pub fn id(&self) -> i64 {
        match self {
            StagedChange::Insert { id, .. } | StagedChange::Update { id, .. } => *id,
        }
    }
}

/// 照合できなかった行の位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmatchedLocation {
    /// 取り込み元シートの行番号（1始まり、ヘッダー込み）
    SheetRow(usize),
    /// マスタのid（補完結合）
    MasterId(i64),
}

impl fmt::Display for UnmatchedLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnmatchedLocation::SheetRow(row) => write!(f, "{}行目", row),
            UnmatchedLocation::MasterId(id) => write!(f, "id={}", id),
        }
    }
}

/// 照合できなかった行
#[derive(Debug, Clone, PartialEq)]
pub struct UnmatchedRow {
    pub location: UnmatchedLocation,
    pub label: String,
    pub reason: String,
}

/// 取り込み時に捨てた重複行
#[derive(Debug, Clone, PartialEq)]
pub struct DiscardedRow {
    pub row: usize,
    pub key: String,
    pub kept_row: usize,
}

/// 複数候補があったマスタid
#[derive(Debug, Clone, PartialEq)]
pub struct AmbiguityNote {
    pub stage: String,
    pub target_id: i64,
    pub kept: String,
    pub discarded: Vec<String>,
    /// 優先条件を満たす候補がなく先頭を採用した
    pub fallback: bool,
}

impl AmbiguityNote {
    pub fn from_group<T, L>(stage: &str, group: &AmbiguousGroup<T>, label: L) -> Self
    where
        L: Fn(&T) -> String,
    {
        Self {
            stage: stage.to_string(),
            target_id: group.target_id,
            kept: label(&group.kept),
            discarded: group.discarded.iter().map(&label).collect(),
            fallback: group.fallback,
        }
    }
}

/// 確定前にオペレータへ見せる報告
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub unmatched: Vec<UnmatchedRow>,
    pub blank_rows: Vec<usize>,
    pub deduplicated: Vec<DiscardedRow>,
    pub ambiguous: Vec<AmbiguityNote>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.unmatched.is_empty()
            && self.blank_rows.is_empty()
            && self.deduplicated.is_empty()
            && self.ambiguous.is_empty()
    }
}

/// 確定待ちの差分
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Preview {
    pub changes: Vec<StagedChange>,
}

impl Preview {
    pub fn inserts(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| matches!(c, StagedChange::Insert { .. }))
            .count()
    }

    pub fn updates(&self) -> usize {
        self.changes.len() - self.inserts()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// 照合の結果
#[derive(Debug)]
pub enum MatchOutcome<M> {
    Proceed(M),
    /// 反映するものがない（正常終了）
    NothingToDo(String),
}

/// 取り込み元ごとの処理
pub trait SyncJob {
    /// 読み込んだ取り込み元
    type Loaded;
    /// 照合済みのデータ
    type Matched;

    fn name(&self) -> &'static str;

    /// 取り込み元を読み込む
    fn load(&self) -> Result<Self::Loaded>;

    /// マスタと照合する（照合できなかった行などは report へ）
    fn match_records(
        &self,
        loaded: Self::Loaded,
        master: &MasterDataset,
        report: &mut SyncReport,
    ) -> Result<MatchOutcome<Self::Matched>>;

    /// 変更差分を組み立てる（ルール適用済み）
    fn stage(&self, matched: &Self::Matched, master: &MasterDataset) -> Result<Preview>;

    /// 確定時のパッチ（既定は行単位の追加・更新）
    ///
    /// `updated` は差分をすべて反映した後のマスタ。
    fn build_patch(&self, preview: &Preview, updated: &MasterDataset, schema: &SchemaMap) -> Result<Patch> {
        row_patch(preview, updated, schema)
    }
}

/// 差分を行単位のパッチに変換
pub fn row_patch(preview: &Preview, updated: &MasterDataset, schema: &SchemaMap) -> Result<Patch> {
    let mut patch = Patch::new();
    for change in &preview.changes {
        let record = updated
            .get(change.id())
            .ok_or(RosterError::RecordNotFound(change.id()))?;
        let cells = schema.to_cells(record);
        match change {
            StagedChange::Insert { .. } => patch.push(PatchOp::Append { cells }),
            StagedChange::Update { id, .. } => patch.push(PatchOp::Update { id: *id, cells }),
        }
    }
    Ok(patch)
}

/// 差分をマスタへ反映
fn apply_changes(preview: &Preview, master: &mut MasterDataset) -> Result<()> {
    for change in &preview.changes {
        match change {
            StagedChange::Insert { id, fields } => {
                master.insert_with_id(*id, fields.clone())?;
            }
            StagedChange::Update { id, changes, .. } => {
                for change in changes {
                    master.update(*id, &change.column_id, change.after.clone())?;
                }
            }
        }
    }
    Ok(())
}

/// 確定結果
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub commit: Option<CommitSummary>,
}

/// 1回の同期操作
pub struct SyncSession<'a, J: SyncJob> {
    job: J,
    store: &'a MasterStore,
    state: SyncState,
    loaded: Option<J::Loaded>,
    matched: Option<J::Matched>,
    preview: Option<Preview>,
    report: SyncReport,
}

impl<'a, J: SyncJob> SyncSession<'a, J> {
    pub fn new(job: J, store: &'a MasterStore) -> Self {
        Self {
            job,
            store,
            state: SyncState::Idle,
            loaded: None,
            matched: None,
            preview: None,
            report: SyncReport::default(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn job(&self) -> &J {
        &self.job
    }

    pub fn report(&self) -> &SyncReport {
        &self.report
    }

    pub fn preview(&self) -> Option<&Preview> {
        self.preview.as_ref()
    }

    fn expect_state(&self, expected: SyncState, action: &str) -> Result<()> {
        if self.state != expected {
            return Err(RosterError::InvalidTransition {
                state: self.state.to_string(),
                action: action.to_string(),
            });
        }
        Ok(())
    }

    /// IDLE → LOADED（失敗したら IDLE のまま）
    pub fn load(&mut self) -> Result<()> {
        self.expect_state(SyncState::Idle, "load")?;
        let loaded = self.job.load()?;
        self.loaded = Some(loaded);
        self.report = SyncReport::default();
        self.state = SyncState::Loaded;
        tracing::info!(job = self.job.name(), "取り込み元を読み込みました");
        Ok(())
    }

    /// LOADED → MATCHED
    ///
    /// 反映するものがなければ IDLE に戻り、メッセージを返す。
    pub fn match_records(&mut self, master: &MasterDataset) -> Result<Option<String>> {
        self.expect_state(SyncState::Loaded, "match")?;
        let loaded = self
            .loaded
            .take()
            .ok_or_else(|| RosterError::InvalidTransition {
                state: self.state.to_string(),
                action: "match".into(),
            })?;

        let mut report = SyncReport::default();
        let outcome = self.job.match_records(loaded, master, &mut report);
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                // 読み込み結果は消費済みなので IDLE からやり直す
                self.state = SyncState::Idle;
                return Err(e);
            }
        };
        self.report = report;

        for row in &self.report.unmatched {
            tracing::warn!(job = self.job.name(), location = %row.location, label = %row.label, "照合できませんでした: {}", row.reason);
        }

        match outcome {
            MatchOutcome::Proceed(matched) => {
                self.matched = Some(matched);
                self.state = SyncState::Matched;
                Ok(None)
            }
            MatchOutcome::NothingToDo(message) => {
                tracing::info!(job = self.job.name(), "{}", message);
                self.state = SyncState::Idle;
                Ok(Some(message))
            }
        }
    }

    /// MATCHED → PREVIEWED
    pub fn stage(&mut self, master: &MasterDataset) -> Result<&Preview> {
        self.expect_state(SyncState::Matched, "preview")?;
        let matched = self.matched.as_ref().ok_or_else(|| RosterError::InvalidTransition {
            state: self.state.to_string(),
            action: "preview".into(),
        })?;
        let preview = self.job.stage(matched, master)?;
        tracing::info!(
            job = self.job.name(),
            inserts = preview.inserts(),
            updates = preview.updates(),
            "差分を作成しました"
        );
        self.state = SyncState::Previewed;
        Ok(self.preview.insert(preview))
    }

    /// PREVIEWED → APPLIED
    ///
    /// マスタの複製に反映してファイルへ1回だけ書き込み、成功したら差し替える。
    /// 書き込みに失敗した場合はマスタもファイルも変わらず PREVIEWED のまま。
    pub fn confirm(&mut self, master: &mut MasterDataset) -> Result<ApplyOutcome> {
        self.expect_state(SyncState::Previewed, "confirm")?;
        let preview = self.preview.as_ref().ok_or_else(|| RosterError::InvalidTransition {
            state: self.state.to_string(),
            action: "confirm".into(),
        })?;

        let job = &self.job;
        let schema = self.store.schema();
        let ((), commit) = self.store.apply_edit(master, |working| {
            apply_changes(preview, working)?;
            let patch = job.build_patch(preview, working, schema)?;
            Ok(((), patch))
        })?;

        let outcome = ApplyOutcome {
            inserted: preview.inserts(),
            updated: preview.updates(),
            commit,
        };
        self.matched = None;
        self.preview = None;
        self.state = SyncState::Applied;
        tracing::info!(
            job = self.job.name(),
            inserted = outcome.inserted,
            updated = outcome.updated,
            "同期を確定しました"
        );
        Ok(outcome)
    }

    /// 確定せずに破棄（LOADED / MATCHED / PREVIEWED から）
    pub fn cancel(&mut self) -> Result<()> {
        match self.state {
            SyncState::Loaded | SyncState::Matched | SyncState::Previewed => {
                self.loaded = None;
                self.matched = None;
                self.preview = None;
                self.state = SyncState::Cancelled;
                tracing::info!(job = self.job.name(), "同期を取り消しました");
                Ok(())
            }
            _ => Err(RosterError::InvalidTransition {
                state: self.state.to_string(),
                action: "cancel".into(),
            }),
        }
    }
}

/// 型に合わせて値を変換
pub(crate) fn coerce_for(schema: &SchemaMap, column_id: &str, value: CellValue) -> CellValue {
    match schema.kind_of(column_id) {
        Some(kind) => value.coerce(kind),
        None => value,
    }
}
