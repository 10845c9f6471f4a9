//! 同期セッションの統合テスト
//!
//! 実ファイル（xlsx）を使って 読み込み → 照合 → 差分 → 確定 の流れを検証

use roster_sync::config::SourceSpec;
use roster_sync::error::RosterError;
use roster_sync::spreadsheet::{read_workbook, render_workbook, MasterStore, SheetGrid};
use roster_sync::sync::{InsertSync, PhaseTwoSync, StagedChange, SyncSession, SyncState};
use roster_sync_common::rules::{BinaryCheckRule, ReplicateRule, RuleSet};
use roster_sync_common::schema::{ColumnSpec, SchemaMap};
use roster_sync_common::types::CellValue;
use rust_xlsxwriter::Workbook;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const HEADER: [&str; 5] = ["id", "name", "txt_answer", "txt_answer_copy", "ind_select"];

fn schema() -> SchemaMap {
    let specs: Vec<ColumnSpec> = HEADER
        .iter()
        .enumerate()
        .map(|(i, id)| ColumnSpec::new(i, *id))
        .collect();
    SchemaMap::for_master(&specs).expect("schema")
}

fn header_row() -> Vec<CellValue> {
    HEADER.iter().map(|h| CellValue::text(*h)).collect()
}

fn person(id: i64, name: &str) -> Vec<CellValue> {
    vec![
        CellValue::Int(id),
        CellValue::text(name),
        CellValue::Empty,
        CellValue::Empty,
        CellValue::Int(0),
    ]
}

fn write_sheet(path: &Path, name: &str, rows: Vec<Vec<CellValue>>) {
    let bytes = render_workbook(&[SheetGrid::new(name, rows)]).expect("render");
    std::fs::write(path, bytes).expect("write fixture");
}

fn write_master(dir: &Path, people: &[(i64, &str)]) -> PathBuf {
    let path = dir.join("master.xlsx");
    let mut rows = vec![header_row()];
    rows.extend(people.iter().map(|&(id, name)| person(id, name)));
    write_sheet(&path, "Roster", rows);
    path
}

fn insert_spec() -> SourceSpec {
    SourceSpec {
        sheet_name: "Sheet1".into(),
        columns: vec![0, 1, 2],
        id: 0,
        name: 1,
        rules: RuleSet {
            replicate: vec![ReplicateRule {
                origin: 2,
                destination: 3,
                column_id: Some("txt_answer_copy".into()),
            }],
            missing_fields: [2].into_iter().collect(),
            missing_field_value: "none provided".into(),
            ..RuleSet::default()
        },
    }
}

fn write_insert_source(dir: &Path, ids: &[i64]) -> PathBuf {
    let path = dir.join("source.xlsx");
    let mut rows = vec![header_row()];
    for &id in ids {
        let mut row = person(id, &format!("Persona {}", id));
        row[2] = if id % 2 == 0 { CellValue::text("respuesta") } else { CellValue::Empty };
        rows.push(row);
    }
    write_sheet(&path, "Sheet1", rows);
    path
}

#[test]
fn test_insert_sync_adds_only_new_ids() {
    let dir = tempdir().expect("Failed to create temp dir");
    let master_path = write_master(dir.path(), &[(1, "Ana"), (2, "Luis"), (3, "Marta")]);
    let source_path = write_insert_source(dir.path(), &[2, 3, 4, 5]);

    let store = MasterStore::new(&master_path, "Roster", schema());
    let mut master = store.load_dataset().expect("load master");
    let mut session = SyncSession::new(InsertSync::new(&source_path, insert_spec(), schema()), &store);

    session.load().expect("load source");
    assert_eq!(session.state(), SyncState::Loaded);
    assert_eq!(session.match_records(&master).expect("match"), None);
    assert_eq!(session.state(), SyncState::Matched);

    let preview = session.stage(&master).expect("stage").clone();
    let ids: Vec<i64> = preview.changes.iter().map(StagedChange::id).collect();
    assert_eq!(ids, vec![4, 5]);
    // 確定前はファイルもマスタも変わらない
    assert_eq!(master.len(), 3);
    assert_eq!(store.load_dataset().expect("reload").len(), 3);

    let outcome = session.confirm(&mut master).expect("confirm");
    assert_eq!(outcome.inserted, 2);
    assert_eq!(session.state(), SyncState::Applied);

    let reloaded = store.load_dataset().expect("reload");
    assert_eq!(reloaded.ids(), (1..=5).collect::<BTreeSet<i64>>());
    assert_eq!(master.ids(), reloaded.ids());

    let four = reloaded.get(4).expect("4");
    assert_eq!(four.get("txt_answer"), &CellValue::text("respuesta"));
    assert_eq!(four.get("txt_answer_copy"), &CellValue::text("respuesta"));
    let five = reloaded.get(5).expect("5");
    assert_eq!(five.get("txt_answer"), &CellValue::text("none provided"));
    assert_eq!(five.get("txt_answer_copy"), &CellValue::text("none provided"));
    assert_eq!(five.get("ind_select"), &CellValue::Int(0));
}

#[test]
fn test_nothing_to_do_returns_to_idle() {
    let dir = tempdir().expect("Failed to create temp dir");
    let master_path = write_master(dir.path(), &[(1, "Ana"), (2, "Luis")]);
    let source_path = write_insert_source(dir.path(), &[1, 2]);
    let store = MasterStore::new(&master_path, "Roster", schema());
    let master = store.load_dataset().expect("load master");

    let mut session = SyncSession::new(InsertSync::new(&source_path, insert_spec(), schema()), &store);
    session.load().expect("load source");
    let message = session.match_records(&master).expect("match");
    assert!(message.is_some());
    assert_eq!(session.state(), SyncState::Idle);
    assert!(session.preview().is_none());
}

#[test]
fn test_invalid_transitions() {
    let dir = tempdir().expect("Failed to create temp dir");
    let master_path = write_master(dir.path(), &[(1, "Ana")]);
    let source_path = write_insert_source(dir.path(), &[1, 2]);
    let store = MasterStore::new(&master_path, "Roster", schema());
    let mut master = store.load_dataset().expect("load master");
    let mut session = SyncSession::new(InsertSync::new(&source_path, insert_spec(), schema()), &store);

    assert!(matches!(
        session.confirm(&mut master),
        Err(RosterError::InvalidTransition { .. })
    ));
    assert!(matches!(session.stage(&master), Err(RosterError::InvalidTransition { .. })));
    assert!(matches!(session.cancel(), Err(RosterError::InvalidTransition { .. })));
    assert_eq!(session.state(), SyncState::Idle);

    session.load().expect("load source");
    assert!(matches!(session.load(), Err(RosterError::InvalidTransition { .. })));
    assert_eq!(session.state(), SyncState::Loaded);

    session.cancel().expect("cancel");
    assert_eq!(session.state(), SyncState::Cancelled);
    assert_eq!(master.len(), 1);
}

#[test]
fn test_missing_source_stays_idle() {
    let dir = tempdir().expect("Failed to create temp dir");
    let master_path = write_master(dir.path(), &[(1, "Ana")]);
    let store = MasterStore::new(&master_path, "Roster", schema());
    let mut session = SyncSession::new(
        InsertSync::new(dir.path().join("no-existe.xlsx"), insert_spec(), schema()),
        &store,
    );
    assert!(matches!(session.load(), Err(RosterError::SourceNotFound(_))));
    assert_eq!(session.state(), SyncState::Idle);
}

#[test]
fn test_source_position_out_of_range() {
    let dir = tempdir().expect("Failed to create temp dir");
    let master_path = write_master(dir.path(), &[(1, "Ana")]);
    let source_path = write_insert_source(dir.path(), &[2]);
    let store = MasterStore::new(&master_path, "Roster", schema());

    let mut spec = insert_spec();
    spec.columns.push(9);
    let mut session = SyncSession::new(InsertSync::new(&source_path, spec, schema()), &store);
    assert!(matches!(session.load(), Err(RosterError::SchemaMismatch(_))));
    assert_eq!(session.state(), SyncState::Idle);
}

#[test]
fn test_failed_commit_keeps_preview() {
    let dir = tempdir().expect("Failed to create temp dir");
    let master_path = write_master(dir.path(), &[(1, "Ana")]);
    let source_path = write_insert_source(dir.path(), &[1, 2]);
    let store = MasterStore::new(&master_path, "Roster", schema());
    let mut master = store.load_dataset().expect("load master");

    let mut session = SyncSession::new(InsertSync::new(&source_path, insert_spec(), schema()), &store);
    session.load().expect("load source");
    session.match_records(&master).expect("match");
    session.stage(&master).expect("stage");

    // 別の操作で id=2 が先に書き込まれた
    write_master(dir.path(), &[(1, "Ana"), (2, "Otro")]);
    let before = std::fs::read(&master_path).expect("read");

    let result = session.confirm(&mut master);
    assert!(matches!(result, Err(RosterError::SchemaMismatch(_))));
    assert_eq!(session.state(), SyncState::Previewed);
    assert!(session.preview().is_some());
    assert_eq!(master.len(), 1);
    assert_eq!(std::fs::read(&master_path).expect("read"), before);

    session.cancel().expect("cancel");
    assert_eq!(session.state(), SyncState::Cancelled);
}

fn phase_two_spec() -> SourceSpec {
    // 取り込み元: 0=id, 1=タイムスタンプ, 2=氏名, 3=回答, 4=参加可否
    SourceSpec {
        sheet_name: "Respuestas".into(),
        columns: vec![0, 2, 3, 4],
        id: 0,
        name: 2,
        rules: RuleSet {
            replicate: vec![ReplicateRule {
                origin: 3,
                destination: 2,
                column_id: Some("txt_answer".into()),
            }],
            binary_check: vec![BinaryCheckRule {
                column: 4,
                destination: 4,
                column_id: Some("ind_select".into()),
            }],
            ..RuleSet::default()
        },
    }
}

fn write_phase_two_source(path: &Path, rows: &[(i64, &str, &str, &str)]) {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Respuestas").expect("sheet name");
    for (col, title) in ["id", "marca temporal", "nombre", "motivo", "participa"].iter().enumerate() {
        sheet.write_string(0, col as u16, *title).expect("header");
    }
    for (i, (id, name, answer, participates)) in rows.iter().enumerate() {
        let r = (i + 1) as u32;
        sheet.write_number(r, 0, *id as f64).expect("id");
        sheet.write_string(r, 1, "2024-05-01 09:00").expect("ts");
        sheet.write_string(r, 2, *name).expect("name");
        sheet.write_string(r, 3, *answer).expect("answer");
        sheet.write_string(r, 4, *participates).expect("participates");
    }
    workbook.save(path).expect("save");
}

#[test]
fn test_phase_two_fuzzy_update() {
    let dir = tempdir().expect("Failed to create temp dir");
    let master_path = write_master(dir.path(), &[(1, "John Smith"), (2, "Jane Doe")]);
    let source_path = dir.path().join("fase2.xlsx");
    write_phase_two_source(
        &source_path,
        &[
            (10, "Jon Smith", "me interesa", "Sí, claro"),
            (11, "Pedro Pérez", "no sé", "sí"),
        ],
    );

    let store = MasterStore::new(&master_path, "Roster", schema());
    let mut master = store.load_dataset().expect("load master");
    let mut session = SyncSession::new(PhaseTwoSync::new(&source_path, phase_two_spec(), schema()), &store);
    session.load().expect("load source");
    session.match_records(&master).expect("match");

    let report = session.report().clone();
    assert_eq!(report.unmatched.len(), 1);
    assert_eq!(report.unmatched[0].label, "Pedro Pérez");

    let preview = session.stage(&master).expect("stage").clone();
    assert_eq!(preview.updates(), 1);
    assert_eq!(preview.changes[0].id(), 1);

    let outcome = session.confirm(&mut master).expect("confirm");
    assert_eq!(outcome.updated, 1);

    let reloaded = store.load_dataset().expect("reload");
    let john = reloaded.get(1).expect("1");
    assert_eq!(john.get("ind_select"), &CellValue::Int(1));
    assert_eq!(john.get("txt_answer"), &CellValue::text("me interesa"));
    // destination のみ書き込む
    assert_eq!(john.get("txt_answer_copy"), &CellValue::Empty);
    assert_eq!(reloaded.get(2).expect("2").get("ind_select"), &CellValue::Int(0));

    // 他の行・ヘッダーは変わらない
    let snapshot = read_workbook(&master_path).expect("read");
    let sheet = snapshot.sheet("Roster").expect("Roster");
    assert_eq!(sheet.rows[0], header_row());
    assert_eq!(sheet.rows.len(), 3);
}
