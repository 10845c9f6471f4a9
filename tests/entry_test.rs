//! レコード手入力操作の統合テスト

use roster_sync::entry::{search_names, RecordEditor};
use roster_sync::error::RosterError;
use roster_sync::spreadsheet::{render_workbook, MasterStore, SheetGrid};
use roster_sync_common::schema::{ColumnSpec, SchemaMap};
use roster_sync_common::types::{CellValue, FieldKind};
use std::collections::BTreeSet;
use std::path::Path;
use tempfile::tempdir;

fn schema() -> SchemaMap {
    SchemaMap::for_master(&[
        ColumnSpec::new(0, "id"),
        ColumnSpec::new(1, "name"),
        ColumnSpec::new(2, "email"),
        ColumnSpec::new(3, "edad").with_kind(FieldKind::Number),
        ColumnSpec::new(4, "ind_session"),
    ])
    .expect("schema")
}

fn setup(dir: &Path) -> MasterStore {
    let path = dir.join("master.xlsx");
    let row = |id: i64, name: &str, ind: i64| {
        vec![
            CellValue::Int(id),
            CellValue::text(name),
            CellValue::Empty,
            CellValue::Empty,
            CellValue::Int(ind),
        ]
    };
    let rows = vec![
        ["id", "name", "email", "edad", "ind_session"]
            .iter()
            .map(|h| CellValue::text(*h))
            .collect(),
        row(1, "José Fernández", 0),
        row(2, "Josefa Martín", 1),
        row(3, "Carmen Vidal", 0),
    ];
    let bytes = render_workbook(&[SheetGrid::new("Roster", rows)]).expect("render");
    std::fs::write(&path, bytes).expect("write");
    MasterStore::new(path, "Roster", schema())
}

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items.iter().map(|(c, v)| (c.to_string(), v.to_string())).collect()
}

#[test]
fn test_add_update_delete_round_trip() {
    let dir = tempdir().expect("Failed to create temp dir");
    let store = setup(dir.path());
    let mut dataset = store.load_dataset().expect("load");
    let editor = RecordEditor::new(&store);

    let fields = editor
        .parse_fields(&pairs(&[("name", "Elena Sanz"), ("edad", "41")]))
        .expect("parse");
    let (id, commit) = editor.add_record(&mut dataset, fields).expect("add");
    assert_eq!(id, 4);
    assert!(commit.is_some());

    let fields = editor.parse_fields(&pairs(&[("email", "elena@example.com")])).expect("parse");
    let (changes, _) = editor.update_record(&mut dataset, 4, fields).expect("update");
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].before, CellValue::Empty);

    let reloaded = store.load_dataset().expect("reload");
    let elena = reloaded.get(4).expect("4");
    assert_eq!(elena.name(), Some("Elena Sanz"));
    assert_eq!(elena.get("edad"), &CellValue::Int(41));
    assert_eq!(elena.get("email"), &CellValue::text("elena@example.com"));
    assert_eq!(elena.get("ind_session"), &CellValue::Int(0));

    let (removed, _) = editor.delete_record(&mut dataset, 4).expect("delete");
    assert_eq!(removed.id, 4);
    let reloaded = store.load_dataset().expect("reload");
    assert_eq!(reloaded.ids(), [1, 2, 3].into_iter().collect::<BTreeSet<i64>>());
}

#[test]
fn test_deleted_id_is_not_reused() {
    let dir = tempdir().expect("Failed to create temp dir");
    let store = setup(dir.path());
    let mut dataset = store.load_dataset().expect("load");
    let editor = RecordEditor::new(&store);

    editor.delete_record(&mut dataset, 3).expect("delete");
    let fields = editor.parse_fields(&pairs(&[("name", "Nuevo")])).expect("parse");
    let (id, _) = editor.add_record(&mut dataset, fields).expect("add");
    assert_eq!(id, 4);
}

#[test]
fn test_update_without_changes_skips_write() {
    let dir = tempdir().expect("Failed to create temp dir");
    let store = setup(dir.path());
    let mut dataset = store.load_dataset().expect("load");
    let editor = RecordEditor::new(&store);

    let fields = editor.parse_fields(&pairs(&[("name", "Carmen Vidal")])).expect("parse");
    let (changes, commit) = editor.update_record(&mut dataset, 3, fields).expect("update");
    assert!(changes.is_empty());
    assert!(commit.is_none());
}

#[test]
fn test_invalid_input_leaves_file_untouched() {
    let dir = tempdir().expect("Failed to create temp dir");
    let store = setup(dir.path());
    let before = std::fs::read(store.path()).expect("read");
    let mut dataset = store.load_dataset().expect("load");
    let editor = RecordEditor::new(&store);

    assert!(matches!(
        editor.parse_fields(&pairs(&[("name", "X"), ("telefono", "600")])),
        Err(RosterError::InvalidValue { .. })
    ));
    assert!(matches!(
        editor.parse_value("id", "9"),
        Err(RosterError::InvalidValue { .. })
    ));
    assert!(editor.parse_value("edad", "cuarenta").is_err());

    let fields = editor.parse_fields(&pairs(&[("email", "a@b.c")])).expect("parse");
    assert!(matches!(
        editor.update_record(&mut dataset, 99, fields),
        Err(RosterError::RecordNotFound(99))
    ));
    assert!(matches!(
        editor.delete_record(&mut dataset, 99),
        Err(RosterError::RecordNotFound(99))
    ));
    assert_eq!(dataset.len(), 3);
    assert_eq!(std::fs::read(store.path()).expect("read"), before);
}

#[test]
fn test_bulk_set() {
    let dir = tempdir().expect("Failed to create temp dir");
    let store = setup(dir.path());
    let mut dataset = store.load_dataset().expect("load");
    let editor = RecordEditor::new(&store);

    let value = editor.parse_value("ind_session", "1").expect("parse");
    let (updated, commit) = editor
        .bulk_set(&mut dataset, &[1, 2, 3], "ind_session", value.clone())
        .expect("bulk");
    // id=2 は既に 1
    assert_eq!(updated, 2);
    assert!(commit.is_some());

    let reloaded = store.load_dataset().expect("reload");
    for id in 1..=3 {
        assert_eq!(reloaded.get(id).expect("record").get("ind_session"), &CellValue::Int(1));
    }

    // 存在しない id を含むと何も変えない
    let before = std::fs::read(store.path()).expect("read");
    assert!(matches!(
        editor.bulk_set(&mut dataset, &[1, 42], "ind_session", CellValue::Int(0)),
        Err(RosterError::RecordNotFound(42))
    ));
    assert_eq!(dataset.get(1).expect("1").get("ind_session"), &CellValue::Int(1));
    assert_eq!(std::fs::read(store.path()).expect("read"), before);
}

#[test]
fn test_search_names_partial() {
    let dir = tempdir().expect("Failed to create temp dir");
    let store = setup(dir.path());
    let dataset = store.load_dataset().expect("load");

    let hits = search_names(&dataset, "jose", 70);
    let ids: BTreeSet<i64> = hits.iter().map(|h| h.master_id).collect();
    assert!(ids.contains(&1));
    assert!(ids.contains(&2));
    assert!(!ids.contains(&3));
}
