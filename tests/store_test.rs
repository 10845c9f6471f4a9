//! マスタファイルの読み書きの統合テスト
//!
//! 往復（書き込み → 読み込み）、一時ファイル経由の置き換え、他シートの保持

use roster_sync::error::RosterError;
use roster_sync::spreadsheet::{read_workbook, render_workbook, MasterStore, Patch, PatchOp, SheetGrid};
use roster_sync_common::schema::{ColumnSpec, SchemaMap};
use roster_sync_common::types::{parse_datetime, CellValue, FieldKind};
use std::collections::BTreeMap;
use std::path::Path;
use tempfile::tempdir;

fn schema() -> SchemaMap {
    SchemaMap::for_master(&[
        ColumnSpec::new(0, "id"),
        ColumnSpec::new(1, "name"),
        ColumnSpec::new(2, "skip"),
        ColumnSpec::new(3, "fecha_alta").with_kind(FieldKind::Date),
        ColumnSpec::new(4, "edad").with_kind(FieldKind::Number),
        ColumnSpec::new(5, "ind_select"),
    ])
    .expect("schema")
}

fn date(s: &str) -> CellValue {
    CellValue::Date(parse_datetime(s).expect("date"))
}

fn roster_sheet() -> SheetGrid {
    SheetGrid::new(
        "Roster",
        vec![
            vec![
                CellValue::text("id"),
                CellValue::text("name"),
                CellValue::text("notas"),
                CellValue::text("fecha_alta"),
                CellValue::text("edad"),
                CellValue::text("ind_select"),
            ],
            vec![
                CellValue::Int(1),
                CellValue::text("Ana García"),
                CellValue::text("nota libre"),
                date("2024-03-15 10:30:00"),
                CellValue::Int(31),
                CellValue::Int(1),
            ],
            vec![
                CellValue::Int(2),
                CellValue::text("Luis Martín"),
                CellValue::Empty,
                date("2023-11-02"),
                CellValue::Float(27.5),
                CellValue::text("1"),
            ],
            vec![
                CellValue::Int(3),
                CellValue::text("Marta Ruiz"),
                CellValue::Empty,
                CellValue::Empty,
                CellValue::Empty,
                CellValue::Empty,
            ],
        ],
    )
}

fn notes_sheet() -> SheetGrid {
    SheetGrid::new(
        "Notas",
        vec![vec![CellValue::text("clave"), CellValue::text("valor")], vec![CellValue::text("a"), CellValue::Int(1)]],
    )
}

fn write_book(path: &Path, sheets: &[SheetGrid]) {
    let bytes = render_workbook(sheets).expect("render");
    std::fs::write(path, bytes).expect("write fixture");
}

fn setup(dir: &Path) -> (MasterStore, std::path::PathBuf) {
    let path = dir.join("master.xlsx");
    write_book(&path, &[roster_sheet(), notes_sheet()]);
    (MasterStore::new(&path, "Roster", schema()), path)
}

#[test]
fn test_load_normalizes_values() {
    let dir = tempdir().expect("Failed to create temp dir");
    let (store, _) = setup(dir.path());
    let dataset = store.load_dataset().expect("load");

    assert_eq!(dataset.len(), 3);
    assert!(dataset.fingerprint().is_some());
    let luis = dataset.get(2).expect("record 2");
    assert_eq!(luis.get("ind_select"), &CellValue::Int(1));
    assert_eq!(luis.get("edad"), &CellValue::Float(27.5));
    assert_eq!(luis.get("fecha_alta"), &date("2023-11-02"));
    // 空の指標は 0
    assert_eq!(dataset.get(3).expect("record 3").get("ind_select"), &CellValue::Int(0));
}

#[test]
fn test_round_trip_all_kinds() {
    let dir = tempdir().expect("Failed to create temp dir");
    let (store, path) = setup(dir.path());
    let dataset = store.load_dataset().expect("load");

    let summary = store.write_dataset(&dataset).expect("write");
    assert!(!summary.disk_changed);

    let reloaded = store.load_dataset().expect("reload");
    assert_eq!(reloaded.records(), dataset.records());

    // マップされていない列と他のシートはそのまま
    let snapshot = read_workbook(&path).expect("read");
    let roster = snapshot.sheet("Roster").expect("Roster");
    assert_eq!(roster.rows[1][2], CellValue::text("nota libre"));
    assert_eq!(snapshot.sheet("Notas").expect("Notas"), &notes_sheet());
}

#[test]
fn test_dropped_staged_commit_leaves_file_untouched() {
    let dir = tempdir().expect("Failed to create temp dir");
    let (store, path) = setup(dir.path());
    let before = std::fs::read(&path).expect("read");

    let mut patch = Patch::new();
    patch.push(PatchOp::Update {
        id: 1,
        cells: [(1, CellValue::text("Cambiado"))].into_iter().collect(),
    });
    let staged = store.stage(&patch, None).expect("stage");
    let temp = staged.temp_path().to_path_buf();
    assert!(temp.exists());
    assert_eq!(temp.parent(), path.parent());
    drop(staged);

    assert_eq!(std::fs::read(&path).expect("read"), before);
    assert!(!temp.exists());
    let entries = std::fs::read_dir(dir.path()).expect("read_dir").count();
    assert_eq!(entries, 1, "一時ファイルが残っている");
}

#[test]
fn test_failed_patch_leaves_file_untouched() {
    let dir = tempdir().expect("Failed to create temp dir");
    let (store, path) = setup(dir.path());
    let before = std::fs::read(&path).expect("read");

    let mut patch = Patch::new();
    patch.push(PatchOp::Update {
        id: 1,
        cells: [(1, CellValue::text("x"))].into_iter().collect(),
    });
    patch.push(PatchOp::Update {
        id: 99,
        cells: [(1, CellValue::text("y"))].into_iter().collect(),
    });
    let result = store.commit(&patch, None);
    assert!(matches!(result, Err(RosterError::RecordNotFound(99))));
    assert_eq!(std::fs::read(&path).expect("read"), before);

    // 列数を超える位置
    let mut patch = Patch::new();
    patch.push(PatchOp::Update {
        id: 1,
        cells: [(9, CellValue::text("x"))].into_iter().collect(),
    });
    assert!(matches!(store.commit(&patch, None), Err(RosterError::SchemaMismatch(_))));
    assert_eq!(std::fs::read(&path).expect("read"), before);
}

#[test]
fn test_apply_edit_rolls_back_on_failure() {
    let dir = tempdir().expect("Failed to create temp dir");
    let (store, _) = setup(dir.path());
    let mut dataset = store.load_dataset().expect("load");

    let result = store.apply_edit(&mut dataset, |working| {
        working.delete(2)?;
        let mut patch = Patch::new();
        patch.push(PatchOp::Remove { id: 42 });
        Ok(((), patch))
    });
    assert!(result.is_err());
    assert_eq!(dataset.len(), 3);
    assert!(dataset.get(2).is_some());
}

#[test]
fn test_stale_disk_is_flagged_and_fingerprint_updated() {
    let dir = tempdir().expect("Failed to create temp dir");
    let (store, path) = setup(dir.path());
    let mut dataset = store.load_dataset().expect("load");
    let loaded_fp = dataset.fingerprint().map(str::to_string);

    // 別プロセスによる書き換え
    let mut changed = roster_sheet();
    changed.rows[3][1] = CellValue::text("Marta Ruiz Gil");
    write_book(&path, &[changed, notes_sheet()]);

    let (_, summary) = store
        .apply_edit(&mut dataset, |working| {
            working.update(1, "edad", CellValue::Int(32))?;
            let mut cells = BTreeMap::new();
            cells.insert(4, CellValue::Int(32));
            let mut patch = Patch::new();
            patch.push(PatchOp::Update { id: 1, cells });
            Ok(((), patch))
        })
        .expect("apply");
    let summary = summary.expect("written");
    assert!(summary.disk_changed);
    assert_ne!(dataset.fingerprint().map(str::to_string), loaded_fp);
    assert_eq!(dataset.fingerprint(), Some(summary.fingerprint.as_str()));

    // 他方の変更も残る（ファイル全体を読み直してから適用）
    let reloaded = store.load_dataset().expect("reload");
    assert_eq!(reloaded.get(3).expect("3").name(), Some("Marta Ruiz Gil"));
    assert_eq!(reloaded.get(1).expect("1").get("edad"), &CellValue::Int(32));
}

#[test]
fn test_schema_wider_than_sheet_is_rejected() {
    let dir = tempdir().expect("Failed to create temp dir");
    let (_, path) = setup(dir.path());
    let wide = SchemaMap::for_master(&[ColumnSpec::new(0, "id"), ColumnSpec::new(12, "email")]).expect("schema");
    let store = MasterStore::new(&path, "Roster", wide);
    assert!(matches!(store.load_dataset(), Err(RosterError::SchemaMismatch(_))));
}
