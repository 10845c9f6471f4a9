use clap::Parser;
use dialoguer::Confirm;
use roster_sync::cli::{Cli, Commands, RecordAction};
use roster_sync::config::Config;
use roster_sync::enrich::EnrichmentJoin;
use roster_sync::entry::{search_names, RecordEditor};
use roster_sync::error::{Result, RosterError};
use roster_sync::spreadsheet::{CommitSummary, MasterStore};
use roster_sync::sync::{InsertSync, PhaseTwoSync, Preview, StagedChange, SyncJob, SyncReport, SyncSession};
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {}", e);
            ExitCode::FAILURE
        }
    }
}

/// RUST_LOG があれば優先、なければ -v の回数で決める
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let (config, config_path) = Config::load(cli.config.as_deref())?;
    let store = MasterStore::from_config(&config)?;

    match cli.command {
        Commands::Sync { yes } => {
            println!("📥 roster-sync - 新規レコードの取り込み\n");
            let (path, spec) = match (&config.source_path, &config.source_path_spec) {
                (Some(path), Some(spec)) => (path.clone(), spec.clone()),
                _ => return Err(missing("source_path / source_path_spec")),
            };
            run_job(InsertSync::new(path, spec, store.schema().clone()), &store, yes)?;
        }

        Commands::PhaseTwo { yes } => {
            println!("📥 roster-sync - フェーズ2の反映\n");
            let (path, spec) = match (&config.phase_two_path, &config.phase_two_spec) {
                (Some(path), Some(spec)) => (path.clone(), spec.clone()),
                _ => return Err(missing("phase_two_path / phase_two_spec")),
            };
            run_job(PhaseTwoSync::new(path, spec, store.schema().clone()), &store, yes)?;
        }

        Commands::Enrich { yes } => {
            println!("📥 roster-sync - 登録簿による補完\n");
            let (employees, workcenters) = match (&config.source_path_employees, &config.source_path_workcenters) {
                (Some(e), Some(w)) => (e.clone(), w.clone()),
                _ => return Err(missing("source_path_employees / source_path_workcenters")),
            };
            let job = EnrichmentJoin::new(employees, workcenters, config.enrichment.clone(), store.schema().clone());
            run_job(job, &store, yes)?;
        }

        Commands::Search { query, threshold } => {
            let dataset = store.load_dataset()?;
            let hits = search_names(&dataset, &query, threshold);
            if hits.is_empty() {
                println!("⚠ 一致する氏名はありません（閾値 {}）", threshold);
            }
            for hit in hits {
                println!("  {:>3}  id={:<6} {}", hit.score, hit.master_id, hit.master_name);
            }
        }

        Commands::Record { action } => {
            let mut dataset = store.load_dataset()?;
            let editor = RecordEditor::new(&store);
            match action {
                RecordAction::Add { fields } => {
                    let fields = editor.parse_fields(&fields)?;
                    let (id, commit) = editor.add_record(&mut dataset, fields)?;
                    println!("✔ レコードを追加しました: id={}", id);
                    print_commit(commit.as_ref());
                }
                RecordAction::Set { id, fields } => {
                    let fields = editor.parse_fields(&fields)?;
                    let (changes, commit) = editor.update_record(&mut dataset, id, fields)?;
                    if changes.is_empty() {
                        println!("✔ 変更はありません");
                    }
                    for change in &changes {
                        println!("  {}: {} → {}", change.column_id, display_value(&change.before), display_value(&change.after));
                    }
                    print_commit(commit.as_ref());
                }
                RecordAction::Delete { id, yes } => {
                    let label = dataset
                        .get(id)
                        .ok_or(RosterError::RecordNotFound(id))?
                        .name()
                        .unwrap_or("(氏名なし)")
                        .to_string();
                    if !yes && !confirm(&format!("id={} {} を削除しますか?", id, label))? {
                        println!("⚠ 取り消しました");
                        return Ok(());
                    }
                    let (_, commit) = editor.delete_record(&mut dataset, id)?;
                    println!("✔ レコードを削除しました: id={}", id);
                    print_commit(commit.as_ref());
                }
            }
        }

        Commands::BulkSet { ids, column, value } => {
            let mut dataset = store.load_dataset()?;
            let editor = RecordEditor::new(&store);
            let value = editor.parse_value(&column, &value)?;
            let (updated, commit) = editor.bulk_set(&mut dataset, &ids.0, &column, value)?;
            println!("✔ {}件中 {}件を更新しました ({})", ids.0.len(), updated, column);
            print_commit(commit.as_ref());
        }

        Commands::Config { show } => {
            println!("設定ファイル: {}", config_path.display());
            if show {
                print_config(&config);
            }
        }
    }

    Ok(())
}

fn missing(keys: &str) -> RosterError {
    RosterError::Config(format!("{} が設定されていません", keys))
}

fn confirm(prompt: &str) -> Result<bool> {
    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| RosterError::Prompt(e.to_string()))
}

/// 読み込み → 照合 → 差分 → 確認 → 反映
fn run_job<J: SyncJob>(job: J, store: &MasterStore, yes: bool) -> Result<()> {
    println!("[1/4] マスタを読み込み中...");
    let mut master = store.load_dataset()?;
    println!("✔ {}件 ({})\n", master.len(), store.path().display());

    let mut session = SyncSession::new(job, store);

    println!("[2/4] 取り込み元を読み込み中...");
    session.load()?;
    println!("✔ 読み込み完了\n");

    println!("[3/4] 照合中...");
    if let Some(message) = session.match_records(&master)? {
        print_report(session.report());
        println!("✔ {}", message);
        return Ok(());
    }
    let preview = session.stage(&master)?.clone();
    print_preview(&preview);
    print_report(session.report());

    if preview.is_empty() {
        session.cancel()?;
        println!("✔ 反映する変更はありません");
        return Ok(());
    }

    if !yes && !confirm("この内容で反映しますか?")? {
        session.cancel()?;
        println!("⚠ 取り消しました（ファイルは変更されていません）");
        return Ok(());
    }

    println!("\n[4/4] 書き込み中...");
    let outcome = session.confirm(&mut master)?;
    print_commit(outcome.commit.as_ref());
    println!(
        "\n✅ 反映完了: 追加 {}件 / 更新 {}件",
        outcome.inserted, outcome.updated
    );
    Ok(())
}

fn display_value(value: &roster_sync_common::CellValue) -> String {
    if value.is_empty() {
        "(空)".to_string()
    } else {
        value.to_string()
    }
}

fn print_preview(preview: &Preview) {
    println!("✔ 追加 {}件 / 更新 {}件\n", preview.inserts(), preview.updates());
    for change in &preview.changes {
        match change {
            StagedChange::Insert { id, fields } => {
                let name = fields.get("name").map(display_value).unwrap_or_default();
                println!("  + id={} {}", id, name);
            }
            StagedChange::Update { id, name, changes } => {
                println!("  ~ id={} {}", id, name.as_deref().unwrap_or(""));
                for c in changes {
                    println!("      {}: {} → {}", c.column_id, display_value(&c.before), display_value(&c.after));
                }
            }
        }
    }
    println!();
}

fn print_report(report: &SyncReport) {
    if report.is_clean() {
        return;
    }
    if !report.blank_rows.is_empty() {
        let rows: Vec<String> = report.blank_rows.iter().map(|r| r.to_string()).collect();
        println!("⚠ 空行 {}件: {}行目", rows.len(), rows.join(", "));
    }
    if !report.unmatched.is_empty() {
        println!("⚠ 照合できなかった行 {}件:", report.unmatched.len());
        for row in &report.unmatched {
            println!("    {} '{}' - {}", row.location, row.label, row.reason);
        }
    }
    if !report.deduplicated.is_empty() {
        println!("⚠ 重複のため除外した行 {}件:", report.deduplicated.len());
        for row in &report.deduplicated {
            println!("    {}行目 '{}'（{}行目を採用）", row.row, row.key, row.kept_row);
        }
    }
    if !report.ambiguous.is_empty() {
        println!("⚠ 複数の候補があったレコード {}件:", report.ambiguous.len());
        for note in &report.ambiguous {
            println!(
                "    [{}] id={} 採用: {}{}",
                note.stage,
                note.target_id,
                note.kept,
                if note.fallback { "（条件を満たす候補なし）" } else { "" }
            );
            for discarded in &note.discarded {
                println!("        除外: {}", discarded);
            }
        }
    }
    println!();
}

fn print_commit(commit: Option<&CommitSummary>) {
    match commit {
        Some(summary) => {
            if summary.disk_changed {
                println!("⚠ 読み込み後にファイルが変更されていました（上書きしました）");
            }
            println!("✔ 書き込み完了 ({}操作)", summary.operations);
        }
        None => println!("✔ 書き込みは不要でした"),
    }
}

fn print_config(config: &Config) {
    let path_or = |p: Option<&Path>| p.map_or("未設定".to_string(), |p| p.display().to_string());
    println!("設定:");
    println!("  マスタ: {} (シート: {})", config.excel_path.display(), config.sheet_name());
    println!("  マスタ列数: {}", config.excel_interpreter_spec.columns.len());
    println!("  取り込み元: {}", path_or(config.source_path.as_deref()));
    println!("  フェーズ2: {}", path_or(config.phase_two_path.as_deref()));
    println!(
        "  職員登録簿: {}",
        path_or(config.source_path_employees.as_ref().map(|r| r.full_path()).as_deref())
    );
    println!(
        "  所属登録簿: {}",
        path_or(config.source_path_workcenters.as_ref().map(|r| r.full_path()).as_deref())
    );
}
