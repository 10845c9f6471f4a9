use clap::{ArgAction, Parser, Subcommand};
use lazy_static::lazy_static;
use regex::Regex;
use roster_sync_common::matcher::SEARCH_THRESHOLD;
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "roster-sync")]
#[command(about = "名簿スプレッドシートの照合・同期ツール", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 設定ファイル（デフォルト: ./config.json → ~/.config/roster-sync/config.json）
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 詳細ログを出力（-v: info, -vv: debug）
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 取り込み元から新しいレコードを追加（id で比較）
    Sync {
        /// 確認せずに反映
        #[arg(short, long)]
        yes: bool,
    },

    /// フェーズ2の回答を氏名で照合して反映
    PhaseTwo {
        /// 確認せずに反映
        #[arg(short, long)]
        yes: bool,
    },

    /// 職員・所属登録簿で空欄を補完
    Enrich {
        /// 確認せずに反映
        #[arg(short, long)]
        yes: bool,
    },

    /// 氏名で検索
    Search {
        /// 検索語
        #[arg(required = true)]
        query: String,

        /// 閾値（0〜100）
        #[arg(short, long, default_value_t = SEARCH_THRESHOLD)]
        threshold: u8,
    },

    /// レコードの追加・更新・削除
    Record {
        #[command(subcommand)]
        action: RecordAction,
    },

    /// 複数レコードの1カラムに同じ値を設定
    BulkSet {
        /// 対象id（例: 1,2,5-8）
        #[arg(long, value_parser = parse_id_list)]
        ids: IdList,

        /// カラム（column_id）
        #[arg(long)]
        column: String,

        /// 設定する値
        #[arg(long)]
        value: String,
    },

    /// 設定を表示
    Config {
        /// 読み込んだ設定の概要を表示
        #[arg(long)]
        show: bool,
    },
}

#[derive(Subcommand)]
pub enum RecordAction {
    /// レコードを追加（column=value を並べる）
    Add {
        #[arg(required = true, value_parser = parse_assignment)]
        fields: Vec<(String, String)>,
    },

    /// レコードを更新
    Set {
        /// 対象id
        id: i64,

        #[arg(required = true, value_parser = parse_assignment)]
        fields: Vec<(String, String)>,
    },

    /// レコードを削除
    Delete {
        /// 対象id
        id: i64,

        /// 確認せずに削除
        #[arg(short, long)]
        yes: bool,
    },
}

/// id の一覧
#[derive(Debug, Clone, PartialEq)]
pub struct IdList(pub Vec<i64>);

/// 1回の一括設定で指定できる id の上限
pub const MAX_BULK_IDS: i64 = 10_000;

lazy_static! {
    static ref ID_RANGE: Regex = Regex::new(r"^\s*(\d+)\s*(?:-\s*(\d+)\s*)?$").unwrap();
}

/// `1,2,5-8` 形式の id 指定をパース（昇順・重複なし）
pub fn parse_id_list(input: &str) -> Result<IdList, String> {
    let mut ids = BTreeSet::new();
    for part in input.split(',').filter(|p| !p.trim().is_empty()) {
        let caps = ID_RANGE
            .captures(part)
            .ok_or_else(|| format!("id の形式が不正です: {}", part.trim()))?;
        let start: i64 = caps[1].parse().map_err(|_| format!("id が大きすぎます: {}", &caps[1]))?;
        let end: i64 = match caps.get(2) {
            Some(m) => m.as_str().parse().map_err(|_| format!("id が大きすぎます: {}", m.as_str()))?,
            None => start,
        };
        if end < start {
            return Err(format!("範囲が逆順です: {}", part.trim()));
        }
        if end - start >= MAX_BULK_IDS {
            return Err(format!("範囲が広すぎます（最大 {}件）: {}", MAX_BULK_IDS, part.trim()));
        }
        ids.extend(start..=end);
        if ids.len() as i64 > MAX_BULK_IDS {
            return Err(format!("id が多すぎます（最大 {}件）", MAX_BULK_IDS));
        }
    }
    if ids.is_empty() {
        return Err("id が指定されていません".into());
    }
    Ok(IdList(ids.into_iter().collect()))
}

/// `column=value` をパース
pub fn parse_assignment(input: &str) -> Result<(String, String), String> {
    let (column, value) = input
        .split_once('=')
        .ok_or_else(|| format!("column=value の形式で指定してください: {}", input))?;
    let column = column.trim();
    if column.is_empty() {
        return Err(format!("カラム名が空です: {}", input));
    }
    Ok((column.to_string(), value.to_string()))
}
