//! 氏名のあいまい照合
//!
//! - `ratio`: 編集距離（挿入・削除）ベースの類似度 0〜100
//! - `partial_ratio`: 短い方を長い方の部分文字列と比べた最大値
//! - `best_match`: 閾値以上で最も高いマスタ氏名を1件
//! - `search`: 閾値以上をすべてスコア順に

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

/// フェーズ2の人物照合で使う受け入れ閾値
pub const MATCH_THRESHOLD: u8 = 85;

/// 対話的な絞り込み検索の閾値
pub const SEARCH_THRESHOLD: u8 = 70;

lazy_static! {
    static ref NON_ALNUM: Regex = Regex::new(r"[^\p{L}\p{N}]+").unwrap();
}

/// 照合結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchCandidate {
    /// ソース側のキー（ソース行のid、なければ行番号）
    pub source_key: i64,
    pub master_id: i64,
    pub master_name: String,
    pub score: u8,
}

/// 照合用に氏名を正規化（小文字化、記号→空白、連続空白を1つに）
pub fn normalize_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    NON_ALNUM
        .replace_all(&lowered, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// 最長共通部分列の長さ
fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn ratio_chars(a: &[char], b: &[char]) -> u8 {
    let total = a.len() + b.len();
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let score = 200.0 * lcs_len(a, b) as f64 / total as f64;
    score.round() as u8
}

/// 類似度（0〜100）
///
/// 比較前に両方を `normalize_name` で正規化する。どちらかが空なら 0。
pub fn ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = normalize_name(a).chars().collect();
    let b: Vec<char> = normalize_name(b).chars().collect();
    ratio_chars(&a, &b)
}

/// 部分一致の類似度（0〜100）
pub fn partial_ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = normalize_name(a).chars().collect();
    let b: Vec<char> = normalize_name(b).chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    if short.len() == long.len() {
        return ratio_chars(short, long);
    }

    let mut best = 0;
    for window in long.windows(short.len()) {
        best = best.max(ratio_chars(short, window));
        if best == 100 {
            break;
        }
    }
    best
}

/// 閾値以上で最もスコアの高いマスタ氏名を返す
///
/// 同点は走査順で先のものを採用。
///
/// # Arguments
/// * `source_key` - ソース側のキー（結果にそのまま入る）
/// * `query` - 照合する氏名
/// * `names` - (マスタid, 氏名) の一覧
/// * `threshold` - 受け入れ閾値
pub fn best_match(
    source_key: i64,
    query: &str,
    names: &[(i64, &str)],
    threshold: u8,
) -> Option<MatchCandidate> {
    let mut best: Option<(i64, &str, u8)> = None;
    for &(id, name) in names {
        let score = ratio(query, name);
        if best.map_or(true, |(_, _, s)| score > s) {
            best = Some((id, name, score));
        }
    }

    best.filter(|&(_, _, score)| score > 0 && score >= threshold)
        .map(|(master_id, name, score)| MatchCandidate {
            source_key,
            master_id,
            master_name: name.to_string(),
            score,
        })
}

/// 閾値以上のマスタ氏名をすべて返す（スコア降順、同点は走査順）
pub fn search(query: &str, names: &[(i64, &str)], threshold: u8) -> Vec<MatchCandidate> {
    let mut hits: Vec<MatchCandidate> = names
        .iter()
        .filter_map(|&(id, name)| {
            let score = partial_ratio(query, name);
            (score > 0 && score >= threshold).then(|| MatchCandidate {
                source_key: 0,
                master_id: id,
                master_name: name.to_string(),
                score,
            })
        })
        .collect();
    // sort_by は安定ソート
    hits.sort_by(|a, b| b.score.cmp(&a.score));
    hits
}
