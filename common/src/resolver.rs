//! 重複候補の解決
//!
//! 結合で1つのマスタidに複数の候補が付いた（ファンアウトした）とき、
//! 方針に従って1件に絞る。あくまで経験則であり、どの候補も方針を満たさない
//! 場合は最初の候補を残して `fallback` として報告する。

use crate::types::CellValue;
use serde::Serialize;

/// 未解決を表す外部キーの番兵値
pub const UNRESOLVED_KEY: i64 = -1;

/// 1グループ分の解決結果（候補が2件以上のときだけ作られる）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AmbiguousGroup<T> {
    pub target_id: i64,
    pub kept: T,
    pub discarded: Vec<T>,
    /// 方針を満たす候補がなく先頭を残した
    pub fallback: bool,
}

/// 解決結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution<T> {
    /// 各マスタidにつき1件（最初に現れた順）
    pub chosen: Vec<T>,
    pub ambiguous: Vec<AmbiguousGroup<T>>,
}

impl<T> Resolution<T> {
    pub fn has_ambiguity(&self) -> bool {
        !self.ambiguous.is_empty()
    }
}

/// 外部キーとして有効か（null でも -1 でもない）
pub fn is_valid_key(value: &CellValue) -> bool {
    match value.as_i64() {
        Some(key) => key != UNRESOLVED_KEY,
        None => !value.is_empty(),
    }
}

/// 値が入っているか
pub fn is_present(value: &CellValue) -> bool {
    !value.is_empty()
}

/// 汎用の解決処理
///
/// # Arguments
/// * `candidates` - 候補（入力順が走査順）
/// * `target` - 候補が結び付くマスタid
/// * `choose` - グループ内で残す候補の位置。None なら先頭を残す
pub fn resolve_with<T, K, C>(candidates: Vec<T>, target: K, choose: C) -> Resolution<T>
where
    T: Clone,
    K: Fn(&T) -> i64,
    C: Fn(&[T]) -> Option<usize>,
{
    // マスタidごとにグループ化（最初に現れた順を保つ）
    let mut groups: Vec<(i64, Vec<T>)> = Vec::new();
    for candidate in candidates {
        let id = target(&candidate);
        match groups.iter_mut().find(|(gid, _)| *gid == id) {
            Some((_, members)) => members.push(candidate),
            None => groups.push((id, vec![candidate])),
        }
    }

    let mut chosen = Vec::with_capacity(groups.len());
    let mut ambiguous = Vec::new();

    for (target_id, mut members) in groups {
        if members.len() == 1 {
            chosen.extend(members);
            continue;
        }

        let picked = choose(&members).filter(|&i| i < members.len());
        let fallback = picked.is_none();
        let kept = members.remove(picked.unwrap_or(0));

        tracing::warn!(
            target_id,
            candidates = members.len() + 1,
            fallback,
            "複数の候補が見つかりました"
        );

        ambiguous.push(AmbiguousGroup {
            target_id,
            kept: kept.clone(),
            discarded: members,
            fallback,
        });
        chosen.push(kept);
    }

    Resolution { chosen, ambiguous }
}

/// 条件を満たす最初の候補を残す
pub fn resolve_preferring<T, K, P>(candidates: Vec<T>, target: K, preferred: P) -> Resolution<T>
where
    T: Clone,
    K: Fn(&T) -> i64,
    P: Fn(&T) -> bool,
{
    resolve_with(candidates, target, |members| members.iter().position(&preferred))
}

/// スコアが最も高い候補を残す（同点は先のもの）
pub fn resolve_highest<T, K, S>(candidates: Vec<T>, target: K, score: S) -> Resolution<T>
where
    T: Clone,
    K: Fn(&T) -> i64,
    S: Fn(&T) -> u8,
{
    resolve_with(candidates, target, |members| {
        let mut best: Option<(usize, u8)> = None;
        for (i, member) in members.iter().enumerate() {
            let s = score(member);
            if best.map_or(true, |(_, b)| s > b) {
                best = Some((i, s));
            }
        }
        best.map(|(i, _)| i)
    })
}
