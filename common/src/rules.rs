//! 変換ルールエンジン
//!
//! ソース1行に対して replicate → binary_check の順でルールを適用し、
//! マスタ側の列位置 → 値 の変更を組み立てる。マスタを直接変更しない。

use crate::error::{Error, Result};
use crate::table::SourceRow;
use crate::types::CellValue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

fn default_missing_field_value() -> String {
    "sin respuesta".to_string()
}

fn default_affirmative_token() -> String {
    "sí".to_string()
}

/// 値を2か所（origin と destination）へ複製するルール
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicateRule {
    pub origin: usize,
    pub destination: usize,
    #[serde(default)]
    pub column_id: Option<String>,
}

/// 自由回答を 0/1 指標へ変換するルール（元の回答は column に残す）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryCheckRule {
    pub column: usize,
    pub destination: usize,
    #[serde(default)]
    pub column_id: Option<String>,
}

/// 変換ルール
#[derive(Debug, Clone, PartialEq)]
pub enum TransformRule {
    Replicate(ReplicateRule),
    BinaryCheck(BinaryCheckRule),
}

/// ルールの書き込み先
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleMode {
    /// ソースとマスタが同じ列配置: origin / column 位置にも書き込む
    Mirror,
    /// ソースが別の列配置: destination のみ書き込む
    DestinationOnly,
}

/// ルール適用後の1セル
#[derive(Debug, Clone, PartialEq)]
pub struct RuleCell {
    /// ルールで明示された column_id（なければ位置から解決）
    pub column_id: Option<String>,
    pub value: CellValue,
}

/// マスタ列位置 → 変更値
pub type RuleOutput = BTreeMap<usize, RuleCell>;

/// ソース設定に含まれるルール一式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub replicate: Vec<ReplicateRule>,
    #[serde(default)]
    pub binary_check: Vec<BinaryCheckRule>,
    /// 欠損時に代替値を入れる origin 位置
    #[serde(default)]
    pub missing_fields: BTreeSet<usize>,
    #[serde(default = "default_missing_field_value")]
    pub missing_field_value: String,
    /// 肯定とみなす語（大文字小文字を区別せず部分一致）
    #[serde(default = "default_affirmative_token")]
    pub affirmative_token: String,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            replicate: Vec::new(),
            binary_check: Vec::new(),
            missing_fields: BTreeSet::new(),
            missing_field_value: default_missing_field_value(),
            affirmative_token: default_affirmative_token(),
        }
    }
}

impl RuleSet {
    pub fn is_empty(&self) -> bool {
        self.replicate.is_empty() && self.binary_check.is_empty()
    }

    /// 評価順のルール一覧（replicate が先）
    pub fn rules(&self) -> Vec<TransformRule> {
        self.replicate
            .iter()
            .cloned()
            .map(TransformRule::Replicate)
            .chain(self.binary_check.iter().cloned().map(TransformRule::BinaryCheck))
            .collect()
    }

    /// ルールが参照するソース位置が読み込み対象か検証
    ///
    /// Mirror では origin と destination が同じシート上の位置なので、同じ位置は不可。
    pub fn validate(&self, source_positions: &[usize], mode: RuleMode) -> Result<()> {
        let check = |position: usize, what: &str| {
            if source_positions.contains(&position) {
                Ok(())
            } else {
                Err(Error::Config(format!(
                    "{} の列位置 {} がソースの columns に含まれていません",
                    what, position
                )))
            }
        };

        for rule in &self.replicate {
            check(rule.origin, "replicate.origin")?;
            if mode == RuleMode::Mirror && rule.origin == rule.destination {
                return Err(Error::Config(format!(
                    "replicate の origin と destination が同じです ({})",
                    rule.origin
                )));
            }
        }
        for rule in &self.binary_check {
            check(rule.column, "binary_check.column")?;
        }
        if self.affirmative_token.trim().is_empty() {
            return Err(Error::Config("affirmative_token が空です".into()));
        }
        Ok(())
    }

    /// 肯定語を含むか
    pub fn is_affirmative(&self, value: &CellValue) -> bool {
        let text = value.to_string().trim().to_lowercase();
        !text.is_empty() && text.contains(&self.affirmative_token.trim().to_lowercase())
    }

    fn replicate_value(&self, rule: &ReplicateRule, row: &SourceRow) -> CellValue {
        let value = row.get(&rule.origin).cloned().unwrap_or_default();
        if value.is_empty() && self.missing_fields.contains(&rule.origin) {
            CellValue::text(self.missing_field_value.clone())
        } else {
            value
        }
    }

    /// 1行にルールを適用
    ///
    /// 同じ位置に複数のルールが書く場合は後勝ち（binary_check が replicate を上書きする）。
    /// 入力だけで決まる純粋関数。
    pub fn apply(&self, row: &SourceRow, mode: RuleMode) -> RuleOutput {
        let mut output = RuleOutput::new();

        for rule in self.rules() {
            match rule {
                TransformRule::Replicate(rule) => {
                    let value = self.replicate_value(&rule, row);
                    if mode == RuleMode::Mirror {
                        output.insert(
                            rule.origin,
                            RuleCell {
                                column_id: None,
                                value: value.clone(),
                            },
                        );
                    }
                    output.insert(
                        rule.destination,
                        RuleCell {
                            column_id: rule.column_id.clone(),
                            value,
                        },
                    );
                }
                TransformRule::BinaryCheck(rule) => {
                    let original = row.get(&rule.column).cloned().unwrap_or_default();
                    let flag = CellValue::Int(i64::from(self.is_affirmative(&original)));
                    if mode == RuleMode::Mirror {
                        output.insert(
                            rule.column,
                            RuleCell {
                                column_id: None,
                                value: original,
                            },
                        );
                    }
                    output.insert(
                        rule.destination,
                        RuleCell {
                            column_id: rule.column_id.clone(),
                            value: flag,
                        },
                    );
                }
            }
        }

        output
    }
}
