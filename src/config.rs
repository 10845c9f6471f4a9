//! 設定ファイル（config.json）
//!
//! 探索順: `--config` 指定 → `./config.json` → `~/.config/roster-sync/config.json`

use crate::error::{Result, RosterError};
use roster_sync_common::rules::{RuleMode, RuleSet};
use roster_sync_common::schema::{ColumnSpec, SchemaMap};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "config.json";

fn default_sheet_name() -> String {
    "Sheet1".to_string()
}

fn default_name_column() -> usize {
    4
}

/// マスタ（またはシート一般）の列定義
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetSpec {
    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,
    pub columns: Vec<ColumnSpec>,
}

/// 取り込み元スプレッドシートの設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,
    /// 読み込む列位置
    pub columns: Vec<usize>,
    /// id 列の位置
    #[serde(default)]
    pub id: usize,
    /// 氏名列の位置（フェーズ2の照合キー）
    #[serde(default = "default_name_column")]
    pub name: usize,
    #[serde(flatten)]
    pub rules: RuleSet,
}

/// 登録簿（区切り文字ファイル）の設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySpec {
    #[serde(default)]
    pub path: PathBuf,
    pub file: String,
    /// 読み込む列名
    #[serde(default)]
    pub keep: Vec<String>,
    #[serde(default)]
    pub delimiter: Option<char>,
}

impl RegistrySpec {
    pub fn full_path(&self) -> PathBuf {
        self.path.join(&self.file)
    }

    /// 区切り文字（未指定なら `default`）。ASCII 以外は設定エラー
    pub fn delimiter_or(&self, default: char) -> Result<u8> {
        let c = self.delimiter.unwrap_or(default);
        if c.is_ascii() {
            Ok(c as u8)
        } else {
            Err(RosterError::Config(format!(
                "{} の delimiter '{}' は ASCII 文字ではありません",
                self.file, c
            )))
        }
    }
}

/// 登録簿の列 → マスタの column_id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source: String,
    pub target: String,
}

impl FieldMapping {
    fn new(source: &str, target: &str) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// 補完結合の設定（省略時は既定の列名）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentSpec {
    pub first_name: String,
    pub last_name1: String,
    pub last_name2: String,
    pub employee_center: String,
    pub center_key: String,
    pub center_description: String,
    pub mapping: Vec<FieldMapping>,
    pub numeric_targets: Vec<String>,
    pub text_targets: Vec<String>,
    pub not_found_value: String,
}

impl Default for EnrichmentSpec {
    fn default() -> Self {
        let mapping = [
            ("PK_EMPL", "pk_empl"),
            ("FK_CENTRO", "fk_centro"),
            ("DES_CENTRO_GES", "des_centro_ges"),
            ("COD_DAN", "cod_dan"),
            ("DES_DAN", "des_dan"),
            ("COD_DG", "cod_dg"),
            ("DES_DG", "des_dg"),
            ("COD_DT", "cod_dt"),
            ("DES_DT", "des_dt"),
            ("COD_RED", "cod_red"),
            ("DES_RED", "des_red"),
        ]
        .iter()
        .map(|(s, t)| FieldMapping::new(s, t))
        .collect();

        let to_strings = |items: &[&str]| -> Vec<String> { items.iter().map(|s| s.to_string()).collect() };

        Self {
            first_name: "NOMBRE_EMPLEADO".into(),
            last_name1: "APELLIDO1_EMPLEADO".into(),
            last_name2: "APELLIDO2_EMPLEADO".into(),
            employee_center: "FK_CENTRO".into(),
            center_key: "PK_CENTRO".into(),
            center_description: "DES_CENTRO_GES".into(),
            mapping,
            numeric_targets: to_strings(&["pk_empl", "fk_centro", "cod_dan", "cod_dg", "cod_dt", "cod_red"]),
            text_targets: to_strings(&["des_centro_ges", "des_dan", "des_dg", "des_dt", "des_red"]),
            not_found_value: "not found".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub excel_path: PathBuf,
    pub excel_interpreter_spec: SheetSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path_spec: Option<SourceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_two_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_two_spec: Option<SourceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path_employees: Option<RegistrySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path_workcenters: Option<RegistrySpec>,
    #[serde(default)]
    pub enrichment: EnrichmentSpec,
}

impl Config {
    /// 設定ファイルを探して読み込む
    ///
    /// 相対パスは設定ファイルのあるディレクトリを基準に解決する。
    pub fn load(explicit: Option<&Path>) -> Result<(Self, PathBuf)> {
        let path = Self::resolve_path(explicit)?;
        let config = Self::from_file(&path)?;
        Ok((config, path))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RosterError::Config(format!("{} を読み込めません: {}", path.display(), e)))?;
        let mut config: Config = serde_json::from_str(&content)
            .map_err(|e| RosterError::Config(format!("{} の形式が不正です: {}", path.display(), e)))?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        config.validate()?;
        Ok(config)
    }

    /// 設定ファイルのパスを決める
    pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(RosterError::Config(format!(
                "設定ファイルが見つかりません: {}",
                path.display()
            )));
        }

        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Ok(local);
        }

        let user = Self::user_config_path()?;
        if user.exists() {
            return Ok(user);
        }

        Err(RosterError::Config(format!(
            "設定ファイルが見つかりません（./{} または {}）",
            CONFIG_FILE_NAME,
            user.display()
        )))
    }

    pub fn user_config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| RosterError::Config("ホームディレクトリが見つかりません".into()))?;
        Ok(home.join(".config").join("roster-sync").join(CONFIG_FILE_NAME))
    }

    fn rebase(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() && !p.as_os_str().is_empty() {
                *p = base.join(&*p);
            }
        };
        join(&mut self.excel_path);
        if let Some(p) = self.source_path.as_mut() {
            join(p);
        }
        if let Some(p) = self.phase_two_path.as_mut() {
            join(p);
        }
        for registry in [self.source_path_employees.as_mut(), self.source_path_workcenters.as_mut()]
            .into_iter()
            .flatten()
        {
            if registry.path.is_relative() {
                registry.path = base.join(&registry.path);
            }
        }
    }

    /// マスタの列対応表
    pub fn master_schema(&self) -> Result<SchemaMap> {
        Ok(SchemaMap::for_master(&self.excel_interpreter_spec.columns)?)
    }

    pub fn sheet_name(&self) -> &str {
        &self.excel_interpreter_spec.sheet_name
    }

    /// 設定の整合性チェック（不正なら操作を開始しない）
    pub fn validate(&self) -> Result<()> {
        let schema = self.master_schema()?;

        if let Some(spec) = &self.source_path_spec {
            validate_source("source_path_spec", spec, &schema, RuleMode::Mirror)?;
        }
        if let Some(spec) = &self.phase_two_spec {
            validate_source("phase_two_spec", spec, &schema, RuleMode::DestinationOnly)?;
        }
        for registry in [&self.source_path_employees, &self.source_path_workcenters]
            .into_iter()
            .flatten()
        {
            registry.delimiter_or(',')?;
        }
        if self.source_path_employees.is_some() || self.source_path_workcenters.is_some() {
            let targets = self
                .enrichment
                .mapping
                .iter()
                .map(|m| &m.target)
                .chain(&self.enrichment.numeric_targets)
                .chain(&self.enrichment.text_targets);
            for target in targets {
                if schema.position_of(target).is_none() {
                    return Err(RosterError::Config(format!(
                        "enrichment の対象列 '{}' がマスタの columns にありません",
                        target
                    )));
                }
            }
        }
        Ok(())
    }
}

fn validate_source(label: &str, spec: &SourceSpec, master: &SchemaMap, mode: RuleMode) -> Result<()> {
    if spec.columns.is_empty() {
        return Err(RosterError::Config(format!("{}.columns が空です", label)));
    }
    if !spec.columns.contains(&spec.id) {
        return Err(RosterError::Config(format!(
            "{}.id ({}) が columns に含まれていません",
            label, spec.id
        )));
    }
    // 氏名で照合するのはフェーズ2のみ
    if mode == RuleMode::DestinationOnly && !spec.columns.contains(&spec.name) {
        return Err(RosterError::Config(format!(
            "{}.name ({}) が columns に含まれていません",
            label, spec.name
        )));
    }
    spec.rules
        .validate(&spec.columns, mode)
        .map_err(|e| RosterError::Config(format!("{}: {}", label, e)))?;

    // ルールの書き込み先はマスタの列でなければならない
    let destinations = spec
        .rules
        .replicate
        .iter()
        .map(|r| (r.destination, r.column_id.as_deref()))
        .chain(spec.rules.binary_check.iter().map(|r| (r.destination, r.column_id.as_deref())));
    for (position, column_id) in destinations {
        match (master.column_id_at(position), column_id) {
            (None, _) => {
                return Err(RosterError::Config(format!(
                    "{}: 書き込み先の列位置 {} がマスタの columns にありません",
                    label, position
                )))
            }
            (Some(mapped), Some(declared)) if mapped != declared => {
                return Err(RosterError::Config(format!(
                    "{}: 列位置 {} は '{}' ですが、ルールでは '{}' になっています",
                    label, position, mapped, declared
                )))
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "excel_path": "master.xlsx",
            "excel_interpreter_spec": {
                "sheet_name": "Roster",
                "columns": [
                    {"column": 0, "column_id": "id"},
                    {"column": 1, "column_id": "name"},
                    {"column": 2, "column_id": "skip"},
                    {"column": 3, "column_id": "txt_answer"},
                    {"column": 4, "column_id": "txt_answer_copy"},
                    {"column": 5, "column_id": "ind_confirm"}
                ]
            },
            "phase_two_path": "phase2.xlsx",
            "phase_two_spec": {
                "columns": [0, 1, 2],
                "id": 0,
                "name": 1,
                "replicate": [{"origin": 2, "destination": 4, "column_id": "txt_answer_copy"}],
                "binary_check": [{"column": 2, "destination": 5, "column_id": "ind_confirm"}],
                "missing_fields": [2]
            }
        }"#
    }

    #[test]
    fn test_parse_with_defaults() {
        let config: Config = serde_json::from_str(sample_json()).unwrap();
        let spec = config.phase_two_spec.as_ref().unwrap();
        assert_eq!(spec.sheet_name, "Sheet1");
        assert_eq!(spec.rules.missing_field_value, "sin respuesta");
        assert_eq!(spec.rules.affirmative_token, "sí");
        assert!(spec.rules.missing_fields.contains(&2));
        assert_eq!(config.enrichment.not_found_value, "not found");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unmapped_destination() {
        let mut config: Config = serde_json::from_str(sample_json()).unwrap();
        let spec = config.phase_two_spec.as_mut().unwrap();
        spec.rules.replicate[0].destination = 2;
        assert!(matches!(config.validate(), Err(RosterError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_conflicting_column_id() {
        let mut config: Config = serde_json::from_str(sample_json()).unwrap();
        let spec = config.phase_two_spec.as_mut().unwrap();
        spec.rules.binary_check[0].column_id = Some("ind_other".into());
        assert!(matches!(config.validate(), Err(RosterError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_missing_id() {
        let mut config: Config = serde_json::from_str(sample_json()).unwrap();
        config.excel_interpreter_spec.columns.remove(0);
        assert!(matches!(config.validate(), Err(RosterError::Config(_))));
    }

    fn with_registries(config: &mut Config) {
        let registry = |file: &str| RegistrySpec {
            path: PathBuf::from("registros"),
            file: file.into(),
            keep: vec![],
            delimiter: None,
        };
        config.source_path_employees = Some(registry("empleados.csv"));
        config.source_path_workcenters = Some(registry("centros.csv"));
        config.enrichment = EnrichmentSpec {
            mapping: vec![FieldMapping::new("PK_EMPL", "txt_answer")],
            numeric_targets: vec![],
            text_targets: vec![],
            ..EnrichmentSpec::default()
        };
    }

    #[test]
    fn test_validate_enrichment_targets() {
        let mut config: Config = serde_json::from_str(sample_json()).unwrap();
        with_registries(&mut config);
        assert!(config.validate().is_ok());

        // 既定値だけを書き込む列もマスタに必要
        config.enrichment.text_targets = vec!["des_centro_ges".into()];
        assert!(matches!(config.validate(), Err(RosterError::Config(_))));

        config.enrichment.text_targets.clear();
        config.enrichment.numeric_targets = vec!["fk_centro".into()];
        assert!(matches!(config.validate(), Err(RosterError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_non_ascii_delimiter() {
        let mut config: Config = serde_json::from_str(sample_json()).unwrap();
        with_registries(&mut config);
        if let Some(registry) = config.source_path_employees.as_mut() {
            registry.delimiter = Some('¦');
        }
        assert!(matches!(config.validate(), Err(RosterError::Config(_))));

        let registry = config.source_path_employees.as_ref().unwrap();
        assert!(matches!(registry.delimiter_or(';'), Err(RosterError::Config(_))));
        let workcenters = config.source_path_workcenters.as_ref().unwrap();
        assert_eq!(workcenters.delimiter_or(',').unwrap(), b',');
    }

    #[test]
    fn test_from_file_rebases_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, sample_json()).unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.excel_path, dir.path().join("master.xlsx"));
        assert_eq!(config.phase_two_path.unwrap(), dir.path().join("phase2.xlsx"));
    }

    #[test]
    fn test_resolve_explicit_missing() {
        let result = Config::resolve_path(Some(Path::new("/nonexistent/roster/config.json")));
        assert!(matches!(result, Err(RosterError::Config(_))));
    }
}
