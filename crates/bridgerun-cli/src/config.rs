//! Run configuration
//!
//! A run is configured from three layers, highest first:
//!
//! 1. Command-line flags (each also readable from a `BRIDGERUN_*` variable)
//! 2. The YAML config file (`config.yaml` by default, fetched from
//!    `--config-url` when missing unless `--offline`)
//! 3. Interactive prompts, only when stdin is a terminal
//!
//! The result is a [`RunConfig`], validated once and never mutated.

use crate::error::{CliError, Result};
use crate::postprocess::RewriteRule;
use crate::runner::ToolProfile;
use bridgerun_common::types::StageKind;
use bridgerun_ingest::discovery::Layout;
use clap::Args;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default config file path, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Where the default config is fetched from when the file is missing
pub const DEFAULT_CONFIG_URL: &str =
    "https://raw.githubusercontent.com/bridgerun/bridgerun/main/config.example.yml";

/// Dialect value that selects the legacy-package pipeline
pub const LEGACY_PACKAGE_DIALECT: &str = "ssis";

pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_PACKAGE_ANALYZE_TIMEOUT_SECS: u64 = 1800;
pub const DEFAULT_TOOL_EXECUTABLE: &str = "databricks";
pub const DEFAULT_WORKSPACE_DIR: &str = "/Shared";
pub const DEFAULT_UNIT_EXTENSION: &str = "sql";

fn default_command_prefix() -> Vec<String> {
    vec!["labs".to_string(), "lakebridge".to_string()]
}

// ============================================================================
// Pipeline Variant
// ============================================================================

/// Which pipeline shape a run uses, resolved once from the dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineVariant {
    /// SQL sources: batch analyze, then per-item stages
    Flat,
    /// Archived packages: extract and isolate each package first
    LegacyPackage,
}

impl PipelineVariant {
    pub fn from_dialect(dialect: &str) -> Self {
        if dialect.trim().eq_ignore_ascii_case(LEGACY_PACKAGE_DIALECT) {
            PipelineVariant::LegacyPackage
        } else {
            PipelineVariant::Flat
        }
    }

    /// File name prefix of the summary report
    pub fn report_prefix(self) -> &'static str {
        match self {
            PipelineVariant::Flat => "sql_summary",
            PipelineVariant::LegacyPackage => "ssis_summary",
        }
    }

    /// Report columns, in pipeline order
    pub fn stages(self) -> Vec<StageKind> {
        match self {
            PipelineVariant::Flat => StageKind::ALL
                .into_iter()
                .filter(|s| *s != StageKind::Extract)
                .collect(),
            PipelineVariant::LegacyPackage => StageKind::ALL.to_vec(),
        }
    }
}

// ============================================================================
// File Layer
// ============================================================================

/// Per-stage overrides in the config file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StageFile {
    pub enabled: Option<bool>,
    pub ignore_failure: Option<bool>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StagesFile {
    pub analyze: Option<StageFile>,
    pub transpile: Option<StageFile>,
    pub format: Option<StageFile>,
    pub generate_artifact: Option<StageFile>,
    pub publish: Option<StageFile>,
}

impl StagesFile {
    fn get(&self, stage: StageKind) -> Option<&StageFile> {
        match stage {
            StageKind::Analyze => self.analyze.as_ref(),
            StageKind::Transpile => self.transpile.as_ref(),
            StageKind::Format => self.format.as_ref(),
            StageKind::GenerateArtifact => self.generate_artifact.as_ref(),
            StageKind::Publish => self.publish.as_ref(),
            StageKind::Extract => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DateFilterFile {
    pub skip_modified_yesterday: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolFile {
    pub executable: Option<String>,
    pub command_prefix: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PublishFile {
    pub workspace_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FormatFile {
    pub reformat: Option<bool>,
    pub rewrite_rules: Option<Vec<RewriteRule>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PackageFile {
    pub analyze_timeout_secs: Option<u64>,
    pub source_tech: Option<String>,
    pub transpile_dialect: Option<String>,
}

/// Config file contents; every key is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    pub source_path: Option<PathBuf>,
    pub target_path: Option<PathBuf>,
    pub dialect: Option<String>,
    pub profile: Option<String>,
    pub debug: Option<bool>,
    pub run_validation: Option<bool>,
    pub run_analyzer: Option<bool>,
    pub run_transpiler: Option<bool>,
    pub layout: Option<Layout>,
    pub unit_extension: Option<String>,
    pub date_filter: DateFilterFile,
    pub tool: ToolFile,
    pub stages: StagesFile,
    pub publish: PublishFile,
    pub format: FormatFile,
    pub package: PackageFile,
}

impl FileConfig {
    /// Parse YAML config text
    pub fn parse(text: &str) -> Result<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| CliError::configuration(format!("invalid config file: {}", e)))
    }

    /// Load a config file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }
}

/// Fetch the default config text from `url`
pub async fn fetch_default_config(url: &str) -> Result<String> {
    info!(url = %url, "Fetching default configuration");
    let response = reqwest::get(url).await.map_err(|e| {
        CliError::configuration(format!("failed to fetch default config from {}: {}", url, e))
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(CliError::configuration(format!(
            "failed to fetch default config from {}: HTTP {}",
            url, status
        )));
    }

    response.text().await.map_err(|e| {
        CliError::configuration(format!("failed to read default config from {}: {}", url, e))
    })
}

// ============================================================================
// Command-line Layer
// ============================================================================

/// Where the config file comes from
#[derive(Args, Debug, Clone)]
pub struct ConfigSource {
    /// Config file path
    #[arg(short, long, env = "BRIDGERUN_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// URL of the default config, fetched when the config file is missing
    #[arg(long, env = "BRIDGERUN_CONFIG_URL", default_value = DEFAULT_CONFIG_URL)]
    pub config_url: String,

    /// Never fetch the default config
    #[arg(long, env = "BRIDGERUN_OFFLINE")]
    pub offline: bool,
}

impl ConfigSource {
    pub fn new(config: impl Into<PathBuf>) -> Self {
        Self {
            config: config.into(),
            config_url: DEFAULT_CONFIG_URL.to_string(),
            offline: false,
        }
    }

    /// Load the file layer, fetching and saving the default when missing
    ///
    /// Returns `None` only when the file is missing and fetching is disabled.
    pub async fn load(&self) -> Result<Option<FileConfig>> {
        if self.config.exists() {
            debug!(path = %self.config.display(), "Loading config file");
            return FileConfig::load(&self.config).map(Some);
        }

        if self.offline {
            info!(path = %self.config.display(), "Config file not found, continuing without it");
            return Ok(None);
        }

        let text = fetch_default_config(&self.config_url).await?;
        let file = FileConfig::parse(&text)?;

        if let Some(parent) = self.config.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.config, &text)?;
        info!(path = %self.config.display(), "Saved default config");

        Ok(Some(file))
    }
}

/// Command-line overrides for config file values
#[derive(Args, Debug, Clone, Default)]
pub struct CliOverrides {
    /// Source folder or file
    #[arg(long, env = "BRIDGERUN_SOURCE_PATH")]
    pub source_path: Option<PathBuf>,

    /// Output root for converted files, notebooks and reports
    #[arg(long, env = "BRIDGERUN_TARGET_PATH")]
    pub target_path: Option<PathBuf>,

    /// Source dialect ("ssis" runs the package pipeline)
    #[arg(long, env = "BRIDGERUN_DIALECT")]
    pub dialect: Option<String>,

    /// Connection profile passed to the conversion tool
    #[arg(long, env = "BRIDGERUN_PROFILE")]
    pub profile: Option<String>,

    /// Pass --debug to the conversion tool
    #[arg(long, env = "BRIDGERUN_DEBUG")]
    pub debug: bool,

    /// Skip the analyzer stage
    #[arg(long, env = "BRIDGERUN_NO_ANALYZER")]
    pub no_analyzer: bool,

    /// Skip the transpile stage
    #[arg(long, env = "BRIDGERUN_NO_TRANSPILER")]
    pub no_transpiler: bool,

    /// Exclude subfolders modified yesterday
    #[arg(long, env = "BRIDGERUN_SKIP_MODIFIED_YESTERDAY")]
    pub skip_modified_yesterday: bool,

    /// Conversion tool executable
    #[arg(long, value_name = "EXE", env = "BRIDGERUN_TOOL")]
    pub tool: Option<String>,

    /// Source layout: auto, flat or folders
    #[arg(long, env = "BRIDGERUN_LAYOUT")]
    pub layout: Option<Layout>,
}

// ============================================================================
// Prompt Layer
// ============================================================================

/// Supplies values that neither flags nor the file provided
pub trait Prompter {
    /// Ask for `message`; `Ok(None)` means no answer is available
    fn prompt(&self, message: &str, default: Option<&str>) -> Result<Option<String>>;
}

/// Prompts on the terminal with inquire
pub struct InquirePrompter;

impl Prompter for InquirePrompter {
    fn prompt(&self, message: &str, default: Option<&str>) -> Result<Option<String>> {
        let mut text = inquire::Text::new(message);
        if let Some(default) = default {
            text = text.with_default(default);
        }
        let answer = text
            .prompt()
            .map_err(|e| CliError::configuration(format!("prompt failed: {}", e)))?;
        let answer = answer.trim().to_string();
        Ok((!answer.is_empty()).then_some(answer))
    }
}

/// Never answers; missing required values become configuration errors
pub struct NoPrompt;

impl Prompter for NoPrompt {
    fn prompt(&self, _message: &str, _default: Option<&str>) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Interactive prompter when stdin is a terminal, otherwise [`NoPrompt`]
pub fn default_prompter() -> Box<dyn Prompter> {
    if atty::is(atty::Stream::Stdin) {
        Box::new(InquirePrompter)
    } else {
        Box::new(NoPrompt)
    }
}

// ============================================================================
// Resolved Configuration
// ============================================================================

/// How one stage behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSettings {
    pub enabled: bool,
    /// Record failures and keep going instead of aborting the run
    pub ignore_failure: bool,
    /// `None` for local stages that never launch a process
    pub timeout_secs: Option<u64>,
}

impl StageSettings {
    pub fn defaults_for(stage: StageKind) -> Self {
        match stage {
            StageKind::Analyze => Self::external(false),
            StageKind::Transpile | StageKind::Publish => Self::external(true),
            StageKind::Extract | StageKind::Format | StageKind::GenerateArtifact => Self {
                enabled: true,
                ignore_failure: true,
                timeout_secs: None,
            },
        }
    }

    fn external(ignore_failure: bool) -> Self {
        Self {
            enabled: true,
            ignore_failure,
            timeout_secs: Some(DEFAULT_STAGE_TIMEOUT_SECS),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Same settings with a different timeout
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatSettings {
    pub reformat: bool,
    pub rewrite_rules: Vec<RewriteRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageSettings {
    pub analyze_timeout_secs: u64,
    pub source_tech: String,
    pub transpile_dialect: String,
}

/// Fully resolved configuration for one run
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub dialect: String,
    pub variant: PipelineVariant,
    pub run_validation: bool,
    pub run_analyzer: bool,
    pub run_transpiler: bool,
    pub layout: Layout,
    pub unit_extension: String,
    pub skip_modified_yesterday: bool,
    pub tool: ToolProfile,
    pub stages: BTreeMap<StageKind, StageSettings>,
    pub workspace_dir: String,
    pub format: FormatSettings,
    pub package: PackageSettings,
}

impl RunConfig {
    /// Load every layer and resolve
    pub async fn load(
        source: &ConfigSource,
        overrides: &CliOverrides,
        prompter: &dyn Prompter,
    ) -> Result<Self> {
        let file = source.load().await?;
        Self::resolve(overrides, file.unwrap_or_default(), prompter)
    }

    /// Merge the layers and validate the result
    pub fn resolve(
        overrides: &CliOverrides,
        file: FileConfig,
        prompter: &dyn Prompter,
    ) -> Result<Self> {
        let source_path = match overrides.source_path.clone().or(file.source_path) {
            Some(path) => path,
            None => PathBuf::from(require(prompter, "source_path", "Source folder:", None)?),
        };
        let target_path = match overrides.target_path.clone().or(file.target_path) {
            Some(path) => path,
            None => PathBuf::from(require(prompter, "target_path", "Target folder:", None)?),
        };
        let dialect = match overrides.dialect.clone().or(file.dialect) {
            Some(dialect) => dialect,
            None => require(prompter, "dialect", "Source dialect:", Some("synapse"))?,
        };
        let dialect = dialect.trim().to_string();

        let run_analyzer = !overrides.no_analyzer && file.run_analyzer.unwrap_or(true);
        let run_transpiler = !overrides.no_transpiler && file.run_transpiler.unwrap_or(true);

        let mut stages = BTreeMap::new();
        for stage in StageKind::ALL {
            let mut settings = StageSettings::defaults_for(stage);
            if let Some(overlay) = file.stages.get(stage) {
                settings.enabled = overlay.enabled.unwrap_or(settings.enabled);
                settings.ignore_failure = overlay.ignore_failure.unwrap_or(settings.ignore_failure);
                if overlay.timeout_secs.is_some() {
                    settings.timeout_secs = overlay.timeout_secs;
                }
            }
            match stage {
                StageKind::Analyze => settings.enabled &= run_analyzer,
                StageKind::Transpile => settings.enabled &= run_transpiler,
                // Publishing never aborts a run
                StageKind::Publish => settings.ignore_failure = true,
                _ => {},
            }
            stages.insert(stage, settings);
        }

        let tool = ToolProfile {
            executable: overrides
                .tool
                .clone()
                .or(file.tool.executable)
                .unwrap_or_else(|| DEFAULT_TOOL_EXECUTABLE.to_string()),
            command_prefix: file.tool.command_prefix.unwrap_or_else(default_command_prefix),
            profile: overrides.profile.clone().or(file.profile),
            debug: overrides.debug || file.debug.unwrap_or(false),
        };

        let config = Self {
            source_path,
            target_path,
            variant: PipelineVariant::from_dialect(&dialect),
            dialect,
            run_validation: file.run_validation.unwrap_or(true),
            run_analyzer,
            run_transpiler,
            layout: overrides.layout.or(file.layout).unwrap_or_default(),
            unit_extension: file
                .unit_extension
                .unwrap_or_else(|| DEFAULT_UNIT_EXTENSION.to_string()),
            skip_modified_yesterday: overrides.skip_modified_yesterday
                || file.date_filter.skip_modified_yesterday.unwrap_or(false),
            tool,
            stages,
            workspace_dir: file
                .publish
                .workspace_dir
                .unwrap_or_else(|| DEFAULT_WORKSPACE_DIR.to_string()),
            format: FormatSettings {
                reformat: file.format.reformat.unwrap_or(true),
                rewrite_rules: file.format.rewrite_rules.unwrap_or_default(),
            },
            package: PackageSettings {
                analyze_timeout_secs: file
                    .package
                    .analyze_timeout_secs
                    .unwrap_or(DEFAULT_PACKAGE_ANALYZE_TIMEOUT_SECS),
                source_tech: file.package.source_tech.unwrap_or_else(|| "SSIS".to_string()),
                transpile_dialect: file
                    .package
                    .transpile_dialect
                    .unwrap_or_else(|| "synapse".to_string()),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check invariants the rest of the run relies on
    pub fn validate(&self) -> Result<()> {
        if self.dialect.is_empty() {
            return Err(CliError::configuration("dialect must not be empty"));
        }
        if self.tool.executable.trim().is_empty() {
            return Err(CliError::configuration("tool executable must not be empty"));
        }
        if self.unit_extension.trim().is_empty() {
            return Err(CliError::configuration("unit_extension must not be empty"));
        }
        if self.package.analyze_timeout_secs == 0 {
            return Err(CliError::configuration("package.analyze_timeout_secs must be positive"));
        }
        for (stage, settings) in &self.stages {
            if settings.timeout_secs == Some(0) {
                return Err(CliError::configuration(format!(
                    "stages.{}.timeout_secs must be positive",
                    stage
                )));
            }
        }
        Ok(())
    }

    /// Settings for `stage`
    pub fn stage(&self, stage: StageKind) -> StageSettings {
        self.stages
            .get(&stage)
            .copied()
            .unwrap_or_else(|| StageSettings::defaults_for(stage))
    }

    /// Both top-level switches are off
    pub fn nothing_to_run(&self) -> bool {
        !self.run_analyzer && !self.run_transpiler
    }
}

fn require(prompter: &dyn Prompter, key: &str, message: &str, default: Option<&str>) -> Result<String> {
    prompter.prompt(message, default)?.ok_or_else(|| {
        CliError::configuration(format!(
            "'{}' is not set; add it to the config file or pass --{}",
            key,
            key.replace('_', "-")
        ))
    })
}

/// Commented example written by `bridgerun config init`
pub const EXAMPLE_CONFIG: &str = r#"# bridgerun configuration
#
# Every value can be overridden on the command line (see `bridgerun run --help`).

source_path: ./sql
target_path: ./out
# "ssis" runs the package pipeline (.zip / .ispac / .dtsx inputs)
dialect: synapse

# Connection profile and debug flag passed to the conversion tool
# profile: DEFAULT
debug: false

run_validation: true
run_analyzer: true
run_transpiler: true

# auto | flat | folders
layout: auto
unit_extension: sql

date_filter:
  skip_modified_yesterday: false

tool:
  executable: databricks
  command_prefix: [labs, lakebridge]

stages:
  analyze:
    ignore_failure: false
    timeout_secs: 600
  transpile:
    ignore_failure: true
    timeout_secs: 600
  format:
    enabled: true
  generate_artifact:
    enabled: true
  publish:
    enabled: true
    timeout_secs: 600

publish:
  workspace_dir: /Shared

format:
  reformat: true
  rewrite_rules:
    - { from: "edw.", to: "edp_datawarehouse_prd." }

package:
  analyze_timeout_secs: 1800
  source_tech: SSIS
  transpile_dialect: synapse
"#;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Scripted(RefCell<Vec<&'static str>>);

    impl Prompter for Scripted {
        fn prompt(&self, _message: &str, _default: Option<&str>) -> Result<Option<String>> {
            Ok(self.0.borrow_mut().pop().map(str::to_string))
        }
    }

    fn minimal_file() -> FileConfig {
        FileConfig::parse("source_path: ./sql\ntarget_path: ./out\ndialect: synapse\n").unwrap()
    }

    #[test]
    fn test_example_config_parses() {
        let file = FileConfig::parse(EXAMPLE_CONFIG).unwrap();
        assert_eq!(file.dialect.as_deref(), Some("synapse"));
        assert_eq!(file.format.rewrite_rules.as_ref().unwrap().len(), 1);
        assert_eq!(file.stages.transpile.unwrap().ignore_failure, Some(true));
    }

    #[test]
    fn test_defaults() {
        let config = RunConfig::resolve(&CliOverrides::default(), minimal_file(), &NoPrompt).unwrap();
        assert_eq!(config.variant, PipelineVariant::Flat);
        assert_eq!(config.tool.executable, "databricks");
        assert_eq!(config.tool.command_prefix, vec!["labs", "lakebridge"]);
        assert!(!config.stage(StageKind::Analyze).ignore_failure);
        assert_eq!(config.stage(StageKind::Analyze).timeout(), Some(Duration::from_secs(600)));
        assert!(config.stage(StageKind::Transpile).ignore_failure);
        assert_eq!(config.stage(StageKind::Format).timeout(), None);
        assert_eq!(config.package.analyze_timeout_secs, 1800);
        assert!(config.run_validation);
    }

    #[test]
    fn test_cli_overrides_file() {
        let overrides = CliOverrides {
            dialect: Some("SSIS".to_string()),
            no_transpiler: true,
            profile: Some("PROD".to_string()),
            ..Default::default()
        };
        let config = RunConfig::resolve(&overrides, minimal_file(), &NoPrompt).unwrap();
        assert_eq!(config.variant, PipelineVariant::LegacyPackage);
        assert!(!config.run_transpiler);
        assert!(!config.stage(StageKind::Transpile).enabled);
        assert_eq!(config.tool.profile.as_deref(), Some("PROD"));
    }

    #[test]
    fn test_missing_required_without_prompt_is_configuration_error() {
        let file = FileConfig::parse("source_path: ./sql\ndialect: tsql\n").unwrap();
        let err = RunConfig::resolve(&CliOverrides::default(), file, &NoPrompt).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("target_path"));
    }

    #[test]
    fn test_prompt_fills_missing_values() {
        let prompter = Scripted(RefCell::new(vec!["./target"]));
        let file = FileConfig::parse("source_path: ./sql\ndialect: tsql\n").unwrap();
        let config = RunConfig::resolve(&CliOverrides::default(), file, &prompter).unwrap();
        assert_eq!(config.target_path, PathBuf::from("./target"));
    }

    #[test]
    fn test_publish_is_never_fatal() {
        let file = FileConfig::parse(
            "source_path: a\ntarget_path: b\ndialect: c\nstages:\n  publish:\n    ignore_failure: false\n",
        )
        .unwrap();
        let config = RunConfig::resolve(&CliOverrides::default(), file, &NoPrompt).unwrap();
        assert!(config.stage(StageKind::Publish).ignore_failure);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let file = FileConfig::parse(
            "source_path: a\ntarget_path: b\ndialect: c\nstages:\n  analyze:\n    timeout_secs: 0\n",
        )
        .unwrap();
        let err = RunConfig::resolve(&CliOverrides::default(), file, &NoPrompt).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_invalid_yaml_is_configuration_error() {
        let err = FileConfig::parse("source_path: [unclosed").unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_missing_file_offline_has_no_file_layer() {
        let temp = TempDir::new().unwrap();
        let mut source = ConfigSource::new(temp.path().join("config.yaml"));
        source.offline = true;
        assert!(source.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_file_fetches_default() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/config.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(EXAMPLE_CONFIG))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("config.yaml");
        let mut source = ConfigSource::new(&config_path);
        source.config_url = format!("{}/config.yaml", server.uri());

        let file = source.load().await.unwrap().unwrap();
        assert_eq!(file.dialect.as_deref(), Some("synapse"));
        assert!(config_path.exists());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_configuration_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let mut source = ConfigSource::new(temp.path().join("config.yaml"));
        source.config_url = format!("{}/missing.yaml", server.uri());

        let err = source.load().await.unwrap_err();
        assert!(err.is_configuration());
        assert!(!temp.path().join("config.yaml").exists());
    }

    #[tokio::test]
    async fn test_unparsable_default_is_configuration_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("dialect: [oops"))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let mut source = ConfigSource::new(temp.path().join("config.yaml"));
        source.config_url = server.uri();

        assert!(source.load().await.unwrap_err().is_configuration());
    }
}
