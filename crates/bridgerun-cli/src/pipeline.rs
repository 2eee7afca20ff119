//! Pipeline Controller
//!
//! Sequences the stages of a run and owns its [`Ledger`].
//!
//! # Variants
//!
//! - **Flat**: discovery, then per batch (the root or each subfolder) one
//!   Analyze call for the whole batch, then per item Transpile, Format,
//!   GenerateArtifact and Publish.
//! - **Legacy package**: Extract flattens the package archives, each package
//!   is analyzed alone from a temporary copy, then its SQL companion goes
//!   through the same per-item stages.
//!
//! # Per-item rules
//!
//! Stages run in strict order. A `Failed` outcome stops that item; the cells
//! it never reached are finalized as failed. A disabled stage is recorded
//! `Skipped(stage disabled)` and the item moves on. A stage with nothing to
//! consume is recorded `Skipped(no upstream artifact)`. Only a fatal
//! [`CliError::StageFailure`] stops the whole run, and a partial report is
//! still written before the error is returned.

use crate::config::{PipelineVariant, RunConfig, StageSettings};
use crate::context::{RunContext, Severity};
use crate::error::{CliError, Result};
use crate::ledger::Ledger;
use crate::notebook;
use crate::postprocess::SqlPostProcessor;
use crate::progress;
use crate::report::{Report, ReportPaths};
use crate::runner::{Invocation, StageRunner};
use bridgerun_common::types::{ItemId, SkipReason, StageKind, StageOutcome, WorkItem};
use bridgerun_ingest::discovery::{Batch, Discovery, DiscoveryMode};
use bridgerun_ingest::package::PackageExtractor;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Both top-level stages are disabled; nothing was launched
    NothingToRun,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub report: Option<Report>,
    pub report_paths: Option<ReportPaths>,
    pub warnings: Vec<String>,
}

impl RunSummary {
    fn nothing_to_run() -> Self {
        Self {
            outcome: RunOutcome::NothingToRun,
            report: None,
            report_paths: None,
            warnings: Vec::new(),
        }
    }
}

/// Output folders for one batch
#[derive(Debug, Clone)]
pub struct OutputLayout {
    pub root: PathBuf,
    pub analyzer_dir: PathBuf,
    pub converted_dir: PathBuf,
    pub formatted_dir: PathBuf,
    pub notebooks_dir: PathBuf,
}

impl OutputLayout {
    pub fn new(root: PathBuf) -> Self {
        Self {
            analyzer_dir: root.join("analyzer_output"),
            converted_dir: root.join("converted"),
            formatted_dir: root.join("formatted"),
            notebooks_dir: root.join("notebooks"),
            root,
        }
    }

    /// `<target>` for the root batch, `<target>/<folder>` for a subfolder
    pub fn for_batch(target: &Path, folder: Option<&str>) -> Self {
        match folder {
            Some(folder) => Self::new(target.join(folder)),
            None => Self::new(target.to_path_buf()),
        }
    }
}

/// The file a stage hands to the next one
#[derive(Debug, Clone)]
enum Artifact {
    Sql(PathBuf),
    Notebook(PathBuf),
}

/// Where an item stands after a stage
enum Step {
    Continue(Option<Artifact>),
    Halt,
}

pub struct PipelineController {
    config: RunConfig,
    context: RunContext,
    runner: StageRunner,
    postprocessor: SqlPostProcessor,
    ledger: Ledger,
    warnings: Vec<String>,
}

impl PipelineController {
    pub fn new(config: RunConfig, context: RunContext, runner: StageRunner) -> Self {
        let postprocessor =
            SqlPostProcessor::new(config.format.rewrite_rules.clone(), config.format.reformat);
        Self {
            config,
            context,
            runner,
            postprocessor,
            ledger: Ledger::new(),
            warnings: Vec::new(),
        }
    }

    /// Run every stage and write the report
    pub async fn run(mut self) -> Result<RunSummary> {
        if self.config.nothing_to_run() {
            info!("Analyzer and transpiler are both disabled, nothing to run");
            return Ok(RunSummary::nothing_to_run());
        }

        self.runner.ensure_tool(&self.config.tool.executable)?;

        info!(
            run_id = %self.context.run_id,
            variant = ?self.config.variant,
            source = %self.config.source_path.display(),
            target = %self.config.target_path.display(),
            "Starting run"
        );

        let result = match self.config.variant {
            PipelineVariant::Flat => self.run_flat().await,
            PipelineVariant::LegacyPackage => self.run_packages().await,
        };

        match result {
            Ok(()) => {
                let (report, paths) = self.write_report()?;
                Ok(RunSummary {
                    outcome: RunOutcome::Completed,
                    report: Some(report),
                    report_paths: Some(paths),
                    warnings: self.warnings,
                })
            },
            Err(e @ CliError::StageFailure { .. }) => {
                match self.write_report() {
                    Ok((_, paths)) => {
                        warn!(report = %paths.csv.display(), "Run aborted, partial report written");
                        progress::warning(&format!(
                            "Run aborted; partial report written to {}",
                            paths.csv.display()
                        ));
                    },
                    Err(report_err) => warn!(error = %report_err, "Failed to write partial report"),
                }
                Err(e)
            },
            Err(e) => Err(e),
        }
    }

    fn columns(&self) -> Vec<StageKind> {
        self.config.variant.stages()
    }

    fn disabled_stages(&self) -> BTreeSet<StageKind> {
        self.columns()
            .into_iter()
            .filter(|stage| !self.config.stage(*stage).enabled)
            .collect()
    }

    fn write_report(&self) -> Result<(Report, ReportPaths)> {
        let report = self.ledger.finalize(&self.columns(), &self.disabled_stages());
        let paths = report.write_all(
            &self.context.metadata_dir,
            self.config.variant.report_prefix(),
            &self.context.timestamp,
        )?;
        info!(csv = %paths.csv.display(), rows = report.rows.len(), "Report written");
        Ok((report, paths))
    }

    fn push_warning(&mut self, message: String) {
        warn!("{}", message);
        progress::warning(&message);
        self.warnings.push(message);
    }

    // ========================================================================
    // Flat variant
    // ========================================================================

    async fn run_flat(&mut self) -> Result<()> {
        let mut discovery = Discovery::new(&self.config.source_path, &self.config.unit_extension)
            .layout(self.config.layout);
        if self.config.skip_modified_yesterday {
            if let Some(yesterday) = self.context.yesterday() {
                discovery = discovery.skip_modified_on(yesterday);
            }
        }
        let plan = discovery.scan()?;

        for message in &plan.warnings {
            if self.config.run_validation {
                progress::warning(message);
            }
            self.warnings.push(message.clone());
        }

        for folder in &plan.skipped {
            progress::banner(&format!("{} (skipped: modified yesterday)", folder.name));
            for id in &folder.item_ids {
                for stage in self.columns() {
                    self.ledger
                        .record(id, stage, StageOutcome::skipped(SkipReason::ModifiedYesterday))?;
                }
            }
        }

        // Items of batches a fatal failure never reaches still get a row
        for item in plan.items() {
            self.ledger.observe(&item.id);
        }

        let hashed = plan.mode == DiscoveryMode::PerFolder;
        // The root folder still contains the skipped folders
        let scope_root = !plan.skipped.is_empty();
        for batch in &plan.batches {
            let layout = OutputLayout::for_batch(&self.config.target_path, batch.name.as_deref());
            let mut sub = Ledger::new();
            let result = self.run_batch(batch, &layout, hashed, scope_root, &mut sub).await;
            self.ledger.merge(sub)?;
            result?;
        }
        Ok(())
    }

    async fn run_batch(
        &self,
        batch: &Batch,
        layout: &OutputLayout,
        hashed: bool,
        scope_root: bool,
        ledger: &mut Ledger,
    ) -> Result<()> {
        let label = batch.name.as_deref().unwrap_or("source root");
        progress::banner(&format!("{} ({} items)", label, batch.items.len()));

        for item in &batch.items {
            ledger.observe(&item.id);
        }

        let settings = self.config.stage(StageKind::Analyze);
        let analyzed = if !settings.enabled {
            StageOutcome::skipped(SkipReason::StageDisabled)
        } else {
            std::fs::create_dir_all(&layout.analyzer_dir)?;
            let report_file = layout
                .analyzer_dir
                .join(format!("lakebridge_analysis_{}.xlsx", self.context.timestamp));
            let scoped = match batch.name {
                None if scope_root => Some(self.isolate_batch(batch)?),
                _ => None,
            };
            let source_dir = scoped.as_ref().map(|dir| dir.path()).unwrap_or(batch.dir.as_path());
            let invocation = Invocation::analyze(
                &self.config.tool,
                source_dir,
                &report_file,
                &self.config.dialect,
                &settings,
            )
            .with_title(format!("Analyzer {}", label));

            match self.runner.run(&invocation).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    if let CliError::StageFailure { reason, .. } = &e {
                        for item in &batch.items {
                            ledger.record(&item.id, StageKind::Analyze, StageOutcome::failed(reason))?;
                        }
                    }
                    return Err(e);
                },
            }
        };

        for item in &batch.items {
            ledger.record(&item.id, StageKind::Analyze, analyzed.clone())?;
            progress::print_outcome(StageKind::Analyze, item.id.as_str(), &analyzed);
        }
        if matches!(analyzed, StageOutcome::Failed { .. }) {
            return Ok(());
        }

        for item in &batch.items {
            let artifact = match self.transpile(item, &item.source_path, &self.config.dialect, layout, ledger).await? {
                Step::Continue(artifact) => artifact,
                Step::Halt => continue,
            };
            self.run_downstream(item, &item.file_stem(), artifact, layout, hashed, ledger)
                .await?;
        }
        Ok(())
    }

    /// Copy a batch's units into a temporary directory under the target
    fn isolate_batch(&self, batch: &Batch) -> Result<tempfile::TempDir> {
        std::fs::create_dir_all(&self.config.target_path)?;
        let dir = tempfile::Builder::new()
            .prefix("root_batch_")
            .tempdir_in(&self.config.target_path)?;
        for item in &batch.items {
            std::fs::copy(&item.source_path, dir.path().join(item.file_name()))?;
        }
        debug!(dir = %dir.path().display(), items = batch.items.len(), "Isolated root batch");
        Ok(dir)
    }

    // ========================================================================
    // Legacy package variant
    // ========================================================================

    async fn run_packages(&mut self) -> Result<()> {
        let target = self.config.target_path.clone();
        let extraction_dir = target.join("packages").join(&self.context.timestamp);
        progress::banner("Extract packages");

        let extraction = PackageExtractor::new(&extraction_dir).extract_all(&self.config.source_path)?;

        let mut problem_ids = BTreeSet::new();
        for problem in extraction.problems() {
            let id = unique_id(&problem.input, &mut problem_ids);
            let outcome = StageOutcome::failed(problem.reason.clone());
            self.context
                .run_log
                .append(Severity::NonFatal, &format!("Extract {}", id), &problem.reason)?;
            progress::print_outcome(StageKind::Extract, id.as_str(), &outcome);
            self.ledger.record(&id, StageKind::Extract, outcome)?;
        }

        if extraction.extracted.is_empty() {
            self.push_warning(format!(
                "No packages found in {}",
                self.config.source_path.display()
            ));
        }

        let items: Vec<(WorkItem, String)> = extraction
            .extracted
            .iter()
            .map(|unit| {
                let item = WorkItem::new(ItemId::new(unit.file_name()), unit.path.clone(), None);
                (item, file_stem(Path::new(&unit.base_name())))
            })
            .collect();

        let layout = OutputLayout::new(target);
        for (item, _) in &items {
            self.ledger.record(&item.id, StageKind::Extract, StageOutcome::Success)?;
            progress::print_outcome(StageKind::Extract, item.id.as_str(), &StageOutcome::Success);
        }

        for (item, stem) in &items {
            let mut sub = Ledger::new();
            let result = self.run_package(item, stem, &layout, &mut sub).await;
            self.ledger.merge(sub)?;
            result?;
        }
        Ok(())
    }

    /// `stem` is the package's collision-free base name, used to find its SQL companion
    async fn run_package(
        &self,
        item: &WorkItem,
        stem: &str,
        layout: &OutputLayout,
        ledger: &mut Ledger,
    ) -> Result<()> {
        progress::banner(item.id.as_str());

        let settings = self
            .config
            .stage(StageKind::Analyze)
            .with_timeout_secs(self.config.package.analyze_timeout_secs);
        let analyzed = if !settings.enabled {
            StageOutcome::skipped(SkipReason::StageDisabled)
        } else {
            match self.analyze_package(item, layout, &settings, ledger).await? {
                Some(outcome) => outcome,
                None => return Ok(()),
            }
        };
        self.record(ledger, item, StageKind::Analyze, analyzed.clone())?;
        if matches!(analyzed, StageOutcome::Failed { .. }) {
            return Ok(());
        }

        let companion = self.find_companion(item, stem);
        let (stem, step) = match &companion {
            Some(sql) => {
                let stem = file_stem(sql);
                let dialect = self.config.package.transpile_dialect.clone();
                (stem, self.transpile(item, sql, &dialect, layout, ledger).await?)
            },
            None if !self.config.stage(StageKind::Transpile).enabled => {
                self.record(ledger, item, StageKind::Transpile, StageOutcome::skipped(SkipReason::StageDisabled))?;
                (stem.to_string(), Step::Continue(None))
            },
            None => {
                self.record(
                    ledger,
                    item,
                    StageKind::Transpile,
                    StageOutcome::skipped(SkipReason::NoUpstreamArtifact),
                )?;
                (stem.to_string(), Step::Continue(None))
            },
        };

        match step {
            Step::Continue(artifact) => self.run_downstream(item, &stem, artifact, layout, false, ledger).await,
            Step::Halt => Ok(()),
        }
    }

    /// Analyze one package from an isolated copy
    ///
    /// `None` means the isolation copy failed and was recorded.
    async fn analyze_package(
        &self,
        item: &WorkItem,
        layout: &OutputLayout,
        settings: &StageSettings,
        ledger: &mut Ledger,
    ) -> Result<Option<StageOutcome>> {
        let isolation = match self.isolate(item) {
            Ok(dir) => dir,
            Err(e) => {
                self.item_failed(ledger, item, StageKind::Analyze, &e)?;
                return Ok(None);
            },
        };

        std::fs::create_dir_all(&layout.analyzer_dir)?;
        let report_file = layout.analyzer_dir.join(format!(
            "lakebridge_analysis_{}_{}.xlsx",
            item.file_stem(),
            self.context.timestamp
        ));
        let invocation = Invocation::analyze(
            &self.config.tool,
            isolation.path(),
            &report_file,
            &self.config.package.source_tech,
            settings,
        )
        .with_title(format!("Analyzer {}", item.id));

        let outcome = self.run_stage(item, &invocation, ledger).await?;
        Ok(Some(outcome))
    }

    /// Copy the package into its own temporary directory under the target
    fn isolate(&self, item: &WorkItem) -> Result<tempfile::TempDir> {
        let wrap = |e: std::io::Error| CliError::item_processing(item.id.as_str(), e.to_string());
        std::fs::create_dir_all(&self.config.target_path).map_err(wrap)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("package_{}_", item.file_stem()))
            .tempdir_in(&self.config.target_path)
            .map_err(wrap)?;
        std::fs::copy(&item.source_path, dir.path().join(item.file_name())).map_err(wrap)?;
        Ok(dir)
    }

    /// `<stem>.sql` next to the extracted package, else in the source folder
    fn find_companion(&self, item: &WorkItem, stem: &str) -> Option<PathBuf> {
        let name = format!("{}.sql", stem);
        let mut candidates = Vec::new();
        if let Some(dir) = item.source_path.parent() {
            candidates.push(dir.join(&name));
        }
        if self.config.source_path.is_dir() {
            candidates.push(self.config.source_path.join(&name));
        } else if let Some(dir) = self.config.source_path.parent() {
            candidates.push(dir.join(&name));
        }
        candidates.into_iter().find(|path| path.is_file())
    }

    // ========================================================================
    // Shared per-item stages
    // ========================================================================

    async fn transpile(
        &self,
        item: &WorkItem,
        input: &Path,
        dialect: &str,
        layout: &OutputLayout,
        ledger: &mut Ledger,
    ) -> Result<Step> {
        let settings = self.config.stage(StageKind::Transpile);
        let expected = layout.converted_dir.join(file_name(input));

        if !settings.enabled {
            self.record(ledger, item, StageKind::Transpile, StageOutcome::skipped(SkipReason::StageDisabled))?;
            // Output of an earlier run can still feed the later stages
            return Ok(Step::Continue(expected.is_file().then(|| Artifact::Sql(expected))));
        }

        std::fs::create_dir_all(&layout.converted_dir)?;
        // Output left by an earlier run must not pass for this run's
        if let Err(e) = remove_stale(&expected) {
            self.item_failed(ledger, item, StageKind::Transpile, &e)?;
            return Ok(Step::Halt);
        }
        let invocation = Invocation::transpile(&self.config.tool, input, dialect, &layout.converted_dir, &settings)
            .with_title(format!("Transpile {}", item.id));
        let outcome = self.run_stage(item, &invocation, ledger).await?;
        self.record(ledger, item, StageKind::Transpile, outcome.clone())?;

        if !outcome.is_success() {
            return Ok(Step::Halt);
        }
        if expected.is_file() {
            Ok(Step::Continue(Some(Artifact::Sql(expected))))
        } else {
            warn!(item = %item.id, expected = %expected.display(), "Transpile produced no output");
            Ok(Step::Continue(None))
        }
    }

    async fn run_downstream(
        &self,
        item: &WorkItem,
        stem: &str,
        artifact: Option<Artifact>,
        layout: &OutputLayout,
        hashed: bool,
        ledger: &mut Ledger,
    ) -> Result<()> {
        let artifact = match self.format(item, artifact, layout, ledger)? {
            Step::Continue(artifact) => artifact,
            Step::Halt => return Ok(()),
        };

        let notebook_name = notebook::notebook_file_name(item, stem, hashed);
        let artifact = match self.generate_artifact(item, artifact, layout, &notebook_name, ledger)? {
            Step::Continue(artifact) => artifact,
            Step::Halt => return Ok(()),
        };

        self.publish(item, artifact, &notebook_name, ledger).await
    }

    fn format(
        &self,
        item: &WorkItem,
        artifact: Option<Artifact>,
        layout: &OutputLayout,
        ledger: &mut Ledger,
    ) -> Result<Step> {
        if !self.config.stage(StageKind::Format).enabled {
            self.record(ledger, item, StageKind::Format, StageOutcome::skipped(SkipReason::StageDisabled))?;
            return Ok(Step::Continue(artifact));
        }

        let Some(Artifact::Sql(input)) = artifact else {
            self.record(ledger, item, StageKind::Format, StageOutcome::skipped(SkipReason::NoUpstreamArtifact))?;
            return Ok(Step::Continue(None));
        };

        match self.postprocessor.format_file(&input, &layout.formatted_dir) {
            Ok(output) => {
                self.record(ledger, item, StageKind::Format, StageOutcome::Success)?;
                Ok(Step::Continue(Some(Artifact::Sql(output))))
            },
            Err(e) => {
                self.item_failed(ledger, item, StageKind::Format, &e)?;
                Ok(Step::Halt)
            },
        }
    }

    fn generate_artifact(
        &self,
        item: &WorkItem,
        artifact: Option<Artifact>,
        layout: &OutputLayout,
        notebook_name: &str,
        ledger: &mut Ledger,
    ) -> Result<Step> {
        let output = layout.notebooks_dir.join(notebook_name);

        if !self.config.stage(StageKind::GenerateArtifact).enabled {
            self.record(
                ledger,
                item,
                StageKind::GenerateArtifact,
                StageOutcome::skipped(SkipReason::StageDisabled),
            )?;
            return Ok(Step::Continue(output.is_file().then(|| Artifact::Notebook(output))));
        }

        let Some(Artifact::Sql(input)) = artifact else {
            self.record(
                ledger,
                item,
                StageKind::GenerateArtifact,
                StageOutcome::skipped(SkipReason::NoUpstreamArtifact),
            )?;
            return Ok(Step::Continue(None));
        };

        match notebook::write_notebook(&input, &output) {
            Ok(()) => {
                self.record(ledger, item, StageKind::GenerateArtifact, StageOutcome::Success)?;
                Ok(Step::Continue(Some(Artifact::Notebook(output))))
            },
            Err(e) => {
                self.item_failed(ledger, item, StageKind::GenerateArtifact, &e)?;
                Ok(Step::Halt)
            },
        }
    }

    async fn publish(
        &self,
        item: &WorkItem,
        artifact: Option<Artifact>,
        notebook_name: &str,
        ledger: &mut Ledger,
    ) -> Result<()> {
        let settings = self.config.stage(StageKind::Publish);
        if !settings.enabled {
            return self.record(ledger, item, StageKind::Publish, StageOutcome::skipped(SkipReason::StageDisabled));
        }

        let Some(Artifact::Notebook(notebook)) = artifact else {
            return self.record(
                ledger,
                item,
                StageKind::Publish,
                StageOutcome::skipped(SkipReason::NoUpstreamArtifact),
            );
        };

        let remote = format!(
            "{}/{}",
            self.config.workspace_dir.trim_end_matches('/'),
            notebook_name
        );
        let invocation = Invocation::publish(&self.config.tool, &notebook, &remote, &settings)
            .with_title(format!("Publish {}", item.id));
        let outcome = self.run_stage(item, &invocation, ledger).await?;
        self.record(ledger, item, StageKind::Publish, outcome)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Run an invocation, recording the failure cell before a fatal abort
    async fn run_stage(&self, item: &WorkItem, invocation: &Invocation, ledger: &mut Ledger) -> Result<StageOutcome> {
        match self.runner.run(invocation).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if let CliError::StageFailure { reason, .. } = &e {
                    self.record(ledger, item, invocation.stage, StageOutcome::failed(reason))?;
                }
                Err(e)
            },
        }
    }

    fn record(&self, ledger: &mut Ledger, item: &WorkItem, stage: StageKind, outcome: StageOutcome) -> Result<()> {
        progress::print_outcome(stage, item.id.as_str(), &outcome);
        ledger.record(&item.id, stage, outcome)?;
        Ok(())
    }

    /// Record an item-level error; the run continues
    fn item_failed(&self, ledger: &mut Ledger, item: &WorkItem, stage: StageKind, error: &CliError) -> Result<()> {
        let reason = match error {
            CliError::ItemProcessing { reason, .. } => reason.clone(),
            other => other.to_string(),
        };
        warn!(item = %item.id, stage = %stage, reason = %reason, "Item failed");
        self.runner
            .run_log()
            .append(Severity::NonFatal, &format!("{} {}", stage.title(), item.id), &reason)?;
        self.record(ledger, item, stage, StageOutcome::failed(reason))
    }
}

/// Remove a previous output file, if there is one
fn remove_stale(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed stale output");
            Ok(())
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// `label`, or `label (n)` for the first n >= 2 not yet in `used`
fn unique_id(label: &str, used: &mut BTreeSet<String>) -> ItemId {
    let mut candidate = label.to_string();
    let mut n = 2;
    while used.contains(&candidate) {
        candidate = format!("{} ({})", label, n);
        n += 1;
    }
    used.insert(candidate.clone());
    ItemId::new(candidate)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::{CliOverrides, FileConfig, NoPrompt};
    use crate::runner::{CommandLauncher, LaunchResult};
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Launcher double: records invocations, copies transpile inputs to the
    /// output folder, and fails invocations whose title contains a marker.
    #[derive(Default)]
    struct ScriptedLauncher {
        calls: Mutex<Vec<Invocation>>,
        fail_marker: Option<String>,
        skip_output_for: Option<String>,
    }

    impl ScriptedLauncher {
        fn failing(marker: &str) -> Self {
            Self {
                fail_marker: Some(marker.to_string()),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<Invocation> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, stage: StageKind) -> usize {
            self.calls().iter().filter(|c| c.stage == stage).count()
        }
    }

    #[async_trait]
    impl CommandLauncher for ScriptedLauncher {
        async fn launch(&self, invocation: &Invocation) -> LaunchResult {
            self.calls.lock().unwrap().push(invocation.clone());

            if let Some(marker) = &self.fail_marker {
                if invocation.title.contains(marker.as_str()) {
                    return LaunchResult::Exited {
                        code: Some(1),
                        stdout: String::new(),
                        stderr: "conversion error".to_string(),
                    };
                }
            }

            if invocation.stage == StageKind::Transpile {
                let input = PathBuf::from(invocation.arg_value("--input-source").unwrap());
                let output = PathBuf::from(invocation.arg_value("--output-folder").unwrap());
                let name = input.file_name().unwrap().to_owned();
                let skip = self
                    .skip_output_for
                    .as_deref()
                    .map(|s| name.to_string_lossy() == s)
                    .unwrap_or(false);
                if !skip {
                    std::fs::copy(&input, output.join(name)).unwrap();
                }
            }

            LaunchResult::Exited {
                code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            }
        }
    }

    struct Fixture {
        _temp: TempDir,
        source: PathBuf,
        target: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let source = temp.path().join("src");
            let target = temp.path().join("out");
            std::fs::create_dir_all(&source).unwrap();
            Self {
                _temp: temp,
                source,
                target,
            }
        }

        fn sql(&self, relative: &str) {
            let path = self.source.join(relative);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, "select 1").unwrap();
        }

        fn config(&self, dialect: &str, extra: &str) -> RunConfig {
            let yaml = format!(
                "source_path: {}\ntarget_path: {}\ndialect: {}\n{}",
                self.source.display(),
                self.target.display(),
                dialect,
                extra
            );
            RunConfig::resolve(&CliOverrides::default(), FileConfig::parse(&yaml).unwrap(), &NoPrompt).unwrap()
        }

        fn controller(&self, config: RunConfig, launcher: Arc<ScriptedLauncher>) -> PipelineController {
            self.controller_at(config, launcher, chrono::Local::now())
        }

        fn controller_at(
            &self,
            config: RunConfig,
            launcher: Arc<ScriptedLauncher>,
            started_at: chrono::DateTime<chrono::Local>,
        ) -> PipelineController {
            let context = RunContext::at(&self.target, started_at).unwrap();
            let runner = StageRunner::new(launcher, context.run_log.clone());
            PipelineController::new(config, context, runner)
        }
    }

    fn id(s: &str) -> ItemId {
        ItemId::new(s)
    }

    #[tokio::test]
    async fn test_transpile_failure_is_isolated() {
        let fx = Fixture::new();
        fx.sql("a.sql");
        fx.sql("b.sql");
        fx.sql("c.sql");

        let launcher = Arc::new(ScriptedLauncher::failing("Transpile b.sql"));
        let summary = fx
            .controller(fx.config("synapse", ""), launcher.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(summary.outcome, RunOutcome::Completed);
        let report = summary.report.unwrap();
        assert_eq!(report.rows.len(), 3);

        for name in ["a.sql", "b.sql", "c.sql"] {
            assert_eq!(report.cell(&id(name), StageKind::Analyze), Some(&StageOutcome::Success));
        }
        assert_eq!(report.cell(&id("a.sql"), StageKind::Transpile), Some(&StageOutcome::Success));
        assert_eq!(report.cell(&id("c.sql"), StageKind::Transpile), Some(&StageOutcome::Success));
        assert_eq!(
            report.cell(&id("b.sql"), StageKind::Transpile),
            Some(&StageOutcome::failed("exit code 1"))
        );
        assert_eq!(
            report.cell(&id("b.sql"), StageKind::Publish),
            Some(&StageOutcome::failed(crate::ledger::NOT_REACHED))
        );
        assert_eq!(report.cell(&id("a.sql"), StageKind::Publish), Some(&StageOutcome::Success));

        // One batch analyze, one transpile per item, publish for the two survivors
        assert_eq!(launcher.count(StageKind::Analyze), 1);
        assert_eq!(launcher.count(StageKind::Transpile), 3);
        assert_eq!(launcher.count(StageKind::Publish), 2);

        let paths = summary.report_paths.unwrap();
        assert!(paths.csv.file_name().unwrap().to_string_lossy().starts_with("sql_summary_"));
        assert!(fx.target.join("notebooks").join("a.py").exists());
        assert!(fx.target.join("formatted").join("c.sql").exists());
    }

    #[tokio::test]
    async fn test_nothing_to_run_launches_nothing() {
        let fx = Fixture::new();
        fx.sql("a.sql");

        let launcher = Arc::new(ScriptedLauncher::default());
        let config = fx.config("synapse", "run_analyzer: false\nrun_transpiler: false\n");
        let summary = fx.controller(config, launcher.clone()).run().await.unwrap();

        assert_eq!(summary.outcome, RunOutcome::NothingToRun);
        assert!(summary.report.is_none());
        assert!(launcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_fatal_analyze_writes_partial_report() {
        let fx = Fixture::new();
        fx.sql("a.sql");
        fx.sql("b.sql");

        let launcher = Arc::new(ScriptedLauncher::failing("Analyzer"));
        let controller = fx.controller(fx.config("synapse", ""), launcher.clone());
        let metadata = controller.context.metadata_dir.clone();
        let run_log = controller.context.run_log.path().to_path_buf();

        let err = controller.run().await.unwrap_err();
        assert!(matches!(err, CliError::StageFailure { .. }));
        assert_eq!(launcher.count(StageKind::Transpile), 0);

        let csv = std::fs::read_dir(&metadata)
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.extension().map(|e| e == "csv").unwrap_or(false))
            .unwrap();
        let content = std::fs::read_to_string(csv).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.contains("a.sql,Failed,Failed"));

        let log = std::fs::read_to_string(run_log).unwrap();
        assert!(log.contains("[FATAL] Analyzer source root: exit code 1"));
    }

    #[tokio::test]
    async fn test_disabled_analyzer_is_skipped_not_omitted() {
        let fx = Fixture::new();
        fx.sql("a.sql");

        let launcher = Arc::new(ScriptedLauncher::default());
        let config = fx.config("synapse", "run_analyzer: false\n");
        let report = fx.controller(config, launcher.clone()).run().await.unwrap().report.unwrap();

        assert_eq!(
            report.cell(&id("a.sql"), StageKind::Analyze),
            Some(&StageOutcome::skipped(SkipReason::StageDisabled))
        );
        assert_eq!(report.cell(&id("a.sql"), StageKind::Transpile), Some(&StageOutcome::Success));
        assert_eq!(launcher.count(StageKind::Analyze), 0);
    }

    #[tokio::test]
    async fn test_missing_transpile_output_skips_downstream() {
        let fx = Fixture::new();
        fx.sql("a.sql");

        let launcher = Arc::new(ScriptedLauncher {
            skip_output_for: Some("a.sql".to_string()),
            ..Default::default()
        });
        let report = fx
            .controller(fx.config("synapse", ""), launcher.clone())
            .run()
            .await
            .unwrap()
            .report
            .unwrap();

        assert_eq!(report.cell(&id("a.sql"), StageKind::Transpile), Some(&StageOutcome::Success));
        for stage in [StageKind::Format, StageKind::GenerateArtifact, StageKind::Publish] {
            assert_eq!(
                report.cell(&id("a.sql"), stage),
                Some(&StageOutcome::skipped(SkipReason::NoUpstreamArtifact))
            );
        }
        assert_eq!(launcher.count(StageKind::Publish), 0);
    }

    #[tokio::test]
    async fn test_per_folder_mode_hashes_notebooks_and_merges() {
        let fx = Fixture::new();
        fx.sql("sales/orders.sql");
        fx.sql("finance/orders.sql");

        let launcher = Arc::new(ScriptedLauncher::default());
        let config = fx.config("synapse", "stages:\n  publish:\n    enabled: false\n");
        let report = fx.controller(config, launcher.clone()).run().await.unwrap().report.unwrap();

        assert_eq!(report.rows.len(), 2);
        assert_eq!(launcher.count(StageKind::Analyze), 2);
        assert_eq!(
            report.cell(&id("sales/orders.sql"), StageKind::Publish),
            Some(&StageOutcome::skipped(SkipReason::StageDisabled))
        );

        let sales_notebooks: Vec<_> = std::fs::read_dir(fx.target.join("sales").join("notebooks"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(sales_notebooks.len(), 1);
        assert!(sales_notebooks[0].starts_with("orders_"));
        assert!(fx.target.join("finance").join("converted").join("orders.sql").exists());
    }

    #[tokio::test]
    async fn test_fatal_abort_keeps_rows_for_unreached_batches() {
        let fx = Fixture::new();
        fx.sql("finance/a.sql");
        fx.sql("sales/b.sql");

        let launcher = Arc::new(ScriptedLauncher::failing("Analyzer finance"));
        let controller = fx.controller(fx.config("synapse", ""), launcher.clone());
        let metadata = controller.context.metadata_dir.clone();

        assert!(controller.run().await.is_err());
        assert_eq!(launcher.count(StageKind::Analyze), 1);

        let csv = std::fs::read_dir(&metadata)
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.extension().map(|e| e == "csv").unwrap_or(false))
            .unwrap();
        let content = std::fs::read_to_string(csv).unwrap();
        assert!(content.contains("finance/a.sql,Failed,Failed"));
        assert!(content.contains("sales/b.sql,Failed,Failed"));
        assert!(content.contains("analyze: not reached"));
    }

    #[tokio::test]
    async fn test_modified_yesterday_folder_rows_are_skipped() {
        let fx = Fixture::new();
        fx.sql("fresh/a.sql");
        fx.sql("old/b.sql");

        let launcher = Arc::new(ScriptedLauncher::default());
        let config = fx.config("synapse", "date_filter:\n  skip_modified_yesterday: true\n");
        let controller = fx.controller(config, launcher.clone());

        // Backdate "old" to the day before the run
        let yesterday = controller.context.started_at - chrono::Duration::days(1);
        let file = std::fs::File::open(fx.source.join("old")).unwrap();
        file.set_modified(yesterday.into()).unwrap();

        let report = controller.run().await.unwrap().report.unwrap();
        assert_eq!(report.rows.len(), 2);
        for stage in report.columns.clone() {
            assert_eq!(
                report.cell(&id("old/b.sql"), stage),
                Some(&StageOutcome::skipped(SkipReason::ModifiedYesterday))
            );
        }
        assert_eq!(report.cell(&id("fresh/a.sql"), StageKind::Transpile), Some(&StageOutcome::Success));
        assert!(launcher
            .calls()
            .iter()
            .all(|c| !c.args.iter().any(|a| a.contains("/old/") || a.ends_with("/old"))));
    }

    #[tokio::test]
    async fn test_root_batch_analyze_excludes_skipped_folder() {
        let fx = Fixture::new();
        fx.sql("top.sql");
        fx.sql("old/b.sql");

        let launcher = Arc::new(ScriptedLauncher::default());
        let config = fx.config("synapse", "date_filter:\n  skip_modified_yesterday: true\n");
        let controller = fx.controller(config, launcher.clone());

        let yesterday = controller.context.started_at - chrono::Duration::days(1);
        let file = std::fs::File::open(fx.source.join("old")).unwrap();
        file.set_modified(yesterday.into()).unwrap();

        let report = controller.run().await.unwrap().report.unwrap();
        assert_eq!(report.cell(&id("top.sql"), StageKind::Analyze), Some(&StageOutcome::Success));
        assert_eq!(
            report.cell(&id("old/b.sql"), StageKind::Analyze),
            Some(&StageOutcome::skipped(SkipReason::ModifiedYesterday))
        );

        let analyses: Vec<_> = launcher
            .calls()
            .into_iter()
            .filter(|c| c.stage == StageKind::Analyze)
            .collect();
        assert_eq!(analyses.len(), 1);
        let scoped = PathBuf::from(analyses[0].arg_value("--source-directory").unwrap());
        assert_ne!(scoped, fx.source);
        assert!(scoped.starts_with(&fx.target));
        assert!(!scoped.exists());
    }

    fn ispac(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer.start_file(*name, zip::write::FileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn test_legacy_package_pipeline() {
        let fx = Fixture::new();
        let package = ispac(&[("Load.dtsx", &b"<load/>"[..]), ("Clean.dtsx", &b"<clean/>"[..])]);
        let outer = ispac(&[("Sales.ispac", package.as_slice())]);
        std::fs::write(fx.source.join("release.zip"), outer).unwrap();
        std::fs::write(fx.source.join("Sales_Load.sql"), "select 1").unwrap();

        let launcher = Arc::new(ScriptedLauncher::default());
        let summary = fx
            .controller(fx.config("SSIS", ""), launcher.clone())
            .run()
            .await
            .unwrap();
        let report = summary.report.unwrap();

        assert_eq!(report.columns[0], StageKind::Extract);
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.cell(&id("Sales_Load.dtsx"), StageKind::Extract), Some(&StageOutcome::Success));
        assert_eq!(report.cell(&id("Sales_Load.dtsx"), StageKind::Publish), Some(&StageOutcome::Success));
        assert_eq!(
            report.cell(&id("Sales_Clean.dtsx"), StageKind::Transpile),
            Some(&StageOutcome::skipped(SkipReason::NoUpstreamArtifact))
        );
        assert_eq!(
            report.cell(&id("Sales_Clean.dtsx"), StageKind::Publish),
            Some(&StageOutcome::skipped(SkipReason::NoUpstreamArtifact))
        );

        let analyses: Vec<_> = launcher
            .calls()
            .into_iter()
            .filter(|c| c.stage == StageKind::Analyze)
            .collect();
        assert_eq!(analyses.len(), 2);
        assert_eq!(analyses[0].arg_value("--source-tech"), Some("SSIS"));
        assert_eq!(analyses[0].timeout, Some(std::time::Duration::from_secs(1800)));
        // Isolation directories are removed after each package
        let leftovers = std::fs::read_dir(&fx.target)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with("package_"))
            .count();
        assert_eq!(leftovers, 0);

        let paths = summary.report_paths.unwrap();
        assert!(paths.csv.file_name().unwrap().to_string_lossy().starts_with("ssis_summary_"));
    }

    #[tokio::test]
    async fn test_invalid_package_gets_failed_row() {
        let fx = Fixture::new();
        let outer = ispac(&[("Broken.ispac", &b"not a zip"[..])]);
        std::fs::write(fx.source.join("bundle.zip"), outer).unwrap();

        let launcher = Arc::new(ScriptedLauncher::default());
        let report = fx
            .controller(fx.config("ssis", ""), launcher.clone())
            .run()
            .await
            .unwrap()
            .report
            .unwrap();

        assert_eq!(report.rows.len(), 1);
        let row = &report.rows[0];
        assert_eq!(row.item.as_str(), "bundle.zip/Broken.ispac");
        assert!(matches!(row.cells[0], StageOutcome::Failed { .. }));
        assert!(launcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stale_transpile_output_is_not_reused() {
        let fx = Fixture::new();
        fx.sql("a.sql");
        let config = fx.config("synapse", "");

        let first = Arc::new(ScriptedLauncher::default());
        fx.controller(config.clone(), first).run().await.unwrap();
        assert!(fx.target.join("converted").join("a.sql").exists());

        // Second run: the tool exits 0 but writes nothing
        let second = Arc::new(ScriptedLauncher {
            skip_output_for: Some("a.sql".to_string()),
            ..Default::default()
        });
        let later = chrono::Local::now() + chrono::Duration::minutes(1);
        let report = fx
            .controller_at(config, second.clone(), later)
            .run()
            .await
            .unwrap()
            .report
            .unwrap();

        assert_eq!(report.cell(&id("a.sql"), StageKind::Transpile), Some(&StageOutcome::Success));
        for stage in [StageKind::Format, StageKind::GenerateArtifact, StageKind::Publish] {
            assert_eq!(
                report.cell(&id("a.sql"), stage),
                Some(&StageOutcome::skipped(SkipReason::NoUpstreamArtifact))
            );
        }
        assert_eq!(second.count(StageKind::Publish), 0);
        assert!(!fx.target.join("converted").join("a.sql").exists());
    }

    #[tokio::test]
    async fn test_fatal_transpile_aborts_with_partial_report() {
        let fx = Fixture::new();
        fx.sql("a.sql");
        fx.sql("b.sql");

        let launcher = Arc::new(ScriptedLauncher::failing("Transpile a.sql"));
        let config = fx.config("synapse", "stages:\n  transpile:\n    ignore_failure: false\n");
        let controller = fx.controller(config, launcher.clone());
        let metadata = controller.context.metadata_dir.clone();

        let err = controller.run().await.unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_STAGE_FAILURE);
        assert_eq!(launcher.count(StageKind::Transpile), 1);
        assert_eq!(launcher.count(StageKind::Publish), 0);

        let csv = std::fs::read_dir(&metadata)
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.extension().map(|e| e == "csv").unwrap_or(false))
            .unwrap();
        let content = std::fs::read_to_string(csv).unwrap();
        assert!(content.contains("a.sql,Success,Failed,Failed"));
        assert!(content.contains("b.sql,Success,Failed"));
    }

    #[tokio::test]
    async fn test_legacy_rerun_keeps_companion() {
        let fx = Fixture::new();
        let package = ispac(&[("Load.dtsx", &b"<load/>"[..])]);
        let outer = ispac(&[("Sales.ispac", package.as_slice())]);
        std::fs::write(fx.source.join("release.zip"), outer).unwrap();
        std::fs::write(fx.source.join("Sales_Load.sql"), "select 1").unwrap();
        let config = fx.config("ssis", "");

        let started = chrono::Local::now();
        let runs = [
            started,
            started + chrono::Duration::minutes(1),
            // Same second as the previous run: extraction falls back to a suffixed name
            started + chrono::Duration::minutes(1),
        ];
        let mut ids = Vec::new();
        for started_at in runs {
            let launcher = Arc::new(ScriptedLauncher::default());
            let report = fx
                .controller_at(config.clone(), launcher, started_at)
                .run()
                .await
                .unwrap()
                .report
                .unwrap();
            assert_eq!(report.rows.len(), 1);
            let row = &report.rows[0];
            assert!(
                row.cells.iter().all(|c| *c == StageOutcome::Success),
                "{}: {:?}",
                row.item,
                row.cells
            );
            ids.push(row.item.to_string());
        }

        assert_eq!(ids, vec!["Sales_Load.dtsx", "Sales_Load.dtsx", "Sales_1_Load.dtsx"]);
        let extraction_dirs = std::fs::read_dir(fx.target.join("packages")).unwrap().count();
        assert_eq!(extraction_dirs, 2);
    }

    #[test]
    fn test_unique_id_suffixes_repeated_labels() {
        let mut used = BTreeSet::new();
        assert_eq!(unique_id("bundle.zip/Broken.ispac", &mut used).as_str(), "bundle.zip/Broken.ispac");
        assert_eq!(unique_id("bundle.zip/Broken.ispac", &mut used).as_str(), "bundle.zip/Broken.ispac (2)");
        assert_eq!(unique_id("bundle.zip/Broken.ispac", &mut used).as_str(), "bundle.zip/Broken.ispac (3)");
        assert_eq!(unique_id("other.zip", &mut used).as_str(), "other.zip");

        // The suffixed ids record without tripping the ledger's duplicate check
        let mut ledger = Ledger::new();
        for label in used {
            ledger
                .record(&ItemId::new(label), StageKind::Extract, StageOutcome::failed("invalid package"))
                .unwrap();
        }
        assert_eq!(ledger.len(), 4);
    }
}
