//! Stage Runner
//!
//! Runs one external command for one stage. Commands are typed
//! [`Invocation`]s launched through a [`CommandLauncher`], so the pipeline can
//! be driven without spawning processes.
//!
//! A failure is always written to the [`RunLog`] first. The stage's
//! `ignore_failure` flag then decides between a `Failed` outcome and aborting
//! the run with [`CliError::StageFailure`].

use crate::config::StageSettings;
use crate::context::{RunLog, Severity};
use crate::error::{CliError, Result};
use crate::progress;
use async_trait::async_trait;
use bridgerun_common::types::{StageKind, StageOutcome};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

// ============================================================================
// Invocations
// ============================================================================

/// The external conversion tool and its global flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolProfile {
    pub executable: String,
    /// Arguments before the subcommand (`labs lakebridge`)
    pub command_prefix: Vec<String>,
    /// Connection profile, passed as `-p <profile>`
    pub profile: Option<String>,
    /// Pass `--debug`
    pub debug: bool,
}

impl ToolProfile {
    fn profile_flags(&self) -> Vec<String> {
        match &self.profile {
            Some(profile) => vec!["-p".to_string(), profile.clone()],
            None => Vec::new(),
        }
    }

    fn global_flags(&self) -> Vec<String> {
        let mut flags = self.profile_flags();
        if self.debug {
            flags.push("--debug".to_string());
        }
        flags
    }
}

/// One external command for one stage
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub stage: StageKind,
    /// Shown in console output and the run log
    pub title: String,
    pub executable: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
    pub ignore_failure: bool,
}

impl Invocation {
    fn new(stage: StageKind, executable: &str, args: Vec<String>, settings: &StageSettings) -> Self {
        Self {
            stage,
            title: stage.title().to_string(),
            executable: executable.to_string(),
            args,
            timeout: settings.timeout(),
            ignore_failure: settings.ignore_failure,
        }
    }

    /// `<tool> analyze --source-directory P --report-file R --source-tech D`
    pub fn analyze(
        tool: &ToolProfile,
        source_dir: &Path,
        report_file: &Path,
        source_tech: &str,
        settings: &StageSettings,
    ) -> Self {
        let mut args = tool.command_prefix.clone();
        args.extend([
            "analyze".to_string(),
            "--source-directory".to_string(),
            path_arg(source_dir),
            "--report-file".to_string(),
            path_arg(report_file),
            "--source-tech".to_string(),
            source_tech.to_string(),
        ]);
        args.extend(tool.global_flags());
        Self::new(StageKind::Analyze, &tool.executable, args, settings)
    }

    /// `<tool> transpile --input-source P --source-dialect d --output-folder O`
    pub fn transpile(
        tool: &ToolProfile,
        input: &Path,
        dialect: &str,
        output_folder: &Path,
        settings: &StageSettings,
    ) -> Self {
        let mut args = tool.command_prefix.clone();
        args.extend([
            "transpile".to_string(),
            "--input-source".to_string(),
            path_arg(input),
            "--source-dialect".to_string(),
            dialect.to_string(),
            "--output-folder".to_string(),
            path_arg(output_folder),
        ]);
        args.extend(tool.global_flags());
        Self::new(StageKind::Transpile, &tool.executable, args, settings)
    }

    /// `<tool> workspace import <remote path> --file F --language PYTHON --overwrite`
    ///
    /// Always non-fatal.
    pub fn publish(
        tool: &ToolProfile,
        file: &Path,
        remote_path: &str,
        settings: &StageSettings,
    ) -> Self {
        let mut args = vec![
            "workspace".to_string(),
            "import".to_string(),
            remote_path.to_string(),
            "--file".to_string(),
            path_arg(file),
            "--language".to_string(),
            "PYTHON".to_string(),
            "--overwrite".to_string(),
        ];
        args.extend(tool.profile_flags());
        let mut invocation = Self::new(StageKind::Publish, &tool.executable, args, settings);
        invocation.ignore_failure = true;
        invocation
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Value following `flag` in the argument list
    pub fn arg_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Printable command line
    pub fn command_line(&self) -> String {
        let mut line = self.executable.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.contains(' ') {
                line.push_str(&format!("\"{}\"", arg));
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

// ============================================================================
// Launching
// ============================================================================

/// What happened when a command was launched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchResult {
    /// The process ran to completion; `code` is `None` when killed by a signal
    Exited {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    TimedOut { after: Duration },
    SpawnFailed { error: String },
}

/// Launches invocations (dependency injection point for tests)
#[async_trait]
pub trait CommandLauncher: Send + Sync {
    /// Run the invocation to completion or timeout
    async fn launch(&self, invocation: &Invocation) -> LaunchResult;

    /// Fail when `executable` cannot be run at all
    fn check_available(&self, _executable: &str) -> Result<()> {
        Ok(())
    }
}

/// Launches real processes with tokio
#[derive(Debug, Default, Clone)]
pub struct ProcessLauncher;

#[async_trait]
impl CommandLauncher for ProcessLauncher {
    async fn launch(&self, invocation: &Invocation) -> LaunchResult {
        let mut command = tokio::process::Command::new(&invocation.executable);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return LaunchResult::SpawnFailed {
                    error: e.to_string(),
                }
            },
        };

        // Dropping the future on timeout drops the child, which kills it
        let output = match invocation.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output,
                Err(_) => return LaunchResult::TimedOut { after: limit },
            },
            None => child.wait_with_output().await,
        };

        match output {
            Ok(output) => LaunchResult::Exited {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Err(e) => LaunchResult::SpawnFailed {
                error: e.to_string(),
            },
        }
    }

    fn check_available(&self, executable: &str) -> Result<()> {
        locate_tool(executable).map(|path| {
            debug!(tool = %path.display(), "Found conversion tool");
        })
    }
}

/// Find `executable` on `PATH`, or check it directly when it contains a path separator
///
/// Only files the current user can execute are accepted.
pub fn locate_tool(executable: &str) -> Result<PathBuf> {
    which::which(executable).map_err(|e| {
        CliError::configuration(format!("required tool '{}' not found: {}", executable, e))
    })
}

// ============================================================================
// Stage Runner
// ============================================================================

/// Runs invocations and turns launch results into stage outcomes
#[derive(Clone)]
pub struct StageRunner {
    launcher: Arc<dyn CommandLauncher>,
    run_log: RunLog,
}

impl StageRunner {
    pub fn new(launcher: Arc<dyn CommandLauncher>, run_log: RunLog) -> Self {
        Self { launcher, run_log }
    }

    pub fn run_log(&self) -> &RunLog {
        &self.run_log
    }

    /// Check the conversion tool can be launched
    pub fn ensure_tool(&self, executable: &str) -> Result<()> {
        self.launcher.check_available(executable)
    }

    /// Run one invocation
    ///
    /// Returns `Err(StageFailure)` only for failures of fatal stages.
    pub async fn run(&self, invocation: &Invocation) -> Result<StageOutcome> {
        info!(
            stage = %invocation.stage,
            command = %invocation.command_line(),
            "Running {}",
            invocation.title
        );

        let spinner = progress::create_spinner(&invocation.title);
        let result = self.launcher.launch(invocation).await;
        spinner.finish_and_clear();

        let reason = match result {
            LaunchResult::Exited { code: Some(0), .. } => {
                debug!(stage = %invocation.stage, "{} succeeded", invocation.title);
                return Ok(StageOutcome::Success);
            },
            LaunchResult::Exited { code, stdout, stderr } => {
                debug!(stdout = %stdout.trim(), stderr = %stderr.trim(), "{} output", invocation.title);
                match code {
                    Some(code) => format!("exit code {}", code),
                    None => "terminated by signal".to_string(),
                }
            },
            LaunchResult::TimedOut { after } => {
                format!("timed out after {:?}", after)
            },
            LaunchResult::SpawnFailed { error } => format!("failed to launch: {}", error),
        };

        self.record_failure(invocation, &reason)?;

        if invocation.ignore_failure {
            warn!(stage = %invocation.stage, reason = %reason, "{} failed, continuing", invocation.title);
            Ok(StageOutcome::failed(reason))
        } else {
            error!(stage = %invocation.stage, reason = %reason, "{} failed, aborting run", invocation.title);
            Err(CliError::stage_failure(&invocation.title, reason))
        }
    }

    fn record_failure(&self, invocation: &Invocation, reason: &str) -> Result<()> {
        let severity = if invocation.ignore_failure {
            Severity::NonFatal
        } else {
            Severity::Fatal
        };
        self.run_log.append(severity, &invocation.title, reason)
    }
}
