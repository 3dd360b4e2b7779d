//! Classify runs as complete, running or stalled from their plot files and the job queue.

use crate::cfg::CommandConfig;
use crate::exec::{CommandRunner, ExecError, Invocation};
use crate::run::{file_names, latest_file, RunDir, RunLayout};
use crate::scheduler::{QueueSnapshot, Scheduler};
use anyhow::{Context, Result};
use camino::{Utf8Path as Path, Utf8PathBuf as PathBuf};
use log::{debug, info, warn};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("`{command}` printed no number of years: `{output}`")]
    UnparsableYears { command: String, output: String },
}

/// Runs a command that prints the model time stored in a plot file.
pub struct TimeExtractor {
    command: CommandConfig,
    envs: Vec<(String, String)>,
}

impl TimeExtractor {
    pub fn new(command: CommandConfig, envs: Vec<(String, String)>) -> Self {
        Self { command, envs }
    }

    pub fn years(&self, runner: &dyn CommandRunner, plot_file: &Path) -> Result<f64, ProgressError> {
        let invocation = Invocation::new(&self.command.program)
            .args(&self.command.args)
            .arg(plot_file.as_str())
            .envs(&self.envs);
        let output = runner.checked_output(&invocation)?;

        // MPI-enabled readers may print banners first; the time is the last line
        let last_line = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .unwrap_or("");
        last_line
            .parse::<f64>()
            .ok()
            .filter(|years| years.is_finite())
            .ok_or_else(|| ProgressError::UnparsableYears {
                command: invocation.to_string(),
                output: last_line.to_owned(),
            })
    }
}

/// What the filesystem says about a run.
#[derive(Clone, Debug, PartialEq)]
pub enum Observation {
    NoPlotDir,
    EmptyPlotDir,
    Progress { latest: PathBuf, years: f64 },
    Unreadable { latest: PathBuf, reason: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum RunStatus {
    NoPlotDir,
    EmptyPlotDir,
    Complete,
    Running { years: f64 },
    Stalled { years: f64 },
    Unknown { latest: PathBuf, reason: String },
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::NoPlotDir => write!(f, "no plot directory found."),
            RunStatus::EmptyPlotDir => write!(f, "plot directory is empty."),
            RunStatus::Complete => write!(f, "complete."),
            RunStatus::Running { years } => {
                write!(f, "running... {} years done so far.", format_years(*years))
            }
            RunStatus::Stalled { .. } => write!(f, "not completed but also not running."),
            RunStatus::Unknown { latest, reason } => {
                write!(f, "could not read progress from {latest}: {reason}")
            }
        }
    }
}

fn format_years(years: f64) -> String {
    format!("{}", (years * 100.0).round() / 100.0)
}

/// Decides a run's status; the same inputs always give the same status.
pub fn classify(
    observation: &Observation,
    completion_years: f64,
    queue: &QueueSnapshot,
    job_name: &str,
) -> RunStatus {
    match observation {
        Observation::NoPlotDir => RunStatus::NoPlotDir,
        Observation::EmptyPlotDir => RunStatus::EmptyPlotDir,
        Observation::Unreadable { latest, reason } => RunStatus::Unknown {
            latest: latest.clone(),
            reason: reason.clone(),
        },
        Observation::Progress { years, .. } if *years >= completion_years => RunStatus::Complete,
        Observation::Progress { years, .. } if queue.contains_job(job_name) => {
            RunStatus::Running { years: *years }
        }
        Observation::Progress { years, .. } => RunStatus::Stalled { years: *years },
    }
}

pub fn observe(
    run: &RunDir,
    layout: &RunLayout,
    extractor: &TimeExtractor,
    runner: &dyn CommandRunner,
) -> Result<Observation> {
    let plot_dir = run.plot_dir(layout);
    if !plot_dir.is_dir() {
        return Ok(Observation::NoPlotDir);
    }

    let names = file_names(&plot_dir)?;
    let latest = match latest_file(&names) {
        Some(latest) => plot_dir.join(latest),
        None => return Ok(Observation::EmptyPlotDir),
    };

    debug!("{run}: latest plot file is {latest}");
    Ok(match extractor.years(runner, &latest) {
        Ok(years) => Observation::Progress { latest, years },
        Err(err) => {
            warn!("{run}: {err}");
            Observation::Unreadable {
                latest,
                reason: format!("{:#}", anyhow::Error::from(err)),
            }
        }
    })
}

pub struct RunReport {
    pub run: RunDir,
    pub status: RunStatus,
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.run, self.status)
    }
}

pub struct ProgressCheck<'a> {
    pub layout: &'a RunLayout,
    pub completion_years: f64,
    pub extractor: &'a TimeExtractor,
    pub scheduler: &'a dyn Scheduler,
    pub runner: &'a dyn CommandRunner,
}

impl ProgressCheck<'_> {
    /// One report per run under `target`, in name order.
    ///
    /// The queue is listed at most once, and only when some run is neither
    /// finished nor without output.
    pub fn run(&self, target: &Path) -> Result<Vec<RunReport>> {
        let runs = crate::run::resolve_runs(target, self.layout)?;
        if runs.is_empty() {
            info!("no run directories found in {target}");
        }

        let mut queue: Option<QueueSnapshot> = None;
        let mut reports = Vec::with_capacity(runs.len());
        for run in runs {
            let observation = observe(&run, self.layout, self.extractor, self.runner)?;

            let needs_queue = matches!(
                observation,
                Observation::Progress { years, .. } if years < self.completion_years
            );
            if needs_queue && queue.is_none() {
                queue = Some(self.snapshot()?);
            }

            let status = classify(
                &observation,
                self.completion_years,
                queue.as_ref().unwrap_or(&QueueSnapshot::default()),
                &run.job_name(self.layout),
            );
            reports.push(RunReport { run, status });
        }

        Ok(reports)
    }

    fn snapshot(&self) -> Result<QueueSnapshot> {
        let snapshot = self
            .scheduler
            .queue(self.runner)
            .with_context(|| format!("failed to list the {} queue", self.scheduler.id()))?;
        debug!("{} jobs in the queue", snapshot.len());
        Ok(snapshot)
    }
}
