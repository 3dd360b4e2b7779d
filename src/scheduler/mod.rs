pub mod sge;
pub mod slurm;

use crate::cfg::SchedulerKind;
use crate::exec::{CommandRunner, ExecError};
use camino::Utf8Path as Path;
use sge::SgeScheduler;
use slurm::SlurmScheduler;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("could not read a job id from {command} output `{output}`")]
    UnexpectedOutput {
        command: &'static str,
        output: String,
    },
}

/// Identifier the scheduler assigned to a submitted job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobId(pub String);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The queue listing at one point in time, one entry per line of output.
#[derive(Clone, Debug, Default)]
pub struct QueueSnapshot {
    lines: Vec<String>,
}

impl QueueSnapshot {
    pub fn from_listing(listing: &str) -> Self {
        Self {
            lines: listing
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    /// Substring match, so `lasagne_01` also matches a job called `lasagne_012`.
    pub fn contains_job(&self, job_name: &str) -> bool {
        self.lines.iter().any(|line| line.contains(job_name))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }
}

pub trait Scheduler {
    fn id(&self) -> &'static str;

    fn submit(
        &self,
        runner: &dyn CommandRunner,
        script: &Path,
        envs: &[(String, String)],
    ) -> Result<JobId, SchedulerError>;

    fn queue(&self, runner: &dyn CommandRunner) -> Result<QueueSnapshot, SchedulerError>;
}

pub fn build_scheduler(kind: SchedulerKind, user: Option<&str>) -> Box<dyn Scheduler> {
    let user = user.map(str::to_owned);
    match kind {
        SchedulerKind::Slurm => Box::new(SlurmScheduler::new(user)),
        SchedulerKind::Sge => Box::new(SgeScheduler::new(user)),
    }
}

/// Directory a job script is submitted from, so relative paths in the script resolve next to it.
fn submission_dir(script: &Path) -> camino::Utf8PathBuf {
    match script.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_owned(),
        _ => camino::Utf8PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_matches_substrings() {
        let snapshot = QueueSnapshot::from_listing("lasagne_003\n  lasagne_0120 \n\n");
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains_job("lasagne_003"));
        assert!(snapshot.contains_job("lasagne_012"));
        assert!(!snapshot.contains_job("lasagne_004"));
    }

    #[test]
    fn empty_listing_contains_nothing() {
        let snapshot = QueueSnapshot::from_listing("");
        assert!(!snapshot.contains_job("lasagne_001"));
    }

    #[test]
    fn submission_dir_defaults_to_working_directory() {
        assert_eq!(submission_dir(Path::new("job.sh")), ".");
        assert_eq!(submission_dir(Path::new("run001/job.sh")), "run001");
    }
}
