use super::{submission_dir, JobId, QueueSnapshot, Scheduler, SchedulerError};
use crate::exec::{CommandRunner, Invocation};
use camino::Utf8Path as Path;
use log::info;

/// Sun Grid Engine and its descendants (`qsub`/`qstat`).
pub struct SgeScheduler {
    user: Option<String>,
}

impl SgeScheduler {
    pub fn new(user: Option<String>) -> Self {
        Self { user }
    }
}

impl Scheduler for SgeScheduler {
    fn id(&self) -> &'static str {
        "sge"
    }

    fn submit(
        &self,
        runner: &dyn CommandRunner,
        script: &Path,
        envs: &[(String, String)],
    ) -> Result<JobId, SchedulerError> {
        let file_name = script.file_name().unwrap_or(script.as_str());
        // -V exports the submitting environment, which carries the forwarded variables
        let invocation = Invocation::new("qsub")
            .args(["-terse", "-V"])
            .arg(file_name)
            .envs(envs)
            .current_dir(submission_dir(script));
        let output = runner.checked_output(&invocation)?;

        // -terse prints `<job id>` or `<job id>.<task range>` for array jobs
        let job_id = output
            .stdout
            .trim()
            .split('.')
            .next()
            .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
            .ok_or_else(|| SchedulerError::UnexpectedOutput {
                command: "qsub",
                output: output.stdout.trim().to_owned(),
            })?;

        info!("submitted {script} as sge job {job_id}");
        Ok(JobId(job_id.to_owned()))
    }

    fn queue(&self, runner: &dyn CommandRunner) -> Result<QueueSnapshot, SchedulerError> {
        // plain qstat cuts names at ten characters, -r adds a `Full jobname:` line per job
        let mut invocation = Invocation::new("qstat").arg("-r");
        if let Some(user) = &self.user {
            invocation = invocation.arg("-u").arg(user);
        }

        let output = runner.checked_output(&invocation)?;
        Ok(QueueSnapshot::from_listing(&output.stdout))
    }
}
