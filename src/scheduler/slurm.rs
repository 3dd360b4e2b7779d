use super::{submission_dir, JobId, QueueSnapshot, Scheduler, SchedulerError};
use crate::exec::{CommandRunner, Invocation};
use camino::Utf8Path as Path;
use log::info;

pub struct SlurmScheduler {
    user: Option<String>,
}

impl SlurmScheduler {
    pub fn new(user: Option<String>) -> Self {
        Self { user }
    }
}

impl Scheduler for SlurmScheduler {
    fn id(&self) -> &'static str {
        "slurm"
    }

    fn submit(
        &self,
        runner: &dyn CommandRunner,
        script: &Path,
        envs: &[(String, String)],
    ) -> Result<JobId, SchedulerError> {
        let file_name = script.file_name().unwrap_or(script.as_str());
        let invocation = Invocation::new("sbatch")
            .arg("--parsable")
            .arg(file_name)
            .envs(envs)
            .current_dir(submission_dir(script));
        let output = runner.checked_output(&invocation)?;

        // --parsable prints `<job id>[;<cluster>]`
        let job_id = output
            .stdout
            .trim()
            .split(';')
            .next()
            .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
            .ok_or_else(|| SchedulerError::UnexpectedOutput {
                command: "sbatch",
                output: output.stdout.trim().to_owned(),
            })?;

        info!("submitted {script} as slurm job {job_id}");
        Ok(JobId(job_id.to_owned()))
    }

    fn queue(&self, runner: &dyn CommandRunner) -> Result<QueueSnapshot, SchedulerError> {
        // default squeue output truncates job names to eight characters
        let mut invocation = Invocation::new("squeue").args(["--noheader", "--format=%j"]);
        if let Some(user) = &self.user {
            invocation = invocation.arg("--user").arg(user);
        }

        let output = runner.checked_output(&invocation)?;
        Ok(QueueSnapshot::from_listing(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::fake::FakeRunner;
    use pretty_assertions::assert_eq;

    #[test]
    fn submit_parses_parsable_output() {
        let runner = FakeRunner::new().on_stdout("sbatch", "4242;archer2\n");
        let envs = vec![("BISICLES_HOME".to_owned(), "/opt/bisicles".to_owned())];

        let job_id = SlurmScheduler::new(None)
            .submit(&runner, Path::new("ens/run001/job.sh"), &envs)
            .unwrap();

        assert_eq!(job_id, JobId("4242".to_owned()));
        let calls = runner.calls.borrow();
        assert_eq!(calls[0].to_string(), "sbatch --parsable job.sh");
    }

    #[test]
    fn submit_rejects_unexpected_output() {
        let runner = FakeRunner::new().on_stdout("sbatch", "Submitted batch job\n");

        let err = SlurmScheduler::new(None)
            .submit(&runner, Path::new("job.sh"), &[])
            .unwrap_err();

        assert!(matches!(err, SchedulerError::UnexpectedOutput { .. }));
    }

    #[test]
    fn queue_filters_by_user() {
        let runner = FakeRunner::new().on_stdout("squeue", "lasagne_001\nlasagne_007\n");

        let snapshot = SlurmScheduler::new(Some("earjo".to_owned()))
            .queue(&runner)
            .unwrap();

        assert!(snapshot.contains_job("lasagne_007"));
        assert_eq!(
            runner.calls.borrow()[0].to_string(),
            "squeue --noheader --format=%j --user earjo"
        );
    }
}
