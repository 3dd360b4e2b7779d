use crate::cfg::WrapperConfig;
use crate::exec::CommandRunner;
use crate::scheduler::{JobId, Scheduler};
use crate::template::{write_script, Substitutions, Template};
use anyhow::{bail, Context, Result};
use camino::{Utf8Path as Path, Utf8PathBuf as PathBuf};
use log::info;

/// Fills `template` and writes the result to `output`.
///
/// Every placeholder needs a value and every value must be used, otherwise
/// nothing is written.
pub fn instantiate(template: &Path, substitutions: &Substitutions, output: &Path) -> Result<()> {
    let template = Template::load(template)?;
    let text = template.render(substitutions)?.strict(&template)?;

    write_script(output, &text)?;
    info!("wrote {output} from {}", template.name());
    Ok(())
}

pub struct Submitter<'a> {
    pub scheduler: &'a dyn Scheduler,
    pub runner: &'a dyn CommandRunner,
    pub envs: &'a [(String, String)],
}

impl Submitter<'_> {
    pub fn submit(&self, script: &Path) -> Result<JobId> {
        self.scheduler
            .submit(self.runner, script, self.envs)
            .with_context(|| format!("failed to submit {script} to {}", self.scheduler.id()))
    }

    pub fn instantiate_and_submit(
        &self,
        template: &Path,
        substitutions: &Substitutions,
        output: &Path,
    ) -> Result<JobId> {
        instantiate(template, substitutions, output)?;
        self.submit(output)
    }
}

/// What a wrapper invocation produced.
#[derive(Debug, PartialEq)]
pub struct WrapperOutcome {
    pub script: PathBuf,
    pub job_id: Option<JobId>,
}

pub fn usage(name: &str, wrapper: &WrapperConfig) -> String {
    let params = wrapper
        .params
        .iter()
        .map(|param| format!("<{param}>"))
        .collect::<Vec<_>>()
        .join(" ");
    format!("usage: lasagne wrap {name} {params}").trim_end().to_owned()
}

/// Binds positional `args` to the wrapper's parameters in order.
///
/// A wrong argument count fails before any file is written.
pub fn bind_arguments(name: &str, wrapper: &WrapperConfig, args: &[String]) -> Result<Substitutions> {
    if args.len() != wrapper.params.len() {
        bail!(
            "{name} takes {} arguments, got {}\n{}",
            wrapper.params.len(),
            args.len(),
            usage(name, wrapper)
        );
    }

    let mut substitutions = Substitutions::new();
    for (param, arg) in wrapper.params.iter().zip(args) {
        substitutions
            .insert(param, arg)
            .with_context(|| format!("wrapper {name} declares an invalid parameter"))?;
    }
    Ok(substitutions)
}

pub fn run_wrapper(
    name: &str,
    wrapper: &WrapperConfig,
    args: &[String],
    submitter: &Submitter,
) -> Result<WrapperOutcome> {
    let substitutions = bind_arguments(name, wrapper, args)?;

    // the output name may use any subset of the parameters
    let output = Template::from_source("output", wrapper.output.clone(), false)
        .render(&substitutions)
        .with_context(|| format!("invalid output name for wrapper {name}"))?
        .text;
    let script = PathBuf::from(output);

    instantiate(&wrapper.template, &substitutions, &script)?;
    let job_id = if wrapper.submit {
        Some(submitter.submit(&script)?)
    } else {
        None
    };

    Ok(WrapperOutcome { script, job_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::fake::FakeRunner;
    use crate::scheduler::slurm::SlurmScheduler;
    use crate::utils::TempDirExt;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const PROCESS_PLOT: &str = "\
#!/bin/bash
#SBATCH --job-name=process_@VAR
python process_plot.py @PLOTDIR @OUTDIR/@VAR.nc @VAR
";

    fn wrapper(dir: &Path) -> WrapperConfig {
        let template = dir.join("process_plot.template.sh");
        std::fs::write(&template, PROCESS_PLOT).unwrap();
        WrapperConfig {
            template,
            output: dir.join("process_@VAR.sh").into_string(),
            params: vec!["VAR".to_owned(), "PLOTDIR".to_owned(), "OUTDIR".to_owned()],
            submit: true,
        }
    }

    fn args(args: &[&str]) -> Vec<String> {
        args.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn wrapper_renders_and_submits() {
        let dir = TempDir::new().unwrap();
        let wrapper = wrapper(dir.utf8_path());
        let runner = FakeRunner::new().on_stdout("sbatch", "901\n");
        let scheduler = SlurmScheduler::new(None);
        let submitter = Submitter {
            scheduler: &scheduler,
            runner: &runner,
            envs: &[],
        };

        let outcome = run_wrapper(
            "process-plot",
            &wrapper,
            &args(&["thickness", "run001/plot", "netcdf"]),
            &submitter,
        )
        .unwrap();

        assert_eq!(outcome.script, dir.utf8_path().join("process_thickness.sh"));
        assert_eq!(outcome.job_id, Some(JobId("901".to_owned())));
        assert_eq!(
            std::fs::read_to_string(&outcome.script).unwrap(),
            "#!/bin/bash\n#SBATCH --job-name=process_thickness\n\
            python process_plot.py run001/plot netcdf/thickness.nc thickness\n"
        );
    }

    #[test]
    fn wrong_argument_count_has_no_side_effects() {
        let dir = TempDir::new().unwrap();
        let wrapper = wrapper(dir.utf8_path());
        let runner = FakeRunner::new().on_stdout("sbatch", "901\n");
        let scheduler = SlurmScheduler::new(None);
        let submitter = Submitter {
            scheduler: &scheduler,
            runner: &runner,
            envs: &[],
        };

        for given in [args(&["thickness"]), args(&["a", "b", "c", "d"])] {
            let err = run_wrapper("process-plot", &wrapper, &given, &submitter).unwrap_err();
            assert!(err
                .to_string()
                .ends_with("usage: lasagne wrap process-plot <VAR> <PLOTDIR> <OUTDIR>"));
        }

        assert!(!dir.utf8_path().join("process_thickness.sh").exists());
        assert_eq!(runner.call_count("sbatch"), 0);
    }

    #[test]
    fn wrapper_without_submission() {
        let dir = TempDir::new().unwrap();
        let wrapper = WrapperConfig {
            submit: false,
            ..wrapper(dir.utf8_path())
        };
        let runner = FakeRunner::new();
        let scheduler = SlurmScheduler::new(None);
        let submitter = Submitter {
            scheduler: &scheduler,
            runner: &runner,
            envs: &[],
        };

        let outcome = run_wrapper(
            "process-plot",
            &wrapper,
            &args(&["xVel", "plot", "nc"]),
            &submitter,
        )
        .unwrap();

        assert_eq!(outcome.job_id, None);
        assert!(outcome.script.exists());
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn incomplete_substitutions_write_nothing() {
        let dir = TempDir::new().unwrap();
        let template = dir.utf8_path().join("job.template.sh");
        std::fs::write(&template, PROCESS_PLOT).unwrap();
        let output = dir.utf8_path().join("job.sh");
        let substitutions = Substitutions::new().with("VAR", "thickness").unwrap();

        assert!(instantiate(&template, &substitutions, &output).is_err());
        assert!(!output.exists());
    }

    #[test]
    fn failed_submission_is_reported() {
        let dir = TempDir::new().unwrap();
        let template = dir.utf8_path().join("job.template.sh");
        std::fs::write(&template, "sleep @SECONDS\n").unwrap();
        let runner = FakeRunner::new().on("sbatch", |_| {
            Ok(crate::exec::CommandOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: "sbatch: error: Batch job submission failed".to_owned(),
            })
        });
        let scheduler = SlurmScheduler::new(None);
        let submitter = Submitter {
            scheduler: &scheduler,
            runner: &runner,
            envs: &[],
        };

        let err = submitter
            .instantiate_and_submit(
                &template,
                &Substitutions::new().with("SECONDS", "60").unwrap(),
                &dir.utf8_path().join("job.sh"),
            )
            .unwrap_err();

        assert!(format!("{err:#}").contains("Batch job submission failed"));
    }
}
