mod cfg;
mod ensemble;
mod exec;
mod forcing;
mod progress;
mod run;
mod scheduler;
mod submit;
mod template;
mod utils;

use anyhow::{anyhow, Context, Result};
use cfg::*;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use ensemble::{build_ensemble, EnsembleSpec};
use exec::SystemRunner;
use forcing::{setup_model_dir, write_decades, write_years, ModelSpec};
use log::{debug, LevelFilter};
use progress::{ProgressCheck, TimeExtractor};
use run::RunLayout;
use scheduler::build_scheduler;
use std::process::ExitCode;
use submit::{instantiate, run_wrapper, Submitter};
use template::Substitutions;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn run(cli: Cli) -> Result<()> {
    if let Some(shell) = cli.print_completion {
        generate(shell, &mut Cli::command(), "lasagne", &mut std::io::stdout());
        return Ok(());
    }

    let settings = Settings::load(&cli)?;
    debug!("using {:?} scheduler", settings.scheduler);
    let envs = settings.environment_pairs()?;
    let runner = SystemRunner;
    let scheduler = build_scheduler(settings.scheduler, settings.queue_user.as_deref());
    let submitter = Submitter {
        scheduler: &*scheduler,
        runner: &runner,
        envs: &envs,
    };

    match cli.command {
        Some(Command::Render {
            template,
            output,
            substitutions,
        }) => {
            let substitutions = Substitutions::from_pairs(&substitutions)?;
            instantiate(&template, &substitutions, &output)?;
            println!("{output}");
        }
        Some(Command::Submit {
            template,
            output,
            substitutions,
        }) => {
            let substitutions = Substitutions::from_pairs(&substitutions)?;
            let job_id = submitter.instantiate_and_submit(&template, &substitutions, &output)?;
            println!("{job_id}");
        }
        Some(Command::Wrap { name, args }) => {
            let wrapper = settings.wrappers.get(&name).ok_or_else(|| {
                let known = settings.wrappers.keys().cloned().collect::<Vec<_>>();
                anyhow!("no wrapper named `{name}`; configured: {}", known.join(", "))
            })?;
            let outcome = run_wrapper(&name, wrapper, &args, &submitter)?;
            match outcome.job_id {
                Some(job_id) => println!("{job_id}"),
                None => println!("{}", outcome.script),
            }
        }
        Some(Command::Status { path, .. }) => {
            let layout = RunLayout::from_settings(&settings);
            let extractor = TimeExtractor::new(settings.time_extractor.clone(), envs.clone());

            let reports = ProgressCheck {
                layout: &layout,
                completion_years: settings.completion_years,
                extractor: &extractor,
                scheduler: &*scheduler,
                runner: &runner,
            }
            .run(&path)
            .with_context(|| format!("failed to check progress in `{path}`"))?;

            for report in reports {
                println!("{report}");
            }
        }
        Some(Command::Ensemble {
            templates,
            ppe,
            ensemble_path,
            min,
            max,
        }) => {
            let created = build_ensemble(&EnsembleSpec {
                templates: &templates,
                ppe: &ppe,
                ensemble_path: &ensemble_path,
                min,
                max,
            })?;
            for dir in created {
                println!("{dir}");
            }
        }
        Some(Command::Model {
            templates,
            model,
            scenario,
            realisation,
            dest,
        }) => {
            let directory = setup_model_dir(
                &templates,
                &ModelSpec {
                    model: &model,
                    scenario: &scenario,
                    realisation: &realisation,
                },
                &dest,
            )?;
            println!("{directory}");
        }
        Some(Command::Forcing {
            layout,
            template,
            model,
            first,
            last,
            clim_first,
            clim_last,
            dest,
        }) => {
            let written = match layout {
                ForcingLayout::Years => write_years(&template, &model, first, last, &dest)?,
                ForcingLayout::Decades => write_decades(
                    &template,
                    &model,
                    (first, last),
                    (clim_first, clim_last),
                    &dest,
                )?,
            };
            for path in written {
                println!("{path}");
            }
        }
        None => {
            let _ = Cli::command().print_help();
            return Err(anyhow!("no command specified"));
        }
    }

    Ok(())
}
