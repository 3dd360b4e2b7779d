use anyhow::{bail, Context, Result};
use camino::Utf8PathBuf as PathBuf;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::template::parse_assignment;

/// Runs are complete once this many years have been simulated.
pub const DEFAULT_COMPLETION_YEARS: f64 = 30.0;

const DEFAULT_CONFIG_PATH: &str = "lasagne.yaml";

#[derive(Deserialize, ValueEnum, Clone, Copy, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    Slurm,
    Sge,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct CommandConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            program: "get_time".to_owned(),
            args: Vec::new(),
        }
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct WrapperConfig {
    pub template: PathBuf,
    /// Name of the written script; may use the same placeholders as the template.
    pub output: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default = "default_true")]
    pub submit: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub scheduler: SchedulerKind,
    pub queue_user: Option<String>,
    pub run_dir_prefix: String,
    pub plot_dir: String,
    pub job_name_prefix: String,
    pub completion_years: f64,
    pub time_extractor: CommandConfig,
    /// `NAME=VALUE` pairs set on every command launched.
    pub environment: Vec<String>,
    pub wrappers: BTreeMap<String, WrapperConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scheduler: SchedulerKind::Slurm,
            queue_user: None,
            run_dir_prefix: "run".to_owned(),
            plot_dir: "plot".to_owned(),
            job_name_prefix: "lasagne_".to_owned(),
            completion_years: DEFAULT_COMPLETION_YEARS,
            time_extractor: CommandConfig::default(),
            environment: Vec::new(),
            wrappers: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// File first, then `LASAGNE_*` environment variables, then command line flags.
    pub fn load(cli: &Cli) -> Result<Self> {
        let (path, required) = match &cli.config {
            Some(path) => {
                if !path.is_file() {
                    bail!("configuration file `{path}` does not exist");
                }
                (path.clone(), true)
            }
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        let mut settings: Settings = Config::builder()
            .add_source(File::new(path.as_str(), FileFormat::Yaml).required(required))
            .add_source(
                Environment::with_prefix("LASAGNE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("could not build configuration from `{path}`"))?
            .try_deserialize()
            .with_context(|| format!("could not deserialize configuration from `{path}`"))?;

        settings.apply_flags(cli);
        settings.validate()?;
        Ok(settings)
    }

    fn apply_flags(&mut self, cli: &Cli) {
        if let Some(scheduler) = cli.scheduler {
            self.scheduler = scheduler;
        }
        if let Some(Command::Status {
            threshold: Some(threshold),
            ..
        }) = &cli.command
        {
            self.completion_years = *threshold;
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.completion_years.is_finite() || self.completion_years < 0.0 {
            bail!(
                "completion_years must be a non-negative number, got {}",
                self.completion_years
            );
        }
        self.environment_pairs()?;
        Ok(())
    }

    pub fn environment_pairs(&self) -> Result<Vec<(String, String)>> {
        self.environment
            .iter()
            .map(|entry| {
                parse_assignment(entry).context("invalid entry in `environment` configuration")
            })
            .collect()
    }
}

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ./lasagne.yaml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the configured batch scheduler
    #[arg(long, value_enum, global = true)]
    pub scheduler: Option<SchedulerKind>,

    /// Log more; repeat for debug output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Print shell completions and exit
    #[arg(long, value_enum)]
    pub print_completion: Option<Shell>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Fill a template and write the job script without submitting it
    Render {
        template: PathBuf,
        output: PathBuf,
        #[arg(value_parser = parse_assignment_arg)]
        substitutions: Vec<(String, String)>,
    },
    /// Fill a template, write the job script and submit it
    Submit {
        template: PathBuf,
        output: PathBuf,
        #[arg(value_parser = parse_assignment_arg)]
        substitutions: Vec<(String, String)>,
    },
    /// Run a wrapper declared in the configuration with its positional arguments
    Wrap {
        name: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Report the progress of a run or of every run in an ensemble
    Status {
        path: PathBuf,

        /// Years after which a run counts as complete
        #[arg(short, long)]
        threshold: Option<f64>,
    },
    /// Create one run directory per row of a perturbed-parameter table
    Ensemble {
        templates: PathBuf,
        ppe: PathBuf,
        ensemble_path: PathBuf,

        /// Only make runs from this (1-based) row
        #[arg(long)]
        min: Option<usize>,

        /// Only make runs up to this (1-based) row
        #[arg(long)]
        max: Option<usize>,
    },
    /// Set up a forcing-model directory from a template directory
    Model {
        templates: PathBuf,
        model: String,
        scenario: String,
        realisation: String,

        #[arg(long, default_value = ".")]
        dest: PathBuf,
    },
    /// Write per-year or per-decade ocean forcing configurations
    Forcing {
        #[arg(value_enum)]
        layout: ForcingLayout,
        template: PathBuf,
        model: String,

        #[arg(long, default_value_t = 1995)]
        first: u32,

        #[arg(long, default_value_t = 2299)]
        last: u32,

        #[arg(long, default_value_t = 1995)]
        clim_first: u32,

        #[arg(long, default_value_t = 2014)]
        clim_last: u32,

        #[arg(long, default_value = ".")]
        dest: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum ForcingLayout {
    Years,
    Decades,
}

fn parse_assignment_arg(s: &str) -> Result<(String, String)> {
    Ok(parse_assignment(s)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_run_conventions() {
        let settings = Settings::default();
        assert_eq!(settings.scheduler, SchedulerKind::Slurm);
        assert_eq!(settings.completion_years, 30.0);
        assert_eq!(settings.job_name_prefix, "lasagne_");
        assert_eq!(settings.plot_dir, "plot");
    }

    #[test]
    fn deserializes_yaml() {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(
                "
scheduler: sge
completion_years: 300
time_extractor:
  program: python
  args: [get_timestep.py]
environment:
  - BISICLES_HOME=/nobackup/earjo/bisicles
wrappers:
  process-plot:
    template: templates/process_plot.template.sh
    output: process_@VAR.sh
    params: [VAR, PLOTDIR, OUTDIR]
",
                FileFormat::Yaml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.scheduler, SchedulerKind::Sge);
        assert_eq!(settings.completion_years, 300.0);
        assert_eq!(settings.time_extractor.program, "python");
        assert_eq!(settings.run_dir_prefix, "run");
        assert_eq!(
            settings.environment_pairs().unwrap(),
            vec![(
                "BISICLES_HOME".to_owned(),
                "/nobackup/earjo/bisicles".to_owned()
            )]
        );
        let wrapper = &settings.wrappers["process-plot"];
        assert_eq!(wrapper.params, vec!["VAR", "PLOTDIR", "OUTDIR"]);
        assert!(wrapper.submit);
    }

    #[test]
    fn rejects_malformed_environment() {
        let settings = Settings {
            environment: vec!["NO_VALUE".to_owned()],
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    fn settings_from_args(args: &[&str]) -> Result<Settings> {
        let cli = Cli::try_parse_from(args).unwrap();
        let mut settings = Settings::default();
        settings.apply_flags(&cli);
        settings.validate()?;
        Ok(settings)
    }

    #[test]
    fn threshold_flag_overrides_completion_years() {
        let settings =
            settings_from_args(&["lasagne", "status", ".", "--threshold", "12.5"]).unwrap();
        assert_eq!(settings.completion_years, 12.5);
    }

    #[test]
    fn threshold_flag_is_validated() {
        assert!(settings_from_args(&["lasagne", "status", ".", "--threshold=-5"]).is_err());
        assert!(settings_from_args(&["lasagne", "status", ".", "--threshold", "NaN"]).is_err());
    }

    #[test]
    fn cli_parses_assignments() {
        let cli = Cli::try_parse_from([
            "lasagne",
            "render",
            "t.sh",
            "o.sh",
            "VAR=thickness",
            "OUTDIR=nc",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Render { substitutions, .. }) => assert_eq!(
                substitutions,
                vec![
                    ("VAR".to_owned(), "thickness".to_owned()),
                    ("OUTDIR".to_owned(), "nc".to_owned())
                ]
            ),
            _ => panic!("expected render"),
        }
    }

    #[test]
    fn cli_verifies() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
