use crate::cfg::Settings;
use crate::utils::AsUtf8Path;
use anyhow::{Context, Result};
use camino::{Utf8Path as Path, Utf8PathBuf as PathBuf};
use log::{debug, warn};
use std::cmp::Ordering;

/// Naming conventions tying run directories, their output and their jobs together.
#[derive(Clone, Debug)]
pub struct RunLayout {
    pub run_dir_prefix: String,
    pub plot_dir: String,
    pub job_name_prefix: String,
}

impl RunLayout {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            run_dir_prefix: settings.run_dir_prefix.clone(),
            plot_dir: settings.plot_dir.clone(),
            job_name_prefix: settings.job_name_prefix.clone(),
        }
    }
}

impl Default for RunLayout {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// A `run<NNN>` directory.
#[derive(Clone, Debug, PartialEq)]
pub struct RunDir {
    pub path: PathBuf,
    /// The digits after the prefix, zero padding kept.
    pub number: String,
}

impl RunDir {
    pub fn parse(path: &Path, layout: &RunLayout) -> Option<Self> {
        let number = path.file_name()?.strip_prefix(&layout.run_dir_prefix)?;
        if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            path: path.to_owned(),
            number: number.to_owned(),
        })
    }

    pub fn name(&self) -> &str {
        self.path.file_name().unwrap_or(self.path.as_str())
    }

    pub fn job_name(&self, layout: &RunLayout) -> String {
        format!("{}{}", layout.job_name_prefix, self.number)
    }

    pub fn plot_dir(&self, layout: &RunLayout) -> PathBuf {
        self.path.join(&layout.plot_dir)
    }
}

impl std::fmt::Display for RunDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A run directory itself when `target` is one, otherwise the run directories inside it.
///
/// A `run<NNN>` target without run directories inside is a single run, even
/// before it has written any output.
pub fn resolve_runs(target: &Path, layout: &RunLayout) -> Result<Vec<RunDir>> {
    let single = RunDir::parse(target, layout);
    if let Some(run) = &single {
        if run.plot_dir(layout).is_dir() {
            return Ok(vec![run.clone()]);
        }
    }

    if !target.is_dir() {
        anyhow::bail!("`{target}` is not a directory");
    }

    let mut runs = Vec::new();
    for entry in walkdir::WalkDir::new(target)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("failed to list `{target}`"))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let path = entry.path().as_utf8()?;
        if let Some(run) = RunDir::parse(path, layout) {
            runs.push(run);
        }
    }

    if runs.is_empty() {
        if let Some(run) = single {
            return Ok(vec![run]);
        }
    }

    debug!("found {} run directories in {target}", runs.len());
    Ok(runs)
}

/// Names of the regular files directly inside `dir`.
pub fn file_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("failed to list `{dir}`"))?;
        if entry.file_type().is_file() {
            let path = entry.path().as_utf8()?;
            if let Some(name) = path.file_name() {
                names.push(name.to_owned());
            }
        }
    }
    Ok(names)
}

/// The plot file furthest along in time, judged by its name.
///
/// Names are compared with digit runs as numbers, so `plot.10.hdf5` follows
/// `plot.9.hdf5`. That agrees with plain string order only for zero-padded
/// counters; a disagreement is logged because it means the naming scheme is
/// not what the output writer usually produces.
pub fn latest_file(names: &[String]) -> Option<&str> {
    // equal counters (`plot.02`, `plot.2`) fall back to string order
    let natural = names
        .iter()
        .max_by(|a, b| natural_cmp(a, b).then_with(|| a.cmp(b)))?;
    let lexicographic = names.iter().max()?;
    if natural != lexicographic {
        warn!(
            "plot file names are not zero-padded: `{lexicographic}` sorts last \
            but `{natural}` has the larger counter; using `{natural}`"
        );
    }
    Some(natural.as_str())
}

/// Compares strings chunk by chunk, digit runs by numeric value.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = Chunks(a);
    let mut b = Chunks(b);
    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ordering = match (digits(x), digits(y)) {
                    (Some(x), Some(y)) => x.len().cmp(&y.len()).then_with(|| x.cmp(y)),
                    _ => x.cmp(y),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

/// A digit run without its leading zeros, or `None` for a non-digit chunk.
fn digits(chunk: &str) -> Option<&str> {
    if !chunk.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let trimmed = chunk.trim_start_matches('0');
    Some(if trimmed.is_empty() { "0" } else { trimmed })
}

struct Chunks<'a>(&'a str);

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let first = self.0.chars().next()?;
        let is_digit = first.is_ascii_digit();
        let end = self
            .0
            .find(|c: char| c.is_ascii_digit() != is_digit)
            .unwrap_or(self.0.len());
        let (chunk, rest) = self.0.split_at(end);
        self.0 = rest;
        Some(chunk)
    }
}
