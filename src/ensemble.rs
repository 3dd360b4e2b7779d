//! Perturbed-parameter ensembles: one run directory per table row.

use crate::template::{load_directory, Substitutions, Template};
use anyhow::{bail, Context, Result};
use camino::{Utf8Component, Utf8Path as Path, Utf8PathBuf as PathBuf};
use log::{info, warn};
use std::collections::BTreeSet;

/// Subdirectories every run starts with.
pub const RUN_SUBDIRS: [&str; 6] = ["ctrl", "plot", "chk", "pout", "output", "error"];

const NAME_COLUMN: &str = "name";

pub struct EnsembleSpec<'a> {
    pub templates: &'a Path,
    pub ppe: &'a Path,
    pub ensemble_path: &'a Path,
    /// First 1-based row to build.
    pub min: Option<usize>,
    /// Last 1-based row to build.
    pub max: Option<usize>,
}

/// A run directory and the files it will hold, before anything touches the disk.
struct PlannedRun {
    dir: PathBuf,
    files: Vec<(PathBuf, String)>,
}

/// Formats a table cell the way the templates expect numbers: integers as
/// they are, other numbers as `d.dddddde±XX`.
pub fn format_value(cell: &str) -> String {
    let cell = cell.trim();
    if cell.parse::<i64>().is_ok() {
        return cell.to_owned();
    }
    match cell.parse::<f64>() {
        Ok(value) => format_scientific(value),
        Err(_) => cell.to_owned(),
    }
}

fn format_scientific(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_owned();
    }

    let formatted = format!("{value:.6e}");
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exponent.abs())
        }
        None => formatted,
    }
}

pub fn build_ensemble(spec: &EnsembleSpec) -> Result<Vec<PathBuf>> {
    let (min, max) = row_window(spec.min, spec.max)?;
    if !spec.ppe.is_file() {
        bail!("parameter table `{}` does not exist", spec.ppe);
    }
    let templates = load_directory(spec.templates)?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(spec.ppe)
        .with_context(|| format!("failed to open `{}`", spec.ppe))?;
    let columns = reader
        .headers()
        .with_context(|| format!("failed to read the header of `{}`", spec.ppe))?
        .iter()
        .map(str::to_owned)
        .collect::<Vec<_>>();
    let name_index = match columns.iter().position(|column| column == NAME_COLUMN) {
        Some(index) => index,
        None => bail!(
            "`{}` needs a `{NAME_COLUMN}` column to name the run directories",
            spec.ppe
        ),
    };

    let mut used = BTreeSet::new();
    let mut planned = Vec::new();

    for (index, record) in reader.records().enumerate() {
        let row = index + 1;
        if row < min {
            continue;
        }
        if row > max {
            break;
        }

        let record = record.with_context(|| format!("failed to read row {row} of `{}`", spec.ppe))?;
        let mut substitutions = Substitutions::new();
        for (column, cell) in columns.iter().zip(record.iter()) {
            substitutions
                .insert(column, &format_value(cell))
                .with_context(|| format!("column `{column}` cannot be used as a placeholder"))?;
        }

        let name = record.get(name_index).unwrap_or_default();
        if name.is_empty() {
            bail!("row {row} of `{}` has no run name", spec.ppe);
        }
        if !is_plain_name(name) {
            bail!(
                "row {row} of `{}` names its run `{name}`; run names must be a single directory name",
                spec.ppe
            );
        }
        let run = plan_run(spec.ensemble_path, name, &templates, &substitutions, &mut used)?;
        planned.push(run);
    }

    for column in columns.iter().filter(|column| !used.contains(column.as_str())) {
        warn!("column `{column}` is not used by any template in {}", spec.templates);
    }

    let mut created = Vec::with_capacity(planned.len());
    for run in planned {
        for subdir in RUN_SUBDIRS {
            let path = run.dir.join(subdir);
            std::fs::create_dir_all(&path)
                .with_context(|| format!("failed to create `{path}`"))?;
        }
        for (path, content) in &run.files {
            std::fs::write(path, content).with_context(|| format!("failed to write `{path}`"))?;
        }
        info!("created {} with {} files", run.dir, run.files.len());
        created.push(run.dir);
    }

    Ok(created)
}

/// Resolves the 1-based `--min`/`--max` bounds into an inclusive row range.
fn row_window(min: Option<usize>, max: Option<usize>) -> Result<(usize, usize)> {
    if min == Some(0) || max == Some(0) {
        bail!("rows are numbered from 1, so --min and --max must be at least 1");
    }
    let (min, max) = (min.unwrap_or(1), max.unwrap_or(usize::MAX));
    if min > max {
        bail!("--min {min} is after --max {max}");
    }
    Ok((min, max))
}

fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Utf8Component::Normal(_)), None)
    )
}

fn plan_run(
    ensemble_path: &Path,
    name: &str,
    templates: &[(String, Template)],
    substitutions: &Substitutions,
    used: &mut BTreeSet<String>,
) -> Result<PlannedRun> {
    let dir = ensemble_path.join(name);
    let mut files = Vec::with_capacity(templates.len());
    for (file_name, template) in templates {
        let rendered = template.render(substitutions)?;
        used.extend(
            substitutions
                .keys()
                .filter(|key| !rendered.unused.iter().any(|unused| unused.as_str() == *key))
                .map(str::to_owned),
        );
        files.push((dir.join(file_name.replace("template", name)), rendered.text));
    }
    Ok(PlannedRun { dir, files })
}
