//! Directory trees for preparing ocean forcing with an external container.

use crate::template::{load_directory, Substitutions, Template};
use anyhow::{bail, Context, Result};
use camino::{Utf8Path as Path, Utf8PathBuf as PathBuf};
use log::{debug, info};

const DECADE_SPAN: u32 = 20;

pub struct ModelSpec<'a> {
    pub model: &'a str,
    pub scenario: &'a str,
    pub realisation: &'a str,
}

/// Creates `<dest>/<model>` from a template directory, `template` in file names becoming the model.
pub fn setup_model_dir(templates: &Path, spec: &ModelSpec, dest: &Path) -> Result<PathBuf> {
    let lower = spec.model.to_lowercase();
    let substitutions = Substitutions::new()
        .with("MODEL", spec.model)?
        .with("model", &lower)?
        .with("SCENARIO", spec.scenario)?
        .with("REALISATION", spec.realisation)?;

    let templates = load_directory(templates)?;
    let mut files = Vec::with_capacity(templates.len());
    let directory = dest.join(&lower);
    for (file_name, template) in &templates {
        let rendered = template.render(&substitutions)?;
        files.push((directory.join(file_name.replace("template", &lower)), rendered.text));
    }

    for util in ["error", "output"] {
        let path = directory.join(util);
        std::fs::create_dir_all(&path).with_context(|| format!("failed to create `{path}`"))?;
    }
    for (path, content) in &files {
        std::fs::write(path, content).with_context(|| format!("failed to write `{path}`"))?;
    }

    info!("set up {directory} with {} files", files.len());
    Ok(directory)
}

/// One directory per year, each with `config.<model>`.
pub fn write_years(
    template: &Path,
    model: &str,
    first: u32,
    last: u32,
    dest: &Path,
) -> Result<Vec<PathBuf>> {
    check_range(first, last)?;
    let template = Template::load(template)?;

    let mut planned = Vec::new();
    for (index, year) in (first..=last).enumerate() {
        let folder = format!("{year:04}");
        let substitutions = Substitutions::new()
            .with("tIndex", &index.to_string())?
            .with("year", &folder)?;
        let path = dest.join(&folder).join(format!("config.{model}"));
        planned.push((path, render(&template, &substitutions)?));
    }

    write_all(planned)
}

/// Twenty-year blocks from `first`, the last one cut at `last`, each with `config.combine_<model>`.
pub fn write_decades(
    template: &Path,
    model: &str,
    (first, last): (u32, u32),
    (clim_first, clim_last): (u32, u32),
    dest: &Path,
) -> Result<Vec<PathBuf>> {
    check_range(first, last)?;
    check_range(clim_first, clim_last)?;
    let template = Template::load(template)?;

    let clim_folder = span_name(clim_first, clim_last);
    let clim_folders = year_list(clim_first, clim_last);

    let mut planned = Vec::new();
    for block_first in (first..=last).step_by(DECADE_SPAN as usize) {
        let block_last = block_first.saturating_add(DECADE_SPAN - 1).min(last);
        let folder = span_name(block_first, block_last);
        let substitutions = Substitutions::new()
            .with("outFolder", &folder)?
            .with("folders", &year_list(block_first, block_last))?
            .with("years", &folder)?
            .with("tIndexMin", &(block_first - first).to_string())?
            .with("tIndexMax", &(block_last - first).to_string())?
            .with("climDecades", &clim_folder)?
            .with("climFolders", &clim_folders)?
            .with("climFirstTIndex", "0")?
            .with("climLastTIndex", &(clim_last - clim_first).to_string())?;
        let path = dest.join(&folder).join(format!("config.combine_{model}"));
        planned.push((path, render(&template, &substitutions)?));
    }

    write_all(planned)
}

fn check_range(first: u32, last: u32) -> Result<()> {
    if first > last {
        bail!("first year {first} is after last year {last}");
    }
    Ok(())
}

fn span_name(first: u32, last: u32) -> String {
    format!("{first:04}-{last:04}")
}

fn year_list(first: u32, last: u32) -> String {
    (first..=last)
        .map(|year| format!("{year:04}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render(template: &Template, substitutions: &Substitutions) -> Result<String> {
    let rendered = template.render(substitutions)?;
    if !rendered.unused.is_empty() {
        debug!("{} does not use {}", template.name(), rendered.unused.join(", "));
    }
    Ok(rendered.text)
}

fn write_all(planned: Vec<(PathBuf, String)>) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(planned.len());
    for (path, content) in planned {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create `{parent}`"))?;
        }
        std::fs::write(&path, content).with_context(|| format!("failed to write `{path}`"))?;
        written.push(path);
    }
    info!("wrote {} forcing configurations", written.len());
    Ok(written)
}
