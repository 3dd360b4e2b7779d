//! Job templates and the values substituted into them.

pub mod jinja;
pub mod placeholder;

use camino::{Utf8Path as Path, Utf8PathBuf as PathBuf};
use jinja::JinjaTemplate;
use log::debug;
use placeholder::{is_name_char, is_name_start, PlaceholderTemplate};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use thiserror::Error;

use crate::utils::AsUtf8Path;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template `{0}` does not exist")]
    Missing(PathBuf),
    #[error("failed to read template `{path}`")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("`{0}` is not a valid placeholder name")]
    InvalidName(String),
    #[error("expected KEY=VALUE, got `{0}`")]
    InvalidAssignment(String),
    #[error(
        "no value for {} in `{template}`; write `@@` for a literal `@`",
        .names.join(", ")
    )]
    Unresolved { template: String, names: Vec<String> },
    #[error("`{template}` has no placeholder for {}; misspelled key?", .names.join(", "))]
    Unused { template: String, names: Vec<String> },
    #[error("failed to render `{template}`")]
    Jinja {
        template: String,
        #[source]
        source: minijinja::Error,
    },
    #[error("failed to write `{path}`")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Values for the named fields of a template.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Substitutions {
    values: BTreeMap<String, String>,
}

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: &str) -> Result<(), TemplateError> {
        if !key.starts_with(is_name_start) || !key.chars().all(is_name_char) {
            return Err(TemplateError::InvalidName(key.to_owned()));
        }
        self.values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    pub fn with(mut self, key: &str, value: &str) -> Result<Self, TemplateError> {
        self.insert(key, value)?;
        Ok(self)
    }

    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, TemplateError>
    where
        I: IntoIterator<Item = &'a (String, String)>,
    {
        let mut substitutions = Self::new();
        for (key, value) in pairs {
            substitutions.insert(key, value)?;
        }
        Ok(substitutions)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// Splits `KEY=VALUE` at the first `=`.
pub fn parse_assignment(s: &str) -> Result<(String, String), TemplateError> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(TemplateError::InvalidAssignment(s.to_owned())),
    }
}

#[derive(Clone, Debug)]
enum Dialect {
    Placeholder(PlaceholderTemplate),
    Jinja(JinjaTemplate),
}

#[derive(Clone, Debug)]
pub struct Template {
    name: String,
    dialect: Dialect,
}

/// Rendered text plus the substitution keys the template never used.
#[derive(Debug)]
pub struct Rendered {
    pub text: String,
    pub unused: Vec<String>,
}

impl Rendered {
    /// Treat unused keys as an error, for callers that name every key by hand.
    pub fn strict(self, template: &Template) -> Result<String, TemplateError> {
        if self.unused.is_empty() {
            return Ok(self.text);
        }
        Err(TemplateError::Unused {
            template: template.name.clone(),
            names: self.unused,
        })
    }
}

impl Template {
    /// Templates ending in `.j2` are minijinja, everything else uses `@NAME` placeholders.
    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        if !path.is_file() {
            return Err(TemplateError::Missing(path.to_owned()));
        }
        let source = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
            path: path.to_owned(),
            source,
        })?;

        let jinja = path.extension() == Some("j2");
        Ok(Self::from_source(path.as_str(), source, jinja))
    }

    pub fn from_source(name: &str, source: String, jinja: bool) -> Self {
        let dialect = if jinja {
            Dialect::Jinja(JinjaTemplate::new(source))
        } else {
            Dialect::Placeholder(PlaceholderTemplate::parse(&source))
        };
        Self {
            name: name.to_owned(),
            dialect,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn placeholders(&self) -> Result<BTreeSet<String>, TemplateError> {
        match &self.dialect {
            Dialect::Placeholder(template) => Ok(template.placeholders()),
            Dialect::Jinja(template) => template.placeholders().map_err(|source| {
                TemplateError::Jinja {
                    template: self.name.clone(),
                    source,
                }
            }),
        }
    }

    pub fn render(&self, substitutions: &Substitutions) -> Result<Rendered, TemplateError> {
        let text = match &self.dialect {
            Dialect::Placeholder(template) => template
                .fill(|name| substitutions.get(name))
                .map_err(|names| TemplateError::Unresolved {
                    template: self.name.clone(),
                    names,
                })?,
            Dialect::Jinja(template) => {
                template
                    .render(&substitutions.values)
                    .map_err(|source| TemplateError::Jinja {
                        template: self.name.clone(),
                        source,
                    })?
            }
        };

        let used = self.placeholders()?;
        let unused = substitutions
            .keys()
            .filter(|key| !used.contains(*key))
            .map(str::to_owned)
            .collect();

        Ok(Rendered { text, unused })
    }
}

/// Every regular file directly inside `dir`, sorted by name.
pub fn load_directory(dir: &Path) -> Result<Vec<(String, Template)>, TemplateError> {
    if !dir.is_dir() {
        return Err(TemplateError::Missing(dir.to_owned()));
    }

    let mut templates = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|err| TemplateError::Read {
            path: dir.to_owned(),
            source: err.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path().as_utf8().map_err(|source| TemplateError::Read {
            path: dir.to_owned(),
            source,
        })?;
        let file_name = path.file_name().unwrap_or(path.as_str()).to_owned();
        templates.push((file_name, Template::load(path)?));
    }

    debug!("loaded {} templates from {dir}", templates.len());
    Ok(templates)
}

/// Writes an executable script through a temporary file so a failed write leaves nothing behind.
pub fn write_script(path: &Path, content: &str) -> Result<(), TemplateError> {
    let write_error = |source| TemplateError::Write {
        path: path.to_owned(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(dir).map_err(write_error)?;
    file.write_all(content.as_bytes()).map_err(write_error)?;
    file.as_file()
        .set_permissions(std::fs::Permissions::from_mode(0o755))
        .map_err(write_error)?;
    file.persist(path).map_err(|err| write_error(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::TempDirExt;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn subs(pairs: &[(&str, &str)]) -> Substitutions {
        let mut substitutions = Substitutions::new();
        for (key, value) in pairs {
            substitutions.insert(key, value).unwrap();
        }
        substitutions
    }

    #[test]
    fn no_placeholder_survives_rendering() {
        let template = Template::from_source(
            "process.sh",
            "cd @PLOTDIR\npython process_plot.py @PLOTDIR @OUTDIR/@VAR.nc @VAR --lev 0\n"
                .to_owned(),
            false,
        );
        let rendered = template
            .render(&subs(&[
                ("PLOTDIR", "run001/plot"),
                ("OUTDIR", "netcdf"),
                ("VAR", "thickness"),
            ]))
            .unwrap();

        assert!(rendered.unused.is_empty());
        assert!(!rendered.text.contains('@'));
        assert_eq!(
            rendered.text,
            "cd run001/plot\npython process_plot.py run001/plot netcdf/thickness.nc thickness --lev 0\n"
        );
    }

    #[test]
    fn missing_value_is_an_error() {
        let template = Template::from_source("job.sh", "echo @VAR @PLOTDIR".to_owned(), false);
        let err = template.render(&subs(&[("VAR", "xVel")])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "no value for @PLOTDIR (line 1) in `job.sh`; write `@@` for a literal `@`"
        );
    }

    #[test]
    fn stray_at_sign_points_to_escape() {
        let template = Template::from_source(
            "job.template.sh",
            "#SBATCH --mail-user=j.doe@leeds.ac.uk\n".to_owned(),
            false,
        );
        let err = template.render(&Substitutions::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "no value for @leeds (line 1) in `job.template.sh`; write `@@` for a literal `@`"
        );

        let escaped = Template::from_source(
            "job.template.sh",
            "#SBATCH --mail-user=j.doe@@leeds.ac.uk\n".to_owned(),
            false,
        );
        assert_eq!(
            escaped.render(&Substitutions::new()).unwrap().text,
            "#SBATCH --mail-user=j.doe@leeds.ac.uk\n"
        );
    }

    #[test]
    fn misspelled_key_is_reported_as_unused() {
        let template = Template::from_source("job.sh", "echo @VAR".to_owned(), false);
        let rendered = template
            .render(&subs(&[("VAR", "xVel"), ("PLOTDIRR", "plot")]))
            .unwrap();
        assert_eq!(rendered.unused, vec!["PLOTDIRR"]);
        assert!(matches!(
            rendered.strict(&template),
            Err(TemplateError::Unused { .. })
        ));
    }

    #[test]
    fn jinja_templates_report_unused_keys() {
        let template = Template::from_source("job.sh.j2", "{{ VAR }}".to_owned(), true);
        let rendered = template
            .render(&subs(&[("VAR", "xVel"), ("OTHER", "1")]))
            .unwrap();
        assert_eq!(rendered.text, "xVel");
        assert_eq!(rendered.unused, vec!["OTHER"]);
    }

    #[test]
    fn rejects_invalid_keys() {
        assert!(Substitutions::new().insert("PLOT DIR", "x").is_err());
        assert!(Substitutions::new().insert("1st", "x").is_err());
        assert!(Substitutions::new().insert("tIndexMin", "0").is_ok());
    }

    #[test]
    fn parses_assignments() {
        assert_eq!(
            parse_assignment("OUTDIR=a=b").unwrap(),
            ("OUTDIR".to_owned(), "a=b".to_owned())
        );
        assert_eq!(
            parse_assignment("EMPTY=").unwrap(),
            ("EMPTY".to_owned(), String::new())
        );
        assert!(parse_assignment("=x").is_err());
        assert!(parse_assignment("novalue").is_err());
    }

    #[test]
    fn load_picks_dialect_by_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.utf8_path().join("job.sh.j2");
        std::fs::write(&path, "{{ name }}").unwrap();

        let template = Template::load(&path).unwrap();
        let rendered = template.render(&subs(&[("name", "run001")])).unwrap();
        assert_eq!(rendered.text, "run001");
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Template::load(Path::new("/nonexistent/job.template.sh")).unwrap_err();
        assert!(matches!(err, TemplateError::Missing(_)));
    }

    #[test]
    fn write_script_is_executable() {
        let dir = TempDir::new().unwrap();
        let path = dir.utf8_path().join("job.sh");

        write_script(&path, "#!/bin/bash\n").unwrap();

        let metadata = std::fs::metadata(&path).unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, 0o755);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "#!/bin/bash\n");
    }

    #[test]
    fn load_directory_skips_subdirectories() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.utf8_path().join("b.template.sh"), "@x").unwrap();
        std::fs::write(dir.utf8_path().join("a.template.sh"), "@y").unwrap();
        std::fs::create_dir(dir.utf8_path().join("nested")).unwrap();

        let names = load_directory(dir.utf8_path())
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a.template.sh", "b.template.sh"]);
    }
}
