use camino::Utf8PathBuf as PathBuf;
use log::debug;
use std::iter;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to run `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("`{command}` wrote output that is not valid utf-8")]
    NonUtf8 { command: String },
}

/// An external command line together with the environment it runs in.
#[derive(Clone, Default)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_owned(),
            ..Self::default()
        }
    }

    pub fn arg<A: AsRef<str>>(mut self, arg: A) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<str>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_owned()));
        self
    }

    pub fn envs<'a, I>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = &'a (String, String)>,
    {
        self.envs.extend(envs.into_iter().cloned());
        self
    }

    pub fn current_dir(mut self, dir: PathBuf) -> Self {
        self.current_dir = Some(dir);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let quote = |arg: &String| {
            if arg.contains(char::is_whitespace) {
                format!("\"{arg}\"")
            } else {
                arg.clone()
            }
        };
        let command = iter::once(&self.program)
            .chain(self.args.iter())
            .map(quote)
            .collect::<Vec<_>>()
            .join(" ");

        write!(f, "{command}")
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

pub trait CommandRunner {
    fn output(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError>;

    /// Like `output`, but a non-zero exit is an error.
    fn checked_output(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        let output = self.output(invocation)?;
        if output.success() {
            return Ok(output);
        }

        Err(ExecError::Failed {
            command: invocation.to_string(),
            status: match output.code {
                Some(code) => format!("status {code}"),
                None => "a signal".to_owned(),
            },
            stderr: output.stderr.trim().to_owned(),
        })
    }
}

/// Runs commands on the local machine and waits for them.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn output(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        debug!("running {invocation}");

        let mut command = std::process::Command::new(invocation.program());
        command
            .args(invocation.arguments())
            .envs(invocation.envs.iter().map(|(k, v)| (k, v)));
        if let Some(dir) = &invocation.current_dir {
            command.current_dir(dir);
        }

        let output = command.output().map_err(|source| ExecError::Spawn {
            command: invocation.to_string(),
            source,
        })?;

        let non_utf8 = |_| ExecError::NonUtf8 {
            command: invocation.to_string(),
        };
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8(output.stdout).map_err(non_utf8)?,
            stderr: String::from_utf8(output.stderr).map_err(non_utf8)?,
        })
    }
}
