//! Blocking execution of external commands.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;

/// A fully resolved command line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new<S: Into<String>>(program: S, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            ..Self::default()
        }
    }

    /// `sh -c <script>`, used for hooks.
    pub fn shell<S: Into<String>>(script: S) -> Self {
        Self::new("sh", vec!["-c".to_string(), script.into()])
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn with_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.dir = Some(dir.into());
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs a command to completion. A non-zero exit is an error.
pub trait Executor {
    fn run(&self, command: &CommandSpec) -> Result<CommandOutput>;
}

impl<E: Executor + ?Sized> Executor for &E {
    fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        (**self).run(command)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessExecutor;

impl Executor for ProcessExecutor {
    fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        tracing::debug!("Executing {} {:?}", command.program, command.args);

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args).envs(&command.env);
        if let Some(dir) = &command.dir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .map_err(Error::from)
            .with_msg(format!("Failed to start {:?}", command.program))?;
        let code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        tracing::trace!("{} exited with {code}", command.program);

        if !output.status.success() {
            return Err(Error::CommandFailed {
                program: command.program.clone(),
                code,
                stderr,
            });
        }
        Ok(CommandOutput { code, stdout, stderr })
    }
}
