//! Translation of a [`ParamKey`] into a generator command line.

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;

use super::key::ParamKey;

/// A fully formed generator invocation. Arguments are passed to the process
/// directly, never through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl GeneratorCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Arguments as lossy strings, for logging and assertions.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

impl fmt::Display for GeneratorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Renders keys into `<tool> --backend <backend> <model> -o - --export-format <fmt> -D ...`.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    program: PathBuf,
    launcher_args: Vec<OsString>,
    model_file: PathBuf,
    backend: String,
    export_format: String,
}

impl CommandBuilder {
    pub fn new(program: impl Into<PathBuf>, model_file: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            launcher_args: Vec::new(),
            model_file: model_file.into(),
            backend: "manifold".to_string(),
            export_format: "stl".to_string(),
        }
    }

    /// Arguments placed before the generator's own, for when `program` is a
    /// wrapper such as `xvfb-run` or `flatpak run`.
    pub fn with_launcher_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.launcher_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    pub fn with_export_format(mut self, format: impl Into<String>) -> Self {
        self.export_format = format.into();
        self
    }

    pub fn export_format(&self) -> &str {
        &self.export_format
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    pub fn model_file(&self) -> &PathBuf {
        &self.model_file
    }

    /// Pure function of the key: equal keys always produce equal commands.
    pub fn build(&self, key: &ParamKey) -> GeneratorCommand {
        let mut cmd = GeneratorCommand::new(self.program.clone());
        for arg in &self.launcher_args {
            cmd = cmd.arg(arg.clone());
        }
        cmd = cmd
            .arg("--backend")
            .arg(self.backend.as_str())
            .arg(self.model_file.as_os_str())
            .arg("-o")
            .arg("-")
            .arg("--export-format")
            .arg(self.export_format.as_str());

        for define in key.defines() {
            cmd = cmd.arg("-D").arg(define);
        }
        cmd
    }
}
