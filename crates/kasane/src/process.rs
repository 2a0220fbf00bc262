//! External tools invoked while assembling the final file.
//!
//! Every invocation goes through [`ProcessRunner`], so the pipeline can be
//! driven by a recording double in tests. [`CommandRunner`] is the real
//! implementation and spawns the tools with `tokio::process`.

use std::{
    collections::HashMap,
    ffi::{OsStr, OsString},
    fmt,
    future::Future,
    path::{Path, PathBuf},
    process::Stdio,
};

use tokio::process::Command;

use crate::error::{KasaneError, KasaneResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// Concatenation, muxing and defragmentation.
    Ffmpeg,
    /// CENC decryption.
    Mp4Decrypt,
    /// Final Matroska conversion.
    MkvMerge,
}

impl Tool {
    pub fn binary_name(&self) -> &'static str {
        match self {
            Self::Ffmpeg => "ffmpeg",
            Self::Mp4Decrypt => "mp4decrypt",
            Self::MkvMerge => "mkvmerge",
        }
    }

    /// mkvmerge exits with 1 when it only emitted warnings.
    fn accepts_exit_code(&self, code: Option<i32>) -> bool {
        match (self, code) {
            (_, Some(0)) => true,
            (Self::MkvMerge, Some(1)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary_name())
    }
}

/// A fully prepared invocation of one external tool.
///
/// `inputs` and `output` duplicate what is already inside `args`, so that
/// callers (and test doubles) can inspect the data flow without parsing
/// tool-specific arguments.
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    pub tool: Tool,
    pub args: Vec<OsString>,
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
}

impl ExternalCommand {
    pub fn new<P>(tool: Tool, output: P) -> Self
    where
        P: Into<PathBuf>,
    {
        Self {
            tool,
            args: Vec::new(),
            inputs: Vec::new(),
            output: output.into(),
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    /// Register an input file and pass it as an argument.
    pub fn input<P: AsRef<Path>>(mut self, input: P) -> Self {
        self.args.push(input.as_ref().as_os_str().to_owned());
        self.inputs.push(input.as_ref().to_path_buf());
        self
    }

    /// Register an input file that is read by the tool but not passed on the
    /// command line directly, e.g. the entries of a concat list.
    pub fn implicit_input<P: AsRef<Path>>(mut self, input: P) -> Self {
        self.inputs.push(input.as_ref().to_path_buf());
        self
    }

    /// Pass the output path as the next argument.
    pub fn output_arg(mut self) -> Self {
        self.args.push(self.output.as_os_str().to_owned());
        self
    }
}

impl fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tool)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

pub trait ProcessRunner: Send + Sync + 'static {
    /// Run the command to completion. A non-zero exit status must be reported
    /// as [`KasaneError::ExternalProcess`].
    fn run(&self, command: &ExternalCommand) -> impl Future<Output = KasaneResult<()>> + Send;
}

/// Spawns external tools found in `PATH`, or at an explicitly configured location.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    tool_paths: HashMap<Tool, PathBuf>,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool_path<P>(mut self, tool: Tool, path: P) -> Self
    where
        P: Into<PathBuf>,
    {
        self.tool_paths.insert(tool, path.into());
        self
    }

    fn resolve(&self, tool: Tool) -> KasaneResult<PathBuf> {
        match self.tool_paths.get(&tool) {
            Some(path) => Ok(path.clone()),
            None => Ok(which::which(tool.binary_name())?),
        }
    }
}

impl ProcessRunner for CommandRunner {
    async fn run(&self, command: &ExternalCommand) -> KasaneResult<()> {
        let program = self.resolve(command.tool)?;
        tracing::debug!("Running command: {command}");

        let output = Command::new(program)
            .args(&command.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if command.tool.accepts_exit_code(output.status.code()) {
            if !output.status.success() {
                tracing::warn!("{} finished with warnings", command.tool);
            }
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<_> = stderr.lines().rev().take(5).collect();
        Err(KasaneError::ExternalProcess {
            tool: command.tool,
            status: output.status.to_string(),
            stderr: tail.into_iter().rev().collect::<Vec<_>>().join("\n"),
        })
    }
}
