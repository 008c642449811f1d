// pgvault/src/utils/command.rs
use async_trait::async_trait;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::errors::CommandError;
use crate::utils::{find_executable, redact_url};

/// Upper bound for a dump/compress/encrypt or restore pipeline.
pub const PIPELINE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Upper bound for captured stdout/stderr of any single stage.
pub const MAX_CAPTURED_OUTPUT: usize = 10 * 1024 * 1024;

/// One external program invocation: argv plus extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Arguments as plain strings, mostly for assertions and logging.
    pub fn arg_strings(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// Value following `flag` in the argument list, e.g. `-in <path>`.
    #[cfg(test)]
    pub fn flag_value(&self, flag: &str) -> Option<String> {
        let args = self.arg_strings();
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1).cloned())
    }
}

// Environment values are never rendered; they carry key material.
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in self.arg_strings() {
            write!(f, " {}", redact_url(&arg))?;
        }
        Ok(())
    }
}

/// A chain of commands where each stage's stdout feeds the next stage's stdin.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub stages: Vec<CommandSpec>,
    pub stdout: Option<PathBuf>,
    pub timeout: Duration,
    pub output_limit: usize,
}

impl Pipeline {
    pub fn new(first: CommandSpec) -> Self {
        Self {
            stages: vec![first],
            stdout: None,
            timeout: PIPELINE_TIMEOUT,
            output_limit: MAX_CAPTURED_OUTPUT,
        }
    }

    pub fn pipe(mut self, next: CommandSpec) -> Self {
        self.stages.push(next);
        self
    }

    pub fn stdout_to(mut self, path: impl AsRef<Path>) -> Self {
        self.stdout = Some(path.as_ref().to_path_buf());
        self
    }

    #[cfg(test)]
    pub fn programs(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.program.as_str()).collect()
    }

    #[cfg(test)]
    pub fn stage(&self, program: &str) -> Option<&CommandSpec> {
        self.stages.iter().find(|s| s.program == program)
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{stage}")?;
        }
        if let Some(path) = &self.stdout {
            write!(f, " > {}", path.display())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Seam between orchestration logic and real processes.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, pipeline: &Pipeline) -> Result<CommandOutput, CommandError>;
}

/// Runs pipelines as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, pipeline: &Pipeline) -> Result<CommandOutput, CommandError> {
        debug!("Running pipeline: {}", pipeline);
        // Children are spawned with kill_on_drop, so dropping the future on
        // timeout also terminates them.
        match tokio::time::timeout(pipeline.timeout, run_pipeline(pipeline)).await {
            Ok(result) => result,
            Err(_) => Err(CommandError::Timeout(pipeline.timeout)),
        }
    }
}

type Capture = JoinHandle<std::io::Result<Option<Vec<u8>>>>;

async fn run_pipeline(pipeline: &Pipeline) -> Result<CommandOutput, CommandError> {
    let last = pipeline.stages.len().saturating_sub(1);
    let mut children: Vec<(String, Child, Capture)> = Vec::with_capacity(pipeline.stages.len());
    let mut upstream: Option<Stdio> = None;

    for (index, stage) in pipeline.stages.iter().enumerate() {
        let executable = find_executable(&stage.program)?;
        let mut command = Command::new(executable);
        command
            .args(&stage.args)
            .envs(stage.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        command.stdin(upstream.take().unwrap_or_else(Stdio::null));

        match (&pipeline.stdout, index == last) {
            (Some(path), true) => {
                command.stdout(Stdio::from(std::fs::File::create(path)?));
            }
            _ => {
                command.stdout(Stdio::piped());
            }
        }

        let mut child = command.spawn().map_err(|source| CommandError::Spawn {
            program: stage.program.clone(),
            source,
        })?;

        if index != last {
            if let Some(stdout) = child.stdout.take() {
                upstream = Some(stdout.try_into()?);
            }
        }

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("stderr was not captured"))?;
        let capture = tokio::spawn(read_bounded(stderr, pipeline.output_limit));
        children.push((stage.program.clone(), child, capture));
    }

    let stdout_capture = children
        .last_mut()
        .and_then(|(_, child, _)| child.stdout.take())
        .map(|stdout| tokio::spawn(read_bounded(stdout, pipeline.output_limit)));

    // Once stdout overflows its reader closes the pipe and the last stage
    // dies of SIGPIPE, so the limit has to be reported before exit statuses.
    let stdout = match stdout_capture {
        Some(capture) => {
            let program = pipeline.stages[last].program.clone();
            join_capture(capture, &program, pipeline.output_limit).await?
        }
        None => Vec::new(),
    };

    let mut stderr_all = String::new();
    let mut first_failure = None;

    for (program, mut child, capture) in children {
        let stderr = join_capture(capture, &program, pipeline.output_limit).await?;
        let status = child.wait().await?;
        let stderr = String::from_utf8_lossy(&stderr).into_owned();
        if !status.success() && first_failure.is_none() {
            first_failure = Some(CommandError::Failed {
                program: program.clone(),
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        stderr_all.push_str(&stderr);
    }

    if let Some(err) = first_failure {
        return Err(err);
    }

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: stderr_all,
    })
}

async fn join_capture(capture: Capture, program: &str, limit: usize) -> Result<Vec<u8>, CommandError> {
    let captured = capture.await.map_err(std::io::Error::other)??;
    captured.ok_or_else(|| CommandError::OutputLimit {
        program: program.to_string(),
        limit,
    })
}

/// Reads at most `limit` bytes; `None` means the stream had more.
async fn read_bounded<R>(reader: R, limit: usize) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    reader.take(limit as u64 + 1).read_to_end(&mut buf).await?;
    if buf.len() > limit {
        Ok(None)
    } else {
        Ok(Some(buf))
    }
}
