use super::{BuildInvocation, BuildRunner};
use crate::core::{BuildError, CancellationToken, Result};
use crate::log_sink::LogSink;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[cfg(windows)]
const CREATE_NEW_CONSOLE: u32 = 0x0000_0010;

fn default_program() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("mvn.cmd")
    } else {
        PathBuf::from("mvn")
    }
}

/// Build runner that spawns Maven in the module directory
#[derive(Debug, Clone)]
pub struct MavenRunner {
    program: PathBuf,
}

impl MavenRunner {
    pub fn new() -> Self {
        Self {
            program: default_program(),
        }
    }

    /// Use a specific executable instead of `mvn` from `PATH`
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

impl Default for MavenRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "Build output stream closed with error");
                    break;
                }
            }
        }
    });
}

#[async_trait]
impl BuildRunner for MavenRunner {
    async fn run(
        &self,
        invocation: &BuildInvocation<'_>,
        output: &dyn LogSink,
        cancel: &CancellationToken,
    ) -> Result<i32> {
        let args = invocation.args();
        output.line(&format!("$ cd {}", invocation.module_path.display()));
        output.line(&format!("$ {} {}", self.program.display(), args.join(" ")));

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .current_dir(invocation.module_path)
            .envs(invocation.env_overrides)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if invocation.detached {
            command.stdout(Stdio::null()).stderr(Stdio::null());
            #[cfg(windows)]
            command.creation_flags(CREATE_NEW_CONSOLE);
        } else {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let mut child = command.spawn().map_err(|e| {
            BuildError::process(
                invocation.module_path,
                format!("failed to start {}", self.program.display()),
                Some(e),
            )
        })?;
        debug!(
            pid = ?child.id(),
            module_path = %invocation.module_path.display(),
            detached = invocation.detached,
            "Build process started"
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx.clone());
        }
        drop(tx);

        if invocation.detached {
            output.line("[separate window launched]");
        }

        let mut streaming = true;
        let mut kill_requested = false;
        let mut kill_sent = false;
        let status = loop {
            tokio::select! {
                line = rx.recv(), if streaming => match line {
                    Some(line) => output.line(&line),
                    None => streaming = false,
                },
                status = child.wait(), if !streaming => break status,
                _ = cancel.cancelled(), if !kill_requested => kill_requested = true,
            }

            if kill_requested && !kill_sent {
                kill_sent = true;
                warn!(module_path = %invocation.module_path.display(), "Cancellation requested, stopping build process");
                output.line("Cancellation requested, stopping build process.");
                if let Err(e) = child.start_kill() {
                    debug!(error = %e, "Build process already exited");
                }
                // Grandchildren may keep the pipes open, stop waiting on them
                streaming = false;
            }
        };
        while let Ok(line) = rx.try_recv() {
            output.line(&line);
        }

        let status = status.map_err(|e| {
            BuildError::process(invocation.module_path, "failed to wait for build process", Some(e))
        })?;
        // Killed processes have no exit code
        Ok(status.code().unwrap_or(-1))
    }
}
