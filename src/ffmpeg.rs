use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, error};

use crate::error::{PipelineError, PipelineResult};

/// Argument list for one ffmpeg invocation. Always overwrites its outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegCommand {
    args: Vec<String>,
}

impl Default for FfmpegCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegCommand {
    pub fn new() -> Self {
        Self {
            args: vec!["-y".to_string()],
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string_lossy().into_owned());
        }
        self
    }

    pub fn input(self, path: &Path) -> Self {
        self.arg("-i").arg(path)
    }

    pub fn as_args(&self) -> &[String] {
        &self.args
    }

    /// Value following the first occurrence of `flag`.
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|idx| self.args.get(idx + 1))
            .map(String::as_str)
    }

    /// The last argument, which is the output target for every command built here.
    pub fn output(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }

    /// Shell-like rendering used when logging a failed invocation.
    pub fn display(&self) -> String {
        let mut line = String::from("ffmpeg");
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.contains([' ', '\'', '"', ';', '[', '(']) {
                line.push('\'');
                line.push_str(&arg.replace('\'', "'\\''"));
                line.push('\'');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

/// How a failed ffmpeg run ended.
#[derive(Debug, Clone)]
pub struct FfmpegFailure {
    pub status: String,
    pub stderr: String,
}

pub trait FfmpegRunner {
    /// Runs ffmpeg to completion, blocking the caller.
    fn run(&self, command: &FfmpegCommand) -> Result<(), FfmpegFailure>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemFfmpeg;

impl FfmpegRunner for SystemFfmpeg {
    fn run(&self, command: &FfmpegCommand) -> Result<(), FfmpegFailure> {
        let output = Command::new("ffmpeg")
            .args(command.as_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| FfmpegFailure {
                status: "not started".to_string(),
                stderr: format!("failed to spawn ffmpeg: {e}"),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(FfmpegFailure {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

/// Runs one ffmpeg step. On failure the full diagnostic stream and the exact command
/// are logged before the error is handed back.
pub fn run_stage(
    runner: &dyn FfmpegRunner,
    stage: &str,
    command: &FfmpegCommand,
) -> PipelineResult<()> {
    debug!(stage, command = %command.display(), "running ffmpeg");
    runner.run(command).map_err(|failure| {
        error!(stage, "ffmpeg failed: {}", failure.stderr.trim());
        error!(stage, "failed command: {}", command.display());
        PipelineError::EncodingFailure {
            stage: stage.to_string(),
            status: failure.status,
            command: command.display(),
            stderr: failure.stderr,
        }
    })
}

/// Number of encoder threads to request.
pub fn thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
pub mod testing {
    use std::cell::RefCell;
    use std::fs;
    use std::path::Path;

    use super::{FfmpegCommand, FfmpegFailure, FfmpegRunner};

    /// Records every command instead of spawning ffmpeg. Optionally fails any command
    /// with an argument containing a marker (or equal to an exact marker) and touches
    /// the output file on success.
    #[derive(Default)]
    pub struct RecordingRunner {
        pub calls: RefCell<Vec<FfmpegCommand>>,
        pub fail_on: Vec<String>,
        pub fail_on_exact: Vec<String>,
        pub write_outputs: bool,
    }

    impl RecordingRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn writing_outputs() -> Self {
            Self {
                write_outputs: true,
                ..Self::default()
            }
        }

        pub fn failing_on(marker: &str) -> Self {
            Self {
                fail_on: vec![marker.to_string()],
                write_outputs: true,
                ..Self::default()
            }
        }

        pub fn failing_on_arg(arg: &str) -> Self {
            Self {
                fail_on_exact: vec![arg.to_string()],
                write_outputs: true,
                ..Self::default()
            }
        }

        pub fn commands(&self) -> Vec<FfmpegCommand> {
            self.calls.borrow().clone()
        }
    }

    impl FfmpegRunner for RecordingRunner {
        fn run(&self, command: &FfmpegCommand) -> Result<(), FfmpegFailure> {
            self.calls.borrow_mut().push(command.clone());
            let failing = command.as_args().iter().any(|arg| {
                self.fail_on.iter().any(|marker| arg.contains(marker.as_str()))
                    || self.fail_on_exact.contains(arg)
            });
            if failing {
                if let Some(output) = command.output() {
                    let _ = fs::write(output, b"truncated");
                }
                return Err(FfmpegFailure {
                    status: "exit status: 1".to_string(),
                    stderr: "Conversion failed!".to_string(),
                });
            }
            if self.write_outputs {
                if let Some(output) = command.output() {
                    let path = Path::new(output);
                    if let Some(parent) = path.parent() {
                        let _ = fs::create_dir_all(parent);
                    }
                    let _ = fs::write(path, b"rendered");
                }
            }
            Ok(())
        }
    }
}
