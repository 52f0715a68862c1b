use std::path::PathBuf;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Failures raised while assembling and rendering a video.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// Title narration or title image is absent; nothing can be rendered.
    #[error("required asset missing: {}", .0.display())]
    MissingRequiredAsset(PathBuf),

    /// A comment or story clip is absent. Logged, never propagated by the assemblers.
    #[error("optional asset missing: {}", .0.display())]
    MissingOptionalAsset(PathBuf),

    #[error("background of {total:.2}s is too short for a {required:.2}s video")]
    BackgroundTooShort { total: f64, required: f64 },

    /// ffmpeg returned a non-zero status. `stderr` holds the full diagnostic stream.
    #[error("{stage} failed ({status}): {}", last_line(.stderr))]
    EncodingFailure {
        stage: String,
        status: String,
        command: String,
        stderr: String,
    },

    #[error("could not remove {}: {source}", .path.display())]
    ResourceCleanupFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not probe {}: {reason}", .path.display())]
    Probe { path: PathBuf, reason: String },

    #[error("background catalog: {0}")]
    Catalog(String),

    #[error("could not download {uri}: {reason}")]
    Download { uri: String, reason: String },

    /// Reddit could not be reached, or no thread passed the filters.
    #[error("reddit: {0}")]
    Content(String),

    #[error("voice synthesis failed for {}: {reason}", .path.display())]
    Synthesis { path: PathBuf, reason: String },

    #[error("configuration: {0}")]
    Config(String),

    #[error("video metadata: {0}")]
    Metadata(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn probe(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Probe {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    pub fn download(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Download {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    pub fn content(msg: impl Into<String>) -> Self {
        Self::Content(msg.into())
    }

    pub fn synthesis(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Synthesis {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn metadata(msg: impl Into<String>) -> Self {
        Self::Metadata(msg.into())
    }
}

fn last_line(stderr: &str) -> &str {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("no diagnostic output")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_failure_reports_stage_and_last_diagnostic_line() {
        let err = PipelineError::EncodingFailure {
            stage: "background crop".to_string(),
            status: "exit status: 1".to_string(),
            command: "ffmpeg -y -i in.mp4 out.mp4".to_string(),
            stderr: "Input #0\n  Stream #0:0\nUnknown encoder 'h264'\n\n".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "background crop failed (exit status: 1): Unknown encoder 'h264'"
        );
    }

    #[test]
    fn encoding_failure_without_stderr_still_formats() {
        let err = PipelineError::EncodingFailure {
            stage: "render".to_string(),
            status: "signal".to_string(),
            command: String::new(),
            stderr: String::new(),
        };
        assert!(err.to_string().ends_with("no diagnostic output"));
    }
}
