use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::layout::{ContentLayout, RunPaths};
use crate::reddit::Thread;

/// Produces the screenshot of one segment.
pub trait PageRenderer {
    /// `source` is a comment URL or the path of a text file holding story text.
    fn render(&self, source: &str, output: &Path, width: u32) -> PipelineResult<()>;
}

/// Runs a user-supplied command as `<command> <url-or-text-file> <output.png> <width>`.
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    program: String,
    args: Vec<String>,
}

impl CommandRenderer {
    /// `None` when no command is configured.
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl PageRenderer for CommandRenderer {
    fn render(&self, source: &str, output: &Path, width: u32) -> PipelineResult<()> {
        let result = Command::new(&self.program)
            .args(&self.args)
            .arg(source)
            .arg(output)
            .arg(width.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()?;
        if !result.status.success() {
            debug!("renderer stderr: {}", String::from_utf8_lossy(&result.stderr).trim());
            return Err(PipelineError::MissingOptionalAsset(output.to_path_buf()));
        }
        if !output.exists() {
            return Err(PipelineError::MissingOptionalAsset(output.to_path_buf()));
        }
        Ok(())
    }
}

/// Captures a screenshot for every body segment of `layout`. Failures are logged and
/// leave the image absent. Returns how many were written.
pub fn capture_all(
    renderer: &dyn PageRenderer,
    thread: &Thread,
    layout: &ContentLayout,
    run: &RunPaths,
    width: u32,
) -> PipelineResult<usize> {
    run.create()?;
    let sources: Vec<String> = match layout {
        ContentLayout::Comments { count } => thread
            .comments
            .iter()
            .take(*count)
            .map(|c| c.url.clone())
            .collect(),
        ContentLayout::StorySingle => vec![text_source(run, "story_content", &thread.body)?],
        ContentLayout::StoryParagraphs { count } => thread
            .paragraphs()
            .iter()
            .take(*count)
            .enumerate()
            .map(|(i, p)| text_source(run, &format!("img{i}"), p))
            .collect::<PipelineResult<_>>()?,
    };

    let mut written = 0;
    for (i, source) in sources.iter().enumerate() {
        let output = run.image_dir().join(layout.image_name(i));
        match renderer.render(source, &output, width) {
            Ok(()) => {
                debug!(segment = i + 1, image = %output.display(), "screenshot captured");
                written += 1;
            }
            Err(err) => warn!(segment = i + 1, "screenshot failed: {err}"),
        }
    }
    info!("Captured {written} of {} screenshots", sources.len());
    Ok(written)
}

fn text_source(run: &RunPaths, stem: &str, text: &str) -> PipelineResult<String> {
    let path = run.image_dir().join(format!("{stem}.txt"));
    fs::write(&path, text)?;
    Ok(path.to_string_lossy().into_owned())
}
