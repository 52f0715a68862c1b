use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::layout::{ContentLayout, RunPaths};

/// One screenshot to be overlaid, scaled to `width` with its aspect ratio preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualLayer {
    /// Position of the narration segment this image belongs to (0 is the title).
    pub segment_index: usize,
    pub path: PathBuf,
    pub width: u32,
}

impl VisualLayer {
    pub fn is_title(&self) -> bool {
        self.segment_index == 0
    }

    /// Filter that scales the layer; `-1` keeps the aspect ratio.
    pub fn scale_filter(&self) -> String {
        format!("scale={}:-1", self.width)
    }
}

/// Collects the title image and every body screenshot that exists, in segment order.
/// Missing screenshots are skipped, so the result can be shorter than the narration.
pub fn build(
    run: &RunPaths,
    layout: &ContentLayout,
    target_width: u32,
    title_image: &Path,
) -> PipelineResult<Vec<VisualLayer>> {
    if !title_image.exists() {
        error!(path = %title_image.display(), "title image is missing");
        return Err(PipelineError::MissingRequiredAsset(title_image.to_path_buf()));
    }

    let mut layers = vec![VisualLayer {
        segment_index: 0,
        path: title_image.to_path_buf(),
        width: target_width,
    }];

    for segment in layout.segments(run).into_iter().skip(1) {
        match segment.image_path {
            Some(path) => {
                debug!(segment = segment.index, path = %path.display(), "adding screenshot");
                layers.push(VisualLayer {
                    segment_index: segment.index,
                    path,
                    width: target_width,
                });
            }
            None => {
                let expected = run.image_dir().join(layout.image_name(segment.index - 1));
                let missing = PipelineError::MissingOptionalAsset(expected);
                warn!(segment = segment.index, "{missing}; skipping its overlay");
            }
        }
    }

    info!("Collected {} image layers for the video", layers.len());
    Ok(layers)
}

/// Screenshot width for a frame `frame_width` wide; `percent` of the frame.
pub fn screenshot_width(frame_width: u32, percent: u32) -> u32 {
    frame_width * percent / 100
}
