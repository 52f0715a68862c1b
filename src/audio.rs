use std::path::PathBuf;

use tracing::{debug, error, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::ffmpeg::{self, FfmpegCommand, FfmpegRunner};
use crate::filter::FilterGraph;
use crate::layout::{ContentLayout, RunPaths, Segment};
use crate::probe::MediaProbe;

pub const AUDIO_BITRATE: &str = "192k";

/// The narration track and every segment with its probed length, title first.
/// Missing segments keep their slot with a duration of 0.0.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledAudio {
    pub path: PathBuf,
    pub segments: Vec<Segment>,
}

impl AssembledAudio {
    pub fn durations(&self) -> Vec<f64> {
        self.segments.iter().map(|s| s.duration_seconds).collect()
    }

    pub fn total_duration(&self) -> f64 {
        self.segments
            .iter()
            .map(|s| s.duration_seconds)
            .filter(|d| *d > 0.0)
            .sum()
    }
}

pub struct AudioAssembler<'a> {
    probe: &'a dyn MediaProbe,
    runner: &'a dyn FfmpegRunner,
}

impl<'a> AudioAssembler<'a> {
    pub fn new(probe: &'a dyn MediaProbe, runner: &'a dyn FfmpegRunner) -> Self {
        Self { probe, runner }
    }

    /// Probes every narration clip of `layout` and concatenates the ones present, in
    /// segment order, into `audio.mp3`.
    pub fn assemble(&self, run: &RunPaths, layout: &ContentLayout) -> PipelineResult<AssembledAudio> {
        let mut segments = layout.segments(run);
        let mut clips = Vec::with_capacity(segments.len());

        if let ContentLayout::Comments { count: 0 } = layout {
            warn!("No comment clips requested; the video will only narrate the title");
        }

        for segment in &mut segments {
            if !segment.audio_path.exists() {
                if segment.is_title() {
                    error!(path = %segment.audio_path.display(), "title narration is missing");
                    return Err(PipelineError::MissingRequiredAsset(segment.audio_path.clone()));
                }
                let missing = PipelineError::MissingOptionalAsset(segment.audio_path.clone());
                warn!(segment = segment.index, "{missing}; counting it as 0s");
                continue;
            }

            let duration = self.probe.duration(&segment.audio_path)?;
            debug!(segment = segment.index, duration, "probed narration clip");
            segment.duration_seconds = duration;
            clips.push(segment.audio_path.clone());
        }

        if clips.len() == 1 && layout.body_segments() > 0 {
            warn!("No content clips were found; only the title will be narrated");
        }

        let output = run.concatenated_audio();
        let mut graph = FilterGraph::new();
        let inputs: Vec<_> = clips.iter().map(|clip| graph.audio_input(clip)).collect();
        let refs: Vec<_> = inputs.iter().collect();
        let joined = graph.apply(&refs, format!("concat=n={}:v=0:a=1", refs.len()));
        let command = graph.to_command(
            FfmpegCommand::new(),
            &[&joined],
            &["-b:a".to_string(), AUDIO_BITRATE.to_string()],
            &output,
        );

        info!("Concatenating {} audio clips into {}", clips.len(), output.display());
        ffmpeg::run_stage(self.runner, "audio concatenation", &command)?;

        Ok(AssembledAudio {
            path: output,
            segments,
        })
    }
}
