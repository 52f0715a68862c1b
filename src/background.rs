use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::{info, warn};

use crate::audio::AUDIO_BITRATE;
use crate::catalog::{BackgroundAssets, BackgroundLibrary, Position};
use crate::error::{PipelineError, PipelineResult};
use crate::ffmpeg::{self, FfmpegCommand, FfmpegRunner};
use crate::filter::{FilterGraph, Stream};
use crate::layout::RunPaths;
use crate::probe::MediaProbe;
use crate::timing::{self, TimeWindow};

pub const VIDEO_BITRATE: &str = "20M";

/// Cuts the chosen background down to the narration length and crops it to the frame.
pub struct BackgroundPreparer<'a> {
    probe: &'a dyn MediaProbe,
    runner: &'a dyn FfmpegRunner,
}

impl<'a> BackgroundPreparer<'a> {
    pub fn new(probe: &'a dyn MediaProbe, runner: &'a dyn FfmpegRunner) -> Self {
        Self { probe, runner }
    }

    /// Writes a random `video_length` window of the background video to
    /// `background.mp4`, and of the background music to `background.mp3` unless the
    /// music is muted. Returns the credit of the footage.
    pub fn chop<R: Rng + ?Sized>(
        &self,
        library: &BackgroundLibrary<'_>,
        assets: &BackgroundAssets,
        run: &RunPaths,
        video_length: f64,
        audio_volume: f64,
        rng: &mut R,
    ) -> PipelineResult<String> {
        std::fs::create_dir_all(&run.root)?;

        if audio_volume == 0.0 {
            info!("Background audio volume is 0; skipping background audio");
        } else {
            let source = library.ensure_audio(&assets.audio)?;
            let window = self.window_of(&source, video_length, rng)?;
            let command = cut_command(&source, window)
                .args(["-vn", "-b:a", AUDIO_BITRATE])
                .arg(run.background_audio());
            ffmpeg::run_stage(self.runner, "background audio cut", &command)?;
            info!("Background audio cut from {:.1}s to {:.1}s", window.start, window.end);
        }

        let source = library.ensure_video(&assets.video)?;
        let window = self.window_of(&source, video_length, rng)?;
        let copy = cut_command(&source, window)
            .args(["-map", "0", "-c", "copy"])
            .arg(run.background_video());
        if let Err(err) = ffmpeg::run_stage(self.runner, "background cut", &copy) {
            warn!("{err}; cutting again with re-encoding");
            let reencode = cut_command(&source, window)
                .args(["-c:v", "libx264", "-c:a", "aac"])
                .arg(run.background_video());
            ffmpeg::run_stage(self.runner, "background cut (re-encode)", &reencode)?;
        }
        info!("Background video cut from {:.1}s to {:.1}s", window.start, window.end);

        Ok(assets.credit().to_string())
    }

    fn window_of<R: Rng + ?Sized>(
        &self,
        source: &Path,
        video_length: f64,
        rng: &mut R,
    ) -> PipelineResult<TimeWindow> {
        let total = self.probe.duration(source)?;
        timing::compute_window(total, video_length, rng)
    }

    /// Crops `background.mp4` to the `width:height` aspect at `position` into
    /// `background_noaudio.mp4`, dropping its audio. Retries once with the software encoder.
    pub fn prepare(
        &self,
        run: &RunPaths,
        width: u32,
        height: u32,
        position: &Position,
    ) -> PipelineResult<PathBuf> {
        let input = run.background_video();
        if !input.exists() {
            return Err(PipelineError::MissingRequiredAsset(input));
        }
        let output = run.background_noaudio();

        let crop = format!("crop=ih*({width}/{height}):ih:{}:0", position.crop_x());
        let primary = crop_command(&input, &output, &crop, "h264");
        if let Err(err) = ffmpeg::run_stage(self.runner, "background crop", &primary) {
            warn!("{err}; retrying with libx264");
            let fallback = crop_command(&input, &output, &crop, "libx264");
            ffmpeg::run_stage(self.runner, "background crop (libx264)", &fallback)?;
        }

        info!("Background video prepared at {}", output.display());
        Ok(output)
    }
}

fn cut_command(source: &Path, window: TimeWindow) -> FfmpegCommand {
    FfmpegCommand::new()
        .arg("-ss")
        .arg(format!("{:.3}", window.start))
        .input(source)
        .arg("-t")
        .arg(format!("{:.3}", window.duration()))
}

fn crop_command(input: &Path, output: &Path, crop: &str, codec: &str) -> FfmpegCommand {
    FfmpegCommand::new()
        .input(input)
        .arg("-filter:v")
        .arg(crop)
        .args(["-an", "-c:v", codec, "-b:v", VIDEO_BITRATE, "-threads"])
        .arg(ffmpeg::thread_count().to_string())
        .arg(output)
}

/// Mixes the background music under `main` at `volume`. Returns `main` untouched when
/// the music is muted or was never cut.
pub fn merge_audio(graph: &mut FilterGraph, main: &Stream, run: &RunPaths, volume: f64) -> Stream {
    if volume == 0.0 {
        return main.clone();
    }
    let music = run.background_audio();
    if !music.exists() {
        let missing = PipelineError::MissingOptionalAsset(music);
        warn!("{missing}; rendering without background music");
        return main.clone();
    }

    let music = graph.audio_input(&music);
    let quieter = graph.apply(&[&music], format!("volume={volume}"));
    graph.apply(&[main, &quieter], "amix=inputs=2:duration=longest")
}
