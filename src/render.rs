//! Drives one video from prepared assets to finished files.
//!
//! The stages run strictly in order:
//! `Init → BackgroundPrepared → AudioAssembled → ImagesBuilt → Composited →
//! MainRendered → [NarrationOnlyRendered] → ThumbnailGenerated → MetadataSaved → Done`.
//! Any error stops the run; it is logged with the run id and the last completed stage
//! and handed back to the caller. Thumbnail failures are the only ones absorbed.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info, warn};

use crate::audio::{AUDIO_BITRATE, AudioAssembler};
use crate::background::{self, BackgroundPreparer, VIDEO_BITRATE};
use crate::catalog::Position;
use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};
use crate::ffmpeg::{self, FfmpegCommand, FfmpegRunner};
use crate::filter::{self, FilterGraph, Stream};
use crate::images;
use crate::layout::{ContentLayout, Workspace};
use crate::metadata::{MetadataStore, VideoRecord};
use crate::overlay;
use crate::probe::MediaProbe;
use crate::progress::ProgressTracker;
use crate::title::TitleRenderer;
use crate::utils::output_file_stem;

pub const NARRATION_ONLY_DIR: &str = "OnlyTTS";
const CREDIT_FONT: &str = "Roboto-Regular.ttf";
const PART_SUFFIX: &str = "part";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    BackgroundPrepared,
    AudioAssembled,
    ImagesBuilt,
    Composited,
    MainRendered,
    NarrationOnlyRendered,
    ThumbnailGenerated,
    MetadataSaved,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::BackgroundPrepared => "background prepared",
            Self::AudioAssembled => "audio assembled",
            Self::ImagesBuilt => "images built",
            Self::Composited => "composited",
            Self::MainRendered => "main rendered",
            Self::NarrationOnlyRendered => "narration-only rendered",
            Self::ThumbnailGenerated => "thumbnail generated",
            Self::MetadataSaved => "metadata saved",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// What to render: the thread the run was prepared for.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub run_id: String,
    pub subreddit: String,
    pub title: String,
    pub layout: ContentLayout,
    pub background_credit: String,
    pub background_position: Position,
}

/// One encode pass: which composed streams go into which file.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub name: &'static str,
    pub video: Stream,
    pub audio: Stream,
    pub output: PathBuf,
    pub total_duration: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOutput {
    pub video: PathBuf,
    pub narration_only: Option<PathBuf>,
    pub thumbnail: Option<PathBuf>,
}

pub struct RenderOrchestrator<'a> {
    config: &'a Config,
    workspace: &'a Workspace,
    probe: &'a dyn MediaProbe,
    runner: &'a dyn FfmpegRunner,
    store: &'a dyn MetadataStore,
    show_progress: bool,
}

impl<'a> RenderOrchestrator<'a> {
    pub fn new(
        config: &'a Config,
        workspace: &'a Workspace,
        probe: &'a dyn MediaProbe,
        runner: &'a dyn FfmpegRunner,
        store: &'a dyn MetadataStore,
    ) -> Self {
        Self {
            config,
            workspace,
            probe,
            runner,
            store,
            show_progress: true,
        }
    }

    /// Draws a terminal progress bar per encode pass when `show` is set.
    pub fn with_progress_bars(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn render(&self, request: &RenderRequest) -> PipelineResult<RenderOutput> {
        let mut stage = Stage::Init;
        info!(run_id = %request.run_id, "Starting video assembly for \"{}\"", request.title);
        self.run_stages(request, &mut stage).inspect_err(|err| {
            error!(run_id = %request.run_id, stage = %stage, "video assembly failed: {err}");
        })
    }

    fn advance(&self, request: &RenderRequest, stage: &mut Stage, next: Stage) {
        *stage = next;
        info!(run_id = %request.run_id, stage = %next, "stage complete");
    }

    fn run_stages(&self, request: &RenderRequest, stage: &mut Stage) -> PipelineResult<RenderOutput> {
        let settings = &self.config.settings;
        let (width, height) = (settings.resolution_w, settings.resolution_h);
        let run = self.workspace.run(&request.run_id);
        run.create()?;

        let background = BackgroundPreparer::new(self.probe, self.runner).prepare(
            &run,
            width,
            height,
            &request.background_position,
        )?;
        self.advance(request, stage, Stage::BackgroundPrepared);

        let audio = AudioAssembler::new(self.probe, self.runner).assemble(&run, &request.layout)?;
        let total_duration = audio.total_duration();
        self.advance(request, stage, Stage::AudioAssembled);

        let titles = TitleRenderer::new(self.runner, self.workspace.fonts_dir());
        titles.render_title_card(
            &self.workspace.title_template(),
            &request.title,
            &settings.channel_name,
            &run.title_image(),
        )?;
        let screenshot_width = images::screenshot_width(width, settings.screenshot_width_percent);
        let layers = images::build(&run, &request.layout, screenshot_width, &run.title_image())?;
        self.advance(request, stage, Stage::ImagesBuilt);

        let mut graph = FilterGraph::new();
        let base = graph.video_input(&background);
        let composition =
            overlay::composite(&mut graph, &base, &layers, &audio.durations(), settings.opacity);
        debug!(overlays = composition.windows.len(), "screenshots composited");
        let credited = graph.apply(
            &[&composition.video],
            self.credit_filter(&request.background_credit),
        );
        let video = graph.apply(&[&credited], format!("scale={width}:{height}"));
        let narration = graph.audio_input(&audio.path);
        self.advance(request, stage, Stage::Composited);

        let category_dir = self.workspace.category_dir(&request.subreddit);
        let stem = output_file_stem(&request.title, &request.run_id);
        let file_name = format!("{stem}.mp4");

        let mut main_graph = graph.clone();
        let mixed = background::merge_audio(
            &mut main_graph,
            &narration,
            &run,
            settings.background.background_audio_volume,
        );
        let main_job = RenderJob {
            name: "main video",
            video: video.clone(),
            audio: mixed,
            output: category_dir.join(&file_name),
            total_duration,
        };
        self.render_pass(&main_graph, &main_job)?;
        self.advance(request, stage, Stage::MainRendered);

        let mut output = RenderOutput {
            video: main_job.output,
            ..RenderOutput::default()
        };

        if settings.background.renders_narration_only() {
            let job = RenderJob {
                name: "narration-only video",
                video,
                audio: narration,
                output: category_dir.join(NARRATION_ONLY_DIR).join(&file_name),
                total_duration,
            };
            self.render_pass(&graph, &job)?;
            output.narration_only = Some(job.output);
            self.advance(request, stage, Stage::NarrationOnlyRendered);
        }

        if settings.background.background_thumbnail {
            let target = category_dir.join("thumbnails").join(format!("{stem}.png"));
            match titles.render_thumbnail(
                &self.workspace.backgrounds_dir(),
                &request.title,
                settings.background.thumbnail_font_size,
                &settings.background.thumbnail_font_color,
                &target,
            ) {
                Ok(thumbnail) => output.thumbnail = thumbnail,
                Err(err) => warn!(run_id = %request.run_id, "thumbnail skipped: {err}"),
            }
        }
        self.advance(request, stage, Stage::ThumbnailGenerated);

        self.store.save(VideoRecord::now(
            &request.subreddit,
            &file_name,
            &request.title,
            &request.run_id,
            &request.background_credit,
        ))?;
        self.advance(request, stage, Stage::MetadataSaved);

        info!("Video ready at {}", output.video.display());
        self.advance(request, stage, Stage::Done);
        Ok(output)
    }

    fn credit_filter(&self, credit: &str) -> String {
        let font = self.workspace.fonts_dir().join(CREDIT_FONT);
        let mut filter = String::from("drawtext=");
        if font.exists() {
            filter.push_str(&format!("fontfile={}:", filter::escape_value(&font.to_string_lossy())));
        }
        filter.push_str(&format!(
            "expansion=none:text={}:x=(w-text_w-10):y=(h-text_h-10):fontsize=15:fontcolor=white:shadowcolor=black:shadowx=1:shadowy=1",
            filter::escape_value(&format!("Background by {credit}"))
        ));
        filter
    }

    /// Encodes `job` into a `.part` sibling of its output and moves it into place only
    /// once ffmpeg succeeded. A fresh tracker follows the pass.
    fn render_pass(&self, graph: &FilterGraph, job: &RenderJob) -> PipelineResult<()> {
        if let Some(parent) = job.output.parent() {
            fs::create_dir_all(parent)?;
        }
        let part = part_path(&job.output);
        info!("Rendering {} to {}", job.name, job.output.display());

        let bar = self.progress_bar(job);
        let sink = bar.clone();
        let mut tracker = ProgressTracker::start(
            &self.workspace.progress_dir(),
            job.total_duration,
            move |ratio| sink.set_position((ratio * 100.0).round() as u64),
        )?;

        let command = graph.to_command(
            FfmpegCommand::new().arg("-progress").arg(tracker.report_path()),
            &[&job.video, &job.audio],
            &output_options(),
            &part,
        );
        let result = ffmpeg::run_stage(self.runner, job.name, &command);
        tracker.stop();

        match result {
            Ok(()) => {
                if let Err(err) = fs::rename(&part, &job.output) {
                    bar.abandon_with_message("failed");
                    discard_part(&part);
                    return Err(err.into());
                }
                bar.set_position(100);
                bar.finish_with_message("done");
                Ok(())
            }
            Err(err) => {
                bar.abandon_with_message("failed");
                discard_part(&part);
                Err(err)
            }
        }
    }

    fn progress_bar(&self, job: &RenderJob) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(100);
        if let Ok(style) =
            ProgressStyle::with_template("{msg:24} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% ({eta})")
        {
            bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏ "));
        }
        bar.set_message(job.name);
        bar
    }
}

fn output_options() -> Vec<String> {
    let threads = ffmpeg::thread_count().to_string();
    [
        "-c:v",
        "h264",
        "-b:v",
        VIDEO_BITRATE,
        "-c:a",
        "aac",
        "-b:a",
        AUDIO_BITRATE,
        "-threads",
        threads.as_str(),
        "-preset",
        "medium",
        "-f",
        "mp4",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn part_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(PART_SUFFIX);
    output.with_file_name(name)
}

fn discard_part(part: &Path) {
    match fs::remove_file(part) {
        Ok(()) => debug!(part = %part.display(), "partial output removed"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(source) => {
            let err = PipelineError::ResourceCleanupFailure {
                path: part.to_path_buf(),
                source,
            };
            warn!("{err}");
        }
    }
}
