mod args;
mod audio;
mod background;
mod catalog;
mod cleanup;
mod config;
mod error;
mod ffmpeg;
mod filter;
mod images;
mod layout;
mod metadata;
mod overlay;
mod probe;
mod progress;
mod reddit;
mod render;
mod screenshot;
mod timing;
mod title;
mod tts;
mod utils;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::args::Args;
use crate::background::BackgroundPreparer;
use crate::catalog::{
    AUDIO_CATALOG, AudioOption, BackgroundAssets, BackgroundLibrary, Catalog, VIDEO_CATALOG,
    VideoOption, YtDlp,
};
use crate::config::Config;
use crate::ffmpeg::SystemFfmpeg;
use crate::layout::Workspace;
use crate::metadata::JsonVideoStore;
use crate::probe::FfprobeProbe;
use crate::reddit::{ContentSource, RedditSource};
use crate::render::{RenderOrchestrator, RenderOutput, RenderRequest};
use crate::screenshot::CommandRenderer;
use crate::tts::{Narrator, VoiceSynthesizer};

/// Everything shared by the runs of one invocation.
struct Pipeline {
    config: Config,
    workspace: Workspace,
    store: JsonVideoStore,
    voice: Box<dyn VoiceSynthesizer>,
    renderer: Option<CommandRenderer>,
    videos: Catalog<VideoOption>,
    audios: Catalog<AudioOption>,
    show_progress: bool,
}

impl Pipeline {
    async fn run_once(&self, post_id: Option<&str>) -> anyhow::Result<RenderOutput> {
        let source = RedditSource::new(&self.config, &self.store).with_post_id(post_id);
        let thread = source.next_thread().await?;
        let run = self.workspace.run(&thread.run_id());
        cleanup::remove_run(&run);

        let result = self.render_thread(&thread, &run);
        cleanup::remove_run(&run);
        result
    }

    fn render_thread(
        &self,
        thread: &reddit::Thread,
        run: &layout::RunPaths,
    ) -> anyhow::Result<RenderOutput> {
        let settings = &self.config.settings;
        let probe = FfprobeProbe;
        let runner = SystemFfmpeg;
        let mut rng = rand::thread_rng();

        let narration = Narrator::new(self.voice.as_ref(), &probe, &runner)
            .narrate(thread, settings, run)
            .context("narration failed")?;
        info!(
            "Narrated the title and {} {} ({:.1}s)",
            narration.segments(),
            narration.layout.segment_noun(),
            narration.total_length
        );

        match &self.renderer {
            Some(renderer) => {
                let width =
                    images::screenshot_width(settings.resolution_w, settings.screenshot_width_percent);
                screenshot::capture_all(renderer, thread, &narration.layout, run, width)?;
            }
            None => info!("No screenshot command configured; only the title card is shown"),
        }

        let assets = BackgroundAssets::select(
            &self.videos,
            &self.audios,
            settings.background.video_choice(),
            settings.background.audio_choice(),
            &mut rng,
        )?;
        let library = BackgroundLibrary::new(self.workspace.backgrounds_dir(), &YtDlp);
        let credit = BackgroundPreparer::new(&probe, &runner)
            .chop(
                &library,
                &assets,
                run,
                narration.total_length,
                settings.background.background_audio_volume,
                &mut rng,
            )
            .context("background preparation failed")?;

        let request = RenderRequest {
            run_id: thread.run_id(),
            subreddit: self.config.reddit.subreddit.clone(),
            title: thread.title.clone(),
            layout: narration.layout,
            background_credit: credit,
            background_position: assets.video.position.clone(),
        };
        let output = RenderOrchestrator::new(&self.config, &self.workspace, &probe, &runner, &self.store)
            .with_progress_bars(self.show_progress)
            .render(&request)?;
        Ok(output)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.list_voices {
        for voice in tts::VOICES {
            println!("{voice}");
        }
        return Ok(());
    }

    info!("Starting reddit video pipeline");
    let mut config = Config::load_or_create(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(subreddit) = args.subreddit {
        config.reddit.subreddit = subreddit;
    }
    if let Some(post_id) = args.post_id {
        config.reddit.post_id = post_id;
    }

    let workspace = Workspace::default();
    let videos: Catalog<VideoOption> = Catalog::load(&workspace.catalog(VIDEO_CATALOG))?;
    let audios: Catalog<AudioOption> = Catalog::load(&workspace.catalog(AUDIO_CATALOG))?;
    info!(
        "Loaded {} background videos and {} background audios",
        videos.len(),
        audios.len()
    );

    let renderer = CommandRenderer::from_command_line(&config.renderer.command);
    let store = JsonVideoStore::new(workspace.videos_db());
    info!("Rendered videos are tracked in {}", store.path().display());
    let pipeline = Pipeline {
        voice: tts::voice_from_config(&config.settings.tts)?,
        store,
        renderer,
        videos,
        audios,
        show_progress: !args.no_progress,
        workspace,
        config,
    };

    let post_ids: Vec<Option<String>> = {
        let ids = pipeline.config.reddit.post_ids();
        if ids.is_empty() {
            vec![None; args.times.max(1)]
        } else {
            if args.times > 1 {
                warn!("--times is ignored when post ids are given");
            }
            ids.into_iter().map(|id| Some(id.to_string())).collect()
        }
    };

    let total = post_ids.len();
    let mut failed = 0;
    for (i, post_id) in post_ids.iter().enumerate() {
        info!("Run {} of {total}", i + 1);
        match pipeline.run_once(post_id.as_deref()).await {
            Ok(output) => {
                info!("Finished {}", output.video.display());
                if let Some(extra) = output.narration_only {
                    info!("Narration-only copy at {}", extra.display());
                }
            }
            Err(err) => {
                error!("Run {} failed: {err:#}", i + 1);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {total} runs failed");
    }
    info!("Process complete.");
    Ok(())
}
