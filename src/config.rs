use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::layout::ContentLayout;

/// Everything read from `config.toml`. Missing keys fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub reddit: RedditConfig,
    pub settings: Settings,
    pub renderer: RendererConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    pub subreddit: String,
    /// Render this thread instead of picking one from the hot listing.
    pub post_id: String,
    pub min_comments: u32,
    pub max_comments: usize,
    pub comment_min_length: usize,
    pub comment_max_length: usize,
    pub allow_nsfw: bool,
    pub thread_limit: u32,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            subreddit: "AskReddit".to_string(),
            post_id: String::new(),
            min_comments: 20,
            max_comments: 10,
            comment_min_length: 1,
            comment_max_length: 500,
            allow_nsfw: false,
            thread_limit: 25,
        }
    }
}

impl RedditConfig {
    /// Threads named in `post_id`; several can be joined with `+`.
    pub fn post_ids(&self) -> Vec<&str> {
        self.post_id
            .split('+')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub resolution_w: u32,
    pub resolution_h: u32,
    /// Opacity of every screenshot except the title, 0.0 to 1.0.
    pub opacity: f64,
    pub storymode: bool,
    /// 0 narrates the whole post as one clip, 1 narrates it paragraph by paragraph.
    pub storymode_method: u8,
    pub storymode_max_length: usize,
    /// Seconds of narration after which no further comments are added.
    pub max_video_length: f64,
    pub channel_name: String,
    pub screenshot_width_percent: u32,
    pub background: BackgroundSettings,
    pub tts: TtsSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            resolution_w: 1080,
            resolution_h: 1920,
            opacity: 0.9,
            storymode: false,
            storymode_method: 1,
            storymode_max_length: 1000,
            max_video_length: 50.0,
            channel_name: "Reddit Tales".to_string(),
            screenshot_width_percent: 45,
            background: BackgroundSettings::default(),
            tts: TtsSettings::default(),
        }
    }
}

impl Settings {
    /// Narration layout for a thread with `body_segments` comments or paragraphs.
    pub fn content_layout(&self, body_segments: usize) -> ContentLayout {
        match (self.storymode, self.storymode_method) {
            (false, _) => ContentLayout::Comments {
                count: body_segments,
            },
            (true, 0) => ContentLayout::StorySingle,
            (true, _) => ContentLayout::StoryParagraphs {
                count: body_segments,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundSettings {
    /// Catalog name; empty picks one at random.
    pub background_video: String,
    pub background_audio: String,
    pub background_audio_volume: f64,
    /// Also render a copy without background music into `OnlyTTS/`.
    pub enable_extra_audio: bool,
    pub background_thumbnail: bool,
    pub thumbnail_font_size: u32,
    pub thumbnail_font_color: String,
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self {
            background_video: "minecraft".to_string(),
            background_audio: "lofi".to_string(),
            background_audio_volume: 0.15,
            enable_extra_audio: false,
            background_thumbnail: false,
            thumbnail_font_size: 96,
            thumbnail_font_color: "white".to_string(),
        }
    }
}

impl BackgroundSettings {
    pub fn video_choice(&self) -> Option<&str> {
        Some(self.background_video.as_str()).filter(|s| !s.trim().is_empty())
    }

    pub fn audio_choice(&self) -> Option<&str> {
        Some(self.background_audio.as_str()).filter(|s| !s.trim().is_empty())
    }

    /// The narration-only pass only differs from the main one when music is mixed in.
    pub fn renders_narration_only(&self) -> bool {
        self.enable_extra_audio && self.background_audio_volume != 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsSettings {
    pub voice_choice: String,
    pub piper_model: String,
    pub espeak_voice: String,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            voice_choice: "piper".to_string(),
            piper_model: "./tts/en_US-hfc_male-medium.onnx".to_string(),
            espeak_voice: "en-us".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Screenshot command, called as `<command> <url-or-text-file> <output.png> <width>`.
    pub command: String,
}

impl Config {
    /// Reads `path`, writing the defaults there first when it does not exist.
    pub fn load_or_create(path: &Path) -> PipelineResult<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            info!("Wrote default configuration to {}", path.display());
            return Ok(config);
        }
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| PipelineError::config(format!("{}: {e}", path.display())))?;
        config.validated()
    }

    pub fn from_toml(contents: &str) -> PipelineResult<Self> {
        toml::from_str(contents).map_err(|e| PipelineError::config(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> PipelineResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents =
            toml::to_string_pretty(self).map_err(|e| PipelineError::config(e.to_string()))?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Clamps values that have an obvious repair and rejects the ones that do not.
    pub fn validated(mut self) -> PipelineResult<Self> {
        let (w, h) = (self.settings.resolution_w, self.settings.resolution_h);
        if w == 0 || h == 0 || w % 2 != 0 || h % 2 != 0 {
            return Err(PipelineError::config(format!(
                "resolution {w}x{h} must be non-zero and even"
            )));
        }

        let opacity = self.settings.opacity;
        if opacity.is_nan() || !(0.0..=1.0).contains(&opacity) {
            let clamped = if opacity.is_nan() { 1.0 } else { opacity.clamp(0.0, 1.0) };
            warn!("opacity {opacity} is outside 0..1; using {clamped}");
            self.settings.opacity = clamped;
        }

        let volume = self.settings.background.background_audio_volume;
        if volume.is_nan() || volume < 0.0 {
            warn!("background_audio_volume {volume} is negative; muting background music");
            self.settings.background.background_audio_volume = 0.0;
        }

        if self.settings.storymode_method > 1 {
            return Err(PipelineError::config(format!(
                "storymode_method must be 0 or 1, got {}",
                self.settings.storymode_method
            )));
        }
        if self.settings.screenshot_width_percent == 0 || self.settings.screenshot_width_percent > 100 {
            return Err(PipelineError::config(format!(
                "screenshot_width_percent must be within 1..=100, got {}",
                self.settings.screenshot_width_percent
            )));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("config.toml");
        let config = Config::load_or_create(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());
        assert_eq!(Config::load_or_create(&path).unwrap(), config);
    }

    #[test]
    fn partial_files_keep_defaults_for_the_rest() {
        let config = Config::from_toml(
            r#"
            [reddit]
            subreddit = "AmItheAsshole"

            [settings]
            storymode = true
            storymode_method = 0

            [settings.background]
            background_audio_volume = 0.0
            "#,
        )
        .unwrap();
        assert_eq!(config.reddit.subreddit, "AmItheAsshole");
        assert_eq!(config.reddit.max_comments, 10);
        assert_eq!(config.settings.resolution_h, 1920);
        assert_eq!(config.settings.background.background_video, "minecraft");
        assert_eq!(config.settings.content_layout(3), ContentLayout::StorySingle);
    }

    #[test]
    fn layouts_follow_story_settings() {
        let mut settings = Settings::default();
        assert_eq!(settings.content_layout(4), ContentLayout::Comments { count: 4 });
        settings.storymode = true;
        assert_eq!(
            settings.content_layout(4),
            ContentLayout::StoryParagraphs { count: 4 }
        );
    }

    #[test]
    fn opacity_is_clamped() {
        let mut config = Config::default();
        config.settings.opacity = 1.7;
        assert_eq!(config.validated().unwrap().settings.opacity, 1.0);

        let mut config = Config::default();
        config.settings.opacity = -0.2;
        assert_eq!(config.validated().unwrap().settings.opacity, 0.0);
    }

    #[test]
    fn bad_resolutions_are_rejected() {
        for (w, h) in [(0, 1920), (1080, 0), (1081, 1920), (1080, 1919)] {
            let mut config = Config::default();
            config.settings.resolution_w = w;
            config.settings.resolution_h = h;
            assert!(matches!(config.validated(), Err(PipelineError::Config(_))));
        }
    }

    #[test]
    fn narration_only_pass_needs_music() {
        let mut bg = BackgroundSettings::default();
        assert!(!bg.renders_narration_only());
        bg.enable_extra_audio = true;
        assert!(bg.renders_narration_only());
        bg.background_audio_volume = 0.0;
        assert!(!bg.renders_narration_only());
    }

    #[test]
    fn empty_background_names_mean_random() {
        let mut bg = BackgroundSettings::default();
        assert_eq!(bg.video_choice(), Some("minecraft"));
        bg.background_video = "  ".to_string();
        assert_eq!(bg.video_choice(), None);
    }

    #[test]
    fn post_ids_split_on_plus() {
        let mut reddit = RedditConfig::default();
        assert!(reddit.post_ids().is_empty());
        reddit.post_id = "abc + def+".to_string();
        assert_eq!(reddit.post_ids(), ["abc", "def"]);
    }

    #[test]
    fn unparsable_toml_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[settings\nopacity = ").unwrap();
        assert!(matches!(Config::load_or_create(&path), Err(PipelineError::Config(_))));
    }
}
