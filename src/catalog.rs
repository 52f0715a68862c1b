use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use rand::Rng;
use rand::seq::IteratorRandom;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};

pub const VIDEO_CATALOG: &str = "background_videos.json";
pub const AUDIO_CATALOG: &str = "background_audios.json";

const COMMENT_KEY: &str = "__comment";
const AUDIO_EXTENSIONS: [&str; 5] = ["mp3", "m4a", "ogg", "wav", "opus"];

/// Where the footage is anchored horizontally: `"center"` or a pixel offset.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Position {
    Named(String),
    Offset(f64),
}

impl Default for Position {
    fn default() -> Self {
        Self::Named("center".to_string())
    }
}

impl Position {
    /// Left edge of the crop window as an ffmpeg `crop` expression. Offsets are
    /// clamped so the window stays inside the frame; unknown names center it.
    pub fn crop_x(&self) -> String {
        match self {
            Self::Offset(px) if *px >= 0.0 => format!("min({px}\\,iw-ow)"),
            Self::Named(name) if !name.eq_ignore_ascii_case("center") => {
                warn!("Unknown background position '{name}'; centering");
                "(iw-ow)/2".to_string()
            }
            _ => "(iw-ow)/2".to_string(),
        }
    }
}

/// `[uri, filename, credit, position]` in `background_videos.json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "(String, String, String, Position)")]
pub struct VideoOption {
    pub uri: String,
    pub filename: String,
    pub credit: String,
    pub position: Position,
}

impl From<(String, String, String, Position)> for VideoOption {
    fn from((uri, filename, credit, position): (String, String, String, Position)) -> Self {
        Self {
            uri,
            filename,
            credit,
            position,
        }
    }
}

/// `[uri, filename, credit]` in `background_audios.json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "(String, String, String)")]
pub struct AudioOption {
    pub uri: String,
    pub filename: String,
    pub credit: String,
}

impl From<(String, String, String)> for AudioOption {
    fn from((uri, filename, credit): (String, String, String)) -> Self {
        Self {
            uri,
            filename,
            credit,
        }
    }
}

/// Named options read from one catalog file.
#[derive(Debug, Clone)]
pub struct Catalog<T> {
    options: BTreeMap<String, T>,
}

impl<T: DeserializeOwned> Catalog<T> {
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let json = fs::read_to_string(path)
            .map_err(|e| PipelineError::catalog(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> PipelineResult<Self> {
        let mut raw: BTreeMap<String, Value> =
            serde_json::from_str(json).map_err(|e| PipelineError::catalog(e.to_string()))?;
        raw.remove(COMMENT_KEY);

        let options = raw
            .into_iter()
            .map(|(name, value)| {
                serde_json::from_value(value)
                    .map(|option| (name.clone(), option))
                    .map_err(|e| PipelineError::catalog(format!("option '{name}': {e}")))
            })
            .collect::<PipelineResult<_>>()?;
        Ok(Self { options })
    }
}

impl<T> Catalog<T> {
    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// The option named `configured` (case-insensitive), or a uniformly random one when
    /// nothing is configured or the name is unknown.
    pub fn select<R: Rng + ?Sized>(
        &self,
        configured: Option<&str>,
        rng: &mut R,
    ) -> PipelineResult<(&str, &T)> {
        let wanted = configured.map(str::trim).filter(|name| !name.is_empty());
        if let Some(wanted) = wanted {
            let found = self
                .options
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(wanted));
            match found {
                Some((name, option)) => return Ok((name.as_str(), option)),
                None => warn!("Background '{wanted}' is not in the catalog; picking a random one"),
            }
        }

        let (name, option) = self
            .options
            .iter()
            .choose(rng)
            .ok_or_else(|| PipelineError::catalog("no background options available"))?;
        info!("Randomly selected background: {name}");
        Ok((name.as_str(), option))
    }
}

/// The video and audio chosen for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundAssets {
    pub video_name: String,
    pub video: VideoOption,
    pub audio_name: String,
    pub audio: AudioOption,
}

impl BackgroundAssets {
    pub fn select<R: Rng + ?Sized>(
        videos: &Catalog<VideoOption>,
        audios: &Catalog<AudioOption>,
        video_choice: Option<&str>,
        audio_choice: Option<&str>,
        rng: &mut R,
    ) -> PipelineResult<Self> {
        let (video_name, video) = videos.select(video_choice, rng)?;
        let (audio_name, audio) = audios.select(audio_choice, rng)?;
        debug!(video = video_name, audio = audio_name, "background selected");
        Ok(Self {
            video_name: video_name.to_string(),
            video: video.clone(),
            audio_name: audio_name.to_string(),
            audio: audio.clone(),
        })
    }

    /// Credit shown in the video and stored with its metadata.
    pub fn credit(&self) -> &str {
        &self.video.credit
    }
}

pub trait MediaDownloader {
    /// Fetches `uri` to `output`. Audio downloads may choose their own extension.
    fn download(&self, uri: &str, output: &Path, audio_only: bool) -> PipelineResult<()>;
}

/// Downloads through the `yt-dlp` executable.
#[derive(Debug, Default, Clone, Copy)]
pub struct YtDlp;

impl MediaDownloader for YtDlp {
    fn download(&self, uri: &str, output: &Path, audio_only: bool) -> PipelineResult<()> {
        let (format, template) = if audio_only {
            (
                "bestaudio[ext=mp3]/bestaudio",
                format!("{}.%(ext)s", output.with_extension("").display()),
            )
        } else {
            (
                "bestvideo[height<=1080][ext=mp4]",
                output.display().to_string(),
            )
        };

        let result = Command::new("yt-dlp")
            .args(["--quiet", "--no-playlist", "--retries", "10", "-f", format, "-o"])
            .arg(&template)
            .arg(uri)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| PipelineError::download(uri, format!("failed to run yt-dlp: {e}")))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(PipelineError::download(uri, stderr.trim()));
        }
        Ok(())
    }
}

/// Local copies of catalog assets under `assets/backgrounds/{video,audio}`. Each asset
/// is downloaded once and reused by later runs.
pub struct BackgroundLibrary<'a> {
    root: PathBuf,
    downloader: &'a dyn MediaDownloader,
}

impl<'a> BackgroundLibrary<'a> {
    pub fn new(root: impl Into<PathBuf>, downloader: &'a dyn MediaDownloader) -> Self {
        Self {
            root: root.into(),
            downloader,
        }
    }

    pub fn video_path(&self, video: &VideoOption) -> PathBuf {
        self.root
            .join("video")
            .join(format!("{}-{}", video.credit, video.filename))
    }

    fn audio_base(&self, audio: &AudioOption) -> PathBuf {
        self.root
            .join("audio")
            .join(format!("{}-{}", audio.credit, audio.filename))
    }

    /// Downloaded audio file, whatever extension the downloader settled on.
    pub fn audio_path(&self, audio: &AudioOption) -> Option<PathBuf> {
        let base = self.audio_base(audio);
        AUDIO_EXTENSIONS
            .iter()
            .map(|ext| base.with_extension(ext))
            .chain(std::iter::once(base.clone()))
            .find(|path| path.is_file())
    }

    pub fn ensure_video(&self, video: &VideoOption) -> PipelineResult<PathBuf> {
        let path = self.video_path(video);
        if path.is_file() {
            debug!(path = %path.display(), "background video already downloaded");
            return Ok(path);
        }
        fs::create_dir_all(self.root.join("video"))?;
        info!("Downloading background video {} (only done once)", video.filename);
        self.downloader.download(&video.uri, &path, false)?;
        if !path.is_file() {
            return Err(PipelineError::MissingRequiredAsset(path));
        }
        info!("Background video {} downloaded", video.filename);
        Ok(path)
    }

    pub fn ensure_audio(&self, audio: &AudioOption) -> PipelineResult<PathBuf> {
        if let Some(path) = self.audio_path(audio) {
            debug!(path = %path.display(), "background audio already downloaded");
            return Ok(path);
        }
        fs::create_dir_all(self.root.join("audio"))?;
        info!("Downloading background audio {} (only done once)", audio.filename);
        self.downloader
            .download(&audio.uri, &self.audio_base(audio), true)?;
        self.audio_path(audio)
            .ok_or_else(|| PipelineError::MissingRequiredAsset(self.audio_base(audio)))
    }
}


#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::testing::FakeDownloader;
    use super::*;

    const VIDEOS: &str = r#"{
        "__comment": "Supported backgrounds",
        "minecraft": ["https://www.youtube.com/watch?v=n_Dv4JMiwK8", "parkour.mp4", "bbswitzer", "center"],
        "gta": ["https://www.youtube.com/watch?v=qGa9kWREOnE", "gta-stunt-race.mp4", "Achy Gaming", 480]
    }"#;

    const AUDIOS: &str = r#"{
        "__comment": "Supported background music",
        "lofi": ["https://www.youtube.com/watch?v=LTphVIore3A", "lofi.mp3", "Super Lofi World"],
        "chill-summer": ["https://www.youtube.com/watch?v=EZE8JagnBI8", "chill-summer.mp3", "Mellow Vibes Radio"]
    }"#;

    #[test]
    fn comment_key_is_ignored() {
        let videos = Catalog::<VideoOption>::from_json(VIDEOS).unwrap();
        assert_eq!(videos.len(), 2);
        let mut rng = StdRng::seed_from_u64(0);
        let (_, gta) = videos.select(Some("gta"), &mut rng).unwrap();
        assert_eq!(gta.filename, "gta-stunt-race.mp4");
        assert_eq!(gta.position, Position::Offset(480.0));
    }

    #[test]
    fn positions_become_crop_offsets() {
        assert_eq!(Position::default().crop_x(), "(iw-ow)/2");
        assert_eq!(Position::Named("Center".into()).crop_x(), "(iw-ow)/2");
        assert_eq!(Position::Offset(480.0).crop_x(), "min(480\\,iw-ow)");
        assert_eq!(Position::Offset(-5.0).crop_x(), "(iw-ow)/2");
    }

    #[test]
    fn configured_name_is_case_insensitive() {
        let audios = Catalog::<AudioOption>::from_json(AUDIOS).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let (name, option) = audios.select(Some("LoFi"), &mut rng).unwrap();
        assert_eq!(name, "lofi");
        assert_eq!(option.credit, "Super Lofi World");
    }

    #[test]
    fn unknown_or_empty_choice_falls_back_to_random() {
        let videos = Catalog::<VideoOption>::from_json(VIDEOS).unwrap();
        for choice in [None, Some(""), Some("subway-surfers")] {
            let mut rng = StdRng::seed_from_u64(9);
            let (name, _) = videos.select(choice, &mut rng).unwrap();
            assert!(["minecraft", "gta"].contains(&name));
        }
    }

    #[test]
    fn empty_and_malformed_catalogs() {
        let empty = Catalog::<AudioOption>::from_json(r#"{"__comment": "nothing"}"#).unwrap();
        assert!(empty.is_empty());
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(empty.select(None, &mut rng), Err(PipelineError::Catalog(_))));

        let err = Catalog::<AudioOption>::from_json(r#"{"lofi": ["only-a-uri"]}"#).unwrap_err();
        assert!(err.to_string().contains("lofi"));
    }

    #[test]
    fn assets_expose_the_video_credit() {
        let videos = Catalog::<VideoOption>::from_json(VIDEOS).unwrap();
        let audios = Catalog::<AudioOption>::from_json(AUDIOS).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let assets =
            BackgroundAssets::select(&videos, &audios, Some("minecraft"), Some("lofi"), &mut rng).unwrap();
        assert_eq!(assets.credit(), "bbswitzer");
        assert_eq!(assets.audio_name, "lofi");
    }

    #[test]
    fn downloads_happen_once() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = FakeDownloader::default();
        let library = BackgroundLibrary::new(dir.path(), &downloader);
        let videos = Catalog::<VideoOption>::from_json(VIDEOS).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let (_, video) = videos.select(Some("minecraft"), &mut rng).unwrap();

        let first = library.ensure_video(video).unwrap();
        let second = library.ensure_video(video).unwrap();
        assert_eq!(first, dir.path().join("video").join("bbswitzer-parkour.mp4"));
        assert_eq!(first, second);
        assert_eq!(downloader.fetched.borrow().len(), 1);
    }

    #[test]
    fn audio_is_found_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = FakeDownloader::default();
        let library = BackgroundLibrary::new(dir.path(), &downloader);
        let audio = AudioOption {
            uri: "https://example.invalid/track".to_string(),
            filename: "rain".to_string(),
            credit: "someone".to_string(),
        };
        assert!(library.audio_path(&audio).is_none());

        let path = library.ensure_audio(&audio).unwrap();
        assert_eq!(path, dir.path().join("audio").join("someone-rain.mp3"));
        library.ensure_audio(&audio).unwrap();
        assert_eq!(downloader.fetched.borrow().len(), 1);
    }
}
