use std::path::{Path, PathBuf};

/// How the narration of a thread is split into segments. Index 0 is always the title;
/// the variants only differ in what follows it and how those files are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentLayout {
    /// One segment per comment: `{i}.mp3` / `comment_{i}.png`.
    Comments { count: usize },
    /// The whole self-post as one segment: `postaudio.mp3` / `story_content.png`.
    StorySingle,
    /// One segment per story paragraph: `postaudio-{i}.mp3` / `img{i}.png`.
    StoryParagraphs { count: usize },
}

impl ContentLayout {
    /// Segments after the title.
    pub fn body_segments(&self) -> usize {
        match self {
            Self::Comments { count } | Self::StoryParagraphs { count } => *count,
            Self::StorySingle => 1,
        }
    }

    /// Segments including the title.
    pub fn total_segments(&self) -> usize {
        self.body_segments() + 1
    }

    pub fn is_story(&self) -> bool {
        !matches!(self, Self::Comments { .. })
    }

    /// What the body segments are called in log lines.
    pub fn segment_noun(&self) -> &'static str {
        if self.is_story() { "story segments" } else { "comments" }
    }

    /// File name of the narration clip for body segment `i` (zero-based, title excluded).
    pub fn audio_name(&self, i: usize) -> String {
        match self {
            Self::Comments { .. } => format!("{i}.mp3"),
            Self::StorySingle => "postaudio.mp3".to_string(),
            Self::StoryParagraphs { .. } => format!("postaudio-{i}.mp3"),
        }
    }

    /// File name of the screenshot for body segment `i` (zero-based, title excluded).
    pub fn image_name(&self, i: usize) -> String {
        match self {
            Self::Comments { .. } => format!("comment_{i}.png"),
            Self::StorySingle => "story_content.png".to_string(),
            Self::StoryParagraphs { .. } => format!("img{i}.png"),
        }
    }

    /// Every segment in playback order, as found on disk. Durations are filled in when
    /// the narration is assembled.
    pub fn segments(&self, run: &RunPaths) -> Vec<Segment> {
        let mut segments = Vec::with_capacity(self.total_segments());
        segments.push(Segment::new(
            0,
            run.audio_dir().join(TITLE_AUDIO),
            run.image_dir().join(TITLE_IMAGE),
        ));
        for i in 0..self.body_segments() {
            segments.push(Segment::new(
                i + 1,
                run.audio_dir().join(self.audio_name(i)),
                run.image_dir().join(self.image_name(i)),
            ));
        }
        segments
    }
}

pub const TITLE_AUDIO: &str = "title.mp3";
pub const TITLE_IMAGE: &str = "title.png";

/// One narration unit. `image_path` is `None` when no screenshot was captured;
/// `duration_seconds` stays 0.0 until the clip has been probed, and for missing clips.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub index: usize,
    pub audio_path: PathBuf,
    pub image_path: Option<PathBuf>,
    pub duration_seconds: f64,
}

impl Segment {
    fn new(index: usize, audio_path: PathBuf, image_path: PathBuf) -> Self {
        Self {
            index,
            audio_path,
            image_path: image_path.exists().then_some(image_path),
            duration_seconds: 0.0,
        }
    }

    pub fn is_title(&self) -> bool {
        self.index == 0
    }
}

/// Roots of everything the pipeline reads and writes.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub assets: PathBuf,
    pub config: PathBuf,
    pub results: PathBuf,
    pub data: PathBuf,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::rooted_at(Path::new("."))
    }
}

impl Workspace {
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            assets: root.join("assets"),
            config: root.join("config"),
            results: root.join("results"),
            data: root.join("video_creation").join("data"),
        }
    }

    pub fn run(&self, run_id: &str) -> RunPaths {
        RunPaths {
            root: self.temp_dir().join(run_id),
        }
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.assets.join("temp")
    }

    pub fn progress_dir(&self) -> PathBuf {
        self.temp_dir().join("progress_tracking")
    }

    pub fn title_template(&self) -> PathBuf {
        self.assets.join("title_template.png")
    }

    pub fn backgrounds_dir(&self) -> PathBuf {
        self.assets.join("backgrounds")
    }

    /// A background catalog such as `background_videos.json`.
    pub fn catalog(&self, file_name: &str) -> PathBuf {
        self.config.join(file_name)
    }

    pub fn fonts_dir(&self) -> PathBuf {
        self.assets.join("fonts")
    }

    pub fn category_dir(&self, category: &str) -> PathBuf {
        self.results.join(category)
    }

    pub fn videos_db(&self) -> PathBuf {
        self.data.join("videos.json")
    }
}

/// Per-run temporary directory, `assets/temp/{run_id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub root: PathBuf,
}

impl RunPaths {
    pub fn audio_dir(&self) -> PathBuf {
        self.root.join("mp3")
    }

    pub fn image_dir(&self) -> PathBuf {
        self.root.join("png")
    }

    pub fn background_video(&self) -> PathBuf {
        self.root.join("background.mp4")
    }

    pub fn background_audio(&self) -> PathBuf {
        self.root.join("background.mp3")
    }

    pub fn background_noaudio(&self) -> PathBuf {
        self.root.join("background_noaudio.mp4")
    }

    pub fn concatenated_audio(&self) -> PathBuf {
        self.root.join("audio.mp3")
    }

    pub fn title_image(&self) -> PathBuf {
        self.image_dir().join(TITLE_IMAGE)
    }

    pub fn create(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.audio_dir())?;
        std::fs::create_dir_all(self.image_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> RunPaths {
        Workspace::rooted_at(Path::new("/w")).run("abc")
    }

    #[test]
    fn comment_layout_names() {
        let layout = ContentLayout::Comments { count: 3 };
        let segments = layout.segments(&run());
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0].audio_path, PathBuf::from("/w/assets/temp/abc/mp3/title.mp3"));
        assert_eq!(segments[3].audio_path, PathBuf::from("/w/assets/temp/abc/mp3/2.mp3"));
        assert!(segments.iter().enumerate().all(|(i, s)| s.index == i));
        assert!(segments.iter().all(|s| s.duration_seconds == 0.0));
    }

    #[test]
    fn image_paths_only_for_captured_screenshots() {
        let dir = tempfile::tempdir().unwrap();
        let run = Workspace::rooted_at(dir.path()).run("abc");
        run.create().unwrap();
        std::fs::write(run.image_dir().join("comment_2.png"), b"png").unwrap();

        let segments = ContentLayout::Comments { count: 3 }.segments(&run);
        assert_eq!(segments[1].image_path, None);
        assert_eq!(segments[2].image_path, None);
        assert_eq!(
            segments[3].image_path.as_deref(),
            Some(run.image_dir().join("comment_2.png").as_path())
        );
    }

    #[test]
    fn story_layout_names() {
        let single = ContentLayout::StorySingle;
        assert_eq!(single.total_segments(), 2);
        assert_eq!(single.audio_name(0), "postaudio.mp3");
        assert_eq!(single.image_name(0), "story_content.png");

        let paragraphs = ContentLayout::StoryParagraphs { count: 2 };
        assert_eq!(paragraphs.audio_name(1), "postaudio-1.mp3");
        assert_eq!(paragraphs.image_name(1), "img1.png");
        assert!(paragraphs.is_story());
        assert!(!ContentLayout::Comments { count: 0 }.is_story());
        assert_eq!(single.segment_noun(), "story segments");
    }

    #[test]
    fn run_artifacts_live_under_the_run_dir() {
        let run = run();
        assert_eq!(run.background_noaudio(), PathBuf::from("/w/assets/temp/abc/background_noaudio.mp4"));
        assert_eq!(run.background_audio(), PathBuf::from("/w/assets/temp/abc/background.mp3"));
        assert_eq!(run.background_video(), PathBuf::from("/w/assets/temp/abc/background.mp4"));
    }
}
