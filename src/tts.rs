use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, error, info, warn};

use crate::audio::AUDIO_BITRATE;
use crate::config::{Settings, TtsSettings};
use crate::error::{PipelineError, PipelineResult};
use crate::ffmpeg::{self, FfmpegCommand, FfmpegRunner};
use crate::layout::{ContentLayout, RunPaths, TITLE_AUDIO};
use crate::probe::MediaProbe;
use crate::reddit::Thread;

pub const VOICES: [&str; 2] = ["piper", "espeak"];

/// A text-to-speech backend that writes WAV files.
pub trait VoiceSynthesizer {
    fn name(&self) -> &'static str;

    fn synthesize(&self, text: &str, wav: &Path) -> PipelineResult<()>;
}

/// Piper reading the text from stdin.
#[derive(Debug, Clone)]
pub struct PiperVoice {
    pub model: String,
}

impl VoiceSynthesizer for PiperVoice {
    fn name(&self) -> &'static str {
        "piper"
    }

    fn synthesize(&self, text: &str, wav: &Path) -> PipelineResult<()> {
        let mut command = Command::new("piper");
        command
            .args(["--model", self.model.as_str(), "--output_file"])
            .arg(wav);
        speak(command, text, wav)
    }
}

#[derive(Debug, Clone)]
pub struct EspeakVoice {
    pub voice: String,
}

impl VoiceSynthesizer for EspeakVoice {
    fn name(&self) -> &'static str {
        "espeak"
    }

    fn synthesize(&self, text: &str, wav: &Path) -> PipelineResult<()> {
        let mut command = Command::new("espeak-ng");
        command.args(["--stdin", "-v", self.voice.as_str(), "-w"]).arg(wav);
        speak(command, text, wav)
    }
}

fn speak(mut command: Command, text: &str, wav: &Path) -> PipelineResult<()> {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| PipelineError::synthesis(wav, format!("could not start voice: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(text.as_bytes()) {
            drop(stdin);
            if let Err(kill) = child.kill() {
                debug!("voice already exited: {kill}");
            }
            let status = child.wait()?;
            return Err(PipelineError::synthesis(
                wav,
                format!("could not pass text to voice ({status}): {e}"),
            ));
        }
    }

    let output = child.wait_with_output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("TTS engine failed for {}: {}", wav.display(), stderr.trim());
        return Err(PipelineError::synthesis(
            wav,
            format!("voice exited with {}", output.status),
        ));
    }
    Ok(())
}

/// Picks the backend named by `voice_choice`, ignoring case.
pub fn voice_from_config(tts: &TtsSettings) -> PipelineResult<Box<dyn VoiceSynthesizer>> {
    match tts.voice_choice.trim().to_lowercase().as_str() {
        "piper" => Ok(Box::new(PiperVoice {
            model: tts.piper_model.clone(),
        })),
        "espeak" | "espeak-ng" => Ok(Box::new(EspeakVoice {
            voice: tts.espeak_voice.clone(),
        })),
        other => Err(PipelineError::config(format!(
            "unknown voice_choice \"{other}\"; available: {}",
            VOICES.join(", ")
        ))),
    }
}

/// The narration written for one thread.
#[derive(Debug, Clone, PartialEq)]
pub struct Narration {
    /// Probed seconds of every clip written, title included.
    pub total_length: f64,
    pub layout: ContentLayout,
}

impl Narration {
    /// Body segments narrated (comments or paragraphs).
    pub fn segments(&self) -> usize {
        self.layout.body_segments()
    }
}

/// Writes the narration clips of a thread into the run's `mp3/` directory.
pub struct Narrator<'a> {
    voice: &'a dyn VoiceSynthesizer,
    probe: &'a dyn MediaProbe,
    runner: &'a dyn FfmpegRunner,
}

impl<'a> Narrator<'a> {
    pub fn new(
        voice: &'a dyn VoiceSynthesizer,
        probe: &'a dyn MediaProbe,
        runner: &'a dyn FfmpegRunner,
    ) -> Self {
        Self {
            voice,
            probe,
            runner,
        }
    }

    /// Comments stop being added once the narration is longer than `max_video_length`.
    /// A comment or paragraph the voice fails on is left out; a failed title is fatal.
    pub fn narrate(&self, thread: &Thread, settings: &Settings, run: &RunPaths) -> PipelineResult<Narration> {
        run.create()?;
        info!("Narrating with {}", self.voice.name());
        let mut total_length = self.clip(&thread.title, &run.audio_dir().join(TITLE_AUDIO))?;

        let layout = if !settings.storymode {
            let mut count = 0;
            for (i, comment) in thread.comments.iter().enumerate() {
                if total_length > settings.max_video_length {
                    info!(
                        "Narration reached {total_length:.1}s; stopping after {i} of {} comments",
                        thread.comments.len()
                    );
                    break;
                }
                let layout = ContentLayout::Comments { count: i + 1 };
                total_length += self.optional_clip(&comment.body, run, &layout, i);
                count = i + 1;
            }
            ContentLayout::Comments { count }
        } else if settings.storymode_method == 0 {
            let layout = ContentLayout::StorySingle;
            total_length += self.optional_clip(&thread.body, run, &layout, 0);
            layout
        } else {
            let paragraphs = thread.paragraphs();
            let layout = ContentLayout::StoryParagraphs {
                count: paragraphs.len(),
            };
            for (i, paragraph) in paragraphs.iter().enumerate() {
                total_length += self.optional_clip(paragraph, run, &layout, i);
            }
            layout
        };

        info!(
            "Narration is {total_length:.1}s over {} segments",
            layout.body_segments()
        );
        Ok(Narration {
            total_length,
            layout,
        })
    }

    fn optional_clip(&self, text: &str, run: &RunPaths, layout: &ContentLayout, i: usize) -> f64 {
        let mp3 = run.audio_dir().join(layout.audio_name(i));
        match self.clip(text, &mp3) {
            Ok(length) => length,
            Err(err) => {
                warn!(segment = i + 1, "{err}; leaving it out");
                0.0
            }
        }
    }

    /// Speaks `text` into `mp3` and returns its probed length.
    fn clip(&self, text: &str, mp3: &Path) -> PipelineResult<f64> {
        let wav = mp3.with_extension("wav");
        self.voice.synthesize(text, &wav)?;
        let command = FfmpegCommand::new()
            .input(&wav)
            .args(["-b:a", AUDIO_BITRATE])
            .arg(mp3);
        ffmpeg::run_stage(self.runner, "narration encode", &command)?;
        if let Err(e) = fs::remove_file(&wav) {
            debug!("could not remove {}: {e}", wav.display());
        }
        let length = self.probe.duration(mp3)?;
        debug!(clip = %mp3.display(), length, "narration clip written");
        Ok(length)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::ffmpeg::testing::RecordingRunner;
    use crate::layout::Workspace;
    use crate::probe::testing::{FixedProbe, write_wav};
    use crate::reddit::Comment;

    #[derive(Default)]
    struct FakeVoice {
        spoken: RefCell<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl VoiceSynthesizer for FakeVoice {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn synthesize(&self, text: &str, wav: &Path) -> PipelineResult<()> {
            if self.fail_on == Some(text) {
                return Err(PipelineError::synthesis(wav, "boom"));
            }
            self.spoken.borrow_mut().push(text.to_string());
            write_wav(wav, 0.5);
            Ok(())
        }
    }

    fn thread(comments: &[&str], body: &str) -> Thread {
        Thread {
            id: "t3_abc".into(),
            title: "What is it?".into(),
            body: body.into(),
            url: String::new(),
            over_18: false,
            comments: comments
                .iter()
                .enumerate()
                .map(|(i, body)| Comment {
                    id: format!("c{i}"),
                    body: body.to_string(),
                    url: String::new(),
                })
                .collect(),
        }
    }

    fn run() -> (tempfile::TempDir, RunPaths) {
        let dir = tempfile::tempdir().unwrap();
        let run = Workspace::rooted_at(dir.path()).run("t3_abc");
        (dir, run)
    }

    fn probe() -> FixedProbe {
        FixedProbe::default()
            .with("title.mp3", 2.0)
            .with("0.mp3", 20.0)
            .with("1.mp3", 20.0)
            .with("2.mp3", 20.0)
    }

    #[test]
    fn comments_stop_once_the_narration_is_long_enough() {
        let (_dir, run) = run();
        let voice = FakeVoice::default();
        let runner = RecordingRunner::writing_outputs();
        let probe = probe();
        let narration = Narrator::new(&voice, &probe, &runner)
            .narrate(&thread(&["a", "b", "c", "d"], ""), &Settings::default(), &run)
            .unwrap();

        assert_eq!(narration.layout, ContentLayout::Comments { count: 3 });
        assert_eq!(narration.total_length, 62.0);
        assert_eq!(*voice.spoken.borrow(), ["What is it?", "a", "b", "c"]);
        for name in ["title.mp3", "0.mp3", "1.mp3", "2.mp3"] {
            assert!(run.audio_dir().join(name).exists(), "{name}");
        }
        assert!(!run.audio_dir().join("0.wav").exists());
        assert_eq!(runner.commands()[0].value_of("-b:a"), Some("192k"));
    }

    #[test]
    fn failed_comment_leaves_a_gap() {
        let (_dir, run) = run();
        let voice = FakeVoice {
            fail_on: Some("b"),
            ..FakeVoice::default()
        };
        let runner = RecordingRunner::writing_outputs();
        let probe = probe();
        let narration = Narrator::new(&voice, &probe, &runner)
            .narrate(&thread(&["a", "b", "c"], ""), &Settings::default(), &run)
            .unwrap();

        assert_eq!(narration.segments(), 3);
        assert_eq!(narration.total_length, 42.0);
        assert!(!run.audio_dir().join("1.mp3").exists());
    }

    #[test]
    fn voice_that_ignores_its_input_is_reaped() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("title.wav");
        let text = "word ".repeat(1 << 18);
        let err = speak(Command::new("true"), &text, &wav).unwrap_err();
        assert!(
            matches!(&err, PipelineError::Synthesis { reason, .. } if reason.contains("could not pass text")),
            "{err:?}"
        );
    }

    #[test]
    fn failed_title_is_fatal() {
        let (_dir, run) = run();
        let voice = FakeVoice {
            fail_on: Some("What is it?"),
            ..FakeVoice::default()
        };
        let runner = RecordingRunner::writing_outputs();
        let err = Narrator::new(&voice, &probe(), &runner)
            .narrate(&thread(&["a"], ""), &Settings::default(), &run)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Synthesis { .. }));
    }

    #[test]
    fn single_story_clip() {
        let (_dir, run) = run();
        let voice = FakeVoice::default();
        let runner = RecordingRunner::writing_outputs();
        let probe = FixedProbe::default()
            .with("title.mp3", 2.0)
            .with("postaudio.mp3", 40.0);
        let mut settings = Settings::default();
        settings.storymode = true;
        settings.storymode_method = 0;

        let narration = Narrator::new(&voice, &probe, &runner)
            .narrate(&thread(&[], "Once upon a time."), &settings, &run)
            .unwrap();
        assert_eq!(narration.layout, ContentLayout::StorySingle);
        assert_eq!(narration.total_length, 42.0);
    }

    #[test]
    fn story_paragraphs_are_narrated_separately() {
        let (_dir, run) = run();
        let voice = FakeVoice::default();
        let runner = RecordingRunner::writing_outputs();
        let probe = FixedProbe::default()
            .with("title.mp3", 2.0)
            .with("postaudio-0.mp3", 30.0)
            .with("postaudio-1.mp3", 30.0);
        let mut settings = Settings::default();
        settings.storymode = true;

        let body = format!("{} {}", "A".repeat(200) + ".", "B".repeat(200) + ".");
        let narration = Narrator::new(&voice, &probe, &runner)
            .narrate(&thread(&[], &body), &settings, &run)
            .unwrap();
        assert_eq!(narration.layout, ContentLayout::StoryParagraphs { count: 2 });
        assert_eq!(narration.total_length, 62.0);
        assert!(run.audio_dir().join("postaudio-1.mp3").exists());
    }

    #[test]
    fn voice_choice_is_case_insensitive() {
        let mut tts = TtsSettings::default();
        tts.voice_choice = "ESpeak".into();
        assert_eq!(voice_from_config(&tts).unwrap().name(), "espeak");
        tts.voice_choice = "Piper".into();
        assert_eq!(voice_from_config(&tts).unwrap().name(), "piper");
    }

    #[test]
    fn unknown_voice_lists_the_available_ones() {
        let mut tts = TtsSettings::default();
        tts.voice_choice = "TikTok".into();
        let err = voice_from_config(&tts).err().unwrap();
        assert!(err.to_string().contains("piper, espeak"));
    }
}
