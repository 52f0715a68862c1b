use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::process::Command;

use hound::WavReader;

use crate::error::{PipelineError, PipelineResult};

/// Reads a media file's own duration metadata.
pub trait MediaProbe {
    fn duration(&self, path: &Path) -> PipelineResult<f64>;
}

/// Reads RIFF/WAVE headers directly and asks ffprobe for everything else.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfprobeProbe;

impl MediaProbe for FfprobeProbe {
    fn duration(&self, path: &Path) -> PipelineResult<f64> {
        if is_wav(path)? {
            wav_duration_seconds(path)
        } else {
            ffprobe_duration_seconds(path)
        }
    }
}

fn is_wav(path: &Path) -> PipelineResult<bool> {
    let mut header = [0u8; 12];
    let mut file = File::open(path)?;
    let read = file.read(&mut header)?;
    Ok(read == header.len() && &header[0..4] == b"RIFF" && &header[8..12] == b"WAVE")
}

pub fn wav_duration_seconds(path: &Path) -> PipelineResult<f64> {
    let reader = WavReader::open(path).map_err(|e| PipelineError::probe(path, e.to_string()))?;
    let spec = reader.spec();
    let samples = reader.len();
    let frames = samples as f64 / spec.channels as f64;
    let duration = frames / spec.sample_rate as f64;
    Ok(duration)
}

fn ffprobe_duration_seconds(path: &Path) -> PipelineResult<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .map_err(|e| PipelineError::probe(path, format!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        return Err(PipelineError::probe(
            path,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    parse_duration(&String::from_utf8_lossy(&output.stdout))
        .ok_or_else(|| PipelineError::probe(path, "ffprobe reported no usable duration"))
}

fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
}


#[cfg(test)]
mod tests {
    use super::testing::write_wav;
    use super::*;

    #[test]
    fn wav_headers_are_read_without_ffprobe() {
        let dir = tempfile::tempdir().unwrap();
        // the file name lies about the container; the header decides
        let path = dir.path().join("title.mp3");
        write_wav(&path, 2.5);
        let duration = FfprobeProbe.duration(&path).unwrap();
        assert!((duration - 2.5).abs() < 1e-9);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FfprobeProbe.duration(&dir.path().join("nope.mp3")).unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
    }

    #[test]
    fn ffprobe_output_parsing() {
        assert_eq!(parse_duration("12.480000\n"), Some(12.48));
        assert_eq!(parse_duration("N/A"), None);
        assert_eq!(parse_duration("-1"), None);
    }
}
