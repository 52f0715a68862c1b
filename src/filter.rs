use std::path::{Path, PathBuf};

use crate::ffmpeg::FfmpegCommand;

/// A stream inside a filter graph: either an input stream (`1:a`) or a labelled filter
/// output (`s3`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    label: String,
    input: bool,
}

impl Stream {
    fn input(index: usize, kind: char) -> Self {
        Self {
            label: format!("{index}:{kind}"),
            input: true,
        }
    }

    /// `[label]` as used inside `-filter_complex`.
    pub fn pad(&self) -> String {
        format!("[{}]", self.label)
    }

    /// Argument for `-map`.
    pub fn map_arg(&self) -> String {
        if self.input {
            self.label.clone()
        } else {
            self.pad()
        }
    }
}

/// Incrementally built `-filter_complex` graph plus the inputs it reads.
///
/// Cloning a graph forks the composition: two render passes can share everything
/// built so far and diverge afterwards.
#[derive(Debug, Clone, Default)]
pub struct FilterGraph {
    inputs: Vec<PathBuf>,
    filters: Vec<String>,
    next_label: usize,
}

impl FilterGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an input file and returns its index.
    pub fn add_input(&mut self, path: &Path) -> usize {
        self.inputs.push(path.to_path_buf());
        self.inputs.len() - 1
    }

    pub fn video_input(&mut self, path: &Path) -> Stream {
        let idx = self.add_input(path);
        Stream::input(idx, 'v')
    }

    pub fn audio_input(&mut self, path: &Path) -> Stream {
        let idx = self.add_input(path);
        Stream::input(idx, 'a')
    }

    /// Appends `[in0][in1]filter[out]` and returns the new output stream.
    pub fn apply(&mut self, inputs: &[&Stream], filter: impl AsRef<str>) -> Stream {
        let out = Stream {
            label: format!("s{}", self.next_label),
            input: false,
        };
        self.next_label += 1;
        let pads: String = inputs.iter().map(|s| s.pad()).collect();
        self.filters
            .push(format!("{pads}{}{}", filter.as_ref(), out.pad()));
        out
    }

    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    pub fn filter_complex(&self) -> String {
        self.filters.join(";")
    }

    /// Appends inputs, the graph, stream maps, output options and the output path.
    pub fn to_command(
        &self,
        base: FfmpegCommand,
        maps: &[&Stream],
        output_options: &[String],
        output: &Path,
    ) -> FfmpegCommand {
        let mut command = base;
        for input in &self.inputs {
            command = command.input(input);
        }
        if !self.filters.is_empty() {
            command = command.arg("-filter_complex").arg(self.filter_complex());
        }
        for stream in maps {
            command = command.arg("-map").arg(stream.map_arg());
        }
        command.args(output_options).arg(output)
    }
}

/// Escapes a literal for use as a filter option value inside `-filter_complex`: once
/// for the option parser, then again for the graph parser.
pub fn escape_value(value: &str) -> String {
    escape_chars(&escape_chars(value, &['\\', '\'', ':']), &['\\', '\'', '[', ']', ',', ';'])
}

fn escape_chars(value: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_escaped_for_both_parsers() {
        assert_eq!(escape_value("plain text"), "plain text");
        assert_eq!(escape_value("it's: a, b"), r"it\\\'s\\: a\, b");
        assert_eq!(escape_value("[x];y"), r"\[x\]\;y");
    }

    #[test]
    fn filters_chain_through_generated_labels() {
        let mut graph = FilterGraph::new();
        let bg = graph.video_input(Path::new("bg.mp4"));
        let img = graph.video_input(Path::new("title.png"));
        let scaled = graph.apply(&[&img], "scale=486:-1");
        let out = graph.apply(&[&bg, &scaled], "overlay=x=0:y=0");

        assert_eq!(bg.map_arg(), "0:v");
        assert_eq!(out.map_arg(), "[s1]");
        assert_eq!(
            graph.filter_complex(),
            "[1:v]scale=486:-1[s0];[0:v][s0]overlay=x=0:y=0[s1]"
        );
    }

    #[test]
    fn forked_graphs_do_not_share_later_filters() {
        let mut graph = FilterGraph::new();
        let audio = graph.audio_input(Path::new("audio.mp3"));
        let mut mixed = graph.clone();
        let music = mixed.audio_input(Path::new("background.mp3"));
        mixed.apply(&[&audio, &music], "amix=duration=longest");

        assert_eq!(graph.inputs().len(), 1);
        assert!(graph.filters().is_empty());
        assert_eq!(mixed.inputs().len(), 2);
    }

    #[test]
    fn command_lists_inputs_graph_maps_then_output() {
        let mut graph = FilterGraph::new();
        let v = graph.video_input(Path::new("bg.mp4"));
        let a = graph.audio_input(Path::new("audio.mp3"));
        let scaled = graph.apply(&[&v], "scale=1080:1920");
        let cmd = graph.to_command(
            FfmpegCommand::new(),
            &[&scaled, &a],
            &["-f".to_string(), "mp4".to_string()],
            Path::new("out.mp4"),
        );
        assert_eq!(
            cmd.as_args(),
            [
                "-y",
                "-i",
                "bg.mp4",
                "-i",
                "audio.mp3",
                "-filter_complex",
                "[0:v]scale=1080:1920[s0]",
                "-map",
                "[s0]",
                "-map",
                "1:a",
                "-f",
                "mp4",
                "out.mp4"
            ]
        );
    }
}
