use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::ffmpeg::{self, FfmpegCommand, FfmpegRunner};
use crate::filter::{self, FilterGraph, Stream};
use crate::utils::wrap_text;

pub const TITLE_FONT: &str = "Roboto-Bold.ttf";

const TITLE_WRAP: usize = 35;
const WIDE_WRAP: usize = 45;
const DEFAULT_FONT_SIZE: u32 = 47;
const LINE_PADDING: u32 = 5;
const TITLE_X: u32 = 120;
const CHANNEL_POSITION: (u32, u32) = (205, 825);
const CHANNEL_FONT_SIZE: u32 = 30;
const THUMBNAIL_WRAP: usize = 20;

/// How a thread title is laid out on the title card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleLayout {
    pub lines: Vec<String>,
    pub font_size: u32,
    /// Pushes the text block below the vertical center.
    pub y_offset: u32,
}

impl TitleLayout {
    /// Wraps at 35 columns; titles needing three or more lines are re-wrapped at 45
    /// columns with a smaller font.
    pub fn for_title(title: &str) -> Self {
        let lines = wrap_text(title, TITLE_WRAP);
        let (wrap, font_size, y_offset) = match lines.len() {
            3 => (WIDE_WRAP, 40, 35),
            4 => (WIDE_WRAP, 35, 40),
            n if n > 4 => (WIDE_WRAP, 30, 30),
            _ => return Self { lines, font_size: DEFAULT_FONT_SIZE, y_offset: 30 },
        };
        Self {
            lines: wrap_text(title, wrap),
            font_size,
            y_offset,
        }
    }

    fn block_height(&self) -> u32 {
        let n = self.lines.len() as u32;
        n * self.font_size + n.saturating_sub(1) * LINE_PADDING
    }

    /// `y` expression for line `i`, vertically centering the whole block.
    fn line_y(&self, i: usize) -> String {
        let offset = self.y_offset + i as u32 * (self.font_size + LINE_PADDING);
        format!("(h-{})/2+{offset}", self.block_height())
    }
}

/// Draws title cards and thumbnails with ffmpeg's `drawtext`.
pub struct TitleRenderer<'a> {
    runner: &'a dyn FfmpegRunner,
    fonts_dir: PathBuf,
}

impl<'a> TitleRenderer<'a> {
    pub fn new(runner: &'a dyn FfmpegRunner, fonts_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            fonts_dir: fonts_dir.into(),
        }
    }

    fn font(&self) -> Option<PathBuf> {
        let path = self.fonts_dir.join(TITLE_FONT);
        if path.exists() {
            Some(path)
        } else {
            debug!("{} not found; ffmpeg picks its default font", path.display());
            None
        }
    }

    fn drawtext(&self, text: &str, size: u32, color: &str, x: &str, y: &str) -> String {
        let mut filter = String::from("drawtext=");
        if let Some(font) = self.font() {
            filter.push_str(&format!("fontfile={}:", filter::escape_value(&font.to_string_lossy())));
        }
        filter.push_str(&format!(
            "expansion=none:text={}:fontsize={size}:fontcolor={color}:x={x}:y={y}",
            filter::escape_value(text)
        ));
        filter
    }

    /// Writes the title card for `title` onto `template` at `output`.
    pub fn render_title_card(
        &self,
        template: &Path,
        title: &str,
        channel_name: &str,
        output: &Path,
    ) -> PipelineResult<()> {
        if !template.exists() {
            return Err(PipelineError::MissingRequiredAsset(template.to_path_buf()));
        }
        let layout = TitleLayout::for_title(title);
        debug!(lines = layout.lines.len(), font_size = layout.font_size, "title layout");

        let mut graph = FilterGraph::new();
        let mut card = graph.video_input(template);
        if !channel_name.is_empty() {
            let (x, y) = CHANNEL_POSITION;
            card = graph.apply(
                &[&card],
                self.drawtext(channel_name, CHANNEL_FONT_SIZE, "black", &x.to_string(), &y.to_string()),
            );
        }
        for (i, line) in layout.lines.iter().enumerate() {
            card = graph.apply(
                &[&card],
                self.drawtext(line, layout.font_size, "black", &TITLE_X.to_string(), &layout.line_y(i)),
            );
        }

        self.write_frame(&graph, &card, output, "title card")?;
        info!("Title card written to {}", output.display());
        Ok(())
    }

    /// Draws `title` onto the first PNG in `backgrounds_dir`. Returns `None` when there
    /// is no PNG to draw on.
    pub fn render_thumbnail(
        &self,
        backgrounds_dir: &Path,
        title: &str,
        font_size: u32,
        font_color: &str,
        output: &Path,
    ) -> PipelineResult<Option<PathBuf>> {
        let Some(base) = first_png(backgrounds_dir)? else {
            warn!("No PNG in {} to build a thumbnail on", backgrounds_dir.display());
            return Ok(None);
        };
        debug!(base = %base.display(), "thumbnail base image");

        let lines = wrap_text(title, THUMBNAIL_WRAP);
        let line_height = font_size + LINE_PADDING;
        let block = lines.len() as u32 * line_height;

        let mut graph = FilterGraph::new();
        let mut thumb = graph.video_input(&base);
        for (i, line) in lines.iter().enumerate() {
            let y = format!("(h-{block})/2+{}", i as u32 * line_height);
            thumb = graph.apply(
                &[&thumb],
                self.drawtext(line, font_size, font_color, "(w-text_w)/2", &y),
            );
        }

        self.write_frame(&graph, &thumb, output, "thumbnail")?;
        info!("Thumbnail written to {}", output.display());
        Ok(Some(output.to_path_buf()))
    }

    fn write_frame(&self, graph: &FilterGraph, image: &Stream, output: &Path, stage: &str) -> PipelineResult<()> {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        let command = graph.to_command(
            FfmpegCommand::new(),
            &[image],
            &["-frames:v".to_string(), "1".to_string()],
            output,
        );
        ffmpeg::run_stage(self.runner, stage, &command)
    }
}

fn first_png(dir: &Path) -> PipelineResult<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut pngs: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
        })
        .collect();
    pngs.sort();
    Ok(pngs.into_iter().next())
}
