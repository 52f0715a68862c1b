use tracing::{debug, warn};

use crate::filter::{FilterGraph, Stream};
use crate::images::VisualLayer;

/// When a layer is on screen, in seconds of output time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayWindow {
    pub segment_index: usize,
    pub start: f64,
    pub end: f64,
    pub translucent: bool,
}

#[derive(Debug, Clone)]
pub struct Composition {
    pub video: Stream,
    pub windows: Vec<OverlayWindow>,
}

/// Overlays each visual layer, centered, on `background` while its narration plays.
/// Windows are half-open, `[start, end)`, so adjacent layers never share a frame.
///
/// At most `min(layers, durations)` layers are visited. A layer is paired with the
/// duration of its own segment and starts where that segment starts in the
/// concatenated narration, so a missing screenshot never shifts the ones after it.
/// Segments with a non-positive duration get no overlay and occupy no time.
/// Every layer except the title is faded to `opacity` when it is below 1.0.
pub fn composite(
    graph: &mut FilterGraph,
    background: &Stream,
    layers: &[VisualLayer],
    durations: &[f64],
    opacity: f64,
) -> Composition {
    let offsets = segment_offsets(durations);
    let mut video = background.clone();
    let mut windows = Vec::new();

    for layer in layers.iter().take(layers.len().min(durations.len())) {
        let Some(&duration) = durations.get(layer.segment_index) else {
            warn!(segment = layer.segment_index, "no narration for image layer; skipping it");
            continue;
        };
        if duration <= 0.0 {
            warn!(
                segment = layer.segment_index,
                duration, "skipping overlay for a segment without narration"
            );
            continue;
        }

        let start = offsets[layer.segment_index];
        let end = start + duration;
        let translucent = !layer.is_title() && opacity < 1.0;
        debug!(segment = layer.segment_index, start, end, translucent, "overlaying image");

        let input = graph.video_input(&layer.path);
        let mut image = graph.apply(&[&input], layer.scale_filter());
        if translucent {
            image = graph.apply(
                &[&image],
                format!("format=rgba,colorchannelmixer=aa={opacity}"),
            );
        }
        video = graph.apply(
            &[&video, &image],
            format!(
                "overlay=x=(main_w-overlay_w)/2:y=(main_h-overlay_h)/2:enable='gte(t,{start})*lt(t,{end})'"
            ),
        );

        windows.push(OverlayWindow {
            segment_index: layer.segment_index,
            start,
            end,
            translucent,
        });
    }

    Composition { video, windows }
}

/// Start of every segment in the concatenated narration.
fn segment_offsets(durations: &[f64]) -> Vec<f64> {
    durations
        .iter()
        .scan(0.0, |elapsed, d| {
            let start = *elapsed;
            *elapsed += d.max(0.0);
            Some(start)
        })
        .collect()
}
