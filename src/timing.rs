use rand::Rng;

use crate::error::{PipelineError, PipelineResult};

/// Seconds kept clear at the start of a background asset before halving kicks in.
pub const INITIAL_MARGIN: u32 = 180;

/// Sub-interval of a background asset, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub start: f64,
    pub end: f64,
}

impl TimeWindow {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Picks a uniformly random window of `required` seconds out of an asset `total` seconds
/// long, skipping a leading margin that shrinks (180, 90, 45, ... 0) until the window fits.
pub fn compute_window<R: Rng + ?Sized>(
    total: f64,
    required: f64,
    rng: &mut R,
) -> PipelineResult<TimeWindow> {
    if !total.is_finite() || !required.is_finite() || required < 0.0 {
        return Err(PipelineError::config(format!(
            "cannot cut a {required}s window out of a {total}s asset"
        )));
    }

    let mut margin = INITIAL_MARGIN;
    while total <= required + f64::from(margin) {
        if margin == 0 {
            return Err(PipelineError::BackgroundTooShort { total, required });
        }
        margin /= 2;
    }

    let start = rng.gen_range(f64::from(margin)..total - required);
    Ok(TimeWindow {
        start,
        end: start + required,
    })
}
