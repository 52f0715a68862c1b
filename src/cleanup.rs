use std::fs;
use std::io::ErrorKind;

use tracing::{info, warn};

use crate::error::PipelineError;
use crate::layout::RunPaths;

/// Removes the run's temporary directory. Returns whether anything was removed; a
/// failure is logged and otherwise ignored.
pub fn remove_run(run: &RunPaths) -> bool {
    match fs::remove_dir_all(&run.root) {
        Ok(()) => {
            info!("Removed temporary files in {}", run.root.display());
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(source) => {
            let err = PipelineError::ResourceCleanupFailure {
                path: run.root.clone(),
                source,
            };
            warn!("{err}");
            false
        }
    }
}
