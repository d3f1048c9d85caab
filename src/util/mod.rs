//! Collaborators that plug into the session driver without any camera
//! hardware: corner-recording replay and pose exporters.

use std::fs;
use std::path::Path;

use crate::error::SinkError;

pub mod recording;
pub mod sinks;

pub use recording::{write_recording, CornerFrame, RecordedCornerFinder, RecordedCornerSource};
pub use sinks::{CsvPoseSink, JsonLinesPoseSink, PublishedPose, RecordingSink};

/// Ensure the output directory exists
pub fn ensure_output_dir<P: AsRef<Path>>(output_dir: P) -> Result<(), SinkError> {
    let output_dir = output_dir.as_ref();
    if !output_dir.exists() {
        fs::create_dir_all(output_dir).map_err(|e| {
            SinkError::Io(format!(
                "Failed to create output directory {}: {e}",
                output_dir.display()
            ))
        })?;
    }
    Ok(())
}
