//! Replay of recorded marker corners.
//!
//! A recording is a CSV file with one row per detected corner:
//!
//! ```text
//! frame,camera,index,u,v
//! 0,0,0,312.5,201.25
//! 0,0,1,330.1,201.9
//! ...
//! ```
//!
//! A `(frame, camera)` pair with no rows, or with a gap in the corner
//! indices, counts as "marker not found" for that view.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use csv::{ReaderBuilder, Writer};
use log::info;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::geometry::{Correspondence, GridSize};
use crate::session::{CameraSource, CorrespondenceFinder};

/// One camera's view of one frame: the detected corners, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct CornerFrame {
    pub frame: usize,
    pub camera: usize,
    pub corners: Option<Correspondence>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CornerRecord {
    frame: usize,
    camera: usize,
    index: usize,
    u: f64,
    v: f64,
}

/// Camera source replaying a corner recording frame by frame.
#[derive(Debug, Clone)]
pub struct RecordedCornerSource {
    cameras: usize,
    frames: Vec<Vec<CornerFrame>>,
    cursor: usize,
    grabbed: bool,
}

impl RecordedCornerSource {
    pub fn from_csv<P: AsRef<Path>>(path: P, cameras: usize) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| SourceError::Io(format!("couldn't open {}: {e}", path.display())))?;
        let source = Self::from_reader(file, cameras)?;
        info!(
            "Loaded recording {} ({} frames, {} cameras)",
            path.display(),
            source.len(),
            cameras
        );
        Ok(source)
    }

    pub fn from_reader<R: Read>(reader: R, cameras: usize) -> Result<Self, SourceError> {
        let mut rdr = ReaderBuilder::new()
            .trim(csv::Trim::All)
            .comment(Some(b'#'))
            .from_reader(reader);

        // frame -> camera -> index -> pixel
        let mut grouped: BTreeMap<usize, BTreeMap<usize, BTreeMap<usize, Point2<f64>>>> =
            BTreeMap::new();
        for record in rdr.deserialize() {
            let record: CornerRecord = record?;
            if record.camera >= cameras {
                return Err(SourceError::Device {
                    camera: record.camera,
                    message: format!("recording references camera {} of {}", record.camera, cameras),
                });
            }
            grouped
                .entry(record.frame)
                .or_default()
                .entry(record.camera)
                .or_default()
                .insert(record.index, Point2::new(record.u, record.v));
        }

        let frames: Vec<Vec<CornerFrame>> = grouped
            .into_iter()
            .map(|(frame, views)| {
                (0..cameras)
                    .map(|camera| CornerFrame {
                        frame,
                        camera,
                        corners: views.get(&camera).and_then(contiguous),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        Ok(Self::from_frames(frames, cameras))
    }

    /// Builds a source from frame sets already in memory.
    pub fn from_frames(frames: Vec<Vec<CornerFrame>>, cameras: usize) -> Self {
        RecordedCornerSource {
            cameras,
            frames,
            cursor: 0,
            grabbed: false,
        }
    }

    /// Number of recorded frame sets.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Corners in index order, or `None` if any index is missing.
fn contiguous(corners: &BTreeMap<usize, Point2<f64>>) -> Option<Correspondence> {
    let complete = corners.keys().enumerate().all(|(i, &index)| i == index);
    if complete && !corners.is_empty() {
        Some(corners.values().copied().collect())
    } else {
        None
    }
}

impl CameraSource for RecordedCornerSource {
    type Frame = CornerFrame;

    fn camera_count(&self) -> usize {
        self.cameras
    }

    fn grab_all(&mut self) -> Result<(), SourceError> {
        if self.cursor >= self.frames.len() {
            return Err(SourceError::Exhausted);
        }
        self.grabbed = true;
        Ok(())
    }

    fn retrieve_all(&mut self) -> Result<Vec<CornerFrame>, SourceError> {
        if !std::mem::take(&mut self.grabbed) {
            return Err(SourceError::Device {
                camera: 0,
                message: "retrieve without grab".to_string(),
            });
        }
        let frames = self.frames[self.cursor].clone();
        self.cursor += 1;
        Ok(frames)
    }
}

/// Finder for frames that already carry their corners.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordedCornerFinder;

impl CorrespondenceFinder<CornerFrame> for RecordedCornerFinder {
    fn find(&mut self, frame: &CornerFrame, grid: GridSize) -> Option<Correspondence> {
        frame
            .corners
            .as_ref()
            .filter(|corners| corners.len() == grid.count())
            .cloned()
    }
}

/// Writes frame sets in the recording format.
pub fn write_recording<W: Write>(writer: W, frames: &[Vec<CornerFrame>]) -> Result<(), SourceError> {
    let mut wtr = Writer::from_writer(writer);
    for view in frames.iter().flatten() {
        if let Some(corners) = &view.corners {
            for (index, p) in corners.iter().enumerate() {
                wtr.serialize(CornerRecord {
                    frame: view.frame,
                    camera: view.camera,
                    index,
                    u: p.x,
                    v: p.y,
                })?;
            }
        }
    }
    wtr.flush()?;
    Ok(())
}
