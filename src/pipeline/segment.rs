//! Screenshot slicing: cut a tall page image into overlapping segments.
//!
//! ## Scan positions
//!
//! The cursor walks down the image in steps of `segment_height - overlap`.
//! Every step consumes an index, including steps whose crop is dropped as
//! dead space (a slice that is entirely pure white or entirely pure black,
//! typically the padding below a short page). Kept segments are therefore
//! numbered by scan position and the sequence may have gaps.
//!
//! The walk ends at the first crop whose bottom reaches the image height,
//! kept or not; the final crop may be shorter than `segment_height`.
//!
//! Slicing is CPU-bound; async callers run [`segment`] under
//! `tokio::task::spawn_blocking`.

use crate::error::CriticError;
use crate::model::{segment_file_name, Segment};
use image::{DynamicImage, GenericImageView, Rgb};
use std::path::{Path, PathBuf};
use tracing::debug;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

/// Receives every kept segment as it is produced.
pub trait SegmentSink {
    /// Persist `segment`; returns where it was stored, if anywhere.
    fn persist(&mut self, segment: &Segment) -> Result<Option<PathBuf>, CriticError>;
}

/// Writes each segment as `segment_<index>.png` into a directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    /// Create the sink, creating `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CriticError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| CriticError::OutputWriteFailed {
            path: dir.clone(),
            source: e,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SegmentSink for DirectorySink {
    fn persist(&mut self, segment: &Segment) -> Result<Option<PathBuf>, CriticError> {
        let path = self.dir.join(segment_file_name(segment.index));
        segment
            .pixels
            .save_with_format(&path, image::ImageFormat::Png)
            .map_err(|e| CriticError::SegmentWriteFailed {
                index: segment.index,
                path: path.clone(),
                detail: e.to_string(),
            })?;
        Ok(Some(path))
    }
}

/// Keeps segments in memory only.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

impl SegmentSink for DiscardSink {
    fn persist(&mut self, _segment: &Segment) -> Result<Option<PathBuf>, CriticError> {
        Ok(None)
    }
}

/// Slice `image` into vertical segments of at most `segment_height` rows,
/// consecutive segments sharing `overlap` rows.
///
/// # Errors
/// - [`CriticError::InvalidConfig`] when `overlap >= segment_height`
/// - [`CriticError::EmptyImage`] when the image has no rows or columns
/// - whatever the sink returns when persisting fails
///
/// An image made only of dead space yields `Ok(vec![])`.
pub fn segment(
    image: &DynamicImage,
    segment_height: u32,
    overlap: u32,
    sink: &mut dyn SegmentSink,
) -> Result<Vec<Segment>, CriticError> {
    if segment_height == 0 || overlap >= segment_height {
        return Err(CriticError::InvalidConfig(format!(
            "segment height ({segment_height}) must be greater than overlap ({overlap})"
        )));
    }
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(CriticError::EmptyImage { width, height });
    }

    let step = segment_height - overlap;
    let mut segments = Vec::new();
    let mut top = 0u32;
    let mut index = 1u32;

    loop {
        let bottom = top.saturating_add(segment_height).min(height);
        let crop = image.crop_imm(0, top, width, bottom - top);

        if is_dead_space(&crop) {
            debug!("Segment {index} [{top}, {bottom}) is dead space, skipped");
        } else {
            let mut seg = Segment {
                index,
                top,
                bottom,
                pixels: crop,
                path: None,
            };
            seg.path = sink.persist(&seg)?;
            debug!("Segment {index} [{top}, {bottom}) kept");
            segments.push(seg);
        }

        if bottom == height {
            break;
        }
        top += step;
        index += 1;
    }

    Ok(segments)
}

/// True when every pixel has the same color and that color is pure white
/// or pure black. Alpha is ignored.
pub fn is_dead_space(image: &DynamicImage) -> bool {
    let rgb = image.to_rgb8();
    let mut pixels = rgb.pixels();
    let Some(&first) = pixels.next() else {
        return true;
    };
    (first == WHITE || first == BLACK) && pixels.all(|&p| p == first)
}
