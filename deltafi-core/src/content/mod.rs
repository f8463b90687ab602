//! Named, typed content composed from shared segments.

mod segment;

pub use segment::{referenced_size, total_size, Segment};

use crate::errors::ContentRangeError;
use serde::{Deserialize, Serialize};

/// A named, typed view over an ordered list of segments.
///
/// Several `Content` values may reference the same segments.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    /// Content name, usually a file name.
    pub name: String,
    /// Media type.
    pub media_type: String,
    /// Ordered byte ranges making up the content.
    #[serde(default)]
    pub segments: Vec<Segment>,
}

impl Content {
    /// Creates content with no segments.
    #[must_use]
    pub fn new(name: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            segments: Vec::new(),
        }
    }

    /// Adds a segment.
    #[must_use]
    pub fn with_segment(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    /// Total size of all segments.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.segments.iter().map(|s| s.size).sum()
    }

    /// Returns a new content over `[offset, offset + size)` of this one.
    ///
    /// Segments are trimmed, never copied.
    pub fn subcontent(&self, offset: u64, size: u64) -> Result<Self, ContentRangeError> {
        Ok(Self {
            name: self.name.clone(),
            media_type: self.media_type.clone(),
            segments: self.subreference_segments(offset, size)?,
        })
    }

    /// Segments covering `[offset, offset + size)` of this content.
    pub fn subreference_segments(
        &self,
        offset: u64,
        size: u64,
    ) -> Result<Vec<Segment>, ContentRangeError> {
        let total = self.size();
        if offset.checked_add(size).map_or(true, |end| end > total) {
            return Err(ContentRangeError {
                offset,
                size,
                total,
            });
        }

        let mut result = Vec::new();
        let mut offset_remaining = offset;
        let mut size_remaining = size;

        for segment in &self.segments {
            if size_remaining == 0 {
                break;
            }
            let mut piece = *segment;

            if offset_remaining > 0 {
                if piece.size <= offset_remaining {
                    offset_remaining -= piece.size;
                    continue;
                }
                piece.offset += offset_remaining;
                piece.size -= offset_remaining;
                offset_remaining = 0;
            }

            piece.size = piece.size.min(size_remaining);
            size_remaining -= piece.size;
            result.push(piece);
        }

        Ok(result)
    }
}
