//! Exam data model — raw slice buffers, decoded pixel data, decode seam.
//!
//! A [`StudySet`] owns the ordered raw slice buffers for one exam. Image
//! codec handling is an upstream concern: ingestion hands this crate
//! display-ready bytes plus a [`SliceDecoder`] that can turn them into an
//! 8-bit luminance [`PixelBuffer`] for scoring. Decoded buffers are
//! transient — the sampler drops them as soon as a variance score is taken.

use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed slice data: {0}")]
    Malformed(String),

    #[error("unexpected buffer length: got {got}, expected {expected}")]
    Length { got: usize, expected: usize },
}

/// 8-bit luminance image, row-major.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, DecodeError> {
        let expected = (width as usize) * (height as usize);
        if data.len() != expected {
            return Err(DecodeError::Length { got: data.len(), expected });
        }
        Ok(Self { width, height, data })
    }
}

/// One undecoded slice as delivered by ingestion.
///
/// Bytes are `Arc`-shared so a slice can be handed to a decode task and to
/// the classifier wire encoder without copying the buffer.
#[derive(Debug, Clone)]
pub struct RawSlice {
    /// Position within the exam series, ascending from 0.
    pub index: usize,
    pub filename: String,
    pub bytes: Arc<Vec<u8>>,
}

impl RawSlice {
    pub fn new(index: usize, filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { index, filename: filename.into(), bytes: Arc::new(bytes) }
    }
}

/// A slice that survived selection: decoded pixels retained, score attached.
#[derive(Debug, Clone)]
pub struct Slice {
    pub index: usize,
    pub filename: String,
    pub pixels: PixelBuffer,
    pub variance_score: f64,
    pub bytes: Arc<Vec<u8>>,
}

/// Ordered slice series for one exam. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct StudySet {
    pub exam_id: String,
    pub slices: Vec<RawSlice>,
}

impl StudySet {
    pub fn new(exam_id: impl Into<String>, slices: Vec<RawSlice>) -> Self {
        Self { exam_id: exam_id.into(), slices }
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }
}

/// Decode seam — implemented by the ingestion layer for whatever format it
/// delivers. The sampler only ever needs luminance pixels for scoring.
pub trait SliceDecoder: Send + Sync {
    fn decode(&self, raw: &RawSlice) -> Result<PixelBuffer, DecodeError>;
}

/// Decoder for pre-decoded fixed-geometry luminance buffers, the contract
/// the upstream ingestion component ships by default.
#[derive(Debug, Clone)]
pub struct LuminanceDecoder {
    pub width: u32,
    pub height: u32,
}

impl SliceDecoder for LuminanceDecoder {
    fn decode(&self, raw: &RawSlice) -> Result<PixelBuffer, DecodeError> {
        PixelBuffer::new(self.width, self.height, raw.bytes.as_ref().clone())
    }
}
