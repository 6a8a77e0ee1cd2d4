//! Splitting payloads into transport-sized frames and putting them back together.
//!
//! A [`Frame`] is a raw byte range tagged with its 0-based `index` and the `total`
//! number of frames in the payload. On the wire it travels as a [`WireFrame`], which
//! adds the correlation id and base64-encodes the bytes so the frame fits in a JSON
//! native message.

use crate::error::{classify, BridgeResult, FailureSource, FramingFault, InputFault};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// Absolute payload ceiling: Chrome's browser -> host message limit.
pub const MAX_PAYLOAD: usize = 64 * 1_048_576;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub index: u32,
    pub total: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn into_wire(self, id: impl Into<String>) -> WireFrame {
        WireFrame {
            id: id.into(),
            index: self.index,
            total: self.total,
            chunk: STANDARD.encode(&self.data),
        }
    }
}

/// A frame as carried inside one native message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFrame {
    pub id: String,
    pub index: u32,
    pub total: u32,
    pub chunk: String,
}

impl WireFrame {
    pub fn into_frame(self) -> BridgeResult<(String, Frame)> {
        let data = STANDARD.decode(self.chunk.as_bytes()).map_err(|e| {
            classify(
                FailureSource::Malformed,
                &format!("frame {} of {} is not valid base64: {e}", self.index, self.total),
            )
        })?;
        Ok((
            self.id,
            Frame {
                index: self.index,
                total: self.total,
                data,
            },
        ))
    }
}

/// Splits payloads against a fixed frame size and ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_frame_size: usize,
    ceiling: usize,
}

impl Chunker {
    pub fn new(max_frame_size: usize, ceiling: usize) -> Self {
        Self {
            max_frame_size,
            ceiling,
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Fail with `PAYLOAD_TOO_LARGE` if `len` bytes cannot be sent at all.
    pub fn check_size(&self, len: usize) -> BridgeResult<()> {
        if len > self.ceiling {
            return Err(classify(
                FailureSource::Framing(FramingFault::TooLarge),
                &format!("payload of {len} bytes exceeds the {} byte ceiling", self.ceiling),
            ));
        }
        Ok(())
    }

    pub fn chunk(&self, payload: &[u8]) -> BridgeResult<Vec<Frame>> {
        self.check_size(payload.len())?;
        if self.max_frame_size == 0 {
            return Err(classify(
                FailureSource::Input(InputFault::WrongShape),
                "max frame size must be greater than zero",
            ));
        }
        if payload.is_empty() {
            return Ok(vec![Frame {
                index: 0,
                total: 1,
                data: Vec::new(),
            }]);
        }

        let total = u32::try_from(payload.len().div_ceil(self.max_frame_size)).map_err(|_| {
            classify(
                FailureSource::Framing(FramingFault::TooLarge),
                "payload needs more frames than can be numbered",
            )
        })?;
        Ok(payload
            .chunks(self.max_frame_size)
            .zip(0u32..)
            .map(|(data, index)| Frame {
                index,
                total,
                data: data.to_vec(),
            })
            .collect())
    }

    pub fn reassembler(&self) -> Reassembler {
        Reassembler::with_ceiling(self.ceiling)
    }
}

/// Split `payload` into frames of at most `max_frame_size` bytes, under [`MAX_PAYLOAD`].
pub fn chunk(payload: &[u8], max_frame_size: usize) -> BridgeResult<Vec<Frame>> {
    Chunker::new(max_frame_size, MAX_PAYLOAD).chunk(payload)
}

/// Concatenate a complete, in-order frame sequence.
pub fn reassemble<I>(frames: I) -> BridgeResult<Vec<u8>>
where
    I: IntoIterator<Item = Frame>,
{
    let mut r = Reassembler::new();
    for frame in frames {
        r.push(frame)?;
    }
    r.finish()
}

/// Incremental reassembly of one payload.
///
/// Frames must arrive in index order; nothing is reordered.
#[derive(Debug, Clone)]
pub struct Reassembler {
    total: Option<u32>,
    next: u32,
    buf: Vec<u8>,
    ceiling: usize,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    pub fn new() -> Self {
        Self::with_ceiling(MAX_PAYLOAD)
    }

    pub fn with_ceiling(ceiling: usize) -> Self {
        Self {
            total: None,
            next: 0,
            buf: Vec::new(),
            ceiling,
        }
    }

    pub fn push(&mut self, frame: Frame) -> BridgeResult<()> {
        let out_of_order = |detail: String| {
            classify(FailureSource::Framing(FramingFault::Sequence), &detail)
        };

        if frame.total == 0 {
            return Err(out_of_order("frame declares a total of zero".to_string()));
        }
        match self.total {
            Some(total) if total != frame.total => {
                return Err(out_of_order(format!(
                    "frame declares {} frames, earlier frames declared {total}",
                    frame.total
                )));
            }
            Some(_) => {}
            None => self.total = Some(frame.total),
        }
        if frame.index >= frame.total {
            return Err(out_of_order(format!(
                "frame index {} is outside 0..{}",
                frame.index, frame.total
            )));
        }
        if frame.index != self.next {
            return Err(out_of_order(format!(
                "expected frame {}, got frame {}",
                self.next, frame.index
            )));
        }
        if self.buf.len() + frame.data.len() > self.ceiling {
            return Err(classify(
                FailureSource::Framing(FramingFault::TooLarge),
                &format!("reassembled payload exceeds the {} byte ceiling", self.ceiling),
            ));
        }

        self.buf.extend_from_slice(&frame.data);
        self.next += 1;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.total == Some(self.next)
    }

    /// Number of frames accepted so far.
    pub fn received(&self) -> u32 {
        self.next
    }

    pub fn finish(self) -> BridgeResult<Vec<u8>> {
        if !self.is_complete() {
            let detail = match self.total {
                Some(total) => format!("received {} of {total} frames", self.next),
                None => "no frames received".to_string(),
            };
            return Err(classify(
                FailureSource::Framing(FramingFault::Incomplete),
                &detail,
            ));
        }
        Ok(self.buf)
    }
}
