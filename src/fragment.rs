//! Fragmentation and reassembly of Ethernet frames.
//!
//! `split` turns one frame into a lazy sequence of fragments; the
//! [`ReassemblyBuffer`] folds received fragments back into a frame. Both
//! sides are pure with respect to the transport: no I/O, no clocks.

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::wire::{
    FragmentHeader, FrameType, FRAGMENT_GRANULARITY, FRAGMENT_MODULUS, HEADER_LEN, MAX_FRAME_LEN,
};

/// One fragment of an outbound frame.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub header: FragmentHeader,
    pub payload: Bytes,
}

impl Fragment {
    /// Serialize header and payload into one mailbox payload.
    pub fn to_mailbox(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        self.header.encode(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }
}

/// Lazy fragment producer for a single frame.
///
/// Deterministic and restartable: the cursor can be rewound with
/// [`Fragmenter::reset`] and the same fragments come out again. Non-final
/// payloads are trimmed to a multiple of 32 octets so the offset field
/// stays exact; the final fragment carries the remainder. An empty frame
/// yields exactly one empty last fragment.
#[derive(Debug, Clone)]
pub struct Fragmenter {
    frame: Bytes,
    frame_number: u8,
    port: u8,
    stride: usize,
    offset: usize,
    fragment_number: u8,
    done: bool,
}

/// Split a frame into tunneling fragments.
///
/// `max_fragment_payload` is the octet budget the mailbox leaves for the
/// fragment payload; budgets below one 32-octet block are unusable.
pub fn split(
    frame: Bytes,
    frame_number: u8,
    port: u8,
    max_fragment_payload: usize,
) -> Result<Fragmenter> {
    if frame.len() > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge(frame.len()));
    }
    let stride = (max_fragment_payload / FRAGMENT_GRANULARITY) * FRAGMENT_GRANULARITY;
    if stride == 0 {
        return Err(Error::InvalidConfig(format!(
            "fragment payload budget of {max_fragment_payload} octets is below one 32-octet block"
        )));
    }
    Ok(Fragmenter {
        frame,
        frame_number,
        port,
        stride,
        offset: 0,
        fragment_number: 0,
        done: false,
    })
}

impl Fragmenter {
    /// Length of the frame being split.
    pub fn frame_len(&self) -> usize {
        self.frame.len()
    }

    /// Number of fragments this frame splits into.
    pub fn fragment_count(&self) -> usize {
        self.frame.len().div_ceil(self.stride).max(1)
    }

    /// Rewind the cursor to fragment 0.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.fragment_number = 0;
        self.done = false;
    }
}

impl Iterator for Fragmenter {
    type Item = Fragment;

    fn next(&mut self) -> Option<Fragment> {
        if self.done {
            return None;
        }
        let remaining = self.frame.len() - self.offset;
        let last = remaining <= self.stride;
        let take = if last { remaining } else { self.stride };
        let blocks = if self.fragment_number == 0 {
            self.frame.len().div_ceil(FRAGMENT_GRANULARITY) as u8
        } else {
            (self.offset / FRAGMENT_GRANULARITY) as u8
        };
        let header = FragmentHeader {
            frame_type: FrameType::FragmentData,
            port: self.port,
            last_fragment: last,
            time_appended: false,
            time_requested: false,
            fragment_number: self.fragment_number,
            blocks,
            frame_number: self.frame_number,
        };
        let payload = self.frame.slice(self.offset..self.offset + take);
        self.offset += take;
        self.fragment_number = (self.fragment_number + 1) % FRAGMENT_MODULUS;
        self.done = last;
        Some(Fragment { header, payload })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            return (0, Some(0));
        }
        let left = (self.frame.len() - self.offset).div_ceil(self.stride).max(1);
        (left, Some(left))
    }
}

/// Outcome of pushing one fragment into the reassembly buffer.
#[derive(Debug)]
pub enum Reassembly {
    /// Stored, waiting for more fragments.
    Incomplete,
    /// The fragment carried the last-fragment flag; here is the frame.
    Complete(Bytes),
}

/// Accumulation state for the frame currently being received.
///
/// A fragment is accepted only if its number equals the expected next value,
/// its frame type matches the frame in progress and its offset field matches
/// the octets accumulated so far. Anything else resets the buffer and
/// surfaces as [`Error::Discontinuity`]; the next fragment 0 then starts a
/// fresh frame.
#[derive(Debug, Default)]
pub struct ReassemblyBuffer {
    buf: BytesMut,
    expected_fragment: u8,
    expected_size: usize,
    frame_type: Option<FrameType>,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a frame is currently being accumulated.
    pub fn in_progress(&self) -> bool {
        self.frame_type.is_some()
    }

    /// Drop the frame in progress and expect a fragment 0 next.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.expected_fragment = 0;
        self.expected_size = 0;
        self.frame_type = None;
    }

    /// Feed one received fragment.
    pub fn push(&mut self, header: &FragmentHeader, payload: &[u8]) -> Result<Reassembly> {
        if !self.in_progress() {
            if header.fragment_number != 0 {
                return Err(self.discontinuity(header.fragment_number));
            }
            self.expected_size = header.blocks as usize * FRAGMENT_GRANULARITY;
            self.frame_type = Some(header.frame_type);
            self.buf.reserve(self.expected_size);
        } else {
            if header.fragment_number != self.expected_fragment
                || Some(header.frame_type) != self.frame_type
            {
                return Err(self.discontinuity(header.fragment_number));
            }
            let offset = header.blocks as usize * FRAGMENT_GRANULARITY;
            if offset != self.buf.len() {
                return Err(self.discontinuity(header.fragment_number));
            }
        }
        if self.buf.len() + payload.len() > self.expected_size {
            // more octets than fragment 0 advertised
            return Err(self.discontinuity(header.fragment_number));
        }
        self.buf.extend_from_slice(payload);
        self.expected_fragment = (self.expected_fragment + 1) % FRAGMENT_MODULUS;
        if header.last_fragment {
            let frame = self.buf.split().freeze();
            self.reset();
            Ok(Reassembly::Complete(frame))
        } else {
            Ok(Reassembly::Incomplete)
        }
    }

    fn discontinuity(&mut self, got: u8) -> Error {
        let expected = if self.in_progress() {
            self.expected_fragment
        } else {
            0
        };
        self.reset();
        Error::Discontinuity { expected, got }
    }
}
