//! Fragmentation codec (C3): splits/reassembles logical payloads over the
//! small-MTU link, plus the host TCP simulator's outer framing.
//!
//! No function in this crate ever panics on attacker-controlled bytes —
//! every malformed-input path returns a `Dropped` outcome (or, for framing,
//! simply waits for more bytes) rather than an error that could propagate
//! into killing the link, matching §7's "no error in C3 ever kills the
//! link" policy.

pub mod constants {
    /// Link MTU in bytes, including the fragment header.
    pub const MTU: usize = 200;
    /// Largest logical message (post-reassembly) the codec will accept.
    pub const MAX_MSG_SIZE: usize = 4096;
    /// Outbox capacity (shared constant; enforced by `osm-link`).
    pub const MAX_OUTBOX: usize = 32;
}

use constants::{MAX_MSG_SIZE, MTU};

const FLAG_START: u8 = 0x01;
const FLAG_END: u8 = 0x02;
const FLAG_ACK: u8 = 0x04;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtoError {
    #[error("message of {0} bytes exceeds MAX_MSG_SIZE")]
    OversizedMessage(usize),
}

/// Why an incoming fragment was dropped. Never fatal to the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    TruncatedFragment,
    OversizedMessage,
    MissingStart,
    UnknownSeq,
}

/// The outcome of feeding one fragment to a [`Reassembler`].
#[derive(Debug, PartialEq, Eq)]
pub enum Accepted {
    /// Consumed; more fragments are needed before the message is complete.
    Pending,
    /// Consumed; reassembly is complete. Carries the full logical payload.
    Complete(Vec<u8>),
    /// An ACK fragment. Carries its raw payload (nominally the 8-byte
    /// message id); C5 is responsible for validating its length.
    Ack(Vec<u8>),
    /// Dropped; reassembly unaffected except that any in-progress buffer is
    /// discarded (the caller must wait for a fresh `START`).
    Dropped(DropReason),
}

/// Splits `payload` into wire-ready fragment byte strings per §4.3/§6.2.
pub fn fragment_message(payload: &[u8]) -> Result<Vec<Vec<u8>>, ProtoError> {
    if payload.len() > MAX_MSG_SIZE {
        return Err(ProtoError::OversizedMessage(payload.len()));
    }

    let max_payload = MTU - 3; // flags(1) + seq(2)
    let mut fragments = Vec::new();
    let mut offset = 0usize;
    let mut seq: u16 = 0;

    loop {
        let is_start = offset == 0;
        let overhead = if is_start { 2 } else { 0 }; // total_len(2) on START
        let chunk_size = (payload.len() - offset).min(max_payload - overhead);
        let is_end = offset + chunk_size >= payload.len();

        let mut flags = 0u8;
        if is_start {
            flags |= FLAG_START;
        }
        if is_end {
            flags |= FLAG_END;
        }

        let mut frag = Vec::with_capacity(MTU);
        frag.push(flags);
        frag.extend_from_slice(&seq.to_le_bytes());
        if is_start {
            frag.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        }
        frag.extend_from_slice(&payload[offset..offset + chunk_size]);
        fragments.push(frag);

        offset += chunk_size;
        seq += 1;

        if is_end {
            break;
        }
    }

    // An empty payload still produces a single START|END fragment with
    // seq=0 and total_len=0, matching the "single-fragment message" rule.
    Ok(fragments)
}

/// Builds an ACK fragment carrying `msg_id` as its payload (§4.5).
pub fn ack_fragment(msg_id: &[u8; 8]) -> Vec<u8> {
    let mut frag = Vec::with_capacity(3 + 8);
    frag.push(FLAG_ACK);
    frag.extend_from_slice(&0u16.to_le_bytes());
    frag.extend_from_slice(msg_id);
    frag
}

/// Stateful reassembler for one link direction. A session (a run of
/// fragments belonging to one logical message) is active only between a
/// `START` and its matching `END`/abort.
#[derive(Default)]
pub struct Reassembler {
    active: bool,
    expected_seq: u16,
    total_len: Option<usize>,
    buffer: Vec<u8>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    fn abort(&mut self) {
        self.active = false;
        self.expected_seq = 0;
        self.total_len = None;
        self.buffer.clear();
    }

    pub fn accept(&mut self, raw: &[u8]) -> Accepted {
        if raw.len() < 3 {
            self.abort();
            return Accepted::Dropped(DropReason::TruncatedFragment);
        }

        let flags = raw[0];
        let seq = u16::from_le_bytes([raw[1], raw[2]]);

        if flags & FLAG_ACK != 0 {
            return Accepted::Ack(raw[3..].to_vec());
        }

        if flags & FLAG_START != 0 {
            self.abort(); // a new START always discards any in-progress buffer
            if raw.len() < 5 {
                return Accepted::Dropped(DropReason::MissingStart);
            }
            let total_len = u16::from_le_bytes([raw[3], raw[4]]) as usize;
            if total_len > MAX_MSG_SIZE {
                return Accepted::Dropped(DropReason::OversizedMessage);
            }
            if seq != 0 {
                return Accepted::Dropped(DropReason::UnknownSeq);
            }

            self.active = true;
            self.expected_seq = 1;
            self.total_len = Some(total_len);
            self.buffer = Vec::with_capacity(total_len);
            let payload = &raw[5..];
            return self.ingest(payload, flags & FLAG_END != 0);
        }

        if !self.active {
            return Accepted::Dropped(DropReason::MissingStart);
        }
        if seq != self.expected_seq {
            self.abort();
            return Accepted::Dropped(DropReason::UnknownSeq);
        }

        self.expected_seq += 1;
        let payload = &raw[3..];
        self.ingest(payload, flags & FLAG_END != 0)
    }

    fn ingest(&mut self, payload: &[u8], end: bool) -> Accepted {
        let total_len = self.total_len.unwrap_or(0);
        if self.buffer.len() + payload.len() > total_len {
            self.abort();
            return Accepted::Dropped(DropReason::OversizedMessage);
        }
        self.buffer.extend_from_slice(payload);

        if end {
            if self.buffer.len() != total_len {
                self.abort();
                return Accepted::Dropped(DropReason::TruncatedFragment);
            }
            let complete = std::mem::take(&mut self.buffer);
            self.abort();
            return Accepted::Complete(complete);
        }

        Accepted::Pending
    }
}

/// Host-simulator outer framing: `len(4 BE) ‖ char_uuid(2 BE) ‖ fragment`.
pub mod framing {
    pub const CHAR_UUID_OSM_TO_CA: u16 = 0xFE02;
    pub const CHAR_UUID_CA_TO_OSM: u16 = 0xFE03;

    pub fn encode_frame(char_uuid: u16, fragment: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(6 + fragment.len());
        frame.extend_from_slice(&(fragment.len() as u32).to_be_bytes());
        frame.extend_from_slice(&char_uuid.to_be_bytes());
        frame.extend_from_slice(fragment);
        frame
    }

    /// Accumulates bytes from a TCP stream and yields complete frames.
    #[derive(Default)]
    pub struct FrameReader {
        buf: Vec<u8>,
    }

    impl FrameReader {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&mut self, bytes: &[u8]) {
            self.buf.extend_from_slice(bytes);
        }

        /// Returns the next complete `(char_uuid, fragment)` frame, if one
        /// has fully arrived, consuming it from the internal buffer.
        pub fn next_frame(&mut self) -> Option<(u16, Vec<u8>)> {
            if self.buf.len() < 6 {
                return None;
            }
            let len = u32::from_be_bytes(self.buf[0..4].try_into().unwrap()) as usize;
            let char_uuid = u16::from_be_bytes(self.buf[4..6].try_into().unwrap());
            if self.buf.len() < 6 + len {
                return None;
            }
            let fragment = self.buf[6..6 + len].to_vec();
            self.buf.drain(0..6 + len);
            Some((char_uuid, fragment))
        }
    }
}
