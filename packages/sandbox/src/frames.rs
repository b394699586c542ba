// ABOUTME: Decoder for the container runtime's multiplexed stdout/stderr log stream
// ABOUTME: 8-byte frame headers (stream tag, padding, big-endian length) followed by the payload

//! [`LogDemuxer::push_bytes`] is the format contract for runtimes that return the
//! raw multiplexed log body and have no client-side demuxer. Clients that already
//! split the stream, such as bollard in [`DockerRuntime`](crate::DockerRuntime),
//! feed each payload through [`LogDemuxer::push_payload`] instead.

use serde::{Deserialize, Serialize};

/// Size of a frame header: 1 tag byte, 3 padding bytes, 4-byte big-endian length
pub const FRAME_HEADER_LEN: usize = 8;

/// Stream tag carried in byte 0 of a frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StreamKind {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
}

impl StreamKind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(StreamKind::Stdin),
            1 => Some(StreamKind::Stdout),
            2 => Some(StreamKind::Stderr),
            _ => None,
        }
    }
}

/// Captured output of a container, split by stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerLogs {
    pub stdout: String,
    pub stderr: String,
}

impl ContainerLogs {
    /// Decode a complete multiplexed buffer as returned by the runtime's logs endpoint
    ///
    /// Unknown stream tags are skipped and a truncated trailing frame is dropped.
    pub fn from_multiplexed(buf: &[u8]) -> Self {
        let mut demuxer = LogDemuxer::new();
        demuxer.push_bytes(buf);
        demuxer.finish()
    }
}

/// Encode one frame; the inverse of what [`LogDemuxer::push_bytes`] consumes
pub fn encode_frame(kind: StreamKind, payload: &[u8]) -> Vec<u8> {
    let len = u32::try_from(payload.len()).unwrap_or(u32::MAX) as usize;
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + len);
    frame.push(kind as u8);
    frame.extend_from_slice(&[0, 0, 0]);
    frame.extend_from_slice(&(len as u32).to_be_bytes());
    frame.extend_from_slice(&payload[..len]);
    frame
}

/// Incremental demultiplexer
///
/// Accepts the raw stream in arbitrary chunks (`push_bytes`) or payloads whose
/// framing was already removed by a client library (`push_payload`). Bytes are
/// accumulated per stream and converted to text once in [`LogDemuxer::finish`],
/// so a multi-byte character split across frames survives intact.
#[derive(Debug, Default)]
pub struct LogDemuxer {
    pending: Vec<u8>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl LogDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw multiplexed bytes; complete frames are consumed, a partial tail is kept
    pub fn push_bytes(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);

        let mut offset = 0;
        while self.pending.len() - offset >= FRAME_HEADER_LEN {
            let header = &self.pending[offset..offset + FRAME_HEADER_LEN];
            let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
            let start = offset + FRAME_HEADER_LEN;
            let end = match start.checked_add(len) {
                Some(end) if end <= self.pending.len() => end,
                _ => break,
            };

            let tag = header[0];
            match StreamKind::from_tag(tag) {
                Some(StreamKind::Stdout) => self.stdout.extend_from_slice(&self.pending[start..end]),
                Some(StreamKind::Stderr) => self.stderr.extend_from_slice(&self.pending[start..end]),
                _ => {}
            }
            offset = end;
        }

        self.pending.drain(..offset);
    }

    /// Append an already-separated payload
    pub fn push_payload(&mut self, kind: StreamKind, payload: &[u8]) {
        match kind {
            StreamKind::Stdout => self.stdout.extend_from_slice(payload),
            StreamKind::Stderr => self.stderr.extend_from_slice(payload),
            StreamKind::Stdin => {}
        }
    }

    /// Bytes held back because their frame is not complete yet
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Finish decoding; an incomplete trailing frame is discarded
    pub fn finish(self) -> ContainerLogs {
        ContainerLogs {
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
        }
    }
}
