//! Outgoing media tracks
//!
//! A [`TrackSender`] binds one capture track to one sendonly m-line of the
//! publish session and owns the task that forwards the track's samples.

use std::fmt;

use serde::Serialize;
use str0m::format::Codec;
use str0m::media::MediaKind;
use tokio::task::JoinHandle;

/// Payload format an outgoing track is negotiated with.
///
/// The ingestion server only accepts H.264 video and Opus audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PayloadFormat {
    H264,
    Opus,
}

impl PayloadFormat {
    pub fn for_kind(kind: MediaKind) -> PayloadFormat {
        match kind {
            MediaKind::Video => PayloadFormat::H264,
            MediaKind::Audio => PayloadFormat::Opus,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            PayloadFormat::H264 => "video/H264",
            PayloadFormat::Opus => "audio/opus",
        }
    }

    pub(crate) fn codec(self) -> Codec {
        match self {
            PayloadFormat::H264 => Codec::H264,
            PayloadFormat::Opus => Codec::Opus,
        }
    }

    /// RTP clock rate of the format.
    pub fn clock_rate(self) -> u64 {
        match self {
            PayloadFormat::H264 => 90_000,
            PayloadFormat::Opus => 48_000,
        }
    }
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// One published track of a session.
#[derive(Debug)]
pub struct TrackSender {
    /// Position of the sender in its session, also its index on the
    /// transport side.
    pub(crate) index: usize,
    pub(crate) track_id: String,
    pub(crate) stream_id: String,
    pub(crate) kind: MediaKind,
    pub(crate) format: PayloadFormat,
    /// Forwarding task, taken when the session joins it.
    pub(crate) task: Option<JoinHandle<()>>,
}

impl TrackSender {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn payload_format(&self) -> PayloadFormat {
        self.format
    }

    /// Whether the forwarding task is still running.
    pub fn is_forwarding(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_follows_kind() {
        assert_eq!(PayloadFormat::for_kind(MediaKind::Video), PayloadFormat::H264);
        assert_eq!(PayloadFormat::for_kind(MediaKind::Audio), PayloadFormat::Opus);
        assert_eq!(PayloadFormat::H264.to_string(), "video/H264");
        assert_eq!(PayloadFormat::Opus.clock_rate(), 48_000);
    }
}
