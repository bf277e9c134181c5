use std::path::PathBuf;

use thiserror::Error;

use crate::capture::CaptureSource;
use crate::model::state::ConnectionState;

/// Errors raised by a single WHIP publishing session.
#[derive(Error, Debug)]
pub enum WhipError {
    #[error("invalid WHIP endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("peer connection socket error: {0}")]
    Socket(#[from] std::io::Error),

    #[error("track {id} is not supported: {reason}")]
    UnsupportedTrack { id: String, reason: String },

    #[error("{operation} is not allowed while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },

    #[error("SDP offer advertises neither H264 nor VP8")]
    NoSupportedCodec,

    #[error("signaling request failed: {0}")]
    SignalingRequest(#[source] reqwest::Error),

    #[error("signaling failed with status {status}: {body}")]
    SignalingFailed { status: u16, body: String },

    #[error("remote description rejected: {0}")]
    RemoteDescriptionRejected(String),
}

/// Errors reported by a capture collaborator.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to open device {device}: {reason}")]
    Open { device: String, reason: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} contains no H.264 access units")]
    NoAccessUnits(PathBuf),
}

/// Errors surfaced by the streaming session controller.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no {0} device found")]
    NoDeviceFound(CaptureSource),

    #[error("no active capture, begin a capture first")]
    NoActiveCapture,

    #[error("a publish session is already active")]
    AlreadyStreaming,

    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("failed to connect to WHIP endpoint: {0}")]
    Connect(#[source] WhipError),

    #[error("failed to add track: {0}")]
    Track(#[source] WhipError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}
