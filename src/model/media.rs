//! Capture-side media types
//!
//! Tracks are produced by a capture collaborator and only referenced by the
//! publisher. [`channel_track`] is the stock implementation: whatever encodes
//! samples pushes them into a [`SampleSink`] and the publisher reads them out
//! of the paired [`ChannelTrack`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

pub use str0m::media::MediaKind;

/// Frame duration of a 30 fps video track.
pub const VIDEO_FRAME_DURATION: Duration = Duration::from_millis(33);

/// Packet duration of an Opus track.
pub const AUDIO_FRAME_DURATION: Duration = Duration::from_millis(20);

/// One encoded frame: an H.264 Annex-B access unit or an Opus packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSample {
    pub data: Vec<u8>,
    pub duration: Duration,
}

impl MediaSample {
    pub fn new(data: impl Into<Vec<u8>>, duration: Duration) -> MediaSample {
        MediaSample {
            data: data.into(),
            duration,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("track is closed")]
pub struct TrackClosed;

/// A live capture track.
pub trait MediaTrack: Send + Sync {
    /// Identifier, unique within its stream.
    fn id(&self) -> &str;

    fn stream_id(&self) -> &str;

    fn kind(&self) -> MediaKind;

    /// Declared cadence at which samples are produced.
    fn frame_duration(&self) -> Duration {
        match self.kind() {
            MediaKind::Video => VIDEO_FRAME_DURATION,
            MediaKind::Audio => AUDIO_FRAME_DURATION,
        }
    }

    /// Returns the next encoded sample if one is ready, without blocking.
    fn read_sample(&self) -> Result<Option<MediaSample>, TrackClosed>;

    fn is_closed(&self) -> bool;

    /// Releases the underlying device resource.
    fn close(&self);
}

impl fmt::Debug for dyn MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Tracks captured together.
#[derive(Debug)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<dyn MediaTrack>>) -> MediaStream {
        MediaStream {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    /// Closes every track of the stream.
    pub fn close(&self) {
        for track in &self.tracks {
            track.close();
        }
    }
}

/// Creates a track fed through a bounded queue of `capacity` samples.
pub fn channel_track(
    id: impl Into<String>,
    stream_id: impl Into<String>,
    kind: MediaKind,
    frame_duration: Duration,
    capacity: usize,
) -> (SampleSink, Arc<ChannelTrack>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let track = ChannelTrack {
        id: id.into(),
        stream_id: stream_id.into(),
        kind,
        frame_duration,
        samples: Mutex::new(rx),
        closed: AtomicBool::new(false),
    };
    (SampleSink { tx }, Arc::new(track))
}

/// Producer half of a [`ChannelTrack`].
#[derive(Debug, Clone)]
pub struct SampleSink {
    tx: mpsc::Sender<MediaSample>,
}

impl SampleSink {
    /// Queues a sample. Returns `Ok(false)` when the queue is full and the
    /// sample was dropped.
    pub fn push(&self, sample: MediaSample) -> Result<bool, TrackClosed> {
        match self.tx.try_send(sample) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Closed(_)) => Err(TrackClosed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct ChannelTrack {
    id: String,
    stream_id: String,
    kind: MediaKind,
    frame_duration: Duration,
    samples: Mutex<mpsc::Receiver<MediaSample>>,
    closed: AtomicBool,
}

impl MediaTrack for ChannelTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn stream_id(&self) -> &str {
        &self.stream_id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    fn read_sample(&self) -> Result<Option<MediaSample>, TrackClosed> {
        if self.is_closed() {
            return Err(TrackClosed);
        }

        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        match samples.try_recv() {
            Ok(sample) => Ok(Some(sample)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TrackClosed),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .close();
    }
}
