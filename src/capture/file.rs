//! Replays H.264 Annex-B elementary streams as if they were cameras.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use super::{CaptureDevices, DeviceInfo, DeviceKind, StreamRequest};
use crate::error::CaptureError;
use crate::model::media::{channel_track, MediaKind, MediaSample, MediaStream, MediaTrack, SampleSink};

/// Samples queued between the file reader and the publisher.
const QUEUE_DEPTH: usize = 8;

/// Capture collaborator exposing each file as a video device.
#[derive(Debug, Default)]
pub struct FileCapture {
    files: Vec<PathBuf>,
    opened: usize,
}

impl FileCapture {
    pub fn new(files: impl IntoIterator<Item = impl Into<PathBuf>>) -> FileCapture {
        FileCapture {
            files: files.into_iter().map(Into::into).collect(),
            opened: 0,
        }
    }
}

impl CaptureDevices for FileCapture {
    fn enumerate_devices(&self) -> Vec<DeviceInfo> {
        self.files
            .iter()
            .map(|path| DeviceInfo {
                id: path.display().to_string(),
                kind: DeviceKind::Video,
                label: path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string()),
            })
            .collect()
    }

    fn open_stream(&mut self, request: &StreamRequest) -> Result<MediaStream, CaptureError> {
        let path = Path::new(&request.video_device.id);
        let data = std::fs::read(path).map_err(|source| CaptureError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let frames = access_units(&data);
        if frames.is_empty() {
            return Err(CaptureError::NoAccessUnits(path.to_path_buf()));
        }

        let frame_rate = request.constraints.frame_rate.max(1);
        let frame_duration = Duration::from_secs(1) / frame_rate;
        info!(
            "Replaying {} access units from {} at {} fps",
            frames.len(),
            path.display(),
            frame_rate
        );

        self.opened += 1;
        let stream_id = format!("file-{}", self.opened);
        let (sink, track) = channel_track(
            format!("{stream_id}-video"),
            stream_id.clone(),
            MediaKind::Video,
            frame_duration,
            QUEUE_DEPTH,
        );

        tokio::spawn(replay(frames, frame_duration, sink));

        Ok(MediaStream::new(stream_id, vec![track as Arc<dyn MediaTrack>]))
    }
}

/// Pushes `frames` in a loop at the given cadence until the track closes.
async fn replay(frames: Vec<Vec<u8>>, frame_duration: Duration, sink: SampleSink) {
    let mut ticker = time::interval(frame_duration);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    for frame in frames.iter().cycle() {
        ticker.tick().await;
        match sink.push(MediaSample::new(frame.clone(), frame_duration)) {
            Ok(true) => {}
            Ok(false) => debug!("Sample queue full, dropping frame"),
            Err(_) => break,
        }
    }

    debug!("File replay stopped");
}

const NAL_SEI: u8 = 6;
const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;
const NAL_AUD: u8 = 9;

fn is_slice(nal_type: u8) -> bool {
    matches!(nal_type, 1 | 5)
}

/// NAL unit payloads of an Annex-B byte stream, start codes removed.
pub fn nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = vec![];
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }

    starts
        .iter()
        .enumerate()
        .filter_map(|(n, &start)| {
            let end = starts.get(n + 1).map_or(data.len(), |&next| next - 3);
            let mut nal = &data[start..end];
            // The leading zero of a 4-byte start code; NAL units never end in 0x00.
            while let [rest @ .., 0] = nal {
                nal = rest;
            }
            (!nal.is_empty()).then_some(nal)
        })
        .collect()
}

/// Groups an Annex-B byte stream into access units, each re-emitted with
/// 4-byte start codes.
///
/// A new picture starts at an AUD, SPS, PPS or SEI that follows a slice, or
/// at a slice whose `first_mb_in_slice` is zero.
pub fn access_units(data: &[u8]) -> Vec<Vec<u8>> {
    let mut units = vec![];
    let mut current: Vec<u8> = vec![];
    let mut has_slice = false;

    for nal in nal_units(data) {
        let nal_type = nal[0] & 0x1f;
        let starts_picture = match nal_type {
            NAL_AUD | NAL_SPS | NAL_PPS | NAL_SEI => has_slice,
            // first_mb_in_slice is ue(v); a leading 1 bit encodes zero.
            t if is_slice(t) => has_slice && nal.get(1).is_some_and(|b| b & 0x80 != 0),
            _ => false,
        };

        if starts_picture {
            units.push(std::mem::take(&mut current));
            has_slice = false;
        }

        current.extend_from_slice(&[0, 0, 0, 1]);
        current.extend_from_slice(nal);
        has_slice |= is_slice(nal_type);
    }

    if has_slice {
        units.push(current);
    }

    units
}
