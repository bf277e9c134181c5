//! Capture collaborator contract
//!
//! Device enumeration and raw capture live outside this crate. A collaborator
//! implements [`CaptureDevices`]; the session controller only selects a
//! device and asks for a stream of already-encoded tracks.

pub mod file;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CaptureError;
use crate::model::media::{MediaKind, MediaStream};

/// Largest resolution the ingestion server accepts.
pub const MAX_WIDTH: u32 = 1280;
pub const MAX_HEIGHT: u32 = 720;
pub const MAX_FRAME_RATE: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub kind: DeviceKind,
    pub label: String,
}

impl DeviceInfo {
    pub fn is_screen(&self) -> bool {
        self.kind == DeviceKind::Video && self.label.to_lowercase().contains("screen")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Video,
    Audio,
}

impl From<DeviceKind> for MediaKind {
    fn from(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Video => MediaKind::Video,
            DeviceKind::Audio => MediaKind::Audio,
        }
    }
}

/// Requested video format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            width: MAX_WIDTH,
            height: MAX_HEIGHT,
            frame_rate: MAX_FRAME_RATE,
        }
    }
}

impl CaptureConstraints {
    /// Clamps the constraints to what the ingestion server accepts.
    pub fn capped(self) -> Self {
        Self {
            width: self.width.clamp(1, MAX_WIDTH),
            height: self.height.clamp(1, MAX_HEIGHT),
            frame_rate: self.frame_rate.clamp(1, MAX_FRAME_RATE),
        }
    }
}

/// What to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureSource {
    /// First camera plus the first microphone, if any.
    Camera,
    /// First screen, video only.
    Screen,
}

impl fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureSource::Camera => f.write_str("camera"),
            CaptureSource::Screen => f.write_str("screen"),
        }
    }
}

/// Devices picked for one capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub video_device: DeviceInfo,
    pub audio_device: Option<DeviceInfo>,
    pub constraints: CaptureConstraints,
}

impl CaptureSource {
    /// The source under which `device` is selectable.
    pub fn for_device(device: &DeviceInfo) -> CaptureSource {
        if device.is_screen() {
            CaptureSource::Screen
        } else {
            CaptureSource::Camera
        }
    }

    /// Picks the first matching devices out of `devices`.
    pub fn select(
        self,
        devices: &[DeviceInfo],
        constraints: CaptureConstraints,
    ) -> Option<StreamRequest> {
        let video_device = match self {
            CaptureSource::Camera => devices
                .iter()
                .find(|d| d.kind == DeviceKind::Video && !d.is_screen()),
            CaptureSource::Screen => devices.iter().find(|d| d.is_screen()),
        }?;

        let audio_device = match self {
            CaptureSource::Camera => devices.iter().find(|d| d.kind == DeviceKind::Audio),
            CaptureSource::Screen => None,
        };

        Some(StreamRequest {
            video_device: video_device.clone(),
            audio_device: audio_device.cloned(),
            constraints: constraints.capped(),
        })
    }
}

/// A source of capture devices and encoded streams.
pub trait CaptureDevices: Send {
    fn enumerate_devices(&self) -> Vec<DeviceInfo>;

    /// Opens the requested devices. Must be called from within a tokio
    /// runtime when the implementation spawns producers.
    fn open_stream(&mut self, request: &StreamRequest) -> Result<MediaStream, CaptureError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, kind: DeviceKind, label: &str) -> DeviceInfo {
        DeviceInfo {
            id: id.to_owned(),
            kind,
            label: label.to_owned(),
        }
    }

    #[test]
    fn constraints_are_capped_to_720p30() {
        let capped = CaptureConstraints {
            width: 1920,
            height: 1080,
            frame_rate: 60,
        }
        .capped();
        assert_eq!(capped, CaptureConstraints::default());

        let small = CaptureConstraints {
            width: 640,
            height: 360,
            frame_rate: 15,
        };
        assert_eq!(small.capped(), small);
    }

    #[test]
    fn camera_picks_first_video_and_audio() {
        let devices = [
            device("mic-1", DeviceKind::Audio, "Built-in Microphone"),
            device("cam-1", DeviceKind::Video, "FaceTime HD"),
            device("cam-2", DeviceKind::Video, "USB Webcam"),
        ];

        let request = CaptureSource::Camera
            .select(&devices, CaptureConstraints::default())
            .expect("a camera");
        assert_eq!(request.video_device.id, "cam-1");
        assert_eq!(request.audio_device.map(|d| d.id).as_deref(), Some("mic-1"));
    }

    #[test]
    fn screen_needs_a_screen_label() {
        let cameras = [device("cam-1", DeviceKind::Video, "FaceTime HD")];
        assert!(CaptureSource::Screen
            .select(&cameras, CaptureConstraints::default())
            .is_none());

        let devices = [
            device("cam-1", DeviceKind::Video, "FaceTime HD"),
            device("screen-0", DeviceKind::Video, "Screen 0"),
            device("mic-1", DeviceKind::Audio, "Microphone"),
        ];
        let request = CaptureSource::Screen
            .select(&devices, CaptureConstraints::default())
            .expect("a screen");
        assert_eq!(request.video_device.id, "screen-0");
        assert!(request.audio_device.is_none());
    }

    #[test]
    fn every_video_device_is_selectable_through_its_source() {
        let devices = [
            device("screen-demo", DeviceKind::Video, "screen-demo"),
            device("intro", DeviceKind::Video, "intro"),
        ];

        for d in &devices {
            let source = CaptureSource::for_device(d);
            let request = source
                .select(std::slice::from_ref(d), CaptureConstraints::default())
                .expect("device selectable");
            assert_eq!(request.video_device.id, d.id);
        }
        assert_eq!(CaptureSource::for_device(&devices[0]), CaptureSource::Screen);
        assert_eq!(CaptureSource::for_device(&devices[1]), CaptureSource::Camera);
    }
}
