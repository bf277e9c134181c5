//! Streaming session controller
//!
//! Owns "capture → publish → stop" for one outbound stream at a time.

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::capture::{CaptureConstraints, CaptureDevices, CaptureSource};
use crate::config::PublishConfig;
use crate::error::SessionError;
use crate::model::media::MediaStream;
use crate::model::state::{ConnectionState, SessionEvent};
use crate::whip::{BearerToken, WhipClient};

const EVENT_CAPACITY: usize = 128;

/// What the controller currently holds. A publish session always has the
/// capture it publishes next to it.
#[derive(Debug, Default)]
enum Activity {
    #[default]
    Idle,
    Capturing(MediaStream),
    Streaming {
        stream: MediaStream,
        session: WhipClient,
    },
}

pub struct SessionController<D> {
    devices: D,
    config: PublishConfig,
    activity: Activity,
    events: broadcast::Sender<SessionEvent>,
}

impl<D: CaptureDevices> SessionController<D> {
    pub fn new(devices: D, config: PublishConfig) -> SessionController<D> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        SessionController {
            devices,
            config,
            activity: Activity::Idle,
            events,
        }
    }

    /// Events of every session this controller starts.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn stream(&self) -> Option<&MediaStream> {
        match &self.activity {
            Activity::Idle => None,
            Activity::Capturing(stream) | Activity::Streaming { stream, .. } => Some(stream),
        }
    }

    pub fn session_state(&self) -> Option<ConnectionState> {
        match &self.activity {
            Activity::Streaming { session, .. } => Some(session.state()),
            _ => None,
        }
    }

    /// The publish session, while one is held.
    pub fn session(&self) -> Option<&WhipClient> {
        match &self.activity {
            Activity::Streaming { session, .. } => Some(session),
            _ => None,
        }
    }

    pub fn config(&self) -> &PublishConfig {
        &self.config
    }

    /// Opens a new capture, replacing the current one.
    ///
    /// Constraints are capped at 1280x720 @ 30 fps. When no device matches,
    /// the current capture is kept. Otherwise a running publish session is
    /// closed and the previous tracks are released before the new stream is
    /// opened.
    pub async fn begin_capture(
        &mut self,
        source: CaptureSource,
        constraints: CaptureConstraints,
    ) -> Result<&MediaStream, SessionError> {
        let devices = self.devices.enumerate_devices();
        let request = source
            .select(&devices, constraints)
            .ok_or(SessionError::NoDeviceFound(source))?;

        info!(
            "Capturing {} from '{}' at {}x{}@{}",
            source,
            request.video_device.label,
            request.constraints.width,
            request.constraints.height,
            request.constraints.frame_rate
        );

        self.release().await;

        let stream = self.devices.open_stream(&request)?;
        self.activity = Activity::Capturing(stream);

        self.stream().ok_or(SessionError::NoActiveCapture)
    }

    /// Publishes the held capture to `endpoint`.
    ///
    /// Any failure closes the partially built client before returning; the
    /// capture stays held.
    pub async fn start_streaming(
        &mut self,
        endpoint: &str,
        token: BearerToken,
    ) -> Result<(), SessionError> {
        let stream = match std::mem::take(&mut self.activity) {
            Activity::Capturing(stream) => stream,
            Activity::Idle => return Err(SessionError::NoActiveCapture),
            // A failed or disconnected session is dead, publish afresh.
            Activity::Streaming { stream, session } if session.state().is_terminal() => {
                info!("Replacing {} session", session.state());
                discard(session).await;
                stream
            }
            streaming @ Activity::Streaming { .. } => {
                self.activity = streaming;
                return Err(SessionError::AlreadyStreaming);
            }
        };

        match self.publish(&stream, endpoint, token).await {
            Ok(session) => {
                info!("Streaming started to {}", session.endpoint());
                self.activity = Activity::Streaming { stream, session };
                Ok(())
            }
            Err(e) => {
                self.activity = Activity::Capturing(stream);
                Err(e)
            }
        }
    }

    /// Stops publishing and releases the capture. Does nothing when idle.
    pub async fn stop_streaming(&mut self) -> Result<(), SessionError> {
        self.release().await;
        Ok(())
    }

    async fn publish(
        &self,
        stream: &MediaStream,
        endpoint: &str,
        token: BearerToken,
    ) -> Result<WhipClient, SessionError> {
        let mut client =
            WhipClient::with_events(endpoint, token, self.config.whip.clone(), self.events.clone())
                .map_err(SessionError::Connect)?;

        for track in stream.tracks() {
            if let Err(e) = client.add_track(track.clone()) {
                discard(client).await;
                return Err(SessionError::Track(e));
            }
            info!("Added track: {}", track.id());
        }

        if let Err(e) = client.connect().await {
            discard(client).await;
            return Err(SessionError::Connect(e));
        }

        Ok(client)
    }

    /// Closes whatever is active and returns to idle.
    async fn release(&mut self) {
        match std::mem::take(&mut self.activity) {
            Activity::Idle => {}
            Activity::Capturing(stream) => {
                info!("Closing capture {}", stream.id());
                stream.close();
            }
            Activity::Streaming { stream, session } => {
                discard(session).await;
                info!("Closing capture {}", stream.id());
                stream.close();
            }
        }
    }
}

async fn discard(mut session: WhipClient) {
    if let Err(e) = session.close().await {
        warn!("Failed to close WHIP session: {}", e);
    }
}
