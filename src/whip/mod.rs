//! WHIP publishing client
//!
//! A [`WhipClient`] is one publish session against a WHIP endpoint:
//!
//! 1. [`WhipClient::new`] binds the peer connection socket and gathers host
//!    candidates
//! 2. [`WhipClient::add_track`] registers every track to publish
//! 3. [`WhipClient::connect`] creates the offer, POSTs it to the endpoint and
//!    applies the answer, then hands the peer connection to a transport task
//! 4. [`WhipClient::close`] stops every task and ends the WHIP resource
//!
//! Tracks cannot be added once negotiation started; a failed or disconnected
//! session is never reconnected, a new client has to be created.

mod driver;
mod forward;
pub mod sdp;
pub mod signaling;

use std::net::UdpSocket;
use std::sync::Arc;

use reqwest::Url;
use str0m::change::SdpAnswer;
use str0m::media::{Direction, Mid};
use str0m::Rtc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::WhipConfig;
use crate::error::WhipError;
use crate::model::media::MediaTrack;
use crate::model::state::{ConnectionState, SessionEvent, SessionState};
use crate::model::tracks::{PayloadFormat, TrackSender};
use crate::util::host_candidates;

use driver::{Driver, OutboundTrack};
use forward::{forward_samples, OutboundSample};
pub use signaling::BearerToken;
use signaling::SignalingClient;

/// Capacity of the event channel of a standalone client.
const EVENT_CAPACITY: usize = 64;

/// The peer connection, exclusively owned by one client until it is handed
/// to the transport task.
struct PeerConnection {
    rtc: Rtc,
    socket: UdpSocket,
}

pub struct WhipClient {
    config: WhipConfig,
    signaling: SignalingClient,
    state: Arc<SessionState>,
    peer: Option<PeerConnection>,
    senders: Vec<TrackSender>,
    sample_tx: mpsc::Sender<OutboundSample>,
    sample_rx: Option<mpsc::Receiver<OutboundSample>>,
    driver: Option<JoinHandle<()>>,
    resource: Option<Url>,
}

impl WhipClient {
    /// Creates a session publishing to `endpoint`.
    pub fn new(
        endpoint: &str,
        token: BearerToken,
        config: WhipConfig,
    ) -> Result<WhipClient, WhipError> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        WhipClient::with_events(endpoint, token, config, events)
    }

    /// Like [`WhipClient::new`], reporting events on an existing channel.
    pub fn with_events(
        endpoint: &str,
        token: BearerToken,
        config: WhipConfig,
        events: broadcast::Sender<SessionEvent>,
    ) -> Result<WhipClient, WhipError> {
        let signaling = SignalingClient::new(endpoint, token, config.signaling_timeout())?;

        let socket = UdpSocket::bind(config.bind_addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;
        info!("Bound UDP to: {}", local_addr);

        let mut rtc = Rtc::builder()
            .clear_codecs()
            .enable_h264(true)
            .enable_opus(true)
            .build();

        for candidate in host_candidates(local_addr) {
            rtc.add_local_candidate(candidate);
        }

        let (sample_tx, sample_rx) = mpsc::channel(config.sample_queue.max(1));

        Ok(WhipClient {
            config,
            signaling,
            state: Arc::new(SessionState::new(events)),
            peer: Some(PeerConnection { rtc, socket }),
            senders: vec![],
            sample_tx,
            sample_rx: Some(sample_rx),
            driver: None,
            resource: None,
        })
    }

    pub fn endpoint(&self) -> &Url {
        self.signaling.endpoint()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    /// Receiver that always holds the current state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.watch()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.state.subscribe()
    }

    pub fn senders(&self) -> &[TrackSender] {
        &self.senders
    }

    /// The WHIP session resource announced by the endpoint, once connected.
    pub fn resource(&self) -> Option<&Url> {
        self.resource.as_ref()
    }

    /// Registers `track` for publishing and starts forwarding its samples.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add_track(&mut self, track: Arc<dyn MediaTrack>) -> Result<&TrackSender, WhipError> {
        self.ensure_state(
            "add_track",
            &[ConnectionState::New, ConnectionState::TracksAdded],
        )?;

        if self.senders.iter().any(|s| s.track_id == track.id()) {
            return Err(WhipError::UnsupportedTrack {
                id: track.id().to_owned(),
                reason: "a track with this id is already published".to_owned(),
            });
        }

        if track.is_closed() {
            return Err(WhipError::UnsupportedTrack {
                id: track.id().to_owned(),
                reason: "track is closed".to_owned(),
            });
        }

        if track.frame_duration().is_zero() {
            return Err(WhipError::UnsupportedTrack {
                id: track.id().to_owned(),
                reason: "frame duration must be non-zero".to_owned(),
            });
        }

        let index = self.senders.len();
        let format = PayloadFormat::for_kind(track.kind());
        info!("📝 Added track '{}' as {}", track.id(), format);

        let sender = TrackSender {
            index,
            track_id: track.id().to_owned(),
            stream_id: track.stream_id().to_owned(),
            kind: track.kind(),
            format,
            task: Some(tokio::spawn(forward_samples(
                index,
                track,
                self.state.clone(),
                self.sample_tx.clone(),
            ))),
        };

        self.senders.push(sender);
        self.state.transition(ConnectionState::TracksAdded);

        Ok(&self.senders[index])
    }

    /// Negotiates the session with the WHIP endpoint.
    ///
    /// On a signaling error the session stays `Negotiating` and has to be
    /// closed by the caller.
    pub async fn connect(&mut self) -> Result<(), WhipError> {
        self.ensure_state(
            "connect",
            &[ConnectionState::New, ConnectionState::TracksAdded],
        )?;
        let Some(peer) = self.peer.as_mut() else {
            return Err(self.invalid_state("connect"));
        };

        self.state.transition(ConnectionState::Negotiating);

        let mut change = peer.rtc.sdp_api();
        let mids: Vec<Mid> = self
            .senders
            .iter()
            .map(|s| {
                change.add_media(
                    s.kind,
                    Direction::SendOnly,
                    Some(s.stream_id.clone()),
                    Some(s.track_id.clone()),
                    None,
                )
            })
            .collect();

        let Some((offer, pending)) = change.apply() else {
            warn!("Nothing to negotiate, the offer would be empty");
            return Err(WhipError::NoSupportedCodec);
        };

        let offer = offer.to_sdp_string();
        debug!("Offer SDP:\n{}", offer);

        if !sdp::has_supported_video_codec(&offer) {
            return Err(WhipError::NoSupportedCodec);
        }

        let answer = self.signaling.post_offer(&offer).await?;
        self.resource = answer.resource;

        let answer = SdpAnswer::from_sdp_string(&answer.sdp)
            .map_err(|e| WhipError::RemoteDescriptionRejected(e.to_string()))?;
        peer.rtc
            .sdp_api()
            .accept_answer(pending, answer)
            .map_err(|e| WhipError::RemoteDescriptionRejected(e.to_string()))?;

        info!("✅ Answer accepted, starting transport");

        let Some(PeerConnection { rtc, socket }) = self.peer.take() else {
            return Err(self.invalid_state("connect"));
        };
        let Some(samples) = self.sample_rx.take() else {
            return Err(self.invalid_state("connect"));
        };

        let tracks = self
            .senders
            .iter()
            .zip(mids)
            .map(|(s, mid)| OutboundTrack::new(s.track_id.clone(), mid, s.format))
            .collect();
        let driver = Driver::new(rtc, socket, tracks, self.state.clone())?;
        self.driver = Some(tokio::spawn(driver.run(samples)));

        self.state.transition(ConnectionState::Connected);
        Ok(())
    }

    /// Stops every task, releases the peer connection and ends the WHIP
    /// resource. Valid in any state; closing twice is a no-op.
    pub async fn close(&mut self) -> Result<(), WhipError> {
        if self.state.transition(ConnectionState::Closed).is_none()
            && self.state.current() == ConnectionState::Closed
            && self.driver.is_none()
            && self.senders.iter().all(|s| s.task.is_none())
        {
            return Ok(());
        }

        for sender in &mut self.senders {
            if let Some(task) = sender.task.take() {
                if let Err(e) = task.await {
                    warn!("Forwarding task of '{}' panicked: {}", sender.track_id, e);
                }
            }
        }

        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                warn!("Transport task panicked: {}", e);
            }
        }

        self.peer = None;
        self.sample_rx = None;

        if let Some(resource) = self.resource.take() {
            if self.config.terminate_on_close {
                if let Err(e) = self.signaling.terminate(&resource).await {
                    warn!("Failed to terminate WHIP resource {}: {}", resource, e);
                }
            }
        }

        info!("Session closed");
        Ok(())
    }

    fn ensure_state(
        &self,
        operation: &'static str,
        allowed: &[ConnectionState],
    ) -> Result<(), WhipError> {
        if allowed.contains(&self.state.current()) {
            Ok(())
        } else {
            Err(self.invalid_state(operation))
        }
    }

    fn invalid_state(&self, operation: &'static str) -> WhipError {
        WhipError::InvalidState {
            operation,
            state: self.state.current(),
        }
    }
}

impl Drop for WhipClient {
    fn drop(&mut self) {
        // Unclosed sessions still must not leave tasks behind.
        self.state.transition(ConnectionState::Closed);
        for task in self.senders.iter_mut().filter_map(|s| s.task.take()) {
            task.abort();
        }
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

impl std::fmt::Debug for WhipClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhipClient")
            .field("endpoint", self.signaling.endpoint())
            .field("state", &self.state.current())
            .field("senders", &self.senders.len())
            .finish()
    }
}
