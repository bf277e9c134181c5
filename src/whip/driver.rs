//! The transport loop of a connected session.
//!
//! str0m is sans-IO: this task owns the `Rtc` and the UDP socket, feeds it
//! datagrams, timeouts and media, and acts on whatever it outputs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use str0m::media::{Frequency, MediaTime, Mid};
use str0m::net::{Protocol, Receive};
use str0m::{Event, IceConnectionState, Input, Output, Rtc};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::model::media::MediaSample;
use crate::model::state::{ConnectionState, SessionEvent, SessionState};
use crate::model::tracks::PayloadFormat;
use crate::whip::forward::OutboundSample;

/// Transport side of one track sender.
#[derive(Debug)]
pub(crate) struct OutboundTrack {
    pub track_id: String,
    pub mid: Mid,
    pub format: PayloadFormat,
    clock: RtpClock,
}

impl OutboundTrack {
    pub fn new(track_id: String, mid: Mid, format: PayloadFormat) -> OutboundTrack {
        OutboundTrack {
            track_id,
            mid,
            format,
            clock: RtpClock::new(format.clock_rate()),
        }
    }

    fn frequency(&self) -> Frequency {
        match self.format {
            PayloadFormat::H264 => Frequency::NINETY_KHZ,
            PayloadFormat::Opus => Frequency::FORTY_EIGHT_KHZ,
        }
    }
}

/// Media time of one track in RTP ticks.
///
/// Ticks are derived from the total media duration sent so far, so sample
/// durations that are not a whole number of ticks never accumulate drift.
#[derive(Debug)]
struct RtpClock {
    clock_rate: u64,
    elapsed: Duration,
}

impl RtpClock {
    fn new(clock_rate: u64) -> RtpClock {
        RtpClock {
            clock_rate,
            elapsed: Duration::ZERO,
        }
    }

    fn ticks(&self) -> u64 {
        let nanos = self.elapsed.as_nanos() * u128::from(self.clock_rate);
        ((nanos + 500_000_000) / 1_000_000_000) as u64
    }

    /// Ticks of the next sample, then moves past its `duration`.
    fn advance(&mut self, duration: Duration) -> u64 {
        let ticks = self.ticks();
        self.elapsed += duration;
        ticks
    }
}

enum Wake {
    Lifecycle,
    Sample(OutboundSample),
    Datagram(std::io::Result<(usize, SocketAddr)>),
    Timeout,
}

pub(crate) struct Driver {
    rtc: Rtc,
    socket: UdpSocket,
    local_addr: SocketAddr,
    tracks: Vec<OutboundTrack>,
    state: Arc<SessionState>,
    /// Set once ICE and DTLS are up.
    ready: bool,
}

impl Driver {
    pub fn new(
        rtc: Rtc,
        socket: std::net::UdpSocket,
        tracks: Vec<OutboundTrack>,
        state: Arc<SessionState>,
    ) -> std::io::Result<Driver> {
        let local_addr = socket.local_addr()?;
        let socket = UdpSocket::from_std(socket)?;
        Ok(Driver {
            rtc,
            socket,
            local_addr,
            tracks,
            state,
            ready: false,
        })
    }

    pub async fn run(mut self, mut samples: mpsc::Receiver<OutboundSample>) {
        let mut lifecycle = self.state.watch();
        let mut buf = vec![0; 2000];

        info!("Transport driver started on {}", self.local_addr);

        loop {
            let Some(deadline) = self.poll_until_timeout().await else {
                break;
            };

            let wake = tokio::select! {
                _ = lifecycle.changed() => Wake::Lifecycle,
                Some(sample) = samples.recv() => Wake::Sample(sample),
                received = self.socket.recv_from(&mut buf) => Wake::Datagram(received),
                _ = tokio::time::sleep_until(deadline.into()) => Wake::Timeout,
            };

            match wake {
                Wake::Lifecycle => {
                    if lifecycle.borrow_and_update().is_terminal() {
                        break;
                    }
                }
                Wake::Sample(outbound) => self.write_sample(outbound),
                Wake::Datagram(Ok((n, source))) => self.handle_datagram(source, &buf[..n]),
                Wake::Datagram(Err(e)) => {
                    warn!("UDP receive failed: {}", e);
                    self.fail(ConnectionState::Failed);
                }
                Wake::Timeout => self.handle_input(Input::Timeout(Instant::now())),
            }
        }

        self.rtc.disconnect();
        info!("Transport driver stopped");
    }

    /// Drives the `Rtc` until it asks to be woken up again.
    ///
    /// Returns `None` once the connection is dead.
    async fn poll_until_timeout(&mut self) -> Option<Instant> {
        loop {
            if !self.rtc.is_alive() {
                return None;
            }

            match self.rtc.poll_output() {
                Ok(Output::Timeout(t)) => return Some(t),
                Ok(Output::Transmit(transmit)) => {
                    if let Err(e) = self
                        .socket
                        .send_to(&transmit.contents, transmit.destination)
                        .await
                    {
                        debug!("UDP send to {} failed: {}", transmit.destination, e);
                    }
                }
                Ok(Output::Event(event)) => self.handle_event(event),
                Err(e) => {
                    warn!("poll_output failed: {:?}", e);
                    self.fail(ConnectionState::Failed);
                    return None;
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Connected => {
                info!("✅ Peer connection established, media flowing");
                self.ready = true;
                self.state.emit(SessionEvent::peer_connected());
            }
            Event::IceConnectionStateChange(ice) => {
                info!("🔌 ICE Connection State: {:?}", ice);
                self.state.emit(SessionEvent::ice(ice.into()));
                if ice == IceConnectionState::Disconnected {
                    // No reconnect, the session is over.
                    self.fail(ConnectionState::Disconnected);
                }
            }
            other => debug!("Event: {:?}", other),
        }
    }

    fn handle_datagram(&mut self, source: SocketAddr, datagram: &[u8]) {
        let Ok(contents) = datagram.try_into() else {
            trace!("Ignoring unparseable datagram from {}", source);
            return;
        };

        self.handle_input(Input::Receive(
            Instant::now(),
            Receive {
                proto: Protocol::Udp,
                source,
                destination: self.local_addr,
                contents,
            },
        ));
    }

    fn handle_input(&mut self, input: Input) {
        if !self.rtc.is_alive() {
            return;
        }

        if let Err(e) = self.rtc.handle_input(input) {
            warn!("Peer connection failed: {:?}", e);
            self.fail(ConnectionState::Failed);
        }
    }

    fn write_sample(&mut self, outbound: OutboundSample) {
        if !self.ready {
            trace!("Transport not ready, dropping sample");
            return;
        }

        let Some(track) = self.tracks.get_mut(outbound.sender) else {
            return;
        };

        let Some(writer) = self.rtc.writer(track.mid) else {
            debug!("No writer for '{}' ({:?})", track.track_id, track.mid);
            return;
        };

        let codec = track.format.codec();
        let Some(pt) = writer
            .payload_params()
            .find(|p| p.spec().codec == codec)
            .map(|p| p.pt())
        else {
            debug!("Answer did not accept {} for '{}'", track.format, track.track_id);
            return;
        };

        let MediaSample { data, duration } = outbound.sample;
        let rtp_time = MediaTime::new(track.clock.advance(duration), track.frequency());

        let failed = match writer.write(pt, Instant::now(), rtp_time, data) {
            Ok(()) => false,
            Err(e) => {
                warn!("Writing media for '{}' failed: {:?}", track.track_id, e);
                true
            }
        };

        if failed {
            self.fail(ConnectionState::Failed);
        }
    }

    fn fail(&mut self, state: ConnectionState) {
        self.rtc.disconnect();
        self.state.transition(state);
    }
}
