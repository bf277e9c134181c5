//! A local WHIP endpoint for integration tests.
//!
//! The endpoint records every request. Depending on its [`Behavior`] it
//! answers offers with a real str0m peer, an error, garbage or not at all.

#![allow(dead_code)]

use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rouille::{Request, Response, Server};
use str0m::change::SdpOffer;
use str0m::net::{Protocol, Receive};
use str0m::{Candidate, Event, Input, Output, Rtc};
use tokio::sync::broadcast;

use whip_publish::{ConnectionState, SessionEvent, WhipConfig};

pub const TOKEN: &str = "s3cr3t";

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub url: String,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Valid answer pointing at an address nobody listens on.
    Answer,
    /// Valid answer from a live peer on a loopback socket.
    Peer,
    Forbidden,
    Garbage,
    Slow,
}

struct Shared {
    behavior: Behavior,
    requests: Mutex<Vec<Recorded>>,
    answerers: Mutex<Vec<Arc<Answerer>>>,
    sessions: AtomicUsize,
}

pub struct MockEndpoint {
    addr: SocketAddr,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    stop: Option<mpsc::Sender<()>>,
}

impl MockEndpoint {
    pub fn start(behavior: Behavior) -> MockEndpoint {
        let shared = Arc::new(Shared {
            behavior,
            requests: Mutex::new(vec![]),
            answerers: Mutex::new(vec![]),
            sessions: AtomicUsize::new(0),
        });

        let handler = shared.clone();
        let server = Server::new("127.0.0.1:0", move |request| handle(request, &handler))
            .expect("starting the mock endpoint");
        let addr = server.server_addr();
        let (handle, stop) = server.stoppable();

        MockEndpoint {
            addr,
            shared,
            handle: Some(handle),
            stop: Some(stop),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}/whip/live", self.addr)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.shared.requests.lock().unwrap().clone()
    }

    /// The live peer created for the `n`th accepted offer.
    pub fn answerer(&self, n: usize) -> Option<Arc<Answerer>> {
        self.shared.answerers.lock().unwrap().get(n).cloned()
    }
}

impl Drop for MockEndpoint {
    fn drop(&mut self) {
        for answerer in self.shared.answerers.lock().unwrap().iter() {
            answerer.stop();
        }
        if let Some(stop) = self.stop.take() {
            stop.send(()).ok();
        }
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

fn handle(request: &Request, shared: &Shared) -> Response {
    let mut body = String::new();
    if let Some(mut data) = request.data() {
        data.read_to_string(&mut body).ok();
    }

    shared.requests.lock().unwrap().push(Recorded {
        method: request.method().to_owned(),
        url: request.url(),
        authorization: request.header("Authorization").map(str::to_owned),
        content_type: request.header("Content-Type").map(str::to_owned),
        body: body.clone(),
    });

    if request.method() == "DELETE" {
        return Response::empty_204();
    }

    match shared.behavior {
        Behavior::Answer | Behavior::Peer => {
            let offer = SdpOffer::from_sdp_string(&body).expect("a valid offer");
            let answer = if let Behavior::Peer = shared.behavior {
                let (answerer, answer) = Answerer::accept(offer);
                shared.answerers.lock().unwrap().push(answerer);
                answer
            } else {
                let mut rtc = Rtc::builder().build();
                let candidate = Candidate::host("127.0.0.1:1".parse().unwrap(), "udp")
                    .expect("a host candidate");
                rtc.add_local_candidate(candidate);
                rtc.sdp_api()
                    .accept_offer(offer)
                    .expect("offer accepted")
                    .to_sdp_string()
            };

            let n = shared.sessions.fetch_add(1, Ordering::SeqCst) + 1;
            Response::from_data("application/sdp", answer)
                .with_status_code(201)
                .with_additional_header("Location", format!("/whip/sessions/{n}"))
        }
        Behavior::Forbidden => Response::text("invalid token").with_status_code(403),
        Behavior::Garbage => {
            Response::from_data("application/sdp", "this is not sdp").with_status_code(201)
        }
        Behavior::Slow => {
            thread::sleep(Duration::from_secs(2));
            Response::text("too late").with_status_code(201)
        }
    }
}

/// What the answering peer observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Connected,
    /// A depacketized frame of this many bytes.
    Media(usize),
}

/// The ingest side of a session: a str0m peer on its own thread.
pub struct Answerer {
    pub addr: SocketAddr,
    events: Mutex<mpsc::Receiver<PeerEvent>>,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Answerer {
    fn accept(offer: SdpOffer) -> (Arc<Answerer>, String) {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("binding the answerer socket");
        let addr = socket.local_addr().expect("a local socket address");

        let mut rtc = Rtc::builder().build();
        rtc.add_local_candidate(Candidate::host(addr, "udp").expect("a host candidate"));
        let answer = rtc
            .sdp_api()
            .accept_offer(offer)
            .expect("offer accepted")
            .to_sdp_string();

        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let handle = thread::spawn({
            let stop = stop.clone();
            move || run_answerer(rtc, socket, tx, &stop)
        });

        let answerer = Answerer {
            addr,
            events: Mutex::new(rx),
            stop,
            handle: Mutex::new(Some(handle)),
        };
        (Arc::new(answerer), answer)
    }

    /// Takes the events seen since the last call.
    pub fn drain(&self) -> Vec<PeerEvent> {
        self.events.lock().unwrap().try_iter().collect()
    }

    /// Waits until the peer reported an event matching `pred`.
    pub async fn wait_for(&self, pred: impl Fn(&PeerEvent) -> bool, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if self.drain().iter().any(&pred) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Goes silent: the peer stops answering and its socket is closed.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.join().ok();
        }
    }
}

fn run_answerer(
    mut rtc: Rtc,
    socket: UdpSocket,
    events: mpsc::Sender<PeerEvent>,
    stop: &AtomicBool,
) {
    let local = socket.local_addr().expect("a local socket address");
    let mut buf = vec![0; 2000];

    while !stop.load(Ordering::Acquire) {
        let Some(timeout) = poll_answerer(&mut rtc, &socket, &events) else {
            return;
        };

        // Short reads keep the stop flag responsive.
        let wait = timeout
            .saturating_duration_since(Instant::now())
            .clamp(Duration::from_millis(1), Duration::from_millis(20));
        socket.set_read_timeout(Some(wait)).expect("setting the read timeout");

        match socket.recv_from(&mut buf) {
            Ok((n, source)) => {
                let datagram: &[u8] = &buf[..n];
                if let Ok(contents) = datagram.try_into() {
                    let input = Input::Receive(
                        Instant::now(),
                        Receive {
                            proto: Protocol::Udp,
                            source,
                            destination: local,
                            contents,
                        },
                    );
                    if rtc.handle_input(input).is_err() {
                        return;
                    }
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => panic!("answerer socket failed: {e:?}"),
        }

        if rtc.handle_input(Input::Timeout(Instant::now())).is_err() {
            return;
        }
    }

    rtc.disconnect();
}

fn poll_answerer(
    rtc: &mut Rtc,
    socket: &UdpSocket,
    events: &mpsc::Sender<PeerEvent>,
) -> Option<Instant> {
    loop {
        if !rtc.is_alive() {
            return None;
        }

        match rtc.poll_output() {
            Ok(Output::Timeout(t)) => return Some(t),
            Ok(Output::Transmit(transmit)) => {
                socket.send_to(&transmit.contents, transmit.destination).ok();
            }
            Ok(Output::Event(Event::Connected)) => {
                events.send(PeerEvent::Connected).ok();
            }
            Ok(Output::Event(Event::MediaData(data))) => {
                events.send(PeerEvent::Media(data.data.len())).ok();
            }
            Ok(Output::Event(_)) => {}
            Err(_) => return None,
        }
    }
}

pub fn config() -> WhipConfig {
    WhipConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        signaling_timeout_ms: 500,
        ..WhipConfig::default()
    }
}

/// Waits for the first state change into a state matching `pred`.
pub async fn wait_for_state(
    events: &mut broadcast::Receiver<SessionEvent>,
    pred: impl Fn(ConnectionState) -> bool,
    within: Duration,
) -> Option<ConnectionState> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::StateChanged { to, .. }) if pred(to) => return Some(to),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    tokio::time::timeout(within, wait).await.ok().flatten()
}

/// One H.264 access unit: SPS, PPS and an IDR slice.
pub fn keyframe() -> Vec<u8> {
    let mut au = vec![];
    for nal in [
        &[0x67, 0x42, 0xc0, 0x1f, 0x8c, 0x8d, 0x40][..],
        &[0x68, 0xce, 0x3c, 0x80][..],
        &[0x65, 0x88, 0x84, 0x00, 0x33, 0xff, 0xfe, 0xf6, 0xf0][..],
    ] {
        au.extend_from_slice(&[0, 0, 0, 1]);
        au.extend_from_slice(nal);
    }
    au
}
