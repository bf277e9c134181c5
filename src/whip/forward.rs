use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::model::media::{MediaSample, MediaTrack};
use crate::model::state::{ConnectionState, SessionEvent, SessionState};

/// A sample on its way from a forwarding task to the transport.
#[derive(Debug)]
pub(crate) struct OutboundSample {
    pub sender: usize,
    pub sample: MediaSample,
}

/// Pumps samples of `track` to the transport at the track's cadence.
///
/// Samples read before the session is connected are discarded. The task
/// ends when the track closes or the session reaches a terminal state.
pub(crate) async fn forward_samples(
    sender: usize,
    track: Arc<dyn MediaTrack>,
    state: Arc<SessionState>,
    out: mpsc::Sender<OutboundSample>,
) {
    let mut lifecycle = state.watch();
    let mut ticker = time::interval(track.frame_duration());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Forwarding track '{}' every {:?}",
        track.id(),
        track.frame_duration()
    );

    loop {
        tokio::select! {
            changed = lifecycle.changed() => {
                if changed.is_err() || lifecycle.borrow().is_terminal() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        let live = *lifecycle.borrow() == ConnectionState::Connected;

        loop {
            match track.read_sample() {
                Ok(Some(sample)) if live => {
                    match out.try_send(OutboundSample { sender, sample }) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            debug!("Transport queue full, dropping sample of '{}'", track.id())
                        }
                        Err(TrySendError::Closed(_)) => return,
                    }
                }
                // Not publishing yet; keep the capture drained.
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => {
                    info!("Track '{}' ended", track.id());
                    state.emit(SessionEvent::track_ended(track.id()));
                    return;
                }
            }
        }
    }

    debug!("Stopped forwarding track '{}'", track.id());
}
