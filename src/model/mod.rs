//! Data models for publish sessions
//!
//! This module contains the capture-side media types, the outgoing track
//! senders and the session state machine with the events it emits.

pub mod media;
pub mod state;
pub mod tracks;
