//! WHIP publisher: capture a local stream and push it to a WHIP ingestion
//! endpoint over WebRTC.

pub mod capture;
pub mod config;
pub mod error;
pub mod model;
pub mod session;
pub mod util;
pub mod whip;

pub use capture::{CaptureConstraints, CaptureDevices, CaptureSource};
pub use config::{PublishConfig, WhipConfig};
pub use error::{CaptureError, ConfigError, SessionError, WhipError};
pub use model::state::{ConnectionState, SessionEvent};
pub use session::SessionController;
pub use whip::{BearerToken, WhipClient};
