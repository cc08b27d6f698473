//! Client for a running etymology server: a lookup state machine plus the
//! HTTP transport that drives it.

pub mod http;
pub mod session;

pub use http::{share_url, EtymologyClient};
pub use session::{CacheStatus, ClientSession, SessionState};
