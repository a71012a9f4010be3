//! Agent transports.
//!
//! - [`LocalTransport`] — in-process registry of agent handlers
//! - [`HttpTransport`] — JSON envelopes over HTTP/1.1 to agent addresses

pub mod http;
pub mod local;

pub use self::http::HttpTransport;
pub use self::local::LocalTransport;
