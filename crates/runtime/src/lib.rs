//! Test-server runtime: backend process lifecycle and the client protocol.
//!
//! - [`transport`]: NUL-framed pipe and WebSocket transports
//! - [`connection`]: request/response correlation and event fan-out
//! - [`launcher`]: spawn a backend, discover its endpoint, connect
//! - [`driver`]: locate the runtime executable

pub mod connection;
pub mod driver;
pub mod error;
pub mod launcher;
pub mod transport;

pub use connection::{
	ClientHooks, Connection, ConnectionEvent, DefaultHooks, EventHub, EventKind, EventStream,
	Subscription,
};
pub use driver::{NodeResolver, RuntimeResolver};
pub use error::{Error, Result};
pub use launcher::{
	BackendClient, BackendLauncher, EnvProvider, LaunchOptions, LaunchState, ProcessHandle,
	parse_listening_line,
};
pub use transport::{PipeTransport, Transport, TransportParts, TransportReceiver, WebSocketTransport};
pub use tokio_util::sync::CancellationToken;
