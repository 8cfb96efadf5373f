//! GCS protocol layer: error taxonomy, device channels, reply parsing.

mod channel;
mod error;
pub mod reply;

pub use channel::{DeviceChannel, MockChannel, RelayChannel, TcpChannel, TransportKind, DEFAULT_PORT};
pub use error::{GcsError, GcsResult};
