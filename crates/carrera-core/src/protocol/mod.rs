//! Control Unit Protocol Communication
//!
//! Implements the Carrera Digital 124/132 Control Unit serial protocol:
//! the nibble-encoded wire codec, the request/response session and the
//! serial transport it runs over.

pub mod codec;
pub mod commands;
mod connection;
mod error;
#[cfg(any(test, feature = "mock"))]
#[cfg_attr(docsrs, doc(cfg(feature = "mock")))]
pub mod mock;
pub mod reply;
pub mod serial;
mod track;

pub use codec::{Field, Format, Value};
pub use commands::{Button, Word};
pub use connection::{Connection, ConnectionConfig};
pub use error::{ProtocolError, Result};
pub use reply::{Reply, Status, Timer};
pub use serial::{list_ports, PortInfo, SerialConnection};
pub use track::{SessionState, Track};

/// Default baud rate of the CU PC adapter
pub const DEFAULT_BAUD_RATE: u32 = 19200;

/// Default timeout for reads and writes in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Default sleep between receive-buffer polls in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2;

/// Longest reply frame accepted before buffered bytes are dropped as noise
pub const MAX_FRAME_SIZE: usize = 64;
