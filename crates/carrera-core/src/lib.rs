//! # Carrera Core Library
//!
//! Drives a Carrera Digital 124/132 Control Unit (CU) over its serial link.
//!
//! This library provides:
//! - The CU wire codec (nibble alphabet, checksums, reply layouts)
//! - A request/response session that resynchronises on a noisy line
//! - A validated facade for speed, brake, fuel, position tower and keys
//! - Serializable track events and a polling relay for downstream consumers
//!
//! ## Example
//!
//! ```rust,no_run
//! use carrera_core::{protocol::ConnectionConfig, ControlUnit, Reply};
//!
//! let mut cu = ControlUnit::open(ConnectionConfig::new("/dev/ttyUSB0"))?;
//! println!("CU version {}", cu.version()?);
//!
//! cu.set_speed(0, 10)?;
//! match cu.request()? {
//!     Reply::Timer(timer) => println!("car {} at {}ms", timer.address, timer.timestamp),
//!     Reply::Status(status) => println!("fuel {:?}", status.fuel),
//!     Reply::Unrecognized(raw) => println!("unknown {:?}", raw),
//! }
//! # Ok::<(), carrera_core::protocol::ProtocolError>(())
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod control_unit;
pub mod event;
pub mod protocol;

pub use control_unit::ControlUnit;
pub use protocol::{Reply, Status, Timer};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::control_unit::ControlUnit;
    pub use crate::event::{JsonLinesPublisher, Publisher, Relay, TrackEvent};
    pub use crate::protocol::{
        Button, Connection, ConnectionConfig, ProtocolError, Reply, SerialConnection, Status,
        Timer, Track,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
