//! Track events
//!
//! Converts decoded replies into self-contained, serializable events and
//! hands them to a [`Publisher`]. [`Relay`] is the polling loop tying a
//! [`ControlUnit`] to a publisher.
//!
//! The relay forwards every decoded record. Two identical timer events
//! can be genuine (the CU reports each crossing once), so any duplicate
//! suppression is left to the consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Span};

use crate::control_unit::ControlUnit;
use crate::protocol::{Connection, ProtocolError, Reply, Status, Timer};

/// Routing key for status events
pub const STATUS_ROUTING_KEY: &str = "track.event.status";

/// Routing key for timer events
pub const TIMER_ROUTING_KEY: &str = "track.event.timer";

/// Per-controller slice of a status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Driver {
    /// Controller number, starting at 1
    pub id: u8,
    /// Fuel level, 0..=15
    pub fuel: u8,
    /// Pit lane adapter detected
    pub pit: bool,
}

/// A status snapshot as published downstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// UTC seconds at which the snapshot was taken
    pub timestamp: i64,
    /// Start light stage, 0..=9
    pub start_light: u8,
    /// Mode bit mask
    pub mode: u8,
    /// Number of drivers shown (6 or 8)
    pub display: u8,
    /// All eight controller slots
    pub drivers: Vec<Driver>,
}

impl StatusEvent {
    /// Build the event for `status` observed at `at`
    pub fn from_status(status: &Status, at: DateTime<Utc>) -> Self {
        let drivers = status
            .fuel
            .iter()
            .zip(status.pit.iter())
            .zip(1u8..)
            .map(|((&fuel, &pit), id)| Driver { id, fuel, pit })
            .collect();

        Self {
            timestamp: at.timestamp(),
            start_light: status.start,
            mode: status.mode,
            display: status.display,
            drivers,
        }
    }
}

/// A timing point crossing as published downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerEvent {
    /// Controller address, 0..=7
    pub address: u8,
    /// CU clock in milliseconds
    pub timestamp: u32,
    /// Sector (1 = start/finish)
    pub sector: u8,
}

impl From<Timer> for TimerEvent {
    fn from(timer: Timer) -> Self {
        Self {
            address: timer.address,
            timestamp: timer.timestamp,
            sector: timer.sector,
        }
    }
}

/// Anything the relay publishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackEvent {
    /// Status snapshot
    Status(StatusEvent),
    /// Timer event
    Timer(TimerEvent),
}

impl TrackEvent {
    /// Event for a decoded reply; `None` for unclassified replies
    pub fn from_reply(reply: &Reply, at: DateTime<Utc>) -> Option<Self> {
        match reply {
            Reply::Status(status) => Some(TrackEvent::Status(StatusEvent::from_status(status, at))),
            Reply::Timer(timer) => Some(TrackEvent::Timer((*timer).into())),
            Reply::Unrecognized(_) => None,
        }
    }

    /// Topic this event is published under
    pub fn routing_key(&self) -> &'static str {
        match self {
            TrackEvent::Status(_) => STATUS_ROUTING_KEY,
            TrackEvent::Timer(_) => TIMER_ROUTING_KEY,
        }
    }
}

/// Errors raised while publishing an event
#[derive(Error, Debug)]
pub enum PublishError {
    /// The sink could not be written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The event could not be encoded
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Downstream sink for track events
pub trait Publisher {
    /// Hand one event downstream
    fn publish(&mut self, event: &TrackEvent) -> Result<(), PublishError>;
}

impl Publisher for Vec<TrackEvent> {
    fn publish(&mut self, event: &TrackEvent) -> Result<(), PublishError> {
        self.push(event.clone());
        Ok(())
    }
}

impl<P: Publisher + ?Sized> Publisher for &mut P {
    fn publish(&mut self, event: &TrackEvent) -> Result<(), PublishError> {
        (**self).publish(event)
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    routing_key: &'a str,
    event: &'a TrackEvent,
}

/// Writes one JSON object per event and line
pub struct JsonLinesPublisher<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesPublisher<W> {
    /// Publish to `writer`
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Publisher for JsonLinesPublisher<W> {
    fn publish(&mut self, event: &TrackEvent) -> Result<(), PublishError> {
        let envelope = Envelope {
            routing_key: event.routing_key(),
            event,
        };
        serde_json::to_writer(&mut self.writer, &envelope)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Errors that end or interrupt a relay
#[derive(Error, Debug)]
pub enum RelayError {
    /// Talking to the CU failed
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Handing the event downstream failed
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Polls a Control Unit and publishes what it reports
pub struct Relay<C: Connection, P: Publisher> {
    cu: ControlUnit<C>,
    publisher: P,
    published: u64,
    span: Span,
}

impl<C: Connection, P: Publisher> Relay<C, P> {
    /// Relay from `cu` to `publisher`
    pub fn new(cu: ControlUnit<C>, publisher: P) -> Self {
        Self::with_span(cu, publisher, info_span!("cu.relay"))
    }

    /// Relay logging under the supplied span
    pub fn with_span(cu: ControlUnit<C>, publisher: P, span: Span) -> Self {
        Self {
            cu,
            publisher,
            published: 0,
            span,
        }
    }

    /// The Control Unit being polled
    pub fn control_unit(&mut self) -> &mut ControlUnit<C> {
        &mut self.cu
    }

    /// The publisher events go to
    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Stop relaying and recover the publisher
    pub fn into_publisher(self) -> P {
        self.publisher
    }

    /// Number of events published so far
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Poll once and publish the result, if it is an event
    pub fn poll_once(&mut self) -> Result<Option<TrackEvent>, RelayError> {
        let reply = self.cu.request()?;
        let Some(event) = TrackEvent::from_reply(&reply, Utc::now()) else {
            warn!(parent: &self.span, "unknown data from CU: {:?}", reply);
            return Ok(None);
        };

        self.publisher.publish(&event)?;
        self.published += 1;
        debug!(parent: &self.span, key = event.routing_key(), "published {:?}", event);
        Ok(Some(event))
    }

    /// Poll until `stop` is set.
    ///
    /// Lost frames, checksum failures and publish failures are logged and
    /// skipped. Returns early only on errors a retry cannot fix, such as a
    /// closed connection.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<(), RelayError> {
        info!(parent: &self.span, "relay started");
        while !stop.load(Ordering::Relaxed) {
            match self.poll_once() {
                Ok(_) => {}
                Err(RelayError::Protocol(e)) if e.is_transient() => {
                    warn!(parent: &self.span, "request failed: {}", e);
                }
                Err(RelayError::Publish(e)) => {
                    warn!(parent: &self.span, "publish failed: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        info!(parent: &self.span, published = self.published, "relay stopped");
        Ok(())
    }
}
