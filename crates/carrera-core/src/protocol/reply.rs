//! Decoded Control Unit replies

use serde::{Deserialize, Serialize};

use super::codec::{self, Value};
use super::commands::{
    marker, STATUS_EXTENDED_FORMAT, STATUS_FORMAT, TIMER_FORMAT, VERSION_FORMAT,
};
use super::{ProtocolError, Result};

/// Snapshot reported when no timer events are pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Status {
    /// Fuel level of each controller slot, 0..=15
    pub fuel: [u8; 8],
    /// Start light stage, 0..=9
    pub start: u8,
    /// Mode bit mask, see the `*_MODE` constants
    pub mode: u8,
    /// Pit lane adapter detection per controller slot
    pub pit: [bool; 8],
    /// Number of drivers shown on the display (6 or 8)
    pub display: u8,
}

impl Status {
    /// Fuel mode is enabled
    pub const FUEL_MODE: u8 = 0x1;
    /// Real fuel mode is enabled
    pub const REAL_MODE: u8 = 0x2;
    /// A pit lane adapter is connected
    pub const PIT_LANE_MODE: u8 = 0x4;
    /// A lap counter is connected
    pub const LAP_COUNTER_MODE: u8 = 0x8;

    /// Whether every bit of `mode` is set
    pub fn has_mode(&self, mode: u8) -> bool {
        self.mode & mode == mode
    }

    /// The pit flags folded back into the wire bit mask
    pub fn pit_mask(&self) -> u8 {
        self.pit
            .iter()
            .enumerate()
            .fold(0, |mask, (n, &pit)| if pit { mask | (1 << n) } else { mask })
    }
}

/// A car crossed a timing point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timer {
    /// Controller address: 0..=5 cars, 6 autonomous car, 7 pace car
    pub address: u8,
    /// CU clock in milliseconds; wraps at 2^32
    pub timestamp: u32,
    /// 1 for the start/finish line, 2 or 3 for check lanes
    pub sector: u8,
}

/// A reply frame classified by its leading bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    /// `?:` status snapshot
    Status(Status),
    /// `?` timer event
    Timer(Timer),
    /// Anything else: command echoes, version strings
    Unrecognized(Vec<u8>),
}

/// Classify a reply frame and decode it.
///
/// Checksum failures propagate; unknown prefixes are not an error.
pub fn classify(frame: &[u8]) -> Result<Reply> {
    if frame.starts_with(marker::STATUS) {
        decode_status(frame).map(Reply::Status)
    } else if frame.starts_with(marker::POLL) {
        decode_timer(frame).map(Reply::Timer)
    } else {
        Ok(Reply::Unrecognized(frame.to_vec()))
    }
}

fn small_ints(values: &[Value]) -> Result<Vec<u8>> {
    values
        .iter()
        .map(|v| match v.as_int() {
            Some(n) if n <= u8::MAX.into() => Ok(n as u8),
            _ => Err(ProtocolError::Format(format!("unexpected field value {:?}", v))),
        })
        .collect()
}

/// Decode a status frame, falling back to the extended layout of newer
/// firmware when the canonical checksum does not match
pub fn decode_status(frame: &[u8]) -> Result<Status> {
    let values = match codec::unpack(&STATUS_FORMAT, frame) {
        Ok(values) => values,
        Err(strict @ ProtocolError::Checksum { .. }) => {
            match codec::unpack(&STATUS_EXTENDED_FORMAT, frame) {
                Ok(values) => values,
                // too short for the extended layout, so the canonical failure stands
                Err(ProtocolError::Format(_)) => return Err(strict),
                Err(e) => return Err(e),
            }
        }
        Err(e) => return Err(e),
    };

    let v = small_ints(&values)?;
    let mut fuel = [0u8; 8];
    fuel.copy_from_slice(&v[..8]);
    let pit_mask = v[10];

    Ok(Status {
        fuel,
        start: v[8],
        mode: v[9],
        pit: std::array::from_fn(|n| (pit_mask & (1 << n)) != 0),
        display: v[11],
    })
}

/// Decode a timer frame; the wire address is one-based
pub fn decode_timer(frame: &[u8]) -> Result<Timer> {
    let values = codec::unpack(&TIMER_FORMAT, frame)?;
    let (wire_address, timestamp, sector) = match values.as_slice() {
        [Value::Int(a), Value::Int(t), Value::Int(s)] => (*a as u8, *t, *s as u8),
        other => {
            return Err(ProtocolError::Format(format!(
                "unexpected timer fields {:?}",
                other
            )))
        }
    };
    let address = wire_address
        .checked_sub(1)
        .ok_or_else(|| ProtocolError::Format("timer address 0 on the wire".into()))?;

    Ok(Timer {
        address,
        timestamp,
        sector,
    })
}

/// Decode the four character firmware version
pub fn decode_version(frame: &[u8]) -> Result<String> {
    let values = codec::unpack(&VERSION_FORMAT, frame)?;
    match values.first().and_then(Value::as_bytes) {
        Some(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        None => Err(ProtocolError::Format("missing version string".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::checksum;
    use pretty_assertions::assert_eq;

    fn status_frame(fuel: [u8; 8], start: u8, mode: u8, pit_mask: u8, display: u8) -> Vec<u8> {
        let mut f = b"?:".to_vec();
        f.extend(fuel.iter().map(|v| 0x30 | v));
        f.push(0x30 | start);
        f.push(0x30 | mode);
        f.push(0x30 | (pit_mask & 0x0f));
        f.push(0x30 | (pit_mask >> 4));
        f.push(0x30 | display);
        f
    }

    fn seal(mut frame: Vec<u8>) -> Vec<u8> {
        let sum = checksum(&frame);
        frame.push(0x30 | sum);
        frame
    }

    #[test]
    fn test_status_decode() {
        let frame = seal(status_frame([15, 15, 15, 15, 15, 15, 0, 0], 7, 6, 0, 8));
        let status = match classify(&frame).unwrap() {
            Reply::Status(s) => s,
            other => panic!("expected status, got {:?}", other),
        };
        assert_eq!(
            status,
            Status {
                fuel: [15, 15, 15, 15, 15, 15, 0, 0],
                start: 7,
                mode: 6,
                pit: [false; 8],
                display: 8,
            }
        );
        assert!(status.has_mode(Status::REAL_MODE | Status::PIT_LANE_MODE));
        assert!(!status.has_mode(Status::FUEL_MODE));
        assert!(!status.has_mode(Status::LAP_COUNTER_MODE));
    }

    #[test]
    fn test_status_pit_mask_bits() {
        let frame = seal(status_frame([0; 8], 0, 4, 0b1000_0101, 6));
        let status = decode_status(&frame).unwrap();
        assert_eq!(
            status.pit,
            [true, false, true, false, false, false, false, true]
        );
        assert_eq!(status.pit_mask(), 0b1000_0101);
    }

    #[test]
    fn test_status_extended_fallback() {
        let body = status_frame([1, 2, 3, 4, 5, 6, 7, 8], 9, 15, 0x5a, 8);
        let plain = seal(body.clone());

        // pick a first padding byte the canonical layout will misread as a bad checksum
        let strict = checksum(&body);
        let mut padded = body;
        padded.push(0x30 | ((strict + 1) & 0x0f));
        padded.push(b'3');
        let padded = seal(padded);

        assert!(matches!(
            codec::unpack(&STATUS_FORMAT, &padded),
            Err(ProtocolError::Checksum { .. })
        ));
        assert_eq!(decode_status(&padded).unwrap(), decode_status(&plain).unwrap());
    }

    #[test]
    fn test_status_checksum_failure_propagates() {
        let mut frame = seal(status_frame([3; 8], 1, 0, 0, 8));
        let last = frame.len() - 1;
        frame[last] = 0x30 | ((frame[last] + 1) & 0x0f);
        assert!(matches!(
            classify(&frame),
            Err(ProtocolError::Checksum { .. })
        ));

        let mut padded = status_frame([3; 8], 1, 0, 0, 8);
        padded.extend_from_slice(b"00");
        let mut padded = seal(padded);
        let last = padded.len() - 1;
        padded[last] = 0x30 | ((padded[last] + 1) & 0x0f);
        assert!(matches!(
            classify(&padded),
            Err(ProtocolError::Checksum { .. })
        ));
    }

    #[test]
    fn test_timer_decode_address_offset() {
        // wire address 4 is controller 3
        let frame = seal(b"?4214365871".to_vec());
        assert_eq!(
            classify(&frame).unwrap(),
            Reply::Timer(Timer {
                address: 3,
                timestamp: 0x1234_5678,
                sector: 1,
            })
        );
    }

    #[test]
    fn test_timer_zero_address_rejected() {
        let frame = seal(b"?0000000001".to_vec());
        assert!(matches!(decode_timer(&frame), Err(ProtocolError::Format(_))));
    }

    #[test]
    fn test_unrecognized_passthrough() {
        assert_eq!(
            classify(b"J00527").unwrap(),
            Reply::Unrecognized(b"J00527".to_vec())
        );
        assert_eq!(classify(b"").unwrap(), Reply::Unrecognized(Vec::new()));
    }

    #[test]
    fn test_version_decode() {
        let frame = seal(b"05337".to_vec());
        assert_eq!(decode_version(&frame).unwrap(), "5337");
    }
}
