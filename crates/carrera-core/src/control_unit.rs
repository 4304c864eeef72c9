//! Control Unit facade
//!
//! Typed, validated operations on top of a [`Track`] session. Every
//! argument is range-checked before a frame is built, so a rejected call
//! never touches the wire.

use tracing::debug;

use crate::protocol::codec::{self, Value};
use crate::protocol::commands::{
    request, word_byte, Button, Word, IGNORE_FORMAT, LAP_ADDRESS, MAX_ADDRESS, MAX_REPEAT,
    WORD_WRITE_FORMAT,
};
use crate::protocol::reply::decode_version;
use crate::protocol::{
    Connection, ConnectionConfig, ProtocolError, Reply, Result, SerialConnection, Track,
};

/// Highest speed, brake or fuel value
pub const MAX_VALUE: u8 = 15;
/// Highest lap number the position tower shows
pub const MAX_LAP: u32 = 255;
/// Lowest and highest position tower place
pub const POSITIONS: std::ops::RangeInclusive<u8> = 1..=8;

/// Repeat count for speed, brake and fuel writes
const SETTING_REPEAT: u8 = 2;
/// Repeat count used when clearing the position tower
const CLEAR_REPEAT: u8 = 9;

fn validate_address(address: u8) -> Result<()> {
    if address > MAX_ADDRESS {
        return Err(ProtocolError::out_of_range(
            "address",
            address.into(),
            0,
            MAX_ADDRESS.into(),
        ));
    }
    Ok(())
}

fn validate_value(value: u8) -> Result<()> {
    if value > MAX_VALUE {
        return Err(ProtocolError::out_of_range(
            "value",
            value.into(),
            0,
            MAX_VALUE.into(),
        ));
    }
    Ok(())
}

/// Interface to a Carrera Digital 124/132 Control Unit
pub struct ControlUnit<C: Connection> {
    track: Track<C>,
}

impl ControlUnit<SerialConnection> {
    /// Open the serial port named in `config` and start a session
    pub fn open(config: ConnectionConfig) -> Result<Self> {
        Ok(Self::new(Track::new(SerialConnection::open(config)?)))
    }
}

impl<C: Connection> ControlUnit<C> {
    /// Wrap an existing session
    pub fn new(track: Track<C>) -> Self {
        Self { track }
    }

    /// Start a session on `connection`
    pub fn from_connection(connection: C) -> Self {
        Self::new(Track::new(connection))
    }

    /// The underlying session
    pub fn track(&self) -> &Track<C> {
        &self.track
    }

    /// The underlying session, mutably
    pub fn track_mut(&mut self) -> &mut Track<C> {
        &mut self.track
    }

    /// Close the connection to the CU
    pub fn close(&self) {
        self.track.close();
    }

    /// Send an arbitrary request and return the decoded reply
    pub fn send(&mut self, buf: &[u8]) -> Result<Reply> {
        self.track.send(buf)
    }

    /// Poll the CU: the next pending timer event, or a status snapshot
    pub fn request(&mut self) -> Result<Reply> {
        self.track.send(request::STATUS)
    }

    /// Reset the CU timer
    pub fn reset(&mut self) -> Result<()> {
        self.track.exchange(request::RESET).map(drop)
    }

    /// Retrieve the four character firmware version
    pub fn version(&mut self) -> Result<String> {
        let frame = self.track.exchange(request::VERSION)?;
        decode_version(&frame)
    }

    /// Emulate a key press on the CU
    pub fn press(&mut self, button: Button) -> Result<Reply> {
        debug!(parent: self.track.span(), "pressing {:?}", button);
        self.track.send(button.request())
    }

    /// Initiate the CU start sequence
    pub fn start(&mut self) -> Result<Reply> {
        self.press(Button::Start)
    }

    /// Ignore the controllers whose bits are set in `mask`
    pub fn ignore(&mut self, mask: u8) -> Result<Reply> {
        let buf = codec::pack(
            &IGNORE_FORMAT,
            &[Value::Char(request::IGNORE), u32::from(mask).into()],
        )?;
        self.track.send(&buf)
    }

    /// Write `value` to `word` of controller `address`, repeated `repeat`
    /// times by the CU
    pub fn set_word(&mut self, word: u8, address: u8, value: u8, repeat: u8) -> Result<()> {
        let packed = word_byte(word, address)?;
        validate_value(value)?;
        if repeat == 0 || repeat > MAX_REPEAT {
            return Err(ProtocolError::out_of_range(
                "repeat",
                repeat.into(),
                1,
                MAX_REPEAT.into(),
            ));
        }

        let buf = codec::pack(
            &WORD_WRITE_FORMAT,
            &[
                Value::Char(request::WORD_WRITE),
                u32::from(packed).into(),
                u32::from(value).into(),
                u32::from(repeat).into(),
            ],
        )?;
        self.track.exchange(&buf).map(drop)
    }

    /// Set the speed value for controller `address`
    pub fn set_speed(&mut self, address: u8, value: u8) -> Result<()> {
        validate_address(address)?;
        validate_value(value)?;
        debug!(parent: self.track.span(), "setting speed of car {} to {}", address, value);
        self.set_word(Word::Speed.into(), address, value, SETTING_REPEAT)
    }

    /// Set the brake value for controller `address`
    pub fn set_brake(&mut self, address: u8, value: u8) -> Result<()> {
        validate_address(address)?;
        validate_value(value)?;
        debug!(parent: self.track.span(), "setting brake of car {} to {}", address, value);
        self.set_word(Word::Brake.into(), address, value, SETTING_REPEAT)
    }

    /// Set the fuel tank value for controller `address`
    pub fn set_fuel(&mut self, address: u8, value: u8) -> Result<()> {
        validate_address(address)?;
        validate_value(value)?;
        debug!(parent: self.track.span(), "setting fuel of car {} to {}", address, value);
        self.set_word(Word::Fuel.into(), address, value, SETTING_REPEAT)
    }

    /// Set the place of controller `address` on the position tower
    pub fn set_position(&mut self, address: u8, position: u8) -> Result<()> {
        validate_address(address)?;
        if !POSITIONS.contains(&position) {
            return Err(ProtocolError::out_of_range(
                "position",
                position.into(),
                (*POSITIONS.start()).into(),
                (*POSITIONS.end()).into(),
            ));
        }
        debug!(parent: self.track.span(), "setting position of car {} to {}", address, position);
        self.set_word(Word::PositionTower.into(), address, position, 1)
    }

    /// Set the lap shown on the position tower.
    ///
    /// A word carries four bits, so the lap goes out as two writes: high
    /// nibble first, then low nibble.
    pub fn set_lap(&mut self, lap: u32) -> Result<()> {
        if lap > MAX_LAP {
            return Err(ProtocolError::out_of_range("lap", lap.into(), 0, MAX_LAP.into()));
        }
        debug!(parent: self.track.span(), "setting lap to {}", lap);
        let (high, low) = ((lap >> 4) as u8, (lap & 0x0f) as u8);
        self.set_word(Word::HighNibblePositionTower.into(), LAP_ADDRESS, high, 1)?;
        self.set_word(Word::LowNibblePositionTower.into(), LAP_ADDRESS, low, 1)
    }

    /// Clear the position tower display
    pub fn clear_position_tower(&mut self) -> Result<()> {
        self.set_word(Word::PositionTower.into(), 0, 0, CLEAR_REPEAT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mock::MockConnection;

    fn unit() -> ControlUnit<MockConnection> {
        ControlUnit::from_connection(MockConnection::new())
    }

    #[test]
    fn test_validation_happens_before_io() {
        let mut cu = unit();
        assert!(matches!(
            cu.set_speed(8, 1),
            Err(ProtocolError::Validation { what: "address", .. })
        ));
        assert!(matches!(
            cu.set_brake(0, 16),
            Err(ProtocolError::Validation { what: "value", .. })
        ));
        assert!(matches!(
            cu.set_lap(256),
            Err(ProtocolError::Validation { what: "lap", .. })
        ));
        assert!(matches!(
            cu.set_position(0, 0),
            Err(ProtocolError::Validation { what: "position", .. })
        ));
        assert!(matches!(
            cu.set_position(0, 9),
            Err(ProtocolError::Validation { what: "position", .. })
        ));
        assert!(matches!(
            cu.set_word(32, 0, 0, 1),
            Err(ProtocolError::Validation { what: "word", .. })
        ));
        assert!(matches!(
            cu.set_word(0, 0, 0, 0),
            Err(ProtocolError::Validation { what: "repeat", .. })
        ));
        assert!(matches!(
            cu.set_word(0, 0, 0, 16),
            Err(ProtocolError::Validation { what: "repeat", .. })
        ));
        assert!(cu.track().connection().sent().is_empty());
    }
}
