//! Protocol commands
//!
//! Request tags, button codes, word identifiers and the wire formats the
//! Control Unit understands.

use serde::{Deserialize, Serialize};

use super::codec::{Field, Format};
use super::{ProtocolError, Result};

/// Fixed request tags
pub mod request {
    /// Poll for the next timer event or, if none is pending, a status snapshot
    pub const STATUS: &[u8] = b"?";
    /// Reset the CU lap timer
    pub const RESET: &[u8] = b"=10";
    /// Query the firmware version
    pub const VERSION: &[u8] = b"0";
    /// Tag of a word write
    pub const WORD_WRITE: u8 = b'J';
    /// Tag of the ignore-controllers command
    pub const IGNORE: u8 = b':';
}

/// Reply markers
pub mod marker {
    /// Prefix shared by status and timer replies
    pub const POLL: &[u8] = b"?";
    /// Prefix of a status reply
    pub const STATUS: &[u8] = b"?:";
}

/// Emulated Control Unit keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Button {
    /// PACE CAR / ESC
    PaceCar,
    /// START / ENTER
    Start,
    /// SPEED
    Speed,
    /// BRAKE
    Brake,
    /// FUEL
    Fuel,
    /// CODE
    Code,
}

impl Button {
    /// Two-byte request emulating a press of this key
    pub fn request(&self) -> &'static [u8] {
        match self {
            Button::PaceCar => b"T1",
            Button::Start => b"T2",
            Button::Speed => b"T5",
            Button::Brake => b"T6",
            Button::Fuel => b"T7",
            Button::Code => b"T8",
        }
    }
}

/// Writable CU registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Word {
    /// A car's maximum speed
    Speed = 0,
    /// A car's brake strength
    Brake = 1,
    /// A car's fuel tank level
    Fuel = 2,
    /// A car's place on the position tower
    PositionTower = 6,
    /// High nibble of the lap shown on the position tower
    HighNibblePositionTower = 17,
    /// Low nibble of the lap shown on the position tower
    LowNibblePositionTower = 18,
}

impl From<Word> for u8 {
    fn from(word: Word) -> Self {
        word as u8
    }
}

/// Highest word identifier that fits the word byte
pub const MAX_WORD: u8 = 31;
/// Highest controller address (7 = pace car)
pub const MAX_ADDRESS: u8 = 7;
/// Highest repeat count of a word write
pub const MAX_REPEAT: u8 = 15;
/// Address used for position tower lap writes
pub const LAP_ADDRESS: u8 = 7;

/// Combine a word identifier and controller address into the word byte.
///
/// ```text
///  7   5 4       0
/// +-----+---------+
/// | adr |  word   |
/// +-----+---------+
/// ```
pub fn word_byte(word: u8, address: u8) -> Result<u8> {
    if word > MAX_WORD {
        return Err(ProtocolError::out_of_range("word", word.into(), 0, MAX_WORD.into()));
    }
    if address > MAX_ADDRESS {
        return Err(ProtocolError::out_of_range(
            "address",
            address.into(),
            0,
            MAX_ADDRESS.into(),
        ));
    }
    Ok(word | address << 5)
}

/// `J`, word byte, value nibble, repeat nibble, checksum
pub const WORD_WRITE_FORMAT: Format = Format::new(&[
    Field::Char,
    Field::Byte,
    Field::Nibble,
    Field::Nibble,
    Field::Checksum,
]);

/// `:`, controller mask, checksum
pub const IGNORE_FORMAT: Format = Format::new(&[Field::Char, Field::Byte, Field::Checksum]);

/// `?:`, eight fuel levels, start light, mode, pit mask, display, checksum
pub const STATUS_FORMAT: Format = Format::new(&[
    Field::Skip,
    Field::Skip,
    Field::Nibble,
    Field::Nibble,
    Field::Nibble,
    Field::Nibble,
    Field::Nibble,
    Field::Nibble,
    Field::Nibble,
    Field::Nibble,
    Field::Nibble,
    Field::Nibble,
    Field::Byte,
    Field::Nibble,
    Field::Checksum,
]);

/// Status reply of newer firmware, with two unknown bytes before the checksum
pub const STATUS_EXTENDED_FORMAT: Format = Format::new(&[
    Field::Skip,
    Field::Skip,
    Field::Nibble,
    Field::Nibble,
    Field::Nibble,
    Field::Nibble,
    Field::Nibble,
    Field::Nibble,
    Field::Nibble,
    Field::Nibble,
    Field::Nibble,
    Field::Nibble,
    Field::Byte,
    Field::Nibble,
    Field::Skip,
    Field::Skip,
    Field::Checksum,
]);

/// `?`, one-based address, timestamp, sector, checksum
pub const TIMER_FORMAT: Format = Format::new(&[
    Field::Skip,
    Field::Nibble,
    Field::Int,
    Field::Nibble,
    Field::Checksum,
]);

/// `0`, four character version string, checksum
pub const VERSION_FORMAT: Format = Format::new(&[Field::Skip, Field::Str(4), Field::Checksum]);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_byte_layout() {
        assert_eq!(word_byte(Word::Speed.into(), 0).unwrap(), 0x00);
        assert_eq!(word_byte(Word::Brake.into(), 3).unwrap(), 0x61);
        assert_eq!(word_byte(Word::LowNibblePositionTower.into(), 7).unwrap(), 0xf2);
        assert_eq!(word_byte(MAX_WORD, MAX_ADDRESS).unwrap(), 0xff);
    }

    #[test]
    fn test_word_byte_rejects_out_of_range() {
        assert!(matches!(
            word_byte(32, 0),
            Err(ProtocolError::Validation { what: "word", .. })
        ));
        assert!(matches!(
            word_byte(0, 8),
            Err(ProtocolError::Validation { what: "address", .. })
        ));
    }

    #[test]
    fn test_button_requests() {
        assert_eq!(Button::PaceCar.request(), b"T1");
        assert_eq!(Button::Start.request(), b"T2");
        assert_eq!(Button::Code.request(), b"T8");
    }

    #[test]
    fn test_reply_format_lengths() {
        assert_eq!(STATUS_FORMAT.wire_len(), 16);
        assert_eq!(STATUS_EXTENDED_FORMAT.wire_len(), 18);
        assert_eq!(STATUS_FORMAT.value_count(), STATUS_EXTENDED_FORMAT.value_count());
        assert_eq!(TIMER_FORMAT.wire_len(), 12);
        assert_eq!(VERSION_FORMAT.wire_len(), 6);
    }
}
