//! Text protocol between the host and the node master.
//!
//! The host sends an ASCII command terminated by [`DELIMITER`]; the node
//! master answers with one comma separated line (`current` answers several
//! lines followed by a blank one). A bare delimiter resynchronizes the link
//! and is answered with a blank line.

use crate::error::ParseError;
use crate::{DataPacket, LaCrosse};
use core::fmt::{self, Write};
use core::str::FromStr;
use heapless::Vec;

pub const DELIMITER: u8 = b'|';
pub const MAX_COMMAND_LEN: usize = 16;
pub const LINE_CAPACITY: usize = 64;
/// Printed in place of the temperature when the probe failed
pub const PROBE_FAULT: &str = "ovf";
pub const LINE_END: &str = "\r\n";

pub type Line = heapless::String<LINE_CAPACITY>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Latest packet of the node with this address
    Node(u8),
    LaCrosse,
    /// Everything the node master holds
    Current,
}

impl Command {
    pub fn parse(input: &[u8]) -> Result<Self, ParseError> {
        let text = core::str::from_utf8(input)
            .map_err(|_| ParseError::UnknownCommand)?
            .trim();
        match text {
            "" => Err(ParseError::Empty),
            "lacrosse" => Ok(Self::LaCrosse),
            "current" => Ok(Self::Current),
            _ => text
                .strip_prefix("node")
                .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|n| n.parse().ok())
                .map(Self::Node)
                .ok_or(ParseError::UnknownCommand),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(address) => write!(f, "node{address}"),
            Self::LaCrosse => f.write_str("lacrosse"),
            Self::Current => f.write_str("current"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Sync,
    Command(Command),
    Invalid(ParseError),
}

/// Splits the incoming byte stream of the node master into frames.
pub struct CommandReader {
    buf: Vec<u8, MAX_COMMAND_LEN>,
    overflowed: bool,
}

impl CommandReader {
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            overflowed: false,
        }
    }

    /// Feeds one byte, returns a frame once a delimiter arrives.
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        if byte != DELIMITER {
            if self.buf.push(byte).is_err() {
                self.overflowed = true;
            }
            return None;
        }

        let frame = if self.overflowed {
            Frame::Invalid(ParseError::TooLong)
        } else {
            match Command::parse(&self.buf) {
                Ok(command) => Frame::Command(command),
                Err(ParseError::Empty) => Frame::Sync,
                Err(e) => Frame::Invalid(e),
            }
        };
        self.buf.clear();
        self.overflowed = false;
        Some(frame)
    }
}

impl Default for CommandReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Answer to `node<N>`: `address,uptime,temp,vcc,vbat,age`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeReport {
    pub address: u8,
    pub uptime: i32,
    /// `None` when the probe failed
    pub temp: Option<f32>,
    pub vcc: i16,
    pub vbat: i16,
    /// Seconds since capture
    pub age: u32,
}

impl NodeReport {
    pub fn from_packet(packet: &DataPacket, now_micros: u32) -> Self {
        Self {
            address: packet.address,
            uptime: packet.uptime,
            temp: packet.probe_ok().then_some(packet.temp),
            vcc: packet.vcc,
            vbat: packet.vbat,
            age: packet.age_secs(now_micros),
        }
    }

    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut fields = Fields::new(line);
        let address = fields.next("address")?;
        let uptime = fields.next("uptime")?;
        let temp = match fields.next_str("temp")? {
            PROBE_FAULT => None,
            raw => Some(
                raw.parse::<f32>()
                    .ok()
                    .filter(|t| t.is_finite())
                    .ok_or(ParseError::InvalidField("temp"))?,
            ),
        };
        let vcc = fields.next("vcc")?;
        let vbat = fields.next("vbat")?;
        let age = fields.next("age")?;
        fields.finish()?;

        Ok(Self {
            address,
            uptime,
            temp,
            vcc,
            vbat,
            age,
        })
    }
}

impl fmt::Display for NodeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},", self.address, self.uptime)?;
        match self.temp {
            Some(temp) => write!(f, "{temp:.2}")?,
            None => f.write_str(PROBE_FAULT)?,
        }
        write!(f, ",{},{},{}", self.vcc, self.vbat, self.age)
    }
}

impl LaCrosse {
    /// Parses `station_id,temp,humidity,wind_speed,wind_dir,rainfall`
    pub fn parse_line(line: &str) -> Result<Self, ParseError> {
        let mut fields = Fields::new(line);
        let station_id = fields.next("station_id")?;
        let temp = fields.next("temp")?;
        let humidity = fields.next("humidity")?;
        let wind_speed = fields.next("wind_speed")?;
        let wind_dir = fields.next("wind_dir")?;
        let rainfall = fields.next("rainfall")?;
        fields.finish()?;

        Ok(Self {
            humidity,
            temp,
            wind_dir,
            wind_speed,
            rainfall,
            station_id,
        })
    }
}

/// Wire form of the `lacrosse` answer, see [`LaCrosse::parse_line`]
impl fmt::Display for LaCrosse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{}",
            self.station_id, self.temp, self.humidity, self.wind_speed, self.wind_dir, self.rainfall
        )
    }
}

/// Renders `value` plus line end into a fixed capacity buffer.
pub fn format_line(value: &dyn fmt::Display) -> Result<Line, fmt::Error> {
    let mut line = Line::new();
    write!(line, "{value}{LINE_END}")?;
    Ok(line)
}

struct Fields<'a> {
    inner: core::str::Split<'a, char>,
}

impl<'a> Fields<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            inner: line.trim().split(','),
        }
    }

    fn next_str(&mut self, name: &'static str) -> Result<&'a str, ParseError> {
        self.inner
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ParseError::MissingField(name))
    }

    fn next<T: FromStr>(&mut self, name: &'static str) -> Result<T, ParseError> {
        self.next_str(name)?
            .parse()
            .map_err(|_| ParseError::InvalidField(name))
    }

    fn finish(mut self) -> Result<(), ParseError> {
        match self.inner.next() {
            None => Ok(()),
            Some(_) => Err(ParseError::TrailingData),
        }
    }
}
