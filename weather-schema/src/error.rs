use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Nothing but whitespace between delimiters
    Empty,
    /// Command longer than the receive buffer
    TooLong,
    UnknownCommand,
    /// Response line ended before the named field
    MissingField(&'static str),
    /// Named field is present but not a number of the right width
    InvalidField(&'static str),
    /// More fields than the line format defines
    TrailingData,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty input"),
            Self::TooLong => f.write_str("command too long"),
            Self::UnknownCommand => f.write_str("unknown command"),
            Self::MissingField(name) => write!(f, "missing field `{name}`"),
            Self::InvalidField(name) => write!(f, "invalid value for field `{name}`"),
            Self::TrailingData => f.write_str("unexpected trailing fields"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ParseError {}
