use crate::config::SerialConfig;
use serialport::{ClearBuffer, SerialPort};
use std::fmt;
use std::io::{self, BufRead, BufReader, Write};
use std::thread;
use std::time::Duration;
use weather_schema::protocol::{Command, DELIMITER, NodeReport};
use weather_schema::{LaCrosse, ParseError};

/// Pause between resync and command, the node master needs it to settle
pub const SETTLE: Duration = Duration::from_millis(100);
const PRESSURE_COMMAND: &[u8] = b"pres";

/// Line oriented byte link to a device.
pub trait Transport {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;
    /// Raw bytes of one line without its terminator, `None` if the device stayed silent
    fn read_line(&mut self) -> io::Result<Option<Vec<u8>>>;
    fn discard_input(&mut self) -> io::Result<()>;
}

pub struct SerialTransport {
    port: BufReader<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn open(config: &SerialConfig) -> Result<Self, anyhow::Error> {
        tracing::debug!("Opening serial port {} at {} baud", config.port, config.baud_rate);
        let port = serialport::new(&config.port, config.baud_rate)
            .timeout(config.timeout)
            .open()
            .map_err(|e| anyhow::anyhow!("Failed to open port {}: {e}", config.port))?;
        Ok(Self {
            port: BufReader::new(port),
        })
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let port = self.port.get_mut();
        port.write_all(bytes)?;
        port.flush()
    }

    fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        read_raw_line(&mut self.port)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        let buffered = self.port.buffer().len();
        self.port.consume(buffered);
        self.port.get_ref().clear(ClearBuffer::Input)?;
        Ok(())
    }
}

/// Reads up to and including `\n`. Bytes are not decoded, devices emit
/// garbage after a reset. A timeout keeps whatever arrived before it.
fn read_raw_line<R: BufRead>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    match reader.read_until(b'\n', &mut line) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
        Err(e) => return Err(e),
    }
    if line.is_empty() {
        return Ok(None);
    }
    while matches!(line.last(), Some(b'\r' | b'\n')) {
        line.pop();
    }
    Ok(Some(line))
}

/// Undecodable bytes turn into U+FFFD and fail parsing instead of the link.
fn decode(line: Vec<u8>) -> String {
    String::from_utf8_lossy(&line).into_owned()
}

#[derive(Debug)]
pub enum LinkError {
    Io(io::Error),
    /// No answer within the port timeout
    Timeout,
    /// Device answered but holds no reading
    NoData,
    Parse { line: String, error: ParseError },
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "serial I/O failed: {e}"),
            Self::Timeout => f.write_str("no response"),
            Self::NoData => f.write_str("no reading available"),
            Self::Parse { line, error } => write!(f, "invalid response `{line}`: {error}"),
        }
    }
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<io::Error> for LinkError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Host side of the node master protocol.
pub struct MasterLink<T> {
    transport: T,
    settle: Duration,
    max_retries: u32,
}

impl<T: Transport> MasterLink<T> {
    pub fn new(transport: T, settle: Duration, max_retries: u32) -> Self {
        Self {
            transport,
            settle,
            max_retries,
        }
    }

    /// Bare delimiter, drop whatever comes back and anything still buffered.
    pub fn resync(&mut self) -> Result<(), LinkError> {
        self.transport.send(&[DELIMITER])?;
        let _ = self.transport.read_line()?;
        thread::sleep(self.settle);
        self.transport.discard_input()?;
        Ok(())
    }

    fn exchange(&mut self, command: Command) -> Result<String, LinkError> {
        self.resync()?;
        tracing::debug!("Writing command: {command}");
        self.transport.send(format!("{command}|").as_bytes())?;
        let line = self
            .transport
            .read_line()?
            .map(decode)
            .ok_or(LinkError::Timeout)?;
        tracing::debug!("Result: {line}");
        Ok(line)
    }

    fn query<R>(
        &mut self,
        command: Command,
        parse: impl Fn(&str) -> Result<R, ParseError>,
    ) -> Result<R, LinkError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.exchange(command).and_then(|line| {
                if line.trim().is_empty() {
                    return Err(LinkError::NoData);
                }
                parse(&line).map_err(|error| LinkError::Parse { line, error })
            });
            match result {
                Err(e @ (LinkError::Parse { .. } | LinkError::Timeout))
                    if attempt <= self.max_retries =>
                {
                    tracing::warn!("{command}: {e}, trying again ({attempt}/{})", self.max_retries);
                }
                other => return other,
            }
        }
    }

    pub fn node(&mut self, address: u8) -> Result<NodeReport, LinkError> {
        self.query(Command::Node(address), NodeReport::parse)
    }

    pub fn lacrosse(&mut self) -> Result<LaCrosse, LinkError> {
        self.query(Command::LaCrosse, LaCrosse::parse_line)
    }

    /// Dump of everything the node master holds, one entry per line.
    pub fn current(&mut self) -> Result<Vec<String>, LinkError> {
        self.resync()?;
        self.transport
            .send(format!("{}|", Command::Current).as_bytes())?;
        let mut lines = Vec::new();
        while let Some(line) = self.transport.read_line()?.map(decode) {
            if line.trim().is_empty() {
                break;
            }
            lines.push(line);
        }
        Ok(lines)
    }
}

/// Barometer on its own serial line. Echoes the command, then answers.
pub struct PressureLink<T> {
    transport: T,
    settle: Duration,
}

impl<T: Transport> PressureLink<T> {
    pub fn new(transport: T, settle: Duration) -> Self {
        Self { transport, settle }
    }

    pub fn read(&mut self) -> Result<f32, LinkError> {
        self.transport.discard_input()?;
        self.transport.send(PRESSURE_COMMAND)?;
        thread::sleep(self.settle);
        // Echo
        let _ = self.transport.read_line()?;
        thread::sleep(self.settle);
        let line = self
            .transport
            .read_line()?
            .map(decode)
            .ok_or(LinkError::Timeout)?;
        line.trim()
            .parse::<f32>()
            .ok()
            .filter(|p| p.is_finite())
            .ok_or(LinkError::Parse {
                line,
                error: ParseError::InvalidField("pressure"),
            })
    }
}
