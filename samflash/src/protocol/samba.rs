//! SAM-BA monitor protocol client.
//!
//! ## Wire Format
//!
//! Commands are ASCII, terminated by `#`, with 8-digit hex arguments:
//!
//! ```text
//! +---------+----------------------+------------------------------------+
//! | Command | Request              | Binary-mode response               |
//! +---------+----------------------+------------------------------------+
//! | N       | N#                   | "\n\r"                             |
//! | T       | T#                   | prompt ">" (switches to text mode) |
//! | V       | V#                   | version line ending "\n\r"         |
//! | o       | oAAAAAAAA,4#         | 1 byte                             |
//! | w       | wAAAAAAAA,4#         | 4 bytes, little-endian             |
//! | W       | WAAAAAAAA,VVVVVVVV#  | (none)                             |
//! | S       | SAAAAAAAA,LLLLLLLL#  | (none, followed by L raw bytes)    |
//! | R       | RAAAAAAAA,LLLLLLLL#  | L raw bytes                        |
//! | G       | GAAAAAAAA#           | (none, device leaves the monitor)  |
//! +---------+----------------------+------------------------------------+
//! ```
//!
//! In text mode every response ends with the `>` prompt and words are
//! printed as `0xVVVVVVVV`.
//!
//! Every operation is a full round trip: the request is written, then its
//! response (or its timeout) is resolved before the call returns. All
//! operations take `&mut self`, so a second command can never be issued
//! while one is outstanding.

use {
    crate::{
        error::{Error, ProtocolError, Result},
        port::Port,
    },
    byteorder::{ByteOrder, LittleEndian},
    log::{debug, info, trace, warn},
    std::{
        fmt,
        io::ErrorKind,
        thread,
        time::{Duration, Instant},
    },
};

/// Default baud rate for bootloader communication.
///
/// USB CDC ignores the line rate, but this is what SAM-BA hosts use
/// conventionally.
pub const DEFAULT_BAUD: u32 = 921_600;

/// Default window for the connect handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(2500);

/// Default window for a single command response.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(1000);

/// How long to wait for the optional acknowledgement of a mode switch.
const MODE_SWITCH_WINDOW: Duration = Duration::from_millis(200);

/// Pause between polls of an empty receive buffer.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Upper bound for a single `R`/`S` transfer.
pub const MAX_BLOCK_SIZE: usize = 4096;

/// Binary-mode line terminator.
const LINE_END: &[u8] = b"\n\r";

/// Text-mode prompt.
const PROMPT: &[u8] = b">";

/// Longest text response accepted before a frame is considered malformed.
const MAX_LINE: usize = 256;

/// Response framing negotiated on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolMode {
    /// Human-readable responses, the monitor's power-on default.
    #[default]
    Text,
    /// Raw binary responses.
    Binary,
}

/// A single monitor command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Switch to binary responses.
    SetBinary,
    /// Switch to text responses.
    SetText,
    /// Query the monitor version.
    Version,
    /// Read one byte.
    ReadByte(u32),
    /// Read one 32-bit word.
    ReadWord(u32),
    /// Write one 32-bit word.
    WriteWord(u32, u32),
    /// Send `len` bytes to memory; the payload follows the command.
    Send(u32, u32),
    /// Receive `len` bytes from memory.
    Receive(u32, u32),
    /// Jump to an address.
    Go(u32),
}

impl Command {
    /// Encode the command as sent on the wire.
    pub fn encode(&self) -> String {
        match *self {
            Self::SetBinary => "N#".to_string(),
            Self::SetText => "T#".to_string(),
            Self::Version => "V#".to_string(),
            Self::ReadByte(addr) => format!("o{addr:08X},4#"),
            Self::ReadWord(addr) => format!("w{addr:08X},4#"),
            Self::WriteWord(addr, value) => format!("W{addr:08X},{value:08X}#"),
            Self::Send(addr, len) => format!("S{addr:08X},{len:08X}#"),
            Self::Receive(addr, len) => format!("R{addr:08X},{len:08X}#"),
            Self::Go(addr) => format!("G{addr:08X}#"),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// SAM-BA client over an exclusively owned port.
///
/// The port is closed on [`disconnect`](Self::disconnect) or when the client
/// is dropped, whichever comes first.
pub struct SambaClient<P: Port> {
    port: Option<P>,
    name: String,
    mode: ProtocolMode,
    preferred_mode: ProtocolMode,
    version: Option<String>,
    handshake_timeout: Duration,
    response_timeout: Duration,
}

impl<P: Port> SambaClient<P> {
    /// Wrap an opened port. No traffic is exchanged until [`connect`](Self::connect).
    pub fn new(port: P) -> Self {
        let name = port
            .name()
            .to_string();
        Self {
            port: Some(port),
            name,
            mode: ProtocolMode::Text,
            preferred_mode: ProtocolMode::Binary,
            version: None,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            response_timeout: RESPONSE_TIMEOUT,
        }
    }

    /// Set the handshake window used by `connect`.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the per-command response window.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Select which response mode `connect` negotiates.
    #[must_use]
    pub fn with_mode(mut self, mode: ProtocolMode) -> Self {
        self.preferred_mode = mode;
        self
    }

    /// Currently negotiated response mode.
    pub fn mode(&self) -> ProtocolMode {
        self.mode
    }

    /// Monitor version string, once connected.
    pub fn version(&self) -> Option<&str> {
        self.version
            .as_deref()
    }

    /// Name of the underlying port.
    pub fn port_name(&self) -> &str {
        &self.name
    }

    /// Whether the port is still open.
    pub fn is_open(&self) -> bool {
        self.port
            .is_some()
    }

    /// Negotiate the response mode and confirm the monitor answers.
    pub fn connect(&mut self) -> Result<()> {
        debug!("Connecting to SAM-BA monitor on {}", self.name);
        self.port_mut()?
            .clear_buffers()?;

        let deadline = Instant::now() + self.handshake_timeout;
        match self.preferred_mode {
            ProtocolMode::Binary => {
                self.send(Command::SetBinary)?;
                self.mode = ProtocolMode::Binary;
                // Monitors already in binary mode stay silent here.
                let window = Instant::now() + MODE_SWITCH_WINDOW.min(self.handshake_timeout);
                if self
                    .read_until(LINE_END, window, Command::SetBinary)
                    .is_err()
                {
                    debug!("No acknowledgement for N#, continuing");
                }
            },
            ProtocolMode::Text => {
                self.send(Command::SetText)?;
                self.mode = ProtocolMode::Text;
                let window = Instant::now() + MODE_SWITCH_WINDOW.min(self.handshake_timeout);
                if self
                    .read_until(PROMPT, window, Command::SetText)
                    .is_err()
                {
                    debug!("No prompt after T#, continuing");
                }
            },
        }

        self.send(Command::Version)?;
        let version = self.read_version(deadline)?;
        info!("SAM-BA monitor on {}: {version}", self.name);
        self.version = Some(version);
        Ok(())
    }

    fn read_version(&mut self, deadline: Instant) -> Result<String> {
        let terminator = match self.mode {
            ProtocolMode::Binary => LINE_END,
            ProtocolMode::Text => PROMPT,
        };

        loop {
            let raw = self.read_until(terminator, deadline, Command::Version)?;
            let text = String::from_utf8_lossy(&raw);
            let line = text
                .trim_end_matches('>')
                .trim();
            // Late acknowledgements of the mode switch arrive as empty lines.
            if line.is_empty() {
                continue;
            }
            if !line
                .chars()
                .all(|c| c.is_ascii_graphic() || c == ' ')
            {
                return Err(ProtocolError::Malformed {
                    expected: "printable version string",
                    got: line.to_string(),
                }
                .into());
            }
            return Ok(line.to_string());
        }
    }

    /// Read one 32-bit word.
    pub fn read_word(&mut self, addr: u32) -> Result<u32> {
        let cmd = Command::ReadWord(addr);
        self.send(cmd)?;
        let deadline = self.response_deadline();

        let value = match self.mode {
            ProtocolMode::Binary => {
                let raw = self.read_exact(4, deadline, cmd)?;
                LittleEndian::read_u32(&raw)
            },
            ProtocolMode::Text => {
                let raw = self.read_until(PROMPT, deadline, cmd)?;
                parse_text_word(&raw)?
            },
        };

        trace!("[{addr:#010x}] -> {value:#010x}");
        Ok(value)
    }

    /// Read one byte.
    pub fn read_byte(&mut self, addr: u32) -> Result<u8> {
        let cmd = Command::ReadByte(addr);
        self.send(cmd)?;
        let deadline = self.response_deadline();

        match self.mode {
            ProtocolMode::Binary => Ok(self.read_exact(1, deadline, cmd)?[0]),
            ProtocolMode::Text => {
                let raw = self.read_until(PROMPT, deadline, cmd)?;
                let word = parse_text_word(&raw)?;
                u8::try_from(word).map_err(|_| {
                    ProtocolError::Malformed {
                        expected: "byte value",
                        got: format!("{word:#x}"),
                    }
                    .into()
                })
            },
        }
    }

    /// Write one 32-bit word.
    pub fn write_word(&mut self, addr: u32, value: u32) -> Result<()> {
        let cmd = Command::WriteWord(addr, value);
        trace!("[{addr:#010x}] <- {value:#010x}");
        self.send(cmd)?;

        // In binary mode the monitor does not acknowledge writes, and the
        // round trip is complete once the request has been flushed.
        if self.mode == ProtocolMode::Text {
            let deadline = self.response_deadline();
            self.read_until(PROMPT, deadline, cmd)?;
        }
        Ok(())
    }

    /// Read `len` bytes starting at `addr`.
    pub fn read_block(&mut self, addr: u32, len: u32) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len as usize);

        match self.mode {
            ProtocolMode::Binary => {
                let mut offset = 0u32;
                while offset < len {
                    // Safe cast: MAX_BLOCK_SIZE fits in u32
                    #[allow(clippy::cast_possible_truncation)]
                    let chunk = (len - offset).min(MAX_BLOCK_SIZE as u32);
                    let chunk_data = self.receive(addr.wrapping_add(offset), chunk)?;
                    out.extend_from_slice(&chunk_data);
                    offset += chunk;
                }
            },
            ProtocolMode::Text => {
                let mut word_addr = addr;
                while out.len() < len as usize {
                    let word = self.read_word(word_addr)?;
                    out.extend_from_slice(&word.to_le_bytes());
                    word_addr = word_addr.wrapping_add(4);
                }
                out.truncate(len as usize);
            },
        }

        Ok(out)
    }

    /// One bulk receive transfer.
    fn receive(&mut self, addr: u32, len: u32) -> Result<Vec<u8>> {
        // The monitor mishandles USB reads of powers of two above 32 bytes.
        // Fetch the first byte separately and the rest as an odd length.
        if len > 32 && len.is_power_of_two() {
            let first = self.read_byte(addr)?;
            let mut rest = self.receive(addr.wrapping_add(1), len - 1)?;
            rest.insert(0, first);
            return Ok(rest);
        }

        let cmd = Command::Receive(addr, len);
        self.send(cmd)?;
        let deadline = self.response_deadline();
        self.read_exact(len as usize, deadline, cmd)
    }

    /// Write `data` starting at `addr`.
    ///
    /// Text mode falls back to word writes; a trailing partial word is
    /// zero-padded.
    pub fn write_block(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        match self.mode {
            ProtocolMode::Binary => {
                let mut chunk_addr = addr;
                for chunk in data.chunks(MAX_BLOCK_SIZE) {
                    // Safe cast: chunk length is bounded by MAX_BLOCK_SIZE
                    #[allow(clippy::cast_possible_truncation)]
                    let len = chunk.len() as u32;
                    let cmd = Command::Send(chunk_addr, len);
                    self.send(cmd)?;
                    self.port_mut()?
                        .write_all_bytes(chunk)?;
                    trace!("Sent {len} bytes to {chunk_addr:#010x}");
                    chunk_addr = chunk_addr.wrapping_add(len);
                }
            },
            ProtocolMode::Text => {
                let mut word_addr = addr;
                for chunk in data.chunks(4) {
                    let mut word = [0u8; 4];
                    word[..chunk.len()].copy_from_slice(chunk);
                    self.write_word(word_addr, u32::from_le_bytes(word))?;
                    word_addr = word_addr.wrapping_add(4);
                }
            },
        }
        Ok(())
    }

    /// Jump to `addr`.
    ///
    /// The monitor gives up the link when it jumps, so a link-closed error
    /// here is reported as success.
    pub fn go(&mut self, addr: u32) -> Result<()> {
        match self.send(Command::Go(addr)) {
            Ok(()) => Ok(()),
            Err(e) if e.is_link_closed() => {
                debug!("Link closed while jumping to {addr:#010x}: {e}");
                Ok(())
            },
            Err(e) => Err(e),
        }
    }

    /// Release the link. Idempotent, never fails.
    pub fn disconnect(&mut self) {
        if let Some(mut port) = self
            .port
            .take()
        {
            if let Err(e) = port.close() {
                warn!("Failed to close {}: {e}", self.name);
            } else {
                debug!("Disconnected from {}", self.name);
            }
        }
        self.version = None;
        self.mode = ProtocolMode::Text;
    }

    fn port_mut(&mut self) -> Result<&mut P> {
        self.port
            .as_mut()
            .ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    ErrorKind::NotConnected,
                    "SAM-BA link is closed",
                ))
            })
    }

    fn response_deadline(&self) -> Instant {
        Instant::now() + self.response_timeout
    }

    fn send(&mut self, cmd: Command) -> Result<()> {
        let data = cmd.encode();
        trace!("-> {data}");
        self.port_mut()?
            .write_all_bytes(data.as_bytes())
    }

    /// Read one chunk, mapping "nothing yet" to `Ok(0)`.
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self
            .port_mut()?
            .read(buf)
        {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(0)
            },
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn read_exact(&mut self, len: usize, deadline: Instant, cmd: Command) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        let mut filled = 0;

        while filled < len {
            let n = self.read_some(&mut out[filled..])?;
            if n == 0 {
                if Instant::now() >= deadline {
                    return Err(incomplete(cmd, &out[..filled]));
                }
                thread::sleep(POLL_INTERVAL);
            }
            filled += n;
        }

        Ok(out)
    }

    fn read_until(&mut self, terminator: &[u8], deadline: Instant, cmd: Command) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            if self.read_some(&mut byte)? == 1 {
                out.push(byte[0]);
                if out.ends_with(terminator) {
                    out.truncate(out.len() - terminator.len());
                    return Ok(out);
                }
                if out.len() > MAX_LINE {
                    return Err(ProtocolError::Malformed {
                        expected: "terminated response line",
                        got: String::from_utf8_lossy(&out).into_owned(),
                    }
                    .into());
                }
            } else if Instant::now() >= deadline {
                return Err(incomplete(cmd, &out));
            } else {
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

impl<P: Port> Drop for SambaClient<P> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Classify a response cut short by the deadline.
fn incomplete(cmd: Command, partial: &[u8]) -> Error {
    if partial.is_empty() {
        ProtocolError::Unresponsive {
            what: cmd.encode(),
        }
        .into()
    } else {
        ProtocolError::Malformed {
            expected: "complete response",
            got: String::from_utf8_lossy(partial).into_owned(),
        }
        .into()
    }
}

/// Parse a text-mode word response (`0xVVVVVVVV`).
fn parse_text_word(raw: &[u8]) -> Result<u32> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    let malformed = || ProtocolError::Malformed {
        expected: "0x-prefixed hex word",
        got: trimmed.to_string(),
    };

    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(malformed)?;
    if hex.is_empty() || hex.len() > 8 {
        return Err(malformed().into());
    }
    u32::from_str_radix(hex, 16).map_err(|_| malformed().into())
}
