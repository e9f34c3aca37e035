//! Simulated SAM-BA target for integration tests.
//!
//! Models the monitor command parser, the DSU DID register, and NVMCTRL with
//! its page buffer, row erase, READY flag and a flash array. A shared bus
//! records port opens/closes and DTR traffic, and re-enumerates the board
//! under a new name when it sees a 1200-baud touch.

#![allow(dead_code)]

use samflash::{
    Error, Port, PortInfo, PortProvider, PollConfig, Result, SerialConfig, SessionConfig,
    TouchConfig,
};
use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

pub const SAMD21_DID: u32 = 0x1001_0305;
pub const SAMD51_DID: u32 = 0x6006_0300;
pub const APP_OFFSET: u32 = 0x2000;
pub const FLASH_SIZE: usize = 262_144;
pub const PAGE_SIZE: usize = 64;
pub const ROW_SIZE: usize = PAGE_SIZE * 4;

pub const APP_PORT: &str = "/dev/ttyACM0";
pub const BOOT_PORT: &str = "/dev/ttyACM1";

const DID_ADDR: u32 = 0x4100_2018;
const NVM_CTRLA: u32 = 0x4100_4000;
const NVM_CTRLB: u32 = 0x4100_4004;
const NVM_PARAM: u32 = 0x4100_4008;
const NVM_INTFLAG: u32 = 0x4100_4014;
const NVM_STATUS: u32 = 0x4100_4018;
const NVM_ADDR: u32 = 0x4100_401C;

const STATUS_PROGE: u32 = 1 << 2;
const STATUS_LOCKE: u32 = 1 << 3;
const STATUS_ERRORS: u32 = 0x1C;

const VERSION: &str = "v1.1 [Arduino:XYZ] Mar  5 2016 17:40:18";

/// NVMCTRL and flash model.
pub struct Nvm {
    pub flash: Vec<u8>,
    page_buffer: Vec<u8>,
    pub ctrlb: u32,
    pub status: u32,
    pub addr: u32,
    busy: u32,
    stalled: bool,
    /// INTFLAG reads reporting busy after each command.
    pub busy_polls: u32,
    /// Command code that never completes.
    pub stuck_command: Option<u8>,
    /// Make every page write fail with PROGE.
    pub fail_writes: bool,
    /// PARAM register: PSZ in bits 18:16, NVMP in bits 15:0.
    pub param: u32,
    /// Row start addresses of every ER command, protected or not.
    pub erase_commands: Vec<u32>,
    /// Page start addresses of every WP command.
    pub write_commands: Vec<u32>,
}

impl Nvm {
    fn new() -> Self {
        Self {
            flash: vec![0xFF; FLASH_SIZE],
            page_buffer: vec![0xFF; PAGE_SIZE],
            ctrlb: 0,
            status: 0,
            addr: 0,
            busy: 0,
            stalled: false,
            busy_polls: 2,
            stuck_command: None,
            fail_writes: false,
            param: (3 << 16) | (FLASH_SIZE / PAGE_SIZE) as u32,
            erase_commands: Vec::new(),
            write_commands: Vec::new(),
        }
    }

    fn execute(&mut self, cmd: u8) {
        let byte_addr = (self.addr * 2) as usize;
        match cmd {
            0x02 => {
                let start = byte_addr / ROW_SIZE * ROW_SIZE;
                self.erase_commands.push(start as u32);
                if start < APP_OFFSET as usize {
                    self.status |= STATUS_LOCKE;
                } else if start < FLASH_SIZE {
                    self.flash[start..start + ROW_SIZE].fill(0xFF);
                }
            },
            0x04 => {
                let start = byte_addr / PAGE_SIZE * PAGE_SIZE;
                self.write_commands.push(start as u32);
                if self.fail_writes || start < APP_OFFSET as usize {
                    self.status |= STATUS_PROGE;
                } else if start < FLASH_SIZE {
                    for (cell, buffered) in self.flash[start..start + PAGE_SIZE]
                        .iter_mut()
                        .zip(&self.page_buffer)
                    {
                        *cell &= *buffered;
                    }
                }
            },
            0x44 => self.page_buffer.fill(0xFF),
            _ => self.status |= STATUS_PROGE,
        }
        self.busy = self.busy_polls;
        self.stalled = self.stuck_command == Some(cmd);
    }

    fn intflag(&mut self) -> u32 {
        if self.stalled {
            return 0;
        }
        if self.busy > 0 {
            self.busy -= 1;
            return 0;
        }
        let error = if self.status & STATUS_ERRORS != 0 { 2 } else { 0 };
        1 | error
    }

    fn read_word(&mut self, addr: u32) -> u32 {
        match addr {
            DID_ADDR => 0,
            NVM_CTRLB => self.ctrlb,
            NVM_PARAM => self.param,
            NVM_INTFLAG => self.intflag(),
            NVM_STATUS => self.status,
            NVM_ADDR => self.addr,
            a if (a as usize) + 4 <= FLASH_SIZE => {
                let i = a as usize;
                u32::from_le_bytes([
                    self.flash[i],
                    self.flash[i + 1],
                    self.flash[i + 2],
                    self.flash[i + 3],
                ])
            },
            _ => 0,
        }
    }

    fn write_word(&mut self, addr: u32, value: u32) {
        match addr {
            NVM_CTRLA => {
                if value & 0xFF00 == 0xA500 {
                    self.execute((value & 0x7F) as u8);
                }
            },
            NVM_CTRLB => self.ctrlb = value,
            NVM_STATUS => self.status &= !value,
            NVM_ADDR => self.addr = value,
            a if (a as usize) < FLASH_SIZE => {
                for (i, b) in value
                    .to_le_bytes()
                    .iter()
                    .enumerate()
                {
                    self.write_byte(a + i as u32, *b);
                }
            },
            _ => {},
        }
    }

    fn write_byte(&mut self, addr: u32, value: u8) {
        if (addr as usize) < FLASH_SIZE {
            self.page_buffer[addr as usize % PAGE_SIZE] = value;
        }
    }

    fn read_byte(&self, addr: u32) -> u8 {
        self.flash
            .get(addr as usize)
            .copied()
            .unwrap_or(0)
    }
}

/// Everything observable on the simulated bus.
pub struct SimState {
    pub did: u32,
    pub nvm: Nvm,
    pub ports: Vec<PortInfo>,
    /// Port name the monitor answers on.
    pub bootloader_port: String,
    /// Whether the monitor is running.
    pub in_bootloader: bool,
    /// Monitor ignores everything even when running.
    pub bootloader_silent: bool,
    /// Monitor is in text mode (its power-on default).
    pub text_mode: bool,
    pub touch_enters_bootloader: bool,
    pub refuse_touch_open: bool,
    /// Failed reads before each response is released.
    pub response_delay: u32,
    pub opens: Vec<(String, u32)>,
    pub open_ports: i32,
    pub dtr_log: Vec<bool>,
    pub commands: Vec<String>,
    pub send_commands: u32,
    pub jumped_to: Option<u32>,
    /// Writes issued while a response was still unread.
    pub violations: u32,
    /// Every port close reports an error, after releasing the port.
    pub fail_close: bool,
    pub close_errors: u32,
}

impl SimState {
    fn new(did: u32) -> Self {
        Self {
            did,
            nvm: Nvm::new(),
            ports: Vec::new(),
            bootloader_port: BOOT_PORT.to_string(),
            in_bootloader: false,
            bootloader_silent: false,
            text_mode: true,
            touch_enters_bootloader: true,
            refuse_touch_open: false,
            response_delay: 0,
            opens: Vec::new(),
            open_ports: 0,
            dtr_log: Vec::new(),
            commands: Vec::new(),
            send_commands: 0,
            jumped_to: None,
            violations: 0,
            fail_close: false,
            close_errors: 0,
        }
    }

    /// Commands that change flash contents.
    pub fn flash_traffic(&self) -> usize {
        self.nvm
            .erase_commands
            .len()
            + self
                .nvm
                .write_commands
                .len()
            + self.send_commands as usize
    }

    fn touched(&mut self) {
        if !self.touch_enters_bootloader {
            return;
        }
        self.in_bootloader = true;
        self.text_mode = true;
        self.ports
            .retain(|p| p.name != APP_PORT);
        if !self
            .ports
            .iter()
            .any(|p| p.name == self.bootloader_port)
        {
            self.ports
                .push(usb_port(&self.bootloader_port, 0x2341, 0x004D));
        }
    }
}

pub fn usb_port(name: &str, vid: u16, pid: u16) -> PortInfo {
    PortInfo {
        name: name.to_string(),
        vid: Some(vid),
        pid: Some(pid),
        product: Some("Arduino Zero".to_string()),
        ..Default::default()
    }
}

/// Shared handle to the simulated bus.
#[derive(Clone)]
pub struct Sim(Arc<Mutex<SimState>>);

/// Route library logs through the test harness; `RUST_LOG=trace` shows the
/// command traffic of a failing test.
pub fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .try_init();
}

impl Sim {
    /// Board already running its bootloader on [`BOOT_PORT`].
    pub fn bootloader(did: u32) -> Self {
        init_logging();
        let mut state = SimState::new(did);
        state.in_bootloader = true;
        state
            .ports
            .push(usb_port(BOOT_PORT, 0x2341, 0x004D));
        Self(Arc::new(Mutex::new(state)))
    }

    /// Board running its application on [`APP_PORT`].
    pub fn application(did: u32) -> Self {
        init_logging();
        let mut state = SimState::new(did);
        state
            .ports
            .push(usb_port(APP_PORT, 0x2341, 0x804D));
        Self(Arc::new(Mutex::new(state)))
    }

    pub fn lock(&self) -> MutexGuard<'_, SimState> {
        self.0
            .lock()
            .unwrap()
    }

    pub fn provider(&self) -> SimProvider {
        SimProvider {
            sim: self.clone(),
        }
    }

    /// Open the bootloader port directly, bypassing the provider.
    pub fn open_port(&self, name: &str) -> SimPort {
        let mut state = self.lock();
        state
            .opens
            .push((name.to_string(), 921_600));
        state.open_ports += 1;
        drop(state);
        SimPort::new(self.clone(), name, 921_600)
    }
}

pub struct SimProvider {
    pub sim: Sim,
}

impl PortProvider for SimProvider {
    type Port = SimPort;

    fn open(&mut self, config: &SerialConfig) -> Result<SimPort> {
        let mut state = self.sim.lock();
        if !state
            .ports
            .iter()
            .any(|p| p.name == config.port_name)
        {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not present", config.port_name),
            )));
        }
        if config.baud_rate == 1200 && state.refuse_touch_open {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "busy",
            )));
        }
        state
            .opens
            .push((config.port_name.clone(), config.baud_rate));
        state.open_ports += 1;
        drop(state);
        Ok(SimPort::new(
            self.sim.clone(),
            &config.port_name,
            config.baud_rate,
        ))
    }

    fn list_ports(&mut self) -> Result<Vec<PortInfo>> {
        Ok(self
            .sim
            .lock()
            .ports
            .clone())
    }
}

pub struct SimPort {
    sim: Sim,
    name: String,
    baud: u32,
    open: bool,
    dtr: Vec<bool>,
    rx: VecDeque<u8>,
    cmd: Vec<u8>,
    payload: Option<(u32, u32)>,
    stall: u32,
}

impl SimPort {
    fn new(sim: Sim, name: &str, baud: u32) -> Self {
        Self {
            sim,
            name: name.to_string(),
            baud,
            open: true,
            dtr: Vec::new(),
            rx: VecDeque::new(),
            cmd: Vec::new(),
            payload: None,
            stall: 0,
        }
    }

    fn answering(&self, state: &SimState) -> bool {
        state.in_bootloader
            && !state.bootloader_silent
            && self.baud != 1200
            && self.name == state.bootloader_port
    }

    fn handle(&mut self, state: &mut SimState) {
        let raw = String::from_utf8_lossy(&self.cmd).into_owned();
        self.cmd.clear();
        let text = raw.trim_end_matches('#');
        state
            .commands
            .push(raw.clone());

        let Some(op) = text.chars().next() else {
            return;
        };
        let args: Vec<u32> = text[1..]
            .split(',')
            .filter(|a| !a.is_empty())
            .filter_map(|a| u32::from_str_radix(a, 16).ok())
            .collect();
        let arg = |i: usize| args.get(i).copied().unwrap_or(0);

        let response: Vec<u8> = match op {
            'N' => {
                state.text_mode = false;
                b"\n\r".to_vec()
            },
            'T' => {
                state.text_mode = true;
                b"\n\r>".to_vec()
            },
            'V' => {
                let mut line = format!("{VERSION}\n\r").into_bytes();
                if state.text_mode {
                    line.push(b'>');
                }
                line
            },
            'w' => {
                let value = if arg(0) == DID_ADDR {
                    state.did
                } else {
                    state.nvm.read_word(arg(0))
                };
                if state.text_mode {
                    format!("\n\r0x{value:08X}\n\r>").into_bytes()
                } else {
                    value.to_le_bytes().to_vec()
                }
            },
            'o' => {
                let value = state.nvm.read_byte(arg(0));
                if state.text_mode {
                    format!("\n\r0x{value:02X}\n\r>").into_bytes()
                } else {
                    vec![value]
                }
            },
            'W' => {
                state.nvm.write_word(arg(0), arg(1));
                if state.text_mode { b"\n\r>".to_vec() } else { Vec::new() }
            },
            'S' => {
                state.send_commands += 1;
                if arg(1) > 0 {
                    self.payload = Some((arg(0), arg(1)));
                }
                Vec::new()
            },
            'R' => (0..arg(1))
                .map(|i| state.nvm.read_byte(arg(0) + i))
                .collect(),
            'G' => {
                state.jumped_to = Some(arg(0));
                state.in_bootloader = false;
                Vec::new()
            },
            _ => Vec::new(),
        };

        if !response.is_empty() {
            self.rx.extend(response);
            self.stall = state.response_delay;
        }
    }
}

impl io::Read for SimPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
        }
        if self.stall > 0 {
            self.stall -= 1;
            return Err(io::Error::new(io::ErrorKind::TimedOut, "delayed"));
        }
        if self.rx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.rx.len());
        for b in buf.iter_mut().take(n) {
            *b = self.rx.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl io::Write for SimPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
        }
        let sim = self.sim.clone();
        let mut state = sim.lock();
        if !self.answering(&state) {
            return Ok(buf.len());
        }
        if !self.rx.is_empty() {
            state.violations += 1;
        }
        for &byte in buf {
            if let Some((addr, remaining)) = self.payload {
                state.nvm.write_byte(addr, byte);
                self.payload = (remaining > 1).then_some((addr + 1, remaining - 1));
                continue;
            }
            self.cmd.push(byte);
            if byte == b'#' {
                self.handle(&mut state);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SimPort {
    fn set_timeout(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(1)
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.baud = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.rx.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.dtr.push(level);
        self.sim.lock().dtr_log.push(level);
        Ok(())
    }

    fn set_rts(&mut self, _level: bool) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let mut state = self.sim.lock();
        state.open_ports -= 1;
        if self.baud == 1200 && self.dtr.contains(&true) && self.dtr.last() == Some(&false) {
            state.touched();
        }
        if state.fail_close {
            state.close_errors += 1;
            return Err(Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "close failed")));
        }
        Ok(())
    }
}

impl Drop for SimPort {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Session configuration with every delay removed.
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        touch: TouchConfig {
            baud: 1200,
            signal_delay: Duration::ZERO,
            settle: Duration::ZERO,
        },
        handshake_timeout: Duration::from_millis(100),
        response_timeout: Duration::from_millis(100),
        poll: fast_poll(),
        ..Default::default()
    }
}

pub fn fast_poll() -> PollConfig {
    PollConfig {
        max_polls: 50,
        interval: Duration::ZERO,
    }
}

/// Observer recording everything it sees.
#[derive(Default)]
pub struct Recorder {
    pub status: Vec<String>,
    pub progress: Vec<(u32, u32)>,
}

impl samflash::Observer for Recorder {
    fn on_status(&mut self, message: &str) {
        self.status.push(message.to_string());
    }

    fn on_progress(&mut self, current: u32, total: u32) {
        self.progress.push((current, total));
    }
}

/// Deterministic test image.
pub fn image(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i * 7 + i / 256) as u8)
        .collect()
}
