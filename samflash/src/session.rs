//! End-to-end flashing pipeline.
//!
//! ```text
//! probe ──ok──────────────────────────────┐
//!   │                                     v
//!   └─unresponsive─> touch ─> discover ─> connect ─> identify ─> size check
//!                                                                    │
//!            start_application <─ verify <─ write <─ erase <─────────┘
//! ```
//!
//! [`Session`] owns at most one open [`SambaClient`]. It is released before
//! every public operation returns, on success and on error alike.

use {
    crate::{
        discovery::default_allow_list,
        error::{DeviceError, Error, FlashError, Result},
        observer::Observer,
        port::{PortProvider, SerialConfig},
        protocol::{DEFAULT_BAUD, HANDSHAKE_TIMEOUT, ProtocolMode, RESPONSE_TIMEOUT, SambaClient},
        reset::{PortSelector, TouchConfig, discover_bootloader_port, reset_to_bootloader},
        target::{Device, Flasher, PollConfig},
    },
    log::{debug, info},
    std::{path::Path, time::Duration},
};

/// Read timeout of the underlying port. Response windows are enforced by
/// the client on top of it.
const PORT_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Baud rate for bootloader communication.
    pub bootloader_baud: u32,
    /// 1200-baud touch timing.
    pub touch: TouchConfig,
    /// Vendor IDs treated as bootloader-capable during discovery.
    pub allow_list: Vec<u16>,
    /// Window for the connect handshake.
    pub handshake_timeout: Duration,
    /// Window for each command response.
    pub response_timeout: Duration,
    /// Response mode negotiated on connect.
    pub protocol_mode: ProtocolMode,
    /// Controller poll budget.
    pub poll: PollConfig,
    /// Read the image back after writing.
    pub verify: bool,
    /// Jump to the application after flashing.
    pub reset_after: bool,
    /// Image offset relative to the application start.
    pub offset: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bootloader_baud: DEFAULT_BAUD,
            touch: TouchConfig::default(),
            allow_list: default_allow_list(),
            handshake_timeout: HANDSHAKE_TIMEOUT,
            response_timeout: RESPONSE_TIMEOUT,
            protocol_mode: ProtocolMode::Binary,
            poll: PollConfig::default(),
            verify: true,
            reset_after: true,
            offset: 0,
        }
    }
}

/// Raw firmware image, written verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Wrap raw bytes.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
        }
    }

    /// Load a raw binary file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path)?;
        Ok(Self {
            data,
        })
    }

    /// Image bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.data
            .len()
    }

    /// Whether the image is empty.
    pub fn is_empty(&self) -> bool {
        self.data
            .is_empty()
    }
}

/// Result of a completed flashing pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashOutcome {
    /// The image was written (and verified, if enabled).
    Flashed {
        /// The programmed device.
        device: Device,
        /// Bytes written.
        bytes: u32,
    },
    /// The operator declined port selection. Nothing was written.
    Cancelled,
}

/// Explicit flashing context owned by the caller.
pub struct Session<P: PortProvider> {
    provider: P,
    config: SessionConfig,
    client: Option<SambaClient<P::Port>>,
    device: Option<Device>,
}

impl<P: PortProvider> Session<P> {
    /// Create a session. No port is opened yet.
    pub fn new(provider: P, config: SessionConfig) -> Self {
        Self {
            provider,
            config,
            client: None,
            device: None,
        }
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Device resolved on the open connection.
    pub fn device(&self) -> Option<&Device> {
        self.device
            .as_ref()
    }

    /// Whether a connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.client
            .is_some()
    }

    /// Run the full pipeline for `image`.
    ///
    /// `port_name` is probed first when given; otherwise the port is
    /// discovered. A declined selection prompt is [`FlashOutcome::Cancelled`].
    pub fn flash<S>(
        &mut self,
        port_name: Option<&str>,
        image: &FirmwareImage,
        selector: &mut S,
        observer: &mut dyn Observer,
    ) -> Result<FlashOutcome>
    where
        S: PortSelector + ?Sized,
    {
        let result = self.run_flash(port_name, image, selector, observer);
        self.close();

        match result {
            Err(Error::UserCancelled) => {
                info!("Port selection cancelled");
                observer.on_status("Cancelled");
                Ok(FlashOutcome::Cancelled)
            },
            other => other,
        }
    }

    /// Connect, identify and disconnect.
    pub fn identify<S>(&mut self, port_name: Option<&str>, selector: &mut S) -> Result<Device>
    where
        S: PortSelector + ?Sized,
    {
        let result = self.connect(port_name, selector, &mut crate::observer::NullObserver);
        self.close();
        result
    }

    /// Read `len` bytes of flash at absolute address `offset`.
    pub fn read_flash<S>(
        &mut self,
        port_name: Option<&str>,
        offset: u32,
        len: u32,
        selector: &mut S,
        observer: &mut dyn Observer,
    ) -> Result<Vec<u8>>
    where
        S: PortSelector + ?Sized,
    {
        let result = self.run_read(port_name, offset, len, selector, observer);
        self.close();
        result
    }

    /// Release the connection, if any. Never fails.
    pub fn close(&mut self) {
        if let Some(mut client) = self
            .client
            .take()
        {
            client.disconnect();
        }
        self.device = None;
    }

    fn run_flash<S>(
        &mut self,
        port_name: Option<&str>,
        image: &FirmwareImage,
        selector: &mut S,
        observer: &mut dyn Observer,
    ) -> Result<FlashOutcome>
    where
        S: PortSelector + ?Sized,
    {
        if image.is_empty() {
            return Err(FlashError::EmptyImage.into());
        }
        let device = self.connect(port_name, selector, observer)?;

        let offset = self.config.offset;
        let available = device.available(offset);
        let bytes = u32::try_from(image.len()).unwrap_or(u32::MAX);
        let too_large = FlashError::ImageTooLarge {
            size: bytes,
            available,
        };
        if bytes > available {
            return Err(too_large.into());
        }
        let addr = device
            .application_offset()
            .checked_add(offset)
            .ok_or(too_large)?;

        let poll = self.config.poll;
        let verify = self.config.verify;
        let client = self.client_mut()?;
        {
            let mut flasher = Flasher::new(client, device)?.with_poll_config(poll);
            flasher.erase(addr, bytes, observer)?;
            flasher.write(image.as_bytes(), addr, observer)?;
            if verify {
                flasher.verify(image.as_bytes(), addr, observer)?;
            }
        }

        if self.config.reset_after {
            observer.on_status("Starting application");
            let client = self.client_mut()?;
            device.start_application(client)?;
        }

        info!("Flashed {bytes} bytes to {device}");
        Ok(FlashOutcome::Flashed {
            device,
            bytes,
        })
    }

    fn run_read<S>(
        &mut self,
        port_name: Option<&str>,
        offset: u32,
        len: u32,
        selector: &mut S,
        observer: &mut dyn Observer,
    ) -> Result<Vec<u8>>
    where
        S: PortSelector + ?Sized,
    {
        let device = self.connect(port_name, selector, observer)?;
        let poll = self.config.poll;
        let client = self.client_mut()?;
        Flasher::new(client, device)?
            .with_poll_config(poll)
            .read(offset, len, observer)
    }

    /// Establish a connection and resolve the device.
    fn connect<S>(
        &mut self,
        port_name: Option<&str>,
        selector: &mut S,
        observer: &mut dyn Observer,
    ) -> Result<Device>
    where
        S: PortSelector + ?Sized,
    {
        self.close();
        observer.on_status("Connecting to bootloader");
        self.connect_with_reset(port_name, selector)?;

        if let Some(client) = &self.client {
            let version = client
                .version()
                .unwrap_or("unknown");
            observer.on_status(&format!("Connected to {} ({version})", client.port_name()));
        }

        let device = Device::identify(self.client_mut()?)?;
        observer.on_status(&format!("Found {device}"));
        self.device = Some(device);
        Ok(device)
    }

    fn connect_with_reset<S>(&mut self, port_name: Option<&str>, selector: &mut S) -> Result<()>
    where
        S: PortSelector + ?Sized,
    {
        let probe_name = match port_name {
            Some(name) => name.to_string(),
            None => {
                discover_bootloader_port(&mut self.provider, &self.config.allow_list, selector)?
                    .name
            },
        };

        match self.open(&probe_name) {
            Ok(()) => return Ok(()),
            Err(Error::Interrupted) => return Err(Error::Interrupted),
            Err(e) => debug!("Probe of {probe_name} failed: {e}"),
        }

        info!("{probe_name} is not in bootloader mode, resetting");
        if !reset_to_bootloader(&mut self.provider, &probe_name, &self.config.touch) {
            debug!("Touch skipped, device may already be in its bootloader");
        }

        let port = discover_bootloader_port(&mut self.provider, &self.config.allow_list, selector)?;
        self.open(&port.name)
    }

    /// Open and handshake; the port is closed again if the handshake fails.
    fn open(&mut self, port_name: &str) -> Result<()> {
        self.close();
        crate::check_interrupted()?;

        let serial = SerialConfig::new(port_name, self.config.bootloader_baud)
            .with_timeout(PORT_READ_TIMEOUT);
        let port = self
            .provider
            .open(&serial)?;

        let mut client = SambaClient::new(port)
            .with_handshake_timeout(self.config.handshake_timeout)
            .with_response_timeout(self.config.response_timeout)
            .with_mode(self.config.protocol_mode);

        if let Err(e) = client.connect() {
            client.disconnect();
            return Err(e);
        }
        self.client = Some(client);
        Ok(())
    }

    fn client_mut(&mut self) -> Result<&mut SambaClient<P::Port>> {
        self.client
            .as_mut()
            .ok_or_else(|| DeviceError::NotIdentified.into())
    }
}
