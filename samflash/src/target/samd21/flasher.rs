//! SAMD21-family flash engine.
//!
//! Erases rows and programs pages through NVMCTRL, driving the controller
//! with SAM-BA word writes and polling it with word reads. Every address
//! handed to the engine is absolute; the caller adds the application offset.

use {
    super::nvm::{self, NvmCommand, Ready},
    crate::{
        check_interrupted,
        error::{DeviceError, FlashError, Result},
        observer::Observer,
        port::Port,
        protocol::{MAX_BLOCK_SIZE, SambaClient},
        target::Device,
    },
    log::{debug, info, trace},
    std::time::Duration,
};

/// Default number of READY polls per erase or page write.
pub const DEFAULT_MAX_POLLS: u32 = 5000;

/// Controller poll budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Maximum READY polls per command.
    pub max_polls: u32,
    /// Pause between polls. Each poll is already a full USB round trip.
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_polls: DEFAULT_MAX_POLLS,
            interval: Duration::ZERO,
        }
    }
}

/// Flash engine bound to one connection and one identified device.
pub struct Flasher<'a, P: Port> {
    client: &'a mut SambaClient<P>,
    device: Device,
    poll: PollConfig,
}

impl<'a, P: Port> Flasher<'a, P> {
    /// Create a flasher for `device`.
    ///
    /// Families known only for their geometry are refused.
    pub fn new(client: &'a mut SambaClient<P>, device: Device) -> Result<Self> {
        if !device
            .family()
            .is_programmable()
        {
            return Err(DeviceError::GeometryOnly {
                family: device
                    .family()
                    .to_string(),
            }
            .into());
        }
        Ok(Self {
            client,
            device,
            poll: PollConfig::default(),
        })
    }

    /// Override the poll budget.
    #[must_use]
    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// The device being programmed.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Erase the rows covering `[offset, offset + len)`.
    pub fn erase(&mut self, offset: u32, len: u32, observer: &mut dyn Observer) -> Result<()> {
        let flash = self
            .device
            .flash_descriptor();
        let row = flash.row_size();

        self.check_protected(offset)?;
        if offset % row != 0 {
            return Err(FlashError::UnalignedOffset {
                offset,
                alignment: row,
            }
            .into());
        }
        let span = flash.align_to_row(len);
        self.check_fits(offset, len, span)?;

        if span == 0 {
            observer.on_status("Nothing to erase");
            return Ok(());
        }

        let rows = span / row;
        observer.on_status(&format!("Erasing {rows} rows at {offset:#010x}"));
        info!("Erasing {span} bytes ({rows} rows) at {offset:#010x}");

        nvm::clear_errors(self.client)?;
        for addr in (offset..offset + span).step_by(row as usize) {
            check_interrupted()?;
            debug!("Erasing row at {addr:#010x}");

            nvm::set_address(self.client, addr)?;
            nvm::command(self.client, NvmCommand::EraseRow)?;
            match nvm::wait_ready(self.client, self.poll.max_polls, self.poll.interval)? {
                Ready::Ok => {},
                Ready::Failed(status) => return Err(FlashError::Controller { status }.into()),
                Ready::TimedOut => {
                    return Err(FlashError::EraseTimeout {
                        address: addr,
                    }
                    .into());
                },
            }
            self.check_status()?;
        }

        observer.on_status("Erase complete");
        Ok(())
    }

    /// Program `data` at `offset`, one page at a time.
    ///
    /// The final partial page is zero-padded.
    pub fn write(&mut self, data: &[u8], offset: u32, observer: &mut dyn Observer) -> Result<()> {
        let flash = self
            .device
            .flash_descriptor();
        let page = flash.page_size;
        let len = image_len(data, flash.total_size.saturating_sub(offset))?;

        // Size first: an oversized image must not touch the controller.
        self.check_fits(offset, len, len)?;
        self.check_protected(offset)?;
        if offset % page != 0 {
            return Err(FlashError::UnalignedOffset {
                offset,
                alignment: page,
            }
            .into());
        }

        if len == 0 {
            observer.on_progress(0, 0);
            return Ok(());
        }

        observer.on_status(&format!("Writing {len} bytes at {offset:#010x}"));
        info!("Writing {len} bytes at {offset:#010x}");

        nvm::enable_manual_write(self.client)?;
        nvm::clear_errors(self.client)?;

        let mut buffer = vec![0u8; page as usize];
        let mut done = 0u32;
        let mut addr = offset;

        for chunk in data.chunks(page as usize) {
            check_interrupted()?;
            trace!("Writing page at {addr:#010x}");

            buffer.fill(0);
            buffer[..chunk.len()].copy_from_slice(chunk);

            nvm::command(self.client, NvmCommand::PageBufferClear)?;
            self.wait_write_ready(addr)?;

            self.client
                .write_block(addr, &buffer)?;

            nvm::set_address(self.client, addr)?;
            nvm::command(self.client, NvmCommand::WritePage)?;
            self.wait_write_ready(addr)?;
            self.check_status()?;

            // Safe cast: chunk length is bounded by the page size
            #[allow(clippy::cast_possible_truncation)]
            let written = chunk.len() as u32;
            done = (done + written).min(len);
            addr += page;
            observer.on_progress(done, len);
        }

        observer.on_status("Write complete");
        Ok(())
    }

    /// Read back `[offset, offset + data.len())` and compare.
    pub fn verify(&mut self, data: &[u8], offset: u32, observer: &mut dyn Observer) -> Result<()> {
        let total = self
            .device
            .flash_descriptor()
            .total_size;
        let len = image_len(data, total.saturating_sub(offset))?;
        self.check_fits(offset, len, len)?;

        observer.on_status(&format!("Verifying {len} bytes"));
        let mut addr = offset;
        for expected in data.chunks(MAX_BLOCK_SIZE) {
            check_interrupted()?;
            // Safe cast: chunk length is bounded by MAX_BLOCK_SIZE
            #[allow(clippy::cast_possible_truncation)]
            let chunk_len = expected.len() as u32;
            let actual = self
                .client
                .read_block(addr, chunk_len)?;

            if let Some(pos) = expected
                .iter()
                .zip(&actual)
                .position(|(a, b)| a != b)
            {
                // Safe cast: pos < chunk_len
                #[allow(clippy::cast_possible_truncation)]
                let address = addr + pos as u32;
                return Err(FlashError::VerifyMismatch { address }.into());
            }
            addr += chunk_len;
        }

        observer.on_status("Verify OK");
        Ok(())
    }

    /// Read `len` bytes of flash starting at `offset`.
    pub fn read(&mut self, offset: u32, len: u32, observer: &mut dyn Observer) -> Result<Vec<u8>> {
        self.check_fits(offset, len, len)?;

        let mut out = Vec::with_capacity(len as usize);
        observer.on_status(&format!("Reading {len} bytes at {offset:#010x}"));
        while (out.len() as u64) < u64::from(len) {
            check_interrupted()?;
            // Safe cast: out.len() < len
            #[allow(clippy::cast_possible_truncation)]
            let done = out.len() as u32;
            // Safe cast: MAX_BLOCK_SIZE fits in u32
            #[allow(clippy::cast_possible_truncation)]
            let chunk = (len - done).min(MAX_BLOCK_SIZE as u32);
            let data = self
                .client
                .read_block(offset + done, chunk)?;
            out.extend_from_slice(&data);
            observer.on_progress(done + chunk, len);
        }
        if len == 0 {
            observer.on_progress(0, 0);
        }
        Ok(out)
    }

    fn check_protected(&self, offset: u32) -> Result<()> {
        let start = self
            .device
            .application_offset();
        if offset < start {
            return Err(FlashError::ProtectedRegion {
                address: offset,
                start,
            }
            .into());
        }
        Ok(())
    }

    /// Refuse `span` bytes at `offset` past the end of flash.
    fn check_fits(&self, offset: u32, len: u32, span: u32) -> Result<()> {
        let total = self
            .device
            .flash_descriptor()
            .total_size;
        if offset
            .checked_add(span)
            .is_none_or(|end| end > total)
        {
            return Err(FlashError::ImageTooLarge {
                size: len,
                available: total.saturating_sub(offset),
            }
            .into());
        }
        Ok(())
    }

    fn wait_write_ready(&mut self, addr: u32) -> Result<()> {
        match nvm::wait_ready(self.client, self.poll.max_polls, self.poll.interval)? {
            Ready::Ok => Ok(()),
            Ready::Failed(status) => Err(FlashError::Controller { status }.into()),
            Ready::TimedOut => Err(FlashError::WriteTimeout { address: addr }.into()),
        }
    }

    fn check_status(&mut self) -> Result<()> {
        let status = nvm::errors(self.client)?;
        if status != 0 {
            return Err(FlashError::Controller { status }.into());
        }
        Ok(())
    }
}

/// Image length as u32, refusing anything beyond the address space.
fn image_len(data: &[u8], available: u32) -> Result<u32> {
    u32::try_from(data.len()).map_err(|_| {
        FlashError::ImageTooLarge {
            size: u32::MAX,
            available,
        }
        .into()
    })
}
