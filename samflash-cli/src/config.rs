//! Configuration file support for samflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (SAMFLASH_*)
//! 3. Local config file (./samflash.toml)
//! 4. Global config file (~/.config/samflash/config.toml)

use {
    directories::ProjectDirs,
    log::{debug, info, warn},
    samflash::default_allow_list,
    serde::{Deserialize, Serialize},
    std::{
        fs,
        path::{Path, PathBuf},
    },
};

/// Name of the local configuration file.
pub const LOCAL_CONFIG: &str = "samflash.toml";

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub serial: Option<String>,
    /// Bootloader baud rate.
    pub baud: Option<u32>,
}

/// Port-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Extra USB devices treated as bootloader candidates.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// Flash configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Image offset from the application start.
    #[serde(default)]
    pub offset: u32,
    /// Skip verification by default.
    #[serde(default)]
    pub skip_verify: bool,
    /// Stay in the bootloader after flashing.
    #[serde(default)]
    pub no_reset: bool,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Flash configuration.
    #[serde(default)]
    pub flash: FlashConfig,
    /// Where `remember_usb_device` writes. Not serialized.
    #[serde(skip)]
    source: Option<PathBuf>,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
                config.source = Some(global_path);
            }
        }

        // Local config overrides global
        let local_path = Path::new(LOCAL_CONFIG);
        if let Some(local_config) = Self::load_from_file(local_path) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
            config.source = Some(local_path.to_path_buf());
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(mut config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config.source = Some(path.to_path_buf());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self {
                source: Some(path.to_path_buf()),
                ..Self::default()
            }
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "samflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.port.connection.serial.is_some() {
            self.port.connection.serial = other.port.connection.serial;
        }
        if other.port.connection.baud.is_some() {
            self.port.connection.baud = other.port.connection.baud;
        }
        for device in other.port.usb_device {
            if !self.port.usb_device.contains(&device) {
                self.port.usb_device.push(device);
            }
        }

        if other.flash.offset != 0 {
            self.flash.offset = other.flash.offset;
        }
        if other.flash.skip_verify {
            self.flash.skip_verify = true;
        }
        if other.flash.no_reset {
            self.flash.no_reset = true;
        }
    }

    /// Built-in bootloader vendor IDs extended with remembered devices.
    pub fn allow_list(&self) -> Vec<u16> {
        let mut vids = default_allow_list();
        for device in &self.port.usb_device {
            if !vids.contains(&device.vid) {
                vids.push(device.vid);
            }
        }
        vids
    }

    /// Whether `vid:pid` is already remembered.
    pub fn knows_usb_device(&self, vid: u16, pid: u16) -> bool {
        self.port
            .usb_device
            .iter()
            .any(|d| d.vid == vid && d.pid == pid)
    }

    /// Save USB device for future auto-detection.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        if self.knows_usb_device(vid, pid) {
            return Ok(());
        }

        let path = match &self.source {
            Some(path) => path.clone(),
            None => match Self::global_config_dir() {
                Some(dir) => {
                    fs::create_dir_all(&dir)?;
                    dir.join("config.toml")
                },
                None => PathBuf::from(LOCAL_CONFIG),
            },
        };

        // Rewrite only the file's own contents, not values merged from elsewhere.
        let mut on_disk = Self::load_from_file(&path).unwrap_or_default();
        let device = UsbDevice { vid, pid };
        if !on_disk.port.usb_device.contains(&device) {
            on_disk.port.usb_device.push(device.clone());
        }
        fs::write(&path, toml::to_string_pretty(&on_disk)?)?;
        info!("Saved USB device {vid:04X}:{pid:04X} to {}", path.display());

        self.port.usb_device.push(device);
        self.source = Some(path);
        Ok(())
    }
}
