//! Tool configuration management

use anyhow::{Context, Result, anyhow};
use common::DeviceIdentity;
use protocol::ids::{GARMIN_USB_PID, GARMIN_USB_VID};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(default)]
    pub usb: UsbSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Device to talk to, as "0xVID:0xPID"
    #[serde(default = "UsbSettings::default_device")]
    pub device: String,
    /// Read from bulk IN instead of interrupt IN
    #[serde(default)]
    pub read_bulk: bool,
    /// Kernel module that must not be loaded
    #[serde(default = "UsbSettings::default_conflicting_driver")]
    pub conflicting_driver: String,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            device: Self::default_device(),
            read_bulk: false,
            conflicting_driver: Self::default_conflicting_driver(),
        }
    }
}

impl UsbSettings {
    fn default_device() -> String {
        format!("{:#06x}:{:#06x}", GARMIN_USB_VID, GARMIN_USB_PID)
    }

    fn default_conflicting_driver() -> String {
        "garmin_gps".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "LoggingSettings::default_log_level")]
    pub log_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

impl LoggingSettings {
    fn default_log_level() -> String {
        "warn".to_string()
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            usb: UsbSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl ToolConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/garmintools/config.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: ToolConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::debug!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("garmintools").join("config.toml")
        } else {
            PathBuf::from(".config/garmintools/config.toml")
        }
    }

    /// The configured device as a VID/PID pair
    pub fn identity(&self) -> Result<DeviceIdentity> {
        Self::parse_device(&self.usb.device)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.log_level,
                valid_levels.join(", ")
            ));
        }

        Self::parse_device(&self.usb.device)?;

        if self.usb.conflicting_driver.trim().is_empty() {
            return Err(anyhow!("conflicting_driver must not be empty"));
        }

        Ok(())
    }

    /// Parse a "0xVID:0xPID" device selector
    fn parse_device(device: &str) -> Result<DeviceIdentity> {
        let parts: Vec<&str> = device.split(':').collect();
        if parts.len() != 2 {
            return Err(anyhow!(
                "Invalid device '{}', expected VID:PID (e.g., '0x091e:0x0003')",
                device
            ));
        }

        let vendor_id = Self::parse_hex_id(parts[0], "VID")?;
        let product_id = Self::parse_hex_id(parts[1], "PID")?;
        Ok(DeviceIdentity::new(vendor_id, product_id))
    }

    /// Parse a hex ID (VID or PID)
    fn parse_hex_id(id: &str, name: &str) -> Result<u16> {
        if !id.starts_with("0x") && !id.starts_with("0X") {
            return Err(anyhow!(
                "Invalid {} '{}', must start with '0x' (e.g., '0x091e')",
                name,
                id
            ));
        }

        let hex_part = &id[2..];
        if hex_part.is_empty() || hex_part.len() > 4 {
            return Err(anyhow!(
                "Invalid {} '{}', hex part must be 1-4 digits",
                name,
                id
            ));
        }

        u16::from_str_radix(hex_part, 16)
            .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))
    }
}

/// Load configuration from a user supplied path, expanding `~`
pub fn load_config(path: &str) -> Result<ToolConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    ToolConfig::load(Some(path_buf))
}
