//! # On-disk layout configuration
//!
//! All paths are relative to the system root, and default to the
//! layout ostree uses on EFI systems. They can be overridden with a
//! TOML file:
//!
//! ```toml
//! [layout]
//! loader-entries = "boot/efi/loader/entries"
//! payload = "boot/efi/ostree"
//! ```

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use serde::Deserialize;

use crate::bootloader::GenerationSlot;

/// Boot loader entries read by systemd-boot
pub const LOADER_ENTRIES: &str = "boot/efi/loader/entries";
/// The staging boot directory holding per-deployment kernels
pub const BOOT: &str = "boot";
/// The mounted EFI system partition
pub const EFI: &str = "boot/efi";
/// Per-deployment payload directories on the EFI system partition
pub const PAYLOAD: &str = "boot/efi/ostree";

/// Where the bootloader backend finds and puts things.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct BootLayout {
    /// Directory holding the generated `ostree-<slot>-<version>.conf` files
    pub loader_entries: Utf8PathBuf,
    /// Staging area; kernel and initrd paths in entries are relative to this
    pub boot: Utf8PathBuf,
    /// Firmware-visible mirror of the staging area
    pub efi: Utf8PathBuf,
    /// Root of the payload directories
    pub payload: Utf8PathBuf,
}

impl Default for BootLayout {
    fn default() -> Self {
        Self {
            loader_entries: LOADER_ENTRIES.into(),
            boot: BOOT.into(),
            efi: EFI.into(),
            payload: PAYLOAD.into(),
        }
    }
}

impl BootLayout {
    /// The directory holding the entries generated for `slot` in the
    /// staging area, e.g. `boot/loader.0/entries`.
    pub fn staged_entries(&self, slot: GenerationSlot) -> Utf8PathBuf {
        self.boot.join(format!("loader.{slot}")).join("entries")
    }

    fn validate(&self) -> Result<()> {
        for (name, p) in [
            ("loader-entries", &self.loader_entries),
            ("boot", &self.boot),
            ("efi", &self.efi),
            ("payload", &self.payload),
        ] {
            anyhow::ensure!(
                p.is_relative() && !p.as_str().is_empty(),
                "layout.{name} must be a non-empty relative path, found {p:?}"
            );
        }
        Ok(())
    }
}

/// The toplevel configuration file.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Layout overrides
    #[serde(default)]
    pub layout: BootLayout,
}

impl Config {
    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self> {
        let r: Self = toml::from_str(s)?;
        r.layout.validate()?;
        Ok(r)
    }

    /// Load configuration from a file.
    #[context("Loading configuration from {path}")]
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let buf = std::fs::read_to_string(path).context("Reading")?;
        Self::from_toml(&buf)
    }
}
