//! # systemd-boot
//!
//! systemd-boot reads Boot Loader Specification entries from
//! `loader/entries` on the EFI system partition, and can only load
//! kernels from that same partition. Writing a generation therefore
//! means mirroring every referenced kernel and initramfs onto the ESP
//! and writing one `ostree-<slot>-<version>.conf` per entry.
//!
//! Unlike some other backends, there is no atomic swap between the two
//! generations: the entries of the target slot are rewritten in place
//! and the other slot is then removed. An interruption half way can
//! leave neither generation complete.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::io;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use cap_std_ext::cap_std::fs::Dir;
use cap_std_ext::dirext::CapStdExtDirExt;
use fn_error_context::context;
use ostree_boot_utils::ResultExt;
use tokio_util::sync::CancellationToken;

use super::stage::{copy_if_needed, staged_dir_builder};
use super::sweep::{
    entry_prefix, remove_entry, remove_payload, sweep_entries, sweep_payload, SweepReport,
    ENTRY_SUFFIX,
};
use super::{check_cancelled, Bootloader, GenerationSlot};
use crate::bootconfig::BootEntryConfig;
use crate::sysroot::Sysroot;

const NAME: &str = "sd-boot";

/// The systemd-boot backend.
#[derive(Debug)]
pub struct SdBoot {
    sysroot: Arc<dyn Sysroot>,
    /// The loader entries directory, relative to the sysroot
    entries_path: Utf8PathBuf,
}

/// The name of the payload directory for a kernel: the basename of the
/// directory holding it, which is named after the deployment checksum.
fn payload_name(linux: &str) -> Option<&str> {
    Utf8Path::new(linux).parent().and_then(|p| p.file_name())
}

impl SdBoot {
    /// Create the backend for `sysroot`.
    pub fn new(sysroot: Arc<dyn Sysroot>) -> Self {
        let entries_path = sysroot.layout().loader_entries.clone();
        Self {
            sysroot,
            entries_path,
        }
    }

    /// The entry file name for `entry` in `slot`.
    pub fn entry_filename(slot: GenerationSlot, entry: &BootEntryConfig) -> Result<String> {
        let version = entry
            .get("version")
            .ok_or_else(|| anyhow!("Missing 'version' value"))?;
        // The version ends up as a single path component
        anyhow::ensure!(
            !version.is_empty() && !version.contains('/'),
            "Invalid version {version:?}"
        );
        Ok(format!("{}{version}{ENTRY_SUFFIX}", entry_prefix(slot)))
    }

    fn open_dir(&self, path: &Utf8Path) -> Result<Dir> {
        self.sysroot
            .root()
            .open_dir(path)
            .with_context(|| format!("Opening {path}"))
    }

    /// Remove the entry files of `slot`.
    pub fn clean_slot(
        &self,
        slot: GenerationSlot,
        cancel: &CancellationToken,
    ) -> Result<SweepReport> {
        self.clean_slot_with(slot, cancel, remove_entry)
    }

    #[context("Cleaning boot entries for slot {slot}")]
    fn clean_slot_with<F>(
        &self,
        slot: GenerationSlot,
        cancel: &CancellationToken,
        remove: F,
    ) -> Result<SweepReport>
    where
        F: FnMut(&Dir, &OsStr) -> io::Result<()>,
    {
        let entries = self.open_dir(&self.entries_path)?;
        sweep_entries(&entries, slot, cancel, remove)
    }

    /// Remove the payload directories not named in `active`.
    pub fn clean_payload(
        &self,
        active: &HashSet<String>,
        cancel: &CancellationToken,
    ) -> Result<SweepReport> {
        self.clean_payload_with(active, cancel, remove_payload)
    }

    #[context("Cleaning boot data")]
    fn clean_payload_with<F>(
        &self,
        active: &HashSet<String>,
        cancel: &CancellationToken,
        remove: F,
    ) -> Result<SweepReport>
    where
        F: FnMut(&Dir, &OsStr) -> io::Result<()>,
    {
        let layout = self.sysroot.layout();
        sweep_payload(self.sysroot.root(), &layout.payload, active, cancel, remove)
    }

    /// Mirror the kernel and initramfs of `entry` onto the ESP, and make
    /// sure its payload directory exists. Returns the payload directory name.
    fn deploy_boot_data<'e>(
        &self,
        entry: &'e BootEntryConfig,
        boot: &Dir,
        efi: &Dir,
    ) -> Result<Option<&'e str>> {
        let linux = entry
            .get("linux")
            .ok_or_else(|| anyhow!("Missing 'linux' value"))?;
        copy_if_needed(Some(linux), boot, efi)?;
        copy_if_needed(entry.get("initrd"), boot, efi)?;

        let name = payload_name(linux);
        if let Some(name) = name {
            let path = self.sysroot.layout().payload.join(name);
            self.sysroot
                .root()
                .create_dir_with(&path, &staged_dir_builder())
                .with_context(|| format!("Creating {path}"))?;
        } else {
            tracing::debug!("No payload directory for {linux}");
        }
        Ok(name)
    }

    fn write_entry(&self, entries: &Dir, name: &str, entry: &BootEntryConfig) -> Result<()> {
        entries
            .atomic_write(name, entry.to_string())
            .with_context(|| format!("Writing {name}"))?;
        tracing::debug!("Wrote {name}");
        Ok(())
    }

    #[context("Writing sd-boot configuration for slot {slot}")]
    fn write_config_with<E, P>(
        &self,
        slot: GenerationSlot,
        cancel: &CancellationToken,
        mut entry_remover: E,
        payload_remover: P,
    ) -> Result<()>
    where
        E: FnMut(&Dir, &OsStr) -> io::Result<()>,
        P: FnMut(&Dir, &OsStr) -> io::Result<()>,
    {
        // Anything left over from an earlier attempt at this slot
        self.clean_slot_with(slot, cancel, &mut entry_remover)?;

        let configs = self
            .sysroot
            .list_boot_entries(slot)
            .context("Reading boot loader configs")?;

        let layout = self.sysroot.layout();
        let entries = self.open_dir(&self.entries_path)?;
        let boot = self.open_dir(&layout.boot)?;
        let efi = self.open_dir(&layout.efi)?;

        let mut active = HashSet::new();
        for config in configs.iter() {
            check_cancelled(cancel)?;
            let name = Self::entry_filename(slot, config)?;
            if let Some(payload) = self.deploy_boot_data(config, &boot, &efi)? {
                active.insert(payload.to_owned());
            }
            self.write_entry(&entries, &name, config)?;
        }

        self.clean_slot_with(slot.opposite(), cancel, &mut entry_remover)?;
        self.clean_payload_with(&active, cancel, payload_remover)?;

        tracing::debug!("Wrote {} entries for slot {slot}", configs.len());
        Ok(())
    }
}

impl Bootloader for SdBoot {
    fn is_active(&self) -> bool {
        self.sysroot
            .root()
            .symlink_metadata_optional(&self.entries_path)
            .with_context(|| format!("Querying {}", self.entries_path))
            .log_err_default()
            .is_some_and(|m| m.is_dir())
    }

    fn name(&self) -> &'static str {
        NAME
    }

    fn write_config(&self, slot: GenerationSlot, cancel: &CancellationToken) -> Result<()> {
        self.write_config_with(slot, cancel, remove_entry, remove_payload)
    }
}
