//! # Command line interface
//!
//! Command line tool to inspect and regenerate the boot configuration.

use std::ffi::OsString;
use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use ostree_boot_utils::ResultExt;
use tokio_util::sync::CancellationToken;

use crate::bootloader::{
    default_bootloaders, query_bootloader, Bootloader, GenerationSlot, SdBoot,
};
use crate::config::Config;
use crate::sysroot::{PhysicalSysroot, Sysroot};

/// Manage the boot configuration of a deployment root
#[derive(Debug, Parser)]
#[clap(name = "ostree-boot", version)]
pub(crate) struct Opt {
    /// Path to the physical root of the system
    #[clap(long, global = true, default_value = "/")]
    sysroot: Utf8PathBuf,

    /// TOML file overriding the boot directory layout
    #[clap(long, global = true)]
    config: Option<Utf8PathBuf>,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Print whether systemd-boot is in use
    IsActive,
    /// Print the name of the bootloader in use
    Detect,
    /// Regenerate the systemd-boot entries for a generation
    WriteConfig {
        /// The generation to write, 0 or 1
        #[clap(long)]
        slot: GenerationSlot,
    },
    /// Print the entry files a generation would produce
    ListEntries {
        /// The generation to list, 0 or 1
        #[clap(long)]
        slot: GenerationSlot,
    },
}

impl Opt {
    fn sysroot(&self) -> Result<Arc<dyn Sysroot>> {
        let config = match self.config.as_deref() {
            Some(p) => Config::load(p)?,
            None => Config::default(),
        };
        let sysroot = PhysicalSysroot::open(&self.sysroot, config.layout)?;
        Ok(Arc::new(sysroot))
    }
}

/// A token cancelled on SIGINT or SIGTERM.
fn cancel_on_signal() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::debug!("Received termination signal, cancelling");
        token.cancel();
    })
    .context("Installing signal handler")
    .log_err_default();
    cancel
}

fn run_from_opt(opt: Opt, mut out: impl Write) -> Result<()> {
    let sysroot = opt.sysroot()?;
    match opt.cmd {
        Command::IsActive => {
            let active = SdBoot::new(sysroot).is_active();
            writeln!(out, "{active}")?;
        }
        Command::Detect => {
            let bootloader = query_bootloader(default_bootloaders(&sysroot))
                .ok_or_else(|| anyhow::anyhow!("No supported bootloader found"))?;
            writeln!(out, "{}", bootloader.name())?;
        }
        Command::WriteConfig { slot } => {
            let cancel = cancel_on_signal();
            SdBoot::new(sysroot).write_config(slot, &cancel)?;
        }
        Command::ListEntries { slot } => {
            for entry in sysroot.list_boot_entries(slot)? {
                writeln!(out, "{}", SdBoot::entry_filename(slot, &entry)?)?;
            }
        }
    }
    Ok(())
}

/// Parse the provided arguments and execute.
/// Calls [`clap::Error::exit`] on failure, printing the error message and aborting the program.
pub fn run_from_iter<T>(args: impl IntoIterator<Item = T>) -> Result<()>
where
    T: Into<OsString> + Clone,
{
    run_from_opt(Opt::parse_from(args), std::io::stdout().lock())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(args: &[&str]) -> Result<String> {
        let opt = Opt::try_parse_from(args)?;
        let mut out = Vec::new();
        run_from_opt(opt, &mut out)?;
        Ok(String::from_utf8(out)?)
    }

    #[test]
    fn test_parse() {
        let opt = Opt::try_parse_from(["ostree-boot", "write-config", "--slot", "1"]).unwrap();
        assert_eq!(opt.sysroot, "/");
        assert!(matches!(
            opt.cmd,
            Command::WriteConfig {
                slot: GenerationSlot::One
            }
        ));
        let opt = Opt::try_parse_from([
            "ostree-boot",
            "is-active",
            "--sysroot",
            "/sysroot",
            "--config",
            "/etc/ostree-boot.toml",
        ])
        .unwrap();
        assert_eq!(opt.sysroot, "/sysroot");
        assert_eq!(opt.config.as_deref().unwrap(), "/etc/ostree-boot.toml");

        assert!(Opt::try_parse_from(["ostree-boot", "write-config", "--slot", "2"]).is_err());
        assert!(Opt::try_parse_from(["ostree-boot", "write-config"]).is_err());
        assert!(Opt::try_parse_from(["ostree-boot"]).is_err());
    }

    #[test]
    fn test_run() -> Result<()> {
        let td = tempfile::tempdir()?;
        let root = Utf8PathBuf::try_from(td.path().to_path_buf())?;
        let run_in = |args: &[&str]| {
            let mut full = vec!["ostree-boot", "--sysroot", root.as_str()];
            full.extend_from_slice(args);
            run(&full)
        };

        assert_eq!(run_in(&["is-active"])?, "false\n");
        assert!(run_in(&["detect"]).is_err());

        std::fs::create_dir_all(root.join("boot/efi/loader/entries"))?;
        std::fs::create_dir_all(root.join("boot/loader.0/entries"))?;
        std::fs::create_dir_all(root.join("boot/abc123"))?;
        std::fs::write(root.join("boot/abc123/vmlinuz"), "kernel")?;
        std::fs::write(
            root.join("boot/loader.0/entries/ostree-test-0.conf"),
            "title Test\nversion 1.0\nlinux /abc123/vmlinuz\n",
        )?;

        assert_eq!(run_in(&["is-active"])?, "true\n");
        assert_eq!(run_in(&["detect"])?, "sd-boot\n");
        assert_eq!(
            run_in(&["list-entries", "--slot", "0"])?,
            "ostree-0-1.0.conf\n"
        );
        assert_eq!(run_in(&["write-config", "--slot", "0"])?, "");
        assert_eq!(
            std::fs::read_to_string(root.join("boot/efi/loader/entries/ostree-0-1.0.conf"))?,
            "title Test\nversion 1.0\nlinux /abc123/vmlinuz\n"
        );
        assert!(root.join("boot/efi/abc123/vmlinuz").exists());
        assert!(root.join("boot/efi/ostree/abc123").is_dir());

        // A layout override pointing somewhere that doesn't exist
        let config = root.join("layout.toml");
        std::fs::write(&config, "[layout]\nloader-entries = \"efi/loader/entries\"\n")?;
        assert_eq!(run_in(&["--config", config.as_str(), "is-active"])?, "false\n");
        Ok(())
    }
}
