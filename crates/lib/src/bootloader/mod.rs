//! # Bootloader backends
//!
//! A deployment transaction regenerates the boot menu by calling
//! [`Bootloader::write_config`] on exactly one backend, picked by
//! probing each candidate with [`Bootloader::is_active`]. Entries
//! are written in one of two generations ("slots"); the slot being
//! written flips on every transaction.

use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::sysroot::Sysroot;

mod sd_boot;
mod stage;
mod sweep;

pub use sd_boot::SdBoot;
pub use sweep::SweepReport;

/// One of the two boot entry generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GenerationSlot {
    /// Generation 0
    Zero,
    /// Generation 1
    One,
}

/// A slot number other than 0 or 1.
#[derive(thiserror::Error, Debug)]
#[error("Invalid boot slot {0:?}, expected 0 or 1")]
pub struct InvalidSlot(String);

impl GenerationSlot {
    /// The numeric value.
    pub fn index(self) -> u8 {
        match self {
            GenerationSlot::Zero => 0,
            GenerationSlot::One => 1,
        }
    }

    /// The other generation.
    pub fn opposite(self) -> Self {
        match self {
            GenerationSlot::Zero => GenerationSlot::One,
            GenerationSlot::One => GenerationSlot::Zero,
        }
    }
}

impl TryFrom<u32> for GenerationSlot {
    type Error = InvalidSlot;

    fn try_from(v: u32) -> std::result::Result<Self, Self::Error> {
        match v {
            0 => Ok(GenerationSlot::Zero),
            1 => Ok(GenerationSlot::One),
            o => Err(InvalidSlot(o.to_string())),
        }
    }
}

impl FromStr for GenerationSlot {
    type Err = InvalidSlot;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "0" => Ok(GenerationSlot::Zero),
            "1" => Ok(GenerationSlot::One),
            o => Err(InvalidSlot(o.to_string())),
        }
    }
}

impl Display for GenerationSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// The operation was cancelled via its [`CancellationToken`].
#[derive(thiserror::Error, Debug)]
#[error("Operation was cancelled")]
pub struct Cancelled;

pub(crate) fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Cancelled.into());
    }
    Ok(())
}

/// The operations every bootloader backend provides.
pub trait Bootloader: std::fmt::Debug {
    /// Whether this bootloader is in use on the target system. Never fails;
    /// anything unexpected is treated as "not active".
    fn is_active(&self) -> bool;

    /// A short identifier, e.g. `sd-boot`.
    fn name(&self) -> &'static str;

    /// Regenerate the boot configuration for the entries of `slot`.
    fn write_config(&self, slot: GenerationSlot, cancel: &CancellationToken) -> Result<()>;
}

/// Return the first of `candidates` that is active.
pub fn query_bootloader(candidates: Vec<Box<dyn Bootloader>>) -> Option<Box<dyn Bootloader>> {
    candidates.into_iter().find(|b| {
        let active = b.is_active();
        tracing::trace!("Bootloader {}: active={active}", b.name());
        active
    })
}

/// All known backends for `sysroot`, in probing order.
pub fn default_bootloaders(sysroot: &Arc<dyn Sysroot>) -> Vec<Box<dyn Bootloader>> {
    vec![Box::new(SdBoot::new(Arc::clone(sysroot)))]
}
