//! Garbage collection of old boot entries and payload directories.
//!
//! Failing to remove something here is never fatal: a stale file is
//! harmless, failing the deployment is not. Per-item errors are logged
//! and collected in a [`SweepReport`]; only failing to read the
//! directory itself (or cancellation) is an error.

use std::collections::HashSet;
use std::ffi::OsStr;

use anyhow::{Context, Result};
use camino::Utf8Path;
use cap_std_ext::cap_std::fs::Dir;
use cap_std_ext::dirext::CapStdExtDirExt;
use tokio_util::sync::CancellationToken;

use super::{check_cancelled, GenerationSlot};

/// Suffix of generated entry files
pub(crate) const ENTRY_SUFFIX: &str = ".conf";

/// The filename prefix shared by all entries of `slot`.
pub(crate) fn entry_prefix(slot: GenerationSlot) -> String {
    format!("ostree-{slot}-")
}

/// What a sweep removed, and what it failed to remove.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Names that were removed
    pub removed: Vec<String>,
    /// Names that could not be removed, along with the error
    pub failed: Vec<(String, String)>,
}

impl SweepReport {
    fn record(&mut self, name: String, r: std::io::Result<()>) {
        match r {
            Ok(()) => {
                tracing::debug!("Removed {name}");
                self.removed.push(name);
            }
            Err(e) => {
                tracing::warn!("Couldn't remove {name}: {e}");
                self.failed.push((name, e.to_string()));
            }
        }
    }
}

/// Remove a loader entry file.
pub(crate) fn remove_entry(d: &Dir, name: &OsStr) -> std::io::Result<()> {
    d.remove_file(name)
}

/// Remove a payload directory (or anything else found there).
pub(crate) fn remove_payload(d: &Dir, name: &OsStr) -> std::io::Result<()> {
    d.remove_all_optional(name).map(drop)
}

fn is_slot_entry(name: &OsStr, prefix: &str) -> bool {
    let name = name.as_encoded_bytes();
    name.starts_with(prefix.as_bytes()) && name.ends_with(ENTRY_SUFFIX.as_bytes())
}

/// Remove all entry files of `slot` from the loader entries directory.
pub(crate) fn sweep_entries<F>(
    entries: &Dir,
    slot: GenerationSlot,
    cancel: &CancellationToken,
    mut remove: F,
) -> Result<SweepReport>
where
    F: FnMut(&Dir, &OsStr) -> std::io::Result<()>,
{
    let prefix = entry_prefix(slot);
    let mut report = SweepReport::default();
    for ent in entries.entries().context("Reading loader entries")? {
        check_cancelled(cancel)?;
        let ent = ent?;
        let name = ent.file_name();
        if !is_slot_entry(&name, &prefix) {
            continue;
        }
        let display = name.to_string_lossy().into_owned();
        match ent.file_type() {
            Ok(t) if t.is_dir() => continue,
            Ok(_) => report.record(display, remove(entries, &name)),
            Err(e) => report.record(display, Err(e)),
        }
    }
    Ok(report)
}

/// Remove everything in the payload root at `path` that isn't named in `active`.
pub(crate) fn sweep_payload<F>(
    root: &Dir,
    path: &Utf8Path,
    active: &HashSet<String>,
    cancel: &CancellationToken,
    mut remove: F,
) -> Result<SweepReport>
where
    F: FnMut(&Dir, &OsStr) -> std::io::Result<()>,
{
    let mut report = SweepReport::default();
    let Some(payload) = root
        .open_dir_optional(path)
        .with_context(|| format!("Opening {path}"))?
    else {
        tracing::debug!("No {path}, nothing to clean");
        return Ok(report);
    };
    for ent in payload.entries().with_context(|| format!("Reading {path}"))? {
        check_cancelled(cancel)?;
        let ent = ent?;
        let name = ent.file_name();
        if name.to_str().is_some_and(|n| active.contains(n)) {
            continue;
        }
        let r = remove(&payload, &name);
        report.record(name.to_string_lossy().into_owned(), r);
    }
    Ok(report)
}
