//! The physical system root that bootloader backends operate on.

use std::cmp::Ordering;

use anyhow::{Context, Result};
use camino::Utf8Path;
use cap_std_ext::cap_std;
use cap_std_ext::cap_std::fs::Dir;
use cap_std_ext::cap_std::fs_utf8::DirEntry as DirEntryUtf8;
use cap_std_ext::dirext::CapStdExtDirExt;
use fn_error_context::context;

use crate::bootconfig::BootEntryConfig;
use crate::bootloader::GenerationSlot;
use crate::config::BootLayout;

/// What a bootloader backend needs from the system root it manages.
///
/// Callers must serialize deployment transactions; nothing here is
/// safe to drive concurrently.
pub trait Sysroot: std::fmt::Debug {
    /// The physical root directory
    fn root(&self) -> &Dir;

    /// Where the boot areas live below [`Self::root`]
    fn layout(&self) -> &BootLayout;

    /// The boot entries making up `slot`, in menu order.
    fn list_boot_entries(&self, slot: GenerationSlot) -> Result<Vec<BootEntryConfig>>;
}

/// A sysroot backed by a directory on disk, reading the entries the
/// deployment manager staged in `boot/loader.<slot>/entries`.
#[derive(Debug)]
pub struct PhysicalSysroot {
    root: Dir,
    layout: BootLayout,
}

impl PhysicalSysroot {
    /// Wrap an already opened root directory.
    pub fn new(root: Dir, layout: BootLayout) -> Self {
        Self { root, layout }
    }

    /// Open the root at `path`.
    #[context("Opening sysroot {path}")]
    pub fn open(path: &Utf8Path, layout: BootLayout) -> Result<Self> {
        let root = Dir::open_ambient_dir(path, cap_std::ambient_authority())?;
        Ok(Self::new(root, layout))
    }
}

/// Newest version first; entries without a version go last.
fn compare_entries(a: &BootEntryConfig, b: &BootEntryConfig) -> Ordering {
    match (a.version(), b.version()) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl Sysroot for PhysicalSysroot {
    fn root(&self) -> &Dir {
        &self.root
    }

    fn layout(&self) -> &BootLayout {
        &self.layout
    }

    #[context("Reading boot loader configs for slot {slot}")]
    fn list_boot_entries(&self, slot: GenerationSlot) -> Result<Vec<BootEntryConfig>> {
        let path = self.layout.staged_entries(slot);
        let Some(d) = self
            .root
            .open_dir_optional(&path)
            .with_context(|| format!("Opening {path}"))?
        else {
            tracing::debug!("No {path}");
            return Ok(Vec::new());
        };
        let mut r = Vec::new();
        for e in d.entries()? {
            let e = DirEntryUtf8::from_cap_std(e?);
            let name = e.file_name()?;
            if !name.ends_with(".conf") || !e.file_type()?.is_file() {
                continue;
            }
            let buf = d
                .read_to_string(&name)
                .with_context(|| format!("Reading {name}"))?;
            r.push(BootEntryConfig::parse(&buf));
        }
        r.sort_by(compare_entries);
        Ok(r)
    }
}
