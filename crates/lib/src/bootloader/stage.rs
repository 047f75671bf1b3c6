//! Mirroring kernels and initramfs images into the EFI system partition.
//!
//! systemd-boot can only load files from the partition it reads its
//! entries from, so every file an entry references is copied from the
//! staging boot directory to the same relative path on the ESP.

use anyhow::{Context, Result};
use camino::Utf8Path;
use cap_std_ext::cap_std::fs::{Dir, DirBuilder, DirBuilderExt as _};
use cap_std_ext::dirext::CapStdExtDirExt;
use fn_error_context::context;
use rustix::fs::Mode;

/// Mode for directories created on the ESP
pub(crate) const STAGED_DIR_MODE: Mode = Mode::from_raw_mode(0o755);

pub(crate) fn staged_dir_builder() -> DirBuilder {
    let mut db = DirBuilder::new();
    db.recursive(true).mode(STAGED_DIR_MODE.as_raw_mode());
    db
}

/// Ensure the file at `relpath` in `src` also exists in `dest`.
///
/// Kernels live in directories named after the deployment checksum, so
/// anything already present at the destination has the right content and
/// is left alone. Returns whether a copy was made.
#[context("Staging {relpath:?}")]
pub(crate) fn copy_if_needed(relpath: Option<&str>, src: &Dir, dest: &Dir) -> Result<bool> {
    let Some(relpath) = relpath else {
        return Ok(false);
    };
    let relpath = relpath.strip_prefix('/').unwrap_or(relpath);
    if relpath.is_empty() {
        return Ok(false);
    }
    let relpath = Utf8Path::new(relpath);

    if dest
        .symlink_metadata_optional(relpath)
        .with_context(|| format!("Querying destination {relpath}"))?
        .is_some()
    {
        tracing::trace!("Already staged: {relpath}");
        return Ok(false);
    }

    if let Some(parent) = relpath.parent().filter(|p| !p.as_str().is_empty()) {
        dest.create_dir_with(parent, &staged_dir_builder())
            .with_context(|| format!("Creating {parent}"))?;
    }
    copy_nofollow(src, dest, relpath)?;
    tracing::debug!("Staged {relpath}");
    Ok(true)
}

/// Copy a regular file or a symbolic link without following it.
fn copy_nofollow(src: &Dir, dest: &Dir, relpath: &Utf8Path) -> Result<()> {
    let meta = src
        .symlink_metadata(relpath)
        .with_context(|| format!("Querying source {relpath}"))?;
    if meta.file_type().is_symlink() {
        let target = src
            .read_link_contents(relpath)
            .with_context(|| format!("Reading link {relpath}"))?;
        dest.symlink_contents(&target, relpath)
            .with_context(|| format!("Creating link {relpath}"))?;
    } else if meta.is_file() {
        let mut f = src
            .open(relpath)
            .with_context(|| format!("Opening {relpath}"))?;
        // The mode must be final before the file appears under its name
        dest.atomic_replace_with(relpath, |w| -> std::io::Result<()> {
            w.get_ref().as_file().set_permissions(meta.permissions())?;
            std::io::copy(&mut f, w)?;
            Ok(())
        })
        .with_context(|| format!("Copying {relpath}"))?;
    } else {
        anyhow::bail!("Not a regular file: {relpath}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use cap_std_ext::cap_std;
    use cap_std_ext::cap_std::fs::{Permissions, PermissionsExt as _};
    use cap_std_ext::cap_tempfile::TempDir;

    use super::*;

    fn setup() -> Result<(TempDir, Dir, Dir)> {
        let td = TempDir::new(cap_std::ambient_authority())?;
        td.create_dir_all("boot/abc123")?;
        td.create_dir_all("boot/efi")?;
        td.write("boot/abc123/vmlinuz", "kernel")?;
        let boot = td.open_dir("boot")?;
        let efi = td.open_dir("boot/efi")?;
        Ok((td, boot, efi))
    }

    #[test]
    fn test_absent_path() -> Result<()> {
        let (_td, boot, efi) = setup()?;
        assert!(!copy_if_needed(None, &boot, &efi)?);
        assert!(!copy_if_needed(Some(""), &boot, &efi)?);
        assert!(!copy_if_needed(Some("/"), &boot, &efi)?);
        assert!(efi.entries()?.next().is_none());
        Ok(())
    }

    #[test]
    fn test_copy_idempotent() -> Result<()> {
        let (_td, boot, efi) = setup()?;
        boot.set_permissions("abc123/vmlinuz", Permissions::from_mode(0o600))?;

        assert!(copy_if_needed(Some("/abc123/vmlinuz"), &boot, &efi)?);
        assert_eq!(efi.read_to_string("abc123/vmlinuz")?, "kernel");
        let meta = efi.symlink_metadata("abc123/vmlinuz")?;
        assert_eq!(meta.permissions().mode() & 0o7777, 0o600);
        let mtime = meta.modified()?;

        // The source changing doesn't matter; the name implies the content
        boot.write("abc123/vmlinuz", "changed")?;
        assert!(!copy_if_needed(Some("/abc123/vmlinuz"), &boot, &efi)?);
        assert!(!copy_if_needed(Some("abc123/vmlinuz"), &boot, &efi)?);
        assert_eq!(efi.read_to_string("abc123/vmlinuz")?, "kernel");
        assert_eq!(efi.symlink_metadata("abc123/vmlinuz")?.modified()?, mtime);
        Ok(())
    }

    #[test]
    fn test_copy_modes() -> Result<()> {
        let (_td, boot, efi) = setup()?;
        for (name, mode) in [("vmlinuz-exec", 0o755), ("initrd-ro", 0o444)] {
            let path = format!("abc123/{name}");
            boot.write(&path, name)?;
            boot.set_permissions(&path, Permissions::from_mode(mode))?;
            assert!(copy_if_needed(Some(path.as_str()), &boot, &efi)?);
            let meta = efi.symlink_metadata(&path)?;
            assert_eq!(meta.permissions().mode() & 0o7777, mode);
            assert_eq!(efi.read_to_string(&path)?, name);
        }
        // No leftover temporary files next to the staged ones
        let mut names = efi
            .read_dir("abc123")?
            .map(|e| Ok(e?.file_name().to_string_lossy().into_owned()))
            .collect::<Result<Vec<_>>>()?;
        names.sort();
        assert_eq!(names, ["initrd-ro", "vmlinuz-exec"]);
        Ok(())
    }

    #[test]
    fn test_copy_symlink() -> Result<()> {
        let (_td, boot, efi) = setup()?;
        boot.symlink_contents("vmlinuz", "abc123/vmlinuz-current")?;
        assert!(copy_if_needed(
            Some("/abc123/vmlinuz-current"),
            &boot,
            &efi
        )?);
        let meta = efi.symlink_metadata("abc123/vmlinuz-current")?;
        assert!(meta.file_type().is_symlink());
        assert_eq!(
            efi.read_link_contents("abc123/vmlinuz-current")?,
            std::path::Path::new("vmlinuz")
        );
        Ok(())
    }

    #[test]
    fn test_dangling_destination_counts_as_present() -> Result<()> {
        let (_td, boot, efi) = setup()?;
        efi.create_dir("abc123")?;
        efi.symlink_contents("/nonexistent", "abc123/vmlinuz")?;
        assert!(!copy_if_needed(Some("/abc123/vmlinuz"), &boot, &efi)?);
        Ok(())
    }

    #[test]
    fn test_errors() -> Result<()> {
        let (_td, boot, efi) = setup()?;
        // A file in the way of the parent directory is not "not found"
        efi.write("abc123", "in the way")?;
        assert!(copy_if_needed(Some("/abc123/vmlinuz"), &boot, &efi).is_err());
        efi.remove_file("abc123")?;
        // Missing source
        assert!(copy_if_needed(Some("/abc123/initramfs.img"), &boot, &efi).is_err());
        assert!(!efi.try_exists("abc123/initramfs.img")?);
        // Directories aren't staged
        boot.create_dir("abc123/subdir")?;
        assert!(copy_if_needed(Some("/abc123/subdir"), &boot, &efi).is_err());
        Ok(())
    }
}
