//! # Boot configuration for ostree-style deployments
//!
//! This crate writes the boot menu for a system that keeps several
//! immutable deployments side by side, using the systemd-boot
//! backend: Boot Loader Specification entries plus the kernel and
//! initramfs they reference are mirrored into the EFI system
//! partition, and the previous generation is garbage collected.

pub mod bootconfig;
pub mod bootloader;
pub mod cli;
pub mod config;
pub mod sysroot;
