//! The main entrypoint for ostree-boot, which just performs global initialization, and then
//! calls out into the library.

use anyhow::Result;

fn run() -> Result<()> {
    ostree_boot_utils::initialize_tracing();
    tracing::trace!("starting {}", env!("CARGO_PKG_NAME"));
    ostree_boot_lib::cli::run_from_iter(std::env::args_os())
}

fn main() {
    // In order to print the error in a custom format (with :#) our
    // main simply invokes a run() where all the work is done.
    // This code just captures any errors.
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
