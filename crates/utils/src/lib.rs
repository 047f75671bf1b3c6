//! The inevitable catchall "utils" crate. Only add things here
//! that depend on the standard library and the logging stack.
//!
mod tracing_util;
pub use tracing_util::*;
mod result_ext;
pub use result_ext::*;
