//! Filesystem safety checks for static asset serving.
//!
//! - [`StaticAssetGate`]: only lets through paths that resolve inside an
//!   allow-listed root directory.

mod gate;

pub use gate::{StaticAssetGate, resolve};
