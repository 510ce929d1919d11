//! Signaling-side types, marshalling, and the authority trait

pub mod marshal;
pub mod signaller;
pub mod types;

pub use signaller::Signaller;
pub use types::*;
