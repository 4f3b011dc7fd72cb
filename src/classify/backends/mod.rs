pub mod cpu;
pub mod scripted;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use cpu::{CpuBackend, REFERENCE_COLORS};
pub use scripted::ScriptedBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
