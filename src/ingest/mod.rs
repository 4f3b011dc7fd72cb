//! Frame ingestion.
//!
//! - V4L2 devices (feature: ingest-v4l2)
//! - Synthetic `stub://` cameras (tests, demos)
//!
//! Every source yields RGB `Frame`s. A read failure is a capture error and is
//! terminal for the run that owns the source.

pub mod camera;
#[cfg(any(feature = "ingest-v4l2", test))]
#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
mod normalize;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;

pub use camera::{CameraConfig, CameraSource, CameraStats};
