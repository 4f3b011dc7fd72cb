//! Product Scanner
//!
//! Watches a camera, classifies what it sees, records each newly recognized
//! product (name, price) in SQLite, and streams the annotated frames over
//! HTTP as MJPEG.
//!
//! # Architecture
//!
//! - One detection session at a time. A session owns the camera for its run
//!   and has its own cancel flag; start/stop go through `SessionManager`.
//! - Within one run a label is recorded at most once, and only when its
//!   confidence is strictly above the fixed 0.8 threshold.
//! - Detection and streaming are decoupled by the `FrameHub`: the session
//!   publishes JPEG frames, stream clients subscribe. A slow viewer never
//!   stalls detection.
//!
//! # Module Structure
//!
//! - `ingest`: camera sources (V4L2, synthetic `stub://`)
//! - `classify`: preprocessing, backends, `FrameClassifier`
//! - `session`: detection pipeline, run loop, session slot
//! - `storage`: `ProductStore` and its SQLite implementation
//! - `frame`: frames and the frame hub
//! - `annotate`: label overlay and JPEG encoding
//! - `api`: HTTP routes
//! - `config`: file + env configuration

pub mod annotate;
pub mod api;
pub mod catalog;
pub mod classify;
pub mod config;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod session;
pub mod storage;

pub use catalog::{CatalogEntry, LabelCatalog};
pub use classify::{Classification, FrameClassifier};
pub use config::ScannerConfig;
pub use error::{error_kind, ScanError, ScanErrorKind};
pub use frame::{EncodedFrame, Frame, FrameHub, HubRecv};
pub use ingest::{CameraConfig, CameraSource};
pub use session::{
    DetectionPipeline, DetectionPolicy, RunExit, RunSummary, SessionManager, SessionStatus,
    StartOutcome, StopOutcome,
};
pub use storage::{InMemoryProductStore, ProductRecord, ProductStore, SqliteProductStore};
