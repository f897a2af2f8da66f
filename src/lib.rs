pub mod config;
pub mod detection;
pub mod pool;
pub mod tracker;
pub mod utils;
pub mod visualization;

// Re-export main types
pub use crate::config::Config;
pub use crate::detection::{Detection, Detector, FaceDetector, ObjectCategory};
pub use crate::pool::{CorrelationTracker, CorrelationTrackerFactory, OpencvTrackerFactory, TrackerKind, TrackerPool};
pub use crate::tracker::{Tracker, TrackingResult};
