use anyhow::Result;
use opencv::{
    core::{Mat, Ptr, Rect},
    prelude::*,
    tracking::{TrackerCSRT, TrackerCSRT_Params, TrackerKCF, TrackerKCF_Params},
    video::{TrackerMIL, TrackerMIL_Params},
};
use serde::Deserialize;
use thiserror::Error;

/// Contract violations in pool/orchestrator sequencing. These indicate a
/// caller bug, not a runtime condition to recover from.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("tracker pool initialized with an empty object list")]
    EmptyPoolInit,
    #[error("tracker kind list has {kinds} entries but {objects} objects were supplied")]
    KindCountMismatch { kinds: usize, objects: usize },
}

/// Correlation tracker algorithm bound to one object slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerKind {
    Kcf,
    Csrt,
    Mil,
}

/// A per-object, stateful frame-to-frame box predictor. No semantic
/// understanding, pure appearance correlation.
pub trait CorrelationTracker {
    /// Bind the tracker to its initial box.
    fn init(&mut self, frame: &Mat, bbox: Rect) -> Result<()>;

    /// Advance one frame. `Ok(None)` means the target was lost.
    fn advance(&mut self, frame: &Mat) -> Result<Option<Rect>>;
}

/// Produces correlation tracker instances, one per object slot.
pub trait CorrelationTrackerFactory {
    fn create(&self, kind: TrackerKind) -> Result<Box<dyn CorrelationTracker>>;
}

enum CvTracker {
    Kcf(Ptr<TrackerKCF>),
    Csrt(Ptr<TrackerCSRT>),
    Mil(Ptr<TrackerMIL>),
}

impl CorrelationTracker for CvTracker {
    fn init(&mut self, frame: &Mat, bbox: Rect) -> Result<()> {
        match self {
            CvTracker::Kcf(t) => t.init(frame, bbox)?,
            CvTracker::Csrt(t) => t.init(frame, bbox)?,
            CvTracker::Mil(t) => t.init(frame, bbox)?,
        }
        Ok(())
    }

    fn advance(&mut self, frame: &Mat) -> Result<Option<Rect>> {
        let mut bbox = Rect::default();
        // An update error on a bound tracker means the target is gone
        // (e.g. the box drifted off-frame), same as a reported loss.
        let ok = match self {
            CvTracker::Kcf(t) => t.update(frame, &mut bbox),
            CvTracker::Csrt(t) => t.update(frame, &mut bbox),
            CvTracker::Mil(t) => t.update(frame, &mut bbox),
        }
        .unwrap_or(false);
        Ok(if ok { Some(bbox) } else { None })
    }
}

/// Factory backed by the OpenCV tracking API.
pub struct OpencvTrackerFactory;

impl CorrelationTrackerFactory for OpencvTrackerFactory {
    fn create(&self, kind: TrackerKind) -> Result<Box<dyn CorrelationTracker>> {
        let tracker = match kind {
            TrackerKind::Kcf => CvTracker::Kcf(TrackerKCF::create(TrackerKCF_Params::default()?)?),
            TrackerKind::Csrt => {
                CvTracker::Csrt(TrackerCSRT::create(&TrackerCSRT_Params::default()?)?)
            }
            TrackerKind::Mil => CvTracker::Mil(TrackerMIL::create(TrackerMIL_Params::default()?)?),
        };
        Ok(Box::new(tracker))
    }
}

/// Ordered set of independent single-object trackers advanced together.
///
/// Per-object failures are not individually surfaced: one lost target
/// fails the whole advance, and the orchestrator recovers by redetecting.
#[derive(Default)]
pub struct TrackerPool {
    trackers: Vec<Box<dyn CorrelationTracker>>,
}

impl TrackerPool {
    pub fn new() -> Self {
        TrackerPool {
            trackers: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    /// Bind one tracker per (kind, box) slot. An empty box list and a
    /// kind/box length mismatch are rejected without touching existing
    /// pool state.
    pub fn initialize(
        &mut self,
        factory: &dyn CorrelationTrackerFactory,
        frame: &Mat,
        kinds: &[TrackerKind],
        boxes: &[Rect],
    ) -> Result<()> {
        if boxes.is_empty() {
            return Err(TrackError::EmptyPoolInit.into());
        }
        if kinds.len() != boxes.len() {
            return Err(TrackError::KindCountMismatch {
                kinds: kinds.len(),
                objects: boxes.len(),
            }
            .into());
        }
        let mut trackers = Vec::with_capacity(boxes.len());
        for (&kind, &bbox) in kinds.iter().zip(boxes) {
            let mut tracker = factory.create(kind)?;
            tracker.init(frame, bbox)?;
            trackers.push(tracker);
        }
        self.trackers = trackers;
        Ok(())
    }

    /// Advance every bound tracker by one frame. Returns the updated boxes
    /// in binding order, or `None` if any tracker lost its target.
    pub fn advance(&mut self, frame: &Mat) -> Result<Option<Vec<Rect>>> {
        let mut boxes = Vec::with_capacity(self.trackers.len());
        for (slot, tracker) in self.trackers.iter_mut().enumerate() {
            match tracker.advance(frame)? {
                Some(bbox) => boxes.push(bbox),
                None => {
                    log::debug!("tracker in slot {} lost its target", slot);
                    return Ok(None);
                }
            }
        }
        Ok(Some(boxes))
    }

    /// Release all bound trackers. The pool must be reinitialized before
    /// it can be advanced again.
    pub fn clear(&mut self) {
        self.trackers.clear();
    }
}
