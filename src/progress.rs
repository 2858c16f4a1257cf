// src/progress.rs

//! Progress reporting for long-running steps
//!
//! Downloads, extraction and compression report `(current, total)` units to
//! an optional observer. Without an observer the work is identical, it just
//! goes unreported.

/// Which step is reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Bytes received from the network
    Download,
    /// Archive entries unpacked
    Extract,
    /// Files added to a new archive
    Compress,
}

impl Stage {
    pub fn as_str(&self) -> &str {
        match self {
            Stage::Download => "download",
            Stage::Extract => "extract",
            Stage::Compress => "compress",
        }
    }
}

/// A single progress update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub current: u64,
    /// Total units, when known up front
    pub total: Option<u64>,
}

/// Sink for progress updates
///
/// Implementations must be cheap; they are called once per chunk or entry.
pub trait ProgressObserver {
    fn on_progress(&self, event: ProgressEvent);

    /// Called once when the stage reaches a terminal state
    fn on_finish(&self, _stage: Stage) {}
}

/// Optional observer bound to one stage
#[derive(Clone, Copy)]
pub struct Progress<'a> {
    stage: Stage,
    observer: Option<&'a dyn ProgressObserver>,
}

impl<'a> Progress<'a> {
    pub fn new(stage: Stage, observer: Option<&'a dyn ProgressObserver>) -> Self {
        Self { stage, observer }
    }

    /// A progress handle that reports nowhere
    pub fn silent(stage: Stage) -> Self {
        Self::new(stage, None)
    }

    pub fn report(&self, current: u64, total: Option<u64>) {
        if let Some(observer) = self.observer {
            observer.on_progress(ProgressEvent {
                stage: self.stage,
                current,
                total,
            });
        }
    }

    pub fn finish(&self) {
        if let Some(observer) = self.observer {
            observer.on_finish(self.stage);
        }
    }
}
