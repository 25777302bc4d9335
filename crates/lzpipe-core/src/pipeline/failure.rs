use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::telemetry::tags;
use crate::LzpipeError;

/// First-error slot shared by the driver and every task of one stream.
///
/// Only the first reported error is kept. The flag lets tasks that are still
/// queued skip their work and lets the driver stop reading.
#[derive(Debug, Default)]
pub(crate) struct StreamFailure {
    failed: AtomicBool,
    first: Mutex<Option<LzpipeError>>,
}

impl StreamFailure {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub(crate) fn fail(&self, error: LzpipeError) {
        let mut slot = match self.first.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_none() {
            tracing::debug!(target: tags::TARGET_PIPELINE, %error, "stream failed");
            *slot = Some(error);
        } else {
            tracing::trace!(target: tags::TARGET_PIPELINE, %error, "additional stream error ignored");
        }
        self.failed.store(true, Ordering::Release);
    }

    pub(crate) fn take(&self) -> Option<LzpipeError> {
        let mut slot = match self.first.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.take()
    }
}
