// This file is part of demorec.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Instant,
};

use log::*;

use crate::errors::{ModelError, ModelResult};

const UPDATE_SECS: f64 = 0.2;

/// Shared flag for stopping a training run between epochs.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.  Training stops at the next epoch boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Clear a previous cancellation request.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Relaxed);
    }

    pub(crate) fn check(&self) -> ModelResult<()> {
        if self.is_cancelled() {
            Err(ModelError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Copy)]
struct UpdateState {
    count: usize,
    time: f64,
    rate: f64,
}

/// Throttled progress reporting for long training loops.
///
/// Progress goes to the `log` facade at trace level; updates are limited to
/// one line every [UPDATE_SECS] so ticking from a hot loop stays cheap.
pub(crate) struct ProgressHandle {
    label: &'static str,
    total: usize,
    start: Instant,
    count: AtomicUsize,
    last_update: RwLock<Option<UpdateState>>,
}

impl ProgressHandle {
    pub fn new(label: &'static str, total: usize) -> Self {
        ProgressHandle {
            label,
            total,
            count: AtomicUsize::new(0),
            start: Instant::now(),
            last_update: RwLock::new(None),
        }
    }

    pub fn tick(&self) {
        self.advance(1);
    }

    pub fn advance(&self, n: usize) {
        let count = self.count.fetch_add(n, Ordering::Relaxed) + n;

        let last_update = match self.last_update.read() {
            Ok(lock) => *lock,
            Err(_) => return,
        };

        let thresh = if let Some(lu) = last_update {
            // bail early if the rate estimate says we don't need to update
            let n = (count - lu.count) as f64;
            if n / lu.rate < UPDATE_SECS * 0.95 {
                return;
            }

            lu.time
        } else {
            0.0
        };

        let time = self.start.elapsed().as_secs_f64();
        // bail if we haven't been running long enough
        if time < thresh + UPDATE_SECS {
            return;
        }

        // if someone else is writing, do nothing, they've handled it
        if let Ok(mut lock) = self.last_update.try_write() {
            *lock = Some(UpdateState {
                count,
                time,
                rate: count as f64 / time,
            });
            self.refresh(count, time);
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    fn refresh(&self, count: usize, time: f64) {
        trace!(
            "{}: {}/{} ({:.1}s elapsed)",
            self.label,
            count,
            self.total,
            time
        );
    }

    /// Log the final count and elapsed time.
    pub fn finish(&self) {
        let time = self.start.elapsed().as_secs_f64();
        trace!(
            "{}: finished {} of {} in {:.3}s",
            self.label,
            self.count(),
            self.total,
            time
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_progress_counts() {
        let pb = ProgressHandle::new("test", 100);
        for _ in 0..10 {
            pb.tick();
        }
        pb.advance(5);
        assert_eq!(pb.count(), 15);
        pb.finish();
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(token.check().is_ok());
        other.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(ModelError::Cancelled)));
        token.reset();
        assert!(!other.is_cancelled());
    }
}
