//! In-memory backend used by unit tests.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::ValidatorError;
use crate::model::{Action, RenderOptions, ValidationResult};
use crate::session::{SessionBackend, ValidatorSession};

#[derive(Clone, Debug, Default)]
pub struct FakeBehavior {
    pub result: ValidationResult,
    pub validate_error: Option<String>,
    pub validate_delay: Duration,
    pub capture_error: Option<String>,
}

#[derive(Default)]
struct Counters {
    opened: AtomicUsize,
    closed: AtomicUsize,
    resets: AtomicUsize,
    validations: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    shut_down: AtomicBool,
}

pub struct FakeBackend {
    behavior: FakeBehavior,
    counters: Arc<Counters>,
    // (successful opens before failing, failures remaining)
    fail_plan: Mutex<(usize, usize)>,
}

impl FakeBackend {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self {
            behavior,
            counters: Arc::new(Counters::default()),
            fail_plan: Mutex::new((0, 0)),
        }
    }

    pub fn fail_next_opens(&self, after: usize, count: usize) {
        *self.fail_plan.lock() = (after, count);
    }

    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.counters.resets.load(Ordering::SeqCst)
    }

    pub fn validations(&self) -> usize {
        self.counters.validations.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.counters.max_active.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.counters.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionBackend for FakeBackend {
    type Session = FakeSession;

    async fn open_session(&self) -> Result<FakeSession, ValidatorError> {
        {
            let mut plan = self.fail_plan.lock();
            if plan.0 > 0 {
                plan.0 -= 1;
            } else if plan.1 > 0 {
                plan.1 -= 1;
                return Err(ValidatorError::Startup("renderer unavailable".into()));
            }
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSession {
            behavior: self.behavior.clone(),
            counters: Arc::clone(&self.counters),
        })
    }

    async fn shutdown(&self) -> Result<(), ValidatorError> {
        self.counters.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeSession {
    behavior: FakeBehavior,
    counters: Arc<Counters>,
}

#[async_trait]
impl ValidatorSession for FakeSession {
    async fn reset(&self) -> Result<(), ValidatorError> {
        self.counters.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn validate(
        &self,
        _actions: &[Action],
        _options: Option<&RenderOptions>,
    ) -> Result<ValidationResult, ValidatorError> {
        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_active.fetch_max(active, Ordering::SeqCst);
        self.counters.validations.fetch_add(1, Ordering::SeqCst);
        if !self.behavior.validate_delay.is_zero() {
            tokio::time::sleep(self.behavior.validate_delay).await;
        }
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
        match &self.behavior.validate_error {
            Some(message) => Err(ValidatorError::Bridge(message.clone())),
            None => Ok(self.behavior.result.clone()),
        }
    }

    async fn capture_page(&self, target: &Path) -> Result<(), ValidatorError> {
        if let Some(message) = &self.behavior.capture_error {
            return Err(ValidatorError::Bridge(message.clone()));
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(target, b"\x89PNG-fake").await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), ValidatorError> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
