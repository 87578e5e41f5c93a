//! Fixed-size pool of renderer sessions with FIFO leasing.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tracing::{debug, info, warn};

use crate::error::ValidatorError;
use crate::session::{SessionBackend, ValidatorSession};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Started,
    Closed,
}

struct PoolShared<B: SessionBackend> {
    backend: B,
    size: usize,
    idle: Mutex<VecDeque<B::Session>>,
    // Tokio's semaphore is fair, so waiting leases are served in arrival order.
    permits: Semaphore,
    lifecycle: AsyncMutex<Lifecycle>,
    started: AtomicBool,
}

impl<B: SessionBackend> PoolShared<B> {
    fn give_back(&self, session: B::Session) {
        self.idle.lock().push_back(session);
        self.permits.add_permits(1);
    }
}

/// At most `size` validations hold a session at once; the rest wait their turn.
pub struct SessionPool<B: SessionBackend> {
    shared: Arc<PoolShared<B>>,
}

impl<B: SessionBackend> Clone for SessionPool<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B: SessionBackend> SessionPool<B> {
    pub fn new(backend: B, size: usize) -> Self {
        let size = size.max(1);
        Self {
            shared: Arc::new(PoolShared {
                backend,
                size,
                idle: Mutex::new(VecDeque::with_capacity(size)),
                permits: Semaphore::new(0),
                lifecycle: AsyncMutex::new(Lifecycle::Idle),
                started: AtomicBool::new(false),
            }),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.shared.size
    }

    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    /// Sessions currently waiting in the idle queue.
    pub fn available(&self) -> usize {
        self.shared.idle.lock().len()
    }

    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
    }

    /// Open all sessions. Concurrent callers share a single initialization; later calls
    /// return immediately. A failed start closes whatever was opened and may be retried.
    pub async fn start(&self) -> Result<(), ValidatorError> {
        if self.is_started() {
            return Ok(());
        }
        let mut lifecycle = self.shared.lifecycle.lock().await;
        match *lifecycle {
            Lifecycle::Started => return Ok(()),
            Lifecycle::Closed => return Err(ValidatorError::PoolClosed),
            Lifecycle::Idle => {}
        }

        let mut opened = Vec::with_capacity(self.shared.size);
        for index in 0..self.shared.size {
            match self.shared.backend.open_session().await {
                Ok(session) => opened.push(session),
                Err(err) => {
                    warn!(target: "validator-pool", index, error = %err, "session startup failed");
                    for session in opened {
                        if let Err(close_err) = session.close().await {
                            debug!(target: "validator-pool", error = %close_err, "close after failed start");
                        }
                    }
                    return Err(err);
                }
            }
        }

        self.shared.idle.lock().extend(opened);
        self.shared.permits.add_permits(self.shared.size);
        *lifecycle = Lifecycle::Started;
        self.shared.started.store(true, Ordering::Release);
        info!(target: "validator-pool", size = self.shared.size, "session pool started");
        Ok(())
    }

    /// Wait for an idle session. The pool is started on first use.
    pub async fn lease(&self) -> Result<SessionLease<B>, ValidatorError> {
        self.start().await?;
        let permit = self
            .shared
            .permits
            .acquire()
            .await
            .map_err(|_| ValidatorError::PoolClosed)?;
        permit.forget();

        let session = self.shared.idle.lock().pop_front();
        match session {
            Some(session) => Ok(SessionLease {
                session: Some(session),
                shared: Arc::clone(&self.shared),
            }),
            None => {
                self.shared.permits.add_permits(1);
                Err(ValidatorError::PoolClosed)
            }
        }
    }

    /// Return a session early. Dropping the lease has the same effect.
    pub fn release(&self, lease: SessionLease<B>) {
        drop(lease);
    }

    /// Close every idle session and shut the backend down. Must not race active leases.
    pub async fn close(&self) -> Result<(), ValidatorError> {
        let mut lifecycle = self.shared.lifecycle.lock().await;
        if *lifecycle == Lifecycle::Closed {
            return Ok(());
        }
        let was_started = *lifecycle == Lifecycle::Started;
        *lifecycle = Lifecycle::Closed;
        self.shared.started.store(false, Ordering::Release);
        self.shared.permits.close();

        let sessions: Vec<B::Session> = self.shared.idle.lock().drain(..).collect();
        for session in sessions {
            if let Err(err) = session.close().await {
                warn!(target: "validator-pool", error = %err, "failed to close session");
            }
        }
        let result = self.shared.backend.shutdown().await;
        if was_started {
            info!(target: "validator-pool", "session pool closed");
        }
        result
    }
}

/// Exclusive use of one session; returns it to the pool when dropped.
pub struct SessionLease<B: SessionBackend> {
    session: Option<B::Session>,
    shared: Arc<PoolShared<B>>,
}

impl<B: SessionBackend> Deref for SessionLease<B> {
    type Target = B::Session;

    fn deref(&self) -> &Self::Target {
        self.session
            .as_ref()
            .unwrap_or_else(|| unreachable!("session is only taken in drop"))
    }
}

impl<B: SessionBackend> Drop for SessionLease<B> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.shared.give_back(session);
        }
    }
}
