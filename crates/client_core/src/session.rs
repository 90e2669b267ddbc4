//! Signed-in user context and the generation counter that invalidates in-flight results.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use shared::domain::UserId;

use crate::error::MutationError;

#[derive(Debug)]
struct SessionInner {
    user_id: UserId,
    generation: AtomicU64,
    active: AtomicBool,
}

/// Established by [`Session::sign_in`], invalidated by [`Session::sign_out`].
/// Clones share state.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

/// Generation observed when a remote call was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    generation: u64,
}

impl Session {
    pub fn sign_in(user_id: UserId) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                user_id,
                generation: AtomicU64::new(0),
                active: AtomicBool::new(true),
            }),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.inner.user_id
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Moves to a new generation; results of calls issued earlier get discarded.
    pub fn advance(&self) -> u64 {
        self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn sign_out(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
        self.advance();
    }

    pub fn ticket(&self) -> Result<Ticket, MutationError> {
        if !self.is_active() {
            return Err(MutationError::SessionClosed);
        }
        Ok(Ticket {
            generation: self.generation(),
        })
    }

    pub fn ensure_current(&self, ticket: Ticket) -> Result<(), MutationError> {
        if !self.is_active() {
            return Err(MutationError::SessionClosed);
        }
        let current = self.generation();
        if current != ticket.generation {
            return Err(MutationError::Stale {
                issued: ticket.generation,
                current,
            });
        }
        Ok(())
    }
}
