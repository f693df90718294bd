// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// One-shot completion shared by every source that may end a print.
//
// The host's submission callback holds a clone and the dispatcher's timeout
// holds a weak handle. Whichever calls `finish` first decides the outcome;
// later calls are ignored and report `false`.

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::oneshot;

use printbridge_core::error::{BridgeError, Result};

/// Clonable handle that resolves a print exactly once.
#[derive(Debug, Clone)]
pub struct Completion {
    sender: Arc<Mutex<Option<oneshot::Sender<Result<()>>>>>,
}

/// Non-owning handle. Once every [`Completion`] is gone the print counts as
/// abandoned and `finish` through this handle has no effect.
#[derive(Debug, Clone)]
pub struct WeakCompletion {
    sender: Weak<Mutex<Option<oneshot::Sender<Result<()>>>>>,
}

/// Receiving side of a [`Completion`].
#[derive(Debug)]
pub struct Outcome {
    receiver: oneshot::Receiver<Result<()>>,
}

impl Completion {
    pub fn new() -> (Self, Outcome) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Arc::new(Mutex::new(Some(tx))),
            },
            Outcome { receiver: rx },
        )
    }

    /// Resolve the print. Returns `true` only for the call that won.
    pub fn finish(&self, result: Result<()>) -> bool {
        let sender = match self.sender.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        match sender {
            // The receiver may already be gone; the outcome is still ours.
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.sender.lock().map(|slot| slot.is_none()).unwrap_or(true)
    }

    pub fn downgrade(&self) -> WeakCompletion {
        WeakCompletion {
            sender: Arc::downgrade(&self.sender),
        }
    }
}

impl WeakCompletion {
    /// Same as [`Completion::finish`] while a strong handle is alive.
    pub fn finish(&self, result: Result<()>) -> bool {
        match self.sender.upgrade() {
            Some(sender) => Completion { sender }.finish(result),
            None => false,
        }
    }
}

impl Outcome {
    /// Wait for the first `finish`. If every handle is dropped without
    /// finishing, the print counts as failed.
    pub async fn wait(self) -> Result<()> {
        self.receiver.await.unwrap_or_else(|_| {
            Err(BridgeError::Print(
                "print host abandoned the job without reporting".into(),
            ))
        })
    }
}
