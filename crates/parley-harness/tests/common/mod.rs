//! Client stream fake shared by the harness suites

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use parley_core::{BlockStatus, BlockStore, EmitError, EventKind, SessionStats};
use parley_harness::{ChatResponse, ChatStream};
use std::sync::Arc;

/// Records every response; can start failing after `n` sends and can look
/// up the block's status the moment `done` arrives
#[derive(Default)]
pub struct RecordingStream {
    responses: Mutex<Vec<ChatResponse>>,
    attempts: Mutex<Vec<EventKind>>,
    fail_after: Option<usize>,
    store: Option<Arc<dyn BlockStore>>,
    status_at_done: Mutex<Option<BlockStatus>>,
}

impl RecordingStream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_after(n: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_after: Some(n),
            ..Self::default()
        })
    }

    pub fn observing(store: Arc<dyn BlockStore>) -> Arc<Self> {
        Arc::new(Self {
            store: Some(store),
            ..Self::default()
        })
    }

    pub fn responses(&self) -> Vec<ChatResponse> {
        self.responses.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.responses.lock().iter().map(|r| r.kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.responses.lock().iter().filter(|r| r.kind == kind).count()
    }

    /// Sends tried, including rejected ones
    pub fn attempts(&self, kind: EventKind) -> usize {
        self.attempts.lock().iter().filter(|k| **k == kind).count()
    }

    pub fn payload(&self, kind: EventKind) -> serde_json::Value {
        let responses = self.responses.lock();
        let response = responses.iter().find(|r| r.kind == kind).unwrap();
        serde_json::from_str(&response.data).unwrap()
    }

    pub fn summary(&self) -> SessionStats {
        self.responses
            .lock()
            .iter()
            .find(|r| r.done)
            .and_then(|r| r.summary.clone())
            .unwrap()
    }

    pub fn status_at_done(&self) -> Option<BlockStatus> {
        *self.status_at_done.lock()
    }
}

#[async_trait]
impl ChatStream for RecordingStream {
    async fn send(&self, response: ChatResponse) -> Result<(), EmitError> {
        let attempt = {
            let mut attempts = self.attempts.lock();
            attempts.push(response.kind);
            attempts.len()
        };
        if self.fail_after.is_some_and(|n| attempt > n) {
            return Err(EmitError::Disconnected("client went away".into()));
        }

        if response.done {
            if let (Some(store), Some(block)) = (&self.store, response.block_id) {
                let status = store.get_block(block).await.ok().map(|b| b.status);
                *self.status_at_done.lock() = status;
            }
        }
        self.responses.lock().push(response);
        Ok(())
    }
}
