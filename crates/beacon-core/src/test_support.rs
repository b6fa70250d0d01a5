//! In-memory sink for exercising the relay without sockets.

use async_trait::async_trait;
use beacon_protocol::{codec, WireMessage};
use beacon_transport::{FrameSink, TransportError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Records every frame sent to it.
pub struct RecordingSink {
    frames: Mutex<Vec<String>>,
    open: AtomicBool,
    fail_sends: AtomicBool,
    stall_sends: AtomicBool,
    close_calls: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            stall_sends: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
        })
    }

    /// A sink that reports open but fails every send.
    pub fn failing() -> Arc<Self> {
        let sink = Self::new();
        sink.fail_sends.store(true, Ordering::SeqCst);
        sink
    }

    /// A sink whose peer stopped reading: sends never complete.
    pub fn stalled() -> Arc<Self> {
        let sink = Self::new();
        sink.stall();
        sink
    }

    /// Stop completing sends from now on.
    pub fn stall(&self) {
        self.stall_sends.store(true, Ordering::SeqCst);
    }

    /// A sink whose socket already reports closed.
    pub fn closed() -> Arc<Self> {
        let sink = Self::new();
        sink.open.store(false, Ordering::SeqCst);
        sink
    }

    pub fn messages(&self) -> Vec<WireMessage> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .map(|text| codec::decode(text).unwrap())
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.messages().iter().filter(|m| m.kind() == kind).count()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            self.open.store(false, Ordering::SeqCst);
            return Err(TransportError::SendFailed("broken pipe".into()));
        }
        if self.stall_sends.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.frames.lock().unwrap().push(text.to_owned());
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
