//! Scripted in-memory transport.
//!
//! Replies are queued up front and handed out in request order. Every request
//! is recorded, so tests can assert both what was sent and that nothing was
//! sent at all. A gated reply holds its request open until the test releases
//! it, which makes out-of-order responses reproducible.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::oneshot;

use super::Transport;
use crate::protocol::{Reply, Request};
use crate::{Error, Result};

type GatedReply = std::result::Result<Reply, String>;

enum Scripted {
    Ready(Reply),
    Fail(String),
    Gated(oneshot::Receiver<GatedReply>),
}

/// Handle releasing a gated reply.
pub struct ReplyGate {
    sender: oneshot::Sender<GatedReply>,
}

impl ReplyGate {
    /// Let the held request complete with `reply`.
    pub fn release(self, reply: Reply) {
        let _ = self.sender.send(Ok(reply));
    }

    /// Let the held request complete with a record reply.
    pub fn release_record(self, record: Value) {
        self.release(Reply::Record(record));
    }

    /// Let the held request fail with a remote error.
    pub fn fail(self, message: impl Into<String>) {
        let _ = self.sender.send(Err(message.into()));
    }
}

/// Transport answering from a queue of scripted replies.
#[derive(Default)]
pub struct ScriptedTransport {
    requests: Mutex<Vec<Request>>,
    replies: Mutex<VecDeque<Scripted>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply.
    pub fn push_reply(&self, reply: Reply) {
        self.lock_replies().push_back(Scripted::Ready(reply));
    }

    /// Queue a record reply.
    pub fn push_record(&self, record: Value) {
        self.push_reply(Reply::Record(record));
    }

    /// Queue a record-list reply.
    pub fn push_records(&self, records: Vec<Value>) {
        self.push_reply(Reply::Records(records));
    }

    /// Queue an acknowledgement.
    pub fn push_ack(&self) {
        self.push_reply(Reply::Ack);
    }

    /// Queue a remote failure.
    pub fn push_error(&self, message: impl Into<String>) {
        self.lock_replies().push_back(Scripted::Fail(message.into()));
    }

    /// Queue a reply that is only delivered once the returned gate is used.
    pub fn push_gated(&self) -> ReplyGate {
        let (sender, receiver) = oneshot::channel();
        self.lock_replies().push_back(Scripted::Gated(receiver));
        ReplyGate { sender }
    }

    /// All requests received so far, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.lock_requests().clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock_requests().len()
    }

    pub fn last_request(&self) -> Option<Request> {
        self.lock_requests().last().cloned()
    }

    /// Number of queued replies not yet consumed.
    pub fn pending_replies(&self) -> usize {
        self.lock_replies().len()
    }

    fn lock_requests(&self) -> std::sync::MutexGuard<'_, Vec<Request>> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<Scripted>> {
        self.replies.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: Request) -> Result<Reply> {
        let operation = request.operation();
        tracing::info!("[ScriptedTransport] {} {}", operation, request.endpoint());
        self.lock_requests().push(request);

        let next = self.lock_replies().pop_front();
        let remote_error = |message: String| Error::Remote {
            operation: operation.to_string(),
            message,
        };

        match next {
            Some(Scripted::Ready(reply)) => Ok(reply),
            Some(Scripted::Fail(message)) => Err(remote_error(message)),
            Some(Scripted::Gated(receiver)) => match receiver.await {
                Ok(Ok(reply)) => Ok(reply),
                Ok(Err(message)) => Err(remote_error(message)),
                Err(_) => Err(Error::Transport(format!("{}: reply gate dropped", operation))),
            },
            None => Err(Error::Transport(format!(
                "no scripted reply for {}",
                operation
            ))),
        }
    }
}
