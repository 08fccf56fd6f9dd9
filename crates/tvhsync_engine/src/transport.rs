//! Transport layer abstraction.
//!
//! The engine consumes already-decoded messages. A [`Transport`] opens a
//! [`Link`] to the backend named in the connection settings; framing,
//! sockets and encryption live behind it.

use crate::error::{TransportError, TransportErrorKind};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tvhsync_protocol::HtspMessage;
use tvhsync_store::ConnectionSettings;

/// Opens links to a backend.
pub trait Transport: Send + Sync {
    /// Connects to the backend described by `settings`.
    fn open(&self, settings: &ConnectionSettings) -> Result<Arc<dyn Link>, TransportError>;
}

/// An open, bidirectional message link.
///
/// `send` may be called from any thread; `recv` is called only by the
/// engine's receive loop.
pub trait Link: Send + Sync {
    /// Sends one message.
    fn send(&self, msg: &HtspMessage) -> Result<(), TransportError>;

    /// Waits up to `timeout` for the next message. `Ok(None)` means nothing
    /// arrived in time.
    fn recv(&self, timeout: Duration) -> Result<Option<HtspMessage>, TransportError>;

    /// Closes the link. Later calls fail with a closed error.
    fn close(&self);
}

/// Produces the server's replies to one client message.
pub type Responder = dyn Fn(&HtspMessage) -> Vec<HtspMessage> + Send + Sync;

/// A transport backed by a closure standing in for the server.
///
/// Every sent message is recorded and handed to the responder; whatever it
/// returns is queued for the receive loop. Unsolicited messages can be
/// injected with [`MockTransport::inject`].
pub struct MockTransport {
    responder: Arc<Responder>,
    open_error: Mutex<Option<TransportError>>,
    current: Mutex<Option<Arc<MockLink>>>,
    sent: Arc<Mutex<Vec<HtspMessage>>>,
    opened: Mutex<usize>,
}

impl MockTransport {
    /// Creates a mock transport that answers with `responder`.
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&HtspMessage) -> Vec<HtspMessage> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            open_error: Mutex::new(None),
            current: Mutex::new(None),
            sent: Arc::new(Mutex::new(Vec::new())),
            opened: Mutex::new(0),
        }
    }

    /// Creates a mock transport whose server never answers.
    pub fn silent() -> Self {
        Self::new(|_| Vec::new())
    }

    /// Makes the next `open` calls fail.
    pub fn fail_open(&self, kind: TransportErrorKind, message: impl Into<String>) {
        *self.open_error.lock() = Some(TransportError::new(kind, message));
    }

    /// Queues an unsolicited message on the open link.
    pub fn inject(&self, msg: HtspMessage) -> bool {
        match self.current.lock().as_ref() {
            Some(link) => {
                link.enqueue(vec![msg]);
                true
            }
            None => false,
        }
    }

    /// Breaks the open link as if the socket failed.
    pub fn break_link(&self, kind: TransportErrorKind) {
        if let Some(link) = self.current.lock().as_ref() {
            *link.broken.lock() = Some(kind);
            link.arrived.notify_all();
        }
    }

    /// Every message sent so far, across links.
    pub fn sent(&self) -> Vec<HtspMessage> {
        self.sent.lock().clone()
    }

    /// Methods of every message sent so far.
    pub fn sent_methods(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| m.method().map(str::to_string))
            .collect()
    }

    /// How many links were opened.
    pub fn open_count(&self) -> usize {
        *self.opened.lock()
    }
}

impl Transport for MockTransport {
    fn open(&self, _settings: &ConnectionSettings) -> Result<Arc<dyn Link>, TransportError> {
        if let Some(err) = self.open_error.lock().clone() {
            return Err(err);
        }
        let link = Arc::new(MockLink {
            responder: self.responder.clone(),
            sent: self.sent.clone(),
            queue: Mutex::new(VecDeque::new()),
            arrived: Condvar::new(),
            closed: AtomicBool::new(false),
            broken: Mutex::new(None),
        });
        *self.current.lock() = Some(link.clone());
        *self.opened.lock() += 1;
        Ok(link)
    }
}

struct MockLink {
    responder: Arc<Responder>,
    sent: Arc<Mutex<Vec<HtspMessage>>>,
    queue: Mutex<VecDeque<HtspMessage>>,
    arrived: Condvar,
    closed: AtomicBool,
    broken: Mutex<Option<TransportErrorKind>>,
}

impl MockLink {
    fn enqueue(&self, messages: Vec<HtspMessage>) {
        if messages.is_empty() {
            return;
        }
        self.queue.lock().extend(messages);
        self.arrived.notify_all();
    }

    fn check(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::closed());
        }
        if let Some(kind) = *self.broken.lock() {
            return Err(TransportError::new(kind, "link broken"));
        }
        Ok(())
    }
}

impl Link for MockLink {
    fn send(&self, msg: &HtspMessage) -> Result<(), TransportError> {
        self.check()?;
        self.sent.lock().push(msg.clone());
        let replies = (self.responder)(msg);
        self.enqueue(replies);
        Ok(())
    }

    fn recv(&self, timeout: Duration) -> Result<Option<HtspMessage>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock();
        loop {
            self.check()?;
            if let Some(msg) = queue.pop_front() {
                return Ok(Some(msg));
            }
            if self.arrived.wait_until(&mut queue, deadline).timed_out() {
                self.check()?;
                return Ok(queue.pop_front());
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.arrived.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo() -> MockTransport {
        MockTransport::new(|msg| {
            let mut reply = HtspMessage::new().with("ok", 1i64);
            if let Some(seq) = msg.seq() {
                reply.set_seq(seq);
            }
            vec![reply]
        })
    }

    #[test]
    fn responder_replies_are_received() {
        let transport = echo();
        let link = transport.open(&ConnectionSettings::default()).unwrap();

        let mut msg = HtspMessage::request("hello");
        msg.set_seq(3);
        link.send(&msg).unwrap();

        let reply = link.recv(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(reply.seq(), Some(3));
        assert_eq!(transport.sent_methods(), vec!["hello".to_string()]);
    }

    #[test]
    fn recv_times_out_empty() {
        let transport = MockTransport::silent();
        let link = transport.open(&ConnectionSettings::default()).unwrap();
        assert_eq!(link.recv(Duration::from_millis(10)).unwrap(), None);
    }

    #[test]
    fn closed_link_rejects_io() {
        let transport = echo();
        let link = transport.open(&ConnectionSettings::default()).unwrap();
        link.close();
        assert_eq!(
            link.send(&HtspMessage::request("hello")).unwrap_err().kind,
            TransportErrorKind::Closed
        );
        assert!(link.recv(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn open_failure_is_reported() {
        let transport = MockTransport::silent();
        transport.fail_open(TransportErrorKind::Resolve, "no such host");
        let err = transport.open(&ConnectionSettings::default()).err().unwrap();
        assert_eq!(err.kind, TransportErrorKind::Resolve);
        assert_eq!(transport.open_count(), 0);
    }

    #[test]
    fn injected_messages_arrive() {
        let transport = MockTransport::silent();
        assert!(!transport.inject(HtspMessage::request("tagAdd")));
        let link = transport.open(&ConnectionSettings::default()).unwrap();
        assert!(transport.inject(HtspMessage::request("tagAdd")));
        let msg = link.recv(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(msg.method(), Some("tagAdd"));
    }
}
