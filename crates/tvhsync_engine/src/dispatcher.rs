//! Request/response correlation and push routing.

use crate::error::{EngineError, EngineResult};
use crate::pool::PoolHandle;
use crate::signal::Completion;
use crate::transport::Link;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace, warn};
use tvhsync_protocol::{HtspMessage, Push};

/// Receives pushes in arrival order on the push lane.
pub trait PushHandler: Send + Sync {
    /// Handles one push. May issue blocking requests.
    fn on_push(&self, push: Push);
}

/// Callback invoked with a response on the worker pool.
pub type ResponseCallback = Box<dyn FnOnce(HtspMessage) + Send + 'static>;

enum Slot {
    Callback(ResponseCallback),
    Waiter(Arc<Completion<HtspMessage>>),
}

pub(crate) enum LaneItem {
    Push(Push),
    Barrier(Arc<Completion<()>>),
}

/// Correlates requests with responses and routes pushes.
///
/// Every request gets a fresh `seq` and a single-use slot. Callback slots
/// run on the worker pool; waiter slots are completed directly on the
/// receive thread so a pool thread blocked on a response never starves the
/// delivery of that response.
pub struct Dispatcher {
    next_seq: AtomicU32,
    slots: Mutex<HashMap<u32, Slot>>,
    link: RwLock<Option<Arc<dyn Link>>>,
    lane: Mutex<Option<UnboundedSender<LaneItem>>>,
    pool: PoolHandle,
}

impl Dispatcher {
    /// Creates a dispatcher and the receiving end of its push lane.
    pub(crate) fn new(pool: PoolHandle) -> (Self, UnboundedReceiver<LaneItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            next_seq: AtomicU32::new(1),
            slots: Mutex::new(HashMap::new()),
            link: RwLock::new(None),
            lane: Mutex::new(Some(tx)),
            pool,
        };
        (dispatcher, rx)
    }

    /// Routes outgoing messages through `link`.
    pub(crate) fn attach(&self, link: Arc<dyn Link>) {
        *self.link.write() = Some(link);
    }

    /// Forgets the link and drops every pending slot. Blocked waiters wake
    /// up with [`EngineError::NotConnected`].
    pub(crate) fn detach(&self) {
        self.link.write().take();
        let slots: Vec<Slot> = self.slots.lock().drain().map(|(_, slot)| slot).collect();
        if !slots.is_empty() {
            debug!(count = slots.len(), "dropping pending requests");
        }
        for slot in slots {
            if let Slot::Waiter(waiter) = slot {
                waiter.abandon();
            }
        }
    }

    /// Returns true while a link is attached.
    pub fn is_attached(&self) -> bool {
        self.link.read().is_some()
    }

    /// Number of requests still waiting for a response.
    pub fn pending(&self) -> usize {
        self.slots.lock().len()
    }

    /// Sends a message without expecting a response.
    pub fn send(&self, msg: &HtspMessage) -> EngineResult<()> {
        let link = self.link.read().clone().ok_or(EngineError::NotConnected)?;
        trace!(method = msg.method().unwrap_or("?"), seq = msg.seq(), "sending");
        link.send(msg)?;
        Ok(())
    }

    /// Sends a request; `callback` receives the response on the worker pool.
    pub fn request<F>(&self, msg: HtspMessage, callback: F) -> EngineResult<()>
    where
        F: FnOnce(HtspMessage) + Send + 'static,
    {
        self.submit(msg, Slot::Callback(Box::new(callback)))
            .map(|_| ())
    }

    /// Sends a request and blocks until the response arrives or `timeout`
    /// elapses.
    pub fn request_blocking(&self, msg: HtspMessage, timeout: Duration) -> EngineResult<HtspMessage> {
        let waiter = Arc::new(Completion::new());
        let seq = self.submit(msg, Slot::Waiter(waiter.clone()))?;
        match waiter.wait_timeout(timeout) {
            Some(response) => Ok(response),
            None => {
                self.slots.lock().remove(&seq);
                if waiter.is_abandoned() {
                    Err(EngineError::NotConnected)
                } else {
                    Err(EngineError::Timeout)
                }
            }
        }
    }

    fn submit(&self, mut msg: HtspMessage, slot: Slot) -> EngineResult<u32> {
        let seq = self.fresh_seq();
        msg.set_seq(seq);
        self.slots.lock().insert(seq, slot);
        if let Err(err) = self.send(&msg) {
            self.slots.lock().remove(&seq);
            return Err(err);
        }
        Ok(seq)
    }

    fn fresh_seq(&self) -> u32 {
        loop {
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            if seq != 0 {
                return seq;
            }
        }
    }

    /// Delivers one incoming message: a response to its slot, a push to the
    /// push lane. Late responses are discarded.
    pub fn route(&self, msg: HtspMessage) {
        if let Some(seq) = msg.seq() {
            let slot = self.slots.lock().remove(&seq);
            match slot {
                Some(Slot::Waiter(waiter)) => {
                    waiter.complete(msg);
                    return;
                }
                Some(Slot::Callback(callback)) => {
                    self.pool.execute(move || callback(msg));
                    return;
                }
                None if msg.method().is_none() => {
                    trace!(seq, "discarding response without a pending request");
                    return;
                }
                None => {}
            }
        }

        match Push::from_message(msg) {
            Ok(Some(push)) => {
                let method = push.method();
                if !self.enqueue(LaneItem::Push(push)) {
                    debug!(method, "push lane closed, push dropped");
                }
            }
            Ok(None) => trace!("ignoring unhandled push"),
            Err(err) => warn!(error = %err, "malformed push"),
        }
    }

    fn enqueue(&self, item: LaneItem) -> bool {
        match self.lane.lock().as_ref() {
            Some(tx) => tx.send(item).is_ok(),
            None => false,
        }
    }

    /// Waits until every push queued before this call has been handled.
    pub fn barrier(&self, timeout: Duration) -> bool {
        let done = Arc::new(Completion::new());
        if !self.enqueue(LaneItem::Barrier(done.clone())) {
            return false;
        }
        done.wait_timeout(timeout).is_some()
    }

    /// Closes the push lane; its thread exits after draining.
    pub(crate) fn close_lane(&self) {
        self.lane.lock().take();
    }
}

/// Starts the thread that hands pushes to `handler` one at a time.
pub(crate) fn spawn_push_lane(
    mut rx: UnboundedReceiver<LaneItem>,
    handler: Arc<dyn PushHandler>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("tvhsync-push".to_string())
        .spawn(move || {
            while let Some(item) = rx.blocking_recv() {
                match item {
                    LaneItem::Push(push) => handler.on_push(push),
                    LaneItem::Barrier(done) => {
                        done.complete(());
                    }
                }
            }
            debug!("push lane stopped");
        })
}
