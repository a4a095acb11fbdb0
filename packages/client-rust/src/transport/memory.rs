//! In-process transport for tests and local tooling.
//!
//! `MemoryConnection` hands out `MemoryChannel`s and can be scripted to fail
//! the next channel creations. Every lifecycle signal a broker would send can
//! be injected through the `simulate_*` hooks on the channel.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use super::{
    BasicReturn, ChannelFactory, ChannelId, ChannelListener, ListenerId, RecoverableChannel,
    RecoveryListener, ShutdownInitiator, ShutdownReason, TransportChannel, TransportError,
};

/// Reply code the memory channel reports for an application-initiated close.
const REPLY_SUCCESS: u16 = 200;

// ---------------------------------------------------------------------------
// MemoryConnection
// ---------------------------------------------------------------------------

/// In-process connection that opens [`MemoryChannel`]s.
#[derive(Debug)]
pub struct MemoryConnection {
    next_channel: AtomicU64,
    recoverable: bool,
    scripted_failures: Mutex<VecDeque<TransportError>>,
    channels: Mutex<Vec<Arc<MemoryChannel>>>,
}

impl MemoryConnection {
    /// Connection whose channels support auto-recovery.
    #[must_use]
    pub fn new() -> Self {
        Self::with_recovery(true)
    }

    /// Connection whose channels lack the auto-recovery capability.
    #[must_use]
    pub fn non_recoverable() -> Self {
        Self::with_recovery(false)
    }

    fn with_recovery(recoverable: bool) -> Self {
        Self {
            next_channel: AtomicU64::new(1),
            recoverable,
            scripted_failures: Mutex::new(VecDeque::new()),
            channels: Mutex::new(Vec::new()),
        }
    }

    /// Makes the next `create_channel` call fail with `error`. Calls queue up.
    pub fn fail_next_create(&self, error: TransportError) {
        self.scripted_failures.lock().push_back(error);
    }

    /// Number of channels opened so far.
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.channels.lock().len()
    }

    /// Every channel opened so far, oldest first.
    #[must_use]
    pub fn channels(&self) -> Vec<Arc<MemoryChannel>> {
        self.channels.lock().clone()
    }

    #[must_use]
    pub fn last_channel(&self) -> Option<Arc<MemoryChannel>> {
        self.channels.lock().last().cloned()
    }
}

impl Default for MemoryConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelFactory for MemoryConnection {
    async fn create_channel(&self) -> Result<Arc<dyn TransportChannel>, TransportError> {
        if let Some(error) = self.scripted_failures.lock().pop_front() {
            return Err(error);
        }
        let id = ChannelId(self.next_channel.fetch_add(1, Ordering::Relaxed));
        let channel = Arc::new(MemoryChannel::new(id, self.recoverable));
        self.channels.lock().push(Arc::clone(&channel));
        trace!(channel = %id, "memory channel opened");
        Ok(channel as Arc<dyn TransportChannel>)
    }
}

// ---------------------------------------------------------------------------
// MemoryChannel
// ---------------------------------------------------------------------------

/// In-process channel with injectable lifecycle signals.
pub struct MemoryChannel {
    id: ChannelId,
    recoverable: bool,
    open: AtomicBool,
    confirms: AtomicBool,
    close_calls: AtomicUsize,
    next_listener: AtomicU64,
    listeners: Mutex<HashMap<ListenerId, Arc<dyn ChannelListener>>>,
    recovery_listeners: Mutex<HashMap<ListenerId, Arc<dyn RecoveryListener>>>,
}

impl std::fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

impl MemoryChannel {
    fn new(id: ChannelId, recoverable: bool) -> Self {
        Self {
            id,
            recoverable,
            open: AtomicBool::new(true),
            confirms: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            next_listener: AtomicU64::new(1),
            listeners: Mutex::new(HashMap::new()),
            recovery_listeners: Mutex::new(HashMap::new()),
        }
    }

    fn next_listener_id(&self) -> ListenerId {
        ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed))
    }

    // Listeners are invoked outside the table lock so they may re-enter.
    fn each_listener(&self, f: impl Fn(&dyn ChannelListener)) {
        let listeners: Vec<_> = self.listeners.lock().values().cloned().collect();
        for listener in &listeners {
            f(listener.as_ref());
        }
    }

    /// Whether `confirm_select` has been issued.
    #[must_use]
    pub fn confirms_selected(&self) -> bool {
        self.confirms.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    #[must_use]
    pub fn recovery_listener_count(&self) -> usize {
        self.recovery_listeners.lock().len()
    }

    /// Number of `close` calls, including no-op ones.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::Acquire)
    }

    pub fn simulate_ack(&self, delivery_tag: u64, multiple: bool) {
        self.each_listener(|l| l.on_ack(delivery_tag, multiple));
    }

    pub fn simulate_nack(&self, delivery_tag: u64, multiple: bool) {
        self.each_listener(|l| l.on_nack(delivery_tag, multiple));
    }

    pub fn simulate_return(&self, returned: &BasicReturn) {
        self.each_listener(|l| l.on_return(returned));
    }

    /// Broker-side shutdown: the channel closes and listeners are told why.
    pub fn simulate_shutdown(&self, reason: &ShutdownReason) {
        self.open.store(false, Ordering::Release);
        self.each_listener(|l| l.on_shutdown(Some(reason)));
    }

    /// Transport auto-recovery: the channel reopens and recovery listeners fire.
    pub fn simulate_recovery(&self) {
        self.open.store(true, Ordering::Release);
        let listeners: Vec<_> = self.recovery_listeners.lock().values().cloned().collect();
        for listener in &listeners {
            listener.on_recovered();
        }
    }
}

impl TransportChannel for MemoryChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn confirm_select(&self) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::OperationInterrupted { reason: None });
        }
        self.confirms.store(true, Ordering::Release);
        Ok(())
    }

    fn add_listener(&self, listener: Arc<dyn ChannelListener>) -> ListenerId {
        let id = self.next_listener_id();
        self.listeners.lock().insert(id, listener);
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.lock().remove(&id);
    }

    fn as_recoverable(&self) -> Option<&dyn RecoverableChannel> {
        if self.recoverable {
            Some(self as &dyn RecoverableChannel)
        } else {
            None
        }
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::AcqRel);
        if self.open.swap(false, Ordering::AcqRel) {
            let reason = ShutdownReason::new(ShutdownInitiator::Application, REPLY_SUCCESS, "Goodbye");
            self.each_listener(|l| l.on_shutdown(Some(&reason)));
        }
    }
}

impl RecoverableChannel for MemoryChannel {
    fn add_recovery_listener(&self, listener: Arc<dyn RecoveryListener>) -> ListenerId {
        let id = self.next_listener_id();
        self.recovery_listeners.lock().insert(id, listener);
        id
    }

    fn remove_recovery_listener(&self, id: ListenerId) {
        self.recovery_listeners.lock().remove(&id);
    }
}
