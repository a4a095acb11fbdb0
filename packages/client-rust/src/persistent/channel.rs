//! The persistent channel: a supervisor that keeps one transport channel
//! alive and runs caller actions against it one at a time.
//!
//! Each invocation takes the engine lock, (re)creates the channel on demand
//! and runs the action. Failed attempts go through the
//! [`ExceptionClassifier`](super::ExceptionClassifier): suppressed failures
//! are retried after a doubling backoff, fatal ones are returned to the
//! caller. Lifecycle callbacks of the channel are republished on the event
//! bus and never touch the channel handle.
//!
//! State machine: Uninitialized -> Active <-> Recreating -> Disposed

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use burrow_core::properties::MessageProperties;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, info, warn, Instrument};

use super::backoff::RetryBackoff;
use super::config::PersistentChannelOptions;
use crate::events::{
    ChannelEvent, ChannelRecoveredEvent, ChannelShutdownEvent, EventBus, MessageConfirmationEvent,
    MessageReturnedInfo, ReturnedMessageEvent,
};
use crate::transport::{
    BasicReturn, ChannelFactory, ChannelId, ChannelListener, ListenerId, RecoveryListener,
    ShutdownReason, TransportChannel, TransportError,
};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Lifecycle state of a persistent channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No channel has been created yet.
    Uninitialized,
    /// A channel is held. It may have closed since it was last used.
    Active,
    /// The last channel was discarded; the next attempt creates a new one.
    Recreating,
    /// Terminal. Every invocation fails with [`InvokeError::Disposed`].
    Disposed,
}

/// Why an invocation did not produce a result.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    /// The call was made after the channel was disposed.
    #[error("persistent channel is disposed")]
    Disposed,
    /// The caller's cancellation token fired.
    #[error("invocation cancelled by caller")]
    Cancelled,
    /// The channel was disposed while the call was waiting or running.
    #[error("invocation aborted: persistent channel disposed")]
    Aborted,
    /// The action failed with an error classified as fatal.
    #[error(transparent)]
    Failed(#[from] TransportError),
}

// ---------------------------------------------------------------------------
// ActiveChannel
// ---------------------------------------------------------------------------

/// The live channel plus the listener registrations to undo on discard.
struct ActiveChannel {
    channel: Arc<dyn TransportChannel>,
    listener: ListenerId,
    recovery_listener: ListenerId,
}

impl ActiveChannel {
    /// Closes the channel, then detaches listeners.
    fn close(&self) {
        self.channel.close();
        self.channel.remove_listener(self.listener);
        if let Some(recoverable) = self.channel.as_recoverable() {
            recoverable.remove_recovery_listener(self.recovery_listener);
        }
        debug!(channel = %self.channel.id(), "persistent channel closed");
    }
}

/// Republishes transport callbacks of one channel as [`ChannelEvent`]s.
struct EventForwarder {
    channel: ChannelId,
    events: Arc<dyn EventBus>,
    publisher_confirms: bool,
}

impl ChannelListener for EventForwarder {
    fn on_ack(&self, delivery_tag: u64, multiple: bool) {
        if self.publisher_confirms {
            self.events.publish(ChannelEvent::Confirmation(MessageConfirmationEvent::ack(
                self.channel,
                delivery_tag,
                multiple,
            )));
        }
    }

    fn on_nack(&self, delivery_tag: u64, multiple: bool) {
        if self.publisher_confirms {
            self.events.publish(ChannelEvent::Confirmation(MessageConfirmationEvent::nack(
                self.channel,
                delivery_tag,
                multiple,
            )));
        }
    }

    fn on_return(&self, returned: &BasicReturn) {
        self.events.publish(ChannelEvent::Returned(ReturnedMessageEvent {
            channel: self.channel,
            body: returned.body.clone(),
            properties: MessageProperties::from(&returned.properties),
            info: MessageReturnedInfo {
                exchange: returned.exchange.clone(),
                routing_key: returned.routing_key.clone(),
                reply_text: returned.reply_text.clone(),
            },
        }));
    }

    fn on_shutdown(&self, reason: Option<&ShutdownReason>) {
        self.events.publish(ChannelEvent::Shutdown(ChannelShutdownEvent {
            channel: self.channel,
            reason: reason.cloned(),
        }));
    }
}

impl RecoveryListener for EventForwarder {
    fn on_recovered(&self) {
        self.events.publish(ChannelEvent::Recovered(ChannelRecoveredEvent {
            channel: self.channel,
        }));
    }
}

// ---------------------------------------------------------------------------
// PersistentChannel
// ---------------------------------------------------------------------------

/// Runs actions against a lazily created, automatically replaced channel.
///
/// Actions run strictly one at a time; waiting callers are served in
/// arrival order. An action may run more than once, each time against
/// whatever channel is current, so it must be safe to repeat.
pub struct PersistentChannel {
    factory: Arc<dyn ChannelFactory>,
    events: Arc<dyn EventBus>,
    options: PersistentChannelOptions,
    lock: Mutex<()>,
    active: ArcSwapOption<ActiveChannel>,
    ever_created: AtomicBool,
    disposed: AtomicBool,
    disposal: CancellationToken,
}

impl PersistentChannel {
    #[must_use]
    pub fn new(
        factory: Arc<dyn ChannelFactory>,
        events: Arc<dyn EventBus>,
        options: PersistentChannelOptions,
    ) -> Self {
        Self {
            factory,
            events,
            options,
            lock: Mutex::new(()),
            active: ArcSwapOption::empty(),
            ever_created: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            disposal: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn options(&self) -> &PersistentChannelOptions {
        &self.options
    }

    #[must_use]
    pub fn state(&self) -> ChannelState {
        if self.is_disposed() {
            ChannelState::Disposed
        } else if self.active.load().is_some() {
            ChannelState::Active
        } else if self.ever_created.load(Ordering::Acquire) {
            ChannelState::Recreating
        } else {
            ChannelState::Uninitialized
        }
    }

    /// Id of the channel currently held, if any.
    #[must_use]
    pub fn channel_id(&self) -> Option<ChannelId> {
        self.active.load().as_ref().map(|active| active.channel.id())
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Runs `action` against the current channel until it succeeds or fails
    /// fatally.
    ///
    /// # Errors
    ///
    /// See [`invoke_with_cancellation`](Self::invoke_with_cancellation).
    pub async fn invoke<T, F, Fut>(&self, action: F) -> Result<T, InvokeError>
    where
        F: FnMut(Arc<dyn TransportChannel>) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        self.invoke_with_cancellation(action, &CancellationToken::new())
            .await
    }

    /// Like [`invoke`](Self::invoke), but gives up when `cancellation` fires.
    ///
    /// The token is observed while waiting for the lock, while creating a
    /// channel, while the action runs and during backoff.
    ///
    /// # Errors
    ///
    /// - `InvokeError::Disposed` if the channel was already disposed.
    /// - `InvokeError::Cancelled` if `cancellation` fired first.
    /// - `InvokeError::Aborted` if the channel was disposed during the call.
    /// - `InvokeError::Failed` with the first failure classified as fatal.
    pub async fn invoke_with_cancellation<T, F, Fut>(
        &self,
        action: F,
        cancellation: &CancellationToken,
    ) -> Result<T, InvokeError>
    where
        F: FnMut(Arc<dyn TransportChannel>) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        if self.is_disposed() {
            return Err(InvokeError::Disposed);
        }
        self.run(action, cancellation)
            .instrument(debug_span!("persistent_channel_invoke"))
            .await
    }

    async fn run<T, F, Fut>(
        &self,
        mut action: F,
        cancellation: &CancellationToken,
    ) -> Result<T, InvokeError>
    where
        F: FnMut(Arc<dyn TransportChannel>) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let _guard = self.until_cancelled(cancellation, self.lock.lock()).await?;
        let mut backoff = RetryBackoff::new(self.options.min_retry_delay, self.options.max_retry_delay);
        let mut attempt: u32 = 0;

        loop {
            if self.is_disposed() {
                return Err(InvokeError::Aborted);
            }
            if cancellation.is_cancelled() {
                return Err(InvokeError::Cancelled);
            }
            attempt += 1;

            let result = match self.until_cancelled(cancellation, self.current_channel()).await? {
                Ok(channel) => {
                    if self.is_disposed() {
                        // Disposal raced with creation; make sure the new channel goes too.
                        self.close_active();
                        return Err(InvokeError::Aborted);
                    }
                    self.until_cancelled(cancellation, action(channel)).await?
                }
                Err(error) => Err(error),
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let verdict = self.options.classifier.classify(&error);
            if verdict.close_channel() {
                self.close_active();
            }
            if verdict.rethrow() {
                debug!(attempt, error = %error, ?verdict, "channel action failed");
                return Err(InvokeError::Failed(error));
            }

            let delay = backoff.next_delay();
            warn!(attempt, error = %error, ?verdict, ?delay, "channel action failed, retrying");
            self.until_cancelled(cancellation, tokio::time::sleep(delay))
                .await?;
        }
    }

    /// Returns the held channel, replacing it first if it has closed.
    async fn current_channel(&self) -> Result<Arc<dyn TransportChannel>, TransportError> {
        if let Some(active) = self.active.load_full() {
            if active.channel.is_open() {
                return Ok(Arc::clone(&active.channel));
            }
            debug!(channel = %active.channel.id(), "held channel is closed, discarding");
            self.close_active();
        }

        let channel = self.factory.create_channel().await?;
        let active = self.attach(channel)?;
        let channel = Arc::clone(&active.channel);
        self.active.store(Some(Arc::new(active)));
        self.ever_created.store(true, Ordering::Release);
        debug!(
            channel = %channel.id(),
            publisher_confirms = self.options.publisher_confirms,
            "persistent channel created"
        );
        Ok(channel)
    }

    /// Prepares a freshly created channel. On error the channel is closed.
    fn attach(&self, channel: Arc<dyn TransportChannel>) -> Result<ActiveChannel, TransportError> {
        let Some(recoverable) = channel.as_recoverable() else {
            channel.close();
            return Err(TransportError::NotSupported(format!(
                "channel {} does not support auto-recovery",
                channel.id()
            )));
        };

        if self.options.publisher_confirms {
            if let Err(error) = channel.confirm_select() {
                channel.close();
                return Err(error);
            }
        }

        let forwarder = Arc::new(EventForwarder {
            channel: channel.id(),
            events: Arc::clone(&self.events),
            publisher_confirms: self.options.publisher_confirms,
        });
        let recovery_listener = recoverable.add_recovery_listener(forwarder.clone());
        let listener = channel.add_listener(forwarder);

        Ok(ActiveChannel {
            channel,
            listener,
            recovery_listener,
        })
    }

    /// Atomically takes the held channel, if any, and closes it.
    fn close_active(&self) {
        if let Some(active) = self.active.swap(None) {
            active.close();
        }
    }

    async fn until_cancelled<F: Future>(
        &self,
        cancellation: &CancellationToken,
        future: F,
    ) -> Result<F::Output, InvokeError> {
        tokio::select! {
            biased;
            () = self.disposal.cancelled() => Err(InvokeError::Aborted),
            () = cancellation.cancelled() => Err(InvokeError::Cancelled),
            output = future => Ok(output),
        }
    }

    /// Shuts the channel down for good. Idempotent.
    ///
    /// Waiting and running invocations finish with [`InvokeError::Aborted`];
    /// later ones with [`InvokeError::Disposed`].
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.disposal.cancel();
        self.close_active();
        info!("persistent channel disposed");
    }
}

impl Drop for PersistentChannel {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::{OnceLock, Weak};
    use std::time::Duration;

    use async_trait::async_trait;

    use burrow_core::properties::BasicProperties;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::sync::{mpsc, Notify};
    use tokio::time::Instant;

    use super::*;
    use crate::events::BroadcastEventBus;
    use crate::transport::memory::MemoryConnection;
    use crate::transport::{ShutdownInitiator, TransportChannel};

    fn engine_with(
        connection: &Arc<MemoryConnection>,
        options: PersistentChannelOptions,
    ) -> (BroadcastEventBus, PersistentChannel) {
        let bus = BroadcastEventBus::default();
        let engine = PersistentChannel::new(connection.clone(), Arc::new(bus.clone()), options);
        (bus, engine)
    }

    fn engine(connection: &Arc<MemoryConnection>) -> (BroadcastEventBus, PersistentChannel) {
        engine_with(connection, PersistentChannelOptions::default())
    }

    fn transient() -> TransportError {
        TransportError::Client("transient".into())
    }

    /// Opens memory channels only after `release` is notified.
    struct GatedConnection {
        inner: MemoryConnection,
        entered: mpsc::UnboundedSender<()>,
        release: Notify,
    }

    #[async_trait]
    impl ChannelFactory for GatedConnection {
        async fn create_channel(&self) -> Result<Arc<dyn TransportChannel>, TransportError> {
            let _ = self.entered.send(());
            self.release.notified().await;
            self.inner.create_channel().await
        }
    }

    /// Disposes its engine right after opening a channel, before returning it.
    struct DisposingConnection {
        inner: MemoryConnection,
        engine: OnceLock<Weak<PersistentChannel>>,
    }

    #[async_trait]
    impl ChannelFactory for DisposingConnection {
        async fn create_channel(&self) -> Result<Arc<dyn TransportChannel>, TransportError> {
            let channel = self.inner.create_channel().await?;
            if let Some(engine) = self.engine.get().and_then(Weak::upgrade) {
                engine.dispose();
            }
            Ok(channel)
        }
    }

    fn slow_retry_options() -> PersistentChannelOptions {
        PersistentChannelOptions {
            min_retry_delay: Duration::from_secs(60),
            max_retry_delay: Duration::from_secs(60),
            ..PersistentChannelOptions::default()
        }
    }

    async fn open_channel(engine: &PersistentChannel) -> ChannelId {
        engine
            .invoke(|channel| async move { Ok::<_, TransportError>(channel.id()) })
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_and_caps() {
        let connection = Arc::new(MemoryConnection::new());
        let (_bus, engine) = engine(&connection);
        let attempts = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let result = engine
            .invoke(|_channel| {
                let attempts = Arc::clone(&attempts);
                async move {
                    let mut attempts = attempts.lock();
                    attempts.push(Instant::now());
                    if attempts.len() < 10 {
                        Err(transient())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "done");
        let attempts = attempts.lock();
        let gaps: Vec<u128> = attempts
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis())
            .collect();
        assert_eq!(gaps, vec![50, 100, 200, 400, 800, 1600, 3200, 5000, 5000]);
        assert_eq!(connection.created_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_resets_for_every_invocation() {
        let connection = Arc::new(MemoryConnection::new());
        let (_bus, engine) = engine(&connection);

        for _ in 0..2 {
            let failures = Arc::new(AtomicUsize::new(2));
            let started = Instant::now();
            engine
                .invoke(|_channel| {
                    let failures = Arc::clone(&failures);
                    async move {
                        if failures.load(Ordering::SeqCst) > 0 {
                            failures.fetch_sub(1, Ordering::SeqCst);
                            Err(transient())
                        } else {
                            Ok(())
                        }
                    }
                })
                .await
                .unwrap();
            assert_eq!(started.elapsed(), Duration::from_millis(150));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_channel_creation_is_retried() {
        let connection = Arc::new(MemoryConnection::new());
        connection.fail_next_create(TransportError::BrokerUnreachable("down".into()));
        connection.fail_next_create(TransportError::BrokerUnreachable("still down".into()));
        let (_bus, engine) = engine(&connection);

        let id = open_channel(&engine).await;

        assert_eq!(id, ChannelId(1));
        assert_eq!(connection.created_count(), 1);
        assert_eq!(engine.state(), ChannelState::Active);
    }

    #[tokio::test]
    async fn fatal_failure_with_close_discards_channel() {
        let connection = Arc::new(MemoryConnection::new());
        let (_bus, engine) = engine(&connection);
        let calls = Arc::new(AtomicUsize::new(0));

        let err = engine
            .invoke(|_channel| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(TransportError::interrupted(ShutdownReason::peer(
                        404,
                        "NOT_FOUND - no exchange 'missing'",
                    )))
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            InvokeError::Failed(TransportError::OperationInterrupted { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!connection.last_channel().unwrap().is_open());
        assert_eq!(engine.state(), ChannelState::Recreating);

        assert_eq!(open_channel(&engine).await, ChannelId(2));
        assert_eq!(engine.state(), ChannelState::Active);
    }

    #[tokio::test]
    async fn unclassified_failure_keeps_channel() {
        let connection = Arc::new(MemoryConnection::new());
        let (_bus, engine) = engine(&connection);

        let err = engine
            .invoke(|_channel| async { Err::<(), _>(TransportError::Other(anyhow::anyhow!("boom"))) })
            .await
            .unwrap_err();

        assert!(matches!(err, InvokeError::Failed(TransportError::Other(_))));
        assert!(connection.last_channel().unwrap().is_open());
        assert_eq!(open_channel(&engine).await, ChannelId(1));
        assert_eq!(connection.created_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn internal_error_retries_on_fresh_channel() {
        let connection = Arc::new(MemoryConnection::new());
        let (_bus, engine) = engine(&connection);

        let id = engine
            .invoke(|channel| async move {
                if channel.id() == ChannelId(1) {
                    Err(TransportError::interrupted(ShutdownReason::peer(541, "INTERNAL_ERROR")))
                } else {
                    Ok(channel.id())
                }
            })
            .await
            .unwrap();

        assert_eq!(id, ChannelId(2));
        assert!(!connection.channels()[0].is_open());
    }

    #[tokio::test]
    async fn closed_channel_is_replaced_before_next_attempt() {
        let connection = Arc::new(MemoryConnection::new());
        let (_bus, engine) = engine(&connection);
        assert_eq!(open_channel(&engine).await, ChannelId(1));

        connection
            .last_channel()
            .unwrap()
            .simulate_shutdown(&ShutdownReason::peer(320, "CONNECTION_FORCED"));

        assert_eq!(open_channel(&engine).await, ChannelId(2));
        assert_eq!(connection.channels()[0].listener_count(), 0);
    }

    #[tokio::test]
    async fn non_recoverable_channel_is_rejected() {
        let connection = Arc::new(MemoryConnection::non_recoverable());
        let (_bus, engine) = engine(&connection);

        let err = engine
            .invoke(|_channel| async { Ok::<_, TransportError>(()) })
            .await
            .unwrap_err();

        assert!(matches!(err, InvokeError::Failed(TransportError::NotSupported(_))));
        let channel = connection.last_channel().unwrap();
        assert!(!channel.is_open());
        assert_eq!(channel.listener_count(), 0);
        assert_eq!(engine.state(), ChannelState::Uninitialized);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_invocations_never_overlap() {
        let connection = Arc::new(MemoryConnection::new());
        let (_bus, engine) = engine(&connection);
        let engine = Arc::new(engine);
        let in_progress = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for i in 0..16_u32 {
            let engine = Arc::clone(&engine);
            let in_progress = Arc::clone(&in_progress);
            let max_seen = Arc::clone(&max_seen);
            tasks.push(tokio::spawn(async move {
                engine
                    .invoke(move |_channel| {
                        let in_progress = Arc::clone(&in_progress);
                        let max_seen = Arc::clone(&max_seen);
                        async move {
                            let now = in_progress.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(2)).await;
                            in_progress.fetch_sub(1, Ordering::SeqCst);
                            Ok::<_, TransportError>(i)
                        }
                    })
                    .await
            }));
        }

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(connection.created_count(), 1);
    }

    #[tokio::test]
    async fn invoke_after_dispose_never_creates_a_channel() {
        let connection = Arc::new(MemoryConnection::new());
        let (_bus, engine) = engine(&connection);

        engine.dispose();
        engine.dispose();

        let err = engine
            .invoke(|_channel| async { Ok::<_, TransportError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::Disposed));
        assert_eq!(connection.created_count(), 0);
        assert_eq!(engine.state(), ChannelState::Disposed);
    }

    #[tokio::test]
    async fn dispose_aborts_retrying_invocation() {
        let connection = Arc::new(MemoryConnection::new());
        let (_bus, engine) = engine(&connection);
        let engine = Arc::new(engine);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let task = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .invoke(move |_channel| {
                        let _ = tx.send(());
                        async { Err::<(), _>(transient()) }
                    })
                    .await
            })
        };

        rx.recv().await.unwrap();
        engine.dispose();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, InvokeError::Aborted));
        assert!(!connection.last_channel().unwrap().is_open());
    }

    #[tokio::test]
    async fn caller_cancellation_only_affects_that_caller() {
        let connection = Arc::new(MemoryConnection::new());
        let (_bus, engine) = engine(&connection);
        let engine = Arc::new(engine);
        let gate = Arc::new(Notify::new());
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();

        let holder = {
            let engine = Arc::clone(&engine);
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                engine
                    .invoke(move |_channel| {
                        let gate = Arc::clone(&gate);
                        let _ = started_tx.send(());
                        async move {
                            gate.notified().await;
                            Ok::<_, TransportError>("holder")
                        }
                    })
                    .await
            })
        };
        started_rx.recv().await.unwrap();

        let token = CancellationToken::new();
        let waiter = {
            let engine = Arc::clone(&engine);
            let token = token.clone();
            tokio::spawn(async move {
                engine
                    .invoke_with_cancellation(
                        |_channel| async { Ok::<_, TransportError>("waiter") },
                        &token,
                    )
                    .await
            })
        };
        tokio::task::yield_now().await;
        token.cancel();

        assert!(matches!(waiter.await.unwrap(), Err(InvokeError::Cancelled)));

        gate.notify_one();
        assert_eq!(holder.await.unwrap().unwrap(), "holder");
        assert_eq!(
            engine
                .invoke(|_channel| async { Ok::<_, TransportError>("after") })
                .await
                .unwrap(),
            "after"
        );
        assert_eq!(engine.state(), ChannelState::Active);
    }

    #[tokio::test]
    async fn caller_cancellation_interrupts_backoff() {
        let connection = Arc::new(MemoryConnection::new());
        let (_bus, engine) = engine_with(&connection, slow_retry_options());
        let engine = Arc::new(engine);
        let attempts = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let task = {
            let engine = Arc::clone(&engine);
            let attempts = Arc::clone(&attempts);
            let token = token.clone();
            tokio::spawn(async move {
                engine
                    .invoke_with_cancellation(
                        move |_channel| {
                            attempts.fetch_add(1, Ordering::SeqCst);
                            let _ = tx.send(());
                            async { Err::<(), _>(transient()) }
                        },
                        &token,
                    )
                    .await
            })
        };

        rx.recv().await.unwrap();
        token.cancel();

        assert!(matches!(task.await.unwrap(), Err(InvokeError::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(connection.last_channel().unwrap().is_open());
        assert_eq!(open_channel(&engine).await, ChannelId(1));
        assert_eq!(engine.state(), ChannelState::Active);
    }

    #[tokio::test]
    async fn caller_cancellation_interrupts_running_action() {
        let connection = Arc::new(MemoryConnection::new());
        let (_bus, engine) = engine(&connection);
        let engine = Arc::new(engine);
        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let task = {
            let engine = Arc::clone(&engine);
            let token = token.clone();
            tokio::spawn(async move {
                engine
                    .invoke_with_cancellation(
                        move |_channel| {
                            let _ = tx.send(());
                            async {
                                std::future::pending::<()>().await;
                                Ok::<_, TransportError>(())
                            }
                        },
                        &token,
                    )
                    .await
            })
        };

        rx.recv().await.unwrap();
        token.cancel();

        assert!(matches!(task.await.unwrap(), Err(InvokeError::Cancelled)));
        assert_eq!(engine.channel_id(), Some(ChannelId(1)));
        assert_eq!(open_channel(&engine).await, ChannelId(1));
    }

    #[tokio::test]
    async fn dispose_aborts_running_action_and_closes_channel() {
        let connection = Arc::new(MemoryConnection::new());
        let (_bus, engine) = engine(&connection);
        let engine = Arc::new(engine);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let task = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .invoke(move |_channel| {
                        let _ = tx.send(());
                        async {
                            std::future::pending::<()>().await;
                            Ok::<_, TransportError>(())
                        }
                    })
                    .await
            })
        };

        rx.recv().await.unwrap();
        engine.dispose();

        assert!(matches!(task.await.unwrap(), Err(InvokeError::Aborted)));
        let channel = connection.last_channel().unwrap();
        assert!(!channel.is_open());
        assert_eq!(channel.listener_count(), 0);
        assert_eq!(engine.state(), ChannelState::Disposed);
    }

    #[tokio::test]
    async fn dispose_aborts_pending_channel_creation() {
        let (entered, mut entered_rx) = mpsc::unbounded_channel();
        let connection = Arc::new(GatedConnection {
            inner: MemoryConnection::new(),
            entered,
            release: Notify::new(),
        });
        let engine = Arc::new(PersistentChannel::new(
            connection.clone(),
            Arc::new(BroadcastEventBus::default()),
            PersistentChannelOptions::default(),
        ));

        let task = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .invoke(|_channel| async { Ok::<_, TransportError>(()) })
                    .await
            })
        };

        entered_rx.recv().await.unwrap();
        engine.dispose();
        connection.release.notify_one();

        assert!(matches!(task.await.unwrap(), Err(InvokeError::Aborted)));
        assert_eq!(connection.inner.created_count(), 0);
        assert_eq!(engine.channel_id(), None);
    }

    #[tokio::test]
    async fn channel_created_while_disposing_is_closed() {
        let connection = Arc::new(DisposingConnection {
            inner: MemoryConnection::new(),
            engine: OnceLock::new(),
        });
        let engine = Arc::new(PersistentChannel::new(
            connection.clone(),
            Arc::new(BroadcastEventBus::default()),
            PersistentChannelOptions::default(),
        ));
        let _ = connection.engine.set(Arc::downgrade(&engine));
        let calls = AtomicUsize::new(0);

        let err = engine
            .invoke(|_channel| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, TransportError>(()) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, InvokeError::Aborted));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let channel = connection.inner.last_channel().unwrap();
        assert!(!channel.is_open());
        assert_eq!(channel.listener_count(), 0);
        assert_eq!(channel.recovery_listener_count(), 0);
        assert_eq!(engine.state(), ChannelState::Disposed);
    }

    #[tokio::test]
    async fn lifecycle_signals_are_published_with_confirms() {
        let connection = Arc::new(MemoryConnection::new());
        let (bus, engine) = engine_with(
            &connection,
            PersistentChannelOptions {
                publisher_confirms: true,
                ..PersistentChannelOptions::default()
            },
        );
        let mut events = bus.subscribe();
        let id = open_channel(&engine).await;
        let channel = connection.last_channel().unwrap();
        assert!(channel.confirms_selected());

        channel.simulate_ack(5, false);
        channel.simulate_nack(6, true);
        channel.simulate_return(&BasicReturn {
            exchange: "orders".into(),
            routing_key: "eu.created".into(),
            reply_code: 312,
            reply_text: "NO_ROUTE".into(),
            properties: BasicProperties {
                type_name: Some("orders::Created".into()),
                ..BasicProperties::default()
            },
            body: b"payload".to_vec(),
        });
        channel.simulate_recovery();

        assert_eq!(
            events.try_recv().unwrap(),
            ChannelEvent::Confirmation(MessageConfirmationEvent::ack(id, 5, false))
        );
        assert_eq!(
            events.try_recv().unwrap(),
            ChannelEvent::Confirmation(MessageConfirmationEvent::nack(id, 6, true))
        );
        match events.try_recv().unwrap() {
            ChannelEvent::Returned(returned) => {
                assert_eq!(returned.channel, id);
                assert_eq!(returned.body, b"payload");
                assert_eq!(returned.properties.type_name(), Some("orders::Created"));
                assert_eq!(returned.info.exchange, "orders");
                assert_eq!(returned.info.routing_key, "eu.created");
                assert_eq!(returned.info.reply_text, "NO_ROUTE");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(
            events.try_recv().unwrap(),
            ChannelEvent::Recovered(ChannelRecoveredEvent { channel: id })
        );
    }

    #[tokio::test]
    async fn confirms_are_not_forwarded_when_disabled() {
        let connection = Arc::new(MemoryConnection::new());
        let (bus, engine) = engine(&connection);
        let mut events = bus.subscribe();
        open_channel(&engine).await;
        let channel = connection.last_channel().unwrap();

        channel.simulate_ack(1, false);

        assert!(!channel.confirms_selected());
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn dispose_closes_then_detaches() {
        let connection = Arc::new(MemoryConnection::new());
        let (bus, engine) = engine(&connection);
        let mut events = bus.subscribe();
        let id = open_channel(&engine).await;

        engine.dispose();

        let channel = connection.last_channel().unwrap();
        assert!(!channel.is_open());
        assert_eq!(channel.listener_count(), 0);
        assert_eq!(channel.recovery_listener_count(), 0);
        // The close happened while the listener was still attached.
        match events.try_recv().unwrap() {
            ChannelEvent::Shutdown(shutdown) => {
                assert_eq!(shutdown.channel, id);
                assert_eq!(
                    shutdown.reason.map(|r| r.initiator),
                    Some(ShutdownInitiator::Application)
                );
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn state_follows_lifecycle() {
        let connection = Arc::new(MemoryConnection::new());
        let (_bus, engine) = engine(&connection);
        assert_eq!(engine.state(), ChannelState::Uninitialized);
        assert_eq!(engine.channel_id(), None);

        open_channel(&engine).await;
        assert_eq!(engine.state(), ChannelState::Active);
        assert_eq!(engine.channel_id(), Some(ChannelId(1)));

        engine.dispose();
        assert_eq!(engine.state(), ChannelState::Disposed);
        assert_eq!(engine.channel_id(), None);
    }

    #[tokio::test]
    async fn dropping_the_engine_closes_its_channel() {
        let connection = Arc::new(MemoryConnection::new());
        {
            let (_bus, engine) = engine(&connection);
            open_channel(&engine).await;
        }
        assert!(!connection.last_channel().unwrap().is_open());
    }
}
