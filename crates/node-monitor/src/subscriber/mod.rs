//! Self-healing `newHeads` subscriptions, one per monitored endpoint.
//!
//! An [`EndpointSubscriber`] owns the connection to a single execution
//! endpoint and nothing else. It keeps a header subscription alive for as
//! long as it runs and hands every received header, stamped with its arrival
//! time, to the handler given to [`EndpointSubscriber::subscribe`].
//!
//! While disconnected the subscriber retries on a fixed interval jittered by
//! up to 10% in either direction. The interval never grows: many endpoints
//! going down at once spread their reconnects out, and recovery time stays
//! bounded by one interval.

pub mod ws;
#[cfg(test)]
mod tests;

use alloy_primitives::{
    B256,
    U256,
};
use alloy_rpc_types::Header;
use alloy_transport::{
    RpcError,
    TransportErrorKind,
};
use async_trait::async_trait;
use futures::{
    StreamExt,
    stream::BoxStream,
};
use rand::Rng;
use std::{
    fmt,
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};
use thiserror::Error;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{
        self,
        MissedTickBehavior,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    error,
    info,
    instrument,
    warn,
};
use url::Url;

pub use ws::WsHeaderSource;

#[derive(Error, Debug)]
pub enum SubscriberError {
    #[error("failed to connect to execution endpoint websocket")]
    Connect(#[source] RpcError<TransportErrorKind>),
    #[error("failed to subscribe to new headers")]
    Subscribe(#[source] RpcError<TransportErrorKind>),
    #[error("header subscription closed")]
    Closed,
}

/// The parts of a block header the monitor cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewHead {
    pub number: U256,
    pub hash: B256,
}

impl From<&Header> for NewHead {
    fn from(header: &Header) -> Self {
        Self {
            number: U256::from(header.inner.number),
            hash: header.hash,
        }
    }
}

/// Stream of headers from one subscription. An `Err` item or the end of the
/// stream means the subscription is gone.
pub type HeaderSubscription = BoxStream<'static, Result<NewHead, SubscriberError>>;

/// Opens connections to execution endpoints.
#[async_trait]
pub trait HeaderSource: Send + Sync {
    async fn connect(&self, uri: &Url) -> Result<Box<dyn HeaderClient>, SubscriberError>;
}

/// A live connection that can open header subscriptions.
#[async_trait]
pub trait HeaderClient: Send + Sync {
    async fn subscribe_new_heads(&self) -> Result<HeaderSubscription, SubscriberError>;
}

/// Receives `(group, name, arrival time, header)` for every header. Runs on
/// the subscriber's own task, so it must not block for long.
pub type HeaderHandler = Arc<dyn Fn(&str, &str, Instant, NewHead) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    /// No live subscription, waiting for the next resubscribe tick.
    Disconnected,
    /// Connecting and/or opening the header subscription.
    Subscribing,
    Subscribed,
    /// Terminal.
    Stopped,
}

impl fmt::Display for SubscriberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            Self::Disconnected => "disconnected",
            Self::Subscribing => "subscribing",
            Self::Subscribed => "subscribed",
            Self::Stopped => "stopped",
        };
        f.write_str(state)
    }
}

/// Lifecycle manager of one endpoint's header subscription.
///
/// [`subscribe`](Self::subscribe) spawns the manager task and may be called
/// only once. [`unsubscribe`](Self::unsubscribe) cancels it; cancelling never
/// blocks and repeated or early cancellation is a no-op, an already stopped
/// manager stays stopped and a manager cancelled before `subscribe` exits as
/// soon as it is started.
pub struct EndpointSubscriber {
    group: String,
    name: String,
    uri: Url,
    resubscribe_interval: Duration,
    source: Arc<dyn HeaderSource>,
    shutdown: CancellationToken,
    state_tx: Option<watch::Sender<SubscriberState>>,
    state_rx: watch::Receiver<SubscriberState>,
    task: Option<JoinHandle<()>>,
}

impl fmt::Debug for EndpointSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointSubscriber")
            .field("group", &self.group)
            .field("name", &self.name)
            .field("uri", &self.uri.as_str())
            .field("state", &*self.state_rx.borrow())
            .finish_non_exhaustive()
    }
}

impl EndpointSubscriber {
    pub fn new(
        group: impl Into<String>,
        name: impl Into<String>,
        uri: Url,
        resubscribe_interval: Duration,
        source: Arc<dyn HeaderSource>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(SubscriberState::Disconnected);
        Self {
            group: group.into(),
            name: name.into(),
            uri,
            resubscribe_interval,
            source,
            shutdown: CancellationToken::new(),
            state_tx: Some(state_tx),
            state_rx,
            task: None,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn state(&self) -> SubscriberState {
        *self.state_rx.borrow()
    }

    pub fn is_subscribed(&self) -> bool {
        self.state() == SubscriberState::Subscribed
    }

    /// Receiver that observes every state change of the manager.
    pub fn watch_state(&self) -> watch::Receiver<SubscriberState> {
        self.state_rx.clone()
    }

    /// Starts the manager task, delivering every header to `handler`.
    ///
    /// # Panics
    ///
    /// When called a second time. The header stream must have exactly one
    /// reader, so a second call is a bug in the caller.
    #[allow(clippy::panic)]
    pub fn subscribe(&mut self, handler: HeaderHandler) {
        let Some(state) = self.state_tx.take() else {
            panic!(
                "must never happen: double subscription attempt on {}",
                crate::state::endpoint_id(&self.group, &self.name)
            );
        };

        let runner = Runner {
            group: self.group.clone(),
            name: self.name.clone(),
            uri: self.uri.clone(),
            resubscribe_interval: self.resubscribe_interval,
            source: self.source.clone(),
            handler,
            shutdown: self.shutdown.clone(),
            state,
            client: None,
        };
        self.task = Some(tokio::spawn(runner.run()));
    }

    /// Signals the manager to tear down its subscription and stop.
    pub fn unsubscribe(&self) {
        self.shutdown.cancel();
    }

    /// Waits for the manager task to finish. Returns immediately if it was
    /// never started or has already been joined.
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                error!(
                    endpoint_group = %self.group,
                    endpoint_name = %self.name,
                    error = %err,
                    "Execution endpoint subscriber task failed"
                );
            }
        }
    }
}

impl Drop for EndpointSubscriber {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

enum Flow {
    Resubscribe,
    Stop,
}

struct Runner {
    group: String,
    name: String,
    uri: Url,
    resubscribe_interval: Duration,
    source: Arc<dyn HeaderSource>,
    handler: HeaderHandler,
    shutdown: CancellationToken,
    state: watch::Sender<SubscriberState>,
    client: Option<Box<dyn HeaderClient>>,
}

impl Runner {
    #[instrument(
        name = "subscriber::run",
        skip(self),
        fields(endpoint_group = %self.group, endpoint_name = %self.name),
        level = "debug"
    )]
    async fn run(mut self) {
        while let Some(subscription) = self.resubscribe().await {
            self.state.send_replace(SubscriberState::Subscribed);
            match self.stream_headers(subscription).await {
                Flow::Resubscribe => {}
                Flow::Stop => break,
            }
        }
        self.state.send_replace(SubscriberState::Stopped);
    }

    /// Retries on a jittered tick until a subscription is open. Returns
    /// `None` when stopped.
    async fn resubscribe(&mut self) -> Option<HeaderSubscription> {
        self.state.send_replace(SubscriberState::Disconnected);
        if self.shutdown.is_cancelled() {
            return None;
        }

        let delay = jittered(self.resubscribe_interval);
        info!(
            delay_sec = delay.as_secs_f64(),
            "Will (re-)subscribe to execution endpoint"
        );

        let mut ticker = time::interval_at(time::Instant::now() + delay, delay);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    debug!("Stopping (re-)subscription loop");
                    return None;
                }
                _ = ticker.tick() => {}
            }

            self.state.send_replace(SubscriberState::Subscribing);
            let shutdown = self.shutdown.clone();
            let subscription = tokio::select! {
                () = shutdown.cancelled() => {
                    debug!("Stopping (re-)subscription loop");
                    return None;
                }
                subscription = self.try_subscribe() => subscription,
            };

            match subscription {
                Some(subscription) => return Some(subscription),
                None => {
                    self.state.send_replace(SubscriberState::Disconnected);
                }
            }
        }
    }

    /// Dials if there is no client yet, then opens the header subscription.
    async fn try_subscribe(&mut self) -> Option<HeaderSubscription> {
        let client = match self.client.take() {
            Some(client) => client,
            None => {
                match self.source.connect(&self.uri).await {
                    Ok(client) => {
                        debug!("Connected to execution endpoint websocket");
                        client
                    }
                    Err(err) => {
                        error!(error = %err, "Failed to connect to execution endpoint websocket");
                        return None;
                    }
                }
            }
        };

        match client.subscribe_new_heads().await {
            Ok(subscription) => {
                info!("Subscribed to execution endpoint's new headers");
                self.client = Some(client);
                Some(subscription)
            }
            Err(err) => {
                // the client is dropped so that the next attempt redials
                error!(error = %err, "Failed to subscribe to new headers");
                None
            }
        }
    }

    /// Delivers headers until the subscription fails or the manager stops.
    async fn stream_headers(&self, mut subscription: HeaderSubscription) -> Flow {
        loop {
            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => {
                    debug!("Stopping execution endpoint subscriber");
                    return Flow::Stop;
                }
                item = subscription.next() => match item {
                    Some(Ok(head)) => {
                        let received_at = Instant::now();
                        debug!(
                            block = %head.number,
                            hash = %head.hash,
                            "Got header"
                        );
                        (self.handler)(self.group.as_str(), self.name.as_str(), received_at, head);
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "Execution endpoint subscription error");
                        return Flow::Resubscribe;
                    }
                    None => {
                        warn!(
                            error = %SubscriberError::Closed,
                            "Execution endpoint subscription error"
                        );
                        return Flow::Resubscribe;
                    }
                },
            }
        }
    }
}

/// `interval` shifted by a random amount of up to 10% in either direction,
/// rounded to whole milliseconds.
pub(crate) fn jittered(interval: Duration) -> Duration {
    let base = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX / 2);
    let spread = base / 10;
    let offset = rand::rng().random_range(0..=2 * spread);
    Duration::from_millis((base - spread).saturating_add(offset).max(1))
}
