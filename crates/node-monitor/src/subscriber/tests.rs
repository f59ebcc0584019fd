//! Lifecycle tests against a scripted in-memory header source.

use crate::subscriber::{
    EndpointSubscriber,
    HeaderClient,
    HeaderHandler,
    HeaderSource,
    HeaderSubscription,
    NewHead,
    SubscriberError,
    SubscriberState,
    jittered,
};
use alloy_primitives::{
    B256,
    U256,
};
use alloy_transport::{
    RpcError,
    TransportErrorKind,
};
use async_trait::async_trait;
use futures::{
    StreamExt,
    channel::mpsc as feed,
};
use parking_lot::Mutex;
use std::{
    sync::{
        Arc,
        atomic::{
            AtomicUsize,
            Ordering::SeqCst,
        },
    },
    time::{
        Duration,
        Instant,
    },
};
use tokio::{
    sync::mpsc,
    time,
};
use url::Url;

const INTERVAL: Duration = Duration::from_secs(1);

type Item = Result<NewHead, SubscriberError>;

/// Fails the first `dial_failures` connects and the first
/// `subscribe_failures` subscribes, then hands out channel-backed streams.
#[derive(Default)]
struct Script {
    dial_failures: AtomicUsize,
    subscribe_failures: AtomicUsize,
    connects: AtomicUsize,
    subscribes: AtomicUsize,
    feeds: Mutex<Vec<feed::UnboundedSender<Item>>>,
}

impl Script {
    fn failing_dials(n: usize) -> Arc<Self> {
        let script = Self::default();
        script.dial_failures.store(n, SeqCst);
        Arc::new(script)
    }

    fn connects(&self) -> usize {
        self.connects.load(SeqCst)
    }

    fn subscribes(&self) -> usize {
        self.subscribes.load(SeqCst)
    }

    fn push(&self, item: Item) {
        let feeds = self.feeds.lock();
        feeds.last().unwrap().unbounded_send(item).unwrap();
    }

    fn close_current(&self) {
        self.feeds.lock().pop();
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(SeqCst, SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn transport_error() -> RpcError<TransportErrorKind> {
    RpcError::Transport(TransportErrorKind::BackendGone)
}

struct ScriptedSource(Arc<Script>);

#[async_trait]
impl HeaderSource for ScriptedSource {
    async fn connect(&self, _uri: &Url) -> Result<Box<dyn HeaderClient>, SubscriberError> {
        self.0.connects.fetch_add(1, SeqCst);
        if take_one(&self.0.dial_failures) {
            return Err(SubscriberError::Connect(transport_error()));
        }
        Ok(Box::new(ScriptedClient(self.0.clone())))
    }
}

struct ScriptedClient(Arc<Script>);

#[async_trait]
impl HeaderClient for ScriptedClient {
    async fn subscribe_new_heads(&self) -> Result<HeaderSubscription, SubscriberError> {
        if take_one(&self.0.subscribe_failures) {
            return Err(SubscriberError::Subscribe(transport_error()));
        }
        self.0.subscribes.fetch_add(1, SeqCst);
        let (tx, rx) = feed::unbounded();
        self.0.feeds.lock().push(tx);
        Ok(rx.boxed())
    }
}

type Received = (String, String, Instant, NewHead);

fn recording_handler() -> (HeaderHandler, mpsc::UnboundedReceiver<Received>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler: HeaderHandler = Arc::new(move |group, name, received_at, head| {
        let _ = tx.send((group.to_string(), name.to_string(), received_at, head));
    });
    (handler, rx)
}

fn subscriber(script: &Arc<Script>) -> EndpointSubscriber {
    EndpointSubscriber::new(
        "mainnet",
        "geth",
        Url::parse("ws://127.0.0.1:8546").unwrap(),
        INTERVAL,
        Arc::new(ScriptedSource(script.clone())),
    )
}

fn head(n: u64) -> NewHead {
    NewHead {
        number: U256::from(n),
        hash: B256::with_last_byte(n as u8),
    }
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..1_000 {
        if check() {
            return;
        }
        time::sleep(Duration::from_millis(100)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn wait_for_state(subscriber: &EndpointSubscriber, state: SubscriberState) {
    let mut rx = subscriber.watch_state();
    time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}"))
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn retries_failed_dials_and_subscribes_once() {
    let script = Script::failing_dials(3);
    let mut subscriber = subscriber(&script);
    let (handler, mut received) = recording_handler();
    assert_eq!(subscriber.state(), SubscriberState::Disconnected);

    subscriber.subscribe(handler);
    wait_for_state(&subscriber, SubscriberState::Subscribed).await;
    assert_eq!(script.connects(), 4);
    assert_eq!(script.subscribes(), 1);
    assert!(received.try_recv().is_err(), "no header before subscribing");

    // staying subscribed does not trigger further attempts
    time::sleep(INTERVAL * 10).await;
    assert_eq!(script.connects(), 4);
    assert_eq!(script.subscribes(), 1);
    assert!(subscriber.is_subscribed());

    script.push(Ok(head(100)));
    script.push(Ok(head(101)));

    let (group, name, first_at, first) = received.recv().await.unwrap();
    assert_eq!((group.as_str(), name.as_str()), ("mainnet", "geth"));
    assert_eq!(first, head(100));

    let (_, _, second_at, second) = received.recv().await.unwrap();
    assert_eq!(second, head(101));
    assert!(second_at >= first_at);

    subscriber.unsubscribe();
    subscriber.join().await;
}

#[tokio::test(start_paused = true)]
async fn subscription_error_resubscribes_on_the_same_client() {
    let script = Script::failing_dials(0);
    let mut subscriber = subscriber(&script);
    let (handler, mut received) = recording_handler();
    subscriber.subscribe(handler);
    wait_for_state(&subscriber, SubscriberState::Subscribed).await;

    script.push(Err(SubscriberError::Closed));
    eventually("resubscription", || script.subscribes() == 2).await;
    wait_for_state(&subscriber, SubscriberState::Subscribed).await;
    assert_eq!(script.connects(), 1);

    script.push(Ok(head(7)));
    assert_eq!(received.recv().await.unwrap().3, head(7));

    subscriber.unsubscribe();
    subscriber.join().await;
}

#[tokio::test(start_paused = true)]
async fn ended_stream_is_treated_as_subscription_error() {
    let script = Script::failing_dials(0);
    let mut subscriber = subscriber(&script);
    let (handler, _received) = recording_handler();
    subscriber.subscribe(handler);
    wait_for_state(&subscriber, SubscriberState::Subscribed).await;

    script.close_current();
    wait_for_state(&subscriber, SubscriberState::Disconnected).await;
    eventually("resubscription", || script.subscribes() == 2).await;

    subscriber.unsubscribe();
    subscriber.join().await;
}

#[tokio::test(start_paused = true)]
async fn failed_subscribe_redials() {
    let script = Script::failing_dials(0);
    script.subscribe_failures.store(1, SeqCst);
    let mut subscriber = subscriber(&script);
    let (handler, _received) = recording_handler();
    subscriber.subscribe(handler);

    wait_for_state(&subscriber, SubscriberState::Subscribed).await;
    assert_eq!(script.connects(), 2);
    assert_eq!(script.subscribes(), 1);

    subscriber.unsubscribe();
    subscriber.join().await;
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_stops_a_subscribed_manager() {
    let script = Script::failing_dials(0);
    let mut subscriber = subscriber(&script);
    let (handler, mut received) = recording_handler();
    subscriber.subscribe(handler);
    wait_for_state(&subscriber, SubscriberState::Subscribed).await;

    subscriber.unsubscribe();
    subscriber.join().await;
    assert_eq!(subscriber.state(), SubscriberState::Stopped);

    // the handler went away with the task
    assert!(received.recv().await.is_none());

    // stopping again is a no-op
    subscriber.unsubscribe();
    subscriber.join().await;
    assert_eq!(subscriber.state(), SubscriberState::Stopped);
    assert_eq!(script.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_stops_a_disconnected_manager() {
    let script = Script::failing_dials(usize::MAX);
    let mut subscriber = subscriber(&script);
    let (handler, _received) = recording_handler();
    subscriber.subscribe(handler);

    eventually("a few dial attempts", || script.connects() >= 3).await;
    assert_eq!(subscriber.state(), SubscriberState::Disconnected);

    subscriber.unsubscribe();
    subscriber.join().await;
    assert_eq!(subscriber.state(), SubscriberState::Stopped);

    let attempts = script.connects();
    time::sleep(INTERVAL * 10).await;
    assert_eq!(script.connects(), attempts);
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_before_subscribe_never_dials() {
    let script = Script::failing_dials(0);
    let mut subscriber = subscriber(&script);
    let (handler, _received) = recording_handler();

    subscriber.unsubscribe();
    subscriber.subscribe(handler);
    subscriber.join().await;

    assert_eq!(subscriber.state(), SubscriberState::Stopped);
    assert_eq!(script.connects(), 0);
}

#[tokio::test]
#[should_panic(expected = "double subscription attempt on mainnet:geth")]
async fn second_subscribe_panics() {
    let script = Script::failing_dials(0);
    let mut subscriber = subscriber(&script);
    let (handler, _received) = recording_handler();

    subscriber.subscribe(handler.clone());
    subscriber.subscribe(handler);
}

#[test]
fn jitter_stays_within_ten_percent() {
    let interval = Duration::from_secs(15);
    for _ in 0..1_000 {
        let delay = jittered(interval);
        assert!(delay >= Duration::from_millis(13_500), "{delay:?}");
        assert!(delay <= Duration::from_millis(16_500), "{delay:?}");
        assert_eq!(delay.subsec_nanos() % 1_000_000, 0);
    }

    assert_eq!(jittered(Duration::ZERO), Duration::from_millis(1));
}
