//! Wires endpoint subscribers to the shared state.

use crate::{
    config::Config,
    metrics,
    state::{
        Latency,
        State,
        StateError,
        endpoint_id,
    },
    subscriber::{
        EndpointSubscriber,
        HeaderHandler,
        HeaderSource,
        NewHead,
    },
};
use std::{
    sync::Arc,
    time::Instant,
};
use tracing::{
    debug,
    info,
    warn,
};

/// Owns the state registry and one subscriber per configured endpoint.
#[derive(Debug)]
pub struct Monitor {
    state: Arc<State>,
    subscribers: Vec<EndpointSubscriber>,
}

impl Monitor {
    /// Registers every configured endpoint. Fails on duplicate endpoint ids.
    pub fn new(config: &Config, source: Arc<dyn HeaderSource>) -> Result<Self, StateError> {
        let state = Arc::new(State::new());
        let mut subscribers = Vec::with_capacity(config.endpoints.len());

        for endpoint in &config.endpoints {
            state.register_endpoint(&endpoint.group, &endpoint.name)?;
            subscribers.push(EndpointSubscriber::new(
                endpoint.group.as_str(),
                endpoint.name.as_str(),
                endpoint.uri.clone(),
                config.resubscribe_interval,
                source.clone(),
            ));
        }

        Ok(Self { state, subscribers })
    }

    pub fn state(&self) -> Arc<State> {
        self.state.clone()
    }

    pub fn subscribers(&self) -> &[EndpointSubscriber] {
        &self.subscribers
    }

    /// Starts every subscriber. Must be called at most once.
    pub fn start(&mut self) {
        let handler = header_handler(self.state.clone());
        for subscriber in &mut self.subscribers {
            info!(
                endpoint_group = subscriber.group(),
                endpoint_name = subscriber.name(),
                uri = %subscriber.uri(),
                "Starting execution endpoint subscriber"
            );
            subscriber.subscribe(handler.clone());
        }
    }

    /// Signals every subscriber to stop. Does not wait for them.
    pub fn stop(&self) {
        for subscriber in &self.subscribers {
            subscriber.unsubscribe();
        }
    }

    /// Waits for every stopped subscriber to wind down.
    pub async fn join(&mut self) {
        for subscriber in &mut self.subscribers {
            subscriber.join().await;
        }
    }
}

/// Handler that folds every received header into `state`.
pub fn header_handler(state: Arc<State>) -> HeaderHandler {
    Arc::new(move |group, name, received_at, head| {
        on_new_head(&state, group, name, received_at, head);
    })
}

fn on_new_head(state: &State, group: &str, name: &str, received_at: Instant, head: NewHead) {
    let Some((group_state, endpoint)) = state.endpoint(group, name) else {
        warn!(
            endpoint = %endpoint_id(group, name),
            "Header from unregistered execution endpoint"
        );
        return;
    };

    match group_state.record_observation(head.number, received_at) {
        Ok(latency) => {
            metrics::record_latency(group, name, latency);
            match latency {
                Latency::Measured(latency) => {
                    debug!(
                        endpoint = endpoint.id(),
                        block = %head.number,
                        latency_ms = latency.as_millis(),
                        "Recorded new block latency"
                    );
                }
                Latency::Infinity => {
                    debug!(
                        endpoint = endpoint.id(),
                        block = %head.number,
                        "Block fell outside of the group's history"
                    );
                }
            }
        }
        Err(err) => {
            warn!(
                endpoint = endpoint.id(),
                block = %head.number,
                error = %err,
                "Failed to record block observation"
            );
        }
    }

    endpoint.update_highest_block_if_needed(head.number, received_at);
}
