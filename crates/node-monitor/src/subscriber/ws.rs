//! Websocket header source backed by an alloy pubsub provider.

use crate::subscriber::{
    HeaderClient,
    HeaderSource,
    HeaderSubscription,
    NewHead,
    SubscriberError,
};
use alloy_provider::{
    Provider,
    ProviderBuilder,
    RootProvider,
    WsConnect,
};
use async_trait::async_trait;
use futures::StreamExt;
use url::Url;

/// Dials execution endpoints over websockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsHeaderSource;

#[async_trait]
impl HeaderSource for WsHeaderSource {
    async fn connect(&self, uri: &Url) -> Result<Box<dyn HeaderClient>, SubscriberError> {
        let ws = WsConnect::new(uri.as_str());
        let provider = ProviderBuilder::new()
            .connect_ws(ws)
            .await
            .map_err(SubscriberError::Connect)?;

        Ok(Box::new(WsHeaderClient {
            provider: provider.root().clone(),
        }))
    }
}

#[derive(Debug)]
struct WsHeaderClient {
    provider: RootProvider,
}

#[async_trait]
impl HeaderClient for WsHeaderClient {
    async fn subscribe_new_heads(&self) -> Result<HeaderSubscription, SubscriberError> {
        let subscription = self
            .provider
            .subscribe_blocks()
            .await
            .map_err(SubscriberError::Subscribe)?;

        // the stream ends once the pubsub backend gives up on the connection
        Ok(subscription
            .into_stream()
            .map(|header| Ok(NewHead::from(&header)))
            .boxed())
    }
}
