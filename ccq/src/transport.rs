//! The narrow publish/subscribe interface the query client needs from the network.
//!
//! [crate::p2p_node::P2pHandle] implements it over libp2p gossipsub. [LocalNetwork] implements it in memory, so that
//! several simulated peers can share topics inside a single process.

use std::{
    collections::HashMap,
    fmt::{self, Debug, Formatter},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

use crate::error::TransportError;

/// A message received on a subscribed topic.
#[derive(Clone)]
pub struct InboundMessage {
    pub data: Vec<u8>,
    /// Identity of the peer that originally published the message.
    pub from: String,
}

impl Debug for InboundMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("from", &self.from)
            .field("data", &hex::encode(&self.data))
            .finish()
    }
}

/// An independent stream of messages for one topic. Dropping it unsubscribes.
pub struct Subscription {
    topic: String,
    receiver: UnboundedReceiverStream<InboundMessage>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>) -> (UnboundedSender<InboundMessage>, Subscription) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            sender,
            Subscription {
                topic: topic.into(),
                receiver: UnboundedReceiverStream::new(receiver),
            },
        )
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Waits for the next message. Fails with [TransportError::Closed] once the publishing side has gone away.
    pub async fn next(&mut self) -> Result<InboundMessage, TransportError> {
        self.receiver.next().await.ok_or(TransportError::Closed)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// This node's identity, as it appears in [InboundMessage::from] on other peers.
    fn local_id(&self) -> String;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError>;
}

#[derive(Default)]
struct Topics {
    subscribers: HashMap<String, Vec<(String, UnboundedSender<InboundMessage>)>>,
}

/// An in-process broadcast medium. Every [LocalTransport] created from the same network sees the others' messages,
/// but not its own, mirroring gossipsub.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    topics: Arc<Mutex<Topics>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport endpoint that publishes as `peer_id`.
    pub fn endpoint(&self, peer_id: impl Into<String>) -> LocalTransport {
        LocalTransport {
            peer_id: peer_id.into(),
            network: self.clone(),
        }
    }

    /// Delivers raw bytes to every subscriber of `topic`, as if `from` had published them.
    pub fn inject(&self, topic: &str, from: &str, data: Vec<u8>) {
        let mut topics = self.topics.lock().unwrap();
        let Some(subscribers) = topics.subscribers.get_mut(topic) else {
            trace!(topic, "no subscribers");
            return;
        };
        subscribers.retain(|(peer_id, sender)| {
            if peer_id == from {
                return !sender.is_closed();
            }
            sender
                .send(InboundMessage {
                    data: data.clone(),
                    from: from.to_owned(),
                })
                .is_ok()
        });
    }

    /// Closes every subscription on the network.
    pub fn shutdown(&self) {
        self.topics.lock().unwrap().subscribers.clear();
    }
}

#[derive(Clone)]
pub struct LocalTransport {
    peer_id: String,
    network: LocalNetwork,
}

#[async_trait]
impl Transport for LocalTransport {
    fn local_id(&self) -> String {
        self.peer_id.clone()
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.network.inject(topic, &self.peer_id, payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError> {
        let (sender, subscription) = Subscription::new(topic);
        self.network
            .topics
            .lock()
            .unwrap()
            .subscribers
            .entry(topic.to_owned())
            .or_default()
            .push((self.peer_id.clone(), sender));
        Ok(subscription)
    }
}
