//! A libp2p host that joins the query sub-network and exposes it as a [Transport].

use std::{collections::HashMap, error::Error, time::Duration};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::StreamExt;
use libp2p::{
    Multiaddr, PeerId, StreamProtocol, Swarm, SwarmBuilder,
    gossipsub::{self, IdentTopic, MessageAuthenticity, TopicHash, ValidationMode},
    identify,
    identity::Keypair,
    kad::{self, store::MemoryStore},
    multiaddr::Protocol,
    noise,
    swarm::{NetworkBehaviour, SwarmEvent},
    tcp, yamux,
};
use tokio::{
    select,
    sync::{
        mpsc::{self, UnboundedSender},
        oneshot,
    },
    time,
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, trace, warn};

use crate::{
    cfg::Config,
    error::TransportError,
    transport::{InboundMessage, Subscription, Transport},
};

#[derive(NetworkBehaviour)]
struct Behaviour {
    gossipsub: gossipsub::Behaviour,
    identify: identify::Behaviour,
    kademlia: kad::Behaviour<MemoryStore>,
}

enum Command {
    Publish {
        topic: String,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Subscribe {
        topic: String,
        sender: UnboundedSender<InboundMessage>,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    TopicPeers {
        topic: String,
        reply: oneshot::Sender<usize>,
    },
    Shutdown,
}

pub struct P2pNode {
    peer_id: PeerId,
    p2p_port: u16,
    bootstrap: Vec<Multiaddr>,
    swarm: Swarm<Behaviour>,
    /// Local subscribers for each joined topic. Every inbound message is copied to all of them.
    subscribers: HashMap<TopicHash, Vec<UnboundedSender<InboundMessage>>>,
    command_sender: UnboundedSender<Command>,
    command_receiver: UnboundedReceiverStream<Command>,
}

impl P2pNode {
    pub fn new(key_pair: Keypair, config: &Config) -> Result<Self> {
        let (command_sender, command_receiver) = mpsc::unbounded_channel();
        let command_receiver = UnboundedReceiverStream::new(command_receiver);

        let peer_id = PeerId::from(key_pair.public());
        info!(%peer_id);

        let kad_protocol =
            StreamProtocol::try_from_owned(format!("{}/kad/1.0.0", config.ccq_network_id()))
                .map_err(|e| anyhow!("invalid kademlia protocol: {e:?}"))?;

        let swarm = SwarmBuilder::with_existing_identity(key_pair)
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )?
            .with_quic()
            .with_dns()?
            .with_behaviour(|key_pair| behaviour(key_pair, kad_protocol))
            .map_err(|e| anyhow!(e))?
            .with_swarm_config(|config| {
                config.with_idle_connection_timeout(Duration::from_secs(60))
            })
            .build();

        Ok(P2pNode {
            peer_id,
            p2p_port: config.p2p_port,
            bootstrap: config.bootstrap.clone(),
            swarm,
            subscribers: HashMap::new(),
            command_sender,
            command_receiver,
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// A handle for talking to the node once it has started.
    pub fn handle(&self) -> P2pHandle {
        P2pHandle {
            peer_id: self.peer_id,
            commands: self.command_sender.clone(),
        }
    }

    /// Runs the node until [P2pHandle::shutdown] is called.
    pub async fn start(mut self) -> Result<()> {
        let listen_addrs: [Multiaddr; 3] = [
            Multiaddr::from(std::net::Ipv4Addr::UNSPECIFIED)
                .with(Protocol::Udp(self.p2p_port))
                .with(Protocol::QuicV1),
            Multiaddr::from(std::net::Ipv6Addr::UNSPECIFIED)
                .with(Protocol::Udp(self.p2p_port))
                .with(Protocol::QuicV1),
            Multiaddr::from(std::net::Ipv4Addr::UNSPECIFIED).with(Protocol::Tcp(self.p2p_port)),
        ];
        for addr in listen_addrs {
            if let Err(e) = self.swarm.listen_on(addr.clone()) {
                warn!(%addr, %e, "failed to listen");
            }
        }

        let mut known_peers = 0;
        for address in &self.bootstrap {
            let Some(peer_id) = bootstrap_peer(address) else {
                warn!(%address, "bootstrap address does not contain a peer ID");
                continue;
            };
            self.swarm
                .behaviour_mut()
                .kademlia
                .add_address(&peer_id, address.clone());
            if let Err(e) = self.swarm.dial(address.clone()) {
                warn!(%address, %e, "failed to dial bootstrap peer");
            }
            known_peers += 1;
        }
        if known_peers > 0 {
            if let Err(e) = self.swarm.behaviour_mut().kademlia.bootstrap() {
                warn!(%e, "kademlia bootstrap failed");
            }
        }

        loop {
            select! {
                event = self.swarm.select_next_some() => match event {
                    SwarmEvent::NewListenAddr { address, .. } => {
                        info!(%address, "started listening");
                    }
                    SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                        debug!(%peer_id, address = %endpoint.get_remote_address(), "connection established");
                    }
                    SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                        debug!(?peer_id, %error, "outgoing connection failed");
                    }
                    SwarmEvent::Behaviour(BehaviourEvent::Identify(identify::Event::Received { peer_id, info, .. })) => {
                        for addr in info.listen_addrs {
                            trace!(%peer_id, %addr, "identity info received");
                            self.swarm.behaviour_mut().kademlia.add_address(&peer_id, addr);
                        }
                    }
                    SwarmEvent::Behaviour(BehaviourEvent::Gossipsub(gossipsub::Event::Subscribed { peer_id, topic })) => {
                        debug!(%peer_id, %topic, "peer joined topic");
                    }
                    SwarmEvent::Behaviour(BehaviourEvent::Gossipsub(gossipsub::Event::Message {
                        propagation_source,
                        message,
                        ..
                    })) => {
                        let from = message.source.unwrap_or(propagation_source);
                        trace!(%from, topic = %message.topic, len = message.data.len(), "message received");
                        self.forward_message(&message.topic, from, message.data);
                    }
                    _ => {},
                },
                command = self.command_receiver.next() => match command {
                    Some(Command::Publish { topic, data, reply }) => {
                        let result = self
                            .swarm
                            .behaviour_mut()
                            .gossipsub
                            .publish(IdentTopic::new(topic.clone()), data)
                            .map(|_| ())
                            .map_err(|e| TransportError::Publish { topic, reason: e.to_string() });
                        let _ = reply.send(result);
                    }
                    Some(Command::Subscribe { topic, sender, reply }) => {
                        let ident = IdentTopic::new(topic.clone());
                        let result = self
                            .swarm
                            .behaviour_mut()
                            .gossipsub
                            .subscribe(&ident)
                            .map(|_| {
                                self.subscribers.entry(ident.hash()).or_default().push(sender);
                            })
                            .map_err(|e| TransportError::Subscribe { topic, reason: e.to_string() });
                        let _ = reply.send(result);
                    }
                    Some(Command::TopicPeers { topic, reply }) => {
                        let hash = IdentTopic::new(topic).hash();
                        let count = self
                            .swarm
                            .behaviour()
                            .gossipsub
                            .all_peers()
                            .filter(|(_, topics)| topics.contains(&&hash))
                            .count();
                        let _ = reply.send(count);
                    }
                    Some(Command::Shutdown) | None => {
                        self.leave_topics();
                        break;
                    }
                },
            }
        }

        info!("p2p node stopped");
        Ok(())
    }

    fn forward_message(&mut self, topic: &TopicHash, from: PeerId, data: Vec<u8>) {
        let Some(senders) = self.subscribers.get_mut(topic) else {
            warn!(%topic, %from, "message received for unknown topic");
            return;
        };
        let message = InboundMessage {
            data,
            from: from.to_string(),
        };
        senders.retain(|sender| sender.send(message.clone()).is_ok());
        if senders.is_empty() {
            debug!(%topic, "no subscribers left, leaving topic");
            self.subscribers.remove(topic);
            self.unsubscribe(topic.clone());
        }
    }

    fn unsubscribe(&mut self, topic: TopicHash) {
        let ident = IdentTopic::new(topic.into_string());
        let _ = self.swarm.behaviour_mut().gossipsub.unsubscribe(&ident);
    }

    fn leave_topics(&mut self) {
        for (topic, _) in std::mem::take(&mut self.subscribers) {
            self.unsubscribe(topic);
        }
    }
}

fn behaviour(
    key_pair: &Keypair,
    kad_protocol: StreamProtocol,
) -> Result<Behaviour, Box<dyn Error + Send + Sync>> {
    let peer_id = key_pair.public().to_peer_id();
    Ok(Behaviour {
        gossipsub: gossipsub::Behaviour::new(
            MessageAuthenticity::Signed(key_pair.clone()),
            gossipsub::ConfigBuilder::default()
                .validation_mode(ValidationMode::Strict)
                .max_transmit_size(1024 * 1024)
                .build()?,
        )?,
        identify: identify::Behaviour::new(identify::Config::new(
            "/ipfs/id/1.0.0".to_owned(),
            key_pair.public(),
        )),
        kademlia: kad::Behaviour::with_config(
            peer_id,
            MemoryStore::new(peer_id),
            kad::Config::new(kad_protocol),
        ),
    })
}

/// The peer ID in the trailing `/p2p/...` component of a bootstrap address.
fn bootstrap_peer(address: &Multiaddr) -> Option<PeerId> {
    match address.iter().last()? {
        Protocol::P2p(peer_id) => Some(peer_id),
        _ => None,
    }
}

/// A cloneable handle to a running [P2pNode].
#[derive(Clone)]
pub struct P2pHandle {
    peer_id: PeerId,
    commands: UnboundedSender<Command>,
}

impl P2pHandle {
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// The number of connected peers which have joined `topic`.
    pub async fn topic_peers(&self, topic: &str) -> Result<usize, TransportError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::TopicPeers {
                topic: topic.to_owned(),
                reply,
            })
            .map_err(|_| TransportError::Closed)?;
        response.await.map_err(|_| TransportError::Closed)
    }

    /// Waits until at least `min` peers have joined `topic`.
    pub async fn wait_for_peers(&self, topic: &str, min: usize) -> Result<usize, TransportError> {
        let mut interval = time::interval(Duration::from_millis(100));
        loop {
            interval.tick().await;
            let peers = self.topic_peers(topic).await?;
            if peers >= min {
                return Ok(peers);
            }
        }
    }

    /// Leaves every topic and stops the node. Open subscriptions end with [TransportError::Closed].
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

#[async_trait]
impl Transport for P2pHandle {
    fn local_id(&self) -> String {
        self.peer_id.to_string()
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Publish {
                topic: topic.to_owned(),
                data: payload,
                reply,
            })
            .map_err(|_| TransportError::Closed)?;
        response.await.map_err(|_| TransportError::Closed)?
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError> {
        let (sender, subscription) = Subscription::new(topic);
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Subscribe {
                topic: topic.to_owned(),
                sender,
                reply,
            })
            .map_err(|_| TransportError::Closed)?;
        response.await.map_err(|_| TransportError::Closed)??;
        Ok(subscription)
    }
}
