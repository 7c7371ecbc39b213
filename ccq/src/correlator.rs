//! Matching a response on a shared topic to the request we sent.
//!
//! Every requester on the network publishes to the same request topic and every responder publishes to the same
//! response topic, so the transport cannot tell us which responses are ours. Instead, each response carries a
//! verbatim copy of the signed request it answers, and we accept a response only when both the request bytes and
//! the signature are byte-for-byte identical to what we sent. Anything else on the topic (other message types,
//! garbage, stale responses, answers to other requesters) is skipped.

use std::{
    collections::HashSet,
    fmt::{self, Display, Formatter},
    future::Future,
    time::Duration,
};

use alloy::primitives::Address;
use prost::Message;
use tokio::{select, time};
use tracing::{debug, info, trace, warn};

use crate::{
    crypto::{self, Environment, SecretKey},
    error::{CorrelationError, QueryError, VerificationError},
    message::ProtoGossipMessage,
    query::{QueryRequest, QueryResponsePublication, SignedQueryRequest},
    transport::{InboundMessage, Subscription, Transport},
    verify::VerifiedResponse,
};

/// A request along with the exact bytes and signature that were (or will be) broadcast for it.
#[derive(Debug, Clone)]
pub struct SentQuery {
    pub request: QueryRequest,
    pub signed: SignedQueryRequest,
}

impl SentQuery {
    /// Serializes `request` and signs it for `env`.
    pub fn sign(
        request: QueryRequest,
        env: Environment,
        key: &SecretKey,
    ) -> Result<SentQuery, CorrelationError> {
        let query_request = request.marshal()?;
        let digest = crypto::query_request_digest(env, &query_request);
        let signature = key.sign(&digest)?.to_vec();
        Ok(SentQuery {
            request,
            signed: SignedQueryRequest {
                query_request,
                signature,
            },
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CorrelatorConfig {
    /// When non-empty, responses published by any other peer are ignored.
    pub allowed_senders: HashSet<String>,
    /// How long to wait for a matching response. `None` waits until cancelled.
    pub response_timeout: Option<Duration>,
}

/// Why an inbound message was not accepted as the answer to our request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    InvalidEnvelope,
    SenderNotAllowed,
    NotAQueryResponse,
    InvalidResponse(QueryError),
    /// A well-formed response to some other request.
    OtherRequest,
    /// A response to our request which doesn't line up with it.
    Malformed(VerificationError),
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InvalidEnvelope => f.write_str("invalid envelope"),
            SkipReason::SenderNotAllowed => f.write_str("sender not allowed"),
            SkipReason::NotAQueryResponse => f.write_str("not a query response"),
            SkipReason::InvalidResponse(e) => write!(f, "invalid response: {e}"),
            SkipReason::OtherRequest => f.write_str("response to a different request"),
            SkipReason::Malformed(e) => write!(f, "malformed response: {e}"),
        }
    }
}

/// A verified response to our request.
#[derive(Debug, Clone)]
pub struct CorrelatedResponse {
    /// The peer that published the response.
    pub from: String,
    /// The address that signed the response, if the signature was recoverable.
    pub responder: Option<Address>,
    pub response: VerifiedResponse,
}

#[derive(Debug, Clone, Default)]
pub struct Correlator {
    config: CorrelatorConfig,
}

impl Correlator {
    pub fn new(config: CorrelatorConfig) -> Self {
        Correlator { config }
    }

    pub fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    /// Decides whether `message` answers `sent`.
    pub fn inspect(
        &self,
        sent: &SentQuery,
        message: &InboundMessage,
    ) -> Result<CorrelatedResponse, SkipReason> {
        let envelope = ProtoGossipMessage::decode(message.data.as_slice())
            .map_err(|_| SkipReason::InvalidEnvelope)?;

        if !self.config.allowed_senders.is_empty()
            && !self.config.allowed_senders.contains(&message.from)
        {
            return Err(SkipReason::SenderNotAllowed);
        }

        let response = envelope
            .into_query_response()
            .ok_or(SkipReason::NotAQueryResponse)?;
        debug!(
            from = %message.from,
            response_bytes = hex::encode(&response.query_response),
            sig_bytes = hex::encode(&response.signature),
            "query response received"
        );

        let publication = QueryResponsePublication::unmarshal(&response.query_response)
            .map_err(SkipReason::InvalidResponse)?;

        if !sent.signed.matches(
            &publication.request.query_request,
            &publication.request.signature,
        ) {
            return Err(SkipReason::OtherRequest);
        }

        let response_signer = response.responder().ok();
        let verified =
            VerifiedResponse::new(&sent.request, publication).map_err(SkipReason::Malformed)?;

        Ok(CorrelatedResponse {
            from: message.from.clone(),
            responder: response_signer,
            response: verified,
        })
    }

    /// Broadcasts the signed request on `topic`.
    pub async fn publish<T: Transport + ?Sized>(
        &self,
        transport: &T,
        topic: &str,
        sent: &SentQuery,
    ) -> Result<(), CorrelationError> {
        let envelope = ProtoGossipMessage::from(&sent.signed).encode_to_vec();
        transport.publish(topic, envelope).await?;
        info!(
            topic,
            nonce = sent.request.nonce,
            queries = sent.request.per_chain_queries.len(),
            "published query request"
        );
        Ok(())
    }

    /// Consumes `subscription` until a verified answer to `sent` arrives.
    ///
    /// Returns early with [CorrelationError::Cancelled] when `cancel` completes, [CorrelationError::TimedOut] when
    /// the configured timeout elapses, or [CorrelationError::Transport] if the subscription closes. Nothing is
    /// retained from an abandoned exchange.
    pub async fn wait_for_response(
        &self,
        subscription: &mut Subscription,
        sent: &SentQuery,
        cancel: impl Future<Output = ()>,
    ) -> Result<CorrelatedResponse, CorrelationError> {
        let timeout = self.config.response_timeout;
        let deadline = async move {
            match timeout {
                Some(timeout) => {
                    time::sleep(timeout).await;
                    timeout
                }
                None => std::future::pending().await,
            }
        };

        info!("Waiting for message...");
        select! {
            biased;
            () = cancel => Err(CorrelationError::Cancelled),
            timeout = deadline => Err(CorrelationError::TimedOut(timeout)),
            result = self.receive(subscription, sent) => result,
        }
    }

    /// Publishes `sent` and waits for the answer.
    pub async fn exchange<T: Transport + ?Sized>(
        &self,
        transport: &T,
        request_topic: &str,
        subscription: &mut Subscription,
        sent: &SentQuery,
        cancel: impl Future<Output = ()>,
    ) -> Result<CorrelatedResponse, CorrelationError> {
        self.publish(transport, request_topic, sent).await?;
        self.wait_for_response(subscription, sent, cancel).await
    }

    async fn receive(
        &self,
        subscription: &mut Subscription,
        sent: &SentQuery,
    ) -> Result<CorrelatedResponse, CorrelationError> {
        loop {
            let message = subscription.next().await?;
            match self.inspect(sent, &message) {
                Ok(response) => {
                    info!(from = %response.from, responder = ?response.responder, "found matching response");
                    return Ok(response);
                }
                Err(SkipReason::InvalidEnvelope) => {
                    info!(data = hex::encode(&message.data), from = %message.from, "received invalid message");
                }
                Err(reason @ (SkipReason::SenderNotAllowed | SkipReason::NotAQueryResponse)) => {
                    trace!(from = %message.from, %reason, "skipping message");
                }
                Err(SkipReason::OtherRequest) => {
                    debug!(from = %message.from, "skipping response to a different request");
                }
                Err(SkipReason::InvalidResponse(e)) => {
                    warn!(from = %message.from, %e, "failed to unmarshal response");
                }
                Err(SkipReason::Malformed(e)) => {
                    warn!(from = %message.from, %e, "discarding malformed response to our request");
                }
            }
        }
    }
}
