//! A reusable query client: sign, broadcast, correlate, verify.

use std::future::Future;

use tracing::info;

use crate::{
    correlator::{CorrelatedResponse, Correlator, CorrelatorConfig, SentQuery},
    crypto::{Environment, SecretKey},
    error::{CorrelationError, TransportError},
    query::QueryRequest,
    transport::{Subscription, Transport},
};

/// The pair of gossip topics queries travel on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTopics {
    pub request: String,
    pub response: String,
}

impl QueryTopics {
    /// Topics for the query sub-network of `network_id`, e.g. `/wormhole/mainnet/2`.
    pub fn for_network(network_id: &str) -> Self {
        let ccq = Self::ccq_network_id(network_id);
        QueryTopics {
            request: format!("{ccq}/ccq_req"),
            response: format!("{ccq}/ccq_resp"),
        }
    }

    pub fn ccq_network_id(network_id: &str) -> String {
        format!("{}/ccq", network_id.trim_end_matches('/'))
    }
}

/// Runs query exchanges over a transport, one at a time. The client subscribes to the response topic when it is
/// created, so responses which arrive quickly after a request is published are never missed.
///
/// Clients are independent: several can share one transport, each with its own subscription, to run exchanges
/// concurrently.
pub struct QueryClient<T> {
    transport: T,
    topics: QueryTopics,
    subscription: Subscription,
    environment: Environment,
    key: SecretKey,
    correlator: Correlator,
}

impl<T: Transport> QueryClient<T> {
    pub async fn new(
        transport: T,
        topics: QueryTopics,
        environment: Environment,
        key: SecretKey,
        config: CorrelatorConfig,
    ) -> Result<Self, TransportError> {
        let subscription = transport.subscribe(&topics.response).await?;
        info!(topic_req = %topics.request, topic_resp = %topics.response, "subscribed to pubsub topics");
        Ok(QueryClient {
            transport,
            topics,
            subscription,
            environment,
            key,
            correlator: Correlator::new(config),
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn topics(&self) -> &QueryTopics {
        &self.topics
    }

    /// Signs `request` with this client's key for this client's environment.
    pub fn sign(&self, request: QueryRequest) -> Result<SentQuery, CorrelationError> {
        SentQuery::sign(request, self.environment, &self.key)
    }

    /// Signs and broadcasts `request`, then waits for a verified response to it.
    pub async fn query(
        &mut self,
        request: QueryRequest,
        cancel: impl Future<Output = ()>,
    ) -> Result<CorrelatedResponse, CorrelationError> {
        let sent = self.sign(request)?;
        info!(
            nonce = sent.request.nonce,
            public_key = %self.key.address(),
            "sending query request"
        );
        self.correlator
            .exchange(
                &self.transport,
                &self.topics.request,
                &mut self.subscription,
                &sent,
                cancel,
            )
            .await
    }
}
