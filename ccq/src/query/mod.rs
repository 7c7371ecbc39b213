//! The cross-chain query model: what a requester asks for, and the shape of the answer.
//!
//! A [QueryRequest] bundles one or more [PerChainQueryRequest]s, each targeting a single chain with a
//! [ChainQuery]. The matching [QueryResponsePublication] echoes the signed request it answers and carries one
//! [PerChainQueryResponse] per query, in the same order.
//!
//! Both sides have a deterministic binary encoding (see [request] and [response]). The request bytes are what gets
//! signed, and they double as the key used to correlate a response with the request that produced it, so the
//! encoding must never depend on anything other than the logical content of the value.

use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use alloy::primitives::{Address, Bytes};

use crate::error::QueryError;

pub mod codec;
pub mod request;
pub mod response;

pub use response::{
    ChainResponse, EthCallQueryResponse, PerChainQueryResponse, QueryResponsePublication,
};

/// Version byte at the start of every encoded request and response.
pub const MSG_VERSION: u8 = 1;

/// Length of a recoverable secp256k1 signature (`r || s || v`).
pub const SIGNATURE_LENGTH: usize = 65;

/// Wire tag identifying the kind of a per chain query (and of its response).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum QueryType {
    EthCall = 1,
    EthCallWithFinality = 3,
}

impl QueryType {
    pub fn from_tag(tag: u8) -> Result<QueryType, QueryError> {
        match tag {
            1 => Ok(QueryType::EthCall),
            3 => Ok(QueryType::EthCallWithFinality),
            other => Err(QueryError::UnsupportedQueryType(other)),
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl Display for QueryType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            QueryType::EthCall => f.write_str("eth_call"),
            QueryType::EthCallWithFinality => f.write_str("eth_call_with_finality"),
        }
    }
}

/// A single contract call: the target contract and the ABI encoded input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthCallData {
    pub to: Address,
    pub data: Bytes,
}

impl EthCallData {
    pub fn new(to: Address, data: impl Into<Bytes>) -> Self {
        EthCallData {
            to,
            data: data.into(),
        }
    }

    /// The 4-byte function selector at the start of `data`, if there is one.
    pub fn selector(&self) -> Option<[u8; 4]> {
        self.data.get(..4)?.try_into().ok()
    }
}

/// Execute a batch of calls against a block, identified by number (hex) or by tag (e.g. `latest`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthCallQueryRequest {
    pub block_id: String,
    pub call_data: Vec<EthCallData>,
}

/// The block commitment level an [EthCallWithFinalityQueryRequest] must reach before it is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finality {
    Finalized,
    Safe,
}

impl Finality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Finality::Finalized => "finalized",
            Finality::Safe => "safe",
        }
    }
}

impl FromStr for Finality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "finalized" => Ok(Finality::Finalized),
            "safe" => Ok(Finality::Safe),
            other => Err(format!("invalid finality: {other:?}")),
        }
    }
}

/// Like [EthCallQueryRequest], but responders hold the query until the block has reached `finality`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthCallWithFinalityQueryRequest {
    pub block_id: String,
    pub finality: Finality,
    pub call_data: Vec<EthCallData>,
}

/// The chain-specific part of a query. Adding a new kind of query means adding a variant here, a codec arm in
/// [request] and [response] and a branch in [crate::verify]. The correlation loop does not change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainQuery {
    EthCall(EthCallQueryRequest),
    EthCallWithFinality(EthCallWithFinalityQueryRequest),
}

impl ChainQuery {
    pub fn query_type(&self) -> QueryType {
        match self {
            ChainQuery::EthCall(_) => QueryType::EthCall,
            ChainQuery::EthCallWithFinality(_) => QueryType::EthCallWithFinality,
        }
    }

    pub fn call_data(&self) -> &[EthCallData] {
        match self {
            ChainQuery::EthCall(q) => &q.call_data,
            ChainQuery::EthCallWithFinality(q) => &q.call_data,
        }
    }

    pub fn block_id(&self) -> &str {
        match self {
            ChainQuery::EthCall(q) => &q.block_id,
            ChainQuery::EthCallWithFinality(q) => &q.block_id,
        }
    }
}

impl From<EthCallQueryRequest> for ChainQuery {
    fn from(q: EthCallQueryRequest) -> Self {
        ChainQuery::EthCall(q)
    }
}

impl From<EthCallWithFinalityQueryRequest> for ChainQuery {
    fn from(q: EthCallWithFinalityQueryRequest) -> Self {
        ChainQuery::EthCallWithFinality(q)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerChainQueryRequest {
    pub chain_id: u16,
    pub query: ChainQuery,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    /// Random per request. Not used for correlation.
    pub nonce: u32,
    pub per_chain_queries: Vec<PerChainQueryRequest>,
}

impl QueryRequest {
    /// Builds a request for a single chain with a fresh random nonce.
    pub fn new(chain_id: u16, query: impl Into<ChainQuery>) -> Self {
        Self::with_queries(vec![PerChainQueryRequest {
            chain_id,
            query: query.into(),
        }])
    }

    /// Builds a request with a fresh random nonce over a caller-supplied list of per chain queries.
    pub fn with_queries(per_chain_queries: Vec<PerChainQueryRequest>) -> Self {
        QueryRequest {
            nonce: rand::random(),
            per_chain_queries,
        }
    }
}

/// The serialized request and the requester's signature over its digest, exactly as broadcast. Responders echo
/// this back verbatim, which is what lets a requester recognise its own answer on a shared topic.
#[derive(Clone, PartialEq, Eq)]
pub struct SignedQueryRequest {
    pub query_request: Vec<u8>,
    pub signature: Vec<u8>,
}

impl SignedQueryRequest {
    /// True iff both fields are byte-for-byte equal to ours.
    pub fn matches(&self, query_request: &[u8], signature: &[u8]) -> bool {
        self.query_request == query_request && self.signature == signature
    }
}

impl fmt::Debug for SignedQueryRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedQueryRequest")
            .field("query_request", &hex::encode(&self.query_request))
            .field("signature", &hex::encode(&self.signature))
            .finish()
    }
}
