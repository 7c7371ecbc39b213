//! Response encoding.
//!
//! ```text
//! QueryResponsePublication := u8 version | u8 request_type | 65-byte signature | u32 len | request
//!                             | u8 count | PerChainQueryResponse*
//! PerChainQueryResponse    := u16 chain_id | u8 query_type | u32 len | payload
//! EthCall(WithFinality)    := u64 block_number | 32-byte hash | u64 time_us | u8 count | (u32 len | result)*
//! ```

use std::time::{Duration, SystemTime};

use alloy::primitives::{B256, Bytes};

use super::{
    MSG_VERSION, QueryType, SIGNATURE_LENGTH, SignedQueryRequest,
    codec::{Reader, Writer, count_u8},
};
use crate::error::QueryError;

/// Requests signed by an off-chain requester. On-chain requests are not supported by this client.
const OFF_CHAIN_REQUEST: u8 = 0;

/// The result of a batch of calls executed against one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthCallQueryResponse {
    pub block_number: u64,
    pub hash: B256,
    /// Block time. Encoded with microsecond precision.
    pub time: SystemTime,
    /// One result per call, in call order.
    pub results: Vec<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainResponse {
    EthCall(EthCallQueryResponse),
    EthCallWithFinality(EthCallQueryResponse),
}

impl ChainResponse {
    pub fn query_type(&self) -> QueryType {
        match self {
            ChainResponse::EthCall(_) => QueryType::EthCall,
            ChainResponse::EthCallWithFinality(_) => QueryType::EthCallWithFinality,
        }
    }

    fn marshal(&self) -> Result<Vec<u8>, QueryError> {
        match self {
            ChainResponse::EthCall(r) | ChainResponse::EthCallWithFinality(r) => {
                let micros = r
                    .time
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_micros() as u64;
                let mut w = Writer::new();
                w.u64(r.block_number)
                    .raw(r.hash.as_slice())
                    .u64(micros)
                    .u8(count_u8("results", r.results.len())?);
                for result in &r.results {
                    w.var_bytes(result);
                }
                Ok(w.into_vec())
            }
        }
    }

    fn unmarshal(query_type: QueryType, payload: &[u8]) -> Result<ChainResponse, QueryError> {
        let mut r = Reader::new(payload);
        let block_number = r.u64("block number")?;
        let hash = B256::from(r.fixed::<32>("block hash")?);
        let time = SystemTime::UNIX_EPOCH + Duration::from_micros(r.u64("block time")?);
        let count = r.u8("number of results")?;
        let results = (0..count)
            .map(|_| Ok::<_, QueryError>(Bytes::copy_from_slice(r.var_bytes("result")?)))
            .collect::<Result<Vec<_>, _>>()?;
        r.finish()?;

        let response = EthCallQueryResponse {
            block_number,
            hash,
            time,
            results,
        };
        Ok(match query_type {
            QueryType::EthCall => ChainResponse::EthCall(response),
            QueryType::EthCallWithFinality => ChainResponse::EthCallWithFinality(response),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerChainQueryResponse {
    pub chain_id: u16,
    pub response: ChainResponse,
}

/// What a responder publishes: the request it is answering, echoed byte for byte, followed by one response per
/// query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResponsePublication {
    pub request: SignedQueryRequest,
    pub per_chain_responses: Vec<PerChainQueryResponse>,
}

impl QueryResponsePublication {
    pub fn marshal(&self) -> Result<Vec<u8>, QueryError> {
        if self.request.signature.len() != SIGNATURE_LENGTH {
            return Err(QueryError::InvalidSignatureLength(
                self.request.signature.len(),
            ));
        }

        let mut w = Writer::new();
        w.u8(MSG_VERSION)
            .u8(OFF_CHAIN_REQUEST)
            .raw(&self.request.signature)
            .var_bytes(&self.request.query_request)
            .u8(count_u8(
                "per chain responses",
                self.per_chain_responses.len(),
            )?);
        for pcr in &self.per_chain_responses {
            let payload = pcr.response.marshal()?;
            w.u16(pcr.chain_id)
                .u8(pcr.response.query_type().tag())
                .var_bytes(&payload);
        }
        Ok(w.into_vec())
    }

    pub fn unmarshal(data: &[u8]) -> Result<QueryResponsePublication, QueryError> {
        let mut r = Reader::new(data);

        let version = r.u8("version")?;
        if version != MSG_VERSION {
            return Err(QueryError::UnsupportedVersion(version));
        }
        let request_type = r.u8("request type")?;
        if request_type != OFF_CHAIN_REQUEST {
            return Err(QueryError::UnsupportedRequestType(request_type));
        }
        let signature = r.fixed::<SIGNATURE_LENGTH>("request signature")?.to_vec();
        let query_request = r.var_bytes("query request")?.to_vec();

        let count = r.u8("number of per chain responses")?;
        let mut per_chain_responses = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let chain_id = r.u16("chain id")?;
            let query_type = QueryType::from_tag(r.u8("query type")?)?;
            let payload = r.var_bytes("response payload")?;
            per_chain_responses.push(PerChainQueryResponse {
                chain_id,
                response: ChainResponse::unmarshal(query_type, payload)?,
            });
        }
        r.finish()?;

        Ok(QueryResponsePublication {
            request: SignedQueryRequest {
                query_request,
                signature,
            },
            per_chain_responses,
        })
    }
}
