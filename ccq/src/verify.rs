//! Structural verification of a correlated response, and per-result decoding.

use std::{fmt::Debug, time::SystemTime};

use alloy::primitives::{B256, Bytes};
use tracing::{info, warn};

use crate::{
    error::VerificationError,
    query::{
        ChainQuery, ChainResponse, EthCallData, EthCallQueryResponse, QueryRequest,
        QueryResponsePublication,
    },
};

/// Turns the raw bytes returned by one call into something meaningful, e.g. by ABI decoding them.
pub trait ResultDecoder {
    type Output: Debug;

    /// `call` is the call that produced `result`; its selector identifies the method.
    fn decode(&self, call: &EthCallData, result: &[u8]) -> anyhow::Result<Self::Output>;
}

/// Passes results through untouched.
pub struct RawDecoder;

impl ResultDecoder for RawDecoder {
    type Output = Bytes;

    fn decode(&self, _: &EthCallData, result: &[u8]) -> anyhow::Result<Bytes> {
        Ok(Bytes::copy_from_slice(result))
    }
}

/// One call's result, decoded. A failure here does not affect any other result.
#[derive(Debug)]
pub struct DecodedResult<T> {
    pub chain_index: usize,
    pub chain_id: u16,
    pub call_index: usize,
    pub block_number: u64,
    pub block_hash: B256,
    pub block_time: SystemTime,
    pub raw: Bytes,
    pub value: anyhow::Result<T>,
}

/// A response that is known to line up with the request it answers: one response per query, each of the same kind
/// as its query, and one result per call.
#[derive(Debug, Clone)]
pub struct VerifiedResponse {
    request: QueryRequest,
    publication: QueryResponsePublication,
}

impl VerifiedResponse {
    pub fn new(
        request: &QueryRequest,
        publication: QueryResponsePublication,
    ) -> Result<VerifiedResponse, VerificationError> {
        verify_response(request, &publication)?;
        Ok(VerifiedResponse {
            request: request.clone(),
            publication,
        })
    }

    pub fn request(&self) -> &QueryRequest {
        &self.request
    }

    pub fn publication(&self) -> &QueryResponsePublication {
        &self.publication
    }

    /// Runs `decoder` over every result, logging each outcome.
    pub fn decode<D: ResultDecoder>(&self, decoder: &D) -> Vec<DecodedResult<D::Output>> {
        let mut decoded = vec![];
        for (chain_index, (pcq, pcr)) in self
            .request
            .per_chain_queries
            .iter()
            .zip(&self.publication.per_chain_responses)
            .enumerate()
        {
            info!(index = chain_index, chain_id = pcr.chain_id, "per chain query response");
            let response = eth_call_response(&pcr.response);
            for (call_index, (call, result)) in pcq
                .query
                .call_data()
                .iter()
                .zip(&response.results)
                .enumerate()
            {
                let value = decoder.decode(call, result);
                match &value {
                    Ok(value) => info!(
                        idx = call_index,
                        number = response.block_number,
                        hash = %response.hash,
                        time = ?response.time,
                        to = %call.to,
                        result_decoded = ?value,
                        result_str = %result,
                        "found matching response"
                    ),
                    Err(e) => warn!(
                        idx = call_index,
                        to = %call.to,
                        result_str = %result,
                        "failed to unpack result: {e:#}"
                    ),
                }
                decoded.push(DecodedResult {
                    chain_index,
                    chain_id: pcr.chain_id,
                    call_index,
                    block_number: response.block_number,
                    block_hash: response.hash,
                    block_time: response.time,
                    raw: result.clone(),
                    value,
                });
            }
        }
        decoded
    }
}

fn eth_call_response(response: &ChainResponse) -> &EthCallQueryResponse {
    match response {
        ChainResponse::EthCall(r) | ChainResponse::EthCallWithFinality(r) => r,
    }
}

/// Checks that `publication` structurally answers `request`.
pub fn verify_response(
    request: &QueryRequest,
    publication: &QueryResponsePublication,
) -> Result<(), VerificationError> {
    let expected = request.per_chain_queries.len();
    let actual = publication.per_chain_responses.len();
    if expected != actual {
        return Err(VerificationError::ResponseCountMismatch { expected, actual });
    }

    for (index, (pcq, pcr)) in request
        .per_chain_queries
        .iter()
        .zip(&publication.per_chain_responses)
        .enumerate()
    {
        match (&pcq.query, &pcr.response) {
            (ChainQuery::EthCall(q), ChainResponse::EthCall(r)) => {
                check_result_count(index, &q.call_data, r)?
            }
            (ChainQuery::EthCallWithFinality(q), ChainResponse::EthCallWithFinality(r)) => {
                check_result_count(index, &q.call_data, r)?
            }
            (q, r) => {
                return Err(VerificationError::VariantMismatch {
                    index,
                    expected: q.query_type(),
                    actual: r.query_type(),
                });
            }
        }
    }

    Ok(())
}

fn check_result_count(
    index: usize,
    calls: &[EthCallData],
    response: &EthCallQueryResponse,
) -> Result<(), VerificationError> {
    if calls.len() != response.results.len() {
        return Err(VerificationError::ResultCountMismatch {
            index,
            expected: calls.len(),
            actual: response.results.len(),
        });
    }
    Ok(())
}
