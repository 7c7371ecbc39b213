//! Request encoding and validation.
//!
//! ```text
//! QueryRequest          := u8 version | u32 nonce | u8 count | PerChainQueryRequest*
//! PerChainQueryRequest  := u16 chain_id | u8 query_type | u32 len | payload
//! EthCall               := u32 len | block_id | u8 count | (20-byte to | u32 len | data)*
//! EthCallWithFinality   := u32 len | block_id | u32 len | finality | u8 count | calls
//! ```

use alloy::primitives::Address;

use super::{
    ChainQuery, EthCallData, EthCallQueryRequest, EthCallWithFinalityQueryRequest, MSG_VERSION,
    PerChainQueryRequest, QueryRequest, QueryType,
    codec::{Reader, Writer, count_u8},
};
use crate::error::QueryError;

impl QueryRequest {
    /// Checks the request can be encoded and would be accepted by a responder.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.per_chain_queries.is_empty() {
            return Err(QueryError::NoQueries);
        }
        count_u8("per chain queries", self.per_chain_queries.len())?;
        for (index, pcq) in self.per_chain_queries.iter().enumerate() {
            pcq.query
                .validate()
                .map_err(|reason| QueryError::InvalidQuery { index, reason })?;
        }
        Ok(())
    }

    /// Serializes the request. The output depends only on the content of `self`, so the same request always
    /// produces the same bytes.
    pub fn marshal(&self) -> Result<Vec<u8>, QueryError> {
        self.validate()?;

        let mut w = Writer::new();
        w.u8(MSG_VERSION)
            .u32(self.nonce)
            .u8(count_u8("per chain queries", self.per_chain_queries.len())?);
        for pcq in &self.per_chain_queries {
            let payload = pcq.query.marshal()?;
            w.u16(pcq.chain_id)
                .u8(pcq.query.query_type().tag())
                .var_bytes(&payload);
        }
        Ok(w.into_vec())
    }

    pub fn unmarshal(data: &[u8]) -> Result<QueryRequest, QueryError> {
        let mut r = Reader::new(data);

        let version = r.u8("version")?;
        if version != MSG_VERSION {
            return Err(QueryError::UnsupportedVersion(version));
        }
        let nonce = r.u32("nonce")?;
        let count = r.u8("number of per chain queries")?;

        let mut per_chain_queries = Vec::with_capacity(count as usize);
        for index in 0..count as usize {
            let chain_id = r.u16("chain id")?;
            let query_type = QueryType::from_tag(r.u8("query type")?)?;
            let payload = r.var_bytes("query payload")?;
            let query = ChainQuery::unmarshal(index, query_type, payload)?;
            per_chain_queries.push(PerChainQueryRequest { chain_id, query });
        }
        r.finish()?;

        let request = QueryRequest {
            nonce,
            per_chain_queries,
        };
        request.validate()?;
        Ok(request)
    }
}

impl ChainQuery {
    fn validate(&self) -> Result<(), String> {
        if self.block_id().is_empty() {
            return Err("block id is empty".to_owned());
        }
        let calls = self.call_data();
        if calls.is_empty() {
            return Err("no call data".to_owned());
        }
        if calls.len() > u8::MAX as usize {
            return Err(format!("too many calls: {}", calls.len()));
        }
        if let Some(i) = calls.iter().position(|c| c.data.is_empty()) {
            return Err(format!("call {i} has no data"));
        }
        Ok(())
    }

    fn marshal(&self) -> Result<Vec<u8>, QueryError> {
        let mut w = Writer::new();
        match self {
            ChainQuery::EthCall(q) => {
                w.var_bytes(q.block_id.as_bytes());
                write_calls(&mut w, &q.call_data)?;
            }
            ChainQuery::EthCallWithFinality(q) => {
                w.var_bytes(q.block_id.as_bytes())
                    .var_bytes(q.finality.as_str().as_bytes());
                write_calls(&mut w, &q.call_data)?;
            }
        }
        Ok(w.into_vec())
    }

    fn unmarshal(
        index: usize,
        query_type: QueryType,
        payload: &[u8],
    ) -> Result<ChainQuery, QueryError> {
        let mut r = Reader::new(payload);
        let query = match query_type {
            QueryType::EthCall => {
                let block_id = r.var_string("block id")?;
                let call_data = read_calls(&mut r)?;
                ChainQuery::EthCall(EthCallQueryRequest {
                    block_id,
                    call_data,
                })
            }
            QueryType::EthCallWithFinality => {
                let block_id = r.var_string("block id")?;
                let finality = r
                    .var_string("finality")?
                    .parse()
                    .map_err(|reason| QueryError::InvalidQuery { index, reason })?;
                let call_data = read_calls(&mut r)?;
                ChainQuery::EthCallWithFinality(EthCallWithFinalityQueryRequest {
                    block_id,
                    finality,
                    call_data,
                })
            }
        };
        r.finish()?;
        Ok(query)
    }
}

fn write_calls(w: &mut Writer, calls: &[EthCallData]) -> Result<(), QueryError> {
    w.u8(count_u8("calls", calls.len())?);
    for call in calls {
        w.raw(call.to.as_slice()).var_bytes(&call.data);
    }
    Ok(())
}

fn read_calls(r: &mut Reader) -> Result<Vec<EthCallData>, QueryError> {
    let count = r.u8("number of calls")?;
    (0..count)
        .map(|_| {
            let to = Address::from(r.fixed::<20>("call target")?);
            let data = r.var_bytes("call data")?.to_vec();
            Ok::<_, QueryError>(EthCallData::new(to, data))
        })
        .collect()
}
