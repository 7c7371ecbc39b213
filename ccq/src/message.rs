//! The gossip envelope shared with the rest of the network.
//!
//! Every message on a gossip topic is a protobuf `GossipMessage` whose `oneof` selects the payload. This client only
//! understands signed query requests and responses; any other payload decodes to `message: None` and is ignored.

use prost::{Message, Oneof};

use crate::{
    crypto::{self, Hash},
    error::KeyError,
    query::SignedQueryRequest,
};

#[derive(Clone, PartialEq, Message)]
pub struct ProtoGossipMessage {
    #[prost(oneof = "GossipPayload", tags = "10, 11")]
    pub message: Option<GossipPayload>,
}

#[derive(Clone, PartialEq, Oneof)]
pub enum GossipPayload {
    #[prost(message, tag = "10")]
    SignedQueryRequest(ProtoSignedQueryRequest),
    #[prost(message, tag = "11")]
    SignedQueryResponse(ProtoSignedQueryResponse),
}

#[derive(Clone, PartialEq, Eq, Message)]
pub struct ProtoSignedQueryRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub query_request: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Message)]
pub struct ProtoSignedQueryResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub query_response: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

impl ProtoGossipMessage {
    pub fn name(&self) -> &'static str {
        match self.message {
            Some(GossipPayload::SignedQueryRequest(_)) => "SignedQueryRequest",
            Some(GossipPayload::SignedQueryResponse(_)) => "SignedQueryResponse",
            None => "Unknown",
        }
    }

    pub fn into_query_response(self) -> Option<ProtoSignedQueryResponse> {
        match self.message {
            Some(GossipPayload::SignedQueryResponse(r)) => Some(r),
            _ => None,
        }
    }
}

impl From<&SignedQueryRequest> for ProtoGossipMessage {
    fn from(signed: &SignedQueryRequest) -> Self {
        ProtoGossipMessage {
            message: Some(GossipPayload::SignedQueryRequest(ProtoSignedQueryRequest {
                query_request: signed.query_request.clone(),
                signature: signed.signature.clone(),
            })),
        }
    }
}

impl From<ProtoSignedQueryResponse> for ProtoGossipMessage {
    fn from(response: ProtoSignedQueryResponse) -> Self {
        ProtoGossipMessage {
            message: Some(GossipPayload::SignedQueryResponse(response)),
        }
    }
}

impl From<ProtoSignedQueryRequest> for SignedQueryRequest {
    fn from(proto: ProtoSignedQueryRequest) -> Self {
        SignedQueryRequest {
            query_request: proto.query_request,
            signature: proto.signature,
        }
    }
}

impl ProtoSignedQueryResponse {
    pub fn digest(&self) -> Hash {
        crypto::query_response_digest(&self.query_response)
    }

    /// The address of the node that signed this response. Informational only: no quorum is checked.
    pub fn responder(&self) -> Result<alloy::primitives::Address, KeyError> {
        crypto::recover_signer(&self.digest(), &self.signature)
    }
}
