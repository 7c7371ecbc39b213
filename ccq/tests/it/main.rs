mod exchange;
mod lifecycle;

use std::time::{Duration, SystemTime};

use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Address, B256, Bytes, U256, address},
};
use ccq::{
    abi::AbiDecoder,
    client::{QueryClient, QueryTopics},
    correlator::CorrelatorConfig,
    crypto::{self, Environment, SecretKey},
    message::{GossipPayload, ProtoGossipMessage, ProtoSignedQueryResponse},
    query::{
        ChainResponse, EthCallData, EthCallQueryRequest, EthCallQueryResponse,
        PerChainQueryResponse, QueryRequest, QueryResponsePublication, SignedQueryRequest,
    },
    transport::{LocalNetwork, LocalTransport, Subscription, Transport},
};
use prost::Message;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const NETWORK_ID: &str = "/wormhole/test/2";
const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
const TOTAL_SUPPLY: u128 = 3_027_218_405_183_729_000_000_000;

fn topics() -> QueryTopics {
    QueryTopics::for_network(NETWORK_ID)
}

fn key(seed: u64) -> SecretKey {
    SecretKey::new_from_rng(&mut ChaCha8Rng::seed_from_u64(seed))
}

async fn client(
    network: &LocalNetwork,
    peer_id: &str,
    seed: u64,
    config: CorrelatorConfig,
) -> QueryClient<LocalTransport> {
    QueryClient::new(
        network.endpoint(peer_id),
        topics(),
        Environment::MainNet,
        key(seed),
        config,
    )
    .await
    .unwrap()
}

/// A request for the WETH `name` and `totalSupply`, with a fixed nonce.
fn weth_request(decoder: &AbiDecoder, nonce: u32) -> QueryRequest {
    let call_data = ["name", "totalSupply"]
        .into_iter()
        .map(|method| EthCallData::new(WETH, decoder.encode_call(method).unwrap()))
        .collect();
    let mut request = QueryRequest::new(
        2,
        EthCallQueryRequest {
            block_id: "0x123abc".to_owned(),
            call_data,
        },
    );
    request.nonce = nonce;
    request
}

fn eth_call_payload(block_number: u64, results: Vec<Vec<u8>>) -> EthCallQueryResponse {
    EthCallQueryResponse {
        block_number,
        hash: B256::repeat_byte(0xab),
        time: SystemTime::UNIX_EPOCH + Duration::from_micros(1_700_000_000_123_456),
        results: results.into_iter().map(Bytes::from).collect(),
    }
}

fn eth_call_response(block_number: u64, results: Vec<Vec<u8>>) -> ChainResponse {
    ChainResponse::EthCall(eth_call_payload(block_number, results))
}

/// What a WETH contract returns for `name` and `totalSupply`.
fn weth_results() -> Vec<Vec<u8>> {
    vec![
        DynSolValue::Tuple(vec![DynSolValue::String("Wrapped Ether".to_owned())])
            .abi_encode_params(),
        U256::from(TOTAL_SUPPLY).to_be_bytes::<32>().to_vec(),
    ]
}

fn on_chain(chain_id: u16, response: ChainResponse) -> PerChainQueryResponse {
    PerChainQueryResponse { chain_id, response }
}

/// A simulated responder: it sees every request on the request topic and publishes signed responses.
struct Guardian {
    key: SecretKey,
    transport: LocalTransport,
    requests: Subscription,
}

impl Guardian {
    async fn new(network: &LocalNetwork, peer_id: &str, seed: u64) -> Guardian {
        let transport = network.endpoint(peer_id);
        let requests = transport.subscribe(&topics().request).await.unwrap();
        Guardian {
            key: key(seed),
            transport,
            requests,
        }
    }

    fn address(&self) -> Address {
        self.key.address()
    }

    /// Waits for the next signed request, returning it with the address that signed it for mainnet.
    async fn next_request(&mut self) -> (SignedQueryRequest, QueryRequest, Option<Address>) {
        loop {
            let message = self.requests.next().await.unwrap();
            let envelope = ProtoGossipMessage::decode(message.data.as_slice()).unwrap();
            if let Some(GossipPayload::SignedQueryRequest(signed)) = envelope.message {
                let signed = SignedQueryRequest::from(signed);
                let request = QueryRequest::unmarshal(&signed.query_request).unwrap();
                let digest =
                    crypto::query_request_digest(Environment::MainNet, &signed.query_request);
                let requester = crypto::recover_signer(&digest, &signed.signature).ok();
                return (signed, request, requester);
            }
        }
    }

    async fn respond(&self, signed: &SignedQueryRequest, responses: Vec<PerChainQueryResponse>) {
        let publication = QueryResponsePublication {
            request: signed.clone(),
            per_chain_responses: responses,
        };
        let query_response = publication.marshal().unwrap();
        let signature = self
            .key
            .sign(&crypto::query_response_digest(&query_response))
            .unwrap()
            .to_vec();
        self.publish_response(ProtoSignedQueryResponse {
            query_response,
            signature,
        })
        .await;
    }

    async fn publish_response(&self, response: ProtoSignedQueryResponse) {
        self.publish_raw(ProtoGossipMessage::from(response).encode_to_vec())
            .await;
    }

    async fn publish_raw(&self, data: Vec<u8>) {
        self.transport
            .publish(&topics().response, data)
            .await
            .unwrap();
    }
}
