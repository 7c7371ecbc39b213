use std::{collections::HashSet, future::pending};

use alloy::{dyn_abi::DynSolValue, primitives::U256};
use ccq::{
    abi::AbiDecoder,
    correlator::{CorrelatorConfig, SentQuery},
    crypto::Environment,
    message::{ProtoGossipMessage, ProtoSignedQueryResponse},
    query::{
        ChainQuery, ChainResponse, EthCallQueryRequest, EthCallWithFinalityQueryRequest, Finality,
        PerChainQueryRequest, QueryRequest,
    },
    transport::LocalNetwork,
    verify::RawDecoder,
};
use prost::Message;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    Guardian, TOTAL_SUPPLY, client, eth_call_payload, eth_call_response, key, on_chain,
    weth_request, weth_results,
};

#[tokio::test]
async fn exact_match_is_verified_and_decoded() {
    let network = LocalNetwork::new();
    let mut guardian = Guardian::new(&network, "guardian", 1).await;
    let mut client = client(&network, "requester", 100, CorrelatorConfig::default()).await;
    let decoder = AbiDecoder::weth().unwrap();

    let guardian_address = guardian.address();
    let responder = tokio::spawn(async move {
        let (signed, request, requester) = guardian.next_request().await;
        assert_eq!(request.nonce, 42);
        guardian
            .respond(&signed, vec![on_chain(2, eth_call_response(7, weth_results()))])
            .await;
        requester
    });

    let response = client
        .query(weth_request(&decoder, 42), pending())
        .await
        .unwrap();
    let requester = responder.await.unwrap();

    assert_eq!(requester, Some(key(100).address()));
    assert_eq!(response.from, "guardian");
    assert_eq!(response.responder, Some(guardian_address));
    assert_eq!(response.response.request().nonce, 42);

    let decoded = response.response.decode(&decoder);
    assert_eq!(decoded.len(), 2);
    assert_eq!(
        decoded[0].value.as_ref().unwrap(),
        &vec![DynSolValue::String("Wrapped Ether".to_owned())]
    );
    assert_eq!(
        decoded[1].value.as_ref().unwrap(),
        &vec![DynSolValue::Uint(U256::from(TOTAL_SUPPLY), 256)]
    );
    assert!(decoded.iter().all(|d| d.block_number == 7 && d.chain_id == 2));
}

#[tokio::test]
async fn responses_to_other_requests_are_skipped() {
    let network = LocalNetwork::new();
    let mut guardian = Guardian::new(&network, "guardian", 1).await;
    let mut client = client(&network, "requester", 100, CorrelatorConfig::default()).await;
    let decoder = AbiDecoder::weth().unwrap();

    // Another requester's request, identical apart from the signing key.
    let foreign = SentQuery::sign(weth_request(&decoder, 42), Environment::MainNet, &key(200))
        .unwrap()
        .signed;

    tokio::spawn(async move {
        let (signed, _, _) = guardian.next_request().await;
        assert_eq!(signed.query_request, foreign.query_request);
        guardian
            .respond(&foreign, vec![on_chain(2, eth_call_response(1, weth_results()))])
            .await;
        guardian
            .respond(&signed, vec![on_chain(2, eth_call_response(2, weth_results()))])
            .await;
    });

    let response = client
        .query(weth_request(&decoder, 42), pending())
        .await
        .unwrap();
    let decoded = response.response.decode(&RawDecoder);
    assert_eq!(decoded[0].block_number, 2);
}

#[tokio::test]
async fn garbage_and_other_message_types_are_skipped() {
    let network = LocalNetwork::new();
    let mut guardian = Guardian::new(&network, "guardian", 1).await;
    let mut client = client(&network, "requester", 100, CorrelatorConfig::default()).await;
    let decoder = AbiDecoder::weth().unwrap();

    tokio::spawn(async move {
        let (signed, _, _) = guardian.next_request().await;

        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for len in [0, 1, 7, 64, 300] {
            let garbage: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();
            guardian.publish_raw(garbage).await;
        }
        // Our own request echoed back on the response topic.
        guardian
            .publish_raw(ProtoGossipMessage::from(&signed).encode_to_vec())
            .await;
        // A well formed envelope around an unparseable publication.
        guardian
            .publish_response(ProtoSignedQueryResponse {
                query_response: vec![1, 0, 0],
                signature: vec![0; 65],
            })
            .await;

        guardian
            .respond(&signed, vec![on_chain(2, eth_call_response(3, weth_results()))])
            .await;
    });

    let response = client
        .query(weth_request(&decoder, 1), pending())
        .await
        .unwrap();
    assert_eq!(response.response.decode(&decoder).len(), 2);
}

#[tokio::test]
async fn sender_allow_list_filters_responders() {
    let network = LocalNetwork::new();
    let mut p1 = Guardian::new(&network, "p1", 1).await;
    let mut p2 = Guardian::new(&network, "p2", 2).await;
    let config = CorrelatorConfig {
        allowed_senders: HashSet::from(["p2".to_owned()]),
        ..CorrelatorConfig::default()
    };
    let mut client = client(&network, "requester", 100, config).await;
    let decoder = AbiDecoder::weth().unwrap();

    tokio::spawn(async move {
        let (signed, _, _) = p1.next_request().await;
        p1.respond(&signed, vec![on_chain(2, eth_call_response(1, weth_results()))])
            .await;
        let (signed, _, _) = p2.next_request().await;
        p2.respond(&signed, vec![on_chain(2, eth_call_response(2, weth_results()))])
            .await;
    });

    let response = client
        .query(weth_request(&decoder, 5), pending())
        .await
        .unwrap();
    assert_eq!(response.from, "p2");
    assert_eq!(response.response.decode(&RawDecoder)[0].block_number, 2);
}

#[tokio::test]
async fn malformed_match_is_discarded_and_a_later_one_accepted() {
    let network = LocalNetwork::new();
    let mut guardian = Guardian::new(&network, "guardian", 1).await;
    let mut client = client(&network, "requester", 100, CorrelatorConfig::default()).await;
    let decoder = AbiDecoder::weth().unwrap();

    tokio::spawn(async move {
        let (signed, _, _) = guardian.next_request().await;
        // One result for two calls.
        guardian
            .respond(
                &signed,
                vec![on_chain(2, eth_call_response(1, weth_results()[..1].to_vec()))],
            )
            .await;
        // No per chain responses at all.
        guardian.respond(&signed, vec![]).await;
        guardian
            .respond(&signed, vec![on_chain(2, eth_call_response(2, weth_results()))])
            .await;
    });

    let response = client
        .query(weth_request(&decoder, 9), pending())
        .await
        .unwrap();
    let decoded = response.response.decode(&decoder);
    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded[0].block_number, 2);
}

#[tokio::test]
async fn multi_chain_request_is_answered_in_order() {
    let network = LocalNetwork::new();
    let mut guardian = Guardian::new(&network, "guardian", 1).await;
    let mut client = client(&network, "requester", 100, CorrelatorConfig::default()).await;
    let decoder = AbiDecoder::weth().unwrap();

    let weth = weth_request(&decoder, 0).per_chain_queries.remove(0).query;
    let calls = weth.call_data().to_vec();
    let request = QueryRequest::with_queries(vec![
        PerChainQueryRequest {
            chain_id: 2,
            query: weth,
        },
        PerChainQueryRequest {
            chain_id: 5,
            query: ChainQuery::EthCallWithFinality(EthCallWithFinalityQueryRequest {
                block_id: "0x10".to_owned(),
                finality: Finality::Finalized,
                call_data: calls[..1].to_vec(),
            }),
        },
        PerChainQueryRequest {
            chain_id: 23,
            query: EthCallQueryRequest {
                block_id: "latest".to_owned(),
                call_data: calls[1..].to_vec(),
            }
            .into(),
        },
    ]);

    tokio::spawn(async move {
        let (signed, request, _) = guardian.next_request().await;
        assert_eq!(request.per_chain_queries.len(), 3);
        let results = weth_results();
        let with_finality =
            ChainResponse::EthCallWithFinality(eth_call_payload(11, vec![results[0].clone()]));
        guardian
            .respond(
                &signed,
                vec![
                    on_chain(2, eth_call_response(10, results.clone())),
                    on_chain(5, with_finality),
                    on_chain(23, eth_call_response(12, vec![results[1].clone()])),
                ],
            )
            .await;
    });

    let response = client.query(request, pending()).await.unwrap();
    let decoded = response.response.decode(&decoder);
    let positions: Vec<_> = decoded
        .iter()
        .map(|d| (d.chain_index, d.chain_id, d.call_index, d.block_number))
        .collect();
    assert_eq!(
        positions,
        vec![(0, 2, 0, 10), (0, 2, 1, 10), (1, 5, 0, 11), (2, 23, 0, 12)]
    );
    assert!(decoded.iter().all(|d| d.value.is_ok()));
}
