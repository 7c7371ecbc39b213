use std::{future::pending, time::Duration};

use ccq::{
    abi::AbiDecoder,
    client::QueryClient,
    correlator::CorrelatorConfig,
    crypto::{self, Environment},
    error::{CorrelationError, TransportError},
    query::QueryRequest,
    transport::LocalNetwork,
    verify::RawDecoder,
};
use tokio::sync::oneshot;

use crate::{Guardian, client, eth_call_response, key, on_chain, topics, weth_request, weth_results};

#[tokio::test(start_paused = true)]
async fn no_response_times_out() {
    let network = LocalNetwork::new();
    let _guardian = Guardian::new(&network, "guardian", 1).await;
    let config = CorrelatorConfig {
        response_timeout: Some(Duration::from_secs(5)),
        ..CorrelatorConfig::default()
    };
    let mut client = client(&network, "requester", 100, config).await;
    let decoder = AbiDecoder::weth().unwrap();

    let err = client
        .query(weth_request(&decoder, 1), pending())
        .await
        .unwrap_err();
    assert!(matches!(err, CorrelationError::TimedOut(d) if d == Duration::from_secs(5)));
}

#[tokio::test]
async fn cancellation_ends_the_exchange() {
    let network = LocalNetwork::new();
    let mut guardian = Guardian::new(&network, "guardian", 1).await;
    let mut client = client(&network, "requester", 100, CorrelatorConfig::default()).await;
    let decoder = AbiDecoder::weth().unwrap();

    let (cancel, cancelled) = oneshot::channel::<()>();
    tokio::spawn(async move {
        guardian.next_request().await;
        cancel.send(()).unwrap();
    });

    let err = client
        .query(weth_request(&decoder, 1), async {
            let _ = cancelled.await;
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CorrelationError::Cancelled));
}

#[tokio::test]
async fn closed_subscription_is_a_transport_failure() {
    let network = LocalNetwork::new();
    let mut guardian = Guardian::new(&network, "guardian", 1).await;
    let mut client = client(&network, "requester", 100, CorrelatorConfig::default()).await;
    let decoder = AbiDecoder::weth().unwrap();

    let shutdown = network.clone();
    tokio::spawn(async move {
        guardian.next_request().await;
        shutdown.shutdown();
    });

    let err = client
        .query(weth_request(&decoder, 1), pending())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CorrelationError::Transport(TransportError::Closed)
    ));
}

#[tokio::test]
async fn client_runs_repeated_exchanges() {
    let network = LocalNetwork::new();
    let mut guardian = Guardian::new(&network, "guardian", 1).await;
    let mut client = client(&network, "requester", 100, CorrelatorConfig::default()).await;
    let decoder = AbiDecoder::weth().unwrap();

    tokio::spawn(async move {
        let (first, _, _) = guardian.next_request().await;
        guardian
            .respond(&first, vec![on_chain(2, eth_call_response(1, weth_results()))])
            .await;

        let (second, _, _) = guardian.next_request().await;
        // A late duplicate of the first answer must not satisfy the second exchange.
        guardian
            .respond(&first, vec![on_chain(2, eth_call_response(1, weth_results()))])
            .await;
        guardian
            .respond(&second, vec![on_chain(2, eth_call_response(2, weth_results()))])
            .await;
    });

    for (nonce, block_number) in [(10, 1), (11, 2)] {
        let response = client
            .query(weth_request(&decoder, nonce), pending())
            .await
            .unwrap();
        assert_eq!(response.response.request().nonce, nonce);
        assert_eq!(
            response.response.decode(&RawDecoder)[0].block_number,
            block_number
        );
    }
}

#[tokio::test]
async fn requests_are_signed_for_the_client_environment() {
    let network = LocalNetwork::new();
    let mut guardian = Guardian::new(&network, "guardian", 1).await;
    let mut client = QueryClient::new(
        network.endpoint("requester"),
        topics(),
        Environment::TestNet,
        key(100),
        CorrelatorConfig::default(),
    )
    .await
    .unwrap();

    let (signed_tx, signed_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (signed, _, mainnet_signer) = guardian.next_request().await;
        guardian
            .respond(&signed, vec![on_chain(2, eth_call_response(1, weth_results()))])
            .await;
        signed_tx.send((signed, mainnet_signer)).unwrap();
    });

    let decoder = AbiDecoder::weth().unwrap();
    client
        .query(weth_request(&decoder, 3), pending())
        .await
        .unwrap();

    let (signed, mainnet_signer) = signed_rx.await.unwrap();
    assert_ne!(mainnet_signer, Some(key(100).address()));
    let digest = crypto::query_request_digest(Environment::TestNet, &signed.query_request);
    assert_eq!(
        crypto::recover_signer(&digest, &signed.signature).unwrap(),
        key(100).address()
    );
    assert_eq!(
        QueryRequest::unmarshal(&signed.query_request).unwrap().nonce,
        3
    );
}
