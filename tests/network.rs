//! Lookups and storage across a [Testnet] of nodes.

use std::time::Duration;

use kadtrie::{Bytes, Id, Testnet, MAX_BUCKET_SIZE_K};

#[test]
fn find_node_converges() {
    let testnet = Testnet::new(30).unwrap();

    let ids: Vec<Id> = testnet
        .nodes
        .iter()
        .map(|node| *node.info().unwrap().id())
        .collect();

    let origin = ids[5];
    let target = Id::random();

    let found = testnet.nodes[5].find_node(target).unwrap();
    assert!(!found.is_empty());
    assert!(found.len() <= MAX_BUCKET_SIZE_K);

    let mut distances: Vec<Id> = ids
        .iter()
        .filter(|id| **id != origin)
        .map(|id| id.distance(&target))
        .collect();
    distances.sort();

    let kth_closest = distances[MAX_BUCKET_SIZE_K - 1];

    for node in &found {
        assert!(node.id().distance(&target) <= kth_closest);
    }

    assert_eq!(found[0].id().distance(&target), distances[0]);
}

#[test]
fn put_get_across_network() {
    let testnet = Testnet::new(10).unwrap();

    let key = Id::random();
    let value = Bytes::from_static(b"across the network");

    let stored_at = testnet.nodes[1].put(key, value.clone()).unwrap();
    assert!(stored_at > 0);

    for node in &testnet.nodes {
        assert_eq!(node.get(key).unwrap(), Some(value.clone()));
    }
}

#[test]
fn get_survives_node_shutdown() {
    let testnet = Testnet::new(10).unwrap();

    let key = Id::random();
    let value = Bytes::from_static(b"still there");

    testnet.nodes[2].put(key, value.clone()).unwrap();

    for node in &testnet.nodes[3..6] {
        node.shutdown();
    }

    let client = testnet
        .builder()
        .request_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    assert!(client.bootstrap(&testnet.bootstrap[0]).unwrap());

    assert_eq!(client.get(key).unwrap(), Some(value));
}

#[test]
fn missing_key() {
    let testnet = Testnet::new(5).unwrap();

    assert_eq!(testnet.nodes[4].get(Id::random()).unwrap(), None);
}
