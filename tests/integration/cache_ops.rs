use vncache_client::{Client, MinimumBuffers};

use crate::spawn_node;

async fn connected_client(node: &crate::TestNode) -> Client {
    let identity = node.client_identity();
    let negotiated = vncache_client::connect(
        &node.base_url,
        &node.connect_path,
        &identity,
        None,
        None,
        &MinimumBuffers::default(),
    )
    .await
    .unwrap();
    Client::new(negotiated.socket, negotiated.max_message_size)
}

#[tokio::test]
async fn round_trip_get_set_delete() {
    let node = spawn_node().await;
    let client = connected_client(&node).await;

    assert_eq!(client.get("object01").await.unwrap(), None);

    client.add_or_update("object01", b"hello world").await.unwrap();
    assert_eq!(client.get("object01").await.unwrap().unwrap(), b"hello world");

    client.add_or_update("object01", b"updated payload, longer than before").await.unwrap();
    assert_eq!(
        client.get("object01").await.unwrap().unwrap(),
        b"updated payload, longer than before"
    );

    assert!(client.delete("object01").await.unwrap());
    assert_eq!(client.get("object01").await.unwrap(), None);
    assert!(!client.delete("object01").await.unwrap());
}

#[tokio::test]
async fn rename_moves_payload_to_new_key() {
    let node = spawn_node().await;
    let client = connected_client(&node).await;

    client.add_or_update("source01", b"payload").await.unwrap();
    client.rename_or_create("source01", "renamed1", b"").await.unwrap();

    assert_eq!(client.get("source01").await.unwrap(), None);
    assert_eq!(client.get("renamed1").await.unwrap().unwrap(), b"payload");
}

#[tokio::test]
async fn rename_with_data_also_replaces_payload() {
    let node = spawn_node().await;
    let client = connected_client(&node).await;

    client.add_or_update("source02", b"original").await.unwrap();
    client.rename_or_create("source02", "renamed2", b"replaced").await.unwrap();

    assert_eq!(client.get("renamed2").await.unwrap().unwrap(), b"replaced");
}

#[tokio::test]
async fn rename_of_missing_key_creates_it_fresh() {
    let node = spawn_node().await;
    let client = connected_client(&node).await;

    client.rename_or_create("missing1", "created1", b"fresh data").await.unwrap();
    assert_eq!(client.get("created1").await.unwrap().unwrap(), b"fresh data");
}

#[tokio::test]
async fn concurrent_requests_on_one_connection_resolve_independently() {
    let node = spawn_node().await;
    let client = std::sync::Arc::new(connected_client(&node).await);

    client.add_or_update("parallel1", b"a").await.unwrap();
    client.add_or_update("parallel2", b"b").await.unwrap();

    let c1 = client.clone();
    let c2 = client.clone();
    let (r1, r2) = tokio::join!(
        async move { c1.get("parallel1").await.unwrap() },
        async move { c2.get("parallel2").await.unwrap() },
    );

    assert_eq!(r1.unwrap(), b"a");
    assert_eq!(r2.unwrap(), b"b");
}
