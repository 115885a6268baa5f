use vncache_client::{ChangeEventNotice, Client, MinimumBuffers};

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
async fn dequeue_reports_add_update_and_delete() {
    let node = spawn_node().await;
    let writer = connected_client(&node).await;
    let listener = connected_client(&node).await;

    let dequeue_task = tokio::spawn(async move {
        let first = listener.dequeue().await.unwrap();
        let second = listener.dequeue().await.unwrap();
        let third = listener.dequeue().await.unwrap();
        (first, second, third)
    });

    // give the listener's subscription time to register before publishing.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    writer.add_or_update("evt0001", b"data").await.unwrap();
    writer.add_or_update("evt0001", b"more data").await.unwrap();
    writer.delete("evt0001").await.unwrap();

    let (first, second, third) = dequeue_task.await.unwrap();

    match first {
        ChangeEventNotice::Modified { id, previous_id: None } => assert_eq!(id, "evt0001"),
        other => panic!("expected an add event first, got {other:?}"),
    }
    match second {
        ChangeEventNotice::Modified { id, previous_id: None } => assert_eq!(id, "evt0001"),
        other => panic!("expected an update event second, got {other:?}"),
    }
    match third {
        ChangeEventNotice::Deleted { id } => assert_eq!(id, "evt0001"),
        other => panic!("expected a delete event third, got {other:?}"),
    }
}

#[tokio::test]
async fn rename_is_reported_with_previous_key() {
    let node = spawn_node().await;
    let writer = connected_client(&node).await;

    // create the object and let its add event drain before the listener
    // subscribes, so the listener's one dequeue is unambiguously the rename.
    writer.add_or_update("before1", b"x").await.unwrap();

    let listener = connected_client(&node).await;
    let dequeue_task = tokio::spawn(async move { listener.dequeue().await.unwrap() });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    writer.rename_or_create("before1", "after1", b"").await.unwrap();

    match dequeue_task.await.unwrap() {
        ChangeEventNotice::Modified { id, previous_id: Some(from) } => {
            assert_eq!(id, "after1");
            assert_eq!(from, "before1");
        }
        other => panic!("expected a rename event, got {other:?}"),
    }
}
