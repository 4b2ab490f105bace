//! Connection lifecycle against a local WebSocket server.

mod common;

use std::time::Duration;

use common::{TestServer, WAIT};
use serde_json::json;
use streamhub_router::{Connection, ConnectionState, Envelope, Error};
use tokio::sync::mpsc;
use tokio::time::timeout;

#[tokio::test]
async fn test_open_send_and_receive() -> anyhow::Result<()> {
    let mut server = TestServer::start().await?;
    let connection = Connection::new(WAIT);

    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
    connection.on_message(Box::new(move |bytes| {
        let _ = frames_tx.send(bytes.to_vec());
    }));

    connection.open(server.address()).await?;
    assert_eq!(connection.state(), ConnectionState::Open);
    let mut peer = server.accept().await?;

    assert!(connection.send(&Envelope::search()));
    assert_eq!(peer.recv().await?, json!({ "command": "search" }));

    peer.send(json!({ "command": "data", "data": { "id": "s1", "value": 1 } }));
    let frame = timeout(WAIT, frames_rx.recv()).await?.expect("frame");
    let value: serde_json::Value = serde_json::from_slice(&frame)?;
    assert_eq!(value["data"]["id"], "s1");

    connection.close();
    peer.closed().await?;
    Ok(())
}

#[tokio::test]
async fn test_open_twice_is_rejected() -> anyhow::Result<()> {
    let mut server = TestServer::start().await?;
    let connection = Connection::new(WAIT);

    connection.open(server.address()).await?;
    let _peer = server.accept().await?;

    let second = connection.open(server.address()).await;
    assert!(matches!(second, Err(Error::Connection { .. })));
    assert!(connection.is_open());
    Ok(())
}

#[tokio::test]
async fn test_remote_close_reports_disconnect() -> anyhow::Result<()> {
    let mut server = TestServer::start().await?;
    let connection = Connection::new(WAIT);

    let (lost_tx, mut lost_rx) = mpsc::unbounded_channel();
    connection.on_disconnect(Box::new(move || {
        let _ = lost_tx.send(());
    }));

    connection.open(server.address()).await?;
    let peer = server.accept().await?;

    peer.close();
    timeout(WAIT, lost_rx.recv()).await?.expect("disconnect");

    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(!connection.send(&Envelope::search()));
    Ok(())
}

#[tokio::test]
async fn test_explicit_close_does_not_report_disconnect() -> anyhow::Result<()> {
    let mut server = TestServer::start().await?;
    let connection = Connection::new(WAIT);

    let (lost_tx, mut lost_rx) = mpsc::unbounded_channel::<()>();
    connection.on_disconnect(Box::new(move || {
        let _ = lost_tx.send(());
    }));

    connection.open(server.address()).await?;
    let mut peer = server.accept().await?;

    connection.close();
    connection.close();
    peer.closed().await?;

    assert!(
        timeout(Duration::from_millis(200), lost_rx.recv())
            .await
            .is_err()
    );
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn test_set_address_moves_to_new_server() -> anyhow::Result<()> {
    let mut old = TestServer::start().await?;
    let mut new = TestServer::start().await?;
    let connection = Connection::new(WAIT);

    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
    connection.on_message(Box::new(move |bytes| {
        let _ = frames_tx.send(bytes.to_vec());
    }));

    connection.open(old.address()).await?;
    let mut old_peer = old.accept().await?;

    connection.set_address(new.address()).await?;
    old_peer.closed().await?;

    let mut new_peer = new.accept().await?;
    assert!(connection.is_open());
    assert_eq!(
        connection.address().map(|u| u.to_string()),
        Some(format!("{}/", new.address()))
    );

    // Stale channel is gone; only the new server reaches the handler.
    old_peer.send(json!({ "command": "data", "data": { "id": "old" } }));
    new_peer.send(json!({ "command": "data", "data": { "id": "new" } }));

    let frame = timeout(WAIT, frames_rx.recv()).await?.expect("frame");
    let value: serde_json::Value = serde_json::from_slice(&frame)?;
    assert_eq!(value["data"]["id"], "new");

    assert!(connection.send(&Envelope::search()));
    assert_eq!(new_peer.recv().await?, json!({ "command": "search" }));
    Ok(())
}

#[tokio::test]
async fn test_set_address_validates_before_teardown() -> anyhow::Result<()> {
    let mut server = TestServer::start().await?;
    let connection = Connection::new(WAIT);

    connection.open(server.address()).await?;
    let _peer = server.accept().await?;

    let result = connection.set_address("not a url").await;
    assert!(matches!(result, Err(Error::InvalidAddress { .. })));
    assert!(connection.is_open());
    Ok(())
}
