//! End-to-end replication tests over real sockets.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use dawlink_collab::{
    ClientConfig, ClientEvent, ClientSession, EditorKind, EditorTag, HostConfig, HostSession,
    LocalSession, MessageKind, NetworkError, SessionError, WireMessage,
};
use dawlink_core::{export_native, Project, VersionHistory};

fn fake_editor(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join("fake-editor.sh");
    std::fs::write(&path, "#!/bin/sh\nsleep 60\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn tag() -> EditorTag {
    EditorTag::new(EditorKind::Harmonia, "2.3")
}

fn named(name: &str) -> Project {
    Project {
        name: name.to_string(),
        ..Project::default()
    }
}

async fn start_host(editor: &Path) -> HostSession {
    let local = LocalSession::open(tag(), editor, None).unwrap();
    let config = HostConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        ..HostConfig::default()
    };
    HostSession::open(local, config).await.unwrap()
}

async fn join(host: &HostSession, editor: &Path) -> ClientSession {
    ClientSession::connect(
        tag(),
        editor,
        &host.local_addr().to_string(),
        ClientConfig::default(),
    )
    .await
    .unwrap()
}

async fn wait_until(mut pred: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if pred() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_join_receives_full_history() {
    let dir = tempfile::tempdir().unwrap();
    let editor = fake_editor(dir.path());
    let host = start_host(&editor).await;

    export_native(&host.local().working_file_path(), &named("one")).unwrap();
    host.commit("one").unwrap();
    export_native(&host.local().working_file_path(), &named("two")).unwrap();
    host.commit("two").unwrap();
    host.undo().unwrap();

    let client = join(&host, &editor).await;
    assert_eq!(client.commits().len(), 2);
    assert_eq!(client.applied_count(), 1);
    assert_eq!(client.commits()[0].state.name, "one");
    assert_eq!(client.commits()[1].sequence, 2);

    client.close().await.unwrap();
    host.close().await.unwrap();
}

#[tokio::test]
async fn test_shareable_token_connects() {
    let dir = tempfile::tempdir().unwrap();
    let editor = fake_editor(dir.path());
    let host = start_host(&editor).await;

    let token = host.shareable_token().unwrap();
    let client = ClientSession::connect(tag(), &editor, &token, ClientConfig::default())
        .await
        .unwrap();
    assert!(client.is_connected());
    assert_eq!(host.peer_count(), 1);
    assert!(format!("{client:?}").contains("ClientSession"));
    assert!(format!("{host:?}").contains("HostSession"));

    client.close().await.unwrap();
    host.close().await.unwrap();
}

#[tokio::test]
async fn test_client_proposal_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let editor = fake_editor(dir.path());
    let host = start_host(&editor).await;

    let mut proposer = join(&host, &editor).await;
    let observer = join(&host, &editor).await;
    let mut events = proposer.take_event_rx().unwrap();

    export_native(&proposer.local().working_file_path(), &named("take 1")).unwrap();
    proposer.commit("first take").unwrap();
    // the proposal is not applied locally until the broadcast returns
    assert!(wait_until(|| proposer.applied_count() == 1).await);
    assert!(wait_until(|| observer.applied_count() == 1).await);
    assert_eq!(host.local().applied_count(), 1);

    // identical record everywhere, host-assigned sequence
    for commits in [host.local().commits(), proposer.commits(), observer.commits()] {
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].sequence, 1);
        assert_eq!(commits[0].message, "first take");
        assert_eq!(commits[0].state.name, "take 1");
    }

    match events.recv().await.unwrap() {
        ClientEvent::CommitApplied { sequence, message } => {
            assert_eq!(sequence, 1);
            assert_eq!(message, "first take");
        }
        other => panic!("unexpected event {other:?}"),
    }

    proposer.close().await.unwrap();
    observer.close().await.unwrap();
    host.close().await.unwrap();
}

#[tokio::test]
async fn test_host_orders_interleaved_commits_gaplessly() {
    let dir = tempfile::tempdir().unwrap();
    let editor = fake_editor(dir.path());
    let host = start_host(&editor).await;

    let client_a = join(&host, &editor).await;
    let client_b = join(&host, &editor).await;

    // interleave proposals from both clients and a host-local commit
    export_native(&client_a.local().working_file_path(), &named("a1")).unwrap();
    client_a.commit("a1").unwrap();
    export_native(&client_b.local().working_file_path(), &named("b1")).unwrap();
    client_b.commit("b1").unwrap();
    assert!(wait_until(|| host.local().applied_count() == 2).await);

    export_native(&host.local().working_file_path(), &named("h1")).unwrap();
    host.commit("h1").unwrap();
    export_native(&client_a.local().working_file_path(), &named("a2")).unwrap();
    client_a.commit("a2").unwrap();

    assert!(wait_until(|| client_a.applied_count() == 4).await);
    assert!(wait_until(|| client_b.applied_count() == 4).await);

    // every replica holds the same gapless sequence 1..=4
    let reference: Vec<(u64, String)> = host
        .local()
        .commits()
        .iter()
        .map(|c| (c.sequence, c.message.clone()))
        .collect();
    assert_eq!(
        reference.iter().map(|(s, _)| *s).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
    for commits in [client_a.commits(), client_b.commits()] {
        let got: Vec<(u64, String)> = commits
            .iter()
            .map(|c| (c.sequence, c.message.clone()))
            .collect();
        assert_eq!(got, reference);
    }

    client_a.close().await.unwrap();
    client_b.close().await.unwrap();
    host.close().await.unwrap();
}

#[tokio::test]
async fn test_undo_redo_mirrored_to_clients() {
    let dir = tempfile::tempdir().unwrap();
    let editor = fake_editor(dir.path());
    let host = start_host(&editor).await;

    export_native(&host.local().working_file_path(), &named("one")).unwrap();
    host.commit("one").unwrap();
    export_native(&host.local().working_file_path(), &named("two")).unwrap();
    host.commit("two").unwrap();

    let client = join(&host, &editor).await;
    assert_eq!(client.applied_count(), 2);

    host.undo().unwrap();
    assert!(wait_until(|| client.applied_count() == 1).await);

    host.redo().unwrap();
    assert!(wait_until(|| client.applied_count() == 2).await);

    // the cursor belongs to the host
    assert!(matches!(client.undo(), Err(SessionError::HostOnly)));
    assert!(matches!(client.redo(), Err(SessionError::HostOnly)));

    client.close().await.unwrap();
    host.close().await.unwrap();
}

#[tokio::test]
async fn test_incompatible_editor_refused() {
    let dir = tempfile::tempdir().unwrap();
    let editor = fake_editor(dir.path());
    let host = start_host(&editor).await;

    let err = ClientSession::connect(
        EditorTag::new(EditorKind::Harmonia, "3.0"),
        &editor,
        &host.local_addr().to_string(),
        ClientConfig {
            join_timeout: Duration::from_millis(500),
            ..ClientConfig::default()
        },
    )
    .await
    .unwrap_err();
    // the host closes without a snapshot, so the join times out
    assert!(matches!(
        err,
        SessionError::Network(NetworkError::JoinTimeout)
            | SessionError::Network(NetworkError::Disconnected)
    ));
    assert_eq!(host.peer_count(), 0);

    host.close().await.unwrap();
}

#[tokio::test]
async fn test_host_close_disconnects_clients() {
    let dir = tempfile::tempdir().unwrap();
    let editor = fake_editor(dir.path());
    let host = start_host(&editor).await;

    let client = join(&host, &editor).await;
    host.close().await.unwrap();

    assert!(wait_until(|| !client.is_connected()).await);
    assert!(matches!(
        client.commit("too late"),
        Err(SessionError::Network(NetworkError::Disconnected))
    ));

    client.close().await.unwrap();
}

async fn await_join(
    rx: &mut futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    >,
) {
    while let Some(Ok(msg)) = rx.next().await {
        if let Message::Binary(data) = msg {
            let bytes: Vec<u8> = data.into();
            if let Ok(frame) = WireMessage::decode(&bytes) {
                if frame.kind == MessageKind::Join {
                    return;
                }
            }
        }
    }
    panic!("connection closed before a join arrived");
}

#[tokio::test]
async fn test_gapped_broadcast_triggers_resync() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // a bare host speaking the wire protocol, skipping a sequence index
    // on purpose
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut tx, mut rx) = ws.split();

        await_join(&mut rx).await;
        let mut history = VersionHistory::new();
        history.commit("one", named("one"));
        let snap = WireMessage::join_snapshot(&history).unwrap().encode().unwrap();
        tx.send(Message::Binary(snap.into())).await.unwrap();

        // the client expects #2 next; send #3
        let gapped = WireMessage::commit_broadcast(3, "three", &named("three"))
            .unwrap()
            .encode()
            .unwrap();
        tx.send(Message::Binary(gapped.into())).await.unwrap();

        // the gap makes the client re-join; answer with the full history
        await_join(&mut rx).await;
        history.commit("two", named("two"));
        history.commit("three", named("three"));
        let snap = WireMessage::join_snapshot(&history).unwrap().encode().unwrap();
        tx.send(Message::Binary(snap.into())).await.unwrap();

        while rx.next().await.is_some() {}
    });

    let dir = tempfile::tempdir().unwrap();
    let editor = fake_editor(dir.path());
    let mut client =
        ClientSession::connect(tag(), &editor, &addr.to_string(), ClientConfig::default())
            .await
            .unwrap();
    let mut events = client.take_event_rx().unwrap();
    assert_eq!(client.applied_count(), 1);

    // the gapped broadcast is never applied; the history arrives rebuilt
    match events.recv().await.unwrap() {
        ClientEvent::Resynced => {}
        other => panic!("expected a resync, got {other:?}"),
    }
    assert!(wait_until(|| client.applied_count() == 3).await);
    let sequences: Vec<u64> = client.commits().iter().map(|c| c.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert_eq!(client.commits()[2].state.name, "three");

    client.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_close_joins_connection_handlers() {
    let dir = tempfile::tempdir().unwrap();
    let editor = fake_editor(dir.path());
    let host = start_host(&editor).await;

    let client = join(&host, &editor).await;
    assert_eq!(host.peer_count(), 1);

    host.close().await.unwrap();
    // handlers have exited by the time close returns, so the registry
    // is already drained
    assert_eq!(host.peer_count(), 0);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_client_disconnect_drops_peer_not_history() {
    let dir = tempfile::tempdir().unwrap();
    let editor = fake_editor(dir.path());
    let host = start_host(&editor).await;

    let client = join(&host, &editor).await;
    export_native(&client.local().working_file_path(), &named("kept")).unwrap();
    client.commit("kept").unwrap();
    assert!(wait_until(|| host.local().applied_count() == 1).await);

    client.close().await.unwrap();
    assert!(wait_until(|| host.peer_count() == 0).await);

    // the peer is gone, its commits are not
    assert_eq!(host.local().applied_count(), 1);
    assert_eq!(host.local().commits()[0].message, "kept");

    host.close().await.unwrap();
}
