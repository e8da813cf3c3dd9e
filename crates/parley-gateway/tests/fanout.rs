//! End-to-end flows through the broker and command handlers: persist then
//! broadcast, failure containment, and reaction fan-out. Connections are
//! driven directly through `handle_command`, no sockets involved.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;
use uuid::Uuid;

use parley_db::Database;
use parley_gateway::broker::RoomBroker;
use parley_gateway::connection::{ConnectedUser, handle_command};
use parley_types::events::{GatewayCommand, GatewayEvent};

/// One attached, joined connection with its event stream.
struct Session {
    user: ConnectedUser,
    conn_id: Uuid,
    rx: UnboundedReceiver<GatewayEvent>,
}

async fn join(broker: &RoomBroker, db: &Arc<Database>, username: &str, room: &str) -> Session {
    let user_id = Uuid::new_v4();
    db.create_user(
        &user_id.to_string(),
        username,
        &format!("{username}@example.com"),
        "argon2-hash",
        &format!("verify-{username}"),
    )
    .unwrap();

    let user = ConnectedUser {
        user_id,
        username: username.to_string(),
    };
    let (conn_id, rx) = broker.attach();
    handle_command(
        broker,
        db,
        &user,
        conn_id,
        GatewayCommand::JoinRoom {
            room: room.to_string(),
        },
    )
    .await;

    Session { user, conn_id, rx }
}

/// Events are placed on the channel synchronously by the handlers, so by
/// the time `handle_command` returns they are either there or never coming.
fn next_event(rx: &mut UnboundedReceiver<GatewayEvent>) -> GatewayEvent {
    rx.try_recv().expect("expected a pending event")
}

fn assert_no_event(rx: &mut UnboundedReceiver<GatewayEvent>) {
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

fn chat(session: &Session, room: &str, content: &str) -> GatewayCommand {
    GatewayCommand::ChatMessage {
        content: content.to_string(),
        room: room.to_string(),
        user_id: session.user.user_id,
    }
}

#[tokio::test]
async fn chat_message_is_persisted_then_fanned_out() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let broker = RoomBroker::new();
    let mut alice = join(&broker, &db, "alice", "general").await;
    let mut bob = join(&broker, &db, "bob", "general").await;

    let cmd = chat(&alice, "general", "hello room");
    handle_command(&broker, &db, &alice.user, alice.conn_id, cmd).await;

    for rx in [&mut alice.rx, &mut bob.rx] {
        let GatewayEvent::ChatMessage {
            content,
            sender,
            reactions,
            ..
        } = next_event(rx)
        else {
            panic!("expected chat-message");
        };
        assert_eq!(content, "hello room");
        assert_eq!(sender, "alice");
        assert!(reactions.is_empty());
    }

    let rows = db.recent_messages("general", 50).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].content, "hello room");
    assert_eq!(rows[0].sender_username, "alice");
}

#[tokio::test]
async fn chat_message_stays_inside_its_room() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let broker = RoomBroker::new();
    let mut alice = join(&broker, &db, "alice", "general").await;
    let mut carol = join(&broker, &db, "carol", "random").await;

    let cmd = chat(&alice, "general", "only for general");
    handle_command(&broker, &db, &alice.user, alice.conn_id, cmd).await;

    assert!(matches!(
        next_event(&mut alice.rx),
        GatewayEvent::ChatMessage { .. }
    ));
    assert_no_event(&mut carol.rx);
}

#[tokio::test]
async fn failed_store_reaches_only_the_sender() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let broker = RoomBroker::new();
    let mut alice = join(&broker, &db, "alice", "general").await;
    let mut bob = join(&broker, &db, "bob", "general").await;

    // Make every insert fail from here on
    db.with_conn_mut(|conn| {
        conn.execute_batch("DROP TABLE messages")?;
        Ok(())
    })
    .unwrap();

    let cmd = chat(&alice, "general", "this will not stick");
    handle_command(&broker, &db, &alice.user, alice.conn_id, cmd).await;

    let GatewayEvent::Error { message } = next_event(&mut alice.rx) else {
        panic!("expected error to the sender");
    };
    assert_eq!(message, "Failed to send message");
    assert_no_event(&mut bob.rx);
}

#[tokio::test]
async fn empty_content_never_reaches_the_store() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let broker = RoomBroker::new();
    let mut alice = join(&broker, &db, "alice", "general").await;
    let mut bob = join(&broker, &db, "bob", "general").await;

    let cmd = chat(&alice, "general", "   ");
    handle_command(&broker, &db, &alice.user, alice.conn_id, cmd).await;

    let GatewayEvent::Error { message } = next_event(&mut alice.rx) else {
        panic!("expected error to the sender");
    };
    assert_eq!(message, "Message cannot be empty");
    assert_no_event(&mut bob.rx);
    assert!(db.recent_messages("general", 50).unwrap().is_empty());
}

#[tokio::test]
async fn spoofed_sender_identity_is_ignored() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let broker = RoomBroker::new();
    let mut alice = join(&broker, &db, "alice", "general").await;
    let mut bob = join(&broker, &db, "bob", "general").await;

    // Alice's connection claims to be bob; the stored and broadcast sender
    // must stay alice.
    let cmd = GatewayCommand::ChatMessage {
        content: "impostor".to_string(),
        room: "general".to_string(),
        user_id: bob.user.user_id,
    };
    handle_command(&broker, &db, &alice.user, alice.conn_id, cmd).await;

    for rx in [&mut alice.rx, &mut bob.rx] {
        let GatewayEvent::ChatMessage { sender, .. } = next_event(rx) else {
            panic!("expected chat-message");
        };
        assert_eq!(sender, "alice");
    }

    let rows = db.recent_messages("general", 50).unwrap();
    assert_eq!(rows[0].sender_username, "alice");
}

#[tokio::test]
async fn reaction_toggle_broadcasts_full_state() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let broker = RoomBroker::new();
    let mut alice = join(&broker, &db, "alice", "general").await;
    let mut bob = join(&broker, &db, "bob", "general").await;

    let message_id = Uuid::new_v4();
    db.insert_message(
        &message_id.to_string(),
        "general",
        &alice.user.user_id.to_string(),
        "hello",
        "2026-01-01T12:00:00.000000Z",
    )
    .unwrap();

    let react = GatewayCommand::MessageReaction {
        message_id,
        emoji: "👍".to_string(),
        user_id: bob.user.user_id,
        room: "general".to_string(),
    };
    handle_command(&broker, &db, &bob.user, bob.conn_id, react.clone()).await;

    // Sender included: everyone gets the authoritative full state
    for rx in [&mut alice.rx, &mut bob.rx] {
        let GatewayEvent::ReactionUpdated {
            message_id: id,
            reactions,
        } = next_event(rx)
        else {
            panic!("expected reaction-updated");
        };
        assert_eq!(id, message_id);
        assert!(reactions.users_for("👍").unwrap().contains("bob"));
    }

    // Toggling again removes bob and prunes the emoji key
    handle_command(&broker, &db, &bob.user, bob.conn_id, react).await;
    for rx in [&mut alice.rx, &mut bob.rx] {
        let GatewayEvent::ReactionUpdated { reactions, .. } = next_event(rx) else {
            panic!("expected reaction-updated");
        };
        assert!(reactions.is_empty());
    }
}

#[tokio::test]
async fn reaction_on_unknown_message_reports_back() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let broker = RoomBroker::new();
    let mut alice = join(&broker, &db, "alice", "general").await;
    let mut bob = join(&broker, &db, "bob", "general").await;

    let cmd = GatewayCommand::MessageReaction {
        message_id: Uuid::new_v4(),
        emoji: "👍".to_string(),
        user_id: alice.user.user_id,
        room: "general".to_string(),
    };
    handle_command(&broker, &db, &alice.user, alice.conn_id, cmd).await;

    let GatewayEvent::Error { message } = next_event(&mut alice.rx) else {
        panic!("expected error to the sender");
    };
    assert_eq!(message, "Message not found");
    assert_no_event(&mut bob.rx);
}

#[tokio::test]
async fn typing_is_relayed_to_everyone_else() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let broker = RoomBroker::new();
    let mut alice = join(&broker, &db, "alice", "general").await;
    let mut bob = join(&broker, &db, "bob", "general").await;

    let cmd = GatewayCommand::Typing {
        room: "general".to_string(),
        username: "alice".to_string(),
    };
    handle_command(&broker, &db, &alice.user, alice.conn_id, cmd).await;

    let GatewayEvent::Typing { username } = next_event(&mut bob.rx) else {
        panic!("expected typing");
    };
    assert_eq!(username, "alice");
    assert_no_event(&mut alice.rx);
}
