//! Integration tests for the game server
//!
//! These tests run a real server on an ephemeral port and drive it over TCP
//! with the client library or raw frames.

use bincode::{deserialize, serialize};
use client::game::ClientGameState;
use client::network::Connection;
use server::config::{ServerConfig, StaticData};
use server::network::Server;
use shared::codec::{decode_body, encode_frame, frame_len, HEADER_LEN};
use shared::error::{ActionNotAllowed, GameError};
use shared::state::GamePhase;
use shared::{Command, Packet, PushEvent, Reply};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn start_server(config: ServerConfig) -> SocketAddr {
    let server = Server::new("127.0.0.1:0", config, Arc::new(StaticData::standard()))
        .await
        .unwrap();
    let addr = server.local_addr();
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            eprintln!("server stopped: {}", e);
        }
    });
    addr
}

fn test_config() -> ServerConfig {
    ServerConfig {
        start_delay: Duration::from_secs(60),
        seed: Some(5),
        ..ServerConfig::default()
    }
}

async fn connect(addr: SocketAddr) -> Connection {
    Connection::connect(&addr.to_string()).await.unwrap()
}

/// Waits for the first push matching `pred`, skipping the others.
async fn wait_for<F>(connection: &mut Connection, mut pred: F) -> PushEvent
where
    F: FnMut(&PushEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            let event = connection.next_push().await.expect("connection closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for push")
}

async fn read_raw(stream: &mut TcpStream) -> Option<Packet> {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).await.ok()?;
    let mut body = vec![0u8; frame_len(header).ok()?];
    stream.read_exact(&mut body).await.ok()?;
    decode_body(&body).ok()
}

/// WIRE FORMAT TESTS
mod protocol_tests {
    use super::*;
    use server::ledger::Ledger;
    use server::scheduler::Scheduler;

    /// A started game survives the wire unchanged
    #[test]
    fn game_snapshot_roundtrip() {
        let mut scheduler = Scheduler::new(Arc::new(StaticData::standard()), Ledger::default(), 2, Some(1));
        scheduler.add_player("lorenzo").unwrap();
        scheduler.add_player("cosimo").unwrap();
        let events = scheduler.start_game().unwrap();

        let game = scheduler.game().clone();
        let bytes = serialize(&game).unwrap();
        let decoded: shared::state::Game = deserialize(&bytes).unwrap();
        assert_eq!(decoded, game);

        for event in events {
            let frame = encode_frame(&Packet::Push(event.clone())).unwrap();
            assert_eq!(decode_body(&frame[HEADER_LEN..]).unwrap(), Packet::Push(event));
        }
    }

    /// A client fed every push ends the game with the server's wallets
    #[test]
    fn client_mirror_tracks_final_scoring() {
        let mut data = StaticData::standard();
        data.rules.periods = 1;
        data.rules.rounds_per_period = 1;
        let mut scheduler = Scheduler::new(Arc::new(data), Ledger::default(), 2, Some(3));
        scheduler.add_player("lorenzo").unwrap();
        scheduler.add_player("cosimo").unwrap();

        let mut mirror = ClientGameState::new("lorenzo");
        let mut events = scheduler.start_game().unwrap();
        while scheduler.phase() == GamePhase::ChoosingBonusTiles {
            let chooser = scheduler.tile_chooser().unwrap().to_string();
            let tile_id = scheduler.available_tiles()[0].id;
            let applied = scheduler
                .handle(&chooser, Command::ChoosePersonalBonusTile { tile_id })
                .unwrap();
            events.extend(applied.events);
        }
        while scheduler.phase() == GamePhase::ChoosingLeaders {
            for name in scheduler.game().usernames() {
                let card_id = scheduler.draft_hand(&name).unwrap()[0].id;
                let applied = scheduler.handle(&name, Command::ChooseLeaderCard { card_id }).unwrap();
                events.extend(applied.events);
            }
        }
        while scheduler.phase() == GamePhase::RoundInProgress {
            let name = scheduler.game().current_player().unwrap().username.clone();
            events.extend(scheduler.handle(&name, Command::EndTurn).unwrap().events);
        }
        for event in &events {
            mirror.apply(event);
        }

        assert_eq!(scheduler.phase(), GamePhase::GameEnded);
        assert!(mirror.ranking.is_some());
        let local = mirror.game.as_ref().unwrap();
        for player in &scheduler.game().players {
            assert_eq!(local.player(&player.username).unwrap().resources, player.resources);
        }
    }
}

/// END-TO-END TESTS OVER TCP
mod server_tests {
    use super::*;

    #[tokio::test]
    async fn login_conflict() {
        let addr = start_server(test_config()).await;
        let first = connect(addr).await;
        let second = connect(addr).await;

        assert_eq!(
            first.login("lorenzo").await,
            Ok(Reply::LoggedIn {
                username: "lorenzo".to_string()
            })
        );
        assert_eq!(
            second.login("lorenzo").await,
            Err(GameError::LoginConflict("lorenzo".to_string()))
        );
        assert!(second.login("cosimo").await.is_ok());
    }

    #[tokio::test]
    async fn commands_require_login() {
        let addr = start_server(test_config()).await;
        let connection = connect(addr).await;

        assert_eq!(connection.join_first_available_room().await, Err(GameError::NotLoggedIn));
        assert_eq!(connection.request(Command::EndTurn).await, Err(GameError::NotLoggedIn));

        connection.login("piero").await.unwrap();
        assert_eq!(
            connection.request(Command::EndTurn).await,
            Err(GameError::ActionNotAllowed(ActionNotAllowed::WrongPhase))
        );
    }

    #[tokio::test]
    async fn create_join_and_start() {
        let addr = start_server(test_config()).await;
        let mut alice = connect(addr).await;
        let mut bob = connect(addr).await;
        alice.login("alice").await.unwrap();
        bob.login("bob").await.unwrap();

        let room_id = match alice.create_and_join_room(2).await.unwrap() {
            Reply::JoinedRoom { room_id, players } => {
                assert_eq!(players, vec!["alice".to_string()]);
                room_id
            }
            other => panic!("unexpected reply {:?}", other),
        };
        match bob.join_first_available_room().await.unwrap() {
            Reply::JoinedRoom { room_id: joined, players } => {
                assert_eq!(joined, room_id);
                assert_eq!(players.len(), 2);
            }
            other => panic!("unexpected reply {:?}", other),
        }

        // The room was full, so the game starts right away for both.
        let mut states = Vec::new();
        for (connection, name) in [(&mut alice, "alice"), (&mut bob, "bob")] {
            let mut state = ClientGameState::new(name);
            loop {
                let event = wait_for(connection, |_| true).await;
                state.apply(&event);
                if matches!(event, PushEvent::PersonalBonusTileChoice { .. }) {
                    break;
                }
            }
            states.push(state);
        }
        for state in &states {
            assert_eq!(state.room_id, Some(room_id));
            assert_eq!(state.phase(), GamePhase::ChoosingBonusTiles);
            assert_eq!(state.game.as_ref().unwrap().players.len(), 2);
        }

        // A third player finds no open room and gets a fresh one.
        let carol = connect(addr).await;
        carol.login("carol").await.unwrap();
        match carol.join_first_available_room().await.unwrap() {
            Reply::JoinedRoom { room_id: opened, players } => {
                assert_ne!(opened, room_id);
                assert_eq!(players, vec!["carol".to_string()]);
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn join_opens_room_of_default_size() {
        let config = ServerConfig {
            default_max_players: 2,
            ..test_config()
        };
        let addr = start_server(config).await;
        let mut alice = connect(addr).await;
        let bob = connect(addr).await;
        alice.login("alice").await.unwrap();
        bob.login("bob").await.unwrap();

        let room_id = match alice.join_first_available_room().await.unwrap() {
            Reply::JoinedRoom { room_id, players } => {
                assert_eq!(players, vec!["alice".to_string()]);
                room_id
            }
            other => panic!("unexpected reply {:?}", other),
        };
        match bob.join_first_available_room().await.unwrap() {
            Reply::JoinedRoom { room_id: joined, players } => {
                assert_eq!(joined, room_id);
                assert_eq!(players.len(), 2);
            }
            other => panic!("unexpected reply {:?}", other),
        }

        // Two players fill a default-sized room, so it starts without the delay.
        let event = wait_for(&mut alice, |e| matches!(e, PushEvent::GameStarted { .. })).await;
        match event {
            PushEvent::GameStarted { game } => assert_eq!(game.players.len(), 2),
            other => panic!("unexpected push {:?}", other),
        }
    }

    #[tokio::test]
    async fn disconnect_is_broadcast() {
        let addr = start_server(test_config()).await;
        let mut alice = connect(addr).await;
        let bob = connect(addr).await;
        alice.login("alice").await.unwrap();
        bob.login("bob").await.unwrap();
        alice.create_and_join_room(2).await.unwrap();
        bob.join_first_available_room().await.unwrap();
        wait_for(&mut alice, |e| matches!(e, PushEvent::GameStarted { .. })).await;

        drop(bob);
        let event = wait_for(&mut alice, |e| matches!(e, PushEvent::PlayerDisconnected { .. })).await;
        assert_eq!(
            event,
            PushEvent::PlayerDisconnected {
                username: "bob".to_string()
            }
        );
    }

    #[tokio::test]
    async fn malformed_frame_closes_connection() {
        let addr = start_server(test_config()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut frame = 3u32.to_be_bytes().to_vec();
        frame.extend_from_slice(&[0xff, 0xff, 0xff]);
        stream.write_all(&frame).await.unwrap();

        let mut buf = [0u8; 16];
        let read = timeout(WAIT, stream.read(&mut buf)).await.expect("connection left open");
        assert!(matches!(read, Ok(0) | Err(_)));

        // The server keeps serving other connections.
        let connection = connect(addr).await;
        assert!(connection.login("lorenzo").await.is_ok());
    }

    #[tokio::test]
    async fn server_pings_connections() {
        let config = ServerConfig {
            ping_interval: Duration::from_millis(50),
            ..test_config()
        };
        let addr = start_server(config).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let packet = timeout(WAIT, read_raw(&mut stream)).await.unwrap();
        let nonce = match packet {
            Some(Packet::Push(PushEvent::Ping { nonce })) => nonce,
            other => panic!("expected ping, got {:?}", other),
        };
        let pong = Packet::Request {
            id: 0,
            command: Command::Pong { nonce },
        };
        stream.write_all(&encode_frame(&pong).unwrap()).await.unwrap();

        // Pongs get no answer; the next packet is the following ping.
        let packet = timeout(WAIT, read_raw(&mut stream)).await.unwrap();
        assert!(matches!(packet, Some(Packet::Push(PushEvent::Ping { nonce: next })) if next > nonce));
    }
}
