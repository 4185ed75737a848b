//! Connection sessions and the room registry.
//!
//! This module tracks every open connection of the server:
//! - Session lifecycle (connect, login, disconnect, timeout)
//! - Username uniqueness across the whole server
//! - Which room a logged-in player sits in
//! - Liveness bookkeeping for the ping/pong exchange
//!
//! Rooms themselves run as separate tasks; the manager only keeps their
//! handles and prunes the ones whose task has stopped.

use crate::config::{ServerConfig, StaticData, MAX_PLAYERS, MIN_PLAYERS};
use crate::room::{spawn_room, Outbound, RoomHandle};
use log::{debug, info};
use shared::error::GameError;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One open connection.
#[derive(Debug)]
pub struct Session {
    /// Connection identifier assigned by the server
    pub id: u32,
    pub addr: SocketAddr,
    /// Set once the connection has logged in
    pub username: Option<String>,
    /// Room the player joined, if any
    pub room: Option<RoomHandle>,
    /// Last time any packet arrived on this connection
    pub last_seen: Instant,
    /// Packets queued for the connection's writer task
    pub outbound: Outbound,
}

impl Session {
    pub fn new(id: u32, addr: SocketAddr, outbound: Outbound) -> Self {
        Self {
            id,
            addr,
            username: None,
            room: None,
            last_seen: Instant::now(),
            outbound,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true if nothing was received within `timeout`, including
    /// the answer to the last ping.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Registry of sessions and rooms.
///
/// Login names are unique among live sessions; a name becomes free again
/// once its session is removed.
pub struct SessionManager {
    sessions: HashMap<u32, Session>,
    rooms: BTreeMap<u32, RoomHandle>,
    next_session_id: u32,
    next_room_id: u32,
    next_nonce: u64,
    config: ServerConfig,
    data: Arc<StaticData>,
}

impl SessionManager {
    pub fn new(config: ServerConfig, data: Arc<StaticData>) -> Self {
        Self {
            sessions: HashMap::new(),
            rooms: BTreeMap::new(),
            next_session_id: 1,
            next_room_id: 1,
            next_nonce: 1,
            config,
            data,
        }
    }

    /// Registers a new connection.
    ///
    /// Returns None when the server is at its connection limit.
    pub fn add_session(&mut self, addr: SocketAddr, outbound: Outbound) -> Option<u32> {
        if self.sessions.len() >= self.config.max_connections {
            return None;
        }
        let id = self.next_session_id;
        self.next_session_id += 1;
        info!("Connection {} opened from {}", id, addr);
        self.sessions.insert(id, Session::new(id, addr, outbound));
        Some(id)
    }

    /// Drops a connection and tells its room the player is gone.
    pub fn remove_session(&mut self, id: u32) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        if let (Some(room), Some(username)) = (&session.room, &session.username) {
            room.disconnect(username);
        }
        info!(
            "Connection {} closed ({})",
            id,
            session.username.as_deref().unwrap_or("anonymous")
        );
        Some(session)
    }

    pub fn get(&self, id: u32) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn touch(&mut self, id: u32) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.touch();
        }
    }

    /// Binds `username` to the connection.
    pub fn login(&mut self, id: u32, username: &str) -> Result<String, GameError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(GameError::LoginConflict(username.to_string()));
        }
        let taken = self
            .sessions
            .values()
            .any(|session| session.id != id && session.username.as_deref() == Some(username));
        if taken {
            return Err(GameError::LoginConflict(username.to_string()));
        }
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| GameError::NetworkFailure(format!("unknown connection {}", id)))?;
        match &session.username {
            Some(current) if current != username => {
                return Err(GameError::LoginConflict(username.to_string()))
            }
            _ => {}
        }
        session.username = Some(username.to_string());
        info!("Connection {} logged in as {}", id, username);
        Ok(username.to_string())
    }

    /// The username of a logged-in connection.
    pub fn username(&self, id: u32) -> Result<String, GameError> {
        self.sessions
            .get(&id)
            .and_then(|session| session.username.clone())
            .ok_or(GameError::NotLoggedIn)
    }

    /// Rooms whose task is still running, oldest first.
    pub fn open_rooms(&mut self) -> Vec<RoomHandle> {
        self.rooms.retain(|id, room| {
            let open = !room.is_closed();
            if !open {
                debug!("Forgetting closed room {}", id);
            }
            open
        });
        self.rooms.values().cloned().collect()
    }

    /// Starts a new room for `max_players` players, clamped to the
    /// supported range. Must be called inside the runtime.
    pub fn create_room(&mut self, max_players: usize) -> RoomHandle {
        let id = self.next_room_id;
        self.next_room_id += 1;
        let max_players = max_players.clamp(MIN_PLAYERS, MAX_PLAYERS);
        let (handle, _task) = spawn_room(id, Arc::clone(&self.data), self.config.clone(), max_players);
        self.rooms.insert(id, handle.clone());
        handle
    }

    pub fn set_room(&mut self, id: u32, room: RoomHandle) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.room = Some(room);
        }
    }

    /// The room of a connection, forgetting it if the room has closed.
    pub fn room_of(&mut self, id: u32) -> Option<RoomHandle> {
        let session = self.sessions.get_mut(&id)?;
        if session.room.as_ref().map_or(false, RoomHandle::is_closed) {
            session.room = None;
        }
        session.room.clone()
    }

    /// Size of the room opened when `JoinFirstAvailableRoom` finds no lobby.
    pub fn default_max_players(&self) -> usize {
        self.config.default_max_players
    }

    /// Connections that have been silent for longer than `timeout`.
    pub fn check_timeouts(&self, timeout: Duration) -> Vec<u32> {
        self.sessions
            .values()
            .filter(|session| session.is_timed_out(timeout))
            .map(|session| session.id)
            .collect()
    }

    /// A fresh ping nonce and the outbound queues to send it on.
    pub fn ping_targets(&mut self) -> (u64, Vec<Outbound>) {
        let nonce = self.next_nonce;
        self.next_nonce += 1;
        let targets = self
            .sessions
            .values()
            .map(|session| session.outbound.clone())
            .collect();
        (nonce, targets)
    }

    /// Stops every room, aborting games still in progress.
    pub fn shutdown_rooms(&mut self) {
        for room in self.rooms.values() {
            room.shutdown();
        }
        self.rooms.clear();
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Action;
    use tokio::sync::mpsc;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn manager_with(max_connections: usize) -> SessionManager {
        let config = ServerConfig {
            max_connections,
            seed: Some(3),
            ..ServerConfig::default()
        };
        SessionManager::new(config, Arc::new(StaticData::standard()))
    }

    fn connect(manager: &mut SessionManager) -> (u32, mpsc::UnboundedReceiver<shared::Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = manager.add_session(test_addr(), tx).unwrap();
        (id, rx)
    }

    #[test]
    fn test_session_timeout() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = Session::new(1, test_addr(), tx);
        assert!(!session.is_timed_out(Duration::from_secs(1)));

        session.last_seen = Instant::now() - Duration::from_secs(2);
        assert!(session.is_timed_out(Duration::from_secs(1)));

        session.touch();
        assert!(!session.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_add_session_max_capacity() {
        let mut manager = manager_with(2);
        let (first, _a) = connect(&mut manager);
        let (second, _b) = connect(&mut manager);
        assert_ne!(first, second);

        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(manager.add_session(test_addr(), tx).is_none());
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_login_conflict() {
        let mut manager = manager_with(8);
        let (first, _a) = connect(&mut manager);
        let (second, _b) = connect(&mut manager);

        assert_eq!(manager.login(first, "lorenzo").unwrap(), "lorenzo");
        assert_eq!(
            manager.login(second, "lorenzo"),
            Err(GameError::LoginConflict("lorenzo".to_string()))
        );
        assert!(manager.login(second, "cosimo").is_ok());
        // Renaming an existing login is refused, repeating it is not.
        assert!(manager.login(first, "piero").is_err());
        assert!(manager.login(first, "lorenzo").is_ok());
    }

    #[test]
    fn test_name_freed_on_remove() {
        let mut manager = manager_with(8);
        let (first, _a) = connect(&mut manager);
        manager.login(first, "lorenzo").unwrap();
        assert!(manager.remove_session(first).is_some());
        assert!(manager.remove_session(first).is_none());

        let (second, _b) = connect(&mut manager);
        assert!(manager.login(second, "lorenzo").is_ok());
    }

    #[test]
    fn test_username_requires_login() {
        let mut manager = manager_with(8);
        let (id, _rx) = connect(&mut manager);
        assert_eq!(manager.username(id), Err(GameError::NotLoggedIn));
        assert_eq!(manager.login(id, "  "), Err(GameError::LoginConflict(String::new())));
    }

    #[test]
    fn test_check_timeouts() {
        let mut manager = manager_with(8);
        let (first, _a) = connect(&mut manager);
        let (_second, _b) = connect(&mut manager);
        if let Some(session) = manager.sessions.get_mut(&first) {
            session.last_seen = Instant::now() - Duration::from_secs(30);
        }
        assert_eq!(manager.check_timeouts(Duration::from_secs(15)), vec![first]);
    }

    #[test]
    fn test_ping_targets_use_fresh_nonces() {
        let mut manager = manager_with(8);
        let (_id, _rx) = connect(&mut manager);
        let (first, targets) = manager.ping_targets();
        let (second, _) = manager.ping_targets();
        assert_eq!(targets.len(), 1);
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_create_room_and_join() {
        let mut manager = manager_with(8);
        let (id, mut rx) = connect(&mut manager);
        manager.login(id, "lorenzo").unwrap();

        let room = manager.create_room(9);
        assert_eq!(manager.room_count(), 1);
        let outbound = manager.get(id).unwrap().outbound.clone();
        let players = room
            .join("lorenzo", 5, Action::CreateAndJoinRoom, outbound)
            .await
            .unwrap();
        assert_eq!(players, vec!["lorenzo".to_string()]);
        manager.set_room(id, room.clone());
        assert_eq!(manager.room_of(id).map(|r| r.id()), Some(room.id()));
        assert!(matches!(rx.recv().await, Some(shared::Packet::Response { id: 5, .. })));

        // Leaving empties the room, which then shuts down.
        manager.remove_session(id);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(manager.open_rooms().is_empty());
    }
}
