//! Room actor.
//!
//! Every room runs as its own tokio task that owns a [`Scheduler`]. All
//! mutations of the room's game go through the task's mailbox, so the
//! game state has a single writer and push events leave in exactly the
//! order the scheduler produced them. Connections reach the room through
//! a cloneable [`RoomHandle`]; pushes and responses travel back on each
//! member's outbound packet channel.

use crate::config::{ServerConfig, StaticData};
use crate::ledger::Ledger;
use crate::scheduler::Scheduler;
use log::{debug, error, info, warn};
use shared::error::GameError;
use shared::state::GamePhase;
use shared::{Action, Command, Packet, PushEvent, Reply};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub type Outbound = mpsc::UnboundedSender<Packet>;

/// Messages accepted by a room's mailbox.
#[derive(Debug)]
pub enum RoomMessage {
    Join {
        username: String,
        request_id: u32,
        action: Action,
        outbound: Outbound,
        reply: oneshot::Sender<Result<Vec<String>, GameError>>,
    },
    Command {
        username: String,
        request_id: u32,
        command: Command,
    },
    Disconnect {
        username: String,
    },
    TurnTimeout {
        generation: u64,
    },
    StartTimeout,
    Shutdown,
}

/// Address of a running room.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    id: u32,
    tx: mpsc::UnboundedSender<RoomMessage>,
}

impl RoomHandle {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// True once the room task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Asks the room to seat `username`. On success the room has already
    /// queued the `JoinedRoom` response on `outbound`, ahead of the
    /// `PlayerJoined` push.
    pub async fn join(
        &self,
        username: &str,
        request_id: u32,
        action: Action,
        outbound: Outbound,
    ) -> Result<Vec<String>, GameError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(RoomMessage::Join {
                username: username.to_string(),
                request_id,
                action,
                outbound,
                reply,
            })
            .map_err(|_| GameError::RoomNotJoinable)?;
        response.await.map_err(|_| GameError::RoomNotJoinable)?
    }

    pub fn command(&self, username: &str, request_id: u32, command: Command) -> Result<(), GameError> {
        self.tx
            .send(RoomMessage::Command {
                username: username.to_string(),
                request_id,
                command,
            })
            .map_err(|_| GameError::NetworkFailure(format!("room {} is closed", self.id)))
    }

    pub fn disconnect(&self, username: &str) {
        let message = RoomMessage::Disconnect {
            username: username.to_string(),
        };
        if self.tx.send(message).is_err() {
            debug!("Room {} already closed, dropping disconnect of {}", self.id, username);
        }
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(RoomMessage::Shutdown);
    }
}

/// Starts a room task and returns its handle.
pub fn spawn_room(
    id: u32,
    data: Arc<StaticData>,
    config: ServerConfig,
    max_players: usize,
) -> (RoomHandle, JoinHandle<()>) {
    let (room, handle) = Room::new(id, data, config, max_players);
    let task = tokio::spawn(room.run());
    (handle, task)
}

struct Room {
    id: u32,
    scheduler: Scheduler,
    config: ServerConfig,
    /// Connected members in seating order.
    members: Vec<(String, Outbound)>,
    tx: mpsc::UnboundedSender<RoomMessage>,
    rx: mpsc::UnboundedReceiver<RoomMessage>,
    turn_timer: Option<JoinHandle<()>>,
    armed_generation: Option<u64>,
    start_timer: Option<JoinHandle<()>>,
    closing: bool,
}

impl Room {
    fn new(id: u32, data: Arc<StaticData>, config: ServerConfig, max_players: usize) -> (Self, RoomHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(
            data,
            Ledger::new(config.negative_balance),
            max_players,
            config.seed,
        );
        let room = Room {
            id,
            scheduler,
            config,
            members: Vec::new(),
            tx: tx.clone(),
            rx,
            turn_timer: None,
            armed_generation: None,
            start_timer: None,
            closing: false,
        };
        (room, RoomHandle { id, tx })
    }

    async fn run(mut self) {
        info!("Room {} opened for {} players", self.id, self.scheduler.max_players());
        while let Some(message) = self.rx.recv().await {
            self.handle_message(message);
            if self.closing {
                break;
            }
        }
        self.cancel_timers();
        info!("Room {} closed", self.id);
    }

    fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                username,
                request_id,
                action,
                outbound,
                reply,
            } => self.handle_join(username, request_id, action, outbound, reply),
            RoomMessage::Command {
                username,
                request_id,
                command,
            } => self.handle_command(&username, request_id, command),
            RoomMessage::Disconnect { username } => self.handle_disconnect(&username),
            RoomMessage::TurnTimeout { generation } => {
                let events = self.scheduler.timeout(generation);
                self.broadcast(events);
            }
            RoomMessage::StartTimeout => {
                self.start_timer = None;
                if self.scheduler.can_start() {
                    self.start_game();
                }
            }
            RoomMessage::Shutdown => {
                if !matches!(self.scheduler.phase(), GamePhase::GameEnded | GamePhase::Aborted) {
                    let events = self.scheduler.abort("server shutting down");
                    self.broadcast(events);
                }
                self.closing = true;
            }
        }

        if matches!(self.scheduler.phase(), GamePhase::GameEnded | GamePhase::Aborted) {
            self.closing = true;
        }
        if !self.closing {
            self.sync_turn_timer();
        }
    }

    fn handle_join(
        &mut self,
        username: String,
        request_id: u32,
        action: Action,
        outbound: Outbound,
        reply: oneshot::Sender<Result<Vec<String>, GameError>>,
    ) {
        if let Err(e) = self.scheduler.add_player(&username) {
            let e = match e {
                GameError::GameNotJoinable => GameError::RoomNotJoinable,
                other => other,
            };
            let _ = reply.send(Err(e));
            return;
        }

        let players = self.scheduler.game().usernames();
        let response = Packet::Response {
            id: request_id,
            action,
            reply: Reply::JoinedRoom {
                room_id: self.id,
                players: players.clone(),
            },
        };
        if outbound.send(response).is_err() {
            debug!("{} left before the join completed", username);
        }
        self.members.push((username.clone(), outbound));
        if reply.send(Ok(players.clone())).is_err() {
            warn!("Join of {} to room {} was abandoned", username, self.id);
        }
        info!("{} joined room {} ({} players)", username, self.id, players.len());
        self.broadcast(vec![PushEvent::PlayerJoined {
            room_id: self.id,
            username,
            players,
        }]);

        if self.scheduler.is_full() {
            self.start_game();
        } else if self.scheduler.can_start() && self.start_timer.is_none() {
            let tx = self.tx.clone();
            let delay = self.config.start_delay;
            self.start_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(RoomMessage::StartTimeout);
            }));
        }
    }

    fn start_game(&mut self) {
        if let Some(timer) = self.start_timer.take() {
            timer.abort();
        }
        match self.scheduler.start_game() {
            Ok(events) => {
                info!("Room {} starting its game", self.id);
                self.broadcast(events);
            }
            Err(e) => warn!("Room {} could not start: {}", self.id, e),
        }
    }

    fn handle_command(&mut self, username: &str, request_id: u32, command: Command) {
        let action = command.action();
        match self.scheduler.handle(username, command) {
            Ok(applied) => {
                self.send_to(
                    username,
                    Packet::Response {
                        id: request_id,
                        action,
                        reply: applied.reply,
                    },
                );
                self.broadcast(applied.events);
            }
            Err(e) if e.is_fatal() => {
                error!("Room {}: {:?} from {} failed fatally: {}", self.id, action, username, e);
                let reason = e.to_string();
                self.send_to(
                    username,
                    Packet::Exception {
                        id: request_id,
                        action,
                        error: e,
                    },
                );
                let events = self.scheduler.abort(&reason);
                self.broadcast(events);
            }
            Err(e) => {
                debug!("Room {}: {:?} from {} rejected: {}", self.id, action, username, e);
                self.send_to(
                    username,
                    Packet::Exception {
                        id: request_id,
                        action,
                        error: e,
                    },
                );
            }
        }
    }

    fn handle_disconnect(&mut self, username: &str) {
        self.members.retain(|(name, _)| name != username);
        let events = self.scheduler.disconnect(username);
        self.broadcast(events);

        if self.members.is_empty() {
            info!("Room {} has no connected players left", self.id);
            self.closing = true;
        } else if !self.scheduler.can_start() {
            if let Some(timer) = self.start_timer.take() {
                timer.abort();
            }
        }
    }

    /// Keeps exactly one timer armed for the scheduler's current
    /// generation.
    fn sync_turn_timer(&mut self) {
        let generation = self.scheduler.generation();
        if self.armed_generation == Some(generation) {
            return;
        }
        if let Some(timer) = self.turn_timer.take() {
            timer.abort();
        }
        self.armed_generation = None;

        let duration = match self.scheduler.phase() {
            GamePhase::Lobby | GamePhase::GameEnded | GamePhase::Aborted => return,
            GamePhase::VaticanReport => self.config.vatican_timeout,
            _ => self.config.turn_timeout,
        };
        let tx = self.tx.clone();
        self.turn_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = tx.send(RoomMessage::TurnTimeout { generation });
        }));
        self.armed_generation = Some(generation);
    }

    fn cancel_timers(&mut self) {
        if let Some(timer) = self.turn_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.start_timer.take() {
            timer.abort();
        }
    }

    fn send_to(&self, username: &str, packet: Packet) {
        if let Some((_, outbound)) = self.members.iter().find(|(name, _)| name == username) {
            if outbound.send(packet).is_err() {
                debug!("Outbound channel of {} is closed", username);
            }
        }
    }

    fn broadcast(&self, events: Vec<PushEvent>) {
        for event in events {
            debug!("Room {} push {}", self.id, event.name());
            for (username, outbound) in &self.members {
                if outbound.send(Packet::Push(event.clone())).is_err() {
                    debug!("Outbound channel of {} is closed", username);
                }
            }
        }
    }
}
