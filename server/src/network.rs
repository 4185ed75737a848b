//! Server network layer: TCP connections, request routing and liveness.
//!
//! Each accepted connection gets a reader task that decodes frames into
//! [`ServerMessage`]s for the main loop and a writer task that drains the
//! connection's outbound packet queue. Game commands are forwarded to the
//! room the player sits in; everything before that (login, room choice)
//! is answered by the main loop itself.

use crate::config::{ServerConfig, StaticData};
use crate::session_manager::SessionManager;
use log::{debug, error, info, warn};
use shared::codec::{decode_body, encode_frame, frame_len, CodecError, HEADER_LEN};
use shared::error::{ActionNotAllowed, GameError};
use shared::{Action, Command, Packet, PushEvent, Reply};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Messages sent from connection tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { session_id: u32, packet: Packet },
    ConnectionClosed { session_id: u32 },
    ClientTimeout { session_id: u32 },
    Shutdown,
}

/// Errors reading a frame off a stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("connection closed")]
    Closed,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Reads one length-prefixed packet.
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Packet, FrameError> {
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(FrameError::Closed),
        Err(e) => return Err(e.into()),
    }
    let len = frame_len(header)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(decode_body(&body)?)
}

pub async fn write_packet<W: AsyncWrite + Unpin>(
    writer: &mut W,
    packet: &Packet,
) -> Result<(), FrameError> {
    let frame = encode_frame(packet)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Main server coordinating connections and rooms
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    sessions: Arc<RwLock<SessionManager>>,
    config: ServerConfig,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        config: ServerConfig,
        data: Arc<StaticData>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener: Some(listener),
            local_addr,
            sessions: Arc::new(RwLock::new(SessionManager::new(config.clone(), data))),
            config,
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sender that can stop the main loop with [`ServerMessage::Shutdown`].
    pub fn control(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns the task accepting new connections
    fn spawn_acceptor(&mut self) {
        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => return,
        };
        let sessions = Arc::clone(&self.sessions);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        Self::register_connection(stream, addr, &sessions, &server_tx).await;
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    async fn register_connection(
        stream: TcpStream,
        addr: SocketAddr,
        sessions: &Arc<RwLock<SessionManager>>,
        server_tx: &mpsc::UnboundedSender<ServerMessage>,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle for {}: {}", addr, e);
        }
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let session_id = {
            let mut sessions = sessions.write().await;
            sessions.add_session(addr, outbound_tx)
        };
        let session_id = match session_id {
            Some(id) => id,
            None => {
                warn!("Refusing connection from {}: server full", addr);
                return;
            }
        };

        let (reader, writer) = stream.into_split();
        tokio::spawn(Self::write_frames(writer, outbound_rx, session_id));
        tokio::spawn(Self::read_frames(reader, session_id, server_tx.clone()));
    }

    async fn read_frames(
        mut reader: OwnedReadHalf,
        session_id: u32,
        server_tx: mpsc::UnboundedSender<ServerMessage>,
    ) {
        loop {
            match read_packet(&mut reader).await {
                Ok(packet) => {
                    if let Err(e) = server_tx.send(ServerMessage::PacketReceived { session_id, packet }) {
                        error!("Failed to send packet to main loop: {}", e);
                        return;
                    }
                }
                Err(FrameError::Closed) => break,
                Err(e) => {
                    warn!("Dropping connection {}: {}", session_id, e);
                    break;
                }
            }
        }
        let _ = server_tx.send(ServerMessage::ConnectionClosed { session_id });
    }

    /// Drains one connection's outbound queue until the session is dropped
    async fn write_frames(
        mut writer: OwnedWriteHalf,
        mut outbound_rx: mpsc::UnboundedReceiver<Packet>,
        session_id: u32,
    ) {
        while let Some(packet) = outbound_rx.recv().await {
            if let Err(e) = write_packet(&mut writer, &packet).await {
                warn!("Failed to write to connection {}: {}", session_id, e);
                break;
            }
        }
        let _ = writer.shutdown().await;
        debug!("Writer of connection {} stopped", session_id);
    }

    /// Spawns task sending periodic pings to every connection
    fn spawn_ping_sender(&self) {
        let sessions = Arc::clone(&self.sessions);
        let ping_interval = self.config.ping_interval;

        tokio::spawn(async move {
            let mut ticker = interval(ping_interval);
            loop {
                ticker.tick().await;
                let (nonce, targets) = sessions.write().await.ping_targets();
                for outbound in targets {
                    let _ = outbound.send(Packet::Push(PushEvent::Ping { nonce }));
                }
            }
        });
    }

    /// Spawns task that detects silent connections
    fn spawn_timeout_checker(&self) {
        let sessions = Arc::clone(&self.sessions);
        let server_tx = self.server_tx.clone();
        let client_timeout = self.config.client_timeout;

        tokio::spawn(async move {
            let mut ticker = interval(std::time::Duration::from_secs(1));
            loop {
                ticker.tick().await;
                let timed_out = sessions.read().await.check_timeouts(client_timeout);
                for session_id in timed_out {
                    if server_tx.send(ServerMessage::ClientTimeout { session_id }).is_err() {
                        return;
                    }
                }
            }
        });
    }

    async fn handle_packet(&self, session_id: u32, packet: Packet) {
        self.sessions.write().await.touch(session_id);
        match packet {
            Packet::Request { id, command } => self.handle_request(session_id, id, command).await,
            other => warn!(
                "Unexpected {:?} packet from connection {}",
                other.kind(),
                session_id
            ),
        }
    }

    async fn handle_request(&self, session_id: u32, id: u32, command: Command) {
        let action = command.action();
        match command {
            Command::LoginPlayer { username } => {
                let result = self.sessions.write().await.login(session_id, &username);
                match result {
                    Ok(username) => self.respond(session_id, id, action, Reply::LoggedIn { username }).await,
                    Err(e) => self.reject(session_id, id, action, e).await,
                }
            }
            Command::JoinFirstAvailableRoom => self.join_room(session_id, id, action, None).await,
            Command::CreateAndJoinRoom { max_players } => {
                self.join_room(session_id, id, action, Some(max_players)).await
            }
            Command::Pong { nonce } => debug!("Pong {} from connection {}", nonce, session_id),
            command => {
                let (username, room) = {
                    let mut sessions = self.sessions.write().await;
                    let username = match sessions.username(session_id) {
                        Ok(username) => username,
                        Err(e) => {
                            drop(sessions);
                            self.reject(session_id, id, action, e).await;
                            return;
                        }
                    };
                    (username, sessions.room_of(session_id))
                };
                let result = match room {
                    Some(room) => room.command(&username, id, command),
                    None => Err(ActionNotAllowed::WrongPhase.into()),
                };
                if let Err(e) = result {
                    self.reject(session_id, id, action, e).await;
                }
            }
        }
    }

    /// Seats a player in the first open room, or in a new one when
    /// `create` carries the room size.
    async fn join_room(&self, session_id: u32, id: u32, action: Action, create: Option<usize>) {
        let (username, outbound, candidates) = {
            let mut sessions = self.sessions.write().await;
            let username = match sessions.username(session_id) {
                Ok(username) => username,
                Err(e) => {
                    drop(sessions);
                    self.reject(session_id, id, action, e).await;
                    return;
                }
            };
            if sessions.room_of(session_id).is_some() {
                drop(sessions);
                self.reject(session_id, id, action, GameError::RoomNotJoinable).await;
                return;
            }
            let outbound = match sessions.get(session_id) {
                Some(session) => session.outbound.clone(),
                None => return,
            };
            let candidates = match create {
                Some(max_players) => vec![sessions.create_room(max_players)],
                None => sessions.open_rooms(),
            };
            (username, outbound, candidates)
        };

        let mut refused = None;
        for room in candidates {
            match room.join(&username, id, action, outbound.clone()).await {
                Ok(_) => {
                    self.sessions.write().await.set_room(session_id, room);
                    return;
                }
                Err(GameError::RoomNotJoinable) => continue,
                Err(e) => {
                    refused = Some(e);
                    break;
                }
            }
        }

        // Nothing open: JoinFirstAvailableRoom opens a room of the default size.
        if refused.is_none() && create.is_none() {
            let room = {
                let mut sessions = self.sessions.write().await;
                let max_players = sessions.default_max_players();
                info!("No open room for {}, opening one for {} players", username, max_players);
                sessions.create_room(max_players)
            };
            match room.join(&username, id, action, outbound).await {
                Ok(_) => {
                    self.sessions.write().await.set_room(session_id, room);
                    return;
                }
                Err(e) => refused = Some(e),
            }
        }

        let error = match refused {
            Some(GameError::RoomNotJoinable) | None => GameError::GameNotJoinable,
            Some(e) => e,
        };
        self.reject(session_id, id, action, error).await;
    }

    async fn respond(&self, session_id: u32, id: u32, action: Action, reply: Reply) {
        self.send_to(session_id, Packet::Response { id, action, reply }).await;
    }

    async fn reject(&self, session_id: u32, id: u32, action: Action, error: GameError) {
        debug!("Connection {}: {:?} rejected: {}", session_id, action, error);
        self.send_to(session_id, Packet::Exception { id, action, error }).await;
    }

    async fn send_to(&self, session_id: u32, packet: Packet) {
        let sessions = self.sessions.read().await;
        if let Some(session) = sessions.get(session_id) {
            if session.outbound.send(packet).is_err() {
                debug!("Connection {} is already gone", session_id);
            }
        }
    }

    async fn close_session(&self, session_id: u32) {
        self.sessions.write().await.remove_session(session_id);
    }

    /// Main server loop
    pub async fn run(mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_acceptor();
        self.spawn_ping_sender();
        self.spawn_timeout_checker();

        info!("Server started successfully");

        while let Some(message) = self.server_rx.recv().await {
            match message {
                ServerMessage::PacketReceived { session_id, packet } => {
                    self.handle_packet(session_id, packet).await;
                }
                ServerMessage::ConnectionClosed { session_id } => {
                    self.close_session(session_id).await;
                }
                ServerMessage::ClientTimeout { session_id } => {
                    warn!("Connection {} timed out", session_id);
                    self.close_session(session_id).await;
                }
                ServerMessage::Shutdown => break,
            }
        }

        info!("Server shutting down");
        self.sessions.write().await.shutdown_rooms();
        Ok(())
    }
}
