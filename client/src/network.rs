//! TCP connection to the game server.
//!
//! Requests are correlated with their response by id. A reader task routes
//! responses and exceptions to the waiting caller, answers pings, and
//! forwards every other push in arrival order.

use log::{debug, error, info, warn};
use shared::codec::{decode_body, encode_frame, frame_len, HEADER_LEN};
use shared::error::GameError;
use shared::{Command, Packet, PushEvent, Reply};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

type Pending = Arc<Mutex<HashMap<u32, oneshot::Sender<Result<Reply, GameError>>>>>;

pub struct Connection {
    outbound: mpsc::UnboundedSender<Packet>,
    pending: Pending,
    next_id: AtomicU32,
    pushes: mpsc::UnboundedReceiver<PushEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    pub async fn connect(server_addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let stream = TcpStream::connect(server_addr).await?;
        stream.set_nodelay(true)?;
        info!("Connected to {}", server_addr);

        let (reader, writer) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (push_tx, pushes) = mpsc::unbounded_channel();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        let tasks = vec![
            tokio::spawn(write_frames(writer, outbound_rx)),
            tokio::spawn(read_frames(reader, Arc::clone(&pending), push_tx, outbound.clone())),
        ];

        Ok(Self {
            outbound,
            pending,
            next_id: AtomicU32::new(1),
            pushes,
            tasks,
        })
    }

    /// Sends a command and waits for the server's answer to it.
    pub async fn request(&self, command: Command) -> Result<Reply, GameError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| GameError::NetworkFailure("pending table poisoned".to_string()))?
            .insert(id, tx);

        debug!("Request {} {:?}", id, command.action());
        self.outbound
            .send(Packet::Request { id, command })
            .map_err(|_| GameError::NetworkFailure("connection closed".to_string()))?;
        rx.await
            .map_err(|_| GameError::NetworkFailure("connection closed".to_string()))?
    }

    pub async fn login(&self, username: &str) -> Result<Reply, GameError> {
        self.request(Command::LoginPlayer {
            username: username.to_string(),
        })
        .await
    }

    pub async fn join_first_available_room(&self) -> Result<Reply, GameError> {
        self.request(Command::JoinFirstAvailableRoom).await
    }

    pub async fn create_and_join_room(&self, max_players: usize) -> Result<Reply, GameError> {
        self.request(Command::CreateAndJoinRoom { max_players }).await
    }

    /// Next push event, or None once the connection is gone.
    pub async fn next_push(&mut self) -> Option<PushEvent> {
        self.pushes.recv().await
    }
}

impl Drop for Connection {
    /// Closes the socket; the reader task would otherwise keep it open.
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn write_frames(mut writer: OwnedWriteHalf, mut outbound_rx: mpsc::UnboundedReceiver<Packet>) {
    while let Some(packet) = outbound_rx.recv().await {
        let frame = match encode_frame(&packet) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode packet: {}", e);
                continue;
            }
        };
        if let Err(e) = writer.write_all(&frame).await {
            warn!("Failed to write to server: {}", e);
            break;
        }
    }
}

async fn read_frames(
    mut reader: OwnedReadHalf,
    pending: Pending,
    push_tx: mpsc::UnboundedSender<PushEvent>,
    outbound: mpsc::UnboundedSender<Packet>,
) {
    loop {
        let mut header = [0u8; HEADER_LEN];
        if reader.read_exact(&mut header).await.is_err() {
            break;
        }
        let body = match frame_len(header) {
            Ok(len) => {
                let mut body = vec![0u8; len];
                if reader.read_exact(&mut body).await.is_err() {
                    break;
                }
                body
            }
            Err(e) => {
                error!("Bad frame from server: {}", e);
                break;
            }
        };
        let packet = match decode_body(&body) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Skipping undecodable packet: {}", e);
                continue;
            }
        };

        match packet {
            Packet::Response { id, reply, .. } => complete(&pending, id, Ok(reply)),
            Packet::Exception { id, error, .. } => complete(&pending, id, Err(error)),
            Packet::Push(PushEvent::Ping { nonce }) => {
                let _ = outbound.send(Packet::Request {
                    id: 0,
                    command: Command::Pong { nonce },
                });
            }
            Packet::Push(event) => {
                if push_tx.send(event).is_err() {
                    debug!("Push receiver dropped");
                }
            }
            Packet::Request { .. } => warn!("Server sent a request"),
        }
    }
    info!("Disconnected from server");
    // Dropping the waiters fails their requests with NetworkFailure.
    if let Ok(mut pending) = pending.lock() {
        pending.clear();
    }
}

fn complete(pending: &Pending, id: u32, result: Result<Reply, GameError>) {
    let waiter = pending.lock().ok().and_then(|mut pending| pending.remove(&id));
    match waiter {
        Some(waiter) => {
            let _ = waiter.send(result);
        }
        None => warn!("Answer to unknown request {}", id),
    }
}
