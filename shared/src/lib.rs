//! Wire protocol and game data shared by the server and its clients.
//!
//! Every message exchanged over a connection is a [`Packet`]. A packet is
//! one of four message types: a client `Request`, the server's `Response`
//! or `Exception` to that request, or a server `Push` broadcast to every
//! connection of a room. Requests and responses carry the [`Action`] they
//! belong to, and the payload is typed by the action.
//!
//! The game state types in [`state`], [`board`], [`cards`] and
//! [`resources`] are serialized as part of push events, so clients hold
//! the exact same representation the server mutates.

pub mod board;
pub mod cards;
pub mod codec;
pub mod error;
pub mod resources;
pub mod state;

use board::{ActionSpaceId, FamilyMemberColor};
use cards::{CardId, DevelopmentCard, LeaderCard, PersonalBonusTile};
use error::GameError;
use resources::ResourceSet;
use serde::{Deserialize, Serialize};
use state::{Dice, Game};

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Request,
    Response,
    Exception,
    Push,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    LoginPlayer,
    JoinFirstAvailableRoom,
    CreateAndJoinRoom,
    ChoosePersonalBonusTile,
    ChooseLeaderCard,
    SpendServants,
    GoToActionSpace,
    GoToFloor,
    PlayLeaderCard,
    DiscardLeaderCard,
    EndTurn,
    ChooseExcommunication,
    Pong,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Packet {
    Request {
        id: u32,
        command: Command,
    },
    Response {
        id: u32,
        action: Action,
        reply: Reply,
    },
    Exception {
        id: u32,
        action: Action,
        error: GameError,
    },
    Push(PushEvent),
}

impl Packet {
    pub fn kind(&self) -> MessageType {
        match self {
            Packet::Request { .. } => MessageType::Request,
            Packet::Response { .. } => MessageType::Response,
            Packet::Exception { .. } => MessageType::Exception,
            Packet::Push(_) => MessageType::Push,
        }
    }

    /// Action of a request or its answer; pushes carry none.
    pub fn action(&self) -> Option<Action> {
        match self {
            Packet::Request { command, .. } => Some(command.action()),
            Packet::Response { action, .. } | Packet::Exception { action, .. } => Some(*action),
            Packet::Push(_) => None,
        }
    }
}

/// Client commands. `privileges` lists indices into the council privilege
/// options, one per privilege the action yields.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Command {
    LoginPlayer {
        username: String,
    },
    JoinFirstAvailableRoom,
    CreateAndJoinRoom {
        max_players: usize,
    },
    ChoosePersonalBonusTile {
        tile_id: u32,
    },
    ChooseLeaderCard {
        card_id: CardId,
    },
    SpendServants {
        amount: i32,
    },
    GoToActionSpace {
        space_id: ActionSpaceId,
        color: FamilyMemberColor,
        privileges: Vec<usize>,
    },
    GoToFloor {
        floor_id: ActionSpaceId,
        color: FamilyMemberColor,
        /// Index of the chosen cost alternative.
        payment: usize,
        privileges: Vec<usize>,
    },
    PlayLeaderCard {
        card_id: CardId,
        privileges: Vec<usize>,
    },
    DiscardLeaderCard {
        card_id: CardId,
        privileges: Vec<usize>,
    },
    EndTurn,
    /// `accept == true` takes the excommunication instead of supporting the church.
    ChooseExcommunication {
        accept: bool,
    },
    Pong {
        nonce: u64,
    },
}

impl Command {
    pub fn action(&self) -> Action {
        match self {
            Command::LoginPlayer { .. } => Action::LoginPlayer,
            Command::JoinFirstAvailableRoom => Action::JoinFirstAvailableRoom,
            Command::CreateAndJoinRoom { .. } => Action::CreateAndJoinRoom,
            Command::ChoosePersonalBonusTile { .. } => Action::ChoosePersonalBonusTile,
            Command::ChooseLeaderCard { .. } => Action::ChooseLeaderCard,
            Command::SpendServants { .. } => Action::SpendServants,
            Command::GoToActionSpace { .. } => Action::GoToActionSpace,
            Command::GoToFloor { .. } => Action::GoToFloor,
            Command::PlayLeaderCard { .. } => Action::PlayLeaderCard,
            Command::DiscardLeaderCard { .. } => Action::DiscardLeaderCard,
            Command::EndTurn => Action::EndTurn,
            Command::ChooseExcommunication { .. } => Action::ChooseExcommunication,
            Command::Pong { .. } => Action::Pong,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Reply {
    LoggedIn { username: String },
    JoinedRoom { room_id: u32, players: Vec<String> },
    Obtained { resources: ResourceSet },
    Done,
}

/// Server-originated events, emitted in the order the server applied them.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum PushEvent {
    PlayerJoined {
        room_id: u32,
        username: String,
        players: Vec<String>,
    },
    GameStarted {
        game: Box<Game>,
    },
    PersonalBonusTileChoice {
        username: String,
        available: Vec<PersonalBonusTile>,
    },
    PersonalBonusTileChosen {
        username: String,
        tile_id: u32,
    },
    LeaderDraft {
        username: String,
        hand: Vec<LeaderCard>,
    },
    LeaderCardChosen {
        username: String,
        card_id: CardId,
    },
    CardsDrawn {
        floors: Vec<(ActionSpaceId, Option<DevelopmentCard>)>,
    },
    DiceThrown {
        dice: Dice,
    },
    PrepareNewRound {
        round: u32,
        period: u8,
        turn_order: Vec<String>,
    },
    PlayerTurnStarted {
        username: String,
        turn: u32,
    },
    TurnEnded {
        username: String,
        timed_out: bool,
    },
    ServantsSpent {
        username: String,
        amount: i32,
        resources: ResourceSet,
    },
    PlayerOccupiesActionSpace {
        username: String,
        space_id: ActionSpaceId,
        color: FamilyMemberColor,
        obtained: ResourceSet,
        resources: ResourceSet,
    },
    PlayerOccupiesFloor {
        username: String,
        floor_id: ActionSpaceId,
        color: FamilyMemberColor,
        card_id: CardId,
        paid: ResourceSet,
        obtained: ResourceSet,
        resources: ResourceSet,
    },
    LeaderCardPlayed {
        username: String,
        card_id: CardId,
        obtained: ResourceSet,
        resources: ResourceSet,
    },
    LeaderCardDiscarded {
        username: String,
        card_id: CardId,
        obtained: ResourceSet,
        resources: ResourceSet,
    },
    ResourcesUpdated {
        username: String,
        resources: ResourceSet,
    },
    VaticanReport {
        period: u8,
        pending: Vec<String>,
    },
    PlayerExcommunicated {
        username: String,
        period: u8,
    },
    ChurchSupported {
        username: String,
        period: u8,
        victory_points: i32,
    },
    PlayerDisconnected {
        username: String,
    },
    GameEnd {
        ranking: Vec<(String, i32)>,
    },
    AbortGame {
        reason: String,
    },
    Ping {
        nonce: u64,
    },
}

impl PushEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PushEvent::PlayerJoined { .. } => "onPlayerJoined",
            PushEvent::GameStarted { .. } => "onGameStarted",
            PushEvent::PersonalBonusTileChoice { .. } => "onPersonalBonusTileChoice",
            PushEvent::PersonalBonusTileChosen { .. } => "onPersonalBonusTileChosen",
            PushEvent::LeaderDraft { .. } => "onLeaderDraft",
            PushEvent::LeaderCardChosen { .. } => "onLeaderCardChosen",
            PushEvent::CardsDrawn { .. } => "onCardsDrawn",
            PushEvent::DiceThrown { .. } => "onDiceThrown",
            PushEvent::PrepareNewRound { .. } => "onPrepareNewRound",
            PushEvent::PlayerTurnStarted { .. } => "onPlayerTurnStarted",
            PushEvent::TurnEnded { .. } => "onTurnEnded",
            PushEvent::ServantsSpent { .. } => "onServantsSpent",
            PushEvent::PlayerOccupiesActionSpace { .. } => "onPlayerOccupiesActionSpace",
            PushEvent::PlayerOccupiesFloor { .. } => "onPlayerOccupiesFloor",
            PushEvent::LeaderCardPlayed { .. } => "onLeaderCardPlayed",
            PushEvent::LeaderCardDiscarded { .. } => "onLeaderCardDiscarded",
            PushEvent::ResourcesUpdated { .. } => "onResourcesUpdated",
            PushEvent::VaticanReport { .. } => "onVaticanReport",
            PushEvent::PlayerExcommunicated { .. } => "onPlayerExcommunicated",
            PushEvent::ChurchSupported { .. } => "onChurchSupported",
            PushEvent::PlayerDisconnected { .. } => "onPlayerDisconnected",
            PushEvent::GameEnd { .. } => "onGameEnd",
            PushEvent::AbortGame { .. } => "abortGame",
            PushEvent::Ping { .. } => "pingClient",
        }
    }
}
