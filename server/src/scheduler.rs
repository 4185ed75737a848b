//! Turn and round scheduler.
//!
//! The scheduler owns a room's [`Game`] and advances it through
//! `Lobby → ChoosingBonusTiles → ChoosingLeaders → RoundInProgress →
//! VaticanReport → … → GameEnded`. It is synchronous: every operation
//! returns the push events it produced, in emission order, and the room
//! actor delivers them. Timers are logical. Each state that waits on a
//! player bumps [`Scheduler::generation`]; the room arms one timer per
//! generation and a stale generation is ignored by [`Scheduler::timeout`].

use crate::config::{StaticData, MAX_PLAYERS, MIN_PLAYERS};
use crate::effects::EffectContext;
use crate::ledger::Ledger;
use crate::resolution::ActionResolver;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use shared::board::{ActionSpaceKind, Board, FamilyMemberColor};
use shared::cards::{DevelopmentCardType, EffectTrigger, LeaderCard, PersonalBonusTile};
use shared::error::{ActionNotAllowed, GameError};
use shared::resources::{ResourceKind, ResourceSet};
use shared::state::{
    Deck, Dice, EffectSource, EffectsContainer, Game, GamePhase, Player, PlayerColor, RulesConfig,
};
use shared::{Command, PushEvent, Reply};
use std::sync::Arc;

/// Outcome of an accepted command: the reply for the requester and the
/// events for the whole room.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub reply: Reply,
    pub events: Vec<PushEvent>,
}

impl Applied {
    fn done(events: Vec<PushEvent>) -> Self {
        Self {
            reply: Reply::Done,
            events,
        }
    }
}

pub struct Scheduler {
    game: Game,
    data: Arc<StaticData>,
    resolver: ActionResolver,
    rng: StdRng,
    max_players: usize,
    generation: u64,
    /// Players still to choose a bonus tile, next chooser first.
    tile_order: Vec<String>,
    available_tiles: Vec<PersonalBonusTile>,
    /// Leader draft hands by player index.
    draft_hands: Vec<Vec<LeaderCard>>,
    draft_picked: Vec<bool>,
    /// Players who still owe a Vatican report choice.
    pending_report: Vec<String>,
}

impl Scheduler {
    pub fn new(data: Arc<StaticData>, ledger: Ledger, max_players: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            game: Game::new(data.rules.clone()),
            resolver: ActionResolver::new(Arc::clone(&data), ledger),
            data,
            rng,
            max_players: max_players.clamp(MIN_PLAYERS, MAX_PLAYERS),
            generation: 0,
            tile_order: Vec::new(),
            available_tiles: Vec::new(),
            draft_hands: Vec::new(),
            draft_picked: Vec::new(),
            pending_report: Vec::new(),
        }
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    #[cfg(test)]
    pub(crate) fn game_mut(&mut self) -> &mut Game {
        &mut self.game
    }

    pub fn phase(&self) -> GamePhase {
        self.game.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    pub fn is_full(&self) -> bool {
        self.game.players.len() >= self.max_players
    }

    pub fn is_joinable(&self) -> bool {
        self.game.phase == GamePhase::Lobby && !self.is_full()
    }

    pub fn can_start(&self) -> bool {
        self.game.phase == GamePhase::Lobby && self.game.players.len() >= MIN_PLAYERS
    }

    pub fn connected_count(&self) -> usize {
        self.game.players.iter().filter(|p| p.connected).count()
    }

    pub fn tile_chooser(&self) -> Option<&str> {
        self.tile_order.first().map(String::as_str)
    }

    pub fn available_tiles(&self) -> &[PersonalBonusTile] {
        &self.available_tiles
    }

    pub fn draft_hand(&self, username: &str) -> Option<&[LeaderCard]> {
        let index = self.game.player_index(username)?;
        self.draft_hands.get(index).map(Vec::as_slice)
    }

    pub fn pending_report(&self) -> &[String] {
        &self.pending_report
    }

    pub fn add_player(&mut self, username: &str) -> Result<(), GameError> {
        if !self.is_joinable() {
            return Err(GameError::GameNotJoinable);
        }
        if self.game.player(username).is_some() {
            return Err(GameError::LoginConflict(username.to_string()));
        }
        let color = PlayerColor::ALL
            .iter()
            .copied()
            .find(|color| !self.game.players.iter().any(|p| p.color == *color))
            .ok_or(GameError::GameNotJoinable)?;
        self.game.players.push(Player::new(username, color));
        debug!("{} joined the lobby as {:?}", username, color);
        Ok(())
    }

    pub fn start_game(&mut self) -> Result<Vec<PushEvent>, GameError> {
        if self.game.phase != GamePhase::Lobby {
            return Err(ActionNotAllowed::WrongPhase.into());
        }
        if self.game.players.len() < MIN_PLAYERS {
            return Err(ActionNotAllowed::RequirementsNotMet.into());
        }
        let data = Arc::clone(&self.data);

        self.game.players.shuffle(&mut self.rng);
        self.game.board = Board::standard(self.game.players.len());

        let mut decks = Vec::new();
        for period in 1..=self.game.rules.periods {
            let mut deck = Deck::new();
            for card_type in DevelopmentCardType::ALL {
                let mut cards = data.cards_for(period, card_type);
                cards.shuffle(&mut self.rng);
                deck.insert(card_type, cards.into_iter().collect());
            }
            decks.push(deck);
            if let Some(tile) = data.excommunications_for(period).choose(&mut self.rng) {
                self.game.excommunications.push((*tile).clone());
            }
        }
        self.game.decks = decks;

        let rules = self.game.rules.clone();
        for (position, player) in self.game.players.iter_mut().enumerate() {
            player.resources = rules.starting_resources.clone();
            let coins = rules
                .starting_coins
                .get(position)
                .or(rules.starting_coins.last())
                .copied()
                .unwrap_or(0);
            player.resources.add(ResourceKind::Coins, coins);
        }

        self.game.started = true;
        self.game.phase = GamePhase::ChoosingBonusTiles;
        self.available_tiles = data.bonus_tiles.clone();
        self.tile_order = self.game.usernames().into_iter().rev().collect();
        info!("Game started with turn order {:?}", self.game.usernames());

        let mut events = vec![PushEvent::GameStarted {
            game: Box::new(self.game.clone()),
        }];
        self.next_tile_choice(&mut events);
        Ok(events)
    }

    /// Dispatches a game command from `username`.
    pub fn handle(&mut self, username: &str, command: Command) -> Result<Applied, GameError> {
        match command {
            Command::ChoosePersonalBonusTile { tile_id } => self.choose_bonus_tile(username, tile_id),
            Command::ChooseLeaderCard { card_id } => self.choose_leader(username, card_id),
            Command::SpendServants { amount } => self.spend_servants(username, amount),
            Command::GoToActionSpace {
                space_id,
                color,
                privileges,
            } => {
                self.require_current(username)?;
                let obtained = self.resolver.go_to_action_space(
                    &mut self.game,
                    username,
                    color,
                    space_id,
                    &privileges,
                )?;
                self.generation += 1;
                let event = PushEvent::PlayerOccupiesActionSpace {
                    username: username.to_string(),
                    space_id,
                    color,
                    obtained: obtained.clone(),
                    resources: self.resources_of(username),
                };
                Ok(Applied {
                    reply: Reply::Obtained { resources: obtained },
                    events: vec![event],
                })
            }
            Command::GoToFloor {
                floor_id,
                color,
                payment,
                privileges,
            } => {
                self.require_current(username)?;
                let outcome = self.resolver.go_to_floor(
                    &mut self.game,
                    username,
                    color,
                    floor_id,
                    payment,
                    &privileges,
                )?;
                self.generation += 1;
                let event = PushEvent::PlayerOccupiesFloor {
                    username: username.to_string(),
                    floor_id,
                    color,
                    card_id: outcome.card_id,
                    paid: outcome.paid,
                    obtained: outcome.obtained.clone(),
                    resources: self.resources_of(username),
                };
                Ok(Applied {
                    reply: Reply::Obtained {
                        resources: outcome.obtained,
                    },
                    events: vec![event],
                })
            }
            Command::PlayLeaderCard { card_id, privileges } => {
                self.require_current(username)?;
                let obtained =
                    self.resolver
                        .play_leader_card(&mut self.game, username, card_id, &privileges)?;
                self.generation += 1;
                let event = PushEvent::LeaderCardPlayed {
                    username: username.to_string(),
                    card_id,
                    obtained: obtained.clone(),
                    resources: self.resources_of(username),
                };
                Ok(Applied {
                    reply: Reply::Obtained { resources: obtained },
                    events: vec![event],
                })
            }
            Command::DiscardLeaderCard { card_id, privileges } => {
                self.require_current(username)?;
                let obtained =
                    self.resolver
                        .discard_leader_card(&mut self.game, username, card_id, &privileges)?;
                self.generation += 1;
                let event = PushEvent::LeaderCardDiscarded {
                    username: username.to_string(),
                    card_id,
                    obtained: obtained.clone(),
                    resources: self.resources_of(username),
                };
                Ok(Applied {
                    reply: Reply::Obtained { resources: obtained },
                    events: vec![event],
                })
            }
            Command::EndTurn => {
                let index = self.require_current(username)?;
                let mut events = Vec::new();
                self.finish_turn(index, false, &mut events);
                Ok(Applied::done(events))
            }
            Command::ChooseExcommunication { accept } => self.choose_excommunication(username, accept),
            Command::LoginPlayer { .. }
            | Command::JoinFirstAvailableRoom
            | Command::CreateAndJoinRoom { .. }
            | Command::Pong { .. } => Err(ActionNotAllowed::WrongPhase.into()),
        }
    }

    /// Fires the timer of `generation`. Stale generations do nothing.
    pub fn timeout(&mut self, generation: u64) -> Vec<PushEvent> {
        let mut events = Vec::new();
        if generation != self.generation {
            debug!("Ignoring stale timer {} (current {})", generation, self.generation);
            return events;
        }
        match self.game.phase {
            GamePhase::ChoosingBonusTiles => {
                if let Some(chooser) = self.tile_order.first().cloned() {
                    warn!("{} did not choose a bonus tile in time", chooser);
                    self.auto_assign_tile(&chooser, &mut events);
                }
                self.next_tile_choice(&mut events);
            }
            GamePhase::ChoosingLeaders => {
                warn!("Leader draft timed out");
                self.auto_pick(false, &mut events);
            }
            GamePhase::RoundInProgress => {
                if let Some(index) = self.game.current {
                    warn!("Turn of {} timed out", self.game.players[index].username);
                    self.finish_turn(index, true, &mut events);
                }
            }
            GamePhase::VaticanReport => {
                let period = self.game.period();
                for username in std::mem::take(&mut self.pending_report) {
                    if let Some(index) = self.game.player_index(&username) {
                        self.support_church(index, period, &mut events);
                    }
                }
                self.finish_vatican(&mut events);
            }
            GamePhase::Lobby | GamePhase::GameEnded | GamePhase::Aborted => {}
        }
        events
    }

    /// Marks a player as gone. Whatever the game waits on from them is
    /// settled the same way a timeout would settle it.
    pub fn disconnect(&mut self, username: &str) -> Vec<PushEvent> {
        let mut events = Vec::new();
        let index = match self.game.player_index(username) {
            Some(index) => index,
            None => return events,
        };
        if self.game.phase == GamePhase::Lobby {
            self.game.players.remove(index);
            events.push(PushEvent::PlayerDisconnected {
                username: username.to_string(),
            });
            return events;
        }
        if !self.game.players[index].connected {
            return events;
        }
        self.game.players[index].connected = false;
        info!("{} disconnected", username);
        events.push(PushEvent::PlayerDisconnected {
            username: username.to_string(),
        });

        match self.game.phase {
            GamePhase::ChoosingBonusTiles => {
                if self.tile_chooser() == Some(username) {
                    self.next_tile_choice(&mut events);
                }
            }
            GamePhase::ChoosingLeaders => self.auto_pick(true, &mut events),
            GamePhase::RoundInProgress => {
                if self.game.current == Some(index) {
                    self.finish_turn(index, true, &mut events);
                }
            }
            GamePhase::VaticanReport => {
                if self.pending_report.iter().any(|name| name == username) {
                    let period = self.game.period();
                    self.pending_report.retain(|name| name != username);
                    self.support_church(index, period, &mut events);
                    if self.pending_report.is_empty() {
                        self.finish_vatican(&mut events);
                    }
                }
            }
            GamePhase::Lobby | GamePhase::GameEnded | GamePhase::Aborted => {}
        }
        events
    }

    /// Stops the game for good.
    pub fn abort(&mut self, reason: &str) -> Vec<PushEvent> {
        warn!("Aborting game: {}", reason);
        self.game.phase = GamePhase::Aborted;
        self.game.ended = true;
        self.game.current = None;
        self.generation += 1;
        vec![PushEvent::AbortGame {
            reason: reason.to_string(),
        }]
    }

    fn require_player(&self, username: &str) -> Result<usize, GameError> {
        self.game
            .player_index(username)
            .ok_or(GameError::ActionNotAllowed(ActionNotAllowed::PlayerDoesNotExist))
    }

    fn require_phase(&self, phase: GamePhase) -> Result<(), GameError> {
        if self.game.phase != phase {
            return Err(ActionNotAllowed::WrongPhase.into());
        }
        Ok(())
    }

    fn require_current(&self, username: &str) -> Result<usize, GameError> {
        let index = self.require_player(username)?;
        self.require_phase(GamePhase::RoundInProgress)?;
        if self.game.current != Some(index) {
            return Err(ActionNotAllowed::NotYourTurn.into());
        }
        Ok(index)
    }

    fn resources_of(&self, username: &str) -> ResourceSet {
        self.game
            .player(username)
            .map(|p| p.resources.clone())
            .unwrap_or_default()
    }

    fn is_connected(&self, username: &str) -> bool {
        self.game.player(username).map_or(false, |p| p.connected)
    }

    fn choose_bonus_tile(&mut self, username: &str, tile_id: u32) -> Result<Applied, GameError> {
        self.require_player(username)?;
        self.require_phase(GamePhase::ChoosingBonusTiles)?;
        if self.tile_chooser() != Some(username) {
            return Err(ActionNotAllowed::NotYourTurn.into());
        }
        let mut events = Vec::new();
        self.assign_tile(username, tile_id, &mut events)?;
        self.next_tile_choice(&mut events);
        Ok(Applied::done(events))
    }

    fn assign_tile(
        &mut self,
        username: &str,
        tile_id: u32,
        events: &mut Vec<PushEvent>,
    ) -> Result<(), GameError> {
        let position = self
            .available_tiles
            .iter()
            .position(|tile| tile.id == tile_id)
            .ok_or(ActionNotAllowed::PersonalBonusTileNotAvailable)?;
        let player = self
            .game
            .player_mut(username)
            .ok_or(ActionNotAllowed::PlayerDoesNotExist)?;
        player.bonus_tile = Some(self.available_tiles.remove(position));
        self.tile_order.retain(|name| name != username);
        events.push(PushEvent::PersonalBonusTileChosen {
            username: username.to_string(),
            tile_id,
        });
        Ok(())
    }

    fn auto_assign_tile(&mut self, username: &str, events: &mut Vec<PushEvent>) {
        let assigned = match self.available_tiles.first().map(|tile| tile.id) {
            Some(tile_id) => self.assign_tile(username, tile_id, events).is_ok(),
            None => false,
        };
        if !assigned {
            self.tile_order.retain(|name| name != username);
        }
    }

    /// Prompts the next connected chooser, assigning tiles to
    /// disconnected ones, and moves on to the draft when everyone is done.
    fn next_tile_choice(&mut self, events: &mut Vec<PushEvent>) {
        while let Some(chooser) = self.tile_order.first().cloned() {
            if self.is_connected(&chooser) {
                self.generation += 1;
                events.push(PushEvent::PersonalBonusTileChoice {
                    username: chooser,
                    available: self.available_tiles.clone(),
                });
                return;
            }
            self.auto_assign_tile(&chooser, events);
        }
        self.start_draft(events);
    }

    fn start_draft(&mut self, events: &mut Vec<PushEvent>) {
        self.game.phase = GamePhase::ChoosingLeaders;
        let mut leaders = self.data.leader_cards.clone();
        leaders.shuffle(&mut self.rng);
        let size = self.game.rules.leader_draft_size;
        self.draft_hands.clear();
        for _ in 0..self.game.players.len() {
            let take = size.min(leaders.len());
            self.draft_hands.push(leaders.drain(..take).collect());
        }
        self.start_draft_pass(events);
    }

    fn start_draft_pass(&mut self, events: &mut Vec<PushEvent>) {
        if self.draft_hands.iter().all(Vec::is_empty) {
            self.draft_hands.clear();
            self.draft_picked.clear();
            self.start_round(events);
            return;
        }
        self.draft_picked = vec![false; self.game.players.len()];
        self.generation += 1;
        for (player, hand) in self.game.players.iter().zip(&self.draft_hands) {
            events.push(PushEvent::LeaderDraft {
                username: player.username.clone(),
                hand: hand.clone(),
            });
        }
        self.auto_pick(true, events);
    }

    fn choose_leader(&mut self, username: &str, card_id: u32) -> Result<Applied, GameError> {
        let index = self.require_player(username)?;
        self.require_phase(GamePhase::ChoosingLeaders)?;
        let mut events = Vec::new();
        self.pick_leader(index, card_id, &mut events)?;
        self.complete_draft_pass(&mut events);
        Ok(Applied::done(events))
    }

    fn pick_leader(
        &mut self,
        index: usize,
        card_id: u32,
        events: &mut Vec<PushEvent>,
    ) -> Result<(), GameError> {
        if self.draft_picked.get(index).copied().unwrap_or(true) {
            return Err(ActionNotAllowed::LeaderCardNotAvailable.into());
        }
        let hand = &mut self.draft_hands[index];
        let position = hand
            .iter()
            .position(|card| card.id == card_id)
            .ok_or(ActionNotAllowed::LeaderCardNotAvailable)?;
        let card = hand.remove(position);
        let player = &mut self.game.players[index];
        player.leader_hand.push(card);
        self.draft_picked[index] = true;
        events.push(PushEvent::LeaderCardChosen {
            username: player.username.clone(),
            card_id,
        });
        Ok(())
    }

    /// Picks the first card of the hand for players still choosing, or
    /// only for disconnected ones when `only_disconnected` is set.
    fn auto_pick(&mut self, only_disconnected: bool, events: &mut Vec<PushEvent>) {
        for index in 0..self.game.players.len() {
            if self.draft_picked.get(index).copied().unwrap_or(true) {
                continue;
            }
            if only_disconnected && self.game.players[index].connected {
                continue;
            }
            match self.draft_hands[index].first().map(|card| card.id) {
                Some(card_id) => {
                    if let Err(e) = self.pick_leader(index, card_id, events) {
                        warn!("Automatic leader pick failed: {}", e);
                    }
                }
                None => self.draft_picked[index] = true,
            }
        }
        self.complete_draft_pass(events);
    }

    fn complete_draft_pass(&mut self, events: &mut Vec<PushEvent>) {
        if self.game.phase != GamePhase::ChoosingLeaders || !self.draft_picked.iter().all(|p| *p) {
            return;
        }
        self.draft_hands.rotate_right(1);
        self.start_draft_pass(events);
    }

    fn start_round(&mut self, events: &mut Vec<PushEvent>) {
        let game = &mut self.game;
        game.round += 1;
        game.phase = GamePhase::RoundInProgress;
        game.current = None;
        let period = game.period();
        game.board.clear_occupants();
        events.push(PushEvent::PrepareNewRound {
            round: game.round,
            period,
            turn_order: game.usernames(),
        });

        let mut drawn = Vec::new();
        let mut deck = game.decks.get_mut(period.saturating_sub(1) as usize);
        for card_type in DevelopmentCardType::ALL {
            let floors = game.board.towers.get(&card_type).cloned().unwrap_or_default();
            for id in floors {
                let card = deck
                    .as_deref_mut()
                    .and_then(|deck| deck.get_mut(&card_type))
                    .and_then(|cards| cards.pop_front());
                if let Some(space) = game.board.space_mut(id) {
                    if let ActionSpaceKind::Floor { card: slot, .. } = &mut space.kind {
                        *slot = card.clone();
                    }
                }
                drawn.push((id, card));
            }
        }
        events.push(PushEvent::CardsDrawn { floors: drawn });

        let faces = game.rules.die_faces.max(1);
        game.dice = Dice {
            black: self.rng.gen_range(1..=faces),
            white: self.rng.gen_range(1..=faces),
            orange: self.rng.gen_range(1..=faces),
        };
        events.push(PushEvent::DiceThrown { dice: game.dice });

        for player in game.players.iter_mut() {
            player.family_members = FamilyMemberColor::ALL.to_vec();
            player.passed = false;
            player.placed_this_turn = false;
            player.servant_bonus = 0;
        }

        let (turn, round) = (self.game.turn, self.game.round);
        for player in self.game.players.iter_mut() {
            let gained = self
                .resolver
                .run_trigger(player, EffectTrigger::RoundStart, turn, round);
            if !gained.is_empty() {
                events.push(PushEvent::ResourcesUpdated {
                    username: player.username.clone(),
                    resources: player.resources.clone(),
                });
            }
        }
        info!(
            "Round {} of period {} started, dice {:?}",
            round, period, self.game.dice
        );
        self.advance_turn(None, events);
    }

    /// Hands the turn to the next player after `after` who still has
    /// family members to place, or ends the round.
    fn advance_turn(&mut self, after: Option<usize>, events: &mut Vec<PushEvent>) {
        let count = self.game.players.len();
        let start = after.map(|index| index + 1).unwrap_or(0);
        let next = (0..count)
            .map(|offset| (start + offset) % count)
            .find(|index| self.game.players[*index].can_act());
        match next {
            Some(index) => self.begin_turn(index, events),
            None => self.end_round(events),
        }
    }

    fn begin_turn(&mut self, index: usize, events: &mut Vec<PushEvent>) {
        self.game.turn += 1;
        self.game.current = Some(index);
        self.generation += 1;
        let player = &mut self.game.players[index];
        player.servant_bonus = 0;
        player.placed_this_turn = false;
        debug!("Turn {} belongs to {}", self.game.turn, player.username);
        events.push(PushEvent::PlayerTurnStarted {
            username: player.username.clone(),
            turn: self.game.turn,
        });
    }

    /// Ends the turn of `index`. A turn that ends without a placement, or
    /// by timeout, gives up the player's remaining placements this round.
    fn finish_turn(&mut self, index: usize, timed_out: bool, events: &mut Vec<PushEvent>) {
        let player = &mut self.game.players[index];
        if timed_out || !player.placed_this_turn {
            player.passed = true;
        }
        player.servant_bonus = 0;
        events.push(PushEvent::TurnEnded {
            username: player.username.clone(),
            timed_out,
        });
        self.game.current = None;
        self.advance_turn(Some(index), events);
    }

    fn end_round(&mut self, events: &mut Vec<PushEvent>) {
        self.game.current = None;
        let (turn, round) = (self.game.turn, self.game.round);
        for player in self.game.players.iter_mut() {
            let gained = self
                .resolver
                .run_trigger(player, EffectTrigger::EndOfRound, turn, round);
            if !gained.is_empty() {
                events.push(PushEvent::ResourcesUpdated {
                    username: player.username.clone(),
                    resources: player.resources.clone(),
                });
            }
        }

        let mut rest = std::mem::take(&mut self.game.players);
        let mut order = Vec::with_capacity(rest.len());
        for name in self.game.board.council_order() {
            if let Some(position) = rest.iter().position(|p| p.username == name) {
                order.push(rest.remove(position));
            }
        }
        order.extend(rest);
        self.game.players = order;
        self.game.board.clear_occupants();
        info!(
            "Round {} ended, next order {:?}",
            round,
            self.game.usernames()
        );

        if self.game.is_period_end() || self.game.is_last_round() {
            self.start_vatican_report(events);
        } else {
            self.start_round(events);
        }
    }

    fn start_vatican_report(&mut self, events: &mut Vec<PushEvent>) {
        let period = self.game.period();
        let threshold = self.game.rules.faith_threshold(period);
        self.game.phase = GamePhase::VaticanReport;
        self.pending_report.clear();

        let mut outcomes = Vec::new();
        for index in 0..self.game.players.len() {
            let player = &self.game.players[index];
            let faith = player.resources.get(ResourceKind::FaithPoints);
            let connected = player.connected;
            let username = player.username.clone();
            if faith < threshold {
                self.excommunicate(index, period, &mut outcomes);
            } else if connected {
                self.pending_report.push(username);
            } else {
                self.support_church(index, period, &mut outcomes);
            }
        }
        info!(
            "Vatican report for period {}, waiting on {:?}",
            period, self.pending_report
        );
        events.push(PushEvent::VaticanReport {
            period,
            pending: self.pending_report.clone(),
        });
        events.extend(outcomes);

        if self.pending_report.is_empty() {
            self.finish_vatican(events);
        } else {
            self.generation += 1;
        }
    }

    fn choose_excommunication(&mut self, username: &str, accept: bool) -> Result<Applied, GameError> {
        let index = self.require_player(username)?;
        self.require_phase(GamePhase::VaticanReport)?;
        if !self.pending_report.iter().any(|name| name == username) {
            return Err(ActionNotAllowed::NotYourTurn.into());
        }
        let period = self.game.period();
        let mut events = Vec::new();
        if accept {
            self.excommunicate(index, period, &mut events);
        } else {
            self.support_church(index, period, &mut events);
        }
        self.pending_report.retain(|name| name != username);
        if self.pending_report.is_empty() {
            self.finish_vatican(&mut events);
        }
        Ok(Applied::done(events))
    }

    fn excommunicate(&mut self, index: usize, period: u8, events: &mut Vec<PushEvent>) {
        let effects = self
            .game
            .excommunication(period)
            .map(|tile| tile.effects.clone())
            .unwrap_or_default();
        let (turn, round) = (self.game.turn, self.game.round);
        let player = &mut self.game.players[index];
        player.excommunications.push(period);

        let mut fresh = EffectsContainer::default();
        fresh.attach(effects, EffectSource::Excommunication(period), None);
        let ctx = EffectContext::for_player(player, EffectTrigger::Excommunication, turn, round);
        let gained = self.resolver.engine().apply(&mut fresh, &ctx);
        player.effects.effects.extend(fresh.effects);
        if !gained.is_empty() {
            self.resolver.ledger().grant(player, &gained);
        }

        info!("{} is excommunicated in period {}", player.username, period);
        events.push(PushEvent::PlayerExcommunicated {
            username: player.username.clone(),
            period,
        });
        if !gained.is_empty() {
            events.push(PushEvent::ResourcesUpdated {
                username: player.username.clone(),
                resources: player.resources.clone(),
            });
        }
    }

    fn support_church(&mut self, index: usize, period: u8, events: &mut Vec<PushEvent>) {
        let rules = &self.game.rules;
        let player = &mut self.game.players[index];
        let faith = player.resources.get(ResourceKind::FaithPoints);
        let points = rules.faith_points_value(faith);
        player.resources.set(ResourceKind::FaithPoints, 0);
        self.resolver.ledger().grant(
            player,
            &ResourceSet::new().with(ResourceKind::VictoryPoints, points),
        );
        info!("{} supported the church for {} victory points", player.username, points);
        events.push(PushEvent::ChurchSupported {
            username: player.username.clone(),
            period,
            victory_points: points,
        });
        events.push(PushEvent::ResourcesUpdated {
            username: player.username.clone(),
            resources: player.resources.clone(),
        });
    }

    fn finish_vatican(&mut self, events: &mut Vec<PushEvent>) {
        self.pending_report.clear();
        if self.game.is_last_round() {
            self.end_game(events);
        } else {
            self.start_round(events);
        }
    }

    fn end_game(&mut self, events: &mut Vec<PushEvent>) {
        let rules = self.game.rules.clone();
        let military: Vec<i32> = self
            .game
            .players
            .iter()
            .map(|p| p.resources.get(ResourceKind::MilitaryPoints))
            .collect();
        for (index, player) in self.game.players.iter_mut().enumerate() {
            let rank = military.iter().filter(|m| **m > military[index]).count();
            let points = final_points(&rules, player, rank);
            self.resolver.ledger().grant(
                player,
                &ResourceSet::new().with(ResourceKind::VictoryPoints, points),
            );
            events.push(PushEvent::ResourcesUpdated {
                username: player.username.clone(),
                resources: player.resources.clone(),
            });
        }

        let mut ranking: Vec<(String, i32)> = self
            .game
            .players
            .iter()
            .map(|p| (p.username.clone(), p.resources.get(ResourceKind::VictoryPoints)))
            .collect();
        ranking.sort_by(|a, b| b.1.cmp(&a.1));

        self.game.phase = GamePhase::GameEnded;
        self.game.ended = true;
        self.game.current = None;
        self.generation += 1;
        info!("Game ended, final ranking {:?}", ranking);
        events.push(PushEvent::GameEnd { ranking });
    }

    fn spend_servants(&mut self, username: &str, amount: i32) -> Result<Applied, GameError> {
        let index = self.require_current(username)?;
        let player = &mut self.game.players[index];
        self.resolver.ledger().spend_servants(player, amount)?;
        self.generation += 1;
        Ok(Applied::done(vec![PushEvent::ServantsSpent {
            username: username.to_string(),
            amount,
            resources: player.resources.clone(),
        }]))
    }
}

/// End-game victory points: card tables, military ranking, leftover goods
/// and venture rewards. `military_rank` counts players with strictly more
/// military points, so tied players share a position.
pub fn final_points(rules: &RulesConfig, player: &Player, military_rank: usize) -> i32 {
    fn table(values: &[i32], count: usize) -> i32 {
        values.get(count).or(values.last()).copied().unwrap_or(0)
    }

    let territories = table(&rules.territory_points, player.card_count(DevelopmentCardType::Territory));
    let characters = table(&rules.character_points, player.card_count(DevelopmentCardType::Character));
    let ventures: i32 = player
        .cards
        .get(&DevelopmentCardType::Venture)
        .map(|cards| {
            cards
                .iter()
                .map(|card| card.end_game.get(ResourceKind::VictoryPoints))
                .sum()
        })
        .unwrap_or(0);
    let military = if player.resources.get(ResourceKind::MilitaryPoints) > 0 {
        rules
            .military_ranking_points
            .get(military_rank)
            .copied()
            .unwrap_or(0)
    } else {
        0
    };
    let goods = if rules.goods_per_victory_point > 0 {
        player.resources.sum_of(&ResourceKind::GOODS) / rules.goods_per_victory_point
    } else {
        0
    };
    territories + characters + ventures + military + goods
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::board::COUNCIL_PALACE;
    use shared::cards::DevelopmentCard;

    fn scheduler_with(rules: RulesConfig) -> Scheduler {
        let mut data = StaticData::standard();
        data.rules = rules;
        let mut scheduler = Scheduler::new(Arc::new(data), Ledger::default(), 2, Some(7));
        scheduler.add_player("alice").unwrap();
        scheduler.add_player("bob").unwrap();
        scheduler
    }

    fn play_setup(scheduler: &mut Scheduler) -> Vec<PushEvent> {
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
                let applied = scheduler
                    .handle(&name, Command::ChooseLeaderCard { card_id })
                    .unwrap();
                events.extend(applied.events);
            }
        }
        events
    }

    fn current(scheduler: &Scheduler) -> String {
        scheduler.game().current_player().unwrap().username.clone()
    }

    fn end_turn(scheduler: &mut Scheduler) -> Vec<PushEvent> {
        let name = current(scheduler);
        scheduler.handle(&name, Command::EndTurn).unwrap().events
    }

    #[test]
    fn test_lobby_joining() {
        let mut scheduler = scheduler_with(RulesConfig::default());
        assert!(scheduler.is_full());
        assert_eq!(scheduler.add_player("carol"), Err(GameError::GameNotJoinable));

        let mut scheduler = Scheduler::new(Arc::new(StaticData::standard()), Ledger::default(), 4, None);
        scheduler.add_player("alice").unwrap();
        assert!(!scheduler.can_start());
        assert_eq!(
            scheduler.add_player("alice"),
            Err(GameError::LoginConflict("alice".to_string()))
        );
        assert!(scheduler.start_game().is_err());
    }

    #[test]
    fn test_setup_flow() {
        let mut scheduler = scheduler_with(RulesConfig::default());
        let events = play_setup(&mut scheduler);

        assert!(matches!(events[0], PushEvent::GameStarted { .. }));
        let order = scheduler.game().usernames();
        let first_choice = events
            .iter()
            .find_map(|e| match e {
                PushEvent::PersonalBonusTileChoice { username, .. } => Some(username.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(first_choice, order[1]);

        let game = scheduler.game();
        assert_eq!(game.phase, GamePhase::RoundInProgress);
        assert_eq!(game.round, 1);
        for player in &game.players {
            assert!(player.bonus_tile.is_some());
            assert_eq!(player.leader_hand.len(), 4);
            assert_eq!(player.family_members.len(), 4);
        }
        assert_ne!(
            game.players[0].bonus_tile.as_ref().unwrap().id,
            game.players[1].bonus_tile.as_ref().unwrap().id
        );
        assert_eq!(game.players[0].resources.get(ResourceKind::Coins), 5);
        assert_eq!(game.players[1].resources.get(ResourceKind::Coins), 6);
        assert_eq!(game.excommunications.len(), 3);

        let drawn = events
            .iter()
            .find_map(|e| match e {
                PushEvent::CardsDrawn { floors } => Some(floors.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(drawn.len(), 16);
        assert!(drawn.iter().all(|(_, card)| card.as_ref().map(|c| c.period) == Some(1)));

        let dice = events
            .iter()
            .find_map(|e| match e {
                PushEvent::DiceThrown { dice } => Some(*dice),
                _ => None,
            })
            .unwrap();
        for value in [dice.black, dice.white, dice.orange] {
            assert!((1..=6).contains(&value));
        }
        assert!(matches!(
            events.last(),
            Some(PushEvent::PlayerTurnStarted { turn: 1, .. })
        ));
    }

    #[test]
    fn test_wrong_phase_and_wrong_chooser() {
        let mut scheduler = scheduler_with(RulesConfig::default());
        assert_eq!(
            scheduler.handle("alice", Command::EndTurn),
            Err(GameError::ActionNotAllowed(ActionNotAllowed::WrongPhase))
        );
        scheduler.start_game().unwrap();
        let waiting = scheduler.game().usernames()[0].clone();
        let result = scheduler.handle(&waiting, Command::ChoosePersonalBonusTile { tile_id: 1 });
        assert_eq!(result, Err(GameError::ActionNotAllowed(ActionNotAllowed::NotYourTurn)));

        let chooser = scheduler.tile_chooser().unwrap().to_string();
        let result = scheduler.handle(&chooser, Command::ChoosePersonalBonusTile { tile_id: 99 });
        assert_eq!(
            result,
            Err(GameError::ActionNotAllowed(ActionNotAllowed::PersonalBonusTileNotAvailable))
        );
    }

    #[test]
    fn test_timeout_ends_turn() {
        let mut scheduler = scheduler_with(RulesConfig::default());
        play_setup(&mut scheduler);
        let order = scheduler.game().usernames();
        let generation = scheduler.generation();

        let events = scheduler.timeout(generation);
        assert_eq!(
            events,
            vec![
                PushEvent::TurnEnded {
                    username: order[0].clone(),
                    timed_out: true,
                },
                PushEvent::PlayerTurnStarted {
                    username: order[1].clone(),
                    turn: 2,
                },
            ]
        );
        let first = scheduler.game().player(&order[0]).unwrap();
        assert!(first.passed);
        assert_eq!(first.family_members.len(), 4);
        assert!(scheduler.game().board.spaces.values().all(|s| !s.is_occupied()));

        assert!(scheduler.timeout(generation).is_empty());
        assert_eq!(current(&scheduler), order[1]);
    }

    #[test]
    fn test_actions_rearm_timer() {
        let mut scheduler = scheduler_with(RulesConfig::default());
        play_setup(&mut scheduler);
        let name = current(&scheduler);
        let before = scheduler.generation();

        let applied = scheduler
            .handle(&name, Command::SpendServants { amount: 1 })
            .unwrap();
        assert!(matches!(applied.events[0], PushEvent::ServantsSpent { amount: 1, .. }));
        assert!(scheduler.generation() > before);
        assert!(scheduler.timeout(before).is_empty());

        let applied = scheduler
            .handle(
                &name,
                Command::GoToActionSpace {
                    space_id: Board::market_id(0),
                    color: FamilyMemberColor::Neutral,
                    privileges: vec![],
                },
            )
            .unwrap();
        assert_eq!(
            applied.reply,
            Reply::Obtained {
                resources: ResourceSet::new().with(ResourceKind::Coins, 5)
            }
        );
        assert!(matches!(
            applied.events[0],
            PushEvent::PlayerOccupiesActionSpace { space_id, .. } if space_id == Board::market_id(0)
        ));
    }

    #[test]
    fn test_floor_scenario_through_scheduler() {
        let mut scheduler = scheduler_with(RulesConfig::default());
        play_setup(&mut scheduler);
        let order = scheduler.game().usernames();
        let taken = Board::floor_id(DevelopmentCardType::Territory, 1);
        let adjacent = Board::floor_id(DevelopmentCardType::Territory, 0);
        for (floor, id) in [(taken, 900), (adjacent, 901)] {
            if let Some(space) = scheduler.game.board.space_mut(floor) {
                space.kind = ActionSpaceKind::Floor {
                    tower: DevelopmentCardType::Territory,
                    level: if floor == taken { 1 } else { 0 },
                    card: Some(DevelopmentCard::new(id, "Woods", DevelopmentCardType::Territory, 1)),
                };
            }
        }
        scheduler.game.dice.black = 4;

        let applied = scheduler
            .handle(
                &order[0],
                Command::GoToFloor {
                    floor_id: taken,
                    color: FamilyMemberColor::Black,
                    payment: 0,
                    privileges: vec![],
                },
            )
            .unwrap();
        assert!(matches!(applied.events[0], PushEvent::PlayerOccupiesFloor { card_id: 900, .. }));
        end_turn(&mut scheduler);

        scheduler.game.players[1].resources.set(ResourceKind::Coins, 2);
        let result = scheduler.handle(
            &order[1],
            Command::GoToFloor {
                floor_id: adjacent,
                color: FamilyMemberColor::Black,
                payment: 0,
                privileges: vec![],
            },
        );
        assert_eq!(
            result,
            Err(GameError::ActionNotAllowed(ActionNotAllowed::InsufficientResources))
        );
        assert!(!scheduler.game().board.space(adjacent).unwrap().is_occupied());
    }

    #[test]
    fn test_passing_ends_round() {
        let mut scheduler = scheduler_with(RulesConfig::default());
        play_setup(&mut scheduler);
        end_turn(&mut scheduler);
        let events = end_turn(&mut scheduler);

        assert!(events
            .iter()
            .any(|e| matches!(e, PushEvent::PrepareNewRound { round: 2, period: 1, .. })));
        assert_eq!(scheduler.game().round, 2);
        assert!(scheduler.game().players.iter().all(|p| !p.passed));
    }

    #[test]
    fn test_council_palace_sets_next_order() {
        let mut scheduler = scheduler_with(RulesConfig::default());
        play_setup(&mut scheduler);
        let order = scheduler.game().usernames();

        end_turn(&mut scheduler);
        scheduler
            .handle(
                &order[1],
                Command::GoToActionSpace {
                    space_id: COUNCIL_PALACE,
                    color: FamilyMemberColor::Orange,
                    privileges: vec![0],
                },
            )
            .unwrap();
        end_turn(&mut scheduler);
        // Second player placed, so the turn comes back to them.
        assert_eq!(current(&scheduler), order[1]);
        end_turn(&mut scheduler);

        assert_eq!(scheduler.game().round, 2);
        assert_eq!(scheduler.game().usernames(), vec![order[1].clone(), order[0].clone()]);
    }

    #[test]
    fn test_vatican_report_and_game_end() {
        let rules = RulesConfig {
            periods: 1,
            rounds_per_period: 1,
            ..RulesConfig::default()
        };
        let mut scheduler = scheduler_with(rules);
        play_setup(&mut scheduler);
        end_turn(&mut scheduler);
        let events = end_turn(&mut scheduler);

        let excommunicated = events
            .iter()
            .filter(|e| matches!(e, PushEvent::PlayerExcommunicated { period: 1, .. }))
            .count();
        assert_eq!(excommunicated, 2);
        assert!(matches!(events.last(), Some(PushEvent::GameEnd { .. })));
        assert_eq!(scheduler.phase(), GamePhase::GameEnded);
        for player in &scheduler.game().players {
            let last_update = events
                .iter()
                .rev()
                .find_map(|e| match e {
                    PushEvent::ResourcesUpdated { username, resources } if *username == player.username => {
                        Some(resources)
                    }
                    _ => None,
                })
                .unwrap();
            assert_eq!(last_update, &player.resources);
            assert!(player.is_excommunicated(1));
            assert!(player
                .effects
                .iter()
                .any(|e| e.source == EffectSource::Excommunication(1)));
        }

        let name = scheduler.game().usernames()[0].clone();
        assert_eq!(
            scheduler.handle(&name, Command::EndTurn),
            Err(GameError::ActionNotAllowed(ActionNotAllowed::WrongPhase))
        );
    }

    #[test]
    fn test_supporting_the_church() {
        let rules = RulesConfig {
            periods: 2,
            rounds_per_period: 1,
            ..RulesConfig::default()
        };
        let mut scheduler = scheduler_with(rules);
        play_setup(&mut scheduler);
        let order = scheduler.game().usernames();
        scheduler.game.players[0]
            .resources
            .set(ResourceKind::FaithPoints, 5);

        end_turn(&mut scheduler);
        let events = end_turn(&mut scheduler);
        assert!(events.iter().any(|e| matches!(
            e,
            PushEvent::VaticanReport { period: 1, pending } if pending == &vec![order[0].clone()]
        )));
        assert_eq!(scheduler.phase(), GamePhase::VaticanReport);

        let result = scheduler.handle(&order[1], Command::ChooseExcommunication { accept: false });
        assert_eq!(result, Err(GameError::ActionNotAllowed(ActionNotAllowed::NotYourTurn)));

        let vp_before = scheduler.game().players[0].resources.get(ResourceKind::VictoryPoints);
        let applied = scheduler
            .handle(&order[0], Command::ChooseExcommunication { accept: false })
            .unwrap();
        assert!(applied.events.contains(&PushEvent::ChurchSupported {
            username: order[0].clone(),
            period: 1,
            victory_points: 5,
        }));
        let supporter = scheduler.game().player(&order[0]).unwrap();
        assert_eq!(supporter.resources.get(ResourceKind::FaithPoints), 0);
        assert_eq!(supporter.resources.get(ResourceKind::VictoryPoints), vp_before + 5);
        assert!(applied.events.contains(&PushEvent::ResourcesUpdated {
            username: order[0].clone(),
            resources: supporter.resources.clone(),
        }));
        assert!(!supporter.is_excommunicated(1));
        assert_eq!(scheduler.game().round, 2);
        assert_eq!(scheduler.phase(), GamePhase::RoundInProgress);
    }

    #[test]
    fn test_vatican_timeout_supports_church() {
        let rules = RulesConfig {
            periods: 2,
            rounds_per_period: 1,
            ..RulesConfig::default()
        };
        let mut scheduler = scheduler_with(rules);
        play_setup(&mut scheduler);
        for player in scheduler.game.players.iter_mut() {
            player.resources.set(ResourceKind::FaithPoints, 4);
        }
        end_turn(&mut scheduler);
        end_turn(&mut scheduler);
        assert_eq!(scheduler.pending_report().len(), 2);

        let events = scheduler.timeout(scheduler.generation());
        let supported = events
            .iter()
            .filter(|e| matches!(e, PushEvent::ChurchSupported { victory_points: 4, .. }))
            .count();
        assert_eq!(supported, 2);
        assert_eq!(scheduler.game().round, 2);
    }

    #[test]
    fn test_disconnect_skips_current_turn() {
        let mut scheduler = scheduler_with(RulesConfig::default());
        play_setup(&mut scheduler);
        let order = scheduler.game().usernames();

        let events = scheduler.disconnect(&order[0]);
        assert_eq!(
            events[0],
            PushEvent::PlayerDisconnected {
                username: order[0].clone()
            }
        );
        assert!(events.contains(&PushEvent::TurnEnded {
            username: order[0].clone(),
            timed_out: true,
        }));
        assert_eq!(current(&scheduler), order[1]);
        assert_eq!(scheduler.connected_count(), 1);
        assert!(scheduler.disconnect(&order[0]).is_empty());
    }

    #[test]
    fn test_disconnect_during_setup_auto_chooses() {
        let mut scheduler = scheduler_with(RulesConfig::default());
        scheduler.start_game().unwrap();
        let chooser = scheduler.tile_chooser().unwrap().to_string();
        let events = scheduler.disconnect(&chooser);
        assert!(events
            .iter()
            .any(|e| matches!(e, PushEvent::PersonalBonusTileChosen { username, .. } if *username == chooser)));
        assert_ne!(scheduler.tile_chooser(), Some(chooser.as_str()));
    }

    #[test]
    fn test_abort() {
        let mut scheduler = scheduler_with(RulesConfig::default());
        play_setup(&mut scheduler);
        let events = scheduler.abort("corrupted board");
        assert_eq!(
            events,
            vec![PushEvent::AbortGame {
                reason: "corrupted board".to_string()
            }]
        );
        assert_eq!(scheduler.phase(), GamePhase::Aborted);
    }

    #[test]
    fn test_final_points() {
        let rules = RulesConfig::default();
        let mut player = Player::new("alice", PlayerColor::Green);
        player.resources = ResourceSet::new()
            .with(ResourceKind::Coins, 7)
            .with(ResourceKind::Wood, 3)
            .with(ResourceKind::MilitaryPoints, 4);
        player.cards.insert(
            DevelopmentCardType::Character,
            vec![
                DevelopmentCard::new(1, "Herald", DevelopmentCardType::Character, 1),
                DevelopmentCard::new(2, "Knight", DevelopmentCardType::Character, 1),
            ],
        );
        player.cards.insert(
            DevelopmentCardType::Venture,
            vec![DevelopmentCard::new(3, "Crusade", DevelopmentCardType::Venture, 1)
                .with_end_game(ResourceSet::new().with(ResourceKind::VictoryPoints, 4))],
        );

        // characters 3 + venture 4 + first in military 5 + 10 goods / 5
        assert_eq!(final_points(&rules, &player, 0), 14);
        assert_eq!(final_points(&rules, &player, 1), 11);
        assert_eq!(final_points(&rules, &player, 3), 9);
    }
}
