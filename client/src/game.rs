use log::debug;
use shared::board::{ActionSpaceKind, FamilyMemberColor, Occupant};
use shared::cards::{LeaderCard, PersonalBonusTile};
use shared::resources::ResourceSet;
use shared::state::{Game, GamePhase, Player};
use shared::PushEvent;

/// Local mirror of a room, kept in sync by applying pushes in order.
#[derive(Debug, Clone, Default)]
pub struct ClientGameState {
    pub username: Option<String>,
    pub room_id: Option<u32>,
    /// Lobby members before the game starts.
    pub lobby: Vec<String>,
    pub game: Option<Game>,
    /// Tiles offered with the last bonus tile prompt.
    pub offered_tiles: Vec<PersonalBonusTile>,
    /// Our own leader draft hand.
    pub draft_hand: Vec<LeaderCard>,
    pub vatican_pending: Vec<String>,
    pub ranking: Option<Vec<(String, i32)>>,
    pub aborted: Option<String>,
}

impl ClientGameState {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Self::default()
        }
    }

    pub fn me(&self) -> Option<&Player> {
        let username = self.username.as_deref()?;
        self.game.as_ref()?.player(username)
    }

    pub fn is_my_turn(&self) -> bool {
        match (&self.game, &self.username) {
            (Some(game), Some(username)) => game.is_current(username),
            _ => false,
        }
    }

    pub fn phase(&self) -> GamePhase {
        self.game.as_ref().map_or(GamePhase::Lobby, |game| game.phase)
    }

    fn is_me(&self, username: &str) -> bool {
        self.username.as_deref() == Some(username)
    }

    fn set_resources(&mut self, username: &str, resources: &ResourceSet) {
        if let Some(player) = self.game.as_mut().and_then(|g| g.player_mut(username)) {
            player.resources = resources.clone();
        }
    }

    pub fn apply(&mut self, event: &PushEvent) {
        debug!("Applying {}", event.name());
        match event {
            PushEvent::PlayerJoined { room_id, players, .. } => {
                self.room_id = Some(*room_id);
                self.lobby = players.clone();
            }
            PushEvent::GameStarted { game } => {
                self.game = Some(game.as_ref().clone());
            }
            PushEvent::PersonalBonusTileChoice { available, .. } => {
                self.offered_tiles = available.clone();
            }
            PushEvent::PersonalBonusTileChosen { username, tile_id } => {
                let tile = self.offered_tiles.iter().find(|t| t.id == *tile_id).cloned();
                self.offered_tiles.retain(|t| t.id != *tile_id);
                if let Some(player) = self.game.as_mut().and_then(|g| g.player_mut(username)) {
                    player.bonus_tile = tile;
                }
            }
            PushEvent::LeaderDraft { username, hand } => {
                if let Some(game) = self.game.as_mut() {
                    game.phase = GamePhase::ChoosingLeaders;
                }
                if self.is_me(username) {
                    self.draft_hand = hand.clone();
                }
            }
            PushEvent::LeaderCardChosen { username, card_id } => {
                if !self.is_me(username) {
                    return;
                }
                let card = self.draft_hand.iter().position(|c| c.id == *card_id);
                if let Some(card) = card.map(|index| self.draft_hand.remove(index)) {
                    if let Some(player) = self.game.as_mut().and_then(|g| g.player_mut(username)) {
                        player.leader_hand.push(card);
                    }
                }
            }
            PushEvent::CardsDrawn { floors } => {
                let Some(game) = self.game.as_mut() else { return };
                for (floor_id, drawn) in floors {
                    if let Some(space) = game.board.space_mut(*floor_id) {
                        if let ActionSpaceKind::Floor { card, .. } = &mut space.kind {
                            *card = drawn.clone();
                        }
                    }
                }
            }
            PushEvent::DiceThrown { dice } => {
                if let Some(game) = self.game.as_mut() {
                    game.dice = *dice;
                }
            }
            PushEvent::PrepareNewRound {
                round,
                turn_order,
                ..
            } => {
                let Some(game) = self.game.as_mut() else { return };
                game.phase = GamePhase::RoundInProgress;
                game.round = *round;
                game.current = None;
                game.board.clear_occupants();
                game.players
                    .sort_by_key(|p| turn_order.iter().position(|name| *name == p.username));
                for player in &mut game.players {
                    player.passed = false;
                    player.family_members = FamilyMemberColor::ALL.to_vec();
                }
            }
            PushEvent::PlayerTurnStarted { username, turn } => {
                if let Some(game) = self.game.as_mut() {
                    game.turn = *turn;
                    game.current = game.player_index(username);
                }
            }
            PushEvent::TurnEnded { .. } => {
                if let Some(game) = self.game.as_mut() {
                    game.current = None;
                }
            }
            PushEvent::ServantsSpent {
                username,
                resources,
                ..
            }
            | PushEvent::ResourcesUpdated {
                username,
                resources,
            } => self.set_resources(username, resources),
            PushEvent::PlayerOccupiesActionSpace {
                username,
                space_id,
                color,
                resources,
                ..
            } => {
                let Some(game) = self.game.as_mut() else { return };
                if let Some(space) = game.board.space_mut(*space_id) {
                    space.occupants.push(Occupant {
                        username: username.clone(),
                        color: *color,
                    });
                }
                if let Some(player) = game.player_mut(username) {
                    player.family_members.retain(|c| c != color);
                    player.resources = resources.clone();
                }
            }
            PushEvent::PlayerOccupiesFloor {
                username,
                floor_id,
                color,
                resources,
                ..
            } => {
                let Some(game) = self.game.as_mut() else { return };
                let mut taken = None;
                if let Some(space) = game.board.space_mut(*floor_id) {
                    space.occupants.push(Occupant {
                        username: username.clone(),
                        color: *color,
                    });
                    if let ActionSpaceKind::Floor { card, .. } = &mut space.kind {
                        taken = card.take();
                    }
                }
                if let Some(player) = game.player_mut(username) {
                    player.family_members.retain(|c| c != color);
                    player.resources = resources.clone();
                    if let Some(card) = taken {
                        player.cards.entry(card.card_type).or_default().push(card);
                    }
                }
            }
            PushEvent::LeaderCardPlayed {
                username,
                card_id,
                resources,
                ..
            } => {
                let Some(player) = self.game.as_mut().and_then(|g| g.player_mut(username)) else {
                    return;
                };
                if let Some(index) = player.leader_hand.iter().position(|c| c.id == *card_id) {
                    let card = player.leader_hand.remove(index);
                    player.leaders_played.push(card);
                }
                player.resources = resources.clone();
            }
            PushEvent::LeaderCardDiscarded {
                username,
                card_id,
                resources,
                ..
            } => {
                let Some(player) = self.game.as_mut().and_then(|g| g.player_mut(username)) else {
                    return;
                };
                player.leader_hand.retain(|c| c.id != *card_id);
                player.resources = resources.clone();
            }
            PushEvent::VaticanReport { pending, .. } => {
                if let Some(game) = self.game.as_mut() {
                    game.phase = GamePhase::VaticanReport;
                    game.current = None;
                }
                self.vatican_pending = pending.clone();
            }
            PushEvent::PlayerExcommunicated { username, period } => {
                self.vatican_pending.retain(|name| name != username);
                if let Some(player) = self.game.as_mut().and_then(|g| g.player_mut(username)) {
                    player.excommunications.push(*period);
                }
            }
            PushEvent::ChurchSupported { username, .. } => {
                self.vatican_pending.retain(|name| name != username);
            }
            PushEvent::PlayerDisconnected { username } => {
                self.lobby.retain(|name| name != username);
                if let Some(player) = self.game.as_mut().and_then(|g| g.player_mut(username)) {
                    player.connected = false;
                }
            }
            PushEvent::GameEnd { ranking } => {
                if let Some(game) = self.game.as_mut() {
                    game.phase = GamePhase::GameEnded;
                    game.ended = true;
                }
                self.ranking = Some(ranking.clone());
            }
            PushEvent::AbortGame { reason } => {
                if let Some(game) = self.game.as_mut() {
                    game.phase = GamePhase::Aborted;
                    game.ended = true;
                }
                self.aborted = Some(reason.clone());
            }
            PushEvent::Ping { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::board::{Board, COUNCIL_PALACE};
    use shared::cards::{DevelopmentCard, DevelopmentCardType};
    use shared::resources::ResourceKind;
    use shared::state::{PlayerColor, RulesConfig};

    fn started() -> ClientGameState {
        let mut game = Game::new(RulesConfig::default());
        game.board = Board::standard(2);
        game.phase = GamePhase::ChoosingBonusTiles;
        game.players.push(Player::new("alice", PlayerColor::Blue));
        game.players.push(Player::new("bob", PlayerColor::Green));
        for player in &mut game.players {
            player.family_members = FamilyMemberColor::ALL.to_vec();
        }
        let mut state = ClientGameState::new("alice");
        state.apply(&PushEvent::GameStarted { game: Box::new(game) });
        state
    }

    #[test]
    fn test_lobby_events() {
        let mut state = ClientGameState::new("alice");
        state.apply(&PushEvent::PlayerJoined {
            room_id: 3,
            username: "bob".to_string(),
            players: vec!["alice".to_string(), "bob".to_string()],
        });
        assert_eq!(state.room_id, Some(3));
        assert_eq!(state.lobby.len(), 2);

        state.apply(&PushEvent::PlayerDisconnected {
            username: "bob".to_string(),
        });
        assert_eq!(state.lobby, vec!["alice".to_string()]);
        assert_eq!(state.phase(), GamePhase::Lobby);
    }

    #[test]
    fn test_round_and_turn_tracking() {
        let mut state = started();
        state.apply(&PushEvent::PrepareNewRound {
            round: 1,
            period: 1,
            turn_order: vec!["bob".to_string(), "alice".to_string()],
        });
        state.apply(&PushEvent::PlayerTurnStarted {
            username: "alice".to_string(),
            turn: 2,
        });

        let game = state.game.as_ref().unwrap();
        assert_eq!(game.phase, GamePhase::RoundInProgress);
        assert_eq!(game.players[0].username, "bob");
        assert!(state.is_my_turn());
    }

    #[test]
    fn test_floor_occupation_moves_card() {
        let mut state = started();
        let floor_id = Board::floor_id(DevelopmentCardType::Building, 0);
        let card = DevelopmentCard::new(5, "Chapel", DevelopmentCardType::Building, 1);
        state.apply(&PushEvent::CardsDrawn {
            floors: vec![(floor_id, Some(card.clone()))],
        });
        let resources = ResourceSet::new().with(ResourceKind::Coins, 3);
        state.apply(&PushEvent::PlayerOccupiesFloor {
            username: "alice".to_string(),
            floor_id,
            color: FamilyMemberColor::Black,
            card_id: card.id,
            paid: ResourceSet::new(),
            obtained: ResourceSet::new(),
            resources: resources.clone(),
        });

        let game = state.game.as_ref().unwrap();
        let space = game.board.space(floor_id).unwrap();
        assert!(space.card().is_none());
        assert_eq!(space.occupants.len(), 1);
        let me = state.me().unwrap();
        assert_eq!(me.card_count(DevelopmentCardType::Building), 1);
        assert!(!me.has_family_member(FamilyMemberColor::Black));
        assert_eq!(me.resources, resources);
    }

    #[test]
    fn test_action_space_and_resources() {
        let mut state = started();
        state.apply(&PushEvent::PlayerOccupiesActionSpace {
            username: "bob".to_string(),
            space_id: COUNCIL_PALACE,
            color: FamilyMemberColor::Neutral,
            obtained: ResourceSet::new().with(ResourceKind::Coins, 1),
            resources: ResourceSet::new().with(ResourceKind::Coins, 6),
        });
        let game = state.game.as_ref().unwrap();
        assert_eq!(game.board.space(COUNCIL_PALACE).unwrap().occupants[0].username, "bob");
        assert_eq!(game.player("bob").unwrap().resources.get(ResourceKind::Coins), 6);
    }

    #[test]
    fn test_vatican_and_game_end() {
        let mut state = started();
        state.apply(&PushEvent::VaticanReport {
            period: 1,
            pending: vec!["alice".to_string(), "bob".to_string()],
        });
        assert_eq!(state.phase(), GamePhase::VaticanReport);
        state.apply(&PushEvent::PlayerExcommunicated {
            username: "alice".to_string(),
            period: 1,
        });
        state.apply(&PushEvent::ChurchSupported {
            username: "bob".to_string(),
            period: 1,
            victory_points: 2,
        });
        state.apply(&PushEvent::ResourcesUpdated {
            username: "bob".to_string(),
            resources: ResourceSet::new().with(ResourceKind::VictoryPoints, 2),
        });
        assert!(state.vatican_pending.is_empty());
        assert!(state.me().unwrap().is_excommunicated(1));
        let bob = state.game.as_ref().unwrap().player("bob").unwrap();
        assert_eq!(bob.resources.get(ResourceKind::VictoryPoints), 2);
        assert_eq!(bob.resources.get(ResourceKind::FaithPoints), 0);

        state.apply(&PushEvent::GameEnd {
            ranking: vec![("bob".to_string(), 12), ("alice".to_string(), 7)],
        });
        assert_eq!(state.phase(), GamePhase::GameEnded);
        assert_eq!(state.ranking.as_ref().unwrap()[0].0, "bob");
    }
}
