//! Canonical game state shared between the authoritative server and the
//! client mirrors. Only the server mutates it; clients receive snapshots
//! and push events.

use crate::board::{Board, FamilyMemberColor};
use crate::cards::{
    CardId, DevelopmentCard, DevelopmentCardType, EffectDef, Excommunication, LeaderCard,
    PersonalBonusTile,
};
use crate::resources::{ResourceKind, ResourceSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Rule constants. Loaded with the static data; every field has the
/// standard board-game value as its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub periods: u8,
    pub rounds_per_period: u32,
    /// Faith points needed to avoid excommunication, one entry per period.
    pub faith_thresholds: Vec<i32>,
    /// Victory points for supporting the church, indexed by faith points.
    pub faith_track_points: Vec<i32>,
    pub tower_surcharge: ResourceSet,
    pub max_cards_per_type: usize,
    /// Military points needed to take the n-th territory (index = owned count).
    pub territory_military_requirements: Vec<i32>,
    /// End-game victory points indexed by the number of owned cards.
    pub territory_points: Vec<i32>,
    pub character_points: Vec<i32>,
    pub military_ranking_points: Vec<i32>,
    pub goods_per_victory_point: i32,
    pub leader_draft_size: usize,
    pub starting_resources: ResourceSet,
    /// Starting coins by position in the first turn order.
    pub starting_coins: Vec<i32>,
    pub die_faces: i32,
}

impl Default for RulesConfig {
    fn default() -> Self {
        use ResourceKind::*;
        Self {
            periods: 3,
            rounds_per_period: 2,
            faith_thresholds: vec![3, 4, 5],
            faith_track_points: vec![0, 1, 2, 3, 4, 5, 7, 9, 11, 13, 15, 17, 19, 22, 25, 30],
            tower_surcharge: ResourceSet::new().with(Coins, 3),
            max_cards_per_type: 6,
            territory_military_requirements: vec![0, 0, 3, 7, 12, 18],
            territory_points: vec![0, 0, 0, 1, 4, 10, 20],
            character_points: vec![0, 1, 3, 6, 10, 15, 21],
            military_ranking_points: vec![5, 2],
            goods_per_victory_point: 5,
            leader_draft_size: 4,
            starting_resources: ResourceSet::new().with(Wood, 2).with(Stone, 2).with(Servants, 3),
            starting_coins: vec![5, 6, 7, 8],
            die_faces: 6,
        }
    }
}

impl RulesConfig {
    pub fn max_rounds(&self) -> u32 {
        self.periods as u32 * self.rounds_per_period
    }

    pub fn faith_threshold(&self, period: u8) -> i32 {
        self.faith_thresholds
            .get(period.saturating_sub(1) as usize)
            .copied()
            .unwrap_or(0)
    }

    pub fn faith_points_value(&self, faith: i32) -> i32 {
        let index = faith.max(0) as usize;
        self.faith_track_points
            .get(index)
            .or(self.faith_track_points.last())
            .copied()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GamePhase {
    Lobby,
    ChoosingBonusTiles,
    ChoosingLeaders,
    RoundInProgress,
    VaticanReport,
    GameEnded,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerColor {
    Green,
    Blue,
    Yellow,
    Red,
}

impl PlayerColor {
    pub const ALL: [PlayerColor; 4] = [
        PlayerColor::Green,
        PlayerColor::Blue,
        PlayerColor::Yellow,
        PlayerColor::Red,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectSource {
    DevelopmentCard(CardId),
    Leader(CardId),
    Excommunication(u8),
}

/// An effect attached to a player together with its activation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectInstance {
    pub def: EffectDef,
    pub source: EffectSource,
    /// Production/harvest value needed for the effect to fire, if any.
    pub activation_value: Option<i32>,
    pub activated_turn: Option<u32>,
    pub activated_round: Option<u32>,
}

impl EffectInstance {
    pub fn new(def: EffectDef, source: EffectSource) -> Self {
        Self {
            def,
            source,
            activation_value: None,
            activated_turn: None,
            activated_round: None,
        }
    }

    pub fn is_already_activated(&self, round: u32) -> bool {
        self.activated_round == Some(round)
    }

    pub fn mark_activated(&mut self, round: u32) {
        self.activated_round = Some(round);
    }

    pub fn is_already_activated_in_turn(&self, turn: u32) -> bool {
        self.activated_turn == Some(turn)
    }

    pub fn mark_activated_in_turn(&mut self, turn: u32) {
        self.activated_turn = Some(turn);
    }
}

/// Effects in attachment order. The order is the application order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectsContainer {
    pub effects: Vec<EffectInstance>,
}

impl EffectsContainer {
    pub fn attach<I>(&mut self, defs: I, source: EffectSource, activation_value: Option<i32>)
    where
        I: IntoIterator<Item = EffectDef>,
    {
        for def in defs {
            let mut instance = EffectInstance::new(def, source);
            instance.activation_value = activation_value;
            self.effects.push(instance);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &EffectInstance> {
        self.effects.iter()
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub username: String,
    pub color: PlayerColor,
    pub resources: ResourceSet,
    pub leader_hand: Vec<LeaderCard>,
    pub leaders_played: Vec<LeaderCard>,
    pub cards: BTreeMap<DevelopmentCardType, Vec<DevelopmentCard>>,
    /// Family members not yet placed this round.
    pub family_members: Vec<FamilyMemberColor>,
    pub bonus_tile: Option<PersonalBonusTile>,
    /// Value added by servants spent during the current turn.
    pub servant_bonus: i32,
    pub excommunications: Vec<u8>,
    pub effects: EffectsContainer,
    pub placed_this_turn: bool,
    /// Gave up the remaining placements of the round.
    pub passed: bool,
    pub connected: bool,
}

impl Player {
    pub fn new(username: impl Into<String>, color: PlayerColor) -> Self {
        Self {
            username: username.into(),
            color,
            resources: ResourceSet::new(),
            leader_hand: Vec::new(),
            leaders_played: Vec::new(),
            cards: BTreeMap::new(),
            family_members: Vec::new(),
            bonus_tile: None,
            servant_bonus: 0,
            excommunications: Vec::new(),
            effects: EffectsContainer::default(),
            placed_this_turn: false,
            passed: false,
            connected: true,
        }
    }

    pub fn card_count(&self, card_type: DevelopmentCardType) -> usize {
        self.cards.get(&card_type).map(Vec::len).unwrap_or(0)
    }

    pub fn card_counts(&self) -> BTreeMap<DevelopmentCardType, u32> {
        DevelopmentCardType::ALL
            .iter()
            .map(|t| (*t, self.card_count(*t) as u32))
            .collect()
    }

    pub fn has_family_member(&self, color: FamilyMemberColor) -> bool {
        self.family_members.contains(&color)
    }

    /// Whether the player still takes turns in the current round.
    pub fn can_act(&self) -> bool {
        self.connected && !self.passed && !self.family_members.is_empty()
    }

    pub fn is_excommunicated(&self, period: u8) -> bool {
        self.excommunications.contains(&period)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dice {
    pub black: i32,
    pub white: i32,
    pub orange: i32,
}

impl Dice {
    pub fn value(&self, color: FamilyMemberColor) -> i32 {
        match color {
            FamilyMemberColor::Black => self.black,
            FamilyMemberColor::White => self.white,
            FamilyMemberColor::Orange => self.orange,
            FamilyMemberColor::Neutral => 0,
        }
    }
}

pub type Deck = BTreeMap<DevelopmentCardType, VecDeque<DevelopmentCard>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub phase: GamePhase,
    pub rules: RulesConfig,
    /// Players in turn order.
    pub players: Vec<Player>,
    pub round: u32,
    /// Monotonic counter of player turns across the game.
    pub turn: u32,
    pub current: Option<usize>,
    pub board: Board,
    /// Remaining development cards, one deck per period.
    pub decks: Vec<Deck>,
    /// Excommunication tile in play for each period.
    pub excommunications: Vec<Excommunication>,
    pub dice: Dice,
    pub started: bool,
    pub ended: bool,
}

impl Game {
    pub fn new(rules: RulesConfig) -> Self {
        Self {
            phase: GamePhase::Lobby,
            rules,
            players: Vec::new(),
            round: 0,
            turn: 0,
            current: None,
            board: Board::standard(0),
            decks: Vec::new(),
            excommunications: Vec::new(),
            dice: Dice::default(),
            started: false,
            ended: false,
        }
    }

    pub fn player(&self, username: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.username == username)
    }

    pub fn player_mut(&mut self, username: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.username == username)
    }

    pub fn player_index(&self, username: &str) -> Option<usize> {
        self.players.iter().position(|p| p.username == username)
    }

    pub fn current_player(&self) -> Option<&Player> {
        self.current.and_then(|index| self.players.get(index))
    }

    pub fn is_current(&self, username: &str) -> bool {
        self.current_player()
            .map(|p| p.username == username)
            .unwrap_or(false)
    }

    pub fn usernames(&self) -> Vec<String> {
        self.players.iter().map(|p| p.username.clone()).collect()
    }

    pub fn period(&self) -> u8 {
        if self.round == 0 {
            return 1;
        }
        ((self.round - 1) / self.rules.rounds_per_period.max(1) + 1) as u8
    }

    pub fn is_period_end(&self) -> bool {
        self.round > 0 && self.round % self.rules.rounds_per_period.max(1) == 0
    }

    pub fn excommunication(&self, period: u8) -> Option<&Excommunication> {
        self.excommunications.iter().find(|e| e.period == period)
    }

    pub fn is_last_round(&self) -> bool {
        self.round >= self.rules.max_rounds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_is_derived_from_round() {
        let mut game = Game::new(RulesConfig::default());
        assert_eq!(game.period(), 1);
        game.round = 2;
        assert_eq!(game.period(), 1);
        assert!(game.is_period_end());
        game.round = 3;
        assert_eq!(game.period(), 2);
        assert!(!game.is_period_end());
        game.round = 6;
        assert_eq!(game.period(), 3);
        assert!(game.is_last_round());
    }

    #[test]
    fn test_once_per_round_activation() {
        let def = EffectDef::NoTowerSurcharge;
        let mut instance = EffectInstance::new(def, EffectSource::Leader(1));
        for round in 1..=6 {
            assert!(!instance.is_already_activated(round));
            instance.mark_activated(round);
            assert!(instance.is_already_activated(round));
            assert!(!instance.is_already_activated(round + 1));
        }
    }

    #[test]
    fn test_player_can_act() {
        let mut player = Player::new("alice", PlayerColor::Green);
        assert!(!player.can_act());
        player.family_members = vec![FamilyMemberColor::Black];
        assert!(player.can_act());
        player.passed = true;
        assert!(!player.can_act());
        player.passed = false;
        player.connected = false;
        assert!(!player.can_act());
    }

    #[test]
    fn test_rules_lookups() {
        let rules = RulesConfig::default();
        assert_eq!(rules.max_rounds(), 6);
        assert_eq!(rules.faith_threshold(1), 3);
        assert_eq!(rules.faith_threshold(3), 5);
        assert_eq!(rules.faith_points_value(0), 0);
        assert_eq!(rules.faith_points_value(6), 7);
        assert_eq!(rules.faith_points_value(99), 30);
    }

    #[test]
    fn test_dice_value_by_color() {
        let dice = Dice {
            black: 4,
            white: 2,
            orange: 6,
        };
        assert_eq!(dice.value(FamilyMemberColor::Black), 4);
        assert_eq!(dice.value(FamilyMemberColor::Orange), 6);
        assert_eq!(dice.value(FamilyMemberColor::Neutral), 0);
    }
}
