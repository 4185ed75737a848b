//! Static card definitions: development cards, leader cards,
//! excommunication tiles, personal bonus tiles and the effects they carry.

use crate::board::{ActionSpaceKind, FamilyMemberColor};
use crate::resources::{ResourceKind, ResourceSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type CardId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DevelopmentCardType {
    Territory,
    Character,
    Building,
    Venture,
}

impl DevelopmentCardType {
    pub const ALL: [DevelopmentCardType; 4] = [
        DevelopmentCardType::Territory,
        DevelopmentCardType::Character,
        DevelopmentCardType::Building,
        DevelopmentCardType::Venture,
    ];
}

impl fmt::Display for DevelopmentCardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DevelopmentCardType::Territory => "territory",
            DevelopmentCardType::Character => "character",
            DevelopmentCardType::Building => "building",
            DevelopmentCardType::Venture => "venture",
        };
        f.write_str(name)
    }
}

/// Moments at which the effect engine runs a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectTrigger {
    CardTaken,
    Production,
    Harvest,
    Excommunication,
    EndOfRound,
    RoundStart,
    LeaderPlayed,
    Discard,
}

/// Which action spaces a modifier applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpaceTarget {
    Any,
    Tower(DevelopmentCardType),
    AnyTower,
    Production,
    Harvest,
    Market,
    CouncilPalace,
}

impl SpaceTarget {
    pub fn matches(&self, kind: &ActionSpaceKind) -> bool {
        match (self, kind) {
            (SpaceTarget::Any, _) => true,
            (SpaceTarget::AnyTower, ActionSpaceKind::Floor { .. }) => true,
            (SpaceTarget::Tower(wanted), ActionSpaceKind::Floor { tower, .. }) => wanted == tower,
            (SpaceTarget::Production, ActionSpaceKind::Production { .. }) => true,
            (SpaceTarget::Harvest, ActionSpaceKind::Harvest { .. }) => true,
            (SpaceTarget::Market, ActionSpaceKind::Market { .. }) => true,
            (SpaceTarget::CouncilPalace, ActionSpaceKind::CouncilPalace) => true,
            _ => false,
        }
    }
}

/// A single card or tile effect.
///
/// Triggered variants (`Gain`, `Multiplier`, `PerCard`, `DiscardBonus`)
/// produce resources when the engine runs their trigger. The remaining
/// variants are standing modifiers that resolution queries directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectDef {
    Gain {
        trigger: EffectTrigger,
        resources: ResourceSet,
    },
    /// `gain` once for every full `step` of `per` above `above`.
    Multiplier {
        trigger: EffectTrigger,
        per: ResourceKind,
        step: i32,
        above: i32,
        gain: ResourceSet,
    },
    /// `gain` once for every owned card of `card_type`.
    PerCard {
        trigger: EffectTrigger,
        card_type: DevelopmentCardType,
        gain: ResourceSet,
    },
    OncePerTurn(Box<EffectDef>),
    OncePerRound(Box<EffectDef>),
    DiscardBonus {
        resources: ResourceSet,
    },
    FamilyValue {
        color: Option<FamilyMemberColor>,
        target: SpaceTarget,
        delta: i32,
    },
    /// Applied to every gain of `kind` (an excommunication malus when negative).
    GainModifier {
        kind: ResourceKind,
        delta: i32,
    },
    IgnoreValueRequirement {
        target: SpaceTarget,
    },
    MultipleOccupancy,
    NoTowerSurcharge,
    NoFloorBonus,
}

impl EffectDef {
    pub fn gain(trigger: EffectTrigger, resources: ResourceSet) -> Self {
        EffectDef::Gain { trigger, resources }
    }

    pub fn once_per_round(inner: EffectDef) -> Self {
        EffectDef::OncePerRound(Box::new(inner))
    }

    pub fn once_per_turn(inner: EffectDef) -> Self {
        EffectDef::OncePerTurn(Box::new(inner))
    }

    /// Trigger of the innermost effect, if it is a triggered one.
    pub fn trigger(&self) -> Option<EffectTrigger> {
        match self {
            EffectDef::Gain { trigger, .. }
            | EffectDef::Multiplier { trigger, .. }
            | EffectDef::PerCard { trigger, .. } => Some(*trigger),
            EffectDef::DiscardBonus { .. } => Some(EffectTrigger::Discard),
            EffectDef::OncePerTurn(inner) | EffectDef::OncePerRound(inner) => inner.trigger(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImmediateAction {
    Harvest { value: i32 },
    Production { value: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevelopmentCard {
    pub id: CardId,
    pub name: String,
    pub card_type: DevelopmentCardType,
    pub period: u8,
    /// Alternative prices; an empty list means the card is free.
    pub cost: Vec<ResourceSet>,
    pub immediate: ResourceSet,
    pub immediate_action: Option<ImmediateAction>,
    /// Minimum production/harvest value that activates the card's effects.
    pub activation_value: i32,
    pub effects: Vec<EffectDef>,
    /// Victory points and the like scored at game end (ventures).
    pub end_game: ResourceSet,
}

impl DevelopmentCard {
    pub fn new(id: CardId, name: impl Into<String>, card_type: DevelopmentCardType, period: u8) -> Self {
        Self {
            id,
            name: name.into(),
            card_type,
            period,
            cost: Vec::new(),
            immediate: ResourceSet::new(),
            immediate_action: None,
            activation_value: 0,
            effects: Vec::new(),
            end_game: ResourceSet::new(),
        }
    }

    pub fn with_cost(mut self, cost: ResourceSet) -> Self {
        self.cost.push(cost);
        self
    }

    pub fn with_immediate(mut self, immediate: ResourceSet) -> Self {
        self.immediate = immediate;
        self
    }

    pub fn with_immediate_action(mut self, action: ImmediateAction) -> Self {
        self.immediate_action = Some(action);
        self
    }

    pub fn with_activation(mut self, value: i32) -> Self {
        self.activation_value = value;
        self
    }

    pub fn with_effect(mut self, effect: EffectDef) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_end_game(mut self, end_game: ResourceSet) -> Self {
        self.end_game = end_game;
        self
    }
}

/// One alternative requirement to play a leader card. Nothing is paid;
/// the player only has to hold the resources and cards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderRequirement {
    pub resources: ResourceSet,
    pub cards: BTreeMap<DevelopmentCardType, u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderCard {
    pub id: CardId,
    pub name: String,
    pub requirements: Vec<LeaderRequirement>,
    pub effects: Vec<EffectDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Excommunication {
    pub id: u32,
    pub period: u8,
    pub effects: Vec<EffectDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalBonusTile {
    pub id: u32,
    pub production: ResourceSet,
    pub harvest: ResourceSet,
}
