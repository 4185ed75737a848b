//! Board layout: action spaces, towers and their floors.

use crate::cards::{DevelopmentCard, DevelopmentCardType};
use crate::resources::{ResourceKind, ResourceSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type ActionSpaceId = u32;

pub const COUNCIL_PALACE: ActionSpaceId = 30;
pub const SMALL_PRODUCTION: ActionSpaceId = 40;
pub const LARGE_PRODUCTION: ActionSpaceId = 41;
pub const SMALL_HARVEST: ActionSpaceId = 50;
pub const LARGE_HARVEST: ActionSpaceId = 51;
pub const FLOORS_PER_TOWER: u8 = 4;

const MARKET_BASE: ActionSpaceId = 20;
const FLOOR_VALUES: [i32; 4] = [1, 3, 5, 7];
const LARGE_AREA_MALUS: i32 = -3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FamilyMemberColor {
    Black,
    White,
    Orange,
    Neutral,
}

impl FamilyMemberColor {
    pub const ALL: [FamilyMemberColor; 4] = [
        FamilyMemberColor::Black,
        FamilyMemberColor::White,
        FamilyMemberColor::Orange,
        FamilyMemberColor::Neutral,
    ];

    pub fn is_neutral(self) -> bool {
        self == FamilyMemberColor::Neutral
    }
}

impl fmt::Display for FamilyMemberColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FamilyMemberColor::Black => "black",
            FamilyMemberColor::White => "white",
            FamilyMemberColor::Orange => "orange",
            FamilyMemberColor::Neutral => "neutral",
        };
        f.write_str(name)
    }
}

/// Kind-specific data of an action space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionSpaceKind {
    Market { slot: u8 },
    CouncilPalace,
    Production { large: bool },
    Harvest { large: bool },
    Floor {
        tower: DevelopmentCardType,
        level: u8,
        card: Option<DevelopmentCard>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupant {
    pub username: String,
    pub color: FamilyMemberColor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpace {
    pub id: ActionSpaceId,
    pub kind: ActionSpaceKind,
    pub enabled: bool,
    pub occupants: Vec<Occupant>,
    pub bonus: ResourceSet,
    pub required_value: i32,
    /// Added to the family member's value (the large areas carry a malus).
    pub value_modifier: i32,
    pub single_occupant: bool,
}

impl ActionSpace {
    fn new(id: ActionSpaceId, kind: ActionSpaceKind, required_value: i32) -> Self {
        Self {
            id,
            kind,
            enabled: true,
            occupants: Vec::new(),
            bonus: ResourceSet::new(),
            required_value,
            value_modifier: 0,
            single_occupant: true,
        }
    }

    pub fn is_occupied(&self) -> bool {
        !self.occupants.is_empty()
    }

    pub fn is_floor(&self) -> bool {
        matches!(self.kind, ActionSpaceKind::Floor { .. })
    }

    pub fn card(&self) -> Option<&DevelopmentCard> {
        match &self.kind {
            ActionSpaceKind::Floor { card, .. } => card.as_ref(),
            _ => None,
        }
    }

    pub fn tower(&self) -> Option<DevelopmentCardType> {
        match &self.kind {
            ActionSpaceKind::Floor { tower, .. } => Some(*tower),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub spaces: BTreeMap<ActionSpaceId, ActionSpace>,
    pub towers: BTreeMap<DevelopmentCardType, Vec<ActionSpaceId>>,
}

impl Board {
    /// Standard layout. Markets 3 and 4 need four players, the large
    /// production and harvest areas need at least three.
    pub fn standard(player_count: usize) -> Self {
        use ResourceKind::*;

        let mut spaces = BTreeMap::new();
        let mut towers = BTreeMap::new();

        for tower in DevelopmentCardType::ALL {
            let bonus_kind = match tower {
                DevelopmentCardType::Territory => Wood,
                DevelopmentCardType::Character => Stone,
                DevelopmentCardType::Building => MilitaryPoints,
                DevelopmentCardType::Venture => Coins,
            };
            let mut floors = Vec::new();
            for level in 0..FLOORS_PER_TOWER {
                let id = Self::floor_id(tower, level);
                let kind = ActionSpaceKind::Floor {
                    tower,
                    level,
                    card: None,
                };
                let mut space = ActionSpace::new(id, kind, FLOOR_VALUES[level as usize]);
                space.bonus = match level {
                    2 => ResourceSet::new().with(bonus_kind, 1),
                    3 => ResourceSet::new().with(bonus_kind, 2),
                    _ => ResourceSet::new(),
                };
                floors.push(id);
                spaces.insert(id, space);
            }
            towers.insert(tower, floors);
        }

        let market_bonuses = [
            ResourceSet::new().with(Coins, 5),
            ResourceSet::new().with(Servants, 5),
            ResourceSet::new().with(MilitaryPoints, 3).with(Coins, 2),
            ResourceSet::new().with(CouncilPrivilege, 2),
        ];
        for (slot, bonus) in market_bonuses.into_iter().enumerate() {
            let id = MARKET_BASE + slot as ActionSpaceId;
            let mut space = ActionSpace::new(id, ActionSpaceKind::Market { slot: slot as u8 }, 1);
            space.bonus = bonus;
            space.enabled = slot < 2 || player_count >= 4;
            spaces.insert(id, space);
        }

        let mut palace = ActionSpace::new(COUNCIL_PALACE, ActionSpaceKind::CouncilPalace, 1);
        palace.bonus = ResourceSet::new().with(Coins, 1).with(CouncilPrivilege, 1);
        palace.single_occupant = false;
        spaces.insert(COUNCIL_PALACE, palace);

        for (id, large, production) in [
            (SMALL_PRODUCTION, false, true),
            (LARGE_PRODUCTION, true, true),
            (SMALL_HARVEST, false, false),
            (LARGE_HARVEST, true, false),
        ] {
            let kind = if production {
                ActionSpaceKind::Production { large }
            } else {
                ActionSpaceKind::Harvest { large }
            };
            let mut space = ActionSpace::new(id, kind, 1);
            if large {
                space.value_modifier = LARGE_AREA_MALUS;
                space.single_occupant = false;
                space.enabled = player_count >= 3;
            }
            spaces.insert(id, space);
        }

        Self { spaces, towers }
    }

    pub fn floor_id(tower: DevelopmentCardType, level: u8) -> ActionSpaceId {
        let index = DevelopmentCardType::ALL
            .iter()
            .position(|t| *t == tower)
            .unwrap_or(0) as ActionSpaceId;
        index * FLOORS_PER_TOWER as ActionSpaceId + level as ActionSpaceId + 1
    }

    pub fn market_id(slot: u8) -> ActionSpaceId {
        MARKET_BASE + slot as ActionSpaceId
    }

    pub fn space(&self, id: ActionSpaceId) -> Option<&ActionSpace> {
        self.spaces.get(&id)
    }

    pub fn space_mut(&mut self, id: ActionSpaceId) -> Option<&mut ActionSpace> {
        self.spaces.get_mut(&id)
    }

    pub fn floors(&self, tower: DevelopmentCardType) -> impl Iterator<Item = &ActionSpace> + '_ {
        self.towers
            .get(&tower)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.spaces.get(id))
    }

    /// True when someone other than `username` already stands in the tower.
    pub fn tower_occupied_by_other(&self, tower: DevelopmentCardType, username: &str) -> bool {
        self.floors(tower)
            .flat_map(|floor| floor.occupants.iter())
            .any(|occupant| occupant.username != username)
    }

    /// True when `username` already placed a non-neutral member on any space
    /// accepted by `same_area`.
    pub fn has_colored_member_where<F>(&self, username: &str, same_area: F) -> bool
    where
        F: Fn(&ActionSpaceKind) -> bool,
    {
        self.spaces
            .values()
            .filter(|space| same_area(&space.kind))
            .flat_map(|space| space.occupants.iter())
            .any(|occupant| occupant.username == username && !occupant.color.is_neutral())
    }

    pub fn clear_occupants(&mut self) {
        for space in self.spaces.values_mut() {
            space.occupants.clear();
        }
    }

    /// Council palace occupants in placement order, first come first.
    pub fn council_order(&self) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        if let Some(palace) = self.space(COUNCIL_PALACE) {
            for occupant in &palace.occupants {
                if !order.contains(&occupant.username) {
                    order.push(occupant.username.clone());
                }
            }
        }
        order
    }
}
