//! Server configuration and the immutable static game data.
//!
//! [`StaticData`] is built once before the listener starts, either from the
//! built-in standard set or from a JSON file, and handed to every room
//! behind an `Arc`.

use crate::ledger::NegativeBalancePolicy;
use log::info;
use serde::{Deserialize, Serialize};
use shared::board::{FamilyMemberColor, FLOORS_PER_TOWER};
use shared::cards::{
    DevelopmentCard, DevelopmentCardType, EffectDef, EffectTrigger, Excommunication,
    ImmediateAction, LeaderCard, LeaderRequirement, PersonalBonusTile, SpaceTarget,
};
use shared::resources::{standard_council_privileges, ResourceKind, ResourceSet};
use shared::state::RulesConfig;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read static data: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse static data: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid static data: {0}")]
    Invalid(String),
}

/// Runtime knobs of the server process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub turn_timeout: Duration,
    /// Delay before a room with at least two players starts without being full.
    pub start_delay: Duration,
    /// Time allowed for excommunication choices during a Vatican report.
    pub vatican_timeout: Duration,
    pub ping_interval: Duration,
    pub client_timeout: Duration,
    /// Concurrent connections accepted before new ones are refused.
    pub max_connections: usize,
    pub default_max_players: usize,
    pub negative_balance: NegativeBalancePolicy,
    /// Fixed RNG seed for reproducible rooms.
    pub seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            turn_timeout: Duration::from_secs(60),
            start_delay: Duration::from_secs(10),
            vatican_timeout: Duration::from_secs(30),
            ping_interval: Duration::from_secs(5),
            client_timeout: Duration::from_secs(15),
            max_connections: 256,
            default_max_players: 4,
            negative_balance: NegativeBalancePolicy::Clamp,
            seed: None,
        }
    }
}

pub const MIN_PLAYERS: usize = 2;
pub const MAX_PLAYERS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticData {
    pub rules: RulesConfig,
    pub development_cards: Vec<DevelopmentCard>,
    pub leader_cards: Vec<LeaderCard>,
    pub excommunications: Vec<Excommunication>,
    pub bonus_tiles: Vec<PersonalBonusTile>,
    pub council_privileges: Vec<ResourceSet>,
}

impl Default for StaticData {
    fn default() -> Self {
        Self::standard()
    }
}

impl StaticData {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let data = Self::from_json_str(&text)?;
        info!(
            "Loaded {} development cards and {} leader cards from {}",
            data.development_cards.len(),
            data.leader_cards.len(),
            path.as_ref().display()
        );
        Ok(data)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let data: StaticData = serde_json::from_str(text)?;
        data.validate()?;
        Ok(data)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let rules = &self.rules;
        if rules.periods == 0 || rules.rounds_per_period == 0 {
            return Err(ConfigError::Invalid("game needs at least one round".into()));
        }
        if rules.faith_thresholds.len() < rules.periods as usize {
            return Err(ConfigError::Invalid("missing faith threshold".into()));
        }
        if rules.die_faces < 1 {
            return Err(ConfigError::Invalid("dice need at least one face".into()));
        }
        if self.bonus_tiles.len() < MAX_PLAYERS {
            return Err(ConfigError::Invalid(format!(
                "need {} personal bonus tiles, found {}",
                MAX_PLAYERS,
                self.bonus_tiles.len()
            )));
        }
        let leaders_needed = rules.leader_draft_size * MAX_PLAYERS;
        if self.leader_cards.len() < leaders_needed {
            return Err(ConfigError::Invalid(format!(
                "need {} leader cards, found {}",
                leaders_needed,
                self.leader_cards.len()
            )));
        }
        if self.council_privileges.is_empty() {
            return Err(ConfigError::Invalid("no council privileges".into()));
        }
        for period in 1..=rules.periods {
            if !self.excommunications.iter().any(|e| e.period == period) {
                return Err(ConfigError::Invalid(format!(
                    "no excommunication for period {}",
                    period
                )));
            }
        }
        if let Some(card) = self
            .development_cards
            .iter()
            .find(|c| c.period == 0 || c.period > rules.periods)
        {
            return Err(ConfigError::Invalid(format!(
                "card {} has period {}",
                card.id, card.period
            )));
        }
        let deck_needed = FLOORS_PER_TOWER as usize * rules.rounds_per_period as usize;
        for period in 1..=rules.periods {
            for card_type in DevelopmentCardType::ALL {
                let found = self
                    .development_cards
                    .iter()
                    .filter(|c| c.period == period && c.card_type == card_type)
                    .count();
                if found < deck_needed {
                    return Err(ConfigError::Invalid(format!(
                        "period {} {} deck has {} cards, needs {}",
                        period, card_type, found, deck_needed
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn cards_for(&self, period: u8, card_type: DevelopmentCardType) -> Vec<DevelopmentCard> {
        self.development_cards
            .iter()
            .filter(|c| c.period == period && c.card_type == card_type)
            .cloned()
            .collect()
    }

    pub fn excommunications_for(&self, period: u8) -> Vec<&Excommunication> {
        self.excommunications
            .iter()
            .filter(|e| e.period == period)
            .collect()
    }

    /// The built-in card set.
    pub fn standard() -> Self {
        Self {
            rules: RulesConfig::default(),
            development_cards: standard_development_cards(),
            leader_cards: standard_leader_cards(),
            excommunications: standard_excommunications(),
            bonus_tiles: standard_bonus_tiles(),
            council_privileges: standard_council_privileges(),
        }
    }
}

fn res(pairs: &[(ResourceKind, i32)]) -> ResourceSet {
    pairs.iter().copied().collect()
}

const TERRITORY_NAMES: [&str; 24] = [
    "Trading Town", "Woods", "Hamlet", "Gravel Pit", "Forest", "Monastery", "Citadel", "Vineyard",
    "City", "Gold Mine", "Mountain Village", "Mining Village", "Rock Pit", "Estate", "Oasis", "Castle",
    "Province", "Marble Pit", "Manor House", "Sanctuary", "Fortress", "Hermitage", "Duchy", "Colony",
];

const CHARACTER_NAMES: [&str; 24] = [
    "Woodcutter", "Builder", "Steward", "Herald", "Knight", "Farmer", "Artisan", "Preacher",
    "Abbess", "Warlord", "Stonemason", "Hero", "Nobleman", "Governor", "Courtesan", "Cardinal",
    "Bishop", "Scholar", "Patron", "Ambassador", "Architect", "General", "Prophet", "Queen",
];

const BUILDING_NAMES: [&str; 24] = [
    "Chapel", "Mint", "Theater", "Jousting Field", "Stonemason's Workshop", "Carpenter's Workshop",
    "Treasury", "Painters' Guild", "Garrison", "Marketplace", "Bank", "Sculptors' Guild",
    "Counting House", "Fortified Gate", "Academy", "Harbor", "Cathedral", "Fortress Walls",
    "Residence", "Triumphal Arch", "Gardens", "Basilica", "Palace", "Observatory",
];

const VENTURE_NAMES: [&str; 24] = [
    "Hiring Recruits", "Repairing the Church", "Building the Walls", "Raising a Statue",
    "Campaigning", "Hosting Panhandlers", "Fighting Heresies", "Support to the Bishop",
    "Support to the Cardinal", "Military Campaign", "Crusade", "Building the Bastions",
    "Commissioning Art", "Hosting Dignitaries", "Improving the Canals", "Conquering New Lands",
    "Support to the Pope", "Seizing a Fortress", "Sacred Vows", "Funding a Cathedral",
    "Peace Treaty", "Commissioning a Fresco", "Renaissance Patronage", "Leading a Crusade",
];

const ROTATING_GOODS: [ResourceKind; 6] = [
    ResourceKind::Wood,
    ResourceKind::Stone,
    ResourceKind::Coins,
    ResourceKind::Servants,
    ResourceKind::MilitaryPoints,
    ResourceKind::FaithPoints,
];

/// Eight cards per tower per period: enough to refill every tower in
/// both rounds of a period.
fn standard_development_cards() -> Vec<DevelopmentCard> {
    use ResourceKind::*;

    let mut cards = Vec::new();
    let mut next_id = 1;
    for period in 1..=3u8 {
        let p = period as i32;
        for i in 0..8usize {
            let name_index = (period as usize - 1) * 8 + i;
            let n = i as i32;

            let good = ROTATING_GOODS[i % ROTATING_GOODS.len()];
            let territory = DevelopmentCard::new(
                next_id,
                TERRITORY_NAMES[name_index],
                DevelopmentCardType::Territory,
                period,
            )
            .with_immediate(res(&[(ROTATING_GOODS[(i + 2) % 6], 1)]))
            .with_activation(1 + n % 6)
            .with_effect(EffectDef::gain(EffectTrigger::Harvest, res(&[(good, p)])));
            cards.push(territory);
            next_id += 1;

            let mut character = DevelopmentCard::new(
                next_id,
                CHARACTER_NAMES[name_index],
                DevelopmentCardType::Character,
                period,
            )
            .with_cost(res(&[(Coins, 2 + p + n % 3)]));
            character = match i % 4 {
                0 => character.with_effect(EffectDef::FamilyValue {
                    color: None,
                    target: SpaceTarget::Tower(DevelopmentCardType::ALL[(i / 4 + period as usize) % 4]),
                    delta: 1 + p,
                }),
                1 => character.with_immediate(res(&[(MilitaryPoints, 2 + p), (FaithPoints, 1)])),
                2 => character
                    .with_immediate(res(&[(VictoryPoints, 2 * p)]))
                    .with_effect(EffectDef::PerCard {
                        trigger: EffectTrigger::CardTaken,
                        card_type: DevelopmentCardType::Venture,
                        gain: res(&[(VictoryPoints, 1)]),
                    }),
                _ => character
                    .with_immediate(res(&[(CouncilPrivilege, 1)]))
                    .with_immediate_action(ImmediateAction::Production { value: 2 + p }),
            };
            cards.push(character);
            next_id += 1;

            let production = match i % 3 {
                0 => EffectDef::gain(EffectTrigger::Production, res(&[(Coins, 1 + p)])),
                1 => EffectDef::gain(
                    EffectTrigger::Production,
                    res(&[(Servants, p), (VictoryPoints, 1)]),
                ),
                _ => EffectDef::PerCard {
                    trigger: EffectTrigger::Production,
                    card_type: DevelopmentCardType::Character,
                    gain: res(&[(VictoryPoints, 1)]),
                },
            };
            let building = DevelopmentCard::new(
                next_id,
                BUILDING_NAMES[name_index],
                DevelopmentCardType::Building,
                period,
            )
            .with_cost(res(&[(Wood, 1 + n % 3 + p), (Stone, 1 + (n + 1) % 3 + p - 1)]))
            .with_cost(res(&[(Stone, 2 + p), (Coins, p)]))
            .with_immediate(res(&[(VictoryPoints, p + n % 2)]))
            .with_activation(1 + n % 6)
            .with_effect(production);
            cards.push(building);
            next_id += 1;

            let mut venture = DevelopmentCard::new(
                next_id,
                VENTURE_NAMES[name_index],
                DevelopmentCardType::Venture,
                period,
            )
            .with_cost(res(&[(Coins, 2 + p + n % 2)]))
            .with_cost(res(&[(MilitaryPoints, 2 * p)]))
            .with_end_game(res(&[(VictoryPoints, 2 + 2 * p + n % 3)]));
            venture = if i % 2 == 0 {
                venture.with_immediate(res(&[(CouncilPrivilege, 1)]))
            } else {
                venture.with_immediate(res(&[(FaithPoints, 1)]))
            };
            if i % 4 == 3 {
                venture = venture.with_immediate_action(ImmediateAction::Harvest { value: 2 + p });
            }
            cards.push(venture);
            next_id += 1;
        }
    }
    cards
}

fn requirement(resources: ResourceSet, cards: &[(DevelopmentCardType, u32)]) -> LeaderRequirement {
    LeaderRequirement {
        resources,
        cards: cards.iter().copied().collect::<BTreeMap<_, _>>(),
    }
}

fn leader(id: u32, name: &str, requirements: Vec<LeaderRequirement>, effect: EffectDef) -> LeaderCard {
    LeaderCard {
        id,
        name: name.to_string(),
        requirements,
        effects: vec![
            effect,
            EffectDef::DiscardBonus {
                resources: res(&[(ResourceKind::CouncilPrivilege, 1)]),
            },
        ],
    }
}

fn round_start(gain: ResourceSet) -> EffectDef {
    EffectDef::once_per_round(EffectDef::gain(EffectTrigger::RoundStart, gain))
}

fn standard_leader_cards() -> Vec<LeaderCard> {
    use DevelopmentCardType::*;
    use ResourceKind::*;

    vec![
        leader(1001, "Filippo Brunelleschi", vec![requirement(res(&[]), &[(Building, 5)])], EffectDef::NoTowerSurcharge),
        leader(1002, "Ludovico Ariosto", vec![requirement(res(&[]), &[(Character, 5)])], EffectDef::MultipleOccupancy),
        leader(
            1003,
            "Sigismondo Malatesta",
            vec![requirement(res(&[(MilitaryPoints, 7), (FaithPoints, 3)]), &[])],
            EffectDef::FamilyValue {
                color: Some(FamilyMemberColor::Neutral),
                target: SpaceTarget::Any,
                delta: 3,
            },
        ),
        leader(1004, "Girolamo Savonarola", vec![requirement(res(&[(Coins, 18)]), &[])], round_start(res(&[(FaithPoints, 1)]))),
        leader(1005, "Michelangelo Buonarroti", vec![requirement(res(&[(Stone, 10)]), &[])], round_start(res(&[(Coins, 3)]))),
        leader(
            1006,
            "Giovanni dalle Bande Nere",
            vec![requirement(res(&[(MilitaryPoints, 12)]), &[])],
            round_start(res(&[(Wood, 1), (Stone, 1), (Coins, 1)])),
        ),
        leader(
            1007,
            "Leonardo da Vinci",
            vec![requirement(res(&[]), &[(Character, 4), (Territory, 2)])],
            round_start(res(&[(Servants, 2), (Coins, 1)])),
        ),
        leader(1008, "Sandro Botticelli", vec![requirement(res(&[(Wood, 10)]), &[])], round_start(res(&[(MilitaryPoints, 2), (VictoryPoints, 1)]))),
        leader(
            1009,
            "Ludovico il Moro",
            vec![requirement(res(&[]), &[(Territory, 2), (Character, 2), (Building, 2), (Venture, 2)])],
            EffectDef::FamilyValue {
                color: None,
                target: SpaceTarget::AnyTower,
                delta: 1,
            },
        ),
        leader(
            1010,
            "Lucrezia Borgia",
            vec![
                requirement(res(&[]), &[(Territory, 6)]),
                requirement(res(&[]), &[(Character, 6)]),
                requirement(res(&[]), &[(Building, 6)]),
                requirement(res(&[]), &[(Venture, 6)]),
            ],
            EffectDef::FamilyValue {
                color: None,
                target: SpaceTarget::Any,
                delta: 2,
            },
        ),
        leader(1011, "Federico da Montefeltro", vec![requirement(res(&[]), &[(Territory, 5)])], round_start(res(&[(Servants, 3)]))),
        leader(
            1012,
            "Cosimo de' Medici",
            vec![requirement(res(&[]), &[(Character, 2), (Building, 4)])],
            round_start(res(&[(Servants, 3), (VictoryPoints, 1)])),
        ),
        leader(
            1013,
            "Bartolomeo Colleoni",
            vec![requirement(res(&[]), &[(Venture, 4), (Territory, 2)])],
            round_start(res(&[(VictoryPoints, 4)])),
        ),
        leader(
            1014,
            "Pico della Mirandola",
            vec![requirement(res(&[]), &[(Venture, 4), (Character, 2)])],
            EffectDef::Multiplier {
                trigger: EffectTrigger::EndOfRound,
                per: Coins,
                step: 5,
                above: 0,
                gain: res(&[(VictoryPoints, 1)]),
            },
        ),
        leader(
            1015,
            "Francesco Sforza",
            vec![requirement(res(&[]), &[(Venture, 5)])],
            EffectDef::IgnoreValueRequirement {
                target: SpaceTarget::Harvest,
            },
        ),
        leader(
            1016,
            "Santa Rita",
            vec![requirement(res(&[(FaithPoints, 8)]), &[])],
            EffectDef::GainModifier { kind: Wood, delta: 1 },
        ),
    ]
}

fn standard_excommunications() -> Vec<Excommunication> {
    use ResourceKind::*;

    vec![
        Excommunication {
            id: 1,
            period: 1,
            effects: vec![EffectDef::GainModifier {
                kind: MilitaryPoints,
                delta: -1,
            }],
        },
        Excommunication {
            id: 2,
            period: 1,
            effects: vec![
                EffectDef::GainModifier { kind: Coins, delta: -1 },
                EffectDef::gain(EffectTrigger::Excommunication, res(&[(VictoryPoints, -1)])),
            ],
        },
        Excommunication {
            id: 3,
            period: 2,
            effects: vec![EffectDef::FamilyValue {
                color: None,
                target: SpaceTarget::Any,
                delta: -1,
            }],
        },
        Excommunication {
            id: 4,
            period: 2,
            effects: vec![EffectDef::FamilyValue {
                color: None,
                target: SpaceTarget::Harvest,
                delta: -3,
            }],
        },
        Excommunication {
            id: 5,
            period: 3,
            effects: vec![EffectDef::gain(EffectTrigger::EndOfRound, res(&[(VictoryPoints, -2)]))],
        },
        Excommunication {
            id: 6,
            period: 3,
            effects: vec![EffectDef::NoFloorBonus],
        },
    ]
}

fn standard_bonus_tiles() -> Vec<PersonalBonusTile> {
    use ResourceKind::*;

    vec![
        PersonalBonusTile {
            id: 1,
            production: res(&[(Coins, 2), (MilitaryPoints, 1)]),
            harvest: res(&[(Wood, 1), (Stone, 1), (Servants, 1)]),
        },
        PersonalBonusTile {
            id: 2,
            production: res(&[(Servants, 2), (Coins, 1)]),
            harvest: res(&[(Wood, 1), (Stone, 1), (MilitaryPoints, 1)]),
        },
        PersonalBonusTile {
            id: 3,
            production: res(&[(MilitaryPoints, 2), (Coins, 1)]),
            harvest: res(&[(Servants, 1), (Stone, 1), (Wood, 1)]),
        },
        PersonalBonusTile {
            id: 4,
            production: res(&[(Coins, 1), (Servants, 1), (MilitaryPoints, 1)]),
            harvest: res(&[(Wood, 2), (Stone, 1)]),
        },
        PersonalBonusTile {
            id: 5,
            production: res(&[(Coins, 2), (Servants, 1)]),
            harvest: res(&[(Wood, 1), (Stone, 2)]),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_data_is_valid() {
        let data = StaticData::standard();
        assert!(data.validate().is_ok());
        assert_eq!(data.development_cards.len(), 96);
        for period in 1..=3 {
            for card_type in DevelopmentCardType::ALL {
                assert_eq!(data.cards_for(period, card_type).len(), 8);
            }
            assert_eq!(data.excommunications_for(period).len(), 2);
        }
    }

    #[test]
    fn test_card_ids_are_unique() {
        let data = StaticData::standard();
        let mut ids: Vec<u32> = data.development_cards.iter().map(|c| c.id).collect();
        ids.extend(data.leader_cards.iter().map(|c| c.id));
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[test]
    fn test_json_roundtrip() {
        let data = StaticData::standard();
        let text = serde_json::to_string(&data).unwrap();
        let parsed = StaticData::from_json_str(&text).unwrap();
        assert_eq!(parsed, data);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let text = r#"{ "rules": { "rounds_per_period": 1 } }"#;
        let parsed: StaticData = serde_json::from_str(text).unwrap();
        assert_eq!(parsed.rules.rounds_per_period, 1);
        assert_eq!(parsed.rules.periods, 3);
        assert_eq!(parsed.bonus_tiles.len(), 5);
    }

    #[test]
    fn test_invalid_data_rejected() {
        let mut data = StaticData::standard();
        data.bonus_tiles.truncate(2);
        assert!(matches!(data.validate(), Err(ConfigError::Invalid(_))));

        let mut data = StaticData::standard();
        data.excommunications.retain(|e| e.period != 2);
        assert!(data.validate().is_err());

        let mut data = StaticData::standard();
        let dropped = data
            .development_cards
            .iter()
            .position(|c| c.period == 3 && c.card_type == DevelopmentCardType::Building)
            .unwrap();
        data.development_cards.remove(dropped);
        assert!(matches!(data.validate(), Err(ConfigError::Invalid(_))));
        data.rules.rounds_per_period = 1;
        assert!(data.validate().is_ok());

        assert!(matches!(
            StaticData::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
