//! Typed resource quantities.
//!
//! A [`ResourceSet`] is used both for what a player owns (the wallet), for
//! what a card or action requires, and for what an action yields. Required
//! prices come as a list of alternative bundles: any single bundle that the
//! wallet covers is enough to pay.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Coins,
    Wood,
    Stone,
    Servants,
    MilitaryPoints,
    FaithPoints,
    VictoryPoints,
    /// Placeholder converted into a concrete bonus by the player's choice.
    CouncilPrivilege,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::Coins,
        ResourceKind::Wood,
        ResourceKind::Stone,
        ResourceKind::Servants,
        ResourceKind::MilitaryPoints,
        ResourceKind::FaithPoints,
        ResourceKind::VictoryPoints,
        ResourceKind::CouncilPrivilege,
    ];

    /// Goods counted for the end-of-game resource conversion.
    pub const GOODS: [ResourceKind; 4] = [
        ResourceKind::Coins,
        ResourceKind::Wood,
        ResourceKind::Stone,
        ResourceKind::Servants,
    ];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Coins => "coins",
            ResourceKind::Wood => "wood",
            ResourceKind::Stone => "stone",
            ResourceKind::Servants => "servants",
            ResourceKind::MilitaryPoints => "military",
            ResourceKind::FaithPoints => "faith",
            ResourceKind::VictoryPoints => "victory",
            ResourceKind::CouncilPrivilege => "privilege",
        };
        f.write_str(name)
    }
}

/// Mapping from resource kind to quantity.
///
/// Zero entries are never stored, so two sets holding the same quantities
/// always compare equal regardless of how they were built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSet {
    amounts: BTreeMap<ResourceKind, i32>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion, handy for static data and tests.
    pub fn with(mut self, kind: ResourceKind, amount: i32) -> Self {
        self.add(kind, amount);
        self
    }

    pub fn get(&self, kind: ResourceKind) -> i32 {
        self.amounts.get(&kind).copied().unwrap_or(0)
    }

    pub fn set(&mut self, kind: ResourceKind, amount: i32) {
        if amount == 0 {
            self.amounts.remove(&kind);
        } else {
            self.amounts.insert(kind, amount);
        }
    }

    pub fn add(&mut self, kind: ResourceKind, delta: i32) {
        let current = self.get(kind);
        self.set(kind, current.saturating_add(delta));
    }

    /// Adds every quantity of `other` into `self`.
    pub fn merge(&mut self, other: &ResourceSet) {
        for (kind, amount) in other.iter() {
            self.add(kind, amount);
        }
    }

    pub fn union(&self, other: &ResourceSet) -> ResourceSet {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    pub fn subtract(&mut self, other: &ResourceSet) {
        for (kind, amount) in other.iter() {
            self.add(kind, amount.saturating_neg());
        }
    }

    /// Component-wise `self >= other` over every kind `other` mentions.
    pub fn covers(&self, other: &ResourceSet) -> bool {
        other.iter().all(|(kind, amount)| self.get(kind) >= amount)
    }

    pub fn scaled(&self, factor: i32) -> ResourceSet {
        self.iter().map(|(kind, amount)| (kind, amount.saturating_mul(factor))).collect()
    }

    /// Returns a copy with `kind` removed.
    pub fn without(&self, kind: ResourceKind) -> ResourceSet {
        let mut result = self.clone();
        result.set(kind, 0);
        result
    }

    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }

    pub fn has_negative(&self) -> bool {
        self.amounts.values().any(|amount| *amount < 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceKind, i32)> + '_ {
        self.amounts.iter().map(|(kind, amount)| (*kind, *amount))
    }

    pub fn sum_of(&self, kinds: &[ResourceKind]) -> i32 {
        kinds.iter().map(|kind| self.get(*kind)).sum()
    }
}

impl FromIterator<(ResourceKind, i32)> for ResourceSet {
    fn from_iter<I: IntoIterator<Item = (ResourceKind, i32)>>(iter: I) -> Self {
        let mut set = ResourceSet::new();
        for (kind, amount) in iter {
            set.add(kind, amount);
        }
        set
    }
}

impl fmt::Display for ResourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("nothing");
        }
        let parts: Vec<String> = self
            .iter()
            .map(|(kind, amount)| format!("{} {}", amount, kind))
            .collect();
        f.write_str(&parts.join(", "))
    }
}

/// The five council privilege bonuses offered by the standard rules.
pub fn standard_council_privileges() -> Vec<ResourceSet> {
    use ResourceKind::*;
    vec![
        ResourceSet::new().with(Wood, 1).with(Stone, 1),
        ResourceSet::new().with(Servants, 2),
        ResourceSet::new().with(Coins, 2),
        ResourceSet::new().with(MilitaryPoints, 2),
        ResourceSet::new().with(FaithPoints, 1),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ResourceKind::*;

    #[test]
    fn test_zero_entries_are_not_stored() {
        let mut set = ResourceSet::new().with(Coins, 3);
        set.add(Coins, -3);
        assert!(set.is_empty());
        assert_eq!(set, ResourceSet::new());
    }

    #[test]
    fn test_covers_is_component_wise() {
        let wallet = ResourceSet::new().with(Coins, 3).with(Wood, 1);
        assert!(wallet.covers(&ResourceSet::new().with(Coins, 3)));
        assert!(wallet.covers(&ResourceSet::new()));
        assert!(!wallet.covers(&ResourceSet::new().with(Coins, 2).with(Stone, 1)));
        assert!(!wallet.covers(&ResourceSet::new().with(Coins, 4)));
    }

    #[test]
    fn test_merge_and_subtract() {
        let mut set = ResourceSet::new().with(Coins, 2);
        set.merge(&ResourceSet::new().with(Coins, 1).with(Stone, 2));
        assert_eq!(set.get(Coins), 3);
        assert_eq!(set.get(Stone), 2);

        set.subtract(&ResourceSet::new().with(Stone, 2));
        assert_eq!(set, ResourceSet::new().with(Coins, 3));
    }

    #[test]
    fn test_arithmetic_saturates() {
        let mut set = ResourceSet::new().with(VictoryPoints, i32::MAX - 1);
        set.add(VictoryPoints, 5);
        assert_eq!(set.get(VictoryPoints), i32::MAX);

        set.subtract(&ResourceSet::new().with(Coins, i32::MIN));
        assert_eq!(set.get(Coins), i32::MAX);

        let scaled = ResourceSet::new().with(Coins, 1 << 20).with(Wood, -(1 << 20)).scaled(1 << 20);
        assert_eq!(scaled, ResourceSet::new().with(Coins, i32::MAX).with(Wood, i32::MIN));
    }

    #[test]
    fn test_negative_deltas_are_kept() {
        let malus = ResourceSet::new().with(VictoryPoints, -2);
        assert!(malus.has_negative());
        assert_eq!(malus.get(VictoryPoints), -2);
    }

    #[test]
    fn test_scaled_and_sum_of() {
        let set = ResourceSet::new().with(Coins, 2).with(Wood, 1).with(FaithPoints, 4);
        let doubled = set.scaled(2);
        assert_eq!(doubled.get(Coins), 4);
        assert_eq!(doubled.get(Wood), 2);
        assert_eq!(set.sum_of(&ResourceKind::GOODS), 3);
        assert!(set.scaled(0).is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(ResourceSet::new().to_string(), "nothing");
        let set = ResourceSet::new().with(Coins, 2).with(Stone, 1);
        assert_eq!(set.to_string(), "2 coins, 1 stone");
    }
}
