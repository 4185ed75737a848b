//! Per-player wallet operations: payment checks, payments, gains and
//! servant spending.

use log::debug;
use serde::{Deserialize, Serialize};
use shared::error::{ActionNotAllowed, GameError};
use shared::resources::{ResourceKind, ResourceSet};
use shared::state::Player;

/// What happens when a gain carrying maluses would drive a wallet
/// quantity below zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum NegativeBalancePolicy {
    /// Quantities stop at zero.
    #[default]
    Clamp,
    /// Quantities may go negative.
    Allow,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Ledger {
    policy: NegativeBalancePolicy,
}

impl Ledger {
    pub fn new(policy: NegativeBalancePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> NegativeBalancePolicy {
        self.policy
    }

    /// True when the wallet covers at least one alternative. An empty list
    /// of alternatives costs nothing.
    pub fn can_pay(&self, player: &Player, alternatives: &[ResourceSet]) -> bool {
        alternatives.is_empty() || alternatives.iter().any(|cost| player.resources.covers(cost))
    }

    pub fn pay(&self, player: &mut Player, cost: &ResourceSet) -> Result<(), GameError> {
        if !player.resources.covers(cost) {
            return Err(ActionNotAllowed::InsufficientResources.into());
        }
        player.resources.subtract(cost);
        debug!("{} paid {}", player.username, cost);
        Ok(())
    }

    pub fn grant(&self, player: &mut Player, obtained: &ResourceSet) {
        player.resources.merge(obtained);
        if self.policy == NegativeBalancePolicy::Clamp {
            for kind in ResourceKind::ALL {
                if player.resources.get(kind) < 0 {
                    player.resources.set(kind, 0);
                }
            }
        }
        debug!("{} obtained {}", player.username, obtained);
    }

    /// Converts servants into family member value for the current turn.
    pub fn spend_servants(&self, player: &mut Player, amount: i32) -> Result<(), GameError> {
        if amount <= 0 {
            return Err(ActionNotAllowed::RequirementsNotMet.into());
        }
        let cost = ResourceSet::new().with(ResourceKind::Servants, amount);
        self.pay(player, &cost)?;
        player.servant_bonus = player.servant_bonus.saturating_add(amount);
        Ok(())
    }

    pub fn reset_servant_bonus(&self, player: &mut Player) {
        player.servant_bonus = 0;
    }
}
