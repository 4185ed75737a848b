//! Effect engine.
//!
//! Triggered effects are evaluated in attachment order against a context
//! that carries a snapshot of the acting player's wallet. Activation marks
//! of gated effects are collected while evaluating and committed only once
//! the whole container has been resolved, so every effect in one
//! resolution sees the same activation state.
//!
//! Standing effects (value modifiers, occupancy and surcharge waivers,
//! gain modifiers) are not applied here; resolution queries them and spends
//! the gates of the ones it relied on with `mark_used` when it commits.

use log::debug;
use shared::board::{ActionSpaceKind, FamilyMemberColor};
use shared::cards::{DevelopmentCardType, EffectDef, EffectTrigger};
use shared::resources::ResourceSet;
use shared::state::{EffectInstance, EffectSource, EffectsContainer, Player};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct EffectContext {
    pub trigger: EffectTrigger,
    pub turn: u32,
    pub round: u32,
    /// Production or harvest value; card effects whose activation value is
    /// higher stay idle.
    pub action_value: Option<i32>,
    /// Wallet at the start of the resolution.
    pub wallet: ResourceSet,
    pub card_counts: BTreeMap<DevelopmentCardType, u32>,
}

impl EffectContext {
    pub fn for_player(player: &Player, trigger: EffectTrigger, turn: u32, round: u32) -> Self {
        Self {
            trigger,
            turn,
            round,
            action_value: None,
            wallet: player.resources.clone(),
            card_counts: player.card_counts(),
        }
    }

    pub fn with_value(mut self, value: i32) -> Self {
        self.action_value = Some(value);
        self
    }
}

/// Turn and round in which standing effects are looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    pub turn: u32,
    pub round: u32,
}

#[derive(Default)]
struct Marks {
    round: Vec<usize>,
    turn: Vec<usize>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EffectEngine;

impl EffectEngine {
    pub fn new() -> Self {
        Self
    }

    /// Runs every effect listening to `ctx.trigger` and returns the sum of
    /// what they yield.
    pub fn apply(&self, container: &mut EffectsContainer, ctx: &EffectContext) -> ResourceSet {
        let mut total = ResourceSet::new();
        let mut marks = Marks::default();

        for (index, instance) in container.effects.iter().enumerate() {
            if !Self::is_active_for(instance, ctx) {
                continue;
            }
            if let Some(gain) = Self::evaluate(&instance.def, instance, index, ctx, &mut marks) {
                total.merge(&gain);
                if Self::is_card_activation(instance, ctx) {
                    marks.round.push(index);
                }
            }
        }

        for index in marks.round {
            container.effects[index].mark_activated(ctx.round);
        }
        for index in marks.turn {
            container.effects[index].mark_activated_in_turn(ctx.turn);
        }

        if !total.is_empty() {
            debug!("{:?} effects yielded {}", ctx.trigger, total);
        }
        total
    }

    fn is_active_for(instance: &EffectInstance, ctx: &EffectContext) -> bool {
        if instance.def.trigger() != Some(ctx.trigger) {
            return false;
        }
        match (instance.activation_value, ctx.action_value) {
            (Some(required), Some(value)) => value >= required,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }

    /// Production and harvest effects of development cards activate at most
    /// once per round.
    fn is_card_activation(instance: &EffectInstance, ctx: &EffectContext) -> bool {
        matches!(instance.source, EffectSource::DevelopmentCard(_))
            && matches!(ctx.trigger, EffectTrigger::Production | EffectTrigger::Harvest)
    }

    fn evaluate(
        def: &EffectDef,
        instance: &EffectInstance,
        index: usize,
        ctx: &EffectContext,
        marks: &mut Marks,
    ) -> Option<ResourceSet> {
        if Self::is_card_activation(instance, ctx) && instance.is_already_activated(ctx.round) {
            return None;
        }
        match def {
            EffectDef::Gain { resources, .. } => Some(resources.clone()),
            EffectDef::DiscardBonus { resources } => Some(resources.clone()),
            EffectDef::Multiplier {
                per,
                step,
                above,
                gain,
                ..
            } => {
                if *step <= 0 {
                    return None;
                }
                let times = (ctx.wallet.get(*per).saturating_sub(*above) / step).max(0);
                Some(gain.scaled(times))
            }
            EffectDef::PerCard { card_type, gain, .. } => {
                let count = ctx.card_counts.get(card_type).copied().unwrap_or(0);
                Some(gain.scaled(count as i32))
            }
            EffectDef::OncePerRound(inner) => {
                if instance.is_already_activated(ctx.round) {
                    return None;
                }
                let gain = Self::evaluate(inner, instance, index, ctx, marks)?;
                marks.round.push(index);
                Some(gain)
            }
            EffectDef::OncePerTurn(inner) => {
                if instance.is_already_activated_in_turn(ctx.turn) {
                    return None;
                }
                let gain = Self::evaluate(inner, instance, index, ctx, marks)?;
                marks.turn.push(index);
                Some(gain)
            }
            _ => None,
        }
    }

    /// Value modifiers for a family member placed on `kind`, with the gated
    /// effects that contributed to the sum.
    pub fn family_value_modifier(
        &self,
        container: &EffectsContainer,
        clock: Clock,
        color: FamilyMemberColor,
        kind: &ActionSpaceKind,
    ) -> (i32, Vec<usize>) {
        let mut used = Vec::new();
        let mut total = 0;
        for (index, def) in Self::standing(container, clock) {
            if let EffectDef::FamilyValue {
                color: wanted,
                target,
                delta,
            } = def
            {
                if wanted.map_or(true, |c| c == color) && target.matches(kind) {
                    total += delta;
                    used.push(index);
                }
            }
        }
        (total, used)
    }

    /// Applies gain modifiers to a yield. A malus never turns a gain into a loss.
    pub fn adjust_gain(&self, container: &EffectsContainer, obtained: &ResourceSet) -> ResourceSet {
        let mut adjusted = obtained.clone();
        for instance in container.iter() {
            if let EffectDef::GainModifier { kind, delta } = instance.def {
                let amount = adjusted.get(kind);
                if amount > 0 {
                    adjusted.set(kind, amount.saturating_add(delta).max(0));
                }
            }
        }
        adjusted
    }

    pub fn ignores_value_requirement(
        &self,
        container: &EffectsContainer,
        clock: Clock,
        kind: &ActionSpaceKind,
    ) -> Option<usize> {
        Self::find_standing(container, clock, |def| {
            matches!(def, EffectDef::IgnoreValueRequirement { target } if target.matches(kind))
        })
    }

    pub fn allows_multiple_occupancy(&self, container: &EffectsContainer, clock: Clock) -> Option<usize> {
        Self::find_standing(container, clock, |def| *def == EffectDef::MultipleOccupancy)
    }

    pub fn waives_tower_surcharge(&self, container: &EffectsContainer, clock: Clock) -> Option<usize> {
        Self::find_standing(container, clock, |def| *def == EffectDef::NoTowerSurcharge)
    }

    pub fn suppresses_floor_bonus(&self, container: &EffectsContainer, clock: Clock) -> Option<usize> {
        Self::find_standing(container, clock, |def| *def == EffectDef::NoFloorBonus)
    }

    /// Spends the gates of the standing effects at `indices`. Ungated
    /// effects are left alone.
    pub fn mark_used(&self, container: &mut EffectsContainer, indices: &[usize], clock: Clock) {
        for &index in indices {
            let Some(instance) = container.effects.get_mut(index) else {
                continue;
            };
            let mut def = instance.def.clone();
            loop {
                match def {
                    EffectDef::OncePerRound(inner) => {
                        instance.mark_activated(clock.round);
                        def = *inner;
                    }
                    EffectDef::OncePerTurn(inner) => {
                        instance.mark_activated_in_turn(clock.turn);
                        def = *inner;
                    }
                    _ => break,
                }
            }
        }
    }

    fn find_standing<F>(container: &EffectsContainer, clock: Clock, mut pred: F) -> Option<usize>
    where
        F: FnMut(&EffectDef) -> bool,
    {
        Self::standing(container, clock).find_map(|(index, def)| pred(def).then_some(index))
    }

    /// Unwrapped definitions of the effects whose gates are still open.
    fn standing(container: &EffectsContainer, clock: Clock) -> impl Iterator<Item = (usize, &EffectDef)> {
        container
            .iter()
            .enumerate()
            .filter_map(move |(index, instance)| {
                Self::usable(instance, &instance.def, clock).map(|def| (index, def))
            })
    }

    fn usable<'a>(instance: &EffectInstance, def: &'a EffectDef, clock: Clock) -> Option<&'a EffectDef> {
        match def {
            EffectDef::OncePerRound(_) if instance.is_already_activated(clock.round) => None,
            EffectDef::OncePerTurn(_) if instance.is_already_activated_in_turn(clock.turn) => None,
            EffectDef::OncePerRound(inner) | EffectDef::OncePerTurn(inner) => {
                Self::usable(instance, inner, clock)
            }
            other => Some(other),
        }
    }
}
