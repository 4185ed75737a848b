//! Action resolution: whether a placement or leader action is legal and
//! what it yields.
//!
//! Every operation validates against the current state first and then works
//! on a copy of the acting player. The copy and the board changes are
//! committed only after every check, privilege conversion included, has
//! passed, so a rejected command leaves the game untouched.

use crate::config::StaticData;
use crate::effects::{Clock, EffectContext, EffectEngine};
use crate::ledger::Ledger;
use log::{debug, info};
use shared::board::{ActionSpace, ActionSpaceId, ActionSpaceKind, FamilyMemberColor, Occupant};
use shared::cards::{CardId, DevelopmentCardType, EffectTrigger, ImmediateAction, LeaderCard};
use shared::error::{ActionNotAllowed, GameError};
use shared::resources::{ResourceKind, ResourceSet};
use shared::state::{EffectSource, EffectsContainer, Game, GamePhase, Player};
use std::sync::Arc;

/// Result of a successful tower placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloorOutcome {
    pub card_id: CardId,
    pub paid: ResourceSet,
    pub obtained: ResourceSet,
}

/// A legal placement: the member's value and the gated standing effects
/// the checks relied on.
struct Placement {
    value: i32,
    used: Vec<usize>,
}

pub struct ActionResolver {
    data: Arc<StaticData>,
    ledger: Ledger,
    engine: EffectEngine,
}

impl ActionResolver {
    pub fn new(data: Arc<StaticData>, ledger: Ledger) -> Self {
        Self {
            data,
            ledger,
            engine: EffectEngine::new(),
        }
    }

    pub fn data(&self) -> &StaticData {
        &self.data
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn engine(&self) -> &EffectEngine {
        &self.engine
    }

    /// Die value plus servants, effect modifiers and the space's own
    /// modifier, with the gated modifiers that were counted.
    pub fn effective_value(
        &self,
        game: &Game,
        player: &Player,
        color: FamilyMemberColor,
        space: &ActionSpace,
    ) -> (i32, Vec<usize>) {
        let (modifier, used) =
            self.engine
                .family_value_modifier(&player.effects, clock(game), color, &space.kind);
        let value = game.dice.value(color) + player.servant_bonus + modifier + space.value_modifier;
        (value, used)
    }

    pub fn go_to_action_space(
        &self,
        game: &mut Game,
        username: &str,
        color: FamilyMemberColor,
        space_id: ActionSpaceId,
        privileges: &[usize],
    ) -> Result<ResourceSet, GameError> {
        let index = self.acting_player(game, username)?;
        let space = game.board.space(space_id).ok_or(ActionNotAllowed::SpaceDisabled)?;
        if space.is_floor() {
            return Err(ActionNotAllowed::RequirementsNotMet.into());
        }
        let placement = self.check_placement(game, index, color, space)?;

        let mut working = game.players[index].clone();
        let snapshot = working.resources.clone();
        let mut obtained = space.bonus.clone();
        match space.kind {
            ActionSpaceKind::Production { .. } => obtained.merge(&self.activation_yield(
                game,
                &mut working,
                EffectTrigger::Production,
                placement.value,
                &snapshot,
            )),
            ActionSpaceKind::Harvest { .. } => obtained.merge(&self.activation_yield(
                game,
                &mut working,
                EffectTrigger::Harvest,
                placement.value,
                &snapshot,
            )),
            _ => {}
        }

        let obtained = self.finish_gain(&mut working, obtained, privileges)?;
        self.engine.mark_used(&mut working.effects, &placement.used, clock(game));
        self.commit_placement(game, index, working, space_id, color)?;
        info!(
            "{} placed {} member on space {} and obtained {}",
            username, color, space_id, obtained
        );
        Ok(obtained)
    }

    pub fn go_to_floor(
        &self,
        game: &mut Game,
        username: &str,
        color: FamilyMemberColor,
        floor_id: ActionSpaceId,
        payment: usize,
        privileges: &[usize],
    ) -> Result<FloorOutcome, GameError> {
        let index = self.acting_player(game, username)?;
        let space = game.board.space(floor_id).ok_or(ActionNotAllowed::SpaceDisabled)?;
        let tower = space.tower().ok_or(ActionNotAllowed::RequirementsNotMet)?;
        let listed = game
            .board
            .towers
            .get(&tower)
            .map_or(false, |ids| ids.contains(&floor_id));
        if !listed {
            return Err(GameError::InvariantViolation(format!(
                "floor {} does not belong to the {} tower",
                floor_id, tower
            )));
        }
        let mut used = self.check_placement(game, index, color, space)?.used;

        let card = space.card().cloned().ok_or(ActionNotAllowed::SpaceOccupied)?;
        if card.card_type != tower {
            return Err(GameError::InvariantViolation(format!(
                "{} card {} sits in the {} tower",
                card.card_type, card.id, tower
            )));
        }

        let player = &game.players[index];
        let rules = &game.rules;
        let owned = player.card_count(tower);
        if owned >= rules.max_cards_per_type {
            return Err(ActionNotAllowed::RequirementsNotMet.into());
        }
        if tower == DevelopmentCardType::Territory {
            let needed = rules
                .territory_military_requirements
                .get(owned)
                .copied()
                .unwrap_or(0);
            if player.resources.get(ResourceKind::MilitaryPoints) < needed {
                return Err(ActionNotAllowed::RequirementsNotMet.into());
            }
        }

        let price = if card.cost.is_empty() {
            ResourceSet::new()
        } else {
            card.cost
                .get(payment)
                .cloned()
                .ok_or(ActionNotAllowed::RequirementsNotMet)?
        };
        let mut surcharge = ResourceSet::new();
        if game.board.tower_occupied_by_other(tower, username) {
            match self.engine.waives_tower_surcharge(&player.effects, clock(game)) {
                Some(waiver) => used.push(waiver),
                None => surcharge = rules.tower_surcharge.clone(),
            }
        }
        let total = price.union(&surcharge);
        let bonus = match self.engine.suppresses_floor_bonus(&player.effects, clock(game)) {
            Some(malus) => {
                used.push(malus);
                ResourceSet::new()
            }
            None => space.bonus.clone(),
        };

        let mut working = player.clone();
        let snapshot = working.resources.clone();
        self.ledger.pay(&mut working, &total)?;

        let mut obtained = bonus;
        obtained.merge(&card.immediate);
        working.cards.entry(tower).or_default().push(card.clone());
        let source = EffectSource::DevelopmentCard(card.id);
        // A development card's card-taken effects fire when it is taken and
        // are not kept. Standing ones from leaders fire on every card.
        let mut taken = EffectsContainer::default();
        for def in &card.effects {
            match def.trigger() {
                Some(EffectTrigger::CardTaken) => taken.attach(std::iter::once(def.clone()), source, None),
                Some(EffectTrigger::Production | EffectTrigger::Harvest) => {
                    working
                        .effects
                        .attach(std::iter::once(def.clone()), source, Some(card.activation_value))
                }
                _ => working.effects.attach(std::iter::once(def.clone()), source, None),
            }
        }

        let ctx = self.context(game, &working, EffectTrigger::CardTaken, &snapshot);
        obtained.merge(&self.engine.apply(&mut taken, &ctx));
        obtained.merge(&self.engine.apply(&mut working.effects, &ctx));
        if let Some(action) = card.immediate_action {
            obtained.merge(&self.immediate_action(game, &mut working, action, &snapshot));
        }

        let obtained = self.finish_gain(&mut working, obtained, privileges)?;
        self.engine.mark_used(&mut working.effects, &used, clock(game));
        self.commit_placement(game, index, working, floor_id, color)?;
        info!(
            "{} took {} ({}) from floor {}, paid {}, obtained {}",
            username, card.name, card.card_type, floor_id, total, obtained
        );
        Ok(FloorOutcome {
            card_id: card.id,
            paid: total,
            obtained,
        })
    }

    pub fn play_leader_card(
        &self,
        game: &mut Game,
        username: &str,
        card_id: CardId,
        privileges: &[usize],
    ) -> Result<ResourceSet, GameError> {
        let index = self.acting_player(game, username)?;
        let player = &game.players[index];
        let position = player
            .leader_hand
            .iter()
            .position(|card| card.id == card_id)
            .ok_or(ActionNotAllowed::LeaderCardNotAvailable)?;
        if !Self::meets_requirements(player, &player.leader_hand[position]) {
            return Err(ActionNotAllowed::RequirementsNotMet.into());
        }

        let mut working = player.clone();
        let snapshot = working.resources.clone();
        let card = working.leader_hand.remove(position);
        working.effects.attach(
            card.effects
                .iter()
                .filter(|def| def.trigger() != Some(EffectTrigger::Discard))
                .cloned(),
            EffectSource::Leader(card.id),
            None,
        );
        working.leaders_played.push(card);

        let ctx = self.context(game, &working, EffectTrigger::LeaderPlayed, &snapshot);
        let obtained = self.engine.apply(&mut working.effects, &ctx);
        let obtained = self.finish_gain(&mut working, obtained, privileges)?;
        game.players[index] = working;
        info!("{} played leader card {}", username, card_id);
        Ok(obtained)
    }

    pub fn discard_leader_card(
        &self,
        game: &mut Game,
        username: &str,
        card_id: CardId,
        privileges: &[usize],
    ) -> Result<ResourceSet, GameError> {
        let index = self.acting_player(game, username)?;
        let player = &game.players[index];
        let position = player
            .leader_hand
            .iter()
            .position(|card| card.id == card_id)
            .ok_or(ActionNotAllowed::LeaderCardNotAvailable)?;

        let mut working = player.clone();
        let snapshot = working.resources.clone();
        let card = working.leader_hand.remove(position);
        let mut container = EffectsContainer::default();
        container.attach(
            card.effects
                .iter()
                .filter(|def| def.trigger() == Some(EffectTrigger::Discard))
                .cloned(),
            EffectSource::Leader(card.id),
            None,
        );

        let ctx = self.context(game, &working, EffectTrigger::Discard, &snapshot);
        let obtained = self.engine.apply(&mut container, &ctx);
        let obtained = self.finish_gain(&mut working, obtained, privileges)?;
        game.players[index] = working;
        info!("{} discarded leader card {}", username, card_id);
        Ok(obtained)
    }

    /// A leader with no requirement alternatives can always be played.
    pub fn meets_requirements(player: &Player, card: &LeaderCard) -> bool {
        card.requirements.is_empty()
            || card.requirements.iter().any(|requirement| {
                player.resources.covers(&requirement.resources)
                    && requirement
                        .cards
                        .iter()
                        .all(|(card_type, count)| player.card_count(*card_type) as u32 >= *count)
            })
    }

    /// Runs `trigger` on the player's own effects outside of a placement
    /// (round start, round end, excommunication) and grants the yield.
    /// Council privileges cannot be chosen there and are dropped.
    pub fn run_trigger(
        &self,
        player: &mut Player,
        trigger: EffectTrigger,
        turn: u32,
        round: u32,
    ) -> ResourceSet {
        let ctx = EffectContext::for_player(player, trigger, turn, round);
        let gained = self.engine.apply(&mut player.effects, &ctx);
        let gained = self
            .engine
            .adjust_gain(&player.effects, &gained)
            .without(ResourceKind::CouncilPrivilege);
        if !gained.is_empty() {
            self.ledger.grant(player, &gained);
        }
        gained
    }

    /// Replaces the council privileges of `obtained` with the chosen
    /// bonuses. Choices must match the privilege count and be distinct.
    pub fn convert_privileges(
        &self,
        player: &Player,
        obtained: &mut ResourceSet,
        choices: &[usize],
    ) -> Result<(), GameError> {
        let count = obtained.get(ResourceKind::CouncilPrivilege).max(0) as usize;
        let options = &self.data.council_privileges;
        let distinct = choices
            .iter()
            .enumerate()
            .all(|(i, choice)| !choices[..i].contains(choice));
        if choices.len() != count || !distinct || choices.iter().any(|c| *c >= options.len()) {
            return Err(ActionNotAllowed::InvalidPrivilegeChoice.into());
        }

        let mut converted = obtained.without(ResourceKind::CouncilPrivilege);
        for choice in choices {
            converted.merge(&self.engine.adjust_gain(&player.effects, &options[*choice]));
        }
        *obtained = converted;
        Ok(())
    }

    fn acting_player(&self, game: &Game, username: &str) -> Result<usize, GameError> {
        let index = game
            .player_index(username)
            .ok_or(ActionNotAllowed::PlayerDoesNotExist)?;
        if game.phase != GamePhase::RoundInProgress {
            return Err(ActionNotAllowed::WrongPhase.into());
        }
        if game.current != Some(index) {
            return Err(ActionNotAllowed::NotYourTurn.into());
        }
        Ok(index)
    }

    fn check_placement(
        &self,
        game: &Game,
        index: usize,
        color: FamilyMemberColor,
        space: &ActionSpace,
    ) -> Result<Placement, GameError> {
        let player = &game.players[index];
        if player.placed_this_turn {
            return Err(ActionNotAllowed::AlreadyPlacedThisTurn.into());
        }
        if !space.enabled {
            return Err(ActionNotAllowed::SpaceDisabled.into());
        }
        if !player.has_family_member(color) {
            return Err(ActionNotAllowed::FamilyMemberNotAvailable.into());
        }

        let (value, mut used) = self.effective_value(game, player, color, space);
        if value < space.required_value {
            match self
                .engine
                .ignores_value_requirement(&player.effects, clock(game), &space.kind)
            {
                Some(waiver) => used.push(waiver),
                None => {
                    debug!(
                        "{} member of {} has value {}, space {} needs {}",
                        color, player.username, value, space.id, space.required_value
                    );
                    return Err(ActionNotAllowed::InsufficientValue.into());
                }
            }
        }
        if space.single_occupant && space.is_occupied() {
            match self.engine.allows_multiple_occupancy(&player.effects, clock(game)) {
                Some(waiver) => used.push(waiver),
                None => return Err(ActionNotAllowed::SpaceOccupied.into()),
            }
        }
        if !color.is_neutral()
            && game
                .board
                .has_colored_member_where(&player.username, |kind| same_area(&space.kind, kind))
        {
            return Err(ActionNotAllowed::SpaceOccupied.into());
        }
        Ok(Placement { value, used })
    }

    fn context(
        &self,
        game: &Game,
        player: &Player,
        trigger: EffectTrigger,
        snapshot: &ResourceSet,
    ) -> EffectContext {
        let mut ctx = EffectContext::for_player(player, trigger, game.turn, game.round);
        ctx.wallet = snapshot.clone();
        ctx
    }

    /// Personal bonus tile plus the production or harvest effects whose
    /// activation value is reached.
    fn activation_yield(
        &self,
        game: &Game,
        player: &mut Player,
        trigger: EffectTrigger,
        value: i32,
        snapshot: &ResourceSet,
    ) -> ResourceSet {
        let mut total = match (&player.bonus_tile, trigger) {
            (Some(tile), EffectTrigger::Production) => tile.production.clone(),
            (Some(tile), EffectTrigger::Harvest) => tile.harvest.clone(),
            _ => ResourceSet::new(),
        };
        let ctx = self.context(game, player, trigger, snapshot).with_value(value);
        total.merge(&self.engine.apply(&mut player.effects, &ctx));
        total
    }

    fn immediate_action(
        &self,
        game: &Game,
        player: &mut Player,
        action: ImmediateAction,
        snapshot: &ResourceSet,
    ) -> ResourceSet {
        let (trigger, value) = match action {
            ImmediateAction::Harvest { value } => (EffectTrigger::Harvest, value),
            ImmediateAction::Production { value } => (EffectTrigger::Production, value),
        };
        self.activation_yield(game, player, trigger, value, snapshot)
    }

    fn finish_gain(
        &self,
        player: &mut Player,
        obtained: ResourceSet,
        privileges: &[usize],
    ) -> Result<ResourceSet, GameError> {
        let mut obtained = self.engine.adjust_gain(&player.effects, &obtained);
        self.convert_privileges(player, &mut obtained, privileges)?;
        self.ledger.grant(player, &obtained);
        Ok(obtained)
    }

    fn commit_placement(
        &self,
        game: &mut Game,
        index: usize,
        mut working: Player,
        space_id: ActionSpaceId,
        color: FamilyMemberColor,
    ) -> Result<(), GameError> {
        let space = game.board.space_mut(space_id).ok_or_else(|| {
            GameError::InvariantViolation(format!("action space {} vanished", space_id))
        })?;
        if let ActionSpaceKind::Floor { card, .. } = &mut space.kind {
            *card = None;
        }
        space.occupants.push(Occupant {
            username: working.username.clone(),
            color,
        });

        working.family_members.retain(|member| *member != color);
        working.placed_this_turn = true;
        game.players[index] = working;
        Ok(())
    }
}

fn clock(game: &Game) -> Clock {
    Clock {
        turn: game.turn,
        round: game.round,
    }
}

/// Areas in which a player may hold only one colored family member.
fn same_area(target: &ActionSpaceKind, other: &ActionSpaceKind) -> bool {
    match (target, other) {
        (ActionSpaceKind::Floor { tower: a, .. }, ActionSpaceKind::Floor { tower: b, .. }) => a == b,
        (ActionSpaceKind::Production { .. }, ActionSpaceKind::Production { .. }) => true,
        (ActionSpaceKind::Harvest { .. }, ActionSpaceKind::Harvest { .. }) => true,
        _ => false,
    }
}
