//! Container selection across multiple instances.
//!
//! The planner repeatedly runs the feasibility engine against the remaining
//! cargo and commits one container instance per round until everything is
//! loaded, no progress is possible or the instance bound is hit.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::catalog::eligible_templates;
use crate::geometry::{Orientation, item_fits};
use crate::model::{CargoItem, ContainerTemplate};
use crate::optimizer::{
    PackedPlacement, PackingConfig, PlacementResult, PlanningError, UnplacedItem, UnplacedReason,
    pack_instance, validate_items, validate_template,
};
use crate::types::Dimensional;

/// How the planner picks container instances.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlanningMode {
    /// Pick the best template for every new instance.
    #[default]
    Automatic,
    /// Use exactly the given templates, one instance each, in order.
    Manual,
}

/// Caller options for a planning run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlanOptions {
    pub mode: PlanningMode,
    pub include_coming_soon: bool,
    /// Upper bound on committed container instances. Values below 1 are treated as 1.
    pub max_instances: usize,
}

impl PlanOptions {
    pub const DEFAULT_MAX_INSTANCES: usize = 20;

    pub fn automatic() -> Self {
        Self::default()
    }

    pub fn manual() -> Self {
        Self {
            mode: PlanningMode::Manual,
            ..Self::default()
        }
    }

    pub fn with_max_instances(mut self, max_instances: usize) -> Self {
        self.max_instances = max_instances;
        self
    }

    pub fn with_coming_soon(mut self, include: bool) -> Self {
        self.include_coming_soon = include;
        self
    }
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            mode: PlanningMode::Automatic,
            include_coming_soon: false,
            max_instances: Self::DEFAULT_MAX_INSTANCES,
        }
    }
}

/// One committed container instance.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct LoadedContainer {
    pub container_template_id: String,
    pub instance_index: usize,
    pub placements: Vec<PackedPlacement>,
    pub volume_utilization: f64,
    pub mass_utilization: f64,
}

impl LoadedContainer {
    pub fn loaded_mass(&self) -> f64 {
        self.placements.iter().map(|p| p.weight).sum()
    }
}

/// Full output of a planning run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, ToSchema)]
pub struct LoadingPlan {
    pub containers: Vec<LoadedContainer>,
    pub unplaced_items: Vec<UnplacedItem>,
}

impl LoadingPlan {
    /// Every unit of the catalog was placed.
    pub fn is_complete(&self) -> bool {
        self.unplaced_items.is_empty()
    }

    pub fn placed_count(&self) -> usize {
        self.containers.iter().map(|c| c.placements.len()).sum()
    }

    pub fn unplaced_count(&self) -> u64 {
        self.unplaced_items
            .iter()
            .map(|u| u.remaining_quantity as u64)
            .sum()
    }
}

/// Progress events of a planning run, emitted for committed instances only.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum PlanEvent {
    /// A container instance was committed to the plan.
    ContainerStarted {
        instance_index: usize,
        template_id: String,
        dims: (f64, f64, f64),
        max_payload: f64,
    },
    /// A unit was placed in the current instance.
    UnitPlaced {
        instance_index: usize,
        cargo_item_id: String,
        orientation: Orientation,
        position: (f64, f64, f64),
        dims: (f64, f64, f64),
        weight: f64,
        loaded_mass: f64,
    },
    /// Units of a cargo line are left over.
    ItemRejected {
        cargo_item_id: String,
        remaining_quantity: u32,
        reason_code: String,
        reason_text: String,
    },
    /// Planning finished.
    Finished { containers: usize, unplaced: u64 },
}

/// Produces a loading plan with default engine tolerances.
pub fn plan_loading(
    items: &[CargoItem],
    templates: &[ContainerTemplate],
    options: &PlanOptions,
) -> Result<LoadingPlan, PlanningError> {
    plan_loading_with_config(items, templates, options, &PackingConfig::default())
}

/// Like `plan_loading`, with custom engine tolerances.
pub fn plan_loading_with_config(
    items: &[CargoItem],
    templates: &[ContainerTemplate],
    options: &PlanOptions,
    config: &PackingConfig,
) -> Result<LoadingPlan, PlanningError> {
    plan_loading_with_progress(items, templates, options, config, |_| {})
}

/// Produces a loading plan and reports every committed step to `on_event`.
///
/// In automatic mode `templates` are candidate types; in manual mode they are
/// the user's container entries in the order added.
///
/// # Errors
/// `InvalidCatalog` for an empty or malformed item list, `InvalidTemplate`
/// when an eligible template has non-positive geometry or payload.
pub fn plan_loading_with_progress(
    items: &[CargoItem],
    templates: &[ContainerTemplate],
    options: &PlanOptions,
    config: &PackingConfig,
    mut on_event: impl FnMut(&PlanEvent),
) -> Result<LoadingPlan, PlanningError> {
    validate_items(items)?;
    let eligible = eligible_templates(templates, options.include_coming_soon);
    for template in &eligible {
        validate_template(template)?;
    }

    let max_instances = options.max_instances.max(1);
    let required_volume: f64 = items.iter().map(CargoItem::total_volume).sum();
    if eligible.iter().all(|t| t.volume() < required_volume) {
        log::debug!(
            "cargo volume {:.0} mm³ exceeds every single template, planning multiple instances",
            required_volume
        );
    }

    let run = match options.mode {
        PlanningMode::Automatic => plan_automatic(items, &eligible, max_instances, config),
        PlanningMode::Manual => plan_manual(items, &eligible, max_instances, config),
    };

    let mut containers = Vec::with_capacity(run.committed.len());
    for (template, result) in run.committed {
        let instance_index = containers.len();
        on_event(&PlanEvent::ContainerStarted {
            instance_index,
            template_id: template.id.clone(),
            dims: template.envelope().as_tuple(),
            max_payload: template.payload_kg(),
        });
        let mut loaded_mass = 0.0;
        for placement in &result.placements {
            loaded_mass += placement.weight;
            on_event(&PlanEvent::UnitPlaced {
                instance_index,
                cargo_item_id: placement.cargo_item_id.clone(),
                orientation: placement.orientation,
                position: placement.position,
                dims: placement.dims,
                weight: placement.weight,
                loaded_mass,
            });
        }
        containers.push(LoadedContainer {
            container_template_id: template.id.clone(),
            instance_index,
            placements: result.placements,
            volume_utilization: result.volume_utilization,
            mass_utilization: result.mass_utilization,
        });
    }

    let unplaced_items = merge_unplaced(items, run.rejected_upfront, run.residual);
    for item in &unplaced_items {
        on_event(&PlanEvent::ItemRejected {
            cargo_item_id: item.cargo_item_id.clone(),
            remaining_quantity: item.remaining_quantity,
            reason_code: item.reason.code().to_string(),
            reason_text: item.reason.to_string(),
        });
    }

    let plan = LoadingPlan {
        containers,
        unplaced_items,
    };
    on_event(&PlanEvent::Finished {
        containers: plan.containers.len(),
        unplaced: plan.unplaced_count(),
    });
    Ok(plan)
}

type Committed<'t> = Vec<(&'t ContainerTemplate, PlacementResult)>;

/// Differences below this are treated as equal residual volume.
const VOLUME_TOLERANCE_MM3: f64 = 1.0;

/// Outcome of one planning pass, before it is turned into a `LoadingPlan`.
struct PlanRun<'t> {
    rejected_upfront: Vec<UnplacedItem>,
    committed: Committed<'t>,
    residual: Vec<UnplacedItem>,
    unplaced_volume: f64,
}

impl PlanRun<'_> {
    fn unplaced_lines(&self) -> usize {
        self.rejected_upfront.len() + self.residual.len()
    }

    fn total_cost(&self) -> f64 {
        self.committed.iter().map(|(t, _)| t.cost_per_unit).sum()
    }

    /// Fewer unplaced lines, then less unplaced volume, then fewer
    /// instances, then lower total cost.
    fn is_better_than(&self, other: &Self) -> bool {
        self.unplaced_lines()
            .cmp(&other.unplaced_lines())
            .then_with(|| compare_volume(self.unplaced_volume, other.unplaced_volume))
            .then_with(|| self.committed.len().cmp(&other.committed.len()))
            .then_with(|| self.total_cost().total_cmp(&other.total_cost()))
            .is_lt()
    }
}

fn compare_volume(a: f64, b: f64) -> Ordering {
    if (a - b).abs() <= VOLUME_TOLERANCE_MM3 {
        Ordering::Equal
    } else {
        a.total_cmp(&b)
    }
}

/// Whether `larger` holds `smaller` on every axis, is strictly bigger and
/// costs no more.
fn dominates(larger: &ContainerTemplate, smaller: &ContainerTemplate, eps: f64) -> bool {
    let (big, small) = (larger.envelope(), smaller.envelope());
    small.fits_within(&big, eps)
        && big.volume() > small.volume() + VOLUME_TOLERANCE_MM3
        && larger.cost_per_unit <= smaller.cost_per_unit
}

/// Automatic selection.
///
/// The greedy pass over all eligible templates is compared against the
/// passes that leave out a template dominating another one, so adding a
/// larger template at the same or lower cost never leaves more cargo lines
/// behind. Ties keep the pass over the fuller template set.
fn plan_automatic<'t>(
    items: &[CargoItem],
    eligible: &[&'t ContainerTemplate],
    max_instances: usize,
    config: &PackingConfig,
) -> PlanRun<'t> {
    let mut visited: HashSet<Vec<usize>> = HashSet::new();
    let mut pending: Vec<Vec<usize>> = vec![(0..eligible.len()).collect()];
    let mut best: Option<PlanRun<'t>> = None;

    while let Some(subset) = pending.pop() {
        if !visited.insert(subset.clone()) {
            continue;
        }
        let templates: Vec<&'t ContainerTemplate> = subset.iter().map(|&i| eligible[i]).collect();
        let run = greedy_run(items, &templates, max_instances, config);
        log::debug!(
            "template set {:?}: {} instances, {} unplaced lines",
            templates.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            run.committed.len(),
            run.unplaced_lines()
        );
        if best.as_ref().is_none_or(|current| run.is_better_than(current)) {
            best = Some(run);
        }

        for &candidate in subset.iter().rev() {
            let dominating = subset.iter().any(|&other| {
                other != candidate
                    && dominates(eligible[candidate], eligible[other], config.general_epsilon)
            });
            if dominating {
                pending.push(subset.iter().copied().filter(|&i| i != candidate).collect());
            }
        }
    }

    best.unwrap_or_else(|| greedy_run(items, eligible, max_instances, config))
}

/// Greedy bin filling: each round commits the template leaving the fewest
/// unplaced cargo lines, then the least unplaced volume, then the lowest
/// cost, then the earlier template.
fn greedy_run<'t>(
    items: &[CargoItem],
    eligible: &[&'t ContainerTemplate],
    max_instances: usize,
    config: &PackingConfig,
) -> PlanRun<'t> {
    let (mut remaining, rejected_upfront) = split_unplaceable(items, eligible, config);
    let mut committed: Committed<'t> = Vec::new();
    let mut residual = Vec::new();

    while !remaining.is_empty() && committed.len() < max_instances {
        let instance_index = committed.len();
        let mut best: Option<(&'t ContainerTemplate, PlacementResult, f64)> = None;

        for &template in eligible {
            let result = pack_instance(&remaining, template, instance_index, config);
            let left = unplaced_volume(&remaining, &result.unplaced_items);
            log::debug!(
                "instance {}: template '{}' places {} units, leaves {} lines and {:.0} mm³",
                instance_index,
                template.id,
                result.placed_count(),
                result.unplaced_items.len(),
                left
            );

            let better = match &best {
                None => true,
                Some((current, current_result, current_left)) => result
                    .unplaced_items
                    .len()
                    .cmp(&current_result.unplaced_items.len())
                    .then_with(|| compare_volume(left, *current_left))
                    .then_with(|| template.cost_per_unit.total_cmp(&current.cost_per_unit))
                    .is_lt(),
            };
            if better {
                best = Some((template, result, left));
            }
        }

        let Some((template, result, _)) = best else {
            break;
        };
        residual = result.unplaced_items.clone();
        if result.placements.is_empty() {
            log::debug!("no template accepts any remaining unit, stopping");
            break;
        }

        log::debug!(
            "instance {}: committed template '{}'",
            instance_index,
            template.id
        );
        remaining = residual_items(&remaining, &result.unplaced_items);
        committed.push((template, result));
    }

    let left_volume = unplaced_volume(items, &rejected_upfront) + unplaced_volume(items, &residual);
    PlanRun {
        rejected_upfront,
        committed,
        residual,
        unplaced_volume: left_volume,
    }
}

/// Packs the user's entries in order, one instance each, without substitution.
fn plan_manual<'t>(
    items: &[CargoItem],
    entries: &[&'t ContainerTemplate],
    max_instances: usize,
    config: &PackingConfig,
) -> PlanRun<'t> {
    let (mut remaining, rejected_upfront) = split_unplaceable(items, entries, config);
    let mut committed: Committed<'t> = Vec::new();
    let mut residual = Vec::new();

    for &template in entries.iter().take(max_instances) {
        if remaining.is_empty() {
            break;
        }
        let result = pack_instance(&remaining, template, committed.len(), config);
        residual = result.unplaced_items.clone();
        remaining = residual_items(&remaining, &result.unplaced_items);
        committed.push((template, result));
    }

    let left_volume = unplaced_volume(items, &rejected_upfront) + unplaced_volume(items, &residual);
    PlanRun {
        rejected_upfront,
        committed,
        residual,
        unplaced_volume: left_volume,
    }
}

/// Splits off cargo lines whose units fit no eligible template at all.
fn split_unplaceable(
    items: &[CargoItem],
    eligible: &[&ContainerTemplate],
    config: &PackingConfig,
) -> (Vec<CargoItem>, Vec<UnplacedItem>) {
    let mut placeable = Vec::with_capacity(items.len());
    let mut rejected = Vec::new();

    for item in items {
        let fitting: Vec<&&ContainerTemplate> = eligible
            .iter()
            .filter(|t| item_fits(item, t.envelope(), config.general_epsilon))
            .collect();
        let reason = if fitting.is_empty() {
            Some(UnplacedReason::DimensionsExceedContainer)
        } else if fitting
            .iter()
            .all(|t| item.unit_weight_kg() > t.payload_kg() + config.general_epsilon)
        {
            Some(UnplacedReason::TooHeavyForContainer)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                log::debug!("cargo item '{}' fits no template: {}", item.id, reason.code());
                rejected.push(UnplacedItem {
                    cargo_item_id: item.id.clone(),
                    remaining_quantity: item.quantity,
                    reason,
                });
            }
            None => placeable.push(item.clone()),
        }
    }

    (placeable, rejected)
}

/// Volume of the units a result left over, in mm³.
fn unplaced_volume(items: &[CargoItem], unplaced: &[UnplacedItem]) -> f64 {
    unplaced
        .iter()
        .filter_map(|u| {
            items
                .iter()
                .find(|item| item.id == u.cargo_item_id)
                .map(|item| item.with_quantity(u.remaining_quantity).total_volume())
        })
        .sum()
}

/// The cargo lines for the next instance, reduced to their residual quantities.
fn residual_items(items: &[CargoItem], unplaced: &[UnplacedItem]) -> Vec<CargoItem> {
    let left: HashMap<&str, u32> = unplaced
        .iter()
        .map(|u| (u.cargo_item_id.as_str(), u.remaining_quantity))
        .collect();
    items
        .iter()
        .filter_map(|item| {
            left.get(item.id.as_str())
                .filter(|&&quantity| quantity > 0)
                .map(|&quantity| item.with_quantity(quantity))
        })
        .collect()
}

/// Combines up-front rejections and the planning residual in catalog order.
fn merge_unplaced(
    items: &[CargoItem],
    upfront: Vec<UnplacedItem>,
    residual: Vec<UnplacedItem>,
) -> Vec<UnplacedItem> {
    let order: HashMap<&str, usize> = items
        .iter()
        .enumerate()
        .map(|(index, item)| (item.id.as_str(), index))
        .collect();
    let mut merged: Vec<UnplacedItem> = upfront.into_iter().chain(residual).collect();
    merged.sort_by_key(|u| order.get(u.cargo_item_id.as_str()).copied().unwrap_or(usize::MAX));
    merged
}
