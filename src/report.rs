//! Display-ready aggregates of a loading plan.

use std::collections::BTreeMap;

use serde::Serialize;
use utoipa::ToSchema;

use crate::planner::{LoadedContainer, LoadingPlan};
use crate::types::CenterOfMassCalculator;

/// Figures for one container instance.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct ContainerSummary {
    pub instance_index: usize,
    pub container_template_id: String,
    pub placed_units: usize,
    pub loaded_mass_kg: f64,
    /// Percent, one decimal.
    pub volume_utilization_pct: f64,
    /// Percent, one decimal.
    pub mass_utilization_pct: f64,
    /// Weighted XY center of the load in mm, absent for an empty instance.
    #[schema(value_type = Option<[f64; 2]>)]
    pub center_of_mass: Option<(f64, f64)>,
}

/// Totals over a whole plan.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct PlanReport {
    pub containers: Vec<ContainerSummary>,
    /// Instance count per template id.
    pub containers_by_type: BTreeMap<String, usize>,
    pub total_containers: usize,
    pub placed_units: usize,
    pub unplaced_units: u64,
    pub is_complete: bool,
}

/// Summarizes a plan for display.
///
/// # Panics
/// On a malformed plan: non-sequential instance indices, placements tagged
/// with a foreign instance, utilization outside `0..=1` or residual entries
/// with zero quantity. Plans produced by the planner never trip these.
pub fn summarize(plan: &LoadingPlan) -> PlanReport {
    let mut containers = Vec::with_capacity(plan.containers.len());
    let mut containers_by_type: BTreeMap<String, usize> = BTreeMap::new();

    for (index, container) in plan.containers.iter().enumerate() {
        assert_eq!(
            container.instance_index, index,
            "container instances must be numbered sequentially"
        );
        containers.push(summarize_container(container));
        *containers_by_type
            .entry(container.container_template_id.clone())
            .or_insert(0) += 1;
    }

    for item in &plan.unplaced_items {
        assert!(
            item.remaining_quantity > 0,
            "unplaced entry for '{}' has no remaining quantity",
            item.cargo_item_id
        );
    }

    PlanReport {
        total_containers: containers.len(),
        containers,
        containers_by_type,
        placed_units: plan.placed_count(),
        unplaced_units: plan.unplaced_count(),
        is_complete: plan.is_complete(),
    }
}

fn summarize_container(container: &LoadedContainer) -> ContainerSummary {
    assert_utilization(container.volume_utilization, "volume");
    assert_utilization(container.mass_utilization, "mass");

    let mut center = CenterOfMassCalculator::new();
    for placement in &container.placements {
        assert_eq!(
            placement.container_instance_index, container.instance_index,
            "placement of '{}' belongs to another instance",
            placement.cargo_item_id
        );
        let mid = placement.bounding_box().center();
        center.add_point(mid.x, mid.y, placement.weight);
    }

    ContainerSummary {
        instance_index: container.instance_index,
        container_template_id: container.container_template_id.clone(),
        placed_units: container.placements.len(),
        loaded_mass_kg: container.loaded_mass(),
        volume_utilization_pct: percent(container.volume_utilization),
        mass_utilization_pct: percent(container.mass_utilization),
        center_of_mass: center.compute(),
    }
}

fn assert_utilization(value: f64, what: &str) {
    assert!(
        value.is_finite() && (0.0..=1.0).contains(&value),
        "{} utilization {} is outside 0..=1",
        what,
        value
    );
}

fn percent(ratio: f64) -> f64 {
    (ratio * 1000.0).round() / 10.0
}
