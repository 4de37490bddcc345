//! Packing feasibility engine.
//!
//! Decides how much of a cargo catalog fits into a single container instance
//! and where each unit goes. The heuristic is a deterministic greedy layered
//! placement:
//! - units are sorted by footprint area, then height, then catalog order
//! - each unit drops onto the lowest resting position over a set of extreme points
//! - orientation, support, stacking (layers, height, mass) and payload limits are enforced
//! - units that cannot be placed are reported, placement never backtracks

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
#[allow(unused_imports)]
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use crate::geometry::{Orientation, orientations, overlap_1d};
use crate::model::{CargoItem, ContainerTemplate};
use crate::types::{
    BoundingBox, Dimensional, EPSILON_GENERAL, EPSILON_HEIGHT, Positioned, Vec3, Weighted,
};

/// Configuration for the placement heuristic.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PackingConfig {
    /// Minimum share of the base area that must rest on supporting tops (0.0 to 1.0)
    pub support_ratio: f64,
    /// Tolerance for height comparisons
    pub height_epsilon: f64,
    /// General numerical tolerance
    pub general_epsilon: f64,
}

impl PackingConfig {
    pub const DEFAULT_SUPPORT_RATIO: f64 = 0.6;
    pub const DEFAULT_HEIGHT_EPSILON: f64 = EPSILON_HEIGHT;
    pub const DEFAULT_GENERAL_EPSILON: f64 = EPSILON_GENERAL;

    pub fn builder() -> PackingConfigBuilder {
        PackingConfigBuilder::default()
    }
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self {
            support_ratio: Self::DEFAULT_SUPPORT_RATIO,
            height_epsilon: Self::DEFAULT_HEIGHT_EPSILON,
            general_epsilon: Self::DEFAULT_GENERAL_EPSILON,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PackingConfigBuilder {
    config: PackingConfig,
}

impl PackingConfigBuilder {
    pub fn support_ratio(mut self, ratio: f64) -> Self {
        self.config.support_ratio = ratio;
        self
    }

    pub fn height_epsilon(mut self, epsilon: f64) -> Self {
        self.config.height_epsilon = epsilon;
        self
    }

    pub fn general_epsilon(mut self, epsilon: f64) -> Self {
        self.config.general_epsilon = epsilon;
        self
    }

    pub fn build(self) -> PackingConfig {
        self.config
    }
}

/// Violated engine preconditions. These indicate a caller bug; "does not
/// fit" is never reported through this type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanningError {
    #[error("Invalid cargo catalog: {0}")]
    InvalidCatalog(String),
    #[error("Invalid container template: {0}")]
    InvalidTemplate(String),
}

/// Where one unit of a cargo line ended up.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct PackedPlacement {
    pub cargo_item_id: String,
    pub orientation: Orientation,
    /// Lower left front corner in container-local mm.
    #[schema(value_type = [f64; 3], example = json!([0.0, 0.0, 0.0]))]
    pub position: (f64, f64, f64),
    /// Rotated extents in mm.
    #[schema(value_type = [f64; 3], example = json!([1200.0, 800.0, 1000.0]))]
    pub dims: (f64, f64, f64),
    /// Unit weight in kg.
    pub weight: f64,
    pub container_instance_index: usize,
}

impl PackedPlacement {
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_position_and_dims(self.position(), self.dimensions())
    }
}

impl Positioned for PackedPlacement {
    fn position(&self) -> Vec3 {
        Vec3::from_tuple(self.position)
    }
}

impl Dimensional for PackedPlacement {
    fn dimensions(&self) -> Vec3 {
        Vec3::from_tuple(self.dims)
    }
}

impl Weighted for PackedPlacement {
    fn weight(&self) -> f64 {
        self.weight
    }
}

/// Reasons why units of a cargo line could not be placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UnplacedReason {
    TooHeavyForContainer,
    DimensionsExceedContainer,
    StackingLimitReached,
    NoStablePosition,
}

impl UnplacedReason {
    pub fn code(&self) -> &'static str {
        match self {
            UnplacedReason::TooHeavyForContainer => "too_heavy_for_container",
            UnplacedReason::DimensionsExceedContainer => "dimensions_exceed_container",
            UnplacedReason::StackingLimitReached => "stacking_limit_reached",
            UnplacedReason::NoStablePosition => "no_stable_position",
        }
    }
}

impl std::fmt::Display for UnplacedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnplacedReason::TooHeavyForContainer => {
                write!(f, "Unit exceeds the remaining payload of the container")
            }
            UnplacedReason::DimensionsExceedContainer => {
                write!(
                    f,
                    "Unit does not fit the container envelope in any allowed orientation"
                )
            }
            UnplacedReason::StackingLimitReached => {
                write!(f, "Free positions are blocked by stacking limits")
            }
            UnplacedReason::NoStablePosition => {
                write!(f, "No supported position left inside the container")
            }
        }
    }
}

/// Residual quantity of a cargo line.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct UnplacedItem {
    pub cargo_item_id: String,
    pub remaining_quantity: u32,
    pub reason: UnplacedReason,
}

/// Outcome of packing one container instance.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct PlacementResult {
    pub placements: Vec<PackedPlacement>,
    pub unplaced_items: Vec<UnplacedItem>,
    pub volume_utilization: f64,
    pub mass_utilization: f64,
}

impl PlacementResult {
    /// Everything fit into the one instance.
    pub fn is_feasible(&self) -> bool {
        self.unplaced_items.is_empty()
    }

    pub fn placed_count(&self) -> usize {
        self.placements.len()
    }

    pub fn unplaced_count(&self) -> u64 {
        self.unplaced_items
            .iter()
            .map(|u| u.remaining_quantity as u64)
            .sum()
    }

    pub fn loaded_mass(&self) -> f64 {
        self.placements.iter().map(|p| p.weight).sum()
    }
}

/// Checks how much of the catalog fits into one instance of `template`.
///
/// # Errors
/// `InvalidCatalog` for an empty or malformed item list, `InvalidTemplate`
/// for non-positive geometry or payload. A partial fit is a successful result
/// with non-empty `unplaced_items`.
pub fn check_feasibility(
    items: &[CargoItem],
    template: &ContainerTemplate,
) -> Result<PlacementResult, PlanningError> {
    check_feasibility_with_config(items, template, &PackingConfig::default())
}

/// Like `check_feasibility`, with custom tolerances.
pub fn check_feasibility_with_config(
    items: &[CargoItem],
    template: &ContainerTemplate,
    config: &PackingConfig,
) -> Result<PlacementResult, PlanningError> {
    validate_items(items)?;
    validate_template(template)?;
    Ok(pack_instance(items, template, 0, config))
}

pub(crate) fn validate_items(items: &[CargoItem]) -> Result<(), PlanningError> {
    if items.is_empty() {
        return Err(PlanningError::InvalidCatalog(
            "cargo catalog is empty".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for item in items {
        item.validate()
            .map_err(|err| PlanningError::InvalidCatalog(format!("item '{}': {}", item.id, err)))?;
        if !seen.insert(item.id.as_str()) {
            return Err(PlanningError::InvalidCatalog(format!(
                "duplicate cargo item id '{}'",
                item.id
            )));
        }
    }
    Ok(())
}

pub(crate) fn validate_template(template: &ContainerTemplate) -> Result<(), PlanningError> {
    template.validate().map_err(|err| {
        PlanningError::InvalidTemplate(format!("template '{}': {}", template.id, err))
    })
}

/// One physical unit expanded from a cargo line.
struct CargoUnit<'a> {
    item_index: usize,
    item: &'a CargoItem,
    options: &'a [(Orientation, Vec3)],
    base: Vec3,
    weight: f64,
}

/// A unit committed to the container, with the stacking state it imposes.
struct PlacedUnit {
    item_index: usize,
    orientation: Orientation,
    bbox: BoundingBox,
    weight: f64,
    layer: u32,
    /// Tightest layer limit of this unit and everything beneath it.
    layer_ceiling: u32,
    /// Tightest stack height limit (mm from the floor) of this unit and everything beneath it.
    height_ceiling: f64,
    /// Mass this unit may carry.
    mass_capacity: f64,
    /// Mass currently resting on this unit, directly or indirectly.
    mass_above: f64,
    supporters: Vec<usize>,
}

struct LoadState<'a> {
    items: &'a [CargoItem],
    envelope: Vec3,
    payload: f64,
    loaded_mass: f64,
    placed: Vec<PlacedUnit>,
    /// Smallest footprint extent along X and Y over every allowed orientation.
    min_extent: (f64, f64),
    /// Extreme points of the floor plan: candidate (x, y) origins.
    corners: Vec<(f64, f64)>,
    index: FootprintIndex,
}

impl LoadState<'_> {
    /// Placed units whose footprint overlaps the rectangle, at any height.
    /// An index may repeat.
    fn units_over(
        &self,
        min_x: f64,
        max_x: f64,
        min_y: f64,
        max_y: f64,
        eps: f64,
    ) -> impl Iterator<Item = usize> + '_ {
        self.index
            .query(min_x, max_x, min_y, max_y)
            .filter(move |&i| {
                let b = &self.placed[i].bbox;
                overlap_1d(min_x, max_x, b.min.x, b.max.x) > eps
                    && overlap_1d(min_y, max_y, b.min.y, b.max.y) > eps
            })
    }

    /// Height at which a footprint dropped at (x, y) comes to rest.
    fn resting_height(&self, x: f64, y: f64, extents: Vec3, eps: f64) -> f64 {
        self.units_over(x, x + extents.x, y, y + extents.y, eps)
            .map(|i| self.placed[i].bbox.top_z())
            .fold(0.0_f64, f64::max)
    }

    fn commit(&mut self, unit: PlacedUnit, eps: f64) {
        self.index.insert(self.placed.len(), &unit.bbox);
        self.add_corners(&unit.bbox, eps);
        self.placed.push(unit);
    }

    /// Adds the extreme points of a newly placed box: its far X and far Y
    /// corners, the corner opposite its origin and the projections of its far
    /// edges onto the back walls. Points nothing can start from are skipped.
    fn add_corners(&mut self, bbox: &BoundingBox, eps: f64) {
        let points = [
            (bbox.max.x, bbox.min.y),
            (bbox.min.x, bbox.max.y),
            (bbox.max.x, bbox.max.y),
            (bbox.max.x, 0.0),
            (0.0, bbox.max.y),
        ];
        for (x, y) in points {
            let usable = x + self.min_extent.0 <= self.envelope.x + eps
                && y + self.min_extent.1 <= self.envelope.y + eps;
            let known = self
                .corners
                .iter()
                .any(|&(cx, cy)| (cx - x).abs() < eps && (cy - y).abs() < eps);
            if usable && !known {
                self.corners.push((x, y));
            }
        }
    }
}

/// Uniform grid over the container floor. Each cell lists the placed units
/// whose footprint covers it, at any height.
struct FootprintIndex {
    cell_x: f64,
    cell_y: f64,
    cols: usize,
    rows: usize,
    cells: Vec<Vec<usize>>,
}

impl FootprintIndex {
    const MAX_CELLS_PER_AXIS: usize = 64;

    fn new(envelope: Vec3, cell_extent: f64) -> Self {
        let cols = Self::cell_count(envelope.x, cell_extent);
        let rows = Self::cell_count(envelope.y, cell_extent);
        Self {
            cell_x: envelope.x / cols as f64,
            cell_y: envelope.y / rows as f64,
            cols,
            rows,
            cells: vec![Vec::new(); cols * rows],
        }
    }

    fn cell_count(length: f64, cell_extent: f64) -> usize {
        if cell_extent <= 0.0 || !cell_extent.is_finite() {
            return 1;
        }
        ((length / cell_extent).floor() as usize).clamp(1, Self::MAX_CELLS_PER_AXIS)
    }

    /// Inclusive range of cells touched by `[min, max]` on one axis.
    fn span(min: f64, max: f64, cell: f64, count: usize) -> (usize, usize) {
        let last_cell = count - 1;
        let first = ((min / cell).floor().max(0.0) as usize).min(last_cell);
        let last = ((max / cell).ceil().max(1.0) as usize - 1).clamp(first, last_cell);
        (first, last)
    }

    fn insert(&mut self, unit: usize, bbox: &BoundingBox) {
        let (c0, c1) = Self::span(bbox.min.x, bbox.max.x, self.cell_x, self.cols);
        let (r0, r1) = Self::span(bbox.min.y, bbox.max.y, self.cell_y, self.rows);
        for row in r0..=r1 {
            for col in c0..=c1 {
                self.cells[row * self.cols + col].push(unit);
            }
        }
    }

    /// Units listed in the cells under the rectangle. Callers filter the
    /// exact overlap; repeats are possible.
    fn query(&self, min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> impl Iterator<Item = usize> + '_ {
        let (c0, c1) = Self::span(min_x, max_x, self.cell_x, self.cols);
        let (r0, r1) = Self::span(min_y, max_y, self.cell_y, self.rows);
        (r0..=r1).flat_map(move |row| {
            let start = row * self.cols;
            self.cells[start + c0..=start + c1].iter().flatten().copied()
        })
    }
}

/// Chosen position for the next unit.
struct Candidate {
    orientation: Orientation,
    bbox: BoundingBox,
    layer: u32,
    layer_ceiling: u32,
    height_ceiling: f64,
    supporters: Vec<usize>,
}

enum Rejection {
    Stacking,
    Unsupported,
}

/// Packs the (validated) items into one instance of the (validated) template.
pub(crate) fn pack_instance(
    items: &[CargoItem],
    template: &ContainerTemplate,
    instance_index: usize,
    config: &PackingConfig,
) -> PlacementResult {
    let item_options: Vec<Vec<(Orientation, Vec3)>> = items.iter().map(orientations).collect();
    let units = expand_units(items, &item_options);

    let min_extent = item_options
        .iter()
        .flatten()
        .fold((f64::INFINITY, f64::INFINITY), |(mx, my), (_, e)| {
            (mx.min(e.x), my.min(e.y))
        });
    let mean_side = if units.is_empty() {
        0.0
    } else {
        units.iter().map(|u| (u.base.x + u.base.y) / 2.0).sum::<f64>() / units.len() as f64
    };

    let envelope = template.envelope();
    let mut state = LoadState {
        items,
        envelope,
        payload: template.payload_kg(),
        loaded_mass: 0.0,
        placed: Vec::with_capacity(units.len()),
        min_extent,
        corners: vec![(0.0, 0.0)],
        index: FootprintIndex::new(envelope, mean_side),
    };
    let mut rejected: BTreeMap<usize, (u32, UnplacedReason)> = BTreeMap::new();

    for unit in &units {
        if let Err(reason) = place_unit(unit, &mut state, config) {
            let entry = rejected.entry(unit.item_index).or_insert((0, reason));
            entry.0 += 1;
        }
    }

    let used_volume: f64 = state
        .placed
        .iter()
        .map(|p| (p.bbox.max - p.bbox.min).volume())
        .sum();
    let volume_utilization = ratio(used_volume, state.envelope.volume());
    let mass_utilization = ratio(state.loaded_mass, state.payload);

    let placements = state
        .placed
        .iter()
        .map(|p| PackedPlacement {
            cargo_item_id: items[p.item_index].id.clone(),
            orientation: p.orientation,
            position: p.bbox.min.as_tuple(),
            dims: (p.bbox.max - p.bbox.min).as_tuple(),
            weight: p.weight,
            container_instance_index: instance_index,
        })
        .collect();

    let unplaced_items = rejected
        .into_iter()
        .map(|(item_index, (count, reason))| UnplacedItem {
            cargo_item_id: items[item_index].id.clone(),
            remaining_quantity: count,
            reason,
        })
        .collect();

    PlacementResult {
        placements,
        unplaced_items,
        volume_utilization,
        mass_utilization,
    }
}

fn ratio(used: f64, capacity: f64) -> f64 {
    if capacity <= 0.0 {
        return 0.0;
    }
    (used / capacity).clamp(0.0, 1.0)
}

/// Expands cargo lines into units and sorts them into placement order:
/// footprint area descending, height descending, catalog order.
fn expand_units<'a>(
    items: &'a [CargoItem],
    item_options: &'a [Vec<(Orientation, Vec3)>],
) -> Vec<CargoUnit<'a>> {
    let mut units: Vec<CargoUnit<'a>> = items
        .iter()
        .enumerate()
        .flat_map(|(item_index, item)| {
            let options = item_options[item_index].as_slice();
            let base = item.dimensions();
            let weight = item.unit_weight_kg();
            (0..item.quantity).map(move |_| CargoUnit {
                item_index,
                item,
                options,
                base,
                weight,
            })
        })
        .collect();

    // sort_by is stable, equal keys keep catalog order
    units.sort_by(|a, b| {
        b.base
            .base_area()
            .total_cmp(&a.base.base_area())
            .then_with(|| b.base.z.total_cmp(&a.base.z))
            .then_with(|| a.item_index.cmp(&b.item_index))
    });
    units
}

fn place_unit(
    unit: &CargoUnit<'_>,
    state: &mut LoadState<'_>,
    config: &PackingConfig,
) -> Result<(), UnplacedReason> {
    if unit.weight > state.payload - state.loaded_mass + config.general_epsilon {
        return Err(UnplacedReason::TooHeavyForContainer);
    }
    if !unit
        .options
        .iter()
        .any(|(_, extents)| extents.fits_within(&state.envelope, config.general_epsilon))
    {
        return Err(UnplacedReason::DimensionsExceedContainer);
    }

    let candidate = find_best_placement(unit, state, config)?;

    for index in transitive_supporters(&state.placed, &candidate.supporters) {
        state.placed[index].mass_above += unit.weight;
    }
    state.loaded_mass += unit.weight;
    state.commit(
        PlacedUnit {
            item_index: unit.item_index,
            orientation: candidate.orientation,
            bbox: candidate.bbox,
            weight: unit.weight,
            layer: candidate.layer,
            layer_ceiling: candidate.layer_ceiling,
            height_ceiling: candidate.height_ceiling,
            mass_capacity: unit.item.stacking.max_stack_mass_kg(),
            mass_above: 0.0,
            supporters: candidate.supporters,
        },
        config.general_epsilon,
    );
    Ok(())
}

/// Searches all orientations and extreme points for the best resting position.
///
/// At each point the unit drops onto the highest top beneath its footprint,
/// so placed units never intersect. Points resting higher than the current
/// best are not evaluated further.
fn find_best_placement(
    unit: &CargoUnit<'_>,
    state: &LoadState<'_>,
    config: &PackingConfig,
) -> Result<Candidate, UnplacedReason> {
    let envelope = state.envelope;
    let eps = config.general_epsilon;

    let mut best: Option<(Candidate, PlacementScore)> = None;
    let mut blocked_by_stacking = false;

    for &(orientation, extents) in unit.options {
        if !extents.fits_within(&envelope, eps) {
            continue;
        }

        for &(x, y) in &state.corners {
            if x + extents.x > envelope.x + eps || y + extents.y > envelope.y + eps {
                continue;
            }

            let z = state.resting_height(x, y, extents, eps);
            if z + extents.z > envelope.z + eps {
                continue;
            }
            let outranked = best.as_ref().is_some_and(|(_, current)| {
                compare_with_epsilon(z, current.z, config.height_epsilon) == Ordering::Greater
            });
            if outranked {
                continue;
            }

            match evaluate_position(unit, orientation, extents, Vec3::new(x, y, z), state, config) {
                Ok(candidate) => {
                    let score = PlacementScore {
                        z,
                        group_contact: touches_group(unit, &candidate.bbox, state, config),
                        y,
                        x,
                    };
                    update_best(&mut best, candidate, score, config);
                }
                Err(Rejection::Stacking) => blocked_by_stacking = true,
                Err(Rejection::Unsupported) => {}
            }
        }
    }

    match best {
        Some((candidate, _)) => Ok(candidate),
        None if blocked_by_stacking => Err(UnplacedReason::StackingLimitReached),
        None => Err(UnplacedReason::NoStablePosition),
    }
}

/// Checks support and stacking limits for a unit resting at `origin`.
fn evaluate_position(
    unit: &CargoUnit<'_>,
    orientation: Orientation,
    extents: Vec3,
    origin: Vec3,
    state: &LoadState<'_>,
    config: &PackingConfig,
) -> Result<Candidate, Rejection> {
    let eps = config.general_epsilon;
    let z = origin.z;

    // Everything under the footprint, at any height.
    let mut beneath: Vec<usize> = state
        .units_over(
            origin.x,
            origin.x + extents.x,
            origin.y,
            origin.y + extents.y,
            eps,
        )
        .collect();
    beneath.sort_unstable();
    beneath.dedup();

    let bbox = BoundingBox::from_position_and_dims(origin, extents);
    let supporters: Vec<usize> = beneath
        .iter()
        .copied()
        .filter(|&i| (state.placed[i].bbox.top_z() - z).abs() <= config.height_epsilon)
        .collect();

    if z > config.height_epsilon && !has_sufficient_support(&bbox, &supporters, state, config) {
        return Err(Rejection::Unsupported);
    }

    let stacking = &unit.item.stacking;
    let layer = 1 + beneath
        .iter()
        .map(|&i| state.placed[i].layer)
        .max()
        .unwrap_or(0);
    let layer_ceiling = beneath
        .iter()
        .map(|&i| state.placed[i].layer_ceiling)
        .fold(stacking.effective_max_layers(), u32::min);
    if layer > layer_ceiling {
        return Err(Rejection::Stacking);
    }

    let height_ceiling = beneath
        .iter()
        .map(|&i| state.placed[i].height_ceiling)
        .fold(stacking.max_stack_height_mm(), f64::min);
    if bbox.top_z() > height_ceiling + eps {
        return Err(Rejection::Stacking);
    }

    let overloaded = transitive_supporters(&state.placed, &supporters)
        .into_iter()
        .any(|i| {
            let p = &state.placed[i];
            p.mass_above + unit.weight > p.mass_capacity + eps
        });
    if overloaded {
        return Err(Rejection::Stacking);
    }

    Ok(Candidate {
        orientation,
        bbox,
        layer,
        layer_ceiling,
        height_ceiling,
        supporters,
    })
}

/// Checks that supporting tops cover enough of the unit's base area.
fn has_sufficient_support(
    bbox: &BoundingBox,
    supporters: &[usize],
    state: &LoadState<'_>,
    config: &PackingConfig,
) -> bool {
    let base_area = (bbox.max - bbox.min).base_area();
    if base_area <= config.general_epsilon {
        return false;
    }

    let support_area: f64 = supporters
        .iter()
        .map(|&i| bbox.overlap_area_xy(&state.placed[i].bbox))
        .sum();

    support_area / base_area + config.general_epsilon >= config.support_ratio
}

/// All units carrying the load of `direct`, directly or through other units.
fn transitive_supporters(placed: &[PlacedUnit], direct: &[usize]) -> Vec<usize> {
    let mut visited: HashSet<usize> = HashSet::new();
    let mut stack: Vec<usize> = direct.to_vec();
    let mut result = Vec::new();
    while let Some(index) = stack.pop() {
        if !visited.insert(index) {
            continue;
        }
        result.push(index);
        stack.extend(placed[index].supporters.iter().copied());
    }
    result
}

/// Whether the box touches a placed unit of the same group.
fn touches_group(
    unit: &CargoUnit<'_>,
    bbox: &BoundingBox,
    state: &LoadState<'_>,
    config: &PackingConfig,
) -> bool {
    let Some(group) = unit.item.group_id.as_deref() else {
        return false;
    };
    let eps = config.general_epsilon;
    state
        .index
        .query(bbox.min.x - eps, bbox.max.x + eps, bbox.min.y - eps, bbox.max.y + eps)
        .map(|i| &state.placed[i])
        .filter(|p| state.items[p.item_index].group_id.as_deref() == Some(group))
        .any(|p| {
            bbox.min.x <= p.bbox.max.x + eps
                && p.bbox.min.x <= bbox.max.x + eps
                && bbox.min.y <= p.bbox.max.y + eps
                && p.bbox.min.y <= bbox.max.y + eps
                && bbox.min.z <= p.bbox.max.z + eps
                && p.bbox.min.z <= bbox.max.z + eps
        })
}

/// Ranking of a candidate position.
///
/// Lower is better: z first, then contact with the own group, then y, then x.
#[derive(Clone, Copy)]
struct PlacementScore {
    z: f64,
    group_contact: bool,
    y: f64,
    x: f64,
}

fn update_best(
    best: &mut Option<(Candidate, PlacementScore)>,
    candidate: Candidate,
    score: PlacementScore,
    config: &PackingConfig,
) {
    let replace = match best {
        None => true,
        Some((_, current)) => is_better_score(score, *current, config),
    };
    if replace {
        *best = Some((candidate, score));
    }
}

/// Strictly better only; ties keep the earlier candidate (orientation order).
fn is_better_score(new: PlacementScore, current: PlacementScore, config: &PackingConfig) -> bool {
    match compare_with_epsilon(new.z, current.z, config.height_epsilon) {
        Ordering::Less => return true,
        Ordering::Greater => return false,
        Ordering::Equal => {}
    }

    if new.group_contact != current.group_contact {
        return new.group_contact;
    }

    match compare_with_epsilon(new.y, current.y, config.general_epsilon) {
        Ordering::Less => return true,
        Ordering::Greater => return false,
        Ordering::Equal => {}
    }

    compare_with_epsilon(new.x, current.x, config.general_epsilon) == Ordering::Less
}

fn compare_with_epsilon(a: f64, b: f64, eps: f64) -> Ordering {
    if (a - b).abs() <= eps {
        Ordering::Equal
    } else if a < b {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BoxDimensions, ContainerCategory, OrientationRule, StackingRules};
    use crate::units::{Dimension, LengthUnit, Mass};
    use rand::prelude::*;
    use std::time::{Duration, Instant};

    fn cargo(id: &str, dims: (f64, f64, f64), weight: f64, quantity: u32) -> CargoItem {
        CargoItem::new(
            id,
            id,
            BoxDimensions::mm(dims.0, dims.1, dims.2).unwrap(),
            Mass::kg(weight).unwrap(),
            quantity,
        )
        .unwrap()
    }

    fn container(dims: (f64, f64, f64), payload: f64) -> ContainerTemplate {
        ContainerTemplate::new(
            "box",
            "Test box",
            ContainerCategory::Container,
            BoxDimensions::mm(dims.0, dims.1, dims.2).unwrap(),
            Mass::kg(payload).unwrap(),
            1.0,
        )
        .unwrap()
    }

    fn twenty_foot() -> ContainerTemplate {
        ContainerTemplate::new(
            "20ft",
            "20ft Standard",
            ContainerCategory::Container,
            BoxDimensions::mm(5898.0, 2352.0, 2393.0).unwrap(),
            Mass::kg(21770.0).unwrap(),
            1500.0,
        )
        .unwrap()
    }

    fn assert_within_envelope(result: &PlacementResult, template: &ContainerTemplate) {
        let envelope = template.envelope();
        for p in &result.placements {
            let bbox = p.bounding_box();
            assert!(bbox.min.x >= 0.0 && bbox.min.y >= 0.0 && bbox.min.z >= 0.0);
            assert!(
                bbox.max.fits_within(&envelope, EPSILON_GENERAL),
                "placement {:?} leaves the envelope {:?}",
                p,
                envelope
            );
        }
    }

    fn assert_no_overlaps(result: &PlacementResult) {
        for (i, a) in result.placements.iter().enumerate() {
            for b in result.placements.iter().skip(i + 1) {
                assert!(
                    !a.bounding_box().intersects(&b.bounding_box(), EPSILON_GENERAL),
                    "{:?} intersects {:?}",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn single_cube_fits_twenty_foot_container() {
        let items = vec![cargo("cube", (1000.0, 1000.0, 1000.0), 500.0, 1)];
        let result = check_feasibility(&items, &twenty_foot()).unwrap();

        assert!(result.is_feasible());
        assert_eq!(result.placements.len(), 1);
        assert_eq!(result.placements[0].position, (0.0, 0.0, 0.0));
        assert!((result.mass_utilization - 500.0 / 21770.0).abs() < 1e-9);
        assert!((result.mass_utilization - 0.023).abs() < 0.001);
    }

    #[test]
    fn stacking_disabled_limits_units_to_the_floor() {
        let items = vec![
            cargo("cube", (1000.0, 1000.0, 1000.0), 500.0, 50)
                .with_stacking(StackingRules::disabled())
                .unwrap(),
        ];
        let template = twenty_foot();
        let result = check_feasibility(&items, &template).unwrap();

        assert_eq!(result.placements.len(), 10);
        assert_eq!(result.unplaced_items.len(), 1);
        assert_eq!(result.unplaced_items[0].remaining_quantity, 40);
        assert_eq!(
            result.unplaced_items[0].reason,
            UnplacedReason::StackingLimitReached
        );
        assert!(result.placements.iter().all(|p| p.position.2 == 0.0));
        assert_within_envelope(&result, &template);
    }

    #[test]
    fn same_cubes_stack_when_allowed() {
        let items = vec![cargo("cube", (1000.0, 1000.0, 1000.0), 100.0, 50)];
        let result = check_feasibility(&items, &twenty_foot()).unwrap();

        // 5 x 2 footprint, 2 layers below 2393 mm
        assert_eq!(result.placements.len(), 20);
        assert_eq!(result.unplaced_count(), 30);
        assert_no_overlaps(&result);
    }

    #[test]
    fn payload_limits_heavy_units() {
        let items = vec![
            cargo("heavy", (1200.0, 1000.0, 1000.0), 20000.0, 2),
            cargo("light", (500.0, 500.0, 500.0), 100.0, 1),
        ];
        let template = twenty_foot();
        let result = check_feasibility(&items, &template).unwrap();

        assert_eq!(result.placements.len(), 2);
        assert_eq!(
            result.unplaced_items,
            vec![UnplacedItem {
                cargo_item_id: "heavy".to_string(),
                remaining_quantity: 1,
                reason: UnplacedReason::TooHeavyForContainer,
            }]
        );
        assert!(result.loaded_mass() <= template.payload_kg());
        assert!(result.volume_utilization < 0.1, "volume was not the limit");
    }

    #[test]
    fn zero_length_template_is_rejected() {
        let items = vec![cargo("cube", (1000.0, 1000.0, 1000.0), 500.0, 1)];
        let mut template = twenty_foot();
        template.internal_dimensions.length = Dimension {
            value: 0.0,
            unit: LengthUnit::Mm,
        };
        assert!(matches!(
            check_feasibility(&items, &template),
            Err(PlanningError::InvalidTemplate(_))
        ));
    }

    #[test]
    fn empty_catalog_is_rejected() {
        assert!(matches!(
            check_feasibility(&[], &twenty_foot()),
            Err(PlanningError::InvalidCatalog(_))
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let items = vec![
            cargo("a", (100.0, 100.0, 100.0), 1.0, 1),
            cargo("a", (200.0, 100.0, 100.0), 1.0, 1),
        ];
        assert!(matches!(
            check_feasibility(&items, &twenty_foot()),
            Err(PlanningError::InvalidCatalog(_))
        ));
    }

    #[test]
    fn oversized_units_are_reported_not_errors() {
        let items = vec![cargo("long", (7000.0, 500.0, 500.0), 10.0, 2)];
        let result = check_feasibility(&items, &twenty_foot()).unwrap();
        assert!(result.placements.is_empty());
        assert_eq!(result.unplaced_items[0].remaining_quantity, 2);
        assert_eq!(
            result.unplaced_items[0].reason,
            UnplacedReason::DimensionsExceedContainer
        );
    }

    #[test]
    fn tilting_lets_tall_items_lie_down() {
        let tall = cargo("pipe", (400.0, 400.0, 1500.0), 10.0, 1);
        let template = container((2000.0, 1000.0, 1000.0), 100.0);

        let upright = check_feasibility(&[tall.clone()], &template).unwrap();
        assert!(upright.placements.is_empty());

        let tilted = tall.with_orientations([OrientationRule::RotateToLength]);
        let result = check_feasibility(&[tilted], &template).unwrap();
        assert_eq!(result.placements.len(), 1);
        assert_eq!(result.placements[0].orientation, Orientation::LengthUp);
        assert_eq!(result.placements[0].dims, (1500.0, 400.0, 400.0));
    }

    #[test]
    fn max_layers_caps_stack_height() {
        let items = vec![
            cargo("crate", (1000.0, 1000.0, 500.0), 10.0, 4)
                .with_stacking(StackingRules {
                    max_layers: Some(2),
                    ..StackingRules::default()
                })
                .unwrap(),
        ];
        let result = check_feasibility(&items, &container((1000.0, 1000.0, 3000.0), 1000.0)).unwrap();
        assert_eq!(result.placements.len(), 2);
        assert_eq!(result.unplaced_count(), 2);
    }

    #[test]
    fn max_stack_mass_limits_load_on_top() {
        let items = vec![
            cargo("carton", (1000.0, 1000.0, 500.0), 30.0, 4)
                .with_stacking(StackingRules {
                    max_stack_mass: Some(Mass::kg(60.0).unwrap()),
                    ..StackingRules::default()
                })
                .unwrap(),
        ];
        let result = check_feasibility(&items, &container((1000.0, 1000.0, 3000.0), 1000.0)).unwrap();
        // The bottom carton carries the two above it (60 kg), a fourth would make 90 kg.
        assert_eq!(result.placements.len(), 3);
        assert_eq!(result.unplaced_items[0].reason, UnplacedReason::StackingLimitReached);
    }

    #[test]
    fn max_stack_height_is_measured_from_the_floor() {
        let items = vec![
            cargo("drum", (600.0, 600.0, 900.0), 50.0, 3)
                .with_stacking(StackingRules {
                    max_stack_height: Some(Dimension::mm(1900.0).unwrap()),
                    ..StackingRules::default()
                })
                .unwrap(),
        ];
        let result = check_feasibility(&items, &container((600.0, 600.0, 3000.0), 1000.0)).unwrap();
        assert_eq!(result.placements.len(), 2);
        let top = result
            .placements
            .iter()
            .map(|p| p.bounding_box().top_z())
            .fold(0.0, f64::max);
        assert!(top <= 1900.0);
    }

    #[test]
    fn nothing_rests_above_non_stackable_units() {
        let items = vec![
            cargo("fragile", (1000.0, 1000.0, 400.0), 20.0, 2)
                .with_stacking(StackingRules::disabled())
                .unwrap(),
            cargo("filler", (800.0, 800.0, 300.0), 5.0, 6),
        ];
        let result = check_feasibility(&items, &container((2000.0, 1000.0, 2000.0), 1000.0)).unwrap();

        let fragile: Vec<_> = result
            .placements
            .iter()
            .filter(|p| p.cargo_item_id == "fragile")
            .collect();
        assert_eq!(fragile.len(), 2);
        for f in &fragile {
            let fb = f.bounding_box();
            for other in result.placements.iter().filter(|p| *p != *f) {
                let ob = other.bounding_box();
                let shares_column = fb.overlap_area_xy(&ob) > EPSILON_GENERAL;
                assert!(
                    !(shares_column && ob.min.z >= fb.max.z - EPSILON_GENERAL),
                    "{:?} sits above non-stackable {:?}",
                    other,
                    f
                );
            }
        }
        assert_eq!(result.unplaced_count(), 6);
    }

    #[test]
    fn sorts_by_footprint_before_height() {
        let items = vec![
            cargo("small", (500.0, 500.0, 800.0), 5.0, 1),
            cargo("wide", (1000.0, 1000.0, 200.0), 5.0, 1),
        ];
        let result = check_feasibility(&items, &container((3000.0, 1000.0, 1000.0), 100.0)).unwrap();
        assert_eq!(result.placements[0].cargo_item_id, "wide");
        assert_eq!(result.placements[0].position, (0.0, 0.0, 0.0));
        assert_eq!(result.placements[1].cargo_item_id, "small");
    }

    #[test]
    fn overhang_is_limited_by_support_ratio() {
        // A (400 high) and B (200 high) split the floor. C spans both, so it
        // rests on A alone with 500 x 600 of its 700 x 600 base supported.
        let items = vec![
            cargo("a", (500.0, 1000.0, 400.0), 10.0, 1),
            cargo("b", (500.0, 1000.0, 200.0), 10.0, 1),
            cargo("c", (700.0, 600.0, 100.0), 10.0, 1),
        ];
        let template = container((1000.0, 1000.0, 1000.0), 1000.0);

        let result = check_feasibility(&items, &template).unwrap();
        assert!(result.is_feasible());
        let c = result.placements.iter().find(|p| p.cargo_item_id == "c").unwrap();
        assert_eq!(c.position, (0.0, 0.0, 400.0));

        let strict = PackingConfig::builder().support_ratio(0.8).build();
        let result = check_feasibility_with_config(&items, &template, &strict).unwrap();
        assert_eq!(
            result.unplaced_items,
            vec![UnplacedItem {
                cargo_item_id: "c".to_string(),
                remaining_quantity: 1,
                reason: UnplacedReason::NoStablePosition,
            }]
        );
    }

    #[test]
    fn group_members_are_kept_together() {
        let items = vec![
            cargo("a", (500.0, 500.0, 500.0), 1.0, 1).with_group("g1"),
            cargo("b", (500.0, 500.0, 500.0), 1.0, 1),
            cargo("c", (500.0, 500.0, 500.0), 1.0, 1).with_group("g1"),
        ];
        let result = check_feasibility(&items, &container((1500.0, 1000.0, 500.0), 100.0)).unwrap();
        let a = result.placements.iter().find(|p| p.cargo_item_id == "a").unwrap();
        let c = result.placements.iter().find(|p| p.cargo_item_id == "c").unwrap();
        let gap_x = (a.position.0 - c.position.0).abs();
        let gap_y = (a.position.1 - c.position.1).abs();
        assert!(gap_x <= 500.0 && gap_y <= 500.0, "{:?} and {:?} are apart", a, c);
    }

    #[test]
    fn identical_inputs_give_identical_results() {
        let items = vec![
            cargo("a", (1200.0, 800.0, 900.0), 300.0, 6)
                .with_orientations([OrientationRule::RotateToHeight]),
            cargo("b", (600.0, 400.0, 400.0), 40.0, 12),
            cargo("c", (1000.0, 1000.0, 1000.0), 700.0, 3),
        ];
        let first = check_feasibility(&items, &twenty_foot()).unwrap();
        let second = check_feasibility(&items, &twenty_foot()).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first.placed_count() as u64 + first.unplaced_count(),
            6 + 12 + 3
        );
        assert_no_overlaps(&first);
    }

    fn forty_foot() -> ContainerTemplate {
        ContainerTemplate::new(
            "40ft",
            "40ft Standard",
            ContainerCategory::Container,
            BoxDimensions::mm(12032.0, 2352.0, 2393.0).unwrap(),
            Mass::kg(26680.0).unwrap(),
            2400.0,
        )
        .unwrap()
    }

    fn mixed_catalog(seed: u64, lines: usize) -> Vec<CargoItem> {
        let mut rng = SmallRng::seed_from_u64(seed);
        (0..lines)
            .map(|i| {
                let dims = (
                    rng.random_range(200.0..1200.0_f64).round(),
                    rng.random_range(200.0..1000.0_f64).round(),
                    rng.random_range(150.0..900.0_f64).round(),
                );
                cargo(
                    &format!("line-{}", i),
                    dims,
                    rng.random_range(5.0..60.0_f64).round(),
                    rng.random_range(4..=11),
                )
                .with_orientations([
                    OrientationRule::RotateToLength,
                    OrientationRule::RotateToWidth,
                    OrientationRule::RotateToHeight,
                ])
            })
            .collect()
    }

    #[test]
    fn hundreds_of_mixed_units_pack_quickly() {
        let items = mixed_catalog(7, 40);
        let total: u64 = items.iter().map(|item| item.quantity as u64).sum();
        assert!(total >= 200, "catalog has only {} units", total);

        let template = forty_foot();
        let started = Instant::now();
        let result = check_feasibility(&items, &template).unwrap();
        let elapsed = started.elapsed();

        let limit = if cfg!(debug_assertions) {
            Duration::from_secs(60)
        } else {
            Duration::from_secs(3)
        };
        assert!(elapsed < limit, "packing {} units took {:?}", total, elapsed);

        assert_eq!(result.placed_count() as u64 + result.unplaced_count(), total);
        assert!(result.placed_count() > 0);
        assert_within_envelope(&result, &template);
        assert_no_overlaps(&result);
    }

    #[test]
    fn stacked_units_rest_on_their_supporters() {
        let items = mixed_catalog(11, 25);
        let template = forty_foot();
        let result = check_feasibility(&items, &template).unwrap();

        for p in &result.placements {
            let bbox = p.bounding_box();
            if bbox.min.z <= EPSILON_HEIGHT {
                continue;
            }
            let supported: f64 = result
                .placements
                .iter()
                .map(|q| q.bounding_box())
                .filter(|q| (q.top_z() - bbox.min.z).abs() <= EPSILON_HEIGHT)
                .map(|q| bbox.overlap_area_xy(&q))
                .sum();
            let base = (bbox.max - bbox.min).base_area();
            assert!(
                supported / base + EPSILON_GENERAL >= PackingConfig::DEFAULT_SUPPORT_RATIO,
                "{:?} floats with {:.0} of {:.0} mm² supported",
                p,
                supported,
                base
            );
        }
    }

    #[test]
    fn extreme_points_follow_the_shallower_neighbour() {
        // B is 100 mm shallower than A, so C starts on B's far edge at y = 900.
        let items = vec![
            cargo("a", (1200.0, 1000.0, 500.0), 10.0, 1),
            cargo("b", (1200.0, 900.0, 400.0), 10.0, 1),
            cargo("c", (1000.0, 1000.0, 300.0), 10.0, 1),
        ];
        let template = container((2400.0, 1900.0, 500.0), 100.0);
        let result = check_feasibility(&items, &template).unwrap();

        assert!(result.is_feasible(), "{:?}", result.unplaced_items);
        let c = result.placements.iter().find(|p| p.cargo_item_id == "c").unwrap();
        assert_eq!(c.position, (1200.0, 900.0, 0.0));
        assert_no_overlaps(&result);
    }
}
