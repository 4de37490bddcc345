//! Data models for cargo loading.
//!
//! This module defines the input entities of the planner:
//! - `CargoItem`: one product line with dimensions, weight, quantity and handling rules
//! - `ContainerTemplate`: one container or truck type with its usable envelope
//!
//! Values keep the units they were entered in; canonical conversions happen on access.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
#[allow(unused_imports)]
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use crate::types::{Dimensional, Vec3, Weighted};
use crate::units::{Canonical, Dimension, Mass};

/// Validation error for cargo and container data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Invalid identifier: {0}")]
    InvalidId(String),
    #[error("Invalid dimension: {0}")]
    InvalidDimension(String),
    #[error("Invalid weight: {0}")]
    InvalidWeight(String),
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),
    #[error("Contradictory stacking rules: {0}")]
    ContradictoryStacking(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Duplicate identifier: {0}")]
    DuplicateId(String),
    #[error("Unknown identifier: {0}")]
    UnknownItem(String),
}

fn validate_id(id: &str, kind: &str) -> Result<(), ValidationError> {
    if id.trim().is_empty() {
        return Err(ValidationError::InvalidId(format!(
            "{} id must not be empty",
            kind
        )));
    }
    Ok(())
}

/// Which re-orientations a cargo item tolerates when loaded.
///
/// `AsGiven` is always implied. The tilt rules each unlock one axis swap.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum OrientationRule {
    AsGiven,
    /// The length axis may stand vertical.
    RotateToLength,
    /// The width axis may stand vertical.
    RotateToWidth,
    /// The item may be turned about the vertical axis.
    RotateToHeight,
}

fn default_orientations() -> BTreeSet<OrientationRule> {
    BTreeSet::from([OrientationRule::AsGiven])
}

/// Length, width and height of a box.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BoxDimensions {
    pub length: Dimension,
    pub width: Dimension,
    pub height: Dimension,
}

impl BoxDimensions {
    pub fn new(length: Dimension, width: Dimension, height: Dimension) -> Self {
        Self {
            length,
            width,
            height,
        }
    }

    /// Shorthand for dimensions entered in millimetres.
    pub fn mm(length: f64, width: f64, height: f64) -> Result<Self, ValidationError> {
        Ok(Self::new(
            Dimension::mm(length)?,
            Dimension::mm(width)?,
            Dimension::mm(height)?,
        ))
    }

    /// Canonical extents (length → x, width → y, height → z) in mm.
    pub fn to_canonical(&self) -> Vec3 {
        Vec3::new(
            self.length.to_canonical(),
            self.width.to_canonical(),
            self.height.to_canonical(),
        )
    }

    fn validate(&self, prefix: &str) -> Result<(), ValidationError> {
        self.length.validate(&format!("{prefix}length"))?;
        self.width.validate(&format!("{prefix}width"))?;
        self.height.validate(&format!("{prefix}height"))?;
        Ok(())
    }
}

/// Stacking limits of a cargo item.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StackingRules {
    /// Maximum number of layers in any stack this item is part of.
    #[serde(default)]
    pub max_layers: Option<u32>,
    /// Maximum mass that may rest on top of one unit.
    #[serde(default)]
    pub max_stack_mass: Option<Mass>,
    /// Maximum height, measured from the floor, of any stack this item is part of.
    #[serde(default)]
    pub max_stack_height: Option<Dimension>,
    #[serde(default)]
    pub stacking_disabled: bool,
}

impl StackingRules {
    /// Stacking disabled entirely: one layer, nothing on top.
    pub fn disabled() -> Self {
        Self {
            stacking_disabled: true,
            ..Self::default()
        }
    }

    /// Layer limit honoring `stacking_disabled`.
    pub fn effective_max_layers(&self) -> u32 {
        if self.stacking_disabled {
            1
        } else {
            self.max_layers.unwrap_or(u32::MAX)
        }
    }

    /// Stack height limit in mm.
    pub fn max_stack_height_mm(&self) -> f64 {
        self.max_stack_height
            .map(|h| h.to_canonical())
            .unwrap_or(f64::INFINITY)
    }

    /// Mass that may rest on one unit, in kg.
    pub fn max_stack_mass_kg(&self) -> f64 {
        if self.stacking_disabled {
            return 0.0;
        }
        self.max_stack_mass
            .map(|m| m.to_canonical())
            .unwrap_or(f64::INFINITY)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.stacking_disabled
            && (self.max_stack_height.is_some() || self.max_stack_mass.is_some())
        {
            return Err(ValidationError::ContradictoryStacking(
                "max_stack_height / max_stack_mass given while stacking is disabled".to_string(),
            ));
        }
        if self.max_layers == Some(0) {
            return Err(ValidationError::ContradictoryStacking(
                "max_layers must be at least 1".to_string(),
            ));
        }
        if let Some(height) = &self.max_stack_height {
            height.validate("Maximum stack height")?;
        }
        if let Some(mass) = &self.max_stack_mass {
            mass.validate("Maximum stack mass")?;
        }
        Ok(())
    }
}

/// One product line to be loaded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "pallet-a",
    "name": "Euro pallet",
    "dimensions": {
        "length": { "value": 120.0, "unit": "cm" },
        "width": { "value": 80.0, "unit": "cm" },
        "height": { "value": 150.0, "unit": "cm" }
    },
    "weight": { "value": 450.0, "unit": "kg" },
    "quantity": 10,
    "allowed_orientations": ["as_given", "rotate_to_height"],
    "stacking": { "max_layers": 2 },
    "group_id": "group-1"
}))]
pub struct CargoItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub dimensions: BoxDimensions,
    /// Weight per unit.
    pub weight: Mass,
    pub quantity: u32,
    #[serde(default = "default_orientations")]
    #[schema(value_type = Vec<OrientationRule>)]
    pub allowed_orientations: BTreeSet<OrientationRule>,
    #[serde(default)]
    pub stacking: StackingRules,
    #[serde(default)]
    pub group_id: Option<String>,
}

impl CargoItem {
    /// Creates a new cargo line with validation.
    ///
    /// Only the as-given orientation is allowed and stacking is unrestricted
    /// until configured otherwise.
    ///
    /// # Examples
    /// ```
    /// use stuffing_planner::model::{BoxDimensions, CargoItem};
    /// use stuffing_planner::units::Mass;
    ///
    /// let dims = BoxDimensions::mm(1200.0, 800.0, 1000.0).unwrap();
    /// let item = CargoItem::new("p1", "Pallet", dims, Mass::kg(300.0).unwrap(), 4);
    /// assert!(item.is_ok());
    ///
    /// let empty = CargoItem::new("p2", "Pallet", dims, Mass::kg(300.0).unwrap(), 0);
    /// assert!(empty.is_err());
    /// ```
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        dimensions: BoxDimensions,
        weight: Mass,
        quantity: u32,
    ) -> Result<Self, ValidationError> {
        let item = Self {
            id: id.into(),
            name: name.into(),
            dimensions,
            weight,
            quantity,
            allowed_orientations: default_orientations(),
            stacking: StackingRules::default(),
            group_id: None,
        };
        item.validate()?;
        Ok(item)
    }

    /// Adds orientation permissions (as-given stays allowed).
    pub fn with_orientations(mut self, rules: impl IntoIterator<Item = OrientationRule>) -> Self {
        self.allowed_orientations.extend(rules);
        self
    }

    /// Replaces the stacking rules after validating them.
    pub fn with_stacking(mut self, stacking: StackingRules) -> Result<Self, ValidationError> {
        stacking.validate()?;
        self.stacking = stacking;
        Ok(self)
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Checks every invariant of a cargo line.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_id(&self.id, "Cargo item")?;
        self.dimensions.validate("Item ")?;
        self.weight.validate("Item weight")?;
        if self.quantity < 1 {
            return Err(ValidationError::InvalidQuantity(format!(
                "quantity of '{}' must be at least 1, got: {}",
                self.id, self.quantity
            )));
        }
        self.stacking.validate()
    }

    pub fn allows(&self, rule: OrientationRule) -> bool {
        rule == OrientationRule::AsGiven || self.allowed_orientations.contains(&rule)
    }

    /// Weight of one unit in kg.
    pub fn unit_weight_kg(&self) -> f64 {
        self.weight.to_canonical()
    }

    /// Volume of all units of this line in mm³.
    pub fn total_volume(&self) -> f64 {
        self.volume() * self.quantity as f64
    }

    /// Weight of all units of this line in kg.
    pub fn total_weight(&self) -> f64 {
        self.unit_weight_kg() * self.quantity as f64
    }

    /// Same line with a different quantity (used for residual cargo).
    pub fn with_quantity(&self, quantity: u32) -> Self {
        Self {
            quantity,
            ..self.clone()
        }
    }
}

impl Dimensional for CargoItem {
    fn dimensions(&self) -> Vec3 {
        self.dimensions.to_canonical()
    }
}

impl Weighted for CargoItem {
    fn weight(&self) -> f64 {
        self.unit_weight_kg()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContainerCategory {
    Container,
    Truck,
}

/// Template for a container or truck type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "20ft-std",
    "name": "20ft Standard",
    "category": "container",
    "internal_dimensions": {
        "length": { "value": 5898.0, "unit": "mm" },
        "width": { "value": 2352.0, "unit": "mm" },
        "height": { "value": 2393.0, "unit": "mm" }
    },
    "max_payload": { "value": 21770.0, "unit": "kg" },
    "cost_per_unit": 1.0,
    "availability": true
}))]
pub struct ContainerTemplate {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub category: ContainerCategory,
    /// Usable packing envelope.
    pub internal_dimensions: BoxDimensions,
    pub max_payload: Mass,
    #[serde(default)]
    pub cost_per_unit: f64,
    /// `false` for "coming soon" templates.
    #[serde(default = "default_availability")]
    pub availability: bool,
}

fn default_availability() -> bool {
    true
}

impl ContainerTemplate {
    /// Creates a new available template after validating the parameters.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: ContainerCategory,
        internal_dimensions: BoxDimensions,
        max_payload: Mass,
        cost_per_unit: f64,
    ) -> Result<Self, ValidationError> {
        let template = Self {
            id: id.into(),
            name: name.into(),
            category,
            internal_dimensions,
            max_payload,
            cost_per_unit,
            availability: true,
        };
        template.validate()?;
        Ok(template)
    }

    /// Marks the template as "coming soon".
    pub fn coming_soon(mut self) -> Self {
        self.availability = false;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_id(&self.id, "Container template")?;
        self.internal_dimensions.validate("Container ")?;
        self.max_payload.validate("Maximum payload")?;
        if self.cost_per_unit < 0.0 || !self.cost_per_unit.is_finite() {
            return Err(ValidationError::InvalidConfiguration(format!(
                "cost per unit of '{}' must be a non-negative number, got: {}",
                self.id, self.cost_per_unit
            )));
        }
        Ok(())
    }

    /// Usable envelope in mm.
    pub fn envelope(&self) -> Vec3 {
        self.internal_dimensions.to_canonical()
    }

    /// Payload limit in kg.
    pub fn payload_kg(&self) -> f64 {
        self.max_payload.to_canonical()
    }
}

impl Dimensional for ContainerTemplate {
    fn dimensions(&self) -> Vec3 {
        self.envelope()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{LengthUnit, MassUnit};

    fn pallet() -> CargoItem {
        CargoItem::new(
            "p1",
            "Pallet",
            BoxDimensions::mm(1200.0, 800.0, 1000.0).unwrap(),
            Mass::kg(250.0).unwrap(),
            3,
        )
        .unwrap()
    }

    #[test]
    fn cargo_item_aggregates_use_canonical_units() {
        let item = CargoItem::new(
            "c1",
            "Crate",
            BoxDimensions::new(
                Dimension::new(1.0, LengthUnit::M).unwrap(),
                Dimension::new(50.0, LengthUnit::Cm).unwrap(),
                Dimension::new(200.0, LengthUnit::Mm).unwrap(),
            ),
            Mass::new(0.5, MassUnit::Ton).unwrap(),
            2,
        )
        .unwrap();

        assert_eq!(item.dimensions(), Vec3::new(1000.0, 500.0, 200.0));
        assert_eq!(item.total_volume(), 2.0 * 1000.0 * 500.0 * 200.0);
        assert_eq!(item.total_weight(), 1000.0);
    }

    #[test]
    fn rejects_zero_quantity() {
        let mut item = pallet();
        item.quantity = 0;
        assert!(matches!(
            item.validate(),
            Err(ValidationError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn rejects_contradictory_stacking() {
        let rules = StackingRules {
            stacking_disabled: true,
            max_stack_mass: Some(Mass::kg(100.0).unwrap()),
            ..StackingRules::default()
        };
        assert!(matches!(
            pallet().with_stacking(rules),
            Err(ValidationError::ContradictoryStacking(_))
        ));

        let zero_layers = StackingRules {
            max_layers: Some(0),
            ..StackingRules::default()
        };
        assert!(pallet().with_stacking(zero_layers).is_err());
    }

    #[test]
    fn disabled_stacking_means_single_layer() {
        let rules = StackingRules {
            max_layers: Some(4),
            stacking_disabled: true,
            ..StackingRules::default()
        };
        assert_eq!(rules.effective_max_layers(), 1);
        assert_eq!(rules.max_stack_mass_kg(), 0.0);
        assert_eq!(StackingRules::default().effective_max_layers(), u32::MAX);
    }

    #[test]
    fn as_given_is_always_allowed() {
        let item = pallet();
        assert!(item.allows(OrientationRule::AsGiven));
        assert!(!item.allows(OrientationRule::RotateToLength));
        let tilted = item.with_orientations([OrientationRule::RotateToLength]);
        assert!(tilted.allows(OrientationRule::RotateToLength));
    }

    #[test]
    fn cargo_item_defaults_from_json() {
        let json = r#"{
            "id": "box-1",
            "dimensions": {
                "length": {"value": 40, "unit": "cm"},
                "width": {"value": 30, "unit": "cm"},
                "height": {"value": 20, "unit": "cm"}
            },
            "weight": {"value": 12, "unit": "kg"},
            "quantity": 5
        }"#;
        let item: CargoItem = serde_json::from_str(json).expect("should parse");
        assert!(item.validate().is_ok());
        assert_eq!(
            item.allowed_orientations,
            BTreeSet::from([OrientationRule::AsGiven])
        );
        assert!(!item.stacking.stacking_disabled);
        assert!(item.group_id.is_none());
    }

    #[test]
    fn container_template_validation() {
        let ok = ContainerTemplate::new(
            "20ft",
            "20ft Standard",
            ContainerCategory::Container,
            BoxDimensions::mm(5898.0, 2352.0, 2393.0).unwrap(),
            Mass::kg(21770.0).unwrap(),
            1500.0,
        )
        .unwrap();
        assert!(ok.availability);
        assert!(!ok.clone().coming_soon().availability);
        assert_eq!(ok.payload_kg(), 21770.0);

        let mut negative_cost = ok.clone();
        negative_cost.cost_per_unit = -1.0;
        assert!(negative_cost.validate().is_err());

        let mut flat = ok;
        flat.internal_dimensions.height = Dimension {
            value: 0.0,
            unit: LengthUnit::Mm,
        };
        assert!(matches!(
            flat.validate(),
            Err(ValidationError::InvalidDimension(_))
        ));
    }
}
