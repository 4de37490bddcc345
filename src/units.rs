//! Physical units for cargo and container measurements.
//!
//! Form input arrives as a number plus a unit selector. Everything inside the
//! engine works in canonical units: millimetres for lengths, kilograms for mass.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
#[allow(unused_imports)]
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use crate::model::ValidationError;

/// Raised when a unit tag cannot be recognized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized unit tag '{tag}'")]
pub struct InvalidUnitError {
    pub tag: String,
}

impl InvalidUnitError {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
        }
    }
}

/// Length units accepted from the input forms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LengthUnit {
    Mm,
    Cm,
    M,
}

impl LengthUnit {
    /// Millimetres per unit.
    pub const fn mm_factor(self) -> f64 {
        match self {
            LengthUnit::Mm => 1.0,
            LengthUnit::Cm => 10.0,
            LengthUnit::M => 1000.0,
        }
    }

    pub const fn tag(self) -> &'static str {
        match self {
            LengthUnit::Mm => "mm",
            LengthUnit::Cm => "cm",
            LengthUnit::M => "m",
        }
    }
}

impl FromStr for LengthUnit {
    type Err = InvalidUnitError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mm" => Ok(LengthUnit::Mm),
            "cm" => Ok(LengthUnit::Cm),
            "m" => Ok(LengthUnit::M),
            _ => Err(InvalidUnitError::new(raw)),
        }
    }
}

impl TryFrom<String> for LengthUnit {
    type Error = InvalidUnitError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LengthUnit> for String {
    fn from(unit: LengthUnit) -> Self {
        unit.tag().to_string()
    }
}

impl fmt::Display for LengthUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Mass units accepted from the input forms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MassUnit {
    G,
    Kg,
    Ton,
}

impl MassUnit {
    /// Kilograms per unit (metric ton).
    pub const fn kg_factor(self) -> f64 {
        match self {
            MassUnit::G => 0.001,
            MassUnit::Kg => 1.0,
            MassUnit::Ton => 1000.0,
        }
    }

    pub const fn tag(self) -> &'static str {
        match self {
            MassUnit::G => "g",
            MassUnit::Kg => "kg",
            MassUnit::Ton => "ton",
        }
    }
}

impl FromStr for MassUnit {
    type Err = InvalidUnitError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "g" => Ok(MassUnit::G),
            "kg" => Ok(MassUnit::Kg),
            "ton" | "t" => Ok(MassUnit::Ton),
            _ => Err(InvalidUnitError::new(raw)),
        }
    }
}

impl TryFrom<String> for MassUnit {
    type Error = InvalidUnitError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MassUnit> for String {
    fn from(unit: MassUnit) -> Self {
        unit.tag().to_string()
    }
}

impl fmt::Display for MassUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Conversion into the engine's canonical unit (mm or kg).
pub trait Canonical {
    fn to_canonical(&self) -> f64;
}

/// A length with its unit, e.g. `120 cm`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "value": 120.0, "unit": "cm" }))]
pub struct Dimension {
    pub value: f64,
    #[schema(value_type = String, example = "cm")]
    pub unit: LengthUnit,
}

impl Dimension {
    /// Creates a validated dimension (`value` must be positive and finite).
    pub fn new(value: f64, unit: LengthUnit) -> Result<Self, ValidationError> {
        let dimension = Self { value, unit };
        dimension.validate("Dimension")?;
        Ok(dimension)
    }

    pub fn mm(value: f64) -> Result<Self, ValidationError> {
        Self::new(value, LengthUnit::Mm)
    }

    pub(crate) fn validate(&self, name: &str) -> Result<(), ValidationError> {
        if self.value <= 0.0 || !self.value.is_finite() {
            return Err(ValidationError::InvalidDimension(format!(
                "{} must be positive, got: {} {}",
                name, self.value, self.unit
            )));
        }
        Ok(())
    }
}

impl Canonical for Dimension {
    fn to_canonical(&self) -> f64 {
        self.value * self.unit.mm_factor()
    }
}

/// A mass with its unit, e.g. `2.5 ton`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "value": 500.0, "unit": "kg" }))]
pub struct Mass {
    pub value: f64,
    #[schema(value_type = String, example = "kg")]
    pub unit: MassUnit,
}

impl Mass {
    /// Creates a validated mass (`value` must be positive and finite).
    pub fn new(value: f64, unit: MassUnit) -> Result<Self, ValidationError> {
        let mass = Self { value, unit };
        mass.validate("Weight")?;
        Ok(mass)
    }

    pub fn kg(value: f64) -> Result<Self, ValidationError> {
        Self::new(value, MassUnit::Kg)
    }

    pub(crate) fn validate(&self, name: &str) -> Result<(), ValidationError> {
        if self.value <= 0.0 || !self.value.is_finite() {
            return Err(ValidationError::InvalidWeight(format!(
                "{} must be positive, got: {} {}",
                name, self.value, self.unit
            )));
        }
        Ok(())
    }
}

impl Canonical for Mass {
    fn to_canonical(&self) -> f64 {
        self.value * self.unit.kg_factor()
    }
}
