//! Cargo-to-container loading planner.
//!
//! Canonicalizes cargo and container data, checks how much cargo fits into a
//! single container instance, and plans loads across several instances.
//! The [`api`] module exposes the same operations over HTTP.

pub mod api;
pub mod catalog;
pub mod config;
pub mod geometry;
pub mod model;
pub mod optimizer;
pub mod planner;
pub mod report;
pub mod types;
pub mod units;

pub use catalog::{CargoCatalog, CargoItemPatch, ContainerCatalog};
pub use model::{
    BoxDimensions, CargoItem, ContainerCategory, ContainerTemplate, OrientationRule,
    StackingRules, ValidationError,
};
pub use optimizer::{
    PackingConfig, PlacementResult, PlanningError, check_feasibility,
    check_feasibility_with_config,
};
pub use planner::{LoadingPlan, PlanOptions, PlanningMode, plan_loading, plan_loading_with_progress};
pub use report::{PlanReport, summarize};
pub use units::{Canonical, Dimension, InvalidUnitError, LengthUnit, Mass, MassUnit};
