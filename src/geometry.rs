//! Geometric helpers for placing boxes inside a container envelope.
//!
//! This module enumerates the orientations a cargo item may take and offers
//! the volume, fit and overlap checks the engine builds on.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::model::{CargoItem, OrientationRule};
use crate::types::{Dimensional, Vec3};

/// A concrete axis permutation of a cargo item's bounding box.
///
/// Extents are reported as (x, y, z) in container space, built from the
/// item's own length (l), width (w) and height (h).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    /// (l, w, h)
    AsGiven,
    /// (w, l, h)
    Turned,
    /// (h, w, l)
    LengthUp,
    /// (w, h, l)
    LengthUpTurned,
    /// (l, h, w)
    WidthUp,
    /// (h, l, w)
    WidthUpTurned,
}

impl Orientation {
    /// Fixed enumeration order; earlier entries win ties during placement.
    pub const ALL: [Orientation; 6] = [
        Orientation::AsGiven,
        Orientation::Turned,
        Orientation::LengthUp,
        Orientation::LengthUpTurned,
        Orientation::WidthUp,
        Orientation::WidthUpTurned,
    ];

    /// Applies the permutation to as-given extents.
    pub fn apply(self, dims: Vec3) -> Vec3 {
        let Vec3 { x: l, y: w, z: h } = dims;
        match self {
            Orientation::AsGiven => Vec3::new(l, w, h),
            Orientation::Turned => Vec3::new(w, l, h),
            Orientation::LengthUp => Vec3::new(h, w, l),
            Orientation::LengthUpTurned => Vec3::new(w, h, l),
            Orientation::WidthUp => Vec3::new(l, h, w),
            Orientation::WidthUpTurned => Vec3::new(h, l, w),
        }
    }

    fn is_permitted(self, item: &CargoItem) -> bool {
        let turn = item.allows(OrientationRule::RotateToHeight);
        match self {
            Orientation::AsGiven => true,
            Orientation::Turned => turn,
            Orientation::LengthUp => item.allows(OrientationRule::RotateToLength),
            Orientation::LengthUpTurned => item.allows(OrientationRule::RotateToLength) && turn,
            Orientation::WidthUp => item.allows(OrientationRule::RotateToWidth),
            Orientation::WidthUpTurned => item.allows(OrientationRule::RotateToWidth) && turn,
        }
    }
}

/// Lists the permitted orientations of an item with their canonical extents.
///
/// The as-given orientation always comes first. Orientations producing the
/// same extents as an earlier one (e.g. turning a square footprint) are skipped.
pub fn orientations(item: &CargoItem) -> Vec<(Orientation, Vec3)> {
    let dims = item.dimensions();
    let mut result: Vec<(Orientation, Vec3)> = Vec::with_capacity(Orientation::ALL.len());
    for orientation in Orientation::ALL {
        if !orientation.is_permitted(item) {
            continue;
        }
        let extents = orientation.apply(dims);
        if result.iter().any(|(_, seen)| *seen == extents) {
            continue;
        }
        result.push((orientation, extents));
    }
    result
}

/// Volume of a box in mm³.
pub fn volume(extents: Vec3) -> f64 {
    extents.volume()
}

/// Checks whether a box fits an envelope in at least one axis permutation.
pub fn fits(extents: Vec3, envelope: Vec3, tolerance: f64) -> bool {
    Orientation::ALL
        .iter()
        .any(|o| o.apply(extents).fits_within(&envelope, tolerance))
}

/// Checks whether any permitted orientation of an item fits an envelope.
pub fn item_fits(item: &CargoItem, envelope: Vec3, tolerance: f64) -> bool {
    orientations(item)
        .iter()
        .any(|(_, extents)| extents.fits_within(&envelope, tolerance))
}

/// Length of the overlap of two intervals, never negative.
///
/// # Example
/// ```
/// use stuffing_planner::geometry::overlap_1d;
///
/// let overlap = overlap_1d(0.0, 5.0, 3.0, 8.0);
/// assert_eq!(overlap, 2.0);
/// ```
pub fn overlap_1d(a1: f64, a2: f64, b1: f64, b2: f64) -> f64 {
    (a2.min(b2) - a1.max(b1)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BoxDimensions;
    use crate::types::EPSILON_GENERAL;
    use crate::units::Mass;

    fn item(l: f64, w: f64, h: f64) -> CargoItem {
        CargoItem::new(
            "i",
            "Item",
            BoxDimensions::mm(l, w, h).unwrap(),
            Mass::kg(1.0).unwrap(),
            1,
        )
        .unwrap()
    }

    #[test]
    fn as_given_only_by_default() {
        let options = orientations(&item(300.0, 200.0, 100.0));
        assert_eq!(options, vec![(Orientation::AsGiven, Vec3::new(300.0, 200.0, 100.0))]);
    }

    #[test]
    fn turning_swaps_footprint_sides() {
        let turned = item(300.0, 200.0, 100.0).with_orientations([OrientationRule::RotateToHeight]);
        let options = orientations(&turned);
        assert_eq!(options.len(), 2);
        assert_eq!(options[1], (Orientation::Turned, Vec3::new(200.0, 300.0, 100.0)));
    }

    #[test]
    fn all_rules_unlock_six_permutations() {
        let free = item(300.0, 200.0, 100.0).with_orientations([
            OrientationRule::RotateToLength,
            OrientationRule::RotateToWidth,
            OrientationRule::RotateToHeight,
        ]);
        let options = orientations(&free);
        assert_eq!(options.len(), 6);
        assert_eq!(options[0].0, Orientation::AsGiven);
        assert!(options.contains(&(Orientation::LengthUp, Vec3::new(100.0, 200.0, 300.0))));
        assert!(options.contains(&(Orientation::WidthUp, Vec3::new(300.0, 100.0, 200.0))));
    }

    #[test]
    fn tilt_without_turn_keeps_one_footprint_order() {
        let tilted = item(300.0, 200.0, 100.0).with_orientations([OrientationRule::RotateToWidth]);
        let options: Vec<_> = orientations(&tilted).into_iter().map(|(o, _)| o).collect();
        assert_eq!(options, vec![Orientation::AsGiven, Orientation::WidthUp]);
    }

    #[test]
    fn cubes_collapse_to_a_single_orientation() {
        let cube = item(500.0, 500.0, 500.0).with_orientations([
            OrientationRule::RotateToLength,
            OrientationRule::RotateToWidth,
            OrientationRule::RotateToHeight,
        ]);
        assert_eq!(orientations(&cube).len(), 1);
    }

    #[test]
    fn fits_considers_permutations() {
        let envelope = Vec3::new(1000.0, 500.0, 300.0);
        assert!(fits(Vec3::new(300.0, 1000.0, 500.0), envelope, EPSILON_GENERAL));
        assert!(!fits(Vec3::new(1100.0, 100.0, 100.0), envelope, EPSILON_GENERAL));
        assert!(!item_fits(&item(300.0, 1000.0, 500.0), envelope, EPSILON_GENERAL));
    }

    #[test]
    fn volume_and_overlap() {
        assert_eq!(volume(Vec3::new(10.0, 20.0, 30.0)), 6000.0);
        assert_eq!(overlap_1d(0.0, 5.0, 3.0, 8.0), 2.0);
        assert_eq!(overlap_1d(0.0, 5.0, 6.0, 8.0), 0.0);
    }
}
