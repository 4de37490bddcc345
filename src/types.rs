//! Common types and traits for 3D geometry.
//!
//! All values here are canonical: millimetres for lengths, kilograms for mass.

use std::ops::{Add, Sub};

/// Global numerical tolerance for floating-point comparisons.
pub const EPSILON_GENERAL: f64 = 1e-6;

/// Tolerance for height comparisons in the Z-plane.
///
/// Slightly larger tolerance for height matching during stacking.
pub const EPSILON_HEIGHT: f64 = 1e-3;

/// Represents a 3D vector or point in container-local space.
///
/// X runs along the container length, Y along its width, Z is vertical.
///
/// # Examples
/// ```
/// use stuffing_planner::types::Vec3;
///
/// let position = Vec3::new(1000.0, 0.0, 0.0);
/// let extents = Vec3::new(1200.0, 800.0, 1500.0);
/// let far_corner = position + extents;
/// assert_eq!(far_corner.x, 2200.0);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    #[inline]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Converts to tuple format for API compatibility.
    #[inline]
    pub const fn as_tuple(&self) -> (f64, f64, f64) {
        (self.x, self.y, self.z)
    }

    /// Creates from tuple format.
    #[inline]
    pub const fn from_tuple(tuple: (f64, f64, f64)) -> Self {
        Self::new(tuple.0, tuple.1, tuple.2)
    }

    /// Calculates the volume (product of all components).
    #[inline]
    pub fn volume(&self) -> f64 {
        self.x * self.y * self.z
    }

    /// Calculates the base area (X × Y product).
    #[inline]
    pub fn base_area(&self) -> f64 {
        self.x * self.y
    }

    /// Checks if the vector fits within another vector (component-wise <=).
    ///
    /// # Parameters
    /// * `container` - The outer vector (e.g., container dimensions)
    /// * `tolerance` - Numerical tolerance for the comparison
    #[inline]
    pub fn fits_within(&self, container: &Self, tolerance: f64) -> bool {
        self.x <= container.x + tolerance
            && self.y <= container.y + tolerance
            && self.z <= container.z + tolerance
    }
}

impl Add for Vec3 {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl From<(f64, f64, f64)> for Vec3 {
    #[inline]
    fn from(tuple: (f64, f64, f64)) -> Self {
        Self::from_tuple(tuple)
    }
}

impl From<Vec3> for (f64, f64, f64) {
    #[inline]
    fn from(vec: Vec3) -> Self {
        vec.as_tuple()
    }
}

/// Trait for objects with canonical 3D extents.
pub trait Dimensional {
    /// Returns the extents in millimetres.
    fn dimensions(&self) -> Vec3;

    /// Calculates the volume in mm³.
    fn volume(&self) -> f64 {
        self.dimensions().volume()
    }

    /// Calculates the base area in mm².
    fn base_area(&self) -> f64 {
        self.dimensions().base_area()
    }
}

/// Trait for objects with a position in container-local space.
pub trait Positioned {
    /// Returns the position (lower left front corner).
    fn position(&self) -> Vec3;
}

/// Trait for objects with weight.
pub trait Weighted {
    /// Returns the weight in kg.
    fn weight(&self) -> f64;
}

/// Represents an Axis-Aligned Bounding Box (AABB).
///
/// Used for collision checks and support-area calculation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    /// Minimum corner (position)
    pub min: Vec3,
    /// Maximum corner (position + dimensions)
    pub max: Vec3,
}

impl BoundingBox {
    /// Creates a bounding box from position and dimensions.
    #[inline]
    pub fn from_position_and_dims(position: Vec3, dims: Vec3) -> Self {
        Self {
            min: position,
            max: position + dims,
        }
    }

    /// Checks if two bounding boxes intersect.
    ///
    /// Implements the Separating Axis Theorem (SAT) for AABBs. Boxes that
    /// merely touch within `tolerance` do not intersect.
    #[inline]
    pub fn intersects(&self, other: &Self, tolerance: f64) -> bool {
        !(self.max.x <= other.min.x + tolerance
            || other.max.x <= self.min.x + tolerance
            || self.max.y <= other.min.y + tolerance
            || other.max.y <= self.min.y + tolerance
            || self.max.z <= other.min.z + tolerance
            || other.max.z <= self.min.z + tolerance)
    }

    /// Calculates the overlap area in the XY plane.
    #[inline]
    pub fn overlap_area_xy(&self, other: &Self) -> f64 {
        let overlap_x = crate::geometry::overlap_1d(self.min.x, self.max.x, other.min.x, other.max.x);
        let overlap_y = crate::geometry::overlap_1d(self.min.y, self.max.y, other.min.y, other.max.y);
        overlap_x * overlap_y
    }

    /// Returns the top (Z maximum).
    #[inline]
    pub fn top_z(&self) -> f64 {
        self.max.z
    }

    /// Returns the center point.
    #[inline]
    pub fn center(&self) -> Vec3 {
        Vec3::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
            (self.min.z + self.max.z) / 2.0,
        )
    }
}

/// Center of mass calculation helper.
///
/// Accumulates weighted positions for center of mass calculation.
#[derive(Clone, Debug, Default)]
pub struct CenterOfMassCalculator {
    weighted_x: f64,
    weighted_y: f64,
    total_weight: f64,
}

impl CenterOfMassCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a weighted point.
    pub fn add_point(&mut self, x: f64, y: f64, weight: f64) {
        self.weighted_x += x * weight;
        self.weighted_y += y * weight;
        self.total_weight += weight;
    }

    /// Calculates the center of mass.
    ///
    /// # Returns
    /// `Some((x, y))` for valid center of mass, `None` if no weight present
    pub fn compute(&self) -> Option<(f64, f64)> {
        if self.total_weight <= 0.0 {
            None
        } else {
            Some((
                self.weighted_x / self.total_weight,
                self.weighted_y / self.total_weight,
            ))
        }
    }
}
