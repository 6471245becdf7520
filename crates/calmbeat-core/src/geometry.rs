//! Geometric primitives for tracked-device poses.

use nalgebra::{Point3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// 3D position in the tracking space (meters)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position3D {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn origin() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn to_nalgebra(&self) -> Point3<f64> {
        Point3::new(self.x, self.y, self.z)
    }

    pub fn from_nalgebra(p: Point3<f64>) -> Self {
        Self::new(p.x, p.y, p.z)
    }

    pub fn distance_to(&self, other: &Self) -> f64 {
        (self.to_nalgebra() - other.to_nalgebra()).norm()
    }

    /// Displacement from `previous` to `self`
    pub fn displacement_from(&self, previous: &Self) -> Vector3<f64> {
        self.to_nalgebra() - previous.to_nalgebra()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Default for Position3D {
    fn default() -> Self {
        Self::origin()
    }
}

/// 3D velocity vector (meters/second)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Velocity3D {
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
}

impl Velocity3D {
    pub fn new(vx: f64, vy: f64, vz: f64) -> Self {
        Self { vx, vy, vz }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Finite-difference velocity between two positions. Returns zero for `dt <= 0`.
    pub fn between(previous: &Position3D, current: &Position3D, dt: f64) -> Self {
        if dt <= 0.0 || !dt.is_finite() {
            return Self::zero();
        }
        Self::from_vector(current.displacement_from(previous) / dt)
    }

    pub fn magnitude(&self) -> f64 {
        self.to_vector().norm()
    }

    /// Unit direction of travel, `None` for a (near) zero vector
    pub fn direction(&self) -> Option<Vector3<f64>> {
        self.to_vector().try_normalize(1e-12)
    }

    pub fn to_vector(&self) -> Vector3<f64> {
        Vector3::new(self.vx, self.vy, self.vz)
    }

    pub fn from_vector(v: Vector3<f64>) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl Default for Velocity3D {
    fn default() -> Self {
        Self::zero()
    }
}

/// Orientation in 3D space using quaternion representation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orientation3D {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Orientation3D {
    /// Normalizing constructor. A zero or non-finite quaternion becomes identity.
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        let norm = (w * w + x * x + y * y + z * z).sqrt();
        if norm < 1e-12 || !norm.is_finite() {
            return Self::identity();
        }
        Self {
            w: w / norm,
            x: x / norm,
            y: y / norm,
            z: z / norm,
        }
    }

    pub fn identity() -> Self {
        Self {
            w: 1.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }

    /// Create from Euler angles (roll, pitch, yaw) in radians
    pub fn from_euler(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self::from_nalgebra(UnitQuaternion::from_euler_angles(roll, pitch, yaw))
    }

    /// Rotation of `angle` radians about `axis`
    pub fn from_axis_angle(axis: Vector3<f64>, angle: f64) -> Self {
        match nalgebra::Unit::try_new(axis, 1e-12) {
            Some(axis) => Self::from_nalgebra(UnitQuaternion::from_axis_angle(&axis, angle)),
            None => Self::identity(),
        }
    }

    /// A zero quaternion built from the public fields maps to identity
    pub fn to_nalgebra(&self) -> UnitQuaternion<f64> {
        let q = nalgebra::Quaternion::new(self.w, self.x, self.y, self.z);
        UnitQuaternion::try_new(q, 1e-12).unwrap_or_else(UnitQuaternion::identity)
    }

    /// Squared length of the raw components
    pub fn norm_squared(&self) -> f64 {
        self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z
    }

    pub fn from_nalgebra(q: UnitQuaternion<f64>) -> Self {
        Self {
            w: q.w,
            x: q.i,
            y: q.j,
            z: q.k,
        }
    }

    /// Smallest rotation angle between two orientations, in radians [0, π]
    pub fn angle_to(&self, other: &Self) -> f64 {
        self.to_nalgebra().angle_to(&other.to_nalgebra())
    }

    /// Smallest rotation angle between two orientations, in degrees [0, 180]
    pub fn angle_to_degrees(&self, other: &Self) -> f64 {
        self.angle_to(other).to_degrees()
    }

    pub fn is_finite(&self) -> bool {
        self.w.is_finite() && self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Default for Orientation3D {
    fn default() -> Self {
        Self::identity()
    }
}
