//! Mathematical types shared between the kernel and its collaborators.
//!
//! These are the canonical representations written into instance buffers.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// 2D Vector - positions, velocities, extents
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Vec2 {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
}

impl Vec2 {
    /// Creates a new Vec2
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Zero vector
    pub const ZERO: Self = Self::new(0.0, 0.0);

    /// Converts to array
    #[must_use]
    pub const fn to_array(self) -> [f32; 2] {
        [self.x, self.y]
    }

    /// Dot product
    #[must_use]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y
    }

    /// Length
    #[must_use]
    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }
}

impl std::ops::Add for Vec2 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Mul<f32> for Vec2 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

/// 2D affine transform.
///
/// Maps `(x, y)` to `(a*x + c*y + tx, b*x + d*y + ty)`. The linear part is
/// stored column-major so `to_array` matches the instance record layout.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Transform2D {
    /// X axis, x component
    pub a: f32,
    /// X axis, y component
    pub b: f32,
    /// Y axis, x component
    pub c: f32,
    /// Y axis, y component
    pub d: f32,
    /// Translation x
    pub tx: f32,
    /// Translation y
    pub ty: f32,
}

impl Transform2D {
    /// Identity transform
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Pure translation
    #[must_use]
    pub const fn from_translation(x: f32, y: f32) -> Self {
        Self {
            tx: x,
            ty: y,
            ..Self::IDENTITY
        }
    }

    /// Counter-clockwise rotation by `radians`
    #[must_use]
    pub fn from_rotation(radians: f32) -> Self {
        let (sin, cos) = radians.sin_cos();
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// Non-uniform scale
    #[must_use]
    pub const fn from_scale(sx: f32, sy: f32) -> Self {
        Self {
            a: sx,
            d: sy,
            ..Self::IDENTITY
        }
    }

    /// Translation, then rotation, then scale (applied to points right to left).
    #[must_use]
    pub fn from_trs(translation: Vec2, radians: f32, scale: Vec2) -> Self {
        let (sin, cos) = radians.sin_cos();
        Self {
            a: cos * scale.x,
            b: sin * scale.x,
            c: -sin * scale.y,
            d: cos * scale.y,
            tx: translation.x,
            ty: translation.y,
        }
    }

    /// Composition `self ∘ local`: first `local`, then `self`.
    ///
    /// A parent's world transform composed with a child's local transform
    /// gives the child's world transform.
    #[inline]
    #[must_use]
    pub fn then(self, local: Self) -> Self {
        Self {
            a: self.a * local.a + self.c * local.b,
            b: self.b * local.a + self.d * local.b,
            c: self.a * local.c + self.c * local.d,
            d: self.b * local.c + self.d * local.d,
            tx: self.a * local.tx + self.c * local.ty + self.tx,
            ty: self.b * local.tx + self.d * local.ty + self.ty,
        }
    }

    /// Determinant of the linear part
    #[inline]
    #[must_use]
    pub fn determinant(self) -> f32 {
        self.a * self.d - self.b * self.c
    }

    /// Inverse transform, or `None` when the linear part is singular.
    #[must_use]
    pub fn inverse(self) -> Option<Self> {
        let det = self.determinant();
        if det.abs() <= f32::EPSILON * f32::EPSILON {
            return None;
        }
        let inv = 1.0 / det;
        let a = self.d * inv;
        let b = -self.b * inv;
        let c = -self.c * inv;
        let d = self.a * inv;
        Some(Self {
            a,
            b,
            c,
            d,
            tx: -(a * self.tx + c * self.ty),
            ty: -(b * self.tx + d * self.ty),
        })
    }

    /// Applies the transform to a point
    #[inline]
    #[must_use]
    pub fn transform_point(self, p: Vec2) -> Vec2 {
        Vec2::new(
            self.a * p.x + self.c * p.y + self.tx,
            self.b * p.x + self.d * p.y + self.ty,
        )
    }

    /// Translation part
    #[inline]
    #[must_use]
    pub const fn translation(self) -> Vec2 {
        Vec2::new(self.tx, self.ty)
    }

    /// Length of the transformed x axis (horizontal scale)
    #[inline]
    #[must_use]
    pub fn x_axis_length(self) -> f32 {
        (self.a * self.a + self.b * self.b).sqrt()
    }

    /// Component-wise comparison within `epsilon`
    #[must_use]
    pub fn approx_eq(self, other: Self, epsilon: f32) -> bool {
        self.to_array()
            .iter()
            .zip(other.to_array().iter())
            .all(|(x, y)| (x - y).abs() <= epsilon)
    }

    /// Converts to array in instance-record order
    #[must_use]
    pub const fn to_array(self) -> [f32; 6] {
        [self.a, self.b, self.c, self.d, self.tx, self.ty]
    }
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::IDENTITY
    }
}
