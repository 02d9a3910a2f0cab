//! Scalar and quaternion kernels shared by the codecs and transforms.

use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};

pub const INV_SIGMOID_EPS: f64 = 1e-6;

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Inverse sigmoid with the argument clamped away from 0 and 1.
pub fn inv_sigmoid(x: f64) -> f64 {
    let x = x.clamp(INV_SIGMOID_EPS, 1.0 - INV_SIGMOID_EPS);
    (x / (1.0 - x)).ln()
}

/// Unit quaternion from intrinsic x/y/z Euler angles in degrees.
pub fn quat_from_euler_deg(x: f64, y: f64, z: f64) -> UnitQuaternion<f64> {
    UnitQuaternion::from_euler_angles(x.to_radians(), y.to_radians(), z.to_radians())
}

/// Normalize `(w, x, y, z)`, falling back to identity for zero length.
pub fn normalize_or_identity(w: f64, x: f64, y: f64, z: f64) -> UnitQuaternion<f64> {
    let q = Quaternion::new(w, x, y, z);
    UnitQuaternion::try_new(q, 1e-12).unwrap_or_else(UnitQuaternion::identity)
}

/// Smallest-three quaternion encoding.
///
/// Returns the index of the max-absolute component in `(w, x, y, z)` order
/// and the remaining three components, sign-adjusted so the max is positive
/// and scaled by `sqrt(2)` into `[-1, 1]`.
pub fn smallest_three_encode(q: &UnitQuaternion<f64>) -> (usize, [f64; 3]) {
    let c = [q.w, q.i, q.j, q.k];
    let mut max_index = 0;
    for i in 1..4 {
        if c[i].abs() > c[max_index].abs() {
            max_index = i;
        }
    }
    let sign = if c[max_index] < 0.0 { -1.0 } else { 1.0 };
    let mut rest = [0.0; 3];
    let mut slot = 0;
    for (i, &value) in c.iter().enumerate() {
        if i != max_index {
            rest[slot] = sign * value * std::f64::consts::SQRT_2;
            slot += 1;
        }
    }
    (max_index, rest)
}

/// Inverse of [`smallest_three_encode`]: reconstruct the omitted component
/// so the unit norm holds.
pub fn smallest_three_decode(max_index: usize, rest: [f64; 3]) -> UnitQuaternion<f64> {
    let a = rest[0] / std::f64::consts::SQRT_2;
    let b = rest[1] / std::f64::consts::SQRT_2;
    let c = rest[2] / std::f64::consts::SQRT_2;
    let max = (1.0 - a * a - b * b - c * c).max(0.0).sqrt();

    let mut out = [0.0; 4];
    out[max_index] = max;
    let mut slot = 0;
    for (i, value) in out.iter_mut().enumerate() {
        if i != max_index {
            *value = [a, b, c][slot];
            slot += 1;
        }
    }
    normalize_or_identity(out[0], out[1], out[2], out[3])
}

/// A rigid transform with uniform scale, applied as `p' = R * (s * p) + t`.
#[derive(Debug, Clone)]
pub struct Trs {
    pub translation: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
    pub scale: f64,
}

impl Trs {
    pub fn identity() -> Self {
        Self {
            translation: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            scale: 1.0,
        }
    }

    pub fn translation(t: Vector3<f64>) -> Self {
        Self {
            translation: t,
            ..Self::identity()
        }
    }

    pub fn rotation(q: UnitQuaternion<f64>) -> Self {
        Self {
            rotation: q,
            ..Self::identity()
        }
    }

    pub fn scaling(s: f64) -> Self {
        Self {
            scale: s,
            ..Self::identity()
        }
    }

    pub fn is_identity(&self) -> bool {
        self.translation == Vector3::zeros()
            && self.rotation == UnitQuaternion::identity()
            && self.scale == 1.0
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    pub fn apply_point(&self, p: Vector3<f64>) -> Vector3<f64> {
        self.rotation * (p * self.scale) + self.translation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_inverse_round_trip() {
        for x in [-8.0, -1.5, 0.0, 0.3, 6.0] {
            assert!((inv_sigmoid(sigmoid(x)) - x).abs() < 1e-9);
        }
    }

    #[test]
    fn inv_sigmoid_clamps_extremes() {
        assert!(inv_sigmoid(0.0).is_finite());
        assert!(inv_sigmoid(1.0).is_finite());
        assert!(inv_sigmoid(0.0) < -13.0);
    }

    #[test]
    fn zero_quaternion_becomes_identity() {
        let q = normalize_or_identity(0.0, 0.0, 0.0, 0.0);
        assert_eq!(q, UnitQuaternion::identity());
    }

    #[test]
    fn smallest_three_round_trip() {
        let samples = [
            quat_from_euler_deg(10.0, 20.0, 30.0),
            quat_from_euler_deg(-45.0, 90.0, 0.0),
            quat_from_euler_deg(170.0, -10.0, 110.0),
            UnitQuaternion::identity(),
        ];
        for q in samples {
            let (max_index, rest) = smallest_three_encode(&q);
            for value in rest {
                assert!((-1.0..=1.0).contains(&value));
            }
            let back = smallest_three_decode(max_index, rest);
            let dot = q.w * back.w + q.i * back.i + q.j * back.j + q.k * back.k;
            assert!(dot.abs() >= 1.0 - 1e-3, "|q.q'| = {}", dot.abs());
        }
    }

    #[test]
    fn trs_composition_order() {
        let trs = Trs {
            translation: Vector3::new(0.0, 0.0, 1.0),
            rotation: quat_from_euler_deg(0.0, 90.0, 0.0),
            scale: 2.0,
        };
        let p = trs.apply_point(Vector3::new(1.0, 0.0, 0.0));
        assert!((p.x - 0.0).abs() < 1e-9);
        assert!((p.y - 0.0).abs() < 1e-9);
        assert!((p.z - (-1.0)).abs() < 1e-9);
    }
}
