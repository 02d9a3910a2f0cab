//! Spherical-harmonics basis rotation.
//!
//! Rotating a splat must also rotate its view-dependent radiance: the
//! `f_rest_*` coefficients transform by a block-diagonal matrix with one
//! block per SH band (3x3, 5x5, 7x7 for bands 1..3). The band-1 block is
//! linear in the rotation matrix and is built directly; bands 2 and 3 are
//! recovered numerically by projecting the rotated basis functions onto the
//! band basis at a fixed set of sample directions. The projection is exact
//! up to floating-point error because each band spans a rotation-invariant
//! function space.

use nalgebra::{DMatrix, Matrix3, Vector3};

/// Real-SH basis evaluation for band 2, graphics convention.
fn eval_band2(d: Vector3<f64>) -> [f64; 5] {
    let (x, y, z) = (d.x, d.y, d.z);
    [
        1.0925484305920792 * x * y,
        -1.0925484305920792 * y * z,
        0.31539156525252005 * (2.0 * z * z - x * x - y * y),
        -1.0925484305920792 * x * z,
        0.5462742152960396 * (x * x - y * y),
    ]
}

/// Real-SH basis evaluation for band 3, graphics convention.
fn eval_band3(d: Vector3<f64>) -> [f64; 7] {
    let (x, y, z) = (d.x, d.y, d.z);
    let (xx, yy, zz) = (x * x, y * y, z * z);
    [
        -0.5900435899266435 * y * (3.0 * xx - yy),
        2.890611442640554 * x * y * z,
        -0.4570457994644658 * y * (4.0 * zz - xx - yy),
        0.3731763325901154 * z * (2.0 * zz - 3.0 * xx - 3.0 * yy),
        -0.4570457994644658 * x * (4.0 * zz - xx - yy),
        1.445305721320277 * z * (xx - yy),
        -0.5900435899266435 * x * (xx - 3.0 * yy),
    ]
}

const SAMPLE_COUNT: usize = 16;

/// Fixed, well-spread unit directions (Fibonacci sphere). The same set is
/// used for every solve, so the basis Gram matrix is a constant.
fn sample_directions() -> [Vector3<f64>; SAMPLE_COUNT] {
    const GOLDEN_ANGLE: f64 = 2.399963229728653;
    std::array::from_fn(|i| {
        let z = 1.0 - 2.0 * (i as f64 + 0.5) / SAMPLE_COUNT as f64;
        let r = (1.0 - z * z).sqrt();
        let phi = GOLDEN_ANGLE * i as f64;
        Vector3::new(r * phi.cos(), r * phi.sin(), z)
    })
}

fn band_rotation<const M: usize>(
    rotation_t: &Matrix3<f64>,
    eval: fn(Vector3<f64>) -> [f64; M],
) -> DMatrix<f64> {
    let dirs = sample_directions();
    let mut a = DMatrix::<f64>::zeros(M, SAMPLE_COUNT);
    let mut b = DMatrix::<f64>::zeros(M, SAMPLE_COUNT);
    for (j, dir) in dirs.iter().enumerate() {
        let ya = eval(*dir);
        let yb = eval(rotation_t * dir);
        for m in 0..M {
            a[(m, j)] = ya[m];
            b[(m, j)] = yb[m];
        }
    }
    let gram_inv = (&a * a.transpose())
        .try_inverse()
        .expect("fixed SH sample directions span the band basis");
    gram_inv * a * b.transpose()
}

/// The block-diagonal coefficient transform for one rotation.
///
/// Coefficients within a channel are laid out band-major: indices `0..3`
/// are band 1, `3..8` band 2, `8..15` band 3.
pub struct ShRotation {
    band1: Matrix3<f64>,
    band2: DMatrix<f64>,
    band3: DMatrix<f64>,
}

impl ShRotation {
    /// Build the transform for an object rotated by `rotation`.
    pub fn new(rotation: &Matrix3<f64>) -> Self {
        let rt = rotation.transpose();

        // Band 1 basis is (-y, z, -x) up to a shared constant, so its block
        // is the rotation matrix under that axis permutation and sign flip.
        let axis = [1usize, 2, 0];
        let sign = [-1.0, 1.0, -1.0];
        let mut band1 = Matrix3::zeros();
        for m in 0..3 {
            for k in 0..3 {
                band1[(m, k)] = sign[m] * sign[k] * rotation[(axis[m], axis[k])];
            }
        }

        Self {
            band1,
            band2: band_rotation(&rt, eval_band2),
            band3: band_rotation(&rt, eval_band3),
        }
    }

    /// Rotate one channel's coefficient vector in place. `coeffs` holds the
    /// leading `C(bands)` coefficients in band-major order.
    pub fn apply(&self, coeffs: &mut [f32], bands: usize) {
        if bands >= 1 {
            self.apply_block(coeffs, 0, 3, |m, k| self.band1[(m, k)]);
        }
        if bands >= 2 {
            self.apply_block(coeffs, 3, 5, |m, k| self.band2[(m, k)]);
        }
        if bands >= 3 {
            self.apply_block(coeffs, 8, 7, |m, k| self.band3[(m, k)]);
        }
    }

    fn apply_block<F: Fn(usize, usize) -> f64>(
        &self,
        coeffs: &mut [f32],
        offset: usize,
        size: usize,
        matrix: F,
    ) {
        let mut out = [0.0f64; 7];
        for (m, slot) in out.iter_mut().take(size).enumerate() {
            let mut acc = 0.0;
            for k in 0..size {
                acc += matrix(m, k) * coeffs[offset + k] as f64;
            }
            *slot = acc;
        }
        for m in 0..size {
            coeffs[offset + m] = out[m] as f32;
        }
    }
}
