//! Dense mobility matrices of a set of markers.
//!
//! A mobility matrix maps the forces applied at markers to the velocities
//! they induce. Both kernels are symmetric, positive definite for separated
//! markers, and give every marker the self-mobility of a sphere with the
//! hydrodynamic radius of the interpolation kernel.

use std::{f64::consts::PI, str::FromStr};

use faer_core::{zipped, Mat};
use nalgebra::{Matrix3, Vector3};

use crate::{error::CibError, ldata::Kernel, SpatialDim};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MobilityMatrixType {
    /// Rotne-Prager-Yamakawa tensor with overlap correction.
    Rpy,
    /// Regularized Stokeslet fitted to the self-mobility of the kernel.
    Empirical,
}

impl FromStr for MobilityMatrixType {
    type Err = CibError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RPY" => Ok(Self::Rpy),
            "EMPIRICAL" => Ok(Self::Empirical),
            _ => Err(CibError::InvalidMobilityMatrixType(s.to_string())),
        }
    }
}

/// Physical and numerical parameters shared by the mobility kernels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MobilityParams {
    pub dim: SpatialDim,
    pub kernel: Kernel,
    /// Dynamic viscosity.
    pub mu: f64,
    /// Fluid density, zero for steady Stokes flow.
    pub rho: f64,
    pub dt: f64,
    /// Grid spacing of the level holding the markers.
    pub dx: f64,
    /// Length of the periodic domain along the first axis.
    pub domain_extent: f64,
    /// Self-mobility correction for periodic images.
    pub periodic_correction: f64,
}

impl MobilityParams {
    pub fn hydrodynamic_radius(&self) -> f64 {
        self.kernel.hydrodynamic_radius() * self.dx
    }

    fn self_mobility(&self) -> f64 {
        1.0 / (6.0 * PI * self.mu * self.hydrodynamic_radius())
    }
}

fn position(dim: SpatialDim, x: &[f64], i: usize) -> Vector3<f64> {
    let depth = dim.depth();
    let mut p = Vector3::zeros();
    p.as_mut_slice()[..depth].copy_from_slice(&x[i * depth..(i + 1) * depth]);
    p
}

// fills m with the pair tensor `pair(r)` for every ordered pair of markers
fn assemble(
    dim: SpatialDim,
    x: &[f64],
    self_term: f64,
    pair: impl Fn(&Vector3<f64>) -> Matrix3<f64>,
) -> Mat<f64> {
    let depth = dim.depth();
    let n = x.len() / depth;
    let mut m = Mat::zeros(n * depth, n * depth);
    let points: Vec<_> = (0..n).map(|i| position(dim, x, i)).collect();
    for i in 0..n {
        for a in 0..depth {
            m[(i * depth + a, i * depth + a)] = self_term;
        }
        for j in (i + 1)..n {
            let block = pair(&(points[i] - points[j]));
            for a in 0..depth {
                for b in 0..depth {
                    m[(i * depth + a, j * depth + b)] = block[(a, b)];
                    m[(j * depth + b, i * depth + a)] = block[(a, b)];
                }
            }
        }
    }
    m
}

fn add_to_diagonal(m: &mut Mat<f64>, value: f64) {
    for i in 0..m.nrows() {
        m[(i, i)] += value;
    }
}

/// RPY mobility of the markers at `x` (node-major, `dim` components each).
pub fn rpy_mobility_matrix(params: &MobilityParams, x: &[f64]) -> Mat<f64> {
    let a = params.hydrodynamic_radius();
    let mu = params.mu;
    let mut m = assemble(params.dim, x, params.self_mobility(), |r| {
        let rn = r.norm();
        // coincident markers only see the self term
        if rn == 0.0 {
            return Matrix3::identity() * (1.0 / (6.0 * PI * mu * a));
        }
        let rr = (r * r.transpose()) / (rn * rn);
        let (c1, c2) = if rn >= 2.0 * a {
            let c = 1.0 / (8.0 * PI * mu * rn);
            let s = a * a / (rn * rn);
            (c * (1.0 + 2.0 * s / 3.0), c * (1.0 - 2.0 * s))
        } else {
            let c = 1.0 / (6.0 * PI * mu * a);
            (c * (1.0 - 9.0 * rn / (32.0 * a)), c * (3.0 * rn / (32.0 * a)))
        };
        Matrix3::identity() * c1 + rr * c2
    });
    if params.periodic_correction != 0.0 {
        add_to_diagonal(&mut m, -params.periodic_correction / (mu * params.dx));
    }
    m
}

/// Regularized Stokeslet mobility of the markers at `x`.
///
/// The blob width `1.5 a` reproduces the self-mobility of a sphere of
/// radius `a`. With a positive density the interactions are screened over
/// the viscous diffusion length `sqrt(mu dt / rho)` of one step.
pub fn empirical_mobility_matrix(params: &MobilityParams, x: &[f64]) -> Mat<f64> {
    let eps = 1.5 * params.hydrodynamic_radius();
    let mu = params.mu;
    let diffusion_length_sq = if params.rho > 0.0 && params.dt > 0.0 {
        Some(mu * params.dt / params.rho)
    } else {
        None
    };
    let mut m = assemble(params.dim, x, params.self_mobility(), |r| {
        let r2 = r.norm_squared();
        let d = r2 + eps * eps;
        let c = 1.0 / (8.0 * PI * mu * d * d.sqrt());
        let screen = diffusion_length_sq.map_or(1.0, |l2| (-r2 / (4.0 * l2)).exp());
        (Matrix3::identity() * (r2 + 2.0 * eps * eps) + r * r.transpose()) * (c * screen)
    });
    if params.periodic_correction != 0.0 {
        add_to_diagonal(&mut m, -params.periodic_correction / (mu * params.domain_extent));
    }
    m
}

pub fn mobility_matrix(kind: MobilityMatrixType, params: &MobilityParams, x: &[f64]) -> Mat<f64> {
    match kind {
        MobilityMatrixType::Rpy => rpy_mobility_matrix(params, x),
        MobilityMatrixType::Empirical => empirical_mobility_matrix(params, x),
    }
}

/// `M = scale.0 * M + scale.1 * diag(w)`
pub fn regularize(m: &mut Mat<f64>, scale: (f64, f64), w: &[f64]) {
    debug_assert_eq!(w.len(), m.nrows());
    zipped!(m.as_mut()).for_each(|mut x| x.write(scale.0 * x.read()));
    for (i, wi) in w.iter().enumerate() {
        m[(i, i)] += scale.1 * wi;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    fn params(dim: SpatialDim) -> MobilityParams {
        MobilityParams {
            dim,
            kernel: Kernel::Ib4,
            mu: 1.0,
            rho: 0.0,
            dt: 0.01,
            dx: 0.1,
            domain_extent: 1.0,
            periodic_correction: 0.0,
        }
    }

    fn to_nalgebra(m: &Mat<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(m.nrows(), m.ncols(), |i, j| m[(i, j)])
    }

    fn line(n: usize, spacing: f64) -> Vec<f64> {
        (0..n).flat_map(|i| [i as f64 * spacing, 0.2 * i as f64 * spacing, 0.0]).collect()
    }

    #[test]
    fn parses_matrix_types() {
        assert_eq!("RPY".parse::<MobilityMatrixType>().unwrap(), MobilityMatrixType::Rpy);
        assert_eq!(
            "empirical".parse::<MobilityMatrixType>().unwrap(),
            MobilityMatrixType::Empirical
        );
        assert!(matches!(
            "STOKESLET".parse::<MobilityMatrixType>(),
            Err(CibError::InvalidMobilityMatrixType(s)) if s == "STOKESLET"
        ));
    }

    #[test]
    fn rpy_is_continuous_at_contact() {
        let p = params(SpatialDim::Three);
        let a = p.hydrodynamic_radius();
        let below = rpy_mobility_matrix(&p, &[0.0, 0.0, 0.0, 2.0 * a * (1.0 - 1e-12), 0.0, 0.0]);
        let above = rpy_mobility_matrix(&p, &[0.0, 0.0, 0.0, 2.0 * a, 0.0, 0.0]);
        assert_relative_eq!(below[(0, 3)], above[(0, 3)], max_relative = 1e-9);
        assert_relative_eq!(below[(1, 4)], above[(1, 4)], max_relative = 1e-9);
        assert_relative_eq!(above[(0, 0)], 1.0 / (6.0 * PI * a));
    }

    #[test]
    fn kernels_are_symmetric_positive_definite() {
        for dim in [SpatialDim::Two, SpatialDim::Three] {
            let depth = dim.depth();
            let x: Vec<f64> = line(6, 0.13)
                .chunks(3)
                .flat_map(|c| c[..depth].to_vec())
                .collect();
            for kind in [MobilityMatrixType::Rpy, MobilityMatrixType::Empirical] {
                let m = to_nalgebra(&mobility_matrix(kind, &params(dim), &x));
                assert_eq!(m.nrows(), 6 * depth);
                assert_relative_eq!(m.clone(), m.transpose());
                assert!(m.cholesky().is_some(), "{kind:?} in {dim:?}");
            }
        }
    }

    #[test]
    fn empirical_self_mobility_matches_rpy() {
        let p = params(SpatialDim::Three);
        let x = line(3, 0.4);
        let rpy = rpy_mobility_matrix(&p, &x);
        let emp = empirical_mobility_matrix(&p, &x);
        assert_relative_eq!(rpy[(4, 4)], emp[(4, 4)]);
        // far field of both decays like the Stokeslet
        assert_relative_eq!(rpy[(0, 6)], emp[(0, 6)], max_relative = 0.1);
    }

    #[test]
    fn inertia_screens_interactions() {
        let mut p = params(SpatialDim::Three);
        let x = line(2, 0.3);
        let steady = empirical_mobility_matrix(&p, &x);
        p.rho = 1.0e3;
        let unsteady = empirical_mobility_matrix(&p, &x);
        assert_relative_eq!(steady[(0, 0)], unsteady[(0, 0)]);
        assert!(unsteady[(0, 3)].abs() < steady[(0, 3)].abs());
    }

    #[test]
    fn periodic_correction_lowers_the_diagonal() {
        let mut p = params(SpatialDim::Two);
        let x = [0.0, 0.0, 0.5, 0.5];
        let plain = rpy_mobility_matrix(&p, &x);
        p.periodic_correction = 0.01;
        let corrected = rpy_mobility_matrix(&p, &x);
        assert_relative_eq!(plain[(1, 1)] - corrected[(1, 1)], 0.01 / (1.0 * 0.1), epsilon = 1e-12);
        assert_eq!(plain[(0, 2)], corrected[(0, 2)]);
    }

    #[test]
    fn regularization_scales_and_shifts() {
        let p = params(SpatialDim::Two);
        let x = [0.0, 0.0, 0.3, 0.0];
        let base = rpy_mobility_matrix(&p, &x);
        let mut m = base.clone();
        regularize(&mut m, (2.0, 0.5), &[1.0, 2.0, 3.0, 4.0]);
        assert_relative_eq!(m[(0, 2)], 2.0 * base[(0, 2)]);
        assert_relative_eq!(m[(3, 3)], 2.0 * base[(3, 3)] + 2.0);
    }
}
