//! Rigid-body position update of the markers.
//!
//! The predictor moves markers from the current to the half time level and
//! the corrector from the current to the new level. Both rotate the marker
//! offsets about the current center of mass with a finite rotation built from
//! the rotational velocity, then translate them.

use nalgebra::{Matrix3, Vector3};

use crate::{
    comm::Communicator,
    ldata::{LData, LagrangianDataManager},
    structure::StructureIndexMap,
    SpatialDim,
};

/// Rotation by the angle `|w| * dt` about the axis `w / |w|` (Rodrigues).
///
/// A non-rotating body gets the identity.
pub fn rotation_matrix(rot_vel: &Vector3<f64>, dt: f64) -> Matrix3<f64> {
    let norm = rot_vel.norm();
    if norm <= f64::EPSILON {
        return Matrix3::identity();
    }
    let theta = norm * dt;
    let e = rot_vel / norm;
    let (s, c) = theta.sin_cos();
    Matrix3::identity() * c + (e * e.transpose()) * (1.0 - c) + e.cross_matrix() * s
}

/// Center of mass and moment of inertia of every structure.
///
/// `positions` lists the marker positions of every level holding
/// Lagrangian data. Sums are reduced over all ranks.
pub fn com_and_moi(
    comm: &dyn Communicator,
    manager: &impl LagrangianDataManager,
    map: &StructureIndexMap,
    positions: &[(usize, &LData)],
) -> (Vec<Vector3<f64>>, Vec<Matrix3<f64>>) {
    let dim = manager.dim();
    let num_parts = map.len();

    let mut com = vec![Vector3::zeros(); num_parts];
    for &(ln, x) in positions {
        for node in manager.mesh(ln).local_nodes() {
            let Some(part) = map.owner(node.lagrangian_index()) else {
                debug_assert!(false, "marker {} has no structure", node.lagrangian_index());
                continue;
            };
            com[part] += x.node(node.handle());
        }
    }
    let mut flat: Vec<f64> = com.iter().flat_map(|c| c.iter().copied()).collect();
    comm.sum_reduce(&mut flat);
    for (part, c) in com.iter_mut().enumerate() {
        let n = map.number_of_nodes(part).max(1) as f64;
        *c = Vector3::from_column_slice(&flat[3 * part..3 * part + 3]) / n;
    }

    let mut moi = vec![Matrix3::zeros(); num_parts];
    for &(ln, x) in positions {
        for node in manager.mesh(ln).local_nodes() {
            let Some(part) = map.owner(node.lagrangian_index()) else {
                continue;
            };
            let r = x.node(node.handle()) - com[part];
            let m = &mut moi[part];
            match dim {
                SpatialDim::Two => {
                    m[(0, 0)] += r.y * r.y;
                    m[(0, 1)] -= r.x * r.y;
                    m[(1, 1)] += r.x * r.x;
                    m[(2, 2)] += r.x * r.x + r.y * r.y;
                }
                SpatialDim::Three => {
                    m[(0, 0)] += r.y * r.y + r.z * r.z;
                    m[(0, 1)] -= r.x * r.y;
                    m[(0, 2)] -= r.x * r.z;
                    m[(1, 1)] += r.x * r.x + r.z * r.z;
                    m[(1, 2)] -= r.y * r.z;
                    m[(2, 2)] += r.x * r.x + r.y * r.y;
                }
            }
        }
    }
    let mut flat: Vec<f64> = moi.iter().flat_map(|m| m.iter().copied()).collect();
    comm.sum_reduce(&mut flat);
    for (part, m) in moi.iter_mut().enumerate() {
        *m = Matrix3::from_column_slice(&flat[9 * part..9 * part + 9]);
        m[(1, 0)] = m[(0, 1)];
        m[(2, 0)] = m[(0, 2)];
        m[(2, 1)] = m[(1, 2)];
    }

    (com, moi)
}

/// Moves every local marker rigidly:
/// `X_out = com + R (X - com) + dt * U_trans` for the structure of the marker.
#[allow(clippy::too_many_arguments)]
pub fn rigid_advance(
    manager: &impl LagrangianDataManager,
    map: &StructureIndexMap,
    level: usize,
    x_current: &LData,
    x_out: &mut LData,
    com: &[Vector3<f64>],
    rotation: &[Matrix3<f64>],
    trans_vel: &[Vector3<f64>],
    dt: f64,
) {
    for node in manager.mesh(level).local_nodes() {
        let Some(part) = map.owner(node.lagrangian_index()) else {
            continue;
        };
        let h = node.handle();
        let dr = x_current.node(h) - com[part];
        let x = com[part] + rotation[part] * dr + trans_vel[part] * dt;
        x_out.set_node(h, &x);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        comm::{ScriptedComm, SerialComm},
        ldata::{Kernel, LocalDataManager, MarkerHandle},
    };
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn rotations_are_proper_orthogonal() {
        let omegas = [
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(1.0, -2.0, 0.5),
            Vector3::new(1e-3, 3.0, -7.0),
        ];
        for w in omegas {
            for dt in [1e-4, 0.05, 0.5, 3.0] {
                for r in [rotation_matrix(&w, 0.5 * dt), rotation_matrix(&w, dt)] {
                    assert_relative_eq!(r.transpose() * r, Matrix3::identity(), epsilon = 1e-12);
                    assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn zero_rotation_is_exact_identity() {
        let r = rotation_matrix(&Vector3::zeros(), 10.0);
        assert_eq!(r, Matrix3::identity());
        assert!(r.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn rotation_axis_is_fixed() {
        let w = Vector3::new(0.3, -0.4, 1.2);
        let r = rotation_matrix(&w, 0.8);
        assert_relative_eq!(r * w, w, epsilon = 1e-12);
    }

    fn cross_markers(dim: SpatialDim) -> LocalDataManager {
        let mut m = LocalDataManager::new(dim, Kernel::Ib4);
        m.add_structure(
            0,
            0,
            &[
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(-1.0, 0.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
                Vector3::new(0.0, -1.0, 0.0),
            ],
        );
        m
    }

    #[test]
    fn symmetric_markers_have_centered_mass() {
        for dim in [SpatialDim::Two, SpatialDim::Three] {
            let m = cross_markers(dim);
            let map = StructureIndexMap::from_manager(&m, 0);
            let x = m.initial_positions(0);
            let (com, moi) = com_and_moi(&SerialComm, &m, &map, &[(0, &x)]);
            assert_relative_eq!(com[0], Vector3::zeros(), epsilon = 1e-14);
            assert_eq!(moi[0], moi[0].transpose());
            assert_relative_eq!(moi[0][(2, 2)], 4.0);
            assert_relative_eq!(moi[0][(0, 0)], 2.0);
        }
    }

    #[test]
    fn offset_structures_have_separate_centers() {
        let mut m = LocalDataManager::new(SpatialDim::Three, Kernel::Ib4);
        m.add_structure(0, 0, &[Vector3::new(1.0, 1.0, 1.0), Vector3::new(3.0, 1.0, 1.0)]);
        m.add_structure(0, 1, &[Vector3::new(-2.0, 0.0, 4.0), Vector3::new(-2.0, 2.0, 2.0)]);
        let map = StructureIndexMap::from_manager(&m, 0);
        let x = m.initial_positions(0);
        let (com, moi) = com_and_moi(&SerialComm, &m, &map, &[(0, &x)]);
        assert_relative_eq!(com[0], Vector3::new(2.0, 1.0, 1.0));
        assert_relative_eq!(com[1], Vector3::new(-2.0, 1.0, 3.0));
        assert_relative_eq!(moi[1][(1, 2)], 2.0);
        assert_relative_eq!(moi[1][(2, 1)], 2.0);
    }

    #[test]
    fn remote_markers_enter_the_reductions() {
        let mut m = LocalDataManager::new(SpatialDim::Three, Kernel::Ib4);
        m.add_structure(0, 0, &[Vector3::new(1.0, 1.0, 1.0), Vector3::new(3.0, 1.0, 1.0)]);
        m.add_structure(0, 1, &[Vector3::new(-2.0, 0.0, 4.0), Vector3::new(-2.0, 2.0, 2.0)]);
        let map = StructureIndexMap::from_manager(&m, 0);
        let x_all = m.initial_positions(0);
        let (com_all, moi_all) = com_and_moi(&SerialComm, &m, &map, &[(0, &x_all)]);

        // the partner rank owns marker 1 at (3, 1, 1), one unit from the center
        let m = m.with_local_order(0, &[0, 2, 3]);
        let x = m.initial_positions(0);
        let mut remote_moi = [0.0; 18];
        remote_moi[4] = 1.0;
        remote_moi[8] = 1.0;
        let comm = ScriptedComm::new(0)
            .then_sum(&[3.0, 1.0, 1.0, 0.0, 0.0, 0.0])
            .then_sum(&remote_moi);
        let (com, moi) = com_and_moi(&comm, &m, &map, &[(0, &x)]);
        assert_eq!(comm.pending_sums(), 0);
        for part in 0..2 {
            assert_relative_eq!(com[part], com_all[part], epsilon = 1e-14);
            assert_relative_eq!(moi[part], moi_all[part], epsilon = 1e-14);
        }
        assert_relative_eq!(moi[0][(1, 1)], 2.0);
    }

    #[test]
    fn quarter_turn_about_z() {
        let m = cross_markers(SpatialDim::Three);
        let map = StructureIndexMap::from_manager(&m, 0);
        let x = m.initial_positions(0);
        let mut x_half = x.clone();
        let dt = 1.0;
        let r = rotation_matrix(&Vector3::new(0.0, 0.0, PI), 0.5 * dt);
        let zero = [Vector3::zeros()];
        rigid_advance(&m, &map, 0, &x, &mut x_half, &zero, &[r], &zero, 0.5 * dt);
        let expected = [(0, Vector3::new(0.0, 1.0, 0.0)), (2, Vector3::new(-1.0, 0.0, 0.0))];
        for (slot, x) in expected {
            assert_relative_eq!(x_half.node(MarkerHandle(slot)), x, epsilon = 1e-12);
        }
    }

    #[test]
    fn translation_only_when_not_rotating() {
        let m = cross_markers(SpatialDim::Two);
        let map = StructureIndexMap::from_manager(&m, 0);
        let x = m.initial_positions(0);
        let mut x_new = x.clone();
        let r = rotation_matrix(&Vector3::zeros(), 0.1);
        let u = [Vector3::new(2.0, -1.0, 0.0)];
        rigid_advance(&m, &map, 0, &x, &mut x_new, &[Vector3::zeros()], &[r], &u, 0.1);
        assert_relative_eq!(x_new.get(MarkerHandle(1), 0), -0.8, epsilon = 1e-14);
        assert_relative_eq!(x_new.get(MarkerHandle(1), 1), -0.1, epsilon = 1e-14);
    }
}
