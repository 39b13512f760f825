//! The Lagrange multiplier and the operators that map between per-marker
//! fields and rigid-body generalized quantities.

use std::path::PathBuf;

use faer_core::zipped;
use nalgebra::Vector3;
use reborrow::*;

use crate::{
    comm::Communicator,
    equal_eps,
    error::CibError,
    grid::{PatchDataId, PatchHierarchy},
    input::{read_marker_file, read_weight_file},
    ldata::{LData, LagrangianDataManager},
    structure::StructureIndexMap,
    RigidDofVector, SpatialDim,
};

/// Owns the constraint force `lambda` and the regularization weight `W`
/// of every level that holds markers.
#[derive(Clone, Debug, Default)]
pub struct ConstraintForceManager {
    lambda: Vec<Option<LData>>,
    regulator: Vec<Option<LData>>,
    lambda_filenames: Vec<Option<PathBuf>>,
    weight_filenames: Vec<Option<PathBuf>>,
}

fn slot<T>(levels: &mut Vec<Option<T>>, level: usize) -> &mut Option<T> {
    if levels.len() <= level {
        levels.resize_with(level + 1, || None);
    }
    &mut levels[level]
}

impl ConstraintForceManager {
    /// `lambda_filenames[k]` and `weight_filenames[k]` are the optional
    /// input files of structure `k`.
    pub fn new(
        lambda_filenames: Vec<Option<PathBuf>>,
        weight_filenames: Vec<Option<PathBuf>>,
    ) -> Self {
        Self {
            lambda: Vec::new(),
            regulator: Vec::new(),
            lambda_filenames,
            weight_filenames,
        }
    }

    /// Creates `lambda` (zero) and `W` (one) on `level`.
    pub fn allocate(&mut self, manager: &impl LagrangianDataManager, level: usize) {
        let depth = manager.dim().depth();
        let lambda = manager.create_ldata("lambda", level, depth);
        let mut regulator = manager.create_ldata("regulator", level, depth);
        regulator.fill(1.0);
        *slot(&mut self.lambda, level) = Some(lambda);
        *slot(&mut self.regulator, level) = Some(regulator);
    }

    pub fn is_allocated(&self, level: usize) -> bool {
        matches!(self.lambda.get(level), Some(Some(_)))
    }

    pub fn lambda(&self, level: usize) -> Result<&LData, CibError> {
        self.lambda
            .get(level)
            .and_then(Option::as_ref)
            .ok_or(CibError::MissingLData { name: "lambda", level })
    }

    pub fn lambda_mut(&mut self, level: usize) -> Result<&mut LData, CibError> {
        self.lambda
            .get_mut(level)
            .and_then(Option::as_mut)
            .ok_or(CibError::MissingLData { name: "lambda", level })
    }

    pub fn regulator(&self, level: usize) -> Result<&LData, CibError> {
        self.regulator
            .get(level)
            .and_then(Option::as_ref)
            .ok_or(CibError::MissingLData { name: "regulator", level })
    }

    /// Reads the initial multiplier of every structure that has a lambda
    /// file. Other structures keep a zero multiplier.
    pub fn set_initial_lambda(
        &mut self,
        manager: &impl LagrangianDataManager,
        map: &StructureIndexMap,
        level: usize,
    ) -> Result<(), CibError> {
        let depth = manager.dim().depth();
        let lambda = self
            .lambda
            .get_mut(level)
            .and_then(Option::as_mut)
            .ok_or(CibError::MissingLData { name: "lambda", level })?;
        for (part, path) in self.lambda_filenames.iter().enumerate().take(map.len()) {
            let Some(path) = path else { continue };
            let values = read_marker_file("lambda", path, part, map.number_of_nodes(part), depth)?;
            tracing::info!(structure = part, file = %path.display(), "read initial lambda");
            let lag = map.lagrangian_indices(&[part]);
            for (k, h) in manager.map_lagrangian_to_local(&lag, level).into_iter().enumerate() {
                let Some(h) = h else { continue };
                for d in 0..depth {
                    lambda.set(h, d, values[k * depth + d]);
                }
            }
        }
        Ok(())
    }

    /// Sets `W` to the cell volume, or to `cell_volume / w` where a weight
    /// file gives `w`. A zero weight gives exactly zero.
    pub fn set_regularization_weight(
        &mut self,
        manager: &impl LagrangianDataManager,
        map: &StructureIndexMap,
        level: usize,
        cell_volume: f64,
    ) -> Result<(), CibError> {
        let depth = manager.dim().depth();
        let regulator = self
            .regulator
            .get_mut(level)
            .and_then(Option::as_mut)
            .ok_or(CibError::MissingLData { name: "regulator", level })?;
        for part in 0..map.len() {
            let lag = map.lagrangian_indices(&[part]);
            let handles = manager.map_lagrangian_to_local(&lag, level);
            match self.weight_filenames.get(part).and_then(Option::as_ref) {
                None => {
                    for h in handles.into_iter().flatten() {
                        for d in 0..depth {
                            regulator.set(h, d, cell_volume);
                        }
                    }
                }
                Some(path) => {
                    let values = read_weight_file(path, part, map.number_of_nodes(part), depth)?;
                    tracing::info!(
                        structure = part,
                        file = %path.display(),
                        "read regularization weights"
                    );
                    for (k, h) in handles.into_iter().enumerate() {
                        let Some(h) = h else { continue };
                        for d in 0..depth {
                            let w = values[k * depth + d];
                            let reg = if equal_eps(w, 0.0) { 0.0 } else { cell_volume / w };
                            regulator.set(h, d, reg);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// `d = scale * (W ⊙ l)`
    pub fn compute_mobility_regularization(
        &self,
        level: usize,
        d: &mut LData,
        l: &LData,
        scale: f64,
    ) -> Result<(), CibError> {
        d.pointwise_mult(self.regulator(level)?, l);
        d.scale(scale);
        Ok(())
    }
}

/// Sets the velocity of the markers of `part` to the rigid motion `u` about
/// `com`. Markers of other structures are left untouched.
#[allow(clippy::too_many_arguments)]
pub fn rigid_body_velocity(
    manager: &impl LagrangianDataManager,
    map: &StructureIndexMap,
    level: usize,
    part: usize,
    u: &RigidDofVector,
    x: &LData,
    com: &Vector3<f64>,
    v: &mut LData,
) {
    let dim = manager.dim();
    for node in manager.mesh(level).local_nodes() {
        if !map.contains(part, node.lagrangian_index()) {
            continue;
        }
        let h = node.handle();
        let r = x.node(h) - com;
        let vel = match dim {
            SpatialDim::Two => Vector3::new(u[0] - u[2] * r.y, u[1] + u[2] * r.x, 0.0),
            SpatialDim::Three => {
                let trans = u.fixed_rows::<3>(0);
                let rot = u.fixed_rows::<3>(3);
                trans + rot.cross(&r)
            }
        };
        v.set_node(h, &vel);
    }
}

/// Net force and torque about `com` of the per-marker force `l` on the
/// markers of `part`, summed over all ranks.
#[allow(clippy::too_many_arguments)]
pub fn net_rigid_generalized_force(
    comm: &dyn Communicator,
    manager: &impl LagrangianDataManager,
    map: &StructureIndexMap,
    level: usize,
    part: usize,
    l: &LData,
    x: &LData,
    com: &Vector3<f64>,
) -> RigidDofVector {
    let dim = manager.dim();
    let mut f = RigidDofVector::zeros();
    for node in manager.mesh(level).local_nodes() {
        if map.owner(node.lagrangian_index()) != Some(part) {
            continue;
        }
        let h = node.handle();
        let p = l.node(h);
        let r = x.node(h) - com;
        match dim {
            SpatialDim::Two => {
                f[0] += p.x;
                f[1] += p.y;
                f[2] += p.y * r.x - p.x * r.y;
            }
            SpatialDim::Three => {
                let torque = r.cross(&p);
                for d in 0..3 {
                    f[d] += p[d];
                    f[3 + d] += torque[d];
                }
            }
        }
    }
    comm.sum_reduce(&mut f.as_mut_slice()[..dim.rigid_dofs()]);
    f
}

/// Copies the markers of `parts` from the distributed field `b` into the
/// flat buffer `array`, laid out structure by structure, then marker, then
/// component. Every rank receives the whole buffer.
#[allow(clippy::too_many_arguments)]
pub fn copy_vec_to_array(
    comm: &dyn Communicator,
    manager: &impl LagrangianDataManager,
    map: &StructureIndexMap,
    level: usize,
    b: &LData,
    parts: &[usize],
    depth: usize,
    array: &mut [f64],
) {
    if parts.is_empty() {
        return;
    }
    let lag = map.lagrangian_indices(parts);
    debug_assert_eq!(array.len(), lag.len() * depth);
    array.fill(0.0);
    for (j, h) in manager.map_lagrangian_to_local(&lag, level).into_iter().enumerate() {
        let Some(h) = h else { continue };
        for d in 0..depth {
            array[j * depth + d] = b.get(h, d);
        }
    }
    comm.sum_reduce(array);
}

/// Inverse of [`copy_vec_to_array`]: writes the locally owned entries of
/// `array` back into `b`.
#[allow(clippy::too_many_arguments)]
pub fn copy_array_to_vec(
    manager: &impl LagrangianDataManager,
    map: &StructureIndexMap,
    level: usize,
    array: &[f64],
    parts: &[usize],
    depth: usize,
    b: &mut LData,
) {
    if parts.is_empty() {
        return;
    }
    let lag = map.lagrangian_indices(parts);
    debug_assert_eq!(array.len(), lag.len() * depth);
    for (j, h) in manager.map_lagrangian_to_local(&lag, level).into_iter().enumerate() {
        let Some(h) = h else { continue };
        for d in 0..depth {
            b.set(h, d, array[j * depth + d]);
        }
    }
}

/// Removes the mean of the spread force `scale * l` from the side-centred
/// Eulerian force `f_idx` on every level.
pub fn subtract_mean_constraint_force(
    comm: &dyn Communicator,
    hierarchy: &mut dyn PatchHierarchy,
    f_idx: PatchDataId,
    l: &LData,
    scale: f64,
) -> Result<(), CibError> {
    let depth = l.depth();
    let mut total = vec![0.0; depth];
    let values = l.as_ref();
    for (d, t) in total.iter_mut().enumerate() {
        *t = scale * (0..l.len()).map(|i| values[(i, d)]).sum::<f64>();
    }
    comm.sum_reduce(&mut total);

    let volume = hierarchy.domain_volume();
    tracing::debug!(?total, volume, "subtracting mean constraint force");
    for ln in 0..=hierarchy.finest_level_number() {
        for patch in 0..hierarchy.num_patches(ln) {
            let data = hierarchy
                .patch_data_mut(ln, patch, f_idx)
                .ok_or(CibError::MissingPatchData(f_idx.index()))?;
            let mut f = data.as_mut();
            for (axis, t) in total.iter().enumerate().take(f.ncols()) {
                let mean = t / volume;
                zipped!(f.rb_mut().col(axis)).for_each(|mut x| x.write(x.read() - mean));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        comm::{ScriptedComm, SerialComm},
        grid::{CartesianHierarchy, Centering},
        integrator::com_and_moi,
        ldata::{Kernel, LocalDataManager, MarkerHandle},
    };
    use approx::assert_relative_eq;
    use std::io::Write;

    fn ring(dim: SpatialDim) -> (LocalDataManager, StructureIndexMap) {
        let mut m = LocalDataManager::new(dim, Kernel::Ib4);
        let n = 8;
        let ring: Vec<_> = (0..n)
            .map(|k| {
                let a = 2.0 * std::f64::consts::PI * k as f64 / n as f64;
                Vector3::new(0.5 + 0.1 * a.cos(), 0.5 + 0.1 * a.sin(), 0.0)
            })
            .collect();
        m.add_structure(0, 0, &ring);
        m.add_structure(0, 1, &[Vector3::new(0.1, 0.1, 0.0), Vector3::new(0.2, 0.1, 0.0)]);
        let map = StructureIndexMap::from_manager(&m, 0);
        (m, map)
    }

    #[test]
    fn translation_round_trip() {
        for dim in [SpatialDim::Two, SpatialDim::Three] {
            let (m, map) = ring(dim);
            let x = m.initial_positions(0);
            let (com, _) = com_and_moi(&SerialComm, &m, &map, &[(0, &x)]);
            let u = RigidDofVector::new(1.0, -2.0, 0.0, 0.0, 0.0, 0.0);
            let mut v = x.zeros_like("V");
            rigid_body_velocity(&m, &map, 0, 0, &u, &x, &com[0], &mut v);
            // the second structure is not touched
            assert_eq!(v.node(MarkerHandle(9)), Vector3::zeros());

            let f = net_rigid_generalized_force(&SerialComm, &m, &map, 0, 0, &v, &x, &com[0]);
            assert_relative_eq!(f[0], 8.0, epsilon = 1e-12);
            assert_relative_eq!(f[1], -16.0, epsilon = 1e-12);
            for k in 2..dim.rigid_dofs() {
                assert_relative_eq!(f[k], 0.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn rotation_gives_torque_from_inertia() {
        let (m, map) = ring(SpatialDim::Three);
        let x = m.initial_positions(0);
        let (com, moi) = com_and_moi(&SerialComm, &m, &map, &[(0, &x)]);
        let u = RigidDofVector::new(0.0, 0.0, 0.0, 0.0, 0.0, 3.0);
        let mut v = x.zeros_like("V");
        rigid_body_velocity(&m, &map, 0, 0, &u, &x, &com[0], &mut v);
        let f = net_rigid_generalized_force(&SerialComm, &m, &map, 0, 0, &v, &x, &com[0]);
        assert_relative_eq!(f[5], 3.0 * moi[0][(2, 2)], epsilon = 1e-12);
        assert_relative_eq!(f[0], 0.0, epsilon = 1e-12);

        let (m2, map2) = ring(SpatialDim::Two);
        let x2 = m2.initial_positions(0);
        let mut v2 = x2.zeros_like("V");
        let u2 = RigidDofVector::new(0.0, 0.0, 3.0, 0.0, 0.0, 0.0);
        rigid_body_velocity(&m2, &map2, 0, 0, &u2, &x2, &com[0], &mut v2);
        let f2 = net_rigid_generalized_force(&SerialComm, &m2, &map2, 0, 0, &v2, &x2, &com[0]);
        assert_relative_eq!(f2[2], f[5], epsilon = 1e-12);
    }

    #[test]
    fn copy_round_trip_through_permuted_storage() {
        let (m, _) = ring(SpatialDim::Two);
        let order: Vec<usize> = (0..10).rev().collect();
        let m = m.with_local_order(0, &order);
        let map = StructureIndexMap::from_manager(&m, 0);
        let x = m.initial_positions(0);

        let mut array = vec![0.0; 10 * 2];
        copy_vec_to_array(&SerialComm, &m, &map, 0, &x, &[1, 0], 2, &mut array);
        // structure 1 comes first in the buffer
        assert_relative_eq!(array[0], 0.1);
        assert_relative_eq!(array[2], 0.2);
        assert_relative_eq!(array[4], 0.6);

        let mut y = x.zeros_like("Y");
        copy_array_to_vec(&m, &map, 0, &array, &[1, 0], 2, &mut y);
        assert_eq!(y.to_rows(), x.to_rows());

        let mut again = vec![0.0; 20];
        copy_vec_to_array(&SerialComm, &m, &map, 0, &y, &[1, 0], 2, &mut again);
        assert_eq!(again, array);
    }

    #[test]
    fn partial_copy_only_touches_listed_structures() {
        let (m, map) = ring(SpatialDim::Two);
        let x = m.initial_positions(0);
        let mut array = vec![0.0; 4];
        copy_vec_to_array(&SerialComm, &m, &map, 0, &x, &[1], 2, &mut array);
        assert_eq!(array, vec![0.1, 0.1, 0.2, 0.1]);

        let mut y = x.zeros_like("Y");
        copy_array_to_vec(&m, &map, 0, &[9.0, 9.0, 9.0, 9.0], &[1], 2, &mut y);
        assert_eq!(y.get(MarkerHandle(0), 0), 0.0);
        assert_eq!(y.get(MarkerHandle(8), 1), 9.0);
    }

    #[test]
    fn remote_entries_are_summed_into_the_buffer() {
        let (m, map) = ring(SpatialDim::Two);
        // markers 4..8 of the ring live on the partner rank
        let m = m.with_local_order(0, &[0, 1, 2, 3, 8, 9]);
        let rows = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 50.0, 51.0, 52.0, 53.0];
        let b = LData::from_rows("B", 2, &rows);
        let remote: Vec<f64> = (0..16).map(|k| if k < 8 { 0.0 } else { k as f64 + 2.0 }).collect();
        let comm = ScriptedComm::new(0).then_sum(&remote);

        let mut array = vec![f64::NAN; 16];
        copy_vec_to_array(&comm, &m, &map, 0, &b, &[0], 2, &mut array);
        let expected: Vec<f64> = (1..=8).chain(10..=17).map(|k| k as f64).collect();
        assert_eq!(array, expected);
        assert_eq!(comm.pending_sums(), 0);
    }

    #[test]
    fn planar_net_force_reduces_three_dofs() {
        let (m, map) = ring(SpatialDim::Two);
        let m = m.with_local_order(0, &[0, 1, 2, 3, 8, 9]);
        let x = m.initial_positions(0);
        let mut l = x.zeros_like("L");
        for slot in 0..l.len() {
            l.set(MarkerHandle(slot), 0, 1.0);
        }
        let com = Vector3::new(0.5, 0.5, 0.0);
        let comm = ScriptedComm::new(0).then_sum(&[1.0, 2.0, 3.0]);

        let f = net_rigid_generalized_force(&comm, &m, &map, 0, 0, &l, &x, &com);
        assert_eq!(comm.pending_sums(), 0);
        // local torque: -0.1 * (sin 0 + sin 45 + sin 90 + sin 135)
        let torque = -0.1 * (1.0 + std::f64::consts::SQRT_2);
        assert_relative_eq!(f[0], 5.0, epsilon = 1e-12);
        assert_relative_eq!(f[1], 2.0, epsilon = 1e-12);
        assert_relative_eq!(f[2], torque + 3.0, epsilon = 1e-12);
        assert_eq!(&f.as_slice()[3..], &[0.0; 3]);
    }

    #[test]
    fn default_weight_is_cell_volume() {
        let (m, map) = ring(SpatialDim::Three);
        let mut cfm = ConstraintForceManager::default();
        cfm.allocate(&m, 0);
        assert_eq!(cfm.regulator(0).unwrap().get(MarkerHandle(3), 1), 1.0);
        cfm.set_regularization_weight(&m, &map, 0, 0.125).unwrap();
        assert!(cfm.regulator(0).unwrap().to_rows().iter().all(|&w| w == 0.125));
        assert!(cfm.lambda(0).unwrap().to_rows().iter().all(|&l| l == 0.0));
        assert!(cfm.lambda(1).is_err());
    }

    #[test]
    fn weight_file_inverts_weights() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.weight");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "2\n2.0 4.0\n0.0 1.0").unwrap();

        let (m, map) = ring(SpatialDim::Two);
        let mut cfm = ConstraintForceManager::new(vec![None, None], vec![None, Some(path)]);
        cfm.allocate(&m, 0);
        cfm.set_regularization_weight(&m, &map, 0, 0.5).unwrap();
        let w = cfm.regulator(0).unwrap();
        assert_eq!(w.get(MarkerHandle(0), 0), 0.5);
        assert_eq!(w.get(MarkerHandle(8), 0), 0.25);
        assert_eq!(w.get(MarkerHandle(8), 1), 0.125);
        assert_eq!(w.get(MarkerHandle(9), 0), 0.0);
        assert_eq!(w.get(MarkerHandle(9), 1), 0.5);

        let mut d = w.zeros_like("D");
        let l = LData::from_rows("L", 2, &[1.0; 20]);
        cfm.compute_mobility_regularization(0, &mut d, &l, 2.0).unwrap();
        assert_eq!(d.get(MarkerHandle(8), 1), 0.25);
    }

    #[test]
    fn scalar_weights_cover_every_component() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scalar.weight");
        std::fs::write(&path, "2\n2.0\n0.0\n").unwrap();

        let (m, map) = ring(SpatialDim::Two);
        let mut cfm = ConstraintForceManager::new(vec![None, None], vec![None, Some(path)]);
        cfm.allocate(&m, 0);
        cfm.set_regularization_weight(&m, &map, 0, 0.5).unwrap();
        let w = cfm.regulator(0).unwrap();
        assert_eq!(w.get(MarkerHandle(8), 0), 0.25);
        assert_eq!(w.get(MarkerHandle(8), 1), 0.25);
        assert_eq!(w.get(MarkerHandle(9), 0), 0.0);
        assert_eq!(w.get(MarkerHandle(9), 1), 0.0);
    }

    #[test]
    fn lambda_file_with_wrong_count_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ring.lambda");
        std::fs::write(&path, "3\n1 1\n1 1\n1 1\n").unwrap();
        let (m, map) = ring(SpatialDim::Two);
        let mut cfm = ConstraintForceManager::new(vec![Some(path), None], vec![]);
        cfm.allocate(&m, 0);
        assert!(matches!(
            cfm.set_initial_lambda(&m, &map, 0),
            Err(CibError::MarkerCountMismatch { structure: 0, expected: 8, found: 3, .. })
        ));
    }

    #[test]
    fn lambda_file_sets_initial_multiplier() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pair.lambda");
        std::fs::write(&path, "2\n1.5 -1\n2.5 -2\n").unwrap();
        let (m, _) = ring(SpatialDim::Two);
        let m = m.with_local_order(0, &(0..10).rev().collect::<Vec<_>>());
        let map = StructureIndexMap::from_manager(&m, 0);
        let mut cfm = ConstraintForceManager::new(vec![None, Some(path)], vec![]);
        cfm.allocate(&m, 0);
        cfm.set_initial_lambda(&m, &map, 0).unwrap();
        let lambda = cfm.lambda(0).unwrap();
        // Lagrangian index 8 lives in slot 1, index 9 in slot 0
        assert_eq!(lambda.get(MarkerHandle(1), 0), 1.5);
        assert_eq!(lambda.get(MarkerHandle(0), 1), -2.0);
        assert_eq!(lambda.get(MarkerHandle(5), 0), 0.0);
    }

    #[test]
    fn mean_force_is_removed() {
        let mut h = CartesianHierarchy::uniform(SpatialDim::Two, 0.0, 1.0, 16);
        let f_idx = h.register_variable("f", Centering::Side, 2);
        let (m, _) = ring(SpatialDim::Two);
        let x = m.initial_positions(0);
        let l = LData::from_rows("L", 2, &[0.5, -1.0].repeat(10));
        m.spread(&mut h, f_idx, &l, &x, 0).unwrap();

        subtract_mean_constraint_force(&SerialComm, &mut h, f_idx, &l, 1.0).unwrap();
        let vol = h.cell_volume();
        let data = h.patch_data(0, 0, f_idx).unwrap();
        for axis in 0..2 {
            let total: f64 = (0..h.geometry().num_cells()).map(|c| data.get(c, axis) * vol).sum();
            assert_relative_eq!(total, 0.0, epsilon = 1e-12);
        }
        // the multiplier itself is unchanged
        assert_eq!(l.get(MarkerHandle(3), 1), -1.0);

        // a uniform field is removed entirely
        let mut h = CartesianHierarchy::uniform(SpatialDim::Two, 0.0, 2.0, 4);
        let f_idx = h.register_variable("f", Centering::Side, 2);
        h.patch_data_mut(0, 0, f_idx).unwrap().fill(0.75);
        let l = LData::from_rows("L", 2, &[0.75, 0.0, 0.75, 0.0]);
        subtract_mean_constraint_force(&SerialComm, &mut h, f_idx, &l, 2.0).unwrap();
        let data = h.patch_data(0, 0, f_idx).unwrap();
        assert_relative_eq!(data.get(5, 0), 0.0, epsilon = 1e-14);
        assert_relative_eq!(data.get(5, 1), 0.75, epsilon = 1e-14);
    }
}
