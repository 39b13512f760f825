//! Lagrangian marker data and the manager that distributes it.
//!
//! Marker storage is addressed by [`MarkerHandle`], the stable local slot of
//! a marker on the owning rank. The global Lagrangian index of a marker is
//! only used to find the structure it belongs to.

use faer_core::{zipped, Mat, MatMut, MatRef};
use nalgebra::Vector3;
use reborrow::*;

use crate::{
    comm::Communicator,
    error::CibError,
    grid::{Centering, PatchDataId, PatchGeometry, PatchHierarchy},
    SpatialDim,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerHandle(pub(crate) usize);

impl MarkerHandle {
    pub fn slot(self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LNode {
    lag_idx: usize,
    handle: MarkerHandle,
}

impl LNode {
    pub fn new(lag_idx: usize, handle: MarkerHandle) -> Self {
        Self { lag_idx, handle }
    }

    pub fn lagrangian_index(&self) -> usize {
        self.lag_idx
    }

    pub fn handle(&self) -> MarkerHandle {
        self.handle
    }
}

/// Markers owned by this rank on one level.
#[derive(Clone, Debug, Default)]
pub struct LMesh {
    local_nodes: Vec<LNode>,
}

impl LMesh {
    pub fn new(local_nodes: Vec<LNode>) -> Self {
        Self { local_nodes }
    }

    pub fn local_nodes(&self) -> &[LNode] {
        &self.local_nodes
    }
}

/// A per-marker field: one row per local marker, one column per component.
#[derive(Clone, Debug)]
pub struct LData {
    name: String,
    values: Mat<f64>,
}

impl LData {
    pub fn new(name: impl AsRef<str>, len: usize, depth: usize) -> Self {
        Self {
            name: name.as_ref().to_string(),
            values: Mat::zeros(len, depth),
        }
    }

    /// Builds a field from node-major values (`depth` values per marker).
    pub fn from_rows(name: impl AsRef<str>, depth: usize, rows: &[f64]) -> Self {
        assert_eq!(rows.len() % depth, 0);
        Self {
            name: name.as_ref().to_string(),
            values: Mat::from_fn(rows.len() / depth, depth, |i, d| rows[i * depth + d]),
        }
    }

    /// Zeroed field with the same shape.
    pub fn zeros_like(&self, name: impl AsRef<str>) -> Self {
        Self::new(name, self.len(), self.depth())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.values.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn depth(&self) -> usize {
        self.values.ncols()
    }

    pub fn as_ref(&self) -> MatRef<'_, f64> {
        self.values.as_ref()
    }

    pub fn as_mut(&mut self) -> MatMut<'_, f64> {
        self.values.as_mut()
    }

    #[inline]
    pub fn get(&self, h: MarkerHandle, d: usize) -> f64 {
        self.values[(h.0, d)]
    }

    #[inline]
    pub fn set(&mut self, h: MarkerHandle, d: usize, value: f64) {
        self.values[(h.0, d)] = value;
    }

    /// Components of one marker, zero padded to three.
    #[inline]
    pub fn node(&self, h: MarkerHandle) -> Vector3<f64> {
        let mut v = Vector3::zeros();
        for d in 0..self.depth().min(3) {
            v[d] = self.values[(h.0, d)];
        }
        v
    }

    #[inline]
    pub fn set_node(&mut self, h: MarkerHandle, v: &Vector3<f64>) {
        for d in 0..self.depth().min(3) {
            self.values[(h.0, d)] = v[d];
        }
    }

    pub fn fill(&mut self, value: f64) {
        zipped!(self.values.as_mut()).for_each(|mut x| x.write(value));
    }

    pub fn scale(&mut self, alpha: f64) {
        zipped!(self.values.as_mut()).for_each(|mut x| x.write(alpha * x.read()));
    }

    /// `self = alpha * src`
    pub fn copy_scaled_from(&mut self, src: &LData, alpha: f64) {
        zipped!(self.values.as_mut(), src.values.as_ref())
            .for_each(|mut x, y| x.write(alpha * y.read()));
    }

    pub fn copy_from(&mut self, src: &LData) {
        self.values.as_mut().clone_from(src.values.as_ref());
    }

    /// `self = a ⊙ b`
    pub fn pointwise_mult(&mut self, a: &LData, b: &LData) {
        zipped!(self.values.as_mut(), a.values.as_ref(), b.values.as_ref())
            .for_each(|mut x, a, b| x.write(a.read() * b.read()));
    }

    /// Node-major copy of the local values.
    pub fn to_rows(&self) -> Vec<f64> {
        let depth = self.depth();
        let mut out = vec![0.0; self.len() * depth];
        for (i, chunk) in out.chunks_mut(depth).enumerate() {
            for (d, x) in chunk.iter_mut().enumerate() {
                *x = self.values[(i, d)];
            }
        }
        out
    }
}

/// Regularized delta function used by interpolation and spreading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kernel {
    PiecewiseLinear,
    /// Peskin's 4-point kernel.
    Ib4,
}

impl Kernel {
    /// Half width of the support, in cells.
    pub fn support(self) -> usize {
        match self {
            Kernel::PiecewiseLinear => 1,
            Kernel::Ib4 => 2,
        }
    }

    pub fn phi(self, r: f64) -> f64 {
        let r = r.abs();
        match self {
            Kernel::PiecewiseLinear => (1.0 - r).max(0.0),
            Kernel::Ib4 => {
                if r < 1.0 {
                    0.125 * (3.0 - 2.0 * r + (1.0 + 4.0 * r - 4.0 * r * r).sqrt())
                } else if r < 2.0 {
                    0.125 * (5.0 - 2.0 * r - (-7.0 + 12.0 * r - 4.0 * r * r).sqrt())
                } else {
                    0.0
                }
            }
        }
    }

    /// Hydrodynamic radius of a marker, in units of the grid spacing.
    pub fn hydrodynamic_radius(self) -> f64 {
        match self {
            Kernel::PiecewiseLinear => 0.91,
            Kernel::Ib4 => 1.255,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Kernel::PiecewiseLinear => "PIECEWISE_LINEAR",
            Kernel::Ib4 => "IB_4",
        }
    }
}

// (cell, weight) pairs along one axis, periodic in the patch
fn axis_stencil(
    kernel: Kernel,
    geometry: &PatchGeometry,
    axis: usize,
    offset: f64,
    x: f64,
) -> Vec<(usize, f64)> {
    if axis >= geometry.dim().depth() {
        return vec![(0, 1.0)];
    }
    let grid = geometry.axis(axis);
    let n = grid.steps() as isize;
    let s = (x - grid.lower()) / grid.delta() - offset;
    let support = kernel.support() as isize;
    let base = s.floor() as isize - (support - 1);
    (0..2 * support)
        .map(|k| {
            let idx = base + k;
            (idx.rem_euclid(n) as usize, kernel.phi(s - idx as f64))
        })
        .filter(|&(_, w)| w != 0.0)
        .collect()
}

/// Tensor-product stencil of the sample points of one data column around `x`.
pub(crate) fn stencil(
    kernel: Kernel,
    geometry: &PatchGeometry,
    centering: Centering,
    column: usize,
    x: &Vector3<f64>,
) -> Vec<(usize, f64)> {
    let per_axis: Vec<_> = (0..3)
        .map(|a| {
            let offset = PatchGeometry::sample_offset(centering, column, a);
            axis_stencil(kernel, geometry, a, offset, x[a])
        })
        .collect();

    let mut out = Vec::with_capacity(per_axis.iter().map(Vec::len).product());
    for &(k, wk) in &per_axis[2] {
        for &(j, wj) in &per_axis[1] {
            for &(i, wi) in &per_axis[0] {
                out.push((geometry.linear_index([i, j, k]), wi * wj * wk));
            }
        }
    }
    out
}

/// Contract of the component that owns the distribution of markers.
pub trait LagrangianDataManager {
    fn dim(&self) -> SpatialDim;

    fn level_contains_lagrangian_data(&self, level: usize) -> bool;

    /// Structure IDs present on `level`, in no particular order.
    fn structure_ids(&self, level: usize) -> Vec<usize>;

    /// `[first, last)` Lagrangian index range of structure `id`.
    fn structure_index_range(&self, id: usize, level: usize) -> (usize, usize);

    fn mesh(&self, level: usize) -> &LMesh;

    /// Local slot of each Lagrangian index, `None` for markers owned elsewhere.
    fn map_lagrangian_to_local(&self, lag: &[usize], level: usize) -> Vec<Option<MarkerHandle>>;

    fn initial_positions(&self, level: usize) -> LData;

    fn default_kernel(&self) -> Kernel;

    fn create_ldata(&self, name: &str, level: usize, depth: usize) -> LData {
        LData::new(name, self.mesh(level).local_nodes().len(), depth)
    }

    /// Interpolates the side-centred velocity `u_idx` onto the markers at `x`.
    fn interp(
        &self,
        hierarchy: &dyn PatchHierarchy,
        u_idx: PatchDataId,
        u: &mut LData,
        x: &LData,
        level: usize,
    ) -> Result<(), CibError>;

    /// Adds the spread force density of `f` at `x` into `f_idx`.
    fn spread(
        &self,
        hierarchy: &mut dyn PatchHierarchy,
        f_idx: PatchDataId,
        f: &LData,
        x: &LData,
        level: usize,
    ) -> Result<(), CibError>;

    /// Gathers a distributed field to rank 0, node-major in Lagrangian order.
    fn gather_to_root(
        &self,
        comm: &dyn Communicator,
        data: &LData,
        level: usize,
    ) -> Option<Vec<f64>>;
}

#[derive(Clone, Debug, Default)]
struct LevelMarkers {
    mesh: LMesh,
    structures: Vec<(usize, (usize, usize))>,
    positions: Vec<Vector3<f64>>,
    lag_to_local: Vec<Option<MarkerHandle>>,
}

/// Single process manager: every marker is local.
#[derive(Clone, Debug)]
pub struct LocalDataManager {
    dim: SpatialDim,
    kernel: Kernel,
    levels: Vec<LevelMarkers>,
}

impl LocalDataManager {
    pub fn new(dim: SpatialDim, kernel: Kernel) -> Self {
        Self {
            dim,
            kernel,
            levels: Vec::new(),
        }
    }

    /// Appends a structure made of `positions` to `level` and returns its
    /// Lagrangian index range.
    pub fn add_structure(
        &mut self,
        level: usize,
        id: usize,
        positions: &[Vector3<f64>],
    ) -> (usize, usize) {
        if self.levels.len() <= level {
            self.levels.resize_with(level + 1, LevelMarkers::default);
        }
        let markers = &mut self.levels[level];
        let first = markers.positions.len();
        let last = first + positions.len();
        for (k, x) in positions.iter().enumerate() {
            let lag_idx = first + k;
            let handle = MarkerHandle(lag_idx);
            markers.mesh.local_nodes.push(LNode::new(lag_idx, handle));
            markers.lag_to_local.push(Some(handle));
            markers.positions.push(*x);
        }
        markers.structures.push((id, (first, last)));
        (first, last)
    }

    /// Stores markers in a different slot order: `order[slot]` is the
    /// Lagrangian index held by `slot`. Markers missing from `order` are
    /// owned by other ranks.
    pub fn with_local_order(mut self, level: usize, order: &[usize]) -> Self {
        let markers = &mut self.levels[level];
        assert!(order.iter().all(|&lag| lag < markers.positions.len()));
        markers.lag_to_local.fill(None);
        markers.mesh.local_nodes = order
            .iter()
            .enumerate()
            .map(|(slot, &lag)| LNode::new(lag, MarkerHandle(slot)))
            .collect();
        for node in &markers.mesh.local_nodes {
            markers.lag_to_local[node.lag_idx] = Some(node.handle);
        }
        self
    }

    fn level(&self, level: usize) -> Option<&LevelMarkers> {
        self.levels.get(level).filter(|l| !l.positions.is_empty())
    }
}

impl LagrangianDataManager for LocalDataManager {
    fn dim(&self) -> SpatialDim {
        self.dim
    }

    fn level_contains_lagrangian_data(&self, level: usize) -> bool {
        self.level(level).is_some()
    }

    fn structure_ids(&self, level: usize) -> Vec<usize> {
        self.level(level)
            .map(|l| l.structures.iter().map(|&(id, _)| id).collect())
            .unwrap_or_default()
    }

    fn structure_index_range(&self, id: usize, level: usize) -> (usize, usize) {
        self.level(level)
            .and_then(|l| l.structures.iter().find(|&&(sid, _)| sid == id))
            .map(|&(_, range)| range)
            .unwrap_or((0, 0))
    }

    fn mesh(&self, level: usize) -> &LMesh {
        &self.levels[level].mesh
    }

    fn map_lagrangian_to_local(&self, lag: &[usize], level: usize) -> Vec<Option<MarkerHandle>> {
        let map = &self.levels[level].lag_to_local;
        lag.iter().map(|&i| map.get(i).copied().flatten()).collect()
    }

    fn initial_positions(&self, level: usize) -> LData {
        let markers = &self.levels[level];
        let mut x = LData::new("X", markers.mesh.local_nodes.len(), self.dim.depth());
        for node in &markers.mesh.local_nodes {
            x.set_node(node.handle, &markers.positions[node.lag_idx]);
        }
        x
    }

    fn default_kernel(&self) -> Kernel {
        self.kernel
    }

    fn interp(
        &self,
        hierarchy: &dyn PatchHierarchy,
        u_idx: PatchDataId,
        u: &mut LData,
        x: &LData,
        level: usize,
    ) -> Result<(), CibError> {
        u.fill(0.0);
        for patch in 0..hierarchy.num_patches(level) {
            let geometry = hierarchy.patch_geometry(level, patch);
            let data = hierarchy
                .patch_data(level, patch, u_idx)
                .ok_or(CibError::MissingPatchData(u_idx.index()))?;
            for node in self.mesh(level).local_nodes() {
                let h = node.handle();
                let xn = x.node(h);
                for d in 0..u.depth() {
                    let value: f64 = stencil(self.kernel, &geometry, data.centering(), d, &xn)
                        .into_iter()
                        .map(|(cell, w)| w * data.get(cell, d))
                        .sum();
                    u.set(h, d, u.get(h, d) + value);
                }
            }
        }
        Ok(())
    }

    fn spread(
        &self,
        hierarchy: &mut dyn PatchHierarchy,
        f_idx: PatchDataId,
        f: &LData,
        x: &LData,
        level: usize,
    ) -> Result<(), CibError> {
        for patch in 0..hierarchy.num_patches(level) {
            let geometry = hierarchy.patch_geometry(level, patch);
            let inv_volume = 1.0 / geometry.cell_volume();
            let data = hierarchy
                .patch_data_mut(level, patch, f_idx)
                .ok_or(CibError::MissingPatchData(f_idx.index()))?;
            let centering = data.centering();
            let mut values = data.as_mut();
            for node in self.mesh(level).local_nodes() {
                let h = node.handle();
                let xn = x.node(h);
                for d in 0..f.depth() {
                    let fd = f.get(h, d) * inv_volume;
                    for (cell, w) in stencil(self.kernel, &geometry, centering, d, &xn) {
                        let mut col = values.rb_mut().col(d);
                        col[(cell, 0)] += w * fd;
                    }
                }
            }
        }
        Ok(())
    }

    fn gather_to_root(
        &self,
        comm: &dyn Communicator,
        data: &LData,
        level: usize,
    ) -> Option<Vec<f64>> {
        let depth = data.depth();
        let nodes = self.mesh(level).local_nodes();
        let mut payload = Vec::with_capacity(nodes.len() * (depth + 1));
        for node in nodes {
            payload.push(node.lagrangian_index() as f64);
            for d in 0..depth {
                payload.push(data.get(node.handle(), d));
            }
        }

        let gathered = comm.gather_to_root(&payload)?;
        let total = self.levels[level].positions.len();
        let mut out = vec![0.0; total * depth];
        for record in gathered.chunks_exact(depth + 1) {
            let lag = record[0] as usize;
            out[lag * depth..(lag + 1) * depth].copy_from_slice(&record[1..]);
        }
        Some(out)
    }
}
