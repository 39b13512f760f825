use faer_core::{zipped, Mat, MatMut, MatRef};
use nalgebra::Vector3;

use crate::SpatialDim;

// grid[0] <-> lower
// grid[i] <-> lower + i * delta forall i
// grid[steps] <-> upper
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Grid {
    lower: f64,
    upper: f64,
    steps: usize,
    delta: f64,
}

impl Grid {
    pub fn from_steps(lower: f64, upper: f64, steps: usize) -> Self {
        let delta = (upper - lower) / steps as f64;
        Self {
            lower,
            upper,
            steps,
            delta,
        }
    }

    pub fn lower(&self) -> f64 {
        self.lower
    }

    pub fn upper(&self) -> f64 {
        self.upper
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn length(&self) -> f64 {
        self.upper - self.lower
    }

    /// Position of the `i`-th cell face.
    #[inline]
    pub fn face(&self, i: usize) -> f64 {
        self.lower + self.delta * i as f64
    }
}

/// Box of cells covered by one patch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PatchGeometry {
    dim: SpatialDim,
    axes: [Grid; 3],
}

impl PatchGeometry {
    /// Unused trailing axes (the third one in 2-D) are a single unit cell.
    pub fn new(dim: SpatialDim, axes: &[Grid]) -> Self {
        assert_eq!(axes.len(), dim.depth());
        let unit = Grid::from_steps(0.0, 1.0, 1);
        let mut all = [unit; 3];
        all[..axes.len()].copy_from_slice(axes);
        Self { dim, axes: all }
    }

    pub fn dim(&self) -> SpatialDim {
        self.dim
    }

    pub fn axis(&self, a: usize) -> Grid {
        self.axes[a]
    }

    pub fn cells(&self) -> [usize; 3] {
        [
            self.axes[0].steps,
            self.axes[1].steps,
            self.axes[2].steps,
        ]
    }

    pub fn num_cells(&self) -> usize {
        self.cells().iter().product()
    }

    pub fn dx(&self) -> Vector3<f64> {
        Vector3::new(self.axes[0].delta, self.axes[1].delta, self.axes[2].delta)
    }

    pub fn cell_volume(&self) -> f64 {
        let dx = self.dx();
        dx.iter().take(self.dim.depth()).product()
    }

    #[inline]
    pub fn linear_index(&self, i: [usize; 3]) -> usize {
        let [nx, ny, _] = self.cells();
        i[0] + nx * (i[1] + ny * i[2])
    }

    #[inline]
    pub fn cell_index(&self, linear: usize) -> [usize; 3] {
        let [nx, ny, _] = self.cells();
        [linear % nx, (linear / nx) % ny, linear / (nx * ny)]
    }

    /// Offset of the sample points of `centering` along `axis`, in cells.
    #[inline]
    pub(crate) fn sample_offset(centering: Centering, column: usize, axis: usize) -> f64 {
        match centering {
            Centering::Side if column == axis => 0.0,
            _ => 0.5,
        }
    }

    /// Physical position of the sample stored at `linear` in `column`.
    pub fn sample_position(
        &self,
        centering: Centering,
        column: usize,
        linear: usize,
    ) -> Vector3<f64> {
        let idx = self.cell_index(linear);
        Vector3::from_fn(|a, _| {
            let grid = self.axes[a];
            grid.lower + grid.delta * (idx[a] as f64 + Self::sample_offset(centering, column, a))
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Centering {
    /// One column per component, samples at cell centres.
    Cell,
    /// One column per axis, samples on the faces normal to that axis.
    Side,
}

/// Data living on one patch, rows are cells and columns are components.
#[derive(Clone, Debug)]
pub struct PatchData {
    centering: Centering,
    values: Mat<f64>,
}

impl PatchData {
    pub fn new(centering: Centering, cells: usize, depth: usize) -> Self {
        Self {
            centering,
            values: Mat::zeros(cells, depth),
        }
    }

    pub fn centering(&self) -> Centering {
        self.centering
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

    pub fn fill(&mut self, value: f64) {
        zipped!(self.values.as_mut()).for_each(|mut x| x.write(value));
    }

    #[inline]
    pub fn get(&self, cell: usize, column: usize) -> f64 {
        self.values[(cell, column)]
    }

    /// Sets every sample from a function of column and sample position.
    pub fn set_from_fn(
        &mut self,
        geometry: &PatchGeometry,
        f: impl Fn(usize, Vector3<f64>) -> f64,
    ) {
        for column in 0..self.depth() {
            for cell in 0..self.values.nrows() {
                let x = geometry.sample_position(self.centering, column, cell);
                self.values[(cell, column)] = f(column, x);
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatchDataId(pub(crate) usize);

impl PatchDataId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// The Eulerian side of the coupling: levels of patches with registered data.
pub trait PatchHierarchy {
    fn dim(&self) -> SpatialDim;

    fn finest_level_number(&self) -> usize;

    /// Grid spacing of the coarsest level.
    fn grid_spacing(&self) -> Vector3<f64>;

    fn domain_extents(&self) -> Vector3<f64>;

    fn domain_volume(&self) -> f64;

    fn num_patches(&self, level: usize) -> usize;

    fn patch_geometry(&self, level: usize, patch: usize) -> PatchGeometry;

    fn register_variable(&mut self, name: &str, centering: Centering, depth: usize) -> PatchDataId;

    fn patch_data(&self, level: usize, patch: usize, id: PatchDataId) -> Option<&PatchData>;

    fn patch_data_mut(
        &mut self,
        level: usize,
        patch: usize,
        id: PatchDataId,
    ) -> Option<&mut PatchData>;

    /// Volume of one cell on the coarsest level.
    fn cell_volume(&self) -> f64 {
        let dx = self.grid_spacing();
        dx.iter().take(self.dim().depth()).product()
    }
}

/// Single level, single patch, periodic Cartesian box.
#[derive(Clone, Debug)]
pub struct CartesianHierarchy {
    geometry: PatchGeometry,
    names: Vec<String>,
    data: Vec<PatchData>,
}

impl CartesianHierarchy {
    pub fn new(dim: SpatialDim, axes: &[Grid]) -> Self {
        Self {
            geometry: PatchGeometry::new(dim, axes),
            names: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Cube `[lower, upper]^d` with `steps` cells per axis.
    pub fn uniform(dim: SpatialDim, lower: f64, upper: f64, steps: usize) -> Self {
        let axes = vec![Grid::from_steps(lower, upper, steps); dim.depth()];
        Self::new(dim, &axes)
    }

    pub fn geometry(&self) -> &PatchGeometry {
        &self.geometry
    }

    pub fn variable_id(&self, name: &str) -> Option<PatchDataId> {
        self.names.iter().position(|n| n == name).map(PatchDataId)
    }
}

impl PatchHierarchy for CartesianHierarchy {
    fn dim(&self) -> SpatialDim {
        self.geometry.dim
    }

    fn finest_level_number(&self) -> usize {
        0
    }

    fn grid_spacing(&self) -> Vector3<f64> {
        self.geometry.dx()
    }

    fn domain_extents(&self) -> Vector3<f64> {
        Vector3::from_fn(|a, _| self.geometry.axes[a].length())
    }

    fn domain_volume(&self) -> f64 {
        self.domain_extents()
            .iter()
            .take(self.geometry.dim.depth())
            .product()
    }

    fn num_patches(&self, level: usize) -> usize {
        usize::from(level == 0)
    }

    fn patch_geometry(&self, level: usize, patch: usize) -> PatchGeometry {
        debug_assert!(level == 0 && patch == 0);
        self.geometry
    }

    fn register_variable(&mut self, name: &str, centering: Centering, depth: usize) -> PatchDataId {
        if let Some(id) = self.variable_id(name) {
            return id;
        }
        self.names.push(name.to_string());
        self.data
            .push(PatchData::new(centering, self.geometry.num_cells(), depth));
        PatchDataId(self.data.len() - 1)
    }

    fn patch_data(&self, level: usize, patch: usize, id: PatchDataId) -> Option<&PatchData> {
        if level != 0 || patch != 0 {
            return None;
        }
        self.data.get(id.0)
    }

    fn patch_data_mut(
        &mut self,
        level: usize,
        patch: usize,
        id: PatchDataId,
    ) -> Option<&mut PatchData> {
        if level != 0 || patch != 0 {
            return None;
        }
        self.data.get_mut(id.0)
    }
}
