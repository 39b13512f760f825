//! The generic fluid-structure stepper that the constraint method wraps.

use faer_core::zipped;

use crate::{
    equal_eps,
    error::CibError,
    grid::{PatchDataId, PatchHierarchy},
    ldata::{LData, LagrangianDataManager},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeLevel {
    Current,
    Half,
    New,
}

/// The three time levels of the step being integrated.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimeWindow {
    current: f64,
    half: f64,
    new: f64,
}

impl TimeWindow {
    pub fn new(current: f64, new: f64) -> Self {
        Self {
            current,
            half: current + 0.5 * (new - current),
            new,
        }
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn half(&self) -> f64 {
        self.half
    }

    pub fn new_time(&self) -> f64 {
        self.new
    }

    pub fn dt(&self) -> f64 {
        self.new - self.current
    }

    pub fn time(&self, level: TimeLevel) -> f64 {
        match level {
            TimeLevel::Current => self.current,
            TimeLevel::Half => self.half,
            TimeLevel::New => self.new,
        }
    }

    pub fn level_of(&self, t: f64) -> Option<TimeLevel> {
        [TimeLevel::Current, TimeLevel::Half, TimeLevel::New]
            .into_iter()
            .find(|&level| equal_eps(t, self.time(level)))
    }

    /// Checks that `t` is the time of `level`.
    pub fn expect(&self, level: TimeLevel, t: f64) -> Result<(), CibError> {
        if equal_eps(t, self.time(level)) {
            Ok(())
        } else {
            Err(CibError::TimeMismatch {
                level,
                given: t,
                expected: self.time(level),
            })
        }
    }
}

/// Marker position, velocity and force of one level at every time level.
#[derive(Clone, Debug)]
pub struct LevelFields {
    pub x_current: LData,
    pub x_half: LData,
    pub x_new: LData,
    pub u_current: LData,
    pub u_half: LData,
    pub u_new: LData,
    pub f_half: LData,
}

impl LevelFields {
    pub fn new(x: LData) -> Self {
        let u = x.zeros_like("U");
        Self {
            x_half: x.clone(),
            x_new: x.clone(),
            x_current: x,
            u_current: u.clone(),
            u_half: u.clone(),
            u_new: u.clone(),
            f_half: u,
        }
    }

    pub fn position(&self, level: TimeLevel) -> &LData {
        match level {
            TimeLevel::Current => &self.x_current,
            TimeLevel::Half => &self.x_half,
            TimeLevel::New => &self.x_new,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LagrangianFields {
    levels: Vec<Option<LevelFields>>,
    pub x_half_needs_ghost_fill: bool,
    pub f_half_needs_ghost_fill: bool,
}

impl LagrangianFields {
    pub fn insert(&mut self, level: usize, fields: LevelFields) {
        if self.levels.len() <= level {
            self.levels.resize_with(level + 1, || None);
        }
        self.levels[level] = Some(fields);
    }

    pub fn level(&self, level: usize) -> Result<&LevelFields, CibError> {
        self.levels
            .get(level)
            .and_then(Option::as_ref)
            .ok_or(CibError::MissingLData { name: "X", level })
    }

    pub fn level_mut(&mut self, level: usize) -> Result<&mut LevelFields, CibError> {
        self.levels
            .get_mut(level)
            .and_then(Option::as_mut)
            .ok_or(CibError::MissingLData { name: "X", level })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut LevelFields> {
        self.levels.iter_mut().flatten()
    }
}

/// Hooks the hierarchy integrator calls on an IB method, in step order.
pub trait IbStrategy {
    fn preprocess_integrate_data(
        &mut self,
        current_time: f64,
        new_time: f64,
        num_cycles: usize,
    ) -> Result<(), CibError>;

    fn postprocess_integrate_data(
        &mut self,
        hierarchy: &mut dyn PatchHierarchy,
        current_time: f64,
        new_time: f64,
        num_cycles: usize,
    ) -> Result<(), CibError>;

    fn preprocess_solve_fluid_equations(
        &mut self,
        current_time: f64,
        new_time: f64,
        cycle: usize,
    ) -> Result<(), CibError>;

    fn interpolate_velocity(
        &mut self,
        hierarchy: &dyn PatchHierarchy,
        u_idx: PatchDataId,
        data_time: f64,
    ) -> Result<(), CibError>;

    fn spread_force(
        &mut self,
        hierarchy: &mut dyn PatchHierarchy,
        f_idx: PatchDataId,
        data_time: f64,
    ) -> Result<(), CibError>;

    fn euler_step(&mut self, current_time: f64, new_time: f64) -> Result<(), CibError>;

    fn midpoint_step(&mut self, current_time: f64, new_time: f64) -> Result<(), CibError>;

    fn trapezoidal_step(&mut self, current_time: f64, new_time: f64) -> Result<(), CibError>;
}

/// An IB method that also exposes its Lagrangian state.
pub trait FluidStructureStepper: IbStrategy {
    type Manager: LagrangianDataManager;

    fn data_manager(&self) -> &Self::Manager;

    fn fields(&self) -> &LagrangianFields;

    fn fields_mut(&mut self) -> (&Self::Manager, &mut LagrangianFields);

    fn time_window(&self) -> TimeWindow;

    /// Number of completed steps.
    fn integrator_step(&self) -> usize;

    fn initialize_level_data(&mut self, level: usize, initial_time: bool) -> Result<(), CibError>;
}

// out = x + alpha * u
fn axpy_into(out: &mut LData, x: &LData, alpha: f64, u: &LData) {
    zipped!(out.as_mut(), x.as_ref(), u.as_ref())
        .for_each(|mut o, x, u| o.write(x.read() + alpha * u.read()));
}

/// Conventional IB stepping of free markers.
#[derive(Clone, Debug)]
pub struct IbMethod<M> {
    manager: M,
    fields: LagrangianFields,
    window: TimeWindow,
    step: usize,
}

impl<M: LagrangianDataManager> IbMethod<M> {
    pub fn new(manager: M) -> Self {
        Self {
            manager,
            fields: LagrangianFields::default(),
            window: TimeWindow::default(),
            step: 0,
        }
    }

    /// Resumes the step counter, e.g. after a restart.
    pub fn with_integrator_step(mut self, step: usize) -> Self {
        self.step = step;
        self
    }
}

impl<M: LagrangianDataManager> IbStrategy for IbMethod<M> {
    fn preprocess_integrate_data(
        &mut self,
        current_time: f64,
        new_time: f64,
        _num_cycles: usize,
    ) -> Result<(), CibError> {
        self.window = TimeWindow::new(current_time, new_time);
        for level in self.fields.iter_mut() {
            level.x_half.copy_from(&level.x_current);
            level.x_new.copy_from(&level.x_current);
            level.u_half.copy_from(&level.u_current);
            level.u_new.copy_from(&level.u_current);
            level.f_half.fill(0.0);
        }
        Ok(())
    }

    fn postprocess_integrate_data(
        &mut self,
        _hierarchy: &mut dyn PatchHierarchy,
        _current_time: f64,
        _new_time: f64,
        _num_cycles: usize,
    ) -> Result<(), CibError> {
        for level in self.fields.iter_mut() {
            std::mem::swap(&mut level.x_current, &mut level.x_new);
            std::mem::swap(&mut level.u_current, &mut level.u_new);
        }
        self.step += 1;
        Ok(())
    }

    fn preprocess_solve_fluid_equations(
        &mut self,
        _current_time: f64,
        _new_time: f64,
        cycle: usize,
    ) -> Result<(), CibError> {
        tracing::trace!(cycle, "preprocessing fluid solve");
        Ok(())
    }

    fn interpolate_velocity(
        &mut self,
        hierarchy: &dyn PatchHierarchy,
        u_idx: PatchDataId,
        data_time: f64,
    ) -> Result<(), CibError> {
        let level = self.window.level_of(data_time).ok_or(CibError::TimeMismatch {
            level: TimeLevel::Half,
            given: data_time,
            expected: self.window.half(),
        })?;
        for ln in 0..=hierarchy.finest_level_number() {
            if !self.manager.level_contains_lagrangian_data(ln) {
                continue;
            }
            let fields = self.fields.level_mut(ln)?;
            let (u, x) = match level {
                TimeLevel::Current => (&mut fields.u_current, &fields.x_current),
                TimeLevel::Half => (&mut fields.u_half, &fields.x_half),
                TimeLevel::New => (&mut fields.u_new, &fields.x_new),
            };
            self.manager.interp(hierarchy, u_idx, u, x, ln)?;
        }
        Ok(())
    }

    fn spread_force(
        &mut self,
        hierarchy: &mut dyn PatchHierarchy,
        f_idx: PatchDataId,
        data_time: f64,
    ) -> Result<(), CibError> {
        self.window.expect(TimeLevel::Half, data_time)?;
        for ln in 0..=hierarchy.finest_level_number() {
            if !self.manager.level_contains_lagrangian_data(ln) {
                continue;
            }
            let fields = self.fields.level(ln)?;
            self.manager.spread(hierarchy, f_idx, &fields.f_half, &fields.x_half, ln)?;
        }
        self.fields.f_half_needs_ghost_fill = false;
        Ok(())
    }

    fn euler_step(&mut self, current_time: f64, new_time: f64) -> Result<(), CibError> {
        let dt = new_time - current_time;
        for level in self.fields.iter_mut() {
            axpy_into(&mut level.x_new, &level.x_current, dt, &level.u_current);
            axpy_into(&mut level.x_half, &level.x_current, 0.5 * dt, &level.u_current);
        }
        self.fields.x_half_needs_ghost_fill = true;
        Ok(())
    }

    fn midpoint_step(&mut self, current_time: f64, new_time: f64) -> Result<(), CibError> {
        let dt = new_time - current_time;
        for level in self.fields.iter_mut() {
            axpy_into(&mut level.x_new, &level.x_current, dt, &level.u_half);
        }
        Ok(())
    }

    fn trapezoidal_step(&mut self, current_time: f64, new_time: f64) -> Result<(), CibError> {
        let dt = new_time - current_time;
        for level in self.fields.iter_mut() {
            axpy_into(&mut level.x_new, &level.x_current, 0.5 * dt, &level.u_current);
            let x_partial = level.x_new.clone();
            axpy_into(&mut level.x_new, &x_partial, 0.5 * dt, &level.u_new);
        }
        Ok(())
    }
}

impl<M: LagrangianDataManager> FluidStructureStepper for IbMethod<M> {
    type Manager = M;

    fn data_manager(&self) -> &M {
        &self.manager
    }

    fn fields(&self) -> &LagrangianFields {
        &self.fields
    }

    fn fields_mut(&mut self) -> (&M, &mut LagrangianFields) {
        (&self.manager, &mut self.fields)
    }

    fn time_window(&self) -> TimeWindow {
        self.window
    }

    fn integrator_step(&self) -> usize {
        self.step
    }

    /// Allocates the fields of `level` from the manager's marker positions,
    /// at the initial time or when resuming without them.
    fn initialize_level_data(&mut self, level: usize, initial_time: bool) -> Result<(), CibError> {
        let missing = self.fields.level(level).is_err();
        if (initial_time || missing) && self.manager.level_contains_lagrangian_data(level) {
            let x = self.manager.initial_positions(level);
            tracing::debug!(level, markers = x.len(), "allocating Lagrangian data");
            self.fields.insert(level, LevelFields::new(x));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        grid::{CartesianHierarchy, Centering},
        ldata::{Kernel, LocalDataManager, MarkerHandle},
        SpatialDim,
    };
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn stepper() -> IbMethod<LocalDataManager> {
        let mut m = LocalDataManager::new(SpatialDim::Two, Kernel::PiecewiseLinear);
        m.add_structure(0, 0, &[Vector3::new(0.25, 0.5, 0.0), Vector3::new(0.75, 0.5, 0.0)]);
        let mut s = IbMethod::new(m);
        s.initialize_level_data(0, true).unwrap();
        s
    }

    #[test]
    fn time_window_levels() {
        let w = TimeWindow::new(1.0, 1.5);
        assert_relative_eq!(w.half(), 1.25);
        assert_relative_eq!(w.dt(), 0.5);
        assert_eq!(w.level_of(1.25), Some(TimeLevel::Half));
        assert_eq!(w.level_of(1.3), None);
        assert!(w.expect(TimeLevel::New, 1.5).is_ok());
        assert!(matches!(
            w.expect(TimeLevel::Current, 1.5),
            Err(CibError::TimeMismatch { level: TimeLevel::Current, .. })
        ));
    }

    #[test]
    fn free_markers_follow_interpolated_velocity() {
        let mut h = CartesianHierarchy::uniform(SpatialDim::Two, 0.0, 1.0, 8);
        let u_idx = h.register_variable("u", Centering::Side, 2);
        let geom = *h.geometry();
        h.patch_data_mut(0, 0, u_idx)
            .unwrap()
            .set_from_fn(&geom, |axis, _| if axis == 0 { 0.5 } else { 0.0 });

        let mut s = stepper();
        s.preprocess_integrate_data(0.0, 0.2, 1).unwrap();
        s.interpolate_velocity(&h, u_idx, 0.1).unwrap();
        s.midpoint_step(0.0, 0.2).unwrap();
        s.postprocess_integrate_data(&mut h, 0.0, 0.2, 1).unwrap();

        let x = &s.fields().level(0).unwrap().x_current;
        assert_relative_eq!(x.get(MarkerHandle(0), 0), 0.35, epsilon = 1e-12);
        assert_relative_eq!(x.get(MarkerHandle(1), 1), 0.5, epsilon = 1e-12);
        assert_eq!(s.integrator_step(), 1);
    }

    #[test]
    fn explicit_rules_use_the_stored_velocities() {
        let mut s = stepper();
        let (_, fields) = s.fields_mut();
        let level = fields.level_mut(0).unwrap();
        level.u_current = LData::from_rows("U", 2, &[1.0, 0.0, 0.0, -1.0]);
        level.u_new = LData::from_rows("U", 2, &[3.0, 0.0, 0.0, 1.0]);

        s.euler_step(0.0, 0.1).unwrap();
        assert!(s.fields().x_half_needs_ghost_fill);
        let level = s.fields().level(0).unwrap();
        assert_relative_eq!(level.x_half.get(MarkerHandle(0), 0), 0.3, epsilon = 1e-12);
        assert_relative_eq!(level.x_new.get(MarkerHandle(0), 0), 0.35, epsilon = 1e-12);
        assert_relative_eq!(level.x_half.get(MarkerHandle(1), 1), 0.45, epsilon = 1e-12);
        assert_relative_eq!(level.x_new.get(MarkerHandle(1), 1), 0.4, epsilon = 1e-12);

        // averages the current and new velocities
        s.trapezoidal_step(0.0, 0.1).unwrap();
        let level = s.fields().level(0).unwrap();
        assert_relative_eq!(level.x_new.get(MarkerHandle(0), 0), 0.45, epsilon = 1e-12);
        assert_relative_eq!(level.x_new.get(MarkerHandle(1), 0), 0.75, epsilon = 1e-12);
        assert_relative_eq!(level.x_new.get(MarkerHandle(1), 1), 0.5, epsilon = 1e-12);
        assert_relative_eq!(level.x_current.get(MarkerHandle(0), 0), 0.25);
    }

    #[test]
    fn spreading_requires_half_time() {
        let mut h = CartesianHierarchy::uniform(SpatialDim::Two, 0.0, 1.0, 8);
        let f_idx = h.register_variable("f", Centering::Side, 2);
        let mut s = stepper();
        s.preprocess_integrate_data(0.0, 1.0, 1).unwrap();
        assert!(s.spread_force(&mut h, f_idx, 1.0).is_err());
        assert!(s.spread_force(&mut h, f_idx, 0.5).is_ok());
    }
}
