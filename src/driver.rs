use crate::{
    comm::{Communicator, SerialComm},
    error::CibError,
    grid::{Centering, Grid, PatchDataId, PatchHierarchy},
    method::CibMethod,
    stepper::{FluidStructureStepper, IbStrategy},
};

/// Computes the constraint force of one step.
///
/// Called once per cycle between the pre-fluid-solve hook and the spreading
/// of the force. An implementation typically marks and interpolates the
/// half-step velocity, solves for lambda (with the mobility and rigid-body
/// operators of [`CibMethod`]), stores the solved rigid velocities and
/// finally sets the constraint force at the half time.
pub trait ConstraintSolver<S, C = SerialComm> {
    fn name(&self) -> &str;

    #[allow(clippy::too_many_arguments)]
    fn solve(
        &mut self,
        method: &mut CibMethod<S, C>,
        hierarchy: &mut dyn PatchHierarchy,
        u_idx: PatchDataId,
        f_idx: PatchDataId,
        current_time: f64,
        new_time: f64,
    ) -> Result<(), CibError>;
}

pub struct ObsCtx<'ctx, S, C> {
    method: &'ctx CibMethod<S, C>,
    hierarchy: &'ctx dyn PatchHierarchy,
    solver: &'ctx str,
    time: Grid,
    time_sampling: usize,

    // Iteration info
    iter: usize,
    t: f64,
}

impl<'ctx, S, C> ObsCtx<'ctx, S, C> {
    pub fn method(&self) -> &CibMethod<S, C> {
        self.method
    }

    pub fn hierarchy(&self) -> &dyn PatchHierarchy {
        self.hierarchy
    }

    pub fn solver_name(&self) -> &str {
        self.solver
    }

    /// Time axis of the whole run.
    pub fn time_grid(&self) -> Grid {
        self.time
    }

    pub fn iter(&self) -> usize {
        self.iter
    }

    pub fn time(&self) -> f64 {
        self.t
    }

    pub fn sampling_period(&self) -> usize {
        self.time_sampling
    }
}

#[allow(unused_variables)]
pub trait Observer<S, C = SerialComm> {
    fn at_startup(&mut self, ctx: ObsCtx<S, C>) -> Result<(), CibError> {
        Ok(())
    }

    fn at_each_iteration(&mut self, ctx: ObsCtx<S, C>) -> Result<(), CibError> {
        Ok(())
    }

    fn at_cleanup(&mut self, ctx: ObsCtx<S, C>) -> Result<(), CibError> {
        Ok(())
    }
}

/// Marches a [`CibMethod`] over a time axis.
///
/// Every step runs, in order: the pre-step hook, the rigid predictor, then
/// for each cycle the pre-fluid-solve hook, the constraint solve and the
/// spreading of the constraint force, and finally the rigid corrector and
/// the post-step hook.
pub struct Driver<'d, S, H, C = SerialComm> {
    method: CibMethod<S, C>,
    hierarchy: H,
    solver: Box<dyn ConstraintSolver<S, C> + 'd>,
    observers: Vec<Box<dyn Observer<S, C> + 'd>>,
    time: Grid,
    u_idx: PatchDataId,
    f_idx: PatchDataId,
    num_cycles: usize,
    time_sampling: usize,
    initial_time: bool,
}

impl<'d, S: FluidStructureStepper, H: PatchHierarchy, C: Communicator> Driver<'d, S, H, C> {
    /// Registers the side-centred velocity `u` and force `f` with the
    /// hierarchy.
    pub fn new(
        method: CibMethod<S, C>,
        mut hierarchy: H,
        solver: impl ConstraintSolver<S, C> + 'd,
        time: Grid,
    ) -> Self {
        let depth = hierarchy.dim().depth();
        let u_idx = hierarchy.register_variable("u", Centering::Side, depth);
        let f_idx = hierarchy.register_variable("f", Centering::Side, depth);
        let time_sampling = 1 + time.steps() / 10;
        Self {
            method,
            hierarchy,
            solver: Box::new(solver),
            observers: Vec::new(),
            time,
            u_idx,
            f_idx,
            num_cycles: 1,
            time_sampling,
            initial_time: true,
        }
    }

    pub fn with_time_sampling(mut self, sampling_period: usize) -> Self {
        self.time_sampling = sampling_period.max(1);
        self
    }

    pub fn with_num_cycles(mut self, num_cycles: usize) -> Self {
        self.num_cycles = num_cycles.max(1);
        self
    }

    /// Resumes from restored state: initial lambda and `eul_lambda` are not
    /// reset.
    pub fn resumed(mut self) -> Self {
        self.initial_time = false;
        self
    }

    pub fn with_observer(mut self, observer: impl Observer<S, C> + 'd) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn method(&self) -> &CibMethod<S, C> {
        &self.method
    }

    pub fn method_mut(&mut self) -> &mut CibMethod<S, C> {
        &mut self.method
    }

    pub fn hierarchy(&self) -> &H {
        &self.hierarchy
    }

    pub fn velocity_index(&self) -> PatchDataId {
        self.u_idx
    }

    pub fn force_index(&self) -> PatchDataId {
        self.f_idx
    }

    pub fn into_parts(self) -> (CibMethod<S, C>, H) {
        (self.method, self.hierarchy)
    }

    fn notify(
        &mut self,
        iter: usize,
        t: f64,
        hook: impl Fn(&mut dyn Observer<S, C>, ObsCtx<S, C>) -> Result<(), CibError>,
    ) -> Result<(), CibError> {
        for o in self.observers.iter_mut() {
            hook(
                o.as_mut(),
                ObsCtx {
                    method: &self.method,
                    hierarchy: &self.hierarchy,
                    solver: self.solver.name(),
                    time: self.time,
                    time_sampling: self.time_sampling,
                    iter,
                    t,
                },
            )?;
        }
        Ok(())
    }

    fn clear_force(&mut self) -> Result<(), CibError> {
        for ln in 0..=self.hierarchy.finest_level_number() {
            for patch in 0..self.hierarchy.num_patches(ln) {
                self.hierarchy
                    .patch_data_mut(ln, patch, self.f_idx)
                    .ok_or(CibError::MissingPatchData(self.f_idx.index()))?
                    .fill(0.0);
            }
        }
        Ok(())
    }

    fn step(&mut self, current_time: f64, new_time: f64) -> Result<(), CibError> {
        let half_time = current_time + 0.5 * (new_time - current_time);
        let num_cycles = self.num_cycles;

        self.method
            .preprocess_integrate_data(current_time, new_time, num_cycles)?;
        self.method.euler_step(current_time, new_time)?;

        for cycle in 0..num_cycles {
            self.method
                .preprocess_solve_fluid_equations(current_time, new_time, cycle)?;
            self.clear_force()?;
            self.solver.solve(
                &mut self.method,
                &mut self.hierarchy,
                self.u_idx,
                self.f_idx,
                current_time,
                new_time,
            )?;
            self.method
                .spread_force(&mut self.hierarchy, self.f_idx, half_time)?;
        }

        self.method.midpoint_step(current_time, new_time)?;
        self.method
            .postprocess_integrate_data(&mut self.hierarchy, current_time, new_time, num_cycles)
    }

    pub fn run(&mut self) -> Result<(), CibError> {
        self.method
            .initialize_patch_hierarchy(&mut self.hierarchy, self.initial_time)?;

        let t0 = self.time.lower();
        self.notify(0, t0, |o, ctx| o.at_startup(ctx))?;

        for n in 0..self.time.steps() {
            let current_time = self.time.face(n);
            let new_time = self.time.face(n + 1);
            self.step(current_time, new_time)?;

            if (n + 1) % self.time_sampling == 0 {
                self.notify(n + 1, new_time, |o, ctx| o.at_each_iteration(ctx))?;
            }
        }

        let steps = self.time.steps();
        let t = self.time.upper();
        self.notify(steps, t, |o, ctx| o.at_cleanup(ctx))?;
        self.method.finish_diagnostics()
    }
}

pub struct Logger;

impl<S: FluidStructureStepper, C: Communicator> Observer<S, C> for Logger {
    fn at_startup(&mut self, ctx: ObsCtx<S, C>) -> Result<(), CibError> {
        let time = ctx.time_grid();
        let dx = ctx.hierarchy().grid_spacing();
        tracing::event!(
            tracing::Level::INFO,
            "start of simulation `{}` (`{}` solver, {} structures, Δx={:e}, Δt={:e} ({} steps))",
            ctx.method().object_name(),
            ctx.solver_name(),
            ctx.method().num_rigid_parts(),
            dx[0],
            time.delta(),
            time.steps(),
        );
        Ok(())
    }

    fn at_each_iteration(&mut self, ctx: ObsCtx<S, C>) -> Result<(), CibError> {
        let method = ctx.method();
        for part in 0..method.num_rigid_parts() {
            let com = method.kinematics(part).center_of_mass_half;
            tracing::event!(
                tracing::Level::TRACE,
                "`{}`: step {} (t={:e}), structure {} centered at ({:e}, {:e}, {:e})",
                method.object_name(),
                ctx.iter(),
                ctx.time(),
                part,
                com.x,
                com.y,
                com.z,
            );
        }
        Ok(())
    }

    fn at_cleanup(&mut self, ctx: ObsCtx<S, C>) -> Result<(), CibError> {
        tracing::event!(
            tracing::Level::INFO,
            "finished simulation `{}` after {} steps",
            ctx.method().object_name(),
            ctx.iter()
        );
        Ok(())
    }
}
