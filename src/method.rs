//! The constraint immersed-boundary method for rigid bodies.
//!
//! [`CibMethod`] wraps a generic fluid-structure stepper. Marker positions
//! are advanced rigidly instead of with the interpolated fluid velocity, and
//! the force spread to the fluid is the Lagrange multiplier computed by an
//! external constraint solver. The solver drives a step through the public
//! operations below, in this order:
//!
//! 1. [`set_interpolated_velocity_vector`](CibMethod::set_interpolated_velocity_vector)
//!    then [`interpolate_velocity`](IbStrategy::interpolate_velocity) to sample
//!    the fluid at the half-step marker positions,
//! 2. the rigid-body operators ([`set_rigid_body_velocity`](CibMethod::set_rigid_body_velocity),
//!    [`compute_net_rigid_generalized_force`](CibMethod::compute_net_rigid_generalized_force),
//!    [`generate_mobility_matrix`](CibMethod::generate_mobility_matrix)) to compute lambda,
//! 3. [`set_constraint_force`](CibMethod::set_constraint_force), after which
//!    [`spread_force`](IbStrategy::spread_force) applies lambda to the fluid.

use std::path::PathBuf;

use faer_core::Mat;
use nalgebra::{Matrix3, Vector3};

use crate::{
    comm::{Communicator, SerialComm},
    config::CibConfig,
    constraint::{self, ConstraintForceManager},
    diagnostics::{open_lambda_writer, DiagnosticsWriter, LambdaRecord},
    error::CibError,
    grid::{Centering, PatchDataId, PatchHierarchy},
    integrator::{com_and_moi, rigid_advance, rotation_matrix},
    kinematics::{ConstrainedVelocityFns, RigidBodyKinematics},
    ldata::{LData, LagrangianDataManager},
    mobility::{mobility_matrix, regularize, MobilityMatrixType, MobilityParams},
    restart::RestartDatabase,
    stepper::{FluidStructureStepper, IbStrategy, LagrangianFields, TimeLevel},
    structure::StructureIndexMap,
    transfer::StalenessFlags,
    RigidDofVector, SpatialDim,
};

/// Called before every fluid solve with `(current_time, new_time, cycle)`.
pub type PreFluidSolveFn = Box<dyn FnMut(f64, f64, usize)>;

/// Where the Eulerian diagnostic copy of lambda is stored.
const EUL_LAMBDA: &str = "eul_lambda";

pub struct CibMethod<S, C = SerialComm> {
    object_name: String,
    stepper: S,
    comm: C,
    dim: SpatialDim,
    bodies: Vec<RigidBodyKinematics>,
    velocity_fns: Vec<ConstrainedVelocityFns>,
    structures: StructureIndexMap,
    constraint: ConstraintForceManager,
    flags: StalenessFlags,
    prefluid_callbacks: Vec<PreFluidSolveFn>,
    output_eul_lambda: bool,
    eul_lambda_idx: Option<PatchDataId>,
    lambda_dump_interval: usize,
    lambda_dirname: PathBuf,
    append_lambda: bool,
    lambda_writer: Option<Box<dyn DiagnosticsWriter>>,
    finest_ln: usize,
}

// positions of every level holding markers at one time level
fn level_positions<'a>(
    fields: &'a LagrangianFields,
    levels: &[usize],
    at: TimeLevel,
) -> Result<Vec<(usize, &'a LData)>, CibError> {
    let mut positions = Vec::with_capacity(levels.len());
    for &ln in levels {
        positions.push((ln, fields.level(ln)?.position(at)));
    }
    Ok(positions)
}

impl<S: FluidStructureStepper, C: Communicator> CibMethod<S, C> {
    /// Builds the method for `num_rigid_parts` structures.
    ///
    /// With a restart database the current rigid velocities are read back
    /// and an existing lambda dump is appended to.
    pub fn new(
        object_name: impl Into<String>,
        stepper: S,
        comm: C,
        num_rigid_parts: usize,
        config: &CibConfig,
        restart: Option<&RestartDatabase>,
    ) -> Result<Self, CibError> {
        let object_name = object_name.into();
        config.validate(num_rigid_parts)?;
        let constraint = ConstraintForceManager::new(
            config.lambda_paths(num_rigid_parts)?,
            config.weight_paths(num_rigid_parts)?,
        );

        let dim = stepper.data_manager().dim();
        let mut method = Self {
            object_name,
            stepper,
            comm,
            dim,
            bodies: vec![RigidBodyKinematics::default(); num_rigid_parts],
            velocity_fns: (0..num_rigid_parts).map(|_| ConstrainedVelocityFns::default()).collect(),
            structures: StructureIndexMap::default(),
            constraint,
            flags: StalenessFlags::default(),
            prefluid_callbacks: Vec::new(),
            output_eul_lambda: config.output_eul_lambda,
            eul_lambda_idx: None,
            lambda_dump_interval: config.lambda_dump_interval,
            lambda_dirname: config.lambda_dirname.clone(),
            append_lambda: restart.is_some(),
            lambda_writer: None,
            finest_ln: 0,
        };
        if let Some(db) = restart {
            method.get_from_restart(db)?;
        }
        tracing::info!(
            object = %method.object_name,
            structures = num_rigid_parts,
            restart = restart.is_some(),
            "created constraint IB method"
        );
        Ok(method)
    }

    /// Replaces the lambda dump sink, e.g. with a binary writer. Without one
    /// the first dump opens `<lambda_dirname>/lambda` on rank 0.
    pub fn with_lambda_writer(mut self, writer: impl DiagnosticsWriter + 'static) -> Self {
        self.lambda_writer = Some(Box::new(writer));
        self
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    pub fn stepper(&self) -> &S {
        &self.stepper
    }

    pub fn communicator(&self) -> &C {
        &self.comm
    }

    pub fn num_rigid_parts(&self) -> usize {
        self.bodies.len()
    }

    pub fn kinematics(&self, part: usize) -> &RigidBodyKinematics {
        &self.bodies[part]
    }

    pub fn structures(&self) -> &StructureIndexMap {
        &self.structures
    }

    pub fn flags(&self) -> StalenessFlags {
        self.flags
    }

    pub fn eul_lambda_index(&self) -> Option<PatchDataId> {
        self.eul_lambda_idx
    }

    /// Level that holds the structures.
    pub fn structures_level_number(&self) -> usize {
        self.finest_ln
    }

    pub fn get_structure_handle(&self, lag_idx: usize) -> Option<usize> {
        self.structures.owner(lag_idx)
    }

    pub fn number_of_nodes(&self, part: usize) -> usize {
        self.structures.number_of_nodes(part)
    }

    pub fn set_solve_rigid_body_velocity(&mut self, part: usize, solve: bool) {
        self.bodies[part].solve_velocity = solve;
    }

    pub fn solve_rigid_body_velocity(&self, part: usize) -> bool {
        self.bodies[part].solve_velocity
    }

    pub fn register_constrained_velocity_function(
        &mut self,
        part: usize,
        fns: ConstrainedVelocityFns,
    ) {
        self.velocity_fns[part] = fns;
    }

    pub fn register_pre_process_solve_fluid_equations_callback(
        &mut self,
        callback: impl FnMut(f64, f64, usize) + 'static,
    ) {
        self.prefluid_callbacks.push(Box::new(callback));
    }

    /// Registers the cell-centred `eul_lambda` variable with the hierarchy.
    pub fn register_eulerian_variables(
        &mut self,
        hierarchy: &mut dyn PatchHierarchy,
    ) -> PatchDataId {
        let idx = hierarchy.register_variable(EUL_LAMBDA, Centering::Cell, self.dim.depth());
        self.eul_lambda_idx = Some(idx);
        idx
    }

    /// Sets the rigid velocity that the solver found for `part` at the new
    /// time level.
    pub fn update_new_rigid_body_velocity(&mut self, part: usize, u: &RigidDofVector) {
        self.bodies[part].set_new_velocity(u, self.dim.rigid_dofs());
    }

    pub fn current_rigid_body_velocity(&self, part: usize) -> RigidDofVector {
        self.bodies[part].current_velocity(self.dim.rigid_dofs())
    }

    pub fn new_rigid_body_velocity(&self, part: usize) -> RigidDofVector {
        self.bodies[part].new_velocity(self.dim.rigid_dofs())
    }

    pub fn integrator_step(&self) -> usize {
        self.stepper.integrator_step()
    }

    fn structure_levels(&self) -> Vec<usize> {
        let manager = self.stepper.data_manager();
        (0..=self.finest_ln)
            .filter(|&ln| manager.level_contains_lagrangian_data(ln))
            .collect()
    }

    /// Allocates the per-level data. At the initial time, or when resuming,
    /// the structure ranges are rebuilt from the data manager.
    pub fn initialize_level_data(
        &mut self,
        level: usize,
        initial_time: bool,
    ) -> Result<(), CibError> {
        self.stepper.initialize_level_data(level, initial_time)?;

        let manager = self.stepper.data_manager();
        if !manager.level_contains_lagrangian_data(level) {
            return Ok(());
        }
        if initial_time || !self.constraint.is_allocated(level) {
            self.structures = StructureIndexMap::from_manager(manager, level);
            debug_assert_eq!(self.structures.len(), self.bodies.len());
            self.constraint.allocate(manager, level);
            tracing::debug!(
                level,
                structures = self.structures.len(),
                "allocated lambda and regulator"
            );
        }
        Ok(())
    }

    /// Initializes every level of `hierarchy`, zeroes `eul_lambda` at the
    /// initial time and sets the initial lambda and the regularization
    /// weight on the structure level.
    pub fn initialize_patch_hierarchy(
        &mut self,
        hierarchy: &mut dyn PatchHierarchy,
        initial_time: bool,
    ) -> Result<(), CibError> {
        self.finest_ln = hierarchy.finest_level_number();
        for ln in 0..=self.finest_ln {
            self.initialize_level_data(ln, initial_time)?;
        }

        let eul_lambda_idx = match self.eul_lambda_idx {
            Some(idx) => idx,
            None => self.register_eulerian_variables(hierarchy),
        };
        if initial_time {
            fill_all(hierarchy, eul_lambda_idx, 0.0)?;
        }

        let ln = self.finest_ln;
        let manager = self.stepper.data_manager();
        if manager.level_contains_lagrangian_data(ln) {
            if initial_time {
                self.constraint.set_initial_lambda(manager, &self.structures, ln)?;
            }
            self.constraint
                .set_regularization_weight(manager, &self.structures, ln, hierarchy.cell_volume())?;
        }
        tracing::info!(
            object = %self.object_name,
            finest_level = self.finest_ln,
            initial_time,
            "initialized patch hierarchy"
        );
        Ok(())
    }

    /// Writes the current rigid velocities under `U_<part>` and `W_<part>`.
    pub fn put_to_database(&self, root: &mut RestartDatabase) {
        let db = root.put_database(self.object_name.as_str());
        for (part, body) in self.bodies.iter().enumerate() {
            db.put_double_array(format!("U_{part}"), body.trans_vel_current.as_slice());
            db.put_double_array(format!("W_{part}"), body.rot_vel_current.as_slice());
        }
    }

    fn get_from_restart(&mut self, root: &RestartDatabase) -> Result<(), CibError> {
        let db = root.database(&self.object_name)?;
        for (part, body) in self.bodies.iter_mut().enumerate() {
            let u = db.get_double_array(&format!("U_{part}"), 3)?;
            let w = db.get_double_array(&format!("W_{part}"), 3)?;
            body.trans_vel_current = Vector3::from_column_slice(u);
            body.rot_vel_current = Vector3::from_column_slice(w);
        }
        Ok(())
    }

    /// Copies `scale * l` into the half-step force and marks it fresh for
    /// the next spreading.
    pub fn set_constraint_force(
        &mut self,
        l: &LData,
        data_time: f64,
        scale: f64,
    ) -> Result<(), CibError> {
        self.stepper.time_window().expect(TimeLevel::Half, data_time)?;
        let ln = self.finest_ln;
        let (_, fields) = self.stepper.fields_mut();
        fields.level_mut(ln)?.f_half.copy_scaled_from(l, scale);
        fields.f_half_needs_ghost_fill = true;
        self.flags.mark_force_fresh();
        Ok(())
    }

    fn check_current_or_new(&self, data_time: f64) -> Result<(), CibError> {
        let window = self.stepper.time_window();
        match window.level_of(data_time) {
            Some(TimeLevel::Current | TimeLevel::New) => Ok(()),
            _ => Err(CibError::NotCurrentOrNew {
                given: data_time,
                current: window.current(),
                new: window.new_time(),
            }),
        }
    }

    /// The Lagrange multiplier at the current or new time.
    pub fn get_constraint_force(&self, data_time: f64) -> Result<&LData, CibError> {
        self.check_current_or_new(data_time)?;
        self.constraint.lambda(self.finest_ln)
    }

    /// Mutable access for the solver that computes lambda.
    pub fn get_constraint_force_mut(&mut self, data_time: f64) -> Result<&mut LData, CibError> {
        self.check_current_or_new(data_time)?;
        self.constraint.lambda_mut(self.finest_ln)
    }

    /// Removes the mean of `scale * l` from the Eulerian force `f_idx`.
    pub fn subtract_mean_constraint_force(
        &self,
        hierarchy: &mut dyn PatchHierarchy,
        l: &LData,
        f_idx: PatchDataId,
        scale: f64,
    ) -> Result<(), CibError> {
        constraint::subtract_mean_constraint_force(&self.comm, hierarchy, f_idx, l, scale)
    }

    /// Marks the half-step marker velocity for the next interpolation.
    pub fn set_interpolated_velocity_vector(&mut self, data_time: f64) -> Result<(), CibError> {
        self.stepper.time_window().expect(TimeLevel::Half, data_time)?;
        self.flags.mark_velocity_fresh();
        Ok(())
    }

    /// `v = scale * U_half`
    pub fn get_interpolated_velocity(
        &self,
        v: &mut LData,
        data_time: f64,
        scale: f64,
    ) -> Result<(), CibError> {
        self.stepper.time_window().expect(TimeLevel::Half, data_time)?;
        let u = &self.stepper.fields().level(self.finest_ln)?.u_half;
        v.copy_scaled_from(u, scale);
        Ok(())
    }

    /// `d = scale * (W ⊙ l)`
    pub fn compute_mobility_regularization(
        &self,
        d: &mut LData,
        l: &LData,
        scale: f64,
    ) -> Result<(), CibError> {
        self.constraint.compute_mobility_regularization(self.finest_ln, d, l, scale)
    }

    /// Sets `v` on the markers of `part` to the rigid motion `u` about the
    /// half-step center of mass, or through the registered nodal mapping.
    pub fn set_rigid_body_velocity(
        &mut self,
        part: usize,
        u: &RigidDofVector,
        v: &mut LData,
    ) -> Result<(), CibError> {
        let ln = self.finest_ln;
        let new_time = self.stepper.time_window().new_time();
        let com = self.bodies[part].center_of_mass_half;
        let x = &self.stepper.fields().level(ln)?.x_half;
        match self.velocity_fns[part].nodal.as_mut() {
            Some(nodal) => nodal(v, u, x, &com, new_time),
            None => {
                let manager = self.stepper.data_manager();
                constraint::rigid_body_velocity(manager, &self.structures, ln, part, u, x, &com, v)
            }
        }
        Ok(())
    }

    /// Net force and torque of `l` on `part` about its half-step center of
    /// mass.
    pub fn compute_net_rigid_generalized_force(
        &self,
        part: usize,
        l: &LData,
    ) -> Result<RigidDofVector, CibError> {
        let ln = self.finest_ln;
        let x = &self.stepper.fields().level(ln)?.x_half;
        Ok(constraint::net_rigid_generalized_force(
            &self.comm,
            self.stepper.data_manager(),
            &self.structures,
            ln,
            part,
            l,
            x,
            &self.bodies[part].center_of_mass_half,
        ))
    }

    pub fn copy_vec_to_array(&self, b: &LData, array: &mut [f64], parts: &[usize], depth: usize) {
        constraint::copy_vec_to_array(
            &self.comm,
            self.stepper.data_manager(),
            &self.structures,
            self.finest_ln,
            b,
            parts,
            depth,
            array,
        );
    }

    pub fn copy_array_to_vec(&self, b: &mut LData, array: &[f64], parts: &[usize], depth: usize) {
        constraint::copy_array_to_vec(
            self.stepper.data_manager(),
            &self.structures,
            self.finest_ln,
            array,
            parts,
            depth,
            b,
        );
    }

    /// Dense, regularized mobility matrix of the markers of `parts` at their
    /// half-step positions: `scale.0 * M + scale.1 * diag(W)`.
    #[allow(clippy::too_many_arguments)]
    pub fn generate_mobility_matrix(
        &self,
        kind: MobilityMatrixType,
        parts: &[usize],
        grid_dx: &Vector3<f64>,
        domain_extents: &Vector3<f64>,
        rho: f64,
        mu: f64,
        scale: (f64, f64),
        periodic_correction: f64,
    ) -> Result<Mat<f64>, CibError> {
        let ln = self.finest_ln;
        let depth = self.dim.depth();
        let num_nodes: usize = parts.iter().map(|&p| self.number_of_nodes(p)).sum();
        let mut buffer = vec![0.0; num_nodes * depth];

        self.copy_vec_to_array(&self.stepper.fields().level(ln)?.x_half, &mut buffer, parts, depth);
        let params = MobilityParams {
            dim: self.dim,
            kernel: self.stepper.data_manager().default_kernel(),
            mu,
            rho,
            dt: self.stepper.time_window().dt(),
            dx: grid_dx[0],
            domain_extent: domain_extents[0],
            periodic_correction,
        };
        let mut m = mobility_matrix(kind, &params, &buffer);

        self.copy_vec_to_array(self.constraint.regulator(ln)?, &mut buffer, parts, depth);
        regularize(&mut m, scale, &buffer);
        tracing::debug!(?kind, nodes = num_nodes, "generated mobility matrix");
        Ok(m)
    }

    /// Flushes the lambda dump.
    pub fn finish_diagnostics(&mut self) -> Result<(), CibError> {
        match self.lambda_writer.as_mut() {
            Some(writer) => writer.finish(),
            None => Ok(()),
        }
    }

    fn update_com_and_moi(&mut self, at: TimeLevel) -> Result<(), CibError> {
        let levels = self.structure_levels();
        let positions = level_positions(self.stepper.fields(), &levels, at)?;
        let manager = self.stepper.data_manager();
        let (com, moi) = com_and_moi(&self.comm, manager, &self.structures, &positions);
        for (body, (c, m)) in self.bodies.iter_mut().zip(com.into_iter().zip(moi)) {
            match at {
                TimeLevel::Half => {
                    body.center_of_mass_half = c;
                    body.moment_of_inertia_half = m;
                }
                _ => {
                    body.center_of_mass_current = c;
                    body.moment_of_inertia_current = m;
                }
            }
        }
        Ok(())
    }

    // X_to = com + R (X_current - com) + dt * U_trans on every structure level
    fn advance_positions(
        &mut self,
        to: TimeLevel,
        rotation: &[Matrix3<f64>],
        trans_vel: &[Vector3<f64>],
        dt: f64,
    ) -> Result<(), CibError> {
        let levels = self.structure_levels();
        let com: Vec<_> = self.bodies.iter().map(|b| b.center_of_mass_current).collect();
        let (manager, fields) = self.stepper.fields_mut();
        for ln in levels {
            let level = fields.level_mut(ln)?;
            let x_out = match to {
                TimeLevel::Half => &mut level.x_half,
                _ => &mut level.x_new,
            };
            rigid_advance(
                manager,
                &self.structures,
                ln,
                &level.x_current,
                x_out,
                &com,
                rotation,
                trans_vel,
                dt,
            );
        }
        Ok(())
    }

    fn dump_lambda(&mut self, time: f64) -> Result<(), CibError> {
        let ln = self.finest_ln;
        let lambda = self.constraint.lambda(ln)?;
        let manager = self.stepper.data_manager();
        let Some(gathered) = manager.gather_to_root(&self.comm, lambda, ln) else {
            return Ok(());
        };
        let record =
            LambdaRecord::from_gathered(time, self.dim.depth(), &self.structures, &gathered);
        let writer: Box<dyn DiagnosticsWriter> = match self.lambda_writer.take() {
            Some(writer) => writer,
            None => Box::new(open_lambda_writer(&self.lambda_dirname, self.append_lambda)?),
        };
        tracing::debug!(time, "dumping lambda");
        self.lambda_writer.insert(writer).write_lambda(&record)
    }

    fn spread_eulerian_lambda(
        &mut self,
        hierarchy: &mut dyn PatchHierarchy,
    ) -> Result<(), CibError> {
        let idx = match self.eul_lambda_idx {
            Some(idx) => idx,
            None => self.register_eulerian_variables(hierarchy),
        };
        fill_all(hierarchy, idx, 0.0)?;
        let ln = self.finest_ln;
        let lambda = self.constraint.lambda(ln)?;
        let x = &self.stepper.fields().level(ln)?.x_current;
        self.stepper.data_manager().spread(hierarchy, idx, lambda, x, ln)
    }
}

fn fill_all(
    hierarchy: &mut dyn PatchHierarchy,
    idx: PatchDataId,
    value: f64,
) -> Result<(), CibError> {
    for ln in 0..=hierarchy.finest_level_number() {
        for patch in 0..hierarchy.num_patches(ln) {
            hierarchy
                .patch_data_mut(ln, patch, idx)
                .ok_or(CibError::MissingPatchData(idx.index()))?
                .fill(value);
        }
    }
    Ok(())
}

impl<S: FluidStructureStepper, C: Communicator> IbStrategy for CibMethod<S, C> {
    fn preprocess_integrate_data(
        &mut self,
        current_time: f64,
        new_time: f64,
        num_cycles: usize,
    ) -> Result<(), CibError> {
        self.stepper.preprocess_integrate_data(current_time, new_time, num_cycles)?;
        let window = self.stepper.time_window();
        for (part, body) in self.bodies.iter_mut().enumerate() {
            if !body.solve_velocity {
                body.prescribe(part, &mut self.velocity_fns[part], &window)?;
            }
        }
        Ok(())
    }

    fn postprocess_integrate_data(
        &mut self,
        hierarchy: &mut dyn PatchHierarchy,
        current_time: f64,
        new_time: f64,
        num_cycles: usize,
    ) -> Result<(), CibError> {
        let step = self.stepper.integrator_step();
        self.stepper
            .postprocess_integrate_data(hierarchy, current_time, new_time, num_cycles)?;

        if self.lambda_dump_interval > 0 && (step + 1) % self.lambda_dump_interval == 0 {
            self.dump_lambda(new_time)?;
        }
        if self.output_eul_lambda {
            self.spread_eulerian_lambda(hierarchy)?;
        }

        for body in &mut self.bodies {
            body.advance();
        }
        Ok(())
    }

    fn preprocess_solve_fluid_equations(
        &mut self,
        current_time: f64,
        new_time: f64,
        cycle: usize,
    ) -> Result<(), CibError> {
        self.stepper
            .preprocess_solve_fluid_equations(current_time, new_time, cycle)?;
        for callback in &mut self.prefluid_callbacks {
            callback(current_time, new_time, cycle);
        }
        Ok(())
    }

    fn interpolate_velocity(
        &mut self,
        hierarchy: &dyn PatchHierarchy,
        u_idx: PatchDataId,
        data_time: f64,
    ) -> Result<(), CibError> {
        if !self.flags.take_velocity() {
            tracing::trace!(data_time, "velocity not requested, skipping interpolation");
            return Ok(());
        }
        self.stepper.time_window().expect(TimeLevel::Half, data_time)?;
        self.stepper.interpolate_velocity(hierarchy, u_idx, data_time)
    }

    fn spread_force(
        &mut self,
        hierarchy: &mut dyn PatchHierarchy,
        f_idx: PatchDataId,
        data_time: f64,
    ) -> Result<(), CibError> {
        if !self.flags.take_force() {
            tracing::trace!(data_time, "constraint force not set, skipping spreading");
            return Ok(());
        }
        self.stepper.time_window().expect(TimeLevel::Half, data_time)?;
        self.stepper.spread_force(hierarchy, f_idx, data_time)
    }

    fn euler_step(&mut self, current_time: f64, new_time: f64) -> Result<(), CibError> {
        let dt = new_time - current_time;
        self.update_com_and_moi(TimeLevel::Current)?;

        let rotation: Vec<_> = self
            .bodies
            .iter()
            .map(|b| rotation_matrix(&b.rot_vel_current, 0.5 * dt))
            .collect();
        let trans_vel: Vec<_> = self.bodies.iter().map(|b| b.trans_vel_current).collect();
        self.advance_positions(TimeLevel::Half, &rotation, &trans_vel, 0.5 * dt)?;

        self.update_com_and_moi(TimeLevel::Half)?;
        let (_, fields) = self.stepper.fields_mut();
        fields.x_half_needs_ghost_fill = true;

        for (part, body) in self.bodies.iter().enumerate() {
            tracing::debug!(
                part,
                com_current = ?body.center_of_mass_current.as_slice(),
                com_half = ?body.center_of_mass_half.as_slice(),
                "predicted half-step positions"
            );
        }
        Ok(())
    }

    fn midpoint_step(&mut self, current_time: f64, new_time: f64) -> Result<(), CibError> {
        let dt = new_time - current_time;
        let rotation: Vec<_> = self
            .bodies
            .iter()
            .map(|b| rotation_matrix(&b.rot_vel_half, dt))
            .collect();
        let trans_vel: Vec<_> = self.bodies.iter().map(|b| b.trans_vel_half).collect();
        self.advance_positions(TimeLevel::New, &rotation, &trans_vel, dt)
    }

    fn trapezoidal_step(&mut self, _current_time: f64, _new_time: f64) -> Result<(), CibError> {
        Err(CibError::UnsupportedTimeStepping)
    }
}
