use std::fmt;

use nalgebra::{Matrix3, Vector3};

use crate::{error::CibError, ldata::LData, stepper::TimeWindow, RigidDofVector};

/// Prescribed center-of-mass motion: `time -> (U_trans, U_rot)`.
pub type ComVelocityFn = Box<dyn FnMut(f64) -> (Vector3<f64>, Vector3<f64>)>;

/// Custom mapping from a generalized velocity to per-marker velocities:
/// `(V, U, X, X_com, time)`.
pub type NodalVelocityFn = Box<dyn FnMut(&mut LData, &RigidDofVector, &LData, &Vector3<f64>, f64)>;

#[derive(Default)]
pub struct ConstrainedVelocityFns {
    pub nodal: Option<NodalVelocityFn>,
    pub com: Option<ComVelocityFn>,
}

impl ConstrainedVelocityFns {
    pub fn new(nodal: Option<NodalVelocityFn>, com: Option<ComVelocityFn>) -> Self {
        Self { nodal, com }
    }

    pub fn with_com(com: impl FnMut(f64) -> (Vector3<f64>, Vector3<f64>) + 'static) -> Self {
        Self {
            nodal: None,
            com: Some(Box::new(com)),
        }
    }
}

impl fmt::Debug for ConstrainedVelocityFns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstrainedVelocityFns")
            .field("nodal", &self.nodal.as_ref().map(|_| "<dyn FnMut>"))
            .field("com", &self.com.as_ref().map(|_| "<dyn FnMut>"))
            .finish()
    }
}

fn generalized(trans: &Vector3<f64>, rot: &Vector3<f64>, rigid_dofs: usize) -> RigidDofVector {
    if rigid_dofs == 3 {
        RigidDofVector::new(trans.x, trans.y, rot.z, 0.0, 0.0, 0.0)
    } else {
        RigidDofVector::new(trans.x, trans.y, trans.z, rot.x, rot.y, rot.z)
    }
}

/// Kinematic state of one rigid structure.
#[derive(Clone, Debug, PartialEq)]
pub struct RigidBodyKinematics {
    pub center_of_mass_current: Vector3<f64>,
    pub center_of_mass_half: Vector3<f64>,
    pub moment_of_inertia_current: Matrix3<f64>,
    pub moment_of_inertia_half: Matrix3<f64>,
    pub trans_vel_current: Vector3<f64>,
    pub trans_vel_half: Vector3<f64>,
    pub trans_vel_new: Vector3<f64>,
    pub rot_vel_current: Vector3<f64>,
    pub rot_vel_half: Vector3<f64>,
    pub rot_vel_new: Vector3<f64>,
    /// Whether the velocity is solved for rather than prescribed.
    pub solve_velocity: bool,
}

impl Default for RigidBodyKinematics {
    fn default() -> Self {
        Self {
            center_of_mass_current: Vector3::zeros(),
            center_of_mass_half: Vector3::zeros(),
            moment_of_inertia_current: Matrix3::zeros(),
            moment_of_inertia_half: Matrix3::zeros(),
            trans_vel_current: Vector3::zeros(),
            trans_vel_half: Vector3::zeros(),
            trans_vel_new: Vector3::zeros(),
            rot_vel_current: Vector3::zeros(),
            rot_vel_half: Vector3::zeros(),
            rot_vel_new: Vector3::zeros(),
            solve_velocity: true,
        }
    }
}

impl RigidBodyKinematics {
    /// Fills the velocity at all three time levels from the prescribed motion.
    pub fn prescribe(
        &mut self,
        part: usize,
        fns: &mut ConstrainedVelocityFns,
        window: &TimeWindow,
    ) -> Result<(), CibError> {
        let com = fns
            .com
            .as_mut()
            .ok_or(CibError::MissingVelocityFunction(part))?;
        (self.trans_vel_current, self.rot_vel_current) = com(window.current());
        (self.trans_vel_half, self.rot_vel_half) = com(window.half());
        (self.trans_vel_new, self.rot_vel_new) = com(window.new_time());
        Ok(())
    }

    /// The new velocity becomes the current one for the next step.
    pub fn advance(&mut self) {
        self.trans_vel_current = self.trans_vel_new;
        self.rot_vel_current = self.rot_vel_new;
    }

    /// Sets the solved velocity at the new time level from a generalized
    /// velocity vector. The half level velocity becomes the average of the
    /// current and new ones.
    pub fn set_new_velocity(&mut self, u: &RigidDofVector, rigid_dofs: usize) {
        if rigid_dofs == 3 {
            self.trans_vel_new = Vector3::new(u[0], u[1], 0.0);
            self.rot_vel_new = Vector3::new(0.0, 0.0, u[2]);
        } else {
            self.trans_vel_new = u.fixed_rows::<3>(0).into_owned();
            self.rot_vel_new = u.fixed_rows::<3>(3).into_owned();
        }
        self.trans_vel_half = 0.5 * (self.trans_vel_current + self.trans_vel_new);
        self.rot_vel_half = 0.5 * (self.rot_vel_current + self.rot_vel_new);
    }

    /// Generalized velocity at the current time level.
    pub fn current_velocity(&self, rigid_dofs: usize) -> RigidDofVector {
        generalized(&self.trans_vel_current, &self.rot_vel_current, rigid_dofs)
    }

    /// Generalized velocity at the new time level.
    pub fn new_velocity(&self, rigid_dofs: usize) -> RigidDofVector {
        generalized(&self.trans_vel_new, &self.rot_vel_new, rigid_dofs)
    }
}
