//! Constraint immersed-boundary stepping for rigid bodies in viscous flow.
//!
//! Rigid structures are carried by Lagrangian markers. Every step the markers
//! are moved with the rigid-body kinematics of their structure, the fluid
//! velocity is interpolated onto them, an external solver computes the
//! Lagrange multiplier (`lambda`) that enforces the rigid-velocity constraint,
//! and that multiplier is spread back to the Eulerian grid as a body force.
//!
//! [`CibMethod`] is the entry point. It wraps a generic
//! [`FluidStructureStepper`] (the crate ships [`IbMethod`]) and talks to the
//! Eulerian grid through [`PatchHierarchy`] and to the marker distribution
//! through [`LagrangianDataManager`].

pub mod comm;
pub mod config;
pub mod constraint;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod grid;
pub mod input;
pub mod integrator;
pub mod kinematics;
pub mod ldata;
pub mod method;
pub mod mobility;
pub mod restart;
pub mod stepper;
pub mod structure;
pub mod transfer;

use nalgebra::Vector6;

pub use comm::{Communicator, SerialComm};
pub use config::CibConfig;
pub use driver::{ConstraintSolver, Driver, Logger, Observer};
pub use error::CibError;
pub use grid::{CartesianHierarchy, Grid, PatchDataId, PatchHierarchy};
pub use ldata::{Kernel, LData, LagrangianDataManager, LocalDataManager, MarkerHandle};
pub use method::CibMethod;
pub use mobility::MobilityMatrixType;
pub use restart::RestartDatabase;
pub use stepper::{FluidStructureStepper, IbMethod, IbStrategy, TimeLevel, TimeWindow};

/// Generalized rigid-body velocity or force.
///
/// In 3-D the layout is `[tx, ty, tz, rx, ry, rz]`. In 2-D only the first
/// three entries are used: `[tx, ty, rz]`.
pub type RigidDofVector = Vector6<f64>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpatialDim {
    Two,
    Three,
}

impl SpatialDim {
    /// Number of components of a vector quantity per marker.
    #[inline]
    pub fn depth(self) -> usize {
        match self {
            SpatialDim::Two => 2,
            SpatialDim::Three => 3,
        }
    }

    /// Number of rigid degrees of freedom (translations and rotations).
    #[inline]
    pub fn rigid_dofs(self) -> usize {
        match self {
            SpatialDim::Two => 3,
            SpatialDim::Three => 6,
        }
    }
}

/// Relative floating point comparison used for time-level checks.
pub fn equal_eps(a: f64, b: f64) -> bool {
    let tol = f64::EPSILON.sqrt();
    let absmax = a.abs().max(b.abs());
    let denominator = if absmax > f64::EPSILON {
        absmax
    } else {
        f64::EPSILON
    };
    (a - b).abs() / denominator < tol
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_eps_is_relative() {
        assert!(equal_eps(1.0e6, 1.0e6 + 1.0e-4));
        assert!(!equal_eps(1.0, 1.0 + 1.0e-4));
        assert!(equal_eps(0.0, 0.0));
        assert!(!equal_eps(0.0, 1.0e-3));
    }

    #[test]
    fn dimension_counts() {
        assert_eq!(SpatialDim::Two.depth(), 2);
        assert_eq!(SpatialDim::Two.rigid_dofs(), 3);
        assert_eq!(SpatialDim::Three.depth(), 3);
        assert_eq!(SpatialDim::Three.rigid_dofs(), 6);
    }
}
