//! Freshness tracking between the constraint solver and the grid transfers.
//!
//! The solver marks the interpolated velocity or the constraint force as
//! fresh; the next interpolation or spreading consumes the mark. A transfer
//! that finds its mark cleared is skipped, so a value is never transferred
//! twice in one step.

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StalenessFlags {
    velocity_fresh: bool,
    force_fresh: bool,
}

impl StalenessFlags {
    pub fn mark_velocity_fresh(&mut self) {
        self.velocity_fresh = true;
    }

    pub fn mark_force_fresh(&mut self) {
        self.force_fresh = true;
    }

    pub fn velocity_fresh(&self) -> bool {
        self.velocity_fresh
    }

    pub fn force_fresh(&self) -> bool {
        self.force_fresh
    }

    /// Returns whether the velocity was fresh and clears the mark.
    #[inline]
    pub fn take_velocity(&mut self) -> bool {
        std::mem::take(&mut self.velocity_fresh)
    }

    /// Returns whether the force was fresh and clears the mark.
    #[inline]
    pub fn take_force(&mut self) -> bool {
        std::mem::take(&mut self.force_fresh)
    }
}
