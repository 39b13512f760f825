use cibm::{
    self,
    diagnostics::LambdaBinaryWriter,
    grid::Centering,
    kinematics::ConstrainedVelocityFns,
    CartesianHierarchy, CibConfig, CibError, CibMethod, ConstraintSolver, Driver,
    FluidStructureStepper, Grid, IbMethod, IbStrategy, Kernel, LData, LagrangianDataManager,
    LocalDataManager, PatchDataId, PatchHierarchy, SerialComm, SpatialDim,
};
use nalgebra::Vector3;
use std::{f64::consts::PI, fs, io};

type Stepper = IbMethod<LocalDataManager>;

struct Penalty(f64);

impl ConstraintSolver<Stepper> for Penalty {
    fn name(&self) -> &str {
        "penalty"
    }

    fn solve(
        &mut self,
        method: &mut CibMethod<Stepper>,
        hierarchy: &mut dyn PatchHierarchy,
        u_idx: PatchDataId,
        _f_idx: PatchDataId,
        current_time: f64,
        new_time: f64,
    ) -> Result<(), CibError> {
        let half_time = 0.5 * (current_time + new_time);
        method.set_interpolated_velocity_vector(half_time)?;
        method.interpolate_velocity(hierarchy, u_idx, half_time)?;

        let ln = method.structures_level_number();
        let mut v = method.stepper().data_manager().create_ldata("V", ln, 2);
        let mut w = v.zeros_like("W");
        method.get_interpolated_velocity(&mut v, half_time, 1.0)?;
        let u = method.new_rigid_body_velocity(0);
        method.set_rigid_body_velocity(0, &u, &mut w)?;

        let rows: Vec<f64> = w
            .to_rows()
            .into_iter()
            .zip(v.to_rows())
            .map(|(w, v)| self.0 * (w - v))
            .collect();
        let l = LData::from_rows("L", 2, &rows);
        method.get_constraint_force_mut(new_time)?.copy_from(&l);
        method.set_constraint_force(&l, half_time, 1.0)
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let name = "rotating_cross";

    let mut manager = LocalDataManager::new(SpatialDim::Two, Kernel::Ib4);
    let arm: Vec<_> = (1..=8)
        .flat_map(|k| {
            let r = 0.02 * k as f64;
            [(r, 0.0), (-r, 0.0), (0.0, r), (0.0, -r)]
        })
        .map(|(dx, dy)| Vector3::new(0.5 + dx, 0.5 + dy, 0.0))
        .collect();
    manager.add_structure(0, 0, &arm);

    let mut hierarchy = CartesianHierarchy::uniform(SpatialDim::Two, 0.0, 1.0, 64);
    hierarchy.register_variable("u", Centering::Side, 2);

    let config = CibConfig {
        output_eul_lambda: true,
        lambda_dump_interval: 10,
        lambda_dirname: "bin".into(),
        ..Default::default()
    };

    fs::create_dir_all("bin").expect("couldn't create output directory");
    let output = io::BufWriter::new(
        fs::File::create(format!("bin/{}.lambda", name)).expect("couldn't create output file"),
    );

    let mut method = CibMethod::new(name, IbMethod::new(manager), SerialComm, 1, &config, None)
        .expect("invalid configuration")
        .with_lambda_writer(LambdaBinaryWriter::new(output));
    method.set_solve_rigid_body_velocity(0, false);
    method.register_constrained_velocity_function(
        0,
        ConstrainedVelocityFns::with_com(|t| {
            (Vector3::zeros(), Vector3::new(0.0, 0.0, PI * (1.0 - t)))
        }),
    );

    Driver::new(method, hierarchy, Penalty(50.0), Grid::from_steps(0.0, 1.0, 200))
        .with_time_sampling(20)
        .with_observer(cibm::Logger)
        .run()
        .expect("failed to run simulation");
}
