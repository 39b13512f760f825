use std::path::PathBuf;

use thiserror::Error;

use crate::stepper::TimeLevel;

#[derive(Error, Debug)]
pub enum CibError {
    #[error("output error")]
    Io(#[from] std::io::Error),

    #[error("could not open file `{}`", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "total number of Lagrangian points in the {kind} file `{}` ({found}) \
         does not match structure {structure} ({expected})",
        path.display()
    )]
    MarkerCountMismatch {
        kind: &'static str,
        path: PathBuf,
        structure: usize,
        expected: usize,
        found: usize,
    },

    #[error("error in the {kind} file `{}` at line number {line}", path.display())]
    MalformedFile {
        kind: &'static str,
        path: PathBuf,
        line: usize,
    },

    #[error("restart database `{0}` not found in restart file")]
    MissingRestartDatabase(String),

    #[error("restart entry `{key}` not found or has the wrong length (expected {expected})")]
    MissingRestartEntry { key: String, expected: usize },

    #[error("restart encoding error")]
    Restart(#[from] bincode::Error),

    #[error("configuration error")]
    Config(#[from] ron::error::SpannedError),

    #[error("expected {expected} `{key}` entries (one per structure), found {found}")]
    FilenameCount {
        key: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("data time {given} does not match the {level:?} time {expected}")]
    TimeMismatch {
        level: TimeLevel,
        given: f64,
        expected: f64,
    },

    #[error("data time {given} is neither the current time {current} nor the new time {new}")]
    NotCurrentOrNew {
        given: f64,
        current: f64,
        new: f64,
    },

    #[error(
        "trapezoidal time-stepping rule is not supported for rigid position update; \
         only the mid-point rule is supported"
    )]
    UnsupportedTimeStepping,

    #[error("invalid type of a mobility matrix: `{0}`")]
    InvalidMobilityMatrixType(String),

    #[error("structure {0} has prescribed motion but no velocity function was registered")]
    MissingVelocityFunction(usize),

    #[error("Lagrangian data `{name}` is not allocated on level {level}")]
    MissingLData { name: &'static str, level: usize },

    #[error("patch data {0} is not registered with the hierarchy")]
    MissingPatchData(usize),
}
