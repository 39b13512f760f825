//! Input options of the constraint method, read from RON.
//!
//! ```ron
//! (
//!     output_eul_lambda: true,
//!     lambda_dump_interval: 10,
//!     lambda_dirname: "./lambda",
//!     lambda_filenames: Some(["sphere.lambda", ""]),
//! )
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CibError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CibConfig {
    /// Spread lambda to the Eulerian `eul_lambda` field after every step.
    pub output_eul_lambda: bool,
    /// Steps between lambda dumps, zero disables them.
    pub lambda_dump_interval: usize,
    pub lambda_dirname: PathBuf,
    /// One initial lambda file per structure, empty for none.
    pub lambda_filenames: Option<Vec<String>>,
    /// One regularization weight file per structure, empty for none.
    pub weight_filenames: Option<Vec<String>>,
}

impl Default for CibConfig {
    fn default() -> Self {
        Self {
            output_eul_lambda: false,
            lambda_dump_interval: 0,
            lambda_dirname: PathBuf::from("./lambda"),
            lambda_filenames: None,
            weight_filenames: None,
        }
    }
}

fn paths(
    key: &'static str,
    names: &Option<Vec<String>>,
    num_parts: usize,
) -> Result<Vec<Option<PathBuf>>, CibError> {
    match names {
        None => Ok(vec![None; num_parts]),
        Some(names) if names.len() != num_parts => Err(CibError::FilenameCount {
            key,
            expected: num_parts,
            found: names.len(),
        }),
        Some(names) => Ok(names
            .iter()
            .map(|n| (!n.trim().is_empty()).then(|| PathBuf::from(n.trim())))
            .collect()),
    }
}

impl CibConfig {
    pub fn from_ron_str(text: &str) -> Result<Self, CibError> {
        Ok(ron::from_str(text)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CibError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CibError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron_str(&text)
    }

    pub fn lambda_paths(&self, num_parts: usize) -> Result<Vec<Option<PathBuf>>, CibError> {
        paths("lambda_filenames", &self.lambda_filenames, num_parts)
    }

    pub fn weight_paths(&self, num_parts: usize) -> Result<Vec<Option<PathBuf>>, CibError> {
        paths("weight_filenames", &self.weight_filenames, num_parts)
    }

    /// Checks the per-structure lists against the number of structures.
    pub fn validate(&self, num_parts: usize) -> Result<(), CibError> {
        self.lambda_paths(num_parts)?;
        self.weight_paths(num_parts)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_keys() {
        let c = CibConfig::from_ron_str("(lambda_dump_interval: 5)").unwrap();
        assert_eq!(c.lambda_dump_interval, 5);
        assert!(!c.output_eul_lambda);
        assert_eq!(c.lambda_dirname, PathBuf::from("./lambda"));
        assert_eq!(c.lambda_paths(2).unwrap(), vec![None, None]);
    }

    #[test]
    fn filename_lists_are_per_structure() {
        let c = CibConfig::from_ron_str(r#"(weight_filenames: Some(["a.weight", ""]))"#).unwrap();
        assert_eq!(c.weight_paths(2).unwrap(), vec![Some(PathBuf::from("a.weight")), None]);
        assert!(matches!(
            c.validate(3),
            Err(CibError::FilenameCount { key: "weight_filenames", expected: 3, found: 2 })
        ));
    }

    #[test]
    fn syntax_errors_are_reported() {
        assert!(matches!(
            CibConfig::from_ron_str("(output_eul_lambda: maybe)"),
            Err(CibError::Config(_))
        ));
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cib.ron");
        std::fs::write(&path, "(output_eul_lambda: true, lambda_dirname: \"out\")").unwrap();
        let c = CibConfig::from_path(&path).unwrap();
        assert!(c.output_eul_lambda);
        assert_eq!(c.lambda_dirname, PathBuf::from("out"));
    }
}
