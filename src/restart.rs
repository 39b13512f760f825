//! Checkpoint storage: named arrays of doubles in nested named databases.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::error::CibError;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RestartDatabase {
    arrays: BTreeMap<String, Vec<f64>>,
    databases: BTreeMap<String, RestartDatabase>,
}

impl RestartDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_double_array(&mut self, key: impl Into<String>, values: &[f64]) {
        self.arrays.insert(key.into(), values.to_vec());
    }

    /// The array stored under `key`, which must hold `len` values.
    pub fn get_double_array(&self, key: &str, len: usize) -> Result<&[f64], CibError> {
        self.arrays
            .get(key)
            .filter(|v| v.len() == len)
            .map(Vec::as_slice)
            .ok_or_else(|| CibError::MissingRestartEntry {
                key: key.to_string(),
                expected: len,
            })
    }

    pub fn database(&self, name: &str) -> Result<&RestartDatabase, CibError> {
        self.databases
            .get(name)
            .ok_or_else(|| CibError::MissingRestartDatabase(name.to_string()))
    }

    /// The sub-database `name`, created empty when missing.
    pub fn put_database(&mut self, name: impl Into<String>) -> &mut RestartDatabase {
        self.databases.entry(name.into()).or_default()
    }

    pub fn write_to(&self, writer: impl Write) -> Result<(), CibError> {
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    pub fn read_from(reader: impl Read) -> Result<Self, CibError> {
        Ok(bincode::deserialize_from(reader)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CibError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| CibError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CibError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| CibError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::read_from(BufReader::new(file))
    }
}
