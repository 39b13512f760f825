//! Per-marker input files.
//!
//! The first line holds the number of markers, every following line the
//! components of one marker separated by whitespace. Weight files may give a
//! single value per marker instead, which applies to every component.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use crate::error::CibError;

/// Reads a marker file that must hold exactly `expected` markers of `depth`
/// components each. Returns the values node-major.
pub fn read_marker_file(
    kind: &'static str,
    path: &Path,
    structure: usize,
    expected: usize,
    depth: usize,
) -> Result<Vec<f64>, CibError> {
    let file = File::open(path).map_err(|source| CibError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);
    parse_marker_file(kind, path, reader, structure, expected, depth, false)
}

/// Like [`read_marker_file`], but a line may also hold one value, which is
/// repeated over the `depth` components.
pub fn read_weight_file(
    path: &Path,
    structure: usize,
    expected: usize,
    depth: usize,
) -> Result<Vec<f64>, CibError> {
    let file = File::open(path).map_err(|source| CibError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);
    parse_marker_file("weight", path, reader, structure, expected, depth, true)
}

pub(crate) fn parse_marker_file(
    kind: &'static str,
    path: &Path,
    reader: impl BufRead,
    structure: usize,
    expected: usize,
    depth: usize,
    broadcast_scalar: bool,
) -> Result<Vec<f64>, CibError> {
    let malformed = |line: usize| CibError::MalformedFile {
        kind,
        path: path.to_path_buf(),
        line,
    };

    let mut lines = reader.lines();
    let found = lines
        .next()
        .transpose()?
        .and_then(|l| l.trim().parse::<usize>().ok())
        .ok_or_else(|| malformed(1))?;
    if found != expected {
        return Err(CibError::MarkerCountMismatch {
            kind,
            path: path.to_path_buf(),
            structure,
            expected,
            found,
        });
    }

    let mut values = Vec::with_capacity(expected * depth);
    for k in 0..expected {
        let line_no = k + 2;
        let line = lines.next().transpose()?.ok_or_else(|| malformed(line_no))?;
        let row = line
            .split_whitespace()
            .take(depth)
            .map(|token| token.parse::<f64>().map_err(|_| malformed(line_no)))
            .collect::<Result<Vec<_>, _>>()?;
        match row.len() {
            n if n == depth => values.extend(row),
            1 if broadcast_scalar => values.extend(std::iter::repeat(row[0]).take(depth)),
            _ => return Err(malformed(line_no)),
        }
    }
    Ok(values)
}
