use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::Path,
};

use bytemuck::bytes_of;

use crate::{error::CibError, structure::StructureIndexMap};

/// The constraint force of every structure at one instant, gathered on the
/// root rank.
#[derive(Clone, Debug, PartialEq)]
pub struct LambdaRecord {
    pub time: f64,
    pub depth: usize,
    /// Node-major values of each structure.
    pub structures: Vec<Vec<f64>>,
}

impl LambdaRecord {
    /// Splits a field gathered in Lagrangian order into its structures.
    pub fn from_gathered(
        time: f64,
        depth: usize,
        map: &StructureIndexMap,
        gathered: &[f64],
    ) -> Self {
        let structures = (0..map.len())
            .map(|part| {
                let (first, last) = map.range(part);
                gathered[first * depth..last * depth].to_vec()
            })
            .collect();
        Self {
            time,
            depth,
            structures,
        }
    }

    pub fn num_nodes(&self, part: usize) -> usize {
        self.structures[part].len() / self.depth
    }

    /// Component-wise sum of the force on structure `part`.
    pub fn net_resultant(&self, part: usize) -> Vec<f64> {
        let mut total = vec![0.0; self.depth];
        for node in self.structures[part].chunks_exact(self.depth) {
            for (t, v) in total.iter_mut().zip(node) {
                *t += v;
            }
        }
        total
    }
}

/// A sink for the periodic lambda dumps.
pub trait DiagnosticsWriter {
    fn write_lambda(&mut self, record: &LambdaRecord) -> Result<(), CibError>;

    fn finish(&mut self) -> Result<(), CibError> {
        Ok(())
    }
}

// 16 digits, two-digit signed exponent: 1.0000000000000000e+00
fn scientific(x: f64) -> String {
    let s = format!("{x:.16e}");
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => s,
    }
}

/// Human readable dump: the time, then for each structure its marker
/// count, one line per marker and the net resultant.
pub struct LambdaTextWriter<W> {
    output: W,
}

impl<W: Write> LambdaTextWriter<W> {
    pub fn new(output: W) -> Self {
        Self { output }
    }

    pub fn into_inner(self) -> W {
        self.output
    }
}

impl<W: Write> DiagnosticsWriter for LambdaTextWriter<W> {
    fn write_lambda(&mut self, record: &LambdaRecord) -> Result<(), CibError> {
        let out = &mut self.output;
        writeln!(out, "{}", scientific(record.time))?;
        writeln!(out)?;
        for (part, values) in record.structures.iter().enumerate() {
            writeln!(out, "structure: {} ib_pts: {}", part, record.num_nodes(part))?;
            for node in values.chunks_exact(record.depth) {
                for v in node {
                    write!(out, "{}\t", scientific(*v))?;
                }
                writeln!(out)?;
            }
            write!(out, "Net resultant lambda for structure: {part} ")?;
            for t in record.net_resultant(part) {
                write!(out, "{}\t", scientific(t))?;
            }
            writeln!(out)?;
        }
        out.flush().map_err(CibError::from)
    }

    fn finish(&mut self) -> Result<(), CibError> {
        self.output.flush().map_err(CibError::from)
    }
}

const LAMBDA_HEADER: &[u8] = b"CIBL1";
const MARKER: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

/// Compact binary dump.
///
/// The header (magic, float size, depth, structure count and marker count
/// of each structure) is written before the first record. Each record is
/// the time followed by the raw values of every structure.
pub struct LambdaBinaryWriter<W> {
    output: W,
    header_written: bool,
}

impl<W: Write> LambdaBinaryWriter<W> {
    pub fn new(output: W) -> Self {
        Self {
            output,
            header_written: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.output
    }

    fn write_header(&mut self, record: &LambdaRecord) -> Result<(), CibError> {
        let output = &mut self.output;
        output.write_all(LAMBDA_HEADER)?;
        output.write_all(bytes_of(&(std::mem::size_of::<f64>() as u8)))?;
        output.write_all(bytes_of(&(record.depth as u32)))?;
        output.write_all(bytes_of(&(record.structures.len() as u32)))?;
        for part in 0..record.structures.len() {
            output.write_all(bytes_of(&(record.num_nodes(part) as u32)))?;
        }
        output.write_all(&MARKER)?;
        Ok(())
    }
}

impl<W: Write> DiagnosticsWriter for LambdaBinaryWriter<W> {
    fn write_lambda(&mut self, record: &LambdaRecord) -> Result<(), CibError> {
        if !self.header_written {
            self.write_header(record)?;
            self.header_written = true;
        }
        self.output.write_all(bytes_of(&record.time))?;
        for values in &record.structures {
            self.output.write_all(bytemuck::cast_slice(values.as_slice()))?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), CibError> {
        self.output.write_all(&MARKER)?;
        self.output.flush().map_err(CibError::from)
    }
}

/// Opens `<dir>/lambda` for text dumps. A fresh run creates the directory
/// and truncates the file, a restarted run appends to it.
pub fn open_lambda_writer(
    dir: impl AsRef<Path>,
    from_restart: bool,
) -> Result<LambdaTextWriter<BufWriter<File>>, CibError> {
    let dir = dir.as_ref();
    if !from_restart {
        fs::create_dir_all(dir).map_err(|source| CibError::Open {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let path = dir.join("lambda");
    let mut options = OpenOptions::new();
    options.create(true);
    if from_restart {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    let file = options.open(&path).map_err(|source| CibError::Open { path, source })?;
    Ok(LambdaTextWriter::new(BufWriter::new(file)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> LambdaRecord {
        let map = StructureIndexMap::new(vec![(0, 2), (2, 3)]);
        LambdaRecord::from_gathered(0.5, 2, &map, &[1.0, 2.0, 3.0, -4.0, 0.25, 0.0])
    }

    #[test]
    fn scientific_matches_stream_formatting() {
        assert_eq!(scientific(1.0), "1.0000000000000000e+00");
        assert_eq!(scientific(-0.00125), "-1.2500000000000000e-03");
        assert_eq!(scientific(6.02e123), "6.0200000000000000e+123");
    }

    #[test]
    fn records_split_by_structure() {
        let r = record();
        assert_eq!(r.num_nodes(0), 2);
        assert_eq!(r.num_nodes(1), 1);
        assert_eq!(r.net_resultant(0), vec![4.0, -2.0]);
        assert_eq!(r.net_resultant(1), vec![0.25, 0.0]);
    }

    #[test]
    fn text_dump_layout() {
        let mut w = LambdaTextWriter::new(Vec::new());
        w.write_lambda(&record()).unwrap();
        let text = String::from_utf8(w.into_inner()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "5.0000000000000000e-01");
        assert_eq!(lines[1], "");
        assert_eq!(lines[2], "structure: 0 ib_pts: 2");
        assert_eq!(lines[3], "1.0000000000000000e+00\t2.0000000000000000e+00\t");
        assert_eq!(
            lines[5],
            concat!(
                "Net resultant lambda for structure: 0 ",
                "4.0000000000000000e+00\t-2.0000000000000000e+00\t"
            )
        );
        assert_eq!(lines[6], "structure: 1 ib_pts: 1");
        assert_eq!(lines.len(), 9);
    }

    #[test]
    fn binary_dump_layout() {
        let mut w = LambdaBinaryWriter::new(Vec::new());
        w.write_lambda(&record()).unwrap();
        w.write_lambda(&record()).unwrap();
        w.finish().unwrap();
        let bytes = w.into_inner();
        assert_eq!(&bytes[..5], LAMBDA_HEADER);
        assert_eq!(bytes[5], 8);
        let header = 5 + 1 + 4 + 4 + 2 * 4 + 4;
        let record_len = 8 * (1 + 6);
        assert_eq!(bytes.len(), header + 2 * record_len + 4);
        let time: f64 = bytemuck::pod_read_unaligned(&bytes[header..header + 8]);
        assert_eq!(time, 0.5);
    }

    #[test]
    fn restart_appends_to_the_dump() {
        let dir = tempfile::tempdir().unwrap();
        let lambda_dir = dir.path().join("out").join("lambda");

        let mut w = open_lambda_writer(&lambda_dir, false).unwrap();
        w.write_lambda(&record()).unwrap();
        drop(w);
        let first = fs::read_to_string(lambda_dir.join("lambda")).unwrap();

        let mut w = open_lambda_writer(&lambda_dir, true).unwrap();
        w.write_lambda(&record()).unwrap();
        drop(w);
        let appended = fs::read_to_string(lambda_dir.join("lambda")).unwrap();
        assert_eq!(appended.len(), 2 * first.len());

        let mut w = open_lambda_writer(&lambda_dir, false).unwrap();
        w.finish().unwrap();
        assert!(fs::read_to_string(lambda_dir.join("lambda")).unwrap().is_empty());
    }
}
