//! Recording and replaying of simulation inputs.
//!
//! Ground truth, control inputs and measurements can be written to CSV files, one vector per
//! row, and read back in a later run instead of being generated. Values are written with the
//! shortest representation that parses back to the same `f64`, so a replayed run reproduces
//! the recorded one exactly.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use ndarray::{Array1, ArrayBase, Data, Ix1};

use super::SimulationError;

/// Reads one vector per CSV row.
pub struct VectorReader<R: Read> {
    path: PathBuf,
    reader: csv::Reader<R>,
    record: csv::StringRecord,
    row: usize,
}

impl VectorReader<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SimulationError> {
        let path = path.as_ref();
        Ok(VectorReader::new(path, File::open(path)?))
    }
}

impl<R: Read> VectorReader<R> {
    /// `path` only names the source in error messages.
    pub fn new<P: AsRef<Path>>(path: P, reader: R) -> Self {
        VectorReader {
            path: path.as_ref().to_path_buf(),
            reader: csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_reader(reader),
            record: csv::StringRecord::new(),
            row: 0,
        }
    }

    /// Next row, which has to hold exactly `len` numbers.
    pub fn next_vector(&mut self, len: usize) -> Result<Array1<f64>, SimulationError> {
        self.row += 1;
        if !self.reader.read_record(&mut self.record)? {
            return Err(self.error(format!("no row {}, the file has ended", self.row)));
        }
        // an empty vector is written as a single empty field
        let values = self
            .record
            .iter()
            .filter(|field| !(self.record.len() == 1 && field.is_empty()))
            .map(|field| field.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| self.error(format!("row {}: {}", self.row, err)))?;
        if values.len() != len {
            return Err(self.error(format!(
                "row {} has {} values, expected {}",
                self.row,
                values.len(),
                len
            )));
        }
        Ok(Array1::from(values))
    }

    fn error(&self, reason: String) -> SimulationError {
        SimulationError::Replay {
            path: self.path.clone(),
            reason,
        }
    }
}

/// Writes one vector per CSV row.
pub struct VectorWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl VectorWriter<File> {
    /// Creates or truncates the file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, SimulationError> {
        Ok(VectorWriter::new(File::create(path)?))
    }
}

impl<W: Write> VectorWriter<W> {
    pub fn new(writer: W) -> Self {
        VectorWriter {
            writer: csv::WriterBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_writer(writer),
        }
    }

    pub fn write<S>(&mut self, vector: &ArrayBase<S, Ix1>) -> Result<(), SimulationError>
    where
        S: Data<Elem = f64>,
    {
        if vector.is_empty() {
            // a bare line break would be skipped as a blank line on reading
            self.writer.write_record(&[""])?;
        } else {
            self.writer.write_record(vector.iter().map(f64::to_string))?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), SimulationError> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        self.writer.get_ref()
    }
}
