use std::fs::File;
use std::io::Write;
use std::path::Path;

use super::{SimulationError, StepRecord};

/// Receiver of the per-step records of a simulation run.
pub trait RecordSink {
    /// Handles the record of one completed step.
    fn record(&mut self, record: &StepRecord) -> Result<(), SimulationError>;

    /// Called once after the last record.
    fn finish(&mut self) -> Result<(), SimulationError> {
        Ok(())
    }
}

/// Collects records in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub records: Vec<StepRecord>,
}

impl RecordSink for MemorySink {
    fn record(&mut self, record: &StepRecord) -> Result<(), SimulationError> {
        self.records.push(record.clone());
        Ok(())
    }
}

/// Writes one CSV row per step.
///
/// Columns: `step, time, truth_x, truth_y, observations`, then `track{i}_x, track{i}_y` for every
/// observation stream, then `estimate_x, estimate_y, p00, p01, p10, p11, trace`, then
/// `residual{i}_x, residual{i}_y, nis{i}` for every stream. Residual fields stay empty on steps
/// without an update from that stream. The header is written with the first record, once the
/// number of streams is known.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
    header_written: bool,
}

impl CsvSink<File> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, SimulationError> {
        Ok(CsvSink::new(File::create(path)?))
    }
}

impl<W: Write> CsvSink<W> {
    pub fn new(writer: W) -> Self {
        CsvSink {
            writer: csv::WriterBuilder::new().has_headers(false).from_writer(writer),
            header_written: false,
        }
    }

    pub fn get_ref(&self) -> &W {
        self.writer.get_ref()
    }

    fn write_header(&mut self, streams: usize) -> Result<(), SimulationError> {
        let mut header = vec![
            "step".to_string(),
            "time".into(),
            "truth_x".into(),
            "truth_y".into(),
            "observations".into(),
        ];
        for index in 1..=streams {
            header.push(format!("track{}_x", index));
            header.push(format!("track{}_y", index));
        }
        header.extend(
            ["estimate_x", "estimate_y", "p00", "p01", "p10", "p11", "trace"]
                .iter()
                .map(|column| column.to_string()),
        );
        for index in 1..=streams {
            header.push(format!("residual{}_x", index));
            header.push(format!("residual{}_y", index));
            header.push(format!("nis{}", index));
        }
        self.writer.write_record(&header)?;
        self.header_written = true;
        Ok(())
    }
}

impl<W: Write> RecordSink for CsvSink<W> {
    fn record(&mut self, record: &StepRecord) -> Result<(), SimulationError> {
        if !self.header_written {
            self.write_header(record.tracks.len())?;
        }
        let mut row = vec![record.step.to_string(), record.time.to_string()];
        row.extend(record.truth.iter().map(f64::to_string));
        row.push(record.tracks.len().to_string());
        for track in &record.tracks {
            row.extend(track.iter().map(f64::to_string));
        }
        row.extend(record.estimate.iter().map(f64::to_string));
        row.extend(record.covariance.iter().map(f64::to_string));
        row.push(record.covariance_trace.to_string());
        for residual in &record.residuals {
            match residual {
                Some(residual) => {
                    row.extend(residual.residual.iter().map(f64::to_string));
                    row.push(residual.nis.to_string());
                }
                None => row.extend(std::iter::repeat(String::new()).take(3)),
            }
        }
        self.writer.write_record(&row)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SimulationError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::StreamResidual;

    fn record(step: usize) -> StepRecord {
        StepRecord {
            step,
            time: step as f64 * 0.5,
            truth: [1.0, 2.0],
            tracks: vec![[1.5, 2.5], [0.5, 1.5]],
            residuals: vec![
                Some(StreamResidual {
                    residual: [0.25, -0.5],
                    nis: 2.0,
                }),
                None,
            ],
            estimate: [1.25, 2.25],
            covariance: [0.5, 0.0, 0.0, 0.25],
            covariance_trace: 1.0,
        }
    }

    #[test]
    fn csv_rows_follow_header() {
        let mut sink = CsvSink::new(Vec::new());
        sink.record(&record(1)).unwrap();
        sink.record(&record(2)).unwrap();
        sink.finish().unwrap();

        let text = String::from_utf8(sink.get_ref().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "step,time,truth_x,truth_y,observations,track1_x,track1_y,track2_x,track2_y,\
             estimate_x,estimate_y,p00,p01,p10,p11,trace,\
             residual1_x,residual1_y,nis1,residual2_x,residual2_y,nis2"
        );
        assert_eq!(
            lines[2],
            "2,1,1,2,2,1.5,2.5,0.5,1.5,1.25,2.25,0.5,0,0,0.25,1,0.25,-0.5,2,,,"
        );
    }

    #[test]
    fn memory_sink_keeps_records() {
        let mut sink = MemorySink::default();
        sink.record(&record(3)).unwrap();
        assert_eq!(sink.records, vec![record(3)]);
    }
}
