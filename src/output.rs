//! Structured run output: a line-delimited JSON log and periodic parameter
//! snapshots. Only the coordinator process writes.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use nalgebra::DVector;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::stats::Stats;
use crate::vmc::ObservableStore;

/// Serialized machine parameters plus the step they were taken at. The
/// re/im pairs round-trip f64 values exactly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub iteration: usize,
    pub parameters: Vec<(f64, f64)>,
}

pub fn save_parameters(path: &Path, iteration: usize, pars: &DVector<Complex64>) -> Result<()> {
    let snapshot = Snapshot {
        iteration,
        parameters: pars.iter().map(|c| (c.re, c.im)).collect(),
    };
    let file = BufWriter::new(File::create(path)?);
    serde_json::to_writer(file, &snapshot)?;
    Ok(())
}

pub fn load_parameters(path: &Path) -> Result<(usize, DVector<Complex64>)> {
    let snapshot: Snapshot = serde_json::from_reader(File::open(path)?)?;
    let pars = DVector::from_iterator(
        snapshot.parameters.len(),
        snapshot.parameters.iter().map(|&(re, im)| Complex64::new(re, im)),
    );
    Ok((snapshot.iteration, pars))
}

fn stats_to_json(stats: &Stats) -> Value {
    json!({
        "Mean": stats.mean.re,
        "Sigma": stats.error_of_mean,
        "Variance": stats.variance,
        "Taucorr": stats.correlation,
        "R": stats.r_hat,
    })
}

/// One log line per optimization step.
pub fn log_record(
    iteration: usize,
    observables: &ObservableStore,
    grad_norm: f64,
    update_norm: f64,
    acceptance: &[f64],
) -> Value {
    let mut map = Map::new();
    map.insert("Iteration".into(), json!(iteration));
    for (name, stats) in observables.iter() {
        map.insert(name.clone(), stats_to_json(stats));
    }
    map.insert("GradNorm".into(), json!(grad_norm));
    map.insert("UpdateNorm".into(), json!(update_norm));
    map.insert("Acceptance".into(), json!(acceptance));
    Value::Object(map)
}

/// Appends log records to `<prefix>.log` and rewrites `<prefix>.wf` at the
/// configured cadence.
pub struct OutputWriter {
    log: BufWriter<File>,
    wf_path: PathBuf,
    save_every: usize,
}

impl OutputWriter {
    pub fn new(prefix: &str, save_every: usize) -> Result<Self> {
        Ok(Self {
            log: BufWriter::new(File::create(format!("{prefix}.log"))?),
            wf_path: PathBuf::from(format!("{prefix}.wf")),
            save_every: save_every.max(1),
        })
    }

    pub fn write_log(&mut self, record: &Value) -> Result<()> {
        serde_json::to_writer(&mut self.log, record)?;
        self.log.write_all(b"\n")?;
        self.log.flush()?;
        Ok(())
    }

    pub fn write_state(&mut self, iteration: usize, pars: &DVector<Complex64>) -> Result<()> {
        if iteration % self.save_every == 0 {
            save_parameters(&self.wf_path, iteration, pars)?;
        }
        Ok(())
    }
}
