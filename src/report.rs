//! Aggregate run report.
//!
//! One YAML document per invocation: the shared test parameters, then one
//! entry per round. Failed rounds carry their error string next to the
//! successful ones instead of aborting the run.

use crate::config::Config;
use crate::harness::RoundData;
use crate::percentile::{extract_percentiles, ns_to_readable};
use serde::Serialize;
use std::collections::BTreeMap;

/// Latency percentiles reported per round.
const LATENCY_PERCS: [f64; 3] = [0.5, 0.75, 0.95];

/// Aggregate report for one invocation.
#[derive(Debug, Serialize)]
pub struct Report {
    pub workers: usize,
    pub server: String,
    pub bind_addr: String,
    pub msize: usize,
    pub runtime: u64,
    pub timeout: (u64, u64),
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
    pub data: Vec<RoundEntry>,
}

/// One round in the report: either its results or its error.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RoundEntry {
    Completed(RoundReport),
    Failed { func: String, err: String },
}

/// Rendered results of one completed round.
#[derive(Debug, Serialize)]
pub struct RoundReport {
    pub func: String,
    pub utime: String,
    pub stime: String,
    pub ctime: String,
    pub lat_50: String,
    pub lat_75: String,
    pub lat_95: String,
    pub msg_5perc: u64,
    pub msg_95perc: u64,
    pub messages: u64,
}

impl Report {
    pub fn new(config: &Config) -> Self {
        Self {
            workers: config.params.count,
            server: config.params.loader_addr.to_string(),
            bind_addr: config.params.bind_addr.to_string(),
            msize: config.params.msize,
            runtime: config.params.runtime_secs,
            timeout: config.params.timeout_ms,
            meta: config.meta.iter().cloned().collect(),
            data: Vec::new(),
        }
    }

    /// Record one completed round.
    pub fn push_completed(&mut self, func: &str, data: &RoundData) {
        let lats = extract_percentiles(
            &data.result.histogram,
            data.result.log_base,
            &LATENCY_PERCS,
        );
        self.data.push(RoundEntry::Completed(RoundReport {
            func: func.to_string(),
            utime: format!("{:.2}", data.times.utime),
            stime: format!("{:.2}", data.times.stime),
            ctime: format!("{:.2}", data.times.ctime),
            lat_50: ns_to_readable(lats[0]),
            lat_75: ns_to_readable(lats[1]),
            lat_95: ns_to_readable(lats[2]),
            msg_5perc: *data.result.msg_percentiles.first().unwrap_or(&0),
            msg_95perc: *data.result.msg_percentiles.last().unwrap_or(&0),
            messages: data.result.messages,
        }));
    }

    /// Record one failed round.
    pub fn push_failed(&mut self, func: &str, err: String) {
        self.data.push(RoundEntry::Failed {
            func: func.to_string(),
            err,
        });
    }

    /// Render the report as a YAML document.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&[self])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::ProcTimes;
    use crate::payload::TestResult;

    fn sample_report() -> Report {
        Report {
            workers: 100,
            server: "10.0.0.4:33331".to_string(),
            bind_addr: "0.0.0.0:33332".to_string(),
            msize: 1024,
            runtime: 30,
            timeout: (0, 0),
            meta: BTreeMap::new(),
            data: Vec::new(),
        }
    }

    #[test]
    fn test_round_rendering() {
        let mut report = sample_report();
        let data = RoundData {
            times: ProcTimes {
                utime: 1.234,
                stime: 0.5,
                ctime: 30.01,
            },
            result: TestResult {
                messages: 5000,
                log_base: 10.0,
                histogram: BTreeMap::from([(3, 10), (6, 90)]),
                msg_percentiles: (1..=19).collect(),
            },
        };
        report.push_completed("threads", &data);
        report.push_failed("green", "connection refused".to_string());

        let yaml = report.to_yaml().unwrap();
        assert!(yaml.contains("func: threads"));
        assert!(yaml.contains("utime: '1.23'") || yaml.contains("utime: \"1.23\""));
        // All traffic at bucket 6 of base 10: one millisecond.
        assert!(yaml.contains("lat_95: 1ms"));
        assert!(yaml.contains("msg_5perc: 1"));
        assert!(yaml.contains("msg_95perc: 19"));
        assert!(yaml.contains("err: connection refused"));
        // No meta section when empty.
        assert!(!yaml.contains("meta"));
    }
}
