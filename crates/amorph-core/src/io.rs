//! Pluggable I/O backends for the VM.
//!
//! A backend owns the three effect channels (stdout, stdin, trace) plus the
//! clock that stamps trace events. The quiet and scripted backends use a
//! deterministic counter clock so trace output is byte-identical across runs.

use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::time::{SystemTime, UNIX_EPOCH};

pub trait IoBackend {
    /// Write one line to the stdout channel.
    fn write_line(&mut self, line: &str);

    /// Read one line from the stdin channel, optionally echoing a prompt.
    fn read_line(&mut self, prompt: Option<&str>) -> String;

    /// Write one NDJSON event to the trace channel.
    fn write_trace(&mut self, line: &str);

    /// Timestamp for the next trace event.
    fn now(&mut self) -> f64;
}

/// Process stdio: stdout for program output, stderr for trace, wall clock.
#[derive(Debug, Default)]
pub struct StdBackend;

impl IoBackend for StdBackend {
    fn write_line(&mut self, line: &str) {
        println!("{line}");
    }

    fn read_line(&mut self, prompt: Option<&str>) -> String {
        if let Some(p) = prompt {
            print!("{p}");
            let _ = std::io::stdout().flush();
        }
        let mut buf = String::new();
        if std::io::stdin().lock().read_line(&mut buf).is_err() {
            return String::new();
        }
        buf.trim_end_matches(['\n', '\r']).to_string()
    }

    fn write_trace(&mut self, line: &str) {
        eprintln!("{line}");
    }

    fn now(&mut self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Captures output, returns empty input. `input` never blocks here.
#[derive(Debug, Default)]
pub struct QuietBackend {
    pub outputs: Vec<String>,
    pub trace: Vec<String>,
    ticks: u64,
}

impl QuietBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IoBackend for QuietBackend {
    fn write_line(&mut self, line: &str) {
        self.outputs.push(line.to_string());
    }

    fn read_line(&mut self, _prompt: Option<&str>) -> String {
        String::new()
    }

    fn write_trace(&mut self, line: &str) {
        self.trace.push(line.to_string());
    }

    fn now(&mut self) -> f64 {
        let t = self.ticks;
        self.ticks += 1;
        t as f64
    }
}

/// Captures output and replays a canned stdin script.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    pub outputs: Vec<String>,
    pub trace: Vec<String>,
    script: VecDeque<String>,
    ticks: u64,
}

impl ScriptedBackend {
    pub fn new(lines: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            script: lines.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

impl IoBackend for ScriptedBackend {
    fn write_line(&mut self, line: &str) {
        self.outputs.push(line.to_string());
    }

    fn read_line(&mut self, _prompt: Option<&str>) -> String {
        self.script.pop_front().unwrap_or_default()
    }

    fn write_trace(&mut self, line: &str) {
        self.trace.push(line.to_string());
    }

    fn now(&mut self) -> f64 {
        let t = self.ticks;
        self.ticks += 1;
        t as f64
    }
}
