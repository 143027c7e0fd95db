//! Scripted in-memory client for timing tests under a paused tokio clock.
//!
//! Enabled for this crate's own tests and, through the `test-support`
//! feature, for downstream test suites.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::buffer::OutputBuffer;
use crate::error::{ProbeError, ProbeResult};
use crate::outcome::EndpointConfig;
use crate::process::{ClientExit, ClientLauncher, ClientProcess, SignalLevel};

#[derive(Debug, Default)]
struct Journal {
    signals: Vec<SignalLevel>,
    kills: usize,
    launched: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedBuilder {
    lines: Vec<(Duration, String)>,
    exit_at: Option<(Duration, i32)>,
    exits_on: Option<(SignalLevel, Duration)>,
    ignore_signals: bool,
}

impl ScriptedBuilder {
    /// Write `line` to the output `at` after start.
    pub fn line(mut self, at: Duration, line: &str) -> Self {
        self.lines.push((at, format!("{line}\n")));
        self
    }

    /// Exit on its own with code 0.
    pub fn exit_at(self, at: Duration) -> Self {
        self.exit_with(at, 0)
    }

    pub fn exit_with(mut self, at: Duration, code: i32) -> Self {
        self.exit_at = Some((at, code));
        self
    }

    /// Exit `delay` after receiving `level`. Without this, the first signal ends it.
    pub fn exits_on(mut self, level: SignalLevel, delay: Duration) -> Self {
        self.exits_on = Some((level, delay));
        self
    }

    pub fn ignore_signals(mut self) -> Self {
        self.ignore_signals = true;
        self
    }

    pub fn build(self) -> ScriptedProcess {
        self.spawn(Arc::default())
    }

    fn spawn(self, journal: Arc<Mutex<Journal>>) -> ScriptedProcess {
        let started = Instant::now();
        let output = OutputBuffer::new();
        let writer = output.clone();
        let lines = self.lines.clone();
        tokio::spawn(async move {
            for (at, line) in lines {
                tokio::time::sleep_until(started + at).await;
                writer.append(line.as_bytes());
            }
        });

        ScriptedProcess {
            script: self,
            started,
            output,
            journal,
            exit: None,
        }
    }
}

#[derive(Debug)]
pub struct ScriptedProcess {
    script: ScriptedBuilder,
    started: Instant,
    output: OutputBuffer,
    journal: Arc<Mutex<Journal>>,
    /// Exit scheduled by a signal or a kill.
    exit: Option<(Instant, Option<i32>)>,
}

impl ScriptedProcess {
    pub fn builder() -> ScriptedBuilder {
        ScriptedBuilder::default()
    }

    pub fn signals(&self) -> Vec<SignalLevel> {
        self.journal.lock().unwrap().signals.clone()
    }

    pub fn kills(&self) -> usize {
        self.journal.lock().unwrap().kills
    }

    fn exit_point(&self) -> Option<(Instant, Option<i32>)> {
        let natural = self
            .script
            .exit_at
            .map(|(at, code)| (self.started + at, Some(code)));
        match (natural, self.exit) {
            (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
            (a, b) => a.or(b),
        }
    }
}

#[async_trait]
impl ClientProcess for ScriptedProcess {
    fn id(&self) -> Option<u32> {
        Some(4242)
    }

    fn output(&self) -> OutputBuffer {
        self.output.clone()
    }

    fn signal(&mut self, level: SignalLevel) -> io::Result<()> {
        self.journal.lock().unwrap().signals.push(level);
        if self.script.ignore_signals || self.exit.is_some() {
            return Ok(());
        }
        let delay = match self.script.exits_on {
            Some((wanted, delay)) if wanted == level => Some(delay),
            Some(_) => None,
            None => Some(Duration::ZERO),
        };
        if let Some(delay) = delay {
            self.exit = Some((Instant::now() + delay, None));
        }
        Ok(())
    }

    fn try_wait(&mut self) -> io::Result<Option<ClientExit>> {
        Ok(self
            .exit_point()
            .filter(|(at, _)| *at <= Instant::now())
            .map(|(_, code)| ClientExit { code }))
    }

    async fn wait(&mut self) -> io::Result<ClientExit> {
        match self.exit_point() {
            Some((at, code)) => {
                tokio::time::sleep_until(at).await;
                Ok(ClientExit { code })
            }
            None => std::future::pending().await,
        }
    }

    async fn force_kill(&mut self) -> io::Result<()> {
        self.journal.lock().unwrap().kills += 1;
        if !matches!(self.exit_point(), Some((at, _)) if at <= Instant::now()) {
            self.exit = Some((Instant::now(), None));
        }
        Ok(())
    }
}

/// Launches a fresh [`ScriptedProcess`] per attempt and keeps its journal.
#[derive(Debug, Default)]
pub struct ScriptedLauncher {
    script: ScriptedBuilder,
    per_endpoint: HashMap<String, ScriptedBuilder>,
    journal: Arc<Mutex<Journal>>,
    fail_spawn: bool,
}

impl ScriptedLauncher {
    pub fn new(script: ScriptedBuilder) -> Self {
        Self {
            script,
            ..Default::default()
        }
    }

    /// Use `script` instead of the default one for the endpoint called `name`.
    pub fn with_endpoint(mut self, name: &str, script: ScriptedBuilder) -> Self {
        self.per_endpoint.insert(name.to_string(), script);
        self
    }

    pub fn failing() -> Self {
        Self {
            fail_spawn: true,
            ..Default::default()
        }
    }

    pub fn signals(&self) -> Vec<SignalLevel> {
        self.journal.lock().unwrap().signals.clone()
    }

    pub fn kills(&self) -> usize {
        self.journal.lock().unwrap().kills
    }

    pub fn launches(&self) -> usize {
        self.journal.lock().unwrap().launched.len()
    }

    /// Endpoint names in launch order.
    pub fn launched(&self) -> Vec<String> {
        self.journal.lock().unwrap().launched.clone()
    }
}

#[async_trait]
impl ClientLauncher for ScriptedLauncher {
    type Process = ScriptedProcess;

    async fn launch(&self, config: &EndpointConfig) -> ProbeResult<ScriptedProcess> {
        if self.fail_spawn {
            return Err(ProbeError::spawn(
                "scripted",
                io::Error::new(io::ErrorKind::NotFound, "binary not found"),
            ));
        }
        self.journal
            .lock()
            .unwrap()
            .launched
            .push(config.name.clone());
        let script = self
            .per_endpoint
            .get(&config.name)
            .unwrap_or(&self.script)
            .clone();
        Ok(script.spawn(Arc::clone(&self.journal)))
    }
}
