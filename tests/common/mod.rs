#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;

use camwatch::{CaptureSource, Frame, ShutdownSignal, StreamEndpoint};

pub const FRAME_WIDTH: u32 = 4;
pub const FRAME_HEIGHT: u32 = 4;

/// One scripted outcome. Steps are consumed in order by `open` and `read`.
pub enum Step {
    /// Yield a frame whose every byte is the given value.
    Frame(u8),
    /// End of stream.
    End,
    /// Next `open` fails.
    FailOpen,
    /// Block the read until the gate signal fires, then continue.
    Gate,
    /// Block the read until the hold signal fires, then end the stream.
    Hold,
}

#[derive(Debug, Default)]
pub struct Calls {
    pub opens: usize,
    pub releases: usize,
}

pub struct ScriptedSource {
    steps: VecDeque<Step>,
    calls: Arc<Mutex<Calls>>,
    gate: ShutdownSignal,
    hold: ShutdownSignal,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            calls: Arc::new(Mutex::new(Calls::default())),
            gate: ShutdownSignal::new(),
            hold: ShutdownSignal::new(),
        }
    }

    pub fn calls(&self) -> Arc<Mutex<Calls>> {
        self.calls.clone()
    }

    pub fn gate(&self) -> ShutdownSignal {
        self.gate.clone()
    }

    pub fn hold(&self) -> ShutdownSignal {
        self.hold.clone()
    }
}

impl CaptureSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn open(&mut self, _endpoint: &StreamEndpoint) -> Result<()> {
        self.calls.lock().unwrap().opens += 1;
        if let Some(Step::FailOpen) = self.steps.front() {
            self.steps.pop_front();
            return Err(anyhow!("connection refused"));
        }
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.steps.pop_front() {
                Some(Step::Frame(value)) => {
                    let pixels = vec![value; (FRAME_WIDTH * FRAME_HEIGHT * 3) as usize];
                    return Frame::new(pixels, FRAME_WIDTH, FRAME_HEIGHT, Utc::now()).map(Some);
                }
                Some(Step::Gate) => {
                    self.gate.wait_timeout(Duration::from_secs(10));
                }
                Some(Step::Hold) => {
                    self.hold.wait_timeout(Duration::from_secs(10));
                    return Ok(None);
                }
                Some(Step::FailOpen) => return Err(anyhow!("socket reset")),
                Some(Step::End) | None => return Ok(None),
            }
        }
    }

    fn release(&mut self) {
        self.calls.lock().unwrap().releases += 1;
    }
}

pub fn scripted_endpoint() -> StreamEndpoint {
    StreamEndpoint::parse("stub://scripted").expect("endpoint")
}
