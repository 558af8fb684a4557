//! Scripted transport for tests without hardware.

use std::collections::VecDeque;
use std::time::Duration;

use crate::clock::ManualClock;
use crate::error::{DroError, DroResult};
use crate::transport::Transport;

/// Transport that replays a fixed list of read results.
///
/// Writes always succeed and are recorded. Once the script is exhausted every
/// read times out, which is how a real channel behaves when nothing is queued.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    reads: VecDeque<DroResult<Vec<u8>>>,
    writes: Vec<Vec<u8>>,
    read_calls: usize,
    clock: Option<(ManualClock, Duration)>,
    write_error: Option<DroError>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a packet to be returned by a future read.
    pub fn push_frame(&mut self, frame: impl Into<Vec<u8>>) -> &mut Self {
        self.reads.push_back(Ok(frame.into()));
        self
    }

    /// Queue an error to be returned by a future read.
    pub fn push_error(&mut self, error: DroError) -> &mut Self {
        self.reads.push_back(Err(error));
        self
    }

    /// Fail the next write with `error`.
    pub fn fail_next_write(&mut self, error: DroError) -> &mut Self {
        self.write_error = Some(error);
        self
    }

    /// Advance `clock` by `per_read` on every read call.
    pub fn with_clock(mut self, clock: ManualClock, per_read: Duration) -> Self {
        self.clock = Some((clock, per_read));
        self
    }

    /// Packets written so far.
    pub fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }

    /// Number of read calls, including ones that timed out.
    pub fn read_calls(&self) -> usize {
        self.read_calls
    }

    /// Scripted reads not yet consumed.
    pub fn pending_reads(&self) -> usize {
        self.reads.len()
    }
}

impl Transport for ScriptedTransport {
    fn write(&mut self, data: &[u8], _timeout: Duration) -> DroResult<usize> {
        if let Some(error) = self.write_error.take() {
            return Err(error);
        }
        self.writes.push(data.to_vec());
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> DroResult<usize> {
        self.read_calls += 1;
        if let Some((clock, per_read)) = &self.clock {
            clock.advance(*per_read);
        }

        match self.reads.pop_front() {
            Some(Ok(frame)) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(n)
            }
            Some(Err(error)) => Err(error),
            None => Err(DroError::Timeout),
        }
    }
}
