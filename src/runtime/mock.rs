//! Scripted in-memory transport for unit tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

/// One scripted result for `read`.
#[derive(Debug)]
pub enum ReadStep {
    Data(Vec<u8>),
    Eof,
    Fail(io::ErrorKind),
}

/// A stream whose reads are scripted and whose writes can be throttled,
/// blocked or failed on demand.
#[derive(Debug, Default)]
pub struct MockStream {
    reads: VecDeque<ReadStep>,
    written: Vec<u8>,
    write_calls: usize,
    write_limit: Option<usize>,
    write_plan: Vec<usize>,
    plan_pos: usize,
    write_budget: Option<usize>,
    fail_after: Option<(usize, io::ErrorKind)>,
    interrupts: usize,
}

impl MockStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept at most `k` bytes per write call.
    pub fn with_write_limit(mut self, k: usize) -> Self {
        self.write_limit = Some(k);
        self
    }

    /// Cycle through per-call write sizes. A zero entry makes that call return `Ok(0)`.
    pub fn with_write_plan(mut self, plan: Vec<usize>) -> Self {
        self.write_plan = plan;
        self
    }

    /// Accept `budget` bytes in total, then report `WouldBlock`.
    pub fn with_write_budget(mut self, budget: usize) -> Self {
        self.write_budget = Some(budget);
        self
    }

    pub fn add_write_budget(&mut self, extra: usize) {
        self.write_budget = Some(self.write_budget.unwrap_or(0) + extra);
    }

    /// Accept exactly `p` bytes in total, then fail with `kind`.
    pub fn fail_writes_after(mut self, p: usize, kind: io::ErrorKind) -> Self {
        self.fail_after = Some((p, kind));
        self
    }

    /// Fail the next `n` write calls with `Interrupted`.
    pub fn interrupt_writes(mut self, n: usize) -> Self {
        self.interrupts = n;
        self
    }

    pub fn with_read(mut self, data: &[u8]) -> Self {
        self.push_read(ReadStep::Data(data.to_vec()));
        self
    }

    pub fn push_read(&mut self, step: ReadStep) {
        self.reads.push_back(step);
    }

    pub fn written(&self) -> &[u8] {
        &self.written
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reads.pop_front() {
            None => Err(io::ErrorKind::WouldBlock.into()),
            Some(ReadStep::Eof) => Ok(0),
            Some(ReadStep::Fail(kind)) => Err(kind.into()),
            Some(ReadStep::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    // The rest stays queued, like unread bytes in a socket
                    self.reads.push_front(ReadStep::Data(data.split_off(n)));
                }
                Ok(n)
            }
        }
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_calls += 1;

        if self.interrupts > 0 {
            self.interrupts -= 1;
            return Err(io::ErrorKind::Interrupted.into());
        }

        let mut n = buf.len();
        if let Some(limit) = self.write_limit {
            n = n.min(limit);
        }
        if !self.write_plan.is_empty() {
            let step = self.write_plan[self.plan_pos % self.write_plan.len()];
            self.plan_pos += 1;
            if step == 0 {
                return Ok(0);
            }
            n = n.min(step);
        }
        if let Some((p, kind)) = self.fail_after {
            let room = p.saturating_sub(self.written.len());
            if room == 0 {
                return Err(kind.into());
            }
            n = n.min(room);
        }
        if let Some(budget) = self.write_budget {
            if budget == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            n = n.min(budget);
            self.write_budget = Some(budget - n);
        }

        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
