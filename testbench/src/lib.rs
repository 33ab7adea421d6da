//! Instrumented stand-ins for a generated model and its tracer.
//!
//! Both record what the driver does to them into a shared [`EventLog`], so
//! scenarios can check counts and ordering without a real hardware model.

use std::{cell::RefCell, rc::Rc};

use camino::Utf8Path;
use simdriver::trace::{TraceScope, Traced};
use simdriver::{Model, Result, SimContext, SimError, Tracer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    SetClock(bool),
    Eval { time: u64 },
    TraceOpen { depth: u32 },
    TraceDump { time: u64 },
    TraceClose,
    Finalize,
    Dropped,
}

#[derive(Debug, Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<Event>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.0.borrow_mut().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.0.borrow().iter().filter(|event| pred(event)).count()
    }

    pub fn position(&self, event: Event) -> Option<usize> {
        self.0.borrow().iter().position(|e| *e == event)
    }
}

/// Model that raises the finish flag during its `finish_after`-th eval.
pub struct StubModel {
    clk: bool,
    evals: u64,
    finish_after: u64,
    log: EventLog,
}

impl StubModel {
    pub fn new(finish_after: u64, log: EventLog) -> Self {
        Self {
            clk: false,
            evals: 0,
            finish_after,
            log,
        }
    }

    pub fn evals(&self) -> u64 {
        self.evals
    }
}

impl Model for StubModel {
    type Tracer = StubTracer;

    fn clock(&self) -> bool {
        self.clk
    }

    fn set_clock(&mut self, level: bool) {
        self.log.push(Event::SetClock(level));
        self.clk = level;
    }

    fn eval(&mut self, ctx: &mut SimContext) {
        self.log.push(Event::Eval { time: ctx.time() });
        self.evals += 1;
        if self.evals >= self.finish_after {
            ctx.finish();
        }
    }

    fn finalize(&mut self, _ctx: &mut SimContext) {
        self.log.push(Event::Finalize);
    }
}

impl Drop for StubModel {
    fn drop(&mut self) {
        self.log.push(Event::Dropped);
    }
}

impl Traced for StubModel {
    fn declare(&self, scope: &mut TraceScope) -> Result<()> {
        scope.scoped("stub", |stub| {
            stub.signal("clk", 1)?;
            stub.signal("evals", 32)
        })
    }

    fn sample(&self, values: &mut Vec<u64>) {
        values.push(u64::from(self.clk));
        values.push(self.evals);
    }
}

/// Tracer that logs into the model's [`EventLog`] and can inject a dump
/// failure at a chosen time.
#[derive(Debug, Default)]
pub struct StubTracer {
    log: Option<EventLog>,
    open: bool,
    fail_at: Option<u64>,
}

impl StubTracer {
    pub fn failing_at(time: u64) -> Self {
        Self {
            fail_at: Some(time),
            ..Self::default()
        }
    }

    fn record(&self, event: Event) {
        if let Some(log) = &self.log {
            log.push(event);
        }
    }
}

impl Tracer<StubModel> for StubTracer {
    fn open(
        &mut self,
        model: &mut StubModel,
        _ctx: &mut SimContext,
        _path: &Utf8Path,
        depth: u32,
    ) -> Result<()> {
        self.log = Some(model.log.clone());
        self.open = true;
        self.record(Event::TraceOpen { depth });
        Ok(())
    }

    fn dump(&mut self, _model: &StubModel, time: u64) -> Result<()> {
        if self.fail_at == Some(time) {
            return Err(SimError::TraceIo(std::io::Error::other(
                "injected dump failure",
            )));
        }
        self.record(Event::TraceDump { time });
        Ok(())
    }

    fn close(&mut self, _model: &mut StubModel) -> Result<()> {
        if !self.open {
            return Err(SimError::TraceNotOpen);
        }
        self.open = false;
        self.record(Event::TraceClose);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
