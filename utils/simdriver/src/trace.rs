//! Waveform tracing interface.
//!
//! A [`Tracer`] is bound to a model before the run starts, receives one
//! [`Tracer::dump`] per evaluation step and is closed before the model is
//! torn down. [`DefaultTracer`] picks the tracer for [`Driver::new`](crate::Driver::new):
//! the model's own [`Model::Tracer`](crate::Model::Tracer) with the `trace`
//! feature, [`NullTracer`] without it.
//!
//! Models traced by the built-in FST tracer implement [`Traced`]: they
//! declare their signals into a [`TraceScope`] and later report the current
//! values in the same order.

use camino::Utf8Path;

use crate::context::SimContext;
use crate::error::{Result, SimError};
use crate::model::Model;

/// Depth that traces every level of the hierarchy.
pub const MAX_TRACE_DEPTH: u32 = 99;

pub const DEFAULT_TRACE_PATH: &str = "wave.fst";

pub trait Tracer<M: ?Sized> {
    /// Bind to `model` and open the waveform file at `path`.
    fn open(
        &mut self,
        model: &mut M,
        ctx: &mut SimContext,
        path: &Utf8Path,
        depth: u32,
    ) -> Result<()>;

    /// Record the model's current signal values at `time`.
    fn dump(&mut self, model: &M, time: u64) -> Result<()>;

    /// Flush and close the waveform file.
    fn close(&mut self, model: &mut M) -> Result<()>;

    fn is_open(&self) -> bool;

    /// `false` for tracers that never record anything. The driver only turns
    /// on trace capability for enabled tracers.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Tracer that records nothing and never touches the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTracer;

impl<M: ?Sized> Tracer<M> for NullTracer {
    fn open(&mut self, _: &mut M, _: &mut SimContext, _: &Utf8Path, _: u32) -> Result<()> {
        Ok(())
    }

    fn dump(&mut self, _: &M, _: u64) -> Result<()> {
        Ok(())
    }

    fn close(&mut self, _: &mut M) -> Result<()> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        false
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Maps a model to the tracer [`Driver::new`](crate::Driver::new) gives it.
pub trait SelectTracer {
    type Selected;
}

#[cfg(feature = "trace")]
impl<M: Model> SelectTracer for M {
    type Selected = M::Tracer;
}

#[cfg(not(feature = "trace"))]
impl<M: Model> SelectTracer for M {
    type Selected = NullTracer;
}

/// The model's own tracer with the `trace` feature, [`NullTracer`] without.
pub type DefaultTracer<M> = <M as SelectTracer>::Selected;

/// Models whose signals can be recorded by a pure-Rust tracer.
pub trait Traced {
    /// Declare every traceable signal. Declaration order defines the order
    /// of values produced by [`Traced::sample`].
    fn declare(&self, scope: &mut TraceScope) -> Result<()>;

    /// Append the current value of each declared signal to `values`.
    fn sample(&self, values: &mut Vec<u64>);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeEntry {
    Scope(String),
    Upscope,
    Signal { name: String, width: u32 },
}

/// Signal hierarchy collected while binding a tracer.
///
/// The outermost scope is level 1. Scopes and signals nested deeper than the
/// requested depth are left out of the trace.
#[derive(Debug)]
pub struct TraceScope {
    depth: u32,
    level: u32,
    entries: Vec<ScopeEntry>,
    kept: Vec<bool>,
}

impl TraceScope {
    pub fn new(depth: u32) -> Self {
        Self {
            depth,
            level: 0,
            entries: Vec::new(),
            kept: Vec::new(),
        }
    }

    fn visible(&self) -> bool {
        self.level <= self.depth
    }

    pub fn push(&mut self, name: &str) {
        self.level += 1;
        if self.visible() {
            self.entries.push(ScopeEntry::Scope(name.to_string()));
        }
    }

    pub fn pop(&mut self) {
        if self.level == 0 {
            return;
        }
        if self.visible() {
            self.entries.push(ScopeEntry::Upscope);
        }
        self.level -= 1;
    }

    /// Run `f` inside a child scope named `name`.
    pub fn scoped<F>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.push(name);
        let result = f(self);
        self.pop();
        result
    }

    pub fn signal(&mut self, name: &str, width: u32) -> Result<()> {
        if width == 0 || width > 64 {
            return Err(SimError::InvalidSignal {
                name: name.to_string(),
                width,
            });
        }
        let keep = self.visible();
        self.kept.push(keep);
        if keep {
            self.entries.push(ScopeEntry::Signal {
                name: name.to_string(),
                width,
            });
        }
        Ok(())
    }

    pub fn entries(&self) -> &[ScopeEntry] {
        &self.entries
    }

    /// One flag per declared signal, `true` when it is part of the trace.
    pub fn kept(&self) -> &[bool] {
        &self.kept
    }

    /// Number of signals that made it into the trace.
    pub fn traced_count(&self) -> usize {
        self.kept.iter().filter(|keep| **keep).count()
    }
}
