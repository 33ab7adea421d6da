//! Built-in reference design used by `sim-main` when no generated model is
//! linked in.

use crate::context::SimContext;
use crate::error::Result;
use crate::model::Model;
use crate::trace::{TraceScope, Traced};

const DEFAULT_CYCLES: u32 = 16;

/// Counts rising clock edges and finishes after `+cycles=N` of them.
///
/// When nothing drives `clk` between two evals the counter flips it itself,
/// so it also runs under [`Preset::SelfTimed`](crate::Preset::SelfTimed).
#[derive(Debug, Clone)]
pub struct Counter {
    clk: bool,
    prev_clk: bool,
    count: u32,
    limit: u32,
    done: bool,
    configured: bool,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            clk: false,
            prev_clk: false,
            count: 0,
            limit: DEFAULT_CYCLES,
            done: false,
            configured: false,
        }
    }

    pub fn with_limit(limit: u32) -> Self {
        Self {
            limit,
            configured: true,
            ..Self::new()
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn done(&self) -> bool {
        self.done
    }

    fn configure(&mut self, ctx: &SimContext) {
        if let Some(cycles) = ctx.plusarg("cycles") {
            match cycles.parse() {
                Ok(limit) => self.limit = limit,
                Err(_) => log::warn!("ignoring +cycles={cycles}: not a number"),
            }
        }
        self.configured = true;
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

impl Model for Counter {
    #[cfg(feature = "trace")]
    type Tracer = crate::fst::FstTracer;
    #[cfg(not(feature = "trace"))]
    type Tracer = crate::trace::NullTracer;

    fn clock(&self) -> bool {
        self.clk
    }

    fn set_clock(&mut self, level: bool) {
        self.clk = level;
    }

    fn eval(&mut self, ctx: &mut SimContext) {
        if !self.configured {
            self.configure(ctx);
        }
        if self.clk == self.prev_clk {
            self.clk = !self.clk;
        }
        if self.clk && !self.prev_clk && !self.done {
            self.count += 1;
        }
        self.prev_clk = self.clk;
        if self.count >= self.limit {
            self.done = true;
            ctx.finish();
        }
    }
}

impl Traced for Counter {
    fn declare(&self, scope: &mut TraceScope) -> Result<()> {
        scope.scoped("top", |top| {
            top.signal("clk", 1)?;
            top.signal("count", 32)?;
            top.scoped("status", |status| status.signal("done", 1))
        })
    }

    fn sample(&self, values: &mut Vec<u64>) {
        values.extend([
            u64::from(self.clk),
            u64::from(self.count),
            u64::from(self.done),
        ]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DriverConfig, Preset};
    use crate::driver::Driver;

    #[test]
    fn finishes_after_requested_edges() {
        let summary = Driver::untraced(Counter::new(), DriverConfig::default())
            .command_args(["sim", "+cycles=3"])
            .run()
            .unwrap();
        // rising edges land on evals 1, 3 and 5
        assert_eq!(summary.evals, 5);
    }

    #[test]
    fn runs_without_a_driven_clock() {
        let config = DriverConfig {
            preset: Preset::SelfTimed,
            ..DriverConfig::default()
        };
        let summary = Driver::untraced(Counter::new(), config)
            .command_args(["sim", "+cycles=3"])
            .run()
            .unwrap();
        assert_eq!(summary.evals, 5);
    }

    #[test]
    fn free_runs_only_when_undriven() {
        let mut ctx = SimContext::new();
        let mut counter = Counter::with_limit(10);
        counter.set_clock(true);
        counter.eval(&mut ctx);
        assert!(counter.clock());
        // nobody touched clk since the last eval
        counter.eval(&mut ctx);
        assert!(!counter.clock());
        counter.eval(&mut ctx);
        assert!(counter.clock());
        assert_eq!(counter.count(), 2);
    }

    #[test]
    fn zero_cycles_finishes_immediately() {
        let summary = Driver::untraced(Counter::with_limit(0), DriverConfig::default())
            .run()
            .unwrap();
        assert_eq!(summary.evals, 1);
    }

    #[test]
    fn bad_plusarg_keeps_default() {
        let mut ctx = SimContext::new();
        ctx.command_args(["sim", "+cycles=lots"]);
        let mut counter = Counter::new();
        counter.eval(&mut ctx);
        assert_eq!(counter.limit, DEFAULT_CYCLES);
        assert!(!ctx.got_finish());
    }
}
