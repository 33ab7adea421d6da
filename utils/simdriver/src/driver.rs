use std::ops::{Deref, DerefMut};

use camino::Utf8PathBuf;

use crate::config::{DriverConfig, Preset};
use crate::context::SimContext;
use crate::error::Result;
use crate::model::Model;
use crate::trace::{DefaultTracer, NullTracer, Tracer};

/// Where the driver keeps the model instance.
enum Instance<M> {
    Inline(M),
    Boxed(Box<M>),
}

impl<M> Deref for Instance<M> {
    type Target = M;

    fn deref(&self) -> &M {
        match self {
            Instance::Inline(model) => model,
            Instance::Boxed(model) => model,
        }
    }
}

impl<M> DerefMut for Instance<M> {
    fn deref_mut(&mut self) -> &mut M {
        match self {
            Instance::Inline(model) => model,
            Instance::Boxed(model) => model,
        }
    }
}

/// Outcome of a run that reached the finish condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Number of evaluation steps performed.
    pub evals: u64,
    /// Logical time when the loop exited.
    pub end_time: u64,
    /// Waveform written during the run, if tracing was active.
    pub trace: Option<Utf8PathBuf>,
}

/// Runs a model until it signals completion.
///
/// The tracer field is declared before the model so that, if the driver is
/// dropped without reaching [`Driver::run`]'s teardown, the tracer still goes
/// first.
pub struct Driver<M, T> {
    ctx: SimContext,
    tracer: T,
    instance: Instance<M>,
    config: DriverConfig,
}

impl<M: Model> Driver<M, DefaultTracer<M>>
where
    DefaultTracer<M>: Tracer<M> + Default,
{
    /// Driver with the model's own tracer, or with [`NullTracer`] when trace
    /// capture is compiled out.
    pub fn new(model: M, config: DriverConfig) -> Self {
        Self::with_tracer(model, Default::default(), config)
    }
}

impl<M: Model> Driver<M, NullTracer> {
    pub fn untraced(model: M, config: DriverConfig) -> Self {
        Self::with_tracer(model, NullTracer, config)
    }
}

impl<M: Model, T: Tracer<M>> Driver<M, T> {
    pub fn with_tracer(model: M, tracer: T, config: DriverConfig) -> Self {
        let instance = match config.preset {
            Preset::Clocked => Instance::Inline(model),
            Preset::SelfTimed => Instance::Boxed(Box::new(model)),
        };
        Self {
            ctx: SimContext::new(),
            tracer,
            instance,
            config,
        }
    }

    /// Forward process arguments to the model runtime, verbatim.
    pub fn command_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ctx.command_args(args);
        self
    }

    pub fn context(&self) -> &SimContext {
        &self.ctx
    }

    pub fn model(&self) -> &M {
        &self.instance
    }

    pub fn is_boxed(&self) -> bool {
        matches!(self.instance, Instance::Boxed(_))
    }

    /// Run until the model calls [`SimContext::finish`].
    ///
    /// The tracer is closed and the model finalized on every exit path,
    /// before the model is dropped.
    pub fn run(mut self) -> Result<RunSummary> {
        log::info!(
            "starting simulation ({:?}, {} args)",
            self.config.preset,
            self.ctx.args().len()
        );

        let outcome = self.open_trace().and_then(|()| self.run_loop());
        let trace = self.teardown();
        let evals = outcome?;
        let trace = trace?;

        log::info!("finished after {evals} evals at t={}", self.ctx.time());
        Ok(RunSummary {
            evals,
            end_time: self.ctx.time(),
            trace,
        })
    }

    fn open_trace(&mut self) -> Result<()> {
        if !self.tracer.is_enabled() {
            return Ok(());
        }
        self.ctx.trace_ever_on(true);
        let trace = &self.config.trace;
        self.tracer
            .open(&mut self.instance, &mut self.ctx, &trace.path, trace.depth)?;
        if self.tracer.is_open() {
            log::info!("tracing to {} (depth {})", trace.path, trace.depth);
        }
        Ok(())
    }

    fn run_loop(&mut self) -> Result<u64> {
        let mut evals = 0;
        while !self.ctx.got_finish() {
            if self.config.preset == Preset::Clocked {
                let level = self.instance.clock();
                self.instance.set_clock(!level);
            }
            self.instance.eval(&mut self.ctx);
            evals += 1;
            self.tracer.dump(&self.instance, self.ctx.time())?;
            self.ctx.advance();
        }
        Ok(evals)
    }

    fn teardown(&mut self) -> Result<Option<Utf8PathBuf>> {
        let mut trace = None;
        let closed = if self.tracer.is_open() {
            trace = Some(self.config.trace.path.clone());
            self.tracer.close(&mut self.instance)
        } else {
            Ok(())
        };
        self.instance.finalize(&mut self.ctx);
        closed.map(|()| trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Countdown {
        clk: bool,
        left: u32,
        toggles: u32,
        finalized: bool,
    }

    impl Countdown {
        fn new(left: u32) -> Self {
            Self {
                clk: false,
                left,
                toggles: 0,
                finalized: false,
            }
        }
    }

    impl Model for Countdown {
        type Tracer = NullTracer;

        fn clock(&self) -> bool {
            self.clk
        }

        fn set_clock(&mut self, level: bool) {
            self.toggles += 1;
            self.clk = level;
        }

        fn eval(&mut self, ctx: &mut SimContext) {
            self.left -= 1;
            if self.left == 0 {
                ctx.finish();
            }
        }

        fn finalize(&mut self, _ctx: &mut SimContext) {
            self.finalized = true;
        }
    }

    #[test]
    fn clocked_run_toggles_once_per_eval() {
        let driver = Driver::untraced(Countdown::new(5), DriverConfig::default());
        assert!(!driver.is_boxed());
        let summary = driver.run().unwrap();
        assert_eq!(summary.evals, 5);
        assert_eq!(summary.end_time, 5);
        assert_eq!(summary.trace, None);
    }

    #[test]
    fn self_timed_leaves_clock_alone() {
        let config = DriverConfig {
            preset: Preset::SelfTimed,
            ..DriverConfig::default()
        };
        let mut driver = Driver::untraced(Countdown::new(3), config);
        assert!(driver.is_boxed());
        driver.run_loop().unwrap();
        assert_eq!(driver.model().toggles, 0);
        assert!(!driver.model().clk);
    }

    #[test]
    fn clock_alternates() {
        let mut driver = Driver::untraced(Countdown::new(4), DriverConfig::default());
        driver.run_loop().unwrap();
        assert_eq!(driver.model().toggles, 4);
        assert!(!driver.model().clk);
        driver.teardown().unwrap();
        assert!(driver.model().finalized);
    }

    #[derive(Default)]
    struct FlagTracer {
        open: bool,
    }

    impl Tracer<Countdown> for FlagTracer {
        fn open(
            &mut self,
            _: &mut Countdown,
            ctx: &mut SimContext,
            _: &camino::Utf8Path,
            _: u32,
        ) -> Result<()> {
            assert!(ctx.is_trace_ever_on());
            self.open = true;
            Ok(())
        }

        fn dump(&mut self, _: &Countdown, _: u64) -> Result<()> {
            Ok(())
        }

        fn close(&mut self, _: &mut Countdown) -> Result<()> {
            self.open = false;
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    #[test]
    fn trace_capability_only_for_enabled_tracers() {
        let mut driver = Driver::untraced(Countdown::new(1), DriverConfig::default());
        driver.open_trace().unwrap();
        assert!(!driver.context().is_trace_ever_on());

        let mut driver =
            Driver::with_tracer(Countdown::new(1), FlagTracer::default(), DriverConfig::default());
        driver.open_trace().unwrap();
        assert!(driver.context().is_trace_ever_on());
        assert!(driver.tracer.is_open());
    }

    #[test]
    fn default_tracer_follows_trace_feature() {
        let tracer = std::any::type_name::<DefaultTracer<crate::models::Counter>>();
        if cfg!(feature = "trace") {
            assert!(tracer.ends_with("FstTracer"), "{tracer}");
        } else {
            assert!(tracer.ends_with("NullTracer"), "{tracer}");
        }
    }

    #[test]
    fn args_reach_the_context() {
        let driver = Driver::untraced(Countdown::new(1), DriverConfig::default())
            .command_args(["sim", "+seed=3"]);
        assert_eq!(driver.context().plusarg("seed"), Some("3"));
    }
}
