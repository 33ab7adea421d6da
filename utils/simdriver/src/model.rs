use crate::context::SimContext;

/// Top-level model instance driven by [`Driver`](crate::Driver).
///
/// Generated models expose a clock input and a single evaluation step that
/// settles combinational logic and propagates clocked state once. Models
/// request termination with [`SimContext::finish`].
pub trait Model {
    /// Tracer bound to this model when trace capture is compiled in.
    type Tracer: crate::trace::Tracer<Self> + Default;

    fn clock(&self) -> bool;

    fn set_clock(&mut self, level: bool);

    fn eval(&mut self, ctx: &mut SimContext);

    /// Run end-of-simulation blocks. Called once, after the tracer is closed.
    fn finalize(&mut self, _ctx: &mut SimContext) {}
}
