//! Backend for a Verilator-generated top module.
//!
//! `build.rs` renders `cpp/templates/sim_model.h.template` for the module named
//! by `SIM_TOP_MODULE` and compiles this bridge against it. The shim owns a
//! `VerilatedContext`, so finish state and time stay per instance.

use camino::Utf8Path;
use cxx::UniquePtr;

use crate::context::SimContext;
use crate::error::{Result, SimError};
use crate::model::Model;
use crate::trace::Tracer;

#[cxx::bridge(namespace = "simdriver")]
mod ffi {
    unsafe extern "C++" {
        include!("simdriver/sim_model.h");

        type SimModel;

        fn new_sim_model(args: &Vec<String>) -> UniquePtr<SimModel>;

        fn trace_ever_on(self: Pin<&mut SimModel>, on: bool);

        fn open_trace(self: Pin<&mut SimModel>, path: &str, depth: i32);
        fn dump_trace(&self, time: u64);
        fn close_trace(self: Pin<&mut SimModel>);
        fn trace_open(&self) -> bool;

        fn eval(self: Pin<&mut SimModel>);
        fn final_eval(self: Pin<&mut SimModel>);

        fn get_clk(&self) -> u8;
        fn set_clk(self: Pin<&mut SimModel>, value: u8);
        fn set_time(self: Pin<&mut SimModel>, time: u64);
        fn got_finish(&self) -> bool;
    }
}

pub struct VerilatedModel {
    inner: UniquePtr<ffi::SimModel>,
}

impl VerilatedModel {
    /// Build the top module. `args` reach the `VerilatedContext` before the
    /// top is constructed.
    pub fn new(args: &[String]) -> Result<Self> {
        let inner = ffi::new_sim_model(&args.to_vec());
        if inner.is_null() {
            return Err(SimError::ModelInit {
                reason: "shim returned a null model".to_string(),
            });
        }
        Ok(Self { inner })
    }
}

impl Model for VerilatedModel {
    type Tracer = VerilatedTracer;

    fn clock(&self) -> bool {
        self.inner.get_clk() != 0
    }

    fn set_clock(&mut self, level: bool) {
        self.inner.pin_mut().set_clk(u8::from(level));
    }

    fn eval(&mut self, ctx: &mut SimContext) {
        self.inner.pin_mut().set_time(ctx.time());
        self.inner.pin_mut().eval();
        if self.inner.got_finish() {
            ctx.finish();
        }
    }

    fn finalize(&mut self, _ctx: &mut SimContext) {
        self.inner.pin_mut().final_eval();
    }
}

/// `VerilatedFstC` owned by the shim, driven from Rust.
#[derive(Debug, Default)]
pub struct VerilatedTracer {
    open: bool,
}

impl Tracer<VerilatedModel> for VerilatedTracer {
    fn open(
        &mut self,
        model: &mut VerilatedModel,
        ctx: &mut SimContext,
        path: &Utf8Path,
        depth: u32,
    ) -> Result<()> {
        let depth = i32::try_from(depth).unwrap_or(i32::MAX);
        model.inner.pin_mut().trace_ever_on(ctx.is_trace_ever_on());
        model.inner.pin_mut().open_trace(path.as_str(), depth);
        self.open = model.inner.trace_open();
        if !self.open {
            return Err(SimError::TraceIo(std::io::Error::other(format!(
                "VerilatedFstC could not open {path}"
            ))));
        }
        Ok(())
    }

    fn dump(&mut self, model: &VerilatedModel, time: u64) -> Result<()> {
        if !self.open {
            return Err(SimError::TraceNotOpen);
        }
        model.inner.dump_trace(time);
        Ok(())
    }

    fn close(&mut self, model: &mut VerilatedModel) -> Result<()> {
        if !self.open {
            return Err(SimError::TraceNotOpen);
        }
        model.inner.pin_mut().close_trace();
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
