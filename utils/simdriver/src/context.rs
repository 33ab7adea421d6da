/// Per-run simulation state shared between the driver and the model.
///
/// Holds what a generated model's runtime would otherwise keep in globals:
/// the logical time counter, the finish flag raised by the design, and the
/// command-line arguments the model may inspect for plusargs.
#[derive(Debug, Default, Clone)]
pub struct SimContext {
    time: u64,
    finished: bool,
    args: Vec<String>,
    trace_ever_on: bool,
}

impl SimContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the process arguments verbatim. The first element is expected to
    /// be the program name, as with `argv`.
    pub fn command_args<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Return the first argument starting with `+prefix`, unmodified.
    pub fn plus_match(&self, prefix: &str) -> Option<&str> {
        self.args
            .iter()
            .skip(1)
            .filter_map(|arg| arg.strip_prefix('+').map(|rest| (arg, rest)))
            .find(|(_, rest)| rest.starts_with(prefix))
            .map(|(arg, _)| arg.as_str())
    }

    /// Value of `+name=value`. A bare `+name` yields an empty string.
    pub fn plusarg(&self, name: &str) -> Option<&str> {
        self.args.iter().skip(1).find_map(|arg| {
            let rest = arg.strip_prefix('+')?.strip_prefix(name)?;
            if rest.is_empty() {
                Some("")
            } else {
                rest.strip_prefix('=')
            }
        })
    }

    /// Current logical time, in half clock periods since the run started.
    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn advance(&mut self) {
        self.time += 1;
    }

    /// Called by the model when the design requests termination.
    pub fn finish(&mut self) {
        if !self.finished {
            log::debug!("finish requested at t={}", self.time);
        }
        self.finished = true;
    }

    pub fn got_finish(&self) -> bool {
        self.finished
    }

    pub fn trace_ever_on(&mut self, on: bool) {
        self.trace_ever_on = on;
    }

    pub fn is_trace_ever_on(&self) -> bool {
        self.trace_ever_on
    }
}
