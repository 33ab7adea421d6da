use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use simdriver::{Driver, DriverConfig};

#[cfg(not(feature = "verilator"))]
fn top_model(_args: &[String]) -> Result<simdriver::models::Counter> {
    Ok(simdriver::models::Counter::new())
}

#[cfg(feature = "verilator")]
fn top_model(args: &[String]) -> Result<simdriver::verilated::VerilatedModel> {
    simdriver::verilated::VerilatedModel::new(args).context("Failed to create Verilator model")
}

fn main() -> Result<()> {
    env_logger::init();

    let cwd = Utf8PathBuf::from_path_buf(std::env::current_dir()?)
        .map_err(|path| anyhow::anyhow!("working directory is not UTF-8: {}", path.display()))?;
    let config = DriverConfig::discover(&cwd).context("Failed to load driver config")?;

    // Runtime flags belong to the model; none are interpreted here.
    let args: Vec<String> = std::env::args_os()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();

    let summary = Driver::new(top_model(&args)?, config)
        .command_args(args)
        .run()
        .context("Simulation failed")?;

    if let Some(path) = &summary.trace {
        log::info!("waveform written to {path}");
    }
    Ok(())
}
