use anyhow::Result;

fn main() -> Result<()> {
    println!("cargo:rerun-if-changed=build.rs");

    #[cfg(feature = "verilator")]
    verilator::build()?;

    Ok(())
}

#[cfg(feature = "verilator")]
mod verilator {
    use std::env;
    use std::fs;
    use std::path::PathBuf;

    use anyhow::{Context, Result};
    use xshell::{Shell, cmd};

    const TEMPLATE: &str = include_str!("cpp/templates/sim_model.h.template");

    fn render(template: &str, top_module: &str) -> String {
        template.replace("{{top_module}}", top_module)
    }

    pub fn build() -> Result<()> {
        println!("cargo:rerun-if-changed=cpp/templates/");
        println!("cargo:rerun-if-env-changed=SIM_TOP_MODULE");
        println!("cargo:rerun-if-env-changed=SIM_VERILATED_DIR");

        let top_module = env::var("SIM_TOP_MODULE")
            .context("SIM_TOP_MODULE must name the verilated top module")?;
        let verilated_dir = PathBuf::from(
            env::var("SIM_VERILATED_DIR")
                .context("SIM_VERILATED_DIR must point at the Verilator output directory")?,
        );
        if !verilated_dir.join(format!("V{top_module}.h")).exists() {
            anyhow::bail!(
                "V{top_module}.h not found in {}; run Verilator with --cc --trace-fst first",
                verilated_dir.display()
            );
        }

        let out_dir = PathBuf::from(env::var("OUT_DIR")?);
        let header_dir = out_dir.join("simdriver");
        fs::create_dir_all(&header_dir)?;
        fs::write(header_dir.join("sim_model.h"), render(TEMPLATE, &top_module))?;

        let sh = Shell::new()?;
        let verilator_root = cmd!(sh, "verilator --getenv VERILATOR_ROOT")
            .read()
            .context("Failed to get VERILATOR_ROOT")?;
        let verilator_include = PathBuf::from(verilator_root.trim()).join("include");

        cxx_build::bridge("src/verilated.rs")
            .include(&out_dir)
            .include(&verilated_dir)
            .include(&verilator_include)
            .include(verilator_include.join("vltstd"))
            .flag_if_supported("-std=gnu++17")
            .flag_if_supported("-w")
            .compile("simdriver_verilated");

        println!("cargo:rustc-link-search=native={}", verilated_dir.display());
        println!("cargo:rustc-link-lib=static=V{top_module}");
        println!("cargo:rustc-link-lib=static=verilated");
        println!("cargo:rustc-link-lib=z");

        Ok(())
    }
}
