use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use eda_common::db::parser::{def, lef};
use eda_common::db::writer::{write_annotated_design, write_failed_nets, write_layer_info};
use eda_common::db::Design;
use eda_common::util::config::Config;
use eda_common::util::{check, logger};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[arg(short, long, default_value_t = 2)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read tech + placed design, run the full router, write the annotated
    /// design and failed-routes file.
    Route {
        /// Overrides the config's def_file/output_def/failed_file with
        /// `<basename>.def` / `<basename>.routed.def` / `<basename>.failed.txt`.
        design_basename: Option<String>,
    },
    /// Re-load an annotated design and check the properties that don't
    /// require re-running the router (shorts, connectivity).
    Check { annotated_design: String },
    /// Print the layer table in the `-i` info format.
    LayerInfo,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init();
    log::set_max_level(logger::verbosity_to_level(args.verbose));

    let mut config = load_config(&args.config)?;

    match args.command {
        Commands::Route { design_basename } => {
            if let Some(base) = &design_basename {
                config.input.def_file = format!("{base}.def");
                config.input.output_def = format!("{base}.routed.def");
                config.input.failed_file = format!("{base}.failed.txt");
            }
            run_route(&config)
        }
        Commands::Check { annotated_design } => run_check(&config, &annotated_design),
        Commands::LayerInfo => run_layer_info(&config),
    }
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        log::info!("loading configuration from {:?}", path);
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file: {e}"))?;
        toml::from_str(&text).map_err(|e| anyhow::anyhow!("failed to parse config TOML: {e}"))
    } else {
        log::warn!("configuration file {:?} not found, using internal defaults", path);
        Ok(Config::default())
    }
}

fn validate_lef_paths(config: &Config) -> anyhow::Result<()> {
    for lef in &config.input.lef_files {
        if !Path::new(lef).exists() {
            return Err(anyhow::anyhow!("input LEF file missing: {lef}"));
        }
    }
    Ok(())
}

fn load_design(config: &Config) -> anyhow::Result<Design> {
    validate_lef_paths(config)?;
    if !Path::new(&config.input.def_file).exists() {
        return Err(anyhow::anyhow!(
            "input DEF file missing: {}",
            config.input.def_file
        ));
    }

    let mut design = Design::new();
    for lef_path in &config.input.lef_files {
        log::info!("parsing LEF: {lef_path}");
        lef::parse(&mut design, lef_path)
            .map_err(|e| anyhow::anyhow!("invalid LEF syntax in '{lef_path}': {e}"))?;
    }

    log::info!("parsing DEF: {}", config.input.def_file);
    def::parse(&mut design, &config.input.def_file)
        .map_err(|e| anyhow::anyhow!("invalid DEF syntax in '{}': {e}", config.input.def_file))?;

    if design.layers.is_empty() {
        return Err(anyhow::anyhow!("no routing layers defined"));
    }
    Ok(design)
}

fn prepare_output_dir(path_str: &str) -> anyhow::Result<()> {
    if let Some(parent) = Path::new(path_str).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            log::info!("creating output directory: {:?}", parent);
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn run_route(config: &Config) -> anyhow::Result<()> {
    let mut design = load_design(config)?;
    prepare_output_dir(&config.input.output_def)?;

    log::info!("starting routing");
    let report = eda_router::route(&mut design, config)
        .map_err(|e| anyhow::anyhow!("routing failed: {e}"))?;

    log::info!(
        "routed {}, failed {}, abandoned {}",
        report.routed.len(),
        report.failed.len(),
        report.abandoned.len()
    );

    log::info!("writing annotated design to {}", config.input.output_def);
    write_annotated_design(&design, &config.input.output_def)?;

    let mut unrouted = report.failed.clone();
    unrouted.extend(report.abandoned.iter().copied());
    if !unrouted.is_empty() {
        log::warn!("writing {} failed nets to {}", unrouted.len(), config.input.failed_file);
        write_failed_nets(&design, &unrouted, &config.input.failed_file)?;
    }

    if let Err(e) = check::run(&design) {
        log::error!("post-route verification failed: {e}");
        std::process::exit(2);
    }

    if !unrouted.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_check(config: &Config, annotated_design: &str) -> anyhow::Result<()> {
    validate_lef_paths(config)?;
    if !Path::new(annotated_design).exists() {
        return Err(anyhow::anyhow!("annotated design missing: {annotated_design}"));
    }

    let mut design = Design::new();
    for lef_path in &config.input.lef_files {
        log::info!("parsing LEF: {lef_path}");
        lef::parse(&mut design, lef_path)
            .map_err(|e| anyhow::anyhow!("invalid LEF syntax in '{lef_path}': {e}"))?;
    }
    log::info!("parsing annotated design: {annotated_design}");
    def::parse(&mut design, annotated_design)
        .map_err(|e| anyhow::anyhow!("invalid DEF syntax in '{annotated_design}': {e}"))?;

    match check::run(&design) {
        Ok(()) => {
            log::info!("PASS: {annotated_design}");
            Ok(())
        }
        Err(e) => {
            log::error!("FAIL: {annotated_design}: {e}");
            std::process::exit(1);
        }
    }
}

fn run_layer_info(config: &Config) -> anyhow::Result<()> {
    let design = load_design(config)?;
    let path = "/dev/stdout";
    write_layer_info(&design, path)?;
    Ok(())
}
