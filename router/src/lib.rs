pub mod antenna;
pub mod cleanup;
pub mod connect;
pub mod grid;
pub mod mask;
pub mod obstruct;
pub mod orchestrator;
pub mod pool;
pub mod search;

use log::info;

use eda_common::db::Design;
use eda_common::util::config::Config;
use eda_common::util::error::Result;

pub use orchestrator::RoutingReport;

/// Top-level entry point: C1 grid allocation, C2 obstruction analysis, C5
/// (which calls C3/C4/C6 per net), C7 cleanup, and optional C8 antenna
/// repair. Mirrors spec §2's data-flow paragraph.
pub fn route(design: &mut Design, config: &Config) -> Result<RoutingReport> {
    let mut grid = grid::GridModel::allocate(design)?;
    info!("grid allocated: {}x{}x{}", grid.nx, grid.ny, grid.num_layers);

    obstruct::run(&mut grid, design)?;

    let report = orchestrator::run(design, &mut grid, config);

    cleanup::run(design, &grid);

    let mut state = search::SearchState::new(&grid);
    let violations = antenna::run(design, &mut grid, &mut state, &config.search, &config.antenna);
    if !violations.is_empty() {
        info!("{} antenna violations remain unfixed", violations.len());
    }

    Ok(report)
}
