//! Select command implementation.

use crate::core::config::Config;
use crate::lattice::{BravaisLattice, LatticeSolutionSet, TabulatedSymmetry, UnitCell};
use crate::programs::BravaisSummary;
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

/// Run lattice selection over a Bravais-settings summary.
#[derive(Args, Debug)]
pub struct SelectArgs {
    /// Summary file written by the Bravais-settings refinement.
    pub summary: PathBuf,

    /// Required lattice, e.g. "tP".
    #[arg(long)]
    pub lattice: Option<BravaisLattice>,

    /// Required cell "a,b,c,alpha,beta,gamma"; needs --lattice.
    #[arg(long, requires = "lattice")]
    pub cell: Option<UnitCell>,

    /// Read selection tolerances from this config file.
    #[arg(long)]
    pub tolerances: Option<PathBuf>,
}

/// Run the select command.
pub fn run_select(args: SelectArgs) -> Result<()> {
    let config = match &args.tolerances {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let summary = BravaisSummary::from_file(&args.summary)
        .with_context(|| format!("failed to load {:?}", args.summary))?;

    let mut solutions = LatticeSolutionSet::with_thresholds(
        config.selection.thresholds(),
        config.selection.tolerance(),
    );
    let candidates = summary.candidates(&TabulatedSymmetry);
    match args.lattice {
        Some(_) => solutions.ingest_constrained(candidates)?,
        None => solutions.ingest(candidates)?,
    }

    println!(
        "{:>4}  {:<3}  {:>8}  {:>8}  {:>6}  cell",
        "rank", "lat", "ang", "rmsd", "min_cc"
    );
    for c in solutions.candidates() {
        println!(
            "{:>4}  {:<3}  {:>8.3}  {:>8.4}  {:>6.3}  {}",
            c.rank, c.lattice.as_str(), c.angular_deviation, c.rmsd, c.min_correlation, c.unit_cell
        );
    }
    println!();

    let winner = solutions.select_best(args.lattice, args.cell.as_ref())?;
    println!(
        "✓ Selected {} (rank {}): {} [{}]",
        winner.lattice, winner.rank, winner.unit_cell, winner.change_of_basis
    );

    let alternatives: Vec<_> = solutions
        .alternatives()
        .filter(|alt| alt.lattice != winner.lattice)
        .collect();
    if !alternatives.is_empty() {
        println!("  Alternatives:");
        for alt in alternatives {
            println!(
                "    {} (rank {}, {:.3}°): {}",
                alt.lattice, alt.rank, alt.angular_deviation, alt.unit_cell
            );
        }
    }
    Ok(())
}
