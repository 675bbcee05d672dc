//! CLI tool to inspect a bin grid.
//!
//! Prints the derived row count, bin totals and, optionally, the per-row
//! table of center latitude, column count and first bin index.
//!
//! Usage:
//!   cargo run --bin grid-info -- --cell-size 9.28
//!   cargo run --bin grid-info -- --row-count 10 --table
//!   cargo run --bin grid-info -- --cell-size 2003.8 --lat 58 --lon -13

use clap::Parser;
use grid_locator::{GeoPos, GridLocator};

#[derive(Parser, Debug)]
#[command(name = "grid-info")]
#[command(about = "Print the layout of an equal-area bin grid")]
struct Args {
    /// Nominal cell size in kilometres
    #[arg(short, long, conflicts_with = "row_count")]
    cell_size: Option<f64>,

    /// Row count spanning 180 degrees of latitude
    #[arg(short, long)]
    row_count: Option<f64>,

    /// Print the per-row table
    #[arg(short, long)]
    table: bool,

    /// Latitude of a position to locate
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Longitude of a position to locate
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lon: Option<f64>,
}

fn main() {
    let args = Args::parse();

    let locator = match (args.cell_size, args.row_count) {
        (_, Some(rows)) => GridLocator::with_row_count(rows),
        (Some(size), None) => GridLocator::from_cell_size(size),
        (None, None) => GridLocator::from_cell_size(9.28),
    };

    println!("Equal-area bin grid");
    println!("===================");
    println!("Row count:       {}", locator.row_count());
    println!("Rows:            {}", locator.rows());
    println!("Row height:      {:.6} deg", locator.row_height());
    println!("Total bins:      {}", locator.total_bin_count());
    println!(
        "Equator columns: {}",
        locator.num_columns(locator.row_of(0.0))
    );

    if args.table {
        println!();
        println!("{:>8} {:>12} {:>10} {:>14}", "row", "center_lat", "columns", "first_index");
        for row in 0..locator.rows() {
            println!(
                "{:>8} {:>12.6} {:>10} {:>14}",
                row,
                locator.row_center_lat(row),
                locator.num_columns(row),
                locator.first_index_of_row(row).unwrap_or_default()
            );
        }
    }

    if let (Some(lat), Some(lon)) = (args.lat, args.lon) {
        let pos = GeoPos::new(lat, lon);
        let rc = locator.row_col(pos);
        let index = locator.bin_index(pos);
        let center = locator.center_of(rc);
        println!();
        println!("Position {} -> row {}, col {}, bin {}", pos, rc.row, rc.col, index);
        println!("Cell center: {}", center);
    }
}
