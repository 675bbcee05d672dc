//! Addressing properties of the equal-area grid, checked exhaustively on
//! small and medium grids.

use grid_locator::{GeoPos, GridLocator, RowCol};

fn grids() -> Vec<GridLocator> {
    vec![
        GridLocator::from_cell_size(2003.8),
        GridLocator::with_row_count(10.5),
        GridLocator::with_row_count(10.3),
        GridLocator::with_row_count(180.0),
        GridLocator::from_cell_size(46.4),
    ]
}

// ============================================================================
// Bijection
// ============================================================================

#[test]
fn test_every_cell_center_maps_to_a_distinct_consecutive_index() {
    for locator in grids() {
        let mut expected = 0u64;
        for row in 0..locator.rows() {
            for col in 0..locator.num_columns(row) {
                let index = locator.bin_index(locator.cell_center(row, col));
                assert_eq!(
                    index, expected,
                    "row {} col {} (row_count {})",
                    row, col, locator.row_count()
                );
                expected += 1;
            }
        }
        assert_eq!(expected, locator.total_bin_count());
    }
}

#[test]
fn test_total_is_sum_of_columns() {
    for locator in grids() {
        let sum: u64 = (0..locator.rows())
            .map(|r| locator.num_columns(r) as u64)
            .sum();
        assert_eq!(sum, locator.total_bin_count());
    }
}

// ============================================================================
// Round trips
// ============================================================================

#[test]
fn test_row_col_round_trip() {
    for locator in grids() {
        for row in 0..locator.rows() {
            for col in 0..locator.num_columns(row) {
                let rc = RowCol::new(row, col);
                assert_eq!(locator.row_col(locator.center_of(rc)), rc);
            }
        }
    }
}

#[test]
fn test_index_round_trip() {
    for locator in grids() {
        for index in 0..locator.total_bin_count() {
            let pos = locator.lat_lon(index).unwrap();
            assert_eq!(locator.bin_index(pos), index);
        }
    }
}

#[test]
fn test_index_of_matches_row_col_of_index() {
    let locator = GridLocator::with_row_count(180.0);
    for index in 0..locator.total_bin_count() {
        let rc = locator.row_col_of_index(index).unwrap();
        assert!(locator.is_valid_position(rc));
        assert_eq!(locator.index_of(rc), Some(index));
    }
}

// ============================================================================
// Area preservation
// ============================================================================

#[test]
fn test_columns_non_increasing_towards_poles() {
    for locator in grids() {
        let equator = locator.row_of(0.0);
        for row in equator..locator.rows() - 1 {
            assert!(
                locator.num_columns(row) >= locator.num_columns(row + 1),
                "north row {}",
                row
            );
        }
        for row in 1..=equator {
            assert!(
                locator.num_columns(row) >= locator.num_columns(row - 1),
                "south row {}",
                row
            );
        }
    }
}

#[test]
fn test_cell_widths_are_roughly_equal_in_km() {
    let locator = GridLocator::with_row_count(180.0);
    let equator_width = 360.0 / locator.num_columns(locator.row_of(0.0)) as f64;
    // Within +-5% of the equator width, away from the polar rows
    for row in 10..170 {
        let lat = locator.row_center_lat(row);
        let width = 360.0 / locator.num_columns(row) as f64 * lat.to_radians().cos();
        assert!(
            (width / equator_width - 1.0).abs() < 0.05,
            "row {} width ratio {}",
            row,
            width / equator_width
        );
    }
}

// ============================================================================
// Edge positions
// ============================================================================

#[test]
fn test_edge_positions_map_inside_grid() {
    let locator = GridLocator::from_cell_size(2003.8);
    for &(lat, lon) in &[
        (90.0, 180.0),
        (90.0, -180.0),
        (-90.0, 180.0),
        (-90.0, -180.0),
        (0.0, 180.0),
        (0.0, -180.0),
    ] {
        let rc = locator.row_col(GeoPos::new(lat, lon));
        assert!(locator.is_valid_position(rc), "({}, {})", lat, lon);
        assert!(locator.bin_index(GeoPos::new(lat, lon)) < locator.total_bin_count());
    }
}

#[test]
fn test_locator_shared_across_threads() {
    let locator = std::sync::Arc::new(GridLocator::with_row_count(180.0));
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let locator = locator.clone();
            std::thread::spawn(move || {
                let lat = -80.0 + t as f64 * 40.0;
                locator.bin_index(GeoPos::new(lat, 10.0))
            })
        })
        .collect();
    let mut indices: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    indices.dedup();
    assert_eq!(indices.len(), 4);
}
