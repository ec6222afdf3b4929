#![forbid(unsafe_code)]

//! End-to-end scenarios driving the whole engine through one realistic
//! workload: station telemetry grouped, summarized, diffed across days and
//! looked up again, with flat, row-table and multi-column keys mixed.

use ki_funcs::{count_table, indices, multiplicity, rank, Located, MissingPolicy};
use ki_groupby::GroupBy;
use ki_sets::{
    contains, difference, exclusive, in_, intersection, union, unique, SetOptions, UniqueOptions,
};
use ki_types::{Axis, Key, KeyColumn, KeyTable, Keys};

fn stations() -> Keys {
    Keys::from_utf8(vec!["north", "south", "north", "east", "south", "north"])
}

const TEMPS: [f64; 6] = [12.0, 15.0, 14.0, 9.0, 17.0, 10.0];

// ---------------------------------------------------------------------------
// Scenario 1: per-station statistics over one day of readings
// ---------------------------------------------------------------------------

#[test]
fn e2e_station_statistics() {
    let grouped = GroupBy::new(stations(), Axis(0)).expect("group_by");

    assert_eq!(
        grouped.unique(),
        Keys::from_utf8(vec!["east", "north", "south"])
    );
    assert_eq!(grouped.count(), vec![1, 3, 2]);

    let (_, sums) = grouped.sum(&TEMPS).expect("sum");
    assert_eq!(sums, vec![9.0, 36.0, 32.0]);

    let (_, means) = grouped.mean(&TEMPS, None).expect("mean");
    assert_eq!(means, vec![9.0, 12.0, 16.0]);

    let (_, medians) = grouped.median(&TEMPS, true).expect("median");
    assert_eq!(medians, vec![9.0, 12.0, 16.0]);

    let (_, lows) = grouped.min(&TEMPS).expect("min");
    let (_, highs) = grouped.max(&TEMPS).expect("max");
    assert_eq!(lows, vec![9.0, 10.0, 15.0]);
    assert_eq!(highs, vec![9.0, 14.0, 17.0]);

    // positions of the extreme readings, in original coordinates
    let (_, coldest) = grouped.argmin(&TEMPS).expect("argmin");
    let (_, hottest) = grouped.argmax(&TEMPS).expect("argmax");
    assert_eq!(coldest, vec![3, 5, 1]);
    assert_eq!(hottest, vec![3, 2, 4]);

    let (_, spread) = grouped.var(&TEMPS, None).expect("var");
    assert_eq!(spread[0], 0.0);
    assert!((spread[1] - 8.0 / 3.0).abs() < 1e-12);
    assert_eq!(spread[2], 1.0);

    let readings = grouped.split_as_list(&TEMPS).expect("split");
    assert_eq!(
        readings,
        vec![vec![9.0], vec![12.0, 14.0, 10.0], vec![15.0, 17.0]]
    );
}

// ---------------------------------------------------------------------------
// Scenario 2: which stations reported on which day
// ---------------------------------------------------------------------------

#[test]
fn e2e_station_coverage_across_days() {
    let day1 = Keys::from_utf8(vec!["south", "east", "north", "east"]);
    let day2 = Keys::from_utf8(vec!["west", "north", "south"]);
    let opts = SetOptions::default();

    assert_eq!(
        union(&[day1.clone(), day2.clone()], Axis(0), opts).expect("union"),
        Keys::from_utf8(vec!["east", "north", "south", "west"])
    );
    assert_eq!(
        intersection(&[day1.clone(), day2.clone()], Axis(0), opts).expect("intersection"),
        Keys::from_utf8(vec!["north", "south"])
    );
    assert_eq!(
        difference(&[day1.clone(), day2.clone()], Axis(0), opts).expect("difference"),
        Keys::from_utf8(vec!["east"])
    );
    assert_eq!(
        exclusive(&[day1.clone(), day2.clone()], Axis(0), opts).expect("exclusive"),
        Keys::from_utf8(vec!["east", "west"])
    );

    let watchlist = Keys::from_utf8(vec!["west", "north"]);
    assert_eq!(
        contains(&day1, &watchlist, Axis(0)).expect("contains"),
        vec![false, true]
    );
    assert_eq!(
        in_(&day1, &day2, Axis(0)).expect("in_"),
        vec![true, false, true, false]
    );
}

// ---------------------------------------------------------------------------
// Scenario 3: looking readings up again by key
// ---------------------------------------------------------------------------

#[test]
fn e2e_lookup_and_occurrence_counts() {
    let tags = Keys::from_i64(vec![40, 21, 33, 21, 7]);

    let found = indices(
        tags.clone(),
        &Keys::from_i64(vec![33, 7]),
        Axis(0),
        MissingPolicy::Raise,
    )
    .expect("indices");
    assert_eq!(found, Located::Dense(vec![2, 4]));

    let masked = indices(
        tags.clone(),
        &Keys::from_i64(vec![21, 99]),
        Axis(0),
        MissingPolicy::Mask,
    )
    .expect("indices");
    assert_eq!(masked, Located::Masked(vec![Some(1), None]));

    assert_eq!(
        multiplicity(tags.clone(), Axis(0)).expect("multiplicity"),
        vec![1, 2, 1, 2, 1]
    );
    assert_eq!(rank(tags, Axis(0)).expect("rank"), vec![4, 1, 3, 2, 0]);

    // joint occurrence counts over (station, shift) label pairs
    let station = vec![Key::from(1_i64), Key::from(1_i64), Key::from(2_i64), Key::from(2_i64), Key::from(2_i64)];
    let shift = vec![Key::from(1_i64), Key::from(2_i64), Key::from(1_i64), Key::from(2_i64), Key::from(2_i64)];
    let (axes, counts) = count_table(&[station, shift]).expect("count_table");
    assert_eq!(axes[0], vec![Key::from(1_i64), Key::from(2_i64)]);
    assert_eq!(counts.shape(), &[2, 2]);
    assert_eq!(counts.get(&[0, 0]), 1);
    assert_eq!(counts.get(&[1, 1]), 2);
}

// ---------------------------------------------------------------------------
// Scenario 4: composite keys, as row tables and as parallel columns
// ---------------------------------------------------------------------------

#[test]
fn e2e_composite_keys() {
    let visits = Keys::Table(
        KeyTable::from_rows(vec![
            vec![Key::from("north"), Key::from(1_i64)],
            vec![Key::from("south"), Key::from(2_i64)],
            vec![Key::from("north"), Key::from(1_i64)],
            vec![Key::from("north"), Key::from(2_i64)],
        ])
        .expect("visits"),
    );

    let result = unique(
        visits.clone(),
        Axis(0),
        UniqueOptions {
            return_index: false,
            return_inverse: true,
            return_count: true,
        },
    )
    .expect("unique");
    assert_eq!(result.unique.len(), 3);
    assert_eq!(result.unique.row(0), vec![Key::from("north"), Key::from(1_i64)]);
    assert_eq!(result.inverse, Some(vec![0, 2, 0, 1]));
    assert_eq!(result.count, Some(vec![2, 1, 1]));

    let probe = Keys::Table(
        KeyTable::from_rows(vec![
            vec![Key::from("south"), Key::from(2_i64)],
            vec![Key::from("south"), Key::from(1_i64)],
        ])
        .expect("probe"),
    );
    assert_eq!(in_(&probe, &visits, Axis(0)).expect("in_"), vec![true, false]);

    // the same grouping expressed as two parallel columns
    let columns = Keys::Columns(vec![
        KeyColumn::Flat(vec![
            Key::from("north"),
            Key::from("south"),
            Key::from("north"),
            Key::from("north"),
        ]),
        KeyColumn::Flat(vec![
            Key::from(1_i64),
            Key::from(2_i64),
            Key::from(1_i64),
            Key::from(2_i64),
        ]),
    ]);
    let grouped = GroupBy::new(columns, Axis(0)).expect("group_by");
    assert_eq!(grouped.groups(), 3);
    assert_eq!(grouped.count(), vec![2, 1, 1]);
    let (_, totals) = grouped.sum(&[4.0, 7.0, 6.0, 5.0]).expect("sum");
    assert_eq!(totals, vec![10.0, 5.0, 7.0]);
}
