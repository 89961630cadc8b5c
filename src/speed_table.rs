//! Temperature to fan-speed mapping.
//!
//! A [`SpeedTable`] is an ordered list of half-open temperature ranges, each
//! carrying a fixed duty cycle. Lookup is a step function: the first range
//! containing the temperature wins, and anything the table does not cover
//! runs the fans at full speed.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sensors::Temperature;

/// Fan duty cycle in percent, always within `0..=100`.
///
/// # Example
///
/// ```
/// use ipmi_fand::speed_table::SpeedPercent;
///
/// let speed = SpeedPercent::try_from(50).unwrap();
/// assert_eq!(speed.get(), 50);
/// assert!(SpeedPercent::try_from(101).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SpeedPercent(u8);

impl SpeedPercent {
    /// Full speed, used whenever the table has no answer.
    pub const MAX: Self = Self(100);

    pub const fn get(self) -> u8 {
        self.0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("fan speed {0}% is outside 0..=100")]
pub struct SpeedOutOfRange(pub u8);

impl TryFrom<u8> for SpeedPercent {
    type Error = SpeedOutOfRange;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value > 100 {
            return Err(SpeedOutOfRange(value));
        }
        Ok(Self(value))
    }
}

impl From<SpeedPercent> for u8 {
    fn from(value: SpeedPercent) -> Self {
        value.0
    }
}

impl fmt::Display for SpeedPercent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row of the table: `[min_temp, max_temp) -> speed`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedRange {
    /// Inclusive lower bound in °C.
    pub min_temp: f32,
    /// Exclusive upper bound in °C.
    pub max_temp: f32,
    /// Duty cycle applied inside the range.
    pub speed: SpeedPercent,
}

impl SpeedRange {
    pub fn contains(&self, temp: f32) -> bool {
        self.min_temp <= temp && temp < self.max_temp
    }
}

/// Reasons a list of ranges is refused as a speed table.
#[derive(Debug, Error, PartialEq)]
pub enum SpeedTableError {
    #[error("speed table is empty")]
    Empty,

    #[error("range #{index} has a non-finite bound")]
    NonFinite { index: usize },

    #[error("range #{index} is inverted: min_temp {min_temp} > max_temp {max_temp}")]
    Inverted {
        index: usize,
        min_temp: f32,
        max_temp: f32,
    },

    #[error("range #{index} starts at {min_temp} but the previous range ends at {prev_max}")]
    Overlap {
        index: usize,
        min_temp: f32,
        prev_max: f32,
    },
}

/// Validated, immutable speed table.
///
/// Built once at startup; every tick reads it and nothing writes to it.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedTable {
    ranges: Vec<SpeedRange>,
}

impl SpeedTable {
    /// Validates `ranges` and builds the table.
    ///
    /// Ranges must be finite, non-inverted, sorted ascending and
    /// non-overlapping. Gaps between ranges are accepted (they fall back to
    /// full speed) and reported by [`SpeedTable::gaps`].
    pub fn new(ranges: Vec<SpeedRange>) -> Result<Self, SpeedTableError> {
        if ranges.is_empty() {
            return Err(SpeedTableError::Empty);
        }

        for (index, range) in ranges.iter().enumerate() {
            if !range.min_temp.is_finite() || !range.max_temp.is_finite() {
                return Err(SpeedTableError::NonFinite { index });
            }
            if range.min_temp > range.max_temp {
                return Err(SpeedTableError::Inverted {
                    index,
                    min_temp: range.min_temp,
                    max_temp: range.max_temp,
                });
            }
        }

        if let Some((index, pair)) = ranges
            .windows(2)
            .enumerate()
            .find(|(_, pair)| pair[1].min_temp < pair[0].max_temp)
        {
            return Err(SpeedTableError::Overlap {
                index: index + 1,
                min_temp: pair[1].min_temp,
                prev_max: pair[0].max_temp,
            });
        }

        Ok(Self { ranges })
    }

    pub fn ranges(&self) -> &[SpeedRange] {
        &self.ranges
    }

    /// Upper bound of the last range; everything at or above it runs at 100%.
    pub fn upper_bound(&self) -> f32 {
        self.ranges.last().map_or(f32::NEG_INFINITY, |r| r.max_temp)
    }

    /// Uncovered intervals between consecutive ranges, as `(from, to)`.
    pub fn gaps(&self) -> Vec<(f32, f32)> {
        self.ranges
            .windows(2)
            .filter(|pair| pair[1].min_temp > pair[0].max_temp)
            .map(|pair| (pair[0].max_temp, pair[1].min_temp))
            .collect()
    }

    /// Looks up the speed for `temp`. See [`map_speed`].
    pub fn speed_for(&self, temp: Temperature) -> SpeedPercent {
        map_speed(temp, self)
    }
}

impl Default for SpeedTable {
    fn default() -> Self {
        Self {
            ranges: default_ranges(),
        }
    }
}

impl fmt::Display for SpeedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for range in &self.ranges {
            writeln!(
                f,
                "[{:>5.1}, {:>5.1}) -> {:>3}%",
                range.min_temp,
                range.max_temp,
                range.speed.get()
            )?;
        }
        write!(f, ">= {:.1} -> 100%", self.upper_bound())
    }
}

/// The stock table for the HR650X chassis.
pub fn default_ranges() -> Vec<SpeedRange> {
    [
        (0.0, 5.0, 2), // chassis powered off
        (5.0, 40.0, 10),
        (40.0, 45.0, 14),
        (45.0, 50.0, 20),
        (50.0, 60.0, 50),
        (60.0, 80.0, 80),
        (80.0, 100.0, 100),
    ]
    .into_iter()
    .map(|(min_temp, max_temp, speed)| SpeedRange {
        min_temp,
        max_temp,
        speed: SpeedPercent(speed),
    })
    .collect()
}

/// Maps a temperature to a fan speed.
///
/// Pure and total: returns the speed of the first range whose half-open
/// interval contains `temp`, or [`SpeedPercent::MAX`] when none does
/// (above the table, negative, inside a gap or NaN).
pub fn map_speed(temp: Temperature, table: &SpeedTable) -> SpeedPercent {
    table
        .ranges
        .iter()
        .find(|range| range.contains(temp.0))
        .map_or(SpeedPercent::MAX, |range| range.speed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn range(min_temp: f32, max_temp: f32, speed: u8) -> SpeedRange {
        SpeedRange {
            min_temp,
            max_temp,
            speed: SpeedPercent::try_from(speed).unwrap(),
        }
    }

    fn speed(temp: f32) -> u8 {
        map_speed(Temperature(temp), &SpeedTable::default()).get()
    }

    #[test]
    fn speed_percent_rejects_values_above_100() {
        assert_eq!(SpeedPercent::try_from(100).unwrap().get(), 100);
        assert_eq!(SpeedPercent::try_from(0).unwrap().get(), 0);
        assert_eq!(SpeedPercent::try_from(101), Err(SpeedOutOfRange(101)));
    }

    #[test]
    fn speed_percent_deserializes_with_validation() {
        let ok: SpeedPercent = serde_yaml::from_str("42").unwrap();
        assert_eq!(ok.get(), 42);
        assert!(serde_yaml::from_str::<SpeedPercent>("150").is_err());
    }

    #[test]
    fn lower_bound_is_inclusive_upper_bound_is_exclusive() {
        assert_eq!(speed(45.0), 20);
        assert_eq!(speed(49.99), 20);
        assert_eq!(speed(50.0), 50);
        assert_eq!(speed(0.0), 2);
        assert_eq!(speed(5.0), 10);
    }

    #[test]
    fn default_table_lookups() {
        assert_eq!(speed(2.5), 2);
        assert_eq!(speed(30.0), 10);
        assert_eq!(speed(42.0), 14);
        assert_eq!(speed(52.3), 50);
        assert_eq!(speed(75.0), 80);
        assert_eq!(speed(95.0), 100);
    }

    #[test]
    fn out_of_table_temperatures_run_full_speed() {
        assert_eq!(speed(100.0), 100);
        assert_eq!(speed(250.0), 100);
        assert_eq!(speed(-0.5), 100);
        assert_eq!(speed(-273.15), 100);
        assert_eq!(speed(f32::NAN), 100);
        assert_eq!(speed(f32::INFINITY), 100);
    }

    #[test]
    fn gaps_fall_back_to_full_speed() {
        let table = SpeedTable::new(vec![range(0.0, 40.0, 10), range(50.0, 60.0, 30)]).unwrap();

        assert_eq!(table.gaps(), vec![(40.0, 50.0)]);
        assert_eq!(map_speed(Temperature(45.0), &table).get(), 100);
        assert_eq!(map_speed(Temperature(55.0), &table).get(), 30);
    }

    #[test]
    fn first_matching_range_wins_for_degenerate_ranges() {
        let table = SpeedTable::new(vec![
            range(0.0, 10.0, 10),
            range(10.0, 10.0, 99),
            range(10.0, 20.0, 20),
        ])
        .unwrap();

        // an empty range never matches
        assert_eq!(map_speed(Temperature(10.0), &table).get(), 20);
    }

    #[test]
    fn table_rejects_empty() {
        assert_eq!(SpeedTable::new(vec![]), Err(SpeedTableError::Empty));
    }

    #[test]
    fn table_rejects_inverted_bounds() {
        let err = SpeedTable::new(vec![range(0.0, 10.0, 10), range(30.0, 20.0, 20)]).unwrap_err();
        assert_eq!(
            err,
            SpeedTableError::Inverted {
                index: 1,
                min_temp: 30.0,
                max_temp: 20.0
            }
        );
    }

    #[test]
    fn table_rejects_overlap() {
        let err = SpeedTable::new(vec![range(0.0, 50.0, 10), range(45.0, 60.0, 20)]).unwrap_err();
        assert_eq!(
            err,
            SpeedTableError::Overlap {
                index: 1,
                min_temp: 45.0,
                prev_max: 50.0
            }
        );
    }

    #[test]
    fn table_rejects_unsorted_ranges() {
        let result = SpeedTable::new(vec![range(50.0, 60.0, 50), range(0.0, 50.0, 10)]);
        assert!(matches!(result, Err(SpeedTableError::Overlap { index: 1, .. })));
    }

    #[test]
    fn table_rejects_non_finite_bounds() {
        let result = SpeedTable::new(vec![range(0.0, f32::INFINITY, 10)]);
        assert_eq!(result, Err(SpeedTableError::NonFinite { index: 0 }));

        let result = SpeedTable::new(vec![range(f32::NAN, 10.0, 10)]);
        assert_eq!(result, Err(SpeedTableError::NonFinite { index: 0 }));
    }

    #[test]
    fn default_table_is_valid_and_contiguous() {
        let table = SpeedTable::new(default_ranges()).unwrap();
        assert_eq!(table, SpeedTable::default());
        assert!(table.gaps().is_empty());
        assert_eq!(table.upper_bound(), 100.0);
        assert_eq!(table.ranges()[0].min_temp, 0.0);
    }

    #[test]
    fn display_lists_ranges_and_fallback() {
        let table = SpeedTable::new(vec![range(0.0, 40.0, 10)]).unwrap();
        let rendered = table.to_string();
        assert!(rendered.contains("[  0.0,  40.0) ->  10%"));
        assert!(rendered.ends_with(">= 40.0 -> 100%"));
    }

    proptest! {
        #[test]
        fn every_temperature_inside_a_range_maps_to_its_speed(
            idx in 0usize..7,
            frac in 0.0f32..1.0f32,
        ) {
            let table = SpeedTable::default();
            let r = table.ranges()[idx];
            let temp = r.min_temp + (r.max_temp - r.min_temp) * frac;
            prop_assume!(temp < r.max_temp);
            prop_assert_eq!(map_speed(Temperature(temp), &table), r.speed);
        }

        #[test]
        fn anything_at_or_above_the_table_is_full_speed(temp in 100.0f32..10_000.0f32) {
            prop_assert_eq!(map_speed(Temperature(temp), &SpeedTable::default()), SpeedPercent::MAX);
        }

        #[test]
        fn negative_temperatures_are_full_speed(temp in -10_000.0f32..-0.001f32) {
            prop_assert_eq!(map_speed(Temperature(temp), &SpeedTable::default()), SpeedPercent::MAX);
        }

        #[test]
        fn mapping_is_deterministic(temp in any::<f32>()) {
            let table = SpeedTable::default();
            let first = map_speed(Temperature(temp), &table);
            let second = map_speed(Temperature(temp), &table);
            prop_assert_eq!(first, second);
            prop_assert!(first.get() <= 100);
        }

        #[test]
        fn speed_is_monotonic_over_the_default_table(a in 0.0f32..100.0f32, b in 0.0f32..100.0f32) {
            let table = SpeedTable::default();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(map_speed(Temperature(lo), &table) <= map_speed(Temperature(hi), &table));
        }
    }
}
