//! Vote tally rules.
//!
//! Each interpreted reply adds its weight to the option it supports; the
//! option with the greatest total wins and ties go to the lower option
//! number. With no votes at all option 1 wins.

use serde::Serialize;

/// Option chosen when nobody voted.
pub const DEFAULT_WINNING_OPTION: u8 = 1;

/// Summed weights per option and the resulting winner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tally {
    /// Total weight per option in thousandths, index 0 is option 1.
    pub totals_milli: Vec<u64>,
    /// Number of interpreted replies counted.
    pub counted: usize,
    /// The 1-based winning option.
    pub winning_option: u8,
}

impl Tally {
    /// Total weight for the 1-based `option` as a float.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn total(&self, option: u8) -> f64 {
        usize::from(option)
            .checked_sub(1)
            .and_then(|i| self.totals_milli.get(i))
            .map_or(0.0, |milli| *milli as f64 / 1000.0)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_milli(weight: f64) -> u64 {
    if weight.is_finite() && weight > 0.0 {
        (weight * 1000.0).round() as u64
    } else {
        0
    }
}

/// Sums `(option, weight)` pairs over `option_count` options.
///
/// Weights are summed as integer thousandths so the result does not depend
/// on the order of the input. Pairs naming an option outside
/// `1..=option_count` are ignored.
pub fn tally(votes: impl IntoIterator<Item = (u8, f64)>, option_count: u8) -> Tally {
    let mut totals_milli = vec![0_u64; usize::from(option_count)];
    let mut counted = 0;
    for (option, weight) in votes {
        let Some(slot) = usize::from(option)
            .checked_sub(1)
            .and_then(|i| totals_milli.get_mut(i))
        else {
            continue;
        };
        *slot += to_milli(weight);
        counted += 1;
    }

    let mut winning_option = DEFAULT_WINNING_OPTION;
    let mut best = 0_u64;
    for (index, total) in totals_milli.iter().enumerate() {
        // Strictly greater keeps ties on the lower option.
        if *total > best {
            best = *total;
            winning_option = u8::try_from(index + 1).unwrap_or(DEFAULT_WINNING_OPTION);
        }
    }

    Tally {
        totals_milli,
        counted,
        winning_option,
    }
}
