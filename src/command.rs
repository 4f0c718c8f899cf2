//! Keystroke-to-action translation.
//!
//! The command surface is a handful of single characters read from standard
//! input. Quit and burst are case-insensitive; the gain and exposure keys
//! use case to pick the direction.

use crate::machine::Action;

/// Translate one input character into a domain action.
///
/// Unrecognized characters (including newlines) map to [`Action::NoAction`].
#[must_use]
pub fn parse_key(key: char) -> Action {
    match key {
        'q' | 'Q' => Action::Quit,
        'b' | 'B' => Action::BurstGrab,
        'g' => Action::GainDecrease,
        'G' => Action::GainIncrease,
        'e' => Action::ExposureDecrease,
        'E' => Action::ExposureIncrease,
        _ => Action::NoAction,
    }
}
