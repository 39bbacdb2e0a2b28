//! Console text formatting
//!
//! Shared helpers for the console writers: outcome colouring and durations.

use std::time::Duration;

use crate::models::Outcome;

/// Formats outcomes and numbers for console output
#[derive(Clone, Copy, Debug)]
pub struct OutcomeFormatter {
    colorize: bool,
}

impl OutcomeFormatter {
    pub fn new() -> Self {
        Self { colorize: true }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    /// Outcome display name, coloured by severity
    pub fn outcome(&self, outcome: Outcome) -> String {
        let name = outcome.name();
        if !self.colorize {
            return name.to_string();
        }
        let code = if outcome.is_failure() {
            "31"
        } else if outcome == Outcome::Passed {
            "32"
        } else {
            "33"
        };
        format!("\x1b[{code}m{name}\x1b[0m")
    }

    /// A count, highlighted in red when it is a non-zero failure count
    pub fn failure_count(&self, count: usize) -> String {
        if self.colorize && count > 0 {
            format!("\x1b[31m{count}\x1b[0m")
        } else {
            count.to_string()
        }
    }
}

impl Default for OutcomeFormatter {
    fn default() -> Self {
        Self::new()
    }
}

/// Human-friendly duration, e.g. `12.3 secs` or `2 mins 05 secs`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 120.0 {
        format!("{secs:.1} secs")
    } else {
        let total = duration.as_secs();
        format!("{} mins {:02} secs", total / 60, total % 60)
    }
}

/// Integer percentage of `part` in `total`, 0 when `total` is 0
pub fn percentage(part: usize, total: usize) -> usize {
    if total == 0 {
        0
    } else {
        part * 100 / total
    }
}
