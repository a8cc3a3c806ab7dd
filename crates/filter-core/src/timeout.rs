//! Session timeout values
//!
//! A timeout is either a bounded duration or `none`. The textual form accepts
//! an optional unit suffix: `90`, `1.5m`, `2h`, `1d`, `1w`.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::error::ConfigError;

/// Smallest allowed session duration
pub const MIN_SESSION_TIMEOUT: Duration = Duration::from_secs(1);

/// Maximum time a session may run before escalation begins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTimeout {
    /// Sessions expire after this duration
    Limited(Duration),
    /// Sessions never expire
    Unbounded,
}

impl SessionTimeout {
    /// Deadline for a session started at `start`.
    ///
    /// Returns `None` when the session never expires, including limits so
    /// large that the deadline is not representable.
    pub fn deadline_from(&self, start: Instant) -> Option<Instant> {
        match self {
            SessionTimeout::Limited(limit) => start.checked_add(*limit),
            SessionTimeout::Unbounded => None,
        }
    }

    /// Raise a limit below [`MIN_SESSION_TIMEOUT`] to the minimum.
    ///
    /// Returns true if the value was changed.
    pub fn clamp_to_minimum(&mut self) -> bool {
        match self {
            SessionTimeout::Limited(limit) if *limit < MIN_SESSION_TIMEOUT => {
                *limit = MIN_SESSION_TIMEOUT;
                true
            }
            _ => false,
        }
    }
}

impl Default for SessionTimeout {
    fn default() -> Self {
        SessionTimeout::Limited(Duration::from_secs(86_400))
    }
}

impl FromStr for SessionTimeout {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.eq_ignore_ascii_case("none") {
            return Ok(SessionTimeout::Unbounded);
        }

        let invalid = || ConfigError::InvalidTimeout(s.to_string());

        let (number, multiplier) = match text.char_indices().last() {
            Some((idx, unit)) if unit.is_ascii_alphabetic() => {
                let multiplier = match unit {
                    's' => 1.0,
                    'm' => 60.0,
                    'h' => 3_600.0,
                    'd' => 86_400.0,
                    'w' => 604_800.0,
                    _ => return Err(invalid()),
                };
                (text[..idx].trim_end(), multiplier)
            }
            Some(_) => (text, 1.0),
            None => return Err(invalid()),
        };

        let value: f64 = number.parse().map_err(|_| invalid())?;
        if !value.is_finite() || value < 0.0 {
            return Err(invalid());
        }

        // Too large to represent: effectively forever
        Ok(Duration::try_from_secs_f64(value * multiplier)
            .map(SessionTimeout::Limited)
            .unwrap_or(SessionTimeout::Unbounded))
    }
}

impl fmt::Display for SessionTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionTimeout::Limited(limit) => {
                write!(f, "{} s", significant(limit.as_secs_f64(), 5))
            }
            SessionTimeout::Unbounded => write!(f, "none"),
        }
    }
}

/// Format like C's `%.{digits}g`: fixed notation unless the exponent is
/// below -4 or at least `digits`, trailing zeros removed.
fn significant(value: f64, digits: usize) -> String {
    if value == 0.0 || !value.is_finite() {
        return value.to_string();
    }

    // Exponent after rounding to `digits` significant digits
    let scientific = format!("{:.*e}", digits - 1, value);
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return scientific;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if exponent < -4 || exponent >= digits as i32 {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exponent.abs())
    } else {
        let decimals = (digits as i32 - 1 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn trim_fraction(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}
