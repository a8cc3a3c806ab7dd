//! Shared serialization/deserialization utilities for configuration

/// Helper module for [`SessionTimeout`](crate::timeout::SessionTimeout)
/// serialization.
///
/// Accepts either a number of seconds or a string in the timeout syntax
/// (`"90"`, `"5m"`, `"1d"`, `"none"`). Bounded values are written back as
/// whole seconds when possible, `"none"` otherwise.
///
/// # Example
///
/// ```ignore
/// use serde::{Deserialize, Serialize};
/// use filter_core::timeout::SessionTimeout;
///
/// #[derive(Serialize, Deserialize)]
/// struct Config {
///     #[serde(with = "filter_core::config::serde_utils::session_timeout")]
///     timeout: SessionTimeout,
/// }
/// ```
pub mod session_timeout {
    use serde::{self, de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    use crate::timeout::SessionTimeout;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(f64),
        Text(String),
    }

    /// Serialize a timeout as seconds, or `"none"`
    pub fn serialize<S>(timeout: &SessionTimeout, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match timeout {
            SessionTimeout::Limited(limit) if limit.subsec_nanos() == 0 => {
                serializer.serialize_u64(limit.as_secs())
            }
            SessionTimeout::Limited(limit) => serializer.serialize_f64(limit.as_secs_f64()),
            SessionTimeout::Unbounded => serializer.serialize_str("none"),
        }
    }

    /// Deserialize a timeout from seconds or timeout syntax
    pub fn deserialize<'de, D>(deserializer: D) -> Result<SessionTimeout, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) if secs.is_finite() && secs >= 0.0 => Ok(
                Duration::try_from_secs_f64(secs)
                    .map(SessionTimeout::Limited)
                    .unwrap_or(SessionTimeout::Unbounded),
            ),
            Raw::Seconds(secs) => Err(D::Error::custom(format!("invalid timeout {}", secs))),
            Raw::Text(text) => text.parse().map_err(D::Error::custom),
        }
    }
}
