//! Best-effort classification of tool failures from captured output.

use crate::job::ErrorClass;

const AUTH_MARKERS: &[&str] = &[
    "unauthorized",
    "401",
    "403",
    "forbidden",
    "cookies",
    "login",
    "sign in",
    "authentication",
    "session expired",
];

const UNAVAILABLE_MARKERS: &[&str] = &[
    "404",
    "not found",
    "no longer available",
    "not available",
    "unavailable",
    "does not exist",
    "removed",
    "region",
];

const NETWORK_MARKERS: &[&str] = &[
    "connection",
    "timed out",
    "timeout",
    "network",
    "dns",
    "resolve",
    "ssl",
    "tls",
    "reset by peer",
    "temporary failure",
];

/// Inspect the tail of a failed tool's output and guess why it failed.
///
/// Purely advisory: markers are matched case-insensitively against the
/// captured lines, most specific class first. Anything unrecognized is
/// [`ErrorClass::Unknown`].
pub fn classify_failure<'a>(lines: impl IntoIterator<Item = &'a str>) -> ErrorClass {
    let mut class = ErrorClass::Unknown;
    for line in lines {
        let lower = line.to_lowercase();
        if AUTH_MARKERS.iter().any(|m| lower.contains(m)) {
            return ErrorClass::Auth;
        }
        if class == ErrorClass::Unknown
            && UNAVAILABLE_MARKERS.iter().any(|m| lower.contains(m))
        {
            class = ErrorClass::ContentUnavailable;
        }
        if class == ErrorClass::Unknown && NETWORK_MARKERS.iter().any(|m| lower.contains(m)) {
            class = ErrorClass::Network;
        }
    }
    class
}
