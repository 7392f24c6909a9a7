//! Finished/unfinished classification of feed events.

use crate::RawEvent;

/// Full time, after extra time, after penalties.
pub const TERMINAL_STATUSES: [&str; 3] = ["FT", "AET", "PEN"];

/// Normalized status code: top-level `status`, falling back to the nested
/// fixture status, trimmed and upper-cased.
pub fn status_code(event: &RawEvent) -> Option<String> {
    let top = event.status.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let nested = || {
        event
            .fixture
            .as_ref()
            .and_then(|f| f.status.as_ref())
            .and_then(|s| s.short.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };
    top.or_else(nested).map(str::to_ascii_uppercase)
}

/// Unknown and in-progress statuses are never finished.
pub fn is_finished(event: &RawEvent) -> bool {
    status_code(event)
        .map(|code| TERMINAL_STATUSES.contains(&code.as_str()))
        .unwrap_or(false)
}
