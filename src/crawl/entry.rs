use chrono::{DateTime, TimeDelta, Utc};

use crate::feed::{FeedSource, RawEntry};
use crate::storage::NormalizedEntry;

/// Maximum age an entry may have to be kept: `now - published_at < window`.
///
/// The comparison is strict, so an entry exactly one window old is dropped.
/// Entries dated in the future have a negative age and always pass; hiding
/// them is the aggregator's job, not the crawler's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecencyWindow(TimeDelta);

impl RecencyWindow {
    pub const CRAWL_DAYS: i64 = 8;
    pub const REPAIR_DAYS: i64 = 7;

    pub fn new(window: TimeDelta) -> Self {
        Self(window)
    }

    /// Panics if `days` overflows a `TimeDelta`; use [`Self::try_days`] for
    /// values from outside the program.
    pub fn days(days: i64) -> Self {
        Self(TimeDelta::days(days))
    }

    pub fn try_days(days: i64) -> Option<Self> {
        TimeDelta::try_days(days).map(Self)
    }

    pub fn crawl() -> Self {
        Self::days(Self::CRAWL_DAYS)
    }

    pub fn repair() -> Self {
        Self::days(Self::REPAIR_DAYS)
    }

    pub fn duration(&self) -> TimeDelta {
        self.0
    }

    pub fn contains(&self, published_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(published_at) < self.0
    }
}

impl Default for RecencyWindow {
    fn default() -> Self {
        Self::crawl()
    }
}

/// Trims the entry and attaches the feed it came from.
pub fn normalize(raw: RawEntry, source: &FeedSource) -> NormalizedEntry {
    NormalizedEntry {
        published_at: raw.published_at,
        title: raw.title.trim().to_string(),
        url: raw.url.trim().to_string(),
        feed_title: source.title.clone(),
        feed_site_url: source.site_url.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_exactly_window_old_is_excluded() {
        let window = RecencyWindow::crawl();
        let boundary = now() - TimeDelta::days(8);
        assert!(!window.contains(boundary, now()));
    }

    #[test]
    fn test_just_inside_window_is_retained() {
        let window = RecencyWindow::crawl();
        let inside = now() - TimeDelta::days(8) + TimeDelta::seconds(1);
        assert!(window.contains(inside, now()));
    }

    #[test]
    fn test_older_than_window_is_excluded() {
        assert!(!RecencyWindow::repair().contains(now() - TimeDelta::days(30), now()));
    }

    #[test]
    fn test_future_entries_pass_the_filter() {
        let window = RecencyWindow::crawl();
        assert!(window.contains(now() + TimeDelta::days(3), now()));
    }

    #[test]
    fn test_repair_window_is_narrower() {
        let seven_and_a_half = now() - TimeDelta::hours(7 * 24 + 12);
        assert!(RecencyWindow::crawl().contains(seven_and_a_half, now()));
        assert!(!RecencyWindow::repair().contains(seven_and_a_half, now()));
    }

    #[test]
    fn test_normalize_trims_and_attaches_source() {
        let source = FeedSource {
            title: "Acme Engineering".to_string(),
            fetch_url: "https://acme.example.com/feed".to_string(),
            site_url: "https://acme.example.com".to_string(),
        };
        let raw = RawEntry {
            published_at: now(),
            title: "\n  Zero-downtime deploys  \t".to_string(),
            url: "  https://acme.example.com/deploys\n".to_string(),
        };

        let entry = normalize(raw, &source);
        assert_eq!(entry.title, "Zero-downtime deploys");
        assert_eq!(entry.url, "https://acme.example.com/deploys");
        assert_eq!(entry.feed_title, "Acme Engineering");
        assert_eq!(entry.feed_site_url, "https://acme.example.com");
        assert_eq!(entry.published_at, now());
    }
}
