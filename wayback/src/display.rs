//! Synthesized display fields: plausible view counts and "N units ago" text.

use jiff::Timestamp;
use rand::Rng;

const SECS_PER_DAY: i64 = 86_400;

/// View-count ranges by video age, for ordinary channel uploads.
///
/// Each row is `(max age in days, min views, max views)`; the last row catches
/// everything older.
const CHANNEL_VIEW_RANGES: [(i64, u64, u64); 5] = [
    (1, 100, 5_000),
    (7, 1_000, 50_000),
    (30, 5_000, 250_000),
    (365, 10_000, 1_000_000),
    (i64::MAX, 50_000, 5_000_000),
];

/// Same as [`CHANNEL_VIEW_RANGES`], for results of the "viral" queries.
const VIRAL_VIEW_RANGES: [(i64, u64, u64); 5] = [
    (1, 10_000, 500_000),
    (7, 100_000, 2_000_000),
    (30, 500_000, 10_000_000),
    (365, 1_000_000, 50_000_000),
    (i64::MAX, 5_000_000, 200_000_000),
];

/// Whole days from `published_at` to `reference`, never negative.
pub fn days_between(published_at: Timestamp, reference: Timestamp) -> i64 {
    (reference.duration_since(published_at).as_secs() / SECS_PER_DAY).max(0)
}

/// The `[min, max]` view interval for a video of the given age.
pub fn view_range(days_since_upload: i64, viral: bool) -> (u64, u64) {
    let table = if viral {
        &VIRAL_VIEW_RANGES
    } else {
        &CHANNEL_VIEW_RANGES
    };
    table
        .iter()
        .find(|(max_days, _, _)| days_since_upload <= *max_days)
        .map(|&(_, min, max)| (min, max))
        .unwrap_or((table[4].1, table[4].2))
}

/// Draws a view count for a video of the given age.
///
/// The count lands between 20% and 100% of the way through the age bucket's
/// range.
pub fn synthesize_views(days_since_upload: i64, viral: bool, rng: &mut impl Rng) -> u64 {
    let (min, max) = view_range(days_since_upload, viral);
    let multiplier: f64 = rng.random_range(0.2..=1.0);
    (min as f64 + multiplier * (max - min) as f64).floor() as u64
}

/// Formats a count with `K`/`M` suffixes, e.g. `950`, `1.2K`, `3M`.
pub fn format_count(count: u64) -> String {
    fn scaled(count: u64, divisor: f64, suffix: &str) -> String {
        let text = format!("{:.1}", count as f64 / divisor);
        let text = text.strip_suffix(".0").unwrap_or(&text);
        format!("{text}{suffix}")
    }

    match count {
        0..1_000 => count.to_string(),
        1_000..1_000_000 => scaled(count, 1_000.0, "K"),
        _ => scaled(count, 1_000_000.0, "M"),
    }
}

pub fn format_views(count: u64) -> String {
    format!("{} views", format_count(count))
}

/// Renders the time from `published_at` to `reference` the way the site does,
/// using the coarsest unit that counts at least one.
pub fn relative_age(published_at: Timestamp, reference: Timestamp) -> String {
    let secs = reference.duration_since(published_at).as_secs().max(0);
    let days = secs / SECS_PER_DAY;

    let (count, unit) = if days >= 365 {
        (days / 365, "year")
    } else if days >= 30 {
        (days / 30, "month")
    } else if days >= 7 {
        (days / 7, "week")
    } else if days >= 1 {
        (days, "day")
    } else if secs >= 3_600 {
        (secs / 3_600, "hour")
    } else if secs >= 60 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };

    if count == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{count} {unit}s ago")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::SignedDuration;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn reference() -> Timestamp {
        "2012-09-01T12:00:00Z".parse().unwrap()
    }

    fn ago(duration: SignedDuration) -> String {
        relative_age(reference() - duration, reference())
    }

    #[test]
    fn relative_age_units() {
        assert_eq!(ago(SignedDuration::ZERO), "0 seconds ago");
        assert_eq!(ago(SignedDuration::from_secs(1)), "1 second ago");
        assert_eq!(ago(SignedDuration::from_secs(59)), "59 seconds ago");
        assert_eq!(ago(SignedDuration::from_mins(1)), "1 minute ago");
        assert_eq!(ago(SignedDuration::from_mins(45)), "45 minutes ago");
        assert_eq!(ago(SignedDuration::from_hours(1)), "1 hour ago");
        assert_eq!(ago(SignedDuration::from_hours(23)), "23 hours ago");
        assert_eq!(ago(SignedDuration::from_hours(24)), "1 day ago");
        assert_eq!(ago(SignedDuration::from_hours(6 * 24)), "6 days ago");
        assert_eq!(ago(SignedDuration::from_hours(7 * 24)), "1 week ago");
        assert_eq!(ago(SignedDuration::from_hours(29 * 24)), "4 weeks ago");
        assert_eq!(ago(SignedDuration::from_hours(30 * 24)), "1 month ago");
        assert_eq!(ago(SignedDuration::from_hours(364 * 24)), "12 months ago");
        assert_eq!(ago(SignedDuration::from_hours(365 * 24)), "1 year ago");
        assert_eq!(ago(SignedDuration::from_hours(800 * 24)), "2 years ago");
    }

    #[test]
    fn same_day_is_never_a_day() {
        let text = ago(SignedDuration::from_hours(23) + SignedDuration::from_mins(59));
        assert_eq!(days_between(reference() - SignedDuration::from_hours(23), reference()), 0);
        assert_eq!(text, "23 hours ago");
    }

    #[test]
    fn future_uploads_clamp_to_zero() {
        let later = reference() + SignedDuration::from_hours(48);
        assert_eq!(relative_age(later, reference()), "0 seconds ago");
        assert_eq!(days_between(later, reference()), 0);
    }

    #[test]
    fn count_formatting() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1_000), "1K");
        assert_eq!(format_count(1_234), "1.2K");
        assert_eq!(format_count(15_070), "15.1K");
        assert_eq!(format_count(999_000), "999K");
        assert_eq!(format_count(1_000_000), "1M");
        assert_eq!(format_count(2_580_000), "2.6M");
        assert_eq!(format_views(1_500), "1.5K views");
    }

    #[test]
    fn ranges_by_age() {
        assert_eq!(view_range(0, false), (100, 5_000));
        assert_eq!(view_range(1, false), (100, 5_000));
        assert_eq!(view_range(2, false), (1_000, 50_000));
        assert_eq!(view_range(365, false), (10_000, 1_000_000));
        assert_eq!(view_range(366, false), (50_000, 5_000_000));
        assert_eq!(view_range(3, true), (100_000, 2_000_000));
    }

    #[test]
    fn synthesized_views_stay_in_the_upper_band() {
        let mut rng = StdRng::seed_from_u64(7);
        for days in [0, 5, 20, 200, 2_000] {
            for viral in [false, true] {
                let (min, max) = view_range(days, viral);
                let floor = min + ((max - min) as f64 * 0.2) as u64;
                for _ in 0..50 {
                    let views = synthesize_views(days, viral, &mut rng);
                    assert!(views >= floor && views <= max, "{views} outside [{floor}, {max}]");
                }
            }
        }
    }
}
