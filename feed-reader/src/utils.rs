/// "1 item", "3 items".
pub fn pluralize(count: i64, noun: &str) -> String {
    if count == 1 {
        format!("{} {}", count, noun)
    } else {
        format!("{} {}s", count, noun)
    }
}

/// URL utilities
pub mod url {
    use crate::types::{AggregatorError, Result};
    use url::Url;

    /// Parses a followed address, accepting only absolute http(s) URLs.
    pub fn normalize_feed_url(raw: &str) -> Result<String> {
        let url = Url::parse(raw.trim()).map_err(|_| AggregatorError::InvalidUrl(raw.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") || url.host().is_none() {
            return Err(AggregatorError::InvalidUrl(raw.to_string()));
        }
        Ok(url.to_string())
    }
}

/// Time utilities
pub mod time {
    use crate::types::{AggregatorError, Result};
    use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

    const DATE_TIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];
    const DATE_FORMAT: &str = "%Y-%m-%d";

    /// Durations written as a sequence of `<n>m`, `<n>h` or `<n>d`, e.g. `1d12h`.
    pub fn parse_duration(s: &str) -> Result<Duration> {
        let invalid = || AggregatorError::InvalidDuration(s.to_string());
        let mut total = Duration::zero();
        let mut digits = String::new();
        for c in s.chars() {
            if c.is_ascii_digit() {
                digits.push(c);
                continue;
            }
            let n: i64 = digits.parse().map_err(|_| invalid())?;
            let part = match c {
                'm' => Duration::try_minutes(n),
                'h' => Duration::try_hours(n),
                'd' => Duration::try_days(n),
                _ => return Err(invalid()),
            };
            total = part
                .and_then(|part| total.checked_add(&part))
                .ok_or_else(invalid)?;
            digits.clear();
        }
        if s.is_empty() || !digits.is_empty() {
            return Err(invalid());
        }
        Ok(total)
    }

    /// Resolves a `--since` argument: `last` for the previous run (if any),
    /// a duration back from `now`, or an absolute date-time.
    pub fn parse_since(
        raw: &str,
        now: DateTime<Utc>,
        last_run: Option<DateTime<Utc>>,
    ) -> Result<Option<DateTime<Utc>>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        if raw == "last" {
            return Ok(last_run);
        }
        if raw.chars().all(|c| c.is_ascii_digit() || matches!(c, 'm' | 'h' | 'd')) {
            let duration = parse_duration(raw)?;
            return now
                .checked_sub_signed(duration)
                .map(Some)
                .ok_or_else(|| AggregatorError::InvalidDuration(raw.to_string()));
        }
        parse_date_time(raw).map(Some)
    }

    /// Local date-times (`2024-01-01 12:03:04`, `2024-01-01 12:03`,
    /// `2024-01-01`) or RFC 3339 / RFC 2822 timestamps.
    pub fn parse_date_time(s: &str) -> Result<DateTime<Utc>> {
        let s = s.trim();
        for format in DATE_TIME_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                return local_to_utc(naive, s);
            }
        }
        if let Ok(date) = NaiveDate::parse_from_str(s, DATE_FORMAT) {
            if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                return local_to_utc(naive, s);
            }
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
            return Ok(dt.with_timezone(&Utc));
        }
        Err(AggregatorError::InvalidDateTime(s.to_string()))
    }

    fn local_to_utc(naive: NaiveDateTime, raw: &str) -> Result<DateTime<Utc>> {
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| AggregatorError::InvalidDateTime(raw.to_string()))
    }

    /// IMF-fixdate as used by `If-Modified-Since`.
    pub fn format_http_date(dt: DateTime<Utc>) -> String {
        dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
    }

    pub fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc2822(s).ok().map(|dt| dt.with_timezone(&Utc))
    }

    /// "5 minutes ago", "in 2 days".
    pub fn relative(seconds: i64) -> String {
        let magnitude = seconds.abs();
        let rounded = |unit: i64| ((magnitude as f64) / unit as f64).round() as i64;
        let text = if magnitude < 60 {
            super::pluralize(magnitude, "second")
        } else if magnitude < 3600 {
            super::pluralize(rounded(60), "minute")
        } else if magnitude < 86400 {
            super::pluralize(rounded(3600), "hour")
        } else {
            super::pluralize(rounded(86400), "day")
        };
        if seconds >= 0 {
            format!("{} ago", text)
        } else {
            format!("in {}", text)
        }
    }
}
