use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// Wall-clock format used by every datetime input field.
pub const LOCAL_INPUT_FORMAT: &str = "%Y-%m-%dT%H:%M";

pub fn parse_local_input(value: &str) -> Result<DateTime<Utc>, String> {
    let naive = NaiveDateTime::parse_from_str(value.trim(), LOCAL_INPUT_FORMAT)
        .map_err(|_| "Invalid date/time. Use YYYY-MM-DDTHH:MM.".to_string())?;
    let result = Local.from_local_datetime(&naive);
    result
        .earliest()
        .or_else(|| result.latest())
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| format!("{value} does not exist in the local time zone."))
}

pub fn to_local_input(value: &DateTime<Utc>) -> String {
    value
        .with_timezone(&Local)
        .format(LOCAL_INPUT_FORMAT)
        .to_string()
}

/// Instant representation sent to the backend.
pub fn to_rfc3339(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value
        .with_timezone(&Local)
        .format("%b %-d, %Y %H:%M")
        .to_string()
}

pub fn format_duration(seconds: i64) -> String {
    let sign = if seconds < 0 { "-" } else { "" };
    let total_minutes = seconds.abs() / 60;
    format!("{sign}{}h {:02}m", total_minutes / 60, total_minutes % 60)
}

/// Parses a Postgres interval in its default output style, e.g.
/// `01:30:00`, `2 days 03:00:00` or `00:00:12.5`.
pub fn parse_interval(value: &str) -> Option<i64> {
    let mut days = 0i64;
    let mut clock = value.trim();

    if let Some((day_part, rest)) = clock.split_once(' ') {
        let count = day_part.parse::<i64>().ok()?;
        let rest = rest.trim_start();
        let rest = rest
            .strip_prefix("days")
            .or_else(|| rest.strip_prefix("day"))?;
        days = count;
        clock = rest.trim();
        if clock.is_empty() {
            return Some(days * 86_400);
        }
    }

    let (negative, clock) = match clock.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, clock),
    };

    let mut parts = clock.split(':');
    let hours = parts.next()?.parse::<i64>().ok()?;
    let minutes = parts.next()?.parse::<i64>().ok()?;
    let seconds = parts.next()?.parse::<f64>().ok()?;
    if parts.next().is_some() {
        return None;
    }

    let clock_seconds = hours * 3600 + minutes * 60 + seconds.round() as i64;
    let clock_seconds = if negative { -clock_seconds } else { clock_seconds };
    Some(days * 86_400 + clock_seconds)
}
