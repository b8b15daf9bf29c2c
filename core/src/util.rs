use chrono::DateTime;
use chrono::TimeZone;

/// `Wednesday, February 5 2014 1:05:06pm`
pub fn humantime<Tz>(when: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    when.format("%A, %B %-d %Y %-I:%M:%S%P").to_string()
}

/// Compact duration, only as wide as it needs to be:
/// `30s`, `1m:1s`, `1h:1m:1s`, `1d:1h:1m:1s`.
pub fn timefromsecs(secs: u64) -> String {
    let (minutes, seconds) = (secs / 60, secs % 60);
    if minutes == 0 {
        return format!("{seconds}s");
    }
    let (hours, minutes) = (minutes / 60, minutes % 60);
    if hours == 0 {
        return format!("{minutes}m:{seconds}s");
    }
    let (days, hours) = (hours / 24, hours % 24);
    if days == 0 {
        return format!("{hours}h:{minutes}m:{seconds}s");
    }
    format!("{days}d:{hours}h:{minutes}m:{seconds}s")
}

/// `true/on/yes/1` and `false/off/no/0`, case-insensitive.
pub fn parse_bool_word(word: &str) -> Option<bool> {
    match word.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Some(true),
        "false" | "off" | "no" | "0" => Some(false),
        _ => None,
    }
}
