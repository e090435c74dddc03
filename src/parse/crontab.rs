//! `crontab -l` listings.

/// Expected entries with no crontab line starting with them.
pub fn missing_entries<'a>(crontab: &str, expected: &'a [String]) -> Vec<&'a str> {
    expected
        .iter()
        .filter(|e| !crontab.lines().any(|l| l.starts_with(e.as_str())))
        .map(String::as_str)
        .collect()
}
