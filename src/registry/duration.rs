use std::time::Duration;

/// Parse the `config.ha_failover_delay` time-suffix string (spec §6):
/// bare integer = seconds, `s`/`m`/`h`/`d`/`w` suffix for the corresponding
/// unit. Returns the 60 s default if the string is absent or malformed.
pub fn parse_failover_delay(raw: Option<&str>) -> Duration {
    raw.and_then(parse_suffixed)
        .filter(|d| !d.is_zero())
        .unwrap_or(DEFAULT_FAILOVER_DELAY)
}

pub const DEFAULT_FAILOVER_DELAY: Duration = Duration::from_secs(60);

fn parse_suffixed(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (digits, multiplier) = match raw.chars().last()? {
        's' => (&raw[..raw.len() - 1], 1u64),
        'm' => (&raw[..raw.len() - 1], 60),
        'h' => (&raw[..raw.len() - 1], 60 * 60),
        'd' => (&raw[..raw.len() - 1], 60 * 60 * 24),
        'w' => (&raw[..raw.len() - 1], 60 * 60 * 24 * 7),
        '0'..='9' => (raw, 1),
        _ => return None,
    };
    let value: u64 = digits.parse().ok()?;
    Some(Duration::from_secs(value.checked_mul(multiplier)?))
}
