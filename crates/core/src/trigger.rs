use std::time::Duration;

use cron::Schedule;

use crate::Error;

/// A parsed `repeat` specifier: either a fixed interval or a cron
/// expression. Kept separate from `apscheduler`'s trigger objects because
/// Rust has no single injectable trigger-source crate that covers both —
/// the engine's `Scheduler` (crates/engine) drives each variant with its
/// own loop.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Fire every `period`.
    Interval(Duration),
    /// Fire on the cadence described by a standard cron schedule.
    Cron(Box<Schedule>),
}

const UNITS: [(char, u64); 5] = [
    ('s', 1),
    ('m', 60),
    ('h', 60 * 60),
    ('d', 60 * 60 * 24),
    ('w', 60 * 60 * 24 * 7),
];

/// Parse an interval specifier: a concatenation of `<N><unit>` tokens with
/// `unit` one of `s|m|h|d|w`. Each unit may appear at most once in a
/// well-formed spec; if one repeats, the last occurrence wins (matching the
/// reference implementation, which folds matches into a dict keyed by
/// unit).
pub fn parse_interval(spec: &str) -> Result<Duration, Error> {
    let mut rest = spec;
    let mut total_secs: u64 = 0;
    let mut matched_any = false;

    while !rest.is_empty() {
        let digit_len = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digit_len == 0 {
            return Err(Error::InvalidInterval(spec.to_string()));
        }
        let (digits, tail) = rest.split_at(digit_len);
        let mut chars = tail.chars();
        let unit = chars
            .next()
            .ok_or_else(|| Error::InvalidInterval(spec.to_string()))?;

        let Some((_, secs_per_unit)) = UNITS.iter().find(|(u, _)| *u == unit) else {
            return Err(Error::InvalidInterval(spec.to_string()));
        };

        let n: u64 = digits
            .parse()
            .map_err(|_| Error::InvalidInterval(spec.to_string()))?;

        total_secs = total_secs.saturating_add(n.saturating_mul(*secs_per_unit));
        matched_any = true;
        rest = chars.as_str();
    }

    if !matched_any {
        return Err(Error::InvalidInterval(spec.to_string()));
    }

    Ok(Duration::from_secs(total_secs))
}

/// Parse a cron specifier: five fields (`minute hour day month
/// day_of_week`) or six (`second minute hour day month day_of_week`).
/// Delegates field syntax (ranges, lists, `*`) to the `cron` crate, after
/// normalizing to the seconds-first form it expects.
pub fn parse_cron(spec: &str) -> Result<Schedule, Error> {
    let parts: Vec<&str> = spec.split_whitespace().collect();

    let normalized = match parts.len() {
        6 => parts.join(" "),
        5 => format!("0 {}", parts.join(" ")),
        _ => return Err(Error::InvalidCron(spec.to_string())),
    };

    Schedule::try_from(normalized.as_str()).map_err(|_| Error::InvalidCron(spec.to_string()))
}
