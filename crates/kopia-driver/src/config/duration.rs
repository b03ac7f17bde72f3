use std::time::Duration;

use crate::error::{Error, Result};

const UNITS: &[(&str, u128)] = &[
    ("ns", 1),
    ("us", 1_000),
    ("µs", 1_000),
    ("ms", 1_000_000),
    ("s", 1_000_000_000),
    ("m", 60 * 1_000_000_000),
    ("h", 3600 * 1_000_000_000),
];

/// Parses durations written as `<number><unit>` runs, e.g. `60m`, `1h30m`,
/// `1.5s` or `500ms`. A bare `0` is accepted.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(Error::config("empty duration"));
    }

    let invalid = || Error::config(format!("invalid duration '{input}'"));
    let mut rest = s;
    let mut total_ns: u128 = 0;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| Error::config(format!("missing unit in duration '{input}'")))?;
        if num_len == 0 {
            return Err(invalid());
        }
        let (number, tail) = rest.split_at(num_len);
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let scale = UNITS
            .iter()
            .find(|(u, _)| *u == unit)
            .map(|(_, n)| *n)
            .ok_or_else(|| Error::config(format!("unknown unit '{unit}' in duration '{input}'")))?;

        let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
        if frac.contains('.') || (whole.is_empty() && frac.is_empty()) {
            return Err(invalid());
        }
        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let frac_ns = if frac.is_empty() {
            0
        } else {
            let digits = &frac[..frac.len().min(18)];
            let n: u128 = digits.parse().map_err(|_| invalid())?;
            n * scale / 10u128.pow(digits.len() as u32)
        };
        total_ns = whole
            .checked_mul(scale)
            .and_then(|v| v.checked_add(frac_ns))
            .and_then(|v| total_ns.checked_add(v))
            .ok_or_else(|| Error::config(format!("duration '{input}' overflows")))?;
        rest = tail;
    }

    let secs = u64::try_from(total_ns / 1_000_000_000)
        .map_err(|_| Error::config(format!("duration '{input}' overflows")))?;
    Ok(Duration::new(secs, (total_ns % 1_000_000_000) as u32))
}

pub fn round_up_to_second(d: Duration) -> Duration {
    if d.subsec_nanos() == 0 {
        d
    } else {
        Duration::from_secs(d.as_secs().saturating_add(1))
    }
}

/// Renders in the form kopia itself prints: `1h0m0s`, `1m30s`, `1.5s`,
/// and `250ms` or `1.5µs` below one second.
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }
    if d.as_secs() == 0 {
        let nanos = u64::from(d.subsec_nanos());
        return match nanos {
            0..1_000 => format!("{nanos}ns"),
            1_000..1_000_000 => format!("{}µs", decimal(nanos, 3)),
            _ => format!("{}ms", decimal(nanos, 6)),
        };
    }

    let total = d.as_secs();
    let (h, m) = (total / 3600, (total % 3600) / 60);
    let secs = decimal(total % 60 * 1_000_000_000 + u64::from(d.subsec_nanos()), 9);
    if h > 0 {
        format!("{h}h{m}m{secs}s")
    } else if m > 0 {
        format!("{m}m{secs}s")
    } else {
        format!("{secs}s")
    }
}

/// `value / 10^scale` with trailing fractional zeros dropped.
fn decimal(value: u64, scale: u32) -> String {
    let unit = 10u64.pow(scale);
    let (whole, frac) = (value / unit, value % unit);
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:0width$}", width = scale as usize);
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compound_durations() {
        assert_eq!(parse_duration("60m").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn rejects_bad_durations() {
        for bad in ["", "10", "5x", "h", "1..2s"] {
            assert!(parse_duration(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn formats_every_unit_below_the_largest() {
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h0m0s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(120)), "2m0s");
        assert_eq!(format_duration(Duration::from_secs(7205)), "2h0m5s");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_micros(1500)), "1.5ms");
        assert_eq!(format_duration(Duration::from_nanos(1500)), "1.5µs");
        assert_eq!(format_duration(Duration::from_nanos(42)), "42ns");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_millis(61_250)), "1m1.25s");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }

    #[test]
    fn rounding_up() {
        assert_eq!(round_up_to_second(Duration::from_millis(1001)), Duration::from_secs(2));
        assert_eq!(round_up_to_second(Duration::from_secs(3)), Duration::from_secs(3));
    }
}
