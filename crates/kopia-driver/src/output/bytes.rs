use crate::error::{Error, Result};

// Multipliers for humanized size suffixes. Decimal units are powers of 1000,
// the `i` forms are powers of 1024.
const UNITS: &[(&str, u64)] = &[
    ("", 1),
    ("b", 1),
    ("byte", 1),
    ("bytes", 1),
    ("k", 1_000),
    ("kb", 1_000),
    ("ki", 1 << 10),
    ("kib", 1 << 10),
    ("m", 1_000_000),
    ("mb", 1_000_000),
    ("mi", 1 << 20),
    ("mib", 1 << 20),
    ("g", 1_000_000_000),
    ("gb", 1_000_000_000),
    ("gi", 1 << 30),
    ("gib", 1 << 30),
    ("t", 1_000_000_000_000),
    ("tb", 1_000_000_000_000),
    ("ti", 1 << 40),
    ("tib", 1 << 40),
    ("p", 1_000_000_000_000_000),
    ("pb", 1_000_000_000_000_000),
    ("pi", 1 << 50),
    ("pib", 1 << 50),
    ("e", 1_000_000_000_000_000_000),
    ("eb", 1_000_000_000_000_000_000),
    ("ei", 1 << 60),
    ("eib", 1 << 60),
];

/// Parses sizes such as `6.7 GB`, `40 KB`, `1.5MiB` or `2 B` into bytes.
/// Fractions are scaled exactly and truncated toward zero.
pub fn parse_bytes(input: &str) -> Result<u64> {
    let s = input.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let number: String = number.chars().filter(|c| *c != ',').collect();
    let unit = unit.trim().to_ascii_lowercase();

    if number.is_empty() || number == "." {
        return Err(Error::parse(format!("could not parse size '{input}'")));
    }
    let multiplier = UNITS
        .iter()
        .find(|(name, _)| *name == unit)
        .map(|(_, m)| *m)
        .ok_or_else(|| Error::parse(format!("unknown size unit '{unit}' in '{input}'")))?;

    let (whole, frac) = match number.split_once('.') {
        Some((w, f)) => (w, f),
        None => (number.as_str(), ""),
    };
    if frac.contains('.') {
        return Err(Error::parse(format!("could not parse size '{input}'")));
    }
    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|e| Error::parse(format!("could not parse size '{input}': {e}")))?
    };

    if frac.len() > 18 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::parse(format!("could not parse size '{input}'")));
    }
    let frac_num: u128 = if frac.is_empty() { 0 } else { frac.parse().unwrap_or(0) };
    let frac_bytes = frac_num * u128::from(multiplier) / 10u128.pow(frac.len() as u32);

    let total = u128::from(whole) * u128::from(multiplier) + frac_bytes;
    u64::try_from(total).map_err(|_| Error::parse(format!("size '{input}' overflows")))
}
