// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Expiration codec: textual durations/timestamps to and from the
//! signed epoch-second integer stored with every rule. Arithmetic
//! saturates at `i64::MAX` rather than overflowing, and a negative
//! result after an overflow is treated as "forever".

const SEC: i64 = 1;
const MIN: i64 = 60;
const HOUR: i64 = 60 * 60;
const DAY: i64 = 24 * 60 * 60;
const WEEK: i64 = 7 * 24 * 60 * 60;
const YEAR: i64 = 365 * 24 * 60 * 60 + 24 * 60 * 60 / 4;

fn pt_add(x: i64, y: i64) -> i64 {
    match x.checked_add(y) {
        Some(r) if r >= 0 => r,
        _ => i64::MAX,
    }
}

fn pt_mul(x: i64, m: i64) -> i64 {
    match x.checked_mul(m) {
        Some(r) if r >= 0 => r,
        _ => i64::MAX,
    }
}

fn pt_muladd(x: i64, m: i64, y: i64) -> i64 {
    pt_add(pt_mul(x, m), y)
}

/// Error parsing a relative-duration or absolute-expiration string.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid expiration text: {0:?}")]
pub struct ExpireParseError(pub String);

fn parse_time_spec(txt: &str) -> Option<i64> {
    let mut r: i64 = 0;
    let bytes = txt.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let mut x: i64 = 0;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            x = pt_muladd(x, 10, i64::from(bytes[i] - b'0'));
            i += 1;
        }
        if i >= bytes.len() {
            r = pt_muladd(x, SEC, r);
            break;
        }
        let unit = match bytes[i] {
            b'y' => YEAR,
            b'w' => WEEK,
            b'd' => DAY,
            b'h' => HOUR,
            b'm' => MIN,
            b's' => SEC,
            _ => return None,
        };
        r = pt_muladd(x, unit, r);
        i += 1;
    }
    Some(r)
}

/// Parse expiration text into a signed epoch value. `absolute` selects
/// whether a relative duration is added to "now" (used when persisting
/// a rule) or left as a bare relative span. A leading `-` means "valid,
/// but do not cache at the checker"; it is encoded as `-(r+1)`.
pub fn txt2exp(txt: &str, now: i64, absolute: bool) -> Result<i64, ExpireParseError> {
    let (nocache, rest) = match txt.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, txt),
    };

    let r = if rest.is_empty() || matches!(rest, "always" | "forever" | "*") {
        0
    } else {
        let mut r = parse_time_spec(rest).ok_or_else(|| ExpireParseError(txt.to_string()))?;
        if absolute {
            r = pt_add(r, now);
        }
        r
    };

    Ok(if nocache { -(r + 1) } else { r })
}

/// Render an expiration value as canonical text: the largest-unit
/// decomposition that sums to the value, `"forever"` for zero, and a
/// leading `-` for "do not cache" values.
pub fn exp2txt(expire: i64, now: i64, absolute: bool) -> String {
    let mut out = String::new();
    let mut value = expire;
    if value < 0 {
        out.push('-');
        value = -(value + 1);
    }
    if value == 0 {
        if out.is_empty() {
            out.push_str("forever");
        }
        return out;
    }
    if absolute {
        value -= now;
    }
    for (unit, suffix) in [
        (YEAR, 'y'),
        (WEEK, 'w'),
        (DAY, 'd'),
        (HOUR, 'h'),
        (MIN, 'm'),
        (SEC, 's'),
    ] {
        if value >= unit {
            out.push_str(&(value / unit).to_string());
            out.push(suffix);
            value %= unit;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forever_keywords_map_to_zero() {
        for kw in ["", "always", "forever", "*"] {
            assert_eq!(txt2exp(kw, 1000, false).unwrap(), 0);
        }
    }

    #[test]
    fn relative_seconds_are_total() {
        assert_eq!(txt2exp("90s", 0, false).unwrap(), 90);
        assert_eq!(txt2exp("5m", 0, false).unwrap(), 300);
        assert_eq!(txt2exp("1h30m", 0, false).unwrap(), 5400);
    }

    #[test]
    fn bare_integer_is_seconds() {
        assert_eq!(txt2exp("42", 0, false).unwrap(), 42);
    }

    #[test]
    fn absolute_adds_now() {
        assert_eq!(txt2exp("10s", 1_000, true).unwrap(), 1_010);
    }

    #[test]
    fn leading_minus_means_no_cache() {
        let r = txt2exp("-10s", 0, false).unwrap();
        assert_eq!(r, -11);
    }

    #[test]
    fn rejects_garbage_unit() {
        assert!(txt2exp("10z", 0, false).is_err());
    }

    #[test]
    fn exp2txt_round_trips_relative_durations() {
        for s in ["1y", "2w", "3d", "4h", "5m", "6s", "forever"] {
            let parsed = txt2exp(s, 0, false).unwrap();
            assert_eq!(exp2txt(parsed, 0, false), s);
        }
    }

    #[test]
    fn exp2txt_emits_largest_units_descending() {
        let parsed = txt2exp("1d2h", 0, false).unwrap();
        assert_eq!(exp2txt(parsed, 0, false), "1d2h");
    }

    #[test]
    fn exp2txt_marks_no_cache_with_leading_dash() {
        let parsed = txt2exp("-5m", 0, false).unwrap();
        assert_eq!(exp2txt(parsed, 0, false), "-5m");
    }

    #[test]
    fn saturates_instead_of_overflowing() {
        let huge = "99999999999999999999y";
        let r = txt2exp(huge, 0, false).unwrap();
        assert_eq!(r, i64::MAX);
    }
}
