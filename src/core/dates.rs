//! Spreadsheet serial dates (Windows 1900 calendar)
//!
//! Serials count days from the 1900 epoch, including the phantom
//! 1900-02-29 that spreadsheet applications inherited. Serials below 60
//! count from 1899-12-31, serials from 61 on count from 1899-12-30, and
//! serial 60 lands on 1900-02-28 like the serial before it. Serials below 1
//! are time-of-day values anchored at 1970-01-01.

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};

/// Display format for [`excel_fix_date`].
pub const FIX_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SECONDS_PER_DAY: f64 = 86_400.0;

fn ymd(year: i32, month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Convert a serial to a calendar timestamp.
///
/// Returns `None` for non-finite serials and serials outside chrono's range.
pub fn serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() {
        return None;
    }
    let base = if serial < 1.0 {
        ymd(1970, 1, 1)
    } else if serial < 60.0 {
        ymd(1899, 12, 31)
    } else {
        ymd(1899, 12, 30)
    };

    let days = serial.floor();
    if days.abs() > 3_000_000.0 {
        return None;
    }
    let seconds = ((serial - days) * SECONDS_PER_DAY).round() as i64;

    base.checked_add_signed(Duration::days(days as i64))?
        .checked_add_signed(Duration::seconds(seconds))
}

/// Convert a calendar timestamp to its serial.
///
/// Timestamps before 1900-01-01 have no serial and return `None`.
pub fn datetime_to_serial(datetime: &NaiveDateTime) -> Option<f64> {
    let date = datetime.date();
    let base = if date < ymd(1900, 1, 1).date() {
        return None;
    } else if date < ymd(1900, 3, 1).date() {
        ymd(1899, 12, 31).date()
    } else {
        ymd(1899, 12, 30).date()
    };

    let days = (date - base).num_days() as f64;
    let seconds = datetime.num_seconds_from_midnight() as f64;
    Some(days + seconds / SECONDS_PER_DAY)
}

/// PHP-style `floatval`: the longest leading numeric prefix, else 0.
fn leading_float(input: &str) -> f64 {
    let bytes = input.as_bytes();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut seen_exp = false;

    while end < bytes.len() {
        let b = bytes[end];
        match b {
            b'0'..=b'9' => seen_digit = true,
            b'+' | b'-' if end == 0 => {}
            b'+' | b'-' if seen_exp && matches!(bytes[end - 1], b'e' | b'E') => {}
            b'.' if !seen_dot && !seen_exp => seen_dot = true,
            b'e' | b'E' if seen_digit && !seen_exp => seen_exp = true,
            _ => break,
        }
        end += 1;
    }

    // A dangling exponent marker is not part of the number.
    let mut candidate = &input[..end];
    while let Some(last) = candidate.chars().last() {
        if matches!(last, 'e' | 'E' | '+' | '-') {
            candidate = &candidate[..candidate.len() - 1];
        } else {
            break;
        }
    }
    candidate.parse::<f64>().unwrap_or(0.0)
}

/// Render a raw cell value from a `date` column as `YYYY-MM-DD HH:MM:SS`.
///
/// Blank and zero inputs come back unchanged so empty date cells stay empty.
pub fn excel_fix_date(raw: &str) -> String {
    let serial = leading_float(raw.trim());
    if serial == 0.0 {
        return raw.to_string();
    }
    match serial_to_datetime(serial) {
        Some(datetime) => datetime.format(FIX_DATE_FORMAT).to_string(),
        None => raw.to_string(),
    }
}

/// Render a serial through a spreadsheet date format code such as
/// `yyyy/mm/dd` or `d-mmm-yy hh:mm`.
pub fn format_serial(serial: f64, code: &str) -> Option<String> {
    let datetime = serial_to_datetime(serial)?;
    Some(datetime.format(&strftime_pattern(code)).to_string())
}

/// True when a number format code renders dates or times.
pub fn is_date_format(code: &str) -> bool {
    let mut in_quotes = false;
    for c in code.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            'y' | 'Y' | 'd' | 'D' | 'h' | 'H' | 's' | 'S' if !in_quotes => return true,
            _ => {}
        }
    }
    false
}

fn strftime_pattern(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    let mut out = String::new();
    let mut last_was_hour = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i].to_ascii_lowercase();
        let mut run = 1;
        while i + run < chars.len() && chars[i + run].to_ascii_lowercase() == c {
            run += 1;
        }

        match c {
            'y' => {
                out.push_str(if run <= 2 { "%y" } else { "%Y" });
                last_was_hour = false;
            }
            'm' => {
                let next_is_seconds = chars[i + run..]
                    .iter()
                    .find(|c| c.is_ascii_alphabetic())
                    .is_some_and(|c| c.eq_ignore_ascii_case(&'s'));
                if (last_was_hour || next_is_seconds) && run <= 2 {
                    out.push_str("%M");
                } else {
                    out.push_str(match run {
                        1 => "%-m",
                        2 => "%m",
                        3 => "%b",
                        _ => "%B",
                    });
                }
                last_was_hour = false;
            }
            'd' => {
                out.push_str(match run {
                    1 => "%-d",
                    2 => "%d",
                    3 => "%a",
                    _ => "%A",
                });
                last_was_hour = false;
            }
            'h' => {
                out.push_str(if run == 1 { "%-H" } else { "%H" });
                last_was_hour = true;
            }
            's' => {
                out.push_str("%S");
                last_was_hour = false;
            }
            '"' | '\\' => {}
            '%' => out.push_str("%%"),
            _ => {
                for _ in 0..run {
                    out.push(chars[i]);
                }
            }
        }
        i += run;
    }

    out
}
