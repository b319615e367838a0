use chrono::{DateTime, Utc};

/// Integer with thousands separators; fractional values keep up to three decimals.
pub fn format_number(n: f64) -> String {
    if !n.is_finite() {
        return "0".to_string();
    }
    let neg = n < 0.0;
    let rounded = (n.abs() * 1000.0).round() / 1000.0;
    let int_part = rounded.trunc() as u64;
    let frac = rounded - rounded.trunc();

    let digits = int_part.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if frac > 0.0 {
        let f = format!("{:.3}", frac);
        grouped.push_str(f.trim_start_matches('0').trim_end_matches('0'));
    }
    if neg && rounded > 0.0 {
        grouped.insert(0, '-');
    }
    grouped
}

pub fn format_percentage(n: f64) -> String {
    format!("{:.1}%", n)
}

/// Arrow plus signed change, or "Stable" for no movement.
pub fn format_trend(change: f64) -> String {
    if change > 0.0 {
        format!("↑ +{:.1}%", change)
    } else if change < 0.0 {
        format!("↓ {:.1}%", change)
    } else {
        "→ Stable".to_string()
    }
}

pub fn format_datetime(ts: DateTime<Utc>) -> String {
    ts.format("%b %-d, %Y, %I:%M %p").to_string()
}
