//! Pure, side-effect-free decoding of the HFP AT unsolicited responses the
//! engine needs to interpret: `+CLCC`, `+COPS`, `+CLIP`.
//!
//! Parsing is tolerant: leading/trailing whitespace and a trailing CR/LF are
//! ignored, a missing prefix or a malformed field yields `None`, and nothing
//! here ever mutates engine state. A malformed line is simply dropped by the
//! caller — no event is emitted for it.

use crate::state::{CallDirection, CallInfo, CallStatus};

/// Strip a surrounding pair of `"..."` quotes, if present; otherwise return
/// the input unchanged (trimmed).
fn unquote(field: &str) -> String {
    let f = field.trim();
    if f.len() >= 2 && f.starts_with('"') && f.ends_with('"') {
        f[1..f.len() - 1].to_string()
    } else {
        f.to_string()
    }
}

fn strip_prefix_ci<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let trimmed = line.trim();
    if trimmed.len() >= prefix.len() && trimmed[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(trimmed[prefix.len()..].trim_start())
    } else {
        None
    }
}

/// Split a comma-separated AT field list, respecting quoted commas (none of
/// CLCC/COPS/CLIP ever quote a comma, but splitting naively on `,` is wrong
/// once a quoted field itself could theoretically contain one — guard it
/// anyway since this is the wire boundary).
fn split_fields(rest: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in rest.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => {
                fields.push(current.clone());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Decode a `+CLCC: <idx>,<dir>,<stat>,<mode>,<mpty>[,"<number>",<type>]`
/// line into a [`CallInfo`]. Returns `None` on any malformed or missing
/// field.
pub fn parse_clcc(line: &str) -> Option<CallInfo> {
    let rest = strip_prefix_ci(line, "+CLCC:")?;
    let fields = split_fields(rest);
    if fields.len() < 5 {
        return None;
    }

    let index: u32 = fields[0].trim().parse().ok()?;
    let dir_raw: u8 = fields[1].trim().parse().ok()?;
    let stat_raw: u8 = fields[2].trim().parse().ok()?;
    // fields[3] = mode, fields[4] = mpty — carried on the wire but not
    // represented in CallInfo; intentionally ignored.

    let direction = match dir_raw {
        0 => CallDirection::Outgoing,
        1 => CallDirection::Incoming,
        _ => return None,
    };

    let status = match stat_raw {
        0 => CallStatus::Active,
        1 => CallStatus::Held,
        2 => CallStatus::Dialing,
        3 => CallStatus::Alerting,
        4 => CallStatus::Incoming,
        5 => CallStatus::Waiting,
        _ => CallStatus::Idle,
    };

    let number = if fields.len() >= 6 {
        let n = unquote(&fields[5]);
        if n.is_empty() { None } else { Some(n) }
    } else {
        None
    };

    Some(CallInfo {
        index,
        direction,
        status,
        number,
        start_time: None,
    })
}

/// Decode a `+COPS: <mode>,<format>,"<oper>"` line into the operator name.
/// Requires at least 3 comma-separated fields.
pub fn parse_cops(line: &str) -> Option<String> {
    let rest = strip_prefix_ci(line, "+COPS:")?;
    let fields = split_fields(rest);
    if fields.len() < 3 {
        return None;
    }
    let name = unquote(&fields[2]);
    if name.is_empty() { None } else { Some(name) }
}

/// Decode a `+CLIP: "<number>",<type>[,<sub>,<satype>[,"<alpha>"]]` line into
/// `(number, optional name)`. `name` is present only when the 5th field is
/// non-empty.
pub fn parse_clip(line: &str) -> Option<(String, Option<String>)> {
    let rest = strip_prefix_ci(line, "+CLIP:")?;
    let fields = split_fields(rest);
    if fields.is_empty() {
        return None;
    }

    let number = unquote(&fields[0]);
    if number.is_empty() {
        return None;
    }

    let name = fields
        .get(4)
        .map(|f| unquote(f))
        .filter(|n| !n.is_empty());

    Some((number, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clcc_active_outgoing() {
        let info = parse_clcc("+CLCC: 1,0,0,0,0,\"+15551234567\",145").unwrap();
        assert_eq!(info.index, 1);
        assert_eq!(info.direction, CallDirection::Outgoing);
        assert_eq!(info.status, CallStatus::Active);
        assert_eq!(info.number.as_deref(), Some("+15551234567"));
    }

    #[test]
    fn clcc_incoming_no_number() {
        let info = parse_clcc("+CLCC: 2,1,4,0,0").unwrap();
        assert_eq!(info.direction, CallDirection::Incoming);
        assert_eq!(info.status, CallStatus::Incoming);
        assert_eq!(info.number, None);
    }

    #[test]
    fn clcc_default_status_is_idle() {
        let info = parse_clcc("+CLCC: 1,0,9,0,0").unwrap();
        assert_eq!(info.status, CallStatus::Idle);
    }

    #[test]
    fn clcc_malformed_returns_none() {
        assert!(parse_clcc("+CLCC: bad").is_none());
        assert!(parse_clcc("OK").is_none());
        assert!(parse_clcc("+CLCC: 1,9,0,0,0").is_none()); // bad direction
    }

    #[test]
    fn clcc_tolerates_whitespace_and_crlf() {
        let info = parse_clcc("  +CLCC: 1,0,0,0,0 \r\n").unwrap();
        assert_eq!(info.index, 1);
    }

    #[test]
    fn cops_extracts_name() {
        assert_eq!(
            parse_cops("+COPS: 0,0,\"T-Mobile\"").as_deref(),
            Some("T-Mobile")
        );
    }

    #[test]
    fn cops_requires_three_fields() {
        assert!(parse_cops("+COPS: 0,0").is_none());
    }

    #[test]
    fn clip_with_name() {
        let (number, name) = parse_clip("+CLIP: \"+15551234567\",145,,,\"John Doe\"").unwrap();
        assert_eq!(number, "+15551234567");
        assert_eq!(name.as_deref(), Some("John Doe"));
    }

    #[test]
    fn clip_without_name() {
        let (number, name) = parse_clip("+CLIP: \"+15551234567\",145").unwrap();
        assert_eq!(number, "+15551234567");
        assert_eq!(name, None);
    }

    #[test]
    fn clip_empty_alpha_field_is_none() {
        let (_, name) = parse_clip("+CLIP: \"+15551234567\",145,,,\"\"").unwrap();
        assert_eq!(name, None);
    }

    #[test]
    fn round_trip_index_direction_number() {
        let line = "+CLCC: 3,1,0,0,0,\"+447700900123\",129";
        let info = parse_clcc(line).unwrap();
        assert_eq!(info.index, 3);
        assert_eq!(info.direction, CallDirection::Incoming);
        assert_eq!(info.number.as_deref(), Some("+447700900123"));
    }
}
