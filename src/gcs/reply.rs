//! Parsing helpers for line-oriented GCS responses.
//!
//! GCS replies are ASCII, one record per line. Scalar queries answer either a
//! bare value or `item=value`; multi-record queries answer one line per
//! record with tab-separated `key=value` pairs; bulk data queries (`DRR?`,
//! `GWD?`) prefix metadata lines with `#`.

use super::error::{GcsError, GcsResult};

/// Parse a single float from a reply like `X=-2.51` or a bare `-2.51`.
///
/// Only the first non-empty line is considered.
pub fn single_value(reply: &str) -> GcsResult<f64> {
    let line = first_line(reply)?;
    let text = line.rsplit('=').next().unwrap_or(line).trim();
    text.parse()
        .map_err(|_| GcsError::Parse(format!("expected a float, got {line:?}")))
}

/// Parse a single integer from a reply like `1=262144` or a bare `10`.
pub fn single_int(reply: &str) -> GcsResult<i64> {
    let line = first_line(reply)?;
    let text = line.rsplit('=').next().unwrap_or(line).trim();
    text.parse()
        .map_err(|_| GcsError::Parse(format!("expected an integer, got {line:?}")))
}

/// Split a reply into `(key, value)` pairs, one per line.
///
/// Lines without `=` and empty lines are skipped.
pub fn key_value_lines(reply: &str) -> Vec<(String, String)> {
    reply
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Parse per-item boolean flags from a reply like `X=1\nY=0`.
pub fn bool_flags(reply: &str) -> GcsResult<Vec<(String, bool)>> {
    key_value_lines(reply)
        .into_iter()
        .map(|(key, value)| match value.as_str() {
            "1" => Ok((key, true)),
            "0" => Ok((key, false)),
            other => Err(GcsError::Parse(format!(
                "expected 0/1 flag for {key}, got {other:?}"
            ))),
        })
        .collect()
}

/// Parse a multi-record reply where each line holds tab-separated
/// `key=value` pairs (the `KLT?` format).
pub fn tabbed_blocks(reply: &str) -> Vec<Vec<(String, String)>> {
    reply
        .lines()
        .filter_map(|line| {
            let fields: Vec<(String, String)> = line
                .split('\t')
                .filter_map(|field| {
                    let (key, value) = field.split_once('=')?;
                    Some((key.trim().to_string(), value.trim().to_string()))
                })
                .collect();
            if fields.is_empty() {
                None
            } else {
                Some(fields)
            }
        })
        .collect()
}

/// Parse indexed parameter lines like `1 1=5020` into `(item, param, value)`.
///
/// This is the `WAV?` reply format: wave table id, then `param=value`.
pub fn indexed_params(reply: &str) -> GcsResult<Vec<(u8, u32, u64)>> {
    let mut out = Vec::new();
    for line in reply.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed = (|| {
            let (item, rest) = line.split_once(' ')?;
            let (param, value) = rest.trim().split_once('=')?;
            Some((
                item.trim().parse().ok()?,
                param.trim().parse().ok()?,
                value.trim().parse().ok()?,
            ))
        })();
        match parsed {
            Some(entry) => out.push(entry),
            None => {
                return Err(GcsError::Parse(format!(
                    "malformed indexed parameter line {line:?}"
                )))
            }
        }
    }
    Ok(out)
}

/// Split a bulk-data reply into numeric rows and `#`-prefixed header lines.
///
/// Each data row is whitespace-separated floats; malformed rows are a parse
/// error rather than silently dropped.
pub fn data_rows(reply: &str) -> GcsResult<(Vec<Vec<f64>>, Vec<String>)> {
    let mut rows = Vec::new();
    let mut headers = Vec::new();
    for line in reply.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(header) = line.strip_prefix('#') {
            headers.push(header.trim().to_string());
            continue;
        }
        let row: Result<Vec<f64>, _> = line.split_whitespace().map(str::parse).collect();
        match row {
            Ok(values) => rows.push(values),
            Err(_) => return Err(GcsError::Parse(format!("malformed data row {line:?}"))),
        }
    }
    Ok((rows, headers))
}

/// Look up a named value in bulk-data header lines (`KEY = value`).
pub fn header_value<'a>(headers: &'a [String], name: &str) -> Option<&'a str> {
    headers.iter().find_map(|header| {
        let (key, value) = header.split_once('=')?;
        if key.trim().eq_ignore_ascii_case(name) {
            Some(value.trim())
        } else {
            None
        }
    })
}

fn first_line(reply: &str) -> GcsResult<&str> {
    reply
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| GcsError::Parse("empty reply".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_value() {
        assert_eq!(single_value("X=-2.51\n").unwrap(), -2.51);
        assert_eq!(single_value("262144").unwrap(), 262144.0);
        assert!(single_value("").is_err());
        assert!(single_value("X=abc").is_err());
    }

    #[test]
    fn test_single_int() {
        assert_eq!(single_int("1=262144\n").unwrap(), 262144);
        assert_eq!(single_int("3").unwrap(), 3);
    }

    #[test]
    fn test_key_value_lines() {
        let pairs = key_value_lines("X=1.5\nY=-0.25\n\njunk\n");
        assert_eq!(
            pairs,
            vec![
                ("X".to_string(), "1.5".to_string()),
                ("Y".to_string(), "-0.25".to_string()),
            ]
        );
    }

    #[test]
    fn test_bool_flags() {
        let flags = bool_flags("X=1\nY=0\n").unwrap();
        assert_eq!(
            flags,
            vec![("X".to_string(), true), ("Y".to_string(), false)]
        );
        assert!(bool_flags("X=2").is_err());
    }

    #[test]
    fn test_tabbed_blocks() {
        let reply = "Name=ZERO\tX=0\tY=0\nName=PTYCHO\tX=1.5\tY=-2\n";
        let blocks = tabbed_blocks(reply);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0][0], ("Name".to_string(), "ZERO".to_string()));
        assert_eq!(blocks[1][1], ("X".to_string(), "1.5".to_string()));
    }

    #[test]
    fn test_indexed_params() {
        let entries = indexed_params("1 1=5020\n2 1=5020\n").unwrap();
        assert_eq!(entries, vec![(1, 1, 5020), (2, 1, 5020)]);
        assert!(indexed_params("garbage").is_err());
    }

    #[test]
    fn test_data_rows() {
        let reply = "# TYPE = 1\n# SAMPLE_TIME = 0.001\n0.0 0.1\n0.5 0.6\n";
        let (rows, headers) = data_rows(reply).unwrap();
        assert_eq!(rows, vec![vec![0.0, 0.1], vec![0.5, 0.6]]);
        assert_eq!(header_value(&headers, "SAMPLE_TIME"), Some("0.001"));
        assert_eq!(header_value(&headers, "NDATA"), None);
    }
}
