//! Tokenizes a sampler report into counter name/value pairs.

use tracing::warn;

use super::MetricReport;

const TIME_UNITS: &[&str] = &["msec", "ms", "sec", "seconds"];

/// Parse a sampler report file, tolerating a missing file (empty map,
/// warning logged) and arbitrary interleaved summary lines.
pub async fn parse_report(path: &std::path::Path) -> MetricReport {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) => {
            warn!("performance report {} unreadable: {}", path.display(), e);
            return MetricReport::new();
        }
    };

    parse_report_str(&content)
}

/// Pure string parser, split out so it can be exercised directly in tests.
pub fn parse_report_str(content: &str) -> MetricReport {
    let mut metrics = MetricReport::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((key, value)) = parse_line(line) {
            metrics.insert(key, value);
        }
    }

    metrics
}

fn parse_line(line: &str) -> Option<(String, f64)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.is_empty() {
        return None;
    }

    let value = parse_number(tokens[0])?;

    if tokens.len() >= 3 && TIME_UNITS.contains(&tokens[1]) {
        let third = tokens[2];
        if third == "time" && tokens.get(3) == Some(&"elapsed") {
            return Some(("seconds".to_string(), value));
        }
        return Some((third.to_string(), value));
    }

    if tokens.len() >= 2 {
        return Some((tokens[1].to_string(), value));
    }

    None
}

fn parse_number(token: &str) -> Option<f64> {
    let stripped: String = token.chars().filter(|c| *c != ',').collect();
    stripped.parse::<f64>().ok()
}
