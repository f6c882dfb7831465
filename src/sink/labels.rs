//! Human-readable classification labels.
//!
//! The remote service and the local model both emit one probability per
//! material, in [`MATERIALS`] order. They are rendered as one
//! `"{material}: {percent}%"` line per material, most likely first. The two
//! paths round differently: the remote path truncates to whole percent, the
//! local path rounds to one decimal.

use serde_json::Value;
use tracing::warn;

pub const MATERIALS: [&str; 3] = ["Polyester", "Cotton", "Wool"];

fn paired(probabilities: &[f64]) -> Vec<(&'static str, f64)> {
    if probabilities.len() > MATERIALS.len() {
        warn!(
            count = probabilities.len(),
            "more probabilities than materials; extra values ignored"
        );
    }
    MATERIALS.iter().copied().zip(probabilities.iter().copied()).collect()
}

/// Remote rendering: whole percent, truncated.
pub fn format_remote(probabilities: &[f64]) -> String {
    let mut labels = paired(probabilities);
    labels.sort_by(|a, b| b.1.total_cmp(&a.1));
    labels
        .iter()
        .map(|(material, p)| format!("{material}: {}%\n", (p * 100.0).trunc() as i64))
        .collect()
}

/// Local rendering: percent rounded to one decimal.
pub fn format_local(probabilities: &[f64]) -> String {
    let mut labels: Vec<(&str, f64)> = paired(probabilities)
        .into_iter()
        .map(|(material, p)| (material, (p * 1000.0).round() / 10.0))
        .collect();
    labels.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(a.0)));
    labels
        .iter()
        .map(|(material, pct)| format!("{material}: {pct:.1}%\n"))
        .collect()
}

/// Turn a remote response body into a label.
///
/// `{"outputs": [[p0, p1, p2]]}` is rendered with [`format_remote`]. A body
/// that is not JSON is returned verbatim; JSON of the wrong shape becomes
/// `"Invalid data format"`.
pub fn decode_remote(body: &str) -> String {
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => return body.to_string(),
    };
    let Some(outputs) = value.as_object().and_then(|o| o.get("outputs")) else {
        return "Invalid data format".to_string();
    };
    match outputs
        .get(0)
        .and_then(Value::as_array)
        .map(|row| row.iter().map(Value::as_f64).collect::<Option<Vec<_>>>())
    {
        Some(Some(probabilities)) => format_remote(&probabilities),
        _ => {
            warn!(%body, "could not decode remote labels");
            "Unknown".to_string()
        }
    }
}
