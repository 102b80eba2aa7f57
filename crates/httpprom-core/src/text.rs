//! Prometheus text exposition format (version 0.0.4).

use std::fmt::Write;

use crate::registry::{FamilySnapshot, SampleValue, Snapshot};

/// Content type served with [`Snapshot::encode_text`] output.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Helper to escape label values.
fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn escape_help(v: &str) -> String {
    v.replace('\\', "\\\\").replace('\n', "\\n")
}

fn fmt_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "+Inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        v.to_string()
    }
}

fn label_pairs(names: &[String], values: &[String]) -> Vec<String> {
    names
        .iter()
        .zip(values)
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
        .collect()
}

fn braces(pairs: &[String]) -> String {
    if pairs.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", pairs.join(","))
    }
}

impl Snapshot {
    /// Render every family as newline-delimited exposition text.
    pub fn encode_text(&self) -> String {
        let mut out = String::new();
        for family in &self.families {
            encode_family(family, &mut out);
        }
        out
    }
}

fn encode_family(f: &FamilySnapshot, out: &mut String) {
    let _ = writeln!(out, "# HELP {} {}", f.name, escape_help(&f.help));
    let _ = writeln!(out, "# TYPE {} {}", f.name, f.kind.as_str());

    for s in &f.series {
        let pairs = label_pairs(&f.label_names, &s.label_values);
        match &s.value {
            SampleValue::Counter(v) => {
                let _ = writeln!(out, "{}{} {}", f.name, braces(&pairs), v);
            }
            SampleValue::Histogram(h) => {
                for (le, count) in &h.buckets {
                    let mut with_le = pairs.clone();
                    with_le.push(format!("le=\"{}\"", fmt_float(*le)));
                    let _ = writeln!(out, "{}_bucket{} {}", f.name, braces(&with_le), count);
                }
                let mut with_inf = pairs.clone();
                with_inf.push("le=\"+Inf\"".to_string());
                let _ = writeln!(out, "{}_bucket{} {}", f.name, braces(&with_inf), h.count);
                let _ = writeln!(out, "{}_sum{} {}", f.name, braces(&pairs), fmt_float(h.sum));
                let _ = writeln!(out, "{}_count{} {}", f.name, braces(&pairs), h.count);
            }
        }
    }
}
