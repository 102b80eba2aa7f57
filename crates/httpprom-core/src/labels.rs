//! Label sets and the HTTP label extractor.

use std::fmt;

/// Response status code label.
pub const LABEL_CODE: &str = "code";
/// Upper-cased request method label.
pub const LABEL_METHOD: &str = "method";
/// Normalized route label, only when enabled.
pub const LABEL_PATH: &str = "path";

/// Ordered `name -> value` pairs for one observation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet {
    pairs: Vec<(String, String)>,
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a label (builder style).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push((name.into(), value.into()));
        self
    }

    /// Value of `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Label names in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.pairs.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in self.iter() {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

/// HTTP label names in declaration order.
pub fn http_label_names(with_path: bool) -> Vec<String> {
    let mut names = vec![LABEL_CODE.to_string(), LABEL_METHOD.to_string()];
    if with_path {
        names.push(LABEL_PATH.to_string());
    }
    names
}

/// Build the label set for one completed HTTP transaction.
///
/// `method` is uppercased; `path` is included only when given.
pub fn http_labels(method: &str, code: u16, path: Option<&str>) -> LabelSet {
    let set = LabelSet::new()
        .with(LABEL_CODE, code.to_string())
        .with(LABEL_METHOD, method.to_ascii_uppercase());
    match path {
        Some(p) => set.with(LABEL_PATH, p),
        None => set,
    }
}

/// Normalize a request path for use as a label value.
///
/// UUID and numeric segments collapse to `:id`, trailing slashes are dropped.
pub fn normalize_path(path: &str) -> String {
    let path = path.trim_end_matches('/');
    if path.is_empty() {
        return "/".to_string();
    }

    path.split('/')
        .map(|seg| if is_uuid(seg) || is_numeric(seg) { ":id" } else { seg })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_uuid(s: &str) -> bool {
    if s.len() != 36 {
        return false;
    }
    let parts: Vec<&str> = s.split('-').collect();
    if parts.len() != 5 {
        return false;
    }
    parts
        .iter()
        .zip([8usize, 4, 4, 4, 12])
        .all(|(part, len)| part.len() == len && part.chars().all(|c| c.is_ascii_hexdigit()))
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}
