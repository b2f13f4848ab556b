//! Case-insensitive, multi-valued HTTP headers.
//!
//! # Responsibilities
//! - Store header names folded to lower case
//! - Keep every value of a name, in arrival order
//! - Derive `content-length` and `connection` from the same storage
//!
//! # Design Decisions
//! - Insertion order of names is preserved so serialization is stable
//! - Values are opaque strings; only `content-length` and `connection` carry meaning
//! - Copy-on-write: `plus`/`with` return a new value, the original is never touched

use indexmap::IndexMap;
use std::fmt;

pub const CONTENT_LENGTH: &str = "content-length";
pub const CONNECTION: &str = "connection";
pub const CONTENT_TYPE: &str = "content-type";

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: IndexMap<String, Vec<String>>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build headers from `(name, value)` pairs.
    ///
    /// Pairs sharing a name (in any letter case) are grouped under one entry,
    /// keeping their relative order.
    pub fn from_pairs<I, N, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: Into<String>,
    {
        let mut headers = Self::new();
        for (name, value) in pairs {
            headers.append(name.as_ref(), value.into());
        }
        headers
    }

    pub(crate) fn append(&mut self, name: &str, value: String) {
        self.entries
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value);
    }

    pub(crate) fn extend_values<I>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.entries
            .entry(name.to_ascii_lowercase())
            .or_default()
            .extend(values);
    }

    /// All values of `name`, empty when absent.
    pub fn get(&self, name: &str) -> &[String] {
        self.entries
            .get(name.to_ascii_lowercase().as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// First value of `name`.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name).first().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        !self.get(name).is_empty()
    }

    /// Declared body length. Absent or non-numeric values resolve to zero.
    pub fn content_length(&self) -> usize {
        self.first(CONTENT_LENGTH)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn connection(&self) -> Option<&str> {
        self.first(CONNECTION)
    }

    /// True when the `Connection` header asks to close after this message.
    pub fn is_connection_close(&self) -> bool {
        self.connection()
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("close"))
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// A copy with one more `(name, value)` pair appended.
    pub fn plus(&self, name: &str, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.append(name, value.into());
        next
    }

    /// A copy where `name` carries only `value`.
    pub fn with(&self, name: &str, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.entries
            .insert(name.to_ascii_lowercase(), vec![value.into()]);
        next
    }

    pub fn with_content_length(&self, length: usize) -> Self {
        self.with(CONTENT_LENGTH, length.to_string())
    }

    pub fn with_content_type(&self, media_type: &str) -> Self {
        self.with(CONTENT_TYPE, media_type)
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

impl<N: AsRef<str>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        Self::from_pairs(iter)
    }
}
