//! The canonical in-memory time series model.
//!
//! A [`Series`] is the exchange format shared by the fetch and write
//! pipelines: an append-only sequence of samples, tagged with a name and a
//! set of string labels. All samples of one series hold values of the same
//! kind; [`Series::append`] enforces this at insertion time so downstream
//! consumers can treat a whole series as homogeneously typed.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// A sample value: the closed set of types a series can hold.
#[derive(Clone, Debug, PartialEq)]
pub enum SampleValue {
    /// Signed 64-bit integer.
    Integer(i64),
    /// 64-bit floating point.
    Float(f64),
    /// Boolean.
    Boolean(bool),
    /// UTF-8 text.
    Text(String),
}

impl SampleValue {
    /// The kind tag of this value, used for homogeneity checks.
    pub fn kind(&self) -> SampleKind {
        match self {
            SampleValue::Integer(_) => SampleKind::Integer,
            SampleValue::Float(_) => SampleKind::Float,
            SampleValue::Boolean(_) => SampleKind::Boolean,
            SampleValue::Text(_) => SampleKind::Text,
        }
    }
}

impl From<i64> for SampleValue {
    fn from(v: i64) -> Self {
        SampleValue::Integer(v)
    }
}

impl From<f64> for SampleValue {
    fn from(v: f64) -> Self {
        SampleValue::Float(v)
    }
}

impl From<bool> for SampleValue {
    fn from(v: bool) -> Self {
        SampleValue::Boolean(v)
    }
}

impl From<String> for SampleValue {
    fn from(v: String) -> Self {
        SampleValue::Text(v)
    }
}

impl From<&str> for SampleValue {
    fn from(v: &str) -> Self {
        SampleValue::Text(v.to_string())
    }
}

/// Runtime kind of a [`SampleValue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleKind {
    /// Signed 64-bit integer.
    Integer,
    /// 64-bit floating point.
    Float,
    /// Boolean.
    Boolean,
    /// UTF-8 text.
    Text,
}

impl std::fmt::Display for SampleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SampleKind::Integer => "integer",
            SampleKind::Float => "float",
            SampleKind::Boolean => "boolean",
            SampleKind::Text => "text",
        };
        f.write_str(s)
    }
}

/// One observation in a series.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// Timestamp in the internal time unit.
    pub timestamp: i64,
    /// Optional packed location, see [`crate::geo`].
    pub location: Option<u64>,
    /// Optional elevation in millimeters.
    pub elevation: Option<i64>,
    /// The measured value.
    pub value: SampleValue,
}

/// A named, labeled, append-only sequence of samples.
///
/// Created empty by the fetch decoder per distinct (label-set, name) group,
/// or built whole by the caller as write input. Each instance belongs to
/// exactly one pipeline invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct Series {
    name: String,
    labels: BTreeMap<String, String>,
    attributes: BTreeMap<String, String>,
    samples: Vec<Sample>,
}

impl Series {
    /// Create an empty series with a name and label set.
    pub fn new(name: impl Into<String>, labels: BTreeMap<String, String>) -> Self {
        Self::with_capacity(name, labels, 0)
    }

    /// Create an empty series pre-sized for `capacity` samples.
    pub fn with_capacity(
        name: impl Into<String>,
        labels: BTreeMap<String, String>,
        capacity: usize,
    ) -> Self {
        Series {
            name: name.into(),
            labels,
            attributes: BTreeMap::new(),
            samples: Vec::with_capacity(capacity),
        }
    }

    /// Series name (measurement + field composite for fetched series).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Label set identifying this series among siblings.
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Free-form attributes; consulted for the per-series measurement
    /// override on write.
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Set an attribute.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when the series holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample at index `i`, if any.
    pub fn sample_at(&self, i: usize) -> Option<&Sample> {
        self.samples.get(i)
    }

    /// All samples, in insertion order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// The kind of values this series holds, set by the first append.
    pub fn kind(&self) -> Option<SampleKind> {
        self.samples.first().map(|s| s.value.kind())
    }

    /// Append a sample without geo metadata.
    ///
    /// Fails with [`Error::TypeMismatch`] when the value's kind differs from
    /// the samples already present; the series is left untouched in that case.
    pub fn append(&mut self, timestamp: i64, value: impl Into<SampleValue>) -> Result<()> {
        self.append_geo(timestamp, value, None, None)
    }

    /// Append a sample carrying an optional location and elevation.
    pub fn append_geo(
        &mut self,
        timestamp: i64,
        value: impl Into<SampleValue>,
        location: Option<u64>,
        elevation: Option<i64>,
    ) -> Result<()> {
        let value = value.into();
        if let Some(expected) = self.kind() {
            let actual = value.kind();
            if actual != expected {
                return Err(Error::TypeMismatch {
                    series: self.name.clone(),
                    expected,
                    actual,
                });
            }
        }
        self.samples.push(Sample {
            timestamp,
            location,
            elevation,
            value,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_append_and_accessors() {
        let mut s = Series::new("temp", labels(&[("room", "a")]));
        s.append(1000, 21.5).unwrap();
        s.append(2000, 21.7).unwrap();

        assert_eq!(s.name(), "temp");
        assert_eq!(s.labels().get("room").map(String::as_str), Some("a"));
        assert_eq!(s.len(), 2);
        assert_eq!(s.kind(), Some(SampleKind::Float));
        assert_eq!(s.sample_at(0).unwrap().timestamp, 1000);
        assert_eq!(s.sample_at(1).unwrap().value, SampleValue::Float(21.7));
        assert!(s.sample_at(2).is_none());
    }

    #[test]
    fn test_heterogeneous_append_is_rejected() {
        let mut s = Series::new("count", labels(&[]));
        s.append(1, 10i64).unwrap();
        s.append(2, 20i64).unwrap();

        let err = s.append(3, "ten").unwrap_err();
        match err {
            Error::TypeMismatch {
                series,
                expected,
                actual,
            } => {
                assert_eq!(series, "count");
                assert_eq!(expected, SampleKind::Integer);
                assert_eq!(actual, SampleKind::Text);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // Prior samples are untouched.
        assert_eq!(s.len(), 2);
        assert_eq!(s.sample_at(0).unwrap().value, SampleValue::Integer(10));
        assert_eq!(s.sample_at(1).unwrap().value, SampleValue::Integer(20));
    }

    #[test]
    fn test_first_append_fixes_the_kind() {
        let mut s = Series::new("state", labels(&[]));
        s.append(1, true).unwrap();
        assert!(s.append(2, 1i64).is_err());
        assert!(s.append(2, false).is_ok());
    }

    #[test]
    fn test_append_geo_carries_location_and_elevation() {
        let mut s = Series::new("pos", labels(&[]));
        let loc = crate::geo::pack(48.0, -4.5);
        s.append_geo(1000, 7.0, Some(loc), Some(120)).unwrap();

        let sample = s.sample_at(0).unwrap();
        assert_eq!(sample.location, Some(loc));
        assert_eq!(sample.elevation, Some(120));
    }

    #[test]
    fn test_with_capacity_starts_empty() {
        let s = Series::with_capacity("x", labels(&[]), 64);
        assert!(s.is_empty());
        assert_eq!(s.kind(), None);
    }
}
