//! Write encoder: [`Series`] to line-protocol point batches.
//!
//! Every sample becomes exactly one [`Point`]: the series labels as tags,
//! the series name as field name, and optional location/elevation decoded
//! into `lat`/`lon`/`elev` fields on the same point. Points flow through a
//! [`BatchWriter`] which flushes fixed-size line-protocol bodies to a
//! [`WriteSink`].
//!
//! Writes are at-least-once: batches flushed before a failure stay applied,
//! nothing is rolled back.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::future::Future;

use tracing::debug;

use crate::error::{Error, Result};
use crate::geo;
use crate::series::{Sample, SampleValue, Series};
use crate::time::{Precision, TimeUnit, internal_to_wire};

/// Extra field carrying the sample elevation.
pub const FIELD_ELEVATION: &str = "elev";
/// Extra field carrying the decoded latitude.
pub const FIELD_LATITUDE: &str = "lat";
/// Extra field carrying the decoded longitude.
pub const FIELD_LONGITUDE: &str = "lon";

/// Hard ceiling on the number of points per batch.
pub const MAX_BATCH_SIZE: usize = 10_000;
/// Batch size used when the caller does not specify one.
pub const DEFAULT_BATCH_SIZE: usize = MAX_BATCH_SIZE >> 2;

/// Options for a write pipeline run.
#[derive(Clone, Debug)]
pub struct WriteOptions {
    /// Default measurement for every point.
    pub measurement: String,
    /// Series attribute that overrides the measurement when present.
    pub measurement_attr: Option<String>,
    /// Requested batch size; clamped to [`MAX_BATCH_SIZE`], defaults to
    /// [`DEFAULT_BATCH_SIZE`].
    pub batch_size: Option<usize>,
}

impl WriteOptions {
    /// Options writing every point under `measurement`.
    pub fn new(measurement: impl Into<String>) -> Self {
        WriteOptions {
            measurement: measurement.into(),
            measurement_attr: None,
            batch_size: None,
        }
    }
}

/// A field value on a point, mapped 1:1 from a sample value.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// Integer field (`i`-suffixed on the wire).
    Integer(i64),
    /// Float field.
    Float(f64),
    /// Boolean field.
    Boolean(bool),
    /// String field.
    Text(String),
}

impl From<&SampleValue> for FieldValue {
    fn from(value: &SampleValue) -> Self {
        match value {
            SampleValue::Integer(i) => FieldValue::Integer(*i),
            SampleValue::Float(f) => FieldValue::Float(*f),
            SampleValue::Boolean(b) => FieldValue::Boolean(*b),
            SampleValue::Text(s) => FieldValue::Text(s.clone()),
        }
    }
}

/// One unit of write: measurement, tags, fields and a wire timestamp.
///
/// The timestamp is already expressed in the pipeline's wire precision; the
/// precision itself travels as a property of the write request.
#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    /// Measurement name.
    pub measurement: String,
    /// Tag set, attached verbatim from the series labels.
    pub tags: BTreeMap<String, String>,
    /// Field name to value mapping.
    pub fields: BTreeMap<String, FieldValue>,
    /// Timestamp in wire precision.
    pub timestamp: i64,
}

impl Point {
    /// Serialize this point as one line-protocol line, appending to `out`.
    pub fn write_line(&self, out: &mut String) {
        escape_name(out, &self.measurement);
        for (key, value) in &self.tags {
            out.push(',');
            escape_key(out, key);
            out.push('=');
            escape_key(out, value);
        }
        out.push(' ');
        let mut first = true;
        for (key, value) in &self.fields {
            if !first {
                out.push(',');
            }
            first = false;
            escape_key(out, key);
            out.push('=');
            match value {
                FieldValue::Integer(i) => {
                    let _ = write!(out, "{}i", i);
                }
                FieldValue::Float(f) => {
                    let _ = write!(out, "{}", f);
                }
                FieldValue::Boolean(b) => {
                    let _ = write!(out, "{}", b);
                }
                FieldValue::Text(s) => {
                    out.push('"');
                    for c in s.chars() {
                        if c == '"' || c == '\\' {
                            out.push('\\');
                        }
                        out.push(c);
                    }
                    out.push('"');
                }
            }
        }
        let _ = write!(out, " {}", self.timestamp);
        out.push('\n');
    }
}

/// Escape a measurement name (commas and spaces).
fn escape_name(out: &mut String, s: &str) {
    for c in s.chars() {
        if c == ',' || c == ' ' {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Escape a tag key, tag value or field key (commas, equals, spaces).
fn escape_key(out: &mut String, s: &str) {
    for c in s.chars() {
        if c == ',' || c == '=' || c == ' ' {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Build the point for one sample of a series.
///
/// A non-empty location decodes into `lat`/`lon` fields and a non-empty
/// elevation adds `elev`, all on the same point, never as separate points.
pub fn point_for_sample(
    series: &Series,
    sample: &Sample,
    measurement: &str,
    unit: TimeUnit,
    precision: Precision,
) -> Point {
    let mut fields = BTreeMap::new();

    if let Some(location) = sample.location {
        let (lat, lon) = geo::unpack(location);
        fields.insert(FIELD_LATITUDE.to_string(), FieldValue::Float(lat));
        fields.insert(FIELD_LONGITUDE.to_string(), FieldValue::Float(lon));
    }
    if let Some(elevation) = sample.elevation {
        fields.insert(FIELD_ELEVATION.to_string(), FieldValue::Integer(elevation));
    }
    fields.insert(series.name().to_string(), FieldValue::from(&sample.value));

    Point {
        measurement: measurement.to_string(),
        tags: series.labels().clone(),
        fields,
        timestamp: internal_to_wire(sample.timestamp, unit, precision),
    }
}

/// The measurement for a series: the configured attribute overrides the
/// default when the series carries it. Evaluated once per series.
pub fn resolve_measurement<'a>(series: &'a Series, opts: &'a WriteOptions) -> &'a str {
    if let Some(attr) = &opts.measurement_attr {
        if let Some(measurement) = series.attributes().get(attr) {
            return measurement;
        }
    }
    &opts.measurement
}

/// External sink receiving flushed line-protocol bodies.
pub trait WriteSink {
    /// Submit one batch body. Called once per flush.
    fn send(&mut self, body: String) -> impl Future<Output = Result<()>> + Send;
}

impl<S: WriteSink + Send> WriteSink for &mut S {
    fn send(&mut self, body: String) -> impl Future<Output = Result<()>> + Send {
        (**self).send(body)
    }
}

/// Accumulates points and flushes them to a sink in size-bounded batches.
pub struct BatchWriter<S: WriteSink> {
    sink: S,
    capacity: usize,
    buffered: Vec<Point>,
    closed: bool,
}

impl<S: WriteSink> BatchWriter<S> {
    /// Create a writer around `sink`.
    ///
    /// `batch_size` is clamped to `1..=`[`MAX_BATCH_SIZE`]; when
    /// unspecified, [`DEFAULT_BATCH_SIZE`] applies.
    pub fn new(sink: S, batch_size: Option<usize>) -> Self {
        let capacity = batch_size
            .map(|b| b.clamp(1, MAX_BATCH_SIZE))
            .unwrap_or(DEFAULT_BATCH_SIZE);
        BatchWriter {
            sink,
            capacity,
            buffered: Vec::new(),
            closed: false,
        }
    }

    /// Effective batch size after clamping/defaulting.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffer one point, flushing when the batch is full.
    pub async fn write_point(&mut self, point: Point) -> Result<()> {
        if self.closed {
            return Err(Error::WriterClosed);
        }
        self.buffered.push(point);
        if self.buffered.len() >= self.capacity {
            self.flush().await?;
        }
        Ok(())
    }

    /// Serialize and send all buffered points.
    pub async fn flush(&mut self) -> Result<()> {
        if self.buffered.is_empty() {
            return Ok(());
        }
        let mut body = String::new();
        for point in self.buffered.drain(..) {
            point.write_line(&mut body);
        }
        debug!(bytes = body.len(), "flushing point batch");
        self.sink.send(body).await
    }

    /// Flush remaining points and forbid further writes.
    ///
    /// Runs on every exit path of the write pipeline, success or error.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let flushed = self.flush().await;
        self.closed = true;
        flushed
    }
}

/// Encode all series through one shared batch writer (2.x mode).
///
/// The writer and its sink are flushed and closed on every exit path; any
/// failure is wrapped exactly once as [`Error::Write`].
pub async fn write_batched<S: WriteSink>(
    sink: S,
    series: &[Series],
    opts: &WriteOptions,
    unit: TimeUnit,
    precision: Precision,
) -> Result<()> {
    let mut writer = BatchWriter::new(sink, opts.batch_size);
    let result = encode_all(&mut writer, series, opts, unit, precision).await;
    let closed = writer.close().await;
    result.and(closed).map_err(|e| e.into_write("batched series write"))
}

async fn encode_all<S: WriteSink>(
    writer: &mut BatchWriter<S>,
    series: &[Series],
    opts: &WriteOptions,
    unit: TimeUnit,
    precision: Precision,
) -> Result<()> {
    for s in series {
        let measurement = resolve_measurement(s, opts);
        for sample in s.samples() {
            let point = point_for_sample(s, sample, measurement, unit, precision);
            writer.write_point(point).await?;
        }
    }
    Ok(())
}

/// Encode each series as one unbounded batch of its own (1.x mode).
///
/// Timestamps are written in nanoseconds regardless of the internal unit,
/// matching the legacy protocol's write path.
pub async fn write_per_series<S: WriteSink>(
    sink: &mut S,
    series: &[Series],
    opts: &WriteOptions,
    unit: TimeUnit,
) -> Result<()> {
    for s in series {
        let measurement = resolve_measurement(s, opts);
        let mut body = String::new();
        for sample in s.samples() {
            point_for_sample(s, sample, measurement, unit, Precision::Nanoseconds)
                .write_line(&mut body);
        }
        if body.is_empty() {
            continue;
        }
        debug!(series = s.name(), bytes = body.len(), "writing series batch");
        sink.send(body)
            .await
            .map_err(|e| e.into_write("per-series batch write"))?;
    }
    Ok(())
}
