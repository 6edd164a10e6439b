//! Fetch decoder: query results to [`Series`].
//!
//! Two result shapes are supported:
//!
//! - wide rows (InfluxQL, 1.x): one response holds per-statement results,
//!   each a list of tagged sub-results whose first column is the timestamp
//!   and whose remaining columns each become one output series;
//! - narrow rows (Flux, 2.x): a list of grouped tables whose records carry a
//!   single `_value` each, decoded incrementally by [`FluxDecoder`].
//!
//! Decoding is all-or-nothing: any failure aborts the whole call and no
//! partially decoded series are returned.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::series::{SampleValue, Series};
use crate::time::{TimeUnit, instant_timestamp, wide_row_timestamp};
use crate::types::{FluxRecord, FluxTableMetadata};

/// Synthetic label holding the source table index in narrow-row mode.
const TABLE_LABEL: &str = "_table";

/// Flux window-bound columns, excluded from series labels.
const WINDOW_BOUND_COLUMNS: [&str; 2] = ["_start", "_stop"];

/// JSON body of an InfluxQL `/query` response.
#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    /// One entry per query statement.
    #[serde(default)]
    pub results: Vec<StatementResult>,
    /// Top-level error (authentication, malformed query, ...).
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of one InfluxQL statement.
#[derive(Debug, Deserialize)]
pub struct StatementResult {
    /// Tagged sub-results.
    #[serde(default)]
    pub series: Vec<WideSeries>,
    /// Statement-level error.
    #[serde(default)]
    pub error: Option<String>,
}

/// One tagged sub-result: shared tag set, column list, value rows.
#[derive(Debug, Deserialize)]
pub struct WideSeries {
    /// Measurement name.
    #[serde(default)]
    pub name: String,
    /// Tag set shared by every row.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Column names; column 0 is the timestamp.
    #[serde(default)]
    pub columns: Vec<String>,
    /// Value rows, one cell per column.
    #[serde(default)]
    pub values: Vec<Vec<serde_json::Value>>,
}

/// Decode a full InfluxQL response into series, one inner list per statement.
///
/// The query must have been issued with `epoch=ns`, so timestamps arrive as
/// (floating point) nanosecond values. Fails with [`Error::Config`] when the
/// unit has no matching wire precision: the rescaling divisors are only
/// defined for ns/µs/ms units.
pub fn decode_influxql(mut response: QueryResponse, unit: TimeUnit) -> Result<Vec<Vec<Series>>> {
    unit.wire_precision()?;

    if let Some(message) = response.error {
        return Err(Error::QueryError {
            message,
            reference: None,
        });
    }

    let mut all = Vec::with_capacity(response.results.len());
    for result in &mut response.results {
        if let Some(message) = result.error.take() {
            return Err(Error::QueryError {
                message,
                reference: None,
            });
        }

        let mut decoded = Vec::new();
        for serie in &mut result.series {
            decoded.extend(decode_wide_series(serie, unit)?);
        }
        all.push(decoded);
    }

    debug!(
        statements = all.len(),
        series = all.iter().map(Vec::len).sum::<usize>(),
        "decoded influxql response"
    );
    Ok(all)
}

/// Decode one wide sub-result into one series per value column.
fn decode_wide_series(serie: &mut WideSeries, unit: TimeUnit) -> Result<Vec<Series>> {
    let mut out = Vec::new();

    // Column 0 is the timestamp; every other column becomes a series. The
    // first value column converts the timestamp cell in place, so it must be
    // processed before any other column of the same row.
    for i in 1..serie.columns.len() {
        let name = format!("{} {}", serie.name, serie.columns[i]);
        let mut series = Series::with_capacity(name, serie.tags.clone(), serie.values.len());

        for row in serie.values.iter_mut() {
            let timestamp = if i == 1 {
                let nanos = row.first().and_then(serde_json::Value::as_f64).ok_or_else(|| {
                    Error::Parse {
                        message: format!(
                            "non-numeric timestamp in series '{}'",
                            series.name()
                        ),
                    }
                })?;
                let ts = wide_row_timestamp(nanos, unit);
                // Overwrite so later columns reuse the converted value.
                row[0] = serde_json::Value::from(ts);
                ts
            } else {
                row.first().and_then(serde_json::Value::as_i64).ok_or_else(|| {
                    Error::Parse {
                        message: format!(
                            "missing converted timestamp in series '{}'",
                            series.name()
                        ),
                    }
                })?
            };

            let cell = match row.get(i) {
                Some(c) => c,
                None => {
                    return Err(Error::ColumnMismatch {
                        expected: serie.columns.len(),
                        actual: row.len(),
                    });
                }
            };

            // Null cells produce no sample.
            if cell.is_null() {
                continue;
            }

            series.append(timestamp, json_sample_value(cell, &serie.columns[i])?)?;
        }

        out.push(series);
    }

    Ok(out)
}

/// Map a JSON cell to a sample value, 1:1 with no coercion.
fn json_sample_value(cell: &serde_json::Value, column: &str) -> Result<SampleValue> {
    match cell {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(SampleValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(SampleValue::Float(f))
            } else {
                Err(Error::Parse {
                    message: format!("number {} in column '{}' is out of range", n, column),
                })
            }
        }
        serde_json::Value::Bool(b) => Ok(SampleValue::Boolean(*b)),
        serde_json::Value::String(s) => Ok(SampleValue::Text(s.clone())),
        other => Err(Error::Parse {
            message: format!("unsupported value {} in column '{}'", other, column),
        }),
    }
}

/// Incremental decoder for narrow-row (Flux) results.
///
/// Feed it `(table metadata, record)` pairs in stream order; labels are
/// computed once per table from its first record, and every table gets a
/// synthetic table-index label so two tables can never merge into one series.
#[derive(Debug)]
pub struct FluxDecoder {
    unit: TimeUnit,
    series: Vec<Series>,
    index: HashMap<BTreeMap<String, String>, usize>,
    current: Option<TableState>,
}

#[derive(Debug)]
struct TableState {
    table: i64,
    series_idx: usize,
}

/// The table a record belongs to: tables sharing one annotation block are
/// told apart by the `table` column, so that wins over the parser-assigned
/// block position.
fn table_index(record: &FluxRecord) -> i64 {
    record
        .get_long("table")
        .unwrap_or_else(|| record.table as i64)
}

impl FluxDecoder {
    /// Create a decoder producing timestamps in the given internal unit.
    ///
    /// Fails with [`Error::Config`] when the unit has no matching wire
    /// precision, like [`decode_influxql`].
    pub fn new(unit: TimeUnit) -> Result<Self> {
        unit.wire_precision()?;
        Ok(FluxDecoder {
            unit,
            series: Vec::new(),
            index: HashMap::new(),
            current: None,
        })
    }

    /// Consume one record belonging to `meta`'s table.
    pub fn push(&mut self, meta: &FluxTableMetadata, record: &FluxRecord) -> Result<()> {
        let table = table_index(record);
        let series_idx = match &self.current {
            Some(state) if state.table == table => state.series_idx,
            _ => {
                let idx = self.start_table(meta, record);
                self.current = Some(TableState {
                    table,
                    series_idx: idx,
                });
                idx
            }
        };

        let time = record.time().ok_or_else(|| Error::Parse {
            message: format!("record in table {} has no _time column", table),
        })?;
        let timestamp =
            instant_timestamp(time.timestamp(), time.timestamp_subsec_nanos(), self.unit);

        let value = match record.value() {
            Some(v) => v.to_sample()?,
            None => {
                return Err(Error::Parse {
                    message: format!("record in table {} has no _value column", table),
                });
            }
        };

        // Null values produce no sample.
        if let Some(value) = value {
            self.series[series_idx].append(timestamp, value)?;
        }
        Ok(())
    }

    /// Compute the table's labels from its first record and allocate (or
    /// find) the series they identify. Returns its index.
    fn start_table(&mut self, meta: &FluxTableMetadata, record: &FluxRecord) -> usize {
        let table = table_index(record);
        let mut labels = BTreeMap::new();
        for col in meta.group_key() {
            if WINDOW_BOUND_COLUMNS.contains(&col.name.as_str()) {
                continue;
            }
            let value = record
                .get(&col.name)
                .map(|v| v.to_string())
                .unwrap_or_default();
            labels.insert(col.name.clone(), value);
        }

        // Probe for a free synthetic key by doubling the leading underscore
        // until the table index can be recorded without clobbering a natural
        // label.
        let mut table_label = TABLE_LABEL.to_string();
        while labels.contains_key(&table_label) {
            table_label.insert(0, '_');
        }
        labels.insert(table_label, table.to_string());

        if let Some(&idx) = self.index.get(&labels) {
            return idx;
        }

        let name = format!(
            "{} {} {}",
            table,
            record.measurement().unwrap_or_default(),
            record.field().unwrap_or_default()
        );
        let series = Series::new(name, labels.clone());
        self.series.push(series);
        let idx = self.series.len() - 1;
        self.index.insert(labels, idx);
        idx
    }

    /// Finish decoding and return the series in first-appearance order.
    pub fn finish(self) -> Vec<Series> {
        debug!(series = self.series.len(), "decoded flux tables");
        self.series
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use serde_json::json;

    fn response(body: serde_json::Value) -> QueryResponse {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_decode_wide_end_to_end() {
        let resp = response(json!({
            "results": [{
                "series": [{
                    "name": "m",
                    "tags": {"host": "x"},
                    "columns": ["time", "cpu", "mem"],
                    "values": [[1.0e9, 50, 70]]
                }]
            }]
        }));

        let all = decode_influxql(resp, TimeUnit::MICROSECONDS).unwrap();
        assert_eq!(all.len(), 1);
        let series = &all[0];
        assert_eq!(series.len(), 2);

        assert_eq!(series[0].name(), "m cpu");
        assert_eq!(series[1].name(), "m mem");
        for s in series {
            assert_eq!(s.labels().get("host").map(String::as_str), Some("x"));
            assert_eq!(s.len(), 1);
            assert_eq!(s.sample_at(0).unwrap().timestamp, 1_000_000);
        }
        assert_eq!(series[0].sample_at(0).unwrap().value, SampleValue::Integer(50));
        assert_eq!(series[1].sample_at(0).unwrap().value, SampleValue::Integer(70));
    }

    #[test]
    fn test_decode_wide_null_cells_are_skipped() {
        let resp = response(json!({
            "results": [{
                "series": [{
                    "name": "m",
                    "columns": ["time", "cpu", "mem"],
                    "values": [
                        [1.0e9, null, 70],
                        [2.0e9, 51, 71]
                    ]
                }]
            }]
        }));

        let all = decode_influxql(resp, TimeUnit::MICROSECONDS).unwrap();
        let series = &all[0];
        // The null cpu cell shortens that series only.
        assert_eq!(series[0].len(), 1);
        assert_eq!(series[0].sample_at(0).unwrap().timestamp, 2_000_000);
        assert_eq!(series[1].len(), 2);
        assert_eq!(series[1].sample_at(0).unwrap().timestamp, 1_000_000);
    }

    #[test]
    fn test_decode_wide_missing_tags_mean_empty_labels() {
        let resp = response(json!({
            "results": [{
                "series": [{
                    "name": "m",
                    "columns": ["time", "v"],
                    "values": [[1.0e9, 1.5]]
                }]
            }]
        }));
        let all = decode_influxql(resp, TimeUnit::MICROSECONDS).unwrap();
        assert!(all[0][0].labels().is_empty());
        assert_eq!(all[0][0].sample_at(0).unwrap().value, SampleValue::Float(1.5));
    }

    #[test]
    fn test_decode_wide_statement_error_fails_whole_call() {
        let resp = response(json!({
            "results": [{"error": "database not found"}]
        }));
        let err = decode_influxql(resp, TimeUnit::MICROSECONDS).unwrap_err();
        assert!(matches!(err, Error::QueryError { .. }));
    }

    #[test]
    fn test_decode_wide_preserves_statement_grouping() {
        let resp = response(json!({
            "results": [
                {"series": [{"name": "a", "columns": ["time", "x"], "values": [[1.0e9, 1]]}]},
                {"series": [{"name": "b", "columns": ["time", "y"], "values": [[1.0e9, 2]]}]}
            ]
        }));
        let all = decode_influxql(resp, TimeUnit::MICROSECONDS).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0][0].name(), "a x");
        assert_eq!(all[1][0].name(), "b y");
    }

    #[test]
    fn test_decode_rejects_unit_without_wire_precision() {
        // A minute-granularity unit has no ns/us/ms wire precision; both
        // decoders must refuse it up front instead of dividing by zero in
        // the timestamp rescalers.
        let resp = response(json!({
            "results": [{
                "series": [{"name": "m", "columns": ["time", "v"], "values": [[1.0e9, 1]]}]
            }]
        }));
        let err = decode_influxql(resp, TimeUnit::new(60)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = FluxDecoder::new(TimeUnit::new(60)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    // --- narrow-row mode -----------------------------------------------

    fn table_meta(position: i32, group: &[&str]) -> FluxTableMetadata {
        let names = ["_time", "_value", "_field", "_measurement"];
        let mut meta = FluxTableMetadata::new(position, names.len() + group.len());
        for (i, n) in names.iter().enumerate() {
            meta.columns[i].name = n.to_string();
        }
        for (i, n) in group.iter().enumerate() {
            meta.columns[names.len() + i].name = n.to_string();
            meta.columns[names.len() + i].group = true;
        }
        meta
    }

    fn record(table: i32, time: &str, value: Value, extra: &[(&str, &str)]) -> FluxRecord {
        let mut r = FluxRecord::new(table);
        r.values.insert(
            "_time".to_string(),
            Value::TimeRFC(chrono::DateTime::parse_from_rfc3339(time).unwrap()),
        );
        r.values.insert("_value".to_string(), value);
        r.values
            .insert("_measurement".to_string(), Value::String("sensors".to_string()));
        r.values
            .insert("_field".to_string(), Value::String("temp".to_string()));
        for (k, v) in extra {
            r.values
                .insert(k.to_string(), Value::String(v.to_string()));
        }
        r
    }

    #[test]
    fn test_flux_decoder_groups_by_table() {
        let meta = table_meta(0, &["room"]);
        let mut dec = FluxDecoder::new(TimeUnit::MICROSECONDS).unwrap();
        dec.push(
            &meta,
            &record(0, "1970-01-01T00:00:01Z", Value::Double(21.5.into()), &[("room", "a")]),
        )
        .unwrap();
        dec.push(
            &meta,
            &record(0, "1970-01-01T00:00:02Z", Value::Double(21.7.into()), &[("room", "a")]),
        )
        .unwrap();

        let series = dec.finish();
        assert_eq!(series.len(), 1);
        let s = &series[0];
        assert_eq!(s.name(), "0 sensors temp");
        assert_eq!(s.labels().get("room").map(String::as_str), Some("a"));
        assert_eq!(s.labels().get("_table").map(String::as_str), Some("0"));
        assert_eq!(s.len(), 2);
        assert_eq!(s.sample_at(0).unwrap().timestamp, 1_000_000);
        assert_eq!(s.sample_at(1).unwrap().timestamp, 2_000_000);
    }

    #[test]
    fn test_flux_decoder_distinct_tables_stay_distinct() {
        let meta0 = table_meta(0, &["room"]);
        let meta1 = table_meta(1, &["room"]);
        let mut dec = FluxDecoder::new(TimeUnit::MICROSECONDS).unwrap();
        // Identical group keys, different table indices.
        dec.push(
            &meta0,
            &record(0, "1970-01-01T00:00:01Z", Value::Long(1), &[("room", "a")]),
        )
        .unwrap();
        dec.push(
            &meta1,
            &record(1, "1970-01-01T00:00:01Z", Value::Long(2), &[("room", "a")]),
        )
        .unwrap();

        let series = dec.finish();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].labels().get("_table").map(String::as_str), Some("0"));
        assert_eq!(series[1].labels().get("_table").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_flux_decoder_table_label_collision_probes_underscores() {
        // The natural group key already contains a `_table` label.
        let meta = table_meta(0, &["_table"]);
        let mut dec = FluxDecoder::new(TimeUnit::MICROSECONDS).unwrap();
        dec.push(
            &meta,
            &record(0, "1970-01-01T00:00:01Z", Value::Long(1), &[("_table", "keep")]),
        )
        .unwrap();

        let series = dec.finish();
        let labels = series[0].labels();
        assert_eq!(labels.get("_table").map(String::as_str), Some("keep"));
        assert_eq!(labels.get("__table").map(String::as_str), Some("0"));
    }

    #[test]
    fn test_flux_decoder_excludes_window_bounds() {
        let meta = table_meta(0, &["_start", "_stop", "room"]);
        let mut dec = FluxDecoder::new(TimeUnit::MICROSECONDS).unwrap();
        dec.push(
            &meta,
            &record(
                0,
                "1970-01-01T00:00:01Z",
                Value::Long(1),
                &[("_start", "s"), ("_stop", "e"), ("room", "a")],
            ),
        )
        .unwrap();

        let series = dec.finish().remove(0);
        assert!(!series.labels().contains_key("_start"));
        assert!(!series.labels().contains_key("_stop"));
        assert!(series.labels().contains_key("room"));
    }

    #[test]
    fn test_flux_decoder_skips_null_values() {
        let meta = table_meta(0, &[]);
        let mut dec = FluxDecoder::new(TimeUnit::MICROSECONDS).unwrap();
        dec.push(&meta, &record(0, "1970-01-01T00:00:01Z", Value::Null, &[]))
            .unwrap();
        dec.push(&meta, &record(0, "1970-01-01T00:00:02Z", Value::Long(3), &[]))
            .unwrap();

        let series = dec.finish();
        assert_eq!(series[0].len(), 1);
        assert_eq!(series[0].sample_at(0).unwrap().value, SampleValue::Integer(3));
    }
}
