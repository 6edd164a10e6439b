//! Async parser for InfluxDB annotated CSV.
//!
//! The `/api/v2/query` endpoint answers in annotated CSV: each table is
//! preceded by `#datatype`, `#group` and `#default` annotation rows plus a
//! header row. The parser reads an async byte stream and yields one
//! [`FluxRecord`] at a time; the current table's metadata (including its
//! group key) stays available through [`AnnotatedCsvParser::table`] so the
//! fetch decoder can compute series labels.

use std::collections::BTreeMap;
use std::str::FromStr;

use base64::Engine;
use chrono::DateTime;
use csv_async::{AsyncReaderBuilder, Trim};
use futures::StreamExt;
use go_parse_duration::parse_duration;
use ordered_float::OrderedFloat;
use tokio::io::AsyncRead;

use crate::error::{Error, Result};
use crate::types::{DataType, FluxRecord, FluxTableMetadata};
use crate::value::Value;

/// Internal state of the CSV parser.
#[derive(PartialEq)]
enum ParsingState {
    /// Normal data rows.
    Normal,
    /// Processing annotation rows.
    Annotation,
    /// Error state (InfluxDB returned an error in the CSV).
    Error,
}

/// Streaming parser for InfluxDB annotated CSV.
///
/// Yields records one at a time without buffering the response. Tables are
/// numbered in order of appearance; records carry their table index.
pub struct AnnotatedCsvParser<R: AsyncRead + Unpin> {
    csv: csv_async::AsyncReader<R>,
    next_table_position: i32,
    table: Option<FluxTableMetadata>,
    state: ParsingState,
    datatype_seen: bool,
}

impl<R: AsyncRead + Unpin + Send> AnnotatedCsvParser<R> {
    /// Create a new parser from an async reader.
    pub fn new(reader: R) -> Self {
        let csv = AsyncReaderBuilder::new()
            .has_headers(false) // Annotations and headers are handled here.
            .trim(Trim::Fields)
            .flexible(true)
            .create_reader(reader);

        Self {
            csv,
            next_table_position: 0,
            table: None,
            state: ParsingState::Normal,
            datatype_seen: false,
        }
    }

    /// Metadata of the table the most recent record belongs to.
    pub fn table(&self) -> Option<&FluxTableMetadata> {
        self.table.as_ref()
    }

    /// Parse and return the next record.
    ///
    /// Returns `Ok(None)` at end of stream.
    pub async fn next(&mut self) -> Result<Option<FluxRecord>> {
        let mut records = self.csv.records();

        loop {
            let row = match records.next().await {
                Some(Ok(r)) => r,
                Some(Err(e)) => return Err(Error::Csv(format!("CSV read error: {}", e))),
                None => return Ok(None),
            };

            // Skip empty rows and single-cell separators.
            if row.len() <= 1 {
                continue;
            }

            // A '#'-prefixed cell while in normal state opens a new table.
            if let Some(first) = row.get(0) {
                if first.starts_with('#') && self.state == ParsingState::Normal {
                    self.table = Some(FluxTableMetadata::new(
                        self.next_table_position,
                        row.len() - 1,
                    ));
                    self.next_table_position += 1;
                    self.state = ParsingState::Annotation;
                    self.datatype_seen = false;
                }
            }

            let table = match &mut self.table {
                Some(t) => t,
                None => {
                    return Err(Error::MissingAnnotation(
                        "No annotations found before data".to_string(),
                    ));
                }
            };

            if row.len() - 1 != table.columns.len() {
                return Err(Error::ColumnMismatch {
                    expected: table.columns.len(),
                    actual: row.len() - 1,
                });
            }

            match row.get(0).unwrap_or_default() {
                // Header or data row (first cell is empty).
                "" => match self.state {
                    ParsingState::Annotation => {
                        if !self.datatype_seen {
                            return Err(Error::MissingAnnotation(
                                "#datatype annotation not found".to_string(),
                            ));
                        }
                        if row.get(1).unwrap_or_default() == "error" {
                            self.state = ParsingState::Error;
                        } else {
                            // Header row: fill in column names.
                            for i in 1..row.len() {
                                table.columns[i - 1].name = row.get(i).unwrap().to_string();
                            }
                            self.state = ParsingState::Normal;
                        }
                        continue;
                    }
                    ParsingState::Error => {
                        let message = match row.get(1) {
                            Some(m) if !m.is_empty() => m.to_string(),
                            _ => "Unknown query error".to_string(),
                        };
                        let reference = row
                            .get(2)
                            .filter(|r| !r.is_empty())
                            .map(|r| r.to_string());
                        return Err(Error::QueryError { message, reference });
                    }
                    ParsingState::Normal => {
                        let mut values = BTreeMap::new();
                        for i in 1..row.len() {
                            let col = &table.columns[i - 1];
                            let mut cell = row.get(i).unwrap();
                            if cell.is_empty() {
                                cell = &col.default_value;
                            }
                            let parsed = parse_value(cell, col.data_type, &col.name)?;
                            values.insert(col.name.clone(), parsed);
                        }
                        return Ok(Some(FluxRecord {
                            table: table.position,
                            values,
                        }));
                    }
                },
                "#datatype" => {
                    self.datatype_seen = true;
                    for i in 1..row.len() {
                        table.columns[i - 1].data_type = DataType::from_str(row.get(i).unwrap())?;
                    }
                }
                "#group" => {
                    for i in 1..row.len() {
                        table.columns[i - 1].group = row.get(i).unwrap() == "true";
                    }
                }
                "#default" => {
                    for i in 1..row.len() {
                        table.columns[i - 1].default_value = row.get(i).unwrap().to_string();
                    }
                }
                other => {
                    return Err(Error::Parse {
                        message: format!("Invalid first cell: {}", other),
                    });
                }
            }
        }
    }
}

/// Parse a CSV cell into a Value based on the column's data type.
fn parse_value(s: &str, data_type: DataType, column_name: &str) -> Result<Value> {
    // Empty cells of non-string columns are null.
    if s.is_empty() && data_type != DataType::String {
        return Ok(Value::Null);
    }

    match data_type {
        DataType::String => Ok(Value::String(s.to_string())),
        DataType::Double => {
            let v = s.parse::<f64>().map_err(|e| Error::Parse {
                message: format!("Invalid double '{}' for column '{}': {}", s, column_name, e),
            })?;
            Ok(Value::Double(OrderedFloat::from(v)))
        }
        DataType::Bool => Ok(Value::Bool(s.to_lowercase() != "false")),
        DataType::Long => {
            let v = s.parse::<i64>().map_err(|e| Error::Parse {
                message: format!("Invalid long '{}' for column '{}': {}", s, column_name, e),
            })?;
            Ok(Value::Long(v))
        }
        DataType::UnsignedLong => {
            let v = s.parse::<u64>().map_err(|e| Error::Parse {
                message: format!(
                    "Invalid unsignedLong '{}' for column '{}': {}",
                    s, column_name, e
                ),
            })?;
            Ok(Value::UnsignedLong(v))
        }
        DataType::Duration => {
            let nanos = parse_duration(s).map_err(|_| Error::Parse {
                message: format!("Invalid duration '{}' for column '{}'", s, column_name),
            })?;
            Ok(Value::Duration(chrono::Duration::nanoseconds(nanos)))
        }
        DataType::Base64Binary => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(s)
                .map_err(|e| Error::Parse {
                    message: format!("Invalid base64 '{}' for column '{}': {}", s, column_name, e),
                })?;
            Ok(Value::Base64Binary(bytes))
        }
        DataType::TimeRFC => {
            let t = DateTime::parse_from_rfc3339(s).map_err(|e| Error::Parse {
                message: format!(
                    "Invalid RFC3339 timestamp '{}' for column '{}': {}",
                    s, column_name, e
                ),
            })?;
            Ok(Value::TimeRFC(t))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CSV: &str = "\
#datatype,string,long,dateTime:RFC3339,dateTime:RFC3339,dateTime:RFC3339,double,string,string,string\n\
#group,false,false,true,true,false,false,true,true,true\n\
#default,_result,,,,,,,,\n\
,result,table,_start,_stop,_time,_value,_field,_measurement,room\n\
,,0,2023-01-01T00:00:00Z,2023-01-02T00:00:00Z,2023-01-01T00:00:01Z,21.5,temp,sensors,a\n\
,,0,2023-01-01T00:00:00Z,2023-01-02T00:00:00Z,2023-01-01T00:00:02Z,21.7,temp,sensors,a\n";

    #[tokio::test]
    async fn test_parse_annotated_csv_table() {
        let mut parser = AnnotatedCsvParser::new(SAMPLE_CSV.as_bytes());

        let first = parser.next().await.unwrap().unwrap();
        assert_eq!(first.table, 0);
        assert_eq!(first.get_double("_value"), Some(21.5));
        assert_eq!(first.measurement().as_deref(), Some("sensors"));
        assert_eq!(first.field().as_deref(), Some("temp"));
        assert!(first.time().is_some());

        // Group key is visible through the table metadata.
        let meta = parser.table().unwrap();
        let key: Vec<&str> = meta.group_key().map(|c| c.name.as_str()).collect();
        assert_eq!(key, vec!["_start", "_stop", "_field", "_measurement", "room"]);

        let second = parser.next().await.unwrap().unwrap();
        assert_eq!(second.get_double("_value"), Some(21.7));

        assert!(parser.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_parse_error_table() {
        let csv = "\
#datatype,string,string\n\
#group,true,true\n\
#default,,\n\
,error,reference\n\
,compilation failed,\n";
        let mut parser = AnnotatedCsvParser::new(csv.as_bytes());
        let err = parser.next().await.unwrap_err();
        match err {
            Error::QueryError { message, reference } => {
                assert_eq!(message, "compilation failed");
                assert!(reference.is_none());
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_data_before_annotations_fails() {
        let csv = ",result,table\n,,0\n";
        let mut parser = AnnotatedCsvParser::new(csv.as_bytes());
        assert!(matches!(
            parser.next().await,
            Err(Error::MissingAnnotation(_))
        ));
    }

    #[test]
    fn test_parse_value_basic_types() {
        assert_eq!(
            parse_value("hello", DataType::String, "c").unwrap(),
            Value::String("hello".to_string())
        );
        assert_eq!(
            parse_value("3.14", DataType::Double, "c").unwrap(),
            Value::Double(OrderedFloat::from(3.14))
        );
        assert_eq!(parse_value("true", DataType::Bool, "c").unwrap(), Value::Bool(true));
        assert_eq!(parse_value("false", DataType::Bool, "c").unwrap(), Value::Bool(false));
        assert_eq!(parse_value("-42", DataType::Long, "c").unwrap(), Value::Long(-42));
    }

    #[test]
    fn test_parse_value_empty_is_null() {
        assert_eq!(parse_value("", DataType::Long, "c").unwrap(), Value::Null);
        assert_eq!(parse_value("", DataType::Double, "c").unwrap(), Value::Null);
        // Empty strings stay strings.
        assert_eq!(
            parse_value("", DataType::String, "c").unwrap(),
            Value::String(String::new())
        );
    }
}
