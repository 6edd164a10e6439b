//! # influxdb-bridge
//!
//! Bidirectional bridge between a canonical in-memory time-series model and
//! InfluxDB 1.x/2.x: query results decode into labeled [`Series`], and
//! series encode into batched line-protocol writes.
//!
//! ## Fetch
//!
//! ```ignore
//! use influxdb_bridge::{Client, Credentials, TimeUnit};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new(
//!         "http://localhost:8086",
//!         "my-org",
//!         Credentials::Token("my-token".into()),
//!         TimeUnit::MICROSECONDS,
//!     )?;
//!
//!     let series = client.fetch_flux(r#"
//!         from(bucket: "sensors")
//!         |> range(start: -30d)
//!         |> filter(fn: (r) => r._measurement == "temperature")
//!     "#).await?;
//!
//!     for s in &series {
//!         println!("{} {:?}: {} samples", s.name(), s.labels(), s.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Write
//!
//! ```ignore
//! use influxdb_bridge::{Series, WriteOptions};
//! use std::collections::BTreeMap;
//!
//! let mut series = Series::new("temp", BTreeMap::from([("room".into(), "a".into())]));
//! series.append(1000, 21.5)?;
//! series.append(2000, 21.7)?;
//!
//! client.write_series("my-bucket", &[series], &WriteOptions::new("sensors")).await?;
//! ```
//!
//! ## Design notes
//!
//! - Every series holds values of one kind only (integer, float, boolean or
//!   text); appends of a different kind fail without touching prior samples.
//! - All internal timestamps are in one configured [`TimeUnit`]; the
//!   matching wire precision is derived once at client construction and
//!   fails fast when no precision matches.
//! - Fetches are all-or-nothing: a mid-response failure returns an error and
//!   no series. Writes are at-least-once: batches flushed before a failure
//!   stay applied.
//! - Samples can carry a packed location and an elevation; on write they
//!   become `lat`/`lon`/`elev` fields on the same point as the value.

pub mod client;
pub mod error;
pub mod fetch;
pub mod geo;
pub mod parser;
pub mod series;
pub mod time;
pub mod types;
pub mod value;
pub mod write;

// Re-export main types at crate root
pub use client::{Client, Credentials};
pub use error::{Error, Result};
pub use series::{Sample, SampleKind, SampleValue, Series};
pub use time::{Precision, TimeUnit};
pub use types::{DataType, FluxColumn, FluxRecord, FluxTableMetadata};
pub use value::Value;
pub use write::{BatchWriter, Point, WriteOptions, WriteSink};

// Re-export parser for advanced use cases
pub use parser::AnnotatedCsvParser;
