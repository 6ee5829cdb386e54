//! Record extraction
//!
//! A raw payload carries a list of loosely typed elements under `records`
//! (or is itself that list). Each element is parsed into an [`Element`]; only
//! BAR elements become bars. Unknown kinds and invalid elements are counted
//! and skipped so one bad element never fails its batch.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{Measurements, NewBar, RawEvent};

/// Discriminator value of elements that become bars
pub const BAR_KIND: &str = "BAR";

/// Epoch values at or above this magnitude are read as milliseconds
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// Why an element was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ElementError {
    #[error("element is not a JSON object")]
    NotAnObject,

    #[error("element has no kind")]
    MissingKind,

    #[error("bar has no symbol")]
    MissingSymbol,

    #[error("bar has no positive integral tf_sec")]
    InvalidTimeframe,

    #[error("dedup key must be a string or a number")]
    InvalidDedup,
}

/// Validated contents of a BAR element
#[derive(Debug, Clone, PartialEq)]
pub struct BarFields {
    /// Explicit dedup key carried by the element, if any
    pub dedup: Option<String>,
    pub symbol: String,
    pub tf_sec: i32,
    pub bar_time: Option<DateTime<Utc>>,
    pub measurements: Measurements,
}

/// A payload element, keyed by its `kind`
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Bar(BarFields),
    /// Any other kind; skipped without error
    Unknown { kind: String },
}

impl Element {
    pub fn parse(value: &Value) -> Result<Self, ElementError> {
        let obj = value.as_object().ok_or(ElementError::NotAnObject)?;

        let kind = obj
            .get("kind")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ElementError::MissingKind)?;

        if !kind.eq_ignore_ascii_case(BAR_KIND) {
            return Ok(Element::Unknown { kind: kind.to_string() });
        }

        let symbol = obj
            .get("symbol")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .ok_or(ElementError::MissingSymbol)?;

        let tf_sec = integer(obj.get("tf_sec"))
            .filter(|tf| *tf > 0)
            .and_then(|tf| i32::try_from(tf).ok())
            .ok_or(ElementError::InvalidTimeframe)?;

        let dedup = explicit_dedup(first(obj, &["dedup", "dedup_key"]))?;

        Ok(Element::Bar(BarFields {
            dedup,
            symbol,
            tf_sec,
            bar_time: timestamp(first(obj, &["time", "ts"])),
            measurements: measurements(obj),
        }))
    }
}

/// Per-event extraction counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractStats {
    pub elements: u64,
    pub bars: u64,
    pub unknown_kind: u64,
    pub invalid: u64,
    /// Payloads without a record list
    pub malformed_payloads: u64,
}

impl ExtractStats {
    pub fn merge(&mut self, other: &ExtractStats) {
        self.elements += other.elements;
        self.bars += other.bars;
        self.unknown_kind += other.unknown_kind;
        self.invalid += other.invalid;
        self.malformed_payloads += other.malformed_payloads;
    }
}

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub bars: Vec<NewBar>,
    pub stats: ExtractStats,
}

/// Extract bar candidates from one raw event
///
/// Deterministic: extracting the same event again yields the same dedup keys,
/// which is what makes replay after a rollback safe.
pub fn extract(event: &RawEvent) -> Extraction {
    let mut out = Extraction::default();

    let Some(records) = record_list(&event.payload) else {
        tracing::debug!(raw_event_id = event.id, "Payload has no record list");
        out.stats.malformed_payloads += 1;
        return out;
    };

    for (index, element) in records.iter().enumerate() {
        out.stats.elements += 1;

        let Ok(element_index) = i32::try_from(index) else {
            out.stats.invalid += 1;
            continue;
        };

        match Element::parse(element) {
            Ok(Element::Bar(fields)) => {
                let dedup = fields
                    .dedup
                    .unwrap_or_else(|| synthesized_dedup(event.id, element_index));
                out.bars.push(NewBar {
                    dedup,
                    raw_event_id: event.id,
                    received_at: event.received_at,
                    element_index,
                    symbol: fields.symbol,
                    tf_sec: fields.tf_sec,
                    bar_time: fields.bar_time,
                    measurements: fields.measurements,
                    record: element.clone(),
                });
                out.stats.bars += 1;
            },
            Ok(Element::Unknown { kind }) => {
                tracing::trace!(raw_event_id = event.id, element_index, %kind, "Skipping element");
                out.stats.unknown_kind += 1;
            },
            Err(e) => {
                tracing::debug!(
                    raw_event_id = event.id,
                    element_index,
                    error = %e,
                    "Skipping invalid element"
                );
                out.stats.invalid += 1;
            },
        }
    }

    out
}

/// Dedup key for elements without an explicit one
pub fn synthesized_dedup(raw_event_id: i64, element_index: i32) -> String {
    format!("raw:{}:{}", raw_event_id, element_index)
}

fn record_list(payload: &Value) -> Option<&Vec<Value>> {
    match payload {
        Value::Array(list) => Some(list),
        Value::Object(obj) => obj.get("records").and_then(Value::as_array),
        _ => None,
    }
}

/// Strings are trimmed, numbers keep their JSON spelling; blank means absent
fn explicit_dedup(value: Option<&Value>) -> Result<Option<String>, ElementError> {
    match value {
        None => Ok(None),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        },
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(ElementError::InvalidDedup),
    }
}

fn first<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

fn measurements(obj: &Map<String, Value>) -> Measurements {
    let num = |key: &str| number(obj.get(key));

    Measurements {
        open: num("open"),
        high: num("high"),
        low: num("low"),
        close: num("close"),
        volume: num("volume"),
        vwap: num("vwap"),
        trade_count: integer(first(obj, &["trade_count", "trades"])),
        buy_volume: num("buy_volume"),
        sell_volume: num("sell_volume"),
        delta: num("delta"),
        spread_bps: num("spread_bps"),
        imbalance: num("imbalance"),
    }
}

/// Finite number from a JSON number or numeric string
fn number(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Integer from a JSON integer, integral float or integer string
fn integer(value: Option<&Value>) -> Option<i64> {
    let value = value?;

    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    if let Some(i) = value.as_str().and_then(|s| s.trim().parse::<i64>().ok()) {
        return Some(i);
    }

    let f = number(Some(value))?;
    // i64::MAX is not representable; the bound below is the next f64 above it
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64).then_some(f as i64)
}

/// Epoch seconds, epoch milliseconds or an RFC 3339 string
fn timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let value = value?;

    if let Some(s) = value.as_str() {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s.trim()) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    let epoch = number(Some(value))?;
    let millis = if epoch.abs() >= EPOCH_MILLIS_THRESHOLD {
        epoch
    } else {
        epoch * 1000.0
    };
    DateTime::from_timestamp_millis(millis.round() as i64)
}
