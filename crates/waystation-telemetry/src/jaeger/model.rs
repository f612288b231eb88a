//! Jaeger collector model (`jaeger.thrift`) and conversion from SDK spans.

use std::time::{SystemTime, UNIX_EPOCH};

use opentelemetry::trace::{SpanId, SpanKind, Status, TraceId};
use opentelemetry::{KeyValue, Value};
use opentelemetry_sdk::export::trace::SpanData;
use opentelemetry_sdk::Resource;

use super::thrift::{ThriftStruct, ThriftWriter};

const SERVICE_NAME_KEY: &str = "service.name";

/// Tag value variants, numbered as `TagType` in `jaeger.thrift`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TagValue {
    Str(String),
    Double(f64),
    Bool(bool),
    Long(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Tag {
    pub(crate) key: String,
    pub(crate) value: TagValue,
}

impl Tag {
    pub(crate) fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: TagValue::Str(value.into()),
        }
    }

    pub(crate) fn bool(key: impl Into<String>, value: bool) -> Self {
        Self {
            key: key.into(),
            value: TagValue::Bool(value),
        }
    }
}

impl From<&KeyValue> for Tag {
    fn from(kv: &KeyValue) -> Self {
        let value = match &kv.value {
            Value::Bool(b) => TagValue::Bool(*b),
            Value::I64(i) => TagValue::Long(*i),
            Value::F64(f) => TagValue::Double(*f),
            other => TagValue::Str(other.as_str().into_owned()),
        };
        Self {
            key: kv.key.as_str().to_string(),
            value,
        }
    }
}

impl ThriftStruct for Tag {
    fn write(&self, w: &mut ThriftWriter) {
        w.string_field(1, &self.key);
        match &self.value {
            TagValue::Str(s) => {
                w.i32_field(2, 0);
                w.string_field(3, s);
            }
            TagValue::Double(d) => {
                w.i32_field(2, 1);
                w.double_field(4, *d);
            }
            TagValue::Bool(b) => {
                w.i32_field(2, 2);
                w.bool_field(5, *b);
            }
            TagValue::Long(l) => {
                w.i32_field(2, 3);
                w.i64_field(6, *l);
            }
        }
        w.stop();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Log {
    pub(crate) timestamp: i64,
    pub(crate) fields: Vec<Tag>,
}

impl ThriftStruct for Log {
    fn write(&self, w: &mut ThriftWriter) {
        w.i64_field(1, self.timestamp);
        w.list_field(2, &self.fields);
        w.stop();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefType {
    ChildOf = 0,
    FollowsFrom = 1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SpanRef {
    pub(crate) ref_type: RefType,
    pub(crate) trace_id_low: i64,
    pub(crate) trace_id_high: i64,
    pub(crate) span_id: i64,
}

impl ThriftStruct for SpanRef {
    fn write(&self, w: &mut ThriftWriter) {
        w.i32_field(1, self.ref_type as i32);
        w.i64_field(2, self.trace_id_low);
        w.i64_field(3, self.trace_id_high);
        w.i64_field(4, self.span_id);
        w.stop();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct JaegerSpan {
    pub(crate) trace_id_low: i64,
    pub(crate) trace_id_high: i64,
    pub(crate) span_id: i64,
    pub(crate) parent_span_id: i64,
    pub(crate) operation_name: String,
    pub(crate) references: Vec<SpanRef>,
    pub(crate) flags: i32,
    pub(crate) start_time: i64,
    pub(crate) duration: i64,
    pub(crate) tags: Vec<Tag>,
    pub(crate) logs: Vec<Log>,
}

impl ThriftStruct for JaegerSpan {
    fn write(&self, w: &mut ThriftWriter) {
        w.i64_field(1, self.trace_id_low);
        w.i64_field(2, self.trace_id_high);
        w.i64_field(3, self.span_id);
        w.i64_field(4, self.parent_span_id);
        w.string_field(5, &self.operation_name);
        w.list_field(6, &self.references);
        w.i32_field(7, self.flags);
        w.i64_field(8, self.start_time);
        w.i64_field(9, self.duration);
        w.list_field(10, &self.tags);
        w.list_field(11, &self.logs);
        w.stop();
    }
}

impl From<SpanData> for JaegerSpan {
    fn from(span: SpanData) -> Self {
        let (trace_id_high, trace_id_low) = split_trace_id(span.span_context.trace_id());

        let mut tags: Vec<Tag> = span.attributes.iter().map(Tag::from).collect();
        if let Some(kind) = span_kind_tag(&span.span_kind) {
            tags.push(Tag::string("span.kind", kind));
        }
        match &span.status {
            Status::Error { description } => {
                tags.push(Tag::bool("error", true));
                tags.push(Tag::string("otel.status_code", "ERROR"));
                if !description.is_empty() {
                    tags.push(Tag::string("otel.status_description", description.as_ref()));
                }
            }
            Status::Ok => tags.push(Tag::string("otel.status_code", "OK")),
            Status::Unset => {}
        }

        let logs = span
            .events
            .events
            .iter()
            .map(|event| {
                let mut fields = vec![Tag::string("event", event.name.as_ref())];
                fields.extend(event.attributes.iter().map(Tag::from));
                Log {
                    timestamp: micros_since_epoch(event.timestamp),
                    fields,
                }
            })
            .collect();

        let references = span
            .links
            .links
            .iter()
            .map(|link| {
                let (high, low) = split_trace_id(link.span_context.trace_id());
                SpanRef {
                    ref_type: RefType::FollowsFrom,
                    trace_id_low: low,
                    trace_id_high: high,
                    span_id: span_id_to_i64(link.span_context.span_id()),
                }
            })
            .collect();

        let start_time = micros_since_epoch(span.start_time);
        let duration = span
            .end_time
            .duration_since(span.start_time)
            .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
            .unwrap_or(0);

        Self {
            trace_id_low,
            trace_id_high,
            span_id: span_id_to_i64(span.span_context.span_id()),
            parent_span_id: span_id_to_i64(span.parent_span_id),
            operation_name: span.name.into_owned(),
            references,
            flags: i32::from(span.span_context.trace_flags().to_u8()),
            start_time,
            duration,
            tags,
            logs,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Process {
    pub(crate) service_name: String,
    pub(crate) tags: Vec<Tag>,
}

impl Process {
    pub(crate) fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            tags: Vec::new(),
        }
    }

    /// Takes `service.name` from the resource and every other resource
    /// attribute as a process tag.
    pub(crate) fn from_resource(resource: &Resource, fallback_name: &str) -> Self {
        let mut service_name = fallback_name.to_string();
        let mut tags = Vec::new();
        for (key, value) in resource.iter() {
            if key.as_str() == SERVICE_NAME_KEY {
                service_name = value.as_str().into_owned();
            } else {
                tags.push(Tag::from(&KeyValue::new(key.clone(), value.clone())));
            }
        }
        Self { service_name, tags }
    }
}

impl ThriftStruct for Process {
    fn write(&self, w: &mut ThriftWriter) {
        w.string_field(1, &self.service_name);
        w.list_field(2, &self.tags);
        w.stop();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Batch {
    pub(crate) process: Process,
    pub(crate) spans: Vec<JaegerSpan>,
}

impl ThriftStruct for Batch {
    fn write(&self, w: &mut ThriftWriter) {
        w.struct_field(1, &self.process);
        w.list_field(2, &self.spans);
        w.stop();
    }
}

impl Batch {
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut w = ThriftWriter::new();
        self.write(&mut w);
        w.into_bytes()
    }
}

/// Splits a trace id into Jaeger's `(high, low)` signed halves.
pub(crate) fn split_trace_id(trace_id: TraceId) -> (i64, i64) {
    let bytes = trace_id.to_bytes();
    let mut high = [0u8; 8];
    let mut low = [0u8; 8];
    high.copy_from_slice(&bytes[..8]);
    low.copy_from_slice(&bytes[8..]);
    (i64::from_be_bytes(high), i64::from_be_bytes(low))
}

fn span_id_to_i64(span_id: SpanId) -> i64 {
    i64::from_be_bytes(span_id.to_bytes())
}

fn micros_since_epoch(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn span_kind_tag(kind: &SpanKind) -> Option<&'static str> {
    match kind {
        SpanKind::Server => Some("server"),
        SpanKind::Client => Some("client"),
        SpanKind::Producer => Some("producer"),
        SpanKind::Consumer => Some("consumer"),
        SpanKind::Internal => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_trace_id() {
        let id = TraceId::from_hex("0000000000000001ffffffffffffffff").unwrap();
        assert_eq!(split_trace_id(id), (1, -1));
    }

    #[test]
    fn test_tag_from_key_value() {
        assert_eq!(
            Tag::from(&KeyValue::new("n", 3_i64)).value,
            TagValue::Long(3)
        );
        assert_eq!(
            Tag::from(&KeyValue::new("s", "v")).value,
            TagValue::Str("v".to_string())
        );
        assert_eq!(
            Tag::from(&KeyValue::new("b", true)).value,
            TagValue::Bool(true)
        );
    }

    #[test]
    fn test_process_from_resource() {
        let resource = Resource::new([
            KeyValue::new("service.name", "validator"),
            KeyValue::new("deployment.environment", "test"),
        ]);
        let process = Process::from_resource(&resource, "fallback");

        assert_eq!(process.service_name, "validator");
        assert_eq!(process.tags.len(), 1);
        assert_eq!(process.tags[0].key, "deployment.environment");
    }

    #[test]
    fn test_empty_batch_encoding() {
        let batch = Batch {
            process: Process::new("svc"),
            spans: Vec::new(),
        };

        assert_eq!(
            batch.encode(),
            vec![
                12, 0, 1, // process struct
                11, 0, 1, 0, 0, 0, 3, b's', b'v', b'c', // serviceName
                15, 0, 2, 12, 0, 0, 0, 0, // empty tags
                0, // end process
                15, 0, 2, 12, 0, 0, 0, 0, // empty spans
                0,
            ]
        );
    }
}
