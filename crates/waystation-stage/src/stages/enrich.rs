use chrono::{SecondsFormat, Utc};
use uuid::Uuid;
use waystation_core::{Extracted, Metadata, PreviewPolicy, RequestBody, StageResult};

use super::{Stage, StageOutput};
use crate::config::StageKind;

/// Metadata key for the enrichment time.
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Metadata key for the enrichment id.
pub const ID_KEY: &str = "id";

/// Attaches a UTC timestamp and a fresh id. Data passes through.
#[derive(Debug, Clone, Copy, Default)]
pub struct Enrich;

impl Stage for Enrich {
    fn kind(&self) -> StageKind {
        StageKind::Enrich
    }

    fn preview_policy(&self) -> PreviewPolicy {
        PreviewPolicy::Bounded(200)
    }

    fn process(&self, input: &Extracted, _request: &RequestBody) -> StageResult<StageOutput> {
        let metadata = Metadata::new()
            .with(
                TIMESTAMP_KEY,
                Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            )
            .with(ID_KEY, Uuid::new_v4().to_string());

        Ok(StageOutput::new(input.data.clone()).with_recorded_metadata(metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waystation_core::PayloadKind;

    fn run(data: &str) -> StageOutput {
        Enrich
            .process(
                &Extracted {
                    data: data.to_string(),
                    kind: PayloadKind::Text,
                },
                &RequestBody::default(),
            )
            .unwrap()
    }

    #[test]
    fn test_attaches_timestamp_and_id() {
        let out = run("hello");
        assert_eq!(out.data, "hello");
        assert!(out.record_metadata);

        let ts = out.metadata.get(TIMESTAMP_KEY).and_then(|v| v.as_str()).unwrap();
        chrono::DateTime::parse_from_rfc3339(ts).unwrap();

        let id = out.metadata.get(ID_KEY).and_then(|v| v.as_str()).unwrap();
        assert_eq!(Uuid::parse_str(id).unwrap().get_version_num(), 4);
    }

    #[test]
    fn test_ids_are_fresh() {
        let a = run("x");
        let b = run("x");
        assert_ne!(a.metadata.get(ID_KEY), b.metadata.get(ID_KEY));
    }
}
