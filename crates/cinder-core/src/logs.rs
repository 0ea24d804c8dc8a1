use std::collections::HashMap;

use anyhow::Context;
use cinder_protocol::{EventRecord, RunId};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ConsoleError, Result};
use crate::session::Session;
use crate::stores::BlobStore;

/// Log URIs per run id, keyed by a short display name (the URI's final
/// path segment). Derived, never persisted.
pub type LogRefs = HashMap<RunId, HashMap<String, String>>;

/// `'stderr': 's3://…'`-style field assignments, either quote style.
static FIELD_URI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"['"](?:stderr|stdout|output)['"]\s*:\s*['"](s3://[A-Za-z0-9_./-]+)"#)
        .expect("field uri pattern")
});

/// Any bare blob URI ending in `.out`.
static OUT_URI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"s3://[A-Za-z0-9_.:/-]+\.out").expect("out uri pattern"));

/// Scan a batch of events for log locations in the blob store.
///
/// Matches are collected per run id across the whole batch. Two URIs that
/// share a final path segment for the same run collapse to the later one;
/// there is no stable disambiguation.
pub fn extract_log_refs(events: &[EventRecord]) -> LogRefs {
    let mut refs: LogRefs = HashMap::new();
    for event in events {
        let text = serde_json::to_string(event).unwrap_or_default();
        let for_run = refs.entry(event.run_id.clone()).or_default();
        for caps in FIELD_URI.captures_iter(&text) {
            if let Some(uri) = caps.get(1) {
                insert_by_short_name(for_run, uri.as_str());
            }
        }
        for m in OUT_URI.find_iter(&text) {
            insert_by_short_name(for_run, m.as_str());
        }
    }
    refs
}

fn insert_by_short_name(map: &mut HashMap<String, String>, uri: &str) {
    let short = uri.rsplit('/').next().unwrap_or(uri);
    map.insert(short.to_string(), uri.to_string());
}

/// Split an `s3://bucket/key…` URI into bucket and key.
pub fn split_blob_uri(uri: &str) -> Result<(String, String)> {
    let rest = uri
        .strip_prefix("s3://")
        .ok_or_else(|| ConsoleError::InvalidState(format!("'{uri}' is not a blob uri")))?;
    match rest.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
            Ok((bucket.to_string(), key.to_string()))
        }
        _ => Err(ConsoleError::InvalidState(format!(
            "'{uri}' is missing a bucket or key"
        ))),
    }
}

/// Fetch a discovered log artifact as UTF-8 text.
pub async fn fetch_log(session: &Session, uri: &str) -> Result<String> {
    let (bucket, key) = split_blob_uri(uri)?;
    let bytes = session.blobs().get_object(&bucket, &key).await?;
    let text = String::from_utf8(bytes).with_context(|| format!("log at {uri} is not utf-8"))?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cinder_protocol::EventStatus;
    use serde_json::json;

    fn event_with_payload(run: &str, payload: serde_json::Value) -> EventRecord {
        let mut extra = serde_json::Map::new();
        extra.insert("detail".to_string(), payload);
        EventRecord {
            job_id: "job-a".to_string(),
            run_id: run.to_string(),
            ts_dispatch: Utc::now(),
            ts_event: Utc::now(),
            status: EventStatus::Complete,
            extra,
        }
    }

    #[test]
    fn extracts_single_quoted_assignment_from_payload_text() {
        let ev = event_with_payload(
            "run123",
            json!("result: {'stderr': 's3://bucket/run123/worker.stderr'}"),
        );
        let refs = extract_log_refs(&[ev]);
        assert_eq!(
            refs["run123"]["worker.stderr"],
            "s3://bucket/run123/worker.stderr"
        );
    }

    #[test]
    fn extracts_structured_fields_and_bare_out_uris() {
        let ev = event_with_payload(
            "run9",
            json!({
                "stdout": "s3://logs/run9/step.stdout",
                "note": "wrote s3://logs/run9/final.out before exit"
            }),
        );
        let refs = extract_log_refs(&[ev]);
        let for_run = &refs["run9"];
        assert_eq!(for_run["step.stdout"], "s3://logs/run9/step.stdout");
        assert_eq!(for_run["final.out"], "s3://logs/run9/final.out");
    }

    #[test]
    fn matches_merge_across_events_of_one_run() {
        let first = event_with_payload("run1", json!({"stderr": "s3://logs/run1/a.stderr"}));
        let second = event_with_payload("run1", json!({"stdout": "s3://logs/run1/b.stdout"}));
        let refs = extract_log_refs(&[first, second]);
        assert_eq!(refs["run1"].len(), 2);
    }

    #[test]
    fn short_name_collision_keeps_last_match() {
        let ev = event_with_payload(
            "run1",
            json!(
                "{'stderr': 's3://logs/attempt-1/worker.stderr', \
                 'output': 's3://logs/attempt-2/worker.stderr'}"
            ),
        );
        let refs = extract_log_refs(&[ev]);
        assert_eq!(refs["run1"].len(), 1);
        assert_eq!(
            refs["run1"]["worker.stderr"],
            "s3://logs/attempt-2/worker.stderr"
        );
    }

    #[test]
    fn runs_without_matches_still_appear_empty() {
        let ev = event_with_payload("run-quiet", json!({"note": "nothing to see"}));
        let refs = extract_log_refs(&[ev]);
        assert!(refs["run-quiet"].is_empty());
    }

    #[test]
    fn split_blob_uri_rejects_malformed() {
        assert_eq!(
            split_blob_uri("s3://bucket/a/b.log").unwrap(),
            ("bucket".to_string(), "a/b.log".to_string())
        );
        assert!(split_blob_uri("http://bucket/a").is_err());
        assert!(split_blob_uri("s3://bucket-only").is_err());
    }
}
