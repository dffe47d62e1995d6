// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Encodes a batch of raw lines into one collector document.
//!
//! Every line becomes an `{"event": <line>, "time": <epoch seconds>}` object and
//! the objects are joined with single spaces, with one leading space:
//!
//! ```text
//!  {"event":"first line","time":1503067035.639} {"event":"second line","time":1503067036.0}
//! ```
//!
//! This is the multi-event batch format collectors accept. It is a sequence of
//! JSON values, not a JSON array.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;
use tracing::{debug, warn};

const TIMESTAMP_PATTERN: &str = r"([0-9]+)-(0[1-9]|1[012])-(0[1-9]|[12][0-9]|3[01])[Tt]([01][0-9]|2[0-3]):([0-5][0-9]):([0-5][0-9]|60)(\.[0-9]+)?([Zz]|[+-]([01][0-9]|2[0-3]):[0-5][0-9])?";

static TIMESTAMP_REGEX: OnceLock<Option<Regex>> = OnceLock::new();

fn timestamp_regex() -> Option<&'static Regex> {
    TIMESTAMP_REGEX
        .get_or_init(|| match Regex::new(TIMESTAMP_PATTERN) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!("ENCODER | Failed to compile timestamp pattern, using wall clock: {e}");
                None
            }
        })
        .as_ref()
}

/// Wire payload for one flushed batch. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncodedDocument(String);

impl EncodedDocument {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<String> for EncodedDocument {
    fn from(body: String) -> Self {
        Self(body)
    }
}

impl fmt::Display for EncodedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    event: &'a str,
    time: f64,
}

/// Encodes `lines` using the current time for lines without a usable timestamp.
#[must_use]
pub fn encode<S: AsRef<str>>(lines: &[S]) -> EncodedDocument {
    encode_at(lines, Utc::now())
}

/// Encodes `lines`, falling back to `now` for lines without a usable timestamp.
#[must_use]
pub fn encode_at<S: AsRef<str>>(lines: &[S], now: DateTime<Utc>) -> EncodedDocument {
    let mut document = String::new();

    for line in lines {
        let line = line.as_ref();
        let time = extract_timestamp(line).unwrap_or(now);
        let envelope = Envelope {
            event: line,
            time: epoch_seconds(&time),
        };

        document.push(' ');
        match serde_json::to_string(&envelope) {
            Ok(item) => document.push_str(&item),
            Err(e) => {
                debug!("ENCODER | Failed to marshal event, sending raw line: {e}");
                document.push_str("{ \"event\":");
                document.push_str(line);
                document.push('}');
            }
        }
    }

    EncodedDocument(document)
}

/// Finds the first embedded timestamp in `line` and parses it as RFC 3339.
///
/// Returns `None` when there is no candidate or the candidate is not a strict
/// RFC 3339 value (for example, it has no zone designator).
#[must_use]
pub fn extract_timestamp(line: &str) -> Option<DateTime<Utc>> {
    let candidate = timestamp_regex()?.find(line)?;
    DateTime::parse_from_rfc3339(candidate.as_str())
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

/// Epoch seconds with millisecond precision, e.g. `1503067035.639`.
#[must_use]
pub fn epoch_seconds(time: &DateTime<Utc>) -> f64 {
    time.timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use serde_json::Value;

    const EVENT: &str = r#"{"@time":"2017-08-18T14:37:15.639583741Z","HOSTNAME":"test_host","MACHINE_ID":"machine_id","MESSAGE":"{"@time":"2017-08-18T14:37:15.639583741Z","content_type":"Annotations","event":"mapping","isValid":"true","level":"info","monitoring_event":"true","msg":"Successfully mapped","service_name":"annotations-mapper","transaction_id":"tid_rahiuyzv8d","uuid":"a64cdd19-7cfe-1147-ab12-a13271d1dd9c"}","SYSTEMD_UNIT":"annotations-mapper@2.service","_SYSTEMD_INVOCATION_ID":"512d67a816cc44ceb6d0c1e8bd3702f9","content_type":"Annotations","event":"mapping","isValid":"true","level":"info","monitoring_event":"true","msg":"Successfully mapped","platform":"up-coco","service_name":"annotations-mapper","transaction_id":"tid_rahiuyzv8d","uuid":"a64cdd19-7cfe-1147-ab12-a13271d1dd9c"}"#;

    fn parse_objects(document: &EncodedDocument) -> Vec<Value> {
        serde_json::Deserializer::from_str(document.as_str())
            .into_iter::<Value>()
            .collect::<Result<Vec<_>, _>>()
            .expect("document should be a sequence of JSON objects")
    }

    #[test]
    fn test_encode_with_embedded_timestamp() {
        let expected = r#" {"event":"{\"@time\":\"2017-08-18T14:37:15.639583741Z\",\"HOSTNAME\":\"test_host\",\"MACHINE_ID\":\"machine_id\",\"MESSAGE\":\"{\"@time\":\"2017-08-18T14:37:15.639583741Z\",\"content_type\":\"Annotations\",\"event\":\"mapping\",\"isValid\":\"true\",\"level\":\"info\",\"monitoring_event\":\"true\",\"msg\":\"Successfully mapped\",\"service_name\":\"annotations-mapper\",\"transaction_id\":\"tid_rahiuyzv8d\",\"uuid\":\"a64cdd19-7cfe-1147-ab12-a13271d1dd9c\"}\",\"SYSTEMD_UNIT\":\"annotations-mapper@2.service\",\"_SYSTEMD_INVOCATION_ID\":\"512d67a816cc44ceb6d0c1e8bd3702f9\",\"content_type\":\"Annotations\",\"event\":\"mapping\",\"isValid\":\"true\",\"level\":\"info\",\"monitoring_event\":\"true\",\"msg\":\"Successfully mapped\",\"platform\":\"up-coco\",\"service_name\":\"annotations-mapper\",\"transaction_id\":\"tid_rahiuyzv8d\",\"uuid\":\"a64cdd19-7cfe-1147-ab12-a13271d1dd9c\"}","time":1503067035.639}"#;

        assert_eq!(encode(&[EVENT]).as_str(), expected);
    }

    #[test]
    fn test_encode_missing_timestamp_uses_now() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let document = encode_at(&[r#"{"HOSTNAME":"test_host","msg":"no time here"}"#], now);

        let objects = parse_objects(&document);
        assert_eq!(objects.len(), 1);
        let time = objects[0]["time"].as_f64().expect("time should be numeric");
        assert_eq!(time, 1_709_294_400.0);
    }

    #[test]
    fn test_encode_invalid_timestamp_uses_now() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        // Matches the pattern but carries no zone, so it is not RFC 3339.
        let document = encode_at(&["started at 2017-08-18T14:37:15 local"], now);

        let objects = parse_objects(&document);
        assert_eq!(objects[0]["time"].as_f64(), Some(1_709_294_400.0));
    }

    #[test]
    fn test_encode_offset_timestamp() {
        let document = encode(&["2017-08-18T16:37:15.5+02:00 GET /health 200"]);
        let objects = parse_objects(&document);
        assert_eq!(objects[0]["time"].as_f64(), Some(1_503_067_035.5));
    }

    #[test]
    fn test_encode_joins_with_single_spaces() {
        let now = Utc.timestamp_millis_opt(1_000).unwrap();
        let document = encode_at(&["a", "b"], now);
        assert_eq!(
            document.as_str(),
            r#" {"event":"a","time":1.0} {"event":"b","time":1.0}"#
        );
    }

    #[test]
    fn test_encode_empty_batch() {
        assert!(encode::<&str>(&[]).is_empty());
    }

    #[test]
    fn test_extract_timestamp_first_match_wins() {
        let ts = extract_timestamp("2020-01-01T00:00:00Z then 2021-01-01T00:00:00Z")
            .expect("timestamp should be found");
        assert_eq!(ts, Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_extract_timestamp_lowercase_designators() {
        let ts = extract_timestamp("at 2017-08-18t14:37:15z").expect("timestamp should be found");
        assert_eq!(ts, Utc.with_ymd_and_hms(2017, 8, 18, 14, 37, 15).unwrap());
    }

    #[test]
    fn test_extract_timestamp_absent() {
        assert!(extract_timestamp(
            r#"127.0.0.1 - - [21/Apr/2015:12:15:34 +0000] "GET /eom-file/all HTTP/1.1" 200"#
        )
        .is_none());
    }

    proptest! {
        #[test]
        fn prop_one_object_per_line(lines in proptest::collection::vec("[^\r\n]{1,40}", 1..20)) {
            let document = encode(&lines);
            let objects = parse_objects(&document);
            prop_assert_eq!(objects.len(), lines.len());
            for (object, line) in objects.iter().zip(lines.iter()) {
                prop_assert_eq!(object["event"].as_str(), Some(line.as_str()));
                prop_assert!(object["time"].is_number());
            }
        }
    }
}
