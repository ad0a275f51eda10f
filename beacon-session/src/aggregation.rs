use std::collections::BTreeMap;

use beacon_common::UnixTimestamp;
use beacon_protocol::{SessionAggregateItem, SessionAggregates, SessionAttributes, SessionStatus};

/// Identifies the aggregate a request session is counted in.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
struct BucketKey {
    attributes: SessionAttributes,
    started: UnixTimestamp,
    distinct_id: Option<String>,
}

/// A table of session outcome counts, bucketed by attributes, start minute and distinct id.
///
/// Buckets are created lazily on the first increment. Draining the table with
/// [`into_payloads`](Self::into_payloads) produces one [`SessionAggregates`] per distinct set of
/// attributes.
#[derive(Clone, Debug, Default)]
pub struct SessionBuckets {
    buckets: BTreeMap<BucketKey, SessionAggregateItem>,
}

impl SessionBuckets {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a session with the given final status.
    ///
    /// The timestamp is truncated to the start of its minute. Returns `false` if the timestamp
    /// cannot be represented as a date, in which case nothing is counted.
    pub fn increment(
        &mut self,
        attributes: &SessionAttributes,
        status: SessionStatus,
        timestamp: UnixTimestamp,
        distinct_id: Option<&str>,
    ) -> bool {
        let started = timestamp.truncate_to_minute();
        let Some(started_at) = started.as_datetime() else {
            return false;
        };

        let key = BucketKey {
            attributes: attributes.clone(),
            started,
            distinct_id: distinct_id.map(str::to_owned),
        };

        self.buckets
            .entry(key)
            .or_insert_with_key(|key| SessionAggregateItem::new(started_at, key.distinct_id.clone()))
            .increment(status);

        true
    }

    /// Returns the number of buckets in the table.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Returns `true` if nothing has been counted.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Converts the table into payloads, one per set of attributes.
    ///
    /// Aggregates within a payload are ordered by start time, with the aggregate without distinct
    /// id first.
    pub fn into_payloads(self) -> Vec<SessionAggregates> {
        let mut payloads: Vec<SessionAggregates> = Vec::new();

        // Keys are sorted by attributes first, so equal attributes are adjacent.
        for (key, item) in self.buckets {
            match payloads.last_mut() {
                Some(payload) if payload.attributes == key.attributes => {
                    payload.aggregates.push(item)
                }
                _ => payloads.push(SessionAggregates {
                    aggregates: vec![item],
                    attributes: key.attributes,
                }),
            }
        }

        payloads
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use similar_asserts::assert_eq;

    use super::*;

    fn attributes(release: &str) -> SessionAttributes {
        SessionAttributes {
            release: release.to_owned(),
            environment: Some("production".to_owned()),
        }
    }

    #[test]
    fn test_truncates_to_minute() {
        let attrs = attributes("app@1.0.0");
        let mut buckets = SessionBuckets::new();

        // 2020-02-07T14:16:00Z and 59 seconds later fall in the same bucket.
        let start = 1581084960;
        assert!(buckets.increment(
            &attrs,
            SessionStatus::Ok,
            UnixTimestamp::from_secs(start),
            None
        ));
        assert!(buckets.increment(
            &attrs,
            SessionStatus::Errored,
            UnixTimestamp::from_secs(start + 59),
            None
        ));
        assert_eq!(buckets.len(), 1);

        buckets.increment(
            &attrs,
            SessionStatus::Crashed,
            UnixTimestamp::from_secs(start + 60),
            None,
        );
        assert_eq!(buckets.len(), 2);

        let payloads = buckets.into_payloads();
        assert_eq!(payloads.len(), 1);

        let aggregates = &payloads[0].aggregates;
        assert_eq!(
            aggregates[0].started,
            Utc.with_ymd_and_hms(2020, 2, 7, 14, 16, 0).unwrap()
        );
        assert_eq!(aggregates[0].exited, 1);
        assert_eq!(aggregates[0].errored, 1);
        assert_eq!(
            aggregates[1].started,
            Utc.with_ymd_and_hms(2020, 2, 7, 14, 17, 0).unwrap()
        );
        assert_eq!(aggregates[1].crashed, 1);
    }

    #[test]
    fn test_distinct_id_lane() {
        let attrs = attributes("app@1.0.0");
        let ts = UnixTimestamp::from_secs(1581084960);
        let mut buckets = SessionBuckets::new();

        buckets.increment(&attrs, SessionStatus::Ok, ts, None);
        buckets.increment(&attrs, SessionStatus::Errored, ts, Some("user-1"));
        buckets.increment(&attrs, SessionStatus::Errored, ts, Some("user-1"));

        let payloads = buckets.into_payloads();
        insta::assert_json_snapshot!(payloads, @r###"
        [
          {
            "aggregates": [
              {
                "started": "2020-02-07T14:16:00Z",
                "exited": 1,
                "errored": 0,
                "crashed": 0,
                "abnormal": 0
              },
              {
                "started": "2020-02-07T14:16:00Z",
                "did": "user-1",
                "exited": 0,
                "errored": 2,
                "crashed": 0,
                "abnormal": 0
              }
            ],
            "attrs": {
              "release": "app@1.0.0",
              "environment": "production"
            }
          }
        ]
        "###);
    }

    #[test]
    fn test_one_payload_per_attributes() {
        let ts = UnixTimestamp::from_secs(1581084960);
        let mut buckets = SessionBuckets::new();

        buckets.increment(&attributes("app@2.0.0"), SessionStatus::Ok, ts, None);
        buckets.increment(&attributes("app@1.0.0"), SessionStatus::Ok, ts, None);
        buckets.increment(&attributes("app@2.0.0"), SessionStatus::Abnormal, ts, None);

        let payloads = buckets.into_payloads();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].attributes.release, "app@1.0.0");
        assert_eq!(payloads[1].attributes.release, "app@2.0.0");
        assert_eq!(payloads[1].aggregates.len(), 1);
        assert_eq!(payloads[1].aggregates[0].total_count(), 2);
    }

    #[test]
    fn test_empty() {
        let buckets = SessionBuckets::new();
        assert!(buckets.is_empty());
        assert!(buckets.into_payloads().is_empty());
    }
}
