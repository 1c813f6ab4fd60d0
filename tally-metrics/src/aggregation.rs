use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::protocol::{BucketKey, RawMetricEvent};
use crate::validation::{ValidationError, ValidationErrorKind, validate_event};

/// Counts to add to the row of a single [`BucketKey`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CounterDelta {
    /// The row to add to.
    pub key: BucketKey,
    /// Amount added to the `yes` counter.
    pub yes: i64,
    /// Amount added to the `no` counter.
    pub no: i64,
}

/// A validated batch of counter deltas, ready to be merged into the store.
///
/// Building a batch validates every event before any delta is produced, so a batch either
/// contains all events of the submission or the submission is rejected.
#[derive(Clone, Debug, Default)]
pub struct MetricsBatch {
    deltas: Vec<CounterDelta>,
    events: usize,
}

impl MetricsBatch {
    /// Validates the events and groups them by bucket key.
    ///
    /// Events sharing a key are summed into one delta, which reduces the number of rows written.
    /// Deltas are ordered by key.
    pub fn aggregate(
        events: Vec<RawMetricEvent>,
        max_name_length: usize,
    ) -> Result<Self, ValidationError> {
        validate_all(&events, max_name_length)?;

        let count = events.len();
        let mut grouped = BTreeMap::<BucketKey, (i64, i64)>::new();

        for (index, event) in events.into_iter().enumerate() {
            let key = BucketKey::from_event(&event);

            match grouped.entry(key) {
                Entry::Vacant(entry) => {
                    entry.insert((event.yes, event.no));
                }
                Entry::Occupied(mut entry) => {
                    let (yes, no) = entry.get_mut();
                    *yes = checked_sum(index, "yes", *yes, event.yes)?;
                    *no = checked_sum(index, "no", *no, event.no)?;
                }
            }
        }

        let deltas = grouped
            .into_iter()
            .map(|(key, (yes, no))| CounterDelta { key, yes, no })
            .collect();

        Ok(Self {
            deltas,
            events: count,
        })
    }

    /// Validates the events and turns every event into its own delta, in submission order.
    pub fn unaggregated(
        events: Vec<RawMetricEvent>,
        max_name_length: usize,
    ) -> Result<Self, ValidationError> {
        validate_all(&events, max_name_length)?;

        let count = events.len();
        let deltas = events
            .into_iter()
            .map(|event| CounterDelta {
                key: BucketKey::from_event(&event),
                yes: event.yes,
                no: event.no,
            })
            .collect();

        Ok(Self {
            deltas,
            events: count,
        })
    }

    /// Builds a batch with or without grouping by key.
    pub fn build(
        events: Vec<RawMetricEvent>,
        preaggregate: bool,
        max_name_length: usize,
    ) -> Result<Self, ValidationError> {
        if preaggregate {
            Self::aggregate(events, max_name_length)
        } else {
            Self::unaggregated(events, max_name_length)
        }
    }

    /// Returns `true` if there is nothing to write.
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Number of deltas in this batch.
    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    /// Number of raw events the batch was built from.
    pub fn event_count(&self) -> usize {
        self.events
    }

    /// Returns the deltas of this batch.
    pub fn deltas(&self) -> &[CounterDelta] {
        &self.deltas
    }
}

fn validate_all(events: &[RawMetricEvent], max_name_length: usize) -> Result<(), ValidationError> {
    events
        .iter()
        .enumerate()
        .try_for_each(|(index, event)| validate_event(index, event, max_name_length))
}

fn checked_sum(
    index: usize,
    field: &'static str,
    current: i64,
    value: i64,
) -> Result<i64, ValidationError> {
    current
        .checked_add(value)
        .ok_or_else(|| ValidationError::new(index, ValidationErrorKind::CountOverflow(field)))
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::testutils::{event, ten_past_ten};
    use crate::validation::DEFAULT_MAX_NAME_LENGTH;

    #[test]
    fn test_empty_batch() {
        let batch = MetricsBatch::aggregate(vec![], DEFAULT_MAX_NAME_LENGTH).unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.event_count(), 0);
    }

    #[test]
    fn test_aggregate_same_hour() {
        let events = vec![
            event("demo", "web", ten_past_ten(), 2, 2),
            event("demo", "web", ten_past_ten() + TimeDelta::minutes(10), 1, 3),
        ];

        let batch = MetricsBatch::aggregate(events, DEFAULT_MAX_NAME_LENGTH).unwrap();
        assert_eq!(batch.event_count(), 2);
        assert_eq!(
            batch.deltas(),
            [CounterDelta {
                key: BucketKey::new("demo", "web", "dev", ten_past_ten()),
                yes: 3,
                no: 5,
            }]
        );
    }

    #[test]
    fn test_aggregate_separate_hours() {
        let events = vec![
            event("demo", "web", ten_past_ten(), 2, 2),
            event("demo", "web", ten_past_ten() + TimeDelta::hours(1), 1, 3),
        ];

        let batch = MetricsBatch::aggregate(events, DEFAULT_MAX_NAME_LENGTH).unwrap();
        let counts: Vec<_> = batch.deltas().iter().map(|d| (d.yes, d.no)).collect();
        assert_eq!(counts, [(2, 2), (1, 3)]);
    }

    #[test]
    fn test_unaggregated_keeps_every_event() {
        let events = vec![
            event("demo", "web", ten_past_ten(), 2, 2),
            event("demo", "web", ten_past_ten(), 1, 3),
        ];

        let batch = MetricsBatch::unaggregated(events, DEFAULT_MAX_NAME_LENGTH).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.deltas()[0].key, batch.deltas()[1].key);
    }

    #[test]
    fn test_same_totals_with_and_without_grouping() {
        let events: Vec<_> = (0..100)
            .map(|i| {
                let app = if i % 2 == 0 { "web" } else { "ios" };
                let timestamp = ten_past_ten() + TimeDelta::minutes(i * 7);
                event("demo", app, timestamp, i, i + 1)
            })
            .collect();

        let totals = |batch: MetricsBatch| {
            let mut totals = BTreeMap::new();
            for delta in batch.deltas() {
                let entry = totals.entry(delta.key.clone()).or_insert((0, 0));
                entry.0 += delta.yes;
                entry.1 += delta.no;
            }
            totals
        };

        let grouped = MetricsBatch::build(events.clone(), true, DEFAULT_MAX_NAME_LENGTH).unwrap();
        let ungrouped = MetricsBatch::build(events, false, DEFAULT_MAX_NAME_LENGTH).unwrap();
        assert!(grouped.len() < ungrouped.len());
        assert_eq!(totals(grouped), totals(ungrouped));
    }

    #[test]
    fn test_invalid_event_rejects_batch() {
        let events = vec![
            event("demo", "web", ten_past_ten(), 2, 2),
            event("", "web", ten_past_ten(), 1, 3),
        ];

        let err = MetricsBatch::aggregate(events, DEFAULT_MAX_NAME_LENGTH).unwrap_err();
        assert_eq!(err.index(), 1);
    }

    #[test]
    fn test_overflow_rejects_batch() {
        let events = vec![
            event("demo", "web", ten_past_ten(), i64::MAX, 0),
            event("demo", "web", ten_past_ten(), 1, 0),
        ];

        let err = MetricsBatch::aggregate(events, DEFAULT_MAX_NAME_LENGTH).unwrap_err();
        assert_eq!(err.index(), 1);
        assert_eq!(err.kind(), &ValidationErrorKind::CountOverflow("yes"));
    }
}
