use std::thread::sleep;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, Utc};
use log::{error, info, warn};
use serde_json::Value;

use super::columns::ColumnIndex;
use super::grouping::GroupingPolicy;
use super::minor::MinorCostAggregator;
use super::projector::{project, RowOutcome};
use super::{MetricsSink, Observation, RowError, TargetAccount, USAGE_DATE_COLUMN};
use crate::azure::{CostQuery, TransportError};

/// What happened to the rows of one fetch cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Observations handed to the sink, merged bucket included.
    pub emitted: usize,
    pub deferred: usize,
    pub out_of_window: usize,
    pub failed_rows: usize,
}

/// Fetches yesterday's cost on every tick and publishes it to the sink.
pub struct Poller<Q, S> {
    query: Q,
    sink: S,
    target: TargetAccount,
    grouping: GroupingPolicy,
    interval: Duration,
}

impl<Q: CostQuery, S: MetricsSink> Poller<Q, S> {
    pub fn new(
        query: Q,
        sink: S,
        target: TargetAccount,
        grouping: GroupingPolicy,
        interval: Duration,
    ) -> Self {
        Poller {
            query,
            sink,
            target,
            grouping,
            interval,
        }
    }

    pub fn run(&self) -> ! {
        loop {
            self.tick();
        }
    }

    /// One fetch followed by the polling interval. A failed cycle is only
    /// logged; the next tick is the retry.
    pub fn tick(&self) -> Option<CycleReport> {
        let report = match self.fetch() {
            Ok(report) => Some(report),
            Err(e) => {
                error!("cost fetch failed, waiting for next tick: {e}");
                None
            }
        };
        sleep(self.interval);
        report
    }

    pub fn fetch(&self) -> Result<CycleReport, TransportError> {
        self.fetch_at(Utc::now().date_naive())
    }

    /// Runs one cycle over `[today - 1 day, today)`.
    pub fn fetch_at(&self, today: NaiveDate) -> Result<CycleReport, TransportError> {
        let start = today.pred_opt().unwrap_or(today);
        let subscription = self.target.subscription();
        info!("querying cost data for Azure subscription {subscription} on {start}");

        let result = self
            .query
            .query(subscription, &self.grouping, start, today)?;

        let columns = ColumnIndex::from_columns(&result.columns);
        let expected_date = usage_date_number(start);
        let mut report = CycleReport::default();
        let mut minor = MinorCostAggregator::new();

        for row in &result.rows {
            match usage_date(&columns, row) {
                Ok(date) if date == expected_date => {}
                Ok(date) => {
                    // Azure may return rows of the adjacent day even with an exact time period.
                    warn!("found out-of-time sample at {date} (expected {expected_date}): {row:?}");
                    report.out_of_window += 1;
                    continue;
                }
                Err(e) => {
                    error!("cannot process cost row {row:?}: {e}");
                    report.failed_rows += 1;
                    continue;
                }
            }

            match project(row, &columns, &self.grouping, &self.target) {
                Ok(RowOutcome::Emit(converted, local)) => {
                    self.publish(&converted);
                    self.publish(&local);
                    report.emitted += 2;
                }
                Ok(RowOutcome::Deferred(cost)) => {
                    minor.add(cost);
                    report.deferred += 1;
                }
                Err(e) => {
                    error!("cannot process cost row {row:?}: {e}");
                    report.failed_rows += 1;
                }
            }
        }

        if let Some((converted, local)) = minor.finish(&self.target, &self.grouping) {
            self.publish(&converted);
            self.publish(&local);
            report.emitted += 2;
        }

        info!(
            "published {} observations for {start} ({} merged rows, {} out-of-time, {} failed)",
            report.emitted, report.deferred, report.out_of_window, report.failed_rows
        );
        Ok(report)
    }

    fn publish(&self, observation: &Observation) {
        self.sink.set(&observation.labels, observation.value);
    }
}

fn usage_date_number(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 10_000 + i64::from(date.month()) * 100 + i64::from(date.day())
}

fn usage_date(columns: &ColumnIndex, row: &[Value]) -> Result<i64, RowError> {
    let value = columns.cell(row, USAGE_DATE_COLUMN)?;
    let date = match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|date| date.fract() == 0.0)
                .map(|date| date as i64)
        }),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    };
    date.ok_or_else(|| RowError::InvalidValue {
        column: USAGE_DATE_COLUMN.to_string(),
        value: value.clone(),
    })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use serde_json::json;

    use super::*;
    use crate::core::grouping::{GroupSpec, MinorCostMerge};
    use crate::core::testing::RecordingSink;
    use crate::core::{Column, QueryResult};

    struct FakeQuery {
        result: Option<QueryResult>,
        calls: RefCell<Vec<(String, NaiveDate, NaiveDate)>>,
    }

    impl FakeQuery {
        fn answering(columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
            let columns = columns
                .iter()
                .map(|name| Column {
                    name: name.to_string(),
                    column_type: String::new(),
                })
                .collect();
            FakeQuery {
                result: Some(QueryResult { columns, rows }),
                calls: RefCell::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            FakeQuery {
                result: None,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl CostQuery for FakeQuery {
        fn query(
            &self,
            subscription: &str,
            _grouping: &GroupingPolicy,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<QueryResult, TransportError> {
            self.calls
                .borrow_mut()
                .push((subscription.to_string(), start, end));
            self.result.clone().ok_or(TransportError::Status {
                status: 503,
                body: "Service Unavailable".to_string(),
            })
        }
    }

    fn target() -> TargetAccount {
        TargetAccount::new([("Subscription".to_string(), "sub-1".to_string())].into())
    }

    fn service_grouping() -> GroupingPolicy {
        GroupingPolicy {
            enabled: true,
            groups: vec![GroupSpec {
                kind: "Dimension".to_string(),
                name: "ServiceName".to_string(),
                label_name: "service".to_string(),
            }],
            merge_minor_cost: MinorCostMerge::new(5.0, "other"),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 16).unwrap()
    }

    fn poller<'s>(
        query: FakeQuery,
        sink: &'s RecordingSink,
        grouping: GroupingPolicy,
    ) -> Poller<FakeQuery, &'s RecordingSink> {
        Poller::new(query, sink, target(), grouping, Duration::from_secs(60))
    }

    #[test]
    fn queries_yesterday_window() {
        let sink = RecordingSink::default();
        let poller = poller(
            FakeQuery::answering(&["UsageDate"], vec![]),
            &sink,
            GroupingPolicy::disabled(),
        );

        poller.fetch_at(today()).unwrap();
        assert_eq!(
            *poller.query.calls.borrow(),
            vec![(
                "sub-1".to_string(),
                NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
                today()
            )]
        );
    }

    #[test]
    fn ungrouped_cycle_publishes_both_currencies() {
        let sink = RecordingSink::default();
        let query = FakeQuery::answering(
            &["UsageDate", "Cost", "CostUSD", "Currency"],
            vec![vec![json!(20240115), json!(100.0), json!(110.0), json!("EUR")]],
        );
        let report = poller(query, &sink, GroupingPolicy::disabled())
            .fetch_at(today())
            .unwrap();

        assert_eq!(report.emitted, 2);
        assert_eq!(sink.len(), 2);
        let labels = |currency: &'static str| {
            [
                ("ChargeType", "ActualCost"),
                ("Currency", currency),
                ("Subscription", "sub-1"),
            ]
        };
        assert_eq!(sink.get(&labels("USD")), Some(110.0));
        assert_eq!(sink.get(&labels("EUR")), Some(100.0));
    }

    #[test]
    fn minor_rows_are_merged_into_tagged_bucket() {
        let sink = RecordingSink::default();
        let query = FakeQuery::answering(
            &["Cost", "CostUSD", "UsageDate", "ServiceName", "Currency"],
            vec![
                vec![json!(45.0), json!(50.0), json!(20240115), json!("Compute"), json!("EUR")],
                vec![json!(1.8), json!(2.0), json!(20240115), json!("Storage"), json!("EUR")],
            ],
        );
        let report = poller(query, &sink, service_grouping())
            .fetch_at(today())
            .unwrap();

        assert_eq!(
            report,
            CycleReport {
                emitted: 4,
                deferred: 1,
                out_of_window: 0,
                failed_rows: 0,
            }
        );
        let labels = |service: &'static str, currency: &'static str| {
            [
                ("ChargeType", "ActualCost"),
                ("Currency", currency),
                ("Subscription", "sub-1"),
                ("service", service),
            ]
        };
        assert_eq!(sink.get(&labels("Compute", "USD")), Some(50.0));
        assert_eq!(sink.get(&labels("Compute", "EUR")), Some(45.0));
        assert_eq!(sink.get(&labels("other", "USD")), Some(2.0));
        assert_eq!(sink.get(&labels("other", "EUR")), Some(1.8));
        assert_eq!(sink.get(&labels("Storage", "USD")), None);
    }

    #[test]
    fn no_minor_rows_means_no_bucket() {
        let sink = RecordingSink::default();
        let query = FakeQuery::answering(
            &["Cost", "CostUSD", "UsageDate", "ServiceName", "Currency"],
            vec![vec![json!(45.0), json!(50.0), json!(20240115), json!("Compute"), json!("EUR")]],
        );
        let report = poller(query, &sink, service_grouping())
            .fetch_at(today())
            .unwrap();

        assert_eq!(report.deferred, 0);
        assert_eq!(report.emitted, 2);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn out_of_window_rows_are_dropped() {
        let sink = RecordingSink::default();
        let query = FakeQuery::answering(
            &["UsageDate", "Cost", "CostUSD", "Currency"],
            vec![
                vec![json!(20240114), json!(100.0), json!(110.0), json!("EUR")],
                vec![json!(20240116), json!(100.0), json!(110.0), json!("EUR")],
            ],
        );
        let report = poller(query, &sink, GroupingPolicy::disabled())
            .fetch_at(today())
            .unwrap();

        assert_eq!(report.out_of_window, 2);
        assert_eq!(report.emitted, 0);
        assert_eq!(sink.len(), 0);
    }

    #[test]
    fn broken_row_does_not_abort_cycle() {
        let sink = RecordingSink::default();
        let query = FakeQuery::answering(
            &["UsageDate", "Cost", "CostUSD", "Currency"],
            vec![
                vec![json!(20240115), json!("n/a"), json!(110.0), json!("EUR")],
                vec![json!(null), json!(1.0), json!(1.0), json!("EUR")],
                vec![json!(20240115), json!(100.0), json!(110.0), json!("EUR")],
            ],
        );
        let report = poller(query, &sink, GroupingPolicy::disabled())
            .fetch_at(today())
            .unwrap();

        assert_eq!(report.failed_rows, 2);
        assert_eq!(report.emitted, 2);
    }

    #[test]
    fn transport_error_publishes_nothing() {
        let sink = RecordingSink::default();
        let poller = poller(FakeQuery::failing(), &sink, service_grouping());

        assert!(matches!(
            poller.fetch_at(today()),
            Err(TransportError::Status { status: 503, .. })
        ));
        assert_eq!(sink.len(), 0);

        // the next tick queries again
        assert!(poller.fetch_at(today()).is_err());
        assert_eq!(poller.query.calls.borrow().len(), 2);
    }

    #[test]
    fn tick_survives_transport_error() {
        let sink = RecordingSink::default();
        let poller = Poller::new(
            FakeQuery::failing(),
            &sink,
            target(),
            service_grouping(),
            Duration::from_millis(10),
        );

        let started = std::time::Instant::now();
        assert!(poller.tick().is_none());
        assert!(poller.tick().is_none());
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(poller.query.calls.borrow().len(), 2);
        assert_eq!(sink.len(), 0);
    }

    #[test]
    fn tick_reports_successful_cycle() {
        let sink = RecordingSink::default();
        let poller = Poller::new(
            FakeQuery::answering(&["UsageDate", "Cost", "CostUSD", "Currency"], vec![]),
            &sink,
            target(),
            GroupingPolicy::disabled(),
            Duration::ZERO,
        );

        assert_eq!(poller.tick(), Some(CycleReport::default()));
    }

    #[test]
    fn fractional_usage_date_fails_the_row() {
        let columns = ColumnIndex::build(["UsageDate"]);
        assert!(matches!(
            usage_date(&columns, &[json!(20240115.9)]),
            Err(RowError::InvalidValue { .. })
        ));
        assert!(usage_date(&columns, &[json!("20240115.0")]).is_err());
    }

    #[test]
    fn usage_date_accepts_strings() {
        let columns = ColumnIndex::build(["UsageDate"]);
        assert_eq!(usage_date(&columns, &[json!("20240115")]), Ok(20240115));
        assert_eq!(usage_date(&columns, &[json!(20240115.0)]), Ok(20240115));
        assert_eq!(
            usage_date_number(NaiveDate::from_ymd_opt(2023, 7, 10).unwrap()),
            20230710
        );
    }
}
