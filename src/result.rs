//! Display model for live and backtest results.
//!
//! The session treats conversion as opaque: it hands the raw result payload
//! to a [`ResultConverter`] and forwards whatever comes back.
//! [`DefaultResultConverter`] maps wire charts to timestamped series and
//! copies the tabular sections as they are.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::stream::proto::{ChartPayload, ResultPayload, SeriesPayload, SeriesType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResultKind {
    Live,
    Backtest,
}

/// Converted result ready for display.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultSnapshot {
    pub kind: ResultKind,
    pub charts: BTreeMap<String, ChartDefinition>,
    /// Orders keyed by order id, in wire form.
    pub orders: BTreeMap<String, Value>,
    pub profit_loss: BTreeMap<String, f64>,
    pub statistics: BTreeMap<String, String>,
    pub runtime_statistics: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChartDefinition {
    pub name: String,
    pub series: BTreeMap<String, SeriesDefinition>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SeriesDefinition {
    pub name: String,
    pub unit: String,
    pub index: i64,
    pub series_type: SeriesType,
    pub color: Option<String>,
    pub points: Vec<ChartPoint>,
}

/// A plotted value; `value` is `None` for gaps.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChartPoint {
    pub time: DateTime<Utc>,
    pub value: Option<f64>,
}

/// Converts raw result payloads into the display model.
pub trait ResultConverter: Send + Sync + 'static {
    fn from_live_result(&self, result: ResultPayload) -> ResultSnapshot;

    fn from_backtest_result(&self, result: ResultPayload) -> ResultSnapshot;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultResultConverter;

impl DefaultResultConverter {
    fn convert(kind: ResultKind, result: ResultPayload) -> ResultSnapshot {
        ResultSnapshot {
            kind,
            charts: result
                .charts
                .into_iter()
                .map(|(key, chart)| (key, chart_definition(chart)))
                .collect(),
            orders: result.orders,
            profit_loss: result.profit_loss,
            statistics: result.statistics,
            runtime_statistics: result.runtime_statistics,
        }
    }
}

impl ResultConverter for DefaultResultConverter {
    fn from_live_result(&self, result: ResultPayload) -> ResultSnapshot {
        Self::convert(ResultKind::Live, result)
    }

    fn from_backtest_result(&self, result: ResultPayload) -> ResultSnapshot {
        Self::convert(ResultKind::Backtest, result)
    }
}

fn chart_definition(chart: ChartPayload) -> ChartDefinition {
    ChartDefinition {
        name: chart.name,
        series: chart
            .series
            .into_iter()
            .map(|(key, series)| (key, series_definition(series)))
            .collect(),
    }
}

fn series_definition(series: SeriesPayload) -> SeriesDefinition {
    // Points with an unusable timestamp or shape are skipped.
    let points = series
        .values
        .iter()
        .filter_map(|point| point.time_and_value())
        .map(|(time, value)| ChartPoint { time, value })
        .collect();

    SeriesDefinition {
        name: series.name,
        unit: series.unit,
        index: series.index,
        series_type: series.series_type,
        color: series.color.filter(|color| !color.is_empty()),
        points,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{DefaultResultConverter, ResultConverter, ResultKind};
    use crate::stream::proto::{ResultPayload, SeriesType};

    fn payload() -> ResultPayload {
        serde_json::from_value(json!({
            "Charts": {
                "Strategy Equity": {
                    "Name": "Strategy Equity",
                    "Series": {
                        "Equity": {
                            "Name": "Equity",
                            "Unit": "$",
                            "Index": 0,
                            "SeriesType": 0,
                            "Color": "",
                            "Values": [
                                {"x": 1700000000, "y": 100000.0},
                                [1700000060, 100250.5],
                                [1700000120],
                                [null, 1.0]
                            ]
                        }
                    }
                }
            },
            "Orders": {"1": {"Id": 1, "Quantity": 10}},
            "ProfitLoss": {"2023-11-14T22:14:20Z": 250.5},
            "Statistics": {"Total Orders": "1"},
            "RuntimeStatistics": {"Equity": "$100,250.50"}
        }))
        .expect("payload")
    }

    #[test]
    fn backtest_conversion_keeps_sections_and_maps_points() {
        let snapshot = DefaultResultConverter.from_backtest_result(payload());
        assert_eq!(snapshot.kind, ResultKind::Backtest);

        let series = &snapshot.charts["Strategy Equity"].series["Equity"];
        assert_eq!(series.series_type, SeriesType::Line);
        assert_eq!(series.color, None);
        assert_eq!(series.points.len(), 2);
        assert_eq!(series.points[0].time.timestamp(), 1_700_000_000);
        assert_eq!(series.points[1].value, Some(100250.5));

        assert_eq!(snapshot.orders.len(), 1);
        assert_eq!(snapshot.statistics["Total Orders"], "1");
        assert_eq!(snapshot.runtime_statistics["Equity"], "$100,250.50");
        assert_eq!(snapshot.profit_loss.values().copied().sum::<f64>(), 250.5);
    }

    #[test]
    fn live_conversion_tags_the_snapshot() {
        let snapshot = DefaultResultConverter.from_live_result(ResultPayload::default());
        assert_eq!(snapshot.kind, ResultKind::Live);
        assert!(snapshot.charts.is_empty());
    }
}
