//! Minimal Prometheus HTTP API client (range queries only).

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::Deserialize;
use tracing::debug;

use servegrid_core::MetricPoint;

use crate::error::{PerfError, PerfResult};

/// Time range and resolution shared by all queries of one fetch.
#[derive(Debug, Clone)]
pub struct QueryWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step: String,
}

impl QueryWindow {
    /// The `lookback` window ending now.
    pub fn ending_now(lookback: Duration, step: impl Into<String>) -> Self {
        let end = Utc::now();
        let lookback = TimeDelta::from_std(lookback).unwrap_or(TimeDelta::hours(3));
        Self {
            start: end - lookback,
            end,
            step: step.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryRangeResponse {
    pub status: String,
    #[serde(default)]
    pub data: Option<QueryRangeData>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QueryRangeData {
    #[serde(rename = "resultType", default)]
    pub result_type: String,
    #[serde(default)]
    pub result: Vec<RangeSeries>,
}

/// One labelled matrix series: `values` are `[unix_ts, "value"]` pairs.
#[derive(Debug, Clone, Deserialize)]
pub struct RangeSeries {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    #[serde(default)]
    pub values: Vec<(f64, String)>,
}

impl RangeSeries {
    /// Which replica the series belongs to.
    pub fn identity(&self) -> String {
        self.metric
            .get("exported_job")
            .or_else(|| self.metric.get("service"))
            .or_else(|| self.metric.values().next())
            .cloned()
            .unwrap_or_default()
    }

    /// Numeric samples; points whose value does not parse are skipped.
    pub fn points(&self) -> Vec<MetricPoint> {
        self.values
            .iter()
            .filter_map(|(ts, raw)| raw.parse::<f64>().ok().map(|v| [*ts, v]))
            .collect()
    }
}

#[derive(Clone)]
pub struct PrometheusClient {
    http: reqwest::Client,
    base_url: String,
}

impl PrometheusClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// `GET /api/v1/query_range`, returning the matrix series.
    pub async fn query_range(
        &self,
        query: &str,
        window: &QueryWindow,
    ) -> PerfResult<Vec<RangeSeries>> {
        let start = window.start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let end = window.end.to_rfc3339_opts(SecondsFormat::Secs, true);
        let resp = self
            .http
            .get(format!("{}/api/v1/query_range", self.base_url))
            .query(&[
                ("query", query),
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("step", window.step.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PerfError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: QueryRangeResponse = resp.json().await?;
        if body.status != "success" {
            return Err(PerfError::Query(
                body.error.unwrap_or_else(|| format!("status {}", body.status)),
            ));
        }
        let series = body.data.map(|d| d.result).unwrap_or_default();
        debug!(query, series = series.len(), "range query complete");
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_matrix_response() {
        let json = r#"{
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": [
                    {"metric": {"exported_job": "svc-replica-ab12"}, "values": [[1700000000, "1.5"], [1700000060, "NaN"], [1700000120, "oops"]]}
                ]
            }
        }"#;
        let resp: QueryRangeResponse = serde_json::from_str(json).unwrap();
        let series = &resp.data.unwrap().result[0];
        assert_eq!(series.identity(), "svc-replica-ab12");
        let points = series.points();
        // "NaN" parses as a float; "oops" does not.
        assert_eq!(points.len(), 2);
        assert_eq!(points[0], [1_700_000_000.0, 1.5]);
    }

    #[test]
    fn test_identity_falls_back_to_service_label() {
        let series = RangeSeries {
            metric: [("service".to_string(), "svc-replica-1".to_string())]
                .into_iter()
                .collect(),
            values: vec![],
        };
        assert_eq!(series.identity(), "svc-replica-1");
    }

    #[test]
    fn test_window_spans_lookback() {
        let window = QueryWindow::ending_now(Duration::from_secs(3 * 3600), "60s");
        assert_eq!((window.end - window.start).num_hours(), 3);
    }
}
