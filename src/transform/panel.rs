//! Shapes flattened target results into panel frames

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Metric, MetricInstance, Query, SampleValue, TargetFormat, TargetResult};
use crate::template::TemplateSrv;
use crate::util::is_blank;

static LEGEND_VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(\w+)").expect("legend pattern is valid"));

/// Computes the display name of one series: `(metric, instance, labels)`
pub type LegendFormatter = fn(&str, Option<&MetricInstance>, &BTreeMap<String, String>) -> String;

/// Instance name for instances with an id, the metric name otherwise
pub fn default_legend_formatter(
    metric: &str,
    instance: Option<&MetricInstance>,
    _labels: &BTreeMap<String, String>,
) -> String {
    match instance {
        Some(instance) if instance.id.is_some() => instance.name.clone(),
        _ => metric.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeries {
    pub target: String,
    pub ref_id: String,
    /// `[value, epoch milliseconds]`
    pub datapoints: Vec<(SampleValue, i64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub ref_id: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PanelFrame {
    TimeSeries(TimeSeries),
    Table(Table),
}

/// What a panel query returns to the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PanelData {
    pub data: Vec<PanelFrame>,
}

pub struct PanelTransformations {
    templates: Arc<dyn TemplateSrv>,
}

impl PanelTransformations {
    pub fn new(templates: Arc<dyn TemplateSrv>) -> Self {
        Self { templates }
    }

    pub fn transform(
        &self,
        query: &Query,
        results: &[TargetResult],
        legend_formatter: LegendFormatter,
    ) -> Vec<PanelFrame> {
        let Some(format) = results.first().map(|result| result.target.format) else {
            return Vec::new();
        };

        let mut series = self.time_series(query, results, legend_formatter);
        match format {
            TargetFormat::TimeSeries => series.into_iter().map(PanelFrame::TimeSeries).collect(),
            TargetFormat::Heatmap => {
                series.sort_by(|a, b| a.target.cmp(&b.target));
                series.into_iter().map(PanelFrame::TimeSeries).collect()
            }
            TargetFormat::Table => Self::table(series).into_iter().map(PanelFrame::Table).collect(),
        }
    }

    fn time_series(
        &self,
        query: &Query,
        results: &[TargetResult],
        legend_formatter: LegendFormatter,
    ) -> Vec<TimeSeries> {
        let mut series = Vec::new();
        for result in results {
            for metric in &result.metrics {
                for instance in &metric.instances {
                    series.push(TimeSeries {
                        target: self.legend(query, result, metric, instance, legend_formatter),
                        ref_id: result.target.ref_id.clone(),
                        datapoints: instance
                            .values
                            .iter()
                            .map(|sample| {
                                (sample.value.clone(), sample.timestamp.timestamp_millis())
                            })
                            .collect(),
                    });
                }
            }
        }
        series
    }

    /// One table per refId, one row per series holding its latest sample
    fn table(series: Vec<TimeSeries>) -> Vec<Table> {
        let mut tables: Vec<Table> = Vec::new();
        for entry in series {
            let Some((value, timestamp)) = entry.datapoints.last() else {
                continue;
            };
            let row = vec![
                Value::from(*timestamp),
                Value::from(entry.target.clone()),
                serde_json::to_value(value).unwrap_or(Value::Null),
            ];

            match tables.iter_mut().find(|table| table.ref_id == entry.ref_id) {
                Some(table) => table.rows.push(row),
                None => tables.push(Table {
                    ref_id: entry.ref_id.clone(),
                    columns: ["Time", "Series", "Value"]
                        .into_iter()
                        .map(|text| Column {
                            text: text.to_string(),
                        })
                        .collect(),
                    rows: vec![row],
                    kind: "table".to_string(),
                }),
            }
        }
        tables
    }

    fn legend(
        &self,
        query: &Query,
        result: &TargetResult,
        metric: &Metric,
        instance: &MetricInstance,
        legend_formatter: LegendFormatter,
    ) -> String {
        let target = &result.target;
        let Some(format) = target
            .legend_format
            .as_deref()
            .filter(|format| !is_blank(Some(format)))
        else {
            return legend_formatter(&metric.name, Some(instance), &instance.labels);
        };

        let expanded = LEGEND_VARIABLE.replace_all(format, |caps: &Captures| {
            let name = &caps[1];
            match name {
                "expr" => target.expr.clone(),
                "metric" => metric.name.clone(),
                "metric0" => metric
                    .name
                    .rsplit('.')
                    .next()
                    .unwrap_or(&metric.name)
                    .to_string(),
                "instance" => instance.name.clone(),
                _ => instance
                    .labels
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string()),
            }
        });

        self.templates.replace(&expanded, &query.scoped_vars)
    }
}
