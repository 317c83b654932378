//! Unit and semantics aware value conversion

use crate::models::{Sample, SampleValue, Semantics, TargetFormat};

pub struct ValueTransformation;

impl ValueTransformation {
    /// Convert raw samples into what a panel should display.
    ///
    /// Counters become per-second rates. Counters of elapsed time are further
    /// scaled to seconds per second (utilization), except for heatmaps, which
    /// bucket by the metric's native unit.
    pub fn apply_transformations(
        format: TargetFormat,
        semantics: Semantics,
        units: &str,
        values: Vec<Sample>,
    ) -> Vec<Sample> {
        if semantics != Semantics::Counter {
            return values;
        }
        if values.iter().any(|sample| sample.value.as_f64().is_none()) {
            return values;
        }

        let rates = Self::counter_to_rate(&values);
        match (format, Self::time_unit_divisor(units)) {
            (TargetFormat::Heatmap, _) | (_, None) => rates,
            (_, Some(divisor)) => rates
                .into_iter()
                .map(|sample| match sample.value {
                    SampleValue::Number(rate) => {
                        Sample::new(sample.timestamp, SampleValue::Number(rate / divisor))
                    }
                    SampleValue::Text(_) => sample,
                })
                .collect(),
        }
    }

    fn counter_to_rate(values: &[Sample]) -> Vec<Sample> {
        values
            .windows(2)
            .filter_map(|pair| {
                let (prev, cur) = (&pair[0], &pair[1]);
                let elapsed = (cur.timestamp - prev.timestamp).num_milliseconds() as f64 / 1000.0;
                let delta = cur.value.as_f64()? - prev.value.as_f64()?;

                // counter reset or wrap
                if elapsed <= 0.0 || delta < 0.0 {
                    return None;
                }
                Some(Sample::new(cur.timestamp, SampleValue::Number(delta / elapsed)))
            })
            .collect()
    }

    fn time_unit_divisor(units: &str) -> Option<f64> {
        match units.trim() {
            "nanosec" => Some(1e9),
            "microsec" => Some(1e6),
            "millisec" => Some(1e3),
            _ => None,
        }
    }
}
