//! Multi-observation trends and severity ranking.

use crate::normalize::canonical_test_id;
use crate::{
    Classifier, LabConfig, LabStatus, LabTrend, Measurement, Side, TrendDirection, TrendPoint,
};

impl Classifier {
    /// Trend for one test's series. `None` when no observation could be
    /// classified.
    pub fn trend(&self, series: &[Measurement]) -> Option<LabTrend> {
        self.trend_of(series.iter().collect())
    }

    /// One trend per test present in `measurements`, most severe first.
    pub fn trends(&self, measurements: &[Measurement]) -> Vec<LabTrend> {
        let mut series: Vec<(String, Vec<&Measurement>)> = Vec::new();
        for measurement in measurements {
            let key = canonical_test_id(&measurement.test_id);
            match series.iter_mut().find(|(existing, _)| *existing == key) {
                Some((_, members)) => members.push(measurement),
                None => series.push((key, vec![measurement])),
            }
        }

        let mut trends: Vec<LabTrend> = series
            .into_iter()
            .filter_map(|(_, members)| self.trend_of(members))
            .collect();
        sort_by_severity(&mut trends);
        trends
    }

    fn trend_of(&self, mut series: Vec<&Measurement>) -> Option<LabTrend> {
        series.sort_by_key(|measurement| measurement.observed_at);

        let mut points = Vec::with_capacity(series.len());
        let mut latest = None;
        for measurement in series {
            let result = self.classify_measurement(measurement);
            // Unknown results are not on the range's scale.
            if result.status == LabStatus::Unknown {
                continue;
            }
            let Some(value) = result.value else {
                continue;
            };
            points.push(TrendPoint {
                observed_at: measurement.observed_at,
                value,
            });
            latest = Some(result);
        }

        let latest = latest?;
        let first = points.first()?.value;
        let latest_value = points.last()?.value;
        let values: Vec<f64> = points.iter().map(|point| point.value).collect();

        let mut trend = LabTrend {
            test_id: latest.test_id,
            display_name: latest.display_name,
            direction: direction(&values, latest.status, self.config()),
            pct_change: round2(pct_change(first, latest_value)),
            latest_value,
            latest_status: latest.status,
            severity_score: 0.0,
            points,
        };
        trend.severity_score = severity_score(&trend, self.config());
        Some(trend)
    }
}

/// Higher is more urgent: status weight, direction weight and a capped
/// magnitude term.
pub fn severity_score(trend: &LabTrend, config: &LabConfig) -> f64 {
    let status_weight = match trend.latest_status {
        LabStatus::CriticalLow | LabStatus::CriticalHigh => 100.0,
        LabStatus::Low | LabStatus::High => 50.0,
        LabStatus::Normal | LabStatus::Unknown => 0.0,
    };
    let direction_weight = match trend.direction {
        TrendDirection::Worsening => 30.0,
        TrendDirection::Fluctuating => 15.0,
        TrendDirection::Stable => 0.0,
        TrendDirection::Improving => -10.0,
    };
    let magnitude = trend.pct_change.abs().min(config.pct_change_cap) * 0.1;
    round2(status_weight + direction_weight + magnitude)
}

/// Most urgent first; ties keep their order.
pub fn sort_by_severity(trends: &mut [LabTrend]) {
    trends.sort_by(|a, b| b.severity_score.total_cmp(&a.severity_score));
}

fn pct_change(first: f64, last: f64) -> f64 {
    if first == 0.0 {
        return if last == 0.0 { 0.0 } else { 100.0 };
    }
    (last - first) / first.abs() * 100.0
}

fn direction(values: &[f64], latest: LabStatus, config: &LabConfig) -> TrendDirection {
    if values.len() < 2 {
        return TrendDirection::Stable;
    }
    if is_fluctuating(values, config.fluctuation_reversals) {
        return TrendDirection::Fluctuating;
    }

    let slope = slope_sign(values);
    match (latest.side(), slope) {
        (Some(Side::High), -1) | (Some(Side::Low), 1) => TrendDirection::Improving,
        (Some(Side::High), 1) | (Some(Side::Low), -1) => TrendDirection::Worsening,
        _ => TrendDirection::Stable,
    }
}

fn signs(values: &[f64]) -> impl Iterator<Item = i8> + '_ {
    values.windows(2).map(|pair| {
        let diff = pair[1] - pair[0];
        if diff > 0.0 {
            1
        } else if diff < 0.0 {
            -1
        } else {
            0
        }
    })
}

/// Majority sign of successive differences.
fn slope_sign(values: &[f64]) -> i8 {
    let (rising, falling) = signs(values).fold((0usize, 0usize), |(up, down), sign| match sign {
        1 => (up + 1, down),
        -1 => (up, down + 1),
        _ => (up, down),
    });
    match rising.cmp(&falling) {
        std::cmp::Ordering::Greater => 1,
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
    }
}

fn is_fluctuating(values: &[f64], threshold: u32) -> bool {
    if values.len() < 3 || threshold == 0 {
        return false;
    }
    let mut reversals = 0u32;
    let mut previous = 0i8;
    for sign in signs(values).filter(|sign| *sign != 0) {
        if previous != 0 && sign != previous {
            reversals += 1;
        }
        previous = sign;
    }
    reversals >= threshold
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
