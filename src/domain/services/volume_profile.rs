//! Time-of-day adjusted volume baseline.
//!
//! Session volume is U-shaped: heavy right after the open and into the close,
//! thin around the lunch break. Comparing cumulative volume at 10:00 against a
//! full-day average would flag every morning as a drought, so the baseline is
//! scaled by the share of a typical day's volume that has traded by now.

use chrono::NaiveTime;

use super::signals::AnomalyKind;

/// Cumulative share of daily volume traded by each time of day (HOSE hours).
const CUMULATIVE_SHAPE: &[(u32, u32, f64)] = &[
    (9, 0, 0.00),
    (9, 15, 0.09),
    (9, 30, 0.16),
    (10, 0, 0.27),
    (10, 30, 0.36),
    (11, 0, 0.44),
    (11, 30, 0.52),
    (13, 0, 0.52),
    (13, 30, 0.60),
    (14, 0, 0.70),
    (14, 30, 0.86),
    (14, 45, 1.00),
];

/// Below this share of the day the baseline is too small to judge.
const MIN_SESSION_FRACTION: f64 = 0.05;

/// Spread assumed when the provider does not supply a standard deviation.
const DEFAULT_COEFFICIENT_OF_VARIATION: f64 = 0.35;

/// Share of a typical day's volume traded by `time`, interpolated linearly.
pub fn cumulative_fraction(time: NaiveTime) -> f64 {
    let minutes = |h: u32, m: u32| (h * 60 + m) as f64;
    let now = minutes(
        chrono::Timelike::hour(&time),
        chrono::Timelike::minute(&time),
    ) + chrono::Timelike::second(&time) as f64 / 60.0;

    let (first_h, first_m, first_frac) = CUMULATIVE_SHAPE[0];
    if now <= minutes(first_h, first_m) {
        return first_frac;
    }

    for window in CUMULATIVE_SHAPE.windows(2) {
        let (h0, m0, f0) = window[0];
        let (h1, m1, f1) = window[1];
        let (t0, t1) = (minutes(h0, m0), minutes(h1, m1));
        if now <= t1 {
            return f0 + (f1 - f0) * (now - t0) / (t1 - t0);
        }
    }

    1.0
}

/// Volume a typical day has traded by `time`, given its full-day average.
///
/// `None` when the average is not positive or the session is too young for
/// the baseline to mean anything.
pub fn expected_volume(daily_average: f64, time: NaiveTime) -> Option<f64> {
    if daily_average <= 0.0 {
        return None;
    }
    let fraction = cumulative_fraction(time);
    (fraction >= MIN_SESSION_FRACTION).then(|| daily_average * fraction)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeThresholds {
    pub spike_z: f64,
    pub drop_z: f64,
}

impl Default for VolumeThresholds {
    fn default() -> Self {
        Self {
            spike_z: 2.5,
            drop_z: -2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeAssessment {
    pub expected: f64,
    pub z_score: f64,
    pub anomaly: Option<AnomalyKind>,
}

/// Score cumulative session `volume` against the daily baseline at `time`.
///
/// Returns `None` when the baseline is unusable (too early in the session or
/// a non-positive average).
pub fn assess_volume(
    volume: f64,
    daily_average: f64,
    daily_std: Option<f64>,
    time: NaiveTime,
    thresholds: VolumeThresholds,
) -> Option<VolumeAssessment> {
    if volume < 0.0 {
        return None;
    }
    let expected = expected_volume(daily_average, time)?;
    let fraction = cumulative_fraction(time);
    let sigma = daily_std
        .filter(|s| *s > 0.0)
        .unwrap_or(daily_average * DEFAULT_COEFFICIENT_OF_VARIATION)
        * fraction;
    if sigma <= 0.0 {
        return None;
    }

    let z_score = (volume - expected) / sigma;
    let anomaly = if z_score > thresholds.spike_z {
        Some(AnomalyKind::Spike)
    } else if z_score < thresholds.drop_z {
        Some(AnomalyKind::Drop)
    } else {
        None
    };

    Some(VolumeAssessment {
        expected,
        z_score,
        anomaly,
    })
}
