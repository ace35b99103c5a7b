//! Oscillation-amplitude envelope over the measurement region.

use log::debug;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::conditioning::ConditionedSignal;
use crate::config::{CuffTrace, EnvelopeConfig, EnvelopeKind, Smoothing};
use crate::detectors::peaks::Beat;
use crate::error::{ObpError, Result};
use crate::segment::Segment;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopePoint {
    /// Sample index into the conditioned recording.
    pub index: usize,
    pub t: f64,
    pub cuff_pressure: f64,
    pub amplitude: f64,
}

/// Envelope points ordered by time. Cuff pressure along the points is not
/// guaranteed to be monotonic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub smoothing: Smoothing,
    pub points: Vec<EnvelopePoint>,
}

impl Envelope {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Position of the largest amplitude, first on ties.
    pub fn peak_position(&self) -> Option<usize> {
        self.points
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, p)| match best {
                Some((_, a)) if a >= p.amplitude => best,
                _ => Some((i, p.amplitude)),
            })
            .map(|(i, _)| i)
    }
}

/// The minimum paired with `max`: the last one at or before it, or the
/// first one after it when none precedes.
pub fn aligned_minimum<'a>(max: &Beat, minima: &'a [Beat]) -> Option<&'a Beat> {
    let after = minima.partition_point(|m| m.t <= max.t);
    if after > 0 {
        minima.get(after - 1)
    } else {
        minima.first()
    }
}

/// Linear interpolation of beat amplitudes at time `t`, held constant
/// beyond the first and last beat.
fn amplitude_at(beats: &[Beat], t: f64) -> Option<f64> {
    let first = beats.first()?;
    let last = beats.last()?;
    if t <= first.t {
        return Some(first.osc_amplitude);
    }
    if t >= last.t {
        return Some(last.osc_amplitude);
    }
    let k = beats.partition_point(|b| b.t <= t);
    let (lo, hi) = (&beats[k - 1], &beats[k]);
    let w = (t - lo.t) / (hi.t - lo.t);
    Some(lo.osc_amplitude + w * (hi.osc_amplitude - lo.osc_amplitude))
}

pub fn build_envelope(
    maxima: &[Beat],
    minima: &[Beat],
    segment: &Segment,
    kind: EnvelopeKind,
    signal: &ConditionedSignal,
    trace: CuffTrace,
) -> Result<Envelope> {
    if segment.end >= maxima.len() || segment.start > segment.end {
        return Err(ObpError::InsufficientData(format!(
            "segment {}..={} lies outside {} maxima",
            segment.start,
            segment.end,
            maxima.len()
        )));
    }
    if kind != EnvelopeKind::MaximaOnly && minima.is_empty() {
        return Err(ObpError::InsufficientData(
            "no minima detected to pair with the maxima".into(),
        ));
    }

    let beats = segment.beats(maxima);
    let point = |index: usize, amplitude: f64| EnvelopePoint {
        index,
        t: signal.time[index],
        cuff_pressure: signal.cuff_at(trace, index),
        amplitude,
    };

    let points: Vec<EnvelopePoint> = match kind {
        EnvelopeKind::MaximaOnly => beats
            .iter()
            .map(|b| point(b.index, b.osc_amplitude))
            .collect(),
        EnvelopeKind::MaxMinusMin => beats
            .iter()
            .filter_map(|b| {
                aligned_minimum(b, minima).map(|m| point(b.index, b.osc_amplitude - m.osc_amplitude))
            })
            .collect(),
        EnvelopeKind::Interleaved => {
            let mut points = Vec::with_capacity(beats.len() * 2);
            for pair in beats.windows(2) {
                let (m0, m1) = (&pair[0], &pair[1]);
                let between = minima.partition_point(|m| m.t <= m0.t);
                let Some(trough) = minima.get(between).filter(|m| m.t < m1.t) else {
                    continue;
                };
                if let Some(max_there) = amplitude_at(beats, trough.t) {
                    points.push(point(trough.index, max_there - trough.osc_amplitude));
                }
                if let Some(min_there) = amplitude_at(minima, m1.t) {
                    points.push(point(m1.index, m1.osc_amplitude - min_there));
                }
            }
            points
        }
    };

    if points.is_empty() {
        return Err(ObpError::InsufficientData(format!(
            "{kind:?} envelope over beats {}..={} is empty",
            segment.start, segment.end
        )));
    }
    debug!("{:?} envelope with {} points", kind, points.len());
    Ok(Envelope {
        kind,
        smoothing: Smoothing::None,
        points,
    })
}

/// Least-squares polynomial coefficients (lowest power first) of `ys`
/// against `xs`.
pub fn polyfit(xs: &[f64], ys: &[f64], degree: usize) -> Result<Vec<f64>> {
    if xs.len() != ys.len() || xs.len() <= degree {
        return Err(ObpError::InsufficientData(format!(
            "degree {degree} fit needs more than {degree} points, got {}",
            xs.len()
        )));
    }
    let a = DMatrix::from_fn(xs.len(), degree + 1, |r, c| xs[r].powi(c as i32));
    let b = DVector::from_column_slice(ys);
    let coeffs = a
        .svd(true, true)
        .solve(&b, 1e-12)
        .map_err(|e| ObpError::InsufficientData(format!("polynomial fit failed: {e}")))?;
    Ok(coeffs.iter().copied().collect())
}

pub fn polyval(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

fn lagrange3(p: [&EnvelopePoint; 3], t: f64) -> f64 {
    let [a, b, c] = p;
    a.amplitude * (t - b.t) * (t - c.t) / ((a.t - b.t) * (a.t - c.t))
        + b.amplitude * (t - a.t) * (t - c.t) / ((b.t - a.t) * (b.t - c.t))
        + c.amplitude * (t - a.t) * (t - b.t) / ((c.t - a.t) * (c.t - b.t))
}

/// Resample the envelope on every native sample between its first and
/// last point. The time axis and cuff trace are those of the discrete
/// envelope, so crossings found on the result stay comparable.
pub fn smooth_envelope(
    envelope: &Envelope,
    cfg: &EnvelopeConfig,
    signal: &ConditionedSignal,
    trace: CuffTrace,
) -> Result<Envelope> {
    let pts = &envelope.points;
    let (Some(first), Some(last)) = (pts.first(), pts.last()) else {
        return Err(ObpError::InsufficientData("cannot smooth an empty envelope".into()));
    };
    if pts.len() < 2 {
        return Ok(envelope.clone());
    }

    let indices = first.index..=last.index;
    let amplitudes: Vec<f64> = match cfg.smoothing {
        Smoothing::None => return Ok(envelope.clone()),
        Smoothing::Linear | Smoothing::Quadratic => {
            let quadratic = cfg.smoothing == Smoothing::Quadratic && pts.len() >= 3;
            let mut k = 0;
            indices
                .clone()
                .map(|i| {
                    let t = signal.time[i];
                    while k + 2 < pts.len() && pts[k + 1].t <= t {
                        k += 1;
                    }
                    if quadratic {
                        let j = k.min(pts.len() - 3);
                        lagrange3([&pts[j], &pts[j + 1], &pts[j + 2]], t)
                    } else {
                        let (lo, hi) = (&pts[k], &pts[k + 1]);
                        let w = ((t - lo.t) / (hi.t - lo.t)).clamp(0.0, 1.0);
                        lo.amplitude + w * (hi.amplitude - lo.amplitude)
                    }
                })
                .collect()
        }
        Smoothing::Polynomial => {
            // fit on a centred, unit-span axis to keep the normal equations sane
            let mid = 0.5 * (first.t + last.t);
            let half = (0.5 * (last.t - first.t)).max(f64::EPSILON);
            let xs: Vec<f64> = pts.iter().map(|p| (p.t - mid) / half).collect();
            let ys: Vec<f64> = pts.iter().map(|p| p.amplitude).collect();
            let coeffs = polyfit(&xs, &ys, cfg.poly_degree)?;
            indices
                .clone()
                .map(|i| polyval(&coeffs, (signal.time[i] - mid) / half))
                .collect()
        }
    };

    let points = indices
        .zip(amplitudes)
        .map(|(i, amplitude)| EnvelopePoint {
            index: i,
            t: signal.time[i],
            cuff_pressure: signal.cuff_at(trace, i),
            amplitude,
        })
        .collect::<Vec<_>>();
    debug!(
        "{:?} smoothing resampled {} points to {}",
        cfg.smoothing,
        pts.len(),
        points.len()
    );
    Ok(Envelope {
        kind: envelope.kind,
        smoothing: cfg.smoothing,
        points,
    })
}
