//! Statistical stand-in for the UWB chip's two-way ranging output.
//!
//! Line-of-sight samples carry small Gaussian jitter. Each anchor-tag link can
//! enter a multipath/NLOS burst with a configurable probability; while the
//! burst lasts, samples are drawn from a positively biased, wider Gaussian.

use std::collections::HashMap;

use rand::Rng;
use rand_distr::{Distribution, Normal};

use super::device::MacAddress;
use crate::common::{Distance, Point2D, SimResult, SimulationError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseParameters {
    pub jitter_sigma: f64,
    pub outlier_probability: f64,
    pub outlier_bias: f64,
    pub outlier_sigma: f64,
    /// Consecutive samples an outlier burst lasts on one link.
    pub burst_ticks: u32,
}

impl NoiseParameters {
    pub const ZERO: NoiseParameters = NoiseParameters {
        jitter_sigma: 0.0,
        outlier_probability: 0.0,
        outlier_bias: 0.0,
        outlier_sigma: 0.0,
        burst_ticks: 0,
    };
}

/// (anchor, tag) pair.
type LinkKey = (MacAddress, MacAddress);

#[derive(Debug, Clone)]
pub struct NoiseModel {
    jitter: Option<Normal<f64>>,
    outlier: Option<Normal<f64>>,
    outlier_probability: f64,
    burst_ticks: u32,
    bursts: HashMap<LinkKey, u32>,
}

impl NoiseModel {
    pub fn new(params: NoiseParameters) -> SimResult<Self> {
        let invalid = |reason: String| Err(SimulationError::Model(reason));

        if !(params.jitter_sigma.is_finite() && params.jitter_sigma >= 0.0) {
            return invalid(format!("Invalid jitter sigma: {}", params.jitter_sigma));
        }
        if !(params.outlier_sigma.is_finite() && params.outlier_sigma >= 0.0) {
            return invalid(format!("Invalid outlier sigma: {}", params.outlier_sigma));
        }
        if !params.outlier_bias.is_finite() {
            return invalid(format!("Invalid outlier bias: {}", params.outlier_bias));
        }
        if !(0.0..=1.0).contains(&params.outlier_probability) {
            return invalid(format!(
                "Outlier probability must be within [0, 1], got {}",
                params.outlier_probability
            ));
        }

        let jitter = gaussian(0.0, params.jitter_sigma)?;
        let outlier_enabled = params.outlier_probability > 0.0 && params.burst_ticks > 0;
        let outlier = if outlier_enabled {
            Some(Normal::new(params.outlier_bias, params.outlier_sigma).map_err(|e| {
                SimulationError::Model(format!("Invalid outlier distribution: {}", e))
            })?)
        } else {
            None
        };

        Ok(Self {
            jitter,
            outlier,
            outlier_probability: params.outlier_probability,
            burst_ticks: params.burst_ticks,
            bursts: HashMap::new(),
        })
    }

    /// Noise-free model: every sample equals the true distance.
    pub fn disabled() -> Self {
        Self {
            jitter: None,
            outlier: None,
            outlier_probability: 0.0,
            burst_ticks: 0,
            bursts: HashMap::new(),
        }
    }

    pub fn in_burst(&self, anchor: MacAddress, tag: MacAddress) -> bool {
        self.bursts.get(&(anchor, tag)).is_some_and(|left| *left > 0)
    }

    /// Additive error for one sample on the given link.
    pub fn sample<R: Rng + ?Sized>(&mut self, anchor: MacAddress, tag: MacAddress, rng: &mut R) -> f64 {
        if let Some(outlier) = self.outlier {
            let remaining = self.bursts.entry((anchor, tag)).or_insert(0);
            if *remaining > 0 {
                *remaining -= 1;
                return outlier.sample(rng);
            }
            if rng.gen_bool(self.outlier_probability) {
                *remaining = self.burst_ticks - 1;
                return outlier.sample(rng);
            }
        }

        self.jitter.map_or(0.0, |jitter| jitter.sample(rng))
    }
}

fn gaussian(mean: f64, sigma: f64) -> SimResult<Option<Normal<f64>>> {
    if sigma == 0.0 {
        return Ok(None);
    }
    Normal::new(mean, sigma)
        .map(Some)
        .map_err(|e| SimulationError::Model(format!("Invalid noise distribution: {}", e)))
}

/// Turns anchor-tag geometry into `{raw_distance, scaled_distance}` samples.
#[derive(Debug, Clone)]
pub struct RangingModel {
    scaling_factor: f64,
    noise: NoiseModel,
}

impl RangingModel {
    pub fn new(scaling_factor: f64, noise: NoiseModel) -> SimResult<Self> {
        if !scaling_factor.is_finite() {
            return Err(SimulationError::Model(format!(
                "Distance scaling factor must be finite, got {}",
                scaling_factor
            )));
        }
        Ok(Self {
            scaling_factor,
            noise,
        })
    }

    pub fn exact(scaling_factor: f64) -> SimResult<Self> {
        Self::new(scaling_factor, NoiseModel::disabled())
    }

    /// One measurement between an anchor and a tag. Raw distances are clamped
    /// at zero; a ranging chip never reports a negative range.
    pub fn measure<R: Rng + ?Sized>(
        &mut self,
        anchor: (MacAddress, Point2D),
        tag: (MacAddress, Point2D),
        rng: &mut R,
    ) -> Distance {
        let true_distance = anchor.1.distance_to(&tag.1);
        let noise = self.noise.sample(anchor.0, tag.0, rng);
        let raw_distance = (true_distance + noise).max(0.0);

        Distance {
            raw_distance,
            scaled_distance: raw_distance * self.scaling_factor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const ANCHOR: MacAddress = MacAddress::new([0xab, 0xcd, 0xef, 0, 0, 1]);
    const TAG: MacAddress = MacAddress::new([0xab, 0xcd, 0xef, 0, 0, 2]);

    fn noisy(params: NoiseParameters, scaling: f64) -> RangingModel {
        RangingModel::new(scaling, NoiseModel::new(params).unwrap()).unwrap()
    }

    #[test]
    fn exact_model_reports_true_distance() {
        let mut model = RangingModel::exact(1.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let d = model.measure(
            (ANCHOR, Point2D::new(300.0, 0.0)),
            (TAG, Point2D::new(100.0, 0.0)),
            &mut rng,
        );
        assert_eq!(d.raw_distance, 200.0);
        assert_eq!(d.scaled_distance, 200.0);
    }

    #[test]
    fn scaled_is_raw_times_factor() {
        let params = NoiseParameters {
            jitter_sigma: 0.3,
            outlier_probability: 0.2,
            outlier_bias: 2.0,
            outlier_sigma: 1.0,
            burst_ticks: 2,
        };
        let mut model = noisy(params, 0.87);
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        for i in 0..500 {
            let d = model.measure(
                (ANCHOR, Point2D::new(0.0, 0.0)),
                (TAG, Point2D::new(i as f64, 3.0)),
                &mut rng,
            );
            assert_eq!(d.scaled_distance, d.raw_distance * 0.87);
        }
    }

    #[test]
    fn raw_distance_never_negative() {
        let params = NoiseParameters {
            jitter_sigma: 5.0,
            outlier_probability: 0.5,
            outlier_bias: -10.0,
            outlier_sigma: 10.0,
            burst_ticks: 4,
        };
        let mut model = noisy(params, 1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(22);
        let here = Point2D::new(1.0, 1.0);
        for _ in 0..2000 {
            let d = model.measure((ANCHOR, here), (TAG, here), &mut rng);
            assert!(d.raw_distance >= 0.0);
        }
    }

    #[test]
    fn certain_outliers_hold_a_burst_for_its_length() {
        let params = NoiseParameters {
            jitter_sigma: 0.0,
            outlier_probability: 1.0,
            outlier_bias: 50.0,
            outlier_sigma: 0.0,
            burst_ticks: 3,
        };
        let mut noise = NoiseModel::new(params).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(23);

        assert_eq!(noise.sample(ANCHOR, TAG, &mut rng), 50.0);
        assert!(noise.in_burst(ANCHOR, TAG));
        assert_eq!(noise.sample(ANCHOR, TAG, &mut rng), 50.0);
        assert_eq!(noise.sample(ANCHOR, TAG, &mut rng), 50.0);
        assert!(!noise.in_burst(ANCHOR, TAG));
    }

    #[test]
    fn bursts_are_tracked_per_link() {
        let params = NoiseParameters {
            jitter_sigma: 0.0,
            outlier_probability: 1.0,
            outlier_bias: 5.0,
            outlier_sigma: 0.0,
            burst_ticks: 2,
        };
        let mut noise = NoiseModel::new(params).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(24);
        let other = MacAddress::new([0xab, 0xcd, 0xef, 0, 0, 3]);

        noise.sample(ANCHOR, TAG, &mut rng);
        assert!(noise.in_burst(ANCHOR, TAG));
        assert!(!noise.in_burst(other, TAG));
    }

    #[test]
    fn jitter_is_small_without_outliers() {
        let params = NoiseParameters {
            jitter_sigma: 0.1,
            ..NoiseParameters::ZERO
        };
        let mut model = noisy(params, 1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(25);
        let mut total_error = 0.0;
        for _ in 0..1000 {
            let d = model.measure(
                (ANCHOR, Point2D::new(0.0, 0.0)),
                (TAG, Point2D::new(100.0, 0.0)),
                &mut rng,
            );
            total_error += (d.raw_distance - 100.0).abs();
        }
        // Mean absolute deviation of N(0, 0.1) is about 0.08.
        assert!(total_error / 1000.0 < 0.15);
    }

    #[test]
    fn invalid_parameters_are_model_errors() {
        let bad_sigma = NoiseParameters {
            jitter_sigma: -1.0,
            ..NoiseParameters::ZERO
        };
        let bad_probability = NoiseParameters {
            outlier_probability: 1.5,
            ..NoiseParameters::ZERO
        };
        assert!(matches!(NoiseModel::new(bad_sigma), Err(SimulationError::Model(_))));
        assert!(matches!(NoiseModel::new(bad_probability), Err(SimulationError::Model(_))));
        assert!(RangingModel::exact(f64::NAN).is_err());
    }
}
