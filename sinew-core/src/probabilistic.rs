//! Distribution wrapper for steps that opt out of stability.
//!
//! A step declared unstable returns [`Probabilistic<T>`] instead of a bare
//! value. In production the wrapper holds a single sample and every method
//! behaves trivially; in test mode the runtime populates it with `sample_n`
//! samples so agreement can be measured.

use crate::error::SinewError;
use rand::Rng;
use serde::Serialize;

/// A set of samples from repeated executions of one step.
///
/// Samples compare by their canonical JSON rendering, which is the same
/// notion of equality the quorum and debate primitives use.
#[derive(Debug, Clone)]
pub struct Probabilistic<T> {
    samples: Vec<T>,
}

fn render<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

impl<T: Serialize> Probabilistic<T> {
    /// Wrap a non-empty sample set.
    ///
    /// # Panics
    ///
    /// Panics if `samples` is empty — a distribution with no samples is a
    /// programming error, not a runtime condition.
    pub fn new(samples: Vec<T>) -> Self {
        assert!(!samples.is_empty(), "Probabilistic requires at least one sample");
        Self { samples }
    }

    /// All collected samples, in execution order.
    pub fn samples(&self) -> &[T] {
        &self.samples
    }

    /// Index of the modal sample by rendered-equality count. Ties break
    /// toward the earliest sample.
    fn modal_index(&self) -> usize {
        if self.samples.len() == 1 {
            return 0;
        }
        let rendered: Vec<String> = self.samples.iter().map(render).collect();
        rendered
            .iter()
            .enumerate()
            .max_by_key(|&(i, r)| {
                (
                    rendered.iter().filter(|o| *o == r).count(),
                    usize::MAX - i,
                )
            })
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// The modal sample. For a single sample, that sample.
    pub fn most_likely(&self) -> &T {
        &self.samples[self.modal_index()]
    }

    /// Consume the wrapper, returning the modal sample.
    pub fn into_most_likely(mut self) -> T {
        let idx = self.modal_index();
        self.samples.swap_remove(idx)
    }

    /// A uniform random draw from the collected samples.
    pub fn sample(&self) -> &T {
        let idx = rand::thread_rng().gen_range(0..self.samples.len());
        &self.samples[idx]
    }

    /// Fraction of samples matching the modal value.
    pub fn agreement(&self) -> f64 {
        if self.samples.len() <= 1 {
            return 1.0;
        }
        let modal = render(self.most_likely());
        let matching = self
            .samples
            .iter()
            .filter(|s| render(*s) == modal)
            .count();
        matching as f64 / self.samples.len() as f64
    }

    /// Fail with [`SinewError::Stability`] when agreement is below
    /// `threshold`; otherwise succeed.
    pub fn assert_stable(&self, threshold: f64) -> Result<(), SinewError> {
        let agreement = self.agreement();
        if agreement < threshold {
            return Err(SinewError::Stability {
                threshold,
                agreement,
            });
        }
        Ok(())
    }
}
