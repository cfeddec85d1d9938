//! Scan cloud of confidence-weighted depth samples

use crate::point::*;
use serde::{Deserialize, Serialize};
use std::ops::Index;

/// Depth samples retained for one capture session, in acceptance order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanPointCloud {
    samples: Vec<ConfidentPoint3f>,
}

impl ScanPointCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_samples(samples: Vec<ConfidentPoint3f>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn push(&mut self, sample: ConfidentPoint3f) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[ConfidentPoint3f] {
        &self.samples
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConfidentPoint3f> {
        self.samples.iter()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Thin the cloud to every `stride`-th sample, starting with the first.
    /// A stride of 0 or 1 keeps everything.
    pub fn retain_stride(&mut self, stride: usize) {
        if stride <= 1 {
            return;
        }
        let mut position = 0usize;
        self.samples.retain(|_| {
            let keep = position % stride == 0;
            position += 1;
            keep
        });
    }

    /// Positions in acceptance order
    pub fn positions(&self) -> impl Iterator<Item = Point3f> + '_ {
        self.samples.iter().map(|s| s.position)
    }

    /// Confidences, index-aligned with [`positions`](Self::positions)
    pub fn confidences(&self) -> impl Iterator<Item = f32> + '_ {
        self.samples.iter().map(|s| s.confidence)
    }

    /// Mean confidence of the retained samples, `None` when empty
    pub fn mean_confidence(&self) -> Option<f32> {
        (!self.is_empty()).then(|| self.confidences().sum::<f32>() / self.len() as f32)
    }
}

impl Index<usize> for ScanPointCloud {
    type Output = ConfidentPoint3f;

    fn index(&self, index: usize) -> &ConfidentPoint3f {
        &self.samples[index]
    }
}

impl FromIterator<ConfidentPoint3f> for ScanPointCloud {
    fn from_iter<I: IntoIterator<Item = ConfidentPoint3f>>(iter: I) -> Self {
        Self::from_samples(iter.into_iter().collect())
    }
}
