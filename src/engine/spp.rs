//! Majority-vote SPP estimation.
//!
//! Individual listings are discounted independently and imperfectly (flash
//! sales, stale caches, per-item overrides). The seller-wide SPP is the value
//! a strong plurality of products agree on, never an average.

use crate::config::Settings;
use crate::domain::{IndeterminateReason, ProductObservation, SppEstimate};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy)]
pub struct SppEstimator {
    min_sample: usize,
    min_percent: u32,
    max_discount: u32,
}

impl SppEstimator {
    pub fn new(settings: &Settings) -> Self {
        Self {
            min_sample: settings.products_num_to_determine_spp,
            min_percent: settings.products_num_percent_min_determine_spp,
            max_discount: settings.maximum_client_discount_base,
        }
    }

    pub fn estimate(&self, observations: &[ProductObservation]) -> SppEstimate {
        self.estimate_percents(observations.iter().map(|o| o.discount_percent()))
    }

    /// Reduce already-recovered per-product percentages.
    ///
    /// `None` and values outside `[0, maximum_client_discount_base]` are
    /// dropped before the sample-size check.
    pub fn estimate_percents<I>(&self, percents: I) -> SppEstimate
    where
        I: IntoIterator<Item = Option<i64>>,
    {
        let mut total = 0usize;
        let mut retained = 0usize;
        // value -> group size
        let mut groups: BTreeMap<u32, usize> = BTreeMap::new();

        for percent in percents {
            total += 1;
            let Some(value) = percent
                .filter(|p| (0..=i64::from(self.max_discount)).contains(p))
                .and_then(|p| u32::try_from(p).ok())
            else {
                continue;
            };
            retained += 1;
            *groups.entry(value).or_default() += 1;
        }

        if retained == 0 && total >= self.min_sample {
            return SppEstimate::Indeterminate {
                reason: IndeterminateReason::AllOutOfBounds,
            };
        }
        if retained < self.min_sample {
            return SppEstimate::Indeterminate {
                reason: IndeterminateReason::InsufficientSample,
            };
        }

        // Ascending iteration with `>=` lets the higher value win ties.
        let mut best: Option<(u32, usize)> = None;
        for (&value, &count) in &groups {
            if best.map_or(true, |(_, best_count)| count >= best_count) {
                best = Some((value, count));
            }
        }

        match best {
            Some((value, count))
                if count as u64 * 100 >= u64::from(self.min_percent) * retained as u64 =>
            {
                SppEstimate::Determined { spp: value }
            }
            _ => SppEstimate::Indeterminate {
                reason: IndeterminateReason::NoMajority,
            },
        }
    }
}
