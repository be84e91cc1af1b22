//! Random selection of the records sent in one request.

use loadgen_dataset::RecordSet;
use rand::Rng;
use serde_json::value::RawValue;

use crate::config::{BatchSize, ConfigError};

/// Draws random batches from a [`RecordSet`].
///
/// Sampling picks distinct indices and borrows the records behind them, so the record set is
/// never modified and can be sampled from any number of workers at once.
#[derive(Clone, Copy, Debug)]
pub struct Sampler {
    min: usize,
    max: usize,
}

impl Sampler {
    /// Creates a sampler drawing between `min` and `max` records per batch, inclusive.
    pub fn new(BatchSize { min, max }: BatchSize) -> Result<Self, ConfigError> {
        if min == 0 || min > max {
            return Err(ConfigError::InvalidBatchSize { min, max });
        }
        Ok(Self { min, max })
    }

    /// Picks the indices of a batch, in random order and without repetition.
    ///
    /// The batch size is drawn uniformly from the configured range and capped at the number of
    /// available records.
    pub fn sample_indices<R: Rng + ?Sized>(&self, len: usize, rng: &mut R) -> Vec<usize> {
        let size = rng.random_range(self.min..=self.max);
        rand::seq::index::sample(rng, len, size.min(len)).into_vec()
    }

    /// Draws a batch of records.
    pub fn sample<'a, R: Rng + ?Sized>(
        &self,
        records: &'a RecordSet,
        rng: &mut R,
    ) -> Vec<&'a RawValue> {
        let records = records.as_slice();
        self.sample_indices(records.len(), rng)
            .into_iter()
            .map(|index| &*records[index])
            .collect()
    }
}

impl Default for Sampler {
    fn default() -> Self {
        let BatchSize { min, max } = BatchSize::default();
        Self { min, max }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    fn records(count: usize) -> RecordSet {
        let data: String = (0..count).map(|i| format!("{{\"id\":{i}}}\n")).collect();
        RecordSet::parse_jsonl(data.as_bytes()).unwrap()
    }

    #[test]
    fn batch_sizes_stay_within_bounds() {
        let sampler = Sampler::default();
        let mut rng = SmallRng::seed_from_u64(7);
        let mut seen = HashSet::new();

        for _ in 0..2000 {
            let indices = sampler.sample_indices(100, &mut rng);
            assert!((5..=10).contains(&indices.len()), "{}", indices.len());
            seen.insert(indices.len());
        }

        // every size in the range is actually produced
        assert_eq!(seen, (5..=10).collect::<HashSet<_>>());
    }

    #[test]
    fn indices_are_distinct_and_in_range() {
        let sampler = Sampler::default();
        let mut rng = SmallRng::seed_from_u64(42);

        for _ in 0..1000 {
            let indices = sampler.sample_indices(12, &mut rng);
            let unique: HashSet<_> = indices.iter().copied().collect();
            assert_eq!(unique.len(), indices.len());
            assert!(indices.iter().all(|index| *index < 12));
        }
    }

    #[test]
    fn small_sets_are_returned_whole() {
        let records = records(3);
        let sampler = Sampler::default();
        let mut rng = SmallRng::seed_from_u64(1);

        for _ in 0..100 {
            let batch = sampler.sample(&records, &mut rng);
            let mut raw: Vec<_> = batch.iter().map(|record| record.get()).collect();
            raw.sort_unstable();
            assert_eq!(raw, ["{\"id\":0}", "{\"id\":1}", "{\"id\":2}"]);
        }
    }

    #[test]
    fn empty_set_yields_empty_batch() {
        let records = records(0);
        let mut rng = SmallRng::seed_from_u64(1);

        assert!(Sampler::default().sample(&records, &mut rng).is_empty());
    }

    #[test]
    fn custom_bounds() {
        let sampler = Sampler::new(BatchSize { min: 2, max: 2 }).unwrap();
        let mut rng = SmallRng::seed_from_u64(3);

        assert_eq!(sampler.sample(&records(50), &mut rng).len(), 2);
        assert_eq!(
            Sampler::new(BatchSize { min: 4, max: 3 }).unwrap_err(),
            ConfigError::InvalidBatchSize { min: 4, max: 3 }
        );
    }

    #[test]
    fn concurrent_sampling_leaves_records_untouched() {
        let records = Arc::new(records(20));
        let before: Vec<String> = records
            .as_slice()
            .iter()
            .map(|record| record.get().to_owned())
            .collect();

        let handles: Vec<_> = (0..8)
            .map(|seed| {
                let records = Arc::clone(&records);
                std::thread::spawn(move || {
                    let sampler = Sampler::default();
                    let mut rng = SmallRng::seed_from_u64(seed);
                    for _ in 0..5000 {
                        let batch = sampler.sample(&records, &mut rng);
                        assert!((5..=10).contains(&batch.len()));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let after: Vec<&str> = records.as_slice().iter().map(|record| record.get()).collect();
        assert_eq!(after, before);
    }
}
