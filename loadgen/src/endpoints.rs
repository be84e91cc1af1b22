//! Weighted choice of the endpoint a request is sent to.

use rand::Rng;
use url::Url;

use crate::config::ConfigError;

/// Chooses target endpoints, biased towards the first, primary one.
///
/// With probability `primary_weight` the primary endpoint is chosen; otherwise one of the
/// secondary endpoints is chosen uniformly.
#[derive(Debug)]
pub struct EndpointSelector {
    endpoints: Vec<Url>,
    primary_weight: f64,
}

impl EndpointSelector {
    /// Creates a selector over `endpoints`.
    ///
    /// Requires at least two endpoints and a weight within `[0, 1]`, so that selection itself can
    /// never fail.
    pub fn new(endpoints: Vec<Url>, primary_weight: f64) -> Result<Self, ConfigError> {
        if endpoints.len() < 2 {
            return Err(ConfigError::TooFewEndpoints(endpoints.len()));
        }
        if !(0.0..=1.0).contains(&primary_weight) {
            return Err(ConfigError::InvalidPrimaryWeight(primary_weight));
        }

        Ok(Self {
            endpoints,
            primary_weight,
        })
    }

    /// All endpoints, the primary one first.
    pub fn endpoints(&self) -> &[Url] {
        &self.endpoints
    }

    /// Picks the endpoint for the next request.
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> &Url {
        if rng.random_bool(self.primary_weight) {
            return &self.endpoints[0];
        }
        &self.endpoints[rng.random_range(1..self.endpoints.len())]
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    fn urls(count: usize) -> Vec<Url> {
        (0..count)
            .map(|i| Url::parse(&format!("http://localhost/table_{i}")).unwrap())
            .collect()
    }

    #[test]
    fn primary_is_chosen_eighty_percent_of_the_time() {
        let selector = EndpointSelector::new(urls(10), 0.8).unwrap();
        let mut rng = SmallRng::seed_from_u64(99);

        const TRIALS: usize = 100_000;
        let mut counts = [0usize; 10];
        for _ in 0..TRIALS {
            let url = selector.select(&mut rng);
            let index = selector.endpoints().iter().position(|e| e == url).unwrap();
            counts[index] += 1;
        }

        let primary = counts[0] as f64 / TRIALS as f64;
        assert!((primary - 0.8).abs() < 0.01, "primary frequency {primary}");

        // 20% spread over 9 secondaries, ~2222 each
        let secondary: usize = counts[1..].iter().sum();
        let expected = secondary as f64 / 9.0;
        for count in &counts[1..] {
            let deviation = (*count as f64 - expected).abs() / expected;
            assert!(deviation < 0.1, "secondary counts {counts:?}");
        }
    }

    #[test]
    fn two_endpoints() {
        let selector = EndpointSelector::new(urls(2), 0.0).unwrap();
        let mut rng = SmallRng::seed_from_u64(5);

        for _ in 0..100 {
            assert_eq!(selector.select(&mut rng), &selector.endpoints()[1]);
        }

        let selector = EndpointSelector::new(urls(2), 1.0).unwrap();
        for _ in 0..100 {
            assert_eq!(selector.select(&mut rng), &selector.endpoints()[0]);
        }
    }

    #[test]
    fn rejects_single_endpoint() {
        let err = EndpointSelector::new(urls(1), 0.8).unwrap_err();
        assert_eq!(err, ConfigError::TooFewEndpoints(1));

        let err = EndpointSelector::new(Vec::new(), 0.8).unwrap_err();
        assert_eq!(err, ConfigError::TooFewEndpoints(0));
    }

    #[test]
    fn rejects_invalid_weight() {
        let err = EndpointSelector::new(urls(3), f64::NAN).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPrimaryWeight(w) if w.is_nan()));
    }
}
