//! Candidate code generator biased by the identifier model

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use super::{CharCategory, IdentifierModel};
use crate::error::{ProbeError, Result};

/// A generated code, kept both as symbols (for model updates) and joined
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub symbols: Vec<String>,
    pub code: String,
}

impl Candidate {
    pub fn new(symbols: Vec<String>) -> Self {
        let code = symbols.concat();
        Self { symbols, code }
    }
}

/// Generator over a borrowed model.
///
/// Each symbol starts with weight 1, learned exact counts are added on top,
/// and category frequency then scales the result by
/// `1 + category_count / total_category_count`. The base weight of 1 keeps
/// every symbol reachable no matter how skewed the model gets.
pub struct CodeGenerator<'m> {
    model: &'m IdentifierModel,
}

impl<'m> CodeGenerator<'m> {
    pub fn new(model: &'m IdentifierModel) -> Self {
        Self { model }
    }

    /// Sampling weights for one position, aligned with `alphabet`
    pub fn position_weights(
        &self,
        domain: &str,
        length: usize,
        position: usize,
        alphabet: &[String],
    ) -> Vec<f64> {
        let mut weights = vec![1.0; alphabet.len()];

        let Some(stats) = self.model.position(domain, length, position) else {
            return weights;
        };

        for (weight, symbol) in weights.iter_mut().zip(alphabet) {
            *weight += stats.count(symbol) as f64;
        }

        let total = stats.categories.total();
        if total > 0 {
            for (weight, symbol) in weights.iter_mut().zip(alphabet) {
                let category = stats.categories.get(CharCategory::of(symbol));
                *weight *= 1.0 + category as f64 / total as f64;
            }
        }

        weights
    }

    /// Draw one candidate of `length` symbols
    pub fn generate<R: Rng + ?Sized>(
        &self,
        domain: &str,
        length: usize,
        alphabet: &[String],
        rng: &mut R,
    ) -> Result<Candidate> {
        if alphabet.is_empty() {
            return Err(ProbeError::internal(format!(
                "Cannot generate a code for {} from an empty alphabet",
                domain
            )));
        }

        let mut symbols = Vec::with_capacity(length);
        for position in 0..length {
            let weights = self.position_weights(domain, length, position, alphabet);
            let dist = WeightedIndex::new(&weights).map_err(|e| {
                ProbeError::internal(format!("Invalid sampling weights for {}: {}", domain, e))
            })?;
            symbols.push(alphabet[dist.sample(rng)].clone());
        }

        Ok(Candidate::new(symbols))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::split_symbols;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ab() -> Vec<String> {
        split_symbols("AB")
    }

    #[test]
    fn test_empty_model_is_uniform_weights() {
        let model = IdentifierModel::new();
        let gen = CodeGenerator::new(&model);
        let weights = gen.position_weights("d1", 4, 0, &split_symbols("abcd"));
        assert_eq!(weights, vec![1.0; 4]);
    }

    #[test]
    fn test_empty_model_samples_uniformly() {
        let model = IdentifierModel::new();
        let gen = CodeGenerator::new(&model);
        let alphabet = split_symbols("abcd");
        let mut rng = StdRng::seed_from_u64(7);

        let trials = 40_000;
        let mut counts = [0usize; 4];
        for _ in 0..trials {
            let candidate = gen.generate("d1", 3, &alphabet, &mut rng).unwrap();
            let first = &candidate.symbols[0];
            let idx = alphabet.iter().position(|s| s == first).unwrap();
            counts[idx] += 1;
        }

        let expected = trials as f64 / 4.0;
        for count in counts {
            let deviation = (count as f64 - expected).abs() / expected;
            assert!(deviation < 0.05, "count {} deviates {:.3}", count, deviation);
        }
    }

    #[test]
    fn test_learned_bias_scenario() {
        let mut model = IdentifierModel::new();
        model.record_code("d1", "AABB");
        model.record_code("d1", "ABAB");

        let gen = CodeGenerator::new(&model);
        let weights = gen.position_weights("d1", 4, 0, &ab());
        // (1 + 2) * (1 + 2/2) vs (1 + 0) * (1 + 2/2)
        assert_eq!(weights, vec![6.0, 2.0]);

        let mut rng = StdRng::seed_from_u64(42);
        let mut a = 0;
        let mut b = 0;
        for _ in 0..5_000 {
            match gen.generate("d1", 4, &ab(), &mut rng).unwrap().symbols[0].as_str() {
                "A" => a += 1,
                _ => b += 1,
            }
        }
        assert!(a > b, "A={} B={}", a, b);
    }

    #[test]
    fn test_category_bias_compounds() {
        let mut model = IdentifierModel::new();
        model.record_code("d1", "a");
        model.record_code("d1", "b");
        model.record_code("d1", "7");

        let gen = CodeGenerator::new(&model);
        let alphabet = split_symbols("abz79");
        let weights = gen.position_weights("d1", 1, 0, &alphabet);

        let lower = 1.0 + 2.0 / 3.0;
        let digit = 1.0 + 1.0 / 3.0;
        assert!((weights[0] - 2.0 * lower).abs() < 1e-9); // a
        assert!((weights[2] - 1.0 * lower).abs() < 1e-9); // z, never seen
        assert!((weights[3] - 2.0 * digit).abs() < 1e-9); // 7
        assert!((weights[4] - 1.0 * digit).abs() < 1e-9); // 9, never seen
    }

    #[test]
    fn test_weights_never_zero() {
        let mut model = IdentifierModel::new();
        for _ in 0..1_000 {
            model.record_code("d1", "aa");
        }
        let gen = CodeGenerator::new(&model);
        let weights = gen.position_weights("d1", 2, 1, &split_symbols("aZ9"));
        assert!(weights.iter().all(|w| *w >= 1.0));
    }

    #[test]
    fn test_generate_length_and_join() {
        let model = IdentifierModel::new();
        let gen = CodeGenerator::new(&model);
        let alphabet = vec!["😀".to_string(), "🙃".to_string()];
        let mut rng = StdRng::seed_from_u64(1);
        let candidate = gen.generate("emoji", 5, &alphabet, &mut rng).unwrap();
        assert_eq!(candidate.symbols.len(), 5);
        assert_eq!(candidate.code.chars().count(), 5);
    }

    #[test]
    fn test_empty_alphabet_is_error() {
        let model = IdentifierModel::new();
        let gen = CodeGenerator::new(&model);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(gen.generate("d1", 3, &[], &mut rng).is_err());
    }
}
