//! Trained complexity classifier.
//!
//! A small TF-IDF + logistic-regression model fit at construction time
//! over a seeded corpus of labeled task descriptions. Training is plain
//! batch gradient descent with fixed iteration count and zero-initialized
//! weights, so the model is fully deterministic.

use std::collections::HashMap;

use tracing::debug;

use super::signals::tokenize;

/// Labeled seed corpus: (text, is_complex).
const SEED_CORPUS: &[(&str, bool)] = &[
    ("What is the capital of France?", false),
    ("Translate hello into Spanish", false),
    ("What time is it in Tokyo?", false),
    ("Give me a synonym for happy", false),
    ("How many days are in March?", false),
    ("Convert 10 miles to kilometers", false),
    ("Spell the word necessary", false),
    ("Who wrote Pride and Prejudice?", false),
    ("What color is the sky?", false),
    ("Define the word ephemeral", false),
    (
        "Design a distributed caching layer with consistent hashing, then implement \
         failover handling and write a migration plan for the existing deployment",
        true,
    ),
    (
        "Analyze quarterly sales data, identify seasonal trends, build a forecasting \
         model, and summarize the findings in a report for stakeholders",
        true,
    ),
    (
        "Refactor the authentication module to support multiple identity providers \
         while preserving backwards compatibility and adding integration tests",
        true,
    ),
    (
        "Prove that the algorithm terminates, derive its worst-case complexity bound, \
         and compare it against the baseline implementation",
        true,
    ),
    (
        "Plan a three-phase database migration: first snapshot the data, then replay \
         the changelog, and finally verify row counts and checksums match",
        true,
    ),
    (
        "Investigate the memory leak, isolate the allocation site, fix the lifetime \
         issue, and add a regression test that exercises the failing path",
        true,
    ),
    (
        "Evaluate three vendor APIs for rate limits and pricing, integrate the best \
         candidate behind a feature flag, and document the rollback procedure",
        true,
    ),
    (
        "Synthesize the survey responses into themes, cross-reference them with usage \
         metrics, and propose prioritized product changes with effort estimates",
        true,
    ),
];

const LEARNING_RATE: f64 = 0.5;
const EPOCHS: usize = 200;

/// TF-IDF + logistic-regression complexity model.
pub struct ComplexityClassifier {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f64>,
    weights: Vec<f64>,
    bias: f64,
    /// TF-IDF vectors of the seed corpus, kept for nearest-neighbor
    /// similarity scoring.
    corpus_vectors: Vec<(Vec<f64>, bool)>,
}

impl Default for ComplexityClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ComplexityClassifier {
    pub fn new() -> Self {
        Self::from_corpus(SEED_CORPUS)
    }

    /// Build and fit a model from a labeled corpus.
    pub fn from_corpus(corpus: &[(&str, bool)]) -> Self {
        let documents: Vec<Vec<String>> = corpus.iter().map(|(text, _)| tokenize(text)).collect();

        let mut vocabulary: HashMap<String, usize> = HashMap::new();
        for doc in &documents {
            for word in doc {
                let next = vocabulary.len();
                vocabulary.entry(word.clone()).or_insert(next);
            }
        }

        let doc_count = documents.len() as f64;
        let mut document_frequency = vec![0usize; vocabulary.len()];
        for doc in &documents {
            let mut seen = vec![false; vocabulary.len()];
            for word in doc {
                let idx = vocabulary[word];
                if !seen[idx] {
                    seen[idx] = true;
                    document_frequency[idx] += 1;
                }
            }
        }
        let idf: Vec<f64> = document_frequency
            .iter()
            .map(|&df| (doc_count / (1.0 + df as f64)).ln() + 1.0)
            .collect();

        let mut model = Self {
            vocabulary,
            idf,
            weights: Vec::new(),
            bias: 0.0,
            corpus_vectors: Vec::new(),
        };

        model.corpus_vectors = corpus
            .iter()
            .map(|(text, label)| (model.vectorize(text), *label))
            .collect();

        model.fit();
        model
    }

    fn vectorize(&self, text: &str) -> Vec<f64> {
        let words = tokenize(text);
        let mut vector = vec![0.0; self.vocabulary.len()];
        if words.is_empty() {
            return vector;
        }
        for word in &words {
            if let Some(&idx) = self.vocabulary.get(word) {
                vector[idx] += 1.0;
            }
        }
        let len = words.len() as f64;
        for (idx, value) in vector.iter_mut().enumerate() {
            *value = (*value / len) * self.idf[idx];
        }
        vector
    }

    fn fit(&mut self) {
        let dims = self.vocabulary.len();
        self.weights = vec![0.0; dims];
        self.bias = 0.0;
        let samples = self.corpus_vectors.len() as f64;

        for _ in 0..EPOCHS {
            let mut weight_grad = vec![0.0; dims];
            let mut bias_grad = 0.0;
            for (vector, label) in &self.corpus_vectors {
                let predicted = self.activate(vector);
                let error = predicted - if *label { 1.0 } else { 0.0 };
                for (g, v) in weight_grad.iter_mut().zip(vector.iter()) {
                    *g += error * v;
                }
                bias_grad += error;
            }
            for (w, g) in self.weights.iter_mut().zip(weight_grad.iter()) {
                *w -= LEARNING_RATE * g / samples;
            }
            self.bias -= LEARNING_RATE * bias_grad / samples;
        }
    }

    fn activate(&self, vector: &[f64]) -> f64 {
        let z: f64 = self
            .weights
            .iter()
            .zip(vector.iter())
            .map(|(w, v)| w * v)
            .sum::<f64>()
            + self.bias;
        1.0 / (1.0 + (-z).exp())
    }

    /// Probability in [0,1] that the text describes a complex task.
    pub fn predict_proba(&self, text: &str) -> f64 {
        let vector = self.vectorize(text);
        let p = self.activate(&vector);
        debug!(probability = p, "classifier prediction");
        p
    }

    /// Label-weighted similarity to the three nearest seed examples.
    pub fn similarity_score(&self, text: &str) -> f64 {
        let vector = self.vectorize(text);
        let mut scored: Vec<(f64, bool)> = self
            .corpus_vectors
            .iter()
            .map(|(v, label)| (cosine(&vector, v), *label))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        let top = &scored[..scored.len().min(3)];
        let total: f64 = top.iter().map(|(sim, _)| sim).sum();
        if total == 0.0 {
            return 0.0;
        }
        top.iter()
            .map(|(sim, label)| if *label { sim / total } else { 0.0 })
            .sum()
    }
}

fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separates_seed_labels() {
        let model = ComplexityClassifier::new();
        let simple = model.predict_proba("What is the capital of France?");
        let complex = model.predict_proba(
            "Design a distributed caching layer with consistent hashing, then implement \
             failover handling and write a migration plan",
        );
        assert!(simple < 0.5, "simple scored {simple}");
        assert!(complex > 0.5, "complex scored {complex}");
    }

    #[test]
    fn unseen_vocabulary_is_neutral() {
        let model = ComplexityClassifier::new();
        let p = model.predict_proba("zzz qqq xxx");
        // All-zero feature vector reduces to the bias term.
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn training_is_deterministic() {
        let a = ComplexityClassifier::new();
        let b = ComplexityClassifier::new();
        let text = "Analyze the data and build a model";
        assert_eq!(a.predict_proba(text), b.predict_proba(text));
    }

    #[test]
    fn similarity_leans_toward_matching_label() {
        let model = ComplexityClassifier::new();
        let near_complex =
            model.similarity_score("Analyze the sales data and build a forecasting model");
        let near_simple = model.similarity_score("What is the capital of Spain?");
        assert!(near_complex > near_simple);
    }
}
