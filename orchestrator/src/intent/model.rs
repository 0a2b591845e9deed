//! Trainable classification signal: TF-IDF features over unigrams and
//! bigrams feeding a multinomial Naive Bayes with add-one smoothing.
//!
//! The model persists as JSON so restarts resume from the trained state.
//! Without training data the signal is simply absent and the ensemble runs
//! on keywords and patterns alone.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("no training examples supplied")]
    Empty,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Unigram + bigram tokens for a lowercased utterance.
pub fn tokenize(text: &str) -> Vec<String> {
    let words: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();
    let mut tokens = words.clone();
    for pair in words.windows(2) {
        tokens.push(format!("{} {}", pair[0], pair[1]));
    }
    tokens
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NaiveBayesModel {
    /// Documents seen per token, for the IDF term.
    doc_freq: HashMap<String, f64>,
    total_docs: f64,
    /// Accumulated TF-IDF mass per token per class.
    class_token_weight: HashMap<String, HashMap<String, f64>>,
    /// Total TF-IDF mass per class.
    class_weight: HashMap<String, f64>,
    /// Training documents per class, for the prior.
    class_docs: HashMap<String, f64>,
    vocabulary: usize,
}

impl NaiveBayesModel {
    /// Fit a model from `(utterance, label)` pairs.
    pub fn train(examples: &[(String, String)]) -> Result<Self, ModelError> {
        if examples.is_empty() {
            return Err(ModelError::Empty);
        }

        let tokenized: Vec<(Vec<String>, &str)> = examples
            .iter()
            .map(|(text, label)| (tokenize(text), label.as_str()))
            .collect();

        let mut doc_freq: HashMap<String, f64> = HashMap::new();
        for (tokens, _) in &tokenized {
            let mut seen: Vec<&String> = tokens.iter().collect();
            seen.sort();
            seen.dedup();
            for token in seen {
                *doc_freq.entry(token.clone()).or_insert(0.0) += 1.0;
            }
        }
        let total_docs = tokenized.len() as f64;

        let idf = |df: f64| ((1.0 + total_docs) / (1.0 + df)).ln() + 1.0;

        let mut class_token_weight: HashMap<String, HashMap<String, f64>> = HashMap::new();
        let mut class_weight: HashMap<String, f64> = HashMap::new();
        let mut class_docs: HashMap<String, f64> = HashMap::new();

        for (tokens, label) in &tokenized {
            *class_docs.entry(label.to_string()).or_insert(0.0) += 1.0;
            let mut tf: HashMap<&String, f64> = HashMap::new();
            for token in tokens {
                *tf.entry(token).or_insert(0.0) += 1.0;
            }
            for (token, count) in tf {
                let weight = count * idf(doc_freq[token]);
                *class_token_weight
                    .entry(label.to_string())
                    .or_default()
                    .entry(token.clone())
                    .or_insert(0.0) += weight;
                *class_weight.entry(label.to_string()).or_insert(0.0) += weight;
            }
        }

        Ok(Self {
            vocabulary: doc_freq.len(),
            doc_freq,
            total_docs,
            class_token_weight,
            class_weight,
            class_docs,
        })
    }

    /// Most likely label with its posterior probability.
    pub fn predict(&self, text: &str) -> Option<(String, f64)> {
        let tokens = tokenize(text);
        if tokens.is_empty() || self.class_docs.is_empty() {
            return None;
        }

        let vocab = self.vocabulary.max(1) as f64;
        let mut log_scores: Vec<(&String, f64)> = Vec::new();
        for (label, docs) in &self.class_docs {
            let prior = (docs / self.total_docs).ln();
            let token_weights = self.class_token_weight.get(label);
            let class_mass = self.class_weight.get(label).copied().unwrap_or(0.0);
            let mut score = prior;
            for token in &tokens {
                let weight = token_weights
                    .and_then(|weights| weights.get(token))
                    .copied()
                    .unwrap_or(0.0);
                score += ((weight + 1.0) / (class_mass + vocab)).ln();
            }
            log_scores.push((label, score));
        }

        // Softmax over log scores for a usable confidence.
        let max = log_scores
            .iter()
            .map(|(_, s)| *s)
            .fold(f64::NEG_INFINITY, f64::max);
        let denom: f64 = log_scores.iter().map(|(_, s)| (s - max).exp()).sum();
        log_scores
            .into_iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(label, score)| (label.clone(), (score - max).exp() / denom))
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        info!(path = %path.display(), "classifier model saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let raw = std::fs::read(path)?;
        let model = serde_json::from_slice(&raw)?;
        info!(path = %path.display(), "classifier model loaded");
        Ok(model)
    }
}
