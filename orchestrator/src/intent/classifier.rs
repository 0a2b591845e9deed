//! Ensemble intent classifier: keyword, trained and pattern signals
//! combined by weighted sum (0.4 / 0.4 / 0.2).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{LazyLock, RwLock};

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::extract::extract_parameters;
use super::model::{ModelError, NaiveBayesModel};
use super::{intent_schemas, IntentKind};

const KEYWORD_WEIGHT: f64 = 0.4;
const TRAINED_WEIGHT: f64 = 0.4;
const PATTERN_WEIGHT: f64 = 0.2;

/// Confidence floor below which callers must surface alternatives.
pub const CONFIDENCE_FLOOR: f64 = 0.3;

static PATTERNS: LazyLock<Vec<(IntentKind, Vec<Regex>)>> = LazyLock::new(|| {
    let compile = |patterns: &[&str]| -> Vec<Regex> {
        patterns
            .iter()
            .map(|p| Regex::new(p).expect("intent pattern"))
            .collect()
    };
    vec![
        (
            IntentKind::AudioControl,
            compile(&[
                r"\b(play|pause|stop|volume|mute|unmute)\b",
                r"\b(music|song|track|audio|sound)\b",
                r"\b(headphones|speakers|bluetooth)\b",
            ]),
        ),
        (
            IntentKind::SystemControl,
            compile(&[
                r"\b(open|close|launch|run|start|stop|kill)\b",
                r"\b(application|app|program|software)\b",
                r"\b(shutdown|restart|reboot)\b",
            ]),
        ),
        (
            IntentKind::SmartHome,
            compile(&[
                r"\b(lights?|lamp|bulb|brightness|dim)\b",
                r"\b(temperature|thermostat|heating|cooling)\b",
                r"\b(lock|unlock|door|window|security)\b",
            ]),
        ),
        (
            IntentKind::Communication,
            compile(&[
                r"\b(send|message|text|call|phone|email)\b",
                r"\b(whatsapp|telegram|slack|discord)\b",
                r"\b(contact|person|friend|family)\b",
            ]),
        ),
        (
            IntentKind::Navigation,
            compile(&[
                r"\b(directions?|navigate|route|map|location)\b",
                r"\b(drive|walk|travel|destination|gps)\b",
                r"\b(distance|time|eta|waypoint)\b",
            ]),
        ),
        (
            IntentKind::Information,
            compile(&[
                r"\b(what|how|why|when|where|who|tell|explain)\b",
                r"\b(weather|time|date|news|search|find)\b",
                r"\b(help|information|question)\b",
            ]),
        ),
        (
            IntentKind::FileOperation,
            compile(&[
                r"\b(download|upload|copy|move|delete|create|save)\b",
                r"\b(file|document|folder|directory|path|url)\b",
                r"\b(backup|sync|share|export|import)\b",
            ]),
        ),
        (
            IntentKind::HardwareControl,
            compile(&[
                r"\b(gpio|pin|sensor|led|relay|pwm|analog|digital)\b",
                r"\b(hardware|device|component|circuit|board)\b",
                r"\b(arduino|raspberry|pi|microcontroller)\b",
            ]),
        ),
    ]
});

static FOLLOW_UP_MARKERS: [&str; 6] = ["again", "more", "less", "another", "also", "same"];

#[derive(Debug, Clone)]
pub struct ClassifierOutput {
    pub intent: IntentKind,
    pub confidence: f64,
    pub alternatives: Vec<(IntentKind, f64)>,
    pub parameters: Map<String, Value>,
}

pub struct IntentClassifier {
    model: RwLock<Option<NaiveBayesModel>>,
    model_path: Option<PathBuf>,
}

impl IntentClassifier {
    /// Build a classifier, resuming the trained model from `model_path`
    /// when one was persisted earlier.
    pub fn new(model_path: Option<PathBuf>) -> Self {
        let model = model_path
            .as_ref()
            .filter(|path| path.exists())
            .and_then(|path| match NaiveBayesModel::load(path) {
                Ok(model) => Some(model),
                Err(err) => {
                    warn!(%err, "persisted classifier model unusable, starting untrained");
                    None
                }
            });
        Self {
            model: RwLock::new(model),
            model_path,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.model.read().expect("model lock").is_some()
    }

    fn preprocess(text: &str) -> String {
        let lowered = text.to_lowercase();
        lowered.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Classify an utterance and extract its parameters.
    pub fn classify(&self, text: &str) -> ClassifierOutput {
        let processed = Self::preprocess(text);
        if processed.is_empty() {
            return ClassifierOutput {
                intent: IntentKind::Unknown,
                confidence: 0.0,
                alternatives: Vec::new(),
                parameters: Map::new(),
            };
        }

        let keyword = self.keyword_signal(&processed);
        let pattern = self.pattern_signal(&processed);

        // Bare follow-up phrases carry no schema keywords or patterns;
        // recognise them before the trained signal nominates a class from
        // priors alone.
        if keyword.is_none() && pattern.is_none() && self.looks_like_follow_up(&processed) {
            return ClassifierOutput {
                intent: IntentKind::FollowUp,
                confidence: 0.5,
                alternatives: Vec::new(),
                parameters: Map::new(),
            };
        }

        let mut combined: HashMap<IntentKind, f64> = HashMap::new();
        if let Some((intent, score)) = keyword {
            *combined.entry(intent).or_insert(0.0) += score * KEYWORD_WEIGHT;
        }
        if let Some((intent, score)) = self.trained_signal(&processed) {
            *combined.entry(intent).or_insert(0.0) += score * TRAINED_WEIGHT;
        }
        if let Some((intent, score)) = pattern {
            *combined.entry(intent).or_insert(0.0) += score * PATTERN_WEIGHT;
        }

        let mut ranked: Vec<(IntentKind, f64)> = combined.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let (intent, confidence) = ranked.first().copied().unwrap_or((IntentKind::Unknown, 0.0));
        let alternatives: Vec<(IntentKind, f64)> = ranked.iter().skip(1).take(3).copied().collect();
        let parameters = extract_parameters(intent, &processed);
        debug!(%intent, confidence, "intent classified");

        ClassifierOutput {
            intent,
            confidence,
            alternatives,
            parameters,
        }
    }

    fn looks_like_follow_up(&self, text: &str) -> bool {
        FOLLOW_UP_MARKERS.iter().any(|marker| text.contains(marker))
    }

    /// Matched keyword fraction per intent.
    fn keyword_signal(&self, text: &str) -> Option<(IntentKind, f64)> {
        let mut best: Option<(IntentKind, f64)> = None;
        for (intent, schema) in intent_schemas() {
            let hits = schema
                .keywords
                .iter()
                .filter(|keyword| text.contains(*keyword))
                .count();
            if hits == 0 {
                continue;
            }
            let score = hits as f64 / schema.keywords.len() as f64;
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((*intent, score));
            }
        }
        best
    }

    /// Trained model prediction, absent while untrained.
    fn trained_signal(&self, text: &str) -> Option<(IntentKind, f64)> {
        let model = self.model.read().expect("model lock");
        let (label, confidence) = model.as_ref()?.predict(text)?;
        IntentKind::parse(&label).map(|intent| (intent, confidence))
    }

    /// Regex matches normalized by pattern count, clamped to 1.
    fn pattern_signal(&self, text: &str) -> Option<(IntentKind, f64)> {
        let mut best: Option<(IntentKind, f64)> = None;
        for (intent, patterns) in PATTERNS.iter() {
            let matches: usize = patterns.iter().map(|p| p.find_iter(text).count()).sum();
            if matches == 0 {
                continue;
            }
            let score = (matches as f64 / patterns.len() as f64).min(1.0);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((*intent, score));
            }
        }
        best
    }

    /// Train the model signal and persist it for the next start.
    pub fn train(&self, examples: &[(String, String)]) -> Result<usize, ModelError> {
        let model = NaiveBayesModel::train(examples)?;
        if let Some(path) = &self.model_path {
            model.save(path)?;
        }
        *self.model.write().expect("model lock") = Some(model);
        Ok(examples.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> IntentClassifier {
        IntentClassifier::new(None)
    }

    #[test]
    fn play_jazz_music_is_audio_control() {
        let out = classifier().classify("play jazz music");
        assert_eq!(out.intent, IntentKind::AudioControl);
        assert!(out.confidence > 0.0);
        assert_eq!(out.parameters.get("action"), Some(&serde_json::json!("play")));
        let target = out
            .parameters
            .get("target")
            .and_then(Value::as_str)
            .unwrap_or_default();
        assert!(target.contains("jazz") || target.contains("music"));
    }

    #[test]
    fn gibberish_is_unknown_with_no_confidence() {
        let out = classifier().classify("qwerty zxcvb");
        assert_eq!(out.intent, IntentKind::Unknown);
        assert_eq!(out.confidence, 0.0);
    }

    #[test]
    fn alternatives_are_ranked_and_bounded() {
        let out = classifier().classify("send a text message about the weather to john");
        assert!(out.alternatives.len() <= 3);
        for window in out.alternatives.windows(2) {
            assert!(window[0].1 >= window[1].1);
        }
    }

    #[test]
    fn training_raises_confidence_for_in_domain_text() {
        let clf = classifier();
        assert!(!clf.is_trained());
        let untrained = clf.classify("play some jazz");
        clf.train(
            &[
                ("play some jazz".to_string(), "audio_control".to_string()),
                ("pause the music".to_string(), "audio_control".to_string()),
                ("text john hello".to_string(), "communication".to_string()),
                ("email the report".to_string(), "communication".to_string()),
            ],
        )
        .unwrap();
        assert!(clf.is_trained());
        let trained = clf.classify("play some jazz");
        assert_eq!(trained.intent, IntentKind::AudioControl);
        assert!(trained.confidence >= untrained.confidence);
    }

    #[test]
    fn model_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intent.json");
        let clf = IntentClassifier::new(Some(path.clone()));
        clf.train(&[
            ("play some jazz".to_string(), "audio_control".to_string()),
            ("text john".to_string(), "communication".to_string()),
        ])
        .unwrap();

        let restored = IntentClassifier::new(Some(path));
        assert!(restored.is_trained());
    }

    #[test]
    fn bare_follow_up_is_recognised() {
        let out = classifier().classify("again please");
        assert_eq!(out.intent, IntentKind::FollowUp);
    }
}
