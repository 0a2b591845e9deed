//! Deterministic, intent-specific parameter extraction.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Map, Value};

use super::IntentKind;

static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("number regex"));
static BY_TARGET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"by\s+([^,\n]+)").expect("by regex"));
static TO_TARGET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"to\s+([^,\n]+)").expect("to regex"));
static URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://[^\s]+").expect("url regex"));
static PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[/\\][\w\s/\\.-]+").expect("path regex"));
static PIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"pin\s*(\d+)|gpio\s*(\d+)").expect("pin regex"));
static HW_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"to\s+(\d+)|value\s+(\d+)|(\d+)%").expect("value regex"));

const LOCATIONS: [&str; 6] = ["bedroom", "kitchen", "living room", "bathroom", "office", "garage"];
const DEVICES: [&str; 3] = ["headphones", "speakers", "bluetooth"];

/// Extract parameters for an intent from preprocessed (lowercased) text.
pub fn extract_parameters(intent: IntentKind, text: &str) -> Map<String, Value> {
    match intent {
        IntentKind::AudioControl => audio(text),
        IntentKind::SystemControl => system(text),
        IntentKind::SmartHome => smart_home(text),
        IntentKind::Communication => communication(text),
        IntentKind::Navigation => navigation(text),
        IntentKind::Information | IntentKind::QuestionAnswer => information(text),
        IntentKind::FileOperation => file_operation(text),
        IntentKind::HardwareControl => hardware(text),
        IntentKind::FollowUp | IntentKind::Unknown => Map::new(),
    }
}

fn first_match<'a>(text: &'a str, candidates: &[&'a str]) -> Option<&'a str> {
    candidates.iter().find(|word| text.contains(*word)).copied()
}

fn audio(text: &str) -> Map<String, Value> {
    let mut params = Map::new();
    let actions: [(&str, &[&str]); 6] = [
        ("play", &["play", "start", "begin"]),
        ("pause", &["pause", "hold"]),
        ("stop", &["stop", "end", "quit"]),
        ("volume", &["volume", "loud", "quiet", "mute", "unmute"]),
        ("skip", &["skip", "next", "previous"]),
        ("switch", &["switch", "change", "output"]),
    ];
    for (action, words) in actions {
        if words.iter().any(|word| text.contains(word)) {
            params.insert("action".into(), json!(action));
            break;
        }
    }

    if let Some(m) = NUMBER.find(text) {
        if let Ok(level) = m.as_str().parse::<i64>() {
            if (0..=100).contains(&level) {
                params.insert("level".into(), json!(level));
            }
        }
    }

    if let Some(device) = first_match(text, &DEVICES) {
        params.insert("device".into(), json!(device));
    }

    if let Some(caps) = BY_TARGET.captures(text) {
        params.insert("target".into(), json!(caps[1].trim()));
    } else {
        // Free-form target: whatever follows the action word.
        for word in ["play", "start"] {
            if let Some(rest) = text.strip_prefix(word) {
                let rest = rest.trim();
                if !rest.is_empty() {
                    params.insert("target".into(), json!(rest));
                }
                break;
            }
        }
    }

    params
}

fn system(text: &str) -> Map<String, Value> {
    let mut params = Map::new();
    let actions = ["open", "close", "launch", "run", "start", "stop", "kill"];
    if let Some(action) = first_match(text, &actions) {
        params.insert("action".into(), json!(action));
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    for (i, word) in words.iter().enumerate() {
        if actions.contains(word) && i + 1 < words.len() {
            params.insert("target".into(), json!(words[i + 1..].join(" ")));
            break;
        }
    }

    if let Some(m) = PATH.find(text) {
        params.insert("path".into(), json!(m.as_str().trim()));
    }

    params
}

fn smart_home(text: &str) -> Map<String, Value> {
    let mut params = Map::new();
    if text.contains("light") {
        params.insert("device_type".into(), json!("lights"));
    } else if text.contains("temperature") || text.contains("thermostat") {
        params.insert("device_type".into(), json!("temperature"));
    } else if text.contains("lock") || text.contains("door") {
        params.insert("device_type".into(), json!("security"));
    } else if text.contains("camera") {
        params.insert("device_type".into(), json!("camera"));
    }

    // "unlock" contains "lock"; check the longer word first.
    let actions = ["unlock", "brighten", "dim", "lock", "set", "on", "off"];
    for action in actions {
        let hit = match action {
            "on" | "off" => text.split_whitespace().any(|w| w == action),
            _ => text.contains(action),
        };
        if hit {
            params.insert("action".into(), json!(action));
            break;
        }
    }

    if let Some(location) = first_match(text, &LOCATIONS) {
        params.insert("location".into(), json!(location));
    }

    if let Some(m) = NUMBER.find(text) {
        if let Ok(value) = m.as_str().parse::<i64>() {
            params.insert("value".into(), json!(value));
        }
    }

    params
}

fn communication(text: &str) -> Map<String, Value> {
    let mut params = Map::new();
    if let Some(action) = first_match(text, &["send", "call", "message", "notify"]) {
        params.insert("action".into(), json!(action));
    }
    if let Some(platform) = first_match(text, &["sms", "email", "whatsapp", "telegram"]) {
        params.insert("platform".into(), json!(platform));
    }
    if let Some(caps) = TO_TARGET.captures(text) {
        params.insert("recipient".into(), json!(caps[1].trim()));
    }
    params
}

fn navigation(text: &str) -> Map<String, Value> {
    let mut params = Map::new();
    if let Some(caps) = TO_TARGET.captures(text) {
        params.insert("destination".into(), json!(caps[1].trim()));
    }
    if let Some(mode) = first_match(text, &["driving", "walking", "transit", "cycling"]) {
        params.insert("mode".into(), json!(mode));
    }
    params
}

fn information(text: &str) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("query".into(), json!(text));
    let kind = if text.contains("weather") {
        "weather"
    } else if text.contains("time") {
        "time"
    } else if text.contains("news") {
        "news"
    } else {
        "general"
    };
    params.insert("type".into(), json!(kind));
    params
}

fn file_operation(text: &str) -> Map<String, Value> {
    let mut params = Map::new();
    if let Some(action) =
        first_match(text, &["download", "upload", "copy", "move", "delete", "create"])
    {
        params.insert("action".into(), json!(action));
    }
    if let Some(m) = URL.find(text) {
        params.insert("source".into(), json!(m.as_str()));
    }
    if let Some(m) = PATH.find(text) {
        params.insert("destination".into(), json!(m.as_str().trim()));
    }
    params
}

fn hardware(text: &str) -> Map<String, Value> {
    let mut params = Map::new();
    if let Some(caps) = PIN.captures(text) {
        let pin = caps.get(1).or_else(|| caps.get(2));
        if let Some(pin) = pin.and_then(|m| m.as_str().parse::<i64>().ok()) {
            params.insert("pin".into(), json!(pin));
        }
    }

    let actions = ["toggle", "read", "write", "pwm", "on", "off"];
    for action in actions {
        let hit = match action {
            "on" | "off" => text.split_whitespace().any(|w| w == action),
            _ => text.contains(action),
        };
        if hit {
            params.insert("action".into(), json!(action));
            break;
        }
    }

    if let Some(caps) = HW_VALUE.captures(text) {
        let value = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3));
        if let Some(value) = value.and_then(|m| m.as_str().parse::<i64>().ok()) {
            params.insert("value".into(), json!(value));
        }
    }

    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_extraction_catches_action_level_device_and_target() {
        let params = extract_parameters(IntentKind::AudioControl, "play jazz music by miles davis");
        assert_eq!(params.get("action"), Some(&json!("play")));
        assert_eq!(params.get("target"), Some(&json!("miles davis")));

        let params = extract_parameters(IntentKind::AudioControl, "set volume to 70 on speakers");
        assert_eq!(params.get("action"), Some(&json!("volume")));
        assert_eq!(params.get("level"), Some(&json!(70)));
        assert_eq!(params.get("device"), Some(&json!("speakers")));
    }

    #[test]
    fn free_form_audio_target_follows_the_action() {
        let params = extract_parameters(IntentKind::AudioControl, "play jazz music");
        let target = params.get("target").and_then(Value::as_str).unwrap();
        assert!(target.contains("jazz") || target.contains("music"));
    }

    #[test]
    fn system_target_is_the_tail_after_the_verb() {
        let params = extract_parameters(IntentKind::SystemControl, "open the web browser");
        assert_eq!(params.get("action"), Some(&json!("open")));
        assert_eq!(params.get("target"), Some(&json!("the web browser")));
    }

    #[test]
    fn smart_home_unlock_beats_lock() {
        let params = extract_parameters(IntentKind::SmartHome, "unlock the front door");
        assert_eq!(params.get("device_type"), Some(&json!("security")));
        assert_eq!(params.get("action"), Some(&json!("unlock")));

        let params = extract_parameters(IntentKind::SmartHome, "dim the bedroom lights to 30");
        assert_eq!(params.get("device_type"), Some(&json!("lights")));
        assert_eq!(params.get("action"), Some(&json!("dim")));
        assert_eq!(params.get("location"), Some(&json!("bedroom")));
        assert_eq!(params.get("value"), Some(&json!(30)));
    }

    #[test]
    fn communication_recipient_comes_from_to() {
        let params = extract_parameters(IntentKind::Communication, "send a whatsapp to john smith");
        assert_eq!(params.get("action"), Some(&json!("send")));
        assert_eq!(params.get("platform"), Some(&json!("whatsapp")));
        assert_eq!(params.get("recipient"), Some(&json!("john smith")));
    }

    #[test]
    fn file_operation_finds_urls_and_paths() {
        let params = extract_parameters(
            IntentKind::FileOperation,
            "download https://example.com/a.tar.gz to /tmp/downloads",
        );
        assert_eq!(params.get("action"), Some(&json!("download")));
        assert_eq!(params.get("source"), Some(&json!("https://example.com/a.tar.gz")));
        assert!(params
            .get("destination")
            .and_then(Value::as_str)
            .unwrap()
            .starts_with("/tmp"));
    }

    #[test]
    fn hardware_pin_action_and_value() {
        let params = extract_parameters(IntentKind::HardwareControl, "set pwm on pin 9 to 128");
        assert_eq!(params.get("pin"), Some(&json!(9)));
        assert_eq!(params.get("action"), Some(&json!("pwm")));
        assert_eq!(params.get("value"), Some(&json!(128)));

        let params = extract_parameters(IntentKind::HardwareControl, "turn on led on gpio 13");
        assert_eq!(params.get("pin"), Some(&json!(13)));
        assert_eq!(params.get("action"), Some(&json!("on")));
    }

    #[test]
    fn follow_up_extracts_nothing() {
        assert!(extract_parameters(IntentKind::FollowUp, "louder please").is_empty());
    }
}
