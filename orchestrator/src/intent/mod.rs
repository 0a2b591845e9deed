//! Intent model: the closed intent set, per-intent schemas and parameter
//! validation.

pub mod classifier;
pub mod extract;
pub mod model;

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    AudioControl,
    SystemControl,
    SmartHome,
    Communication,
    Navigation,
    Information,
    FileOperation,
    HardwareControl,
    FollowUp,
    QuestionAnswer,
    Unknown,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::AudioControl => "audio_control",
            IntentKind::SystemControl => "system_control",
            IntentKind::SmartHome => "smart_home",
            IntentKind::Communication => "communication",
            IntentKind::Navigation => "navigation",
            IntentKind::Information => "information",
            IntentKind::FileOperation => "file_operation",
            IntentKind::HardwareControl => "hardware_control",
            IntentKind::FollowUp => "follow_up",
            IntentKind::QuestionAnswer => "question_answer",
            IntentKind::Unknown => "unknown",
        }
    }

    pub fn parse(raw: &str) -> Option<IntentKind> {
        serde_json::from_value(Value::String(raw.to_string())).ok()
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    String,
    Integer,
    Float,
    Boolean,
    FilePath,
    Url,
}

impl ParameterType {
    /// JSON-schema type this parameter validates as.
    pub fn json_type(&self) -> &'static str {
        match self {
            ParameterType::Integer => "integer",
            ParameterType::Float => "number",
            ParameterType::Boolean => "boolean",
            _ => "string",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParameterSchema {
    pub name: &'static str,
    pub kind: ParameterType,
    pub required: bool,
    pub choices: &'static [&'static str],
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub default: Option<Value>,
    pub description: &'static str,
}

impl ParameterSchema {
    fn new(name: &'static str, kind: ParameterType, required: bool, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required,
            choices: &[],
            min: None,
            max: None,
            default: None,
            description,
        }
    }

    fn choices(mut self, choices: &'static [&'static str]) -> Self {
        self.choices = choices;
        self
    }

    fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

#[derive(Debug, Clone)]
pub struct IntentSchema {
    pub intent: IntentKind,
    pub keywords: &'static [&'static str],
    pub parameters: Vec<ParameterSchema>,
    pub service: &'static str,
    pub tool: &'static str,
    pub description: &'static str,
    pub examples: &'static [&'static str],
}

impl IntentSchema {
    /// JSON-schema object used to validate extracted parameters.
    pub fn params_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(param.kind.json_type()));
            prop.insert("description".into(), json!(param.description));
            if !param.choices.is_empty() {
                prop.insert("enum".into(), json!(param.choices));
            }
            if let Some(min) = param.min {
                prop.insert("minimum".into(), json!(min));
            }
            if let Some(max) = param.max {
                prop.insert("maximum".into(), json!(max));
            }
            if let Some(default) = &param.default {
                prop.insert("default".into(), default.clone());
            }
            properties.insert(param.name.to_string(), Value::Object(prop));
            if param.required {
                required.push(param.name);
            }
        }
        json!({"type": "object", "properties": properties, "required": required})
    }

    /// Coerce and check extracted parameters, returning the typed map and
    /// any violations.
    pub fn validate(&self, params: &Map<String, Value>) -> (Map<String, Value>, Vec<String>) {
        servis_rpc::schema::validate_params(&Value::Object(params.clone()), &self.params_schema())
    }
}

static SCHEMAS: LazyLock<HashMap<IntentKind, IntentSchema>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    map.insert(
        IntentKind::AudioControl,
        IntentSchema {
            intent: IntentKind::AudioControl,
            keywords: &[
                "play", "music", "song", "track", "album", "artist", "band", "volume", "loud",
                "quiet", "mute", "unmute", "louder", "quieter", "pause", "stop", "resume", "next",
                "previous", "skip", "headphones", "speakers", "bluetooth", "audio", "sound",
            ],
            parameters: vec![
                ParameterSchema::new("action", ParameterType::String, true, "Audio control action")
                    .choices(&["play", "pause", "stop", "volume", "skip", "switch"]),
                ParameterSchema::new(
                    "target",
                    ParameterType::String,
                    false,
                    "Target (song, artist, device, etc.)",
                ),
                ParameterSchema::new("level", ParameterType::Integer, false, "Volume level (0-100)")
                    .range(0.0, 100.0),
                ParameterSchema::new("device", ParameterType::String, false, "Audio output device")
                    .choices(&["headphones", "speakers", "bluetooth"]),
            ],
            service: "ai-audio-assistant",
            tool: "control_audio",
            description: "Audio and music control commands",
            examples: &[
                "play music",
                "turn up the volume",
                "pause the song",
                "switch to headphones",
                "play jazz music",
            ],
        },
    );

    map.insert(
        IntentKind::SystemControl,
        IntentSchema {
            intent: IntentKind::SystemControl,
            keywords: &[
                "open", "close", "launch", "run", "execute", "start", "stop", "application",
                "app", "program", "software", "process", "task", "shutdown", "restart", "reboot",
                "sleep", "hibernate", "file", "folder", "directory", "document",
            ],
            parameters: vec![
                ParameterSchema::new("action", ParameterType::String, true, "System control action")
                    .choices(&["open", "close", "launch", "run", "start", "stop", "kill"]),
                ParameterSchema::new(
                    "target",
                    ParameterType::String,
                    true,
                    "Target application or process",
                ),
                ParameterSchema::new("path", ParameterType::FilePath, false, "File or directory path"),
            ],
            service: "ai-platform-linux",
            tool: "execute_command",
            description: "System and application control",
            examples: &[
                "open browser",
                "launch calculator",
                "close all windows",
                "run python script",
            ],
        },
    );

    map.insert(
        IntentKind::SmartHome,
        IntentSchema {
            intent: IntentKind::SmartHome,
            keywords: &[
                "lights", "light", "lamp", "bulb", "brightness", "dim", "temperature",
                "thermostat", "heating", "cooling", "ac", "lock", "unlock", "door", "window",
                "security", "alarm", "camera", "sensor", "motion", "detection",
            ],
            parameters: vec![
                ParameterSchema::new(
                    "device_type",
                    ParameterType::String,
                    true,
                    "Type of smart home device",
                )
                .choices(&["lights", "temperature", "security", "camera"]),
                ParameterSchema::new("action", ParameterType::String, true, "Action to perform")
                    .choices(&["on", "off", "dim", "brighten", "lock", "unlock", "set"]),
                ParameterSchema::new("location", ParameterType::String, false, "Room or location"),
                ParameterSchema::new(
                    "value",
                    ParameterType::Integer,
                    false,
                    "Value for dimming or temperature",
                ),
            ],
            service: "ai-home-automation",
            tool: "control_device",
            description: "Smart home device control",
            examples: &[
                "turn on the lights",
                "dim the bedroom lights",
                "set temperature to 72",
                "lock the front door",
            ],
        },
    );

    map.insert(
        IntentKind::Communication,
        IntentSchema {
            intent: IntentKind::Communication,
            keywords: &[
                "send", "message", "text", "sms", "email", "call", "phone", "whatsapp",
                "telegram", "slack", "discord", "notify", "contact", "person", "friend", "family",
            ],
            parameters: vec![
                ParameterSchema::new("action", ParameterType::String, true, "Communication action")
                    .choices(&["send", "call", "message", "notify"]),
                ParameterSchema::new(
                    "recipient",
                    ParameterType::String,
                    true,
                    "Recipient name or contact",
                ),
                ParameterSchema::new("message", ParameterType::String, false, "Message content"),
                ParameterSchema::new("platform", ParameterType::String, false, "Communication platform")
                    .choices(&["sms", "email", "whatsapp", "telegram"]),
            ],
            service: "ai-communications",
            tool: "send_message",
            description: "Communication and messaging",
            examples: &[
                "send message to John",
                "call mom",
                "text my friend",
                "send email to boss",
            ],
        },
    );

    map.insert(
        IntentKind::Navigation,
        IntentSchema {
            intent: IntentKind::Navigation,
            keywords: &[
                "directions", "navigate", "route", "map", "location", "address", "drive", "walk",
                "travel", "destination", "gps", "traffic", "distance", "time", "eta", "waypoint",
            ],
            parameters: vec![
                ParameterSchema::new(
                    "destination",
                    ParameterType::String,
                    true,
                    "Destination address or location",
                ),
                ParameterSchema::new("origin", ParameterType::String, false, "Starting location"),
                ParameterSchema::new("mode", ParameterType::String, false, "Travel mode")
                    .choices(&["driving", "walking", "transit", "cycling"]),
            ],
            service: "ai-maps-navigation",
            tool: "get_directions",
            description: "Navigation and directions",
            examples: &[
                "directions to the mall",
                "how to get to work",
                "navigate to 123 Main St",
                "walking directions to park",
            ],
        },
    );

    map.insert(
        IntentKind::Information,
        IntentSchema {
            intent: IntentKind::Information,
            keywords: &[
                "what", "how", "why", "when", "where", "who", "tell", "explain", "define",
                "describe", "show", "help", "information", "question", "weather", "time", "date",
                "news", "search", "find",
            ],
            parameters: vec![
                ParameterSchema::new("query", ParameterType::String, true, "Information query"),
                ParameterSchema::new("type", ParameterType::String, false, "Type of information")
                    .choices(&["weather", "time", "news", "general"])
                    .default_value(json!("general")),
            ],
            service: "ai-information",
            tool: "get_information",
            description: "Information and question answering",
            examples: &[
                "what's the weather",
                "what time is it",
                "tell me about Rust",
                "how do I cook pasta",
            ],
        },
    );

    map.insert(
        IntentKind::FileOperation,
        IntentSchema {
            intent: IntentKind::FileOperation,
            keywords: &[
                "download", "upload", "copy", "move", "delete", "create", "save", "file",
                "document", "folder", "directory", "path", "url", "backup", "sync", "share",
                "export", "import",
            ],
            parameters: vec![
                ParameterSchema::new("action", ParameterType::String, true, "File operation action")
                    .choices(&["download", "upload", "copy", "move", "delete", "create"]),
                ParameterSchema::new("source", ParameterType::String, false, "Source file or URL"),
                ParameterSchema::new("destination", ParameterType::String, false, "Destination path"),
            ],
            service: "file-manager",
            tool: "file_operation",
            description: "File and document operations",
            examples: &[
                "download file from URL",
                "copy file to desktop",
                "delete old documents",
                "create new folder",
            ],
        },
    );

    map.insert(
        IntentKind::HardwareControl,
        IntentSchema {
            intent: IntentKind::HardwareControl,
            keywords: &[
                "gpio", "pin", "sensor", "led", "relay", "pwm", "analog", "digital", "hardware",
                "device", "component", "circuit", "board", "arduino", "raspberry", "pi",
                "microcontroller",
            ],
            parameters: vec![
                ParameterSchema::new("pin", ParameterType::Integer, true, "GPIO pin number")
                    .range(0.0, 40.0),
                ParameterSchema::new("action", ParameterType::String, true, "Hardware action")
                    .choices(&["on", "off", "toggle", "read", "write", "pwm"]),
                ParameterSchema::new(
                    "value",
                    ParameterType::Integer,
                    false,
                    "Value for PWM or analog write",
                )
                .range(0.0, 255.0),
            ],
            service: "hardware-bridge",
            tool: "control_hardware",
            description: "Hardware and GPIO control",
            examples: &[
                "turn on LED on pin 13",
                "read sensor on pin 2",
                "set PWM on pin 9 to 128",
                "toggle relay on pin 5",
            ],
        },
    );

    map
});

/// Schemas for every actionable intent.
pub fn intent_schemas() -> &'static HashMap<IntentKind, IntentSchema> {
    &SCHEMAS
}

pub fn schema_for(intent: IntentKind) -> Option<&'static IntentSchema> {
    SCHEMAS.get(&intent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_actionable_intent_has_a_schema() {
        for intent in [
            IntentKind::AudioControl,
            IntentKind::SystemControl,
            IntentKind::SmartHome,
            IntentKind::Communication,
            IntentKind::Navigation,
            IntentKind::Information,
            IntentKind::FileOperation,
            IntentKind::HardwareControl,
        ] {
            let schema = schema_for(intent).expect("schema exists");
            assert!(!schema.keywords.is_empty());
            assert!(!schema.service.is_empty());
            assert!(!schema.tool.is_empty());
        }
        assert!(schema_for(IntentKind::FollowUp).is_none());
        assert!(schema_for(IntentKind::Unknown).is_none());
    }

    #[test]
    fn validation_applies_ranges_choices_and_defaults() {
        let schema = schema_for(IntentKind::AudioControl).unwrap();
        let mut params = Map::new();
        params.insert("action".into(), json!("play"));
        params.insert("level".into(), json!("70"));
        let (validated, errors) = schema.validate(&params);
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(validated.get("level"), Some(&json!(70)));

        let mut params = Map::new();
        params.insert("action".into(), json!("rewind"));
        params.insert("level".into(), json!(500));
        let (_, errors) = schema.validate(&params);
        assert_eq!(errors.len(), 2);

        let schema = schema_for(IntentKind::Information).unwrap();
        let mut params = Map::new();
        params.insert("query".into(), json!("what's the weather"));
        let (validated, errors) = schema.validate(&params);
        assert!(errors.is_empty());
        assert_eq!(validated.get("type"), Some(&json!("general")));
    }

    #[test]
    fn missing_required_parameter_is_reported() {
        let schema = schema_for(IntentKind::Communication).unwrap();
        let mut params = Map::new();
        params.insert("action".into(), json!("send"));
        let (_, errors) = schema.validate(&params);
        assert!(errors.iter().any(|e| e.contains("recipient")));
    }

    #[test]
    fn intent_names_round_trip() {
        assert_eq!(IntentKind::parse("audio_control"), Some(IntentKind::AudioControl));
        assert_eq!(IntentKind::parse("follow_up"), Some(IntentKind::FollowUp));
        assert_eq!(IntentKind::parse("nonsense"), None);
        assert_eq!(IntentKind::SmartHome.as_str(), "smart_home");
    }
}
