//! Built-in default configuration
//!
//! Loaded documents are merged onto these values, and validation repairs
//! missing or mistyped entries from them.

use serde_json::json;

use crate::document::ConfigDocument;

/// Sections that must always be objects
pub const REQUIRED_SECTIONS: &[&str] = &["audio", "speech", "ai", "input", "hotkeys", "ui", "logging"];

/// AI providers understood by the AI client collaborator
pub const KNOWN_AI_PROVIDERS: &[&str] = &["openai", "anthropic", "ollama", "azure", "none"];

/// Text insertion backends
pub const KNOWN_INPUT_METHODS: &[&str] = &["clipboard", "keystroke"];

/// Sample rates the audio backend handles natively
pub const COMMON_SAMPLE_RATES: &[u64] = &[8000, 16000, 22050, 44100, 48000];

pub const KNOWN_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// The built-in default document
pub fn default_document() -> ConfigDocument {
    let value = json!({
        "audio": {
            "device_id": null,
            "sample_rate": 16000,
            "channels": 1,
            "chunk_size": 1024,
            "vad_enabled": true,
            "silence_threshold": 0.01
        },
        "speech": {
            "engine": "whisper",
            "model": "base",
            "language": "auto",
            "use_gpu": false,
            "beam_size": 5
        },
        "ai": {
            "enabled": false,
            "provider": "openai",
            "model": "gpt-4o-mini",
            "api_key": "",
            "temperature": 0.3,
            "timeout_secs": 30
        },
        "input": {
            "method": "clipboard",
            "typing_delay_ms": 5,
            "restore_clipboard": true
        },
        "hotkeys": {
            "record": "ctrl+shift+space",
            "cancel": "escape"
        },
        "ui": {
            "theme": "system",
            "language": "en",
            "show_overlay": true
        },
        "logging": {
            "level": "info"
        }
    });

    ConfigDocument::from_value(value).unwrap_or_default()
}
