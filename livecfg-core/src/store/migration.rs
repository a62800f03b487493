//! Legacy key migration
//!
//! A fixed, ordered list of structural transforms. Each transform removes the
//! legacy shape it rewrites, so running the list twice is a no-op.

use serde_json::Value;
use tracing::{info, warn};

use super::defaults::{default_document, KNOWN_AI_PROVIDERS, KNOWN_INPUT_METHODS};
use crate::document::ConfigDocument;

struct Migration {
    name: &'static str,
    apply: fn(&mut ConfigDocument) -> bool,
}

const MIGRATIONS: &[Migration] = &[
    Migration { name: "whisper_section_to_speech", apply: whisper_section_to_speech },
    Migration { name: "audio_samplerate_rename", apply: audio_samplerate_rename },
    Migration { name: "general_section_to_ui", apply: general_section_to_ui },
    Migration { name: "hotkey_to_hotkeys_record", apply: hotkey_to_hotkeys_record },
    Migration { name: "input_method_remap", apply: input_method_remap },
    Migration { name: "speech_model_remap", apply: speech_model_remap },
    Migration { name: "ai_provider_default_fill", apply: ai_provider_default_fill },
    Migration { name: "input_method_default_fill", apply: input_method_default_fill },
];

/// Names of all migrations, in application order
pub fn migration_names() -> Vec<&'static str> {
    MIGRATIONS.iter().map(|m| m.name).collect()
}

/// Apply every migration in order
///
/// Returns the migrated document and the names of the transforms that
/// changed something.
pub fn migrate(mut doc: ConfigDocument) -> (ConfigDocument, Vec<&'static str>) {
    let mut applied = Vec::new();
    for migration in MIGRATIONS {
        if (migration.apply)(&mut doc) {
            info!(migration = migration.name, "Applied config migration");
            applied.push(migration.name);
        }
    }
    (doc, applied)
}

fn move_value(doc: &mut ConfigDocument, from: &str, to: &str) -> bool {
    let Some(value) = doc.remove(from) else {
        return false;
    };
    if let Err(e) = doc.set(to, value) {
        warn!(from, to, error = %e, "Dropping legacy value that cannot be moved");
    }
    true
}

fn whisper_section_to_speech(doc: &mut ConfigDocument) -> bool {
    let Some(legacy) = doc.remove("whisper") else {
        return false;
    };
    if let Value::Object(fields) = legacy {
        for (key, value) in fields {
            let target = format!("speech.{}", key);
            if let Err(e) = doc.set(&target, value) {
                warn!(key = %target, error = %e, "Dropping legacy whisper setting");
            }
        }
    }
    true
}

fn audio_samplerate_rename(doc: &mut ConfigDocument) -> bool {
    move_value(doc, "audio.samplerate", "audio.sample_rate")
}

fn general_section_to_ui(doc: &mut ConfigDocument) -> bool {
    if !doc.contains("general") {
        return false;
    }
    move_value(doc, "general.language", "ui.language");
    move_value(doc, "general.theme", "ui.theme");
    doc.remove("general");
    true
}

fn hotkey_to_hotkeys_record(doc: &mut ConfigDocument) -> bool {
    move_value(doc, "hotkey", "hotkeys.record")
}

fn remap_string(doc: &mut ConfigDocument, path: &str, table: &[(&str, &str)]) -> bool {
    let Some(current) = doc.get(path).and_then(Value::as_str) else {
        return false;
    };
    let Some((_, replacement)) = table.iter().find(|(legacy, _)| *legacy == current) else {
        return false;
    };
    doc.set(path, Value::String(replacement.to_string())).is_ok()
}

fn input_method_remap(doc: &mut ConfigDocument) -> bool {
    remap_string(
        doc,
        "input.method",
        &[("paste", "clipboard"), ("type", "keystroke"), ("sendkeys", "keystroke")],
    )
}

fn speech_model_remap(doc: &mut ConfigDocument) -> bool {
    remap_string(doc, "speech.model", &[("large", "large-v3")])
}

fn default_fill_unknown(doc: &mut ConfigDocument, path: &str, known: &[&str]) -> bool {
    let Some(current) = doc.get(path).and_then(Value::as_str) else {
        return false;
    };
    if known.contains(&current) {
        return false;
    }
    let Some(default) = default_document().get(path).cloned() else {
        return false;
    };
    warn!(key = path, value = current, "Replacing unknown legacy value with default");
    doc.set(path, default).is_ok()
}

fn ai_provider_default_fill(doc: &mut ConfigDocument) -> bool {
    default_fill_unknown(doc, "ai.provider", KNOWN_AI_PROVIDERS)
}

fn input_method_default_fill(doc: &mut ConfigDocument) -> bool {
    default_fill_unknown(doc, "input.method", KNOWN_INPUT_METHODS)
}
