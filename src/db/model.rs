//! Input and change types accepted and returned by the settings repository.
//!
//! Keep these structs focused on what callers send and what a mutation
//! reports back. Validation lives next to them; SQL lives in `repo`.

use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::model::{CaptureSettings, Effect, EffectRef, Orientation, MAX_ENABLED_EFFECTS};

/// Partial settings update; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub orientation: Option<Orientation>,
    pub capture_interval: Option<u32>,
    pub countdown_duration: Option<u32>,
    pub photo_count: Option<u32>,
    pub capture_settings: Option<CaptureSettings>,
    /// Replaces the whole effect list when present.
    pub effects: Option<Vec<Effect>>,
}

/// New effect as submitted by the admin panel.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewEffect {
    pub id: Option<String>,
    pub name: String,
    pub prompt: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EffectUpdate {
    pub name: Option<String>,
    pub prompt: Option<String>,
    pub enabled: Option<bool>,
}

/// Outcome of a mutation that may have rotated another effect out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EffectChange {
    pub effect: Effect,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evicted: Option<String>,
}

fn check_range(field: &str, value: Option<u32>, min: u32, max: u32) -> Result<(), StoreError> {
    match value {
        Some(v) if v < min || v > max => Err(StoreError::Validation(format!(
            "{field} must be between {min} and {max}, got {v}"
        ))),
        _ => Ok(()),
    }
}

fn check_text(field: &str, value: &str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::Validation(format!("{field} must be non-empty")));
    }
    Ok(())
}

/// Effects sent with a request instead of read from the store.
pub fn validate_effect_refs(effects: &[EffectRef]) -> Result<(), StoreError> {
    for e in effects {
        check_text("effect.id", &e.id)?;
        check_text("effect.name", &e.name)?;
        check_text("effect.prompt", &e.prompt)?;
    }
    Ok(())
}

impl SettingsUpdate {
    pub fn validate(&self) -> Result<(), StoreError> {
        check_range("photoCount", self.photo_count, 1, 10)?;
        check_range("captureInterval", self.capture_interval, 1, 30)?;
        check_range("countdownDuration", self.countdown_duration, 1, 10)?;
        if let Some(cs) = &self.capture_settings {
            check_range("captureSettings.previewTime", Some(cs.preview_time), 1, 30)?;
            check_range("captureSettings.maxRetakes", Some(cs.max_retakes), 0, 10)?;
        }
        if let Some(effects) = &self.effects {
            let mut seen = std::collections::HashSet::new();
            for e in effects {
                check_text("effect.id", &e.id)?;
                check_text("effect.name", &e.name)?;
                check_text("effect.prompt", &e.prompt)?;
                if !seen.insert(e.id.as_str()) {
                    return Err(StoreError::Validation(format!(
                        "duplicate effect id '{}'",
                        e.id
                    )));
                }
            }
            let enabled = effects.iter().filter(|e| e.enabled).count();
            if enabled > MAX_ENABLED_EFFECTS {
                return Err(StoreError::Validation(format!(
                    "at most {MAX_ENABLED_EFFECTS} effects may be enabled, got {enabled}"
                )));
            }
        }
        Ok(())
    }
}

impl NewEffect {
    pub fn validate(&self) -> Result<(), StoreError> {
        check_text("name", &self.name)?;
        check_text("prompt", &self.prompt)?;
        if let Some(id) = &self.id {
            check_text("id", id)?;
        }
        Ok(())
    }
}

impl EffectUpdate {
    pub fn validate(&self) -> Result<(), StoreError> {
        if let Some(name) = &self.name {
            check_text("name", name)?;
        }
        if let Some(prompt) = &self.prompt {
            check_text("prompt", prompt)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn effect(id: &str, enabled: bool) -> Effect {
        Effect {
            id: id.into(),
            name: id.to_uppercase(),
            prompt: format!("{id} prompt"),
            enabled,
        }
    }

    #[test]
    fn rejects_out_of_range_values() {
        let update = SettingsUpdate {
            photo_count: Some(0),
            ..Default::default()
        };
        assert!(matches!(update.validate(), Err(StoreError::Validation(m)) if m.contains("photoCount")));

        let update = SettingsUpdate {
            capture_interval: Some(31),
            ..Default::default()
        };
        assert!(update.validate().is_err());

        let update = SettingsUpdate {
            capture_settings: Some(CaptureSettings {
                max_retakes: 11,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(update.validate().is_err());
    }

    #[test]
    fn rejects_too_many_enabled_effects() {
        let update = SettingsUpdate {
            effects: Some(vec![
                effect("a", true),
                effect("b", true),
                effect("c", true),
                effect("d", true),
            ]),
            ..Default::default()
        };
        assert!(update.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_effect_ids() {
        let update = SettingsUpdate {
            effects: Some(vec![effect("a", true), effect("a", false)]),
            ..Default::default()
        };
        assert!(matches!(update.validate(), Err(StoreError::Validation(m)) if m.contains("duplicate")));
    }

    #[test]
    fn accepts_partial_update() {
        let update: SettingsUpdate =
            serde_json::from_str(r#"{"orientation":"landscape","photoCount":4}"#).unwrap();
        update.validate().unwrap();
        assert_eq!(update.orientation, Some(Orientation::Landscape));
        assert!(update.capture_interval.is_none());
    }

    #[test]
    fn effect_refs_need_id_name_and_prompt() {
        let good = EffectRef {
            id: "pixar".into(),
            name: "Pixar".into(),
            prompt: "pixar prompt".into(),
        };
        validate_effect_refs(&[good.clone()]).unwrap();
        validate_effect_refs(&[]).unwrap();

        let blank_prompt = EffectRef {
            prompt: "  ".into(),
            ..good.clone()
        };
        assert!(matches!(
            validate_effect_refs(&[good.clone(), blank_prompt]),
            Err(StoreError::Validation(m)) if m.contains("effect.prompt")
        ));
        let blank_id = EffectRef {
            id: "".into(),
            ..good
        };
        assert!(validate_effect_refs(&[blank_id]).is_err());
    }

    #[test]
    fn new_effect_requires_name_and_prompt() {
        let e = NewEffect {
            name: "".into(),
            prompt: "p".into(),
            ..Default::default()
        };
        assert!(e.validate().is_err());
    }
}
