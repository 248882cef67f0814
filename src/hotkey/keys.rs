//! Key chord definitions and the binding table
//!
//! A chord is a Windows virtual-key code plus an exact modifier mask.
//! Chords serialize as strings such as `"Ctrl+VolumeMute"` or `"Alt+0x41"`.

use std::str::FromStr;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::events::Intent;

/// Virtual-key codes used by the default bindings and the chord parser
pub mod vk {
    pub const F1: u32 = 0x70;
    pub const F24: u32 = 0x87;
    pub const VOLUME_MUTE: u32 = 0xAD;
    pub const VOLUME_DOWN: u32 = 0xAE;
    pub const VOLUME_UP: u32 = 0xAF;
    pub const MEDIA_NEXT_TRACK: u32 = 0xB0;
    pub const MEDIA_PREV_TRACK: u32 = 0xB1;
    pub const MEDIA_STOP: u32 = 0xB2;
    pub const MEDIA_PLAY_PAUSE: u32 = 0xB3;
}

const NAMED_KEYS: &[(&str, u32)] = &[
    ("VolumeUp", vk::VOLUME_UP),
    ("VolumeDown", vk::VOLUME_DOWN),
    ("VolumeMute", vk::VOLUME_MUTE),
    ("MediaNext", vk::MEDIA_NEXT_TRACK),
    ("MediaPrev", vk::MEDIA_PREV_TRACK),
    ("MediaStop", vk::MEDIA_STOP),
    ("MediaPlayPause", vk::MEDIA_PLAY_PAUSE),
];

/// Which modifier keys are held
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Modifiers {
    pub control: bool,
    pub alt: bool,
    pub shift: bool,
    pub win: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        control: false,
        alt: false,
        shift: false,
        win: false,
    };

    pub const CONTROL: Modifiers = Modifiers {
        control: true,
        ..Modifiers::NONE
    };
}

/// A key code plus the exact modifier combination that must be held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Chord {
    pub key: u32,
    pub modifiers: Modifiers,
}

impl Chord {
    pub const fn new(key: u32) -> Self {
        Self {
            key,
            modifiers: Modifiers::NONE,
        }
    }

    pub const fn with_modifiers(key: u32, modifiers: Modifiers) -> Self {
        Self { key, modifiers }
    }

    /// Exact match: same key and every modifier flag identical
    pub fn matches(&self, key: u32, modifiers: Modifiers) -> bool {
        self.key == key && self.modifiers == modifiers
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChordParseError {
    #[error("empty key chord")]
    Empty,

    #[error("unknown modifier `{0}`")]
    UnknownModifier(String),

    #[error("unknown key `{0}`")]
    UnknownKey(String),
}

impl FromStr for Chord {
    type Err = ChordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('+').map(str::trim).collect();
        let (key_name, modifier_names) = match parts.split_last() {
            Some((key, mods)) if !key.is_empty() => (*key, mods),
            _ => return Err(ChordParseError::Empty),
        };

        let mut modifiers = Modifiers::NONE;
        for name in modifier_names {
            match name.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => modifiers.control = true,
                "alt" => modifiers.alt = true,
                "shift" => modifiers.shift = true,
                "win" | "super" | "meta" => modifiers.win = true,
                _ => return Err(ChordParseError::UnknownModifier(name.to_string())),
            }
        }

        Ok(Chord::with_modifiers(parse_key(key_name)?, modifiers))
    }
}

fn parse_key(name: &str) -> Result<u32, ChordParseError> {
    let unknown = || ChordParseError::UnknownKey(name.to_string());

    if let Some(&(_, code)) = NAMED_KEYS
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(name))
    {
        return Ok(code);
    }

    if let Some(hex) = name.strip_prefix("0x").or_else(|| name.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16)
            .ok()
            .filter(|code| *code <= 0xFF)
            .ok_or_else(unknown);
    }

    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return if c.is_ascii_alphanumeric() {
            Ok(c.to_ascii_uppercase() as u32)
        } else {
            Err(unknown())
        };
    }

    if let Some(n) = name
        .strip_prefix('F')
        .or_else(|| name.strip_prefix('f'))
        .and_then(|n| n.parse::<u32>().ok())
    {
        let code = vk::F1 + n.saturating_sub(1);
        if (1..=24).contains(&n) && code <= vk::F24 {
            return Ok(code);
        }
    }

    name.parse::<u32>()
        .ok()
        .filter(|code| *code <= 0xFF)
        .ok_or_else(unknown)
}

fn key_name(code: u32) -> String {
    if let Some((name, _)) = NAMED_KEYS.iter().find(|(_, known)| *known == code) {
        return (*name).to_string();
    }
    match code {
        0x30..=0x39 | 0x41..=0x5A => char::from_u32(code)
            .map(String::from)
            .unwrap_or_else(|| format!("0x{code:02X}")),
        vk::F1..=vk::F24 => format!("F{}", code - vk::F1 + 1),
        _ => format!("0x{code:02X}"),
    }
}

impl std::fmt::Display for Chord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.modifiers.control {
            write!(f, "Ctrl+")?;
        }
        if self.modifiers.alt {
            write!(f, "Alt+")?;
        }
        if self.modifiers.shift {
            write!(f, "Shift+")?;
        }
        if self.modifiers.win {
            write!(f, "Win+")?;
        }
        write!(f, "{}", key_name(self.key))
    }
}

impl TryFrom<String> for Chord {
    type Error = ChordParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Chord> for String {
    fn from(chord: Chord) -> Self {
        chord.to_string()
    }
}

/// Chord assigned to each intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyBindings {
    pub volume_up: Chord,
    pub volume_down: Chord,
    pub volume_mute: Chord,
    pub navigation: Chord,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            volume_up: Chord::new(vk::VOLUME_UP),
            volume_down: Chord::new(vk::VOLUME_DOWN),
            volume_mute: Chord::with_modifiers(vk::VOLUME_MUTE, Modifiers::CONTROL),
            navigation: Chord::new(vk::VOLUME_MUTE),
        }
    }
}

impl KeyBindings {
    /// Map a key-down event to an intent. Earlier entries win on duplicates.
    pub fn classify(&self, key: u32, modifiers: Modifiers) -> Option<Intent> {
        [
            (&self.volume_up, Intent::VolumeUp),
            (&self.volume_down, Intent::VolumeDown),
            (&self.volume_mute, Intent::ToggleMute),
            (&self.navigation, Intent::ToggleNavigation),
        ]
        .into_iter()
        .find(|(chord, _)| chord.matches(key, modifiers))
        .map(|(_, intent)| intent)
    }
}

/// Binding table shared between the hook thread and the session worker
///
/// Replacing the table takes effect on the next key event; the hook
/// itself is never reinstalled.
#[derive(Debug, Clone, Default)]
pub struct SharedBindings(Arc<RwLock<KeyBindings>>);

impl SharedBindings {
    pub fn new(bindings: KeyBindings) -> Self {
        Self(Arc::new(RwLock::new(bindings)))
    }

    /// Classify on the hook path. A poisoned lock passes everything through.
    pub fn classify(&self, key: u32, modifiers: Modifiers) -> Option<Intent> {
        self.0.read().ok()?.classify(key, modifiers)
    }

    pub fn replace(&self, bindings: KeyBindings) {
        match self.0.write() {
            Ok(mut current) => {
                if *current != bindings {
                    info!(
                        volume_up = %bindings.volume_up,
                        volume_down = %bindings.volume_down,
                        volume_mute = %bindings.volume_mute,
                        navigation = %bindings.navigation,
                        "key bindings updated"
                    );
                    *current = bindings;
                }
            }
            Err(_) => warn!("key binding table lock poisoned, keeping old bindings"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bindings() {
        let bindings = KeyBindings::default();
        assert_eq!(
            bindings.classify(vk::VOLUME_UP, Modifiers::NONE),
            Some(Intent::VolumeUp)
        );
        assert_eq!(
            bindings.classify(vk::VOLUME_DOWN, Modifiers::NONE),
            Some(Intent::VolumeDown)
        );
        assert_eq!(
            bindings.classify(vk::VOLUME_MUTE, Modifiers::NONE),
            Some(Intent::ToggleNavigation)
        );
        assert_eq!(
            bindings.classify(vk::VOLUME_MUTE, Modifiers::CONTROL),
            Some(Intent::ToggleMute)
        );
    }

    #[test]
    fn test_exact_modifier_match() {
        let bindings = KeyBindings {
            volume_up: "Ctrl+VolumeUp".parse().unwrap(),
            ..Default::default()
        };
        // Missing modifier
        assert_eq!(bindings.classify(vk::VOLUME_UP, Modifiers::NONE), None);
        // Superset of modifiers
        let superset = Modifiers {
            control: true,
            shift: true,
            ..Modifiers::NONE
        };
        assert_eq!(bindings.classify(vk::VOLUME_UP, superset), None);
        // Exact
        assert_eq!(
            bindings.classify(vk::VOLUME_UP, Modifiers::CONTROL),
            Some(Intent::VolumeUp)
        );
    }

    #[test]
    fn test_unbound_key_passes() {
        let bindings = KeyBindings::default();
        assert_eq!(bindings.classify(0x41, Modifiers::NONE), None);
    }

    #[test]
    fn test_parse_chords() {
        let chord: Chord = "Ctrl+Shift+VolumeUp".parse().unwrap();
        assert_eq!(chord.key, vk::VOLUME_UP);
        assert!(chord.modifiers.control && chord.modifiers.shift);
        assert!(!chord.modifiers.alt && !chord.modifiers.win);

        assert_eq!("alt + a".parse::<Chord>().unwrap().key, 0x41);
        assert_eq!("F13".parse::<Chord>().unwrap().key, 0x7C);
        assert_eq!("0xAD".parse::<Chord>().unwrap().key, vk::VOLUME_MUTE);
        assert_eq!("175".parse::<Chord>().unwrap().key, vk::VOLUME_UP);
        assert_eq!("7".parse::<Chord>().unwrap().key, 0x37);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Chord>(), Err(ChordParseError::Empty));
        assert_eq!("Ctrl+".parse::<Chord>(), Err(ChordParseError::Empty));
        assert_eq!(
            "Hyper+A".parse::<Chord>(),
            Err(ChordParseError::UnknownModifier("Hyper".into()))
        );
        assert!(matches!(
            "Ctrl+Banana".parse::<Chord>(),
            Err(ChordParseError::UnknownKey(_))
        ));
        assert!(matches!(
            "F25".parse::<Chord>(),
            Err(ChordParseError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_chord_display() {
        let chord = Chord::with_modifiers(
            vk::VOLUME_MUTE,
            Modifiers {
                control: true,
                win: true,
                ..Modifiers::NONE
            },
        );
        assert_eq!(chord.to_string(), "Ctrl+Win+VolumeMute");
        assert_eq!(Chord::new(0x41).to_string(), "A");
        assert_eq!(Chord::new(0x71).to_string(), "F2");
        assert_eq!(Chord::new(0xDE).to_string(), "0xDE");
    }

    #[test]
    fn test_bindings_serialization() {
        let json = r#"{"volumeUp":"Alt+VolumeUp","navigation":"MediaPlayPause"}"#;
        let bindings: KeyBindings = serde_json::from_str(json).unwrap();
        assert_eq!(
            bindings.volume_up,
            Chord::with_modifiers(
                vk::VOLUME_UP,
                Modifiers {
                    alt: true,
                    ..Modifiers::NONE
                }
            )
        );
        assert_eq!(bindings.navigation, Chord::new(vk::MEDIA_PLAY_PAUSE));
        // Missing fields keep their defaults
        assert_eq!(bindings.volume_down, Chord::new(vk::VOLUME_DOWN));

        let out = serde_json::to_string(&KeyBindings::default()).unwrap();
        assert!(out.contains(r#""volumeMute":"Ctrl+VolumeMute""#));
    }

    #[test]
    fn test_shared_bindings_hot_swap() {
        let shared = SharedBindings::new(KeyBindings::default());
        let hook_side = shared.clone();
        assert_eq!(
            hook_side.classify(vk::VOLUME_UP, Modifiers::NONE),
            Some(Intent::VolumeUp)
        );

        shared.replace(KeyBindings {
            volume_up: "Ctrl+VolumeUp".parse().unwrap(),
            ..Default::default()
        });
        assert_eq!(hook_side.classify(vk::VOLUME_UP, Modifiers::NONE), None);
        assert_eq!(
            hook_side.classify(vk::VOLUME_UP, Modifiers::CONTROL),
            Some(Intent::VolumeUp)
        );
    }
}
