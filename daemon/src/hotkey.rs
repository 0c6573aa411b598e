//! Hotkey matching over the raw key-event stream.
//!
//! [`HotkeyMatcher`] owns the set of keys currently held down and reports a
//! match when a press (or auto-repeat) leaves that set exactly equal to the
//! configured [`HotkeyCombo`].  Order of presses is irrelevant; an extra held
//! key suppresses the match.
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::{Serialize, Serializer};

/// Keys held by the default clip hotkey (Alt+Z).
pub const DEFAULT_COMBO: [&str; 2] = ["KEY_LEFTALT", "KEY_Z"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("unrecognized key code {0}")]
    UnrecognizedKeyCode(u16),

    #[error("invalid key name {0:?}")]
    InvalidName(String),

    #[error("hotkey combo must contain at least one key")]
    EmptyCombo,
}

// ── Key codes ─────────────────────────────────────────────────────────────────

/// Symbolic identifier of a physical key in kernel naming, e.g. `KEY_LEFTALT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyCode(String);

impl KeyCode {
    /// Parses a user-supplied key name.
    ///
    /// Case-insensitive; the `KEY_` prefix is optional (`"z"` and `"KEY_Z"`
    /// name the same key).  `BTN_` names are accepted as-is.
    pub fn parse(name: &str) -> Result<Self, KeyError> {
        let upper = name.trim().to_ascii_uppercase();
        let valid_chars = upper.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if upper.is_empty() || !valid_chars {
            return Err(KeyError::InvalidName(name.to_string()));
        }

        let symbol = if upper.starts_with("KEY_") || upper.starts_with("BTN_") {
            upper
        } else {
            format!("KEY_{upper}")
        };
        if symbol.len() <= 4 {
            return Err(KeyError::InvalidName(name.to_string()));
        }
        Ok(Self(symbol))
    }

    /// Builds a code from the symbol the input layer reports for raw code `raw`.
    ///
    /// Codes without a kernel name come through as something other than a
    /// `KEY_`/`BTN_` symbol and are rejected.
    pub fn from_symbol(raw: u16, symbol: &str) -> Result<Self, KeyError> {
        if symbol.starts_with("KEY_") || symbol.starts_with("BTN_") {
            Ok(Self(symbol.to_string()))
        } else {
            Err(KeyError::UnrecognizedKeyCode(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Events ────────────────────────────────────────────────────────────────────

/// A single state change for one key, as delivered by the input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Pressed,
    Released,
    /// Auto-repeat while the key is held.
    Repeated,
}

impl Transition {
    /// Maps an evdev key event value (0 = up, 1 = down, 2 = repeat).
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Released),
            1 => Some(Self::Pressed),
            2 => Some(Self::Repeated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub code: KeyCode,
    pub transition: Transition,
}

impl KeyEvent {
    pub fn new(code: KeyCode, transition: Transition) -> Self {
        Self { code, transition }
    }
}

// ── Combo ─────────────────────────────────────────────────────────────────────

/// The unordered, non-empty set of keys that must be held together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotkeyCombo(BTreeSet<KeyCode>);

impl HotkeyCombo {
    /// Parses each name with [`KeyCode::parse`]; duplicates collapse.
    pub fn new<I, S>(names: I) -> Result<Self, KeyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = names
            .into_iter()
            .map(|name| KeyCode::parse(name.as_ref()))
            .collect::<Result<BTreeSet<_>, _>>()?;
        if keys.is_empty() {
            return Err(KeyError::EmptyCombo);
        }
        Ok(Self(keys))
    }

    /// Exact set equality against the held keys.
    pub fn matches(&self, pressed: &HashSet<KeyCode>) -> bool {
        pressed.len() == self.0.len() && self.0.iter().all(|key| pressed.contains(key))
    }

    #[cfg(test)]
    pub fn keys(&self) -> impl Iterator<Item = &KeyCode> {
        self.0.iter()
    }
}

impl Default for HotkeyCombo {
    fn default() -> Self {
        Self(DEFAULT_COMBO.iter().map(|k| KeyCode(k.to_string())).collect())
    }
}

impl fmt::Display for HotkeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(KeyCode::as_str).collect();
        f.write_str(&names.join("+"))
    }
}

impl Serialize for HotkeyCombo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(KeyCode::as_str))
    }
}

// ── Matcher ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    Matched,
    NoMatch,
}

/// Tracks held keys and detects the combo.
///
/// Matching is edge-triggered: a press or repeat fires only if the held set
/// equals the combo afterwards and did not equal it immediately before.
/// Holding the combo therefore fires once, not on every auto-repeat tick,
/// while releasing one combo key and pressing it again fires anew.
#[derive(Debug, Default)]
pub struct HotkeyMatcher {
    pressed: HashSet<KeyCode>,
}

impl HotkeyMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_event(&mut self, event: &KeyEvent, combo: &HotkeyCombo) -> MatchResult {
        let was_matched = combo.matches(&self.pressed);

        match event.transition {
            Transition::Released => {
                self.pressed.remove(&event.code);
                return MatchResult::NoMatch;
            }
            Transition::Pressed | Transition::Repeated => {
                self.pressed.insert(event.code.clone());
            }
        }

        if !was_matched && combo.matches(&self.pressed) {
            MatchResult::Matched
        } else {
            MatchResult::NoMatch
        }
    }

    #[cfg(test)]
    pub fn pressed(&self) -> &HashSet<KeyCode> {
        &self.pressed
    }

    /// Forgets every held key, e.g. after the device was re-opened and its
    /// key state can no longer be trusted.
    pub fn reset(&mut self) {
        self.pressed.clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
