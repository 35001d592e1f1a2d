//! Virtual keyboard layouts carried by placements.
//!
//! Coordinates are in the keyboard's local plane (meters, x right, y away
//! from the user). The renderer builds geometry from these; the detector only
//! uses them to validate key presses.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

const KEY_WIDTH: f32 = 0.04;
const KEY_PITCH: f32 = 0.05;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum KeyboardTemplate {
    #[default]
    Standard,
    Compact,
}

impl KeyboardTemplate {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyboardTemplate::Standard => "standard",
            KeyboardTemplate::Compact => "compact",
        }
    }

    pub fn layout(self) -> KeyboardLayout {
        match self {
            KeyboardTemplate::Standard => standard_layout(),
            KeyboardTemplate::Compact => compact_layout(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Key {
    pub label: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SpaceBar {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeyboardLayout {
    pub width: f32,
    pub height: f32,
    pub keys: Vec<Key>,
    pub space_bar: SpaceBar,
}

impl KeyboardLayout {
    /// Canonical label for a pressed key, or `None` if the layout lacks it.
    /// A literal space and "SPACE" both map to the space bar.
    pub fn resolve(&self, pressed: &str) -> Option<String> {
        if pressed == " " || pressed.eq_ignore_ascii_case("space") {
            return Some(" ".to_string());
        }
        self.keys
            .iter()
            .find(|k| k.label.eq_ignore_ascii_case(pressed))
            .map(|k| k.label.clone())
    }
}

/// Keys at a fixed pitch starting at `x0`, all in one row.
fn row(labels: &[&str], x0: f32, y: f32) -> Vec<Key> {
    labels
        .iter()
        .enumerate()
        .map(|(i, label)| Key {
            label: (*label).to_string(),
            x: x0 + i as f32 * KEY_PITCH,
            y,
            width: KEY_WIDTH,
        })
        .collect()
}

fn key(label: &str, x: f32, y: f32, width: f32) -> Key {
    Key {
        label: label.to_string(),
        x,
        y,
        width,
    }
}

fn standard_layout() -> KeyboardLayout {
    let mut keys = row(&["1", "2", "3", "4", "5", "6", "7", "8", "9", "0"], -0.25, 0.075);
    keys.push(key("DEL", 0.25, 0.075, 0.06));
    keys.extend(row(&["Q", "W", "E", "R", "T", "Y", "U", "I", "O", "P", "/"], -0.25, 0.025));
    keys.extend(row(&["A", "S", "D", "F", "G", "H", "J", "K", "L", ";", "'"], -0.25, -0.025));
    keys.extend(row(&["Z", "X", "C", "V", "B", "N", "M", ",", "."], -0.25, -0.075));
    keys.push(key("ENTER", 0.225, -0.075, 0.1));

    KeyboardLayout {
        width: 0.6,
        height: 0.2,
        keys,
        space_bar: SpaceBar {
            x: 0.0,
            y: -0.125,
            width: 0.5,
            height: 0.04,
        },
    }
}

fn compact_layout() -> KeyboardLayout {
    let mut keys = row(&["Q", "W", "E", "R", "T", "Y", "U", "I"], -0.175, 0.05);
    keys.extend(row(&["A", "S", "D", "F", "G", "H", "J", "K"], -0.175, 0.0));
    keys.extend(row(&["Z", "X", "C", "V", "B", "N", "M", "DEL"], -0.175, -0.05));

    KeyboardLayout {
        width: 0.4,
        height: 0.15,
        keys,
        space_bar: SpaceBar {
            x: 0.0,
            y: -0.1,
            width: 0.3,
            height: 0.04,
        },
    }
}
