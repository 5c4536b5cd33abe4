use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// Colors accepted by the browser tab-group API, in palette order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelColor {
    Blue,
    Red,
    Yellow,
    Green,
    Pink,
    Purple,
    Cyan,
    Orange,
    Grey,
}

pub const PALETTE: [LabelColor; 9] = [
    LabelColor::Blue,
    LabelColor::Red,
    LabelColor::Yellow,
    LabelColor::Green,
    LabelColor::Pink,
    LabelColor::Purple,
    LabelColor::Cyan,
    LabelColor::Orange,
    LabelColor::Grey,
];

impl LabelColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelColor::Blue => "blue",
            LabelColor::Red => "red",
            LabelColor::Yellow => "yellow",
            LabelColor::Green => "green",
            LabelColor::Pink => "pink",
            LabelColor::Purple => "purple",
            LabelColor::Cyan => "cyan",
            LabelColor::Orange => "orange",
            LabelColor::Grey => "grey",
        }
    }
}

impl fmt::Display for LabelColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
    pub color: LabelColor,
}

impl Label {
    pub fn new(id: impl Into<String>, name: impl Into<String>, color: LabelColor) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRule {
    #[serde(rename = "labelId")]
    pub label_id: String,
}

impl DomainRule {
    pub fn new(label_id: impl Into<String>) -> Self {
        Self {
            label_id: label_id.into(),
        }
    }
}

/// Normalized hostname to rule.
pub type DomainRules = BTreeMap<String, DomainRule>;
