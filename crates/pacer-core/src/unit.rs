use std::fmt;

use unicode_segmentation::UnicodeSegmentation as _;

/// Atomic piece of display text: one extended grapheme cluster.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Unit(Box<str>);

/// Pacing class of a unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitClass {
    Newline,
    SentenceEnd,
    Other,
}

impl Unit {
    pub fn new(text: impl Into<Box<str>>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn class(&self) -> UnitClass {
        match self.as_str() {
            "\n" | "\r\n" => UnitClass::Newline,
            "." | "!" | "?" => UnitClass::SentenceEnd,
            _ => UnitClass::Other,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Unit {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Splits a chunk into units in order.
pub fn split_units(text: &str) -> impl Iterator<Item = Unit> + '_ {
    text.graphemes(true).map(Unit::from)
}
