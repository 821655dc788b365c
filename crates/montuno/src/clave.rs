//! Clave grid: the repeating eighth-note group lengths a progression is laid over.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Group lengths (in eighth notes) for a clave pattern.
///
/// The sequence is `head` once, then `body` repeated forever. Group `i` is
/// the `i`-th entry of that infinite sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaveGrid {
    /// Short identifier used in template file names (`"2-3"`).
    pub tag: String,
    pub head: Vec<u32>,
    pub body: Vec<u32>,
}

impl ClaveGrid {
    pub fn new(tag: impl Into<String>, head: Vec<u32>, body: Vec<u32>) -> Self {
        Self {
            tag: tag.into(),
            head,
            body,
        }
    }

    pub fn two_three() -> Self {
        Self::new("2-3", vec![3, 4, 4, 3], vec![5, 4, 4, 3])
    }

    pub fn three_two() -> Self {
        Self::new("3-2", vec![3, 3, 5, 4], vec![4, 3, 5, 4])
    }

    /// Built-in pattern by short tag or long label (`"3-2"`, `"Clave 3-2"`).
    pub fn named(name: &str) -> Result<Self> {
        match clave_tag(name) {
            "2-3" => Ok(Self::two_three()),
            "3-2" => Ok(Self::three_two()),
            _ => Err(Error::UnknownClave {
                name: name.to_string(),
            }),
        }
    }

    /// Eighth notes in group `index`.
    pub fn group_duration(&self, index: usize) -> u32 {
        if let Some(&len) = self.head.get(index) {
            return len;
        }
        if self.body.is_empty() {
            return 0;
        }
        self.body[(index - self.head.len()) % self.body.len()]
    }

    /// Number of whole groups consumed before reaching `start_slot`.
    ///
    /// Groups are counted until their cumulative length reaches or passes
    /// `start_slot`, so a slot inside a group rounds up to the next group.
    pub fn slot_to_group_index(&self, start_slot: usize) -> usize {
        let mut index = 0;
        let mut consumed = 0usize;
        while consumed < start_slot {
            let len = self.group_duration(index) as usize;
            if len == 0 {
                break;
            }
            consumed += len;
            index += 1;
        }
        index
    }

    /// Successive group durations starting at `group_index`.
    pub fn iter_from(&self, group_index: usize) -> impl Iterator<Item = u32> + '_ {
        (group_index..).map(move |i| self.group_duration(i))
    }

    /// Eighth notes in one head plus one body.
    pub fn cycle_slots(&self) -> u32 {
        self.head.iter().chain(self.body.iter()).sum()
    }
}

impl Default for ClaveGrid {
    fn default() -> Self {
        Self::two_three()
    }
}

/// Strip an optional `"Clave "` prefix from a clave label.
pub fn clave_tag(name: &str) -> &str {
    let trimmed = name.trim();
    trimmed
        .strip_prefix("Clave ")
        .or_else(|| trimmed.strip_prefix("clave "))
        .unwrap_or(trimmed)
        .trim()
}

/// Short tag of a reference-file prefix: `"salsa_2-3"` gives `"2-3"`.
///
/// Everything after the first underscore is the tag; a prefix without one
/// is already a tag.
pub fn prefix_tag(midi_prefix: &str) -> &str {
    midi_prefix
        .split_once('_')
        .map_or(midi_prefix, |(_, tag)| tag)
}
