//! Structural edits to a section layout.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{CourseId, Layout, Section, SectionId};

/// Kinds of edits, in policy precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Split,
    Remove,
    Merge,
    Add,
    #[serde(rename = "noop")]
    NoOp,
}

/// Whether an edit adds or takes away seats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Grow,
    Shrink,
    Neutral,
}

impl ActionKind {
    pub fn direction(self) -> Direction {
        match self {
            ActionKind::Split | ActionKind::Add => Direction::Grow,
            ActionKind::Remove | ActionKind::Merge => Direction::Shrink,
            ActionKind::NoOp => Direction::Neutral,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Split => "split",
            ActionKind::Remove => "remove",
            ActionKind::Merge => "merge",
            ActionKind::Add => "add",
            ActionKind::NoOp => "noop",
        };
        f.write_str(name)
    }
}

/// A fully materialized edit: every new section already has its placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StructuralEdit {
    /// Shrink `section` to `retained_capacity` and open `new_section` beside it.
    Split {
        section: SectionId,
        ratio: f64,
        retained_capacity: u32,
        new_section: Section,
    },
    /// Fold `absorbed` into `keep`, which is resized to `capacity`.
    Merge {
        keep: SectionId,
        absorbed: Vec<SectionId>,
        capacity: u32,
    },
    Add {
        section: Section,
    },
    Remove {
        section: SectionId,
    },
    #[serde(rename = "noop")]
    NoOp,
}

impl StructuralEdit {
    pub fn kind(&self) -> ActionKind {
        match self {
            StructuralEdit::Split { .. } => ActionKind::Split,
            StructuralEdit::Merge { .. } => ActionKind::Merge,
            StructuralEdit::Add { .. } => ActionKind::Add,
            StructuralEdit::Remove { .. } => ActionKind::Remove,
            StructuralEdit::NoOp => ActionKind::NoOp,
        }
    }

    /// Existing sections this edit touches.
    pub fn targets(&self) -> Vec<&SectionId> {
        match self {
            StructuralEdit::Split { section, .. } | StructuralEdit::Remove { section } => {
                vec![section]
            }
            StructuralEdit::Merge { keep, absorbed, .. } => {
                std::iter::once(keep).chain(absorbed.iter()).collect()
            }
            StructuralEdit::Add { .. } | StructuralEdit::NoOp => Vec::new(),
        }
    }

    /// Apply the edit in place. Callers work on a clone of the live layout.
    pub fn apply_to(&self, layout: &mut Layout) -> Result<(), String> {
        match self {
            StructuralEdit::Split {
                section,
                retained_capacity,
                new_section,
                ..
            } => {
                layout.set_capacity(section, *retained_capacity)?;
                layout.insert(new_section.clone())
            }
            StructuralEdit::Merge {
                keep,
                absorbed,
                capacity,
            } => {
                if absorbed.contains(keep) {
                    return Err(format!("section '{}' cannot absorb itself", keep));
                }
                layout.set_capacity(keep, *capacity)?;
                for id in absorbed {
                    layout.remove(id)?;
                }
                Ok(())
            }
            StructuralEdit::Add { section } => layout.insert(section.clone()),
            StructuralEdit::Remove { section } => layout.remove(section).map(|_| ()),
            StructuralEdit::NoOp => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionProposal {
    pub course: CourseId,
    pub edit: StructuralEdit,
    pub reason: String,
}

impl ActionProposal {
    pub fn kind(&self) -> ActionKind {
        self.edit.kind()
    }

    /// One-line description for logs, progress updates and advisor prompts.
    pub fn summary(&self) -> String {
        match &self.edit {
            StructuralEdit::Split {
                section,
                retained_capacity,
                new_section,
                ..
            } => format!(
                "split {} ({} seats kept, new {} in {} with {} seats)",
                section,
                retained_capacity,
                new_section.id,
                new_section.period,
                new_section.capacity
            ),
            StructuralEdit::Merge {
                keep,
                absorbed,
                capacity,
            } => format!(
                "merge {} into {} ({} seats)",
                absorbed
                    .iter()
                    .map(SectionId::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
                keep,
                capacity
            ),
            StructuralEdit::Add { section } => format!(
                "add {} for {} in {} ({} seats, teacher {}, room {})",
                section.id,
                section.course,
                section.period,
                section.capacity,
                section.teacher,
                section.room
            ),
            StructuralEdit::Remove { section } => format!("remove {}", section),
            StructuralEdit::NoOp => format!("no change for {}", self.course),
        }
    }
}
