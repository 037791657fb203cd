//! Immutable section layout snapshots.
//!
//! The controller holds the current layout behind an `Arc` and replaces it as a
//! whole; edits are always made on a clone.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::domain::{CourseId, PeriodId, RoomId, Section, SectionId, TeacherId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    sections: BTreeMap<SectionId, Section>,
    /// Sequence used to name sections created by edits.
    next_seq: u64,
}

impl Layout {
    pub fn new(sections: impl IntoIterator<Item = Section>) -> Self {
        Self {
            sections: sections.into_iter().map(|s| (s.id.clone(), s)).collect(),
            next_seq: 1,
        }
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.values()
    }

    pub fn get(&self, id: &SectionId) -> Option<&Section> {
        self.sections.get(id)
    }

    pub fn contains(&self, id: &SectionId) -> bool {
        self.sections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn sections_for_course<'a>(
        &'a self,
        course: &'a CourseId,
    ) -> impl Iterator<Item = &'a Section> + 'a {
        self.sections.values().filter(move |s| &s.course == course)
    }

    pub fn course_section_count(&self, course: &CourseId) -> usize {
        self.sections_for_course(course).count()
    }

    pub fn course_sections_in_period(&self, course: &CourseId, period: &PeriodId) -> usize {
        self.sections_for_course(course)
            .filter(|s| &s.period == period)
            .count()
    }

    pub fn teacher_load(&self, teacher: &TeacherId) -> usize {
        self.sections.values().filter(|s| &s.teacher == teacher).count()
    }

    pub fn teacher_busy(&self, teacher: &TeacherId, period: &PeriodId) -> bool {
        self.sections
            .values()
            .any(|s| &s.teacher == teacher && &s.period == period)
    }

    pub fn room_busy(&self, room: &RoomId, period: &PeriodId) -> bool {
        self.sections
            .values()
            .any(|s| &s.room == room && &s.period == period)
    }

    pub fn total_capacity(&self) -> u64 {
        self.sections.values().map(|s| u64::from(s.capacity)).sum()
    }

    /// Identifier the next inserted section of `course` should use.
    pub fn fresh_section_id(&self, course: &CourseId) -> SectionId {
        let mut seq = self.next_seq;
        loop {
            let id = SectionId::new(format!("{}-n{}", course, seq));
            if !self.sections.contains_key(&id) {
                return id;
            }
            seq += 1;
        }
    }

    /// Insert a new section. Fails if the id is taken.
    pub fn insert(&mut self, section: Section) -> Result<(), String> {
        if self.sections.contains_key(&section.id) {
            return Err(format!("section '{}' already exists", section.id));
        }
        self.next_seq += 1;
        self.sections.insert(section.id.clone(), section);
        Ok(())
    }

    pub fn remove(&mut self, id: &SectionId) -> Result<Section, String> {
        self.sections
            .remove(id)
            .ok_or_else(|| format!("section '{}' does not exist", id))
    }

    pub fn set_capacity(&mut self, id: &SectionId, capacity: u32) -> Result<(), String> {
        let section = self
            .sections
            .get_mut(id)
            .ok_or_else(|| format!("section '{}' does not exist", id))?;
        section.capacity = capacity;
        Ok(())
    }

    /// SHA-256 over the canonical JSON of the sections.
    pub fn hash(&self) -> String {
        let canonical = serde_json::to_string(&self.sections).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}
