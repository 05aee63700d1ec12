use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Reverse index entry: who is willing to teach a skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SkillCatalogEntry {
    pub skill_name: String,
    pub willing_teachers: Vec<Uuid>, // duplicate-free, insertion order
}

impl SkillCatalogEntry {
    pub fn new(skill_name: impl Into<String>) -> Self {
        Self {
            skill_name: skill_name.into(),
            willing_teachers: Vec::new(),
        }
    }

    /// Returns true when the teacher was not already listed.
    pub fn add_teacher(&mut self, user_id: Uuid) -> bool {
        if self.willing_teachers.contains(&user_id) {
            return false;
        }
        self.willing_teachers.push(user_id);
        true
    }

    pub fn remove_teacher(&mut self, user_id: Uuid) -> bool {
        let before = self.willing_teachers.len();
        self.willing_teachers.retain(|t| *t != user_id);
        before != self.willing_teachers.len()
    }
}
