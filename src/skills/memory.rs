//! In-memory skill catalog. Per-key updates go through `DashMap::entry`, which
//! holds the shard lock for the duration of the closure.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::repo::SkillCatalogRepository;
use super::repo_types::SkillCatalogEntry;
use crate::error::AccountResult;

#[derive(Default)]
pub struct InMemorySkillCatalog {
    skills: DashMap<String, SkillCatalogEntry>,
}

impl InMemorySkillCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SkillCatalogRepository for InMemorySkillCatalog {
    async fn find_skill_by_name(&self, name: &str) -> AccountResult<Option<SkillCatalogEntry>> {
        Ok(self.skills.get(name).map(|e| e.clone()))
    }

    async fn create_skill(&self, name: &str) -> AccountResult<SkillCatalogEntry> {
        Ok(self
            .skills
            .entry(name.to_string())
            .or_insert_with(|| SkillCatalogEntry::new(name))
            .clone())
    }

    async fn save_skill(&self, entry: &SkillCatalogEntry) -> AccountResult<()> {
        self.skills.insert(entry.skill_name.clone(), entry.clone());
        Ok(())
    }

    async fn add_teacher(&self, name: &str, user_id: Uuid) -> AccountResult<()> {
        self.skills
            .entry(name.to_string())
            .or_insert_with(|| SkillCatalogEntry::new(name))
            .add_teacher(user_id);
        Ok(())
    }

    async fn remove_teacher(&self, name: &str, user_id: Uuid) -> AccountResult<()> {
        if let Some(mut entry) = self.skills.get_mut(name) {
            entry.remove_teacher(user_id);
        }
        Ok(())
    }

    async fn list_skills(&self) -> AccountResult<Vec<SkillCatalogEntry>> {
        let mut all: Vec<SkillCatalogEntry> =
            self.skills.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.skill_name.cmp(&b.skill_name));
        Ok(all)
    }
}
