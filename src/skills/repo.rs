use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::SkillCatalogEntry;
use crate::error::AccountResult;

/// Storage contract for the skill catalog.
///
/// `add_teacher` and `remove_teacher` must be atomic with respect to other
/// writers of the same entry; the synchronizer never does read-modify-write.
#[async_trait]
pub trait SkillCatalogRepository: Send + Sync {
    async fn find_skill_by_name(&self, name: &str) -> AccountResult<Option<SkillCatalogEntry>>;

    /// Creates an empty entry if none exists and returns the stored one.
    async fn create_skill(&self, name: &str) -> AccountResult<SkillCatalogEntry>;

    async fn save_skill(&self, entry: &SkillCatalogEntry) -> AccountResult<()>;

    /// Upsert the entry and union `user_id` into its teacher set.
    async fn add_teacher(&self, name: &str, user_id: Uuid) -> AccountResult<()>;

    /// No-op when the entry or the teacher is absent.
    async fn remove_teacher(&self, name: &str, user_id: Uuid) -> AccountResult<()>;

    async fn list_skills(&self) -> AccountResult<Vec<SkillCatalogEntry>>;
}

#[derive(Clone)]
pub struct PgSkillCatalogRepository {
    db: PgPool,
}

impl PgSkillCatalogRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SkillCatalogRepository for PgSkillCatalogRepository {
    async fn find_skill_by_name(&self, name: &str) -> AccountResult<Option<SkillCatalogEntry>> {
        let entry = sqlx::query_as::<_, SkillCatalogEntry>(
            r#"
            SELECT skill_name, willing_teachers
            FROM skills
            WHERE skill_name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.db)
        .await
        .context("find skill by name")?;
        Ok(entry)
    }

    async fn create_skill(&self, name: &str) -> AccountResult<SkillCatalogEntry> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let entry = sqlx::query_as::<_, SkillCatalogEntry>(
            r#"
            INSERT INTO skills (skill_name, willing_teachers)
            VALUES ($1, '{}')
            ON CONFLICT (skill_name) DO UPDATE SET skill_name = EXCLUDED.skill_name
            RETURNING skill_name, willing_teachers
            "#,
        )
        .bind(name)
        .fetch_one(&self.db)
        .await
        .context("create skill")?;
        Ok(entry)
    }

    async fn save_skill(&self, entry: &SkillCatalogEntry) -> AccountResult<()> {
        sqlx::query(
            r#"
            INSERT INTO skills (skill_name, willing_teachers)
            VALUES ($1, $2)
            ON CONFLICT (skill_name) DO UPDATE SET willing_teachers = EXCLUDED.willing_teachers
            "#,
        )
        .bind(&entry.skill_name)
        .bind(&entry.willing_teachers)
        .execute(&self.db)
        .await
        .context("save skill")?;
        Ok(())
    }

    async fn add_teacher(&self, name: &str, user_id: Uuid) -> AccountResult<()> {
        sqlx::query(
            r#"
            INSERT INTO skills (skill_name, willing_teachers)
            VALUES ($1, ARRAY[$2]::uuid[])
            ON CONFLICT (skill_name) DO UPDATE
               SET willing_teachers = array_append(skills.willing_teachers, $2)
             WHERE NOT ($2 = ANY(skills.willing_teachers))
            "#,
        )
        .bind(name)
        .bind(user_id)
        .execute(&self.db)
        .await
        .with_context(|| format!("add teacher to skill {name}"))?;
        Ok(())
    }

    async fn remove_teacher(&self, name: &str, user_id: Uuid) -> AccountResult<()> {
        sqlx::query(
            r#"
            UPDATE skills
               SET willing_teachers = array_remove(willing_teachers, $2)
             WHERE skill_name = $1
            "#,
        )
        .bind(name)
        .bind(user_id)
        .execute(&self.db)
        .await
        .with_context(|| format!("remove teacher from skill {name}"))?;
        Ok(())
    }

    async fn list_skills(&self) -> AccountResult<Vec<SkillCatalogEntry>> {
        let rows = sqlx::query_as::<_, SkillCatalogEntry>(
            r#"
            SELECT skill_name, willing_teachers
            FROM skills
            ORDER BY skill_name ASC
            "#,
        )
        .fetch_all(&self.db)
        .await
        .context("list skills")?;
        Ok(rows)
    }
}
