use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::repo::SkillCatalogRepository;
use crate::error::{AccountError, AccountResult};
use crate::users::repo::UserRepository;
use crate::users::repo_types::UserField;

const RECONCILE_PAGE_SIZE: i64 = 200;

/// Trim, collapse inner whitespace, drop empties and repeats. Case is kept:
/// "Chess" and "chess" are different catalog entries.
pub fn normalize_skill_names(raw: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn into_result(self, user_id: Uuid) -> AccountResult<Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(AccountError::SynchronizationPartialFailure {
                user_id,
                failed_skills: self.failed,
            })
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub users_scanned: usize,
    pub teachers_added: usize,
    pub stale_removed: usize,
    pub duplicates_collapsed: usize,
    pub failures: usize,
}

/// Keeps the skill → teachers index in line with users' `skills_to_teach`.
#[derive(Clone)]
pub struct SkillSynchronizer {
    catalog: Arc<dyn SkillCatalogRepository>,
    op_timeout: Duration,
}

impl SkillSynchronizer {
    pub fn new(catalog: Arc<dyn SkillCatalogRepository>, op_timeout: Duration) -> Self {
        Self {
            catalog,
            op_timeout,
        }
    }

    async fn bounded<F>(&self, skill: &str, op: F) -> bool
    where
        F: std::future::Future<Output = AccountResult<()>>,
    {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(skill, error = %e, "skill catalog write failed");
                false
            }
            Err(_) => {
                warn!(
                    skill,
                    timeout_ms = self.op_timeout.as_millis() as u64,
                    "skill catalog write timed out"
                );
                false
            }
        }
    }

    /// Adds `user_id` to every skill in `next` and removes it from skills that
    /// were in `previous` but not in `next`. Every skill is attempted; the
    /// ones that failed or timed out are listed in `failed`.
    #[instrument(skip(self, previous, next))]
    pub async fn sync_teacher(
        &self,
        user_id: Uuid,
        previous: &[String],
        next: &[String],
    ) -> SyncReport {
        let mut report = SyncReport::default();

        for skill in next {
            if self.bounded(skill, self.catalog.add_teacher(skill, user_id)).await {
                report.added.push(skill.clone());
            } else {
                report.failed.push(skill.clone());
            }
        }

        let keep: HashSet<&String> = next.iter().collect();
        for skill in previous.iter().filter(|s| !keep.contains(s)) {
            if self.bounded(skill, self.catalog.remove_teacher(skill, user_id)).await {
                report.removed.push(skill.clone());
            } else {
                report.failed.push(skill.clone());
            }
        }

        debug!(
            added = report.added.len(),
            removed = report.removed.len(),
            failed = report.failed.len(),
            "skill catalog synchronized"
        );
        report
    }

    pub async fn teachers_of(&self, skill: &str) -> AccountResult<Vec<Uuid>> {
        Ok(self
            .catalog
            .find_skill_by_name(skill)
            .await?
            .map(|e| e.willing_teachers)
            .unwrap_or_default())
    }

    /// Rebuilds the catalog from user records: re-adds every declared teacher,
    /// removes teachers that no longer declare the skill and collapses
    /// duplicate ids left by older writers. Catalog entries are never deleted.
    #[instrument(skip(self, users))]
    pub async fn reconcile(&self, users: &dyn UserRepository) -> AccountResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let mut expected: HashMap<String, HashSet<Uuid>> = HashMap::new();

        let mut offset = 0;
        loop {
            let page = users.list_users(RECONCILE_PAGE_SIZE, offset).await?;
            if page.is_empty() {
                break;
            }
            offset += page.len() as i64;
            report.users_scanned += page.len();

            for user in page {
                for skill in normalize_skill_names(&user.skills_to_teach) {
                    expected.entry(skill).or_default().insert(user.id);
                }
            }
        }

        for entry in self.catalog.list_skills().await? {
            let name = entry.skill_name.as_str();
            let wanted = expected.get(name);
            let mut seen = HashSet::new();
            let mut has_duplicates = false;

            for teacher in &entry.willing_teachers {
                if !seen.insert(*teacher) {
                    has_duplicates = true;
                    continue;
                }
                if wanted.map_or(true, |w| !w.contains(teacher)) {
                    // The listing may predate the user's latest skill update.
                    if still_declares(users, *teacher, name).await? {
                        continue;
                    }
                    let removed = self
                        .bounded(name, self.catalog.remove_teacher(name, *teacher))
                        .await;
                    if removed {
                        report.stale_removed += 1;
                    } else {
                        report.failures += 1;
                    }
                }
            }

            if has_duplicates {
                // Re-read so teachers added since the listing are not dropped.
                if let Some(mut fresh) = self.catalog.find_skill_by_name(name).await? {
                    let mut unique = HashSet::new();
                    fresh.willing_teachers.retain(|t| unique.insert(*t));
                    if self.bounded(name, self.catalog.save_skill(&fresh)).await {
                        report.duplicates_collapsed += 1;
                    } else {
                        report.failures += 1;
                    }
                }
            }

            for teacher in wanted.into_iter().flatten() {
                if !seen.contains(teacher) {
                    let added = self
                        .bounded(name, self.catalog.add_teacher(name, *teacher))
                        .await;
                    if added {
                        report.teachers_added += 1;
                    } else {
                        report.failures += 1;
                    }
                }
            }
            expected.remove(name);
        }

        // Skills declared by users but missing from the catalog entirely.
        for (skill, teachers) in expected {
            for teacher in teachers {
                if self.bounded(&skill, self.catalog.add_teacher(&skill, teacher)).await {
                    report.teachers_added += 1;
                } else {
                    report.failures += 1;
                }
            }
        }

        info!(
            users = report.users_scanned,
            added = report.teachers_added,
            removed = report.stale_removed,
            deduplicated = report.duplicates_collapsed,
            failures = report.failures,
            "skill catalog reconciled"
        );
        Ok(report)
    }
}

async fn still_declares(users: &dyn UserRepository, id: Uuid, skill: &str) -> AccountResult<bool> {
    Ok(users
        .find_user_by_field(&UserField::Id(id))
        .await?
        .map_or(false, |u| {
            normalize_skill_names(&u.skills_to_teach)
                .iter()
                .any(|s| s == skill)
        }))
}
