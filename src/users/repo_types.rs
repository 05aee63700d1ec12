use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

pub const DEFAULT_DISPLAY_PICTURE: &str = "/img/users/default-user.jpeg";

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,              // lowercased
    #[serde(skip_serializing)]
    pub password_hash: String,      // Argon2 PHC string
    pub name: Option<String>,
    pub bio: Option<String>,
    pub display_picture: String,
    pub user_skills: Vec<String>,
    pub skills_to_learn: Vec<String>,
    pub skills_to_teach: Vec<String>,
    pub requests_received: Vec<Uuid>,
    pub teaching_conversations: Vec<Uuid>,
    pub learning_conversations: Vec<Uuid>,
    pub reviews: Vec<Uuid>,
    pub teaching_rating: f64,
    pub number_of_ratings: i32,
    pub password_changed_at: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub password_reset_token: Option<String>, // SHA-256 hex of the issued token
    #[serde(skip_serializing)]
    pub password_reset_expires: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl User {
    /// A fresh record with no password set yet.
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            email: email.into(),
            password_hash: String::new(),
            name: None,
            bio: None,
            display_picture: DEFAULT_DISPLAY_PICTURE.to_string(),
            user_skills: Vec::new(),
            skills_to_learn: Vec::new(),
            skills_to_teach: Vec::new(),
            requests_received: Vec::new(),
            teaching_conversations: Vec::new(),
            learning_conversations: Vec::new(),
            reviews: Vec::new(),
            teaching_rating: 0.0,
            number_of_ratings: 0,
            password_changed_at: None,
            password_reset_token: None,
            password_reset_expires: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn has_password(&self) -> bool {
        !self.password_hash.is_empty()
    }

    pub fn credentials(&self) -> UserCredentials {
        UserCredentials {
            password_hash: self.password_hash.clone(),
            password_changed_at: self.password_changed_at,
            password_reset_token: self.password_reset_token.clone(),
            password_reset_expires: self.password_reset_expires,
        }
    }
}

/// The password columns, written on their own so credential changes never
/// overwrite profile or skill fields updated in the meantime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCredentials {
    pub password_hash: String,
    pub password_changed_at: Option<OffsetDateTime>,
    pub password_reset_token: Option<String>,
    pub password_reset_expires: Option<OffsetDateTime>,
}

impl UserCredentials {
    pub fn apply(self, user: &mut User) {
        user.password_hash = self.password_hash;
        user.password_changed_at = self.password_changed_at;
        user.password_reset_token = self.password_reset_token;
        user.password_reset_expires = self.password_reset_expires;
    }
}

/// Unique keys a user can be looked up by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserField {
    Id(Uuid),
    Username(String),
    Email(String),
    ResetTokenHash(String),
}

impl UserField {
    pub fn column(&self) -> &'static str {
        match self {
            UserField::Id(_) => "id",
            UserField::Username(_) => "username",
            UserField::Email(_) => "email",
            UserField::ResetTokenHash(_) => "password_reset_token",
        }
    }
}

/// Partial update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub bio: Option<String>,
    pub skills_to_teach: Option<Vec<String>>,
    pub skills_to_learn: Option<Vec<String>>,
    pub user_skills: Option<Vec<String>>,
}

impl UserPatch {
    pub fn apply(self, user: &mut User) {
        if let Some(v) = self.name {
            user.name = Some(v);
        }
        if let Some(v) = self.bio {
            user.bio = Some(v);
        }
        if let Some(v) = self.skills_to_teach {
            user.skills_to_teach = v;
        }
        if let Some(v) = self.skills_to_learn {
            user.skills_to_learn = v;
        }
        if let Some(v) = self.user_skills {
            user.user_skills = v;
        }
    }
}
