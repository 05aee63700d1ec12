mod credentials;
pub mod memory;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;

pub use credentials::{check_password_policy, hash_reset_token};
pub use repo_types::{User, UserField, UserPatch};
pub use services::AccountService;
