//! Account credentials and the teachable-skill catalog for the skill-exchange
//! platform.

pub mod config;
pub mod error;
pub mod skills;
pub mod state;
pub mod users;

pub use error::{AccountError, AccountResult};
pub use state::AppState;
