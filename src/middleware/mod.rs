mod auth;

pub use auth::{require_auth, current_user, current_account, require_admin, SESSION_KEY};
