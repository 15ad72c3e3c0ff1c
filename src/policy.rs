//! Role checks for the request boundary.
//!
//! The shell resolves who is calling and passes the role along with each
//! request; nothing here reads ambient state. Roles are plain strings:
//! "guest", "editor", "admin".

pub const ROLE_GUEST: &str = "guest";

/// Create, update or delete quizzes, pages and questions, including
/// reordering and import/export.
pub fn can_author_content(role: &str) -> bool {
    matches!(role, "editor" | "admin")
}

/// Listing and reading quiz content is open to every role.
pub fn can_read_content(_role: &str) -> bool {
    true
}

/// Play results (last score / last time) may be written by anyone who can
/// take a quiz, guests included.
pub fn can_update_stats(_role: &str) -> bool {
    true
}

/// The audit trail is restricted to administrators.
pub fn can_view_audit(role: &str) -> bool {
    role == "admin"
}
