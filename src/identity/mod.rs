//! Local identity resolution
//!
//! Pure read over whatever profile data is available locally. May resolve
//! to nothing early in a session; producers tolerate that by deferring
//! connection start rather than crashing.

use serde::{Deserialize, Serialize};

/// Locally stored profile, all fields optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Profile {
    pub user_id: Option<i64>,
    pub display_name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
}

/// Resolved identity of the current user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Option<i64>,
    pub user_name: String,
}

impl Identity {
    /// Resolve from a profile with a non-blocking fallback chain for the
    /// display name: display name, then username, then the local part of
    /// the email address, then empty.
    pub fn resolve(profile: &Profile) -> Self {
        let user_name = profile
            .display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or(profile.username.as_deref().filter(|n| !n.trim().is_empty()))
            .or_else(|| {
                profile
                    .email
                    .as_deref()
                    .and_then(|e| e.split('@').next())
                    .filter(|n| !n.is_empty())
            })
            .unwrap_or("")
            .trim()
            .to_string();

        Self {
            user_id: profile.user_id,
            user_name,
        }
    }

    /// A connection can only start once the user id is known.
    pub fn is_ready(&self) -> bool {
        self.user_id.is_some()
    }
}
