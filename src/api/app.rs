//! The two front-of-house applications served by this backend.

use crate::api::handlers::auth::storage::AttemptScope;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum App {
    /// Kitchen Display System.
    Kds,
    /// Point of Sale terminal.
    Pos,
}

impl App {
    pub const ALL: [Self; 2] = [Self::Kds, Self::Pos];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Kds => "kds",
            Self::Pos => "pos",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Kds => "KDS",
            Self::Pos => "POS",
        }
    }

    #[must_use]
    pub const fn cookie_name(self) -> &'static str {
        match self {
            Self::Kds => "KDS_SESSION",
            Self::Pos => "POS_SESSION",
        }
    }

    /// Session lifetime in seconds when none is configured.
    #[must_use]
    pub const fn default_session_lifetime(self) -> i64 {
        match self {
            Self::Kds => 3600,
            Self::Pos => 7200,
        }
    }

    /// KDS throttles a username or an address on its own; POS only the pair.
    #[must_use]
    pub const fn attempt_scope(self) -> AttemptScope {
        match self {
            Self::Kds => AttemptScope::UserOrIp,
            Self::Pos => AttemptScope::UserAndIp,
        }
    }

    /// Whether a successful login triggers the daily availability reset.
    #[must_use]
    pub const fn resets_daily_availability(self) -> bool {
        matches!(self, Self::Pos)
    }

    #[must_use]
    pub fn mount_path(self) -> String {
        format!("/{}", self.name())
    }

    #[must_use]
    pub fn login_page(self) -> String {
        format!("/{}/login", self.name())
    }

    #[must_use]
    pub fn home_page(self) -> String {
        format!("/{}/", self.name())
    }
}

impl std::fmt::Display for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
