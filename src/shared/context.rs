//! `TenantContext` is carried on every call that touches tenant data (spec.md
//! §3). It is injected into the storage gateway as `app.current_team_id` /
//! `app.current_user_role` session variables so row-level security enforces
//! the isolation boundary independently of application-level filtering.

use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub team_id: Uuid,
    pub user_role: String,
    pub user_id: Option<Uuid>,
}

impl TenantContext {
    pub fn new(team_id: Uuid, user_role: impl Into<String>) -> Self {
        Self {
            team_id,
            user_role: user_role.into(),
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Used only by the system itself (auto-approval sweeps, batch jobs) where
    /// there is no human operator behind the call.
    pub fn system(team_id: Uuid) -> Self {
        Self::new(team_id, "system")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_user_attaches_user_id() {
        let team_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let ctx = TenantContext::new(team_id, "admin").with_user(user_id);
        assert_eq!(ctx.team_id, team_id);
        assert_eq!(ctx.user_role, "admin");
        assert_eq!(ctx.user_id, Some(user_id));
    }

    #[test]
    fn system_context_has_no_user() {
        let team_id = Uuid::new_v4();
        let ctx = TenantContext::system(team_id);
        assert_eq!(ctx.user_role, "system");
        assert!(ctx.user_id.is_none());
    }
}
