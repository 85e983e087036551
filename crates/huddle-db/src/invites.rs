//! Workspace invites.
//!
//! `pending` moves to `accepted` or `expired` and never back. Expiry is
//! lazy: a pending invite past its deadline is only rewritten to `expired`
//! when someone tries to accept it (or it is cancelled). Lookups report the
//! effective status without writing.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;
use uuid::Uuid;

use huddle_types::api::{AcceptInviteResponse, InviteDetails, InviteWorkspaceInfo, InviterInfo};
use huddle_types::models::{Invite, InviteRole, InviteStatus, normalize_email};

use crate::membership::{insert_member, query_role, require_member};
use crate::models::{INVITE_COLUMNS, invite_from_row, millis, truncate};
use crate::users::query_user;
use crate::workspaces::query_workspace;
use crate::{Database, Result, StoreError};

/// Lifetime of an invite when the caller doesn't pick one.
pub const DEFAULT_TTL_DAYS: i64 = 7;

/// Input for [`Database::create_invite`]. The token is minted by the caller.
#[derive(Debug, Clone)]
pub struct NewInvite<'a> {
    pub workspace_id: Uuid,
    pub email: &'a str,
    pub role: InviteRole,
    pub invited_by: Uuid,
    pub ttl: Duration,
    pub token: &'a str,
}

impl Database {
    /// Create an invite, or refresh the pending one for the same
    /// (workspace, email). A refresh keeps the existing token and updates
    /// role, inviter and expiry. Returns the invite and whether it was a
    /// refresh.
    pub fn create_invite(&self, new: NewInvite<'_>, now: DateTime<Utc>) -> Result<(Invite, bool)> {
        let email = normalize_email(new.email);
        let now = truncate(now);
        let expires_at = now + new.ttl;

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            query_workspace(&tx, new.workspace_id)?
                .ok_or_else(|| StoreError::not_found("workspace", new.workspace_id))?;
            require_member(&tx, new.workspace_id, new.invited_by)?;

            if let Some(existing) = user_by_email(&tx, &email)? {
                if query_role(&tx, new.workspace_id, existing)?.is_some() {
                    return Err(StoreError::Conflict("user is already a workspace member"));
                }
            }

            let refreshed = tx.execute(
                "UPDATE workspace_invites
                 SET role = ?3, invited_by = ?4, expires_at = ?5
                 WHERE workspace_id = ?1 AND email = ?2 AND status = 'pending'",
                params![
                    new.workspace_id.to_string(),
                    email,
                    new.role.as_str(),
                    new.invited_by.to_string(),
                    millis(expires_at)
                ],
            )? > 0;

            if !refreshed {
                tx.execute(
                    "INSERT INTO workspace_invites (id, workspace_id, email, invited_by, role, token, expires_at, status, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8)",
                    params![
                        Uuid::new_v4().to_string(),
                        new.workspace_id.to_string(),
                        email,
                        new.invited_by.to_string(),
                        new.role.as_str(),
                        new.token,
                        millis(expires_at),
                        millis(now)
                    ],
                )?;
            }

            let sql = format!(
                "SELECT {INVITE_COLUMNS} FROM workspace_invites
                 WHERE workspace_id = ?1 AND email = ?2 AND status = 'pending'"
            );
            let invite = tx.query_row(&sql, params![new.workspace_id.to_string(), email], invite_from_row)?;
            tx.commit()?;

            info!(
                "Invite {} for {} to workspace {} ({})",
                invite.id,
                invite.email,
                invite.workspace_id,
                if refreshed { "refreshed" } else { "created" }
            );
            Ok((invite, refreshed))
        })
    }

    pub fn get_invite(&self, id: Uuid) -> Result<Option<Invite>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {INVITE_COLUMNS} FROM workspace_invites WHERE id = ?1");
            Ok(conn.query_row(&sql, [id.to_string()], invite_from_row).optional()?)
        })
    }

    /// Look an invite up by token for display. Read-only: a pending invite
    /// past its deadline is reported as expired but left untouched.
    pub fn resolve_invite(&self, token: &str, now: DateTime<Utc>) -> Result<Option<InviteDetails>> {
        self.with_conn(|conn| {
            let Some(invite) = query_invite_by_token(conn, token)? else {
                return Ok(None);
            };

            let workspace = query_workspace(conn, invite.workspace_id)?.map(|w| InviteWorkspaceInfo {
                id: w.id,
                name: w.name,
                description: w.description,
            });
            let inviter = query_user(conn, invite.invited_by)?.map(|u| InviterInfo {
                name: u.name,
                email: u.email,
            });

            Ok(Some(InviteDetails {
                display_status: invite.effective_status(now),
                invite,
                workspace,
                inviter,
            }))
        })
    }

    /// Redeem an invite for `user_id`.
    ///
    /// Retrying after success with the same user reports `already_member`
    /// instead of failing. The pending-to-accepted flip is a conditional
    /// update, so of two racing accepts only one sees it succeed.
    pub fn accept_invite(&self, token: &str, user_id: Uuid, now: DateTime<Utc>) -> Result<AcceptInviteResponse> {
        let now = truncate(now);
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let invite = query_invite_by_token(&tx, token)?.ok_or(StoreError::InviteNotFound)?;

            match invite.status {
                InviteStatus::Accepted if invite.accepted_by == Some(user_id) => {
                    return Ok(AcceptInviteResponse {
                        workspace_id: invite.workspace_id,
                        already_member: true,
                    });
                }
                InviteStatus::Accepted | InviteStatus::Expired => return Err(StoreError::InviteAlreadyUsed),
                InviteStatus::Pending => {}
            }

            if invite.is_past_due(now) {
                tx.execute(
                    "UPDATE workspace_invites SET status = 'expired' WHERE id = ?1 AND status = 'pending'",
                    [invite.id.to_string()],
                )?;
                tx.commit()?;
                return Err(StoreError::InviteExpired);
            }

            let user = query_user(&tx, user_id)?.ok_or_else(|| StoreError::not_found("user", user_id))?;
            if normalize_email(&user.email) != invite.email {
                return Err(StoreError::EmailMismatch);
            }

            let flipped = tx.execute(
                "UPDATE workspace_invites SET status = 'accepted', accepted_at = ?2, accepted_by = ?3
                 WHERE id = ?1 AND status = 'pending'",
                params![invite.id.to_string(), millis(now), user_id.to_string()],
            )?;
            if flipped == 0 {
                return Err(StoreError::InviteAlreadyUsed);
            }

            let (_, inserted) = insert_member(&tx, invite.workspace_id, user_id, invite.role.into())?;
            tx.commit()?;

            info!("User {} joined workspace {} via invite {}", user_id, invite.workspace_id, invite.id);
            Ok(AcceptInviteResponse {
                workspace_id: invite.workspace_id,
                already_member: !inserted,
            })
        })
    }

    /// Retract a pending invite by forcing it to `expired`. Owners, admins
    /// and the original inviter may cancel.
    pub fn cancel_invite(&self, id: Uuid, requester: Uuid) -> Result<Invite> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {INVITE_COLUMNS} FROM workspace_invites WHERE id = ?1");
            let invite = conn
                .query_row(&sql, [id.to_string()], invite_from_row)
                .optional()?
                .ok_or(StoreError::InviteNotFound)?;

            let role = require_member(conn, invite.workspace_id, requester)?;
            if invite.invited_by != requester && !role.can_manage() {
                return Err(StoreError::Forbidden("only the inviter or an admin can cancel an invite"));
            }

            match invite.status {
                InviteStatus::Accepted => return Err(StoreError::InviteAlreadyUsed),
                InviteStatus::Expired => return Ok(invite),
                InviteStatus::Pending => {}
            }

            let changed = conn.execute(
                "UPDATE workspace_invites SET status = 'expired' WHERE id = ?1 AND status = 'pending'",
                [id.to_string()],
            )?;
            if changed == 0 {
                return Err(StoreError::InviteAlreadyUsed);
            }

            Ok(Invite {
                status: InviteStatus::Expired,
                ..invite
            })
        })
    }

    /// All invites for a workspace, newest first. Owners and admins only.
    pub fn list_invites(&self, workspace_id: Uuid, requester: Uuid) -> Result<Vec<Invite>> {
        self.with_conn(|conn| {
            if !require_member(conn, workspace_id, requester)?.can_manage() {
                return Err(StoreError::Forbidden("only owners and admins can list invites"));
            }
            let sql = format!(
                "SELECT {INVITE_COLUMNS} FROM workspace_invites
                 WHERE workspace_id = ?1 ORDER BY created_at DESC, rowid DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([workspace_id.to_string()], invite_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_invite_by_token(conn: &Connection, token: &str) -> Result<Option<Invite>> {
    let sql = format!("SELECT {INVITE_COLUMNS} FROM workspace_invites WHERE token = ?1");
    Ok(conn.query_row(&sql, [token], invite_from_row).optional()?)
}

fn user_by_email(conn: &Connection, email: &str) -> Result<Option<Uuid>> {
    let id: Option<String> = conn
        .query_row("SELECT id FROM users WHERE email = ?1", [email], |row| row.get(0))
        .optional()?;
    Ok(id.and_then(|id| id.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{db, now, user, workspace};
    use huddle_types::models::{Role, User};

    fn invite_for<'a>(ws: Uuid, inviter: &User, email: &'a str, token: &'a str) -> NewInvite<'a> {
        NewInvite {
            workspace_id: ws,
            email,
            role: InviteRole::Member,
            invited_by: inviter.id,
            ttl: Duration::days(DEFAULT_TTL_DAYS),
            token,
        }
    }

    #[test]
    fn accept_adds_member_with_invited_role() {
        let db = db();
        let ada = user(&db, "ada");
        let bob = user(&db, "bob");
        let ws = workspace(&db, &ada);
        let t0 = now();

        let mut new = invite_for(ws.id, &ada, "Bob@Example.com", "tok-1");
        new.role = InviteRole::Admin;
        let (invite, refreshed) = db.create_invite(new, t0).unwrap();
        assert!(!refreshed);
        assert_eq!(invite.email, "bob@example.com");

        let accepted = db.accept_invite("tok-1", bob.id, t0).unwrap();
        assert_eq!(accepted.workspace_id, ws.id);
        assert!(!accepted.already_member);
        assert_eq!(db.role(ws.id, bob.id).unwrap(), Some(Role::Admin));

        let stored = db.get_invite(invite.id).unwrap().unwrap();
        assert_eq!(stored.status, InviteStatus::Accepted);
        assert_eq!(stored.accepted_at, Some(truncate(t0)));
    }

    #[test]
    fn pending_invite_is_refreshed_not_duplicated() {
        let db = db();
        let ada = user(&db, "ada");
        let ws = workspace(&db, &ada);
        let t0 = now();

        let (first, _) = db.create_invite(invite_for(ws.id, &ada, "carol@example.com", "tok-a"), t0).unwrap();
        let mut again = invite_for(ws.id, &ada, "CAROL@example.com", "tok-b");
        again.role = InviteRole::Admin;
        let (second, refreshed) = db.create_invite(again, t0 + Duration::hours(1)).unwrap();

        assert!(refreshed);
        assert_eq!(first.id, second.id);
        assert_eq!(second.token, "tok-a");
        assert_eq!(second.role, InviteRole::Admin);
        assert!(second.expires_at > first.expires_at);
        assert_eq!(db.list_invites(ws.id, ada.id).unwrap().len(), 1);
    }

    #[test]
    fn existing_member_cannot_be_invited() {
        let db = db();
        let ada = user(&db, "ada");
        let bob = user(&db, "bob");
        let ws = workspace(&db, &ada);
        db.add_member(ws.id, bob.id, Role::Member).unwrap();

        assert!(matches!(
            db.create_invite(invite_for(ws.id, &ada, "bob@example.com", "t"), now()),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn expired_invite_transitions_on_accept() {
        let db = db();
        let ada = user(&db, "ada");
        let bob = user(&db, "bob");
        let ws = workspace(&db, &ada);
        let t0 = now();
        let (invite, _) = db.create_invite(invite_for(ws.id, &ada, "bob@example.com", "late"), t0).unwrap();

        let later = t0 + Duration::days(DEFAULT_TTL_DAYS + 1);
        let details = db.resolve_invite("late", later).unwrap().unwrap();
        assert_eq!(details.display_status, InviteStatus::Expired);
        assert_eq!(details.invite.status, InviteStatus::Pending);
        assert_eq!(details.inviter.unwrap().name, "ada");

        assert!(matches!(db.accept_invite("late", bob.id, later), Err(StoreError::InviteExpired)));
        assert_eq!(db.get_invite(invite.id).unwrap().unwrap().status, InviteStatus::Expired);
        assert!(matches!(db.accept_invite("late", bob.id, t0), Err(StoreError::InviteAlreadyUsed)));
        assert!(!db.is_member(ws.id, bob.id).unwrap());
    }

    #[test]
    fn email_binding_and_retry() {
        let db = db();
        let ada = user(&db, "ada");
        let bob = user(&db, "bob");
        let eve = user(&db, "eve");
        let ws = workspace(&db, &ada);
        let t0 = now();
        db.create_invite(invite_for(ws.id, &ada, "bob@example.com", "tok"), t0).unwrap();

        assert!(matches!(db.accept_invite("tok", eve.id, t0), Err(StoreError::EmailMismatch)));
        assert!(matches!(db.accept_invite("nope", bob.id, t0), Err(StoreError::InviteNotFound)));

        assert!(!db.accept_invite("tok", bob.id, t0).unwrap().already_member);
        assert!(db.accept_invite("tok", bob.id, t0).unwrap().already_member);
        assert_eq!(db.list_members(ws.id).unwrap().len(), 2);
    }

    #[test]
    fn cancel_only_pending() {
        let db = db();
        let ada = user(&db, "ada");
        let bob = user(&db, "bob");
        let ws = workspace(&db, &ada);
        let t0 = now();

        let (carol_invite, _) = db.create_invite(invite_for(ws.id, &ada, "carol@example.com", "c"), t0).unwrap();
        let cancelled = db.cancel_invite(carol_invite.id, ada.id).unwrap();
        assert_eq!(cancelled.status, InviteStatus::Expired);

        let (bob_invite, _) = db.create_invite(invite_for(ws.id, &ada, "bob@example.com", "b"), t0).unwrap();
        db.accept_invite("b", bob.id, t0).unwrap();
        assert!(matches!(db.cancel_invite(bob_invite.id, ada.id), Err(StoreError::InviteAlreadyUsed)));
        assert!(matches!(db.cancel_invite(Uuid::new_v4(), ada.id), Err(StoreError::InviteNotFound)));
    }

    #[test]
    fn cancelled_invite_frees_the_email_for_a_new_one() {
        let db = db();
        let ada = user(&db, "ada");
        let ws = workspace(&db, &ada);
        let t0 = now();

        let (first, _) = db.create_invite(invite_for(ws.id, &ada, "dan@example.com", "d1"), t0).unwrap();
        db.cancel_invite(first.id, ada.id).unwrap();
        let (second, refreshed) = db.create_invite(invite_for(ws.id, &ada, "dan@example.com", "d2"), t0).unwrap();

        assert!(!refreshed);
        assert_ne!(first.id, second.id);
        assert_eq!(second.token, "d2");
    }
}
