use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const STATUS_DRAFT: &str = "DRAFT";
pub const STATUS_IN_PROGRESS: &str = "IN_PROGRESS";
pub const STATUS_READY: &str = "READY";
pub const STATUS_FINAL: &str = "FINAL";
pub const STATUS_CANCELLED: &str = "CANCELLED";

pub const DOCUMENT_STATUSES: &[&str] = &[
    STATUS_DRAFT,
    STATUS_IN_PROGRESS,
    STATUS_READY,
    STATUS_FINAL,
    STATUS_CANCELLED,
];

/// Statuses a technician may still edit a document in.
const TECHNICIAN_EDITABLE: &[&str] = &[STATUS_DRAFT, STATUS_IN_PROGRESS, STATUS_READY];

pub fn is_terminal_status(status: &str) -> bool {
    status == STATUS_FINAL || status == STATUS_CANCELLED
}

pub fn is_valid_status(status: &str) -> bool {
    DOCUMENT_STATUSES.contains(&status)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Manager,
    Technician,
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Manager => "MANAGER",
            Role::Technician => "TECHNICIAN",
            Role::Client => "CLIENT",
        }
    }

    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "ADMIN" => Some(Role::Admin),
            "MANAGER" => Some(Role::Manager),
            "TECHNICIAN" => Some(Role::Technician),
            "CLIENT" => Some(Role::Client),
            _ => None,
        }
    }

    /// ADMIN and MANAGER get INTERNAL message visibility and cross-entity
    /// access; everyone else is scoped to their own rows.
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Admin | Role::Manager)
    }
}

/// The slice of a document the permission predicates need. Kept as plain
/// data so the rules stay testable without a database.
#[derive(Debug, Clone)]
pub struct DocumentAccess<'a> {
    pub status: &'a str,
    pub client_user_id: Option<Uuid>,
    pub technician_ids: &'a [Uuid],
}

impl DocumentAccess<'_> {
    fn is_assigned(&self, user_id: Uuid) -> bool {
        self.technician_ids.contains(&user_id)
    }
}

pub fn can_view_document(user_id: Uuid, role: Role, doc: &DocumentAccess<'_>) -> bool {
    if role.is_staff() {
        return true;
    }
    match role {
        Role::Technician => doc.is_assigned(user_id),
        // Clients only ever see their own, finalized documents.
        Role::Client => doc.status == STATUS_FINAL && doc.client_user_id == Some(user_id),
        _ => false,
    }
}

pub fn can_edit_document(user_id: Uuid, role: Role, doc: &DocumentAccess<'_>) -> bool {
    if role.is_staff() {
        return !is_terminal_status(doc.status);
    }
    role == Role::Technician
        && doc.is_assigned(user_id)
        && TECHNICIAN_EDITABLE.contains(&doc.status)
}

pub fn can_close_document(role: Role) -> bool {
    role.is_staff()
}

pub fn can_create_document(role: Role) -> bool {
    role.is_staff()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc<'a>(status: &'a str, client: Option<Uuid>, techs: &'a [Uuid]) -> DocumentAccess<'a> {
        DocumentAccess {
            status,
            client_user_id: client,
            technician_ids: techs,
        }
    }

    #[test]
    fn staff_sees_and_edits_everything_non_terminal() {
        let user = Uuid::new_v4();
        let d = doc(STATUS_DRAFT, None, &[]);
        assert!(can_view_document(user, Role::Admin, &d));
        assert!(can_edit_document(user, Role::Manager, &d));

        let closed = doc(STATUS_FINAL, None, &[]);
        assert!(can_view_document(user, Role::Manager, &closed));
        assert!(!can_edit_document(user, Role::Admin, &closed));

        let cancelled = doc(STATUS_CANCELLED, None, &[]);
        assert!(!can_edit_document(user, Role::Manager, &cancelled));
    }

    #[test]
    fn technician_requires_assignment() {
        let tech = Uuid::new_v4();
        let other = Uuid::new_v4();
        let assigned = [tech];

        let d = doc(STATUS_IN_PROGRESS, None, &assigned);
        assert!(can_view_document(tech, Role::Technician, &d));
        assert!(can_edit_document(tech, Role::Technician, &d));
        assert!(!can_view_document(other, Role::Technician, &d));
        assert!(!can_edit_document(other, Role::Technician, &d));
    }

    #[test]
    fn technician_cannot_edit_after_final() {
        let tech = Uuid::new_v4();
        let assigned = [tech];

        for status in [STATUS_DRAFT, STATUS_IN_PROGRESS, STATUS_READY] {
            let d = doc(status, None, &assigned);
            assert!(can_edit_document(tech, Role::Technician, &d), "{status}");
        }
        let final_doc = doc(STATUS_FINAL, None, &assigned);
        assert!(!can_edit_document(tech, Role::Technician, &final_doc));
        assert!(can_view_document(tech, Role::Technician, &final_doc));
    }

    #[test]
    fn client_sees_only_own_final_document() {
        let client = Uuid::new_v4();
        let other = Uuid::new_v4();

        let final_own = doc(STATUS_FINAL, Some(client), &[]);
        assert!(can_view_document(client, Role::Client, &final_own));
        assert!(!can_edit_document(client, Role::Client, &final_own));

        let draft_own = doc(STATUS_DRAFT, Some(client), &[]);
        assert!(!can_view_document(client, Role::Client, &draft_own));

        let final_other = doc(STATUS_FINAL, Some(other), &[]);
        assert!(!can_view_document(client, Role::Client, &final_other));
    }

    #[test]
    fn closing_is_staff_only() {
        assert!(can_close_document(Role::Admin));
        assert!(can_close_document(Role::Manager));
        assert!(!can_close_document(Role::Technician));
        assert!(!can_close_document(Role::Client));
    }

    #[test]
    fn role_round_trips_through_strings() {
        for role in [Role::Admin, Role::Manager, Role::Technician, Role::Client] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("SUPERUSER"), None);
    }
}
