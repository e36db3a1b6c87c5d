/// Inviting members and answering invitations

use sqlx::PgConnection;
use uuid::Uuid;

use super::{is_unique_violation, notifications, ServiceError};
use crate::auth::authorization::ProjectAccess;
use crate::mail::{invitation_email, OutgoingEmail};
use crate::models::invitation::{Invitation, InvitationStatus};
use crate::models::membership::{Membership, MembershipRole};
use crate::models::user::User;
use crate::session::Flash;

/// Answer to an invitation, as given in the URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationAction {
    Accept,
    Decline,
}

impl InvitationAction {
    /// Parses the URL segment; anything else is `None`
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "accept" => Some(InvitationAction::Accept),
            "decline" => Some(InvitationAction::Decline),
            _ => None,
        }
    }

    fn status(&self) -> InvitationStatus {
        match self {
            InvitationAction::Accept => InvitationStatus::Accepted,
            InvitationAction::Decline => InvitationStatus::Declined,
        }
    }
}

/// A created invitation and the email to send after commit
#[derive(Debug, Clone)]
pub struct SentInvitation {
    pub invitation: Invitation,
    pub email: OutgoingEmail,
}

/// Invites a registered user to the project; owner only
///
/// Rejections (unknown email, already a member, invitation pending) write
/// nothing.
pub async fn invite_member(
    conn: &mut PgConnection,
    project_id: Uuid,
    inviter: &User,
    email: &str,
) -> Result<SentInvitation, ServiceError> {
    let access = ProjectAccess::load_owner(conn, project_id, inviter.id).await?;

    let invitee = User::find_by_email(&mut *conn, email)
        .await?
        .ok_or_else(|| ServiceError::rejected(Flash::danger("This email is not registered.")))?;

    if invitee.id == access.project.owner_id
        || Membership::is_active_member(&mut *conn, project_id, invitee.id).await?
    {
        return Err(ServiceError::rejected(Flash::info(
            "User is already a member of this project.",
        )));
    }

    if Invitation::has_pending(&mut *conn, project_id, invitee.id).await? {
        return Err(already_sent());
    }

    let invitation = match Invitation::create(&mut *conn, project_id, inviter.id, invitee.id).await {
        Ok(invitation) => invitation,
        Err(e) if is_unique_violation(&e) => return Err(already_sent()),
        Err(e) => return Err(e.into()),
    };

    notifications::notify_invitation(conn, &invitation, &access.project, &inviter.name).await?;

    tracing::info!(
        invitation_id = %invitation.id,
        %project_id,
        invitee_id = %invitee.id,
        "Invitation created"
    );

    Ok(SentInvitation {
        email: invitation_email(&invitee.email, &invitee.name, &inviter.name, &access.project.name),
        invitation,
    })
}

/// Accepts or declines an invitation addressed to `actor_id`
///
/// Accepting activates a member membership, reusing an inactive one. Both
/// answers drop the invite notification.
pub async fn handle_invitation(
    conn: &mut PgConnection,
    invitation_id: Uuid,
    actor_id: Uuid,
    action: &str,
) -> Result<InvitationAction, ServiceError> {
    let invitation = Invitation::find_by_id(&mut *conn, invitation_id)
        .await?
        .ok_or(ServiceError::NotFound("Invitation"))?;

    if invitation.invitee_id != actor_id {
        return Err(ServiceError::Forbidden);
    }

    if invitation.status != InvitationStatus::Pending {
        return Err(ServiceError::rejected(Flash::info(
            "This invitation has already been handled.",
        )));
    }

    let action = InvitationAction::parse(action)
        .ok_or_else(|| ServiceError::rejected(Flash::danger("Unknown action.")))?;

    // Lost a race with a concurrent answer
    if Invitation::respond(&mut *conn, invitation.id, action.status())
        .await?
        .is_none()
    {
        return Err(ServiceError::rejected(Flash::info(
            "This invitation has already been handled.",
        )));
    }

    if action == InvitationAction::Accept {
        Membership::activate(&mut *conn, invitation.project_id, actor_id, MembershipRole::Member)
            .await?;
    }

    notifications::remove_invite(conn, actor_id, invitation.id).await?;

    tracing::info!(%invitation_id, ?action, "Invitation answered");
    Ok(action)
}

fn already_sent() -> ServiceError {
    ServiceError::rejected(Flash::warning("Invitation already sent."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action() {
        assert_eq!(InvitationAction::parse("accept"), Some(InvitationAction::Accept));
        assert_eq!(InvitationAction::parse("decline"), Some(InvitationAction::Decline));
        assert_eq!(InvitationAction::parse("ACCEPT"), None);
        assert_eq!(InvitationAction::parse("ignore"), None);
    }

    #[test]
    fn test_action_status() {
        assert_eq!(InvitationAction::Accept.status(), InvitationStatus::Accepted);
        assert_eq!(InvitationAction::Decline.status(), InvitationStatus::Declined);
    }
}
