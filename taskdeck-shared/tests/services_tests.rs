/// Integration tests for the domain services
///
/// These tests require a running PostgreSQL database and are skipped when
/// `DATABASE_URL` is not set. Every test creates its own users and projects, so
/// they can share one database.

use chrono::{Duration, Utc};
use sqlx::PgPool;
use taskdeck_shared::auth::otp::{verify_code, FixedOtpGenerator};
use taskdeck_shared::auth::password::hash_password;
use taskdeck_shared::auth::totp::generate_secret;
use taskdeck_shared::db::migrations::run_migrations;
use taskdeck_shared::models::invitation::{invite_reference, Invitation};
use taskdeck_shared::models::membership::{Membership, MembershipRole};
use taskdeck_shared::models::notification::Notification;
use taskdeck_shared::models::otp_token::OtpToken;
use taskdeck_shared::models::project::Project;
use taskdeck_shared::models::task::{Task, TaskFields, TaskStatus};
use taskdeck_shared::models::user::{CreateUser, User};
use taskdeck_shared::services::auth::{self, AuthSettings, AuthStep, Registration};
use taskdeck_shared::services::{invitations, notifications, projects, ServiceError};
use taskdeck_shared::session::SessionData;
use uuid::Uuid;

async fn test_pool() -> Option<PgPool> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping");
        return None;
    };

    let pool = PgPool::connect(&url).await.expect("Failed to connect");
    run_migrations(&pool).await.expect("Migrations failed");
    Some(pool)
}

fn settings() -> AuthSettings {
    AuthSettings {
        app_name: "Taskdeck".to_string(),
        otp_expiration_minutes: 10,
    }
}

fn unique_email(label: &str) -> String {
    format!("{}-{}@example.com", label, Uuid::new_v4())
}

async fn verified_user(pool: &PgPool, name: &str) -> User {
    let user = User::create(
        pool,
        CreateUser {
            email: unique_email(name),
            name: name.to_string(),
            password_hash: hash_password("password123").unwrap(),
        },
    )
    .await
    .unwrap();

    User::mark_verified(pool, user.id).await.unwrap();
    User::find_by_id(pool, user.id).await.unwrap().unwrap()
}

fn fields(title: &str, assignee_id: Option<Uuid>) -> TaskFields {
    TaskFields {
        title: title.to_string(),
        description: None,
        due_date: None,
        status: TaskStatus::Todo,
        assignee_id,
    }
}

/// Project owned by `owner` with `member` as an active member
async fn shared_project(pool: &PgPool, owner: &User, member: &User) -> Uuid {
    let mut conn = pool.acquire().await.unwrap();
    let project = projects::create_project(&mut conn, owner.id, "Site Launch", None)
        .await
        .unwrap();
    Membership::activate(&mut *conn, project.id, member.id, MembershipRole::Member)
        .await
        .unwrap();
    project.id
}

#[tokio::test]
async fn test_reissued_code_invalidates_previous() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let mut conn = pool.acquire().await.unwrap();
    let mut session = SessionData::default();
    let email = unique_email("otp");

    let outcome = auth::register(
        &mut conn,
        &mut session,
        &FixedOtpGenerator::new("111111"),
        &settings(),
        Registration {
            email: email.clone(),
            name: "Ada".to_string(),
            password: "password123".to_string(),
        },
    )
    .await
    .unwrap();
    assert_eq!(outcome.next, AuthStep::VerifyOtp);
    assert!(outcome.email.unwrap().body.contains("111111"));

    let user_id = session.pending_user_id.expect("pending user");

    auth::resend_otp(&mut conn, &mut session, &FixedOtpGenerator::new("222222"), &settings())
        .await
        .unwrap();
    assert_eq!(OtpToken::count_unused(&mut *conn, user_id).await.unwrap(), 1);

    let rejected = auth::verify_otp(&mut conn, &mut session, "111111").await.unwrap();
    assert_eq!(rejected.next, AuthStep::VerifyOtp);

    let accepted = auth::verify_otp(&mut conn, &mut session, "222222").await.unwrap();
    assert_eq!(accepted.next, AuthStep::Login);
    assert!(User::find_by_id(&mut *conn, user_id).await.unwrap().unwrap().is_verified);
}

#[tokio::test]
async fn test_expired_code_is_rejected() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let user = verified_user(&pool, "expired").await;
    let mut conn = pool.acquire().await.unwrap();

    OtpToken::create(&mut *conn, user.id, "333333", Utc::now() - Duration::minutes(1))
        .await
        .unwrap();

    assert!(!verify_code(&mut conn, user.id, "333333").await.unwrap());
}

#[tokio::test]
async fn test_registering_a_verified_email_is_refused() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let existing = verified_user(&pool, "taken").await;
    let mut conn = pool.acquire().await.unwrap();
    let mut session = SessionData::default();

    let outcome = auth::register(
        &mut conn,
        &mut session,
        &FixedOtpGenerator::new("123456"),
        &settings(),
        Registration {
            email: existing.email.to_uppercase(),
            name: "Someone".to_string(),
            password: "password123".to_string(),
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.next, AuthStep::Register);
    assert!(outcome.email.is_none());
    assert_eq!(session.flashes[0].message, "Email is already registered.");
}

#[tokio::test]
async fn test_two_factor_secret_generation_is_idempotent() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let user = verified_user(&pool, "totp").await;
    let mut conn = pool.acquire().await.unwrap();

    let first = auth::two_factor_enrollment(&mut conn, &user, &settings()).await.unwrap();
    let second = auth::two_factor_enrollment(&mut conn, &user, &settings()).await.unwrap();

    assert_eq!(first.provisioning_uri, second.provisioning_uri);
    assert!(first.qr_data_url.starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn test_new_login_replaces_earlier_attempt() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let enrolling = verified_user(&pool, "enrolling").await;
    let enrolled = verified_user(&pool, "enrolled").await;
    User::set_two_factor_secret_if_absent(&pool, enrolled.id, &generate_secret())
        .await
        .unwrap();

    let mut conn = pool.acquire().await.unwrap();
    let mut session = SessionData::default();
    let generator = FixedOtpGenerator::new("123456");

    let outcome = auth::login(
        &mut conn,
        &mut session,
        &generator,
        &settings(),
        &enrolling.email,
        "password123",
    )
    .await
    .unwrap();
    assert_eq!(outcome.next, AuthStep::SetupTwoFactor);
    assert_eq!(session.setup_2fa_user_id, Some(enrolling.id));

    let outcome = auth::login(
        &mut conn,
        &mut session,
        &generator,
        &settings(),
        &enrolled.email,
        "password123",
    )
    .await
    .unwrap();
    assert_eq!(outcome.next, AuthStep::VerifyTwoFactor);
    assert_eq!(session.pending_2fa_user_id, Some(enrolled.id));
    assert_eq!(session.setup_2fa_user_id, None);

    // The first user's enrollment page is no longer reachable
    assert!(auth::enrollment_user(&mut conn, &session).await.unwrap().is_none());

    let outcome = auth::login(
        &mut conn,
        &mut session,
        &generator,
        &settings(),
        &enrolled.email,
        "wrong password",
    )
    .await
    .unwrap();
    assert_eq!(outcome.next, AuthStep::Login);
    assert_eq!(session.pending_2fa_user_id, None);
}

#[tokio::test]
async fn test_registration_replaces_earlier_attempt() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let earlier = verified_user(&pool, "earlier").await;
    let mut conn = pool.acquire().await.unwrap();
    let mut session = SessionData {
        setup_2fa_user_id: Some(earlier.id),
        pending_2fa_user_id: Some(earlier.id),
        ..Default::default()
    };

    auth::register(
        &mut conn,
        &mut session,
        &FixedOtpGenerator::new("123456"),
        &settings(),
        Registration {
            email: unique_email("fresh"),
            name: "Grace".to_string(),
            password: "password123".to_string(),
        },
    )
    .await
    .unwrap();

    assert!(session.pending_user_id.is_some());
    assert_ne!(session.pending_user_id, Some(earlier.id));
    assert_eq!(session.setup_2fa_user_id, None);
    assert_eq!(session.pending_2fa_user_id, None);
}

#[tokio::test]
async fn test_member_cannot_edit_foreign_task() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let owner = verified_user(&pool, "owner").await;
    let member = verified_user(&pool, "member").await;
    let project_id = shared_project(&pool, &owner, &member).await;
    let mut conn = pool.acquire().await.unwrap();

    let task = projects::create_task(&mut conn, project_id, owner.id, fields("Owner task", None))
        .await
        .unwrap();

    let result =
        projects::update_task(&mut conn, project_id, task.id, member.id, fields("Hijacked", None)).await;
    assert!(matches!(result, Err(ServiceError::Rejected(_))));

    let updated =
        projects::update_task(&mut conn, project_id, task.id, owner.id, fields("Renamed", Some(member.id)))
            .await
            .unwrap();
    assert_eq!(updated.title, "Renamed");

    // Now assigned, the member may edit it
    let by_member =
        projects::update_task(&mut conn, project_id, task.id, member.id, fields("Mine now", Some(member.id)))
            .await
            .unwrap();
    assert_eq!(by_member.title, "Mine now");
}

#[tokio::test]
async fn test_member_may_only_assign_self() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let owner = verified_user(&pool, "owner").await;
    let member = verified_user(&pool, "member").await;
    let project_id = shared_project(&pool, &owner, &member).await;
    let mut conn = pool.acquire().await.unwrap();

    let result =
        projects::create_task(&mut conn, project_id, member.id, fields("For owner", Some(owner.id))).await;
    assert!(matches!(result, Err(ServiceError::Rejected(_))));

    let own = projects::create_task(&mut conn, project_id, member.id, fields("Mine", Some(member.id)))
        .await
        .unwrap();
    assert_eq!(own.assigned_to_id, Some(member.id));
}

#[tokio::test]
async fn test_outsider_is_forbidden() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let owner = verified_user(&pool, "owner").await;
    let member = verified_user(&pool, "member").await;
    let outsider = verified_user(&pool, "outsider").await;
    let project_id = shared_project(&pool, &owner, &member).await;
    let mut conn = pool.acquire().await.unwrap();

    let result = projects::project_detail(&mut conn, project_id, outsider.id).await;
    assert!(matches!(result, Err(ServiceError::Forbidden)));

    let result = projects::delete_project(&mut conn, project_id, member.id).await;
    assert!(matches!(result, Err(ServiceError::Forbidden)));

    let detail = projects::project_detail(&mut conn, project_id, member.id).await.unwrap();
    assert!(!detail.is_owner);
    assert_eq!(detail.members.len(), 2);
    assert_eq!(detail.members[0].user_id, owner.id);
    assert_eq!(detail.assignee_options.len(), 1);
}

#[tokio::test]
async fn test_move_task_rejects_unknown_status() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let owner = verified_user(&pool, "owner").await;
    let member = verified_user(&pool, "member").await;
    let project_id = shared_project(&pool, &owner, &member).await;
    let mut conn = pool.acquire().await.unwrap();

    let task = projects::create_task(&mut conn, project_id, owner.id, fields("Board", None))
        .await
        .unwrap();

    let result = projects::move_task(&mut conn, project_id, task.id, member.id, Some("blocked")).await;
    assert!(matches!(result, Err(ServiceError::Invalid(_))));

    let unchanged = Task::find_in_project(&mut *conn, project_id, task.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, TaskStatus::Todo);

    let moved = projects::move_task(&mut conn, project_id, task.id, member.id, Some("done"))
        .await
        .unwrap();
    assert_eq!(moved, TaskStatus::Done);
}

#[tokio::test]
async fn test_reinvite_with_pending_invitation_is_rejected() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let owner = verified_user(&pool, "owner").await;
    let invitee = verified_user(&pool, "invitee").await;
    let mut conn = pool.acquire().await.unwrap();

    let project = projects::create_project(&mut conn, owner.id, "Site Launch", None)
        .await
        .unwrap();

    let sent = invitations::invite_member(&mut conn, project.id, &owner, &invitee.email)
        .await
        .unwrap();
    assert_eq!(sent.email.to, invitee.email);

    match invitations::invite_member(&mut conn, project.id, &owner, &invitee.email).await {
        Err(ServiceError::Rejected(flash)) => assert_eq!(flash.message, "Invitation already sent."),
        other => panic!("unexpected {:?}", other),
    }

    match invitations::invite_member(&mut conn, project.id, &owner, &unique_email("nobody")).await {
        Err(ServiceError::Rejected(flash)) => assert_eq!(flash.message, "This email is not registered."),
        other => panic!("unexpected {:?}", other),
    }

    assert_eq!(
        Invitation::count_for(&mut *conn, project.id, invitee.id).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_accepting_invitation_activates_membership() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let owner = verified_user(&pool, "owner").await;
    let invitee = verified_user(&pool, "invitee").await;
    let mut conn = pool.acquire().await.unwrap();

    let project = projects::create_project(&mut conn, owner.id, "Site Launch", None)
        .await
        .unwrap();
    let sent = invitations::invite_member(&mut conn, project.id, &owner, &invitee.email)
        .await
        .unwrap();
    let reference = invite_reference(sent.invitation.id);

    assert!(Notification::find_by_reference(&mut *conn, invitee.id, &reference)
        .await
        .unwrap()
        .is_some());

    let result = invitations::handle_invitation(&mut conn, sent.invitation.id, owner.id, "accept").await;
    assert!(matches!(result, Err(ServiceError::Forbidden)));

    invitations::handle_invitation(&mut conn, sent.invitation.id, invitee.id, "accept")
        .await
        .unwrap();

    assert!(Membership::is_active_member(&mut *conn, project.id, invitee.id).await.unwrap());
    assert!(Notification::find_by_reference(&mut *conn, invitee.id, &reference)
        .await
        .unwrap()
        .is_none());

    match invitations::handle_invitation(&mut conn, sent.invitation.id, invitee.id, "decline").await {
        Err(ServiceError::Rejected(flash)) => {
            assert_eq!(flash.message, "This invitation has already been handled.")
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_declining_invitation_leaves_memberships_unchanged() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let owner = verified_user(&pool, "owner").await;
    let invitee = verified_user(&pool, "invitee").await;
    let mut conn = pool.acquire().await.unwrap();

    let project = projects::create_project(&mut conn, owner.id, "Site Launch", None)
        .await
        .unwrap();
    let sent = invitations::invite_member(&mut conn, project.id, &owner, &invitee.email)
        .await
        .unwrap();

    invitations::handle_invitation(&mut conn, sent.invitation.id, invitee.id, "decline")
        .await
        .unwrap();

    assert!(!Membership::is_active_member(&mut *conn, project.id, invitee.id).await.unwrap());
    assert!(Membership::find(&mut *conn, project.id, invitee.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_deadline_notifications_cover_window() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let owner = verified_user(&pool, "owner").await;
    let member = verified_user(&pool, "member").await;
    let project_id = shared_project(&pool, &owner, &member).await;
    let mut conn = pool.acquire().await.unwrap();
    let now = Utc::now();

    let soon = TaskFields {
        due_date: Some(now + Duration::days(1)),
        ..fields("Due soon", Some(member.id))
    };
    let later = TaskFields {
        due_date: Some(now + Duration::days(5)),
        ..fields("Due later", Some(member.id))
    };
    let soon = projects::create_task(&mut conn, project_id, owner.id, soon).await.unwrap();
    projects::create_task(&mut conn, project_id, owner.id, later).await.unwrap();

    let written = notifications::ensure_deadline_notifications(&mut conn, member.id, 2, now)
        .await
        .unwrap();
    assert_eq!(written, 1);

    let reference = notifications::deadline_reference(soon.id, member.id);
    let notification = Notification::find_by_reference(&mut *conn, member.id, &reference)
        .await
        .unwrap()
        .expect("deadline notification");
    assert!(!notification.is_read);
    assert_eq!(notification.payload["task_title"], "Due soon");

    // The owner sees tasks of owned projects too
    let for_owner = notifications::ensure_deadline_notifications(&mut conn, owner.id, 2, now)
        .await
        .unwrap();
    assert_eq!(for_owner, 1);

    // Marking read, then refreshing, makes it unread again
    notifications::mark_read(&mut conn, member.id, notification.id).await.unwrap();
    notifications::ensure_deadline_notifications(&mut conn, member.id, 2, now)
        .await
        .unwrap();
    let refreshed = Notification::find_by_reference(&mut *conn, member.id, &reference)
        .await
        .unwrap()
        .unwrap();
    assert!(!refreshed.is_read);

    let missing = notifications::mark_read(&mut conn, owner.id, notification.id).await;
    assert!(matches!(missing, Err(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn test_deleting_project_removes_tasks() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let owner = verified_user(&pool, "owner").await;
    let member = verified_user(&pool, "member").await;
    let project_id = shared_project(&pool, &owner, &member).await;
    let mut conn = pool.acquire().await.unwrap();

    let task = projects::create_task(&mut conn, project_id, owner.id, fields("Temp", None))
        .await
        .unwrap();

    projects::delete_project(&mut conn, project_id, owner.id).await.unwrap();

    assert!(Project::find_by_id(&mut *conn, project_id).await.unwrap().is_none());
    assert!(Task::find_in_project(&mut *conn, project_id, task.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_project_creation_is_all_or_nothing() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let owner = verified_user(&pool, "atomic").await;
    let name = format!("Half-made {}", Uuid::new_v4());

    // A temporary table shadows `memberships` on this connection only, so the
    // project insert succeeds and the membership insert fails.
    let mut conn = pool.acquire().await.unwrap();
    sqlx::query("CREATE TEMP TABLE memberships (id UUID)")
        .execute(&mut *conn)
        .await
        .unwrap();

    let result = projects::create_project(&mut conn, owner.id, &name, None).await;
    assert!(matches!(result, Err(ServiceError::Database(_))), "{:?}", result);

    sqlx::query("DROP TABLE pg_temp.memberships")
        .execute(&mut *conn)
        .await
        .unwrap();
    drop(conn);

    let projects_left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects WHERE name = $1")
        .bind(&name)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(projects_left, 0);

    let memberships_left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM memberships WHERE user_id = $1")
        .bind(owner.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(memberships_left, 0);

    // The same call on a clean connection stores both rows
    let mut conn = pool.acquire().await.unwrap();
    let summary = projects::create_project(&mut conn, owner.id, &name, None).await.unwrap();
    assert!(Membership::is_active_member(&mut *conn, summary.id, owner.id).await.unwrap());
}
