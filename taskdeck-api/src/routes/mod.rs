/// Route handlers
///
/// This module contains all route handlers organized by area:
///
/// - `health`: Health check endpoint
/// - `auth`: Registration, email verification, login and two-factor steps
/// - `dashboard`: Home view, profile and notifications
/// - `projects`: Project boards, tasks and invitations
///
/// Form posts answer `303 See Other` and leave a flash message in the session.
/// Pages are JSON view models; each one drains pending flash messages into its
/// `messages` field.

pub mod auth;
pub mod dashboard;
pub mod health;
pub mod projects;

use axum::http::{header, HeaderMap};
use serde::Serialize;
use taskdeck_shared::session::Flash;

/// Page payload plus the flash messages to show with it
#[derive(Debug, Serialize)]
pub struct View<T> {
    #[serde(flatten)]
    pub data: T,
    pub messages: Vec<Flash>,
}

impl<T: Serialize> View<T> {
    pub fn new(data: T, messages: Vec<Flash>) -> Self {
        Self { data, messages }
    }
}

/// Path of the page the request came from, or `fallback`
///
/// Only the path and query of the `Referer` are kept, so the redirect always
/// stays on this site.
pub fn back_or(headers: &HeaderMap, fallback: &str) -> String {
    headers
        .get(header::REFERER)
        .and_then(|value| value.to_str().ok())
        .and_then(referer_path)
        .unwrap_or_else(|| fallback.to_string())
}

fn referer_path(referer: &str) -> Option<String> {
    let path = match referer.split_once("://") {
        Some((_, rest)) => &rest[rest.find('/')?..],
        None => referer,
    };

    (path.starts_with('/') && !path.starts_with("//")).then(|| path.to_string())
}

/// Whether the client asked for a JSON answer to a form post
pub fn wants_json(headers: &HeaderMap) -> bool {
    let ajax = headers
        .get("x-requested-with")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == "XMLHttpRequest");

    let accepts_json = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("application/json") || value.contains("*/*"));

    ajax && accepts_json
}
