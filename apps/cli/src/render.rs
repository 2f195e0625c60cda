//! Plain-text rendering of the view state.

use client_core::ViewState;
use shared::protocol::{Bookmark, Identity};

pub const EMPTY_LIST_TEXT: &str = "No bookmarks yet";

pub fn identity_label(identity: &Identity) -> String {
    identity
        .email
        .clone()
        .unwrap_or_else(|| identity.id.to_string())
}

fn bookmark_line(bookmark: &Bookmark) -> String {
    format!(
        "{}  {}  {}  <{}>",
        bookmark.id,
        bookmark.created_at.format("%Y-%m-%d %H:%M"),
        bookmark.title,
        bookmark.url
    )
}

pub fn render_view(state: &ViewState) -> String {
    let Some(identity) = &state.identity else {
        return "Not signed in. Run `bookmarks login` to sign in.\n".to_string();
    };

    let mut out = format!("Signed in as {}\n", identity_label(identity));
    if state.bookmarks.is_empty() {
        out.push_str(EMPTY_LIST_TEXT);
        out.push('\n');
        return out;
    }
    for bookmark in &state.bookmarks {
        out.push_str(&bookmark_line(bookmark));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use shared::domain::{BookmarkId, UserId};

    use super::*;

    fn alice() -> Identity {
        Identity {
            id: UserId::new(),
            email: Some("alice@example.com".to_string()),
        }
    }

    #[test]
    fn signed_out_view_prompts_login() {
        let rendered = render_view(&ViewState::default());
        assert!(rendered.contains("bookmarks login"));
    }

    #[test]
    fn empty_list_says_so() {
        let state = ViewState {
            identity: Some(alice()),
            ..ViewState::default()
        };
        let rendered = render_view(&state);
        assert_eq!(rendered, "Signed in as alice@example.com\nNo bookmarks yet\n");
    }

    #[test]
    fn bookmarks_render_in_list_order() {
        let user = alice();
        let id = BookmarkId(uuid::Uuid::nil());
        let state = ViewState {
            bookmarks: vec![
                Bookmark {
                    id,
                    title: "Example".to_string(),
                    url: "https://example.com".to_string(),
                    user_id: user.id,
                    created_at: Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 0).unwrap(),
                },
                Bookmark {
                    id,
                    title: "Docs".to_string(),
                    url: "https://docs.rs".to_string(),
                    user_id: user.id,
                    created_at: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
                },
            ],
            identity: Some(user),
            ..ViewState::default()
        };

        let lines: Vec<_> = render_view(&state).lines().map(str::to_string).collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[1],
            "00000000-0000-0000-0000-000000000000  2026-03-04 05:06  Example  <https://example.com>"
        );
        assert!(lines[2].contains("Docs"));
    }

    #[test]
    fn identity_without_email_falls_back_to_id() {
        let identity = Identity {
            id: UserId(uuid::Uuid::nil()),
            email: None,
        };
        assert_eq!(
            identity_label(&identity),
            "00000000-0000-0000-0000-000000000000"
        );
    }
}
