//! Identity-linkage embedding for ID tokens

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::storage::LinkedIdentity;

/// Build the `context` claim for `username`.
///
/// Each linked account that is still valid at `now` is embedded as
/// `context.user.<provider>.linked_<provider>_account` with its expiry.
/// Expired links are left out entirely.
pub fn build_user_context(username: &str, links: &[LinkedIdentity], now: DateTime<Utc>) -> Value {
    let mut user = Map::new();
    user.insert("name".into(), Value::String(username.to_string()));

    for link in links.iter().filter(|l| l.expires_at > now) {
        user.insert(
            link.provider.clone(),
            json!({
                format!("linked_{}_account", link.provider): link.account_id,
                format!("linked_{}_account_exp", link.provider): link.expires_at.timestamp(),
            }),
        );
    }

    json!({ "user": user })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn link(provider: &str, account: &str, expires_at: DateTime<Utc>) -> LinkedIdentity {
        LinkedIdentity {
            provider: provider.into(),
            account_id: account.into(),
            expires_at,
        }
    }

    #[test]
    fn test_no_links() {
        let context = build_user_context("alice", &[], Utc::now());
        assert_eq!(context, json!({"user": {"name": "alice"}}));
    }

    #[test]
    fn test_live_link_embedded() {
        let now = Utc::now();
        let expiry = now + Duration::hours(1);
        let context = build_user_context("alice", &[link("google", "alice@gmail.com", expiry)], now);

        assert_eq!(
            context["user"]["google"]["linked_google_account"],
            "alice@gmail.com"
        );
        assert_eq!(
            context["user"]["google"]["linked_google_account_exp"],
            expiry.timestamp()
        );
    }

    #[test]
    fn test_expired_link_omitted() {
        let now = Utc::now();
        let context = build_user_context(
            "alice",
            &[
                link("google", "alice@gmail.com", now - Duration::seconds(1)),
                link("orcid", "0000-0001", now + Duration::hours(1)),
            ],
            now,
        );

        assert!(context["user"].get("google").is_none());
        assert!(context["user"].get("orcid").is_some());
    }

    #[test]
    fn test_link_expiring_now_is_expired() {
        let now = Utc::now();
        let context = build_user_context("alice", &[link("google", "a", now)], now);
        assert!(context["user"].get("google").is_none());
    }
}
