use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use wsgate_common::IngressMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    ApiKey,
    Oauth,
}

/// Identity + capability record for one upstream account. Provisioning and
/// token refresh happen outside the gateway; records arrive ready to use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    pub group_id: String,
    pub credential_kind: CredentialKind,
    /// API key or refreshed OAuth access token.
    pub bearer: String,
    /// Hard upper bound on live contexts for this account.
    pub concurrency: usize,
    /// `openai_apikey_responses_websockets_v2_mode` override.
    #[serde(default)]
    pub apikey_ws_mode: Option<IngressMode>,
    /// `openai_oauth_responses_websockets_v2_mode` override.
    #[serde(default)]
    pub oauth_ws_mode: Option<IngressMode>,
    /// When set, the dialer presents this Codex-style user-agent and the
    /// matching `originator`.
    #[serde(default)]
    pub codex_user_agent: Option<String>,
    #[serde(default)]
    pub beta_header: Option<String>,
}

impl Account {
    pub fn ws_mode(&self, default: IngressMode) -> IngressMode {
        let per_kind = match self.credential_kind {
            CredentialKind::ApiKey => self.apikey_ws_mode,
            CredentialKind::Oauth => self.oauth_ws_mode,
        };
        per_kind.unwrap_or(default)
    }
}

#[derive(Debug, Default)]
pub struct AccountSnapshot {
    by_id: HashMap<String, Arc<Account>>,
    by_group: HashMap<String, Vec<Arc<Account>>>,
}

impl AccountSnapshot {
    pub fn new(accounts: Vec<Account>) -> Self {
        let mut by_id = HashMap::with_capacity(accounts.len());
        let mut by_group: HashMap<String, Vec<Arc<Account>>> = HashMap::new();
        for account in accounts {
            let account = Arc::new(account);
            by_group
                .entry(account.group_id.clone())
                .or_default()
                .push(account.clone());
            by_id.insert(account.account_id.clone(), account);
        }
        Self { by_id, by_group }
    }
}

/// Read-mostly account registry; snapshots are replaced whole on reload so
/// live pools never observe a half-applied update.
pub struct AccountRegistry {
    snapshot: ArcSwap<AccountSnapshot>,
}

impl AccountRegistry {
    pub fn new(snapshot: AccountSnapshot) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn replace_snapshot(&self, snapshot: AccountSnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }

    pub fn get(&self, account_id: &str) -> Option<Arc<Account>> {
        self.snapshot.load().by_id.get(account_id).cloned()
    }

    pub fn group(&self, group_id: &str) -> Vec<Arc<Account>> {
        self.snapshot
            .load()
            .by_group
            .get(group_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str, kind: CredentialKind) -> Account {
        Account {
            account_id: id.to_string(),
            group_id: "g1".to_string(),
            credential_kind: kind,
            bearer: "sk-test".to_string(),
            concurrency: 2,
            apikey_ws_mode: None,
            oauth_ws_mode: Some(IngressMode::CtxPool),
            codex_user_agent: None,
            beta_header: None,
        }
    }

    #[test]
    fn ws_mode_prefers_per_kind_override() {
        let apikey = account("a1", CredentialKind::ApiKey);
        assert_eq!(apikey.ws_mode(IngressMode::Dedicated), IngressMode::Dedicated);

        let oauth = account("a2", CredentialKind::Oauth);
        assert_eq!(oauth.ws_mode(IngressMode::Dedicated), IngressMode::CtxPool);
    }

    #[test]
    fn registry_snapshot_replace() {
        let registry = AccountRegistry::new(AccountSnapshot::new(vec![account(
            "a1",
            CredentialKind::ApiKey,
        )]));
        assert!(registry.get("a1").is_some());
        assert_eq!(registry.group("g1").len(), 1);

        registry.replace_snapshot(AccountSnapshot::new(vec![
            account("a1", CredentialKind::ApiKey),
            account("a2", CredentialKind::Oauth),
        ]));
        assert_eq!(registry.group("g1").len(), 2);
    }
}
