//! Identity mapping policy.
//!
//! Turns verified claims into instructions for the host: which external ID to
//! link, whether the email may be trusted and overwritten, and whether the
//! account association may change. A single `allow_association_change` flag
//! governs both connecting to an existing account and revoking a link.

use crate::config::ProviderConfig;
use crate::validator::IdentityClaims;

/// An existing association between a host account and a provider subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountLink {
    /// Host user identifier.
    pub user_id: String,
    /// Provider subject the account is linked to.
    pub external_id: String,
}

impl AccountLink {
    /// Creates a link record.
    #[must_use]
    pub fn new(user_id: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            external_id: external_id.into(),
        }
    }
}

/// The host account signed in when the callback arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingAccount {
    /// Host user identifier.
    pub user_id: String,
    /// Current association with a provider subject, if any.
    pub link: Option<AccountLink>,
}

impl ExistingAccount {
    /// A signed-in account without a provider association.
    #[must_use]
    pub fn unlinked(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            link: None,
        }
    }

    /// A signed-in account linked to `external_id`.
    #[must_use]
    pub fn linked(user_id: impl Into<String>, external_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            link: Some(AccountLink::new(user_id.clone(), external_id)),
            user_id,
        }
    }
}

/// What the login means for the account association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    /// Anonymous login; the host finds or creates the account for the subject.
    Create,
    /// A signed-in account without a link gets connected to this subject.
    Connect,
    /// The account is already linked to this subject.
    Existing,
    /// The account is linked to a different subject.
    Replace,
}

/// Policy decisions for one verified login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityResolution {
    /// Provider subject identifier.
    pub external_id: String,
    /// Email released by the provider.
    pub email: Option<String>,
    /// Whether the email is verified.
    pub email_verified: bool,
    /// The host may overwrite the stored email on every login.
    pub email_update_permitted: bool,
    /// The identity may be connected to an existing account.
    pub link_change_permitted: bool,
    /// An existing link may be revoked.
    pub revoke_permitted: bool,
    /// Effect on the account association.
    pub link_action: LinkAction,
    /// Display name.
    pub name: Option<String>,
    /// Preferred username.
    pub username: Option<String>,
}

impl IdentityResolution {
    /// Returns `true` if the host may apply `link_action`.
    #[must_use]
    pub fn link_allowed(&self) -> bool {
        match self.link_action {
            LinkAction::Create | LinkAction::Existing => true,
            LinkAction::Connect | LinkAction::Replace => self.link_change_permitted,
        }
    }
}

/// Whether users may revoke the association.
#[must_use]
pub fn can_revoke(config: &ProviderConfig) -> bool {
    config.allow_association_change
}

/// Whether the identity may be connected to an existing account.
#[must_use]
pub fn can_connect_existing_user(config: &ProviderConfig) -> bool {
    config.allow_association_change
}

/// Whether the host should overwrite the stored email on every login.
#[must_use]
pub fn always_update_user_email(config: &ProviderConfig) -> bool {
    config.overrides_email
}

/// Resolves the policy for verified `claims`.
///
/// `account` is the host account signed in during the callback, `None` for
/// an anonymous login.
#[must_use]
pub fn resolve(
    claims: &IdentityClaims,
    config: &ProviderConfig,
    account: Option<&ExistingAccount>,
) -> IdentityResolution {
    let link_action = match account.map(|account| account.link.as_ref()) {
        None => LinkAction::Create,
        Some(None) => LinkAction::Connect,
        Some(Some(link)) if link.external_id == claims.subject => LinkAction::Existing,
        Some(Some(_)) => LinkAction::Replace,
    };

    IdentityResolution {
        external_id: claims.subject.clone(),
        email: claims.email.clone(),
        email_verified: claims.email_verified,
        email_update_permitted: always_update_user_email(config),
        link_change_permitted: can_connect_existing_user(config),
        revoke_permitted: can_revoke(config),
        link_action,
        name: claims.name.clone(),
        username: claims.username.clone(),
    }
}
