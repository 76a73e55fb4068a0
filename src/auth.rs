//! Credentials and the authorization gate.
//!
//! Every operation is authorized before any resource or lease state is
//! read, so an unauthorized caller learns nothing beyond a generic
//! `AuthorizationFailed`.  Callers present one of:
//!
//! - the account key (`Authorization: SharedKey <account>:<key>`), which
//!   grants everything;
//! - an account-scoped delegation token, limited by service, resource
//!   type, permission letters and a validity window;
//! - a container- or blob-scoped delegation token, limited by scope,
//!   permission letters and a validity window.
//!
//! Delegation tokens are opaque strings registered in configuration and
//! presented through the `sig` query parameter.  No signatures are
//! computed here.

use std::fmt;

use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::config::{AuthConfig, TokenConfig, TokenKind};
use crate::errors::LeaseError;
use crate::storage::backend::{ResourceKind, ResourceRef};

// ── Permissions ─────────────────────────────────────────────────────

/// A single permission letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Read,
    Add,
    Create,
    Write,
    Delete,
    List,
}

impl Permission {
    /// Canonical letter order.
    const ALL: [Permission; 6] = [
        Permission::Read,
        Permission::Add,
        Permission::Create,
        Permission::Write,
        Permission::Delete,
        Permission::List,
    ];

    fn letter(self) -> char {
        match self {
            Permission::Read => 'r',
            Permission::Add => 'a',
            Permission::Create => 'c',
            Permission::Write => 'w',
            Permission::Delete => 'd',
            Permission::List => 'l',
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// A set of permission letters such as `rwdl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions(u8);

impl Permissions {
    /// Parse permission letters.  Unknown letters are rejected.
    pub fn parse(letters: &str) -> Result<Self, String> {
        let mut bits = 0u8;
        for ch in letters.chars() {
            let permission = Permission::ALL
                .iter()
                .find(|p| p.letter() == ch)
                .ok_or_else(|| format!("unknown permission letter '{ch}' in \"{letters}\""))?;
            bits |= permission.bit();
        }
        Ok(Self(bits))
    }

    pub fn all() -> Self {
        Self(Permission::ALL.iter().fold(0, |acc, p| acc | p.bit()))
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.0 & permission.bit() != 0
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for p in Permission::ALL {
            if self.contains(p) {
                write!(f, "{}", p.letter())?;
            }
        }
        Ok(())
    }
}

/// Services an account token covers (`ss`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Services {
    pub blob: bool,
    pub file: bool,
    pub queue: bool,
    pub table: bool,
}

impl Services {
    pub fn parse(letters: &str) -> Result<Self, String> {
        let mut services = Services::default();
        for ch in letters.chars() {
            match ch {
                'b' => services.blob = true,
                'f' => services.file = true,
                'q' => services.queue = true,
                't' => services.table = true,
                _ => return Err(format!("unknown service letter '{ch}' in \"{letters}\"")),
            }
        }
        Ok(services)
    }
}

/// Resource types an account token covers (`srt`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceTypes {
    pub service: bool,
    pub container: bool,
    pub object: bool,
}

impl ResourceTypes {
    pub fn parse(letters: &str) -> Result<Self, String> {
        let mut types = ResourceTypes::default();
        for ch in letters.chars() {
            match ch {
                's' => types.service = true,
                'c' => types.container = true,
                'o' => types.object = true,
                _ => return Err(format!("unknown resource type letter '{ch}' in \"{letters}\"")),
            }
        }
        Ok(types)
    }

    fn covers(&self, kind: ResourceKind) -> bool {
        match kind {
            ResourceKind::Container => self.container,
            ResourceKind::Blob => self.object,
        }
    }
}

// ── Credentials ─────────────────────────────────────────────────────

/// Account-scoped delegation token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSas {
    pub services: Services,
    pub resource_types: ResourceTypes,
    pub permissions: Permissions,
    pub start: Option<DateTime<Utc>>,
    pub expiry: DateTime<Utc>,
}

/// What a resource-scoped token is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SasScope {
    /// The container and every blob inside it.
    Container(String),
    /// A single blob.
    Blob { container: String, blob: String },
}

impl SasScope {
    fn covers(&self, resource: &ResourceRef) -> bool {
        match self {
            SasScope::Container(container) => *container == resource.container,
            SasScope::Blob { container, blob } => {
                *container == resource.container && resource.blob.as_deref() == Some(blob.as_str())
            }
        }
    }
}

/// Container- or blob-scoped delegation token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSas {
    pub scope: SasScope,
    pub permissions: Permissions,
    pub start: Option<DateTime<Utc>>,
    pub expiry: DateTime<Utc>,
}

/// The identity a request is made with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Full account key.
    AccountKey { account: String },
    AccountSas(AccountSas),
    ServiceSas(ServiceSas),
    /// No credential presented.
    Anonymous,
}

// ── Gate ────────────────────────────────────────────────────────────

/// Check that `credential` grants `required` on `resource` at `now`.
///
/// The returned error never describes the resource; the reason is only
/// logged.
pub fn authorize(
    credential: &Credential,
    resource: &ResourceRef,
    required: Permission,
    now: DateTime<Utc>,
) -> Result<(), LeaseError> {
    let denial = match credential {
        Credential::AccountKey { .. } => None,
        Credential::Anonymous => Some("no credential presented".to_string()),
        Credential::AccountSas(sas) => {
            check_window(sas.start, sas.expiry, now)
                .or_else(|| (!sas.services.blob).then(|| "token does not cover the blob service".to_string()))
                .or_else(|| {
                    (!sas.resource_types.covers(resource.kind()))
                        .then(|| format!("token does not cover {} resources", resource.kind()))
                })
                .or_else(|| check_permission(sas.permissions, required))
        }
        Credential::ServiceSas(sas) => check_window(sas.start, sas.expiry, now)
            .or_else(|| {
                (!sas.scope.covers(resource)).then(|| format!("token is not scoped to {resource}"))
            })
            .or_else(|| check_permission(sas.permissions, required)),
    };

    match denial {
        None => Ok(()),
        Some(reason) => {
            debug!("Authorization denied for {}: {}", resource, reason);
            Err(LeaseError::AuthorizationFailed { reason })
        }
    }
}

fn check_window(
    start: Option<DateTime<Utc>>,
    expiry: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<String> {
    if start.is_some_and(|start| now < start) {
        Some("token is not yet valid".to_string())
    } else if now >= expiry {
        Some("token has expired".to_string())
    } else {
        None
    }
}

fn check_permission(granted: Permissions, required: Permission) -> Option<String> {
    (!granted.contains(required)).then(|| {
        format!(
            "token grants \"{granted}\" but the operation needs '{}'",
            required.letter()
        )
    })
}

// ── Token registry ──────────────────────────────────────────────────

/// Delegation tokens known to the server, resolved by their opaque
/// `sig` value.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    tokens: Vec<(String, Credential)>,
}

impl TokenRegistry {
    /// Build the registry from the `auth.tokens` configuration section.
    pub fn from_config(config: &AuthConfig) -> anyhow::Result<Self> {
        let tokens = config
            .tokens
            .iter()
            .map(|token| Ok((token.token.clone(), credential_from_config(token)?)))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { tokens })
    }

    pub fn insert(&mut self, token: impl Into<String>, credential: Credential) {
        self.tokens.push((token.into(), credential));
    }

    /// Look up a presented `sig`.  Every registered token is compared in
    /// constant time.
    pub fn resolve(&self, presented: &str) -> Option<Credential> {
        let mut found = None;
        for (token, credential) in &self.tokens {
            if bool::from(token.as_bytes().ct_eq(presented.as_bytes())) {
                found = Some(credential.clone());
            }
        }
        found
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

fn credential_from_config(token: &TokenConfig) -> anyhow::Result<Credential> {
    let permissions = Permissions::parse(&token.permissions).map_err(anyhow::Error::msg)?;
    let credential = match token.kind {
        TokenKind::Account => Credential::AccountSas(AccountSas {
            services: Services::parse(&token.services).map_err(anyhow::Error::msg)?,
            resource_types: ResourceTypes::parse(&token.resource_types)
                .map_err(anyhow::Error::msg)?,
            permissions,
            start: token.start,
            expiry: token.expiry,
        }),
        TokenKind::Container => {
            let container = token
                .container
                .clone()
                .ok_or_else(|| anyhow::anyhow!("container token is missing `container`"))?;
            Credential::ServiceSas(ServiceSas {
                scope: SasScope::Container(container),
                permissions,
                start: token.start,
                expiry: token.expiry,
            })
        }
        TokenKind::Blob => {
            let (container, blob) = token
                .container
                .clone()
                .zip(token.blob.clone())
                .ok_or_else(|| anyhow::anyhow!("blob token needs both `container` and `blob`"))?;
            Credential::ServiceSas(ServiceSas {
                scope: SasScope::Blob { container, blob },
                permissions,
                start: token.start,
                expiry: token.expiry,
            })
        }
    };
    Ok(credential)
}

// ── Request credentials ─────────────────────────────────────────────

/// Resolve the credential carried by a request.
///
/// A `SharedKey` authorization header must name the configured account
/// and key; a `sig` query parameter must name a registered token.  A
/// request with neither is anonymous.
pub fn resolve_credential(
    authorization: Option<&str>,
    sig: Option<&str>,
    config: &AuthConfig,
    registry: &TokenRegistry,
) -> Result<Credential, LeaseError> {
    if let Some(header) = authorization {
        let (account, key) = header
            .strip_prefix("SharedKey ")
            .and_then(|rest| rest.split_once(':'))
            .ok_or_else(|| LeaseError::AuthorizationFailed {
                reason: "malformed authorization header".to_string(),
            })?;
        let account_ok = account.as_bytes().ct_eq(config.account.as_bytes());
        let key_ok = key.as_bytes().ct_eq(config.account_key.as_bytes());
        if bool::from(account_ok & key_ok) {
            return Ok(Credential::AccountKey {
                account: account.to_string(),
            });
        }
        return Err(LeaseError::AuthorizationFailed {
            reason: format!("bad shared key for account {account}"),
        });
    }

    if let Some(sig) = sig {
        return registry
            .resolve(sig)
            .ok_or_else(|| LeaseError::AuthorizationFailed {
                reason: "unknown delegation token".to_string(),
            });
    }

    Ok(Credential::Anonymous)
}
