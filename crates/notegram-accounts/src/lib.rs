//! Account registry: parses the configured account list and resolves
//! operator-supplied tokens (ordinal or name) to account identities.
//!
//! Parsing fails fast with a descriptive error on malformed input; a bad
//! account list is a fatal startup condition, never a runtime one.

use std::fmt;

use anyhow::{bail, Result};

/// Password wrapper whose `Debug`/`Display` output is always redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(secret: impl Into<String>) -> Result<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            bail!("secret must not be empty");
        }
        Ok(Self(secret))
    }

    /// Returns the plaintext for explicit use sites (login request bodies).
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// One configured platform account. Immutable after startup; the name doubles
/// as the session-store key.
#[derive(Debug, Clone)]
pub struct AccountIdentity {
    pub name: String,
    pub username: String,
    pub password: SecretString,
}

/// Ordered set of configured accounts, in configuration order.
#[derive(Debug, Clone)]
pub struct AccountRegistry {
    accounts: Vec<AccountIdentity>,
}

impl AccountRegistry {
    /// Parses `name=username:password|name2=...` into a registry.
    ///
    /// The first `:` after `=` splits username from password, so passwords may
    /// contain `:`. Names are restricted to `[A-Za-z0-9_-]` because they are
    /// embedded in session file names.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            bail!("account list is empty; expected name=username:password entries joined by '|'");
        }

        let mut accounts: Vec<AccountIdentity> = Vec::new();
        for (position, entry) in raw.split('|').enumerate() {
            let ordinal = position + 1;
            let entry = entry.trim();
            if entry.is_empty() {
                bail!("account entry {ordinal} is empty");
            }
            let Some((name, credentials)) = entry.split_once('=') else {
                bail!("account entry {ordinal} is missing '=' between name and credentials");
            };
            let name = name.trim();
            if name.is_empty() {
                bail!("account entry {ordinal} has an empty name");
            }
            if !name
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
            {
                bail!(
                    "account name '{name}' contains unsupported characters; allowed: letters, digits, '_', '-'"
                );
            }
            let Some((username, password)) = credentials.split_once(':') else {
                bail!("account '{name}' is missing ':' between username and password");
            };
            let username = username.trim();
            if username.is_empty() {
                bail!("account '{name}' has an empty username");
            }
            if password.is_empty() {
                bail!("account '{name}' has an empty password");
            }
            if accounts.iter().any(|existing| existing.name == name) {
                bail!("duplicate account name '{name}'");
            }
            accounts.push(AccountIdentity {
                name: name.to_string(),
                username: username.to_string(),
                password: SecretString::new(password)?,
            });
        }

        Ok(Self { accounts })
    }

    /// Resolves a 1-based ordinal or an exact account name.
    pub fn resolve(&self, token: &str) -> Option<&AccountIdentity> {
        let token = token.trim();
        if let Ok(ordinal) = token.parse::<usize>() {
            if ordinal >= 1 && ordinal <= self.accounts.len() {
                return self.accounts.get(ordinal - 1);
            }
            return None;
        }
        self.accounts.iter().find(|account| account.name == token)
    }

    pub fn list(&self) -> &[AccountIdentity] {
        &self.accounts
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
