//! Seeds registered clients and principals at startup.
//!
//! Secrets and passwords are hashed with Argon2id before they reach the
//! stores. Seeding is idempotent: entries that already exist are replaced.

use serde::{Deserialize, Serialize};
use waypoint_auth::config::TokenDefaults;
use waypoint_auth::secret::hash_secret;
use waypoint_auth::storage::{ClientStorage, PrincipalStorage};
use waypoint_auth::types::{GrantType, Principal, RegisteredClient, TokenSettings};

/// `[bootstrap]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub clients: Vec<SeedClient>,
    pub users: Vec<SeedUser>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            clients: vec![
                SeedClient {
                    client_id: "test-client".to_string(),
                    client_secret: Some("test-secret".to_string()),
                    name: "Test service".to_string(),
                    grant_types: vec![GrantType::ClientCredentials],
                    scopes: vec!["backend.read".to_string(), "backend.write".to_string()],
                    ..SeedClient::default()
                },
                SeedClient {
                    client_id: "web-client".to_string(),
                    client_secret: Some("web-secret".to_string()),
                    name: "Waypoint web".to_string(),
                    grant_types: vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
                    scopes: ["openid", "profile", "email", "backend.read"]
                        .iter()
                        .map(ToString::to_string)
                        .collect(),
                    redirect_uris: vec!["http://localhost:8080/login/oauth2/code/web".to_string()],
                    ..SeedClient::default()
                },
            ],
            users: vec![
                SeedUser::demo("alice", "ROLE_USER"),
                SeedUser::demo("olivia", "ROLE_OPERATOR"),
                SeedUser::demo("admin", "ROLE_ADMIN"),
            ],
        }
    }
}

/// A client to register.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedClient {
    pub client_id: String,
    /// Plaintext secret. `None` registers a public client.
    pub client_secret: Option<String>,
    pub name: String,
    pub grant_types: Vec<GrantType>,
    pub scopes: Vec<String>,
    pub redirect_uris: Vec<String>,
    pub audience: Option<String>,
    pub require_consent: bool,
    /// Overrides `auth.tokens.reuse_refresh_tokens` for this client.
    pub reuse_refresh_tokens: Option<bool>,
}

/// A principal to create.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedUser {
    pub username: String,
    pub password: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub authorities: Vec<String>,
}

impl SeedUser {
    fn demo(username: &str, role: &str) -> Self {
        Self {
            username: username.to_string(),
            password: "password".to_string(),
            email: Some(format!("{username}@example.com")),
            name: Some(username.to_string()),
            authorities: vec![role.to_string()],
        }
    }
}

/// What was seeded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub clients: usize,
    pub users: usize,
}

/// Writes the configured clients and users into the stores.
///
/// # Errors
///
/// Fails on hashing errors, invalid client definitions and storage errors.
pub async fn seed(
    config: &BootstrapConfig,
    defaults: &TokenDefaults,
    clients: &dyn ClientStorage,
    principals: &dyn PrincipalStorage,
) -> anyhow::Result<SeedReport> {
    let mut report = SeedReport::default();

    for seed in &config.clients {
        let client = registered_client(seed, defaults)?;
        client
            .validate()
            .map_err(|e| anyhow::anyhow!("bootstrap client '{}': {e}", seed.client_id))?;
        clients.save(client).await?;
        tracing::debug!(client_id = %seed.client_id, "Seeded client");
        report.clients += 1;
    }

    for seed in &config.users {
        let mut principal =
            Principal::new(&seed.username).with_authorities(seed.authorities.iter().cloned());
        principal.password_hash = Some(
            hash_secret(&seed.password)
                .map_err(|e| anyhow::anyhow!("hashing password of '{}': {e}", seed.username))?,
        );
        principal.email = seed.email.clone();
        principal.name = seed.name.clone();
        principals.save(principal).await?;
        tracing::debug!(username = %seed.username, "Seeded user");
        report.users += 1;
    }

    tracing::info!(
        clients = report.clients,
        users = report.users,
        "Bootstrap data seeded"
    );
    Ok(report)
}

fn registered_client(seed: &SeedClient, defaults: &TokenDefaults) -> anyhow::Result<RegisteredClient> {
    let name = if seed.name.is_empty() {
        &seed.client_id
    } else {
        &seed.name
    };
    let mut client = RegisteredClient::new(&seed.client_id, name);
    client.client_secret_hash = seed
        .client_secret
        .as_deref()
        .map(hash_secret)
        .transpose()
        .map_err(|e| anyhow::anyhow!("hashing secret of '{}': {e}", seed.client_id))?;
    client.grant_types = seed.grant_types.iter().copied().collect();
    client.scopes = seed.scopes.iter().cloned().collect();
    client.redirect_uris = seed.redirect_uris.clone();
    client.audience = seed.audience.clone();
    client.require_consent = seed.require_consent;
    client.token_settings = TokenSettings::from(defaults);
    if let Some(reuse) = seed.reuse_refresh_tokens {
        client.token_settings.reuse_refresh_tokens = reuse;
    }
    Ok(client)
}

#[cfg(test)]
mod tests {
    use waypoint_auth::storage::{InMemoryClientStorage, InMemoryPrincipalStorage};

    use super::*;

    #[tokio::test]
    async fn test_default_seed() {
        let clients = InMemoryClientStorage::new();
        let principals = InMemoryPrincipalStorage::new();
        let report = seed(
            &BootstrapConfig::default(),
            &TokenDefaults::default(),
            &clients,
            &principals,
        )
        .await
        .unwrap();
        assert_eq!(report, SeedReport { clients: 2, users: 3 });

        let client = clients.find_by_client_id("test-client").await.unwrap().unwrap();
        assert!(client.is_confidential());
        assert_ne!(client.client_secret_hash.as_deref(), Some("test-secret"));
        assert!(client.scopes.contains("backend.write"));

        let alice = principals.find_by_username("alice").await.unwrap().unwrap();
        assert!(alice.authorities.contains("ROLE_USER"));
        assert_eq!(alice.email.as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn test_refresh_policy_override() {
        let seed = SeedClient {
            client_id: "rotating".to_string(),
            client_secret: Some("s".to_string()),
            grant_types: vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
            redirect_uris: vec!["http://localhost/cb".to_string()],
            reuse_refresh_tokens: Some(false),
            ..SeedClient::default()
        };
        let client = registered_client(&seed, &TokenDefaults::default()).unwrap();
        assert!(!client.token_settings.reuse_refresh_tokens);
        assert_eq!(client.client_name, "rotating");
    }
}
