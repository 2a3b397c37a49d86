//! CLI handlers for login, approve, status, and logout.

use chrono::Utc;

use crate::client::{CredentialStore, FileCredentialStore, LoginClient, StoredCredential};
use crate::config::KeygateConfig;
use crate::device::codes::fingerprint;
use crate::error::Result;

/// Handle `keygate login`.
pub async fn handle_login(config: &KeygateConfig, name: Option<&str>) -> Result<()> {
    let client = LoginClient::new(config.server_url.clone());
    let session = client.start(name).await?;

    println!("Visit: {}", session.verification_uri_complete);
    println!("Or open {} and enter: {}", session.verification_uri, session.user_code);
    println!("Waiting for approval...");

    let key = client.wait_for_key(&session).await?;
    let store = FileCredentialStore::new(&config.credential_dir);
    store.save(&StoredCredential {
        key,
        server_url: client.base_url().to_string(),
        client_name: name.map(str::to_string),
        obtained_at: Utc::now(),
    })?;
    println!("Logged in. Key saved to {}", store.path().display());
    Ok(())
}

/// Handle `keygate approve <code>`.
pub async fn handle_approve(config: &KeygateConfig, user_code: &str) -> Result<()> {
    let client = LoginClient::new(config.server_url.clone());
    let approved = client.approve(user_code).await?;
    match approved.client_name {
        Some(name) => println!("Approved {} ({name})", approved.user_code),
        None => println!("Approved {}", approved.user_code),
    }
    Ok(())
}

/// Handle `keygate status`.
pub async fn handle_status(config: &KeygateConfig) -> Result<()> {
    let store = FileCredentialStore::new(&config.credential_dir);
    match store.load()? {
        Some(credential) => {
            println!("Logged in to {}", credential.server_url);
            println!("  key: {}", fingerprint(credential.key.expose()));
            println!("  since: {}", credential.obtained_at.to_rfc3339());
        }
        None => println!("Not logged in"),
    }
    Ok(())
}

/// Handle `keygate logout`.
pub async fn handle_logout(config: &KeygateConfig) -> Result<()> {
    FileCredentialStore::new(&config.credential_dir).clear()?;
    println!("Logged out");
    Ok(())
}
