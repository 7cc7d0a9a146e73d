//! Provider API key management.
//!
//! Keys are written to the system keyring under the `reelcheck` service.
//! Lookups at evaluation time fall back to the provider's environment
//! variables.

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use dialoguer::{Password, theme::ColorfulTheme};
use reelcheck_models::auth::{
    CredentialSource, CredentialStore, env_vars_for_provider, known_providers,
};

use super::CREDENTIAL_SERVICE;

#[derive(Debug, Args)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthCommand,
}

#[derive(Debug, Subcommand)]
pub enum AuthCommand {
    /// Store an API key in the system keyring
    Set {
        /// Provider name (e.g., google)
        provider: String,
    },
    /// Remove a stored API key
    Delete {
        /// Provider name (e.g., google)
        provider: String,
    },
    /// Show where each provider's key comes from
    Status {
        /// Limit to one provider
        provider: Option<String>,
    },
}

pub fn run(args: AuthArgs) -> Result<()> {
    let store = CredentialStore::new(CREDENTIAL_SERVICE).with_env_fallback();
    match args.command {
        AuthCommand::Set { provider } => set(&store, &canonical_provider(&provider)?),
        AuthCommand::Delete { provider } => delete(&store, &canonical_provider(&provider)?),
        AuthCommand::Status { provider } => match provider {
            Some(provider) => {
                status(&store, &canonical_provider(&provider)?);
                Ok(())
            }
            None => {
                for provider in known_providers() {
                    status(&store, provider);
                }
                Ok(())
            }
        },
    }
}

/// Map user-facing names onto the store's provider keys.
fn canonical_provider(name: &str) -> Result<String> {
    let name = name.to_ascii_lowercase();
    let name = match name.as_str() {
        "gemini" => "google".to_string(),
        "claude" => "anthropic".to_string(),
        _ => name,
    };
    if !known_providers().any(|p| p == name) {
        let known: Vec<_> = known_providers().collect();
        bail!("Unknown provider '{}'. Known: {}", name, known.join(", "));
    }
    Ok(name)
}

fn env_hint(provider: &str) -> String {
    let vars = env_vars_for_provider(provider);
    if vars.is_empty() {
        String::new()
    } else {
        format!(" (or set {})", vars.join(" / "))
    }
}

fn set(store: &CredentialStore, provider: &str) -> Result<()> {
    println!("Enter API key for {}{}", provider, env_hint(provider));

    let key = Password::with_theme(&ColorfulTheme::default())
        .with_prompt("API key")
        .interact()?;

    if key.is_empty() {
        bail!("API key cannot be empty");
    }

    store.set(provider, &key)?;
    println!("Credentials for '{}' saved to keyring.", provider);
    Ok(())
}

fn delete(store: &CredentialStore, provider: &str) -> Result<()> {
    match store.delete(provider) {
        Ok(()) => println!("Credentials for '{}' deleted.", provider),
        Err(reelcheck_models::Error::CredentialsNotFound(_)) => {
            println!("No credentials found for '{}'.", provider);
        }
        Err(e) => bail!("Failed to delete credentials: {}", e),
    }
    Ok(())
}

fn status(store: &CredentialStore, provider: &str) {
    println!("{}: {}", provider, describe_source(store.credential_source(provider)));
}

fn describe_source(source: Option<CredentialSource>) -> &'static str {
    match source {
        Some(CredentialSource::Keyring) => "configured (keyring)",
        Some(CredentialSource::Environment) => "configured (environment)",
        None => "not configured",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_aliases_resolve() {
        assert_eq!(canonical_provider("gemini").unwrap(), "google");
        assert_eq!(canonical_provider("Google").unwrap(), "google");
        assert_eq!(canonical_provider("claude").unwrap(), "anthropic");
        assert!(canonical_provider("openai").is_err());
    }

    #[test]
    fn env_hint_lists_variables() {
        assert_eq!(env_hint("google"), " (or set GEMINI_API_KEY / GOOGLE_API_KEY)");
    }

    #[test]
    fn source_descriptions() {
        assert_eq!(describe_source(None), "not configured");
        assert_eq!(
            describe_source(Some(CredentialSource::Environment)),
            "configured (environment)"
        );
    }
}
