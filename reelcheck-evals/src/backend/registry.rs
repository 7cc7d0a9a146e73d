//! Startup probe of which backends can run on this host.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use reelcheck_models::auth::CredentialStore;
use reelcheck_models::providers::{DEFAULT_OLLAMA_BASE_URL, OllamaProvider};
use tracing::debug;

use crate::request::BackendKind;
use crate::{Error, Result};

/// Whether a backend's dependency is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available { detail: String },
    Unavailable { reason: String },
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available { detail } => write!(f, "available ({detail})"),
            Self::Unavailable { reason } => write!(f, "unavailable: {reason}"),
        }
    }
}

/// What to probe.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub claude_binary: PathBuf,
    pub ollama_base_url: String,
    pub probe_timeout: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            claude_binary: PathBuf::from("claude"),
            ollama_base_url: DEFAULT_OLLAMA_BASE_URL.to_string(),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Availability of every backend variant, decided once.
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    entries: BTreeMap<BackendKind, Availability>,
}

impl BackendRegistry {
    /// Probe each backend's dependency.
    ///
    /// - `claude-cli`: the binary resolves on `PATH`
    /// - `gemini`: a Google key is in the keyring or environment
    /// - `ollama`: the server answers `/api/tags`
    pub async fn probe(options: &ProbeOptions, credentials: &CredentialStore) -> Self {
        let mut entries = BTreeMap::new();

        let claude = match which::which(&options.claude_binary) {
            Ok(path) => Availability::Available {
                detail: path.display().to_string(),
            },
            Err(e) => Availability::Unavailable {
                reason: format!("{} not found: {e}", options.claude_binary.display()),
            },
        };
        entries.insert(BackendKind::ClaudeCli, claude);

        let gemini = match credentials.credential_source("google") {
            Some(source) => Availability::Available {
                detail: format!("API key from {source}"),
            },
            None => Availability::Unavailable {
                reason: "no Google API key (run `reelcheck auth set google` or set GEMINI_API_KEY)"
                    .to_string(),
            },
        };
        entries.insert(BackendKind::Gemini, gemini);

        let ollama = OllamaProvider::with_base_url(options.ollama_base_url.clone());
        let ollama = match ollama.list_models(options.probe_timeout).await {
            Ok(models) => Availability::Available {
                detail: format!("{} models at {}", models.len(), options.ollama_base_url),
            },
            Err(e) => Availability::Unavailable {
                reason: format!("{} not reachable: {e}", options.ollama_base_url),
            },
        };
        entries.insert(BackendKind::Ollama, ollama);

        for (kind, availability) in &entries {
            debug!(backend = %kind, %availability, "probed backend");
        }
        Self { entries }
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (BackendKind, Availability)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn availability(&self, kind: BackendKind) -> Option<&Availability> {
        self.entries.get(&kind)
    }

    /// Fail fast if `kind` was not found usable.
    pub fn require(&self, kind: BackendKind) -> Result<()> {
        match self.entries.get(&kind) {
            Some(Availability::Available { .. }) => Ok(()),
            Some(Availability::Unavailable { reason }) => Err(Error::BackendUnavailable {
                backend: kind.to_string(),
                reason: reason.clone(),
            }),
            None => Err(Error::BackendUnavailable {
                backend: kind.to_string(),
                reason: "not probed".to_string(),
            }),
        }
    }

    /// Backends that can run.
    pub fn available(&self) -> Vec<BackendKind> {
        self.entries
            .iter()
            .filter(|(_, a)| a.is_available())
            .map(|(k, _)| *k)
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (BackendKind, &Availability)> {
        self.entries.iter().map(|(k, a)| (*k, a))
    }
}
