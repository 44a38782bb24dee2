use crate::error::{ConfigError, CredentialError};
use crate::ini::{DEFAULT_SECTION, IniDocument};
use crate::settings::merge_layers;
use secrecy::SecretString;
use std::path::Path;

/// A named Discord token. The secret is redacted from `Debug` output.
#[derive(Debug)]
pub struct Credential {
    pub name: String,
    pub secret: SecretString,
    pub bot: bool,
}

/// `tokens.ini`: one section per token name with `token` and `bot` keys.
pub struct TokenStore {
    document: IniDocument,
}

impl TokenStore {
    pub fn new(document: IniDocument) -> Self {
        Self { document }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        IniDocument::load(path).map(Self::new)
    }

    /// Look up a credential. Keys missing from the named section fall back
    /// to `[DEFAULT]`; `bot` defaults to true when absent from both.
    pub fn resolve(&self, name: &str) -> Result<Credential, CredentialError> {
        if name == DEFAULT_SECTION || !self.document.has_section(name) {
            return Err(CredentialError::UnknownToken(name.to_string()));
        }
        let entries = merge_layers([
            self.document.entries(DEFAULT_SECTION),
            self.document.entries(name),
        ]);

        let secret = entries
            .get("token")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CredentialError::MissingSecret(name.to_string()))?;

        let bot = match entries.get("bot") {
            None => true,
            Some(value) => parse_bool(value).ok_or_else(|| CredentialError::InvalidBool {
                name: name.to_string(),
                value: value.to_string(),
            })?,
        };

        Ok(Credential {
            name: name.to_string(),
            secret: SecretString::from(secret.clone()),
            bot,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}
