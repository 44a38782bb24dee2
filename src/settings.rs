//! Per-channel settings resolved from the layered config.
//!
//! Every `[server_id.channel_id]` section is one channel to archive. Its
//! effective settings are `[DEFAULT]`, overlaid by the optional
//! `[server_id]` section, overlaid by the channel section itself.

use crate::error::ConfigError;
use crate::ini::{DEFAULT_SECTION, IniDocument};
use crate::watermark::{AFTER_KEY, Watermark};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_TOKEN: &str = "main";
pub const DEFAULT_DATEFORMAT: &str = "u";

/// `server_id.channel_id`, both parts Discord snowflakes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey {
    server_id: String,
    channel_id: String,
}

impl ChannelKey {
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }
}

impl FromStr for ChannelKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let is_id = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        match s.split_once('.') {
            Some((server, channel)) if is_id(server) && is_id(channel) => Ok(ChannelKey {
                server_id: server.to_string(),
                channel_id: channel.to_string(),
            }),
            _ => Err(ConfigError::MalformedChannelKey(s.to_string())),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.server_id, self.channel_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Json,
    HtmlDark,
    HtmlLight,
    Csv,
    PlainText,
}

impl ExportFormat {
    /// Name the exporter CLI expects after `--format`.
    pub fn exporter_name(&self) -> &'static str {
        match self {
            ExportFormat::Json => "Json",
            ExportFormat::HtmlDark => "HtmlDark",
            ExportFormat::HtmlLight => "HtmlLight",
            ExportFormat::Csv => "Csv",
            ExportFormat::PlainText => "PlainText",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::HtmlDark | ExportFormat::HtmlLight => "html",
            ExportFormat::Csv => "csv",
            ExportFormat::PlainText => "txt",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "html" | "htmldark" => Ok(ExportFormat::HtmlDark),
            "htmllight" => Ok(ExportFormat::HtmlLight),
            "csv" => Ok(ExportFormat::Csv),
            "plaintext" | "text" | "txt" => Ok(ExportFormat::PlainText),
            _ => Err("expected one of json, html, htmldark, htmllight, csv, plaintext".into()),
        }
    }
}

/// Overlay key/value layers from least to most specific; the last layer
/// holding a key wins.
pub fn merge_layers<'a, I, L>(layers: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = L>,
    L: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut merged = BTreeMap::new();
    for layer in layers {
        for (key, value) in layer {
            merged.insert(key.to_string(), value.to_string());
        }
    }
    merged
}

/// Flattened settings for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Every merged key, including ones this tool does not interpret.
    pub raw: BTreeMap<String, String>,
    pub partition: Option<u32>,
    pub format: ExportFormat,
    pub dateformat: String,
    pub token: String,
    pub after: Option<Watermark>,
}

impl Settings {
    pub fn from_raw(section: &str, raw: BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let invalid = |key: &str, value: &str, reason: String| ConfigError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason,
        };

        let partition = match raw.get("partition") {
            None => None,
            Some(v) => match v.parse::<u32>() {
                Ok(n) if n > 0 => Some(n),
                _ => {
                    return Err(invalid(
                        "partition",
                        v,
                        "expected a positive integer".into(),
                    ));
                }
            },
        };

        let format = match raw.get("format") {
            None => ExportFormat::default(),
            Some(v) => v
                .parse::<ExportFormat>()
                .map_err(|reason| invalid("format", v, reason))?,
        };

        let after = match raw.get(AFTER_KEY) {
            None => None,
            Some(v) => Some(
                v.parse::<Watermark>()
                    .map_err(|e| invalid(AFTER_KEY, v, e.to_string()))?,
            ),
        };

        Ok(Settings {
            partition,
            format,
            dateformat: raw
                .get("dateformat")
                .cloned()
                .unwrap_or_else(|| DEFAULT_DATEFORMAT.to_string()),
            token: raw
                .get("token")
                .cloned()
                .unwrap_or_else(|| DEFAULT_TOKEN.to_string()),
            after,
            raw,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    pub key: ChannelKey,
    /// `name` from the server section.
    pub server_name: Option<String>,
    /// `name` from the channel section.
    pub name: Option<String>,
    pub settings: Settings,
    /// `after` as stored in the channel's own section.
    pub watermark: Option<Watermark>,
}

impl ChannelConfig {
    /// Human-readable `server/channel#id` label for reports.
    pub fn label(&self) -> String {
        format!(
            "{}/{}#{}",
            self.server_name.as_deref().unwrap_or(self.key.server_id()),
            self.name.as_deref().unwrap_or("channel"),
            self.key.channel_id()
        )
    }
}

/// Resolve every channel section of the document, in document order.
///
/// Fails on the first malformed channel key or invalid value; nothing is
/// returned for a partially valid config.
pub fn resolve_channels(doc: &IniDocument) -> Result<Vec<ChannelConfig>, ConfigError> {
    let keys = doc
        .sections()
        .filter(|s| s.contains('.'))
        .map(str::parse::<ChannelKey>)
        .collect::<Result<Vec<_>, _>>()?;

    if keys.is_empty() {
        return Err(ConfigError::MissingSection(
            "no [<server_id>.<channel_id>] channel sections configured".into(),
        ));
    }

    keys.into_iter()
        .map(|key| resolve_channel(doc, key))
        .collect()
}

fn resolve_channel(doc: &IniDocument, key: ChannelKey) -> Result<ChannelConfig, ConfigError> {
    let section = key.to_string();
    let server = key.server_id().to_string();

    let raw = merge_layers([
        doc.entries(DEFAULT_SECTION),
        doc.entries(&server),
        doc.entries(&section),
    ]);
    let settings = Settings::from_raw(&section, raw)?;

    let watermark = match doc.get(&section, AFTER_KEY) {
        None => None,
        // Already validated through the merged settings.
        Some(_) => settings.after,
    };

    Ok(ChannelConfig {
        server_name: get_with_default(doc, &server, "name"),
        name: get_with_default(doc, &section, "name"),
        settings,
        watermark,
        key,
    })
}

fn get_with_default(doc: &IniDocument, section: &str, key: &str) -> Option<String> {
    doc.get(section, key)
        .or_else(|| doc.get(DEFAULT_SECTION, key))
        .map(str::to_string)
}
