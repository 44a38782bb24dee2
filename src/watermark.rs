use crate::error::PersistenceError;
use crate::ini::IniDocument;
use crate::settings::ChannelKey;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, Utc};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;
use thiserror::Error;

/// Config key holding a channel's watermark.
pub const AFTER_KEY: &str = "after";

/// Point in time up to which a channel has been archived.
///
/// Stored as naive UTC ISO-8601 with microsecond precision, e.g.
/// `2024-05-01T12:30:00.123456`. Values are truncated to microseconds on
/// construction so that what is written is exactly what is read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(DateTime<Utc>);

impl Watermark {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at.trunc_subsecs(6))
    }

    #[cfg(test)]
    pub(crate) fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn unix_seconds(&self) -> i64 {
        self.0.timestamp()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("not an ISO-8601 timestamp: {0:?}")]
pub struct InvalidWatermark(pub String);

impl FromStr for Watermark {
    type Err = InvalidWatermark;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(Self::new(dt.with_timezone(&Utc)));
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                return Ok(Self::new(naive.and_utc()));
            }
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| Self::new(naive.and_utc()))
            .ok_or_else(|| InvalidWatermark(s.to_string()))
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%dT%H:%M:%S%.6f"))
    }
}

/// Source of "now". Swapped for a fixed clock in tests.
pub trait Clock: Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Single owner of the config document once exports start.
///
/// Workers advance watermarks through the mutex, and every advance rewrites
/// the file atomically, so parallel exports never interleave partial writes.
pub struct WatermarkWriter {
    document: Mutex<IniDocument>,
    path: Option<PathBuf>,
}

impl WatermarkWriter {
    pub fn new(document: IniDocument, path: impl Into<PathBuf>) -> Self {
        Self {
            document: Mutex::new(document),
            path: Some(path.into()),
        }
    }

    /// A writer that never touches disk.
    pub fn in_memory(document: IniDocument) -> Self {
        Self {
            document: Mutex::new(document),
            path: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn current(&self, key: &ChannelKey) -> Option<Watermark> {
        let doc = self.document.lock().unwrap_or_else(|e| e.into_inner());
        stored(&doc, key)
    }

    /// Move the channel's watermark forward to `started_at`.
    ///
    /// The stored value never goes backwards: it is clamped to at least the
    /// prior stored value and the `after` bound the export actually used.
    /// Returns the value now in effect.
    pub fn advance(
        &self,
        key: &ChannelKey,
        used_after: Option<Watermark>,
        started_at: Watermark,
    ) -> Result<Watermark, PersistenceError> {
        let mut doc = self.document.lock().unwrap_or_else(|e| e.into_inner());
        let prior = stored(&doc, key);
        let next = [prior, used_after, Some(started_at)]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(started_at);

        if prior == Some(next) {
            return Ok(next);
        }

        doc.set(&key.to_string(), AFTER_KEY, &next.to_string());
        if let Some(path) = &self.path {
            doc.save(path)?;
        }
        tracing::debug!(channel = %key, after = %next, "watermark advanced");
        Ok(next)
    }

    #[cfg(test)]
    pub(crate) fn into_document(self) -> IniDocument {
        self.document
            .into_inner()
            .unwrap_or_else(|e| e.into_inner())
    }
}

fn stored(doc: &IniDocument, key: &ChannelKey) -> Option<Watermark> {
    doc.get(&key.to_string(), AFTER_KEY)
        .and_then(|v| v.parse().ok())
}
