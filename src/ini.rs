//! Line-preserving INI documents.
//!
//! Both the channel config and the token store are INI files. The config is
//! also rewritten after every successful export, so the document keeps each
//! source line verbatim and only touches the lines it has to: comments,
//! ordering and spacing of everything else survive a read-modify-write.
//!
//! The dialect follows the usual Python `configparser` conventions:
//! `[section]` headers, `key = value` or `key: value` entries, `#`/`;`
//! comment lines, case-insensitive keys and indented continuation lines.

use crate::error::{ConfigError, PersistenceError};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::ops::Range;
use std::path::Path;
use tempfile::NamedTempFile;

pub const DEFAULT_SECTION: &str = "DEFAULT";

#[derive(Debug, Clone)]
enum Kind {
    /// Blank lines and comments.
    Other,
    Header(String),
    Entry { key: String, value: String },
    Continuation,
}

#[derive(Debug, Clone)]
struct Line {
    raw: String,
    kind: Kind,
}

impl Line {
    fn other(raw: impl Into<String>) -> Self {
        Line {
            raw: raw.into(),
            kind: Kind::Other,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IniDocument {
    lines: Vec<Line>,
}

impl IniDocument {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut lines: Vec<Line> = Vec::new();
        let mut seen_sections: Vec<String> = Vec::new();
        let mut section_keys: Vec<String> = Vec::new();
        // Index of the entry that an indented line would continue.
        let mut open_entry: Option<usize> = None;

        for (idx, raw) in text.split('\n').enumerate() {
            let line_no = idx + 1;
            let content = raw.strip_suffix('\r').unwrap_or(raw);
            let trimmed = content.trim();

            if trimmed.is_empty() {
                open_entry = None;
                lines.push(Line::other(raw));
                continue;
            }
            if trimmed.starts_with('#') || trimmed.starts_with(';') {
                lines.push(Line::other(raw));
                continue;
            }

            let indented = content.starts_with([' ', '\t']);
            if indented && let Some(entry_idx) = open_entry {
                if let Kind::Entry { value, .. } = &mut lines[entry_idx].kind {
                    value.push('\n');
                    value.push_str(trimmed);
                }
                lines.push(Line {
                    raw: raw.to_string(),
                    kind: Kind::Continuation,
                });
                continue;
            }

            if let Some(inner) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                let name = inner.trim().to_string();
                if name.is_empty() {
                    return Err(syntax(line_no, "empty section name"));
                }
                if seen_sections.contains(&name) {
                    return Err(syntax(line_no, format!("duplicate section [{}]", name)));
                }
                seen_sections.push(name.clone());
                section_keys.clear();
                open_entry = None;
                lines.push(Line {
                    raw: raw.to_string(),
                    kind: Kind::Header(name),
                });
                continue;
            }

            let Some(delim) = trimmed.find(['=', ':']) else {
                return Err(syntax(
                    line_no,
                    format!("expected `key = value`, found {:?}", trimmed),
                ));
            };
            if seen_sections.is_empty() {
                return Err(syntax(line_no, "entry before any section header"));
            }
            let key = trimmed[..delim].trim().to_lowercase();
            if key.is_empty() {
                return Err(syntax(line_no, "empty key"));
            }
            if section_keys.contains(&key) {
                return Err(syntax(
                    line_no,
                    format!(
                        "duplicate key `{}` in section [{}]",
                        key,
                        seen_sections.last().map(String::as_str).unwrap_or_default()
                    ),
                ));
            }
            section_keys.push(key.clone());
            let value = trimmed[delim + 1..].trim().to_string();
            open_entry = Some(lines.len());
            lines.push(Line {
                raw: raw.to_string(),
                kind: Kind::Entry { key, value },
            });
        }

        Ok(IniDocument { lines })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Atomically replace `path` with the current contents.
    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let write_err = |source: io::Error| PersistenceError::Write {
            path: path.to_path_buf(),
            source,
        };

        let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(self.to_string().as_bytes())
            .map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(path).map_err(|source| PersistenceError::Persist {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// Section names in document order.
    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|l| match &l.kind {
            Kind::Header(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.section_span(section).is_some()
    }

    /// `(key, value)` pairs of one section in document order.
    pub fn entries<'a>(&'a self, section: &str) -> Vec<(&'a str, &'a str)> {
        let Some((start, end)) = self.section_span(section) else {
            return Vec::new();
        };
        self.lines[start..end]
            .iter()
            .filter_map(|l| match &l.kind {
                Kind::Entry { key, value } => Some((key.as_str(), value.as_str())),
                _ => None,
            })
            .collect()
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        let key = key.to_lowercase();
        self.entries(section)
            .into_iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    /// Set one key, rewriting only the lines that belong to it.
    ///
    /// An existing entry keeps its key spelling and delimiter. A new key goes
    /// after the last entry of its section, and a missing section is appended
    /// at the end of the document.
    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        let key = key.to_lowercase();
        let mut value_lines = value.split('\n');
        let first = value_lines.next().unwrap_or_default();
        let continuation: Vec<Line> = value_lines
            .map(|l| Line {
                raw: format!("    {}", l),
                kind: Kind::Continuation,
            })
            .collect();

        let Some((start, end)) = self.section_span(section) else {
            self.append_section(section, &key, first, value, continuation);
            return;
        };

        let existing = (start..end).find(
            |&i| matches!(&self.lines[i].kind, Kind::Entry { key: k, .. } if *k == key),
        );

        match existing {
            Some(idx) => {
                let raw = rewrite_entry_raw(&self.lines[idx].raw, first);
                self.lines[idx] = Line {
                    raw,
                    kind: Kind::Entry {
                        key,
                        value: value.to_string(),
                    },
                };
                let mut tail = idx + 1;
                while tail < self.lines.len() && matches!(self.lines[tail].kind, Kind::Continuation)
                {
                    tail += 1;
                }
                self.splice_lines(idx + 1..tail, continuation);
            }
            None => {
                let insert_at = (start..end)
                    .rev()
                    .find(|&i| {
                        matches!(
                            self.lines[i].kind,
                            Kind::Entry { .. } | Kind::Continuation
                        )
                    })
                    .map(|i| i + 1)
                    .unwrap_or(start);
                let mut new_lines = vec![Line {
                    raw: format!("{} = {}", key, first),
                    kind: Kind::Entry {
                        key,
                        value: value.to_string(),
                    },
                }];
                new_lines.extend(continuation);
                self.splice_lines(insert_at..insert_at, new_lines);
            }
        }
    }

    fn append_section(
        &mut self,
        section: &str,
        key: &str,
        first: &str,
        value: &str,
        continuation: Vec<Line>,
    ) {
        let trailing_newline = self.lines.last().is_some_and(|l| l.raw.is_empty());
        let insert_at = if trailing_newline {
            self.lines.len() - 1
        } else {
            self.lines.len()
        };

        let mut new_lines = Vec::new();
        let needs_gap = insert_at > 0 && !self.lines[insert_at - 1].raw.trim().is_empty();
        if needs_gap {
            new_lines.push(Line::other(""));
        }
        new_lines.push(Line {
            raw: format!("[{}]", section),
            kind: Kind::Header(section.to_string()),
        });
        new_lines.push(Line {
            raw: format!("{} = {}", key, first),
            kind: Kind::Entry {
                key: key.to_string(),
                value: value.to_string(),
            },
        });
        new_lines.extend(continuation);
        if self.lines.is_empty() {
            new_lines.push(Line::other(""));
        }
        self.splice_lines(insert_at..insert_at, new_lines);
    }

    /// Insert new lines, giving them the document's line ending.
    fn splice_lines(&mut self, range: Range<usize>, mut new_lines: Vec<Line>) {
        let crlf = self.lines.iter().any(|l| l.raw.ends_with('\r'));
        if crlf {
            for line in &mut new_lines {
                line.raw.push('\r');
            }
            // The last line of a file without a final newline has no `\r`.
            if range.end == self.lines.len() && !new_lines.is_empty() {
                if let Some(prev) = range.start.checked_sub(1).map(|i| &mut self.lines[i])
                    && !prev.raw.ends_with('\r')
                {
                    prev.raw.push('\r');
                }
                if let Some(last) = new_lines.last_mut() {
                    last.raw.pop();
                }
            }
        }
        self.lines.splice(range, new_lines);
    }

    /// Line range `[header + 1, next header)` of a section.
    fn section_span(&self, section: &str) -> Option<(usize, usize)> {
        let header = self
            .lines
            .iter()
            .position(|l| matches!(&l.kind, Kind::Header(name) if name == section))?;
        let end = self.lines[header + 1..]
            .iter()
            .position(|l| matches!(l.kind, Kind::Header(_)))
            .map(|offset| header + 1 + offset)
            .unwrap_or(self.lines.len());
        Some((header + 1, end))
    }
}

impl fmt::Display for IniDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            f.write_str(&line.raw)?;
        }
        Ok(())
    }
}

fn syntax(line: usize, message: impl Into<String>) -> ConfigError {
    ConfigError::Syntax {
        line,
        message: message.into(),
    }
}

// Keep everything up to the delimiter (and one following space, if the
// original had it) and swap the value.
fn rewrite_entry_raw(raw: &str, value: &str) -> String {
    let (content, cr) = match raw.strip_suffix('\r') {
        Some(c) => (c, "\r"),
        None => (raw, ""),
    };
    let Some(delim) = content.find(['=', ':']) else {
        return format!("{} = {}{}", content.trim(), value, cr);
    };
    let (head, rest) = content.split_at(delim + 1);
    let spacing = &rest[..rest.len() - rest.trim_start().len()];
    format!("{}{}{}{}", head, spacing, value, cr)
}
