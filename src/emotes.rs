//! Emote substitution: `[Kappa]` -> inline image.
//!
//! Substitution splits text into [`Segment`]s. Each table entry, in table
//! order, only ever splits the remaining `Text` segments, so an emote that has
//! already been placed is never looked at again by later entries.

use serde::Serialize;

use crate::config::EmoteSettings;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Segment {
    Text { text: String },
    Emote { token: String, file: String },
}

/// Ordered (token, image file) table plus the URL prefix images are served from.
#[derive(Debug, Clone)]
pub struct EmoteTable {
    entries: Vec<(String, String)>,
    base_url: String,
}

impl EmoteTable {
    pub fn new(entries: Vec<(String, String)>, base_url: impl Into<String>) -> Self {
        Self {
            entries,
            base_url: base_url.into(),
        }
    }

    pub fn from_settings(settings: &EmoteSettings) -> Self {
        Self::new(settings.table.clone(), settings.base_url.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace every literal `[token]` with an emote segment, table entry by
    /// table entry.
    pub fn substitute(&self, text: &str) -> Vec<Segment> {
        if text.is_empty() {
            return Vec::new();
        }
        let mut segments = vec![Segment::Text {
            text: text.to_string(),
        }];

        for (token, file) in &self.entries {
            let needle = format!("[{token}]");
            let mut next = Vec::with_capacity(segments.len());
            for segment in segments {
                match segment {
                    Segment::Text { text } if text.contains(&needle) => {
                        let mut parts = text.split(needle.as_str()).peekable();
                        while let Some(part) = parts.next() {
                            if !part.is_empty() {
                                next.push(Segment::Text {
                                    text: part.to_string(),
                                });
                            }
                            if parts.peek().is_some() {
                                next.push(Segment::Emote {
                                    token: token.clone(),
                                    file: file.clone(),
                                });
                            }
                        }
                    }
                    other => next.push(other),
                }
            }
            segments = next;
        }

        segments
    }

    /// Render segments as HTML for the page. Text is escaped.
    pub fn render_html(&self, segments: &[Segment]) -> String {
        let mut out = String::new();
        for segment in segments {
            match segment {
                Segment::Text { text } => out.push_str(&escape_html(text)),
                Segment::Emote { file, .. } => {
                    let file = escape_html(file);
                    out.push_str(&format!(
                        "<img class='emote' src='{}{}' alt='{}'>",
                        self.base_url, file, file
                    ));
                }
            }
        }
        out
    }
}

/// Render segments for a terminal: emotes become `:token:`.
pub fn render_plain(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|segment| match segment {
            Segment::Text { text } => text.clone(),
            Segment::Emote { token, .. } => format!(":{token}:"),
        })
        .collect()
}

/// Flatten segments back into source text (`[token]` for emotes).
pub fn to_source(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|segment| match segment {
            Segment::Text { text } => text.clone(),
            Segment::Emote { token, .. } => format!("[{token}]"),
        })
        .collect()
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
