//! Cross-chunk tag filter
//!
//! Suppresses text delimited by any of a configured set of XML-like tag
//! names (e.g. `xaiartifact`, `xai:tool_usage_card`), including cases where
//! the opening `<`, the tag name, or the closing tag straddle multiple
//! upstream tokens. Single-owner, single-threaded: one filter per stream.

/// Character-by-character scanner with three states: outside, pending
/// (a `<` was seen and may still become a configured tag), and in-tag.
///
/// Invariant: at most one of `in_tag` and a non-empty `pending` holds at
/// a time.
#[derive(Debug)]
pub struct TagFilter {
    tags: Vec<String>,
    in_tag: bool,
    tag_buf: String,
    pending: String,
}

impl TagFilter {
    pub fn new(tags: Vec<String>) -> Self {
        Self {
            tags: tags.into_iter().filter(|t| !t.is_empty()).collect(),
            in_tag: false,
            tag_buf: String::new(),
            pending: String::new(),
        }
    }

    /// Consume one token, return the emittable text.
    ///
    /// Bytes that might still form an opening tag are withheld; they are
    /// either suppressed (the tag matched) or emitted verbatim once
    /// disambiguated. The filter never emits partial tag bytes as content.
    pub fn filter(&mut self, token: &str) -> String {
        if self.tags.is_empty() {
            return token.to_string();
        }

        let mut out = String::with_capacity(token.len());
        for ch in token.chars() {
            if self.in_tag {
                self.consume_in_tag(ch);
            } else if !self.pending.is_empty() {
                self.pending.push(ch);
                self.resolve_pending(&mut out);
            } else if ch == '<' {
                self.pending.push(ch);
            } else {
                out.push(ch);
            }
        }
        out
    }

    /// Stream end: return any still-pending prefix.
    pub fn flush(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }

    /// Clear all state.
    pub fn reset(&mut self) {
        self.in_tag = false;
        self.tag_buf.clear();
        self.pending.clear();
    }

    fn consume_in_tag(&mut self, ch: char) {
        self.tag_buf.push(ch);
        if ch != '>' {
            return;
        }
        // Self-close, or a complete closing tag for any configured name.
        // An attribute `>` also matches a plain `>` here; accepted limitation.
        let closed = self.tag_buf.ends_with("/>")
            || self
                .tags
                .iter()
                .any(|t| self.tag_buf.contains(&format!("</{}>", t)));
        if closed {
            self.in_tag = false;
            self.tag_buf.clear();
        }
    }

    /// After extending `pending`, decide: commit to in-tag, keep waiting,
    /// or emit the prefix verbatim (it was not a tag after all).
    fn resolve_pending(&mut self, out: &mut String) {
        let mut still_ambiguous = false;
        for tag in &self.tags {
            let open = format!("<{}", tag);
            if self.pending.starts_with(&open) {
                // Full open-tag prefix seen: commit.
                self.in_tag = true;
                self.tag_buf = std::mem::take(&mut self.pending);
                return;
            }
            if open.starts_with(self.pending.as_str()) && open.len() > self.pending.len() {
                still_ambiguous = true;
            }
        }
        if !still_ambiguous {
            out.push_str(&self.pending);
            self.pending.clear();
        }
    }
}
