//! Relay subscription filters.

use std::collections::BTreeMap;

use crate::EventRecord;

/// A relay filter (NIP-01).
///
/// Every populated field must match; within a field any listed value matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub ids: Option<Vec<String>>,
    pub authors: Option<Vec<String>>,
    pub kinds: Option<Vec<u32>>,
    /// Single-letter tag queries, e.g. `#e`, `#p`.
    pub tags: BTreeMap<char, Vec<String>>,
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub limit: Option<usize>,
    /// Free-text search (NIP-50); relay dependent.
    pub search: Option<String>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u32>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Match events carrying a `#<name>` tag with one of `values`.
    pub fn tag<I, S>(mut self, name: char, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .insert(name, values.into_iter().map(Into::into).collect());
        self
    }

    /// Shorthand for `#e`.
    pub fn event_refs<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tag('e', ids)
    }

    /// Shorthand for `#p`.
    pub fn participant_refs<I, S>(self, participants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tag('p', participants)
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn search(mut self, query: impl Into<String>) -> Self {
        self.search = Some(query.into());
        self
    }

    /// Whether `event` satisfies every populated field.
    ///
    /// `limit` is not a per-event property and is ignored here. `search` is
    /// approximated as a case-insensitive substring match on content.
    pub fn matches(&self, event: &EventRecord) -> bool {
        if let Some(ids) = &self.ids
            && !ids.iter().any(|id| id == &event.id)
        {
            return false;
        }
        if let Some(authors) = &self.authors
            && !authors.iter().any(|a| a == &event.author)
        {
            return false;
        }
        if let Some(kinds) = &self.kinds
            && !kinds.contains(&event.kind)
        {
            return false;
        }
        if self.since.is_some_and(|since| event.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| event.created_at > until) {
            return false;
        }
        for (name, values) in &self.tags {
            let name = name.to_string();
            if !event
                .tag_values(&name)
                .any(|v| values.iter().any(|want| want == v))
            {
                return false;
            }
        }
        if let Some(query) = &self.search
            && !event
                .content
                .to_lowercase()
                .contains(&query.to_lowercase())
        {
            return false;
        }
        true
    }
}
