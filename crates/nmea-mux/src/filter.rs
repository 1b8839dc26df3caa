//! Per-channel device and sentence filters.
//!
//! A filter list holds talker ids (device filters) or sentence ids (sentence
//! filters). An entry prefixed with `~` excludes matching sentences. When the
//! list holds at least one plain entry, only sentences matching one of them
//! pass.

use nmea_protocol::{classify, SentenceHeader};
use serde::{Deserialize, Serialize};

/// One entry of a filter list.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    negated: bool,
    id: String,
}

impl Rule {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (negated, id) = match raw.strip_prefix('~') {
            Some(rest) => (true, rest.trim()),
            None => (false, raw),
        };
        if id.is_empty() {
            return None;
        }
        Some(Self {
            negated,
            id: id.to_ascii_uppercase(),
        })
    }
}

fn list_accepts(rules: &[Rule], value: &str) -> bool {
    if rules.iter().any(|r| r.negated && r.id.eq_ignore_ascii_case(value)) {
        return false;
    }
    let mut wanted = rules.iter().filter(|r| !r.negated).peekable();
    if wanted.peek().is_none() {
        return true;
    }
    wanted.any(|r| r.id.eq_ignore_ascii_case(value))
}

/// Filter lists as they appear in configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilterLists {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    device_filters: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    sentence_filters: Vec<String>,
}

/// Device and sentence filters attached to a channel.
///
/// Rules are parsed once, when the filter is built or deserialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FilterLists", into = "FilterLists")]
pub struct SentenceFilter {
    device_filters: Vec<String>,
    sentence_filters: Vec<String>,
    devices: Vec<Rule>,
    sentences: Vec<Rule>,
}

impl From<FilterLists> for SentenceFilter {
    fn from(lists: FilterLists) -> Self {
        Self::new(lists.device_filters, lists.sentence_filters)
    }
}

impl From<SentenceFilter> for FilterLists {
    fn from(filter: SentenceFilter) -> Self {
        Self {
            device_filters: filter.device_filters,
            sentence_filters: filter.sentence_filters,
        }
    }
}

impl SentenceFilter {
    pub fn new(device_filters: Vec<String>, sentence_filters: Vec<String>) -> Self {
        let devices = device_filters.iter().filter_map(|d| Rule::parse(d)).collect();
        let sentences = sentence_filters.iter().filter_map(|s| Rule::parse(s)).collect();
        Self {
            device_filters,
            sentence_filters,
            devices,
            sentences,
        }
    }

    pub fn device_filters(&self) -> &[String] {
        &self.device_filters
    }

    pub fn sentence_filters(&self) -> &[String] {
        &self.sentence_filters
    }

    /// Accept everything.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.sentences.is_empty()
    }

    /// Whether the classified sentence passes both filters.
    pub fn accepts_header(&self, header: &SentenceHeader) -> bool {
        list_accepts(&self.devices, &header.talker) && list_accepts(&self.sentences, &header.id)
    }

    /// Whether a raw sentence passes.
    ///
    /// Lines that cannot be classified pass through; the dispatcher rejects
    /// them.
    pub fn accepts(&self, raw: &str) -> bool {
        if self.is_empty() {
            return true;
        }
        match classify(raw) {
            Ok(header) => self.accepts_header(&header),
            Err(_) => true,
        }
    }
}
