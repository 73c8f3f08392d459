//! The record shape shared by every source.
//!
//! Each scraped item, whatever its origin, becomes one [`Record`] with the
//! same six fields in the same order. The field order doubles as the column
//! order of the snapshot file, so the serde renames below are the CSV header.

use serde::{Deserialize, Serialize};

/// One scraped item.
///
/// Records are immutable once built: construct with [`Record::new`] and the
/// `with_*` builders, read with the accessors.
///
/// # Fields
///
/// * `platform` - Tag identifying the kind of source (`"Twitter"`, `"Reddit"`, ...)
/// * `author` - Author or community name, empty when unknown
/// * `id` - Upstream identifier, empty when the source has none
/// * `content` - Primary text payload
/// * `timestamp` - Source-native date string, `None` when absent
/// * `link_or_tags` - A URL or a serialized hashtag list, depending on platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "Platform")]
    platform: String,
    #[serde(rename = "User")]
    author: String,
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Content")]
    content: String,
    #[serde(rename = "Date")]
    timestamp: Option<String>,
    #[serde(rename = "URL/Hashtags")]
    link_or_tags: String,
}

impl Record {
    /// Column headers, in field order.
    pub const HEADER: [&'static str; 6] = ["Platform", "User", "ID", "Content", "Date", "URL/Hashtags"];

    /// Start a record with its platform tag and content; the other fields are empty.
    pub fn new(platform: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            author: String::new(),
            id: String::new(),
            content: content.into(),
            timestamp: None,
            link_or_tags: String::new(),
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the timestamp. Empty strings are stored as absent.
    pub fn with_timestamp<S: Into<String>>(mut self, timestamp: Option<S>) -> Self {
        self.timestamp = timestamp.map(Into::<String>::into).filter(|t| !t.is_empty());
        self
    }

    pub fn with_link_or_tags(mut self, link_or_tags: impl Into<String>) -> Self {
        self.link_or_tags = link_or_tags.into();
        self
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.timestamp.as_deref()
    }

    pub fn link_or_tags(&self) -> &str {
        &self.link_or_tags
    }

    /// The six fields in column order, absent values as empty strings.
    pub fn fields(&self) -> [&str; 6] {
        [
            self.platform.as_str(),
            self.author.as_str(),
            self.id.as_str(),
            self.content.as_str(),
            self.timestamp.as_deref().unwrap_or_default(),
            self.link_or_tags.as_str(),
        ]
    }
}
