//! Remote query parameters shared by every capability adapter

use core_library::{ExternalId, MediaKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Title,
    ReleaseDate,
    DateAdded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Filter and paging parameters for adapter reads
///
/// # Example
///
/// ```ignore
/// let query = MediaQuery::new()
///     .limit(200)
///     .offset(400)
///     .sort_by(SortField::Title, SortDirection::Asc);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MediaQuery {
    /// Maximum number of results; `None` lets the client decide
    pub limit: Option<u32>,
    pub offset: u32,
    pub sort: Option<(SortField, SortDirection)>,
    /// Free-text filter, matched against titles
    pub text: Option<String>,
    /// Restrict results to items carrying this external identifier
    pub external_id: Option<ExternalId>,
    pub media_kind: Option<MediaKind>,
}

impl MediaQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query for the `index`-th page of `page_size` items
    pub fn page(page_size: u32, index: u32) -> Self {
        Self::new().limit(page_size).offset(page_size.saturating_mul(index))
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn sort_by(mut self, field: SortField, direction: SortDirection) -> Self {
        self.sort = Some((field, direction));
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn external_id(mut self, id: ExternalId) -> Self {
        self.external_id = Some(id);
        self
    }

    pub fn media_kind(mut self, kind: MediaKind) -> Self {
        self.media_kind = Some(kind);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::ExternalSource;

    #[test]
    fn test_query_builder() {
        let query = MediaQuery::page(50, 2)
            .sort_by(SortField::ReleaseDate, SortDirection::Desc)
            .text("dune")
            .external_id(ExternalId::new(ExternalSource::Tmdb, "438631"))
            .media_kind(MediaKind::Movie);

        assert_eq!(query.limit, Some(50));
        assert_eq!(query.offset, 100);
        assert_eq!(query.sort, Some((SortField::ReleaseDate, SortDirection::Desc)));
        assert_eq!(query.text.as_deref(), Some("dune"));
        assert_eq!(query.media_kind, Some(MediaKind::Movie));
    }
}
