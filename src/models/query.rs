//! Paging and ordering parameters shared by list accessors

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Rows are ordered by creation time, then id, in `direction`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub offset: i64,
    pub limit: Option<i64>,
    #[serde(default)]
    pub direction: SortDirection,
}

impl ListParams {
    pub fn page(offset: i64, limit: i64) -> Self {
        Self {
            offset,
            limit: Some(limit),
            direction: SortDirection::default(),
        }
    }

    pub fn ascending() -> Self {
        Self {
            direction: SortDirection::Asc,
            ..Self::default()
        }
    }
}
