//! Safe filter/sort/pagination composition for the run listing.
//!
//! Sort keys and filter fields are closed enums mapped to SQL fragments at
//! definition time. Caller-controlled strings never reach a column or
//! direction position in a statement; values travel as bound parameters.

use rusqlite::types::Value;

use crate::error::AppError;

pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;

/// Allow-listed sort targets for the run listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    PlayedAt,
    FinalAnte,
    FinalScore,
    CreatedAt,
}

impl SortKey {
    pub fn as_column(&self) -> &'static str {
        match self {
            SortKey::PlayedAt => "played_at",
            SortKey::FinalAnte => "final_ante",
            SortKey::FinalScore => "final_score",
            SortKey::CreatedAt => "created_at",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "played_at" => Some(SortKey::PlayedAt),
            "final_ante" => Some(SortKey::FinalAnte),
            "final_score" => Some(SortKey::FinalScore),
            "created_at" => Some(SortKey::CreatedAt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "asc" => Some(SortOrder::Asc),
            "desc" => Some(SortOrder::Desc),
            _ => None,
        }
    }
}

/// Equality filters over the enumerated filterable run fields.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub deck: Option<String>,
    pub stake: Option<String>,
    pub won: Option<bool>,
}

impl RunFilter {
    /// Build the WHERE fragment and its bound parameters. Placeholders are
    /// numbered in push order so the fragment composes with `params_from_iter`.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        if let Some(deck) = &self.deck {
            params.push(Value::Text(deck.clone()));
            conditions.push(format!("deck = ?{}", params.len()));
        }
        if let Some(stake) = &self.stake {
            params.push(Value::Text(stake.clone()));
            conditions.push(format!("stake = ?{}", params.len()));
        }
        if let Some(won) = self.won {
            params.push(Value::Integer(won as i64));
            conditions.push(format!("won = ?{}", params.len()));
        }

        let where_sql = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        (where_sql, params)
    }
}

/// Validated page window. Constructed only through `new`, so any held value
/// satisfies `page >= 1` and `1 <= per_page <= MAX_PER_PAGE`.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    page: u32,
    per_page: u32,
}

impl Pagination {
    pub fn new(page: u32, per_page: u32) -> Result<Self, AppError> {
        if page < 1 {
            return Err(AppError::invalid(format!("page must be >= 1, got {}", page)));
        }
        if per_page < 1 || per_page > MAX_PER_PAGE {
            return Err(AppError::invalid(format!(
                "per_page must be in 1..={}, got {}",
                MAX_PER_PAGE, per_page
            )));
        }
        Ok(Pagination { page, per_page })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    pub fn offset(&self) -> u32 {
        (self.page - 1) * self.per_page
    }

    /// ceil(total / per_page); zero rows means zero pages.
    pub fn total_pages(&self, total: u32) -> u32 {
        if total == 0 {
            0
        } else {
            total.div_ceil(self.per_page)
        }
    }
}

/// Fully validated listing query, ready for the storage layer.
#[derive(Debug, Clone)]
pub struct RunQuery {
    pub filter: RunFilter,
    pub sort: SortKey,
    pub order: SortOrder,
    pub page: Pagination,
}

impl RunQuery {
    /// Parse raw request values at the boundary. Anything outside the
    /// allow-lists is rejected here, before any statement is built.
    pub fn parse(
        filter: RunFilter,
        sort: Option<&str>,
        order: Option<&str>,
        page: Option<u32>,
        per_page: Option<u32>,
    ) -> Result<Self, AppError> {
        let sort = match sort {
            Some(s) => SortKey::from_str(s)
                .ok_or_else(|| AppError::invalid(format!("unknown sort key '{}'", s)))?,
            None => SortKey::PlayedAt,
        };
        let order = match order {
            Some(o) => SortOrder::from_str(o)
                .ok_or_else(|| AppError::invalid(format!("unknown sort order '{}'", o)))?,
            None => SortOrder::Desc,
        };
        let page = Pagination::new(page.unwrap_or(1), per_page.unwrap_or(DEFAULT_PER_PAGE))?;
        Ok(RunQuery { filter, sort, order, page })
    }

    /// ORDER BY fragment. Both pieces come from closed enums.
    pub fn order_sql(&self) -> String {
        format!("ORDER BY {} {} NULLS LAST", self.sort.as_column(), self.order.as_sql())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_math() {
        let p = Pagination::new(1, 20).unwrap();
        assert_eq!(p.total_pages(95), 5);
        assert_eq!(p.total_pages(100), 5);
        assert_eq!(p.total_pages(101), 6);
        assert_eq!(p.total_pages(0), 0);
        assert_eq!(p.offset(), 0);

        let p3 = Pagination::new(3, 20).unwrap();
        assert_eq!(p3.offset(), 40);
    }

    #[test]
    fn test_pagination_bounds() {
        assert!(Pagination::new(0, 20).is_err());
        assert!(Pagination::new(1, 0).is_err());
        assert!(Pagination::new(1, 101).is_err());
        assert!(Pagination::new(1, 100).is_ok());
    }

    #[test]
    fn test_sort_key_allow_list() {
        assert_eq!(SortKey::from_str("played_at"), Some(SortKey::PlayedAt));
        assert_eq!(SortKey::from_str("final_ante"), Some(SortKey::FinalAnte));
        assert_eq!(SortKey::from_str("final_score"), Some(SortKey::FinalScore));
        assert_eq!(SortKey::from_str("created_at"), Some(SortKey::CreatedAt));
        assert_eq!(SortKey::from_str("deck"), None);
        assert_eq!(SortKey::from_str("id; DROP TABLE runs"), None);
    }

    #[test]
    fn test_parse_rejects_unknown_sort() {
        let err = RunQuery::parse(RunFilter::default(), Some("seed"), None, None, None);
        assert!(matches!(err, Err(AppError::InvalidArgument(_))));

        let err = RunQuery::parse(RunFilter::default(), None, Some("sideways"), None, None);
        assert!(matches!(err, Err(AppError::InvalidArgument(_))));
    }

    #[test]
    fn test_filter_sql_composition() {
        let filter = RunFilter {
            deck: Some("Red Deck".to_string()),
            stake: Some("Gold".to_string()),
            won: Some(true),
        };
        let (where_sql, params) = filter.to_sql();
        assert_eq!(where_sql, "WHERE deck = ?1 AND stake = ?2 AND won = ?3");
        assert_eq!(params.len(), 3);

        let (empty, no_params) = RunFilter::default().to_sql();
        assert_eq!(empty, "");
        assert!(no_params.is_empty());
    }

    #[test]
    fn test_order_sql_from_enums() {
        let q = RunQuery::parse(RunFilter::default(), Some("final_score"), Some("asc"), None, None)
            .unwrap();
        assert_eq!(q.order_sql(), "ORDER BY final_score ASC NULLS LAST");
    }
}
