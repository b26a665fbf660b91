//! Entity services over a [`Store`](crate::store::Store). Each service is a unit struct with
//! associated async functions taking the store handle.

mod classes;
mod enrollment;
mod flashcards;
mod materials;
mod resolve;
mod users;
pub mod validation;

pub use classes::{ClassFilter, ClassService};
pub use enrollment::{AddedClasses, EnrollmentService, StudentFilter};
pub use flashcards::{FlashcardFilter, FlashcardService};
pub use materials::{MaterialFilter, MaterialService};
pub use users::{UserFilter, UserService};
pub use validation::{RequestValidator, Rules, ValidationRule};

use crate::sql::MAX_LIMIT;
use crate::store::Query;
use serde::Deserialize;

/// Listing size when the caller gives no limit.
pub const DEFAULT_LIMIT: u32 = 100;

/// `limit` (default 100, max 1000) and `offset` (default 0) from the query string.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct Page {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl Page {
    pub(crate) fn apply(self, query: Query) -> Query {
        query
            .limit(self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT))
            .offset(self.offset.unwrap_or(0))
    }

    /// Page an already materialized list.
    pub(crate) fn slice<T>(self, items: Vec<T>) -> Vec<T> {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT) as usize;
        items
            .into_iter()
            .skip(self.offset.unwrap_or(0) as usize)
            .take(limit)
            .collect()
    }
}
