//! Catalog item model and category enum

use serde::{Deserialize, Serialize};
use sqlx::{Decode, Encode, FromRow, Postgres};

use super::BookId;

/// Classification bucket against which per-member loan quotas are enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BookCategory {
    Book,
    Publication,
}

impl BookCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookCategory::Book => "BOOK",
            BookCategory::Publication => "PUBLICATION",
        }
    }
}

impl std::fmt::Display for BookCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BookCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BOOK" => Ok(BookCategory::Book),
            "PUBLICATION" => Ok(BookCategory::Publication),
            _ => Err(format!("Invalid book category: {}", s)),
        }
    }
}

// SQLx conversion for BookCategory (stored as TEXT)
impl sqlx::Type<Postgres> for BookCategory {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<Postgres>>::type_info()
    }
}

impl<'r> Decode<'r, Postgres> for BookCategory {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s: String = Decode::<Postgres>::decode(value)?;
        s.parse().map_err(|e: String| e.into())
    }
}

impl Encode<'_, Postgres> for BookCategory {
    fn encode_by_ref(&self, buf: &mut sqlx::postgres::PgArgumentBuffer) -> sqlx::encode::IsNull {
        let s: String = self.as_str().to_string();
        <String as Encode<Postgres>>::encode(s, buf)
    }
}

/// Catalog item. Loanable stock is tracked per physical copy, not here.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub author: Option<String>,
    pub publication_year: Option<i32>,
    pub category: BookCategory,
}
