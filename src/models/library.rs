//! Library (branch) model

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::LibraryId;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Library {
    pub id: LibraryId,
    pub name: String,
    pub address: Option<String>,
}
