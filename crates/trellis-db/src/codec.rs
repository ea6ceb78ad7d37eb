//! Value encoding for table rows.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{DbError, DbResult};

pub fn encode<T: Serialize>(value: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(table: &str, bytes: &[u8]) -> DbResult<T> {
    bincode::deserialize(bytes).map_err(|e| DbError::CorruptRow {
        table: table.to_string(),
        reason: e.to_string(),
    })
}
