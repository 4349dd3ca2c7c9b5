//! Record encoding.
//!
//! Records are stored as JSON: field-tagged and readable with `redis-cli`, so
//! values written by one build stay decodable by the next. Encoding fails
//! only for values JSON cannot represent (non-finite floats), so whatever is
//! written decodes again. Decoding fails on any bytes that are not a JSON
//! object of the expected shape.

use serde::Serialize;
use serde::de::DeserializeOwned;

pub fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(record)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(bytes)
}
