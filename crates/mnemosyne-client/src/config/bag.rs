//! Local limits on session bag contents.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Size limits checked before a bag is sent to the service.
///
/// Every limit is optional; the default policy accepts any bag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BagPolicy {
    /// Maximum number of entries in a bag.
    #[serde(default)]
    pub max_entries: Option<usize>,
    /// Maximum key length in bytes.
    #[serde(default)]
    pub max_key_len: Option<usize>,
    /// Maximum value length in bytes.
    #[serde(default)]
    pub max_value_len: Option<usize>,
}

impl BagPolicy {
    /// Check a whole bag.
    pub fn validate(&self, bag: &HashMap<String, String>) -> Result<(), String> {
        if let Some(max) = self.max_entries
            && bag.len() > max
        {
            return Err(format!("bag has {} entries, maximum is {max}", bag.len()));
        }
        bag.iter().try_for_each(|(key, value)| self.validate_entry(key, value))
    }

    /// Check a single key/value pair.
    pub fn validate_entry(&self, key: &str, value: &str) -> Result<(), String> {
        if let Some(max) = self.max_key_len
            && key.len() > max
        {
            return Err(format!("bag key {key:?} is {} bytes long, maximum is {max}", key.len()));
        }
        if let Some(max) = self.max_value_len
            && value.len() > max
        {
            return Err(format!(
                "value of bag key {key:?} is {} bytes long, maximum is {max}",
                value.len()
            ));
        }
        Ok(())
    }
}
