use std::collections::BTreeMap;

use ads::Value;
use serde::Serialize;

use crate::{ErrorKind, Result};

/// Metadata key carrying the sanitised symbol name.
pub const SYMBOL_NAME: &str = "symbol_name";

/// One decoded value, ready to become a message.
#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    pub symbol: String,
    pub value: Value,
    /// Unix nanoseconds: PLC time for notifications, host time for interval reads.
    pub timestamp: Option<i64>,
}

#[derive(Serialize)]
struct Body<'a> {
    #[serde(rename = "Variable")]
    variable: &'a str,
    #[serde(rename = "Value")]
    value: &'a Value,
    #[serde(rename = "TimeStamp")]
    timestamp: Option<i64>,
}

/// A message handed to the host pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub body: Vec<u8>,
    pub metadata: BTreeMap<String, String>,
}

impl Message {
    pub fn from_update(update: &Update) -> Result<Self> {
        let body = serde_json::to_vec(&Body {
            variable: &update.symbol,
            value: &update.value,
            timestamp: update.timestamp,
        })
        .map_err(ErrorKind::Encode)?;

        let mut metadata = BTreeMap::new();
        metadata.insert(SYMBOL_NAME.to_owned(), sanitise(&update.symbol));

        Ok(Message { body, metadata })
    }

    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

pub type Batch = Vec<Message>;

/// Acknowledges a batch. There is nothing to replay, so this always succeeds.
#[derive(Debug)]
pub struct Ack(());

impl Ack {
    pub(crate) fn new() -> Self {
        Ack(())
    }

    pub async fn ack(self, _outcome: Result<()>) -> Result<()> {
        Ok(())
    }
}

/// Replaces every character outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitise(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
