//! Typed access to the two singleton records.
//!
//! The relay serves one device and one browser, so each record lives under a
//! constant key. Key derivation is confined to this module.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::store::DocumentStore;

/// Address of a stored record, displayed as `Kind/key` in logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordKey {
    pub kind: &'static str,
    pub key: &'static str,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.key)
    }
}

pub const CURRENT_MESSAGE: RecordKey = RecordKey {
    kind: "CurrentMessage",
    key: "global",
};

// "avalon": arbitrary word starting with A, for "the first channel".
pub const CHANNEL_INFO: RecordKey = RecordKey {
    kind: "ChannelInfo",
    key: "avalon",
};

/// The message the poller should currently be playing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CurrentMessage {
    pub created_at: DateTime<Utc>,
    pub url: String,
    pub duration_ms: i64,
}

/// The browser client registered for push notifications.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChannelInfo {
    pub created_at: DateTime<Utc>,
    /// Caller address at registration time. Diagnostic only.
    pub remote_addr: String,
    pub client_id: String,
}

#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn DocumentStore>,
}

impl Repository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn current_message(&self) -> Result<Option<CurrentMessage>> {
        self.get(CURRENT_MESSAGE).await
    }

    pub async fn put_current_message(&self, msg: &CurrentMessage) -> Result<()> {
        self.put(CURRENT_MESSAGE, msg).await
    }

    pub async fn delete_current_message(&self) -> Result<()> {
        self.store
            .delete(CURRENT_MESSAGE.kind, CURRENT_MESSAGE.key)
            .await
    }

    pub async fn channel_info(&self) -> Result<Option<ChannelInfo>> {
        self.get(CHANNEL_INFO).await
    }

    pub async fn put_channel_info(&self, info: &ChannelInfo) -> Result<()> {
        self.put(CHANNEL_INFO, info).await
    }

    async fn get<T: DeserializeOwned>(&self, at: RecordKey) -> Result<Option<T>> {
        self.store
            .get(at.kind, at.key)
            .await?
            .map(|doc| serde_json::from_value(doc).with_context(|| format!("malformed {at}")))
            .transpose()
    }

    async fn put<T: Serialize>(&self, at: RecordKey, record: &T) -> Result<()> {
        let doc = serde_json::to_value(record)?;
        self.store.put(at.kind, at.key, doc).await
    }
}
