//! Backup export.
//!
//! Three encodings are supported:
//!
//! - `json`: pretty-printed [`ExportDocument`]; record payloads stay as
//!   opaque base64 ciphertext and are never decrypted.
//! - `delimited`: one quoted row per record under a fixed header,
//!   embedded quotes doubled.
//! - `encrypted`: the compact JSON document sealed with the [`Cipher`].
//!
//! Exporting a selection that matches no record is an error rather than
//! an empty file.

use crate::crypto::{Cipher, EncryptionKey};
use crate::error::{CoreError, CoreResult};
use crate::record::Record;
use crate::store::RecordStore;
use crate::types::Timestamp;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Column order of delimited exports.
pub const DELIMITED_COLUMNS: [&str; 8] = [
    "id",
    "kind",
    "sessionId",
    "createdAt",
    "expiresAt",
    "version",
    "source",
    "payload",
];

/// Backup encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Pretty-printed JSON.
    Json,
    /// Quoted, comma-separated rows.
    Delimited,
    /// JSON sealed with the service key.
    Encrypted,
}

impl ExportFormat {
    /// Wire name of the format.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Delimited => "delimited",
            Self::Encrypted => "encrypted",
        }
    }

    /// File extension used when a backup is written to disk.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Delimited => "csv",
            Self::Encrypted => "bin",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "delimited" | "csv" => Ok(Self::Delimited),
            "encrypted" => Ok(Self::Encrypted),
            other => Err(CoreError::validation(format!(
                "unknown backup format: {other}"
            ))),
        }
    }
}

/// The record set carried by `json` and `encrypted` backups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    /// When the export was taken.
    pub exported_at: Timestamp,
    /// Session filter the export was taken with, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Number of records in `records`.
    pub record_count: usize,
    /// The exported records, newest first.
    pub records: Vec<Record>,
}

/// An encoded backup.
#[derive(Debug, Clone)]
pub struct Export {
    /// Encoding of `data`.
    pub format: ExportFormat,
    /// The encoded blob.
    pub data: Vec<u8>,
    /// Number of records in the blob.
    pub record_count: usize,
    /// When the export was taken.
    pub created_at: Timestamp,
}

/// Produces backups of a [`RecordStore`].
pub struct Exporter {
    cipher: Arc<dyn Cipher>,
    key: Arc<EncryptionKey>,
}

impl Exporter {
    /// Creates an exporter sealing encrypted backups with `key`.
    #[must_use]
    pub fn new(cipher: Arc<dyn Cipher>, key: Arc<EncryptionKey>) -> Self {
        Self { cipher, key }
    }

    /// Exports the live records of `session_id` (or all live records).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EmptyExport`] if nothing matches, or a codec
    /// error if serialization fails.
    pub fn export(
        &self,
        store: &dyn RecordStore,
        session_id: Option<&str>,
        format: ExportFormat,
    ) -> CoreResult<Export> {
        let records = store.snapshot(session_id);
        if records.is_empty() {
            return Err(CoreError::EmptyExport {
                session: session_id.map(str::to_owned),
            });
        }

        let created_at = store.now();
        let record_count = records.len();
        let document = ExportDocument {
            exported_at: created_at,
            session_id: session_id.map(str::to_owned),
            record_count,
            records,
        };

        let data = match format {
            ExportFormat::Json => serde_json::to_vec_pretty(&document)?,
            ExportFormat::Delimited => to_delimited(&document.records).into_bytes(),
            ExportFormat::Encrypted => {
                let plain = serde_json::to_vec(&document)?;
                self.cipher.encrypt(&plain, &self.key)?
            }
        };

        tracing::info!(
            format = %format,
            records = record_count,
            bytes = data.len(),
            session = session_id.unwrap_or("*"),
            "backup exported"
        );
        Ok(Export {
            format,
            data,
            record_count,
            created_at,
        })
    }

    /// Decrypts and parses an `encrypted` backup.
    ///
    /// # Errors
    ///
    /// Returns an integrity or format error if the blob does not
    /// authenticate, or a codec error if the plaintext is not a document.
    pub fn open_encrypted(&self, blob: &[u8]) -> CoreResult<ExportDocument> {
        let plain = self.cipher.decrypt(blob, &self.key)?;
        parse_json(&plain)
    }
}

impl fmt::Debug for Exporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exporter")
            .field("cipher", &self.cipher.algorithm())
            .finish_non_exhaustive()
    }
}

/// Parses a `json` backup.
///
/// # Errors
///
/// Returns a codec error if `blob` is not an export document.
pub fn parse_json(blob: &[u8]) -> CoreResult<ExportDocument> {
    Ok(serde_json::from_slice(blob)?)
}

fn to_delimited(records: &[Record]) -> String {
    let mut out = String::new();
    push_row(&mut out, DELIMITED_COLUMNS.iter().map(|c| (*c).to_owned()));
    for r in records {
        push_row(
            &mut out,
            [
                r.id.to_string(),
                r.kind.to_string(),
                r.session_id.clone().unwrap_or_default(),
                r.created_at.as_millis().to_string(),
                r.expires_at
                    .map(|t| t.as_millis().to_string())
                    .unwrap_or_default(),
                r.version.to_string(),
                r.source().unwrap_or_default().to_owned(),
                STANDARD.encode(&r.payload.ciphertext),
            ],
        );
    }
    out
}

fn push_row(out: &mut String, values: impl IntoIterator<Item = String>) {
    let mut first = true;
    for value in values {
        if !first {
            out.push(',');
        }
        first = false;
        out.push('"');
        out.push_str(&value.replace('"', "\"\""));
        out.push('"');
    }
    out.push('\n');
}
