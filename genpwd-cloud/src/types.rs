//! Shared types for cloud provider operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported (and planned) storage back ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "GOOGLE_DRIVE")]
    GoogleDrive,
    #[serde(rename = "WEBDAV")]
    WebDav,
    #[serde(rename = "ONEDRIVE")]
    OneDrive,
    #[serde(rename = "PCLOUD")]
    PCloud,
    #[serde(rename = "PROTON_DRIVE")]
    ProtonDrive,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::GoogleDrive,
        ProviderKind::WebDav,
        ProviderKind::OneDrive,
        ProviderKind::PCloud,
        ProviderKind::ProtonDrive,
    ];

    /// Identifier used in OAuth state tokens and storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::GoogleDrive => "GOOGLE_DRIVE",
            ProviderKind::WebDav => "WEBDAV",
            ProviderKind::OneDrive => "ONEDRIVE",
            ProviderKind::PCloud => "PCLOUD",
            ProviderKind::ProtonDrive => "PROTON_DRIVE",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::GoogleDrive => "Google Drive",
            ProviderKind::WebDav => "WebDAV",
            ProviderKind::OneDrive => "OneDrive",
            ProviderKind::PCloud => "pCloud",
            ProviderKind::ProtonDrive => "Proton Drive",
        }
    }

    /// Template variants have no working transport.
    pub fn is_template(&self) -> bool {
        matches!(
            self,
            ProviderKind::OneDrive | ProviderKind::PCloud | ProviderKind::ProtonDrive
        )
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown provider kind: {s}"))
    }
}

/// An authenticated account with a cloud provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct CloudAccount {
    pub id: String,
    pub provider: ProviderKind,
    pub display_name: String,
    pub email: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl CloudAccount {
    /// Returns true if the access token will expire within the given seconds.
    pub fn expires_within_secs(&self, secs: i64) -> bool {
        Utc::now() + chrono::Duration::seconds(secs) >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Key under which the account is stored in a credential store.
    pub fn storage_key(&self) -> String {
        storage_key(self.provider, &self.id)
    }
}

pub(crate) fn storage_key(provider: ProviderKind, account_id: &str) -> String {
    format!("{}:{}", provider.as_str(), account_id)
}

impl fmt::Debug for CloudAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudAccount")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("display_name", &self.display_name)
            .field("email", &self.email)
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A vault file stored remotely.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteVaultRef {
    /// Provider-specific identifier (Drive file id, WebDAV href).
    pub id: String,
    pub name: String,
    pub provider: ProviderKind,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Storage usage reported by a provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaInfo {
    pub used_bytes: u64,
    /// `None` when the provider reports unlimited or unknown capacity.
    pub total_bytes: Option<u64>,
}

impl QuotaInfo {
    pub fn available_bytes(&self) -> Option<u64> {
        self.total_bytes
            .map(|total| total.saturating_sub(self.used_bytes))
    }
}

/// Result of [`crate::CloudProvider::authenticate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Already holding usable credentials.
    Authenticated,
    /// The user must finish the flow in a browser; the callback completes it.
    Pending { authorization_url: String },
}

/// Accepts either a JSON number or a string-encoded number (Drive returns
/// int64 fields as strings).
pub(crate) fn deserialize_u64_from_str_or_num<'de, D>(
    deserializer: D,
) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct U64Visitor;

    impl<'de> de::Visitor<'de> for U64Visitor {
        type Value = Option<u64>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a number or string-encoded number")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            u64::try_from(v).map(Some).map_err(de::Error::custom)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            v.parse().map(Some).map_err(de::Error::custom)
        }
    }

    deserializer.deserialize_any(U64Visitor)
}
