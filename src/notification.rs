use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::sync::LazyLock;

// RFC 1123 subdomain (pod names) and label (namespaces), as the API server validates them.
static DNS_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("valid DNS subdomain pattern")
});
static DNS_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid DNS label pattern")
});

/// Image-update notification as posted by Diun's webhook notifier.
/// Only the fields needed to locate the pod are decoded; anything else in
/// the payload is ignored.
#[derive(Debug, Deserialize)]
pub struct ImageUpdateNotification {
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    pub metadata: NotificationMetadata,
}

#[derive(Debug, Deserialize)]
pub struct NotificationMetadata {
    pub pod_name: String,
    #[serde(default)]
    pub pod_namespace: Option<String>,
    #[serde(default)]
    pub ctn_name: Option<String>,
}

/// Fully resolved identity of the pod a notification refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub namespace: String,
    pub pod_name: String,
    pub container_name: Option<String>,
}

#[derive(Debug)]
pub enum DecodeError {
    Malformed(serde_json::Error),
    MissingPodName,
    InvalidPodName(String),
    InvalidNamespace(String),
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Malformed(e) => Some(e),
            DecodeError::MissingPodName
            | DecodeError::InvalidPodName(_)
            | DecodeError::InvalidNamespace(_) => None,
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed(e) => write!(f, "malformed notification body: {}", e),
            DecodeError::MissingPodName => write!(f, "metadata.pod_name must not be empty"),
            DecodeError::InvalidPodName(name) => write!(
                f,
                "metadata.pod_name {:?} is not a valid RFC 1123 subdomain",
                name
            ),
            DecodeError::InvalidNamespace(namespace) => write!(
                f,
                "metadata.pod_namespace {:?} is not a valid RFC 1123 label",
                namespace
            ),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pod {}/{}", self.namespace, self.pod_name)?;
        if let Some(container) = &self.container_name {
            write!(f, " container {}", container)?;
        }
        Ok(())
    }
}

impl ImageUpdateNotification {
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let notification: Self = serde_json::from_slice(body).map_err(DecodeError::Malformed)?;
        let pod_name = notification.metadata.pod_name.trim();
        if pod_name.is_empty() {
            return Err(DecodeError::MissingPodName);
        }
        if pod_name.len() > 253 || !DNS_SUBDOMAIN.is_match(pod_name) {
            return Err(DecodeError::InvalidPodName(pod_name.to_string()));
        }
        if let Some(namespace) = notification
            .metadata
            .pod_namespace
            .as_deref()
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
        {
            if namespace.len() > 63 || !DNS_LABEL.is_match(namespace) {
                return Err(DecodeError::InvalidNamespace(namespace.to_string()));
            }
        }
        Ok(notification)
    }

    /// Splits the notification into the pod to reconcile and the observed
    /// digest. Blank optional fields count as absent, and a missing namespace
    /// resolves to `default_namespace`.
    pub fn into_target(self, default_namespace: &str) -> (Target, Option<String>) {
        let metadata = self.metadata;
        let target = Target {
            namespace: non_blank(metadata.pod_namespace)
                .unwrap_or_else(|| default_namespace.to_string()),
            pod_name: metadata.pod_name.trim().to_string(),
            container_name: non_blank(metadata.ctn_name),
        };
        (target, non_blank(self.digest))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
