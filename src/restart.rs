use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};

pub static KUBE_ROLLOUT_WEBHOOK_ANNOTATION: &str = "kube-rollout-webhook/restartedAt";
pub static KUBECTL_ROLLOUT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// Pod-template annotation used to request a rolling restart. The kubectl
/// key makes restarts indistinguishable from `kubectl rollout restart`.
pub fn restart_annotation(enable_kubectl_annotation: bool) -> &'static str {
    match enable_kubectl_annotation {
        true => KUBECTL_ROLLOUT_ANNOTATION,
        false => KUBE_ROLLOUT_WEBHOOK_ANNOTATION,
    }
}

/// RFC 3339 in UTC with second precision, e.g. `2026-10-17T08:30:05Z`.
pub fn restart_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Merge patch touching nothing but the restart annotation of the pod template.
pub fn restart_patch(annotation: &str, restarted_at: &str) -> Value {
    json!({
        "spec": {
            "template": {
                "metadata": {
                    "annotations": {
                        annotation: restarted_at,
                    }
                }
            }
        }
    })
}

/// Reads the restart annotation back out of a patch built by [`restart_patch`].
#[cfg(test)]
pub(crate) fn restarted_at<'a>(patch: &'a Value, annotation: &str) -> Option<&'a str> {
    patch
        .pointer("/spec/template/metadata/annotations")
        .and_then(|annotations| annotations.get(annotation))
        .and_then(Value::as_str)
}
