use crate::secret_string::SecretString;

/// Shared by every request; the cluster client is created once at start-up.
#[derive(Clone)]
pub struct AppState<C> {
    pub(crate) cluster: C,
    pub(crate) default_namespace: String,
    pub(crate) restart_annotation: &'static str,
    pub(crate) webhook_token: Option<SecretString>,
}
