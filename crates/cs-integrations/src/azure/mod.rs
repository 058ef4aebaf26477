//! Azure identity and Cloud Shell endpoints.
//!
//! [`oauth::TokenAuthenticator`] obtains and refreshes bearer credentials;
//! [`cloud_shell::CloudShellProvisioner`] turns a credential into a
//! terminal socket endpoint.

pub mod cloud_shell;
pub mod oauth;

/// Trim a trailing slash so paths can be appended with `format!`.
pub(crate) fn trim_base(url: &str) -> &str {
    url.trim_end_matches('/')
}
