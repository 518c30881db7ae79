//! Email notifications requested by the auth core.
//!
//! Delivery is someone else's job; implementations report success as a bool
//! and the core never rolls back a token or account mutation on `false`.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::auth::reset::token_link;

#[async_trait]
pub trait EmailNotifier: Send + Sync {
    async fn send_password_reset_email(&self, to: &str, token: &str, reset_url_base: &str)
    -> bool;

    async fn send_welcome_email(&self, to: &str, display_name: &str) -> bool;

    async fn send_confirmation_email(&self, to: &str, token: &str, confirm_url_base: &str)
    -> bool;
}

/// Notifier that only records deliveries in the log. Links are logged at
/// debug level since they carry live tokens. A link base that is not an
/// absolute URL counts as a failed delivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl EmailNotifier for LogNotifier {
    async fn send_password_reset_email(
        &self,
        to: &str,
        token: &str,
        reset_url_base: &str,
    ) -> bool {
        match token_link(reset_url_base, to, token) {
            Ok(link) => {
                info!(to, "password reset email queued");
                debug!(%link, "password reset link");
                true
            }
            Err(e) => {
                warn!(to, base = reset_url_base, error = %e, "cannot build password reset link");
                false
            }
        }
    }

    async fn send_welcome_email(&self, to: &str, display_name: &str) -> bool {
        info!(to, display_name, "welcome email queued");
        true
    }

    async fn send_confirmation_email(
        &self,
        to: &str,
        token: &str,
        confirm_url_base: &str,
    ) -> bool {
        match token_link(confirm_url_base, to, token) {
            Ok(link) => {
                info!(to, "confirmation email queued");
                debug!(%link, "confirmation link");
                true
            }
            Err(e) => {
                warn!(to, base = confirm_url_base, error = %e, "cannot build confirmation link");
                false
            }
        }
    }
}
