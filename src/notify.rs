use axum::async_trait;
use tracing::info;

/// Outbound channel for password-reset links. Mail delivery plugs in here.
#[async_trait]
pub trait ResetNotifier: Send + Sync {
    async fn send_password_reset(&self, email: &str, reset_link: &str) -> anyhow::Result<()>;
}

/// Writes the reset link to the log instead of sending mail.
#[derive(Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl ResetNotifier for LogNotifier {
    async fn send_password_reset(&self, email: &str, reset_link: &str) -> anyhow::Result<()> {
        info!(%email, %reset_link, "password reset requested; no mail transport configured");
        Ok(())
    }
}
