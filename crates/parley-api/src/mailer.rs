use tracing::info;

/// Outbound delivery of account verification links. Real SMTP lives behind
/// this seam; the server wires in [`LogMailer`] by default, which is enough
/// for development and tests.
pub trait Mailer: Send + Sync {
    fn send_verification(&self, email: &str, username: &str, token: &str);
}

/// Logs the verification link instead of delivering it.
pub struct LogMailer {
    public_url: String,
}

impl LogMailer {
    pub fn new(public_url: impl Into<String>) -> Self {
        Self {
            public_url: public_url.into(),
        }
    }
}

impl Mailer for LogMailer {
    fn send_verification(&self, email: &str, username: &str, token: &str) {
        let link = format!("{}/session/verify-email?token={}", self.public_url, token);
        info!("Verification email for {} <{}>: {}", username, email, link);
    }
}
