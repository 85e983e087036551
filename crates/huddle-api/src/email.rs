use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body_html: &str) -> Result<()>;
}

/// Writes outgoing mail to the log instead of delivering it. The invite
/// link in the API response stays usable either way.
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, to: &str, subject: &str, _body_html: &str) -> Result<()> {
        info!("Email to {}: {}", to, subject);
        Ok(())
    }
}

/// Subject and HTML body for a workspace invite.
pub fn invite_email(workspace_name: &str, link: &str) -> (String, String) {
    let subject = format!("You've been invited to join {workspace_name}");
    let body = format!(
        "<h1>Join {workspace_name}</h1>\
         <p>You've been invited to join the <strong>{workspace_name}</strong> workspace.</p>\
         <p><a href=\"{link}\">Join Workspace</a></p>\
         <p>Or copy and paste this link into your browser:</p>\
         <p>{link}</p>"
    );
    (subject, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invite_email_carries_link_and_name() {
        let (subject, body) = invite_email("Acme", "https://chat.example.com/invite/abc");
        assert!(subject.contains("Acme"));
        assert_eq!(body.matches("https://chat.example.com/invite/abc").count(), 2);
    }
}
