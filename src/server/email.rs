//! Email service for follow-up and campaign summary emails
//!
//! SMTP via lettre. Follow-ups go to the lead captured on a call; campaign
//! summaries go to the campaign owner.

use lettre::{
    message::{Mailbox, Message, MultiPart},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};
use thiserror::Error;

use crate::models::{Campaign, CampaignSummary};
use super::followup::FollowupEmail;

#[derive(Clone)]
pub struct EmailService {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_email: Mailbox,
    app_url: String,
}

/// Errors that can occur when sending emails
#[derive(Error, Debug)]
pub enum EmailError {
    #[error("Failed to build email message: {0}")]
    MessageBuild(String),

    #[error("Failed to send email: {0}")]
    SendFailed(String),

    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    #[error("SMTP configuration error: {0}")]
    ConfigError(String),
}

impl EmailService {
    /// Create a new email service from environment variables
    ///
    /// Required environment variables:
    /// - SMTP_HOST: SMTP server hostname
    /// - SMTP_PORT: SMTP server port
    /// - SMTP_USERNAME: SMTP authentication username
    /// - SMTP_PASSWORD: SMTP authentication password
    /// - SMTP_FROM_EMAIL: From email address
    /// - SMTP_FROM_NAME: From name (optional, defaults to "Call Agent")
    /// - APP_URL: Dashboard base URL used in summary links (optional)
    pub fn from_env() -> Result<Self, EmailError> {
        let smtp_host = std::env::var("SMTP_HOST")
            .map_err(|_| EmailError::ConfigError("SMTP_HOST not set".to_string()))?;

        let smtp_port = std::env::var("SMTP_PORT")
            .map_err(|_| EmailError::ConfigError("SMTP_PORT not set".to_string()))?
            .parse::<u16>()
            .map_err(|_| EmailError::ConfigError("SMTP_PORT must be a valid port number".to_string()))?;

        let smtp_username = std::env::var("SMTP_USERNAME")
            .map_err(|_| EmailError::ConfigError("SMTP_USERNAME not set".to_string()))?;

        let smtp_password = std::env::var("SMTP_PASSWORD")
            .map_err(|_| EmailError::ConfigError("SMTP_PASSWORD not set".to_string()))?;

        let smtp_from_email = std::env::var("SMTP_FROM_EMAIL")
            .map_err(|_| EmailError::ConfigError("SMTP_FROM_EMAIL not set".to_string()))?;

        let smtp_from_name = std::env::var("SMTP_FROM_NAME")
            .unwrap_or_else(|_| "Call Agent".to_string());

        let app_url = std::env::var("APP_URL").unwrap_or_default();

        Self::new(
            &smtp_host,
            smtp_port,
            &smtp_username,
            &smtp_password,
            &smtp_from_email,
            &smtp_from_name,
            &app_url,
        )
    }

    pub fn new(
        smtp_host: &str,
        smtp_port: u16,
        smtp_username: &str,
        smtp_password: &str,
        from_email: &str,
        from_name: &str,
        app_url: &str,
    ) -> Result<Self, EmailError> {
        let from_mailbox: Mailbox = format!("{} <{}>", from_name, from_email)
            .parse()
            .map_err(|e| EmailError::InvalidAddress(format!("Invalid from address: {}", e)))?;

        let tls_parameters = TlsParameters::builder(smtp_host.to_string())
            .build()
            .map_err(|e| EmailError::ConfigError(format!("Failed to build TLS parameters: {}", e)))?;

        let credentials = Credentials::new(smtp_username.to_string(), smtp_password.to_string());

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)
            .map_err(|e| EmailError::ConfigError(format!("Failed to create SMTP transport: {}", e)))?
            .port(smtp_port)
            .credentials(credentials)
            .tls(Tls::Required(tls_parameters))
            .build();

        Ok(Self {
            mailer,
            from_email: from_mailbox,
            app_url: app_url.trim_end_matches('/').to_string(),
        })
    }

    /// Send the post-call follow-up to a lead.
    pub async fn send_followup(&self, to_email: &str, message: &FollowupEmail) -> Result<(), EmailError> {
        let html_body = build_followup_html(&message.body);
        self.send_email(to_email, None, &message.subject, &html_body, &message.body)
            .await
    }

    /// Send the end-of-campaign report to the campaign owner.
    pub async fn send_campaign_summary(
        &self,
        to_email: &str,
        to_name: &str,
        campaign: &Campaign,
        summary: &CampaignSummary,
    ) -> Result<(), EmailError> {
        let subject = format!("Campaign \"{}\" has finished", campaign.name);
        let link = (!self.app_url.is_empty()).then(|| format!("{}/campaigns/{}", self.app_url, campaign.id));

        let html_body = build_summary_html(to_name, campaign, summary, link.as_deref());
        let text_body = build_summary_text(to_name, campaign, summary, link.as_deref());

        self.send_email(to_email, Some(to_name), &subject, &html_body, &text_body)
            .await
    }

    async fn send_email(
        &self,
        to_email: &str,
        to_name: Option<&str>,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<(), EmailError> {
        let to_mailbox: Mailbox = if let Some(name) = to_name {
            format!("{} <{}>", name, to_email)
        } else {
            to_email.to_string()
        }
        .parse()
        .map_err(|e| EmailError::InvalidAddress(format!("Invalid recipient address: {}", e)))?;

        let email = Message::builder()
            .from(self.from_email.clone())
            .to(to_mailbox)
            .subject(subject)
            .multipart(MultiPart::alternative_plain_html(
                text_body.to_string(),
                html_body.to_string(),
            ))
            .map_err(|e| EmailError::MessageBuild(e.to_string()))?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| EmailError::SendFailed(e.to_string()))?;

        tracing::info!("Email sent successfully to {}", to_email);
        Ok(())
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Plain-text paragraphs become `<p>` blocks; single newlines become `<br>`.
fn build_followup_html(body: &str) -> String {
    let paragraphs: String = body
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!("<p>{}</p>\n", escape_html(p).replace('\n', "<br>\n")))
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
</head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Arial, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
{}</body>
</html>"#,
        paragraphs
    )
}

fn success_rate(summary: &CampaignSummary) -> String {
    if summary.total_contacts == 0 {
        return "-".to_string();
    }
    let rate = summary.completed_calls as f64 * 100.0 / summary.total_contacts as f64;
    format!("{:.1}%", rate)
}

fn build_summary_html(owner_name: &str, campaign: &Campaign, summary: &CampaignSummary, link: Option<&str>) -> String {
    let link_html = link
        .map(|url| format!(r#"<p><a href="{}" style="color: #2563eb;">View campaign details</a></p>"#, url))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Campaign finished</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif;
            line-height: 1.6;
            color: #333;
            max-width: 600px;
            margin: 0 auto;
            padding: 20px;
            background-color: #f4f4f4;
        }}
        .container {{
            background-color: #ffffff;
            padding: 40px;
            border-radius: 8px;
        }}
        td {{
            padding: 6px 12px;
            border-bottom: 1px solid #e5e7eb;
        }}
    </style>
</head>
<body>
    <div class="container">
        <h2>Hi {},</h2>
        <p>Your campaign <strong>{}</strong> has finished dialing.</p>
        <table>
            <tr><td>Contacts</td><td>{}</td></tr>
            <tr><td>Completed calls</td><td>{}</td></tr>
            <tr><td>Failed</td><td>{}</td></tr>
            <tr><td>Retries</td><td>{}</td></tr>
            <tr><td>Success rate</td><td>{}</td></tr>
        </table>
        {}
    </div>
</body>
</html>"#,
        escape_html(owner_name),
        escape_html(&campaign.name),
        summary.total_contacts,
        summary.completed_calls,
        summary.failed_calls,
        summary.total_retries,
        success_rate(summary),
        link_html
    )
}

fn build_summary_text(owner_name: &str, campaign: &Campaign, summary: &CampaignSummary, link: Option<&str>) -> String {
    let mut text = format!(
        r#"Hi {},

Your campaign "{}" has finished dialing.

Contacts:        {}
Completed calls: {}
Failed:          {}
Retries:         {}
Success rate:    {}
"#,
        owner_name,
        campaign.name,
        summary.total_contacts,
        summary.completed_calls,
        summary.failed_calls,
        summary.total_retries,
        success_rate(summary)
    );
    if let Some(url) = link {
        text.push_str(&format!("\nDetails: {}\n", url));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CampaignStatus;

    fn campaign() -> Campaign {
        Campaign {
            id: 9,
            user_id: 1,
            agent_id: 1,
            name: "Spring <promo>".to_string(),
            status: CampaignStatus::Completed,
            max_retries: 2,
            retry_interval_minutes: 60,
            custom_retry_schedule: None,
            first_call_time: None,
            last_call_time: None,
            summary_email_enabled: true,
            completed_at: None,
            created_at: None,
        }
    }

    fn summary() -> CampaignSummary {
        CampaignSummary {
            total_contacts: 8,
            completed_calls: 6,
            failed_calls: 2,
            total_retries: 3,
        }
    }

    #[test]
    fn test_summary_email_contents() {
        let html = build_summary_html("Dev", &campaign(), &summary(), Some("https://app.test/campaigns/9"));
        assert!(html.contains("Spring &lt;promo&gt;"));
        assert!(html.contains("<tr><td>Success rate</td><td>75.0%</td></tr>"));
        assert!(html.contains("https://app.test/campaigns/9"));

        let text = build_summary_text("Dev", &campaign(), &summary(), None);
        assert!(text.contains("Completed calls: 6"));
        assert!(!text.contains("Details:"));
    }

    #[test]
    fn test_success_rate_without_contacts() {
        assert_eq!(success_rate(&CampaignSummary::default()), "-");
    }

    #[test]
    fn test_followup_html_paragraphs() {
        let html = build_followup_html("Hi Asha,\n\nLine one\nLine two & more\n\n");
        assert!(html.contains("<p>Hi Asha,</p>"));
        assert!(html.contains("<p>Line one<br>\nLine two &amp; more</p>"));
    }
}
