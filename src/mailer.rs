//! Email delivery over SMTP.
//!
//! Two message kinds: the daily digest (multipart plain + styled HTML,
//! optional podcast section) and the error notification used as the
//! side-channel for pipeline failures. Digest delivery failure is fatal
//! for the history commit; a failed error notification is only logged.

use chrono::Local;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{info, warn};

use crate::config::EmailConfig;
use crate::error::{Error, Result};

pub struct Mailer {
    config: EmailConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl Mailer {
    pub fn new(config: EmailConfig) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();
        Ok(Self { config, transport })
    }

    /// Send the digest email. Returns Err on any build/transport failure so
    /// the caller knows delivery was not confirmed.
    pub async fn send_digest(
        &self,
        html_content: &str,
        podcast_url: Option<&str>,
        top_topics: &[String],
    ) -> Result<()> {
        let date = Local::now().format("%A, %B %d, %Y");
        let subject = format!("📰 Daily News Digest - {date}");
        let plain = "Your daily news digest is ready. \
                     Please view this email in an HTML-capable client.";
        let html = wrap_digest_html(html_content, podcast_url, top_topics);

        self.send(&subject, plain, &html).await?;
        info!("Digest email sent to {}", self.config.recipients.join(", "));
        Ok(())
    }

    /// Side-channel error notification, distinct from digest delivery.
    /// Failure here is swallowed, there is nowhere left to report to.
    pub async fn send_error(&self, error_type: &str, message: &str, detail: &str) {
        let date = Local::now().format("%A, %B %d, %Y");
        let subject = format!("⚠️ News Digest Failed - {error_type} - {date}");
        let plain = format!("News Digest Error: {error_type}\n\n{message}\n\n{detail}");
        let html = error_html(error_type, message, detail);

        match self.send(&subject, &plain, &html).await {
            Ok(()) => info!("Error notification sent ({error_type})"),
            Err(e) => warn!("Failed to send error notification: {e}"),
        }
    }

    async fn send(&self, subject: &str, plain: &str, html: &str) -> Result<()> {
        let from: Mailbox = format!("{} <{}>", self.config.from_name, self.config.username)
            .parse()
            .map_err(|e| Error::Mail(format!("invalid sender address: {e}")))?;

        let mut builder = Message::builder().from(from).subject(subject);
        for recipient in &self.config.recipients {
            let to: Mailbox = recipient
                .parse()
                .map_err(|e| Error::Mail(format!("invalid recipient {recipient}: {e}")))?;
            builder = builder.to(to);
        }

        let email = builder
            .multipart(MultiPart::alternative_plain_html(
                plain.to_string(),
                html.to_string(),
            ))
            .map_err(|e| Error::Mail(format!("could not build message: {e}")))?;

        self.transport.send(email).await?;
        Ok(())
    }
}

/// Wrap raw digest HTML in the styled email template, appending the podcast
/// section and footer. Already-complete documents pass through untouched.
fn wrap_digest_html(content: &str, podcast_url: Option<&str>, top_topics: &[String]) -> String {
    let trimmed = content.trim_start();
    if trimmed.starts_with("<!DOCTYPE") || trimmed.starts_with("<html") {
        return content.to_string();
    }

    let podcast_section = match podcast_url {
        Some(url) => {
            let topics_html = if top_topics.is_empty() {
                String::new()
            } else {
                let items: String = top_topics
                    .iter()
                    .map(|t| format!("<li>{t}</li>"))
                    .collect();
                format!(
                    "<p style=\"margin-top: 12px; font-weight: 600;\">Today's top topics:</p>\
                     <ul>{items}</ul>"
                )
            };
            format!(
                "<div style=\"margin-top: 32px; padding: 20px; background: #f0f7ff; \
                 border-radius: 10px; border: 1px solid #bee3f8;\">\
                 <h2 style=\"color: #2b6cb0; margin-top: 0;\">🎧 Daily News Podcast</h2>\
                 <p>Listen to today's digest as a podcast with hosts Alex &amp; Sam:</p>\
                 <p><a href=\"{url}\" style=\"display: inline-block; padding: 10px 20px; \
                 background: #3182ce; color: #ffffff; border-radius: 6px; \
                 text-decoration: none; font-weight: 600;\">Listen Now</a></p>\
                 {topics_html}</div>"
            )
        }
        None => String::new(),
    };

    let generated = Local::now().format("%A, %B %d, %Y at %H:%M");
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            line-height: 1.7; color: #2d3748; max-width: 680px;
            margin: 0 auto; padding: 20px; background-color: #ffffff;
        }}
        h1 {{ color: #1a202c; font-size: 28px; border-bottom: 3px solid #3182ce; padding-bottom: 12px; }}
        h2 {{ color: #2b6cb0; font-size: 20px; margin-top: 32px; border-bottom: 1px solid #e2e8f0; padding-bottom: 8px; }}
        p {{ margin: 12px 0; color: #4a5568; }}
        a {{ color: #3182ce; text-decoration: none; font-weight: 500; }}
        ul {{ padding-left: 0; list-style: none; margin: 16px 0; }}
        li {{ margin: 16px 0; padding: 14px 16px; background: #f7fafc;
              border-radius: 8px; border-left: 4px solid #3182ce; }}
        .footer {{ margin-top: 40px; padding-top: 20px; border-top: 1px solid #e2e8f0;
                   color: #a0aec0; font-size: 13px; }}
    </style>
</head>
<body>
{content}
{podcast_section}
<div class="footer">
    <p>Generated on {generated} by your News Digest bot.</p>
</div>
</body>
</html>
"#
    )
}

fn error_html(error_type: &str, message: &str, detail: &str) -> String {
    let timestamp = Local::now().format("%Y-%m-%d at %H:%M");
    let detail_block = if detail.is_empty() {
        String::new()
    } else {
        format!("<h3>Full Error Details</h3><pre>{detail}</pre>")
    };
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <style>
        body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
               line-height: 1.6; color: #333; max-width: 700px; margin: 0 auto; padding: 20px; }}
        .error-box {{ background: #fee; border: 1px solid #c00; border-radius: 5px;
                      padding: 15px; margin: 20px 0; }}
        .error-title {{ color: #c00; margin: 0 0 10px 0; }}
        pre {{ background: #f5f5f5; padding: 15px; border-radius: 5px;
               overflow-x: auto; font-size: 12px; }}
    </style>
</head>
<body>
    <h1>⚠️ News Digest Error</h1>
    <p>Your daily news digest failed to generate on {timestamp}.</p>
    <div class="error-box">
        <h3 class="error-title">{error_type}</h3>
        <p>{message}</p>
    </div>
    {detail_block}
</body>
</html>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_skips_complete_documents() {
        let full = "<!DOCTYPE html><html><body>done</body></html>";
        assert_eq!(wrap_digest_html(full, None, &[]), full);
    }

    #[test]
    fn wrap_adds_podcast_section_only_with_url() {
        let topics = vec!["AI chips".to_string(), "EV batteries".to_string()];
        let with = wrap_digest_html("<h1>Digest</h1>", Some("http://abs.local"), &topics);
        assert!(with.contains("Daily News Podcast"));
        assert!(with.contains("http://abs.local"));
        assert!(with.contains("<li>AI chips</li>"));

        let without = wrap_digest_html("<h1>Digest</h1>", None, &topics);
        assert!(!without.contains("Daily News Podcast"));
    }

    #[test]
    fn error_html_includes_detail_block_when_present() {
        let html = error_html("API Error", "something broke", "stack trace here");
        assert!(html.contains("API Error"));
        assert!(html.contains("stack trace here"));

        let bare = error_html("API Error", "something broke", "");
        assert!(!bare.contains("Full Error Details"));
    }
}
