use crate::backup::function_path;
use crate::backup::notifications::Notification;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use bon::Builder;
use function_name::named;
use getset::Getters;
use itertools::Itertools;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use validator::Validate;

/// Configuration for SMTP email notifications
///
/// The password is a [`RedactedString`] so it stays out of logs.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct SmtpNotificationConfig {
    #[builder(into)]
    host: String,
    #[builder(into)]
    smtp_mode: SmtpMode,
    #[builder(into)]
    from: Mailbox,
    #[validate(length(min = 1))]
    #[builder(into)]
    to: Vec<Mailbox>,
    #[builder(into)]
    username: String,
    #[validate(nested)]
    #[builder(into)]
    password: RedactedString,
}

/// SMTP connection security modes
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SmtpMode {
    Unsecured,
    Ssl,
    StartTls,
}

impl SmtpNotificationConfig {
    fn build_message<D1: Display, D2: Display>(&self, topic: D1, msg: D2) -> Result<Message> {
        self.to
            .iter()
            .fold(Message::builder(), |email, send_to| {
                email.to(send_to.clone())
            })
            .from(self.from.clone())
            .subject(topic.to_string())
            .header(ContentType::TEXT_PLAIN)
            .body(msg.to_string())
            .map_err(Error::from)
            .add_msg(format!(
                "Fail to build notification email from {:?} to {:?}",
                self.from, self.to
            ))
    }
}

impl Notification for SmtpNotificationConfig {
    #[named]
    fn send<D1: Display, D2: Display>(&self, topic: D1, msg: D2) -> Result<()> {
        tracing::info!(
            "Started smtp email notification from {:?} to {:?}",
            self.from,
            self.to
        );
        let email = self
            .build_message(topic, msg)
            .add_fn_name(function_path!())?;

        let creds = Credentials::new(self.username.clone(), self.password.inner().to_string());

        let mailer = match self.smtp_mode {
            SmtpMode::Unsecured => Ok(SmtpTransport::builder_dangerous(self.host.as_str())),
            SmtpMode::Ssl => SmtpTransport::relay(self.host.as_str()),
            SmtpMode::StartTls => SmtpTransport::starttls_relay(self.host.as_str()),
        }
        .map_err(Error::from)
        .add_msg(format!(
            "Failed to build smtp client for host: {:?} with mode {:?}",
            self.host, self.smtp_mode
        ))
        .add_fn_name(function_path!())?
        .credentials(creds)
        .build();

        tracing::info!("Sending email...");
        let response = mailer
            .send(&email)
            .map_err(Error::from)
            .add_fn_name(function_path!())?;
        if response.is_positive() {
            Ok(())
        } else {
            let error_vec = response
                .message()
                .map(|m| Error::smtp_send_error(m.to_owned()))
                .collect_vec();
            Err(Error::lots_of_error(error_vec))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(to: Vec<Mailbox>) -> SmtpNotificationConfig {
        SmtpNotificationConfig::builder()
            .host("smtp.example.com")
            .smtp_mode(SmtpMode::Ssl)
            .from("backup@example.com".parse::<Mailbox>().unwrap())
            .to(to)
            .username("backup")
            .password(RedactedString::builder().inner("testpass").build())
            .build()
    }

    #[test]
    fn test_smtp_notification_validation() {
        let valid = config(vec!["ops@example.com".parse::<Mailbox>().unwrap()]);
        assert!(valid.validate().is_ok());

        let invalid = config(vec![]);
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_short_password_rejected() {
        let mut config = config(vec!["ops@example.com".parse::<Mailbox>().unwrap()]);
        config.password = RedactedString::builder().inner("short").build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_build_message() {
        let config = config(vec![
            "ops@example.com".parse::<Mailbox>().unwrap(),
            "dba@example.com".parse::<Mailbox>().unwrap(),
        ]);
        let message = config.build_message("Backup failed", "shop: boom").unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Backup failed"));
        assert!(raw.contains("ops@example.com"));
        assert!(raw.contains("dba@example.com"));
        assert!(raw.contains("shop: boom"));
    }

    #[test]
    fn test_smtp_mode_serialization() {
        for (mode, expected) in [
            (SmtpMode::Unsecured, "\"Unsecured\""),
            (SmtpMode::Ssl, "\"Ssl\""),
            (SmtpMode::StartTls, "\"StartTls\""),
        ] {
            assert_eq!(serde_json::to_string(&mode).unwrap(), expected);
            let back: SmtpMode = serde_json::from_str(expected).unwrap();
            assert_eq!(back, mode);
        }
    }
}
