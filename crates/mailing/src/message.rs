use serde::{Deserialize, Serialize};

use leadflow_core::{DomainError, DomainResult};

/// Payload handed to the mail channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

impl OutboundMessage {
    pub fn new(
        to: impl Into<String>,
        subject: impl Into<String>,
        html_body: impl Into<String>,
        text_body: impl Into<String>,
    ) -> DomainResult<Self> {
        let message = Self {
            to: to.into().trim().to_string(),
            subject: subject.into(),
            html_body: html_body.into(),
            text_body: text_body.into(),
        };
        message.validate()?;
        Ok(message)
    }

    pub fn validate(&self) -> DomainResult<()> {
        match self.to.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
            _ => {
                return Err(DomainError::validation(format!(
                    "invalid recipient address: {:?}",
                    self.to
                )));
            }
        }
        if self.subject.trim().is_empty() {
            return Err(DomainError::validation("subject cannot be empty"));
        }
        if self.html_body.is_empty() && self.text_body.is_empty() {
            return Err(DomainError::validation("message needs an html or text body"));
        }
        Ok(())
    }
}
