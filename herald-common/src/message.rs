//! The notification message model.
//!
//! A [`Message`] can only be obtained through [`MessageBuilder::build`], which
//! validates every field. Once built it is never mutated; the dispatcher
//! shares it behind an `Arc`.

use std::{
    fmt,
    str::FromStr,
    sync::{Arc, LazyLock},
};

use mailparse::MailAddr;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use ulid::{Generator, Ulid};

use crate::error::ValidationError;

/// Identifier allocated to every accepted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Ulid);

/// Shared so ids allocated within one millisecond still sort by allocation order
static ID_GENERATOR: LazyLock<Mutex<Generator>> = LazyLock::new(|| Mutex::new(Generator::new()));

impl MessageId {
    /// Allocate a fresh identifier, strictly greater than every earlier one
    /// from this process
    #[must_use]
    pub fn generate() -> Self {
        // Overflow needs 2^80 ids in one millisecond
        Self(ID_GENERATOR.lock().generate().unwrap_or_else(|_| Ulid::new()))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for MessageId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content: Arc<[u8]>,
}

impl Attachment {
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            content: content.into(),
        }
    }
}

/// A validated notification message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    to: Vec<String>,
    from: String,
    subject: String,
    text: Option<String>,
    html: Option<String>,
    cc: Vec<String>,
    bcc: Vec<String>,
    attachments: Vec<Attachment>,
}

impl Message {
    /// Start building a message
    #[must_use]
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    pub fn to(&self) -> &[String] {
        &self.to
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Plain text body, if any
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Rich (HTML) body, if any
    pub fn html(&self) -> Option<&str> {
        self.html.as_deref()
    }

    pub fn cc(&self) -> &[String] {
        &self.cc
    }

    pub fn bcc(&self) -> &[String] {
        &self.bcc
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Total number of addressees across to, cc and bcc
    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }
}

/// Builder for [`Message`].
#[derive(Debug, Default, Clone)]
pub struct MessageBuilder {
    to: Vec<String>,
    from: Option<String>,
    subject: Option<String>,
    text: Option<String>,
    html: Option<String>,
    cc: Vec<String>,
    bcc: Vec<String>,
    attachments: Vec<Attachment>,
}

impl MessageBuilder {
    #[must_use]
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    #[must_use]
    pub fn from(mut self, address: impl Into<String>) -> Self {
        self.from = Some(address.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    #[must_use]
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.text = Some(body.into());
        self
    }

    #[must_use]
    pub fn html(mut self, body: impl Into<String>) -> Self {
        self.html = Some(body.into());
        self
    }

    #[must_use]
    pub fn cc(mut self, address: impl Into<String>) -> Self {
        self.cc.push(address.into());
        self
    }

    #[must_use]
    pub fn bcc(mut self, address: impl Into<String>) -> Self {
        self.bcc.push(address.into());
        self
    }

    #[must_use]
    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Validate the collected fields and produce a [`Message`].
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] describing the first problem found.
    pub fn build(self) -> Result<Message, ValidationError> {
        let from = self.from.ok_or(ValidationError::MissingField("from"))?;
        validate_address("from", &from)?;

        if self.to.is_empty() {
            return Err(ValidationError::NoRecipients);
        }
        for address in &self.to {
            validate_address("to", address)?;
        }
        for address in &self.cc {
            validate_address("cc", address)?;
        }
        for address in &self.bcc {
            validate_address("bcc", address)?;
        }

        let subject = self
            .subject
            .filter(|subject| !subject.trim().is_empty())
            .ok_or(ValidationError::MissingField("subject"))?;

        let text = self.text.filter(|body| !body.is_empty());
        let html = self.html.filter(|body| !body.is_empty());
        if text.is_none() && html.is_none() {
            return Err(ValidationError::EmptyBody);
        }

        if let Some(attachment) = self
            .attachments
            .iter()
            .find(|attachment| attachment.filename.trim().is_empty())
        {
            return Err(ValidationError::InvalidAttachment(format!(
                "attachment of type {} has no file name",
                attachment.content_type
            )));
        }

        Ok(Message {
            to: self.to,
            from,
            subject,
            text,
            html,
            cc: self.cc,
            bcc: self.bcc,
            attachments: self.attachments,
        })
    }
}

/// Ensure `address` parses as exactly one mailbox with a local part and a domain
fn validate_address(field: &'static str, address: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::InvalidAddress {
        field,
        address: address.to_string(),
    };

    let parsed = mailparse::addrparse(address).map_err(|_| invalid())?;
    match parsed.first() {
        Some(MailAddr::Single(info)) if parsed.len() == 1 => {
            let (local, domain) = info.addr.rsplit_once('@').ok_or_else(invalid)?;
            if local.is_empty() || domain.is_empty() {
                return Err(invalid());
            }
            Ok(())
        }
        _ => Err(invalid()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn base() -> MessageBuilder {
        Message::builder()
            .from("alerts@example.org")
            .to("ops@example.com")
            .subject("Disk usage")
            .text("Disk is 91% full")
    }

    #[test]
    fn test_build_valid_message() {
        let message = base()
            .cc("Team Lead <lead@example.com>")
            .html("<p>Disk is 91% full</p>")
            .attachment(Attachment::new("df.txt", "text/plain", b"/dev/sda1 91%".as_slice()))
            .build()
            .unwrap();

        assert_eq!(message.to(), ["ops@example.com".to_string()]);
        assert_eq!(message.from(), "alerts@example.org");
        assert_eq!(message.html(), Some("<p>Disk is 91% full</p>"));
        assert_eq!(message.recipient_count(), 2);
        assert_eq!(message.attachments().len(), 1);
    }

    #[test]
    fn test_ids_sort_by_allocation_order() {
        let ids: Vec<MessageId> = (0..1_000).map(|_| MessageId::generate()).collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_missing_recipients() {
        let result = Message::builder()
            .from("alerts@example.org")
            .subject("Hi")
            .text("Body")
            .build();
        assert_eq!(result, Err(ValidationError::NoRecipients));
    }

    #[test]
    fn test_missing_sender() {
        let result = Message::builder()
            .to("ops@example.com")
            .subject("Hi")
            .text("Body")
            .build();
        assert_eq!(result, Err(ValidationError::MissingField("from")));
    }

    #[test]
    fn test_invalid_addresses() {
        let result = base().to("not-an-address").build();
        assert!(matches!(
            result,
            Err(ValidationError::InvalidAddress { field: "to", .. })
        ));

        let result = base().bcc("@example.com").build();
        assert!(matches!(
            result,
            Err(ValidationError::InvalidAddress { field: "bcc", .. })
        ));
    }

    #[test]
    fn test_blank_subject_rejected() {
        let result = base().subject("   ").build();
        assert_eq!(result, Err(ValidationError::MissingField("subject")));
    }

    #[test]
    fn test_body_required() {
        let result = Message::builder()
            .from("alerts@example.org")
            .to("ops@example.com")
            .subject("Hi")
            .build();
        assert_eq!(result, Err(ValidationError::EmptyBody));

        let html_only = Message::builder()
            .from("alerts@example.org")
            .to("ops@example.com")
            .subject("Hi")
            .html("<b>hi</b>")
            .build();
        assert!(html_only.is_ok());
    }

    #[test]
    fn test_attachment_requires_name() {
        let result = base()
            .attachment(Attachment::new(" ", "text/plain", b"x".as_slice()))
            .build();
        assert!(matches!(result, Err(ValidationError::InvalidAttachment(_))));
    }

    #[test]
    fn test_message_id_roundtrip() {
        let id = MessageId::generate();
        let parsed: MessageId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
