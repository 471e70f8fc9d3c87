//! Question/Answer items extracted from HTML pages.

use serde::Serialize;

/// How the answer resolves for the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnswerMode {
    DirectText,
    LinkOut,
    PhoneEscalation,
    PdfAttachment,
    Video,
    PortalRedirect,
}

impl AnswerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectText => "DIRECT_TEXT",
            Self::LinkOut => "LINK_OUT",
            Self::PhoneEscalation => "PHONE_ESCALATION",
            Self::PdfAttachment => "PDF_ATTACHMENT",
            Self::Video => "VIDEO",
            Self::PortalRedirect => "PORTAL_REDIRECT",
        }
    }
}

/// A single extracted question/answer pair.
#[derive(Debug, Clone, Serialize)]
pub struct FaqItem {
    pub document_url: String,
    pub question_text: String,
    pub answer_text: String,
    pub answer_raw_html: String,
    pub answer_mode: AnswerMode,
}
