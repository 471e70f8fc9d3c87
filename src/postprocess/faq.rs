//! Question/Answer extraction from HTML.
//!
//! Four structural strategies are tried in order, stopping at the first
//! that yields candidates: native `<details>/<summary>` disclosures,
//! definition lists, Bootstrap-style accordion cards, and the
//! `faq_ques_text`/`faq-ans` class pair seen on enterprise CMS pages.
//! Heading-based guessing is deliberately avoided; structural cues keep
//! false positives out.

use std::fs;
use std::path::Path;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::{ContentMeta, PostProcessor, Produced, PostprocessError};
use crate::models::{AnswerMode, FaqItem, Page};

struct Candidate {
    question: String,
    answer_text: String,
    answer_html: String,
}

pub struct FaqExtractor {
    details: Selector,
    summary: Selector,
    dl: Selector,
    dt: Selector,
    accordion_card: Selector,
    card_header: Selector,
    card_header_button: Selector,
    card_body: Selector,
    faq_question: Selector,
    faq_answer: Selector,
    anchor: Selector,
    phone: Regex,
}

impl FaqExtractor {
    pub fn new() -> Self {
        Self {
            details: Selector::parse("details").expect("static selector"),
            summary: Selector::parse("summary").expect("static selector"),
            dl: Selector::parse("dl").expect("static selector"),
            dt: Selector::parse("dt").expect("static selector"),
            accordion_card: Selector::parse(".accordion-card").expect("static selector"),
            card_header: Selector::parse(".card-header").expect("static selector"),
            card_header_button: Selector::parse(".card-header button").expect("static selector"),
            card_body: Selector::parse(".card-body").expect("static selector"),
            faq_question: Selector::parse(".faq_ques_text").expect("static selector"),
            faq_answer: Selector::parse(".faq-ans").expect("static selector"),
            anchor: Selector::parse("a[href]").expect("static selector"),
            phone: Regex::new(r"(\+\d{1,2}\s)?\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}")
                .expect("static regex"),
        }
    }

    /// Extract question/answer pairs from parsed HTML.
    pub fn extract(&self, document: &Html, url: &str) -> Vec<FaqItem> {
        let mut candidates = self.from_details(document);
        if candidates.is_empty() {
            candidates = self.from_definition_lists(document);
        }
        if candidates.is_empty() {
            candidates = self.from_accordion_cards(document);
        }
        if candidates.is_empty() {
            candidates = self.from_faq_classes(document);
        }

        candidates
            .into_iter()
            .map(|c| {
                let mode = self.answer_mode(&c.answer_text, &c.answer_html);
                FaqItem {
                    document_url: url.to_string(),
                    question_text: c.question,
                    answer_text: c.answer_text,
                    answer_raw_html: c.answer_html,
                    answer_mode: mode,
                }
            })
            .collect()
    }

    fn from_details(&self, document: &Html) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for details in document.select(&self.details) {
            let Some(summary) = details.select(&self.summary).next() else {
                continue;
            };
            let question = element_text(&summary);

            // The answer is everything inside <details> except the summary.
            let mut answer_html = String::new();
            let mut answer_text_parts = Vec::new();
            for child in details.children() {
                if let Some(element) = ElementRef::wrap(child) {
                    if element.value().name() == "summary" {
                        continue;
                    }
                    answer_html.push_str(&element.html());
                    answer_text_parts.push(element_text(&element));
                } else if let Some(text) = child.value().as_text() {
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        answer_html.push_str(trimmed);
                        answer_text_parts.push(trimmed.to_string());
                    }
                }
            }
            let answer_text = answer_text_parts.join(" ").trim().to_string();

            if !question.is_empty() && !answer_text.is_empty() {
                candidates.push(Candidate {
                    question,
                    answer_text,
                    answer_html,
                });
            }
        }
        candidates
    }

    fn from_definition_lists(&self, document: &Html) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for dl in document.select(&self.dl) {
            for dt in dl.select(&self.dt) {
                let dd = dt
                    .next_siblings()
                    .filter_map(ElementRef::wrap)
                    .find(|e| e.value().name() == "dd");
                if let Some(dd) = dd {
                    let question = element_text(&dt);
                    let answer_text = element_text(&dd);
                    if !question.is_empty() && !answer_text.is_empty() {
                        candidates.push(Candidate {
                            question,
                            answer_text,
                            answer_html: dd.inner_html().trim().to_string(),
                        });
                    }
                }
            }
        }
        candidates
    }

    fn from_accordion_cards(&self, document: &Html) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for card in document.select(&self.accordion_card) {
            let question = card
                .select(&self.card_header_button)
                .next()
                .map(|b| element_text(&b))
                .or_else(|| {
                    card.select(&self.card_header)
                        .next()
                        .map(|h| element_text(&h))
                })
                .unwrap_or_default();

            let Some(body) = card.select(&self.card_body).next() else {
                continue;
            };
            let answer_text = element_text(&body);
            if !question.is_empty() && !answer_text.is_empty() {
                candidates.push(Candidate {
                    question,
                    answer_text,
                    answer_html: body.inner_html().trim().to_string(),
                });
            }
        }
        candidates
    }

    fn from_faq_classes(&self, document: &Html) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for question_el in document.select(&self.faq_question) {
            let question = element_text(&question_el);
            // The answer sits in a sibling .faq-ans under the same parent.
            let answer = question_el
                .parent()
                .and_then(ElementRef::wrap)
                .and_then(|parent| parent.select(&self.faq_answer).next());
            if let Some(answer) = answer {
                let answer_text = element_text(&answer);
                if !question.is_empty() && !answer_text.is_empty() {
                    candidates.push(Candidate {
                        question,
                        answer_text,
                        answer_html: answer.inner_html().trim().to_string(),
                    });
                }
            }
        }
        candidates
    }

    /// Classify how the answer resolves, most specific signal first.
    fn answer_mode(&self, text: &str, html: &str) -> AnswerMode {
        let fragment = Html::parse_fragment(html);
        let hrefs: Vec<String> = fragment
            .select(&self.anchor)
            .filter_map(|a| a.value().attr("href"))
            .map(|h| h.to_lowercase())
            .collect();

        if hrefs
            .iter()
            .any(|h| h.contains("login") || h.contains("account"))
        {
            return AnswerMode::PortalRedirect;
        }
        if hrefs.iter().any(|h| h.ends_with(".pdf")) {
            return AnswerMode::PdfAttachment;
        }
        let html_lower = html.to_lowercase();
        if html_lower.contains("video") || html_lower.contains("transcript") {
            return AnswerMode::Video;
        }
        if self.phone.is_match(text) {
            return AnswerMode::PhoneEscalation;
        }
        if !hrefs.is_empty() {
            return AnswerMode::LinkOut;
        }
        AnswerMode::DirectText
    }
}

impl Default for FaqExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

impl PostProcessor for FaqExtractor {
    fn kind(&self) -> &'static str {
        "faq"
    }

    fn accept(&self, meta: &ContentMeta) -> bool {
        meta.content_type == "text/html" || meta.content_type == "application/xhtml+xml"
    }

    fn process(&self, input: &Path, page: &Page) -> Result<Produced, PostprocessError> {
        let html = fs::read_to_string(input)?;
        let document = Html::parse_document(&html);
        let items = self.extract(&document, &page.url);
        if items.is_empty() {
            Ok(Produced::Nothing)
        } else {
            Ok(Produced::Faqs(items))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(html: &str) -> Vec<FaqItem> {
        let document = Html::parse_document(html);
        FaqExtractor::new().extract(&document, "https://example.com/faq")
    }

    #[test]
    fn details_summary_pairs() {
        let items = extract(
            r#"
            <details>
                <summary>How do I reset my password?</summary>
                <p>Use the reset link on the sign-in page.</p>
            </details>
            <details>
                <summary>Where is my invoice?</summary>
                <p>Invoices are emailed monthly.</p>
            </details>
        "#,
        );
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].question_text, "How do I reset my password?");
        assert!(items[0].answer_text.contains("reset link"));
        assert!(!items[0].answer_raw_html.contains("summary"));
    }

    #[test]
    fn definition_lists() {
        let items = extract(
            r#"
            <dl>
                <dt>What payment methods are accepted?</dt>
                <dd>Cards and bank transfer.</dd>
                <dt>Is there a trial?</dt>
                <dd>Thirty days.</dd>
            </dl>
        "#,
        );
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].question_text, "Is there a trial?");
        assert_eq!(items[1].answer_text, "Thirty days.");
    }

    #[test]
    fn accordion_cards() {
        let items = extract(
            r#"
            <div class="accordion-card">
                <div class="card-header"><button>Can I cancel anytime?</button></div>
                <div class="collapse"><div class="card-body">Yes, from settings.</div></div>
            </div>
        "#,
        );
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].question_text, "Can I cancel anytime?");
        assert_eq!(items[0].answer_text, "Yes, from settings.");
    }

    #[test]
    fn faq_class_pairs() {
        let items = extract(
            r#"
            <div class="col-sm-12">
                <p class="faq_ques_text bold">How long does shipping take?</p>
                <div class="col-sm-12 faq-ans">Five business days.</div>
            </div>
        "#,
        );
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].answer_text, "Five business days.");
    }

    #[test]
    fn no_structural_cues_no_items() {
        let items = extract("<h2>Is this a question?</h2><p>Maybe.</p>");
        assert!(items.is_empty());
    }

    #[test]
    fn answer_modes() {
        let extractor = FaqExtractor::new();
        assert_eq!(
            extractor.answer_mode("Plain answer.", "<p>Plain answer.</p>"),
            AnswerMode::DirectText
        );
        assert_eq!(
            extractor.answer_mode("See docs", r#"<a href="/docs">docs</a>"#),
            AnswerMode::LinkOut
        );
        assert_eq!(
            extractor.answer_mode("Read this", r#"<a href="/guide.pdf">guide</a>"#),
            AnswerMode::PdfAttachment
        );
        assert_eq!(
            extractor.answer_mode("Sign in", r#"<a href="/account/login">sign in</a>"#),
            AnswerMode::PortalRedirect
        );
        assert_eq!(
            extractor.answer_mode("Call us at (555) 123-4567", "<p>Call us</p>"),
            AnswerMode::PhoneEscalation
        );
        assert_eq!(
            extractor.answer_mode("Watch", "<div class=\"video-embed\"></div>"),
            AnswerMode::Video
        );
    }
}
