//! Data models for siteharvest.

mod asset;
mod faq;
mod page;

pub use asset::{Asset, AssetKind};
pub use faq::{AnswerMode, FaqItem};
pub use page::{LinkEdge, Lineage, Page, PageStatus};
