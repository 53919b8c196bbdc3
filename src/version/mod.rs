//! Version text handling shared by every detection strategy
//!
//! Strategies hand back whatever version text they scraped. This module turns
//! that text into a comparable [`VersionValue`] and a normalized string.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  raw text   │────▶│    clean    │────▶│  patterns   │
//! │ "Ver 1.2.0" │     │  (prefixes) │     │ first wins  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                                                │
//!                                                ▼
//!                                         ┌─────────────┐
//!                                         │VersionValue │
//!                                         │ (Ord, fmt)  │
//!                                         └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`parser`]: `VersionParser` and `VersionValue`

pub mod parser;

pub use parser::{VersionParser, VersionValue};
