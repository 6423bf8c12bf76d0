//! PDF object graph, cross-reference engine, and structural content parser.
//!
//! The crate reads, mutates, and rewrites PDF files at the object level:
//!
//! - [`Document`] owns one file: lazy object resolution over the merged
//!   cross-reference table, `register`/`update`/`delete` mutation, and the
//!   save family (full rewrite or append-only incremental update).
//! - [`Cloner`] copies object subgraphs between documents, with filters
//!   that keep back-links behind and inline inherited page attributes.
//! - [`content`] parses content streams into structural constructs (paths,
//!   text blocks, nested states, marked content, inline images).
//!
//! Higher-level concerns (fonts, forms, rendering) sit above this crate and
//! consume only the object-level API.
//!
//! ```no_run
//! use pdf_forge::{Document, Object, SaveMode};
//!
//! # fn main() -> pdf_forge::Result<()> {
//! let mut doc = Document::open("report.pdf")?;
//! let root = doc.root().expect("catalog");
//! let catalog = doc.resolve(root)?;
//! let pages = catalog.as_dict().and_then(|d| d.get("Pages")).cloned();
//! doc.save(SaveMode::Incremental)?;
//! # Ok(())
//! # }
//! ```

pub mod cloner;
pub mod content;
pub mod document;
pub mod error;
pub mod filters;
pub mod lexer;
pub mod objstm;
pub mod parser;
pub mod writer;
pub mod xref;

pub mod object;

pub use cloner::{AnnotationCloneFilter, CloneContext, CloneFilter, Cloner, PageCloneFilter};
pub use document::{Document, Version};
pub use error::{Error, Result};
pub use object::{ContextId, Object, ObjectRef, StreamKind};
pub use writer::SaveMode;
pub use xref::{Usage, XRefEntry};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
