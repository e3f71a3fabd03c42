//! Placeholder substitution engine for DOCX packages.
//!
//! Opens a ZIP-backed document package, resolves delimited placeholders
//! (scalars, loops, module-claimed tags such as images) against a JSON data
//! mapping, and re-serializes the package. Failures aggregate every
//! independent sub-issue so template authors see all their mistakes at once.
//!
//! ```no_run
//! use serde_json::json;
//! use stampo_engine::{Engine, ImageModule, ImageOptions, RenderOptions, TemplateArchive};
//!
//! # fn main() -> Result<(), stampo_engine::EngineError> {
//! let archive = TemplateArchive::from_bytes(&std::fs::read("template.docx").unwrap())?;
//! let mut engine = Engine::new(archive, RenderOptions::default());
//! engine.attach_module(Box::new(ImageModule::new(ImageOptions::default())));
//! engine.render(&json!({ "name": "Ada" }))?;
//! let rendered = engine.into_archive().to_bytes()?;
//! # Ok(())
//! # }
//! ```

mod archive;
mod error;
mod expr;
mod image;
mod module;
mod render;
mod xml;

pub use archive::TemplateArchive;
pub use error::{EngineError, TemplateIssue};
pub use expr::ExpressionsModule;
pub use image::{ImageModule, ImageOptions};
pub use module::{ModuleContext, Replacement, RenderModule};
pub use render::{Delimiters, Engine, NullGetter, RenderOptions};
