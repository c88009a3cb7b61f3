pub mod config;
pub mod convert;
pub mod docx;
pub mod error;
pub mod ffi;
pub mod progress;
pub mod render;
pub mod templates;

pub use docx::normalize::normalize;
pub use docx::repair::{fill_docx_bytes, repair_and_substitute, RepairReport, TEMPLATE_PARTS};
pub use docx::substitute::{substitute, FieldMap};
pub use error::DocxError;
