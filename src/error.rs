use thiserror::Error;

/// Failures at the archive boundary that callers may want to tell apart.
#[derive(Error, Debug)]
pub enum DocxError {
    /// The input bytes are not a readable ZIP container.
    #[error("corrupt docx archive")]
    CorruptArchive(#[from] zip::result::ZipError),

    /// A member exists but its bytes are not UTF-8 text.
    #[error("part {name} is not utf-8 text ({reason})")]
    PartEncoding { name: String, reason: String },
}
