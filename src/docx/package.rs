use std::fs::File;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use anyhow::Context;
use encoding_rs::{Encoding, UTF_8};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::DocxError;

/// In-memory DOCX container: every member in archive order.
pub struct DocxPackage {
    pub entries: Vec<DocxEntry>,
}

pub struct DocxEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub compression: CompressionMethod,
    pub last_modified: zip::DateTime,
    pub unix_mode: Option<u32>,
    pub is_dir: bool,
}

impl DocxPackage {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let f = File::open(path).with_context(|| format!("open docx: {}", path.display()))?;
        Self::from_reader(f).with_context(|| format!("read docx: {}", path.display()))
    }

    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        Self::from_reader(Cursor::new(bytes))
    }

    fn from_reader<R: Read + Seek>(reader: R) -> anyhow::Result<Self> {
        let mut zip = ZipArchive::new(reader).map_err(DocxError::CorruptArchive)?;
        let mut entries = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let mut file = zip.by_index(i).map_err(DocxError::CorruptArchive)?;
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)
                .map_err(|e| DocxError::CorruptArchive(e.into()))?;
            entries.push(DocxEntry {
                name: file.name().to_string(),
                data,
                compression: file.compression(),
                last_modified: file.last_modified().unwrap_or_default(),
                unix_mode: file.unix_mode(),
                is_dir: file.is_dir(),
            });
        }
        Ok(Self { entries })
    }

    pub fn has_part(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Member decoded as text, `None` when the archive has no such member.
    pub fn part_text(&self, name: &str) -> Result<Option<String>, DocxError> {
        match self.entry(name) {
            Some(ent) => decode_part_text(name, &ent.data).map(Some),
            None => Ok(None),
        }
    }

    /// Replaces an existing member's content, or appends a new deflated member.
    pub fn set_part_text(&mut self, name: &str, text: &str) {
        if let Some(ent) = self.entries.iter_mut().find(|e| e.name == name) {
            ent.data = text.as_bytes().to_vec();
            return;
        }
        self.entries.push(DocxEntry {
            name: name.to_string(),
            data: text.as_bytes().to_vec(),
            compression: CompressionMethod::Deflated,
            last_modified: zip::DateTime::default(),
            unix_mode: None,
            is_dir: false,
        });
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        self.write_to(&mut buf)?;
        Ok(buf.into_inner())
    }

    pub fn write(&self, output_path: &Path) -> anyhow::Result<()> {
        let f = File::create(output_path)
            .with_context(|| format!("create output docx: {}", output_path.display()))?;
        self.write_to(f)
    }

    fn write_to<W: Write + Seek>(&self, sink: W) -> anyhow::Result<()> {
        let mut zout = ZipWriter::new(sink);
        for ent in &self.entries {
            let mut opts = SimpleFileOptions::default()
                .compression_method(ent.compression)
                .last_modified_time(ent.last_modified);
            if let Some(mode) = ent.unix_mode {
                opts = opts.unix_permissions(mode);
            }
            if ent.is_dir || ent.name.ends_with('/') {
                zout.add_directory(&ent.name, opts)
                    .with_context(|| format!("add zip dir: {}", ent.name))?;
            } else {
                zout.start_file(&ent.name, opts)
                    .with_context(|| format!("start zip file: {}", ent.name))?;
                zout.write_all(&ent.data)
                    .with_context(|| format!("write zip file: {}", ent.name))?;
            }
        }
        zout.finish().context("finish zip")?;
        Ok(())
    }

    fn entry(&self, name: &str) -> Option<&DocxEntry> {
        self.entries.iter().find(|e| e.name == name && !e.is_dir)
    }
}

fn decode_part_text(name: &str, bytes: &[u8]) -> Result<String, DocxError> {
    let body = match Encoding::for_bom(bytes) {
        Some((enc, bom_len)) if enc == UTF_8 => &bytes[bom_len..],
        Some((enc, _)) => {
            return Err(DocxError::PartEncoding {
                name: name.to_string(),
                reason: format!("unsupported encoding {}", enc.name()),
            })
        }
        None => bytes,
    };
    UTF_8
        .decode_without_bom_handling_and_without_replacement(body)
        .map(|s| s.into_owned())
        .ok_or_else(|| DocxError::PartEncoding {
            name: name.to_string(),
            reason: "invalid utf-8".to_string(),
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::{Cursor, Write};

    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    use super::DocxPackage;
    use crate::error::DocxError;

    pub(crate) fn build_zip(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zout = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in members {
            let opts = if name.ends_with(".png") {
                SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
            } else {
                SimpleFileOptions::default()
            };
            zout.start_file(*name, opts).expect("start file");
            zout.write_all(data).expect("write member");
        }
        zout.finish().expect("finish zip").into_inner()
    }

    #[test]
    fn reads_text_and_reports_missing_parts() {
        let bytes = build_zip(&[("word/document.xml", &b"<w:document/>"[..])]);
        let pkg = DocxPackage::from_bytes(&bytes).expect("read zip");
        assert_eq!(
            pkg.part_text("word/document.xml").expect("decode").as_deref(),
            Some("<w:document/>")
        );
        assert!(pkg.part_text("word/header1.xml").expect("decode").is_none());
    }

    #[test]
    fn strips_utf8_bom_and_rejects_invalid_text() {
        let bytes = build_zip(&[
            ("word/document.xml", &b"\xEF\xBB\xBF<a/>"[..]),
            ("word/footer1.xml", &b"\xFF\xFE<\x00"[..]),
            ("word/footer2.xml", &b"<a>\xC3\x28</a>"[..]),
        ]);
        let pkg = DocxPackage::from_bytes(&bytes).expect("read zip");
        assert_eq!(pkg.part_text("word/document.xml").expect("bom").as_deref(), Some("<a/>"));
        assert!(matches!(
            pkg.part_text("word/footer1.xml"),
            Err(DocxError::PartEncoding { .. })
        ));
        assert!(matches!(
            pkg.part_text("word/footer2.xml"),
            Err(DocxError::PartEncoding { .. })
        ));
    }

    #[test]
    fn corrupt_archive_is_a_typed_error() {
        let err = DocxPackage::from_bytes(b"definitely not a zip")
            .err()
            .expect("must fail");
        assert!(matches!(
            err.downcast_ref::<DocxError>(),
            Some(DocxError::CorruptArchive(_))
        ));
    }

    #[test]
    fn corrupt_archive_message_is_not_repeated() {
        let err = DocxPackage::from_bytes(b"definitely not a zip")
            .err()
            .expect("must fail");
        let chain = format!("{err:#}");
        assert!(chain.starts_with("corrupt docx archive: "));
        let cause = err.root_cause().to_string();
        assert_eq!(chain.matches(cause.as_str()).count(), 1);
    }

    #[test]
    fn serialization_keeps_order_and_compression() {
        let bytes = build_zip(&[
            ("[Content_Types].xml", &b"<Types/>"[..]),
            ("word/media/image1.png", &b"\x89PNG"[..]),
            ("word/document.xml", &b"<old/>"[..]),
        ]);
        let mut pkg = DocxPackage::from_bytes(&bytes).expect("read zip");
        pkg.set_part_text("word/document.xml", "<new/>");
        let out = DocxPackage::from_bytes(&pkg.to_bytes().expect("serialize")).expect("reread");

        let names: Vec<&str> = out.part_names().collect();
        assert_eq!(
            names,
            ["[Content_Types].xml", "word/media/image1.png", "word/document.xml"]
        );
        assert_eq!(out.entries[1].compression, CompressionMethod::Stored);
        assert_eq!(out.entries[1].data, b"\x89PNG");
        assert_eq!(
            out.part_text("word/document.xml").expect("decode").as_deref(),
            Some("<new/>")
        );
    }
}
