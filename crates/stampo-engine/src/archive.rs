//! In-memory representation of a ZIP-backed document package.

use std::io::{Cursor, Read, Write};

use zip::{CompressionMethod, ZipArchive, ZipWriter, write::SimpleFileOptions};

use crate::error::EngineError;

/// A mutable document package held entirely in memory.
///
/// Parts keep their original order so an untouched template re-serializes to
/// the same sequence of entries it arrived with.
#[derive(Debug, Clone)]
pub struct TemplateArchive {
    parts: Vec<(String, Vec<u8>)>,
}

impl TemplateArchive {
    /// Open a byte buffer as a document package.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EngineError> {
        let mut zip = ZipArchive::new(Cursor::new(bytes))
            .map_err(|err| EngineError::Archive(err.to_string()))?;
        let mut parts = Vec::with_capacity(zip.len());
        for index in 0..zip.len() {
            let mut entry = zip
                .by_index(index)
                .map_err(|err| EngineError::Archive(err.to_string()))?;
            if entry.is_dir() {
                continue;
            }
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut data)
                .map_err(|err| EngineError::Archive(err.to_string()))?;
            parts.push((entry.name().to_string(), data));
        }
        Ok(Self { parts })
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.parts
            .iter()
            .find(|(part, _)| part == name)
            .map(|(_, data)| data.as_slice())
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|(name, _)| name.as_str())
    }

    /// Replace a part in place, or append it when absent.
    pub fn set_part(&mut self, name: &str, data: Vec<u8>) {
        match self.parts.iter_mut().find(|(part, _)| part == name) {
            Some((_, existing)) => *existing = data,
            None => self.parts.push((name.to_string(), data)),
        }
    }

    /// Serialize back to a DEFLATE-compressed ZIP buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EngineError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, data) in &self.parts {
            writer
                .start_file(name.as_str(), options)
                .map_err(|err| EngineError::Archive(err.to_string()))?;
            writer
                .write_all(data)
                .map_err(|err| EngineError::Archive(err.to_string()))?;
        }
        let cursor = writer
            .finish()
            .map_err(|err| EngineError::Archive(err.to_string()))?;
        Ok(cursor.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_archive() -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.start_file("word/document.xml", options).unwrap();
        writer.write_all(b"<w:document/>").unwrap();
        writer.start_file("word/styles.xml", options).unwrap();
        writer.write_all(b"<w:styles/>").unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn parts_survive_a_round_trip_in_order() {
        let archive = TemplateArchive::from_bytes(&sample_archive()).unwrap();
        let bytes = archive.to_bytes().unwrap();
        let reread = TemplateArchive::from_bytes(&bytes).unwrap();
        assert_eq!(
            reread.part_names().collect::<Vec<_>>(),
            vec!["word/document.xml", "word/styles.xml"]
        );
        assert_eq!(reread.part("word/document.xml"), Some(&b"<w:document/>"[..]));
    }

    #[test]
    fn non_zip_bytes_are_rejected() {
        let error = TemplateArchive::from_bytes(b"definitely not a zip").unwrap_err();
        assert!(matches!(error, EngineError::Archive(_)));
    }

    #[test]
    fn set_part_replaces_without_reordering() {
        let mut archive = TemplateArchive::from_bytes(&sample_archive()).unwrap();
        archive.set_part("word/document.xml", b"<w:document>x</w:document>".to_vec());
        assert_eq!(
            archive.part_names().collect::<Vec<_>>(),
            vec!["word/document.xml", "word/styles.xml"]
        );
        assert_eq!(
            archive.part("word/document.xml"),
            Some(&b"<w:document>x</w:document>"[..])
        );
    }
}
