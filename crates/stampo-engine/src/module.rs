//! Extension modules invoked per placeholder during rendering.
//!
//! Modules are consulted in attach order; later modules are asked only when
//! earlier ones decline a tag.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::archive::TemplateArchive;
use crate::error::TemplateIssue;

const IMAGE_RELATIONSHIP_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";
const RELATIONSHIPS_SKELETON: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
</Relationships>";

/// What a module produces for a claimed tag.
pub enum Replacement {
    /// Plain text substituted where the tag stood.
    Text(String),
    /// A complete `<w:r>…</w:r>` fragment inserted after the tag's host run.
    RunXml(String),
}

pub trait RenderModule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this module handles the given tag (delimiters stripped).
    fn claims(&self, tag: &str) -> bool;

    /// The data-mapping key the engine should resolve for this tag.
    fn data_key<'t>(&self, tag: &'t str) -> &'t str {
        tag
    }

    fn resolve(
        &self,
        tag: &str,
        value: Option<&Value>,
        ctx: &mut ModuleContext<'_>,
    ) -> Result<Replacement, TemplateIssue>;
}

/// Per-part view handed to modules while a render is in flight.
pub struct ModuleContext<'a> {
    pub part_name: &'a str,
    archive: &'a TemplateArchive,
    pending: &'a mut PendingAssets,
}

impl<'a> ModuleContext<'a> {
    pub(crate) fn new(
        part_name: &'a str,
        archive: &'a TemplateArchive,
        pending: &'a mut PendingAssets,
    ) -> Self {
        Self {
            part_name,
            archive,
            pending,
        }
    }

    /// Stage an image for embedding and return the relationship id to
    /// reference from drawing XML. Nothing touches the archive until the
    /// whole render succeeds.
    pub fn embed_image(&mut self, bytes: Vec<u8>, extension: &str) -> String {
        self.pending
            .add_image(self.part_name, self.archive, bytes, extension)
    }

    /// A document-unique id for `wp:docPr`/`pic:cNvPr` elements.
    pub fn next_drawing_id(&mut self) -> usize {
        self.pending.drawing_seq += 1;
        self.pending.drawing_seq
    }
}

/// Archive mutations accumulated during rendering and committed only when the
/// render as a whole succeeds, keeping failed renders side-effect free.
#[derive(Default)]
pub(crate) struct PendingAssets {
    media: Vec<(String, Vec<u8>)>,
    relationships: BTreeMap<String, Vec<(String, String)>>,
    extensions: BTreeSet<String>,
    media_seq: usize,
    drawing_seq: usize,
}

impl PendingAssets {
    fn add_image(
        &mut self,
        part_name: &str,
        archive: &TemplateArchive,
        bytes: Vec<u8>,
        extension: &str,
    ) -> String {
        let media_name = loop {
            self.media_seq += 1;
            let candidate = format!("word/media/stampo{}.{}", self.media_seq, extension);
            let staged = self.media.iter().any(|(name, _)| name == &candidate);
            if archive.part(&candidate).is_none() && !staged {
                break candidate;
            }
        };

        let rels_name = rels_part_for(part_name);
        let existing = archive.part(&rels_name);
        let staged_count = self
            .relationships
            .get(&rels_name)
            .map_or(0, |entries| entries.len());
        let rel_id = format!("rId{}", max_relationship_id(existing) + staged_count + 1);

        // Targets in part relationships are relative to the part's directory.
        let target = media_name
            .strip_prefix("word/")
            .unwrap_or(&media_name)
            .to_string();

        self.media.push((media_name, bytes));
        self.extensions.insert(extension.to_string());
        self.relationships
            .entry(rels_name)
            .or_default()
            .push((rel_id.clone(), target));
        rel_id
    }

    pub(crate) fn commit(self, archive: &mut TemplateArchive) {
        for (name, bytes) in self.media {
            archive.set_part(&name, bytes);
        }

        for (rels_name, entries) in self.relationships {
            let mut content = archive
                .part(&rels_name)
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .unwrap_or_else(|| RELATIONSHIPS_SKELETON.to_string());
            let additions: String = entries
                .iter()
                .map(|(id, target)| {
                    format!(
                        "<Relationship Id=\"{id}\" Type=\"{IMAGE_RELATIONSHIP_TYPE}\" Target=\"{target}\"/>"
                    )
                })
                .collect();
            match content.rfind("</Relationships>") {
                Some(pos) => content.insert_str(pos, &additions),
                None => content.push_str(&additions),
            }
            archive.set_part(&rels_name, content.into_bytes());
        }

        if !self.extensions.is_empty() {
            let mut content = archive
                .part("[Content_Types].xml")
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .unwrap_or_default();
            for extension in &self.extensions {
                if content.contains(&format!("Extension=\"{extension}\"")) {
                    continue;
                }
                let default = format!(
                    "<Default Extension=\"{extension}\" ContentType=\"{}\"/>",
                    content_type_for(extension)
                );
                match content.rfind("</Types>") {
                    Some(pos) => content.insert_str(pos, &default),
                    None => content.push_str(&default),
                }
            }
            archive.set_part("[Content_Types].xml", content.into_bytes());
        }
    }
}

fn rels_part_for(part_name: &str) -> String {
    match part_name.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part_name}.rels"),
    }
}

fn max_relationship_id(rels: Option<&[u8]>) -> usize {
    let Some(bytes) = rels else { return 0 };
    let content = String::from_utf8_lossy(bytes);
    let mut max = 0;
    let mut rest = content.as_ref();
    while let Some(pos) = rest.find("Id=\"rId") {
        rest = &rest[pos + 7..];
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        if let Ok(id) = digits.parse::<usize>() {
            max = max.max(id);
        }
    }
    max
}

fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "png" => "image/png",
        "jpeg" | "jpg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}
