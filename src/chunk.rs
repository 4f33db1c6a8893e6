//! Retrievable chunks and their provenance.

use serde::{Deserialize, Serialize};

use crate::doc_id::DocumentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Chapter,
    Section,
    Subsection,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Chapter => "chapter",
            ChunkType::Section => "section",
            ChunkType::Subsection => "subsection",
        }
    }
}

/// How a chunk came to exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum Provenance {
    /// Produced by the font-driven structure pass.
    #[serde(rename = "font_analysis")]
    FontDerived { section_id: String },
    /// Rebuilt from the document index for a section the structure pass
    /// missed.
    #[serde(rename = "index_recovery")]
    IndexRecovered { entry_id: String },
}

impl Provenance {
    /// The extraction method tag stored with chunk metadata.
    pub fn extraction_method(&self) -> &'static str {
        match self {
            Provenance::FontDerived { .. } => "font_analysis",
            Provenance::IndexRecovered { .. } => "index_recovery",
        }
    }

    /// The section or index entry the chunk belongs to. Windowed parts of
    /// one section share this key.
    pub fn source_key(&self) -> &str {
        match self {
            Provenance::FontDerived { section_id } => section_id,
            Provenance::IndexRecovered { entry_id } => entry_id,
        }
    }
}

/// A retrievable unit of text with hierarchy and page metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// `"<document hex>-<ordinal>"`, assigned by [`assign_identity`].
    pub id: String,
    /// Owning document, full hex form.
    pub document_id: String,
    pub ordinal: usize,
    pub title: String,
    pub content: String,
    pub chunk_type: ChunkType,
    pub hierarchy_level: u8,
    pub page_start: u32,
    pub page_end: u32,
    pub confidence: f32,
    /// Titles answered by this chunk: its own plus any merged or contained
    /// sub-section titles.
    #[serde(default)]
    pub searchable_titles: Vec<String>,
    pub provenance: Provenance,
}

impl Chunk {
    /// A chunk without identity; call [`assign_identity`] once the owning
    /// document is known.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        chunk_type: ChunkType,
        hierarchy_level: u8,
        page_start: u32,
        page_end: u32,
        confidence: f32,
        provenance: Provenance,
    ) -> Self {
        let title = title.into();
        Self {
            id: String::new(),
            document_id: String::new(),
            ordinal: 0,
            searchable_titles: vec![title.clone()],
            title,
            content: content.into(),
            chunk_type,
            hierarchy_level,
            page_start,
            page_end: page_end.max(page_start),
            confidence,
            provenance,
        }
    }

    pub fn extraction_method(&self) -> &'static str {
        self.provenance.extraction_method()
    }

    pub fn add_searchable_title(&mut self, title: &str) {
        if !title.trim().is_empty()
            && !self.searchable_titles.iter().any(|t| t == title)
        {
            self.searchable_titles.push(title.to_string());
        }
    }

    /// Text sent to embedders and rerankers.
    pub fn embedding_text(&self) -> String {
        format!("{}\n{}", self.title, self.content)
    }
}

/// Assign document ownership and ordinals, starting at `first_ordinal`.
pub fn assign_identity(chunks: &mut [Chunk], document: &DocumentId, first_ordinal: usize) {
    let hex = document.hex();
    for (offset, chunk) in chunks.iter_mut().enumerate() {
        let ordinal = first_ordinal + offset;
        chunk.ordinal = ordinal;
        chunk.document_id = hex.clone();
        chunk.id = format!("{hex}-{ordinal}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Chunk {
        Chunk::new(
            "Recovery Plans",
            "A recovery plan runs a set of steps.",
            ChunkType::Chapter,
            1,
            4,
            2,
            0.9,
            Provenance::FontDerived {
                section_id: "s3".to_string(),
            },
        )
    }

    #[test]
    fn new_chunk_is_searchable_by_title_and_keeps_page_order() {
        let chunk = sample();
        assert_eq!(chunk.searchable_titles, vec!["Recovery Plans".to_string()]);
        assert_eq!(chunk.page_end, 4);
        assert_eq!(chunk.extraction_method(), "font_analysis");
    }

    #[test]
    fn searchable_titles_are_deduplicated() {
        let mut chunk = sample();
        chunk.add_searchable_title("Recovery Plans");
        chunk.add_searchable_title("Testing a Recovery Plan");
        chunk.add_searchable_title("  ");
        assert_eq!(chunk.searchable_titles.len(), 2);
    }

    #[test]
    fn identity_is_sequential() {
        let doc = DocumentId::new("guide.json");
        let mut chunks = vec![sample(), sample()];
        assign_identity(&mut chunks, &doc, 5);
        assert_eq!(chunks[0].ordinal, 5);
        assert_eq!(chunks[1].id, format!("{}-6", doc.hex()));
        assert_eq!(chunks[1].document_id, doc.hex());
    }

    #[test]
    fn provenance_tag_matches_extraction_method() {
        let recovered = Provenance::IndexRecovered {
            entry_id: "abc".to_string(),
        };
        let derived = Provenance::FontDerived {
            section_id: "s1".to_string(),
        };
        for provenance in [&recovered, &derived] {
            let json = serde_json::to_value(provenance).unwrap();
            assert_eq!(json["method"], provenance.extraction_method());
            let back: Provenance = serde_json::from_value(json).unwrap();
            assert_eq!(&back, provenance);
        }
        assert_eq!(recovered.extraction_method(), "index_recovery");
        assert_eq!(recovered.source_key(), "abc");
    }
}
