use std::path::Path;

use tantivy::{
    Index,
    IndexReader,
    IndexWriter,
    TantivyDocument,
    Term,
    collector::TopDocs,
    doc,
    query::{BooleanQuery, FuzzyTermQuery, Occur, Query, QueryParser, TermQuery},
    schema::*,
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        TextAnalyzer,
    },
};

use crate::{chunk::Chunk, error::Result};

/// Writer heap budget used for per-document replacement.
pub const WRITER_MEMORY: usize = 50_000_000;

/// Field names used in the schema.
pub mod fields {
    pub const CHUNK_ID: &str = "chunk_id";
    pub const DOC_ID: &str = "doc_id";
    pub const ORDINAL: &str = "ordinal";
    pub const TITLE: &str = "title";
    pub const BODY: &str = "body";
    pub const PAGE_START: &str = "page_start";
}

/// BM25 index over chunks. Each Tantivy document is one chunk; the owning
/// document's hex id is an exact-match field so a manual can be searched or
/// replaced on its own.
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    fields: SchemaFields,
}

/// Resolved field handles for the schema.
#[derive(Clone, Copy)]
pub struct SchemaFields {
    pub chunk_id: Field,
    pub doc_id: Field,
    pub ordinal: Field,
    pub title: Field,
    pub body: Field,
    pub page_start: Field,
}

/// A lexical match for one chunk.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub score: f32,
    pub chunk_id: String,
    pub doc_id: String,
    pub ordinal: usize,
    pub title: String,
}

fn build_schema() -> (Schema, SchemaFields) {
    let mut builder = Schema::builder();

    let chunk_id = builder.add_text_field(fields::CHUNK_ID, STRING | STORED);
    let doc_id = builder.add_text_field(fields::DOC_ID, STRING | STORED | FAST);
    let ordinal = builder.add_u64_field(fields::ORDINAL, STORED | FAST);

    let title_opts = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("en_stem")
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
        .set_stored();
    let title = builder.add_text_field(fields::TITLE, title_opts);

    let body_opts = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer("en_stem")
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    );
    let body = builder.add_text_field(fields::BODY, body_opts);

    let page_start = builder.add_u64_field(fields::PAGE_START, STORED);

    let schema = builder.build();
    let fields = SchemaFields {
        chunk_id,
        doc_id,
        ordinal,
        title,
        body,
        page_start,
    };

    (schema, fields)
}

fn register_tokenizers(index: &Index) {
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(tantivy::tokenizer::Language::English))
        .build();
    index.tokenizers().register("en_stem", en_stem);
}

impl SearchIndex {
    /// Open or create a search index at the given directory.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let (schema, fields) = build_schema();

        let mmap_dir = tantivy::directory::MmapDirectory::open(dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?;
        let index = if Index::exists(&mmap_dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?
        {
            Index::open(mmap_dir)?
        } else {
            Index::create(mmap_dir, schema, tantivy::IndexSettings::default())?
        };

        register_tokenizers(&index);
        let reader = index.reader()?;

        Ok(Self {
            index,
            reader,
            fields,
        })
    }

    /// Create an in-memory search index (for testing).
    pub fn open_in_ram() -> Result<Self> {
        let (schema, fields) = build_schema();
        let index = Index::create_in_ram(schema);
        register_tokenizers(&index);
        let reader = index.reader()?;

        Ok(Self {
            index,
            reader,
            fields,
        })
    }

    pub fn fields(&self) -> SchemaFields {
        self.fields
    }

    /// Create a writer with the given memory budget (in bytes).
    pub fn writer(&self, memory_budget: usize) -> Result<IndexWriter> {
        Ok(self.index.writer(memory_budget)?)
    }

    /// Add one chunk. The title field carries every searchable title so
    /// merged sub-section names still score as titles.
    pub fn add_chunk(&self, writer: &IndexWriter, chunk: &Chunk) -> Result<()> {
        let f = self.fields;
        let titles = chunk.searchable_titles.join("\n");

        writer.add_document(doc!(
            f.chunk_id => chunk.id.as_str(),
            f.doc_id => chunk.document_id.as_str(),
            f.ordinal => chunk.ordinal as u64,
            f.title => titles,
            f.body => chunk.content.as_str(),
            f.page_start => u64::from(chunk.page_start),
        ))?;

        Ok(())
    }

    /// Delete every chunk of a document by its hex id.
    pub fn delete_document(&self, writer: &IndexWriter, doc_hex: &str) {
        let term = Term::from_field_text(self.fields.doc_id, doc_hex);
        writer.delete_term(term);
    }

    /// Swap a document's chunks in one commit.
    pub fn replace_document(&self, doc_hex: &str, chunks: &[Chunk]) -> Result<()> {
        let mut writer = self.writer(WRITER_MEMORY)?;
        self.delete_document(&writer, doc_hex);
        for chunk in chunks {
            self.add_chunk(&writer, chunk)?;
        }
        writer.commit()?;
        Ok(())
    }

    pub fn remove_document(&self, doc_hex: &str) -> Result<()> {
        let mut writer = self.writer(WRITER_MEMORY)?;
        self.delete_document(&writer, doc_hex);
        writer.commit()?;
        Ok(())
    }

    /// Drop everything and index `chunks` from scratch.
    pub fn rebuild<'a>(&self, chunks: impl IntoIterator<Item = &'a Chunk>) -> Result<usize> {
        let mut writer = self.writer(WRITER_MEMORY)?;
        writer.delete_all_documents()?;
        let mut count = 0;
        for chunk in chunks {
            self.add_chunk(&writer, chunk)?;
            count += 1;
        }
        writer.commit()?;
        Ok(count)
    }

    fn text_query(&self, query_str: &str) -> Box<dyn Query> {
        let f = self.fields;
        let mut parser = QueryParser::for_index(&self.index, vec![f.title, f.body]);
        parser.set_field_boost(f.title, 2.0);
        let (query, _errors) = parser.parse_query_lenient(query_str);
        query
    }

    fn document_filter(&self, doc_hex: &str) -> Box<dyn Query> {
        let term = Term::from_field_text(self.fields.doc_id, doc_hex);
        Box::new(TermQuery::new(term, IndexRecordOption::Basic))
    }

    fn run(&self, query: &dyn Query, limit: usize) -> Result<Vec<LexicalHit>> {
        let f = self.fields;
        self.reader.reload()?;
        let searcher = self.reader.searcher();
        let top_docs = searcher.search(query, &TopDocs::with_limit(limit.max(1)))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            results.push(LexicalHit {
                score,
                chunk_id: extract_text(&doc, f.chunk_id),
                doc_id: extract_text(&doc, f.doc_id),
                ordinal: extract_u64(&doc, f.ordinal) as usize,
                title: extract_first_line(&doc, f.title),
            });
        }

        Ok(results)
    }

    /// Search all documents with BM25. The `title` field is boosted 2x.
    pub fn search(&self, query_str: &str, limit: usize) -> Result<Vec<LexicalHit>> {
        let query = self.text_query(query_str);
        self.run(query.as_ref(), limit)
    }

    /// Search within one document only.
    pub fn search_in_document(
        &self,
        query_str: &str,
        doc_hex: &str,
        limit: usize,
    ) -> Result<Vec<LexicalHit>> {
        let combined = BooleanQuery::new(vec![
            (Occur::Must, self.text_query(query_str)),
            (Occur::Must, self.document_filter(doc_hex)),
        ]);
        self.run(&combined, limit)
    }

    /// BM25 ORed with distance-1 fuzzy terms on the body, so a misspelled
    /// query word still finds its chunk.
    pub fn search_fuzzy(
        &self,
        query_str: &str,
        doc_hex: Option<&str>,
        limit: usize,
    ) -> Result<Vec<LexicalHit>> {
        let f = self.fields;
        let mut should_clauses: Vec<(Occur, Box<dyn Query>)> =
            vec![(Occur::Should, self.text_query(query_str))];

        for term_str in query_str.split_whitespace() {
            if term_str.len() >= 3 {
                let term = Term::from_field_text(f.body, &term_str.to_lowercase());
                should_clauses.push((
                    Occur::Should,
                    Box::new(FuzzyTermQuery::new(term, 1, true)),
                ));
            }
        }

        let combined: Box<dyn Query> = Box::new(BooleanQuery::new(should_clauses));
        let final_query: Box<dyn Query> = match doc_hex {
            Some(doc_hex) => Box::new(BooleanQuery::new(vec![
                (Occur::Must, combined),
                (Occur::Must, self.document_filter(doc_hex)),
            ])),
            None => combined,
        };

        self.run(final_query.as_ref(), limit)
    }

    /// Number of indexed chunks.
    pub fn num_chunks(&self) -> Result<u64> {
        self.reader.reload()?;
        Ok(self.reader.searcher().num_docs())
    }
}

impl std::fmt::Debug for SearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchIndex").finish_non_exhaustive()
    }
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn extract_first_line(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .and_then(|s| s.lines().next())
        .unwrap_or("")
        .to_string()
}

fn extract_u64(doc: &TantivyDocument, field: Field) -> u64 {
    doc.get_first(field).and_then(|v| v.as_u64()).unwrap_or(0)
}
