//! docsift - structure-aware indexing and hybrid search for technical manuals.
//!
//! Documents arrive as positioned text lines (font size, boldness, page).
//! docsift detects headings from font statistics, builds a section tree,
//! turns it into size-bounded chunks, and checks the result against the
//! document's own table of contents, recovering sections the font pass
//! missed. Chunks are then searchable three ways: an exact-title index,
//! BM25 via [Tantivy](https://github.com/quickwit-oss/tantivy), and
//! semantic vectors with optional
//! [ColBERT](https://github.com/stanford-futuredata/ColBERT) reranking.
//!
//! # Quick start
//!
//! ```no_run
//! use docsift::{DataDir, Engine};
//! use docsift::search::SearchRequest;
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let engine = Engine::open(data_dir, None).unwrap();
//!
//! let report = engine
//!     .index_documents(std::path::Path::new("manuals/"), false)
//!     .unwrap();
//! println!("{} documents indexed", report.indexed());
//!
//! let outcome = engine.search(&SearchRequest::new("firewall ports", 5));
//! for r in &outcome.results {
//!     println!(
//!         "{} p.{} {} ({:.3})",
//!         r.document.record.file_name, r.chunk.page_start, r.chunk.title, r.final_score
//!     );
//! }
//! ```

pub mod answer;
pub mod artifact_store;
pub mod bounded;
pub mod catalog;
pub mod chunk;
pub mod chunking;
pub mod config_db;
pub mod data_dir;
pub mod doc_id;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extraction;
pub mod heading;
pub mod incremental;
pub mod layout;
pub mod mcp;
pub mod model_manager;
pub mod normalize;
pub mod pipeline;
pub mod reranker;
pub mod resolver;
pub mod rules;
pub mod search;
pub mod settings;
pub mod structure;
pub mod tantivy_index;
pub mod text_util;
pub mod title_index;
pub mod toc;
pub mod validation;
pub mod walker;

pub use chunk::{Chunk, ChunkType};
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use doc_id::DocumentId;
pub use engine::Engine;
pub use error::{Error, Result};
pub use heading::HeadingClassifier;
pub use search::HybridSearchEngine;
pub use structure::StructureBuilder;
pub use tantivy_index::SearchIndex;
pub use title_index::ExactTitleIndex;
pub use toc::IndexExtractor;
pub use validation::ChunkValidator;
