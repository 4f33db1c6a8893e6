use std::sync::Mutex;

use clap::Parser;
use kdam::{BarExt, tqdm};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, ConfigAction};
use docsift::{
    ConfigDb,
    DataDir,
    Engine,
    Error,
    Result,
    answer::AnswerMode,
    pipeline::{DocumentOutcome, DocumentStatus},
    search::{MatchKind, SearchRequest, SearchResult, SearchStatus},
    settings::{EngineSettings, KNOWN_KEYS},
    text_util::{add_line_numbers, apply_line_limits, chunk_snippet},
};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCSIFT_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;

    // Settings commands must work even when a stored value is invalid,
    // so they never open the engine.
    if let Command::Config { action } = &cli.command {
        let config_db = ConfigDb::open(&data_dir.config_db())?;
        return cmd_config(&config_db, action);
    }

    let engine = Engine::open(data_dir, cli.model.as_deref())?;

    match cli.command {
        Command::Index(args) => cmd_index(&engine, &args)?,
        Command::Search(args) => cmd_search(&engine, &args)?,
        Command::Suggest(args) => {
            for title in engine.title_suggestions(&args.prefix, args.count) {
                println!("{title}");
            }
        }
        Command::Answer(args) => cmd_answer(&engine, &args)?,
        Command::Show(args) => cmd_show(&engine, &args)?,
        Command::Get(args) => cmd_get(&engine, &args)?,
        Command::Remove(args) => {
            let record = engine.remove_document(&args.document)?;
            println!(
                "Removed {} ({} chunks)",
                record.file_name, record.chunk_count
            );
        }
        Command::Rebuild => {
            let count = engine.rebuild_lexical()?;
            println!("Rebuilt lexical index with {count} chunks");
        }
        Command::Status(args) => cmd_status(&engine, args.json)?,
        Command::Mcp => docsift::mcp::run_mcp(engine)?,
        Command::Config { .. } | Command::Completions(_) => {}
    }

    Ok(())
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_index(engine: &Engine, args: &cli::IndexArgs) -> Result<()> {
    if !args.path.exists() {
        return Err(Error::NotFound {
            kind: "path",
            name: args.path.display().to_string(),
        });
    }

    let files = engine.discover(&args.path, &args.include)?;
    if files.is_empty() {
        eprintln!("No supported files under {}", args.path.display());
        return Ok(());
    }

    let bar = Mutex::new(tqdm!(total = files.len(), desc = "Indexing"));
    let report = engine.index_files(&files, args.force, |_outcome: &DocumentOutcome| {
        if let Ok(mut bar) = bar.lock() {
            let _ = bar.update(1);
        }
    });
    eprintln!();

    if args.json {
        return print_json(&report);
    }

    for doc in &report.documents {
        match &doc.status {
            DocumentStatus::Indexed {
                chunks,
                validation_score,
                embedded,
            } => {
                let vectors = if *embedded { "" } else { ", no vectors" };
                println!(
                    "indexed   {} ({chunks} chunks, validation {validation_score:.2}{vectors})",
                    doc.file_name
                );
            }
            DocumentStatus::UpToDate => {
                println!("unchanged {}", doc.file_name);
            }
            DocumentStatus::Failed { reason } => {
                println!("failed    {}: {reason}", doc.file_name);
            }
        }
    }
    println!(
        "{} indexed, {} unchanged, {} failed",
        report.indexed(),
        report.up_to_date(),
        report.failed()
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct SearchHit {
    chunk_id: String,
    file: String,
    ordinal: usize,
    title: String,
    page_start: u32,
    page_end: u32,
    score: f32,
    lexical_score: Option<f32>,
    vector_score: Option<f32>,
    rerank_score: Option<f32>,
    match_type: MatchKind,
    extraction_method: &'static str,
    snippet: Option<String>,
}

impl SearchHit {
    fn new(result: &SearchResult, query: &str) -> Self {
        let chunk = &result.chunk;
        Self {
            chunk_id: chunk.id.clone(),
            file: result.document.record.file_name.clone(),
            ordinal: chunk.ordinal,
            title: chunk.title.clone(),
            page_start: chunk.page_start,
            page_end: chunk.page_end,
            score: result.final_score,
            lexical_score: result.lexical_score,
            vector_score: result.vector_score,
            rerank_score: result.rerank_score,
            match_type: result.match_type,
            extraction_method: chunk.extraction_method(),
            snippet: chunk_snippet(&chunk.content, query),
        }
    }
}

fn cmd_search(engine: &Engine, args: &cli::SearchArgs) -> Result<()> {
    let mut request = SearchRequest::new(args.query.clone(), args.count);
    if let Some(reference) = &args.document {
        request = request.in_document(engine.document(reference)?.id.numeric);
    }
    if args.lexical_only {
        request = request.lexical_only();
    }
    if args.no_rerank {
        request = request.without_rerank();
    }

    let outcome = engine.search(&request);
    let hits: Vec<SearchHit> = outcome
        .results
        .iter()
        .map(|r| SearchHit::new(r, &args.query))
        .collect();

    if args.json {
        return print_json(&serde_json::json!({
            "query": args.query,
            "status": outcome.status,
            "short_circuited": outcome.short_circuited,
            "results": hits,
        }));
    }

    match &outcome.status {
        SearchStatus::Complete => {}
        SearchStatus::Degraded { reasons } => {
            eprintln!("Warning: search degraded: {}", reasons.join("; "));
        }
        SearchStatus::Failed { reason } => {
            eprintln!("Search failed: {reason}");
            return Ok(());
        }
    }

    if hits.is_empty() {
        println!("No results found.");
    }
    for (rank, hit) in hits.iter().enumerate() {
        let pages = if hit.page_start == hit.page_end {
            format!("p. {}", hit.page_start)
        } else {
            format!("pp. {}-{}", hit.page_start, hit.page_end)
        };
        println!(
            "{:>2}. {:.3}  {}  [{} #{}, {pages}]",
            rank + 1,
            hit.score,
            hit.title,
            hit.file,
            hit.ordinal
        );
        if let Some(snippet) = &hit.snippet {
            for line in snippet.lines() {
                println!("      {line}");
            }
        }
    }
    Ok(())
}

fn cmd_answer(engine: &Engine, args: &cli::AnswerArgs) -> Result<()> {
    let answer = engine.answer(&args.query, None);
    if args.json {
        return print_json(&answer);
    }

    println!("{}", answer.text);
    if !answer.sources.is_empty() && answer.mode != AnswerMode::NoContext {
        println!();
        println!("Sources:");
        for source in &answer.sources {
            println!(
                "  {} p. {}-{}: {}",
                source.file_name, source.page_start, source.page_end, source.title
            );
        }
    }
    Ok(())
}

fn cmd_show(engine: &Engine, args: &cli::ShowArgs) -> Result<()> {
    let doc = engine.document(&args.document)?;

    if args.json {
        return print_json(&serde_json::json!({
            "document": doc.id.short,
            "file": doc.record.file_name,
            "source_path": doc.record.source_path,
            "chunks": doc.chunks.len(),
            "has_vectors": doc.vectors.is_some(),
            "report": doc.report,
        }));
    }

    println!("Document: {} ({})", doc.record.file_name, doc.id);
    println!("Source: {}", doc.record.source_path.display());
    println!("Chunks: {}", doc.chunks.len());
    println!("Vectors: {}", if doc.vectors.is_some() { "yes" } else { "no" });

    if let Some(report) = &doc.report {
        println!("Pages: {}", report.page_count);
        println!("Body font size: {:.1}", report.body_font_size);
        let sizes: Vec<String> =
            report.heading_sizes.iter().map(|s| format!("{s:.1}")).collect();
        println!("Heading sizes: {}", sizes.join(", "));
        println!(
            "Headings: {}, sections: {}",
            report.heading_count, report.section_count
        );
        println!(
            "Index: {:?} ({} entries, confidence {:.2})",
            report.index_method, report.index_entries, report.index_confidence
        );
        println!(
            "Validation: score {:.2}, {} exact, {} partial, {} orphaned, {} recovered{}",
            report.validation_score,
            report.exact_matches,
            report.partial_matches,
            report.orphaned_chunks,
            report.recovered_chunks,
            if report.validation_fallback { " (fallback)" } else { "" }
        );
        if !report.missing_sections.is_empty() {
            println!("Missing sections:");
            for title in &report.missing_sections {
                println!("  {title}");
            }
        }
    }

    println!();
    for chunk in &doc.chunks {
        let indent = "  ".repeat(usize::from(chunk.hierarchy_level.saturating_sub(1)));
        println!(
            "{:>4} {indent}{} [p. {}-{}, {}]",
            chunk.ordinal,
            chunk.title,
            chunk.page_start,
            chunk.page_end,
            chunk.extraction_method()
        );
    }
    Ok(())
}

fn cmd_get(engine: &Engine, args: &cli::GetArgs) -> Result<()> {
    let doc = engine.document(&args.document)?;
    let chunk = doc.chunk(args.ordinal).ok_or_else(|| Error::NotFound {
        kind: "chunk",
        name: format!("{}#{}", doc.record.file_name, args.ordinal),
    })?;

    let content = if args.full {
        engine.full_content(&doc, chunk)
    } else {
        chunk.content.clone()
    };

    if args.json {
        return print_json(&serde_json::json!({
            "chunk": &**chunk,
            "file": doc.record.file_name,
            "content": content,
        }));
    }

    let text = apply_line_limits(&content, args.from_line, args.max_lines);
    println!("# {}", chunk.title);
    if args.line_numbers {
        println!("{}", add_line_numbers(&text, args.from_line));
    } else {
        println!("{text}");
    }
    Ok(())
}

fn cmd_status(engine: &Engine, json: bool) -> Result<()> {
    let status = engine.status()?;
    if json {
        return print_json(&status);
    }

    println!("Data directory: {}", status.data_dir);
    println!("Documents: {}", status.documents);
    println!("Chunks: {} ({} in lexical index)", status.chunks, status.lexical_chunks);
    println!("Documents with vectors: {}", status.documents_with_vectors);
    println!("Embedder: {}", status.embedder.as_deref().unwrap_or("none"));
    println!("Reranker: {}", status.reranker.as_deref().unwrap_or("none"));
    for usage in &status.storage {
        println!("  {:?}: {} KiB", usage.store, usage.bytes.div_ceil(1024));
    }
    Ok(())
}

fn cmd_config(config_db: &ConfigDb, action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { json } => {
            let settings = EngineSettings::load(config_db)?;
            let stored: Vec<String> =
                config_db.list_settings()?.into_iter().map(|(k, _)| k).collect();
            let effective = settings.describe();

            if *json {
                let map: serde_json::Map<String, serde_json::Value> = effective
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), serde_json::Value::String(v)))
                    .collect();
                return print_json(&map);
            }

            for ((key, value), (_, description)) in effective.iter().zip(KNOWN_KEYS) {
                let marker = if stored.iter().any(|k| k == key) { "*" } else { " " };
                println!("{marker} {key} = {value}");
                println!("    {description}");
            }
        }
        ConfigAction::Set { key, value } => {
            EngineSettings::validate(key, value)?;
            config_db.set_setting(key, value)?;
            println!("{key} = {value}");
        }
        ConfigAction::Unset { key } => {
            if config_db.remove_setting(key)? {
                println!("Removed {key}");
            } else {
                println!("{key} was not set");
            }
        }
    }
    Ok(())
}
