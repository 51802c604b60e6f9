use std::io::{BufRead, Write};

use clap::Parser;
use file_concierge::{
    Concierge,
    DataDir,
    LongTermMemory,
    config::{self, Settings},
    error::{self, Error},
    indexer::{FileOutcome, IndexReport},
    search::SearchHit,
    tools::SearchFilesArgs,
};
use kdam::{Bar, BarExt, tqdm};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{
    Cli,
    CollectionAction,
    Command,
    ConfigAction,
    FilesAction,
    TagAction,
};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("CONCIERGE_LOG") {
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

fn runtime() -> error::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            Error::Config(format!("failed to start tokio runtime: {e}"))
        })
}

fn print_json<T: Serialize>(value: &T) -> error::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let overrides = cli.overrides();

    if let Command::Config { action } = &cli.command {
        let memory = LongTermMemory::open(&data_dir.memory_db())?;
        return cmd_config(action, data_dir, &memory, &overrides);
    }

    let mut concierge = Concierge::open(data_dir, &overrides)?;

    match cli.command {
        Command::Index(args) => {
            let report =
                index_with_progress(&concierge, args.force, cli.quiet)?;
            print_report(&report);
        }
        Command::Search(args) => {
            cmd_search(&concierge, args)?;
        }
        Command::Query(args) => {
            let answer = runtime()?.block_on(concierge.query(&args.text))?;
            println!("{answer}");
        }
        Command::Chat => {
            cmd_chat(&mut concierge, cli.quiet)?;
        }
        Command::Stats(args) => {
            cmd_stats(&concierge, args.json)?;
        }
        Command::Tag { action } => {
            cmd_tag(&concierge, action)?;
        }
        Command::Collection { action } => {
            cmd_collection(&concierge, action)?;
        }
        Command::Files { action } => {
            cmd_files(&concierge, action)?;
        }
        Command::Mcp => {
            file_concierge::mcp::run_mcp(concierge)?;
        }
        Command::Config { .. } | Command::Completions(_) => {}
    }

    Ok(())
}

fn index_with_progress(
    concierge: &Concierge,
    force: bool,
    quiet: bool,
) -> error::Result<IndexReport> {
    let mut bar: Option<Bar> = None;
    let report = concierge.index_all_files_with(force, |event| {
        if quiet {
            return;
        }
        let pb = bar.get_or_insert_with(|| {
            tqdm!(total = event.total, desc = "Indexing")
        });
        if let FileOutcome::Failed(stage) = &event.outcome {
            pb.write(format!("failed ({stage:?}): {}", event.path)).ok();
        }
        pb.update(1).ok();
    })?;
    if bar.is_some() {
        eprintln!();
    }
    Ok(report)
}

fn print_report(report: &IndexReport) {
    println!(
        "Discovered {} files: {} processed, {} skipped, {} embedded, \
         {} failed.",
        report.discovered,
        report.processed,
        report.skipped,
        report.embedded,
        report.failures.len()
    );
    for failure in &report.failures {
        println!(
            "  {} [{:?}]: {}",
            failure.path, failure.stage, failure.error
        );
    }
    println!(
        "Index now holds {} files and {} vectors.",
        report.total_files, report.vector_count
    );
}

fn cmd_search(
    concierge: &Concierge,
    args: cli::SearchArgs,
) -> error::Result<()> {
    let output = concierge.toolbox().search_files(SearchFilesArgs {
        query: args.query,
        tags: args.tags,
        top_k: args.count,
    })?;

    if args.json {
        return print_json(&output);
    }
    if output.results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for hit in &output.results {
        print_hit(hit);
    }
    Ok(())
}

fn print_hit(hit: &SearchHit) {
    let tags = if hit.tags.is_empty() {
        String::new()
    } else {
        format!("  [{}]", hit.tags.join(", "))
    };
    let marker = if hit.tag_match { " *" } else { "" };
    println!("{:.3}{marker}  {}{tags}", hit.similarity, hit.file_path);
    if let Some(snippet) = &hit.snippet {
        for line in snippet.lines() {
            println!("      {line}");
        }
    }
}

fn cmd_chat(concierge: &mut Concierge, quiet: bool) -> error::Result<()> {
    let rt = runtime()?;
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();

    if !concierge.has_llm() {
        eprintln!(
            "No language model configured; set CONCIERGE_API_KEY or \
             OPENAI_API_KEY. Only built-in commands will work."
        );
    }
    eprintln!("Type 'help' for commands, 'exit' to quit.");

    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let input = line.trim();

        match input {
            "" => continue,
            "exit" | "quit" => break,
            "help" => print_chat_help(),
            "index" | "reindex" => {
                let report =
                    index_with_progress(concierge, input == "reindex", quiet)?;
                print_report(&report);
            }
            "stats" => cmd_stats(concierge, false)?,
            "reset" => {
                concierge.reset_conversation();
                println!("Conversation cleared.");
            }
            text => match rt.block_on(concierge.query(text)) {
                Ok(answer) => println!("{answer}"),
                Err(e) => eprintln!("error: {e}"),
            },
        }
    }
    Ok(())
}

fn print_chat_help() {
    println!("Commands:");
    println!("  index    index new files in the sandbox");
    println!("  reindex  reprocess every file");
    println!("  stats    show index statistics");
    println!("  reset    start a new conversation");
    println!("  exit     quit");
    println!("Anything else is sent to the concierge.");
}

fn cmd_stats(concierge: &Concierge, json: bool) -> error::Result<()> {
    let stats = concierge.stats()?;
    if json {
        return print_json(&stats);
    }
    println!("Data directory: {}", stats.data_dir);
    println!("Sandbox: {}", stats.sandbox_dir);
    println!("Files: {}", stats.total_files);
    println!("Vectors: {}", stats.vector_count);
    println!("Tags: {}", stats.tag_count);
    println!("Collections: {}", stats.collection_count);
    println!("Embedding model: {}", stats.embedding_model);
    println!(
        "Language model: {}",
        stats.llm_model.as_deref().unwrap_or("not configured")
    );
    Ok(())
}

fn cmd_tag(concierge: &Concierge, action: TagAction) -> error::Result<()> {
    let toolbox = concierge.toolbox();
    match action {
        TagAction::Apply { file, tags } => {
            let out = toolbox.apply_tags(&file, &tags)?;
            println!("{}: {}", out.file_path, out.tags.join(", "));
        }
        TagAction::Remove { file, tag } => {
            let out = toolbox.remove_tag(&file, &tag)?;
            if !out.removed {
                eprintln!("{} was not tagged '{tag}'", out.file_path);
            }
        }
        TagAction::Show { file, json } => {
            let out = toolbox.get_file_tags(&file)?;
            if json {
                print_json(&out)?;
            } else {
                for tag in &out.tags {
                    println!("{tag}");
                }
            }
        }
        TagAction::List { json } => {
            let out = toolbox.list_tags()?;
            if json {
                print_json(&out)?;
            } else {
                for tag in &out.tags {
                    println!("{tag}");
                }
            }
        }
        TagAction::Files { tags, json } => {
            let output = toolbox.search_files(SearchFilesArgs {
                query: None,
                tags,
                top_k: Some(usize::MAX),
            })?;
            if json {
                print_json(&output)?;
            } else {
                for hit in &output.results {
                    println!("{}", hit.file_path);
                }
            }
        }
        TagAction::Suggest { file, apply } => {
            let out = runtime()?.block_on(toolbox.suggest_tags(&file))?;
            println!("{}", out.suggested_tags.join(", "));
            if apply && !out.suggested_tags.is_empty() {
                toolbox.apply_tags(&out.file_path, &out.suggested_tags)?;
                eprintln!(
                    "Applied {} tags to {}",
                    out.suggested_tags.len(),
                    out.file_path
                );
            }
        }
    }
    Ok(())
}

fn cmd_collection(
    concierge: &Concierge,
    action: CollectionAction,
) -> error::Result<()> {
    let toolbox = concierge.toolbox();
    match action {
        CollectionAction::Create { name, description } => {
            let out = toolbox.create_collection(
                &name,
                description.as_deref().unwrap_or_default(),
            )?;
            eprintln!("Created collection '{}'", out.collection.name);
        }
        CollectionAction::Add { name, files } => {
            let out = toolbox.add_to_collection(&name, &files)?;
            eprintln!(
                "Collection '{}' now holds {} files",
                out.collection_name, out.file_count
            );
        }
        CollectionAction::Show { name, json } => {
            let out = toolbox.get_collection_files(&name)?;
            if json {
                print_json(&out)?;
            } else {
                for file in &out.files {
                    println!("{file}");
                }
            }
        }
        CollectionAction::List { json } => {
            let out = toolbox.list_collections()?;
            if json {
                print_json(&out)?;
            } else if out.collections.is_empty() {
                println!("No collections.");
            } else {
                for c in &out.collections {
                    if c.description.is_empty() {
                        println!("{}", c.name);
                    } else {
                        println!("{}: {}", c.name, c.description);
                    }
                }
            }
        }
    }
    Ok(())
}

fn cmd_files(concierge: &Concierge, action: FilesAction) -> error::Result<()> {
    let toolbox = concierge.toolbox();
    match action {
        FilesAction::List {
            directory,
            pattern,
            json,
        } => {
            let out = toolbox.list_files(
                directory.as_deref().unwrap_or_default(),
                pattern.as_deref().unwrap_or("*"),
            )?;
            if json {
                print_json(&out)?;
            } else {
                for f in &out.files {
                    println!(
                        "{:>10}  {:<12}  {}",
                        f.size,
                        f.category.as_str(),
                        f.path
                    );
                }
            }
        }
        FilesAction::Read { file } => {
            let out = toolbox.read_file(&file)?;
            match out.content {
                Some(text) => print!("{text}"),
                None => eprintln!(
                    "{} is not a text file ({}, {} bytes)",
                    out.file_path, out.file_type, out.file_size
                ),
            }
        }
    }
    Ok(())
}

fn cmd_config(
    action: &ConfigAction,
    data_dir: DataDir,
    memory: &LongTermMemory,
    overrides: &config::Overrides,
) -> error::Result<()> {
    match action {
        ConfigAction::Show { json } => {
            let settings = Settings::resolve(data_dir, memory, overrides)?;
            let entries = settings.entries();
            if *json {
                let map: serde_json::Map<String, serde_json::Value> = entries
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), serde_json::Value::String(v)))
                    .collect();
                print_json(&map)?;
            } else {
                for (key, value) in entries {
                    println!("{key} = {value}");
                }
                let key_state = if settings.llm.api_key.is_some() {
                    "set"
                } else {
                    "not set"
                };
                println!("api_key = <{key_state}>");
            }
        }
        ConfigAction::Set { key, value } => {
            let setting = config::validate_setting(key, value)?;
            memory.set_setting(setting.key, value.trim())?;
            eprintln!("{} = {}", setting.key, value.trim());
        }
        ConfigAction::Clear { key } => {
            let setting = config::setting_key(key)?;
            if memory.remove_setting(setting.key)? {
                eprintln!("Cleared {}", setting.key);
            } else {
                eprintln!("{} was not set", setting.key);
            }
        }
    }
    Ok(())
}
