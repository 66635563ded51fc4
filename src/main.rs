use anyhow::Result;
use std::path::PathBuf;

use gendex::config::Config;
use gendex::db::{generations, ksamplers, Database, GenerationFilter};
use gendex::ingest::Ingestor;
use gendex::logging;

enum Command {
    Ingest { paths: Vec<PathBuf>, force: bool },
    Scan { force: bool },
    Show { id: i64 },
    List { filter: GenerationFilter, page: i64 },
    Facets { facet: String, filter: GenerationFilter },
}

struct Cli {
    config_path: Option<PathBuf>,
    command: Command,
}

fn print_help() {
    println!(
        r#"gendex - catalog for AI-generated image provenance

USAGE:
    gendex [OPTIONS] <COMMAND>

COMMANDS:
    ingest <PATH>... [--force]   Ingest image files or directories
    scan [--force]               Ingest all configured library roots
    show <ID>                    Show one cataloged generation
    list [FILTERS] [--page N]    List cataloged generations
    facets <checkpoints|loras|nodes> [FILTERS]
                                 List distinct facet values

FILTERS:
    --text TEXT                  Free-text match over raw metadata
    --checkpoint ID              Require this checkpoint (repeatable)
    --lora ID                    Require this LoRA (repeatable)
    --node CLASS_TYPE            Require this workflow node type (repeatable)

OPTIONS:
    --config, -c PATH            Path to config file
    --force                      Replace already-cataloged images
    --version, -V                Show version
    --help, -h                   Show this help message

ENVIRONMENT:
    GENDEX_LOG                   Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/gendex/config.toml"#
    );
}

fn parse_args() -> Result<Cli> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut config_path = None;
    let mut force = false;
    let mut page: i64 = 1;
    let mut filter = GenerationFilter::default();
    let mut command_word: Option<String> = None;
    let mut positionals: Vec<String> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("gendex {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                i += 1;
                config_path = Some(PathBuf::from(expect_value(&args, i, "--config")?));
            }
            "--force" => force = true,
            "--text" => {
                i += 1;
                filter.text = Some(expect_value(&args, i, "--text")?.to_string());
            }
            "--checkpoint" => {
                i += 1;
                filter
                    .checkpoint_ids
                    .push(expect_value(&args, i, "--checkpoint")?.parse()?);
            }
            "--lora" => {
                i += 1;
                filter.lora_ids.push(expect_value(&args, i, "--lora")?.parse()?);
            }
            "--node" => {
                i += 1;
                filter
                    .node_types
                    .push(expect_value(&args, i, "--node")?.to_string());
            }
            "--page" => {
                i += 1;
                page = expect_value(&args, i, "--page")?.parse()?;
            }
            word if !word.starts_with('-') => {
                if command_word.is_none() {
                    command_word = Some(word.to_string());
                } else {
                    positionals.push(word.to_string());
                }
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
        i += 1;
    }

    let command = match command_word.as_deref() {
        Some("ingest") => {
            if positionals.is_empty() {
                anyhow::bail!("ingest requires at least one path");
            }
            Command::Ingest {
                paths: positionals.iter().map(PathBuf::from).collect(),
                force,
            }
        }
        Some("scan") => Command::Scan { force },
        Some("show") => {
            let id = positionals
                .first()
                .ok_or_else(|| anyhow::anyhow!("show requires a generation id"))?
                .parse()?;
            Command::Show { id }
        }
        Some("list") => Command::List { filter, page },
        Some("facets") => {
            let facet = positionals
                .first()
                .ok_or_else(|| anyhow::anyhow!("facets requires one of: checkpoints, loras, nodes"))?
                .clone();
            Command::Facets { facet, filter }
        }
        Some(other) => anyhow::bail!("unknown command: {other}"),
        None => {
            print_help();
            std::process::exit(1);
        }
    };

    Ok(Cli {
        config_path,
        command,
    })
}

fn expect_value<'a>(args: &'a [String], index: usize, flag: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("{flag} requires a value"))
}

fn main() -> Result<()> {
    let cli = parse_args()?;

    let _ = logging::init(Some(Config::config_dir().join("logs")));

    let config = match &cli.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let db = Database::open(&config.db_path)?;
    db.initialize()?;

    match cli.command {
        Command::Ingest { paths, force } => {
            let ingestor = Ingestor::new(&db);
            for path in paths {
                if path.is_dir() {
                    let summary = ingestor.ingest_directory(&path, force)?;
                    println!(
                        "{}: {} ingested, {} skipped, {} failed",
                        path.display(),
                        summary.ingested,
                        summary.skipped,
                        summary.failed
                    );
                } else {
                    match ingestor.ingest_file(&path, force) {
                        Ok(outcome) => println!("{}: generation {}", path.display(), outcome.generation_id()),
                        Err(e) => eprintln!("{}: failed: {e:#}", path.display()),
                    }
                }
            }
        }
        Command::Scan { force } => {
            if config.libraries.is_empty() {
                eprintln!("no libraries configured; add paths to the config file");
                std::process::exit(1);
            }
            let summary = Ingestor::new(&db).ingest_all(&config.libraries, force)?;
            println!(
                "{} ingested, {} skipped, {} failed",
                summary.ingested, summary.skipped, summary.failed
            );
        }
        Command::Show { id } => show_generation(&db, id)?,
        Command::List { filter, page } => {
            let records = generations::fetch_filtered(&db, &filter, page)?;
            let pages = generations::total_pages(&db, &filter)?;
            for record in &records {
                println!(
                    "{:6}  {:13}  {}",
                    record.id,
                    record.source.as_deref().unwrap_or("-"),
                    record.file_location
                );
            }
            println!("page {page} of {pages}");
        }
        Command::Facets { facet, filter } => match facet.as_str() {
            "checkpoints" => {
                for (id, name) in generations::checkpoint_facet(&db, &filter)? {
                    println!("{id:6}  {name}");
                }
            }
            "loras" => {
                for (id, name) in generations::lora_facet(&db, &filter)? {
                    println!("{id:6}  {name}");
                }
            }
            "nodes" => {
                for name in generations::node_facet(&db, &filter)? {
                    println!("{name}");
                }
            }
            other => anyhow::bail!("unknown facet: {other} (expected checkpoints, loras or nodes)"),
        },
    }

    Ok(())
}

fn show_generation(db: &Database, id: i64) -> Result<()> {
    let Some(record) = generations::fetch_generation(db, id)? else {
        eprintln!("no generation with id {id}");
        std::process::exit(1);
    };

    println!("generation {}", record.id);
    println!("  name:      {}", record.name);
    println!("  location:  {}", record.file_location);
    println!("  source:    {}", record.source.as_deref().unwrap_or("-"));
    if let (Some(width), Some(height)) = (record.width, record.height) {
        println!("  size:      {width}x{height}, {} bytes", record.size);
    } else {
        println!("  size:      {} bytes", record.size);
    }
    if let Some(created) = &record.date_created {
        println!("  created:   {created}");
    }

    let checkpoint_ids = generations::checkpoint_ids(db, id)?;
    if !checkpoint_ids.is_empty() {
        println!("  checkpoints: {checkpoint_ids:?}");
    }
    for (lora_id, model_strength, clip_strength) in generations::lora_links(db, id)? {
        println!("  lora {lora_id}: strength {model_strength}/{clip_strength}");
    }
    for sampler_id in generations::ksampler_ids(db, id)? {
        if let Some(sampler) = ksamplers::fetch_ksampler(db, sampler_id)? {
            let (positive, negative) = ksamplers::prompt_ids(db, sampler_id)?;
            println!(
                "  sampler {}: seed={} steps={} cfg={} {} / {} (+{} -{} prompts)",
                sampler.id,
                sampler.seed.map_or("-".into(), |s| s.to_string()),
                sampler.steps.map_or("-".into(), |s| s.to_string()),
                sampler.cfg.map_or("-".into(), |c| c.to_string()),
                sampler.sampler_name.as_deref().unwrap_or("-"),
                sampler.scheduler.as_deref().unwrap_or("-"),
                positive.len(),
                negative.len(),
            );
        }
    }

    Ok(())
}
