use anyhow::{bail, Context};
use cairn_sdk::{Database, DatabaseConfig, Document, DocumentId, FindOptions, Version};
use colored::Colorize;
use serde_json::Value;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let db = open(&cli)?;
    match cli.command {
        Command::Put(args) => cmd_put(&db, args),
        Command::Get(args) => cmd_get(&db, args),
        Command::Log(args) => cmd_log(&db, args),
        Command::Verify(args) => cmd_verify(&db, args),
        Command::Find(args) => cmd_find(&db, args),
    }
}

fn open(cli: &Cli) -> anyhow::Result<Database> {
    let mut config = match &cli.config {
        Some(path) => DatabaseConfig::load(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => DatabaseConfig::file(&cli.root),
    };
    config.root = cli.root.clone();
    tracing::debug!(root = %config.root.display(), "opening database");
    Database::open(config).with_context(|| format!("opening database at {}", cli.root.display()))
}

fn parse_id(s: &str) -> anyhow::Result<DocumentId> {
    DocumentId::parse(s).with_context(|| format!("invalid document id {s:?}"))
}

fn parse_json(what: &str, s: &str) -> anyhow::Result<Value> {
    serde_json::from_str(s).with_context(|| format!("{what} is not valid JSON: {s}"))
}

fn cmd_put(db: &Database, args: PutArgs) -> anyhow::Result<()> {
    let Value::Object(slots) = parse_json("slots", &args.slots)? else {
        bail!("slots must be a JSON object");
    };

    let mut document = match args.id.as_deref().map(parse_id).transpose()? {
        Some(id) => db
            .get(&id, None)?
            .unwrap_or_else(|| Document::with_id(id)),
        None => Document::new(),
    };
    for (name, value) in slots {
        document.set(name, value);
    }
    if document.version().is_none() {
        bail!("nothing to save: no slots given");
    }

    let saved = db.save(&mut document)?;
    let genesis = saved.previous_version().is_none();
    println!(
        "{} {} {}",
        "✓".green().bold(),
        saved.id().to_string().cyan(),
        if genesis { "created".green() } else { "updated".yellow() }
    );
    if let Some(version) = saved.version() {
        println!("  Version: {}", version.to_hex().dimmed());
    }
    Ok(())
}

fn cmd_get(db: &Database, args: GetArgs) -> anyhow::Result<()> {
    let id = parse_id(&args.id)?;
    let version = args
        .version
        .as_deref()
        .map(Version::from_hex)
        .transpose()
        .context("invalid version")?;
    let document = db.fetch(&id, version.as_ref())?;
    let pretty = serde_json::to_string_pretty(&Value::Object(
        document.slots().clone().into_iter().collect(),
    ))?;
    println!("{pretty}");
    Ok(())
}

fn cmd_log(db: &Database, args: LogArgs) -> anyhow::Result<()> {
    let id = parse_id(&args.id)?;
    let history = db.history(&id)?;
    let total = history.len();
    for (i, document) in history
        .iter()
        .take(args.limit.unwrap_or(usize::MAX))
        .enumerate()
    {
        let version = document
            .version()
            .map(|v| v.short_hex())
            .unwrap_or_default();
        let label = if i == 0 { " (head)".green().to_string() } else { String::new() };
        println!("{} {}{}", format!("v{}", total - i).yellow().bold(), version.dimmed(), label);
        for name in document.slot_names().filter(|n| !cairn_sdk::is_reserved(n)) {
            if let Some(value) = document.get(name) {
                println!("  {} = {}", name.bold(), value);
            }
        }
    }
    Ok(())
}

fn cmd_verify(db: &Database, args: VerifyArgs) -> anyhow::Result<()> {
    let id = parse_id(&args.id)?;
    match db.verify(&id) {
        Ok(length) => {
            println!("{} Version chain verified", "✓".green().bold());
            println!("  Document: {}", id.to_string().cyan());
            println!("  Versions: {}", length.to_string().bold());
            Ok(())
        }
        Err(e) => {
            println!("{} Version chain broken", "✗".red().bold());
            Err(e.into())
        }
    }
}

fn cmd_find(db: &Database, args: FindArgs) -> anyhow::Result<()> {
    let mut options = FindOptions::new()
        .offset(args.offset)
        .reverse(args.reverse)
        .with_keys(true);
    if let Some(key) = &args.key {
        options = options.key(parse_json("key", key)?);
    }
    if let Some(start) = &args.start {
        options = options.start_key(parse_json("start", start)?);
    }
    if let Some(end) = &args.end {
        options = options.end_key(parse_json("end", end)?);
    }
    if let Some(limit) = args.limit {
        options = options.limit(limit);
    }

    let rows = db.find_slots(&options)?;
    if rows.is_empty() {
        println!("No matches.");
    }
    for row in rows {
        let key = row.key.map(|k| k.to_string()).unwrap_or_default();
        let id = row
            .value
            .as_document()
            .map(|doc| doc.id().short_id())
            .unwrap_or_default();
        println!("{}  {}", id.cyan(), key);
    }
    Ok(())
}
