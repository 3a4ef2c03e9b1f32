use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::Path;

use listing_sync::{
    parse_feed, AgentFilter, BatchDriver, BatchRecord, Config, FileArchiver, ListingStore,
    Publisher, ReconciliationEngine, CURRENT, SOLD,
};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    let config_path = if args.len() > 1 {
        args[1].as_str()
    } else {
        "config.toml"
    };

    let config = Config::load(Path::new(config_path))?;
    run_batch(&config)
}

fn run_batch(config: &Config) -> Result<()> {
    println!("🏠 Listing Sync v{}", listing_sync::VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Collect feed documents (lexicographic order = processing order)
    let mut sources = list_feed_documents(&config.feed_dir)?;
    if sources.is_empty() {
        println!("\n📭 No feed documents in {}", config.feed_dir.display());
        return Ok(());
    }
    sources.sort();
    println!("\n📂 Found {} feed document(s)", sources.len());

    // 2. Parse every document into batch records
    let mut records = Vec::new();
    for source in &sources {
        let path = config.feed_dir.join(source);
        let xml = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read feed document {}", path.display()))?;

        match parse_feed(&xml) {
            Ok(raws) => {
                records.extend(raws.into_iter().map(|raw| BatchRecord {
                    source_id: source.clone(),
                    raw,
                }));
            }
            Err(err) => {
                // The document stays in the feed directory for the next run.
                eprintln!("⚠️  Skipping {}: {}", source, err);
            }
        }
    }

    // 3. Load collections
    let mut store = ListingStore::open(&config.db_path)?;
    let mut current = store.load(CURRENT)?;
    let mut sold = store.load(SOLD)?;
    println!(
        "✓ Loaded {} current / {} sold listings",
        current.len(),
        sold.len()
    );

    // 4. Reconcile
    let archiver = FileArchiver::new(&config.feed_dir, &config.history_dir);
    let driver = BatchDriver::new(
        ReconciliationEngine::with_sold_limit(config.sold_limit),
        AgentFilter::new(&config.agent_name),
        config.error_policy,
        &archiver,
    );
    let run_result = driver.run(records, &mut current, &mut sold);

    // 5. Persist. Partial progress stays durable even when the batch
    // aborted, since its sources may already be archived.
    store.save(CURRENT, &current)?;
    store.save(SOLD, &sold)?;
    let report = run_result?;

    println!("\n⚖️  {}", report.summary());
    for failure in &report.failures {
        eprintln!(
            "⚠️  {} record {}: {}",
            failure.source_id, failure.index, failure.error
        );
    }
    println!("✓ Collections saved to {}", config.db_path.display());

    // 6. Publish
    let publisher = Publisher::new(&config.git_path, config.build_hook.clone());
    publisher.publish(&current, &sold)?;
    println!(
        "\n🚀 Published {} current / {} sold listings",
        current.len(),
        sold.len()
    );

    Ok(())
}

fn list_feed_documents(feed_dir: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(feed_dir)
        .with_context(|| format!("Failed to read feed directory {}", feed_dir.display()))?;

    let mut sources = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.to_lowercase().ends_with(".xml") {
            sources.push(name);
        }
    }
    Ok(sources)
}
