//! CUSTOS Audit Pipeline — Demo CLI
//!
//! Runs one or all of the three demo scenarios.  Each scenario wires real
//! CUSTOS components together: SHA-256 chain linker, Ed25519 signer,
//! bounded ingestion pipeline, durable store, and the verifier.
//!
//! Usage:
//!   cargo run -p demo -- run-all
//!   cargo run -p demo -- pipeline
//!   cargo run -p demo -- tamper
//!   cargo run -p demo -- sharded

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use custos_contracts::{
    AuditEvent, AuditEventType, AuditOutcome, ClientInfo, CustosResult,
};
use custos_core::{PipelineConfig, VerifierConfig};
use custos_crypto::{Ed25519Signer, Sha256ChainLinker};
use custos_ingest::{AtomicMetrics, AuditPipeline, NoMemoryGauge};
use custos_store::{InMemoryAuditStore, JsonlAuditStore};
use custos_verify::ChainVerifier;

// ── CLI definition ────────────────────────────────────────────────────────────

/// CUSTOS — tamper-evident audit pipeline demo.
///
/// Each subcommand runs one or all of the three scenarios, demonstrating
/// concurrent hash-chained ingestion, tamper detection, and parallel
/// verification.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "CUSTOS audit pipeline demo",
    long_about = "Runs CUSTOS demo scenarios showing concurrent hash-chained ingestion,\n\
                  batched durable flushing, tamper detection, and sharded verification."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all three scenarios in sequence.
    RunAll,
    /// Scenario 1: concurrent producers through the full pipeline to disk.
    Pipeline,
    /// Scenario 2: tamper with a persisted entry, catch the exact index.
    Tamper,
    /// Scenario 3: sharded verification timing across shard counts.
    Sharded,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Initialize structured logging.  Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    print_banner();

    let result = match cli.command {
        Command::RunAll => run_all(),
        Command::Pipeline => run_pipeline(),
        Command::Tamper => run_tamper(),
        Command::Sharded => run_sharded(),
    };

    match result {
        Ok(()) => {
            println!("All selected scenarios completed successfully.");
        }
        Err(e) => {
            eprintln!("Demo error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run_all() -> CustosResult<()> {
    run_pipeline()?;
    run_tamper()?;
    run_sharded()?;
    Ok(())
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("CUSTOS — Tamper-Evident Audit Pipeline");
    println!("======================================");
    println!();
    println!("Acceptance path per event:");
    println!("  [1] Atomically advance the chain tip (prev_hash / entry_hash assigned once)");
    println!("  [2] Sign canonical content + entry_hash with the active Ed25519 key");
    println!("  [3] Enqueue under backpressure (high-risk events never drop)");
    println!("  [4] Flush scheduler drains ordered batches to the durable store");
    println!("  [5] Verifier replays persisted entries and reports every divergence");
    println!();
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn make_event(actor: &str, event_type: AuditEventType, resource: &str) -> AuditEvent {
    let mut details = BTreeMap::new();
    details.insert("demo".to_string(), serde_json::json!(true));
    AuditEvent::new(
        actor,
        event_type,
        resource,
        AuditOutcome::Success,
        ClientInfo {
            ip: Some("127.0.0.1".to_string()),
            user_agent: Some("custos-demo".to_string()),
            session: None,
        },
        details,
    )
}

/// Re-order persisted entries into chain order by following prev -> entry
/// links from genesis.  Storage preserves batch order, but concurrent
/// producers can interleave between tip advance and enqueue, so replay
/// tools order by linkage before verifying.
fn chain_order(entries: Vec<AuditEvent>) -> Vec<AuditEvent> {
    let mut by_prev: HashMap<String, AuditEvent> = entries
        .into_iter()
        .map(|e| (e.prev_hash.clone(), e))
        .collect();
    let mut ordered = Vec::with_capacity(by_prev.len());
    let mut cursor = AuditEvent::GENESIS_HASH.to_string();
    while let Some(event) = by_prev.remove(&cursor) {
        cursor.clone_from(&event.entry_hash);
        ordered.push(event);
    }
    // Anything left did not link from genesis; keep it so verification
    // still reports it.
    ordered.extend(by_prev.into_values());
    ordered
}

/// Build a valid chain in memory (single producer, deterministic order).
fn build_chain(signer: &Arc<Ed25519Signer>, store: &Arc<InMemoryAuditStore>, count: usize) -> CustosResult<Vec<AuditEvent>> {
    let pipeline = AuditPipeline::new(
        PipelineConfig::default(),
        Arc::new(Sha256ChainLinker::new()),
        signer.clone(),
        store.clone(),
        Arc::new(AtomicMetrics::new()),
        Arc::new(NoMemoryGauge),
    )?;
    for i in 0..count {
        pipeline.record(make_event(
            &format!("user-{}", i % 7),
            AuditEventType::ApiAccess,
            &format!("/api/records/{i}"),
        ))?;
    }
    pipeline.shutdown();
    Ok(store.export())
}

// ── Scenario 1: full pipeline ─────────────────────────────────────────────────

fn run_pipeline() -> CustosResult<()> {
    println!("── Scenario 1: concurrent producers to durable storage ──");

    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 50;

    let path = std::env::temp_dir().join(format!("custos-demo-{}.jsonl", std::process::id()));
    let _ = std::fs::remove_file(&path);

    let store = Arc::new(JsonlAuditStore::open(&path)?);
    let signer = Arc::new(Ed25519Signer::new());
    let metrics = Arc::new(AtomicMetrics::new());
    let pipeline = Arc::new(AuditPipeline::new(
        PipelineConfig::default(),
        Arc::new(Sha256ChainLinker::new()),
        signer.clone(),
        store.clone(),
        metrics.clone(),
        Arc::new(NoMemoryGauge),
    )?);

    let workers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || -> CustosResult<()> {
                for i in 0..PER_PRODUCER {
                    let event_type = if i % 10 == 0 {
                        AuditEventType::Delete
                    } else {
                        AuditEventType::ApiAccess
                    };
                    pipeline.record(make_event(
                        &format!("producer-{p}"),
                        event_type,
                        &format!("/api/records/{p}/{i}"),
                    ))?;
                }
                Ok(())
            })
        })
        .collect();
    for worker in workers {
        match worker.join() {
            Ok(result) => result?,
            Err(_) => {
                return Err(custos_contracts::CustosError::ConfigError {
                    reason: "producer thread panicked".to_string(),
                })
            }
        }
    }

    println!("  status before shutdown: {}", pipeline.get_queue_status());
    pipeline.shutdown();
    println!("  {}", metrics.summary());

    let persisted = chain_order(store.load()?);
    println!("  persisted entries: {}", persisted.len());

    let verifier = ChainVerifier::new(
        VerifierConfig::default(),
        Arc::new(Sha256ChainLinker::new()),
        signer,
    );
    let report = verifier.verify_chain(&persisted, AuditEvent::GENESIS_HASH);
    println!(
        "  sequential verify: valid={}, ok={}, failed={}, {}ms",
        report.valid, report.success_count, report.error_count, report.elapsed_ms
    );
    let sharded = verifier.verify_sharded(&persisted, 4)?;
    println!(
        "  sharded verify (k=4): valid={}, ok={}, failed={}",
        sharded.valid, sharded.success_count, sharded.error_count
    );
    verifier.shutdown();

    let _ = std::fs::remove_file(&path);
    println!();
    Ok(())
}

// ── Scenario 2: tamper detection ──────────────────────────────────────────────

fn run_tamper() -> CustosResult<()> {
    println!("── Scenario 2: tamper detection ──");

    let signer = Arc::new(Ed25519Signer::new());
    let store = Arc::new(InMemoryAuditStore::new());
    let mut entries = build_chain(&signer, &store, 12)?;

    let verifier = ChainVerifier::new(
        VerifierConfig::default(),
        Arc::new(Sha256ChainLinker::new()),
        signer,
    );

    let clean = verifier.verify_chain(&entries, AuditEvent::GENESIS_HASH);
    println!(
        "  untampered chain: valid={}, ok={}/{}",
        clean.valid, clean.success_count, clean.total_entries
    );

    // A byte of persisted content changes after the fact.
    entries[5].actor = "intruder".to_string();

    let report = verifier.verify_chain(&entries, AuditEvent::GENESIS_HASH);
    println!(
        "  tampered chain:  valid={}, failures={}",
        report.valid, report.error_count
    );
    for failure in &report.failures {
        println!(
            "    entry {} ({}): {}",
            failure.entry_index.unwrap_or_default(),
            failure.entry_id.as_deref().unwrap_or("?"),
            failure.error.as_deref().unwrap_or("")
        );
    }
    verifier.shutdown();
    println!();
    Ok(())
}

// ── Scenario 3: sharded verification ──────────────────────────────────────────

fn run_sharded() -> CustosResult<()> {
    println!("── Scenario 3: sharded verification throughput ──");

    let signer = Arc::new(Ed25519Signer::new());
    let store = Arc::new(InMemoryAuditStore::new());
    let entries = build_chain(&signer, &store, 2_000)?;

    let verifier = ChainVerifier::new(
        VerifierConfig::default(),
        Arc::new(Sha256ChainLinker::new()),
        signer,
    );

    for shard_count in [1usize, 2, 4, 8] {
        let start = Instant::now();
        let report = verifier.verify_sharded(&entries, shard_count)?;
        println!(
            "  k={:>2}: valid={}, ok={}, wall={}ms (sum of shard time {}ms)",
            shard_count,
            report.valid,
            report.success_count,
            start.elapsed().as_millis(),
            report.elapsed_ms
        );
    }
    verifier.shutdown();
    println!();
    Ok(())
}
