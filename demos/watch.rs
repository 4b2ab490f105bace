//! Discover streams and print their data.
//!
//! Demonstrates:
//! - Building a Session from the environment or `--address`
//! - Attaching a widget and running one search
//! - Auto-selecting every advertised stream
//! - Receiving data until Ctrl+C
//!
//! Usage:
//!   cargo run --example watch
//!   cargo run --example watch -- --address ws://localhost:3300/ws
//!   cargo run --example watch -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::Args;
use serde_json::Value;
use streamhub_router::{
    ConsumerId, Error, Result, Selection, Session, SessionConfig, StreamDescriptor, Widget,
};

// ============================================================================
// Widget
// ============================================================================

/// Prints every payload it receives.
#[derive(Default)]
struct Printer {
    received: AtomicUsize,
}

impl Widget for Printer {
    fn on_data(&self, payload: &Value) {
        let n = self.received.fetch_add(1, Ordering::Relaxed) + 1;
        println!("    [{n}] {payload}");
    }

    fn on_search_failed(&self, error: &Error) {
        println!("    ✗ Search failed: {error}");
    }
}

/// Subscribes to everything the server offers.
fn select_all(consumer_id: ConsumerId, streams: Vec<StreamDescriptor>, selection: Selection) {
    println!("[3] Catalog for {consumer_id}:");
    for stream in &streams {
        println!(
            "    - {} ({}, {} Hz, {} fields)",
            stream.id,
            stream.name,
            stream.frequency,
            stream.fields.len()
        );
    }

    match selection.confirm(streams) {
        Ok(added) => println!("    ✓ Subscribed to {added} stream(s)\n"),
        Err(e) => println!("    ✗ Selection failed: {e}\n"),
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== watch: discover and stream ===\n");

    // ========================================================================
    // Open Session
    // ========================================================================

    let mut builder = Session::builder()
        .config(SessionConfig::from_env()?)
        .selector(select_all);
    if let Some(address) = args.address {
        builder = builder.address(address);
    }
    let session = builder.build()?;

    println!("[1] Connecting to {}...", session.address());
    session.open().await?;
    println!("    ✓ Connected\n");

    // ========================================================================
    // Search
    // ========================================================================

    let printer = Arc::new(Printer::default());
    let consumer = session.router().attach(printer.clone());

    println!("[2] Searching...");
    session.router().initiate_search(consumer)?;

    common::wait_for_exit(args.no_wait).await;

    // ========================================================================
    // Teardown
    // ========================================================================

    session.router().detach(consumer);
    session.close();
    println!(
        "\n[4] Received {} payload(s)",
        printer.received.load(Ordering::Relaxed)
    );

    Ok(())
}
