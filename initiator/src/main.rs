use std::sync::Arc;

use clap::Parser;
use coordinator::CoordinatorRegistry;
use initiator::{
    cli::Commands,
    launcher::{self, Workload},
    Cli,
};
use log::error;
use model::CoordinationError;

fn main() {
    let cli = Cli::parse();

    let Commands::Start(args) = cli.command;
    if let Err(e) = args.init_log() {
        eprintln!("Failed to initialize log. Cause: {:?}", e);
        std::process::exit(1);
    }
    let (config, settings) = match (args.create_config(), args.create_settings()) {
        (Ok(config), Ok(settings)) => (config, settings),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!(
                "Failed to create configuration from the specified arguments. Cause: {:?}",
                e
            );
            std::process::exit(22);
        }
    };

    let registry = Arc::new(CoordinatorRegistry::new());
    let handle = Arc::clone(&registry);
    if let Err(e) = ctrlc::set_handler(move || {
        println!("Received shutdown signal");
        handle.cancel_all();
    }) {
        eprintln!("Failed to set Ctrl-C handler. Cause: {:?}", e);
        std::process::exit(1);
    }

    let workload = Workload {
        query_id: args.query_id(),
        rows: args.rows,
        index_granularity: args.index_granularity,
        value: args.value,
        replicas: args.replicas,
    };
    let query_id = workload.query_id.clone();
    match launcher::launch(config, settings, workload, registry) {
        Ok(outcome) => {
            println!(
                "Query {}: rows: {}, sum: {}, mark_segment_size: {}, segments: {}",
                outcome.query_id,
                outcome.result.rows,
                outcome.result.sum,
                outcome.mark_segment_size,
                outcome.segments_read
            );
            for (replica, segments) in &outcome.per_replica {
                println!("  replica {}: {} segments", replica, segments);
            }
        }
        Err(e) => {
            error!("Query[{}] Failed: {:?}", query_id, e);
            eprintln!("Query {} failed: {}", query_id, e);
            let timed_out = e
                .downcast_ref::<CoordinationError>()
                .map_or(false, CoordinationError::is_timeout);
            // Same exit code as coreutils `timeout`
            std::process::exit(if timed_out { 124 } else { 1 });
        }
    }
}
