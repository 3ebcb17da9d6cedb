//! Ledgerline operator CLI.
//!
//! ```text
//! ledgerline [--config <path>] pending <entity>
//! ledgerline status <label>
//! ledgerline [--config <path>] cache-stats
//! ```

use std::sync::Arc;

use ledgerline_client::config::ClientConfig;
use ledgerline_client::error::ClientError;
use ledgerline_client::telemetry::init_tracing;
use ledgerline_client::{DataContext, LogRedirect};
use ledgerline_core::{
    to_backend_status, Association, DynamicRecord, Employee, Entity, EntityType, PayrollRecord,
};
use serde_json::json;

const USAGE: &str = "ledgerline [--config <path>] <pending <entity> | status <label> | cache-stats>";

#[derive(Debug)]
enum Command {
    Pending(EntityType),
    Status(String),
    CacheStats,
}

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    let command = parse_command(std::env::args().skip(1).collect())?;

    // Status normalization is pure and needs no configuration.
    if let Command::Status(label) = &command {
        println!("{}", to_backend_status(Some(label.as_str())));
        return Ok(());
    }

    let config = ClientConfig::load()?;
    init_tracing(&config.logging)?;
    let redirect = Arc::new(LogRedirect::new(config.session.login_url.clone()));
    let ctx = DataContext::from_config(&config, redirect)?;

    match run(command, &ctx).await {
        Err(ClientError::Api(error)) => {
            tracing::debug!(code = %error.code, message = %error.message, "Command failed");
            let shown = config.display_error(&error);
            eprintln!("{}: {}", shown.kind, shown.message);
            std::process::exit(1);
        }
        other => other,
    }
}

async fn run(command: Command, ctx: &Arc<DataContext>) -> Result<(), ClientError> {
    match command {
        Command::Pending(entity) => match entity {
            EntityType::Association => print_pending::<Association>(ctx).await,
            EntityType::Employee => print_pending::<Employee>(ctx).await,
            EntityType::PayrollRecord => print_pending::<PayrollRecord>(ctx).await,
            EntityType::Document => print_pending::<DynamicRecord>(ctx).await,
        },
        Command::CacheStats => {
            let stats = ctx.cache().stats();
            let diagnostics = ctx.diagnostics().snapshot();
            let report = json!({
                "entries": stats.entry_count,
                "hits": stats.hits,
                "misses": stats.misses,
                "expirations": stats.expirations,
                "hit_rate": stats.hit_rate(),
                "corrupt_documents": diagnostics.corrupt_documents,
                "undecodable_records": diagnostics.undecodable_records,
                "write_failures": diagnostics.write_failures,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Status(_) => Ok(()),
    }
}

async fn print_pending<T: Entity>(ctx: &Arc<DataContext>) -> Result<(), ClientError> {
    let repository = ctx.repository::<T>()?;
    let pending = repository.local_only().await?;
    tracing::info!(entity = %T::entity_type(), count = pending.len(), "Local-only records");
    println!("{}", serde_json::to_string_pretty(&pending)?);
    Ok(())
}

fn parse_command(args: Vec<String>) -> Result<Command, ClientError> {
    let mut positional = Vec::new();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            // Consumed again by ClientConfig::load.
            args.next();
        } else {
            positional.push(arg);
        }
    }

    match positional.as_slice() {
        [cmd, entity] if cmd == "pending" => entity
            .parse::<EntityType>()
            .map(Command::Pending)
            .map_err(|e| ClientError::Usage(e.to_string())),
        [cmd, label] if cmd == "status" => Ok(Command::Status(label.clone())),
        [cmd] if cmd == "cache-stats" => Ok(Command::CacheStats),
        _ => Err(ClientError::Usage(USAGE.to_string())),
    }
}
