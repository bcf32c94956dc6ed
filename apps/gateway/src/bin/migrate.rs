//! Applies the gateway's embedded diesel migrations.
//!
//! Usage:
//!   cargo run -p agora-gateway --bin agora-migrate
//!   cargo run -p agora-gateway --bin agora-migrate -- --test     # <db>_test
//!   cargo run -p agora-gateway --bin agora-migrate -- --revert   # undo the latest
//!
//! Reads DATABASE_URL from the environment (or .env via dotenvy).

use std::path::Path;
use std::process::ExitCode;

use diesel::pg::PgConnection;
use diesel::Connection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

fn main() -> ExitCode {
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    let Ok(mut database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL env var is required");
        return ExitCode::FAILURE;
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|arg| arg == "--test") {
        database_url = test_database_url(&database_url);
    }
    let revert = args.iter().any(|arg| arg == "--revert");

    let mut conn = match PgConnection::establish(&database_url) {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("failed to connect to database: {e}");
            return ExitCode::FAILURE;
        }
    };

    if revert {
        return match conn.revert_last_migration(MIGRATIONS) {
            Ok(version) => {
                println!("Reverted: {version}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("failed to revert migration: {e}");
                ExitCode::FAILURE
            }
        };
    }

    match conn.run_pending_migrations(MIGRATIONS) {
        Ok(applied) if applied.is_empty() => {
            println!("No pending migrations.");
            ExitCode::SUCCESS
        }
        Ok(applied) => {
            for version in &applied {
                println!("  Applied: {version}");
            }
            println!("{} migration(s) applied.", applied.len());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("failed to run migrations: {e}");
            ExitCode::FAILURE
        }
    }
}

/// `postgres://host/agora?x=y` → `postgres://host/agora_test?x=y`.
fn test_database_url(database_url: &str) -> String {
    let (base, query) = match database_url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (database_url, None),
    };
    let Some((prefix, db_name)) = base.rsplit_once('/') else {
        return database_url.to_string();
    };
    if db_name.is_empty() || db_name.ends_with("_test") {
        return database_url.to_string();
    }

    let mut url = format!("{prefix}/{db_name}_test");
    if let Some(query) = query {
        url.push('?');
        url.push_str(query);
    }
    url
}
