//! Process sub-command surface: a closed set of four
//! modes sharing one binary via `clap`'s derive API.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "feedman", about = "Multi-tenant RSS/Atom aggregation data plane")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the thin health/metrics HTTP listener (no background jobs).
    Serve,
    /// Run the fetch scheduler, bookmark job, and retention job (no HTTP listener).
    Worker,
    /// Apply pending database migrations and exit.
    Migrate,
    /// Open the database pool, run `SELECT 1`, and exit 0/1.
    Healthcheck,
}
