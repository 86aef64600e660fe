//! Load recorded watch output into Postgres.
//!
//! Reads the JSONL audit stream and the identity snapshot written by the
//! watch runner and inserts them into an `events` table and a
//! pgvector-backed `identities` table.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use pgvector::Vector;
use serde::de::DeserializeOwned;
use tokio_postgres::{Client, NoTls};
use vigil::{DetectionEvent, IdentityRecord, TableName};

#[derive(Parser, Debug)]
#[command(
    name = "vigil-pg-events",
    about = "Load watch events and identities into Postgres"
)]
struct PgEventsCli {
    /// Path to the JSONL event stream produced by the watch runner
    #[arg(long, env = "VIGIL_EVENT_LOG", default_value = "events.jsonl")]
    events: PathBuf,

    /// Path to the JSONL identity snapshot; skipped when the file is absent
    #[arg(long, env = "VIGIL_IDENTITY_LOG", default_value = "identities.jsonl")]
    identities: PathBuf,

    /// Postgres connection string (postgres://...)
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Target schema for both tables
    #[arg(long, env = "VIGIL_PG_SCHEMA", default_value = "public")]
    schema: String,

    /// Number of rows buffered per INSERT transaction
    #[arg(long, env = "VIGIL_PG_BATCH", default_value_t = 128)]
    batch_size: usize,

    /// Create the extension/tables automatically if missing
    #[arg(long, env = "VIGIL_PG_PREPARE", default_value_t = true)]
    prepare_tables: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = PgEventsCli::parse();
    let batch_size = cli.batch_size.max(1);

    let (client, connection) = tokio_postgres::connect(&cli.database_url, NoTls)
        .await
        .with_context(|| format!("failed to connect to Postgres at {}", cli.database_url))?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            eprintln!("postgres connection error: {err}");
        }
    });
    let mut client = client;

    let events_table = TableName::new(cli.schema.clone(), "events")?;
    let identities_table = TableName::new(cli.schema.clone(), "identities")?;

    let identity_records: Vec<IdentityRecord> = if cli.identities.exists() {
        read_jsonl(&cli.identities)?
    } else {
        println!("identity snapshot {:?} not found; skipping", cli.identities);
        Vec::new()
    };

    if cli.prepare_tables {
        ensure_vector_extension(&mut client).await?;
        let dims = identity_records
            .iter()
            .map(|record| record.embedding.len())
            .find(|len| *len > 0)
            .unwrap_or(128);
        ensure_identities_table(&mut client, &identities_table, dims).await?;
        ensure_events_table(&mut client, &events_table).await?;
    }

    let inserted_identities =
        insert_identities(&mut client, &identities_table, &identity_records, batch_size).await?;
    let inserted_events =
        insert_events(&mut client, &events_table, &cli.events, batch_size).await?;

    println!(
        "Inserted {inserted_identities} identit{} and {inserted_events} event{}.",
        if inserted_identities == 1 { "y" } else { "ies" },
        if inserted_events == 1 { "" } else { "s" }
    );
    Ok(())
}

async fn ensure_vector_extension(client: &mut Client) -> Result<()> {
    client
        .execute("CREATE EXTENSION IF NOT EXISTS vector", &[])
        .await
        .context("failed to ensure pgvector extension")?;
    Ok(())
}

async fn ensure_identities_table(
    client: &mut Client,
    table: &TableName,
    dims: usize,
) -> Result<()> {
    anyhow::ensure!(dims > 0, "embedding dimension must be positive");
    let ddl = format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id BIGINT PRIMARY KEY,
            display_name TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            embedding_count BIGINT NOT NULL,
            embedding VECTOR({dims})
        )",
        table.qualified()
    );
    client
        .execute(&ddl, &[])
        .await
        .context("failed to create identities table")?;
    Ok(())
}

async fn ensure_events_table(client: &mut Client, table: &TableName) -> Result<()> {
    let ddl = format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id BIGSERIAL PRIMARY KEY,
            camera TEXT NOT NULL,
            timestamp_epoch_ms BIGINT NOT NULL,
            kind TEXT NOT NULL,
            identity_id BIGINT,
            confidence REAL,
            bbox_x BIGINT,
            bbox_y BIGINT,
            bbox_width BIGINT,
            bbox_height BIGINT,
            frame_checksum BIGINT NOT NULL
        )",
        table.qualified()
    );
    client
        .execute(&ddl, &[])
        .await
        .context("failed to create events table")?;
    Ok(())
}

async fn insert_identities(
    client: &mut Client,
    table: &TableName,
    records: &[IdentityRecord],
    batch_size: usize,
) -> Result<usize> {
    let sql = format!(
        "INSERT INTO {} (id, display_name, created_at, embedding_count, embedding) \
            VALUES ($1, $2, $3, $4, $5) \
            ON CONFLICT (id) DO UPDATE SET \
                display_name = EXCLUDED.display_name, \
                embedding_count = EXCLUDED.embedding_count, \
                embedding = EXCLUDED.embedding",
        table.qualified()
    );

    let mut total = 0usize;
    for chunk in records.chunks(batch_size) {
        let transaction = client.transaction().await?;
        let statement = transaction.prepare(&sql).await?;
        for record in chunk {
            let id = as_i64(record.id.as_u64(), "identity id")?;
            let embedding_count = i64::from(record.embedding_count);
            let embedding = (!record.embedding.is_empty())
                .then(|| Vector::from(record.embedding.clone()));
            transaction
                .execute(
                    &statement,
                    &[
                        &id,
                        &record.display_name,
                        &record.created_at,
                        &embedding_count,
                        &embedding,
                    ],
                )
                .await
                .with_context(|| format!("failed to insert identity {}", record.id))?;
        }
        transaction.commit().await?;
        total += chunk.len();
    }
    Ok(total)
}

async fn insert_events(
    client: &mut Client,
    table: &TableName,
    path: &Path,
    batch_size: usize,
) -> Result<usize> {
    let file =
        File::open(path).with_context(|| format!("failed to open event log {path:?}"))?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines().enumerate();

    let mut batch: Vec<DetectionEvent> = Vec::with_capacity(batch_size);
    let mut total = 0usize;
    while let Some(event) = next_record::<DetectionEvent, _>(&mut lines)? {
        batch.push(event);
        if batch.len() >= batch_size {
            insert_event_batch(client, table, &batch).await?;
            total += batch.len();
            render_progress(total)?;
            batch.clear();
        }
    }

    if !batch.is_empty() {
        insert_event_batch(client, table, &batch).await?;
        total += batch.len();
        render_progress(total)?;
    }

    if total > 0 {
        println!();
    }
    Ok(total)
}

async fn insert_event_batch(
    client: &mut Client,
    table: &TableName,
    events: &[DetectionEvent],
) -> Result<()> {
    let sql = format!(
        "INSERT INTO {} \
            (camera, timestamp_epoch_ms, kind, identity_id, confidence, \
             bbox_x, bbox_y, bbox_width, bbox_height, frame_checksum) \
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        table.qualified()
    );
    let transaction = client.transaction().await?;
    let statement = transaction.prepare(&sql).await?;
    for event in events {
        let timestamp = as_i64(event.timestamp_epoch_ms, "timestamp_epoch_ms")?;
        let identity = event
            .identity
            .map(|id| as_i64(id.as_u64(), "identity id"))
            .transpose()?;
        let checksum = i64::from(event.frame_checksum);
        let bbox = event.bounding_box;
        let bbox_x = bbox.map(|b| i64::from(b.x));
        let bbox_y = bbox.map(|b| i64::from(b.y));
        let bbox_width = bbox.map(|b| i64::from(b.width));
        let bbox_height = bbox.map(|b| i64::from(b.height));
        transaction
            .execute(
                &statement,
                &[
                    &event.camera.as_str(),
                    &timestamp,
                    &event.kind.to_string(),
                    &identity,
                    &event.confidence,
                    &bbox_x,
                    &bbox_y,
                    &bbox_width,
                    &bbox_height,
                    &checksum,
                ],
            )
            .await
            .with_context(|| {
                format!("failed to insert {} event from {}", event.kind, event.camera)
            })?;
    }
    transaction.commit().await?;
    Ok(())
}

fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("failed to open {path:?}"))?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines().enumerate();
    let mut records = Vec::new();
    while let Some(record) = next_record::<T, _>(&mut lines)? {
        records.push(record);
    }
    Ok(records)
}

fn next_record<T, I>(lines: &mut I) -> Result<Option<T>>
where
    T: DeserializeOwned,
    I: Iterator<Item = (usize, std::io::Result<String>)>,
{
    for (line_no, line) in lines.by_ref() {
        let line = line.with_context(|| format!("failed to read line {}", line_no + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: T = serde_json::from_str(&line)
            .with_context(|| format!("invalid record at line {}", line_no + 1))?;
        return Ok(Some(record));
    }
    Ok(None)
}

fn render_progress(inserted: usize) -> Result<()> {
    let plural = if inserted == 1 { "" } else { "s" };
    print!("\rInserted {} event{}...", inserted, plural);
    io::stdout().flush()?;
    Ok(())
}

fn as_i64<T>(value: T, field: &str) -> Result<i64>
where
    i64: TryFrom<T>,
    T: Copy + std::fmt::Display,
{
    i64::try_from(value).map_err(|_| anyhow!("{} value {} exceeds i64 range", field, value))
}
