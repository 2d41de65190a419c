use anyhow::Result;
use arrow_array::{RecordBatch, RecordBatchIterator};
use arrow_schema::{ArrowError, Schema};
use lancedb::{connect, Connection};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Connects to the store directory and makes sure `table` exists, creating
/// it empty with `schema` on first use.
pub async fn connect_with_table(dir: &Path, table: &str, schema: Arc<Schema>) -> Result<Connection> {
	let conn = connect(&dir.to_string_lossy()).execute().await?;
	let names = conn.table_names().execute().await?;
	if !names.iter().any(|n| n == table) {
		debug!(table, "creating empty chunk table");
		let empty = RecordBatchIterator::new(std::iter::empty::<Result<RecordBatch, ArrowError>>(), schema.clone());
		conn.create_table(table, Box::new(empty)).execute().await?;
	}
	Ok(conn)
}

/// Removes the on-disk store so the next open starts empty.
pub fn reset_store(dir: &Path) -> Result<()> {
	if dir.exists() {
		info!(dir = %dir.display(), "removing existing vector store");
		std::fs::remove_dir_all(dir)?;
	}
	Ok(())
}
