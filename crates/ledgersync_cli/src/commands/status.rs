//! Status command implementation.

use super::Store;
use serde::Serialize;

/// Summary of a store's sync backlog.
#[derive(Debug, Serialize)]
pub struct StatusResult {
    /// Operations awaiting sync.
    pub pending: usize,
    /// Pending operations that have failed at least once.
    pub retrying: usize,
    /// Operations no longer retried automatically.
    pub dead_letters: usize,
    /// Enqueue time of the oldest pending operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_pending: Option<String>,
}

/// Collects the status of `store`.
pub fn collect(store: &Store) -> StatusResult {
    let pending = store.queue.snapshot();
    StatusResult {
        pending: pending.len(),
        retrying: store.queue.retry_states().len(),
        dead_letters: store.queue.dead_letters().len(),
        oldest_pending: pending.first().map(|op| op.enqueued_at.to_rfc3339()),
    }
}

/// Runs the status command.
pub fn run(store: &Store, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = collect(store);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => {
            println!("Pending:      {}", result.pending);
            println!("Retrying:     {}", result.retrying);
            println!("Dead letters: {}", result.dead_letters);
            if let Some(oldest) = &result.oldest_pending {
                println!("Oldest:       {}", oldest);
            }
        }
    }

    Ok(())
}
