//! Queue listing and offline enqueue.

use super::Store;
use ledgersync_engine::{EntityKind, QueuedOperation, Verb};
use serde::Serialize;
use serde_json::Value;

/// A pending operation as shown by the CLI.
#[derive(Debug, Serialize)]
pub struct QueueEntry {
    /// Position in the queue, starting at 0.
    pub position: usize,
    /// The operation.
    #[serde(flatten)]
    pub operation: QueuedOperation,
    /// Failed attempts so far.
    pub attempts: u32,
    /// Earliest time of the next attempt, if backing off.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<String>,
    /// Most recent failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Lists pending operations in queue order, joined with their retry state.
pub fn entries(store: &Store, limit: Option<usize>) -> Vec<QueueEntry> {
    let retry = store.queue.retry_states();
    store
        .queue
        .snapshot()
        .into_iter()
        .enumerate()
        .take(limit.unwrap_or(usize::MAX))
        .map(|(position, operation)| {
            let state = retry.get(&operation.id);
            QueueEntry {
                position,
                attempts: state.map_or(0, |s| s.attempts),
                next_attempt_at: state.map(|s| s.next_attempt_at.to_rfc3339()),
                last_error: state.map(|s| s.last_error.clone()),
                operation,
            }
        })
        .collect()
}

/// Runs the queue command.
pub fn run(store: &Store, limit: Option<usize>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let entries = entries(store, limit);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        _ => print_text_output(&entries),
    }

    Ok(())
}

fn print_text_output(entries: &[QueueEntry]) {
    if entries.is_empty() {
        println!("Queue is empty");
        return;
    }

    println!(
        "{:>4}  {:<36}  {:<6}  {:<11}  {:<25}  {}",
        "POS", "ID", "VERB", "KIND", "ENQUEUED", "ATTEMPTS"
    );
    for entry in entries {
        let op = &entry.operation;
        println!(
            "{:>4}  {:<36}  {:<6}  {:<11}  {:<25}  {}",
            entry.position,
            op.id.to_string(),
            op.verb.as_str(),
            op.entity_kind.as_str(),
            op.enqueued_at.to_rfc3339(),
            entry.attempts
        );
        if let Some(error) = &entry.last_error {
            println!("      last error: {}", error);
        }
    }
}

/// Appends an operation to the queue without contacting the backend.
pub fn enqueue(
    store: &Store,
    kind: &str,
    verb: &str,
    payload: &str,
) -> Result<QueuedOperation, Box<dyn std::error::Error>> {
    let kind: EntityKind = kind.parse()?;
    let verb: Verb = verb.parse()?;
    let payload: Value = serde_json::from_str(payload)?;

    let op = store.queue.enqueue(verb, kind, payload)?;
    println!("Queued {} {} as {}", verb, kind, op.id);
    Ok(op)
}
