//! Dead-letter inspection and repair.

use super::Store;

/// Runs the dead-letters command.
pub fn run(store: &Store, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let letters = store.queue.dead_letters();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&letters)?),
        _ => {
            if letters.is_empty() {
                println!("No dead letters");
                return Ok(());
            }
            for letter in &letters {
                let op = &letter.operation;
                println!(
                    "{}  {} {}  attempts={}  at={}",
                    op.id,
                    op.verb,
                    op.entity_kind,
                    letter.attempts,
                    letter.dead_lettered_at.to_rfc3339()
                );
                println!("    reason:  {}", letter.reason);
                println!("    payload: {}", op.payload);
            }
        }
    }

    Ok(())
}

/// Moves every dead letter back to the end of the queue.
pub fn requeue(store: &Store) -> Result<usize, Box<dyn std::error::Error>> {
    let count = store.queue.requeue_dead_letters()?;
    println!("Requeued {} operation(s)", count);
    Ok(count)
}

/// Drops every dead letter.
pub fn purge(store: &Store, dry_run: bool) -> Result<usize, Box<dyn std::error::Error>> {
    if dry_run {
        let count = store.queue.dead_letters().len();
        println!("Would discard {} dead letter(s)", count);
        return Ok(count);
    }

    let count = store.queue.discard_dead_letters()?;
    tracing::info!(count, "dead letters discarded");
    println!("Discarded {} dead letter(s)", count);
    Ok(count)
}
