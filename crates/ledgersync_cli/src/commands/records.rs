//! Local record reads.

use super::Store;

/// Runs the get command. Returns whether the record exists.
pub fn get(store: &Store, key: &str) -> Result<bool, Box<dyn std::error::Error>> {
    match store.local.get_value(key) {
        Some(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(true)
        }
        None => {
            eprintln!("No record for key {:?} in namespace {:?}", key, store.local.namespace());
            Ok(false)
        }
    }
}

/// Runs the list command.
pub fn list(
    store: &Store,
    prefix: &str,
    keys_only: bool,
    format: &str,
) -> Result<usize, Box<dyn std::error::Error>> {
    let entries = store.local.scan_entries(prefix);

    match format {
        "json" => {
            let map: serde_json::Map<_, _> = entries.iter().cloned().collect();
            println!("{}", serde_json::to_string_pretty(&map)?);
        }
        _ => {
            for (key, value) in &entries {
                if keys_only {
                    println!("{}", key);
                } else {
                    println!("{}  {}", key, value);
                }
            }
            println!("{} record(s)", entries.len());
        }
    }

    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::open_or_create;
    use serde_json::json;

    #[test]
    fn reads_only_the_selected_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let shop = open_or_create(&path, "shop").unwrap();
        shop.local.set("product:p1", &json!({"name": "Tea"}));
        shop.local.set("product:p2", &json!({"name": "Coffee"}));
        shop.local.set("customer:c1", &json!({"name": "Ann"}));

        let reopened = open_or_create(&path, "shop").unwrap();
        assert!(get(&reopened, "product:p1").unwrap());
        assert!(!get(&reopened, "product:p9").unwrap());
        assert_eq!(list(&reopened, "product:", false, "text").unwrap(), 2);

        let other = open_or_create(&path, "warehouse").unwrap();
        assert_eq!(list(&other, "", true, "json").unwrap(), 0);
    }
}
