//! Identities command implementation.
//!
//! Inspects and edits the reconnect identifiers a `watch` session will
//! restore on its next start.

use anyhow::{Context, Result};

use relink_store::Store;
use relink_types::DeviceId;

use crate::cli::{IdentitiesAction, OutputFormat};
use crate::format::{format_identities_json, format_identities_text, format_success};

/// Run an identities action against `store` and return what to print.
pub fn cmd_identities(store: &Store, action: IdentitiesAction, no_color: bool) -> Result<String> {
    match action {
        IdentitiesAction::List { format } => {
            let ids = store.identities()?;
            match format {
                OutputFormat::Text => Ok(format_identities_text(&ids)),
                OutputFormat::Json => format_identities_json(&ids),
            }
        }
        IdentitiesAction::Add { id } => {
            let id = parse_id(&id)?;
            let message = if store.remember(&id)? {
                format!("Remembered {}", id)
            } else {
                format!("{} is already remembered", id)
            };
            Ok(format_success(&message, no_color) + "\n")
        }
        IdentitiesAction::Remove { id } => {
            let id = parse_id(&id)?;
            let message = if store.forget(&id)? {
                format!("Forgot {}", id)
            } else {
                format!("{} was not remembered", id)
            };
            Ok(format_success(&message, no_color) + "\n")
        }
        IdentitiesAction::Clear => {
            let removed = store.clear_identities()?;
            let message = format!(
                "Forgot {} identit{}",
                removed,
                if removed == 1 { "y" } else { "ies" }
            );
            Ok(format_success(&message, no_color) + "\n")
        }
    }
}

fn parse_id(input: &str) -> Result<DeviceId> {
    DeviceId::parse(input).with_context(|| format!("Invalid peripheral identifier '{}'", input))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(store: &Store, id: &str) -> String {
        cmd_identities(store, IdentitiesAction::Add { id: id.to_string() }, true).unwrap()
    }

    #[test]
    fn test_add_list_remove() {
        let store = Store::open_in_memory().unwrap();

        assert_eq!(add(&store, "AA:01"), "[OK] Remembered AA:01\n");
        assert_eq!(add(&store, "AA:01"), "[OK] AA:01 is already remembered\n");
        add(&store, "BB:02");

        let listed = cmd_identities(
            &store,
            IdentitiesAction::List {
                format: OutputFormat::Text,
            },
            true,
        )
        .unwrap();
        assert_eq!(listed, "AA:01\nBB:02\n");

        let removed = cmd_identities(
            &store,
            IdentitiesAction::Remove {
                id: "AA:01".to_string(),
            },
            true,
        )
        .unwrap();
        assert_eq!(removed, "[OK] Forgot AA:01\n");
        assert_eq!(store.identities().unwrap(), vec![DeviceId::new("BB:02")]);
    }

    #[test]
    fn test_clear_reports_count() {
        let store = Store::open_in_memory().unwrap();
        add(&store, "AA:01");
        add(&store, "BB:02");

        let out = cmd_identities(&store, IdentitiesAction::Clear, true).unwrap();
        assert_eq!(out, "[OK] Forgot 2 identities\n");
        assert!(store.identities().unwrap().is_empty());
    }

    #[test]
    fn test_list_json() {
        let store = Store::open_in_memory().unwrap();
        add(&store, "AA:01");

        let out = cmd_identities(
            &store,
            IdentitiesAction::List {
                format: OutputFormat::Json,
            },
            true,
        )
        .unwrap();
        let ids: Vec<String> = serde_json::from_str(&out).unwrap();
        assert_eq!(ids, vec!["AA:01"]);
    }

    #[test]
    fn test_add_rejects_empty_identifier() {
        let store = Store::open_in_memory().unwrap();
        let result = cmd_identities(
            &store,
            IdentitiesAction::Add {
                id: "  ".to_string(),
            },
            true,
        );
        assert!(result.is_err());
        assert!(store.identities().unwrap().is_empty());
    }
}
