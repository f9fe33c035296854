use anyhow::Result;

use qrstudio_core::history::{HistoryEntry, HistoryStore};

use crate::HistoryCommands;

pub fn run_history_command(command: HistoryCommands, store: &mut HistoryStore) -> Result<()> {
    match command {
        HistoryCommands::List => {
            print!("{}", format_history(store.list()));
        }
        HistoryCommands::Remove { id } => {
            if store.remove_by_id(id)? {
                println!("Removed history entry {id}.");
            } else {
                println!("No history entry with id {id}.");
            }
        }
        HistoryCommands::Clear => {
            let count = store.len();
            store.clear()?;
            println!("Cleared {count} history entries.");
        }
    }
    Ok(())
}

pub fn format_history(entries: &[HistoryEntry]) -> String {
    if entries.is_empty() {
        return String::from("No history yet.\n");
    }
    let mut out = format!(
        "{:<15} {:<17} {:<8} {:<13} {:<7} {}\n",
        "ID", "CREATED", "TYPE", "CATEGORY", "COLOR", "CONTENT"
    );
    for e in entries {
        out.push_str(&format!(
            "{:<15} {:<17} {:<8} {:<13} {:<7} {}\n",
            e.id,
            e.created_at.format("%Y-%m-%d %H:%M").to_string(),
            e.qr_type.to_string(),
            e.content_category.to_string(),
            e.foreground_color.to_string(),
            e.content,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use qrstudio_core::request::HexColor;
    use qrstudio_core::{ContentCategory, QrType};

    #[test]
    fn empty_history_message() {
        assert_eq!(format_history(&[]), "No history yet.\n");
    }

    #[test]
    fn rows_follow_header() {
        let entry = HistoryEntry {
            id: 1_700_000_000_000,
            content: "https://example.com".into(),
            foreground_color: HexColor::BLACK,
            size_px: 256,
            created_at: Utc::now(),
            qr_type: QrType::Dynamic,
            content_category: ContentCategory::SocialMedia,
        };
        let text = format_history(&[entry]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("ID"));
        assert!(lines[1].starts_with("1700000000000"));
        assert!(lines[1].contains("dynamic"));
        assert!(lines[1].contains("#000000"));
        assert!(lines[1].ends_with("https://example.com"));
    }
}
