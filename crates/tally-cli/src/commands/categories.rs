//! Category commands

use anyhow::Result;

use tally_core::CategoryId;

use super::App;
use crate::cli::CategoryCommands;

pub fn run(app: &App, command: CategoryCommands) -> Result<()> {
    match command {
        CategoryCommands::Add {
            name,
            description,
            color,
            icon,
        } => {
            let category = app.store.create_category(&name, &description, &color, &icon)?;
            println!("Created category {} ({})", category.id, category.name);
        }
        CategoryCommands::List => {
            for category in app.store.live_categories() {
                let marker = if category.is_default_others() {
                    " [default]"
                } else {
                    ""
                };
                println!(
                    "{}  {}  {}{}",
                    category.id, category.name, category.description, marker
                );
            }
        }
        CategoryCommands::Rm { id } => {
            app.store.delete_category(&CategoryId::from(id.as_str()))?;
            println!("Deleted category {}", id);
        }
    }
    Ok(())
}
