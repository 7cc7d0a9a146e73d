use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use reelcheck_evals::{Availability, BackendRegistry};
use reelcheck_models::auth::CredentialStore;

use super::CREDENTIAL_SERVICE;
use crate::config::ConfigLoader;

#[derive(Debug, Args)]
pub struct BackendsArgs {}

pub async fn run(_args: BackendsArgs) -> Result<()> {
    let config = ConfigLoader::load()?;
    let credentials = CredentialStore::new(CREDENTIAL_SERVICE).with_env_fallback();
    let registry = BackendRegistry::probe(&config.probe_options(), &credentials).await;

    println!("{}", render(&registry));
    Ok(())
}

fn render(registry: &BackendRegistry) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Backend").fg(Color::Cyan),
        Cell::new("Status").fg(Color::Cyan),
        Cell::new("Detail").fg(Color::Cyan),
    ]);

    for (kind, availability) in registry.entries() {
        let (status, detail) = match availability {
            Availability::Available { detail } => (Cell::new("available").fg(Color::Green), detail),
            Availability::Unavailable { reason } => {
                (Cell::new("unavailable").fg(Color::Red), reason)
            }
        };
        table.add_row(vec![Cell::new(kind), status, Cell::new(detail)]);
    }
    table
}
