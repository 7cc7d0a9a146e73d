//! Cost report over the append-only ledger.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use reelcheck_evals::{CostLedger, CostSummary};

use crate::config::ConfigLoader;

#[derive(Debug, Args)]
pub struct CostsArgs {
    /// Ledger file to read (defaults to the configured ledger)
    #[arg(long)]
    pub ledger: Option<PathBuf>,

    /// Number of recent entries to list
    #[arg(long, default_value_t = 10)]
    pub recent: usize,
}

pub async fn run(args: CostsArgs) -> Result<()> {
    let path = match args.ledger {
        Some(path) => path,
        None => ConfigLoader::load()?.ledger_path,
    };
    let ledger = CostLedger::new(&path);
    let summary = ledger.summary(args.recent).await?;

    if summary.total_evaluations == 0 {
        println!("No evaluations recorded in {}.", path.display());
        return Ok(());
    }

    print!("{}", render(&summary));
    Ok(())
}

fn header(table: &mut Table, columns: &[&str]) {
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(
        columns
            .iter()
            .map(|c| Cell::new(c).fg(Color::Cyan))
            .collect::<Vec<_>>(),
    );
}

/// Token counts from the CLI backend are heuristic and carry a `~`.
fn tokens(count: u64, estimated: bool) -> String {
    if estimated {
        format!("~{count}")
    } else {
        count.to_string()
    }
}

fn render(summary: &CostSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Total cost: ${:.4} across {} evaluation(s)\n\n",
        summary.total_cost, summary.total_evaluations
    ));

    let mut models = Table::new();
    header(&mut models, &["Model", "Evaluations", "Cost", "Input tokens", "Output tokens"]);
    for (model, cost) in &summary.by_model {
        models.add_row(vec![
            Cell::new(model),
            Cell::new(cost.count),
            Cell::new(format!("${:.4}", cost.cost)),
            Cell::new(tokens(cost.input_tokens, cost.estimated)),
            Cell::new(tokens(cost.output_tokens, cost.estimated)),
        ]);
    }
    out.push_str(&format!("By model:\n{models}\n\n"));

    let mut videos = Table::new();
    header(&mut videos, &["Video", "Evaluations", "Cost"]);
    for (video, cost) in &summary.by_video {
        videos.add_row(vec![
            Cell::new(video),
            Cell::new(cost.count),
            Cell::new(format!("${:.4}", cost.cost)),
        ]);
    }
    out.push_str(&format!("By video:\n{videos}\n\n"));

    let mut recent = Table::new();
    header(&mut recent, &["Time (UTC)", "Video", "Rubric", "Model", "Tokens", "Cost"]);
    for entry in &summary.recent {
        recent.add_row(vec![
            Cell::new(entry.timestamp.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(&entry.video_id),
            Cell::new(&entry.rubric),
            Cell::new(&entry.model),
            Cell::new(format!(
                "{} / {}",
                tokens(entry.input_tokens, entry.estimated),
                tokens(entry.output_tokens, entry.estimated)
            )),
            Cell::new(format!("${:.4}", entry.cost)),
        ]);
    }
    out.push_str(&format!("Recent:\n{recent}\n"));
    out
}
