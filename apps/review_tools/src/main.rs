use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use oracle_core::{
    load_settings,
    review::{BoardTab, LineChange, ReviewAction, SplitRow},
    HttpReviewClient, ReviewBoard,
};
use shared::{domain::RequestId, protocol::EditRequest};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Review crowd-sourced edit requests")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List requests in one tab, with the count of every tab.
    List {
        #[arg(long, value_enum, default_value_t = Tab::Pending)]
        tab: Tab,
    },
    /// Show one request and the diff of its proposed text.
    Show {
        id: String,
        /// Print a unified diff instead of the side-by-side rows.
        #[arg(long)]
        unified: bool,
        #[arg(long, default_value_t = 3)]
        context: usize,
    },
    Approve {
        id: String,
        #[arg(long, default_value = "")]
        notes: String,
        /// Approve this text instead of the proposal as submitted.
        #[arg(long)]
        text_file: Option<PathBuf>,
    },
    Reject {
        id: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Tab {
    Pending,
    Accepted,
    Rejected,
    All,
}

impl From<Tab> for BoardTab {
    fn from(tab: Tab) -> Self {
        match tab {
            Tab::Pending => BoardTab::Pending,
            Tab::Accepted => BoardTab::Accepted,
            Tab::Rejected => BoardTab::Rejected,
            Tab::All => BoardTab::All,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
    let cli = Cli::parse();
    let settings = load_settings()?;

    let client = HttpReviewClient::new(
        &settings.api_url()?,
        settings.tenant.clone(),
        settings.connect_timeout(),
    )?
    .with_access_token(settings.access_token.clone());
    let mut board = ReviewBoard::new(Arc::new(client));
    board.refresh().await.context("failed to fetch edit requests")?;

    match cli.command {
        Command::List { tab } => {
            let labels: Vec<String> = BoardTab::ALL
                .iter()
                .map(|each| board.tab_label(*each))
                .collect();
            println!("{}", labels.join("  "));
            board.set_tab(tab.into());
            for request in board.visible() {
                print_summary(request);
            }
        }
        Command::Show {
            id,
            unified,
            context,
        } => {
            let id = RequestId(id);
            let request = board
                .find(&id)
                .with_context(|| format!("no edit request with id {id}"))?;
            print_summary(request);
            if let Some(description) = &request.description {
                println!("  description: {description}");
            }
            if let Some(review) = &request.review {
                println!("  review: {review}");
            }
            let diff = board.diff(&id)?;
            if unified {
                print!("{}", diff.unified(context));
            } else {
                let (added, removed) = diff.stats();
                println!("  +{added} -{removed}");
                for row in diff.changed_rows(context) {
                    print_row(&row);
                }
            }
        }
        Command::Approve {
            id,
            notes,
            text_file,
        } => {
            let id = RequestId(id);
            if let Some(path) = text_file {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read '{}'", path.display()))?;
                board.open_review(&id)?;
                board.edit_draft(text)?;
            }
            decide(&mut board, &id, ReviewAction::Approve, notes).await?;
        }
        Command::Reject { id, notes } => {
            decide(&mut board, &RequestId(id), ReviewAction::Reject, notes).await?;
        }
    }

    Ok(())
}

async fn decide(
    board: &mut ReviewBoard,
    id: &RequestId,
    action: ReviewAction,
    notes: String,
) -> Result<()> {
    board.begin_action(id, action)?;
    board.set_notes(notes)?;
    let result = board.confirm().await;
    if let Some(notice) = board.take_notice() {
        println!("{notice}");
    }
    let updated = result?;
    print_summary(&updated);
    Ok(())
}

fn print_summary(request: &EditRequest) {
    let page = request
        .page_number
        .map(|n| format!(" p.{n}"))
        .unwrap_or_default();
    let title = request.book_title.as_deref().unwrap_or("untitled");
    println!(
        "{:<10} {:<9} {:<11} {}{} by {} ({})",
        request.id.to_string(),
        request.status.as_str(),
        request.request_type.to_string(),
        title,
        page,
        request.username,
        request.updated_at.format("%Y-%m-%d %H:%M"),
    );
}

fn print_row(row: &SplitRow) {
    let marker = match row.change {
        LineChange::Equal => ' ',
        LineChange::Removed => '-',
        LineChange::Added => '+',
        LineChange::Modified => '~',
    };
    let side = |cell: &Option<(usize, String)>| match cell {
        Some((line, text)) => format!("{line:>4} {text}"),
        None => String::new(),
    };
    println!("{marker} {:<48} | {}", side(&row.left), side(&row.right));
}
