//! Command-line front end for the organizing console.
//!
//! Drives the same stores and report view as the admin pages against a live
//! server, printing the bound stores as plain tables.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use organizer::model::{Activist, ActionId, ActivistId, FormId, SignupId, SignupState};
use organizer::view::columns::{self, Column};
use organizer::view::{ActivistSearch, CancelScope, NoTitles, ReportView, ViewOptions};
use organizer::{ApiBackend, ConsoleConfig, HttpBackend, StoreBinding};

#[derive(Parser)]
#[command(name = "organizer", version, about = "Organizing CRM console")]
struct Cli {
    /// JSON configuration file; environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print an action's signup table
    Show {
        action: ActionId,
        /// Only show signups in these states (number, name or label)
        #[arg(short, long)]
        state: Vec<SignupState>,
    },
    /// Search activists by name or email
    Search { query: String },
    /// Move signups to a new state
    SetState {
        action: ActionId,
        state: SignupState,
        #[arg(required = true)]
        signups: Vec<SignupId>,
    },
    /// Sign an activist up as prospective
    Add { action: ActionId, activist: ActivistId },
    /// Open or close a form
    Form {
        action: ActionId,
        form: FormId,
        #[arg(value_parser = parse_switch)]
        active: bool,
    },
    /// Preview an email to the given signups
    Preview {
        action: ActionId,
        body: String,
        #[arg(required = true)]
        signups: Vec<SignupId>,
    },
}

fn parse_switch(raw: &str) -> Result<bool, String> {
    match raw.to_ascii_lowercase().as_str() {
        "on" | "true" | "active" => Ok(true),
        "off" | "false" | "inactive" => Ok(false),
        other => Err(format!("expected on or off, got '{}'", other)),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn print_table(columns: &[Column], rows: Vec<Vec<String>>) {
    let mut widths: Vec<usize> = columns.iter().map(|c| c.label.chars().count()).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: Vec<&str>| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect();
        println!("{}", padded.join("  ").trim_end());
    };
    line(columns.iter().map(|c| c.label.as_str()).collect());
    for row in &rows {
        line(row.iter().map(String::as_str).collect());
    }
}

async fn open(backend: Arc<dyn ApiBackend>, config: &ConsoleConfig, action: ActionId) -> anyhow::Result<ReportView> {
    let view = ReportView::mount(action, backend, Arc::new(NoTitles), ViewOptions::from(config));
    view.load()
        .await
        .with_context(|| format!("loading action {}", action))?;
    Ok(view)
}

fn select(view: &ReportView, signups: &[SignupId]) -> anyhow::Result<()> {
    for &id in signups {
        if !view.rows().select(id) && !view.rows().selection().contains(&id) {
            bail!("signup {} is not part of action {}", id, view.action_id());
        }
    }
    Ok(())
}

fn show(view: &ReportView) {
    let action = view.action().get_data();
    println!("{} ({} signups)", action.name, action.signups.len());
    let columns = view.columns().get_data();
    let visible = view.rows().get_data().visible;
    print_table(&columns, columns::table(&columns, &visible));
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ConsoleConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let backend: Arc<dyn ApiBackend> = Arc::new(HttpBackend::new(config.clone())?);

    match cli.command {
        Command::Show { action, state } => {
            let view = open(backend, &config, action).await?;
            view.filter_states(&state);
            show(&view);
        }
        Command::Search { query } => {
            let search = ActivistSearch::new(backend, CancelScope::new(config.request_timeout()));
            let _printer = StoreBinding::mount(search.results(), |found: &Vec<Activist>| {
                for activist in found {
                    println!("{:>6}  {}  <{}>", activist.id, activist.name, activist.email);
                }
            });
            search.search(&query).await?;
            if search.results().with(Vec::is_empty) {
                println!("No activists match '{}'", query);
            }
        }
        Command::SetState { action, state, signups } => {
            let view = open(backend, &config, action).await?;
            select(&view, &signups)?;
            let outcome = view.bulk_set_state(state).await?;
            println!("{} of {} signups moved to {}", outcome.updated.len(), signups.len(), state);
            for (id, err) in &outcome.failed {
                eprintln!("signup {}: {}", id, err);
            }
            show(&view);
            if !outcome.is_complete() {
                bail!("{} signups were not updated", outcome.failed.len());
            }
        }
        Command::Add { action, activist } => {
            let view = open(backend, &config, action).await?;
            let activist = Activist {
                id: activist,
                ..Activist::default()
            };
            let signup = view.add_activist(&activist).await?;
            println!("Created signup {}", signup.id);
            show(&view);
        }
        Command::Form { action, form, active } => {
            let view = open(backend, &config, action).await?;
            let form = view.set_form_active(form, active).await?;
            println!(
                "{} is now {}",
                form.title,
                if form.active { "open" } else { "closed" }
            );
        }
        Command::Preview { action, body, signups } => {
            let view = open(backend, &config, action).await?;
            select(&view, &signups)?;
            let preview = view.preview_email(&body).await?;
            println!("{}", preview.body);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(cli).await {
        log::debug!("command failed: {:?}", err);
        eprintln!("error: {:#}", err);
        std::process::exit(1);
    }
}
