use std::{path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::Result;
use clap::{Parser, Subcommand};
use client_core::{
    parse_options, ColumnDraft, GridIntent, MutationError, NotificationLevel, Session, TableForm,
    Workspace,
};
use shared::{
    domain::{CellValue, ColumnId, ColumnType, ColumnUpdate, RowId, Table, TableId, UserId},
    error::ValidationError,
};
use storage::{RemoteStore, Storage};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, normalize_database_url, DEFAULT_CONFIG_PATH};

#[derive(Parser, Debug)]
#[command(name = "sheetdb", about = "Spreadsheet-style editor for user-defined tables")]
struct Cli {
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Overrides the configured database url.
    #[arg(long)]
    database_url: Option<String>,
    /// Overrides the configured user.
    #[arg(long)]
    user: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Lists the user's tables, newest first.
    Tables {
        #[arg(long)]
        search: Option<String>,
    },
    /// Creates a table; columns are given as `Name:type[:opt1,opt2]`.
    CreateTable {
        name: String,
        #[arg(long = "column", required = true)]
        columns: Vec<String>,
    },
    RenameTable {
        table: String,
        name: String,
    },
    /// Prints a table's rows, optionally sorted by a column.
    Show {
        table: String,
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        desc: bool,
    },
    AddRow {
        table: String,
    },
    /// Sets one cell; rows are addressed by id or 1-based position.
    Set {
        table: String,
        row: String,
        column: String,
        value: String,
    },
    DeleteRows {
        table: String,
        #[arg(required = true)]
        rows: Vec<String>,
    },
    AddColumn {
        table: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "type")]
        column_type: Option<String>,
        #[arg(long)]
        options: Option<String>,
    },
    UpdateColumn {
        table: String,
        column: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "type")]
        column_type: Option<String>,
        #[arg(long)]
        options: Option<String>,
        #[arg(long)]
        required: Option<bool>,
        #[arg(long)]
        width: Option<u32>,
    },
    DeleteColumn {
        table: String,
        column: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let mut settings = load_settings(&cli.config)?;
    if let Some(url) = &cli.database_url {
        settings.database_url = normalize_database_url(url);
    }
    if let Some(user) = &cli.user {
        settings.user_id = user.clone();
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let storage = Storage::new(&settings.database_url)
        .await
        .map_err(|error| {
            error!(database_url = %settings.database_url, %error, "failed to open database");
            error
        })?;
    info!(database_url = %settings.database_url, user_id = %settings.user_id, "starting");

    let session = Session::sign_in(UserId::new(settings.user_id.clone()));
    let mut workspace = Workspace::open(Arc::new(storage), session).await?;
    let outcome = execute(&mut workspace, cli.command).await;

    for note in workspace.take_notifications() {
        match note.level {
            NotificationLevel::Info => println!("{}", note.message),
            NotificationLevel::Error => eprintln!("error: {}", note.message),
        }
    }
    workspace.sign_out();

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        // Already reported through the notification queue.
        Err(err) if err.is_user_visible() => Ok(ExitCode::FAILURE),
        Err(err) => Err(err.into()),
    }
}

async fn execute<S: RemoteStore + ?Sized>(
    workspace: &mut Workspace<S>,
    command: Command,
) -> Result<(), MutationError> {
    match command {
        Command::Tables { search } => {
            for table in workspace.search(search.as_deref().unwrap_or_default()) {
                println!(
                    "{}\t{}\t{} columns\t{}",
                    table.id,
                    table.name,
                    table.columns.len(),
                    table.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Command::CreateTable { name, columns } => {
            let columns = columns
                .iter()
                .map(String::as_str)
                .map(ColumnDraft::parse)
                .collect::<Result<Vec<_>, _>>()?;
            let table_id = workspace.create_table(&TableForm { name, columns }).await?;
            println!("{table_id}");
        }
        Command::RenameTable { table, name } => {
            open_table(workspace, &table).await?;
            workspace.rename_active_table(&name).await?;
        }
        Command::Show { table, sort, desc } => {
            let active = open_table(workspace, &table).await?;
            if let Some(sort) = sort {
                let column_id = resolve_column(&active, &sort)?;
                workspace.grid_mut().toggle_sort(&column_id);
                if desc {
                    workspace.grid_mut().toggle_sort(&column_id);
                }
            }
            print_table(workspace);
        }
        Command::AddRow { table } => {
            open_table(workspace, &table).await?;
            workspace.dispatch(GridIntent::AddRow).await?;
            if let Some(row) = workspace.active_table().and_then(|t| t.rows.last()) {
                println!("{}", row.id);
            }
        }
        Command::Set {
            table,
            row,
            column,
            value,
        } => {
            let active = open_table(workspace, &table).await?;
            let row_id = resolve_row(&active, &row)?;
            let column_id = resolve_column(&active, &column)?;
            workspace
                .dispatch(GridIntent::UpdateCell {
                    row_id,
                    column_id,
                    value: CellValue::Text(value),
                })
                .await?;
        }
        Command::DeleteRows { table, rows } => {
            let active = open_table(workspace, &table).await?;
            let mut row_ids = rows
                .iter()
                .map(|raw| resolve_row(&active, raw))
                .collect::<Result<Vec<_>, _>>()?;
            let intent = if row_ids.len() == 1 {
                GridIntent::DeleteRow {
                    row_id: row_ids.remove(0),
                }
            } else {
                GridIntent::DeleteRows { row_ids }
            };
            workspace.dispatch(intent).await?;
        }
        Command::AddColumn {
            table,
            name,
            column_type,
            options,
        } => {
            open_table(workspace, &table).await?;
            let update = ColumnUpdate {
                name,
                column_type: column_type.as_deref().map(parse_column_type).transpose()?,
                options: options.as_deref().map(parse_options),
                ..ColumnUpdate::default()
            };
            workspace.dispatch(GridIntent::AddColumn).await?;
            let added = workspace
                .active_table()
                .and_then(|t| t.columns.last())
                .map(|c| c.id.clone());
            if let Some(column_id) = added {
                if !update.is_empty() {
                    workspace
                        .dispatch(GridIntent::UpdateColumn {
                            column_id: column_id.clone(),
                            update,
                        })
                        .await?;
                }
                println!("{column_id}");
            }
        }
        Command::UpdateColumn {
            table,
            column,
            name,
            column_type,
            options,
            required,
            width,
        } => {
            let active = open_table(workspace, &table).await?;
            let column_id = resolve_column(&active, &column)?;
            let update = ColumnUpdate {
                name,
                column_type: column_type.as_deref().map(parse_column_type).transpose()?,
                options: options.as_deref().map(parse_options),
                required,
                width,
            };
            workspace
                .dispatch(GridIntent::UpdateColumn { column_id, update })
                .await?;
        }
        Command::DeleteColumn { table, column } => {
            let active = open_table(workspace, &table).await?;
            let column_id = resolve_column(&active, &column)?;
            workspace
                .dispatch(GridIntent::DeleteColumn { column_id })
                .await?;
        }
    }
    Ok(())
}

/// Selects the table named or identified by `raw` and returns a snapshot of it.
async fn open_table<S: RemoteStore + ?Sized>(
    workspace: &mut Workspace<S>,
    raw: &str,
) -> Result<Table, MutationError> {
    let table_id = workspace
        .find_table(raw)
        .map(|t| t.id.clone())
        .ok_or_else(|| ValidationError::UnknownTable(TableId::new(raw)))?;
    workspace.select_table(&table_id).await?;
    workspace
        .active_table()
        .cloned()
        .ok_or(MutationError::Validation(ValidationError::NoActiveTable))
}

fn resolve_column(table: &Table, raw: &str) -> Result<ColumnId, ValidationError> {
    table
        .column(&ColumnId::new(raw))
        .or_else(|| table.column_by_name(raw))
        .map(|c| c.id.clone())
        .ok_or_else(|| ValidationError::UnknownColumn(ColumnId::new(raw)))
}

fn resolve_row(table: &Table, raw: &str) -> Result<RowId, ValidationError> {
    if let Some(row) = table.row(&RowId::new(raw)) {
        return Ok(row.id.clone());
    }
    raw.parse::<usize>()
        .ok()
        .and_then(|position| position.checked_sub(1))
        .and_then(|index| table.rows.get(index))
        .map(|row| row.id.clone())
        .ok_or_else(|| ValidationError::UnknownRow(RowId::new(raw)))
}

fn parse_column_type(raw: &str) -> Result<ColumnType, ValidationError> {
    ColumnType::parse(raw).ok_or_else(|| ValidationError::UnknownColumnType(raw.to_string()))
}

fn print_table<S: RemoteStore + ?Sized>(workspace: &Workspace<S>) {
    let Some(table) = workspace.active_table() else {
        return;
    };
    let header: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("{} ({})", c.name, c.column_type))
        .collect();
    println!("#\tid\t{}", header.join("\t"));

    // Positions refer to insertion order, which is how `set` and `delete-rows` address rows.
    for row in workspace.rows_in_view() {
        let position = table
            .rows
            .iter()
            .position(|r| r.id == row.id)
            .map_or(0, |index| index + 1);
        let cells: Vec<String> = table
            .columns
            .iter()
            .map(|column| row.value_for(column).to_string())
            .collect();
        println!("{position}\t{}\t{}", row.id, cells.join("\t"));
    }
}
