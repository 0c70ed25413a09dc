use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use drifthaul_core::config::{ConnectorConfig, StageLocation};
use drifthaul_core::driver::{DuckDbSupplier, EnginePool};
use drifthaul_core::procedure::{ProcedureParameter, ProcedureSignature};
use drifthaul_core::stage::{LocalStage, Stage};
use drifthaul_core::statement::{Filter, FilterOp, Predicate, SortKey};
use drifthaul_core::types::SemanticType;
use drifthaul_core::{DynamicOverrides, LoadDocument, QueryBatches, WarehouseWrapper, WriteOperation};
use serde_json::{Map, Value as JsonValue};
use tracing::info;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "drifthaul", about = "Batch SQL and bulk stage transfer against an embedded warehouse")]
struct Cli {
    /// Configuration file layered over the defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database URL; overrides the configured one.
    #[arg(long, global = true)]
    url: Option<String>,

    /// Local stage directory; overrides the configured stage.
    #[arg(long, global = true)]
    stage_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Bulk load files into a table, one document per file.
    Load {
        #[arg(long)]
        table: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Bulk unload a table and print each staged file.
    Unload {
        #[arg(long)]
        table: String,
        /// Filter as `COLUMN OP VALUE`, e.g. `ID >= 10`.
        #[arg(long = "filter")]
        filters: Vec<String>,
    },
    /// Write newline-delimited JSON documents into a table.
    Write {
        #[arg(long, value_parser = parse_operation)]
        op: WriteOperation,
        #[arg(long)]
        table: String,
        #[arg(long = "key")]
        keys: Vec<String>,
        file: PathBuf,
    },
    /// Read a table, or run raw SQL, printing one JSON array per batch.
    Query {
        #[arg(long, conflicts_with = "sql")]
        table: Option<String>,
        #[arg(long)]
        sql: Option<String>,
        #[arg(long = "filter")]
        filters: Vec<String>,
        /// Sort key such as `NAME desc`.
        #[arg(long = "order-by")]
        order_by: Vec<String>,
        /// JSON parameter for raw SQL, repeatable.
        #[arg(long = "param")]
        params: Vec<String>,
    },
    /// Run a multi-statement script and print every statement result.
    Script {
        file: PathBuf,
        /// Expected statement count; 0 counts by parsing.
        #[arg(long, default_value_t = 0)]
        count: usize,
    },
    /// Call a procedure once per line of newline-delimited JSON arguments.
    Call {
        #[arg(long)]
        procedure: String,
        /// Declared parameter as `NAME:TYPE`, in call order.
        #[arg(long = "param")]
        params: Vec<String>,
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config =
        ConnectorConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(url) = &cli.url {
        config.url = url.clone();
    }
    if let Some(root) = &cli.stage_root {
        config.stage.location = StageLocation::Local { root: root.clone() };
    }
    init_tracing(&config);
    info!(url = %config.url, stage = %config.stage.location, "starting drifthaul");

    let pool = EnginePool::open(&config.url, 4).context("failed to open database")?;
    let mut wrapper = WarehouseWrapper::new(Box::new(DuckDbSupplier::new(pool)), config.clone());
    if let StageLocation::Local { root } = &config.stage.location {
        let stage: Arc<dyn Stage> =
            Arc::new(LocalStage::new(root.clone()).context("failed to open local stage")?);
        wrapper = wrapper.with_stage(stage);
    }

    let outcome = run(&mut wrapper, cli.command);
    let closed = wrapper.close().context("failed to close connection");
    outcome?;
    closed
}

fn run(wrapper: &mut WarehouseWrapper, command: Command) -> Result<()> {
    let mut out = io::stdout().lock();
    match command {
        Command::Load { table, files } => {
            let documents = files
                .iter()
                .map(|path| {
                    fs::read(path)
                        .with_context(|| format!("failed to read {}", path.display()))
                        .map(|payload| LoadDocument {
                            payload,
                            overrides: DynamicOverrides::default(),
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            for (path, result) in files.iter().zip(wrapper.bulk_load(&table, documents)?) {
                match result {
                    Ok(summary) => writeln!(
                        out,
                        "{}: loaded {} rows from {} objects",
                        path.display(),
                        summary.rows_loaded,
                        summary.objects.len()
                    )?,
                    Err(err) => writeln!(out, "{}: {err}", path.display())?,
                }
            }
        }
        Command::Unload { table, filters } => {
            let predicate = parse_predicate(&filters)?;
            let mut unloader = wrapper.bulk_unload(&table, DynamicOverrides::default(), &predicate)?;
            while let Some(mut file) = unloader.next_file()? {
                io::copy(&mut file.reader, &mut out)
                    .with_context(|| format!("failed to read {}", file.key))?;
                writeln!(out)?;
            }
            unloader.close_resources()?;
        }
        Command::Write {
            op,
            table,
            keys,
            file,
        } => {
            let documents = read_documents(&file)?;
            for result in wrapper.write(op, &table, &keys, documents)? {
                match result.outcome {
                    Ok(count) => writeln!(out, "{}: {count}", result.index + 1)?,
                    Err(err) => writeln!(out, "{}: {err}", result.index + 1)?,
                }
            }
        }
        Command::Query {
            table,
            sql,
            filters,
            order_by,
            params,
        } => {
            let batches = match (table, sql) {
                (Some(table), None) => {
                    let predicate = parse_predicate(&filters)?;
                    let order_by = order_by.iter().map(|s| SortKey::parse(s)).collect::<Vec<_>>();
                    wrapper.select(&table, DynamicOverrides::default(), &predicate, &order_by)?
                }
                (None, Some(sql)) => {
                    let params = params
                        .iter()
                        .map(|p| serde_json::from_str(p).with_context(|| format!("invalid parameter {p}")))
                        .collect::<Result<Vec<JsonValue>>>()?;
                    wrapper.query(&sql, &params)?
                }
                _ => bail!("query needs exactly one of --table or --sql"),
            };
            print_batches(batches, &mut out)?;
        }
        Command::Script { file, count } => {
            let script = fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            for outcome in wrapper.execute_script(&script, count)? {
                let outcome = outcome?;
                let mut reader = outcome.result.into_reader();
                write!(out, "{}: ", outcome.ordinal)?;
                io::copy(&mut reader, &mut out)?;
                writeln!(out)?;
            }
        }
        Command::Call {
            procedure,
            params,
            file,
        } => {
            let parameters = params
                .iter()
                .map(|p| parse_parameter(p))
                .collect::<Result<Vec<_>>>()?;
            let calls = read_documents(&file)?;
            let signature = ProcedureSignature::new(procedure, parameters);
            for (index, result) in wrapper.call_procedures(signature, &calls)?.into_iter().enumerate() {
                match result {
                    Ok(json) => writeln!(out, "{}: {json}", index + 1)?,
                    Err(err) => writeln!(out, "{}: {err}", index + 1)?,
                }
            }
        }
    }
    out.flush()?;
    Ok(())
}

fn print_batches(mut batches: QueryBatches<'_>, out: &mut impl Write) -> Result<()> {
    while let Some(mut batch) = batches.next_batch()? {
        io::copy(&mut batch, out).context("failed to stream rows")?;
        writeln!(out)?;
    }
    Ok(())
}

fn read_documents(path: &Path) -> Result<Vec<Map<String, JsonValue>>> {
    let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut documents = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid JSON", path.display(), number + 1))?
        {
            JsonValue::Object(map) => documents.push(map),
            _ => bail!("{}:{}: document is not an object", path.display(), number + 1),
        }
    }
    Ok(documents)
}

fn parse_operation(value: &str) -> Result<WriteOperation, String> {
    serde_json::from_value(JsonValue::String(value.to_ascii_lowercase()))
        .map_err(|_| format!("unknown operation {value}; expected insert, update, delete or upsert"))
}

fn parse_predicate(filters: &[String]) -> Result<Predicate> {
    if filters.is_empty() {
        return Ok(Predicate::All);
    }
    let parsed = filters
        .iter()
        .map(|filter| {
            let mut parts = filter.splitn(3, ' ');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(column), Some(op), Some(value)) => {
                    let argument = serde_json::from_str(value)
                        .unwrap_or_else(|_| JsonValue::String(value.to_string()));
                    Ok(Filter::new(column, FilterOp::parse(op)?, argument))
                }
                _ => bail!("filter {filter:?} is not COLUMN OP VALUE"),
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Predicate::Filters(parsed))
}

fn parse_parameter(spec: &str) -> Result<ProcedureParameter> {
    let Some((name, type_name)) = spec.split_once(':') else {
        bail!("parameter {spec:?} is not NAME:TYPE");
    };
    Ok(ProcedureParameter {
        name: name.trim().to_string(),
        semantic_type: SemanticType::from_type_name(type_name),
    })
}

fn init_tracing(config: &ConnectorConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,drifthaul_core=debug"));

    // Logs go to stderr; stdout carries results.
    if config.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .with_target(false)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .init();
    } else {
        tracing_subscriber::fmt()
            .compact()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .with_target(false)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .init();
    }
}
