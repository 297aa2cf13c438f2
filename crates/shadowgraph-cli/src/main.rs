use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use shadowgraph_core::{
    detect_conflicts, ConstraintKind, ExtractedSymbol, GraphError, NodeId, Relation, Severity,
    SymbolKey, ValidationConfig, Violation,
};
use shadowgraph_store_sqlite::{ImportMode, SqliteStore};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const LOG_ENV: &str = "SHADOWGRAPH_LOG";
const EXIT_VIOLATIONS: u8 = 1;
const EXIT_CHECK_FAILED: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "sg")]
#[command(about = "ShadowGraph: thoughts and constraints anchored to code symbols")]
struct Cli {
    #[arg(long, global = true, env = "SHADOW_DB_PATH", default_value = ".shadowgraph/shadow.db")]
    db: PathBuf,

    /// Log at debug level unless SHADOWGRAPH_LOG says otherwise.
    #[arg(long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: Box<DbCommand>,
    },
    /// Record the current symbols of a file and update anchor status.
    Index(SymbolsArgs),
    /// Compare the current symbols of a file against stored anchors.
    Drift(SymbolsArgs),
    Anchors(AnchorsArgs),
    Node {
        #[command(subcommand)]
        command: Box<NodeCommand>,
    },
    Link(LinkArgs),
    Thought {
        #[command(subcommand)]
        command: Box<ThoughtCommand>,
    },
    Context(SymbolArgs),
    Folder {
        #[command(subcommand)]
        command: Box<FolderCommand>,
    },
    Impact(ImpactArgs),
    Constraint {
        #[command(subcommand)]
        command: Box<ConstraintCommand>,
    },
    /// Validate every stale symbol against its constraints.
    Check(CheckArgs),
    Graph {
        #[command(subcommand)]
        command: Box<GraphCommand>,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    IntegrityCheck,
    Checksum,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct SymbolsArgs {
    #[arg(long)]
    file: String,
    /// JSON array of extracted symbols, or `-` for stdin.
    #[arg(long)]
    symbols: PathBuf,
}

#[derive(Debug, Args)]
struct AnchorsArgs {
    #[arg(long)]
    file: String,
    #[arg(long, default_value_t = false)]
    stale: bool,
}

#[derive(Debug, Subcommand)]
enum NodeCommand {
    Show(NodeIdArgs),
    Delete(NodeIdArgs),
}

#[derive(Debug, Args)]
struct NodeIdArgs {
    #[arg(long)]
    id: String,
}

#[derive(Debug, Args)]
struct LinkArgs {
    #[arg(long)]
    source: String,
    #[arg(long)]
    target: String,
    #[arg(long, value_enum)]
    relation: RelationArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "snake_case")]
enum RelationArg {
    DependsOn,
    Impacts,
    HasThought,
    RequiredBy,
}

impl From<RelationArg> for Relation {
    fn from(value: RelationArg) -> Self {
        match value {
            RelationArg::DependsOn => Self::DependsOn,
            RelationArg::Impacts => Self::Impacts,
            RelationArg::HasThought => Self::HasThought,
            RelationArg::RequiredBy => Self::RequiredBy,
        }
    }
}

#[derive(Debug, Args)]
struct SymbolArgs {
    #[arg(long)]
    file: String,
    /// Symbol as `kind:name`, e.g. `function:charge`.
    #[arg(long)]
    symbol: SymbolKey,
}

#[derive(Debug, Subcommand)]
enum ThoughtCommand {
    Add(ThoughtAddArgs),
    List(SymbolArgs),
}

#[derive(Debug, Args)]
struct ThoughtAddArgs {
    #[command(flatten)]
    target: SymbolArgs,
    #[arg(long)]
    text: String,
}

#[derive(Debug, Subcommand)]
enum FolderCommand {
    Create(FolderCreateArgs),
    Show(FolderPathArgs),
    Note(FolderNoteArgs),
}

#[derive(Debug, Args)]
struct FolderCreateArgs {
    #[arg(long)]
    path: String,
    #[arg(long)]
    description: Option<String>,
}

#[derive(Debug, Args)]
struct FolderPathArgs {
    #[arg(long)]
    path: String,
}

#[derive(Debug, Args)]
struct FolderNoteArgs {
    #[arg(long)]
    path: String,
    #[arg(long)]
    text: String,
}

#[derive(Debug, Args)]
struct ImpactArgs {
    #[arg(long)]
    symbol: SymbolKey,
    #[arg(long)]
    file: Option<String>,
    #[arg(long, default_value_t = 2)]
    depth: usize,
}

#[derive(Debug, Subcommand)]
enum ConstraintCommand {
    Add(ConstraintAddArgs),
    List(ConstraintListArgs),
    Validate(ConstraintValidateArgs),
}

#[derive(Debug, Args)]
struct ConstraintAddArgs {
    #[command(flatten)]
    target: SymbolArgs,
    #[arg(long)]
    rule: String,
    #[arg(long, value_enum, default_value_t = ConstraintKindArg::Rule)]
    kind: ConstraintKindArg,
    #[arg(long, value_enum, default_value_t = SeverityArg::Warning)]
    severity: SeverityArg,
}

#[derive(Debug, Args)]
struct ConstraintListArgs {
    #[arg(long, requires = "symbol")]
    file: Option<String>,
    #[arg(long, requires = "file")]
    symbol: Option<SymbolKey>,
}

#[derive(Debug, Args)]
struct ConstraintValidateArgs {
    #[arg(long)]
    file: String,
    #[arg(long, value_enum, default_value_t = SeverityArg::Warning)]
    threshold: SeverityArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "snake_case")]
enum ConstraintKindArg {
    Rule,
    Forbidden,
    RequiredPattern,
    RequiresEdge,
}

impl From<ConstraintKindArg> for ConstraintKind {
    fn from(value: ConstraintKindArg) -> Self {
        match value {
            ConstraintKindArg::Rule => Self::Rule,
            ConstraintKindArg::Forbidden => Self::Forbidden,
            ConstraintKindArg::RequiredPattern => Self::RequiredPattern,
            ConstraintKindArg::RequiresEdge => Self::RequiresEdge,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SeverityArg {
    Info,
    Warning,
    Error,
    Critical,
}

impl From<SeverityArg> for Severity {
    fn from(value: SeverityArg) -> Self {
        match value {
            SeverityArg::Info => Self::Info,
            SeverityArg::Warning => Self::Warning,
            SeverityArg::Error => Self::Error,
            SeverityArg::Critical => Self::Critical,
        }
    }
}

#[derive(Debug, Args)]
struct CheckArgs {
    #[arg(long, value_enum, default_value_t = SeverityArg::Warning)]
    threshold: SeverityArg,
    #[arg(long, value_enum, default_value_t = SeverityArg::Critical)]
    fail_on: SeverityArg,
}

#[derive(Debug, Subcommand)]
enum GraphCommand {
    Export(GraphExportArgs),
    Import(GraphImportArgs),
    Conflicts(GraphConflictsArgs),
}

#[derive(Debug, Args)]
struct GraphExportArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct GraphImportArgs {
    #[arg(long = "in")]
    input: PathBuf,
    /// Clear the graph before loading instead of merging.
    #[arg(long, default_value_t = false)]
    replace: bool,
}

#[derive(Debug, Args)]
struct GraphConflictsArgs {
    #[arg(long = "in")]
    input: PathBuf,
}

#[derive(Debug, Serialize)]
struct CheckOutcome {
    threshold: Severity,
    fail_on: Severity,
    violation_count: usize,
    failing_count: usize,
    passed: bool,
    violations: Vec<Violation>,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    tracing::debug!("using graph database {}", cli.db.display());

    let checking = matches!(cli.command, Command::Check(_));
    let result = SqliteStore::open(&cli.db).and_then(|mut store| run(cli.command, &mut store));
    match result {
        Err(err) if checking => {
            eprintln!("error: {err:#}");
            Ok(ExitCode::from(EXIT_CHECK_FAILED))
        }
        other => other,
    }
}

fn run(command: Command, store: &mut SqliteStore) -> Result<ExitCode> {
    match command {
        Command::Check(args) => return run_check(&args, store),
        Command::Db { command } => run_db(*command, store)?,
        Command::Index(args) => run_index(&args, store)?,
        Command::Drift(args) => run_drift(&args, store)?,
        Command::Anchors(args) => run_anchors(&args, store)?,
        Command::Node { command } => run_node(*command, store)?,
        Command::Link(args) => run_link(&args, store)?,
        Command::Thought { command } => run_thought(*command, store)?,
        Command::Context(args) => run_context(&args, store)?,
        Command::Folder { command } => run_folder(*command, store)?,
        Command::Impact(args) => run_impact(&args, store)?,
        Command::Constraint { command } => run_constraint(*command, store)?,
        Command::Graph { command } => run_graph(*command, store)?,
    }
    Ok(ExitCode::SUCCESS)
}

fn run_db(command: DbCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => run_db_schema_version(store),
        DbCommand::Migrate(args) => run_db_migrate(&args, store),
        DbCommand::IntegrityCheck => run_db_integrity_check(store),
        DbCommand::Checksum => run_db_checksum(store),
    }
}

fn run_db_schema_version(store: &SqliteStore) -> Result<()> {
    let status = store.schema_status()?;
    emit_json(serde_json::json!({
        "current_version": status.current_version,
        "target_version": status.target_version,
        "pending_versions": status.pending_versions,
        "up_to_date": status.pending_versions.is_empty()
    }))
}

fn run_db_migrate(args: &DbMigrateArgs, store: &mut SqliteStore) -> Result<()> {
    let before = store.schema_status()?;
    if args.dry_run {
        return emit_json(serde_json::json!({
            "dry_run": true,
            "current_version": before.current_version,
            "target_version": before.target_version,
            "would_apply_versions": before.pending_versions
        }));
    }

    store.migrate()?;
    let after = store.schema_status()?;
    emit_json(serde_json::json!({
        "dry_run": false,
        "before_version": before.current_version,
        "applied_versions": before.pending_versions,
        "after_version": after.current_version,
        "target_version": after.target_version,
        "up_to_date": after.pending_versions.is_empty()
    }))
}

fn run_db_integrity_check(store: &SqliteStore) -> Result<()> {
    let report = store.integrity_check()?;
    let healthy = report.quick_check_ok && report.foreign_key_violations.is_empty();
    let mut value = serde_json::to_value(&report)?;
    if let Value::Object(object) = &mut value {
        object.insert("healthy".to_string(), Value::Bool(healthy));
    }
    emit_json(value)
}

fn run_db_checksum(store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    emit_json(serde_json::json!({ "sha256": store.checksum()? }))
}

fn read_symbols(source: &Path) -> Result<Vec<ExtractedSymbol>> {
    let raw = if source == Path::new("-") {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer).context("failed to read symbols from stdin")?;
        buffer
    } else {
        fs::read_to_string(source)
            .with_context(|| format!("failed to read symbols from {}", source.display()))?
    };
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse symbol list from {}", source.display()))
}

fn run_index(args: &SymbolsArgs, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    let symbols = read_symbols(&args.symbols)?;
    let report = store.index_symbols(&args.file, &symbols)?;
    let stale_count = report.stale_count();
    let mut value = serde_json::to_value(&report)?;
    if let Value::Object(object) = &mut value {
        object.insert("stale_count".to_string(), Value::from(stale_count));
    }
    emit_json(value)
}

fn run_drift(args: &SymbolsArgs, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    let symbols = read_symbols(&args.symbols)?;
    let report = store.check_drift(&args.file, &symbols)?;
    let stale = report.stale().map(|transition| transition.symbol.to_string()).collect::<Vec<_>>();
    emit_json(serde_json::json!({
        "file": report.file,
        "stale_count": stale.len(),
        "stale": stale,
        "transitions": report.transitions
    }))
}

fn run_anchors(args: &AnchorsArgs, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    let anchors = if args.stale {
        store.stale_anchors(&args.file)?
    } else {
        store.anchors_for_file(&args.file)?
    };
    emit_json(serde_json::json!({
        "file": args.file,
        "stale_only": args.stale,
        "count": anchors.len(),
        "anchors": anchors
    }))
}

fn run_node(command: NodeCommand, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    match command {
        NodeCommand::Show(args) => {
            let id = NodeId::new(args.id);
            let node =
                store.get_node(&id)?.ok_or_else(|| GraphError::NotFound(format!("node {id}")))?;
            let edges = store.edges_for_node(&id)?;
            emit_json(serde_json::json!({ "node": node, "edges": edges }))
        }
        NodeCommand::Delete(args) => {
            let id = NodeId::new(args.id);
            let deleted = store.delete_node(&id)?;
            emit_json(serde_json::json!({ "id": id, "deleted": deleted }))
        }
    }
}

fn run_link(args: &LinkArgs, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    let source = NodeId::new(args.source.clone());
    let target = NodeId::new(args.target.clone());
    let relation = Relation::from(args.relation);
    let inserted = store.add_edge(&source, &target, relation)?;
    emit_json(serde_json::json!({
        "source_id": source,
        "target_id": target,
        "relation": relation,
        "inserted": inserted
    }))
}

fn run_thought(command: ThoughtCommand, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    match command {
        ThoughtCommand::Add(args) => {
            let thought =
                store.add_thought(&args.target.file, &args.target.symbol, &args.text)?;
            emit_json(serde_json::to_value(&thought)?)
        }
        ThoughtCommand::List(args) => {
            let thoughts = store.thoughts_for_symbol(&args.file, &args.symbol)?;
            emit_json(serde_json::json!({
                "file": args.file,
                "symbol": args.symbol,
                "count": thoughts.len(),
                "thoughts": thoughts
            }))
        }
    }
}

fn run_context(args: &SymbolArgs, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    let context = store.symbol_context(&args.file, &args.symbol)?;
    emit_json(serde_json::to_value(&context)?)
}

fn run_folder(command: FolderCommand, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    match command {
        FolderCommand::Create(args) => {
            let folder = store.create_folder(&args.path, args.description.as_deref())?;
            emit_json(serde_json::to_value(&folder)?)
        }
        FolderCommand::Show(args) => {
            let folder = store.get_folder(&args.path)?;
            let contents = store.list_folder_contents(&args.path)?;
            let thoughts = store.folder_thoughts(&args.path)?;
            emit_json(serde_json::json!({
                "path": args.path,
                "folder": folder,
                "contents": contents,
                "thoughts": thoughts
            }))
        }
        FolderCommand::Note(args) => {
            let folder = store
                .get_folder(&args.path)?
                .ok_or_else(|| GraphError::NotFound(format!("folder {}", args.path)))?;
            let thought = store.attach_thought(&folder.id, &args.text)?;
            emit_json(serde_json::to_value(&thought)?)
        }
    }
}

fn run_impact(args: &ImpactArgs, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    let origin = store.resolve_symbol(args.file.as_deref(), &args.symbol)?;
    let neighborhood = store.blast_radius(&origin, args.depth)?;
    let mut value = serde_json::to_value(&neighborhood)?;
    if let Value::Object(object) = &mut value {
        object.insert("reached".to_string(), Value::from(neighborhood.len()));
    }
    emit_json(value)
}

fn run_constraint(command: ConstraintCommand, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    match command {
        ConstraintCommand::Add(args) => {
            let summary = store.add_constraint(
                &args.target.file,
                &args.target.symbol,
                &args.rule,
                args.kind.into(),
                args.severity.into(),
            )?;
            emit_json(serde_json::to_value(&summary)?)
        }
        ConstraintCommand::List(args) => {
            let constraints = match (args.file.as_deref(), args.symbol.as_ref()) {
                (Some(file), Some(symbol)) => store.constraints_for_symbol(file, symbol)?,
                _ => store.list_constraints()?,
            };
            emit_json(serde_json::json!({
                "count": constraints.len(),
                "constraints": constraints
            }))
        }
        ConstraintCommand::Validate(args) => {
            let config = ValidationConfig { threshold: args.threshold.into() };
            let violations = store.validate(&args.file, &config)?;
            emit_json(serde_json::json!({
                "file": args.file,
                "threshold": config.threshold,
                "count": violations.len(),
                "violations": violations
            }))
        }
    }
}

fn run_check(args: &CheckArgs, store: &mut SqliteStore) -> Result<ExitCode> {
    store.migrate()?;
    let fail_on = Severity::from(args.fail_on);
    let threshold = Severity::from(args.threshold).min(fail_on);
    let violations = store.validate_all(&ValidationConfig { threshold })?;
    let failing_count = violations.iter().filter(|violation| violation.severity >= fail_on).count();
    let outcome = CheckOutcome {
        threshold,
        fail_on,
        violation_count: violations.len(),
        failing_count,
        passed: failing_count == 0,
        violations,
    };
    emit_json(serde_json::to_value(&outcome)?)?;
    if outcome.passed {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_VIOLATIONS))
    }
}

fn run_graph(command: GraphCommand, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    match command {
        GraphCommand::Export(args) => {
            let summary = store.export_to(&args.out)?;
            emit_json(serde_json::to_value(&summary)?)
        }
        GraphCommand::Import(args) => {
            let mode = if args.replace { ImportMode::Replace } else { ImportMode::Merge };
            let report = store.import_from(&args.input, mode)?;
            let clean = report.is_clean();
            let mut value = serde_json::to_value(&report)?;
            if let Value::Object(object) = &mut value {
                object.insert("clean".to_string(), Value::Bool(clean));
                object.insert("sha256".to_string(), Value::String(store.checksum()?));
            }
            emit_json(value)
        }
        GraphCommand::Conflicts(args) => {
            let text = fs::read_to_string(&args.input)
                .with_context(|| format!("failed to read {}", args.input.display()))?;
            let conflicts = detect_conflicts(&text);
            emit_json(serde_json::json!({
                "path": args.input.display().to_string(),
                "count": conflicts.len(),
                "conflicts": conflicts
            }))
        }
    }
}
