mod ai_cmds;
mod batch_cmd;
mod config;
mod context;
mod generate_cmd;
mod record_cmds;
mod report_cmd;
mod serve_cmd;
mod user_cmds;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use testmaster_core::ai::{GenerationTask, ProviderKind};
use testmaster_core::generate::BatchKind;
use testmaster_core::permission::Permission;
use testmaster_core::records::RecordKind;
use testmaster_db::models::{CaseType, ExecutionStatus, Priority, Role};
use testmaster_db::pool;

use config::{CliOverrides, TestmasterConfig};
use context::AppContext;

#[derive(Parser)]
#[command(name = "testmaster", about = "Test plan, case and execution management with AI generation")]
struct Cli {
    /// Database URL (overrides TESTMASTER_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Act as this user (overrides TESTMASTER_USER_ID env var)
    #[arg(long, global = true)]
    user: Option<Uuid>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a testmaster config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/testmaster")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create the database and run migrations
    DbInit,
    /// Serve the JSON API
    Serve {
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Keep all records in memory instead of PostgreSQL
        #[arg(long)]
        in_memory: bool,
    },
    /// Test plans
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Test cases
    Case {
        #[command(subcommand)]
        command: CaseCommands,
    },
    /// Test executions
    Execution {
        #[command(subcommand)]
        command: ExecutionCommands,
    },
    /// Generate one record with the configured model and store it
    Generate {
        #[command(subcommand)]
        command: GenerateCommands,
        /// Use this model instead of the task default
        #[arg(long, global = true)]
        model: Option<String>,
        /// Use this prompt template instead of the first active one
        #[arg(long, global = true)]
        template: Option<String>,
    },
    /// Generate many records from a requirements document and review them
    Batch {
        /// What to generate: plans or cases
        kind: BatchKind,
        /// Requirements document
        file: PathBuf,
        /// Plan the generated cases belong to
        #[arg(long)]
        plan: Option<Uuid>,
        /// Extra instructions for the model
        #[arg(long)]
        context: Option<String>,
    },
    /// AI model configuration
    Model {
        #[command(subcommand)]
        command: ModelCommands,
    },
    /// Prompt templates
    Template {
        #[command(subcommand)]
        command: TemplateCommands,
    },
    /// Users, roles and permissions
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Record counts and execution results
    Report {
        /// Restrict the execution summary to one plan
        #[arg(long)]
        plan: Option<Uuid>,
    },
    /// Recently changed records, newest first
    History {
        /// Only show plans, cases or executions
        #[arg(long)]
        kind: Option<RecordKind>,
        /// Maximum number of entries
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
pub enum PlanCommands {
    /// List your test plans
    List,
    /// Show one plan in full
    Show { id: String },
    /// Delete a plan; its executions go with it
    Delete {
        id: String,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum CaseCommands {
    /// List your test cases
    List {
        #[arg(long)]
        plan: Option<Uuid>,
    },
    /// Show one case with its steps
    Show { id: String },
    /// Delete a case; its executions go with it
    Delete {
        id: String,
        #[arg(long, short)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum ExecutionCommands {
    /// List your executions
    List {
        #[arg(long)]
        plan: Option<Uuid>,
        #[arg(long)]
        case: Option<Uuid>,
    },
    /// Record the outcome of running a case
    Record {
        /// Case that was run
        case: Uuid,
        /// passed, failed, blocked or not_tested
        #[arg(long)]
        status: ExecutionStatus,
        /// Plan the run belongs to (defaults to the case's plan)
        #[arg(long)]
        plan: Option<Uuid>,
        #[arg(long, default_value = "")]
        actual: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Delete an execution
    Delete {
        id: String,
        #[arg(long, short)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum GenerateCommands {
    /// Generate a test plan
    Plan {
        /// What the plan should cover
        description: String,
        #[arg(long, default_value = "")]
        requirements: String,
        #[arg(long)]
        context: Option<String>,
    },
    /// Generate a test case
    Case {
        /// Feature under test
        feature: String,
        #[arg(long)]
        plan: Option<Uuid>,
        #[arg(long, default_value = "")]
        requirements: String,
        #[arg(long = "type", default_value = "functional")]
        case_type: CaseType,
        #[arg(long, default_value = "medium")]
        priority: Priority,
    },
    /// Generate an execution record for a case
    Execution {
        case: Uuid,
        /// Plan the run belongs to (defaults to the case's plan)
        #[arg(long)]
        plan: Option<Uuid>,
        #[arg(long, default_value = "")]
        environment: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
}

#[derive(Subcommand)]
pub enum ModelCommands {
    /// List configured models and task defaults
    List,
    /// Register a model
    Add {
        name: String,
        /// gemini or openai
        #[arg(long)]
        provider: ProviderKind,
        /// Model name as the provider knows it
        #[arg(long)]
        provider_model: String,
        /// Credential reference the API key is stored under
        #[arg(long)]
        credential: String,
        /// Tasks the model may serve (default: all)
        #[arg(long, value_delimiter = ',')]
        tasks: Vec<GenerationTask>,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        max_tokens: Option<u32>,
        /// Alternative endpoint speaking the provider's protocol
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Make a model selectable again
    Activate { id: String },
    /// Stop a model from being selected
    Deactivate { id: String },
    /// Remove a model; tasks defaulting to it are reassigned
    Delete { id: String },
    /// Make a model the default for one task, or the global default
    SetDefault {
        id: String,
        #[arg(long)]
        task: Option<GenerationTask>,
    },
    /// Store an API key under a credential reference
    SetKey { credential: String, key: String },
    /// Push the model configuration to the shared settings store
    Push,
    /// Replace the local model configuration with the shared one
    Pull,
}

#[derive(Subcommand)]
pub enum TemplateCommands {
    /// List templates
    List {
        #[arg(long)]
        task: Option<GenerationTask>,
    },
    /// Show a template and the variables it uses
    Show { id: String },
    /// Add a template from a file
    Add {
        name: String,
        #[arg(long)]
        task: GenerationTask,
        file: PathBuf,
    },
    /// Delete a template
    Delete { id: String },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Show a user's role and effective permissions (default: yourself)
    Show { user: Option<Uuid> },
    /// List known users
    List,
    /// Change a user's role
    SetRole { user: Uuid, role: Role },
    /// Grant a permission
    Grant { user: Uuid, permission: Permission },
    /// Revoke a permission
    Revoke { user: Uuid, permission: Permission },
}

/// Execute `testmaster init`: write the config file with a fresh local
/// user id.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let user_id = Uuid::new_v4();
    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
            ..Default::default()
        },
        user: config::UserSection { id: Some(user_id) },
        ..Default::default()
    };
    config::save_config_to(&path, &cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!("  user.id      = {user_id}");
    println!();
    println!("Next: run `testmaster db-init` to create and migrate the database.");

    Ok(())
}

/// Execute `testmaster db-init`: create the database and run migrations.
async fn cmd_db_init(resolved: &TestmasterConfig) -> anyhow::Result<()> {
    println!("Initializing testmaster database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;
    println!("testmaster db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let overrides = CliOverrides {
        database_url: cli.database_url,
        user_id: cli.user,
    };

    if let Commands::Init { db_url, force } = &cli.command {
        return cmd_init(db_url, *force);
    }

    let resolved = TestmasterConfig::resolve(&overrides)?;

    match cli.command {
        Commands::Init { .. } => {}
        Commands::DbInit => cmd_db_init(&resolved).await?,
        Commands::Serve {
            bind,
            port,
            in_memory,
        } => {
            let bind = bind.unwrap_or_else(|| resolved.bind.clone());
            let port = port.unwrap_or(resolved.port);
            let ctx = if in_memory {
                AppContext::in_memory(resolved)?
            } else {
                AppContext::connect(resolved).await?
            };
            serve_cmd::run_serve(ctx, &bind, port).await?;
        }
        command => {
            let ctx = AppContext::connect(resolved).await?;
            let result = run_command(command, &ctx).await;
            ctx.close().await;
            result?;
        }
    }

    Ok(())
}

async fn run_command(command: Commands, ctx: &AppContext) -> anyhow::Result<()> {
    match command {
        Commands::Plan { command } => record_cmds::run_plan_command(command, ctx).await,
        Commands::Case { command } => record_cmds::run_case_command(command, ctx).await,
        Commands::Execution { command } => record_cmds::run_execution_command(command, ctx).await,
        Commands::Generate {
            command,
            model,
            template,
        } => generate_cmd::run_generate(command, model, template, ctx).await,
        Commands::Batch {
            kind,
            file,
            plan,
            context,
        } => batch_cmd::run_batch(ctx, kind, &file, plan, context).await,
        Commands::Model { command } => ai_cmds::run_model_command(command, ctx).await,
        Commands::Template { command } => ai_cmds::run_template_command(command, ctx).await,
        Commands::User { command } => user_cmds::run_user_command(command, ctx).await,
        Commands::Report { plan } => report_cmd::run_report(ctx, plan).await,
        Commands::History { kind, limit } => report_cmd::run_history(ctx, kind, limit).await,
        Commands::Init { .. } | Commands::DbInit | Commands::Serve { .. } => Ok(()),
    }
}
