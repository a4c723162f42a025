use clap::{Parser, ValueEnum};
use db_infra::{run_migrations, ConnectionSettings, DevDbResource};
use migration::MigrationCommand;

#[derive(Clone, Copy, ValueEnum)]
enum Command {
    Up,
    Down,
    Fresh,
    Reset,
    Refresh,
    Status,
}

impl From<Command> for MigrationCommand {
    fn from(command: Command) -> Self {
        match command {
            Command::Up => MigrationCommand::Up,
            Command::Down => MigrationCommand::Down,
            Command::Fresh => MigrationCommand::Fresh,
            Command::Reset => MigrationCommand::Reset,
            Command::Refresh => MigrationCommand::Refresh,
            Command::Status => MigrationCommand::Status,
        }
    }
}

#[derive(Parser)]
#[command(name = "migration-cli")]
#[command(about = "Run schema migrations against the direct database URL")]
struct Args {
    /// Migration command to run
    #[arg(value_enum)]
    command: Command,

    /// Override the resolved URL (otherwise DATABASE_URL_UNPOOLED, then the sync URL)
    #[arg(long)]
    url: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stdout)
        .without_time()
        .with_target(false)
        .with_env_filter("migration=info,db_infra=info,sqlx=warn")
        .init();

    let args = Args::parse();

    let url = match args.url {
        Some(url) => url,
        None => {
            let resolved = ConnectionSettings::from_env()
                .and_then(|settings| settings.resolve_unpooled_url(&DevDbResource::from_env()));
            match resolved {
                Ok(url) => url,
                Err(e) => {
                    eprintln!("❌ {e}");
                    std::process::exit(2);
                }
            }
        }
    };

    if let Err(e) = run_migrations(&url, args.command.into()).await {
        eprintln!("Migration failed: {e}");
        std::process::exit(1);
    }
}
