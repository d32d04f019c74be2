use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, Result, WrapErr};
use tracing::info;

use uptime_config::{AppConfig, StorageConfig};
use uptime_storage::keyspaces::{drop_all_tables, wait_for_tables};
use uptime_storage::{
    Dialect, KeyspaceSession, Migration, Migrator, PgSession, SchemaSession, ScyllaSession,
};

use crate::logging;

#[derive(Subcommand, Clone, Debug)]
pub enum MigrateCmd {
    /// Apply every pending migration
    Up(MigrateArgs),

    /// Revert every applied migration
    Down(MigrateArgs),

    /// Drop every table of the keyspace, history included
    Drop(MigrateArgs),
}

#[derive(Parser, Clone, Debug)]
pub struct MigrateArgs {
    /// Service configuration file, whose storage backend is migrated
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,

    /// Directory holding the `<version>_<name>.{up,down}.<ext>` scripts
    #[arg(short, long, value_name = "DIR")]
    pub migrations: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
    Drop,
}

impl MigrateCmd {
    pub async fn run(self) -> Result<()> {
        let (direction, args) = match self {
            MigrateCmd::Up(args) => (Direction::Up, args),
            MigrateCmd::Down(args) => (Direction::Down, args),
            MigrateCmd::Drop(args) => (Direction::Drop, args),
        };

        let config = AppConfig::load(&args.config).wrap_err_with(|| {
            format!("Failed to load configuration from {}", args.config.display())
        })?;

        logging::init(config.logging);

        match &config.storage {
            StorageConfig::Keyspaces(keyspaces) => {
                let keyspace = keyspaces.keyspace.as_str();
                let session = ScyllaSession::connect(keyspaces).await?;

                if direction == Direction::Drop {
                    let dropped = drop_all_tables(&session, keyspace).await?;
                    info!(%keyspace, tables = ?dropped, "Dropped tables");
                    return Ok(());
                }

                let migrations = load(args.migrations.as_deref(), Dialect::Cql)?;
                let migrator = Migrator::new(&session, Dialect::Cql, Some(keyspace), migrations);
                apply(&migrator, direction).await?;

                if direction == Direction::Up {
                    let tables = session.table_names(keyspace).await?;
                    let tables = tables.iter().map(String::as_str).collect::<Vec<_>>();
                    wait_for_tables(&session, keyspace, &tables).await?;
                    info!(%keyspace, "Schema is ready");
                }
            }

            StorageConfig::Postgres(postgres) => {
                if direction == Direction::Drop {
                    bail!("Dropping tables is only supported for the keyspaces backend");
                }

                let session = PgSession::connect(postgres).await?;
                let migrations = load(args.migrations.as_deref(), Dialect::Postgres)?;
                let migrator = Migrator::new(&session, Dialect::Postgres, None, migrations);
                apply(&migrator, direction).await?;
            }

            other => bail!("The {} backend has no schema to migrate", other.name()),
        }

        Ok(())
    }
}

fn load(dir: Option<&Path>, dialect: Dialect) -> Result<Vec<Migration>> {
    let Some(dir) = dir else {
        bail!("A migrations directory is required, pass it with `--migrations`");
    };

    let migrations = Migration::load_dir(dir, dialect)
        .wrap_err_with(|| format!("Failed to load migrations from {}", dir.display()))?;

    info!(dir = %dir.display(), count = migrations.len(), "Loaded migrations");
    Ok(migrations)
}

async fn apply<S>(migrator: &Migrator<'_, S>, direction: Direction) -> Result<()>
where
    S: SchemaSession + ?Sized,
{
    match direction {
        Direction::Up => {
            let applied = migrator.up().await?;
            info!(?applied, "Migrations applied");
        }
        Direction::Down => {
            let reverted = migrator.down().await?;
            info!(?reverted, "Migrations reverted");
        }
        Direction::Drop => {}
    }

    Ok(())
}
