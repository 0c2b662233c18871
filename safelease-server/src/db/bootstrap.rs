//! Startup schema installation from `scripts/pg`.

use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, info, warn};

use shared::config::server::DatabaseConfig;

/// Script folders, applied in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Schema,
    Procedures,
    Indexes,
    Seed,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Schema,
        Stage::Procedures,
        Stage::Indexes,
        Stage::Seed,
    ];

    #[must_use]
    pub const fn folder(self) -> &'static str {
        match self {
            Stage::Schema => "schema",
            Stage::Procedures => "procedures",
            Stage::Indexes => "indexes",
            Stage::Seed => "seed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.folder())
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database bootstrap directory does not exist: {0}")]
    MissingRoot(PathBuf),
    #[error("database bootstrap stage '{stage}' missing at {path}")]
    MissingStage { stage: Stage, path: PathBuf },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("database error executing {path}: {source}")]
    Sql {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },
}

/// Applies every `*.sql` file of each [`Stage`] in file-name order, one
/// transaction per script. Scripts must be idempotent; they run on every
/// start. Returns the number of scripts executed.
pub async fn run(pool: &PgPool, config: &DatabaseConfig) -> Result<usize, BootstrapError> {
    let root = &config.bootstrap_path;
    if !root.is_dir() {
        return Err(BootstrapError::MissingRoot(root.clone()));
    }

    info!(path = %root.display(), "running database bootstrap");
    let mut applied = 0;
    for stage in Stage::ALL {
        let dir = root.join(stage.folder());
        if !dir.is_dir() {
            return Err(BootstrapError::MissingStage { stage, path: dir });
        }

        let scripts = collect_sql_files(&dir)?;
        debug!(%stage, count = scripts.len(), "applying stage");
        for path in scripts {
            if apply_script(pool, &path).await? {
                applied += 1;
            }
        }
    }

    info!(applied, "database bootstrap complete");
    Ok(applied)
}

pub async fn ensure_liveness(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}

/// Fails until the chat procedures are installed.
pub async fn ensure_readiness(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("CALL sp_chat_healthz()")
        .execute(pool)
        .await
        .map(|_| ())
}

fn collect_sql_files(dir: &Path) -> Result<Vec<PathBuf>, BootstrapError> {
    let io_error = |source| BootstrapError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut scripts = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path
            .extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| ext.eq_ignore_ascii_case("sql"))
        {
            scripts.push(path);
        }
    }

    scripts.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(scripts)
}

/// Returns `false` when the script was empty and skipped.
async fn apply_script(pool: &PgPool, path: &Path) -> Result<bool, BootstrapError> {
    let sql = fs::read_to_string(path).map_err(|source| BootstrapError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if sql.trim().is_empty() {
        warn!(script = %path.display(), "skipping empty bootstrap script");
        return Ok(false);
    }

    let sql_error = |source| BootstrapError::Sql {
        path: path.to_path_buf(),
        source,
    };
    let mut transaction = pool.begin().await.map_err(sql_error)?;
    debug!(script = %path.display(), "executing bootstrap script");
    sqlx::raw_sql(&sql)
        .execute(&mut *transaction)
        .await
        .map_err(sql_error)?;
    transaction.commit().await.map_err(sql_error)?;
    Ok(true)
}
