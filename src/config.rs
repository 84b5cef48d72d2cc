use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_MAX_BATCH: usize = 5000;
pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const DEFAULT_MAX_PAGE_SIZE: i64 = 10_000;

/// Loan recovery sidecar: JSON requests on stdin, JSON responses on stdout.
#[derive(Parser, Debug)]
#[command(name = "recoveryd", version)]
pub struct Args {
    /// Workspace directory to open at start-up (holds recovery.sqlite3)
    #[arg(long, env = "RECOVERYD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Maximum number of records accepted by one bulk upsert
    #[arg(long, default_value_t = DEFAULT_MAX_BATCH, env = "RECOVERYD_MAX_BATCH")]
    pub max_batch: usize,

    /// Page size used by customers.list when the caller sends none
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    pub default_page_size: i64,

    /// Upper bound for customers.list page size
    #[arg(long, default_value_t = DEFAULT_MAX_PAGE_SIZE)]
    pub max_page_size: i64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub max_batch: usize,
    pub default_page_size: i64,
    pub max_page_size: i64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            workspace: None,
            max_batch: DEFAULT_MAX_BATCH,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Config {
            workspace: args.workspace,
            max_batch: args.max_batch.max(1),
            default_page_size: args.default_page_size.max(1),
            max_page_size: args.max_page_size.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_defaults() {
        let args = Args::try_parse_from(["recoveryd"]).unwrap();
        let config = Config::from(args);
        assert_eq!(config.max_batch, DEFAULT_MAX_BATCH);
        assert_eq!(config.default_page_size, 10);
        assert!(config.workspace.is_none());
    }

    #[test]
    fn zero_limits_are_clamped() {
        let args =
            Args::try_parse_from(["recoveryd", "--max-batch", "0", "--workspace", "/tmp/ws"])
                .unwrap();
        let config = Config::from(args);
        assert_eq!(config.max_batch, 1);
        assert_eq!(config.workspace, Some(PathBuf::from("/tmp/ws")));
    }
}
