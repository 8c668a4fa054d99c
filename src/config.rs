//! Server configuration
//!
//! Command-line arguments with environment variable fallbacks.

use app_core::{CoreConfig, RateLimitConfig};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use storage::{DocumentStore, KvConfig, KvStore, MemoryStore};

/// Becayis exchange server
#[derive(Parser, Debug, Clone)]
#[command(name = "becayis")]
#[command(about = "Job-swap exchange server with live messaging")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "BECAYIS_BIND", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// Shared secret for HS256 access tokens
    #[arg(long, env = "BECAYIS_JWT_SECRET")]
    pub jwt_secret: String,

    /// Data directory; documents are kept in memory when unset
    #[arg(long, env = "BECAYIS_DATA_DIR")]
    pub data_dir: Option<String>,

    /// Invitations a member may send per 24 hours
    #[arg(long, env = "BECAYIS_INVITATION_LIMIT", default_value_t = 10)]
    pub invitation_limit: usize,

    /// Open listings allowed per member
    #[arg(long, env = "BECAYIS_MAX_OPEN_LISTINGS", default_value_t = 3)]
    pub max_open_listings: usize,

    /// Emit logs as JSON lines
    #[arg(long, env = "BECAYIS_LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

impl Args {
    /// Check values clap cannot check on its own
    pub fn validate(&self) -> Result<(), String> {
        if self.jwt_secret.trim().len() < 16 {
            return Err("BECAYIS_JWT_SECRET must be at least 16 characters".to_string());
        }
        if self.invitation_limit == 0 {
            return Err("BECAYIS_INVITATION_LIMIT must be positive".to_string());
        }
        if self.max_open_listings == 0 {
            return Err("BECAYIS_MAX_OPEN_LISTINGS must be positive".to_string());
        }
        Ok(())
    }

    /// Exchange core tunables
    pub fn core_config(&self) -> CoreConfig {
        CoreConfig::new()
            .invitation_limit(RateLimitConfig::default().limit(self.invitation_limit))
            .max_open_listings(self.max_open_listings)
    }

    /// Open the document store
    pub fn open_store(&self) -> storage::Result<Arc<dyn DocumentStore>> {
        match &self.data_dir {
            Some(dir) => Ok(Arc::new(KvStore::new(KvConfig::new(dir.as_str()))?)),
            None => Ok(Arc::new(MemoryStore::new())),
        }
    }
}
