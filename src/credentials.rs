//! Fiscal credential management.
//!
//! The store owns the token; the dispatcher only ever borrows a copy for one
//! request attempt. Refresh is an in-process call to the fiscal endpoint's
//! authorization path, persisted before being handed out.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::db::{self, Pool};
use crate::error::PipelineError;
use crate::fiscal::FiscalClient;

/// A borrowed snapshot of the current fiscal credential.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: String,
    pub updated_at: NaiveDateTime,
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current stored credential, if any.
    async fn current(&self) -> Result<Option<Credential>, PipelineError>;

    /// Obtain a fresh credential and persist it. The returned token may be
    /// identical to the previous one; callers must not assume otherwise.
    async fn refresh(&self) -> Result<Credential, PipelineError>;
}

/// Store-backed provider: reads `fiscal_credentials`, refreshes via the
/// fiscal endpoint's login/password exchange.
pub struct StoreBackedCredentials {
    pool: Pool,
    fiscal: Arc<dyn FiscalClient>,
    login: String,
    password: String,
}

impl StoreBackedCredentials {
    pub fn new(pool: Pool, fiscal: Arc<dyn FiscalClient>, login: String, password: String) -> Self {
        Self {
            pool,
            fiscal,
            login,
            password,
        }
    }
}

#[async_trait]
impl CredentialProvider for StoreBackedCredentials {
    #[instrument(skip_all)]
    async fn current(&self) -> Result<Option<Credential>, PipelineError> {
        let stored = db::get_credential(&self.pool).await?;
        Ok(stored.map(|s| Credential {
            token: s.token,
            updated_at: s.updated_at,
        }))
    }

    #[instrument(skip_all)]
    async fn refresh(&self) -> Result<Credential, PipelineError> {
        let token = self.fiscal.authorize(&self.login, &self.password).await?;
        db::put_credential(&self.pool, &token).await?;
        info!("stored refreshed fiscal token");
        Ok(Credential {
            token,
            updated_at: Utc::now().naive_utc(),
        })
    }
}
