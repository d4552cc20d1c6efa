//! Wiring shared by every command that touches storage or the AI registry.

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use uuid::Uuid;

use testmaster_core::ai::provider::ProviderRouter;
use testmaster_core::ai::{
    Credentials, GenerationExecutor, ModelRegistry, RegistryStore, SharedCredentials,
    SharedRegistry,
};
use testmaster_core::confirm::{DeleteConfirmation, DeleteTarget};
use testmaster_core::permission::{Access, AccessError, Permission, PermissionResolver, require};
use testmaster_core::storage::{MemoryStorage, PgStorage, Storage};
use testmaster_db::pool;
use tokio_util::sync::CancellationToken;

use crate::config::TestmasterConfig;

pub struct AppContext {
    pub config: TestmasterConfig,
    pub storage: Arc<dyn Storage>,
    pg: Option<Arc<PgStorage>>,
    pub store: RegistryStore,
    pub registry: SharedRegistry,
    pub credentials: SharedCredentials,
    pub resolver: PermissionResolver,
}

impl AppContext {
    /// Connect to PostgreSQL and load the local AI registry.
    pub async fn connect(config: TestmasterConfig) -> Result<Self> {
        let db_pool = pool::create_pool(&config.db_config).await?;
        let pg = Arc::new(PgStorage::new(db_pool));
        Self::with_storage(config, pg.clone(), Some(pg))
    }

    /// Process-local storage; nothing survives the process.
    pub fn in_memory(config: TestmasterConfig) -> Result<Self> {
        Self::with_storage(config, Arc::new(MemoryStorage::new()), None)
    }

    fn with_storage(
        config: TestmasterConfig,
        storage: Arc<dyn Storage>,
        pg: Option<Arc<PgStorage>>,
    ) -> Result<Self> {
        let store = RegistryStore::new(config.dir.clone());
        let registry = store.load_registry()?.into_shared();
        let credentials = store.load_credentials()?.into_shared();
        let resolver = PermissionResolver::new(storage.clone()).with_fallback(config.fallback);
        Ok(Self {
            config,
            storage,
            pg,
            store,
            registry,
            credentials,
            resolver,
        })
    }

    /// Build from parts already in hand. Used by tests.
    pub fn from_parts(
        config: TestmasterConfig,
        storage: Arc<dyn Storage>,
        registry: ModelRegistry,
        credentials: Credentials,
    ) -> Self {
        let resolver = PermissionResolver::new(storage.clone()).with_fallback(config.fallback);
        Self {
            store: RegistryStore::new(config.dir.clone()),
            registry: registry.into_shared(),
            credentials: credentials.into_shared(),
            config,
            storage,
            pg: None,
            resolver,
        }
    }

    /// An executor over the shared registry whose in-flight calls are
    /// cancelled by Ctrl+C.
    pub fn executor(&self) -> GenerationExecutor {
        let token = CancellationToken::new();
        let on_signal = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_signal.cancel();
            }
        });
        GenerationExecutor::new(
            self.registry.clone(),
            self.credentials.clone(),
            Arc::new(ProviderRouter::new()),
        )
        .with_timeout(self.config.ai_timeout)
        .with_cancellation(token)
    }

    /// Resolve the acting user's access, creating their profile on first use.
    pub async fn access(&self) -> Result<Access> {
        let user_id = self.config.require_user()?;
        if let Err(e) = self.storage.provision_user(user_id, None).await {
            tracing::warn!(%user_id, error = %e, "failed to provision user profile");
        }
        Ok(self.resolver.resolve(user_id).await)
    }

    /// The acting user's access, failing unless they hold `permission`.
    pub async fn require(&self, permission: Permission) -> Result<Access> {
        let access = self.access().await?;
        require(&access, permission)?;
        Ok(access)
    }

    pub async fn require_admin(&self) -> Result<Access> {
        let access = self.access().await?;
        if !access.is_admin() {
            return Err(AccessError::Denied(Permission::ManageUsers))
                .context("administrator role required");
        }
        Ok(access)
    }

    pub async fn save_registry(&self) -> Result<()> {
        let registry = self.registry.read().await;
        self.store.save_registry(&registry)
    }

    pub async fn save_credentials(&self) -> Result<()> {
        let credentials = self.credentials.read().await;
        self.store.save_credentials(&credentials)
    }

    pub async fn close(self) {
        if let Some(pg) = self.pg {
            pg.pool().close().await;
        }
    }
}

/// Parse a record id given on the command line.
pub fn parse_id(what: &str, input: &str) -> Result<Uuid> {
    Uuid::parse_str(input.trim()).with_context(|| format!("invalid {what} ID: {input:?}"))
}

/// Ask the operator to confirm deleting `target`. With `assume_yes` the
/// prompt is skipped.
pub fn confirm_delete(
    target: DeleteTarget,
    label: &str,
    assume_yes: bool,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }

    let mut confirmation = DeleteConfirmation::default();
    confirmation.arm(target, std::time::Instant::now());
    write!(output, "Delete {} {label:?} ({})? [y/N] ", target.kind, target.id)?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    if !matches!(answer.trim(), "y" | "Y" | "yes") {
        confirmation.cancel();
        return Ok(false);
    }
    match confirmation.confirm(&target, std::time::Instant::now()) {
        Ok(_) => Ok(true),
        Err(e) => bail!("{e}"),
    }
}
