use crate::{
    config::Config,
    crypto::password::{Argon2Hasher, CredentialHasher},
    db,
    error::Result,
    notify::{LogNotifier, Notifier},
    services::{audit::AuditRecorder, security::SecurityGate},
};
use deadpool_postgres::Pool;
use std::sync::Arc;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Pool,
    pub config: Config,
    pub gate: Arc<SecurityGate>,
    pub audit: AuditRecorder,
    pub notifier: Arc<dyn Notifier>,
    pub hasher: Arc<dyn CredentialHasher>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let db = db::create_pool(&config.database_url)?;
        let audit = AuditRecorder::new(db.clone(), config.audit_enabled, config.audit_retention_days);

        Ok(AppState {
            db,
            config,
            gate: Arc::new(SecurityGate::new()),
            audit,
            notifier: Arc::new(LogNotifier),
            hasher: Arc::new(Argon2Hasher),
        })
    }
}
