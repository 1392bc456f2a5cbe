use anyhow::{Context, Result};

/// Process configuration, loaded once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,

    /// Table backing the `drafts` collection named in the spec.
    pub draft_collection: String,
    /// Table backing the `followups` collection named in the spec.
    pub followup_collection: String,

    pub mail_writer_url: Option<String>,
    pub crm_url: Option<String>,
    pub crm_secret: Option<String>,

    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,

            draft_collection: std::env::var("DRAFT_COLLECTION")
                .unwrap_or_else(|_| "email_drafts".to_string()),
            followup_collection: std::env::var("FOLLOWUP_COLLECTION")
                .unwrap_or_else(|_| "email_followups".to_string()),

            mail_writer_url: std::env::var("MAIL_WRITER_URL").ok(),
            crm_url: std::env::var("CRM_URL").ok(),
            crm_secret: std::env::var("CRM_SECRET").ok(),

            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid port number")?,
        })
    }
}
