use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Which storage engine backs slots and appointments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    Supabase,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in_memory" => Ok(StorageBackend::Memory),
            "supabase" | "postgrest" => Ok(StorageBackend::Supabase),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub storage_backend: StorageBackend,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_key: String,
    pub practitioner_id: Option<Uuid>,
    pub clinic_timezone: String,
    pub booking_horizon_days: u32,
    pub storage_timeout_ms: u64,
    pub slot_catalog_path: Option<String>,
    pub enable_maintenance_scheduler: bool,
    pub server_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_backend: StorageBackend::Memory,
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_service_key: String::new(),
            practitioner_id: None,
            clinic_timezone: "Asia/Kolkata".to_string(),
            booking_horizon_days: 7,
            storage_timeout_ms: 5_000,
            slot_catalog_path: None,
            enable_maintenance_scheduler: true,
            server_port: 3000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            storage_backend: parse_var("STORAGE_BACKEND", defaults.storage_backend),
            supabase_url: env::var("SUPABASE_URL").unwrap_or_else(|_| {
                warn!("SUPABASE_URL not set, using empty value");
                String::new()
            }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY").unwrap_or_else(|_| {
                warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                String::new()
            }),
            supabase_service_key: env::var("SUPABASE_SERVICE_KEY").unwrap_or_default(),
            practitioner_id: env::var("PRACTITIONER_ID")
                .ok()
                .and_then(|raw| match Uuid::parse_str(raw.trim()) {
                    Ok(id) => Some(id),
                    Err(_) => {
                        warn!("PRACTITIONER_ID '{}' is not a UUID, falling back to role lookup", raw);
                        None
                    }
                }),
            clinic_timezone: env::var("CLINIC_TIMEZONE").unwrap_or(defaults.clinic_timezone),
            booking_horizon_days: parse_var("BOOKING_HORIZON_DAYS", defaults.booking_horizon_days),
            storage_timeout_ms: parse_var("STORAGE_TIMEOUT_MS", defaults.storage_timeout_ms),
            slot_catalog_path: env::var("SLOT_CATALOG_PATH").ok().filter(|p| !p.is_empty()),
            enable_maintenance_scheduler: parse_var(
                "ENABLE_MAINTENANCE_SCHEDULER",
                defaults.enable_maintenance_scheduler,
            ),
            server_port: parse_var("SERVER_PORT", defaults.server_port),
        };

        if config.storage_backend == StorageBackend::Supabase && !config.is_supabase_configured() {
            warn!("Supabase storage selected but SUPABASE_URL / keys are missing");
        }

        config
    }

    pub fn is_supabase_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }

    /// Key sent to PostgREST; the service key wins when present.
    pub fn supabase_api_key(&self) -> &str {
        if self.supabase_service_key.is_empty() {
            &self.supabase_anon_key
        } else {
            &self.supabase_service_key
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {:?}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}
