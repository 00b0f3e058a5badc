use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_cors_origins, parse_environment,
    parse_optional_limit, parse_u16, parse_u32, parse_u64,
};
use super::types::{
    ApiSettings, ConfigError, CorsSettings, DatabaseSettings, EngineSettings, RedisSettings,
    RuntimeSettings, ServerHost, ServerPort, ServerSettings, Settings, TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("EXAMFLOW_HOST", "0.0.0.0");
        let port = env_or_default("EXAMFLOW_PORT", "8000");

        let environment = parse_environment(
            env_optional("EXAMFLOW_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config =
            env_optional("EXAMFLOW_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Examflow API");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "examflow");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "examflow");
        let database_url = env_optional("DATABASE_URL");
        let max_connections = parse_u32(
            "DATABASE_MAX_CONNECTIONS",
            env_or_default("DATABASE_MAX_CONNECTIONS", "30"),
        )?;

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let tick_interval_ms = parse_u64(
            "ENGINE_TICK_INTERVAL_MS",
            env_or_default("ENGINE_TICK_INTERVAL_MS", "1000"),
        )?;
        let session_retention_minutes = parse_u64(
            "ENGINE_SESSION_RETENTION_MINUTES",
            env_or_default("ENGINE_SESSION_RETENTION_MINUTES", "120"),
        )?;
        let eviction_interval_seconds = parse_u64(
            "ENGINE_EVICTION_INTERVAL_SECONDS",
            env_or_default("ENGINE_EVICTION_INTERVAL_SECONDS", "300"),
        )?;
        let default_max_violations = parse_optional_limit(
            "ENGINE_DEFAULT_MAX_VIOLATIONS",
            env_optional("ENGINE_DEFAULT_MAX_VIOLATIONS"),
        )?;
        let pending_retry_interval_seconds = parse_u64(
            "ENGINE_PENDING_RETRY_INTERVAL_SECONDS",
            env_or_default("ENGINE_PENDING_RETRY_INTERVAL_SECONDS", "30"),
        )?;
        let pending_retry_batch = parse_u64(
            "ENGINE_PENDING_RETRY_BATCH",
            env_or_default("ENGINE_PENDING_RETRY_BATCH", "50"),
        )?;

        let log_level = env_or_default("EXAMFLOW_LOG_LEVEL", "info");
        let json =
            env_optional("EXAMFLOW_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
                max_connections,
            },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            engine: EngineSettings {
                tick_interval_ms,
                session_retention_minutes,
                eviction_interval_seconds,
                default_max_violations,
                pending_retry_interval_seconds,
                pending_retry_batch,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn engine(&self) -> &EngineSettings {
        &self.engine
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.tick_interval_ms == 0 || self.engine.tick_interval_ms > 1000 {
            return Err(ConfigError::InvalidValue {
                field: "ENGINE_TICK_INTERVAL_MS",
                value: self.engine.tick_interval_ms.to_string(),
            });
        }

        if self.engine.pending_retry_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ENGINE_PENDING_RETRY_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.engine.eviction_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ENGINE_EVICTION_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "DATABASE_MAX_CONNECTIONS",
                value: "0".to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }

        Ok(())
    }
}
