use super::RequestsLoggingLevel;

#[derive(Clone)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
    /// Compared against the `x-key` header on admin routes.
    pub admin_key: String,
    /// `None` disables download throttling.
    pub download_bytes_per_second: Option<f64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            port: 3000,
            admin_key: String::new(),
            download_bytes_per_second: None,
        }
    }
}
