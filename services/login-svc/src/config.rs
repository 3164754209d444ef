use std::net::{IpAddr, SocketAddr};

use common_auth::CredentialPair;
use common_config::{override_list, override_parsed, override_string, ServiceConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoginSvcConfig {
    pub bind_address: String,
    pub port: u16,
    /// The single username/password pair accepted by `/api/login`.
    pub credentials: CredentialPair,
    pub cors: CorsSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsSettings {
    /// Origins allowed to call the API. `*` allows any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for LoginSvcConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            credentials: CredentialPair::default(),
            cors: CorsSettings::default(),
        }
    }
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
        }
    }
}

impl CorsSettings {
    pub fn allows_any(&self) -> bool {
        self.allowed_origins.iter().any(|origin| origin == "*")
    }
}

impl LoginSvcConfig {
    /// `bind_address` is a bare IPv4 or IPv6 address, without brackets.
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        let ip: IpAddr = self.bind_address.parse()?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl ServiceConfig for LoginSvcConfig {
    const PREFIX: &'static str = "LOGIN_SVC_";

    fn apply_environment_overrides(&mut self, prefix: &str) {
        override_string(&mut self.bind_address, prefix, "BIND_ADDRESS");
        override_parsed(&mut self.port, prefix, "PORT");
        override_string(&mut self.credentials.username, prefix, "USERNAME");
        override_string(&mut self.credentials.password, prefix, "PASSWORD");
        override_list(&mut self.cors.allowed_origins, prefix, "CORS_ALLOWED_ORIGINS");
    }
}
