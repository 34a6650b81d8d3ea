//! Configuration validation. Violations are aggregated rather than
//! fail-fast, so a single run surfaces every offending field at once —
//! the same aggregation discipline `TLSManager::RenewCertificates` uses
//! for per-domain renewal errors.
use url::Url;

use super::models::{AppConfig, RateLimitBy};
use crate::errors::ProxyError;

#[derive(Debug, Default)]
pub struct ValidationErrors {
    pub violations: Vec<String>,
}

impl ValidationErrors {
    fn push(&mut self, message: impl Into<String>) {
        self.violations.push(message.into());
    }

    fn into_result(self) -> Result<(), ProxyError> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(ProxyError::config_validation(self.violations.join("; ")))
        }
    }
}

pub fn validate(config: &AppConfig) -> Result<(), ProxyError> {
    let mut errors = ValidationErrors::default();

    validate_server(config, &mut errors);
    validate_tls(config, &mut errors);
    validate_backends(config, &mut errors);
    validate_health(config, &mut errors);
    validate_ratelimit(config, &mut errors);

    errors.into_result()
}

fn validate_server(config: &AppConfig, errors: &mut ValidationErrors) {
    if config.server.host.trim().is_empty() {
        errors.push("server.host must not be empty");
    }
    if config.server.port == 0 {
        errors.push("server.port must be a non-zero port number");
    }
    if config.tls.enabled && config.server.https_port == 0 {
        errors.push("server.https_port must be a non-zero port number when tls.enabled");
    }
    if config.server.port == config.server.https_port && config.tls.enabled {
        errors.push("server.port and server.https_port must differ");
    }
}

fn validate_tls(config: &AppConfig, errors: &mut ValidationErrors) {
    if !config.tls.enabled {
        return;
    }
    if config.tls.auto_cert {
        if config.tls.email.trim().is_empty() {
            errors.push("tls.email is required when tls.auto_cert is enabled");
        } else if !config.tls.email.contains('@') {
            errors.push("tls.email does not look like an email address");
        }
        if config.tls.domains.is_empty() {
            errors.push("tls.domains must list at least one domain when tls.auto_cert is enabled");
        }
    }
    for domain in &config.tls.domains {
        if domain.trim().is_empty() || !domain.contains('.') {
            errors.push(format!("tls.domains contains an invalid domain: '{domain}'"));
        }
    }
    if config.tls.cache_dir.trim().is_empty() {
        errors.push("tls.cache_dir must not be empty");
    }
}

fn validate_backends(config: &AppConfig, errors: &mut ValidationErrors) {
    if config.backends.routes.is_empty() {
        errors.push("backends.routes must configure at least one host");
    }
    for (host, route) in &config.backends.routes {
        if host.trim().is_empty() {
            errors.push("backends.routes contains an empty host key");
        }
        match Url::parse(&route.url) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    errors.push(format!(
                        "backends.routes['{host}'].url must use http or https, got '{}'",
                        url.scheme()
                    ));
                }
                if url.host_str().is_none() {
                    errors.push(format!("backends.routes['{host}'].url is missing a host"));
                }
            }
            Err(_) => errors.push(format!(
                "backends.routes['{host}'].url is not a valid URL: '{}'",
                route.url
            )),
        }
        if route.max_idle_per_host == 0 {
            errors.push(format!(
                "backends.routes['{host}'].max_idle_per_host must be greater than zero"
            ));
        }
        if route.max_idle_conns < route.max_idle_per_host {
            errors.push(format!(
                "backends.routes['{host}'].max_idle_conns must be >= max_idle_per_host"
            ));
        }
    }
}

fn validate_health(config: &AppConfig, errors: &mut ValidationErrors) {
    let health = &config.health;
    if health.enabled {
        if health.interval_secs == 0 {
            errors.push("health.interval_secs must be greater than zero");
        }
        if health.timeout_secs == 0 {
            errors.push("health.timeout_secs must be greater than zero");
        }
        if health.timeout_secs > health.interval_secs {
            errors.push("health.timeout_secs must not exceed health.interval_secs");
        }
        if health.unhealthy_threshold == 0 {
            errors.push("health.unhealthy_threshold must be greater than zero");
        }
        if health.healthy_threshold == 0 {
            errors.push("health.healthy_threshold must be greater than zero");
        }
        if !health.path.starts_with('/') {
            errors.push("health.path must start with '/'");
        }
    }
}

fn validate_ratelimit(config: &AppConfig, errors: &mut ValidationErrors) {
    let rl = &config.ratelimit;
    if !rl.enabled {
        return;
    }
    if rl.requests_per_second == 0 {
        errors.push("ratelimit.requests_per_second must be greater than zero");
    }
    if rl.burst_size == 0 {
        errors.push("ratelimit.burst_size must be greater than zero");
    }
    if rl.cleanup_interval_secs == 0 {
        errors.push("ratelimit.cleanup_interval_secs must be greater than zero");
    }
    if matches!(rl.by, RateLimitBy::Header) && rl.header_name.as_deref().unwrap_or("").is_empty() {
        errors.push("ratelimit.header_name is required when ratelimit.by is 'header'");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::RouteConfig;

    fn base_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.backends.routes.insert(
            "api.example.com".to_string(),
            RouteConfig {
                url: "http://127.0.0.1:18080".to_string(),
                ..RouteConfig::default()
            },
        );
        config
    }

    #[test]
    fn valid_config_passes() {
        assert!(validate(&base_config()).is_ok());
    }

    #[test]
    fn missing_routes_is_rejected() {
        let config = AppConfig::default();
        let err = validate(&config).unwrap_err();
        assert!(err.message.contains("at least one host"));
    }

    #[test]
    fn multiple_violations_are_aggregated() {
        let mut config = base_config();
        config.server.port = 0;
        config.health.interval_secs = 0;
        let err = validate(&config).unwrap_err();
        assert!(err.message.contains("server.port"));
        assert!(err.message.contains("health.interval_secs"));
    }

    #[test]
    fn tls_auto_cert_requires_email_and_domains() {
        let mut config = base_config();
        config.tls.enabled = true;
        config.tls.auto_cert = true;
        let err = validate(&config).unwrap_err();
        assert!(err.message.contains("tls.email"));
        assert!(err.message.contains("tls.domains"));
    }

    #[test]
    fn header_rate_limit_requires_header_name() {
        let mut config = base_config();
        config.ratelimit.enabled = true;
        config.ratelimit.by = RateLimitBy::Header;
        let err = validate(&config).unwrap_err();
        assert!(err.message.contains("header_name"));
    }
}
