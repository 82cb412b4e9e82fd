use crate::config::types::{
    Config, DiscoveryConfig, EngineConfig, OutputConfig, ParserConfig, ResourceConfig,
    SourceConfig, UserAgentConfig,
};
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_engine_config(&config.engine)?;
    validate_resource_config(&config.resources)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    validate_sources(&config.sources)?;
    Ok(())
}

/// Validates engine configuration
fn validate_engine_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 256 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 256, got {}",
            config.concurrency
        )));
    }

    if config.per_host_concurrency < 1 {
        return Err(ConfigError::Validation(format!(
            "per_host_concurrency must be >= 1, got {}",
            config.per_host_concurrency
        )));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.write_batch_size < 1 {
        return Err(ConfigError::Validation(
            "write_batch_size must be >= 1".to_string(),
        ));
    }

    if config.fast_concurrency_multiplier < 1 {
        return Err(ConfigError::Validation(
            "fast_concurrency_multiplier must be >= 1".to_string(),
        ));
    }

    if config.progress_interval < 1 {
        return Err(ConfigError::Validation(
            "progress_interval must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates resource ceilings
fn validate_resource_config(config: &ResourceConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("cpu_ceiling", config.cpu_ceiling),
        ("memory_ceiling", config.memory_ceiling),
    ] {
        if !(value > 0.0 && value <= 100.0) {
            return Err(ConfigError::Validation(format!(
                "{} must be within (0, 100], got {}",
                name, value
            )));
        }
    }

    if config.enabled && config.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "poll_interval_ms must be > 0 when resource limits are enabled".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Basic shape check: one `@` with a dotted domain after it
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.contains('@')
        }
        None => false,
    };

    if !valid {
        return Err(ConfigError::Validation(format!(
            "Invalid contact_email: '{}'",
            email
        )));
    }
    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates all sources and their name uniqueness
fn validate_sources(sources: &[SourceConfig]) -> Result<(), ConfigError> {
    if sources.is_empty() {
        return Err(ConfigError::Validation(
            "At least one [[source]] must be configured".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for source in sources {
        if !names.insert(source.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate source name '{}'",
                source.name
            )));
        }
        validate_source(source)?;
    }

    Ok(())
}

/// Validates one source
fn validate_source(source: &SourceConfig) -> Result<(), ConfigError> {
    if source.name.is_empty()
        || !source
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "Source name must be non-empty ASCII alphanumerics, '_' or '-', got '{}'",
            source.name
        )));
    }

    match (&source.url_template, source.seeds.is_empty()) {
        (Some(_), false) => {
            return Err(ConfigError::Validation(format!(
                "Source '{}' must set either url-template or seeds, not both",
                source.name
            )))
        }
        (None, true) => {
            return Err(ConfigError::Validation(format!(
                "Source '{}' must set url-template or seeds",
                source.name
            )))
        }
        _ => {}
    }

    source.template().map_err(|e| {
        ConfigError::InvalidUrl(format!("Source '{}': {}", source.name, e))
    })?;

    for seed in &source.seeds {
        let url = Url::parse(seed).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "Seed URL '{}' must use HTTP or HTTPS",
                seed
            )));
        }
    }

    if let Some(end) = source.end_id {
        if end < source.start_id {
            return Err(ConfigError::Validation(format!(
                "Source '{}': end-id {} is before start-id {}",
                source.name, end, source.start_id
            )));
        }
    }

    if !source.seeds.is_empty() && source.discovery.is_none() {
        return Err(ConfigError::Validation(format!(
            "Source '{}' has seeds but no [source.discovery] selectors",
            source.name
        )));
    }

    if !source.validation_rules().accepted_content_types.contains(&source.content_type) {
        return Err(ConfigError::Validation(format!(
            "Source '{}': content-type '{}' is not among accepted-content-types",
            source.name, source.content_type
        )));
    }

    if source.absence_markers.iter().any(|m| m.trim().is_empty()) {
        return Err(ConfigError::Validation(format!(
            "Source '{}': absence markers cannot be empty",
            source.name
        )));
    }

    validate_parser_config(&source.parser)?;
    if let Some(discovery) = &source.discovery {
        validate_discovery_config(discovery)?;
    }

    Ok(())
}

fn validate_parser_config(config: &ParserConfig) -> Result<(), ConfigError> {
    if config.title_selectors.is_empty() || config.body_selectors.is_empty() {
        return Err(ConfigError::Validation(
            "parser needs at least one title selector and one body selector".to_string(),
        ));
    }

    config
        .title_selectors
        .iter()
        .chain(&config.body_selectors)
        .chain(&config.strip_selectors)
        .chain(config.metadata.values())
        .try_for_each(|s| validate_selector(s))
}

fn validate_discovery_config(config: &DiscoveryConfig) -> Result<(), ConfigError> {
    validate_selector(&config.item_selector)?;
    if let Some(more) = &config.more_selector {
        validate_selector(more)?;
    }
    Ok(())
}

fn validate_selector(selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidSelector {
            selector: selector.to_string(),
            message: e.to_string(),
        })
}
