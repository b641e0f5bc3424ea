//! Configuration validation traits and utilities

use crate::error::{ConfigError, ConfigResult};

/// Trait for validatable configuration
pub trait Validatable {
    /// Validate the configuration
    fn validate(&self) -> ConfigResult<()>;

    /// Get the domain name for error reporting
    fn domain_name(&self) -> &'static str;

    /// Helper to create a domain-specific validation error
    fn validation_error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::DomainError {
            domain: self.domain_name().to_string(),
            message: message.into(),
        }
    }
}

/// Validate a positive number
pub fn validate_positive<T>(value: T, field_name: &str, domain: &str) -> ConfigResult<()>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value <= T::default() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} must be greater than 0, got {}", field_name, value),
        });
    }
    Ok(())
}

/// Validate that a value lies in `min..=max`
pub fn validate_range<T>(
    value: T,
    min: T,
    max: T,
    field_name: &str,
    domain: &str,
) -> ConfigResult<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min || value > max {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!(
                "{} must be between {} and {}, got {}",
                field_name, min, max, value
            ),
        });
    }
    Ok(())
}

/// Validate a complete configuration object
pub fn validate_config(config: &crate::domains::FanfoldConfig) -> ConfigResult<()> {
    config.transport.validate()?;
    config.pool.validate()?;
    config.map_reduce.validate()?;
    config.logging.validate()?;

    if config.pool.worker_count > num_cpus::get() * 4 {
        log::warn!(
            "pool.worker_count {} is far above the {} available CPUs",
            config.pool.worker_count,
            num_cpus::get()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_positive() {
        assert!(validate_positive(1usize, "workers", "pool").is_ok());
        let err = validate_positive(0usize, "workers", "pool").unwrap_err();
        assert!(err.to_string().contains("workers must be greater than 0"));
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range(5, 1, 10, "n", "test").is_ok());
        assert!(validate_range(1, 1, 10, "n", "test").is_ok());
        assert!(validate_range(10, 1, 10, "n", "test").is_ok());
        assert!(validate_range(0, 1, 10, "n", "test").is_err());
        assert!(validate_range(11, 1, 10, "n", "test").is_err());
    }
}
