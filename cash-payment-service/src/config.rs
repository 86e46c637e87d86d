use clap::ValueEnum;
use std::time::Duration as StdDuration;

use crate::code::{CodeGenerator, MAX_CODE_WIDTH};

/// What `create-reservation` does when the user already has an active one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResubmitPolicy {
    /// Hand back the existing reservation unchanged.
    ReturnExisting,
    /// Fail with `ActiveReservationExists`.
    Reject,
}

/// Who may call `issue-code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CodeIssuers {
    /// Cashier/admin approves the request and issues the code.
    AdminOnly,
    /// The owning customer may also obtain a code directly.
    SelfService,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub code_ttl: chrono::Duration,
    pub code_width: u32,
    pub allow_leading_zero: bool,
    pub code_max_attempts: u32,
    pub resubmit_policy: ResubmitPolicy,
    pub code_issuers: CodeIssuers,
    pub allow_regenerate: bool,
    pub sweep_interval: Option<StdDuration>,
    pub pending_max_age: Option<chrono::Duration>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            code_ttl: chrono::Duration::minutes(10),
            code_width: 6,
            allow_leading_zero: false,
            code_max_attempts: 16,
            resubmit_policy: ResubmitPolicy::ReturnExisting,
            code_issuers: CodeIssuers::AdminOnly,
            allow_regenerate: true,
            sweep_interval: Some(StdDuration::from_secs(60)),
            pending_max_age: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("code width must be between 1 and 9, got {0}")]
    CodeWidth(u32),
    #[error("code TTL must be positive")]
    CodeTtl,
    #[error("code generation needs at least one attempt")]
    CodeAttempts,
    #[error("pending max age must be positive")]
    PendingMaxAge,
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.code_width == 0 || self.code_width > MAX_CODE_WIDTH {
            return Err(ConfigError::CodeWidth(self.code_width));
        }
        if self.code_ttl <= chrono::Duration::zero() {
            return Err(ConfigError::CodeTtl);
        }
        if self.code_max_attempts == 0 {
            return Err(ConfigError::CodeAttempts);
        }
        if self
            .pending_max_age
            .map_or(false, |age| age <= chrono::Duration::zero())
        {
            return Err(ConfigError::PendingMaxAge);
        }
        Ok(())
    }

    pub fn code_generator(&self) -> CodeGenerator {
        CodeGenerator::new(self.code_width, self.allow_leading_zero, self.code_max_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ServiceConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.code_generator().space(), 900_000);
    }

    #[test]
    fn out_of_range_width_is_rejected() {
        let config = ServiceConfig {
            code_width: 10,
            ..ServiceConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::CodeWidth(10)));
    }

    #[test]
    fn zero_ttl_and_attempts_are_rejected() {
        let config = ServiceConfig {
            code_ttl: chrono::Duration::zero(),
            ..ServiceConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::CodeTtl));

        let config = ServiceConfig {
            code_max_attempts: 0,
            ..ServiceConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::CodeAttempts));
    }
}
