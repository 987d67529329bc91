//! Logical vs. physical topic names
//!
//! Services speak in logical topic names; the broker sees names qualified
//! by an optional shared-cluster prefix and the environment discriminator,
//! so several environments can coexist on one cluster.

#[derive(Debug, Clone, Default)]
pub struct TopicNamer {
    prefix: String,
    environment: String,
}

impl TopicNamer {
    pub fn new(prefix: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            environment: environment.into(),
        }
    }

    /// `prefix + environment + "." + logical`. Identity when both are empty.
    pub fn normalize(&self, logical: &str) -> String {
        if self.environment.is_empty() {
            format!("{}{}", self.prefix, logical)
        } else {
            format!("{}{}.{}", self.prefix, self.environment, logical)
        }
    }

    /// Strip the same prefix/environment segment back off a physical name,
    /// for display and logging. Names that don't carry the qualifier pass
    /// through unchanged.
    pub fn strip(&self, physical: &str) -> String {
        let unprefixed = physical.strip_prefix(&self.prefix).unwrap_or(physical);
        if self.environment.is_empty() {
            return unprefixed.to_string();
        }
        let env_segment = format!("{}.", self.environment);
        unprefixed
            .strip_prefix(&env_segment)
            .unwrap_or(unprefixed)
            .to_string()
    }
}
