//! Addressing mode resolution
//!
//! The mode is chosen once from [`LedgerConfig`] and fixes the call shape of
//! `add`/`run` for the lifetime of a ledger instance.

use crate::{LedgerConfig, LedgerError, LedgerKey, ServiceKey};

/// Where the service key of a keyed mode comes from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServiceKeySource {
    /// Fixed at construction
    Static(ServiceKey),
    /// Supplied with every call
    Injected,
}

/// Storage layout selected for a ledger instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddressingMode {
    /// One record per ledger key, stored as a scalar
    Plain,
    /// One record per hash field
    Keyed(ServiceKeySource),
    /// An ordered list of records per hash field
    KeyedMultiple(ServiceKeySource),
}

/// Storage slot addressed by one call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Address {
    /// The whole value at `key` (a scalar record in plain mode)
    Key { key: LedgerKey },
    /// Single record in hash field `service_key` of `key`
    Field { key: LedgerKey, service_key: ServiceKey },
    /// Record list in hash field `service_key` of `key`
    FieldList { key: LedgerKey, service_key: ServiceKey },
}

impl Address {
    /// The ledger key
    pub fn key(&self) -> &LedgerKey {
        match self {
            Self::Key { key } | Self::Field { key, .. } | Self::FieldList { key, .. } => key,
        }
    }

    /// The service key, for hash-field addresses
    pub fn service_key(&self) -> Option<&ServiceKey> {
        match self {
            Self::Key { .. } => None,
            Self::Field { service_key, .. } | Self::FieldList { service_key, .. } => Some(service_key),
        }
    }
}

impl AddressingMode {
    /// Select the mode for `config`.
    ///
    /// `inject_id` takes precedence over a static `id`. `multiple` has no
    /// effect without a service key.
    pub fn resolve(config: &LedgerConfig) -> Self {
        let source = if config.inject_id {
            ServiceKeySource::Injected
        } else if let Some(id) = config.id.as_deref().filter(|id| !id.is_empty()) {
            ServiceKeySource::Static(ServiceKey::new(id))
        } else {
            if config.multiple {
                tracing::warn!("multiple mode requested without a service key; using plain addressing");
            }
            return Self::Plain;
        };

        if config.multiple {
            Self::KeyedMultiple(source)
        } else {
            Self::Keyed(source)
        }
    }

    /// Short name used in logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Keyed(ServiceKeySource::Static(_)) => "keyed",
            Self::Keyed(ServiceKeySource::Injected) => "keyed (injected)",
            Self::KeyedMultiple(ServiceKeySource::Static(_)) => "keyed-multiple",
            Self::KeyedMultiple(ServiceKeySource::Injected) => "keyed-multiple (injected)",
        }
    }

    /// Whether this mode stores a list per field
    pub fn is_multiple(&self) -> bool {
        matches!(self, Self::KeyedMultiple(_))
    }

    /// Whether calls must supply a service key
    pub fn requires_service_key(&self) -> bool {
        matches!(
            self,
            Self::Keyed(ServiceKeySource::Injected) | Self::KeyedMultiple(ServiceKeySource::Injected)
        )
    }

    /// Resolve the slot addressed by an `add` or `run` call
    pub fn address(&self, key: &str, service_key: Option<&str>) -> Result<Address, LedgerError> {
        let key = LedgerKey::new(key);
        let (source, multiple) = match self {
            Self::Plain => {
                return match service_key {
                    None => Ok(Address::Key { key }),
                    Some(_) => Err(self.shape_error("service key given but none is configured")),
                }
            }
            Self::Keyed(source) => (source, false),
            Self::KeyedMultiple(source) => (source, true),
        };

        let service_key = match (source, service_key) {
            (ServiceKeySource::Static(id), None) => id.clone(),
            (ServiceKeySource::Static(_), Some(_)) => {
                return Err(self.shape_error("service key is fixed at construction"))
            }
            (ServiceKeySource::Injected, Some(id)) if !id.is_empty() => ServiceKey::new(id),
            (ServiceKeySource::Injected, _) => {
                return Err(self.shape_error("a service key must be supplied with each call"))
            }
        };

        Ok(if multiple {
            Address::FieldList { key, service_key }
        } else {
            Address::Field { key, service_key }
        })
    }

    fn shape_error(&self, reason: &'static str) -> LedgerError {
        LedgerError::CallShape {
            mode: self.name(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_modes() {
        assert_eq!(AddressingMode::resolve(&LedgerConfig::new()), AddressingMode::Plain);
        assert_eq!(
            AddressingMode::resolve(&LedgerConfig::new().with_multiple(true)),
            AddressingMode::Plain
        );
        assert_eq!(
            AddressingMode::resolve(&LedgerConfig::new().with_id("svc")),
            AddressingMode::Keyed(ServiceKeySource::Static("svc".into()))
        );
        assert_eq!(
            AddressingMode::resolve(&LedgerConfig::new().with_id("svc").with_multiple(true)),
            AddressingMode::KeyedMultiple(ServiceKeySource::Static("svc".into()))
        );
        // injection wins over a static id
        assert_eq!(
            AddressingMode::resolve(&LedgerConfig::new().with_id("svc").with_inject_id(true)),
            AddressingMode::Keyed(ServiceKeySource::Injected)
        );
        assert_eq!(
            AddressingMode::resolve(&LedgerConfig::new().with_inject_id(true).with_multiple(true)),
            AddressingMode::KeyedMultiple(ServiceKeySource::Injected)
        );
    }

    #[test]
    fn test_plain_address() {
        let mode = AddressingMode::Plain;
        assert_eq!(
            mode.address("wf1", None).unwrap(),
            Address::Key { key: "wf1".into() }
        );
        assert!(matches!(
            mode.address("wf1", Some("svc")),
            Err(LedgerError::CallShape { mode: "plain", .. })
        ));
    }

    #[test]
    fn test_static_address() {
        let mode = AddressingMode::KeyedMultiple(ServiceKeySource::Static("svc".into()));
        let address = mode.address("wf1", None).unwrap();
        assert_eq!(
            address,
            Address::FieldList {
                key: "wf1".into(),
                service_key: "svc".into()
            }
        );
        assert_eq!(address.service_key().map(ServiceKey::as_str), Some("svc"));
        assert!(mode.address("wf1", Some("other")).is_err());
    }

    #[test]
    fn test_injected_address() {
        let mode = AddressingMode::Keyed(ServiceKeySource::Injected);
        assert!(mode.requires_service_key());
        assert_eq!(
            mode.address("wf2", Some("svcA")).unwrap(),
            Address::Field {
                key: "wf2".into(),
                service_key: "svcA".into()
            }
        );
        assert!(mode.address("wf2", None).is_err());
        assert!(mode.address("wf2", Some("")).is_err());
    }
}
