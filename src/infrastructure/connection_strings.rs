use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

const ENV_PREFIX: &str = "CONNECTIONSTRINGS__";

/// Looks up the connection string for a named schema owner.
#[async_trait]
pub trait ConnectionStringResolver: Send + Sync {
    /// `None` (or an empty string) means the owner is not deployed here.
    async fn resolve(&self, tenant_id: Option<Uuid>, name: &str) -> Option<String>;
}

/// Host connection strings plus optional per-tenant overrides.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredConnectionStrings {
    host: HashMap<String, String>,
    tenants: HashMap<Uuid, HashMap<String, String>>,
}

impl ConfiguredConnectionStrings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.host.insert(name.into(), value.into());
        self
    }

    pub fn with_tenant(
        mut self,
        tenant_id: Uuid,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.tenants
            .entry(tenant_id)
            .or_default()
            .insert(name.into(), value.into());
        self
    }

    /// Reads `CONNECTIONSTRINGS__<NAME>` (host) and
    /// `CONNECTIONSTRINGS__<TENANT_UUID>__<NAME>` (tenant override) pairs.
    /// Names are matched case-insensitively.
    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut strings = Self::new();
        for (key, value) in vars {
            let upper = key.to_ascii_uppercase();
            let Some(rest) = upper.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match rest.split_once("__") {
                Some((tenant, name)) => {
                    if let Ok(tenant_id) = Uuid::parse_str(tenant) {
                        strings = strings.with_tenant(tenant_id, name.to_ascii_lowercase(), value);
                    }
                }
                None => strings = strings.with(rest.to_ascii_lowercase(), value),
            }
        }
        strings
    }

    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Blank entries count as absent, so a blank tenant override falls back
    /// to the host string.
    fn lookup(&self, tenant_id: Option<Uuid>, name: &str) -> Option<&str> {
        fn find<'a>(map: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
            map.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.trim())
                .filter(|v| !v.is_empty())
        }

        tenant_id
            .and_then(|id| self.tenants.get(&id))
            .and_then(|map| find(map, name))
            .or_else(|| find(&self.host, name))
    }
}

#[async_trait]
impl ConnectionStringResolver for ConfiguredConnectionStrings {
    async fn resolve(&self, tenant_id: Option<Uuid>, name: &str) -> Option<String> {
        self.lookup(tenant_id, name).map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tenant_override_falls_back_to_host() {
        let tenant = Uuid::new_v4();
        let strings = ConfiguredConnectionStrings::new()
            .with("Catalog", "postgres://db/catalog")
            .with("Ordering", "postgres://db/ordering")
            .with_tenant(tenant, "Catalog", "postgres://tenant-db/catalog");

        assert_eq!(
            strings.resolve(Some(tenant), "catalog").await.as_deref(),
            Some("postgres://tenant-db/catalog")
        );
        assert_eq!(
            strings.resolve(Some(tenant), "Ordering").await.as_deref(),
            Some("postgres://db/ordering")
        );
        assert_eq!(
            strings.resolve(None, "Catalog").await.as_deref(),
            Some("postgres://db/catalog")
        );
    }

    #[tokio::test]
    async fn blank_values_resolve_to_none() {
        let strings = ConfiguredConnectionStrings::new().with("Basket", "   ");
        assert!(strings.resolve(None, "Basket").await.is_none());
        assert!(strings.resolve(None, "Payment").await.is_none());
    }

    #[tokio::test]
    async fn blank_tenant_override_falls_back_to_host() {
        let tenant = Uuid::new_v4();
        let strings = ConfiguredConnectionStrings::new()
            .with("Catalog", "postgres://db/catalog")
            .with_tenant(tenant, "Catalog", "  ");

        assert_eq!(
            strings.resolve(Some(tenant), "Catalog").await.as_deref(),
            Some("postgres://db/catalog")
        );
    }

    #[tokio::test]
    async fn parses_environment_style_pairs() {
        let tenant = Uuid::new_v4();
        let strings = ConfiguredConnectionStrings::from_vars(vec![
            ("CONNECTIONSTRINGS__CATALOG".to_string(), "postgres://h/catalog".to_string()),
            (
                format!("ConnectionStrings__{}__Catalog", tenant),
                "postgres://t/catalog".to_string(),
            ),
            ("PATH".to_string(), "/usr/bin".to_string()),
        ]);

        assert_eq!(
            strings.resolve(None, "Catalog").await.as_deref(),
            Some("postgres://h/catalog")
        );
        assert_eq!(
            strings.resolve(Some(tenant), "Catalog").await.as_deref(),
            Some("postgres://t/catalog")
        );
    }
}
