//! Tenant table and resolution (§3, §4.12, §6).
//!
//! The tenant table is built once at boot from a directory of YAML
//! documents (one per tenant) and is immutable afterwards — the only
//! process-wide state besides the two backends' connection pools (§5).

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One tenant's routing and glossary (§3, §6). `short_name` is the key
/// callers use to address a tenant; it is unique process-wide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub short_name: String,
    pub display_name: String,
    pub document_root: PathBuf,
    pub lexical_index_name: String,
    pub vector_collection_prefix: String,
    #[serde(default)]
    pub glossary: HashMap<String, String>,
    #[serde(default)]
    pub transcript_corrections: HashMap<String, String>,
    #[serde(default)]
    pub ext_filter: Vec<String>,
    #[serde(default)]
    pub system_prompt_extra: Option<String>,
}

/// Raw on-disk shape (§6 "Tenant configuration format") — field names
/// match the external document exactly before being folded into `Tenant`.
#[derive(Debug, Clone, Deserialize)]
struct TenantDoc {
    name: String,
    short_name: String,
    document_root: PathBuf,
    es_index: String,
    chroma_prefix: String,
    #[serde(default)]
    system_prompt_extra: Option<String>,
    #[serde(default)]
    glossary: HashMap<String, String>,
    #[serde(default)]
    transcript_corrections: HashMap<String, String>,
    #[serde(default)]
    ext_filter: Vec<String>,
}

impl From<TenantDoc> for Tenant {
    fn from(doc: TenantDoc) -> Self {
        Self {
            short_name: doc.short_name,
            display_name: doc.name,
            document_root: doc.document_root,
            lexical_index_name: doc.es_index,
            vector_collection_prefix: doc.chroma_prefix,
            glossary: doc.glossary,
            transcript_corrections: doc.transcript_corrections,
            ext_filter: doc.ext_filter,
            system_prompt_extra: doc.system_prompt_extra,
        }
    }
}

/// The process-wide tenant table (§5 "process-wide state is limited to
/// the tenant table"). Construction is the only place `FatalConfig`
/// (§7) can originate.
pub struct TenantManager {
    tenants: HashMap<String, Tenant>,
    active: String,
}

impl TenantManager {
    /// Loads every `*.yaml`/`*.yml` file in `dir` as a tenant document.
    /// Fails fast (`FatalConfig`, §7) on a missing directory, a
    /// malformed document, or a duplicate `short_name`.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            bail!("tenant config directory does not exist: {}", dir.display());
        }
        let mut tenants = HashMap::new();
        let mut entries: Vec<_> = std::fs::read_dir(dir)
            .with_context(|| format!("reading tenant config dir {}", dir.display()))?
            .filter_map(|e| e.ok())
            .filter(|e| {
                matches!(
                    e.path().extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        entries.sort_by_key(|e| e.path());

        for entry in entries {
            let content = std::fs::read_to_string(entry.path())
                .with_context(|| format!("reading tenant file {}", entry.path().display()))?;
            let doc: TenantDoc = serde_yaml::from_str(&content)
                .with_context(|| format!("parsing tenant file {}", entry.path().display()))?;
            let tenant: Tenant = doc.into();
            if tenants.contains_key(&tenant.short_name) {
                bail!("duplicate tenant short_name: {}", tenant.short_name);
            }
            tenants.insert(tenant.short_name.clone(), tenant);
        }

        if tenants.is_empty() {
            bail!("no tenant configuration found in {}", dir.display());
        }

        let active = Self::resolve_boot_tenant(&tenants);
        Ok(Self { tenants, active })
    }

    /// Builds a table from tenants supplied directly (tests, embedding
    /// the server without a config directory).
    pub fn from_tenants(tenants: Vec<Tenant>) -> Result<Self> {
        let mut map = HashMap::new();
        for t in tenants {
            if map.contains_key(&t.short_name) {
                bail!("duplicate tenant short_name: {}", t.short_name);
            }
            map.insert(t.short_name.clone(), t);
        }
        if map.is_empty() {
            bail!("no tenants supplied");
        }
        let active = Self::resolve_boot_tenant(&map);
        Ok(Self { tenants: map, active })
    }

    /// "The active tenant at boot is the value of an environment
    /// variable if present and known, else the first tenant by sorted
    /// `short_name`" (§6).
    fn resolve_boot_tenant(tenants: &HashMap<String, Tenant>) -> String {
        if let Ok(env_name) = std::env::var("ACTIVE_TENANT") {
            if tenants.contains_key(&env_name) {
                return env_name;
            }
        }
        let mut names: Vec<&String> = tenants.keys().collect();
        names.sort();
        names[0].clone()
    }

    pub fn get(&self, short_name: &str) -> Option<&Tenant> {
        self.tenants.get(short_name)
    }

    pub fn active(&self) -> &Tenant {
        self.tenants.get(&self.active).expect("active tenant always present")
    }

    /// Tenant resolution on a request, in precedence order (§4.12):
    /// `X-Tenant-ID` header → process-wide active tenant. The
    /// environment-variable fallback already folded into `active` at
    /// boot, so only the header needs to be layered on here.
    pub fn resolve<'a>(&'a self, header_tenant_id: Option<&str>) -> &'a Tenant {
        if let Some(id) = header_tenant_id {
            if let Some(t) = self.tenants.get(id) {
                return t;
            }
        }
        self.active()
    }

    /// Every configured tenant, sorted by `short_name` for deterministic
    /// iteration (CLI batch operations that sweep "all tenants").
    pub fn all(&self) -> Vec<&Tenant> {
        let mut out: Vec<&Tenant> = self.tenants.values().collect();
        out.sort_by(|a, b| a.short_name.cmp(&b.short_name));
        out
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(short_name: &str) -> Tenant {
        Tenant {
            short_name: short_name.to_string(),
            display_name: short_name.to_string(),
            document_root: PathBuf::from("/tmp"),
            lexical_index_name: format!("{short_name}-idx"),
            vector_collection_prefix: format!("{short_name}-vec"),
            glossary: HashMap::new(),
            transcript_corrections: HashMap::new(),
            ext_filter: Vec::new(),
            system_prompt_extra: None,
        }
    }

    #[test]
    fn active_tenant_is_resolvable_without_header() {
        std::env::remove_var("ACTIVE_TENANT");
        let mgr = TenantManager::from_tenants(vec![tenant("zzz"), tenant("aaa")]).unwrap();
        assert_eq!(mgr.active().short_name, "aaa");
    }

    #[test]
    fn header_overrides_active_tenant() {
        let mgr = TenantManager::from_tenants(vec![tenant("a"), tenant("b")]).unwrap();
        assert_eq!(mgr.resolve(Some("b")).short_name, "b");
        assert_eq!(mgr.resolve(Some("unknown")).short_name, mgr.active().short_name);
        assert_eq!(mgr.resolve(None).short_name, mgr.active().short_name);
    }

    #[test]
    fn duplicate_short_name_is_rejected() {
        let err = TenantManager::from_tenants(vec![tenant("dup"), tenant("dup")]);
        assert!(err.is_err());
    }
}
