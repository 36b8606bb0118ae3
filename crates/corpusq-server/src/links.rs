//! Clickable source links (§11.3): `display_path` strips the tenant's
//! document root prefix; `local_url` routes through `/open` rather than a
//! raw `file://` URL, since the latter would leak the server's absolute
//! filesystem layout into client-rendered links without mediation.

use corpusq_core::{Source, Tenant};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

/// Rewrites `display_path`/`local_url` on every source in place, given the
/// tenant the request was served for and the host the server is reachable
/// at (as the client sees it). `source.path` is the tenant-relative
/// virtual path the indexer assigns (§4.1); it's resolved against
/// `tenant.document_root` before being handed to `/open`, which expects
/// an absolute, canonicalizable path to containment-check (`PathBuf::join`
/// is a no-op here if `source.path` already happens to be absolute).
pub fn enrich_sources(mut sources: Vec<Source>, tenant: &Tenant, bind_host: &str) -> Vec<Source> {
    let root = tenant.document_root.to_string_lossy().to_string();
    for source in &mut sources {
        source.display_path = strip_root(&source.path, &root);
        let absolute = tenant.document_root.join(&source.path);
        let encoded = utf8_percent_encode(&absolute.to_string_lossy(), NON_ALPHANUMERIC).to_string();
        source.local_url = Some(format!("http://{bind_host}/open?path={encoded}"));
    }
    sources
}

fn strip_root(path: &str, root: &str) -> String {
    let root_with_sep = if root.ends_with('/') { root.to_string() } else { format!("{root}/") };
    path.strip_prefix(&root_with_sep).unwrap_or(path).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn strip_root_removes_document_root_prefix() {
        assert_eq!(strip_root("/data/tenant/reports/a.pdf", "/data/tenant"), "reports/a.pdf");
    }

    #[test]
    fn strip_root_is_a_no_op_when_path_is_not_under_root() {
        assert_eq!(strip_root("/other/a.pdf", "/data/tenant"), "/other/a.pdf");
    }

    fn tenant(root: &str) -> Tenant {
        Tenant {
            short_name: "t1".to_string(),
            display_name: "Tenant One".to_string(),
            document_root: root.into(),
            lexical_index_name: "t1-idx".to_string(),
            vector_collection_prefix: "t1-vec".to_string(),
            glossary: HashMap::new(),
            transcript_corrections: HashMap::new(),
            ext_filter: Vec::new(),
            system_prompt_extra: None,
        }
    }

    #[test]
    fn local_url_resolves_a_relative_virtual_path_against_document_root() {
        let sources = vec![Source { n: 1, path: "reports/a.pdf".to_string(), display_path: String::new(), local_url: None, finding_count: 0 }];
        let enriched = enrich_sources(sources, &tenant("/data/tenant"), "localhost:8787");
        assert_eq!(enriched[0].display_path, "reports/a.pdf");
        assert_eq!(enriched[0].local_url.as_deref().unwrap(), "http://localhost:8787/open?path=%2Fdata%2Ftenant%2Freports%2Fa%2Epdf");
    }

    #[test]
    fn local_url_leaves_an_already_absolute_path_untouched() {
        let sources = vec![Source { n: 1, path: "/data/tenant/reports/a.pdf".to_string(), display_path: String::new(), local_url: None, finding_count: 0 }];
        let enriched = enrich_sources(sources, &tenant("/data/tenant"), "localhost:8787");
        assert_eq!(enriched[0].display_path, "reports/a.pdf");
        assert_eq!(enriched[0].local_url.as_deref().unwrap(), "http://localhost:8787/open?path=%2Fdata%2Ftenant%2Freports%2Fa%2Epdf");
    }
}
