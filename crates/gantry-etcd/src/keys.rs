use gantry_common::ResourceKind;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    #[error("key '{0}' is outside the gateway prefix")]
    OutsidePrefix(String),

    #[error("key '{0}' does not have exactly 3 segments")]
    Malformed(String),

    #[error("key '{key}' has unknown resource segment '{segment}'")]
    UnknownType { key: String, segment: String },

    #[error("prefix '{0}' is neither the gateway prefix nor one resource segment under it")]
    NotAResourcePrefix(String),
}

/// Splits `{prefix}/{segment}/{id}` into its kind and id.
///
/// `prefix` must be normalized (no trailing slash).
pub fn parse_resource_key(prefix: &str, key: &str) -> Result<(ResourceKind, String), KeyError> {
    let rest = key
        .strip_prefix(prefix)
        .ok_or_else(|| KeyError::OutsidePrefix(key.to_string()))?;
    let segments: Vec<&str> = rest.split('/').collect();
    if segments.len() != 3 || !segments[0].is_empty() || segments[2].is_empty() {
        return Err(KeyError::Malformed(key.to_string()));
    }
    let kind = ResourceKind::from_etcd_segment(segments[1]).ok_or_else(|| KeyError::UnknownType {
        key: key.to_string(),
        segment: segments[1].to_string(),
    })?;
    Ok((kind, segments[2].to_string()))
}

/// Kinds whose keys a listing of `requested` observes under `base`.
///
/// Only `base` itself (every kind) and `{base}/{segment}` (that kind) are
/// accepted; a partial or deeper path would list a subset of some kind.
pub fn covered_kinds(base: &str, requested: &str) -> Result<Vec<ResourceKind>, KeyError> {
    let requested = requested.trim_end_matches('/');
    let rest = requested
        .strip_prefix(base)
        .ok_or_else(|| KeyError::OutsidePrefix(requested.to_string()))?;
    if rest.is_empty() {
        return Ok(ResourceKind::ALL.to_vec());
    }
    let segment = rest
        .strip_prefix('/')
        .filter(|segment| !segment.is_empty() && !segment.contains('/'))
        .ok_or_else(|| KeyError::NotAResourcePrefix(requested.to_string()))?;
    ResourceKind::from_etcd_segment(segment)
        .map(|kind| vec![kind])
        .ok_or_else(|| KeyError::UnknownType {
            key: requested.to_string(),
            segment: segment.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resource_key() {
        assert_eq!(
            parse_resource_key("/apisix", "/apisix/routes/r1"),
            Ok((ResourceKind::Route, "r1".to_string()))
        );
        assert_eq!(
            parse_resource_key("/apisix", "/apisix/plugin_metadata/limit-count"),
            Ok((ResourceKind::PluginMetadata, "limit-count".to_string()))
        );
    }

    #[test]
    fn test_malformed_keys() {
        assert!(matches!(
            parse_resource_key("/apisix", "/apisix/routes"),
            Err(KeyError::Malformed(_))
        ));
        assert!(matches!(
            parse_resource_key("/apisix", "/apisix/routes/a/b"),
            Err(KeyError::Malformed(_))
        ));
        assert!(matches!(
            parse_resource_key("/apisix", "/apisix/routes/"),
            Err(KeyError::Malformed(_))
        ));
        assert!(matches!(
            parse_resource_key("/apisix", "/apisix/data_plane/server_info/x"),
            Err(KeyError::Malformed(_))
        ));
        assert!(matches!(
            parse_resource_key("/apisix", "/apisix/secrets/vault"),
            Err(KeyError::UnknownType { .. })
        ));
        assert!(matches!(
            parse_resource_key("/apisix", "/other/routes/r1"),
            Err(KeyError::OutsidePrefix(_))
        ));
    }

    #[test]
    fn test_covered_kinds() {
        assert_eq!(
            covered_kinds("/apisix", "/apisix/").unwrap().len(),
            ResourceKind::ALL.len()
        );
        assert_eq!(
            covered_kinds("/apisix", "/apisix/upstreams"),
            Ok(vec![ResourceKind::Upstream])
        );
        assert_eq!(
            covered_kinds("/apisix", "/apisix/plugin_configs/"),
            Ok(vec![ResourceKind::PluginConfig])
        );
    }

    #[test]
    fn test_covered_kinds_match_whole_segments() {
        assert!(matches!(
            covered_kinds("/apisix", "/apisix/route"),
            Err(KeyError::UnknownType { .. })
        ));
        assert!(matches!(
            covered_kinds("/apisix", "/apisix/routes/r1"),
            Err(KeyError::NotAResourcePrefix(_))
        ));
        assert!(matches!(
            covered_kinds("/apisix", "/apisixx"),
            Err(KeyError::NotAResourcePrefix(_))
        ));
        assert!(matches!(
            covered_kinds("/apisix", "/other/routes"),
            Err(KeyError::OutsidePrefix(_))
        ));
    }
}
