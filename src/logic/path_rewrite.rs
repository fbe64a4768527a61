use std::collections::HashMap;

use crate::model::{HttpMethod, LoadedMigration, PathRewrite};

/// Match a concrete request path against a route template.
///
/// Templates and paths are compared segment by segment; a `{param}` segment
/// captures exactly one nonempty path segment. Returns the captured params,
/// or None when the path does not fit the template.
pub fn match_path_pattern(template: &str, path: &str) -> Option<HashMap<String, String>> {
    let template_segments: Vec<&str> = template.split('/').collect();
    let path_segments: Vec<&str> = path.split('/').collect();
    if template_segments.len() != path_segments.len() {
        return None;
    }

    let mut params = HashMap::new();
    for (template_segment, path_segment) in template_segments.iter().zip(&path_segments) {
        if let Some(name) = template_segment
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
        {
            if path_segment.is_empty() {
                return None;
            }
            params.insert(name.to_string(), path_segment.to_string());
        } else if template_segment != path_segment {
            return None;
        }
    }
    Some(params)
}

/// Substitute captured params into a route template. Params missing from the
/// map leave their placeholder literal; extra params are ignored.
pub fn build_path(template: &str, params: &HashMap<String, String>) -> String {
    template
        .split('/')
        .map(|segment| {
            segment
                .strip_prefix('{')
                .and_then(|s| s.strip_suffix('}'))
                .and_then(|name| params.get(name))
                .map(String::as_str)
                .unwrap_or(segment)
        })
        .collect::<Vec<&str>>()
        .join("/")
}

/// Apply an ordered list of path rewrites to a concrete request path.
/// Rewrites chain: the output of one is matched against the next, so a path
/// renamed across several versions ends up at its newest template.
pub fn rewrite_path(path: &str, method: HttpMethod, rewrites: &[PathRewrite]) -> String {
    let mut current = path.to_string();
    for rewrite in rewrites {
        if !rewrite.applies_to(method) {
            continue;
        }
        if let Some(params) = match_path_pattern(&rewrite.old_path, &current) {
            current = build_path(&rewrite.new_path, &params);
        }
    }
    current
}

/// Collect the path rewrites needed to upgrade a request from `from_version`
/// to `to_version`, in migration order. Empty for equal versions, the
/// downgrade direction, or versions absent from the chain: responses travel
/// back through content transforms alone, never through URL changes.
pub fn get_path_rewrites_for_upgrade(
    migrations: &[LoadedMigration],
    from_version: &str,
    to_version: &str,
) -> Vec<PathRewrite> {
    if from_version == to_version {
        return Vec::new();
    }
    let from_idx = migrations.iter().position(|m| m.to_version == from_version);
    let to_idx = migrations.iter().position(|m| m.to_version == to_version);
    let (Some(from_idx), Some(to_idx)) = (from_idx, to_idx) else {
        return Vec::new();
    };
    if from_idx >= to_idx {
        return Vec::new();
    }

    migrations[from_idx + 1..=to_idx]
        .iter()
        .filter_map(|m| m.data_migrations.as_ref())
        .flat_map(|set| set.path_rewrites.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataMigrationSet, VersionDelta};

    fn make_migration(
        sequence: u32,
        from_version: Option<&str>,
        to_version: &str,
        path_rewrites: Vec<PathRewrite>,
    ) -> LoadedMigration {
        let data_migrations = if path_rewrites.is_empty() {
            None
        } else {
            Some(DataMigrationSet {
                path_rewrites,
                ..Default::default()
            })
        };
        LoadedMigration {
            sequence,
            slug: format!("m{}", sequence),
            dependencies: vec![],
            from_version: from_version.map(String::from),
            to_version: to_version.to_string(),
            delta: VersionDelta::default(),
            data_migrations,
        }
    }

    #[test]
    fn test_simple_match() {
        assert_eq!(match_path_pattern("/users", "/users"), Some(HashMap::new()));
    }

    #[test]
    fn test_single_param() {
        let params = match_path_pattern("/users/{id}", "/users/123").unwrap();
        assert_eq!(params["id"], "123");
    }

    #[test]
    fn test_multiple_params() {
        let params =
            match_path_pattern("/users/{user_id}/posts/{post_id}", "/users/1/posts/42").unwrap();
        assert_eq!(params["user_id"], "1");
        assert_eq!(params["post_id"], "42");
    }

    #[test]
    fn test_no_match_different_path() {
        assert!(match_path_pattern("/users/{id}", "/posts/123").is_none());
    }

    #[test]
    fn test_no_match_extra_segments() {
        assert!(match_path_pattern("/users/{id}", "/users/123/extra").is_none());
    }

    #[test]
    fn test_no_match_missing_segments() {
        assert!(match_path_pattern("/users/{id}/posts", "/users/123").is_none());
    }

    #[test]
    fn test_param_with_special_chars() {
        let params = match_path_pattern("/files/{path}", "/files/my-file_v2.txt").unwrap();
        assert_eq!(params["path"], "my-file_v2.txt");
    }

    #[test]
    fn test_build_simple_path() {
        assert_eq!(build_path("/users", &HashMap::new()), "/users");
    }

    #[test]
    fn test_build_single_param() {
        let params = HashMap::from([("id".to_string(), "123".to_string())]);
        assert_eq!(build_path("/people/{id}", &params), "/people/123");
    }

    #[test]
    fn test_build_multiple_params() {
        let params = HashMap::from([
            ("user_id".to_string(), "1".to_string()),
            ("post_id".to_string(), "42".to_string()),
        ]);
        assert_eq!(
            build_path("/users/{user_id}/posts/{post_id}", &params),
            "/users/1/posts/42"
        );
    }

    #[test]
    fn test_build_extra_params_ignored() {
        let params = HashMap::from([
            ("id".to_string(), "123".to_string()),
            ("extra".to_string(), "ignored".to_string()),
        ]);
        assert_eq!(build_path("/users/{id}", &params), "/users/123");
    }

    #[test]
    fn test_build_missing_param_left_as_placeholder() {
        assert_eq!(build_path("/users/{id}", &HashMap::new()), "/users/{id}");
    }

    #[test]
    fn test_rewrite_no_rewrites() {
        assert_eq!(rewrite_path("/users/123", HttpMethod::Get, &[]), "/users/123");
    }

    #[test]
    fn test_simple_rewrite() {
        let rewrites = vec![PathRewrite::new("/persons/{id}", "/people/{id}")];
        assert_eq!(
            rewrite_path("/persons/123", HttpMethod::Get, &rewrites),
            "/people/123"
        );
    }

    #[test]
    fn test_rewrite_no_match_returns_original() {
        let rewrites = vec![PathRewrite::new("/persons/{id}", "/people/{id}")];
        assert_eq!(
            rewrite_path("/users/123", HttpMethod::Get, &rewrites),
            "/users/123"
        );
    }

    #[test]
    fn test_rewrite_method_filter() {
        let rewrites = vec![PathRewrite::with_methods(
            "/persons/{id}",
            "/people/{id}",
            vec![HttpMethod::Get, HttpMethod::Put],
        )];
        assert_eq!(
            rewrite_path("/persons/123", HttpMethod::Get, &rewrites),
            "/people/123"
        );

        let post_only = vec![PathRewrite::with_methods(
            "/persons/{id}",
            "/people/{id}",
            vec![HttpMethod::Post],
        )];
        assert_eq!(
            rewrite_path("/persons/123", HttpMethod::Get, &post_only),
            "/persons/123"
        );
    }

    #[test]
    fn test_chained_rewrites() {
        let rewrites = vec![
            PathRewrite::new("/persons/{id}", "/people/{id}"),
            PathRewrite::new("/people/{id}", "/users/{id}"),
        ];
        assert_eq!(
            rewrite_path("/persons/123", HttpMethod::Get, &rewrites),
            "/users/123"
        );
    }

    #[test]
    fn test_param_rename_leaves_placeholder() {
        // the match extracts user_id=123, but the new template names the
        // segment {id}, which stays a literal placeholder
        let rewrites = vec![PathRewrite::new("/users/{user_id}", "/users/{id}")];
        assert_eq!(
            rewrite_path("/users/123", HttpMethod::Get, &rewrites),
            "/users/{id}"
        );
    }

    #[test]
    fn test_upgrade_same_version_returns_empty() {
        let migrations = vec![make_migration(1, None, "v1", vec![])];
        assert!(get_path_rewrites_for_upgrade(&migrations, "v1", "v1").is_empty());
    }

    #[test]
    fn test_upgrade_no_rewrites_defined() {
        let migrations = vec![
            make_migration(1, None, "v1", vec![]),
            make_migration(2, Some("v1"), "v2", vec![]),
        ];
        assert!(get_path_rewrites_for_upgrade(&migrations, "v1", "v2").is_empty());
    }

    #[test]
    fn test_upgrade_collects_rewrites() {
        let migrations = vec![
            make_migration(1, None, "v1", vec![]),
            make_migration(
                2,
                Some("v1"),
                "v2",
                vec![PathRewrite::new("/persons/{id}", "/people/{id}")],
            ),
        ];
        let rewrites = get_path_rewrites_for_upgrade(&migrations, "v1", "v2");
        assert_eq!(rewrites.len(), 1);
        assert_eq!(rewrites[0].old_path, "/persons/{id}");
    }

    #[test]
    fn test_upgrade_collects_across_multiple_versions() {
        let migrations = vec![
            make_migration(1, None, "v1", vec![]),
            make_migration(
                2,
                Some("v1"),
                "v2",
                vec![PathRewrite::new("/persons/{id}", "/people/{id}")],
            ),
            make_migration(
                3,
                Some("v2"),
                "v3",
                vec![PathRewrite::new("/people/{id}", "/users/{id}")],
            ),
        ];
        let rewrites = get_path_rewrites_for_upgrade(&migrations, "v1", "v3");
        assert_eq!(rewrites.len(), 2);
        assert_eq!(rewrites[0].old_path, "/persons/{id}");
        assert_eq!(rewrites[1].old_path, "/people/{id}");
    }

    #[test]
    fn test_downgrade_direction_returns_empty() {
        let migrations = vec![
            make_migration(1, None, "v1", vec![]),
            make_migration(
                2,
                Some("v1"),
                "v2",
                vec![PathRewrite::new("/persons/{id}", "/people/{id}")],
            ),
        ];
        assert!(get_path_rewrites_for_upgrade(&migrations, "v2", "v1").is_empty());
    }

    #[test]
    fn test_unknown_version_returns_empty() {
        let migrations = vec![make_migration(1, None, "v1", vec![])];
        assert!(get_path_rewrites_for_upgrade(&migrations, "v1", "v99").is_empty());
    }
}
