//! Logical filesystem paths
//!
//! Paths are opaque keys: no directory entities exist on the server, so
//! normalization is purely textual (strip leading/trailing slashes,
//! collapse doubled slashes).

/// Normalize a logical path: strip leading/trailing `/`, collapse `//`.
#[must_use]
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.trim_matches('/').chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    out
}

/// The basename (final path segment) of a normalized path.
#[must_use]
pub fn basename(path: &str) -> &str {
    normalize_basename_slice(path)
}

fn normalize_basename_slice(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Direct child path segments one level below `prefix`, derived from a
/// flat set of full paths.
///
/// For example, given `["a/b.txt", "a/c/d.txt", "e.txt"]` and prefix
/// `""`, yields `["a", "e.txt"]`; for prefix `"a"`, yields `["b.txt",
/// "c"]`.
#[must_use]
pub fn listdir<'a, I>(prefix: &str, paths: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let prefix = normalize(prefix);
    let mut children = std::collections::BTreeSet::new();

    for path in paths {
        let path = normalize(path);
        let rest = if prefix.is_empty() {
            path.as_str()
        } else if let Some(stripped) = path
            .strip_prefix(&prefix)
            .and_then(|s| s.strip_prefix('/'))
        {
            stripped
        } else {
            continue;
        };

        if rest.is_empty() {
            continue;
        }

        let child = rest.split('/').next().unwrap_or(rest);
        children.insert(child.to_string());
    }

    children.into_iter().collect()
}
