use super::FetchError;

/// Derive the snapshot identifier from a repository locator.
///
/// The identifier is the last non-empty path segment with any trailing `/` and `.git`
/// suffix removed, so `https://github.com/owner/tool.git` and `/srv/git/tool/` both map
/// to `tool`. URLs, scp-style remotes (`git@host:owner/tool.git`) and local paths are
/// accepted.
///
/// # Errors
///
/// Returns `FetchError::InvalidLocator` when no usable name can be derived or the name
/// contains characters outside `[A-Za-z0-9._-]`.
pub fn repository_id(locator: &str) -> Result<String, FetchError> {
    let trimmed = locator.trim();
    if trimmed.is_empty() {
        return Err(invalid(locator, "locator is empty"));
    }

    let last = match url::Url::parse(trimmed) {
        Ok(parsed) if parsed.has_host() || parsed.scheme() == "file" => parsed
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
            .map(str::to_owned),
        _ => trimmed
            .split(['/', '\\', ':'])
            .rfind(|s| !s.is_empty())
            .map(str::to_owned),
    };
    let Some(last) = last else {
        return Err(invalid(locator, "locator has no path"));
    };

    let name = last.strip_suffix(".git").unwrap_or(&last);
    if name.is_empty() || name == "." || name == ".." {
        return Err(invalid(locator, "locator does not name a repository"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(invalid(locator, "repository name contains unsupported characters"));
    }
    Ok(name.to_owned())
}

fn invalid(locator: &str, reason: &'static str) -> FetchError {
    FetchError::InvalidLocator {
        locator: locator.to_owned(),
        reason,
    }
}
