//! Repository enumeration and credential verification

use anyhow::{Context, Result};
use serde::Deserialize;

use bbarchive_core::{ApiClient, Auth, CancelToken, FetchError, RetryPolicy};

use crate::locator::{Locator, Params};

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectRef {
    pub key: String,
    #[serde(default)]
    pub name: String,
}

/// Subset of the repository object used for listings
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryInfo {
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub scm: String,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub project: Option<ProjectRef>,
    #[serde(default)]
    pub updated_on: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    values: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

/// Mercurial repositories of `owner`, following pagination, optionally
/// restricted to one project key.
pub fn list_repositories(
    client: &mut ApiClient,
    api_base: &str,
    owner: &str,
    project_key: Option<&str>,
) -> Result<Vec<RepositoryInfo>> {
    let mut params = Params::new();
    params.insert("q".into(), vec![r#"scm="hg""#.into()]);
    params.insert("pagelen".into(), vec!["100".into()]);
    let mut next = Some(Locator::new(format!("repositories/{owner}"), params).to_url(api_base));

    let mut repos = Vec::new();
    while let Some(url) = next.take() {
        let response = client
            .get(&url)
            .with_context(|| format!("Failed to list repositories of {owner}"))?;
        anyhow::ensure!(
            response.is_success(),
            "Listing repositories of {owner} failed: HTTP {}",
            response.status
        );
        let page: Page<RepositoryInfo> = serde_json::from_str(&response.body)
            .with_context(|| format!("Unexpected repository listing from {url}"))?;
        repos.extend(page.values.into_iter().filter(|r| match project_key {
            Some(key) => r.project.as_ref().is_some_and(|p| p.key == key),
            None => true,
        }));
        next = page.next;
    }
    Ok(repos)
}

#[derive(Debug, Deserialize)]
struct User {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

/// Check one credential with `GET user`. `Ok(None)` means rejected.
pub fn verify_credential(client: &mut ApiClient, api_base: &str) -> Result<Option<String>, FetchError> {
    let response = match client.get(&format!("{api_base}user")) {
        Ok(r) => r,
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) => {
            log::debug!("credential check failed: {e}");
            return Ok(None);
        }
    };
    if !response.is_success() {
        log::debug!("credential check returned HTTP {}", response.status);
        return Ok(None);
    }
    let who = serde_json::from_str::<User>(&response.body)
        .ok()
        .and_then(|u| u.username.or(u.display_name))
        .unwrap_or_else(|| "unknown user".to_string());
    Ok(Some(who))
}

/// Keep only the credentials the API accepts. Anonymous access is not checked.
pub fn verify_credentials(
    credentials: &[Auth],
    api_base: &str,
    retry: RetryPolicy,
    cancel: &CancelToken,
) -> Result<Vec<Auth>, FetchError> {
    let mut valid = Vec::with_capacity(credentials.len());
    for (index, auth) in credentials.iter().enumerate() {
        if matches!(auth, Auth::Anonymous) {
            valid.push(auth.clone());
            continue;
        }
        let mut client = ApiClient::new(auth.clone(), cancel.clone()).with_retry_policy(retry);
        match verify_credential(&mut client, api_base)? {
            Some(who) => {
                log::info!("Credential {index} authenticated as {who}");
                valid.push(auth.clone());
            }
            None => log::error!("Credential {index} ({auth:?}) rejected, not used"),
        }
    }
    Ok(valid)
}
