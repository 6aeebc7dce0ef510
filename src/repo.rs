//! Repository descriptors.

use tracing::info;

use crate::error::Error;
use crate::model::{paths, Contributor, RepoDescriptor};
use crate::store::{OverwritePolicy, Stores};
use crate::timestamp::Timestamp;

/// Registers a new repository; fails if the name is taken.
pub async fn create_repo(
    name: &str,
    description: &str,
    contributor: Contributor,
    stores: &Stores,
) -> Result<RepoDescriptor, Error> {
    if name.is_empty() || name.contains('/') {
        return Err(Error::InvalidPath(format!("invalid repo name {name:?}")));
    }
    let repo = RepoDescriptor {
        name: name.to_owned(),
        description: description.to_owned(),
        timestamp: Timestamp::now()?,
        contributor,
    };
    stores
        .metadata
        .put_yaml(&paths::repo(name), &repo, OverwritePolicy::NoOverwrite)
        .await?;
    info!(repo = name, "repo created");
    Ok(repo)
}

pub async fn get_repo(name: &str, stores: &Stores) -> Result<RepoDescriptor, Error> {
    match stores.metadata.get_yaml(&paths::repo(name)).await {
        Err(err) if err.is_not_found() => Err(Error::RepoNotFound {
            repo: name.to_owned(),
        }),
        result => result,
    }
}

pub async fn repo_exists(name: &str, stores: &Stores) -> Result<(), Error> {
    if stores.metadata.has(&paths::repo(name)).await? {
        Ok(())
    } else {
        Err(Error::RepoNotFound {
            repo: name.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get() {
        let stores = Stores::in_memory();
        assert!(matches!(
            repo_exists("r", &stores).await,
            Err(Error::RepoNotFound { .. })
        ));

        let created = create_repo("r", "test data", Contributor::new("ann", "ann@example.com"), &stores)
            .await
            .unwrap();
        repo_exists("r", &stores).await.unwrap();
        assert_eq!(get_repo("r", &stores).await.unwrap(), created);

        let again = create_repo("r", "", Contributor::default(), &stores).await;
        assert!(again.unwrap_err().is_already_exists());
    }

    #[tokio::test]
    async fn rejects_names_that_break_the_layout() {
        let stores = Stores::in_memory();
        assert!(create_repo("a/b", "", Contributor::default(), &stores).await.is_err());
        assert!(matches!(
            get_repo("missing", &stores).await,
            Err(Error::RepoNotFound { .. })
        ));
    }
}
