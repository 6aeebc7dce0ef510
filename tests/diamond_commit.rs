mod util;

use diamond_store::prelude::*;
use util::{done_split, entry, names, new_diamond, settings, stores_with_repo, REPO};

async fn commit_two_versions(mode: ConflictMode) -> (Stores, Diamond, Result<BundleDescriptor, Error>) {
    let stores = stores_with_repo().await;
    let settings = settings();
    let mut diamond = new_diamond(&stores, &settings, mode).await;
    let id = diamond.descriptor().diamond_id.clone();
    done_split(&stores, &settings, &id, "A", vec![entry("a.txt", "h1", 1), entry("x.txt", "hx", 1)]).await;
    done_split(&stores, &settings, &id, "B", vec![entry("a.txt", "h2", 2), entry("y.txt", "hy", 1)]).await;
    let committed = diamond.commit().await;
    (stores, diamond, committed)
}

#[tokio::test]
async fn later_version_wins() {
    let cases = [
        (ConflictMode::IgnoreConflicts, vec!["a.txt", "x.txt", "y.txt"], false, false),
        (
            ConflictMode::EnableConflicts,
            vec![".conflicts/A/a.txt", "a.txt", "x.txt", "y.txt"],
            true,
            false,
        ),
        (
            ConflictMode::EnableCheckpoints,
            vec![".checkpoints/A/a.txt", "a.txt", "x.txt", "y.txt"],
            false,
            true,
        ),
    ];
    for (mode, expected, has_conflicts, has_checkpoints) in cases {
        let (stores, diamond, committed) = commit_two_versions(mode).await;
        let bundle = committed.expect("commit");
        let entries = bundle_entries(REPO, &bundle, &stores, &settings())
            .await
            .expect("read bundle");
        assert_eq!(names(&entries), expected, "{mode}");

        let winner = entries
            .iter()
            .find(|entry| entry.name_with_path == "a.txt")
            .unwrap();
        assert_eq!(winner.hash, "h2");
        assert!(entries.iter().all(|entry| entry.timestamp.is_none()), "{mode}");

        let done = get_diamond(REPO, &diamond.descriptor().diamond_id, &stores)
            .await
            .unwrap();
        assert_eq!(done.has_conflicts, has_conflicts, "{mode}");
        assert_eq!(done.has_checkpoints, has_checkpoints, "{mode}");
        assert_eq!(diamond.descriptor(), &done);
    }
}

#[tokio::test]
async fn forbidden_conflict_publishes_nothing() {
    let (stores, mut diamond, committed) = commit_two_versions(ConflictMode::ForbidConflicts).await;
    assert!(matches!(
        committed,
        Err(Error::ForbiddenConflict { entry }) if entry == "a.txt"
    ));
    assert_eq!(diamond.descriptor().state, DiamondState::Initialized);
    let id = diamond.descriptor().diamond_id.clone();
    assert_eq!(
        get_diamond(REPO, &id, &stores).await.unwrap().state,
        DiamondState::Initialized
    );

    diamond.cancel().await.expect("cancel after failed commit");
}

#[tokio::test]
async fn same_content_is_not_a_conflict() {
    let stores = stores_with_repo().await;
    let settings = settings();
    let mut diamond = new_diamond(&stores, &settings, ConflictMode::ForbidConflicts).await;
    let id = diamond.descriptor().diamond_id.clone();
    done_split(&stores, &settings, &id, "A", vec![entry("a.txt", "same", 1)]).await;
    done_split(&stores, &settings, &id, "B", vec![entry("a.txt", "same", 5)]).await;

    let bundle = diamond.commit().await.expect("commit");
    let entries = bundle_entries(REPO, &bundle, &stores, &settings).await.unwrap();
    assert_eq!(names(&entries), vec!["a.txt"]);
    assert!(!diamond.descriptor().has_conflicts);
}

#[tokio::test]
async fn many_entries_span_pages() {
    let stores = stores_with_repo().await;
    let settings = settings();
    let mut diamond = new_diamond(&stores, &settings, ConflictMode::EnableConflicts).await;
    let id = diamond.descriptor().diamond_id.clone();
    for split in 0..4 {
        let entries = (0..7)
            .map(|i| entry(&format!("s{split}/f{i}"), &format!("h{split}{i}"), i))
            .collect();
        done_split(&stores, &settings, &id, &format!("split-{split}"), entries).await;
    }

    let bundle = diamond.commit().await.expect("commit");
    assert_eq!(bundle.bundle_entries_file_count, 10);
    let entries = bundle_entries(REPO, &bundle, &stores, &settings).await.unwrap();
    assert_eq!(entries.len(), 28);
    let mut sorted = names(&entries);
    sorted.sort();
    assert_eq!(names(&entries), sorted);
    assert_eq!(diamond.descriptor().splits.len(), 4);
}

#[tokio::test]
async fn custom_deconflicter_names_the_loser() {
    let stores = stores_with_repo().await;
    let settings = settings();
    let mut diamond = new_diamond(&stores, &settings, ConflictMode::EnableConflicts)
        .await
        .with_deconflicter(|split, path| format!("{path}.{split}.orig"))
        .with_message("nightly import");
    let id = diamond.descriptor().diamond_id.clone();
    done_split(&stores, &settings, &id, "A", vec![entry("a.txt", "h1", 1)]).await;
    done_split(&stores, &settings, &id, "B", vec![entry("a.txt", "h2", 2)]).await;

    let bundle = diamond.commit().await.expect("commit");
    assert_eq!(bundle.message, "nightly import");
    let entries = bundle_entries(REPO, &bundle, &stores, &settings).await.unwrap();
    assert_eq!(names(&entries), vec!["a.txt", "a.txt.A.orig"]);
}

#[cfg(feature = "bundle-preserve")]
#[tokio::test]
async fn preserved_bundle_id() {
    use diamond_store::id::Ufoid;

    let stores = stores_with_repo().await;
    let settings = settings();
    let bundle_id = Ufoid::new().to_string();

    let mut diamond = new_diamond(&stores, &settings, ConflictMode::EnableConflicts)
        .await
        .with_bundle_id(bundle_id.clone());
    let id = diamond.descriptor().diamond_id.clone();
    done_split(&stores, &settings, &id, "A", vec![entry("a.txt", "h1", 1)]).await;
    assert_eq!(diamond.commit().await.expect("commit").id, bundle_id);

    let mut reuse = new_diamond(&stores, &settings, ConflictMode::EnableConflicts)
        .await
        .with_bundle_id(bundle_id);
    let id = reuse.descriptor().diamond_id.clone();
    done_split(&stores, &settings, &id, "A", vec![entry("a.txt", "h1", 1)]).await;
    assert!(matches!(
        reuse.commit().await,
        Err(Error::BundleIdExists { .. })
    ));

    let mut invalid = new_diamond(&stores, &settings, ConflictMode::EnableConflicts)
        .await
        .with_bundle_id("not-an-id");
    assert!(matches!(invalid.commit().await, Err(Error::InvalidId(_))));
}
