mod util;

use diamond_store::prelude::*;
use url::Url;
use util::{names, source};

#[tokio::test]
async fn commit_on_a_local_directory() {
    let dir = tempfile::Builder::new()
        .prefix("diamond-store")
        .tempdir()
        .expect("tempdir");
    let url = Url::from_directory_path(dir.path()).expect("directory url");
    let stores = Stores::with_url(&url).expect("open stores");
    let settings = Settings::default().with_entries_per_file(2).with_batch_size(1);

    create_repo("local", "", Contributor::default(), &stores).await.unwrap();
    let mut diamond = Diamond::new("local", stores.clone(), settings.clone());
    diamond.create().await.unwrap();
    let id = diamond.descriptor().diamond_id.clone();

    let files = [("one", "1"), ("two", "22"), ("three", "333")];
    let mut split = Split::new("local", &id, stores.clone(), settings.clone()).with_source(source(&files).await);
    split.create().await.unwrap();
    assert_eq!(split.upload().await.unwrap().split_entries_file_count, 2);

    let splits = list_splits("local", &id, &stores, &settings).await.unwrap();
    assert_eq!(splits.len(), 1);
    assert_eq!(splits[0].state, SplitState::Done);

    let bundle = diamond.commit().await.unwrap();
    let entries = bundle_entries("local", &bundle, &stores, &settings).await.unwrap();
    assert_eq!(names(&entries), vec!["one", "three", "two"]);

    let diamonds = list_diamonds("local", &stores, &settings).await.unwrap();
    assert_eq!(diamonds.len(), 1);
    assert_eq!(diamonds[0].state, DiamondState::Done);
    assert_eq!(diamonds[0].bundle_id, bundle.id);
}
