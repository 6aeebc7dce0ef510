mod util;

use diamond_store::diamond::list_diamonds_apply;
use diamond_store::prelude::*;
use util::{done_split, entry, settings, stores_with_repo, REPO};

#[tokio::test]
async fn diamonds_report_their_latest_state() {
    let stores = stores_with_repo().await;
    let settings = settings();
    for id in ["d1", "d2", "d3", "d4", "d5"] {
        let mut diamond = Diamond::new(REPO, stores.clone(), settings.clone()).with_diamond_id(id);
        diamond.create().await.unwrap();
        if id == "d2" || id == "d4" {
            diamond.cancel().await.unwrap();
        }
    }
    done_split(&stores, &settings, "d3", "s1", vec![entry("a", "h", 1)]).await;

    let listed = list_diamonds(REPO, &stores, &settings).await.unwrap();
    let states: Vec<(&str, DiamondState)> = listed
        .iter()
        .map(|diamond| (diamond.diamond_id.as_str(), diamond.state))
        .collect();
    assert_eq!(
        states,
        vec![
            ("d1", DiamondState::Initialized),
            ("d2", DiamondState::Canceled),
            ("d3", DiamondState::Initialized),
            ("d4", DiamondState::Canceled),
            ("d5", DiamondState::Initialized),
        ]
    );
}

#[tokio::test]
async fn splits_report_their_latest_state() {
    let stores = stores_with_repo().await;
    let settings = settings();
    let mut diamond = Diamond::new(REPO, stores.clone(), settings.clone()).with_diamond_id("d");
    diamond.create().await.unwrap();

    let mut running = Split::new(REPO, "d", stores.clone(), settings.clone()).with_split_id("a");
    running.create().await.unwrap();
    done_split(&stores, &settings, "d", "b", vec![entry("x", "h", 1)]).await;
    done_split(&stores, &settings, "d", "c", Vec::new()).await;

    let splits = list_splits(REPO, "d", &stores, &settings).await.unwrap();
    let states: Vec<(&str, SplitState)> = splits
        .iter()
        .map(|split| (split.split_id.as_str(), split.state))
        .collect();
    assert_eq!(
        states,
        vec![
            ("a", SplitState::Running),
            ("b", SplitState::Done),
            ("c", SplitState::Done),
        ]
    );
}

#[tokio::test]
async fn missing_parents_fail_the_listing() {
    let stores = stores_with_repo().await;
    let settings = settings();
    assert!(matches!(
        list_diamonds("nowhere", &stores, &settings).await,
        Err(Error::RepoNotFound { .. })
    ));
    assert!(matches!(
        list_splits(REPO, "unknown", &stores, &settings).await,
        Err(Error::DiamondNotFound { .. })
    ));
    assert!(list_diamonds(REPO, &stores, &settings).await.unwrap().is_empty());
}

#[tokio::test]
async fn apply_stops_at_the_first_error() {
    let stores = stores_with_repo().await;
    let settings = settings();
    for id in ["d1", "d2", "d3", "d4"] {
        let mut diamond = Diamond::new(REPO, stores.clone(), settings.clone()).with_diamond_id(id);
        diamond.create().await.unwrap();
    }

    let mut seen = Vec::new();
    let result = list_diamonds_apply(REPO, &stores, &settings, |diamond| {
        if diamond.diamond_id == "d3" {
            return Err(Error::InvalidDescriptor("stop".into()));
        }
        seen.push(diamond.diamond_id);
        Ok(())
    })
    .await;
    assert!(matches!(result, Err(Error::InvalidDescriptor(_))));
    assert_eq!(seen, vec!["d1", "d2"]);
}
