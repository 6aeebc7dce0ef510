use std::fmt;
use std::sync::Arc;

use crate::model::paths;
use crate::model::SplitDescriptor;

/// Renders the location of page `n`.
pub type Pather = Arc<dyn Fn(u64) -> String + Send + Sync>;

/// Page locations of one indexed object (a split or a bundle).
///
/// Bounded when the page count is known, which is always the case for
/// reading; an upload keeps asking for pages until its input runs dry.
#[derive(Clone)]
pub struct IndexPages {
    id: String,
    pather: Pather,
    count: Option<u64>,
    next: u64,
}

impl IndexPages {
    pub fn bounded(id: impl Into<String>, count: u64, pather: Pather) -> Self {
        IndexPages {
            id: id.into(),
            pather,
            count: Some(count),
            next: 0,
        }
    }

    pub fn unbounded(id: impl Into<String>, pather: Pather) -> Self {
        IndexPages {
            id: id.into(),
            pather,
            count: None,
            next: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_bounded(&self) -> bool {
        self.count.is_some()
    }
}

impl fmt::Debug for IndexPages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexPages")
            .field("id", &self.id)
            .field("count", &self.count)
            .field("next", &self.next)
            .finish()
    }
}

impl Iterator for IndexPages {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.count.is_some_and(|count| self.next >= count) {
            return None;
        }
        let path = (self.pather)(self.next);
        self.next += 1;
        Some(path)
    }
}

/// The objects whose pages an index reads or writes.
pub type PagedObjects = Box<dyn Iterator<Item = IndexPages> + Send>;

fn split_pather(repo: &str, diamond_id: &str, split: &SplitDescriptor) -> Pather {
    let (repo, diamond_id) = (repo.to_owned(), diamond_id.to_owned());
    let (split_id, generation_id) = (split.split_id.clone(), split.generation_id.clone());
    Arc::new(move |index| {
        paths::split_index_page(&repo, &diamond_id, &split_id, &generation_id, index)
    })
}

fn bundle_pather(repo: &str, bundle_id: &str) -> Pather {
    let (repo, bundle_id) = (repo.to_owned(), bundle_id.to_owned());
    Arc::new(move |index| paths::bundle_index_page(&repo, &bundle_id, index))
}

/// Pages written by a split's current generation.
pub fn upload_split(repo: &str, diamond_id: &str, split: &SplitDescriptor) -> PagedObjects {
    let pages = IndexPages::unbounded(split.split_id.clone(), split_pather(repo, diamond_id, split));
    Box::new(std::iter::once(pages))
}

pub fn download_split(repo: &str, diamond_id: &str, split: &SplitDescriptor) -> PagedObjects {
    let pages = IndexPages::bounded(
        split.split_id.clone(),
        split.split_entries_file_count,
        split_pather(repo, diamond_id, split),
    );
    Box::new(std::iter::once(pages))
}

/// Pages of all `splits`, one object per split, tagged with the split id.
pub fn download_all_splits(repo: &str, diamond_id: &str, splits: Vec<SplitDescriptor>) -> PagedObjects {
    let (repo, diamond_id) = (repo.to_owned(), diamond_id.to_owned());
    Box::new(splits.into_iter().map(move |split| {
        IndexPages::bounded(
            split.split_id.clone(),
            split.split_entries_file_count,
            split_pather(&repo, &diamond_id, &split),
        )
    }))
}

pub fn upload_bundle(repo: &str, bundle_id: &str) -> PagedObjects {
    let pages = IndexPages::unbounded(bundle_id, bundle_pather(repo, bundle_id));
    Box::new(std::iter::once(pages))
}

pub fn download_bundle(repo: &str, bundle_id: &str, count: u64) -> PagedObjects {
    let pages = IndexPages::bounded(bundle_id, count, bundle_pather(repo, bundle_id));
    Box::new(std::iter::once(pages))
}
