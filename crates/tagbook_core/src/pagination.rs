//! # Pagination
//!
//! Search results are built in two steps: every candidate that survives filtering is added to a
//! [`PageFinder`], which then sorts the full candidate set and cuts one page out of it.
//!
//! Two granularities are supported. [`RepoPageFinder`] counts repositories. [`TagPageFinder`]
//! counts individual tags across repository boundaries, splitting the first and last repository
//! of a page so that only the tags inside the page survive. Within a repository tags are always
//! ordered alphabetically.
use std::cmp::Ordering;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::{Error, Result};
use crate::types::RepoMetadata;

/// Order of a result page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum SortCriteria {
    #[default]
    AlphabeticAsc,
    AlphabeticDsc,
    /// Best rank first.
    Relevance,
    /// Most recently updated first.
    UpdateTime,
    /// Most downloaded first.
    Downloads,
    /// Most starred first.
    Stars,
}

impl FromStr for SortCriteria {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ALPHABETIC_ASC" => Ok(Self::AlphabeticAsc),
            "ALPHABETIC_DSC" => Ok(Self::AlphabeticDsc),
            "RELEVANCE" => Ok(Self::Relevance),
            "UPDATE_TIME" => Ok(Self::UpdateTime),
            "DOWNLOADS" => Ok(Self::Downloads),
            "STARS" => Ok(Self::Stars),
            s => Err(Error::InvalidPaging(format!("unsupported sort criteria {s:?}"))),
        }
    }
}

/// Requested page. `limit == 0` means every item from `offset` onward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageInput {
    pub limit: i32,
    pub offset: i32,
    pub sort_by: SortCriteria,
}

impl PageInput {
    pub fn new(limit: i32, offset: i32, sort_by: SortCriteria) -> Self {
        Self {
            limit,
            offset,
            sort_by,
        }
    }

    fn bounds(&self) -> Result<(usize, Option<usize>)> {
        if self.limit < 0 {
            return Err(Error::InvalidPaging(format!(
                "negative limit {}",
                self.limit
            )));
        }
        if self.offset < 0 {
            return Err(Error::InvalidPaging(format!(
                "negative offset {}",
                self.offset
            )));
        }
        let limit = match self.limit {
            0 => None,
            l => Some(l as usize),
        };
        Ok((self.offset as usize, limit))
    }
}

/// Size of a returned page and of the candidate set it was cut from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub item_count: usize,
    pub total_count: usize,
}

/// Request-scoped projection of a repository with the values it is sorted by.
#[derive(Clone, Debug)]
pub struct DetailedRepoMeta {
    pub repo: RepoMetadata,
    pub rank: i32,
    pub last_updated: Option<DateTime<Utc>>,
    pub downloads: u64,
}

impl DetailedRepoMeta {
    pub fn new(repo: RepoMetadata) -> Self {
        let downloads = repo.download_count();
        Self {
            repo,
            rank: 0,
            last_updated: None,
            downloads,
        }
    }
}

fn compare(sort_by: SortCriteria, a: &DetailedRepoMeta, b: &DetailedRepoMeta) -> Ordering {
    let by_name = a.repo.name.cmp(&b.repo.name);
    match sort_by {
        SortCriteria::AlphabeticAsc => by_name,
        SortCriteria::AlphabeticDsc => by_name.reverse(),
        SortCriteria::Relevance => a.rank.cmp(&b.rank).then(by_name),
        // newest first, undated last
        SortCriteria::UpdateTime => b.last_updated.cmp(&a.last_updated).then(by_name),
        SortCriteria::Downloads => b.downloads.cmp(&a.downloads).then(by_name),
        SortCriteria::Stars => b.repo.stars.cmp(&a.repo.stars).then(by_name),
    }
}

/// Collects candidates and produces one sorted page of them.
pub trait PageFinder {
    fn add(&mut self, meta: DetailedRepoMeta);

    /// Sort every candidate added so far and return the requested page.
    fn page(self) -> (Vec<RepoMetadata>, PageInfo);
}

/// Pages over whole repositories.
#[derive(Debug)]
pub struct RepoPageFinder {
    buffer: Vec<DetailedRepoMeta>,
    limit: Option<usize>,
    offset: usize,
    sort_by: SortCriteria,
}

impl RepoPageFinder {
    pub fn new(input: &PageInput) -> Result<Self> {
        let (offset, limit) = input.bounds()?;
        Ok(Self {
            buffer: Vec::new(),
            limit,
            offset,
            sort_by: input.sort_by,
        })
    }
}

impl PageFinder for RepoPageFinder {
    fn add(&mut self, meta: DetailedRepoMeta) {
        self.buffer.push(meta);
    }

    fn page(mut self) -> (Vec<RepoMetadata>, PageInfo) {
        let total = self.buffer.len();
        if self.offset >= total {
            return (Vec::new(), PageInfo::default());
        }

        let sort_by = self.sort_by;
        self.buffer.sort_by(|a, b| compare(sort_by, a, b));

        let end = match self.limit {
            Some(limit) => total.min(self.offset + limit),
            None => total,
        };
        let repos: Vec<RepoMetadata> = self
            .buffer
            .drain(self.offset..end)
            .map(|d| d.repo)
            .collect();

        let info = PageInfo {
            item_count: repos.len(),
            total_count: total,
        };
        (repos, info)
    }
}

/// Pages over individual tags, keeping them grouped by repository.
#[derive(Debug)]
pub struct TagPageFinder {
    buffer: Vec<DetailedRepoMeta>,
    limit: Option<usize>,
    offset: usize,
    sort_by: SortCriteria,
}

impl TagPageFinder {
    pub fn new(input: &PageInput) -> Result<Self> {
        let (offset, limit) = input.bounds()?;
        Ok(Self {
            buffer: Vec::new(),
            limit,
            offset,
            sort_by: input.sort_by,
        })
    }
}

impl PageFinder for TagPageFinder {
    fn add(&mut self, meta: DetailedRepoMeta) {
        if !meta.repo.tags.is_empty() {
            self.buffer.push(meta);
        }
    }

    fn page(mut self) -> (Vec<RepoMetadata>, PageInfo) {
        let total: usize = self.buffer.iter().map(|d| d.repo.tags.len()).sum();
        let mut info = PageInfo {
            item_count: 0,
            total_count: total,
        };
        if self.offset >= total {
            return (Vec::new(), info);
        }

        let sort_by = self.sort_by;
        self.buffer.sort_by(|a, b| compare(sort_by, a, b));

        let mut to_skip = self.offset;
        let mut remaining = self.limit.unwrap_or(total);
        let mut repos = Vec::new();
        for detailed in self.buffer {
            if remaining == 0 {
                break;
            }
            let mut repo = detailed.repo;
            let count = repo.tags.len();
            if to_skip >= count {
                to_skip -= count;
                continue;
            }

            let keep: Vec<String> = repo
                .tags
                .keys()
                .skip(to_skip)
                .take(remaining)
                .cloned()
                .collect();
            to_skip = 0;
            remaining -= keep.len();
            info.item_count += keep.len();

            repo.tags.retain(|tag, _| keep.contains(tag));
            repos.push(repo);
        }

        (repos, info)
    }
}
