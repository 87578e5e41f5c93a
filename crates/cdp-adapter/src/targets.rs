//! Page targets opened through the adapter and not yet closed.

use dashmap::DashMap;

use crate::ids::PageId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenTarget {
    pub target_id: String,
    pub session_id: String,
    pub url: Option<String>,
}

#[derive(Default)]
pub struct OpenTargets {
    by_page: DashMap<PageId, OpenTarget>,
}

impl OpenTargets {
    pub fn track(&self, page: PageId, target_id: String, session_id: String) {
        self.by_page.insert(
            page,
            OpenTarget {
                target_id,
                session_id,
                url: None,
            },
        );
    }

    pub fn navigated(&self, page: &PageId, url: &str) {
        if let Some(mut target) = self.by_page.get_mut(page) {
            target.url = Some(url.to_string());
        }
    }

    pub fn forget(&self, page: &PageId) -> Option<OpenTarget> {
        self.by_page.remove(page).map(|(_, target)| target)
    }

    pub fn get(&self, page: &PageId) -> Option<OpenTarget> {
        self.by_page.get(page).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.by_page.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_page.is_empty()
    }

    /// Forget every target and return their target ids.
    pub fn take_all(&self) -> Vec<String> {
        let pages: Vec<PageId> = self.by_page.iter().map(|entry| *entry.key()).collect();
        pages
            .iter()
            .filter_map(|page| self.forget(page))
            .map(|target| target.target_id)
            .collect()
    }
}
