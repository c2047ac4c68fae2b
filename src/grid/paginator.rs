//! Pagination collaborator handle
//!
//! Stands in for the paging widget next to the grid: the widget mutates
//! `page_index`/`page_size`, the data source observes the change stream.
//! `length` is display state (total filtered count) and deliberately does
//! not emit; only index and size changes re-render.

use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;

/// Current paging position. Emitted on every index or size change; the
/// initial state is observed immediately on subscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageState {
    pub page_index: usize,
    pub page_size: usize,
}

/// Shared paging state, usually held as `Arc<Paginator>` by both the UI
/// widget and the data source.
pub struct Paginator {
    state: watch::Sender<PageState>,
    length: AtomicUsize,
}

impl Paginator {
    /// Create a paginator on the first page. `page_size` is clamped to at
    /// least 1.
    pub fn new(page_size: usize) -> Self {
        let (state, _) = watch::channel(PageState {
            page_index: 0,
            page_size: page_size.max(1),
        });
        Self {
            state,
            length: AtomicUsize::new(0),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PageState> {
        self.state.subscribe()
    }

    pub fn page_index(&self) -> usize {
        self.state.borrow().page_index
    }

    /// Move to a page. No-op (and no emission) when already there.
    pub fn set_page_index(&self, page_index: usize) {
        self.state.send_if_modified(|state| {
            if state.page_index == page_index {
                return false;
            }
            state.page_index = page_index;
            true
        });
    }

    pub fn page_size(&self) -> usize {
        self.state.borrow().page_size
    }

    /// Change the page size (clamped to at least 1).
    pub fn set_page_size(&self, page_size: usize) {
        let page_size = page_size.max(1);
        self.state.send_if_modified(|state| {
            if state.page_size == page_size {
                return false;
            }
            state.page_size = page_size;
            true
        });
    }

    pub fn first_page(&self) {
        self.set_page_index(0);
    }

    /// Total number of rows behind the pager.
    pub fn length(&self) -> usize {
        self.length.load(Ordering::SeqCst)
    }

    pub fn set_length(&self, length: usize) {
        self.length.store(length, Ordering::SeqCst);
    }

    /// Index of the last page for the current length and page size.
    pub fn last_page_index(&self) -> usize {
        let length = self.length();
        if length == 0 {
            return 0;
        }
        length.div_ceil(self.page_size()) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_clamped() {
        let paginator = Paginator::new(0);
        assert_eq!(paginator.page_size(), 1);

        paginator.set_page_size(0);
        assert_eq!(paginator.page_size(), 1);
    }

    #[test]
    fn test_last_page_index() {
        let paginator = Paginator::new(10);
        paginator.set_length(25);
        assert_eq!(paginator.last_page_index(), 2);

        paginator.set_length(30);
        assert_eq!(paginator.last_page_index(), 2);

        paginator.set_length(0);
        assert_eq!(paginator.last_page_index(), 0);
    }

    #[tokio::test]
    async fn test_index_changes_emit_once() {
        let paginator = Paginator::new(10);
        let mut rx = paginator.subscribe();

        paginator.set_page_index(2);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().page_index, 2);

        // Setting the same index again must not emit.
        paginator.set_page_index(2);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_length_does_not_emit() {
        let paginator = Paginator::new(10);
        let mut rx = paginator.subscribe();

        paginator.set_length(100);
        assert!(!rx.has_changed().unwrap());
        assert_eq!(paginator.length(), 100);
    }
}
