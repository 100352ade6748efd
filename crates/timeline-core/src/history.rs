use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{HistoryPage, Message};

/// Hard upper bound for a single history request.
pub const MAX_PAGE_LIMIT: u16 = 100;

/// Clamp a requested page limit against safety and server caps.
///
/// The result is always in `1..=100`.
pub fn bounded_paginate_limit(requested: u16, server_cap: u16) -> u16 {
    let safe_requested = requested.max(1);
    let safe_cap = server_cap.max(1);
    safe_requested.min(safe_cap).min(MAX_PAGE_LIMIT)
}

/// History loader state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
}

/// Which history query a request maps to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PageKind {
    /// Most recent messages, fetched before the real-time subscription starts.
    Initial { limit: u16 },
    /// Messages older than `end_ms`, the oldest loaded message timestamp.
    Older { end_ms: u64, limit: u16 },
}

impl PageKind {
    pub fn limit(&self) -> u16 {
        match self {
            Self::Initial { limit } | Self::Older { limit, .. } => *limit,
        }
    }
}

/// One in-flight history request, tagged with the room session it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageRequest {
    /// Room the request was issued for.
    pub room_id: String,
    /// Session counter at issue time. Bumped on every reset.
    pub session: u64,
    /// Query to run.
    pub kind: PageKind,
}

/// Widened query for a boundary timestamp shared by more messages than one page holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TieBreak {
    /// Re-query the same timestamp with a larger limit.
    Widen { end_ms: u64, limit: u16 },
    /// Even `MAX_PAGE_LIMIT` could not get past `end_ms`; continue strictly before it.
    SkipPast { end_ms: u64 },
}

/// `idle -> loading -> idle` paging state with a sticky `has_more` flag.
#[derive(Debug, Clone)]
pub struct HistoryLoader {
    state: LoadState,
    has_more: bool,
    initial_limit: u16,
    page_limit: u16,
    tie: Option<TieBreak>,
}

impl HistoryLoader {
    /// Create a loader with already-bounded page limits.
    pub fn new(initial_limit: u16, page_limit: u16) -> Self {
        Self {
            state: LoadState::Idle,
            has_more: true,
            initial_limit: initial_limit.max(1),
            page_limit: page_limit.max(1),
            tie: None,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_loading(&self) -> bool {
        self.state == LoadState::Loading
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Start the initial backfill. Rejected while another page is in flight.
    pub fn begin_initial(&mut self) -> Option<PageKind> {
        if self.is_loading() {
            return None;
        }
        Some(self.start_initial())
    }

    /// Start loading the page before `oldest`.
    ///
    /// Guarded, not queued: no-op while loading, when history is exhausted, or
    /// when nothing is loaded yet to page back from.
    pub fn begin_older(&mut self, oldest: Option<&Message>) -> Option<PageKind> {
        if self.is_loading() || !self.has_more {
            return None;
        }
        let boundary = oldest?.created_at_ms;
        let kind = match self.tie {
            Some(TieBreak::Widen { end_ms, limit }) if end_ms == boundary => {
                PageKind::Older { end_ms, limit }
            }
            Some(TieBreak::SkipPast { end_ms }) if end_ms == boundary => PageKind::Older {
                end_ms: end_ms.checked_sub(1)?,
                limit: self.page_limit,
            },
            _ => {
                self.tie = None;
                PageKind::Older {
                    end_ms: boundary,
                    limit: self.page_limit,
                }
            }
        };
        self.state = LoadState::Loading;
        Some(kind)
    }

    /// Record a successful page and return to idle.
    ///
    /// `added` is the number of serials the page contributed. A full older
    /// page that added nothing means the boundary timestamp is shared by more
    /// messages than fit in one page; the next request widens the limit, and
    /// once the limit is at `MAX_PAGE_LIMIT` it steps past that timestamp.
    pub fn complete(&mut self, kind: &PageKind, page: &HistoryPage, added: usize) {
        self.state = LoadState::Idle;
        let (end_ms, limit) = match *kind {
            PageKind::Initial { .. } => {
                self.has_more = page.has_next;
                return;
            }
            PageKind::Older { end_ms, limit } => (end_ms, limit),
        };

        self.has_more =
            !page.items.is_empty() && page.has_next && page.items.len() >= usize::from(limit);
        if !self.has_more || added > 0 {
            return;
        }

        self.tie = Some(if limit < MAX_PAGE_LIMIT {
            TieBreak::Widen {
                end_ms,
                limit: limit.saturating_mul(2).min(MAX_PAGE_LIMIT),
            }
        } else {
            warn!(
                end_ms,
                limit,
                "older page made no progress at the widest limit; skipping past timestamp"
            );
            TieBreak::SkipPast { end_ms }
        });
    }

    /// Record a failed page. `has_more` is left as it was.
    pub fn fail(&mut self) {
        self.state = LoadState::Idle;
    }

    /// Forget paging progress and start a fresh initial backfill.
    ///
    /// Used after a discontinuity; any request still in flight becomes stale.
    pub fn restart(&mut self) -> PageKind {
        self.has_more = true;
        self.tie = None;
        self.start_initial()
    }

    fn start_initial(&mut self) -> PageKind {
        self.state = LoadState::Loading;
        PageKind::Initial {
            limit: self.initial_limit,
        }
    }
}

/// Convert a newest-first page into a chronological batch.
pub fn chronological(page: HistoryPage) -> Vec<Message> {
    let mut items = page.items;
    items.reverse();
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(count: usize, has_next: bool) -> HistoryPage {
        HistoryPage {
            items: (0..count)
                .rev()
                .map(|i| Message::new(format!("{i:03}"), "alice", "x", i as u64))
                .collect(),
            has_next,
        }
    }

    #[test]
    fn bounds_paginate_limit_for_safety() {
        assert_eq!(bounded_paginate_limit(0, 200), 1);
        assert_eq!(bounded_paginate_limit(25, 10), 10);
        assert_eq!(bounded_paginate_limit(150, 500), 100);
        assert_eq!(bounded_paginate_limit(50, 0), 1);
    }

    #[test]
    fn initial_backfill_takes_has_next_from_page() {
        let mut loader = HistoryLoader::new(30, 50);
        let kind = loader.begin_initial().expect("idle loader should start");
        assert_eq!(kind, PageKind::Initial { limit: 30 });
        assert!(loader.is_loading());

        loader.complete(&kind, &page(3, false), 3);
        assert_eq!(loader.state(), LoadState::Idle);
        assert!(!loader.has_more());
    }

    #[test]
    fn rejects_overlapping_requests() {
        let mut loader = HistoryLoader::new(30, 50);
        let oldest = Message::new("005", "alice", "x", 1_700);
        assert!(loader.begin_older(Some(&oldest)).is_some());
        assert_eq!(loader.begin_older(Some(&oldest)), None);
        assert_eq!(loader.begin_initial(), None);
    }

    #[test]
    fn older_page_uses_oldest_timestamp_as_boundary() {
        let mut loader = HistoryLoader::new(30, 50);
        let oldest = Message::new("005", "alice", "x", 1_700);
        assert_eq!(
            loader.begin_older(Some(&oldest)),
            Some(PageKind::Older {
                end_ms: 1_700,
                limit: 50
            })
        );
    }

    #[test]
    fn nothing_to_page_back_from_is_a_no_op() {
        let mut loader = HistoryLoader::new(30, 50);
        assert_eq!(loader.begin_older(None), None);
        assert!(!loader.is_loading());
    }

    #[test]
    fn short_or_empty_older_page_exhausts_history() {
        let oldest = Message::new("005", "alice", "x", 1_700);

        let mut loader = HistoryLoader::new(30, 4);
        let kind = loader.begin_older(Some(&oldest)).expect("should start");
        loader.complete(&kind, &page(4, true), 4);
        assert!(loader.has_more());

        let kind = loader.begin_older(Some(&oldest)).expect("should start");
        loader.complete(&kind, &page(2, true), 2);
        assert!(!loader.has_more());
        assert_eq!(loader.begin_older(Some(&oldest)), None);

        let mut loader = HistoryLoader::new(30, 4);
        let kind = loader.begin_older(Some(&oldest)).expect("should start");
        loader.complete(&kind, &page(0, true), 0);
        assert!(!loader.has_more());
    }

    #[test]
    fn failure_returns_to_idle_and_keeps_has_more() {
        let mut loader = HistoryLoader::new(30, 50);
        let oldest = Message::new("005", "alice", "x", 1_700);
        loader.begin_older(Some(&oldest)).expect("should start");
        loader.fail();

        assert!(!loader.is_loading());
        assert!(loader.has_more());
        assert!(loader.begin_older(Some(&oldest)).is_some());
    }

    #[test]
    fn restart_resets_has_more_even_while_loading() {
        let mut loader = HistoryLoader::new(30, 50);
        let kind = loader.begin_initial().expect("should start");
        loader.complete(&kind, &page(1, false), 1);
        assert!(!loader.has_more());

        let oldest = Message::new("005", "alice", "x", 1_700);
        assert_eq!(loader.begin_older(Some(&oldest)), None);
        assert_eq!(loader.restart(), PageKind::Initial { limit: 30 });
        assert!(loader.is_loading());
        assert!(loader.has_more());
    }

    #[test]
    fn full_page_without_new_serials_widens_the_same_boundary() {
        let mut loader = HistoryLoader::new(30, 2);
        let oldest = Message::new("d", "alice", "x", 10);

        let kind = loader.begin_older(Some(&oldest)).expect("should start");
        loader.complete(&kind, &page(2, true), 0);
        assert!(loader.has_more());

        let kind = loader.begin_older(Some(&oldest)).expect("should start");
        assert_eq!(kind, PageKind::Older { end_ms: 10, limit: 4 });
        loader.complete(&kind, &page(4, true), 2);

        let kind = loader.begin_older(Some(&oldest)).expect("should start");
        assert_eq!(kind, PageKind::Older { end_ms: 10, limit: 4 });
        loader.complete(&kind, &page(4, true), 0);

        let kind = loader.begin_older(Some(&oldest)).expect("should start");
        assert_eq!(kind, PageKind::Older { end_ms: 10, limit: 8 });
    }

    #[test]
    fn widening_is_dropped_once_the_boundary_moves() {
        let mut loader = HistoryLoader::new(30, 2);
        let kind = loader
            .begin_older(Some(&Message::new("d", "alice", "x", 10)))
            .expect("should start");
        loader.complete(&kind, &page(2, true), 0);

        let kind = loader
            .begin_older(Some(&Message::new("a", "alice", "x", 7)))
            .expect("should start");
        assert_eq!(kind, PageKind::Older { end_ms: 7, limit: 2 });
    }

    #[test]
    fn stuck_at_widest_limit_steps_past_the_timestamp() {
        let mut loader = HistoryLoader::new(30, MAX_PAGE_LIMIT);
        let oldest = Message::new("d", "alice", "x", 10);

        let kind = loader.begin_older(Some(&oldest)).expect("should start");
        loader.complete(&kind, &page(usize::from(MAX_PAGE_LIMIT), true), 0);

        let kind = loader.begin_older(Some(&oldest)).expect("should start");
        assert_eq!(
            kind,
            PageKind::Older {
                end_ms: 9,
                limit: MAX_PAGE_LIMIT
            }
        );
    }

    #[test]
    fn reverses_pages_into_chronological_order() {
        let items = chronological(page(3, false));
        let serials: Vec<_> = items.iter().map(|m| m.serial.as_str()).collect();
        assert_eq!(serials, ["000", "001", "002"]);
    }
}
