use std::ops::Range;

use crate::{serial_index::index_of, types::Message};

/// Where the active window is anchored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowAnchor {
    /// Follow the newest messages.
    Latest,
    /// Stay centered on a historical message.
    Around(String),
}

/// Bounded, contiguous slice of the message sequence selected for rendering.
#[derive(Debug, Clone)]
pub struct WindowSelector {
    window_size: usize,
    anchor: WindowAnchor,
    range: Range<usize>,
    edges: Option<(String, String)>,
}

impl WindowSelector {
    /// Create a selector following the latest messages (`window_size >= 1`).
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            anchor: WindowAnchor::Latest,
            range: 0..0,
            edges: None,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn anchor(&self) -> &WindowAnchor {
        &self.anchor
    }

    /// Index range of the window within the sequence it was last computed for.
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    /// Messages in the window.
    pub fn window<'a>(&self, sequence: &'a [Message]) -> &'a [Message] {
        let end = self.range.end.min(sequence.len());
        let start = self.range.start.min(end);
        &sequence[start..end]
    }

    /// Anchor the window to the tail of the sequence.
    pub fn show_latest(&mut self, sequence: &[Message]) {
        self.anchor = WindowAnchor::Latest;
        let end = sequence.len();
        self.set_range(sequence, end.saturating_sub(self.window_size)..end);
    }

    /// Center the window on `serial`.
    ///
    /// Returns `false` and leaves the window untouched when the serial is not loaded.
    pub fn show_around(&mut self, sequence: &[Message], serial: &str) -> bool {
        let Some(center) = index_of(sequence, serial) else {
            return false;
        };
        self.anchor = WindowAnchor::Around(serial.to_owned());
        let range = self.centered_range(sequence.len(), center);
        self.set_range(sequence, range);
        true
    }

    /// Recompute after the underlying sequence changed.
    ///
    /// A tail-anchored window slides to the new tail. A centered window keeps
    /// showing the same serials, relocated by its first and last entries.
    pub fn on_sequence_changed(&mut self, sequence: &[Message]) {
        let WindowAnchor::Around(center) = self.anchor.clone() else {
            self.show_latest(sequence);
            return;
        };

        let relocated = self.edges.as_ref().and_then(|(first, last)| {
            let start = index_of(sequence, first)?;
            let end = index_of(sequence, last)? + 1;
            Some(start..end.min(start + self.window_size))
        });

        match relocated {
            Some(range) => self.set_range(sequence, range),
            None => {
                if !self.show_around(sequence, &center) {
                    self.show_latest(sequence);
                }
            }
        }
    }

    fn centered_range(&self, len: usize, center: usize) -> Range<usize> {
        let start = center.saturating_sub(self.window_size / 2);
        let end = (start + self.window_size).min(len);
        end.saturating_sub(self.window_size)..end
    }

    fn set_range(&mut self, sequence: &[Message], range: Range<usize>) {
        self.edges = match (sequence.get(range.start), range.end.checked_sub(1)) {
            (Some(first), Some(last_index)) if range.start < range.end => sequence
                .get(last_index)
                .map(|last| (first.serial.clone(), last.serial.clone())),
            _ => None,
        };
        self.range = range;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequence(count: usize) -> Vec<Message> {
        (0..count)
            .map(|i| Message::new(format!("{i:04}"), "alice", "x", i as u64))
            .collect()
    }

    fn serials(window: &[Message]) -> Vec<&str> {
        window.iter().map(|m| m.serial.as_str()).collect()
    }

    #[test]
    fn latest_window_is_the_tail() {
        let seq = sequence(10);
        let mut selector = WindowSelector::new(4);
        selector.show_latest(&seq);

        assert_eq!(selector.range(), 6..10);
        assert_eq!(serials(selector.window(&seq)), ["0006", "0007", "0008", "0009"]);
    }

    #[test]
    fn short_sequence_fits_entirely() {
        let seq = sequence(3);
        let mut selector = WindowSelector::new(200);
        selector.show_latest(&seq);
        assert_eq!(selector.window(&seq).len(), 3);
    }

    #[test]
    fn centers_on_target_and_clamps_to_bounds() {
        let seq = sequence(20);
        let mut selector = WindowSelector::new(5);

        assert!(selector.show_around(&seq, "0010"));
        assert_eq!(selector.range(), 8..13);
        assert_eq!(selector.anchor(), &WindowAnchor::Around("0010".into()));

        assert!(selector.show_around(&seq, "0001"));
        assert_eq!(selector.range(), 0..5);

        assert!(selector.show_around(&seq, "0019"));
        assert_eq!(selector.range(), 15..20);
    }

    #[test]
    fn unknown_target_leaves_window_unchanged() {
        let seq = sequence(10);
        let mut selector = WindowSelector::new(4);
        selector.show_latest(&seq);

        assert!(!selector.show_around(&seq, "9999"));
        assert_eq!(selector.range(), 6..10);
        assert_eq!(selector.anchor(), &WindowAnchor::Latest);
    }

    #[test]
    fn tail_anchor_slides_when_messages_arrive() {
        let mut selector = WindowSelector::new(3);
        selector.show_latest(&sequence(5));

        let grown = sequence(7);
        selector.on_sequence_changed(&grown);
        assert_eq!(serials(selector.window(&grown)), ["0004", "0005", "0006"]);
    }

    #[test]
    fn centered_anchor_keeps_content_when_history_is_prepended() {
        let seq: Vec<Message> = sequence(20).into_iter().skip(10).collect();
        let mut selector = WindowSelector::new(4);
        assert!(selector.show_around(&seq, "0015"));
        let before: Vec<String> = selector
            .window(&seq)
            .iter()
            .map(|m| m.serial.clone())
            .collect();

        let full = sequence(25);
        selector.on_sequence_changed(&full);

        assert_eq!(
            serials(selector.window(&full)),
            before.iter().map(String::as_str).collect::<Vec<_>>()
        );
    }

    #[test]
    fn centered_anchor_falls_back_to_latest_when_target_disappears() {
        let mut selector = WindowSelector::new(4);
        assert!(selector.show_around(&sequence(10), "0005"));

        selector.on_sequence_changed(&[]);
        assert_eq!(selector.anchor(), &WindowAnchor::Latest);
        assert!(selector.window(&[]).is_empty());
    }
}
