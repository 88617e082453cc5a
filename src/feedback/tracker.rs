use std::collections::{HashMap, HashSet};

use super::Rating;

/// Outcome of opening the feedback form for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackPrompt {
    /// Feedback for this message was already submitted.
    AlreadySent(Option<Rating>),
    /// A rating must be picked before feedback can be written.
    NoRatingSelected,
    Ready(Rating),
}

/// Per-message rating selections and submission flags.
///
/// Selecting the current rating again clears it. After submission a
/// message's rating is fixed.
#[derive(Debug, Clone, Default)]
pub struct FeedbackTracker {
    selected: HashMap<usize, Rating>,
    submitted: HashSet<usize>,
}

impl FeedbackTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggles `rating` on message `index` and returns the resulting selection.
    pub fn select(&mut self, index: usize, rating: Rating) -> Option<Rating> {
        if self.submitted.contains(&index) {
            return self.selected(index);
        }
        if self.selected.get(&index) == Some(&rating) {
            self.selected.remove(&index);
            None
        } else {
            self.selected.insert(index, rating);
            Some(rating)
        }
    }

    pub fn selected(&self, index: usize) -> Option<Rating> {
        self.selected.get(&index).copied()
    }

    pub fn is_submitted(&self, index: usize) -> bool {
        self.submitted.contains(&index)
    }

    pub fn prompt(&self, index: usize) -> FeedbackPrompt {
        if self.is_submitted(index) {
            return FeedbackPrompt::AlreadySent(self.selected(index));
        }
        match self.selected(index) {
            Some(rating) => FeedbackPrompt::Ready(rating),
            None => FeedbackPrompt::NoRatingSelected,
        }
    }

    pub fn mark_submitted(&mut self, index: usize) {
        self.submitted.insert(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selecting_twice_clears() {
        let mut tracker = FeedbackTracker::new();
        assert_eq!(tracker.select(1, Rating::ThumbsUp), Some(Rating::ThumbsUp));
        assert_eq!(tracker.select(1, Rating::ThumbsUp), None);
        assert_eq!(tracker.selected(1), None);
    }

    #[test]
    fn switching_rating_replaces_it() {
        let mut tracker = FeedbackTracker::new();
        tracker.select(1, Rating::ThumbsUp);
        assert_eq!(tracker.select(1, Rating::ThumbsDown), Some(Rating::ThumbsDown));
        assert_eq!(tracker.selected(1), Some(Rating::ThumbsDown));
    }

    #[test]
    fn prompt_states() {
        let mut tracker = FeedbackTracker::new();
        assert_eq!(tracker.prompt(3), FeedbackPrompt::NoRatingSelected);

        tracker.select(3, Rating::ThumbsDown);
        assert_eq!(tracker.prompt(3), FeedbackPrompt::Ready(Rating::ThumbsDown));

        tracker.mark_submitted(3);
        assert_eq!(
            tracker.prompt(3),
            FeedbackPrompt::AlreadySent(Some(Rating::ThumbsDown))
        );
    }

    #[test]
    fn submitted_rating_is_fixed() {
        let mut tracker = FeedbackTracker::new();
        tracker.select(0, Rating::ThumbsUp);
        tracker.mark_submitted(0);

        assert_eq!(tracker.select(0, Rating::ThumbsUp), Some(Rating::ThumbsUp));
        assert_eq!(tracker.select(0, Rating::ThumbsDown), Some(Rating::ThumbsUp));
        assert!(tracker.is_submitted(0));
        assert!(!tracker.is_submitted(1));
    }
}
