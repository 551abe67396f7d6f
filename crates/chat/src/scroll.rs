use crate::events::ScrollBehavior;

/// Near-bottom distance under which the list keeps following new output.
pub const DEFAULT_FOLLOW_THRESHOLD: f32 = 50.0;

/// Scroll geometry of the message list, as reported by the host view.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollMetrics {
    pub scroll_top: f32,
    pub scroll_height: f32,
    pub client_height: f32,
}

impl ScrollMetrics {
    pub fn new(scroll_top: f32, scroll_height: f32, client_height: f32) -> Self {
        Self {
            scroll_top,
            scroll_height,
            client_height,
        }
    }

    pub fn distance_to_bottom(&self) -> f32 {
        // Absolute value absorbs sub-pixel overshoot at the tail.
        (self.scroll_height - self.client_height - self.scroll_top).abs()
    }
}

/// Tracks whether the message list follows new output.
#[derive(Debug, Clone)]
pub struct ScrollTracker {
    follow_bottom: bool,
    threshold: f32,
}

impl ScrollTracker {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_FOLLOW_THRESHOLD)
    }

    pub fn with_threshold(threshold: f32) -> Self {
        Self {
            follow_bottom: true,
            threshold: if threshold.is_finite() && threshold > 0.0 {
                threshold
            } else {
                DEFAULT_FOLLOW_THRESHOLD
            },
        }
    }

    pub fn is_following_bottom(&self) -> bool {
        self.follow_bottom
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Re-evaluates follow mode from a user scroll event.
    pub fn on_scroll(&mut self, metrics: ScrollMetrics) -> bool {
        self.follow_bottom = metrics.distance_to_bottom() < self.threshold;
        self.follow_bottom
    }

    /// A new user action always snaps back to the latest message.
    pub fn force_follow(&mut self) {
        self.follow_bottom = true;
    }

    /// Returns the scroll to perform after a content change, if following.
    pub fn scroll_request(&self, streaming: bool) -> Option<ScrollBehavior> {
        if !self.follow_bottom {
            return None;
        }

        Some(if streaming {
            ScrollBehavior::Instant
        } else {
            ScrollBehavior::Smooth
        })
    }
}

impl Default for ScrollTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follow_toggles_with_distance_from_bottom() {
        let mut tracker = ScrollTracker::new();
        assert!(tracker.is_following_bottom());

        // 1000 tall content in a 400 tall viewport: bottom is at scroll_top 600.
        let positions = [(600.0, true), (560.0, true), (549.0, false), (120.0, false), (551.0, true)];
        for (scroll_top, expected) in positions {
            let following = tracker.on_scroll(ScrollMetrics::new(scroll_top, 1000.0, 400.0));
            assert_eq!(following, expected, "scroll_top={scroll_top}");
        }
    }

    #[test]
    fn sub_pixel_overshoot_still_counts_as_bottom() {
        let mut tracker = ScrollTracker::new();
        assert!(tracker.on_scroll(ScrollMetrics::new(600.4, 1000.0, 400.0)));
    }

    #[test]
    fn scroll_request_depends_on_streaming_and_follow() {
        let mut tracker = ScrollTracker::with_threshold(10.0);
        assert_eq!(tracker.scroll_request(false), Some(ScrollBehavior::Smooth));
        assert_eq!(tracker.scroll_request(true), Some(ScrollBehavior::Instant));

        tracker.on_scroll(ScrollMetrics::new(0.0, 1000.0, 400.0));
        assert_eq!(tracker.scroll_request(true), None);

        tracker.force_follow();
        assert_eq!(tracker.scroll_request(false), Some(ScrollBehavior::Smooth));
    }

    #[test]
    fn invalid_threshold_falls_back_to_default() {
        assert_eq!(ScrollTracker::with_threshold(-3.0).threshold(), DEFAULT_FOLLOW_THRESHOLD);
        assert_eq!(ScrollTracker::with_threshold(f32::NAN).threshold(), DEFAULT_FOLLOW_THRESHOLD);
    }
}
