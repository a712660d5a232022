/// Position and length counters of one logical body.
///
/// `0 <= position <= length` holds at all times; callers clamp their transfer to
/// [`remaining`](Window::remaining) before calling [`advance`](Window::advance).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Window {
    position: u64,
    length: u64,
}

impl Window {
    pub(crate) fn new(length: u64) -> Self {
        Self { position: 0, length }
    }

    pub(crate) fn reset(&mut self, length: u64) {
        *self = Self::new(length);
    }

    /// A window no body can exhaust, used once the connection is a raw duplex stream.
    pub(crate) fn unbounded(&mut self) {
        self.reset(u64::MAX);
    }

    pub(crate) fn position(&self) -> u64 {
        self.position
    }

    pub(crate) fn length(&self) -> u64 {
        self.length
    }

    pub(crate) fn remaining(&self) -> u64 {
        self.length - self.position
    }

    /// Clamps a requested transfer size to what the window still allows.
    pub(crate) fn clamp(&self, requested: usize) -> usize {
        usize::try_from(self.remaining()).map_or(requested, |remaining| requested.min(remaining))
    }

    pub(crate) fn advance(&mut self, count: u64) {
        debug_assert!(count <= self.remaining());
        self.position += count.min(self.remaining());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_and_advance() {
        let mut window = Window::new(10);
        assert_eq!(window.clamp(4), 4);
        window.advance(4);
        assert_eq!(window.remaining(), 6);
        assert_eq!(window.clamp(100), 6);
        window.advance(6);
        assert_eq!(window.remaining(), 0);
        assert_eq!(window.position(), window.length());

        window.reset(3);
        assert_eq!((window.position(), window.length()), (0, 3));
    }

    #[test]
    fn unbounded_window() {
        let mut window = Window::new(0);
        window.unbounded();
        assert_eq!(window.clamp(usize::MAX), usize::MAX);
        window.advance(1 << 40);
        assert_eq!(window.position(), 1 << 40);
    }
}
